use serde::{Deserialize, Serialize};

use super::op::{OPCODE_BITS, OPCODE_MASK, OPCODE_SPACE};

// =============================================================================
// REGISTER MACHINE instruction set
// =============================================================================

pub const REGISTER_COUNT: usize = 16;

pub const ZERO: u8 = 0;
/// Return value.
pub const RV: u8 = 1;
/// First argument register; `a0..a5` are `r2..r7`.
pub const A0: u8 = 2;
pub const ARG_REGISTERS: usize = 6;
/// First callee-saved register; `s0..s4` are `r8..r12`.
pub const S0: u8 = 8;
pub const SAVED_REGISTERS: usize = 5;
pub const SP: u8 = 13;
pub const FP: u8 = 14;
pub const LR: u8 = 15;

pub const IMM18_MIN: i64 = -(1 << 17);
pub const IMM18_MAX: i64 = (1 << 17) - 1;
pub const IMM26_MIN: i64 = -(1 << 25);
pub const IMM26_MAX: i64 = (1 << 25) - 1;

/// Register number for `r0`..`r15` or one of the calling-convention aliases.
pub fn parse_register(name: &str) -> Option<u8> {
    let alias = match name {
        "zero" => Some(ZERO),
        "rv" => Some(RV),
        "sp" => Some(SP),
        "fp" => Some(FP),
        "lr" => Some(LR),
        _ => None,
    };
    if alias.is_some() {
        return alias;
    }

    let (prefix, base, count) = match name.get(..1) {
        Some("r") => ("r", 0, REGISTER_COUNT),
        Some("a") => ("a", A0, ARG_REGISTERS),
        Some("s") => ("s", S0, SAVED_REGISTERS),
        _ => return None,
    };
    let n: usize = name.strip_prefix(prefix)?.parse().ok()?;
    (n < count).then_some(base + n as u8)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegFormat {
    /// `op rd rs1 rs2`
    R,
    /// `op rd rs1 imm18`
    I,
    /// `op imm26`
    J,
}

/// Kinds of operand written in assembly text, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegOperand {
    Reg,
    Imm,
    Label,
    Func,
    Struct,
}

use RegOperand::{Func as F, Imm, Label as L, Reg as R, Struct as S};

macro_rules! reg_opcodes {
    ($($(#[$meta:meta])* $variant:ident = $code:literal, $mnemonic:literal, $format:ident, [$($operand:expr),*];)*) => {
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum RegOpcode {
            $($(#[$meta])* $variant = $code,)*
        }

        impl RegOpcode {
            pub const ALL: &'static [RegOpcode] = &[$(RegOpcode::$variant,)*];

            pub fn from_u8(code: u8) -> Option<RegOpcode> {
                match code {
                    $($code => Some(RegOpcode::$variant),)*
                    _ => None,
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(RegOpcode::$variant => $mnemonic,)*
                }
            }

            pub fn format(self) -> RegFormat {
                match self {
                    $(RegOpcode::$variant => RegFormat::$format,)*
                }
            }

            pub fn operands(self) -> &'static [RegOperand] {
                match self {
                    $(RegOpcode::$variant => &[$($operand),*],)*
                }
            }
        }
    };
}

reg_opcodes! {
    Add = 1, "add", R, [R, R, R];
    Sub = 2, "sub", R, [R, R, R];
    Mul = 3, "mul", R, [R, R, R];
    Div = 4, "div", R, [R, R, R];
    Rem = 5, "rem", R, [R, R, R];
    Slt = 6, "slt", R, [R, R, R];
    Sle = 7, "sle", R, [R, R, R];
    Sgt = 8, "sgt", R, [R, R, R];
    Sge = 9, "sge", R, [R, R, R];
    Seq = 10, "seq", R, [R, R, R];
    Sne = 11, "sne", R, [R, R, R];
    And = 12, "and", R, [R, R, R];
    Or = 13, "or", R, [R, R, R];
    Xor = 14, "xor", R, [R, R, R];
    Neg = 15, "neg", R, [R, R];
    /// Logical not: `rd = (rs1 == 0)`
    Not = 16, "not", R, [R, R];
    Mov = 17, "mov", R, [R, R];
    Li = 18, "li", I, [R, Imm];
    /// `rd = mem[rs1 + imm]`
    Lw = 19, "lw", I, [R, R, Imm];
    /// `mem[rs1 + imm] = rd`
    Sw = 20, "sw", I, [R, R, Imm];
    LwG = 21, "lw_g", I, [R, Imm];
    SwG = 22, "sw_g", I, [R, Imm];
    J = 23, "j", J, [L];
    /// Jump when `rs1` is non-zero.
    Jt = 24, "jt", I, [R, L];
    Jf = 25, "jf", I, [R, L];
    Call = 26, "call", J, [F];
    Ret = 27, "ret", J, [];
    Halt = 28, "halt", J, [];
    Print = 29, "print", I, [R];
    /// Allocate a struct instance; its address goes to `rd`.
    Struct = 30, "struct", I, [R, S];
    Nop = 31, "nop", J, [];
}

const _: () = {
    let mut i = 0;
    while i < RegOpcode::ALL.len() {
        let code = RegOpcode::ALL[i] as usize;
        assert!(code > 0 && code < OPCODE_SPACE);
        i += 1;
    }
};

/// Instruction fields a register operand can land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegField {
    Rd,
    Rs1,
    Rs2,
}

impl RegOpcode {
    pub fn from_mnemonic(name: &str) -> Option<RegOpcode> {
        RegOpcode::ALL.iter().copied().find(|op| op.mnemonic() == name)
    }

    /// Fields receiving the register operands, in text order.
    pub fn register_fields(self) -> &'static [RegField] {
        let regs = self
            .operands()
            .iter()
            .filter(|o| **o == RegOperand::Reg)
            .count();
        match (self, regs) {
            (RegOpcode::Jt | RegOpcode::Jf, _) => &[RegField::Rs1],
            (_, 0) => &[],
            (_, 1) => &[RegField::Rd],
            (_, 2) => &[RegField::Rd, RegField::Rs1],
            _ => &[RegField::Rd, RegField::Rs1, RegField::Rs2],
        }
    }

    /// Whether the immediate is an absolute code offset.
    pub fn is_jump(self) -> bool {
        matches!(self, RegOpcode::J | RegOpcode::Jt | RegOpcode::Jf)
    }

    /// Valid immediate range for the format.
    pub fn imm_range(self) -> (i64, i64) {
        match self.format() {
            RegFormat::R => (0, 0),
            RegFormat::I => (IMM18_MIN, IMM18_MAX),
            RegFormat::J => (IMM26_MIN, IMM26_MAX),
        }
    }
}

/// A decoded register instruction. Unused fields are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegInstruction {
    pub op: RegOpcode,
    pub rd: u8,
    pub rs1: u8,
    pub rs2: u8,
    pub imm: i32,
}

impl RegInstruction {
    pub fn new(op: RegOpcode) -> Self {
        RegInstruction {
            op,
            rd: 0,
            rs1: 0,
            rs2: 0,
            imm: 0,
        }
    }

    pub fn r(op: RegOpcode, rd: u8, rs1: u8, rs2: u8) -> Self {
        RegInstruction {
            rd,
            rs1,
            rs2,
            ..Self::new(op)
        }
    }

    pub fn i(op: RegOpcode, rd: u8, rs1: u8, imm: i32) -> Self {
        RegInstruction {
            rd,
            rs1,
            imm,
            ..Self::new(op)
        }
    }

    pub fn j(op: RegOpcode, imm: i32) -> Self {
        RegInstruction {
            imm,
            ..Self::new(op)
        }
    }

    pub fn field(&self, field: RegField) -> u8 {
        match field {
            RegField::Rd => self.rd,
            RegField::Rs1 => self.rs1,
            RegField::Rs2 => self.rs2,
        }
    }

    pub fn set_field(&mut self, field: RegField, reg: u8) {
        match field {
            RegField::Rd => self.rd = reg,
            RegField::Rs1 => self.rs1 = reg,
            RegField::Rs2 => self.rs2 = reg,
        }
    }

    pub fn encode(self) -> u32 {
        let op = self.op as u32;
        let rd = (self.rd as u32 & 0xf) << 6;
        let rs1 = (self.rs1 as u32 & 0xf) << 10;
        match self.op.format() {
            RegFormat::R => op | rd | rs1 | ((self.rs2 as u32 & 0xf) << 14),
            RegFormat::I => op | rd | rs1 | ((self.imm as u32) << 14),
            RegFormat::J => op | ((self.imm as u32) << OPCODE_BITS),
        }
    }

    /// Decode a word; an unknown opcode comes back as the error.
    pub fn decode(word: u32) -> Result<RegInstruction, u8> {
        let code = (word & OPCODE_MASK) as u8;
        let op = RegOpcode::from_u8(code).ok_or(code)?;
        let rd = ((word >> 6) & 0xf) as u8;
        let rs1 = ((word >> 10) & 0xf) as u8;
        Ok(match op.format() {
            RegFormat::R => Self::r(op, rd, rs1, ((word >> 14) & 0xf) as u8),
            RegFormat::I => Self::i(op, rd, rs1, (word as i32) >> 14),
            RegFormat::J => Self::j(op, (word as i32) >> OPCODE_BITS),
        })
    }
}
