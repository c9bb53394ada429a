use serde::{Deserialize, Serialize};

// =============================================================================
// OPCODE - stack machine instruction set
// =============================================================================

/// Bits of an instruction word holding the opcode.
pub const OPCODE_BITS: u32 = 6;
pub const OPCODE_MASK: u32 = (1 << OPCODE_BITS) - 1;
/// Size of the opcode space; also the size of the VM's dispatch table.
pub const OPCODE_SPACE: usize = 1 << OPCODE_BITS;

/// Signed operand range of a stack instruction word.
pub const OPERAND_MIN: i64 = -(1 << 25);
pub const OPERAND_MAX: i64 = (1 << 25) - 1;

pub fn operand_fits(value: i64) -> bool {
    (OPERAND_MIN..=OPERAND_MAX).contains(&value)
}

/// What an instruction's operand refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    /// Immediate integer.
    Int,
    /// Constant pool index.
    Pool,
    /// Absolute code offset.
    Label,
    /// Function table index.
    Func,
    /// Frame slot of the current function.
    Local,
    /// Global slot.
    Global,
    /// Field offset within a struct instance.
    Field,
    /// Struct table index.
    Struct,
}

/// Operand stack effect of one instruction, as observed by the VM.
///
/// `call` pops the arguments into the new frame; the callee's return value
/// appears on the stack when its `retv` executes, so `retv` moves one value
/// from the callee's part of the stack into the caller's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEffect {
    Fixed { pops: u8, pushes: u8 },
    /// Pops the callee's argument count.
    Call,
}

const fn fx(pops: u8, pushes: u8) -> StackEffect {
    StackEffect::Fixed { pops, pushes }
}

macro_rules! opcodes {
    ($($(#[$meta:meta])* $variant:ident = $code:literal, $mnemonic:literal, $operand:ident, $effect:expr;)*) => {
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Opcode {
            $($(#[$meta])* $variant = $code,)*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            pub fn from_u8(code: u8) -> Option<Opcode> {
                match code {
                    $($code => Some(Opcode::$variant),)*
                    _ => None,
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $mnemonic,)*
                }
            }

            pub fn operand(self) -> OperandKind {
                match self {
                    $(Opcode::$variant => OperandKind::$operand,)*
                }
            }

            pub fn stack_effect(self) -> StackEffect {
                match self {
                    $(Opcode::$variant => $effect,)*
                }
            }
        }
    };
}

opcodes! {
    // ─── Integer arithmetic and comparison ( a b -- c ) ───
    IAdd = 1, "iadd", None, fx(2, 1);
    ISub = 2, "isub", None, fx(2, 1);
    IMul = 3, "imul", None, fx(2, 1);
    IDiv = 4, "idiv", None, fx(2, 1);
    IRem = 5, "irem", None, fx(2, 1);
    INeg = 6, "ineg", None, fx(1, 1);
    ILt = 7, "ilt", None, fx(2, 1);
    ILe = 8, "ile", None, fx(2, 1);
    IGt = 9, "igt", None, fx(2, 1);
    IGe = 10, "ige", None, fx(2, 1);
    /// Equality on any two values.
    IEq = 11, "ieq", None, fx(2, 1);
    INe = 12, "ine", None, fx(2, 1);
    IAnd = 13, "iand", None, fx(2, 1);
    IOr = 14, "ior", None, fx(2, 1);
    IXor = 15, "ixor", None, fx(2, 1);
    /// Logical not ( bool -- bool )
    INot = 16, "inot", None, fx(1, 1);

    // ─── Float arithmetic and comparison ───
    FAdd = 17, "fadd", None, fx(2, 1);
    FSub = 18, "fsub", None, fx(2, 1);
    FMul = 19, "fmul", None, fx(2, 1);
    FDiv = 20, "fdiv", None, fx(2, 1);
    FNeg = 21, "fneg", None, fx(1, 1);
    FLt = 22, "flt", None, fx(2, 1);
    FLe = 23, "fle", None, fx(2, 1);
    FGt = 24, "fgt", None, fx(2, 1);
    FGe = 25, "fge", None, fx(2, 1);
    FEq = 26, "feq", None, fx(2, 1);
    FNe = 27, "fne", None, fx(2, 1);
    /// ( int -- float )
    IToF = 28, "itof", None, fx(1, 1);

    // ─── Control flow ───
    Call = 29, "call", Func, StackEffect::Call;
    Ret = 30, "ret", None, fx(0, 0);
    RetV = 31, "retv", None, fx(1, 1);
    Br = 32, "br", Label, fx(0, 0);
    Brt = 33, "brt", Label, fx(1, 0);
    Brf = 34, "brf", Label, fx(1, 0);

    // ─── Constants ( -- v ) ───
    IConst = 35, "iconst", Int, fx(0, 1);
    /// Integer too wide for the operand field, from the constant pool.
    LConst = 36, "lconst", Pool, fx(0, 1);
    FConst = 37, "fconst", Pool, fx(0, 1);
    SConst = 38, "sconst", Pool, fx(0, 1);
    CConst = 39, "cconst", Int, fx(0, 1);
    BConst = 40, "bconst", Int, fx(0, 1);
    Null = 41, "null", None, fx(0, 1);

    // ─── Memory ───
    Load = 42, "load", Local, fx(0, 1);
    Store = 43, "store", Local, fx(1, 0);
    GLoad = 44, "gload", Global, fx(0, 1);
    GStore = 45, "gstore", Global, fx(1, 0);
    /// ( obj -- value )
    FLoad = 46, "fload", Field, fx(1, 1);
    /// ( obj value -- )
    FStore = 47, "fstore", Field, fx(2, 0);
    Struct = 48, "struct", Struct, fx(0, 1);
    /// ( len -- array )
    NewArray = 49, "newarray", None, fx(1, 1);
    /// ( array index -- value )
    ALoad = 50, "aload", None, fx(2, 1);
    /// ( array index value -- )
    AStore = 51, "astore", None, fx(3, 0);

    // ─── Misc ───
    Print = 52, "print", None, fx(1, 0);
    Pop = 53, "pop", None, fx(1, 0);
    Dup = 54, "dup", None, fx(1, 2);
    Halt = 55, "halt", None, fx(0, 0);
    Nop = 56, "nop", None, fx(0, 0);
}

// every opcode must fit the opcode field; 0 stays invalid
const _: () = {
    let mut i = 0;
    while i < Opcode::ALL.len() {
        let code = Opcode::ALL[i] as usize;
        assert!(code > 0 && code < OPCODE_SPACE);
        i += 1;
    }
};

impl Opcode {
    pub fn from_mnemonic(name: &str) -> Option<Opcode> {
        Opcode::ALL.iter().copied().find(|op| op.mnemonic() == name)
    }

    pub fn is_branch(self) -> bool {
        matches!(self, Opcode::Br | Opcode::Brt | Opcode::Brf)
    }

    /// Instructions after which control never falls through.
    pub fn is_terminator(self) -> bool {
        matches!(self, Opcode::Br | Opcode::Ret | Opcode::RetV | Opcode::Halt)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A decoded stack instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operand: i32,
}

impl Instruction {
    pub fn new(opcode: Opcode, operand: i32) -> Self {
        Instruction { opcode, operand }
    }

    /// An instruction without operand.
    pub fn op(opcode: Opcode) -> Self {
        Self::new(opcode, 0)
    }

    /// `opcode | operand << 6`
    pub fn encode(self) -> u32 {
        ((self.operand as u32) << OPCODE_BITS) | self.opcode as u32
    }

    /// Decode a word; an unknown opcode comes back as the error.
    pub fn decode(word: u32) -> Result<Instruction, u8> {
        let code = (word & OPCODE_MASK) as u8;
        let opcode = Opcode::from_u8(code).ok_or(code)?;
        let operand = (word as i32) >> OPCODE_BITS;
        Ok(Instruction { opcode, operand })
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.opcode.operand() {
            OperandKind::None => write!(f, "{}", self.opcode),
            _ => write!(f, "{} {}", self.opcode, self.operand),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_negative_operand() {
        let ins = Instruction::new(Opcode::IConst, -42);
        assert_eq!(Instruction::decode(ins.encode()), Ok(ins));
    }

    #[test]
    fn test_operand_range_edges() {
        for v in [OPERAND_MIN, OPERAND_MAX] {
            let ins = Instruction::new(Opcode::IConst, v as i32);
            assert_eq!(Instruction::decode(ins.encode()).unwrap().operand as i64, v);
        }
        assert!(!operand_fits(OPERAND_MAX + 1));
        assert!(!operand_fits(OPERAND_MIN - 1));
    }

    #[test]
    fn test_opcode_zero_is_invalid() {
        assert_eq!(Instruction::decode(0), Err(0));
        assert_eq!(Instruction::decode(63), Err(63));
    }

    #[test]
    fn test_mnemonics_unique_and_reversible() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_mnemonic(op.mnemonic()), Some(*op));
            assert_eq!(Opcode::from_u8(*op as u8), Some(*op));
        }
        assert_eq!(Opcode::from_mnemonic("bogus"), None);
    }

    #[test]
    fn test_stack_effects() {
        assert_eq!(Opcode::IAdd.stack_effect(), StackEffect::Fixed { pops: 2, pushes: 1 });
        assert_eq!(Opcode::AStore.stack_effect(), StackEffect::Fixed { pops: 3, pushes: 0 });
        assert_eq!(Opcode::Call.stack_effect(), StackEffect::Call);
    }

    #[test]
    fn test_display() {
        assert_eq!(Instruction::new(Opcode::Load, 2).to_string(), "load 2");
        assert_eq!(Instruction::op(Opcode::IAdd).to_string(), "iadd");
    }
}
