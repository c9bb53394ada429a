use std::collections::BTreeMap;
use std::fmt::Write;

use super::op::{Instruction, OperandKind, Opcode};
use super::program::{FunctionInfo, Isa, Program};
use super::reg_op::{RegInstruction, RegOperand};

/// Render a whole program as assembly text.
///
/// The text reads back through [`crate::bytecode::asm`] into a program with
/// the same code, so every jump resolves to the same offset.
pub fn disassemble(program: &Program) -> String {
    let mut out = String::new();

    if program.globals > 0 {
        let _ = writeln!(out, ".globals {}", program.globals);
    }
    for s in &program.structs {
        let _ = writeln!(out, ".struct {}: {}", s.name, s.fields.join(", "));
    }
    if let Some(entry) = program.entry_function() {
        if entry.name != "main" {
            let _ = writeln!(out, ".entry {}", entry.name);
        }
    }

    for (index, func) in program.functions.iter().enumerate() {
        if !out.is_empty() {
            out.push('\n');
        }
        write_header(&mut out, program, func);

        let labels = label_names(program, index);
        for offset in func.address..func.end {
            for name in labels.get(&offset).into_iter().flatten() {
                let _ = writeln!(out, "{}:", name);
            }
            let _ = writeln!(out, "    {}", render(program, &labels, offset));
        }
        for name in labels.get(&func.end).into_iter().flatten() {
            let _ = writeln!(out, "{}:", name);
        }
    }
    out
}

/// One instruction with symbolic operands, as used by execution traces.
pub fn disassemble_instruction(program: &Program, offset: usize) -> String {
    let labels = program
        .functions
        .iter()
        .position(|f| f.contains(offset))
        .map(|i| label_names(program, i))
        .unwrap_or_default();
    render(program, &labels, offset)
}

fn write_header(out: &mut String, program: &Program, func: &FunctionInfo) {
    let _ = write!(
        out,
        ".def {}: args={}, locals={}",
        func.name, func.nargs, func.nlocals
    );
    if program.isa == Isa::Stack {
        let _ = write!(out, ", stack={}", func.max_stack);
    }
    out.push('\n');
}

/// Jump target of the instruction at `offset`, if it has one.
fn jump_target(program: &Program, offset: usize) -> Option<usize> {
    let word = *program.code.get(offset)?;
    let target = match program.isa {
        Isa::Stack => {
            let ins = Instruction::decode(word).ok()?;
            if ins.opcode.operand() != OperandKind::Label {
                return None;
            }
            ins.operand
        }
        Isa::Register => {
            let ins = RegInstruction::decode(word).ok()?;
            if !ins.op.is_jump() {
                return None;
            }
            ins.imm
        }
    };
    usize::try_from(target).ok()
}

/// Label names by offset for one function: the recorded labels, plus a
/// synthesized `_L<offset>` for every other jump target inside it.
fn label_names(program: &Program, function: usize) -> BTreeMap<usize, Vec<String>> {
    let mut names: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for l in program.labels_of(function) {
        names.entry(l.offset).or_default().push(l.name.clone());
    }

    let Some(func) = program.functions.get(function) else {
        return names;
    };
    for offset in func.address..func.end {
        let Some(target) = jump_target(program, offset) else {
            continue;
        };
        if (func.address..=func.end).contains(&target) && !names.contains_key(&target) {
            names.insert(target, vec![format!("_L{}", target)]);
        }
    }
    names
}

fn label_operand(labels: &BTreeMap<usize, Vec<String>>, target: i64) -> String {
    usize::try_from(target)
        .ok()
        .and_then(|t| labels.get(&t))
        .and_then(|names| names.first())
        .cloned()
        .unwrap_or_else(|| target.to_string())
}

fn function_operand(program: &Program, index: i64) -> String {
    usize::try_from(index)
        .ok()
        .and_then(|i| program.functions.get(i))
        .map(|f| f.name.clone())
        .unwrap_or_else(|| index.to_string())
}

fn struct_operand(program: &Program, index: i64) -> String {
    usize::try_from(index)
        .ok()
        .and_then(|i| program.structs.get(i))
        .map(|s| s.name.clone())
        .unwrap_or_else(|| index.to_string())
}

/// A field name when reading it back finds the same offset, else the number.
fn field_operand(program: &Program, offset: i64) -> String {
    let Ok(off) = usize::try_from(offset) else {
        return offset.to_string();
    };
    let candidate = program.structs.iter().find_map(|s| s.fields.get(off));
    match candidate {
        Some(name) if first_field_offset(program, name) == Some(off) => name.clone(),
        _ => offset.to_string(),
    }
}

/// Offset of `name` in the first struct declaring it.
pub(crate) fn first_field_offset(program: &Program, name: &str) -> Option<usize> {
    program
        .structs
        .iter()
        .find_map(|s| s.fields.iter().position(|f| f == name))
}

fn render(program: &Program, labels: &BTreeMap<usize, Vec<String>>, offset: usize) -> String {
    let Some(word) = program.code.get(offset).copied() else {
        return "<end>".to_string();
    };
    match program.isa {
        Isa::Stack => match Instruction::decode(word) {
            Ok(ins) => render_stack(program, labels, ins),
            Err(_) => format!(".word {}", word),
        },
        Isa::Register => match RegInstruction::decode(word) {
            Ok(ins) => render_register(program, labels, ins),
            Err(_) => format!(".word {}", word),
        },
    }
}

fn render_stack(program: &Program, labels: &BTreeMap<usize, Vec<String>>, ins: Instruction) -> String {
    let n = ins.operand as i64;
    let operand = match ins.opcode.operand() {
        OperandKind::None => return ins.opcode.mnemonic().to_string(),
        OperandKind::Label => label_operand(labels, n),
        OperandKind::Func => function_operand(program, n),
        OperandKind::Struct => struct_operand(program, n),
        OperandKind::Field => field_operand(program, n),
        OperandKind::Pool => {
            usize::try_from(n)
                .ok()
                .and_then(|i| program.constants.get(i))
                .map_or_else(|| n.to_string(), |c| c.to_string())
        }
        OperandKind::Int if ins.opcode == Opcode::CConst => match char::from_u32(ins.operand as u32) {
            Some(c) => format!("{:?}", c),
            None => n.to_string(),
        },
        OperandKind::Int | OperandKind::Local | OperandKind::Global => n.to_string(),
    };
    format!("{} {}", ins.opcode.mnemonic(), operand)
}

fn render_register(program: &Program, labels: &BTreeMap<usize, Vec<String>>, ins: RegInstruction) -> String {
    let mut regs = ins.op.register_fields().iter().map(|f| ins.field(*f));
    let imm = ins.imm as i64;
    let operands: Vec<String> = ins
        .op
        .operands()
        .iter()
        .map(|kind| match kind {
            RegOperand::Reg => format!("r{}", regs.next().unwrap_or(0)),
            RegOperand::Imm => imm.to_string(),
            RegOperand::Label => label_operand(labels, imm),
            RegOperand::Func => function_operand(program, imm),
            RegOperand::Struct => struct_operand(program, imm),
        })
        .collect();

    if operands.is_empty() {
        ins.op.mnemonic().to_string()
    } else {
        format!("{} {}", ins.op.mnemonic(), operands.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::program::{Const, LabelInfo, StructInfo};
    use crate::bytecode::reg_op::RegOpcode;
    use pretty_assertions::assert_eq;

    fn stack_program() -> Program {
        let mut p = Program::new(Isa::Stack);
        let code = [
            Instruction::new(Opcode::IConst, 3),
            Instruction::new(Opcode::Brf, 4),
            Instruction::new(Opcode::FConst, 0),
            Instruction::op(Opcode::Pop),
            Instruction::op(Opcode::Ret),
        ];
        p.code = code.iter().map(|i| i.encode()).collect();
        p.constants.push(Const::Float(1.5));
        p.functions.push(FunctionInfo {
            name: "main".to_string(),
            address: 0,
            end: 5,
            nargs: 0,
            nlocals: 0,
            returns: false,
            max_stack: 1,
        });
        p
    }

    #[test]
    fn test_disassemble_synthesizes_labels() {
        let text = disassemble(&stack_program());
        assert_eq!(
            text,
            "\
.def main: args=0, locals=0, stack=1
    iconst 3
    brf _L4
    fconst 1.5
    pop
_L4:
    ret
"
        );
    }

    #[test]
    fn test_recorded_labels_win() {
        let mut p = stack_program();
        p.labels.push(LabelInfo {
            function: 0,
            name: "done".to_string(),
            offset: 4,
        });
        assert_eq!(disassemble_instruction(&p, 1), "brf done");
    }

    #[test]
    fn test_field_names_only_when_unambiguous() {
        let mut p = stack_program();
        p.structs.push(StructInfo {
            name: "A".to_string(),
            fields: vec!["x".to_string(), "y".to_string()],
        });
        p.structs.push(StructInfo {
            name: "B".to_string(),
            fields: vec!["y".to_string()],
        });
        assert_eq!(field_operand(&p, 1), "y");
        assert_eq!(field_operand(&p, 0), "x");
        assert_eq!(field_operand(&p, 5), "5");
    }

    #[test]
    fn test_register_rendering() {
        let mut p = Program::new(Isa::Register);
        p.code = vec![
            RegInstruction::i(RegOpcode::Li, 2, 0, 42).encode(),
            RegInstruction::r(RegOpcode::Mov, 3, 2, 0).encode(),
            RegInstruction::i(RegOpcode::Jt, 0, 3, 0).encode(),
            RegInstruction::i(RegOpcode::Lw, 1, 14, -1).encode(),
        ];
        p.functions.push(FunctionInfo {
            name: "main".to_string(),
            address: 0,
            end: 4,
            nargs: 0,
            nlocals: 1,
            returns: false,
            max_stack: 0,
        });
        assert_eq!(
            disassemble(&p),
            "\
.def main: args=0, locals=1
_L0:
    li r2, 42
    mov r3, r2
    jt r3, _L0
    lw r1, r14, -1
"
        );
    }

    #[test]
    fn test_illegal_word() {
        let mut p = stack_program();
        p.code[3] = 0;
        assert_eq!(disassemble_instruction(&p, 3), ".word 0");
    }
}
