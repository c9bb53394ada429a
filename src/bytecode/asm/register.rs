use super::lexer::Token;
use super::{Instr, Resolver, layout};
use crate::bytecode::program::{Isa, Program};
use crate::bytecode::reg_op::{ARG_REGISTERS, RegInstruction, RegOpcode, RegOperand, parse_register};
use crate::compile_error::{CompileError, Diagnostics};

/// Read register-machine assembly text into a program.
///
/// Functions take their arguments in `a0..a5`, so `.def` may not declare
/// more than six.
pub fn assemble_register(text: &str) -> Result<Program, Diagnostics> {
    let mut diagnostics = Diagnostics::new();
    let layout = layout(text, Isa::Register, &mut diagnostics);
    let mut program = layout.program;

    for (info, span) in program.functions.iter().zip(&layout.spans) {
        if info.nargs as usize > ARG_REGISTERS {
            diagnostics.push(CompileError::operand_out_of_range(
                ".def",
                info.nargs as i64,
                format!("at most {} register arguments", ARG_REGISTERS),
                *span,
            ));
        }
    }

    for (function, body) in layout.bodies.iter().enumerate() {
        let mut resolver = Resolver {
            program: &mut program,
            function,
            diagnostics: &mut diagnostics,
        };
        let words: Vec<u32> = body.iter().map(|instr| encode(&mut resolver, instr)).collect();
        program.code.extend(words);
    }

    tracing::debug!(
        words = program.code.len(),
        functions = program.functions.len(),
        errors = diagnostics.len(),
        "assembled register text"
    );
    diagnostics.into_result(program)
}

fn encode(r: &mut Resolver<'_>, instr: &Instr) -> u32 {
    if instr.mnemonic == ".word" {
        return r.raw_word(instr);
    }
    let Some(op) = RegOpcode::from_mnemonic(&instr.mnemonic) else {
        r.error(CompileError::unknown_mnemonic(&instr.mnemonic, instr.span));
        return 0;
    };
    let kinds = op.operands();
    if !r.arity(instr, kinds.len(), 0) {
        return 0;
    }

    let mut ins = RegInstruction::new(op);
    let mut fields = op.register_fields().iter();
    let (min, max) = op.imm_range();

    for (kind, operand) in kinds.iter().zip(&instr.operands) {
        let imm = match kind {
            RegOperand::Reg => {
                let reg = match &operand.token {
                    Token::Ident(name) => parse_register(name),
                    _ => None,
                };
                match (reg, fields.next()) {
                    (Some(reg), Some(field)) => ins.set_field(*field, reg),
                    _ => r.error(CompileError::syntax(
                        format!("'{}' expects a register, found {:?}", op.mnemonic(), operand.token),
                        operand.span,
                    )),
                }
                continue;
            }
            RegOperand::Imm => r.int(op.mnemonic(), operand, min, max),
            RegOperand::Label => r.label(operand),
            RegOperand::Func => r
                .function_ref(operand)
                .map_or(0, |i| i as i64),
            RegOperand::Struct => r.struct_ref(operand),
        };
        if !(min..=max).contains(&imm) {
            r.error(CompileError::operand_out_of_range(
                op.mnemonic(),
                imm,
                format!("immediate must lie in {}..={}", min, max),
                operand.span,
            ));
            continue;
        }
        ins.imm = imm as i32;
    }
    ins.encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::reg_op::{A0, FP, RV, S0};
    use crate::compile_error::CompileErrorKind;
    use pretty_assertions::assert_eq;

    fn decoded(p: &Program) -> Vec<RegInstruction> {
        (0..p.code.len())
            .map(|i| p.reg_instruction(i).unwrap().unwrap())
            .collect()
    }

    #[test]
    fn test_register_operands_and_aliases() {
        let p = assemble_register("li a0, 42\nmov s0, a0\nlw rv, fp, -1\nadd r3, r2, r8\nhalt\n").unwrap();
        assert_eq!(
            decoded(&p),
            vec![
                RegInstruction::i(RegOpcode::Li, A0, 0, 42),
                RegInstruction::r(RegOpcode::Mov, S0, A0, 0),
                RegInstruction::i(RegOpcode::Lw, RV, FP, -1),
                RegInstruction::r(RegOpcode::Add, 3, 2, 8),
                RegInstruction::new(RegOpcode::Halt),
            ]
        );
    }

    #[test]
    fn test_jumps_and_calls() {
        let p = assemble_register(
            "\
.def main: args=0, locals=0
    call f
    halt
.def f: args=1, locals=0
    jt a0, out
    li rv, 1
out:
    ret
",
        )
        .unwrap();
        let code = decoded(&p);
        assert_eq!(code[0], RegInstruction::j(RegOpcode::Call, 1));
        assert_eq!(code[2], RegInstruction::i(RegOpcode::Jt, 0, A0, 4));
    }

    #[test]
    fn test_errors() {
        let errors = assemble_register(
            "\
.def f: args=7, locals=0
    li r16, 1
    li r1, 999999
    add r1, r2
    jf r1, nowhere
    bogus
    ret
",
        )
        .unwrap_err();
        assert_eq!(errors.count(|k| matches!(k, CompileErrorKind::OperandOutOfRange { .. })), 2);
        assert_eq!(errors.count(|k| matches!(k, CompileErrorKind::Syntax(_))), 2);
        assert_eq!(errors.count(|k| matches!(k, CompileErrorKind::UnresolvedLabel { .. })), 1);
        assert_eq!(errors.count(|k| matches!(k, CompileErrorKind::UnknownMnemonic(_))), 1);
    }
}
