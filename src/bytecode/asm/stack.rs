use super::lexer::Token;
use super::{Instr, Operand, Resolver, layout};
use crate::bytecode::op::{Instruction, OperandKind, Opcode, operand_fits};
use crate::bytecode::program::{Const, Isa, Program};
use crate::bytecode::stack_check;
use crate::compile_error::{CompileError, Diagnostics};
use crate::lang::span::Span;

/// Read stack-machine assembly text into a verified program.
pub fn assemble_stack(text: &str) -> Result<Program, Diagnostics> {
    let mut diagnostics = Diagnostics::new();
    let layout = layout(text, Isa::Stack, &mut diagnostics);
    let mut program = layout.program;

    // the text has no return-type marker; a function returns a value iff it
    // contains `retv`
    for (info, body) in program.functions.iter_mut().zip(&layout.bodies) {
        info.returns = body.iter().any(|i| i.mnemonic == "retv");
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

    if diagnostics.is_empty() {
        let span = layout.spans.first().copied().unwrap_or_default();
        stack_check::check_into(&mut program, &mut diagnostics, span);
    }
    tracing::debug!(
        words = program.code.len(),
        functions = program.functions.len(),
        errors = diagnostics.len(),
        "assembled stack text"
    );
    diagnostics.into_result(program)
}

fn encode(r: &mut Resolver<'_>, instr: &Instr) -> u32 {
    if instr.mnemonic == ".word" {
        return r.raw_word(instr);
    }
    let Some(opcode) = Opcode::from_mnemonic(&instr.mnemonic) else {
        r.error(CompileError::unknown_mnemonic(&instr.mnemonic, instr.span));
        return 0;
    };

    let operand = match opcode.operand() {
        OperandKind::None => {
            r.arity(instr, 0, 0);
            0
        }
        OperandKind::Func => r.call_target(instr),
        kind => {
            if !r.arity(instr, 1, 0) {
                return 0;
            }
            operand(r, opcode, kind, &instr.operands[0])
        }
    };

    if !operand_fits(operand) {
        r.error(CompileError::operand_out_of_range(
            opcode.mnemonic(),
            operand,
            "does not fit the 26-bit operand field",
            instr.span,
        ));
        return 0;
    }
    Instruction::new(opcode, operand as i32).encode()
}

fn operand(r: &mut Resolver<'_>, opcode: Opcode, kind: OperandKind, op: &Operand) -> i64 {
    let mnemonic = opcode.mnemonic();
    match kind {
        OperandKind::Int => match (&op.token, opcode) {
            (Token::Char(c), Opcode::CConst) => *c as i64,
            (Token::Ident(b), Opcode::BConst) if b == "true" || b == "false" => (b == "true") as i64,
            _ => r.int(mnemonic, op, i64::MIN, i64::MAX),
        },
        OperandKind::Pool => match pool_constant(opcode, &op.token) {
            Some(c) => r.program.intern(c) as i64,
            None => {
                r.error(CompileError::syntax(
                    format!("'{}' does not take {:?}", mnemonic, op.token),
                    op.span,
                ));
                0
            }
        },
        OperandKind::Label => r.label(op),
        OperandKind::Struct => r.struct_ref(op),
        OperandKind::Field => r.field(op),
        OperandKind::Local => {
            let size = r.current().frame_size() as i64;
            let slot = r.int(mnemonic, op, i64::MIN, i64::MAX);
            check_slot(r, mnemonic, slot, size, "frame", op.span)
        }
        OperandKind::Global => {
            let size = r.program.globals as i64;
            let slot = r.int(mnemonic, op, i64::MIN, i64::MAX);
            check_slot(r, mnemonic, slot, size, "global", op.span)
        }
        OperandKind::None | OperandKind::Func => 0,
    }
}

fn check_slot(r: &mut Resolver<'_>, mnemonic: &str, slot: i64, size: i64, what: &str, span: Span) -> i64 {
    if (0..size).contains(&slot) {
        return slot;
    }
    r.error(CompileError::operand_out_of_range(
        mnemonic,
        slot,
        format!("{} has {} slot(s)", what, size),
        span,
    ));
    0
}

fn pool_constant(opcode: Opcode, token: &Token) -> Option<Const> {
    match (opcode, token) {
        (Opcode::LConst, Token::Int(n)) => Some(Const::Int(*n)),
        (Opcode::FConst, Token::Float(f)) => Some(Const::Float(*f)),
        (Opcode::FConst, Token::Int(n)) => Some(Const::Float(*n as f64)),
        (Opcode::FConst, Token::Ident(name)) => match name.as_str() {
            "inf" => Some(Const::Float(f64::INFINITY)),
            "NaN" => Some(Const::Float(f64::NAN)),
            _ => None,
        },
        (Opcode::SConst, Token::Str(s)) => Some(Const::Str(s.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile_error::CompileErrorKind;
    use pretty_assertions::assert_eq;

    fn mnemonics(p: &Program) -> Vec<String> {
        (0..p.code.len())
            .map(|i| p.instruction(i).unwrap().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_assemble_straight_line() {
        let p = assemble_stack("iconst 1\niconst 2\niadd\nprint\nhalt\n").unwrap();
        assert_eq!(mnemonics(&p), vec!["iconst 1", "iconst 2", "iadd", "print", "halt"]);
        assert_eq!(p.functions[0].max_stack, 2);
    }

    #[test]
    fn test_labels_resolve_to_absolute_offsets() {
        let p = assemble_stack(
            "\
.def main: args=0, locals=0
    call f
    halt
.def f: args=0, locals=1
    iconst 3
    store 0
top:
    load 0
    brf done
    load 0
    iconst 1
    isub
    store 0
    br top
done:
    ret
",
        )
        .unwrap();
        assert_eq!(p.functions[1].address, 2);
        assert_eq!(p.label_offset(1, "top"), Some(4));
        assert_eq!(p.instruction(5).unwrap().unwrap(), Instruction::new(Opcode::Brf, 11));
        assert_eq!(p.instruction(10).unwrap().unwrap(), Instruction::new(Opcode::Br, 4));
    }

    #[test]
    fn test_constants_are_pooled() {
        let p = assemble_stack(
            "fconst 1.5\nsconst \"hi\"\nfconst 1.5\ncconst 'a'\nbconst true\nlconst 99\nhalt\n",
        );
        // six values left on the stack at halt is fine
        let p = p.unwrap();
        assert_eq!(p.constants, vec![Const::Float(1.5), Const::Str("hi".into()), Const::Int(99)]);
        assert_eq!(p.instruction(2).unwrap().unwrap(), Instruction::new(Opcode::FConst, 0));
        assert_eq!(p.instruction(3).unwrap().unwrap(), Instruction::new(Opcode::CConst, 'a' as i32));
        assert_eq!(p.instruction(4).unwrap().unwrap(), Instruction::new(Opcode::BConst, 1));
    }

    #[test]
    fn test_struct_and_field_operands() {
        let p = assemble_stack(
            "\
.struct Point: x, y
    struct Point
    dup
    iconst 4
    fstore y
    fload Point.y
    print
    halt
",
        )
        .unwrap();
        assert_eq!(p.instruction(3).unwrap().unwrap(), Instruction::new(Opcode::FStore, 1));
        assert_eq!(p.instruction(4).unwrap().unwrap(), Instruction::new(Opcode::FLoad, 1));
    }

    #[test]
    fn test_returns_inferred_from_retv() {
        let p = assemble_stack(".def f: args=1, locals=0\nload 0\nretv\n.def main\niconst 1\ncall f, 1\nprint\nret\n")
            .unwrap();
        assert!(p.functions[0].returns);
        assert!(!p.functions[1].returns);
    }

    #[test]
    fn test_errors() {
        let errors = assemble_stack(
            "\
.globals 1
.def main: args=0, locals=1
    frob
    iconst 99999999999
    load 1
    gload 1
    br nowhere
    call main, 3
    iadd 1
    ret
",
        )
        .unwrap_err();
        assert_eq!(errors.count(|k| matches!(k, CompileErrorKind::UnknownMnemonic(_))), 1);
        assert_eq!(errors.count(|k| matches!(k, CompileErrorKind::OperandOutOfRange { .. })), 4);
        assert_eq!(errors.count(|k| matches!(k, CompileErrorKind::UnresolvedLabel { .. })), 1);
        assert_eq!(errors.count(|k| matches!(k, CompileErrorKind::Syntax(_))), 1);
    }

    #[test]
    fn test_stack_check_runs() {
        let errors = assemble_stack(".def main: args=0, locals=0\niadd\nret\n").unwrap_err();
        assert_eq!(errors.count(|k| matches!(k, CompileErrorKind::StackCheck { .. })), 1);
    }
}
