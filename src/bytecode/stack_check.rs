use super::op::{Opcode, StackEffect};
use super::program::{Isa, Program};
use crate::compile_error::{CompileError, Diagnostics};
use crate::lang::span::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackCheckError {
    pub function: String,
    pub offset: usize,
    pub message: String,
}

impl std::fmt::Display for StackCheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "stack-check error in '{}' at {}: {}",
            self.function, self.offset, self.message
        )
    }
}

impl std::error::Error for StackCheckError {}

/// Caller-side (pops, pushes) of the instruction at `offset`.
///
/// A call consumes the arguments and, once the callee returns, leaves its
/// result behind.
fn effect(program: &Program, opcode: Opcode, operand: i32) -> Result<(i32, i32), String> {
    match opcode.stack_effect() {
        StackEffect::Fixed { pops, pushes } => Ok((pops as i32, pushes as i32)),
        StackEffect::Call => {
            let callee = usize::try_from(operand)
                .ok()
                .and_then(|i| program.functions.get(i))
                .ok_or_else(|| format!("call to unknown function #{}", operand))?;
            Ok((callee.nargs as i32, callee.returns as i32))
        }
    }
}

/// Check one function, following both edges of every branch, and return its
/// maximum operand stack depth.
pub fn check_function(program: &Program, index: usize) -> Result<u32, StackCheckError> {
    let Some(func) = program.functions.get(index) else {
        return Err(StackCheckError {
            function: format!("#{}", index),
            offset: 0,
            message: "no such function".to_string(),
        });
    };
    let err = |offset: usize, message: String| StackCheckError {
        function: func.name.clone(),
        offset,
        message,
    };
    let is_last = func.end >= program.code.len();

    let mut heights: Vec<Option<i32>> = vec![None; func.end.saturating_sub(func.address)];
    let mut work = vec![(func.address, 0i32)];
    let mut max = 0;

    while let Some((offset, h)) = work.pop() {
        if offset == func.end {
            if is_last {
                continue;
            }
            return Err(err(offset, "falls through into the next function".to_string()));
        }
        if !func.contains(offset) {
            return Err(err(offset, format!("jump to {} outside the function", offset)));
        }

        let slot = &mut heights[offset - func.address];
        match *slot {
            Some(seen) if seen == h => continue,
            Some(seen) => {
                return Err(err(
                    offset,
                    format!("inconsistent stack height: {} vs {}", seen, h),
                ));
            }
            None => *slot = Some(h),
        }

        let ins = match program.instruction(offset) {
            Some(Ok(ins)) => ins,
            Some(Err(code)) => return Err(err(offset, format!("illegal opcode {}", code))),
            None => return Err(err(offset, "offset past end of code".to_string())),
        };

        let (pops, pushes) = effect(program, ins.opcode, ins.operand).map_err(|m| err(offset, m))?;
        if h < pops {
            return Err(err(
                offset,
                format!("stack underflow at {}, needed {} items, have {}", ins, pops, h),
            ));
        }
        let after = h - pops + pushes;
        max = max.max(after);

        match ins.opcode {
            Opcode::Ret => {
                if func.returns {
                    return Err(err(offset, "'ret' in a function that returns a value".to_string()));
                }
                if h != 0 {
                    return Err(err(offset, format!("'ret' with {} values left on the stack", h)));
                }
            }
            Opcode::RetV => {
                if !func.returns {
                    return Err(err(offset, "'retv' in a function without a result".to_string()));
                }
                if h != 1 {
                    return Err(err(offset, format!("'retv' needs exactly one value, have {}", h)));
                }
            }
            Opcode::Halt => {}
            Opcode::Br => work.push((ins.operand as usize, after)),
            Opcode::Brt | Opcode::Brf => {
                let target = usize::try_from(ins.operand)
                    .map_err(|_| err(offset, format!("negative jump target {}", ins.operand)))?;
                work.push((target, after));
                work.push((offset + 1, after));
            }
            _ => work.push((offset + 1, after)),
        }
    }

    Ok(max as u32)
}

/// Check every function of a stack program, recording each maximum depth.
pub fn check_program(program: &mut Program) -> Result<(), Vec<StackCheckError>> {
    if program.isa != Isa::Stack {
        return Ok(());
    }
    let mut errors = Vec::new();
    for i in 0..program.functions.len() {
        match check_function(program, i) {
            Ok(depth) => program.functions[i].max_stack = depth,
            Err(e) => errors.push(e),
        }
    }
    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

/// [`check_program`], reporting failures as compile errors.
pub(crate) fn check_into(program: &mut Program, diagnostics: &mut Diagnostics, span: Span) {
    if let Err(errors) = check_program(program) {
        for e in errors {
            diagnostics.push(CompileError::stack_check(
                &e.function,
                format!("at {}: {}", e.offset, e.message),
                span,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::op::Instruction;
    use crate::bytecode::program::FunctionInfo;

    fn program(ops: &[(Opcode, i32)], returns: bool) -> Program {
        let mut p = Program::new(Isa::Stack);
        p.code = ops.iter().map(|(op, n)| Instruction::new(*op, *n).encode()).collect();
        p.functions.push(FunctionInfo {
            name: "f".to_string(),
            address: 0,
            end: ops.len(),
            nargs: 0,
            nlocals: 0,
            returns,
            max_stack: 0,
        });
        p
    }

    fn check(ops: &[(Opcode, i32)], returns: bool) -> Result<u32, StackCheckError> {
        check_function(&program(ops, returns), 0)
    }

    #[test]
    fn test_simple_ops() {
        let ops = [(Opcode::IConst, 1), (Opcode::IConst, 2), (Opcode::IAdd, 0), (Opcode::RetV, 0)];
        assert_eq!(check(&ops, true), Ok(2));
    }

    #[test]
    fn test_underflow() {
        let result = check(&[(Opcode::IAdd, 0)], false);
        assert!(result.unwrap_err().message.contains("underflow"));
    }

    #[test]
    fn test_brf_pops_one() {
        let ops = [
            (Opcode::BConst, 1),
            (Opcode::Brf, 3),
            (Opcode::Nop, 0),
            (Opcode::Ret, 0),
        ];
        assert_eq!(check(&ops, false), Ok(1));
    }

    #[test]
    fn test_brf_underflow() {
        assert!(check(&[(Opcode::Brf, 1), (Opcode::Ret, 0)], false).is_err());
    }

    #[test]
    fn test_if_else_join_heights_agree() {
        // cond ? 10 : 20
        let ops = [
            (Opcode::BConst, 1),
            (Opcode::Brf, 4),
            (Opcode::IConst, 10),
            (Opcode::Br, 5),
            (Opcode::IConst, 20),
            (Opcode::RetV, 0),
        ];
        assert_eq!(check(&ops, true), Ok(1));
    }

    #[test]
    fn test_join_height_mismatch() {
        // only the fall-through path pushes
        let ops = [
            (Opcode::BConst, 1),
            (Opcode::Brf, 3),
            (Opcode::IConst, 10),
            (Opcode::Pop, 0),
            (Opcode::Ret, 0),
        ];
        let e = check(&ops, false).unwrap_err();
        assert!(e.message.contains("inconsistent"), "{}", e);
    }

    #[test]
    fn test_ret_with_values_left() {
        let e = check(&[(Opcode::IConst, 1), (Opcode::Ret, 0)], false).unwrap_err();
        assert!(e.message.contains("values left"));
    }

    #[test]
    fn test_retv_in_void_function() {
        let e = check(&[(Opcode::IConst, 1), (Opcode::RetV, 0)], false).unwrap_err();
        assert!(e.message.contains("without a result"));
    }

    #[test]
    fn test_jump_outside_function() {
        let e = check(&[(Opcode::Br, 7)], false).unwrap_err();
        assert!(e.message.contains("outside"));
    }

    #[test]
    fn test_loop_terminates() {
        let ops = [(Opcode::Br, 0)];
        assert_eq!(check(&ops, false), Ok(0));
    }

    #[test]
    fn test_call_uses_callee_signature() {
        let mut p = program(
            &[
                (Opcode::IConst, 1),
                (Opcode::IConst, 2),
                (Opcode::Call, 1),
                (Opcode::RetV, 0),
                (Opcode::Load, 0),
                (Opcode::RetV, 0),
            ],
            true,
        );
        p.functions[0].end = 4;
        p.functions.push(FunctionInfo {
            name: "g".to_string(),
            address: 4,
            end: 6,
            nargs: 2,
            nlocals: 0,
            returns: true,
            max_stack: 0,
        });
        assert_eq!(check_program(&mut p), Ok(()));
        assert_eq!(p.functions[0].max_stack, 2);
        assert_eq!(p.functions[1].max_stack, 1);
    }

    #[test]
    fn test_fall_through_into_next_function() {
        let mut p = program(&[(Opcode::Nop, 0), (Opcode::Ret, 0)], false);
        p.functions[0].end = 1;
        p.functions.push(FunctionInfo {
            name: "g".to_string(),
            address: 1,
            end: 2,
            nargs: 0,
            nlocals: 0,
            returns: false,
            max_stack: 0,
        });
        let errors = check_program(&mut p).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("falls through"));
    }
}
