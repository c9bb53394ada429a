//! The passes wired together in their fixed order:
//! resolve, lower to IR, assemble, execute.

use thiserror::Error;

use crate::bytecode::{Program, assemble};
use crate::compile_error::Diagnostics;
use crate::context::CompilerContext;
use crate::ir;
use crate::lang::ast::CompileUnit;
use crate::lang::value::Value;
use crate::resolve::resolve;
use crate::runtime::{Interpreter, RuntimeError, StackVm, VmConfig};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Compile(Diagnostics),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl From<Diagnostics> for PipelineError {
    fn from(diagnostics: Diagnostics) -> Self {
        PipelineError::Compile(diagnostics)
    }
}

/// What a finished run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    /// `main`'s return value, `None` for a `void` main.
    pub result: Option<Value>,
    /// Everything `print` wrote.
    pub output: String,
}

/// Compile a unit to a stack machine program.
pub fn compile(unit: &CompileUnit) -> Result<Program, Diagnostics> {
    let mut ctx = CompilerContext::new();
    let res = resolve(unit, &mut ctx);
    let prog = ir::build(unit, &res, &mut ctx);
    assemble(&prog, res.diagnostics)
}

/// Compile a unit and run it on the stack VM.
pub fn run(unit: &CompileUnit, config: VmConfig) -> Result<Execution, PipelineError> {
    let program = compile(unit)?;
    let mut vm = StackVm::with_config(&program, config);
    let result = vm.exec()?;
    Ok(Execution {
        result,
        output: vm.output().to_string(),
    })
}

/// Resolve a unit and run it on the tree-walking interpreter.
pub fn interpret(unit: &CompileUnit, config: VmConfig) -> Result<Execution, PipelineError> {
    let res = resolve(unit, &mut CompilerContext::new());
    if !res.is_ok() {
        return Err(PipelineError::Compile(res.diagnostics.sorted()));
    }
    let mut interp = Interpreter::with_config(unit, &res, config);
    let result = interp.run()?;
    Ok(Execution {
        result,
        output: interp.output().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile_error::CompileErrorKind;
    use crate::lang::ast::BinOp;
    use crate::lang::build::AstBuilder;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_compile_and_interpret_agree() {
        // float half(int n) { return n / 2; }  void main() { print(half(7)); print("done"); }
        let b = AstBuilder::new();
        let unit = CompileUnit::new(vec![
            b.func(
                "float",
                "half",
                vec![b.param("int", "n")],
                vec![b.ret(Some(b.binary(BinOp::Div, b.ident("n"), b.int(2))))],
            ),
            b.func(
                "void",
                "main",
                vec![],
                vec![b.print(b.call("half", vec![b.int(7)])), b.print(b.str("done"))],
            ),
        ]);

        let compiled = run(&unit, VmConfig::default()).unwrap();
        let walked = interpret(&unit, VmConfig::default()).unwrap();
        assert_eq!(compiled.output, "3\ndone\n");
        assert_eq!(compiled, walked);
    }

    #[test]
    fn test_compile_errors_stop_the_pipeline() {
        let b = AstBuilder::new();
        let unit = CompileUnit::new(vec![b.func("void", "helper", vec![], vec![])]);
        let Err(PipelineError::Compile(diagnostics)) = run(&unit, VmConfig::default()) else {
            panic!("expected compile errors");
        };
        let kinds: Vec<_> = diagnostics.iter().map(|e| e.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![CompileErrorKind::UnresolvedSymbol {
                name: "main".to_string()
            }]
        );
        assert!(matches!(
            interpret(&unit, VmConfig::default()),
            Err(PipelineError::Compile(_))
        ));
    }
}
