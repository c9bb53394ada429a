//! # cymbol
//!
//! Backend for the Cymbol teaching language. Takes a parsed [`CompileUnit`]
//! and carries it through:
//!
//! 1. [`resolve`](resolve::resolve): scopes, symbols, bindings and light type
//!    checks.
//! 2. [`ir::build`]: lowering to a three-address IR.
//! 3. [`bytecode::assemble`]: a stack machine [`Program`](bytecode::Program).
//! 4. [`runtime::StackVm`]: execution.
//!
//! Hand-written assembly for either instruction set goes through
//! [`bytecode::asm`]; register programs run on [`runtime::RegisterVm`].
//! [`runtime::Interpreter`] walks the resolved tree directly.
//!
//! ```
//! use cymbol::lang::{AstBuilder, BinOp, CompileUnit, Value};
//! use cymbol::runtime::VmConfig;
//!
//! let b = AstBuilder::new();
//! let unit = CompileUnit::new(vec![b.func(
//!     "int",
//!     "main",
//!     vec![],
//!     vec![b.ret(Some(b.binary(BinOp::Mul, b.int(6), b.int(7))))],
//! )]);
//! let run = cymbol::pipeline::run(&unit, VmConfig::default()).unwrap();
//! assert_eq!(run.result, Some(Value::Int(42)));
//! ```

pub mod bytecode;
pub mod compile_error;
pub mod context;
pub mod ir;
pub mod lang;
pub mod pipeline;
pub mod resolve;
pub mod runtime;
pub mod symtab;

pub use compile_error::{CompileError, CompileErrorKind, Diagnostics};
pub use lang::ast::CompileUnit;
