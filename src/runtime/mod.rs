//! Execution engines.
//!
//! [`StackVm`] and [`RegisterVm`] run assembled programs of the matching
//! instruction set; [`Interpreter`] walks the resolved AST directly. All three
//! share [`VmConfig`] limits and report faults as [`RuntimeError`].

pub mod config;
pub mod heap;
pub mod interp;
pub mod reg_vm;
pub mod runtime_error;
pub mod trace;
pub mod vm;

pub use config::{VmConfig, VmConfigBuilder};
pub use heap::{Heap, HeapObject};
pub use interp::{ControlFlow, Interpreter, MAX_INTERP_CALL_DEPTH};
pub use reg_vm::{RegFrame, RegisterVm};
pub use runtime_error::{RuntimeError, RuntimeErrorKind};
pub use trace::TraceEntry;
pub use vm::{Frame, StackVm, VmState};
