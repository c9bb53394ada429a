pub mod asm;
pub mod assemble;
pub mod disasm;
pub mod op;
pub mod program;
pub mod reg_op;
pub mod stack_check;

pub use asm::{assemble_register, assemble_stack};
pub use assemble::assemble;
pub use disasm::{disassemble, disassemble_instruction};
pub use op::{Instruction, Opcode};
pub use program::{Const, FunctionInfo, Isa, LabelInfo, Program, StructInfo};
pub use reg_op::{RegInstruction, RegOpcode};
pub use stack_check::{StackCheckError, check_program};
