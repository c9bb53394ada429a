use crate::bytecode::disasm::disassemble_instruction;
use crate::bytecode::program::{Isa, Program};
use crate::bytecode::reg_op::{
    FP, LR, REGISTER_COUNT, RV, RegInstruction, RegOpcode, S0, SAVED_REGISTERS, SP,
};

use super::config::VmConfig;
use super::runtime_error::{RuntimeError, RuntimeErrorKind};
use super::trace::TraceEntry;
use super::vm::VmState;

/// Registers restored by `ret`.
#[derive(Debug, Clone)]
pub struct RegFrame {
    pub function: usize,
    pub return_address: usize,
    pub saved: [i64; SAVED_REGISTERS],
    pub fp: i64,
    pub sp: i64,
}

/// Register-machine interpreter for one program run.
///
/// Memory is `heap_size` words: globals at the bottom, then the heap growing
/// up, and the stack growing down from the top. All values are integers;
/// a struct is the address of its first field.
pub struct RegisterVm<'p> {
    program: &'p Program,
    config: VmConfig,
    state: VmState,
    pc: usize,
    regs: [i64; REGISTER_COUNT],
    memory: Vec<i64>,
    /// Next free heap word.
    hp: usize,
    frames: Vec<RegFrame>,
    steps: u64,
    output: String,
    trace: Vec<TraceEntry>,
}

enum Flow {
    Next,
    Jump(usize),
    Halt,
}

impl<'p> RegisterVm<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self::with_config(program, VmConfig::default())
    }

    pub fn with_config(program: &'p Program, config: VmConfig) -> Self {
        RegisterVm {
            program,
            memory: vec![0; config.heap_size],
            config,
            state: VmState::Ready,
            pc: 0,
            regs: [0; REGISTER_COUNT],
            hp: 0,
            frames: Vec::new(),
            steps: 0,
            output: String::new(),
            trace: Vec::new(),
        }
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    pub fn register(&self, r: u8) -> i64 {
        self.regs.get(r as usize).copied().unwrap_or(0)
    }

    pub fn registers(&self) -> &[i64; REGISTER_COUNT] {
        &self.regs
    }

    pub fn memory(&self) -> &[i64] {
        &self.memory
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Run until the program halts or faults; the result is `rv`.
    pub fn exec(&mut self) -> Result<i64, RuntimeError> {
        match self.state {
            VmState::Ready => {}
            VmState::Halted => return Ok(self.regs[RV as usize]),
            VmState::Running | VmState::Error => {
                return Err(RuntimeErrorKind::NotReady(format!("vm is in state {:?}", self.state)).into());
            }
        }

        if let Err(e) = self.load() {
            self.state = VmState::Error;
            return Err(e);
        }
        self.state = VmState::Running;

        loop {
            match self.step() {
                Ok(true) => {}
                Ok(false) => {
                    self.state = VmState::Halted;
                    tracing::debug!(steps = self.steps, rv = self.regs[RV as usize], "register vm halted");
                    return Ok(self.regs[RV as usize]);
                }
                Err(e) => {
                    self.state = VmState::Error;
                    tracing::debug!(error = %e.kind, "register vm faulted");
                    return Err(e);
                }
            }
        }
    }

    fn load(&mut self) -> Result<(), RuntimeError> {
        let program = self.program;
        if program.isa != Isa::Register {
            return Err(RuntimeErrorKind::NotReady("not a register-machine program".to_string()).into());
        }
        if program.code.len() > self.config.instruction_cache_size {
            return Err(RuntimeErrorKind::ProgramTooLarge {
                size: program.code.len(),
                capacity: self.config.instruction_cache_size,
            }
            .into());
        }
        let globals = program.globals as usize;
        if globals > self.memory.len() {
            return Err(RuntimeErrorKind::HeapExhausted {
                requested: globals,
                available: self.memory.len(),
            }
            .into());
        }
        if self.config.bounds_check {
            verify(program).map_err(|(offset, kind)| self.fault(kind, offset))?;
        }

        let entry = program
            .entry_function()
            .ok_or_else(|| RuntimeErrorKind::NotReady("program has no functions".to_string()))?;
        self.hp = globals;
        self.regs[SP as usize] = self.memory.len() as i64;
        self.pc = entry.address;
        self.enter(program.entry, program.code.len())
            .map_err(|k| self.fault(k, entry.address))?;
        Ok(())
    }

    /// Push a frame for `function` and reserve its locals below `sp`.
    fn enter(&mut self, function: usize, return_address: usize) -> Result<(), RuntimeErrorKind> {
        let program = self.program;
        let callee = program.functions.get(function).ok_or(RuntimeErrorKind::OutOfBounds {
            index: function as i64,
            length: program.functions.len(),
        })?;
        if self.frames.len() >= self.config.max_call_depth {
            return Err(RuntimeErrorKind::StackOverflow(format!(
                "call depth limit exceeded ({}) in '{}'",
                self.config.max_call_depth, callee.name
            )));
        }

        let sp = self.regs[SP as usize] - callee.nlocals as i64;
        if sp < self.hp as i64 {
            return Err(RuntimeErrorKind::StackOverflow("stack collided with the heap".to_string()));
        }

        let mut saved = [0; SAVED_REGISTERS];
        saved.copy_from_slice(&self.regs[S0 as usize..S0 as usize + SAVED_REGISTERS]);
        self.frames.push(RegFrame {
            function,
            return_address,
            saved,
            fp: self.regs[FP as usize],
            sp: self.regs[SP as usize],
        });
        self.regs[FP as usize] = self.regs[SP as usize];
        self.regs[SP as usize] = sp;
        self.regs[LR as usize] = return_address as i64;

        if self.config.debug {
            tracing::debug!(function = %callee.name, depth = self.frames.len(), "call");
        }
        Ok(())
    }

    fn check_limits(&mut self) -> Result<(), RuntimeErrorKind> {
        self.steps += 1;
        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(RuntimeErrorKind::StepLimitExceeded(max));
            }
        }
        Ok(())
    }

    fn stack_depth(&self) -> usize {
        (self.memory.len() as i64 - self.regs[SP as usize]).max(0) as usize
    }

    fn step(&mut self) -> Result<bool, RuntimeError> {
        let offset = self.pc;
        self.check_limits().map_err(|k| self.fault(k, offset))?;

        let Some(&word) = self.program.code.get(offset) else {
            if offset != self.program.code.len() {
                let kind = RuntimeErrorKind::OutOfBounds {
                    index: offset as i64,
                    length: self.program.code.len(),
                };
                return Err(self.fault(kind, offset));
            }
            return Ok(false);
        };
        let ins = RegInstruction::decode(word)
            .map_err(|code| self.fault(RuntimeErrorKind::IllegalOpcode(code), offset))?;

        let depth_before = self.stack_depth();
        let call_depth = self.frames.len();
        let flow = self.execute(ins).map_err(|k| self.fault(k, offset))?;

        if self.config.trace {
            TraceEntry {
                offset,
                word,
                text: disassemble_instruction(self.program, offset),
                depth_before,
                depth_after: self.stack_depth(),
                call_depth,
            }
            .emit(&mut self.trace);
        }

        match flow {
            Flow::Next => self.pc = offset + 1,
            Flow::Jump(target) => self.pc = target,
            Flow::Halt => return Ok(false),
        }
        Ok(true)
    }

    fn fault(&self, kind: RuntimeErrorKind, offset: usize) -> RuntimeError {
        let call_stack = self
            .frames
            .iter()
            .map(|f| {
                self.program
                    .functions
                    .get(f.function)
                    .map(|info| info.name.clone())
                    .unwrap_or_default()
            })
            .collect();
        RuntimeError::new(kind)
            .at(offset, disassemble_instruction(self.program, offset))
            .with_call_stack(call_stack)
    }

    fn set(&mut self, r: u8, value: i64) {
        // r0 is hardwired to zero
        if r != 0 {
            self.regs[r as usize] = value;
        }
    }

    fn address(&self, addr: i64) -> Result<usize, RuntimeErrorKind> {
        usize::try_from(addr)
            .ok()
            .filter(|a| *a < self.memory.len())
            .ok_or(RuntimeErrorKind::OutOfBounds {
                index: addr,
                length: self.memory.len(),
            })
    }

    /// A jump may land on any instruction or just past the last one.
    fn jump(&self, target: i32) -> Result<Flow, RuntimeErrorKind> {
        let length = self.program.code.len();
        usize::try_from(target)
            .ok()
            .filter(|t| *t <= length)
            .map(Flow::Jump)
            .ok_or(RuntimeErrorKind::OutOfBounds {
                index: target as i64,
                length,
            })
    }

    fn global(&self, slot: i32) -> Result<usize, RuntimeErrorKind> {
        let globals = self.program.globals as usize;
        usize::try_from(slot)
            .ok()
            .filter(|g| *g < globals)
            .ok_or(RuntimeErrorKind::OutOfBounds {
                index: slot as i64,
                length: globals,
            })
    }

    fn execute(&mut self, ins: RegInstruction) -> Result<Flow, RuntimeErrorKind> {
        let a = self.regs[ins.rs1 as usize];
        let b = self.regs[ins.rs2 as usize];
        let imm = ins.imm as i64;

        let value = match ins.op {
            RegOpcode::Add => a.wrapping_add(b),
            RegOpcode::Sub => a.wrapping_sub(b),
            RegOpcode::Mul => a.wrapping_mul(b),
            RegOpcode::Div | RegOpcode::Rem if b == 0 => return Err(RuntimeErrorKind::DivisionByZero),
            RegOpcode::Div => a.wrapping_div(b),
            RegOpcode::Rem => a.wrapping_rem(b),
            RegOpcode::Slt => (a < b) as i64,
            RegOpcode::Sle => (a <= b) as i64,
            RegOpcode::Sgt => (a > b) as i64,
            RegOpcode::Sge => (a >= b) as i64,
            RegOpcode::Seq => (a == b) as i64,
            RegOpcode::Sne => (a != b) as i64,
            RegOpcode::And => a & b,
            RegOpcode::Or => a | b,
            RegOpcode::Xor => a ^ b,
            RegOpcode::Neg => a.wrapping_neg(),
            RegOpcode::Not => (a == 0) as i64,
            RegOpcode::Mov => a,
            RegOpcode::Li => imm,
            RegOpcode::Lw => self.memory[self.address(a.wrapping_add(imm))?],
            RegOpcode::LwG => self.memory[self.global(ins.imm)?],
            RegOpcode::Struct => self.alloc_struct(ins.imm)?,

            RegOpcode::Sw => {
                let addr = self.address(a.wrapping_add(imm))?;
                self.memory[addr] = self.regs[ins.rd as usize];
                return Ok(Flow::Next);
            }
            RegOpcode::SwG => {
                let slot = self.global(ins.imm)?;
                self.memory[slot] = self.regs[ins.rd as usize];
                return Ok(Flow::Next);
            }
            RegOpcode::J => return self.jump(ins.imm),
            RegOpcode::Jt => {
                return if a != 0 { self.jump(ins.imm) } else { Ok(Flow::Next) };
            }
            RegOpcode::Jf => {
                return if a == 0 { self.jump(ins.imm) } else { Ok(Flow::Next) };
            }
            RegOpcode::Call => {
                let function = usize::try_from(ins.imm).map_err(|_| RuntimeErrorKind::OutOfBounds {
                    index: imm,
                    length: self.program.functions.len(),
                })?;
                self.enter(function, self.pc + 1)?;
                let address = self.program.functions[function].address;
                return Ok(Flow::Jump(address));
            }
            RegOpcode::Ret => return Ok(self.leave()),
            RegOpcode::Halt => return Ok(Flow::Halt),
            RegOpcode::Print => {
                let v = self.regs[ins.rd as usize];
                self.output.push_str(&v.to_string());
                self.output.push('\n');
                return Ok(Flow::Next);
            }
            RegOpcode::Nop => return Ok(Flow::Next),
        };
        self.set(ins.rd, value);
        Ok(Flow::Next)
    }

    fn leave(&mut self) -> Flow {
        let Some(frame) = self.frames.pop() else {
            return Flow::Halt;
        };
        self.regs[S0 as usize..S0 as usize + SAVED_REGISTERS].copy_from_slice(&frame.saved);
        self.regs[FP as usize] = frame.fp;
        self.regs[SP as usize] = frame.sp;

        if self.config.debug {
            let name = self.program.functions.get(frame.function).map(|f| f.name.as_str());
            tracing::debug!(function = ?name, rv = self.regs[RV as usize], "return");
        }
        if self.frames.is_empty() {
            return Flow::Halt;
        }
        Flow::Jump(frame.return_address)
    }

    /// Zeroed fields preceded by a header word holding the struct index.
    fn alloc_struct(&mut self, ty: i32) -> Result<i64, RuntimeErrorKind> {
        let structs = &self.program.structs;
        let index = usize::try_from(ty)
            .ok()
            .filter(|i| *i < structs.len())
            .ok_or(RuntimeErrorKind::OutOfBounds {
                index: ty as i64,
                length: structs.len(),
            })?;
        let requested = structs[index].fields.len() + 1;
        let available = (self.regs[SP as usize].max(0) as usize).saturating_sub(self.hp);
        if requested > available {
            return Err(RuntimeErrorKind::HeapExhausted { requested, available });
        }

        let header = self.hp;
        self.memory[header] = ty as i64;
        self.memory[header + 1..header + requested].fill(0);
        self.hp += requested;
        Ok(header as i64 + 1)
    }
}

fn verify(program: &Program) -> Result<(), (usize, RuntimeErrorKind)> {
    for offset in 0..program.code.len() {
        let ins = match program.reg_instruction(offset) {
            Some(Ok(ins)) => ins,
            Some(Err(code)) => return Err((offset, RuntimeErrorKind::IllegalOpcode(code))),
            None => break,
        };
        let limit = match ins.op {
            RegOpcode::J | RegOpcode::Jt | RegOpcode::Jf => program.code.len() + 1,
            RegOpcode::Call => program.functions.len(),
            RegOpcode::Struct => program.structs.len(),
            RegOpcode::LwG | RegOpcode::SwG => program.globals as usize,
            _ => continue,
        };
        if usize::try_from(ins.imm).map_or(true, |n| n >= limit) {
            return Err((
                offset,
                RuntimeErrorKind::OutOfBounds {
                    index: ins.imm as i64,
                    length: limit,
                },
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::asm::assemble_register;
    use pretty_assertions::assert_eq;

    fn run_with(text: &str, config: VmConfig) -> (Result<i64, RuntimeError>, [i64; REGISTER_COUNT]) {
        let program = assemble_register(text).unwrap();
        let mut vm = RegisterVm::with_config(&program, config);
        let result = vm.exec();
        (result, *vm.registers())
    }

    fn run(text: &str) -> Result<i64, RuntimeError> {
        run_with(text, VmConfig::default()).0
    }

    #[test]
    fn test_zero_register_ignores_writes() {
        let (result, regs) = run_with("li r0, 5\nli r1, 7\nadd r1, r1, r0\nhalt\n", VmConfig::default());
        assert_eq!(result, Ok(7));
        assert_eq!(regs[0], 0);
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(run("li r2, 3\nli r3, 4\nslt rv, r2, r3\nhalt\n"), Ok(1));
        assert_eq!(run("li r2, 3\nnot rv, r2\nhalt\n"), Ok(0));
        assert_eq!(run("li r2, 6\nli r3, 3\nxor rv, r2, r3\nhalt\n"), Ok(5));
    }

    #[test]
    fn test_locals_live_below_fp() {
        let text = "\
.def main: args=0, locals=2
    li r2, 11
    sw r2, fp, -2
    lw rv, fp, -2
    halt
";
        let program = assemble_register(text).unwrap();
        let mut vm = RegisterVm::new(&program);
        assert_eq!(vm.exec(), Ok(11));
        let top = vm.memory().len();
        assert_eq!(vm.memory()[top - 2], 11);
        assert_eq!(vm.register(SP), top as i64 - 2);
    }

    #[test]
    fn test_call_restores_saved_registers() {
        let text = "\
.def main: args=0, locals=0
    li s0, 1
    li a0, 5
    call clobber
    add rv, rv, s0
    halt
.def clobber: args=1, locals=1
    li s0, 100
    mov rv, a0
    ret
";
        assert_eq!(run(text), Ok(6));
    }

    #[test]
    fn test_globals_and_structs() {
        let text = "\
.globals 1
.struct P: x, y
    struct r2, P
    li r3, 9
    sw r3, r2, 1
    sw_g r2, 0
    lw_g r4, 0
    lw rv, r4, 1
    halt
";
        assert_eq!(run(text), Ok(9));
    }

    #[test]
    fn test_faults() {
        let err = run("li r2, 1\ndiv rv, r2, zero\nhalt\n").unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::DivisionByZero);
        assert_eq!(err.instruction.as_deref(), Some("div r1, r2, r0"));

        let err = run("li r2, -5\nlw rv, r2, 0\nhalt\n").unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::OutOfBounds { index: -5, .. }));

        let config = VmConfig::builder().max_call_depth(8).build();
        let err = run_with(".def main\ncall main\nret\n", config).0.unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::StackOverflow(_)));
    }

    #[test]
    fn test_wild_jump_faults() {
        let unchecked = VmConfig::builder().bounds_check(false).build();
        let mut program = assemble_register("nop\nhalt\n").unwrap();
        program.code[0] = RegInstruction::j(RegOpcode::J, -5).encode();
        let mut vm = RegisterVm::with_config(&program, unchecked);
        let err = vm.exec().unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::OutOfBounds { index: -5, length: 2 });
        assert_eq!(err.offset, Some(0));
        assert_eq!(vm.state(), VmState::Error);
    }

    #[test]
    fn test_heap_collision_reports_caller_stack() {
        // every call reserves 4000 words below fp
        let text = "\
.def main: args=0, locals=0
    call deep
    halt
.def deep: args=0, locals=4000
    call deep
    ret
";
        let config = VmConfig::builder().heap_size(10_000).build();
        let (result, _) = run_with(text, config);
        let err = result.unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::StackOverflow(_)));
        // main and two deep frames fit, the third collides
        assert_eq!(err.call_stack, vec!["main".to_string(), "deep".to_string(), "deep".to_string()]);
    }

    #[test]
    fn test_step_limit() {
        let config = VmConfig::builder().max_steps(10).build();
        let program = assemble_register("top: j top\n").unwrap();
        let mut vm = RegisterVm::with_config(&program, config);
        assert_eq!(vm.exec().unwrap_err().kind, RuntimeErrorKind::StepLimitExceeded(10));
        assert_eq!(vm.state(), VmState::Error);
    }

    #[test]
    fn test_print() {
        let program = assemble_register("li a0, 42\nprint a0\nhalt\n").unwrap();
        let mut vm = RegisterVm::new(&program);
        vm.exec().unwrap();
        assert_eq!(vm.output(), "42\n");
    }
}
