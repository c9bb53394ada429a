use crate::bytecode::disasm::disassemble_instruction;
use crate::bytecode::op::{OPCODE_BITS, OPCODE_MASK, OPCODE_SPACE, Opcode, OperandKind};
use crate::bytecode::program::{Const, Isa, Program};
use crate::lang::value::{HeapRef, Value};

use super::config::VmConfig;
use super::heap::Heap;
use super::runtime_error::{RuntimeError, RuntimeErrorKind};
use super::trace::TraceEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    Ready,
    Running,
    Halted,
    Error,
}

#[derive(Debug, Clone)]
pub struct Frame {
    /// Function table index.
    pub function: usize,
    pub return_address: usize,
    /// Operand stack height when the frame was entered.
    pub base_pointer: usize,
    /// Arguments followed by locals.
    pub locals: Vec<Value>,
}

enum Flow {
    Next,
    Jump(usize),
    Halt,
}

type Exec = Result<Flow, RuntimeErrorKind>;
type Executor = fn(&mut StackVm<'_>, i32) -> Exec;

/// Stack-machine interpreter for one program run.
pub struct StackVm<'p> {
    program: &'p Program,
    config: VmConfig,
    state: VmState,
    pc: usize,
    stack: Vec<Value>,
    frames: Vec<Frame>,
    globals: Vec<Value>,
    heap: Heap,
    steps: u64,
    result: Option<Value>,
    output: String,
    trace: Vec<TraceEntry>,
}

impl<'p> StackVm<'p> {
    pub fn new(program: &'p Program) -> Self {
        Self::with_config(program, VmConfig::default())
    }

    pub fn with_config(program: &'p Program, config: VmConfig) -> Self {
        StackVm {
            program,
            heap: Heap::new(config.heap_size),
            config,
            state: VmState::Ready,
            pc: 0,
            stack: Vec::new(),
            frames: Vec::new(),
            globals: vec![Value::Null; program.globals as usize],
            steps: 0,
            result: None,
            output: String::new(),
            trace: Vec::new(),
        }
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    /// Value the program halted with, if any.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn globals(&self) -> &[Value] {
        &self.globals
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Everything printed so far, one value per line.
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Run from the entry function until the program halts or faults.
    pub fn exec(&mut self) -> Result<Option<Value>, RuntimeError> {
        match self.state {
            VmState::Ready => {}
            VmState::Halted => return Ok(self.result.clone()),
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
                    tracing::debug!(steps = self.steps, result = ?self.result, "stack vm halted");
                    return Ok(self.result.clone());
                }
                Err(e) => {
                    self.state = VmState::Error;
                    tracing::debug!(error = %e.kind, "stack vm faulted");
                    return Err(e);
                }
            }
        }
    }

    /// Check the program against the limits and enter the entry function.
    fn load(&mut self) -> Result<(), RuntimeError> {
        let program = self.program;
        if program.isa != Isa::Stack {
            return Err(RuntimeErrorKind::NotReady("not a stack-machine program".to_string()).into());
        }
        if program.code.len() > self.config.instruction_cache_size {
            return Err(RuntimeErrorKind::ProgramTooLarge {
                size: program.code.len(),
                capacity: self.config.instruction_cache_size,
            }
            .into());
        }
        if self.config.bounds_check {
            verify(program).map_err(|(offset, kind)| self.fault(kind, offset))?;
        }

        let entry = program
            .entry_function()
            .ok_or_else(|| RuntimeErrorKind::NotReady("program has no functions".to_string()))?;
        self.frames.push(Frame {
            function: program.entry,
            return_address: program.code.len(),
            base_pointer: 0,
            locals: vec![Value::Null; entry.frame_size()],
        });
        self.pc = entry.address;
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

    /// Execute one instruction; `false` once the program has halted.
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
            // ran off the end of the code
            self.result = self.stack.last().cloned();
            return Ok(false);
        };
        let code = (word & OPCODE_MASK) as usize;
        let Some(executor) = EXECUTORS[code] else {
            return Err(self.fault(RuntimeErrorKind::IllegalOpcode(code as u8), offset));
        };
        let operand = (word as i32) >> OPCODE_BITS;

        let depth_before = self.stack.len();
        let call_depth = self.frames.len();
        let flow = executor(self, operand).map_err(|k| self.fault(k, offset))?;

        if self.config.trace {
            TraceEntry {
                offset,
                word,
                text: disassemble_instruction(self.program, offset),
                depth_before,
                depth_after: self.stack.len(),
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

    // Operand stack

    fn push(&mut self, value: Value) -> Result<(), RuntimeErrorKind> {
        if self.stack.len() >= self.config.stack_size {
            return Err(RuntimeErrorKind::StackOverflow(format!(
                "operand stack limit exceeded ({})",
                self.config.stack_size
            )));
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, RuntimeErrorKind> {
        self.stack.pop().ok_or(RuntimeErrorKind::StackUnderflow)
    }

    fn pop_int(&mut self) -> Result<i64, RuntimeErrorKind> {
        let v = self.pop()?;
        let n = if self.config.type_check { v.as_int() } else { v.coerce_int() };
        n.ok_or_else(|| RuntimeErrorKind::type_error("int", v.type_name()))
    }

    fn pop_float(&mut self) -> Result<f64, RuntimeErrorKind> {
        let v = self.pop()?;
        let n = if self.config.type_check { v.as_float() } else { v.coerce_float() };
        n.ok_or_else(|| RuntimeErrorKind::type_error("float", v.type_name()))
    }

    fn pop_bool(&mut self) -> Result<bool, RuntimeErrorKind> {
        let v = self.pop()?;
        let b = if self.config.type_check { v.as_bool() } else { v.coerce_bool() };
        b.ok_or_else(|| RuntimeErrorKind::type_error("bool", v.type_name()))
    }

    fn pop_ref(&mut self) -> Result<HeapRef, RuntimeErrorKind> {
        match self.pop()? {
            Value::Ref(r) => Ok(r),
            Value::Null => Err(RuntimeErrorKind::NullReference),
            other => Err(RuntimeErrorKind::type_error("reference", other.type_name())),
        }
    }

    fn frame(&mut self) -> Result<&mut Frame, RuntimeErrorKind> {
        self.frames.last_mut().ok_or(RuntimeErrorKind::StackUnderflow)
    }

    fn return_to_caller(&mut self, value: Option<Value>) -> Exec {
        let frame = self.frames.pop().ok_or(RuntimeErrorKind::StackUnderflow)?;
        self.stack.truncate(frame.base_pointer);
        if self.config.debug {
            let name = self.program.functions.get(frame.function).map(|f| f.name.as_str());
            tracing::debug!(function = ?name, value = ?value, depth = self.frames.len(), "return");
        }
        if let Some(v) = value.clone() {
            self.push(v)?;
        }
        if self.frames.is_empty() {
            self.result = value;
            return Ok(Flow::Halt);
        }
        Ok(Flow::Jump(frame.return_address))
    }
}

/// Check every operand against the program tables; `Err` carries the
/// offending offset.
fn verify(program: &Program) -> Result<(), (usize, RuntimeErrorKind)> {
    for offset in 0..program.code.len() {
        let ins = match program.instruction(offset) {
            Some(Ok(ins)) => ins,
            Some(Err(code)) => return Err((offset, RuntimeErrorKind::IllegalOpcode(code))),
            None => break,
        };
        let limit = match ins.opcode.operand() {
            OperandKind::Pool => program.constants.len(),
            OperandKind::Label => program.code.len() + 1,
            OperandKind::Func => program.functions.len(),
            OperandKind::Struct => program.structs.len(),
            OperandKind::Global => program.globals as usize,
            OperandKind::Local => program.function_at(offset).map_or(0, |f| f.frame_size()),
            OperandKind::None | OperandKind::Int | OperandKind::Field => continue,
        };
        if usize::try_from(ins.operand).map_or(true, |n| n >= limit) {
            return Err((
                offset,
                RuntimeErrorKind::OutOfBounds {
                    index: ins.operand as i64,
                    length: limit,
                },
            ));
        }
    }
    Ok(())
}

fn index(n: i32, length: usize) -> Result<usize, RuntimeErrorKind> {
    usize::try_from(n)
        .ok()
        .filter(|i| *i < length)
        .ok_or(RuntimeErrorKind::OutOfBounds {
            index: n as i64,
            length,
        })
}

// =============================================================================
// Executors
// =============================================================================

macro_rules! int_binary {
    ($($name:ident($a:ident, $b:ident) => $result:expr;)*) => {
        $(
            fn $name(vm: &mut StackVm<'_>, _: i32) -> Exec {
                let $b = vm.pop_int()?;
                let $a = vm.pop_int()?;
                vm.push($result)?;
                Ok(Flow::Next)
            }
        )*
    };
}

macro_rules! float_binary {
    ($($name:ident($a:ident, $b:ident) => $result:expr;)*) => {
        $(
            fn $name(vm: &mut StackVm<'_>, _: i32) -> Exec {
                let $b = vm.pop_float()?;
                let $a = vm.pop_float()?;
                vm.push($result)?;
                Ok(Flow::Next)
            }
        )*
    };
}

int_binary! {
    iadd(a, b) => Value::Int(a.wrapping_add(b));
    isub(a, b) => Value::Int(a.wrapping_sub(b));
    imul(a, b) => Value::Int(a.wrapping_mul(b));
    ilt(a, b) => Value::Bool(a < b);
    ile(a, b) => Value::Bool(a <= b);
    igt(a, b) => Value::Bool(a > b);
    ige(a, b) => Value::Bool(a >= b);
}

float_binary! {
    fadd(a, b) => Value::Float(a + b);
    fsub(a, b) => Value::Float(a - b);
    fmul(a, b) => Value::Float(a * b);
    fdiv(a, b) => Value::Float(a / b);
    flt(a, b) => Value::Bool(a < b);
    fle(a, b) => Value::Bool(a <= b);
    fgt(a, b) => Value::Bool(a > b);
    fge(a, b) => Value::Bool(a >= b);
    feq(a, b) => Value::Bool(a == b);
    fne(a, b) => Value::Bool(a != b);
}

fn idiv(vm: &mut StackVm<'_>, _: i32) -> Exec {
    let b = vm.pop_int()?;
    let a = vm.pop_int()?;
    if b == 0 {
        return Err(RuntimeErrorKind::DivisionByZero);
    }
    vm.push(Value::Int(a.wrapping_div(b)))?;
    Ok(Flow::Next)
}

fn irem(vm: &mut StackVm<'_>, _: i32) -> Exec {
    let b = vm.pop_int()?;
    let a = vm.pop_int()?;
    if b == 0 {
        return Err(RuntimeErrorKind::DivisionByZero);
    }
    vm.push(Value::Int(a.wrapping_rem(b)))?;
    Ok(Flow::Next)
}

fn ineg(vm: &mut StackVm<'_>, _: i32) -> Exec {
    let a = vm.pop_int()?;
    vm.push(Value::Int(a.wrapping_neg()))?;
    Ok(Flow::Next)
}

fn fneg(vm: &mut StackVm<'_>, _: i32) -> Exec {
    let a = vm.pop_float()?;
    vm.push(Value::Float(-a))?;
    Ok(Flow::Next)
}

fn itof(vm: &mut StackVm<'_>, _: i32) -> Exec {
    let a = vm.pop_int()?;
    vm.push(Value::Float(a as f64))?;
    Ok(Flow::Next)
}

fn ieq(vm: &mut StackVm<'_>, _: i32) -> Exec {
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(Value::Bool(a == b))?;
    Ok(Flow::Next)
}

fn ine(vm: &mut StackVm<'_>, _: i32) -> Exec {
    let b = vm.pop()?;
    let a = vm.pop()?;
    vm.push(Value::Bool(a != b))?;
    Ok(Flow::Next)
}

/// Bitwise on integers, logical on booleans.
fn logic(vm: &mut StackVm<'_>, ints: fn(i64, i64) -> i64, bools: fn(bool, bool) -> bool) -> Exec {
    let b = vm.pop()?;
    let a = vm.pop()?;
    let result = match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(ints(*x, *y)),
        (Value::Bool(x), Value::Bool(y)) => Value::Bool(bools(*x, *y)),
        _ if !vm.config.type_check => match (a.coerce_bool(), b.coerce_bool()) {
            (Some(x), Some(y)) => Value::Bool(bools(x, y)),
            _ => return Err(RuntimeErrorKind::type_error("bool", b.type_name())),
        },
        _ => {
            let found = format!("{} and {}", a.type_name(), b.type_name());
            return Err(RuntimeErrorKind::type_error("two ints or two bools", found));
        }
    };
    vm.push(result)?;
    Ok(Flow::Next)
}

fn iand(vm: &mut StackVm<'_>, _: i32) -> Exec {
    logic(vm, |a, b| a & b, |a, b| a & b)
}

fn ior(vm: &mut StackVm<'_>, _: i32) -> Exec {
    logic(vm, |a, b| a | b, |a, b| a | b)
}

fn ixor(vm: &mut StackVm<'_>, _: i32) -> Exec {
    logic(vm, |a, b| a ^ b, |a, b| a ^ b)
}

fn inot(vm: &mut StackVm<'_>, _: i32) -> Exec {
    let a = vm.pop_bool()?;
    vm.push(Value::Bool(!a))?;
    Ok(Flow::Next)
}

fn call(vm: &mut StackVm<'_>, operand: i32) -> Exec {
    let program = vm.program;
    let function = index(operand, program.functions.len())?;
    let callee = &program.functions[function];

    if vm.frames.len() >= vm.config.max_call_depth {
        return Err(RuntimeErrorKind::StackOverflow(format!(
            "call depth limit exceeded ({}) in '{}'",
            vm.config.max_call_depth, callee.name
        )));
    }
    let nargs = callee.nargs as usize;
    if vm.stack.len() < nargs {
        return Err(RuntimeErrorKind::StackUnderflow);
    }
    let mut locals = vm.stack.split_off(vm.stack.len() - nargs);
    locals.resize(callee.frame_size(), Value::Null);

    if vm.config.debug {
        tracing::debug!(function = %callee.name, args = ?&locals[..nargs], depth = vm.frames.len() + 1, "call");
    }
    vm.frames.push(Frame {
        function,
        return_address: vm.pc + 1,
        base_pointer: vm.stack.len(),
        locals,
    });
    Ok(Flow::Jump(callee.address))
}

fn ret(vm: &mut StackVm<'_>, _: i32) -> Exec {
    vm.return_to_caller(None)
}

fn retv(vm: &mut StackVm<'_>, _: i32) -> Exec {
    let value = vm.pop()?;
    vm.return_to_caller(Some(value))
}

/// A jump may land on any instruction or just past the last one.
fn jump(vm: &StackVm<'_>, target: i32) -> Exec {
    let length = vm.program.code.len();
    usize::try_from(target)
        .ok()
        .filter(|t| *t <= length)
        .map(Flow::Jump)
        .ok_or(RuntimeErrorKind::OutOfBounds {
            index: target as i64,
            length,
        })
}

fn br(vm: &mut StackVm<'_>, target: i32) -> Exec {
    jump(vm, target)
}

fn brt(vm: &mut StackVm<'_>, target: i32) -> Exec {
    if vm.pop_bool()? { jump(vm, target) } else { Ok(Flow::Next) }
}

fn brf(vm: &mut StackVm<'_>, target: i32) -> Exec {
    if vm.pop_bool()? { Ok(Flow::Next) } else { jump(vm, target) }
}

fn iconst(vm: &mut StackVm<'_>, n: i32) -> Exec {
    vm.push(Value::Int(n as i64))?;
    Ok(Flow::Next)
}

/// `lconst`, `fconst` and `sconst`.
fn pool(vm: &mut StackVm<'_>, n: i32) -> Exec {
    let program = vm.program;
    let constants = &program.constants;
    let value = match &constants[index(n, constants.len())?] {
        Const::Int(v) => Value::Int(*v),
        Const::Float(v) => Value::Float(*v),
        Const::Str(s) => Value::Str(s.clone()),
    };
    vm.push(value)?;
    Ok(Flow::Next)
}

fn cconst(vm: &mut StackVm<'_>, n: i32) -> Exec {
    let c = char::from_u32(n as u32).ok_or_else(|| RuntimeErrorKind::type_error("char", "int"))?;
    vm.push(Value::Char(c))?;
    Ok(Flow::Next)
}

fn bconst(vm: &mut StackVm<'_>, n: i32) -> Exec {
    vm.push(Value::Bool(n != 0))?;
    Ok(Flow::Next)
}

fn null(vm: &mut StackVm<'_>, _: i32) -> Exec {
    vm.push(Value::Null)?;
    Ok(Flow::Next)
}

fn load(vm: &mut StackVm<'_>, n: i32) -> Exec {
    let frame = vm.frame()?;
    let value = frame.locals[index(n, frame.locals.len())?].clone();
    vm.push(value)?;
    Ok(Flow::Next)
}

fn store(vm: &mut StackVm<'_>, n: i32) -> Exec {
    let value = vm.pop()?;
    let frame = vm.frame()?;
    let slot = index(n, frame.locals.len())?;
    frame.locals[slot] = value;
    Ok(Flow::Next)
}

fn gload(vm: &mut StackVm<'_>, n: i32) -> Exec {
    let value = vm.globals[index(n, vm.globals.len())?].clone();
    vm.push(value)?;
    Ok(Flow::Next)
}

fn gstore(vm: &mut StackVm<'_>, n: i32) -> Exec {
    let value = vm.pop()?;
    let slot = index(n, vm.globals.len())?;
    vm.globals[slot] = value;
    Ok(Flow::Next)
}

fn fload(vm: &mut StackVm<'_>, field: i32) -> Exec {
    let r = vm.pop_ref()?;
    let value = vm.heap.load(r, field as i64)?;
    vm.push(value)?;
    Ok(Flow::Next)
}

fn fstore(vm: &mut StackVm<'_>, field: i32) -> Exec {
    let value = vm.pop()?;
    let r = vm.pop_ref()?;
    vm.heap.store(r, field as i64, value)?;
    Ok(Flow::Next)
}

fn new_struct(vm: &mut StackVm<'_>, n: i32) -> Exec {
    let program = vm.program;
    let structs = &program.structs;
    let ty = index(n, structs.len())?;
    let r = vm.heap.alloc_struct(ty, structs[ty].fields.len())?;
    vm.push(Value::Ref(r))?;
    Ok(Flow::Next)
}

fn newarray(vm: &mut StackVm<'_>, _: i32) -> Exec {
    let len = vm.pop_int()?;
    let r = vm.heap.alloc_array(len)?;
    vm.push(Value::Ref(r))?;
    Ok(Flow::Next)
}

fn aload(vm: &mut StackVm<'_>, _: i32) -> Exec {
    let i = vm.pop_int()?;
    let r = vm.pop_ref()?;
    let value = vm.heap.load(r, i)?;
    vm.push(value)?;
    Ok(Flow::Next)
}

fn astore(vm: &mut StackVm<'_>, _: i32) -> Exec {
    let value = vm.pop()?;
    let i = vm.pop_int()?;
    let r = vm.pop_ref()?;
    vm.heap.store(r, i, value)?;
    Ok(Flow::Next)
}

fn print(vm: &mut StackVm<'_>, _: i32) -> Exec {
    let value = vm.pop()?;
    vm.output.push_str(&value.to_string());
    vm.output.push('\n');
    Ok(Flow::Next)
}

fn pop(vm: &mut StackVm<'_>, _: i32) -> Exec {
    vm.pop()?;
    Ok(Flow::Next)
}

fn dup(vm: &mut StackVm<'_>, _: i32) -> Exec {
    let top = vm.stack.last().cloned().ok_or(RuntimeErrorKind::StackUnderflow)?;
    vm.push(top)?;
    Ok(Flow::Next)
}

fn halt(vm: &mut StackVm<'_>, _: i32) -> Exec {
    vm.result = vm.stack.last().cloned();
    Ok(Flow::Halt)
}

fn nop(_: &mut StackVm<'_>, _: i32) -> Exec {
    Ok(Flow::Next)
}

const fn executors() -> [Option<Executor>; OPCODE_SPACE] {
    let mut t: [Option<Executor>; OPCODE_SPACE] = [None; OPCODE_SPACE];
    t[Opcode::IAdd as usize] = Some(iadd as Executor);
    t[Opcode::ISub as usize] = Some(isub as Executor);
    t[Opcode::IMul as usize] = Some(imul as Executor);
    t[Opcode::IDiv as usize] = Some(idiv as Executor);
    t[Opcode::IRem as usize] = Some(irem as Executor);
    t[Opcode::INeg as usize] = Some(ineg as Executor);
    t[Opcode::ILt as usize] = Some(ilt as Executor);
    t[Opcode::ILe as usize] = Some(ile as Executor);
    t[Opcode::IGt as usize] = Some(igt as Executor);
    t[Opcode::IGe as usize] = Some(ige as Executor);
    t[Opcode::IEq as usize] = Some(ieq as Executor);
    t[Opcode::INe as usize] = Some(ine as Executor);
    t[Opcode::IAnd as usize] = Some(iand as Executor);
    t[Opcode::IOr as usize] = Some(ior as Executor);
    t[Opcode::IXor as usize] = Some(ixor as Executor);
    t[Opcode::INot as usize] = Some(inot as Executor);
    t[Opcode::FAdd as usize] = Some(fadd as Executor);
    t[Opcode::FSub as usize] = Some(fsub as Executor);
    t[Opcode::FMul as usize] = Some(fmul as Executor);
    t[Opcode::FDiv as usize] = Some(fdiv as Executor);
    t[Opcode::FNeg as usize] = Some(fneg as Executor);
    t[Opcode::FLt as usize] = Some(flt as Executor);
    t[Opcode::FLe as usize] = Some(fle as Executor);
    t[Opcode::FGt as usize] = Some(fgt as Executor);
    t[Opcode::FGe as usize] = Some(fge as Executor);
    t[Opcode::FEq as usize] = Some(feq as Executor);
    t[Opcode::FNe as usize] = Some(fne as Executor);
    t[Opcode::IToF as usize] = Some(itof as Executor);
    t[Opcode::Call as usize] = Some(call as Executor);
    t[Opcode::Ret as usize] = Some(ret as Executor);
    t[Opcode::RetV as usize] = Some(retv as Executor);
    t[Opcode::Br as usize] = Some(br as Executor);
    t[Opcode::Brt as usize] = Some(brt as Executor);
    t[Opcode::Brf as usize] = Some(brf as Executor);
    t[Opcode::IConst as usize] = Some(iconst as Executor);
    t[Opcode::LConst as usize] = Some(pool as Executor);
    t[Opcode::FConst as usize] = Some(pool as Executor);
    t[Opcode::SConst as usize] = Some(pool as Executor);
    t[Opcode::CConst as usize] = Some(cconst as Executor);
    t[Opcode::BConst as usize] = Some(bconst as Executor);
    t[Opcode::Null as usize] = Some(null as Executor);
    t[Opcode::Load as usize] = Some(load as Executor);
    t[Opcode::Store as usize] = Some(store as Executor);
    t[Opcode::GLoad as usize] = Some(gload as Executor);
    t[Opcode::GStore as usize] = Some(gstore as Executor);
    t[Opcode::FLoad as usize] = Some(fload as Executor);
    t[Opcode::FStore as usize] = Some(fstore as Executor);
    t[Opcode::Struct as usize] = Some(new_struct as Executor);
    t[Opcode::NewArray as usize] = Some(newarray as Executor);
    t[Opcode::ALoad as usize] = Some(aload as Executor);
    t[Opcode::AStore as usize] = Some(astore as Executor);
    t[Opcode::Print as usize] = Some(print as Executor);
    t[Opcode::Pop as usize] = Some(pop as Executor);
    t[Opcode::Dup as usize] = Some(dup as Executor);
    t[Opcode::Halt as usize] = Some(halt as Executor);
    t[Opcode::Nop as usize] = Some(nop as Executor);
    t
}

/// Dispatch table indexed by the opcode bits of an instruction word.
static EXECUTORS: [Option<Executor>; OPCODE_SPACE] = executors();

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::asm::assemble_stack;
    use crate::bytecode::op::Instruction;
    use pretty_assertions::assert_eq;

    fn run_with(text: &str, config: VmConfig) -> (Result<Option<Value>, RuntimeError>, VmState, String) {
        let program = assemble_stack(text).unwrap();
        let mut vm = StackVm::with_config(&program, config);
        let result = vm.exec();
        (result, vm.state(), vm.output().to_string())
    }

    fn run(text: &str) -> Result<Option<Value>, RuntimeError> {
        run_with(text, VmConfig::default()).0
    }

    #[test]
    fn test_every_opcode_has_an_executor() {
        for op in Opcode::ALL {
            assert!(EXECUTORS[*op as usize].is_some(), "{}", op);
        }
        assert!(EXECUTORS[0].is_none());
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run("iconst 7\niconst 3\nisub\niconst 4\nimul\nhalt\n"), Ok(Some(Value::Int(16))));
        assert_eq!(run("iconst 7\niconst 2\nirem\nhalt\n"), Ok(Some(Value::Int(1))));
        assert_eq!(run("fconst 1.5\nfconst 2.0\nfmul\nhalt\n"), Ok(Some(Value::Float(3.0))));
        assert_eq!(run("iconst 3\nitof\nfconst 0.5\nfadd\nhalt\n"), Ok(Some(Value::Float(3.5))));
    }

    #[test]
    fn test_division_by_zero() {
        let (result, state, _) = run_with("iconst 1\niconst 0\nidiv\nhalt\n", VmConfig::default());
        let err = result.unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::DivisionByZero);
        assert_eq!(err.offset, Some(2));
        assert_eq!(err.instruction.as_deref(), Some("idiv"));
        assert_eq!(state, VmState::Error);
        // floats follow IEEE
        assert_eq!(run("fconst 1.0\nfconst 0.0\nfdiv\nhalt\n"), Ok(Some(Value::Float(f64::INFINITY))));
    }

    #[test]
    fn test_call_and_return() {
        let text = "\
.def main: args=0, locals=0
    iconst 20
    iconst 22
    call add, 2
    retv
.def add: args=2, locals=1
    load 0
    load 1
    iadd
    store 2
    load 2
    retv
";
        assert_eq!(run(text), Ok(Some(Value::Int(42))));
    }

    #[test]
    fn test_print_output() {
        let (result, state, output) = run_with(
            "sconst \"hi\"\nprint\ncconst 'x'\nprint\nbconst true\nprint\nnull\nprint\nhalt\n",
            VmConfig::default(),
        );
        assert_eq!(result, Ok(None));
        assert_eq!(state, VmState::Halted);
        assert_eq!(output, "hi\nx\ntrue\nnull\n");
    }

    #[test]
    fn test_structs_and_arrays() {
        let text = "\
.struct Point: x, y
    struct Point
    dup
    iconst 5
    fstore y
    fload y
    iconst 3
    newarray
    dup
    iconst 2
    iconst 9
    astore
    iconst 2
    aload
    iadd
    halt
";
        assert_eq!(run(text), Ok(Some(Value::Int(14))));
    }

    #[test]
    fn test_null_defaults_and_faults() {
        assert_eq!(run(".struct P: x\nstruct P\nfload x\nhalt\n"), Ok(Some(Value::Null)));
        let err = run("iconst 2\nnewarray\niconst 2\naload\nhalt\n").unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::OutOfBounds { index: 2, length: 2 });
        let err = run(".struct P: x\nnull\nfload x\nhalt\n").unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::NullReference);
    }

    #[test]
    fn test_type_check_switch() {
        let text = "bconst true\niconst 2\niadd\nhalt\n";
        let err = run(text).unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::TypeError { .. }));
        let lax = VmConfig::builder().type_check(false).build();
        assert_eq!(run_with(text, lax).0, Ok(Some(Value::Int(3))));
    }

    #[test]
    fn test_step_limit() {
        let config = VmConfig::builder().max_steps(50).build();
        let (result, state, _) = run_with("top: br top\n", config);
        assert_eq!(result.unwrap_err().kind, RuntimeErrorKind::StepLimitExceeded(50));
        assert_eq!(state, VmState::Error);
    }

    #[test]
    fn test_call_depth_limit() {
        let config = VmConfig::builder().max_call_depth(10).build();
        let text = ".def main: args=0, locals=0\ncall main\nret\n";
        let err = run_with(text, config).0.unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::StackOverflow(_)));
        assert_eq!(err.call_depth, 10);
        assert!(err.to_string().contains("call stack:"));
    }

    #[test]
    fn test_heap_and_cache_limits() {
        let config = VmConfig::builder().heap_size(4).build();
        let err = run_with("iconst 10\nnewarray\nhalt\n", config).0.unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::HeapExhausted { .. }));

        let config = VmConfig::builder().instruction_cache_size(1).build();
        let err = run_with("nop\nhalt\n", config).0.unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::ProgramTooLarge { size: 2, capacity: 1 });
    }

    #[test]
    fn test_illegal_opcode() {
        let mut program = assemble_stack("nop\nnop\nhalt\n").unwrap();
        program.code[1] = 63;
        let mut vm = StackVm::new(&program);
        let err = vm.exec().unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::IllegalOpcode(63));
        assert_eq!(err.offset, Some(1));
        assert_eq!(err.instruction.as_deref(), Some(".word 63"));
        assert_eq!(vm.state(), VmState::Error);

        let unchecked = VmConfig::builder().bounds_check(false).build();
        let mut vm = StackVm::with_config(&program, unchecked);
        assert_eq!(vm.exec().unwrap_err().kind, RuntimeErrorKind::IllegalOpcode(63));
        // the first nop ran before the fault
        assert_eq!(vm.steps(), 2);
    }

    #[test]
    fn test_stack_underflow() {
        let mut program = assemble_stack("nop\nhalt\n").unwrap();
        program.code[0] = Instruction::op(Opcode::IAdd).encode();
        let mut vm = StackVm::new(&program);
        let err = vm.exec().unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::StackUnderflow);
        assert_eq!(err.offset, Some(0));
        assert_eq!(vm.state(), VmState::Error);
    }

    #[test]
    fn test_wild_jump_faults() {
        let unchecked = VmConfig::builder().bounds_check(false).build();
        let mut program = assemble_stack("nop\nhalt\n").unwrap();

        for target in [-5, 3] {
            program.code[0] = Instruction::new(Opcode::Br, target).encode();
            let mut vm = StackVm::with_config(&program, unchecked.clone());
            let err = vm.exec().unwrap_err();
            assert_eq!(
                err.kind,
                RuntimeErrorKind::OutOfBounds {
                    index: target as i64,
                    length: 2
                }
            );
            assert_eq!(err.offset, Some(0));
            assert_eq!(vm.state(), VmState::Error);
        }

        // just past the last instruction is the end of the program
        program.code[0] = Instruction::new(Opcode::Br, 2).encode();
        let mut vm = StackVm::with_config(&program, unchecked);
        assert_eq!(vm.exec(), Ok(None));
        assert_eq!(vm.state(), VmState::Halted);
    }

    #[test]
    fn test_trace_records_depths() {
        let config = VmConfig::builder().trace(true).build();
        let program = assemble_stack("iconst 1\niconst 2\niadd\nhalt\n").unwrap();
        let mut vm = StackVm::with_config(&program, config);
        vm.exec().unwrap();
        let depths: Vec<_> = vm.trace().iter().map(|t| (t.depth_before, t.depth_after)).collect();
        assert_eq!(depths, vec![(0, 1), (1, 2), (2, 1), (1, 1)]);
        assert_eq!(vm.trace()[2].text, "iadd");
    }

    #[test]
    fn test_exec_twice_returns_result() {
        let program = assemble_stack("iconst 4\nhalt\n").unwrap();
        let mut vm = StackVm::new(&program);
        assert_eq!(vm.exec(), Ok(Some(Value::Int(4))));
        assert_eq!(vm.exec(), Ok(Some(Value::Int(4))));
    }
}
