//! Tree-walking interpreter over the resolved AST.
//!
//! Executes a program without compiling it, with the semantics of the
//! compiled path: globals initialized in declaration order, `main` called with
//! null arguments, zero/null defaults for uninitialized variables, fields and
//! array elements, integer results widened where a float is stored.

use std::collections::HashMap;

use crate::lang::ast::{BinOp, Block, CompileUnit, Expr, ExprKind, FuncDecl, Stmt, StmtKind, UnaryOp};
use crate::lang::span::Span;
use crate::lang::value::{HeapRef, Value};
use crate::resolve::Resolution;
use crate::symtab::{Builtin, SymbolId, Type};

use super::config::VmConfig;
use super::heap::Heap;
use super::runtime_error::{RuntimeError, RuntimeErrorKind};

/// How a statement finished.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFlow {
    Normal,
    Return(Option<Value>),
    Break,
    Continue,
}

struct Frame {
    function: SymbolId,
    locals: Vec<Value>,
}

type Exec<T> = Result<T, RuntimeError>;

/// Native stack reserved for each interpreted call.
const STACK_PER_CALL: usize = 256 * 1024;
const BASE_STACK: usize = 4 * 1024 * 1024;
const MAX_STACK: usize = 512 * 1024 * 1024;

/// Deepest call chain the interpreter runs, whatever `max_call_depth` says.
pub const MAX_INTERP_CALL_DEPTH: usize = (MAX_STACK - BASE_STACK) / STACK_PER_CALL;

pub struct Interpreter<'a> {
    unit: &'a CompileUnit,
    res: &'a Resolution,
    config: VmConfig,
    functions: HashMap<SymbolId, &'a FuncDecl>,
    globals: Vec<Value>,
    frames: Vec<Frame>,
    heap: Heap,
    steps: u64,
    output: String,
}

impl<'a> Interpreter<'a> {
    pub fn new(unit: &'a CompileUnit, res: &'a Resolution) -> Self {
        Self::with_config(unit, res, VmConfig::default())
    }

    pub fn with_config(unit: &'a CompileUnit, res: &'a Resolution, config: VmConfig) -> Self {
        let functions = unit
            .functions()
            .filter_map(|f| res.declared(f.id).map(|id| (id, f)))
            .collect();
        let nglobals = unit
            .globals()
            .filter_map(|v| res.declared(v.id))
            .filter_map(|id| res.table.symbol(id).slot)
            .map(|slot| slot as usize + 1)
            .max()
            .unwrap_or(0);
        Interpreter {
            unit,
            res,
            heap: Heap::new(config.heap_size),
            config,
            functions,
            globals: vec![Value::Null; nglobals],
            frames: Vec::new(),
            steps: 0,
            output: String::new(),
        }
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn globals(&self) -> &[Value] {
        &self.globals
    }

    /// Initialize globals, then call `main`. The result is `main`'s return
    /// value.
    ///
    /// Each interpreted call recurses on the native stack, so the program runs
    /// on its own thread with a stack sized for the call depth limit.
    pub fn run(&mut self) -> Exec<Option<Value>> {
        if !self.res.is_ok() {
            return Err(RuntimeErrorKind::NotReady(format!(
                "program has {} compile error(s)",
                self.res.diagnostics.len()
            ))
            .into());
        }

        let stack_size = BASE_STACK + self.call_depth_limit() * STACK_PER_CALL;
        let dispatch = tracing::dispatcher::get_default(|d| d.clone());
        std::thread::scope(|scope| {
            let worker = std::thread::Builder::new()
                .name("cymbol-interp".to_string())
                .stack_size(stack_size)
                .spawn_scoped(scope, || tracing::dispatcher::with_default(&dispatch, || self.run_main()))
                .map_err(|e| {
                    RuntimeError::from(RuntimeErrorKind::NotReady(format!(
                        "cannot start interpreter thread: {e}"
                    )))
                })?;
            worker.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic))
        })
    }

    fn call_depth_limit(&self) -> usize {
        self.config.max_call_depth.min(MAX_INTERP_CALL_DEPTH)
    }

    fn run_main(&mut self) -> Exec<Option<Value>> {
        let unit = self.unit;
        for v in unit.globals() {
            let Some(id) = self.res.declared(v.id) else {
                continue;
            };
            let ty = self.res.table.symbol(id).ty.clone();
            let value = match &v.init {
                Some(init) => coerce(self.eval(init)?, &ty),
                None => default_value(&ty),
            };
            self.store_var(id, value, v.span)?;
        }

        let main = self
            .res
            .main()
            .ok_or_else(|| RuntimeErrorKind::NotReady("no main function".to_string()))?;
        let nargs = self.res.table.symbol(main).method().map_or(0, |m| m.arg_count());
        let result = self.call(main, vec![Value::Null; nargs], Span::default())?;
        tracing::debug!(steps = self.steps, result = ?result, "interpreter finished");
        Ok(result)
    }

    fn error(&self, kind: RuntimeErrorKind, span: Span) -> RuntimeError {
        let call_stack = self
            .frames
            .iter()
            .map(|f| self.res.table.symbol(f.function).name.clone())
            .collect();
        RuntimeError::new(kind).with_span(span).with_call_stack(call_stack)
    }

    fn check_limits(&mut self, span: Span) -> Exec<()> {
        self.steps += 1;
        if let Some(max) = self.config.max_steps {
            if self.steps > max {
                return Err(self.error(RuntimeErrorKind::StepLimitExceeded(max), span));
            }
        }
        Ok(())
    }

    // ─── Calls ───────────────────────────────────────────────────────────

    fn call(&mut self, function: SymbolId, args: Vec<Value>, span: Span) -> Exec<Option<Value>> {
        let res = self.res;
        let sym = res.table.symbol(function);
        let Some(method) = sym.method() else {
            let kind = RuntimeErrorKind::type_error("function", sym.kind_name());
            return Err(self.error(kind, span));
        };
        if method.builtin == Some(Builtin::Print) {
            for v in args {
                self.output.push_str(&v.to_string());
                self.output.push('\n');
            }
            return Ok(None);
        }
        let Some(decl) = self.functions.get(&function).copied() else {
            let kind = RuntimeErrorKind::NotReady(format!("function '{}' has no body", sym.name));
            return Err(self.error(kind, span));
        };

        let limit = self.call_depth_limit();
        if self.frames.len() >= limit {
            let kind = RuntimeErrorKind::StackOverflow(format!(
                "call depth limit exceeded ({limit}) in '{}'",
                sym.name
            ));
            return Err(self.error(kind, span));
        }

        let mut locals = vec![Value::Null; method.arg_count() + method.nlocals as usize];
        for (param, value) in method.params.iter().zip(args) {
            let p = res.table.symbol(*param);
            if let Some(slot) = p.slot {
                set_slot(&mut locals, slot, coerce(value, &p.ty));
            }
        }
        let ret = sym.ty.clone();

        if self.config.debug {
            tracing::debug!(function = %decl.name, depth = self.frames.len() + 1, "call");
        }
        self.frames.push(Frame { function, locals });
        let flow = self.exec_block(&decl.body);
        self.frames.pop();

        let value = match flow? {
            ControlFlow::Return(Some(v)) => Some(coerce(v, &ret)),
            _ if ret == Type::Void => None,
            // falling off the end of a value-returning function
            _ => Some(Value::Null),
        };
        Ok(value)
    }

    // ─── Statements ──────────────────────────────────────────────────────

    fn exec_block(&mut self, block: &Block) -> Exec<ControlFlow> {
        for stmt in &block.stmts {
            match self.exec_stmt(stmt)? {
                ControlFlow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(ControlFlow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Exec<ControlFlow> {
        self.check_limits(stmt.span)?;

        match &stmt.kind {
            StmtKind::Var(v) => {
                let Some(id) = self.res.declared(v.id) else {
                    return Ok(ControlFlow::Normal);
                };
                let ty = self.res.table.symbol(id).ty.clone();
                let value = match &v.init {
                    Some(init) => coerce(self.eval(init)?, &ty),
                    None => default_value(&ty),
                };
                self.store_var(id, value, v.span)?;
            }
            StmtKind::Assign { target, value } => self.assign(target, value)?,
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.condition(cond)? {
                    return self.exec_stmt(then_branch);
                }
                if let Some(else_branch) = else_branch {
                    return self.exec_stmt(else_branch);
                }
            }
            StmtKind::While { cond, body } => {
                while self.condition(cond)? {
                    match self.exec_stmt(body)? {
                        ControlFlow::Break => break,
                        ControlFlow::Normal | ControlFlow::Continue => {}
                        ret @ ControlFlow::Return(_) => return Ok(ret),
                    }
                    self.check_limits(stmt.span)?;
                }
            }
            StmtKind::Break => return Ok(ControlFlow::Break),
            StmtKind::Continue => return Ok(ControlFlow::Continue),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(e) => Some(self.eval(e)?),
                    None => None,
                };
                return Ok(ControlFlow::Return(value));
            }
            StmtKind::Expr(e) => {
                self.eval_any(e)?;
            }
            StmtKind::Block(block) => return self.exec_block(block),
        }
        Ok(ControlFlow::Normal)
    }

    fn assign(&mut self, target: &Expr, value: &Expr) -> Exec<()> {
        let ty = self.res.type_of(target.id);
        match &target.kind {
            ExprKind::Ident(_) => {
                let Some(id) = self.res.binding(target.id) else {
                    return Ok(());
                };
                let v = coerce(self.eval(value)?, &ty);
                self.store_var(id, v, target.span)
            }
            ExprKind::Field { object, .. } => {
                let r = self.eval_ref(object)?;
                let v = coerce(self.eval(value)?, &ty);
                let field = self.field_index(target);
                self.heap
                    .store(r, field, v)
                    .map_err(|k| self.error(k, target.span))
            }
            ExprKind::Index { array, index } => {
                let r = self.eval_ref(array)?;
                let i = self.eval_int(index)?;
                let v = coerce(self.eval(value)?, &ty);
                self.heap.store(r, i, v).map_err(|k| self.error(k, target.span))
            }
            _ => Ok(()),
        }
    }

    fn condition(&mut self, cond: &Expr) -> Exec<bool> {
        let v = self.eval(cond)?;
        let b = if self.config.type_check { v.as_bool() } else { v.coerce_bool() };
        b.ok_or_else(|| self.error(RuntimeErrorKind::type_error("bool", v.type_name()), cond.span))
    }

    // ─── Variables ───────────────────────────────────────────────────────

    fn store_var(&mut self, id: SymbolId, value: Value, span: Span) -> Exec<()> {
        let res = self.res;
        let sym = res.table.symbol(id);
        let slot = sym.slot.unwrap_or(0);
        if sym.is_global() {
            set_slot(&mut self.globals, slot, value);
            return Ok(());
        }
        match self.frames.last_mut() {
            Some(frame) => {
                set_slot(&mut frame.locals, slot, value);
                Ok(())
            }
            None => Err(self.error(RuntimeErrorKind::StackUnderflow, span)),
        }
    }

    fn load_var(&self, id: SymbolId, span: Span) -> Exec<Value> {
        let sym = self.res.table.symbol(id);
        let slot = sym.slot.unwrap_or(0) as usize;
        let space = if sym.is_global() {
            Some(&self.globals)
        } else {
            self.frames.last().map(|f| &f.locals)
        };
        let Some(space) = space else {
            return Err(self.error(RuntimeErrorKind::StackUnderflow, span));
        };
        Ok(space.get(slot).cloned().unwrap_or(Value::Null))
    }

    fn field_index(&self, expr: &Expr) -> i64 {
        self.res
            .binding(expr.id)
            .and_then(|f| self.res.table.symbol(f).field_index())
            .unwrap_or(0) as i64
    }

    // ─── Expressions ─────────────────────────────────────────────────────

    /// Evaluate an expression that must produce a value.
    fn eval(&mut self, expr: &Expr) -> Exec<Value> {
        Ok(self.eval_any(expr)?.unwrap_or(Value::Null))
    }

    fn eval_int(&mut self, expr: &Expr) -> Exec<i64> {
        let v = self.eval(expr)?;
        let n = if self.config.type_check { v.as_int() } else { v.coerce_int() };
        n.ok_or_else(|| self.error(RuntimeErrorKind::type_error("int", v.type_name()), expr.span))
    }

    fn eval_ref(&mut self, expr: &Expr) -> Exec<HeapRef> {
        match self.eval(expr)? {
            Value::Ref(r) => Ok(r),
            Value::Null => Err(self.error(RuntimeErrorKind::NullReference, expr.span)),
            other => {
                let kind = RuntimeErrorKind::type_error("reference", other.type_name());
                Err(self.error(kind, expr.span))
            }
        }
    }

    /// `None` only for calls to functions without a result.
    fn eval_any(&mut self, expr: &Expr) -> Exec<Option<Value>> {
        let value = match &expr.kind {
            ExprKind::Int(n) => Value::Int(*n),
            ExprKind::Float(n) => Value::Float(*n),
            ExprKind::Bool(b) => Value::Bool(*b),
            ExprKind::Char(c) => Value::Char(*c),
            ExprKind::Str(s) => Value::Str(s.clone()),
            ExprKind::Null => Value::Null,
            ExprKind::Ident(_) => match self.res.binding(expr.id) {
                Some(id) => self.load_var(id, expr.span)?,
                None => Value::Null,
            },
            ExprKind::Binary { op: BinOp::And, lhs, rhs } => {
                Value::Bool(self.condition(lhs)? && self.condition(rhs)?)
            }
            ExprKind::Binary { op: BinOp::Or, lhs, rhs } => {
                Value::Bool(self.condition(lhs)? || self.condition(rhs)?)
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                self.binary(*op, l, r).map_err(|k| self.error(k, expr.span))?
            }
            ExprKind::Unary { op, operand } => {
                let v = self.eval(operand)?;
                self.unary(*op, v).map_err(|k| self.error(k, expr.span))?
            }
            ExprKind::Call { args, .. } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                let Some(function) = self.res.binding(expr.id) else {
                    return Ok(None);
                };
                return self.call(function, values, expr.span);
            }
            ExprKind::Field { object, .. } => {
                let r = self.eval_ref(object)?;
                let field = self.field_index(expr);
                self.heap.load(r, field).map_err(|k| self.error(k, expr.span))?
            }
            ExprKind::Index { array, index } => {
                let r = self.eval_ref(array)?;
                let i = self.eval_int(index)?;
                self.heap.load(r, i).map_err(|k| self.error(k, expr.span))?
            }
            ExprKind::NewStruct(_) => {
                let Some(id) = self.res.binding(expr.id) else {
                    return Ok(Some(Value::Null));
                };
                let nfields = self
                    .res
                    .table
                    .symbol(id)
                    .struct_info()
                    .map_or(0, |s| s.fields.len());
                let r = self
                    .heap
                    .alloc_struct(id.0 as usize, nfields)
                    .map_err(|k| self.error(k, expr.span))?;
                Value::Ref(r)
            }
            ExprKind::NewArray { len, .. } => {
                let n = self.eval_int(len)?;
                let r = self.heap.alloc_array(n).map_err(|k| self.error(k, expr.span))?;
                Value::Ref(r)
            }
        };
        Ok(Some(value))
    }

    fn binary(&self, op: BinOp, l: Value, r: Value) -> Result<Value, RuntimeErrorKind> {
        if op.is_equality() {
            let equal = match (&l, &r) {
                (Value::Float(_), Value::Int(_)) | (Value::Int(_), Value::Float(_)) => {
                    l.coerce_float() == r.coerce_float()
                }
                _ => l == r,
            };
            return Ok(Value::Bool(if op == BinOp::Eq { equal } else { !equal }));
        }

        let float = matches!(l, Value::Float(_)) || matches!(r, Value::Float(_));
        if float && op != BinOp::Rem {
            let a = self.float_operand(&l)?;
            let b = self.float_operand(&r)?;
            return Ok(match op {
                BinOp::Add => Value::Float(a + b),
                BinOp::Sub => Value::Float(a - b),
                BinOp::Mul => Value::Float(a * b),
                BinOp::Div => Value::Float(a / b),
                BinOp::Lt => Value::Bool(a < b),
                BinOp::Le => Value::Bool(a <= b),
                BinOp::Gt => Value::Bool(a > b),
                _ => Value::Bool(a >= b),
            });
        }

        let a = self.int_operand(&l)?;
        let b = self.int_operand(&r)?;
        Ok(match op {
            BinOp::Add => Value::Int(a.wrapping_add(b)),
            BinOp::Sub => Value::Int(a.wrapping_sub(b)),
            BinOp::Mul => Value::Int(a.wrapping_mul(b)),
            BinOp::Div | BinOp::Rem if b == 0 => return Err(RuntimeErrorKind::DivisionByZero),
            BinOp::Div => Value::Int(a.wrapping_div(b)),
            BinOp::Rem => Value::Int(a.wrapping_rem(b)),
            BinOp::Lt => Value::Bool(a < b),
            BinOp::Le => Value::Bool(a <= b),
            BinOp::Gt => Value::Bool(a > b),
            _ => Value::Bool(a >= b),
        })
    }

    fn unary(&self, op: UnaryOp, v: Value) -> Result<Value, RuntimeErrorKind> {
        match (op, &v) {
            (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
            (UnaryOp::Neg, _) => Ok(Value::Int(self.int_operand(&v)?.wrapping_neg())),
            (UnaryOp::Not, _) => {
                let b = if self.config.type_check { v.as_bool() } else { v.coerce_bool() };
                b.map(|b| Value::Bool(!b))
                    .ok_or_else(|| RuntimeErrorKind::type_error("bool", v.type_name()))
            }
        }
    }

    fn int_operand(&self, v: &Value) -> Result<i64, RuntimeErrorKind> {
        let n = if self.config.type_check { v.as_int() } else { v.coerce_int() };
        n.ok_or_else(|| RuntimeErrorKind::type_error("int", v.type_name()))
    }

    fn float_operand(&self, v: &Value) -> Result<f64, RuntimeErrorKind> {
        match v {
            Value::Int(n) => Ok(*n as f64),
            Value::Float(f) => Ok(*f),
            _ if !self.config.type_check => v
                .coerce_float()
                .ok_or_else(|| RuntimeErrorKind::type_error("float", v.type_name())),
            _ => Err(RuntimeErrorKind::type_error("float", v.type_name())),
        }
    }
}

/// Value of a variable declared without an initializer.
fn default_value(ty: &Type) -> Value {
    match ty {
        Type::Int => Value::Int(0),
        Type::Float => Value::Float(0.0),
        Type::Bool => Value::Bool(false),
        Type::Char => Value::Char('\0'),
        _ => Value::Null,
    }
}

/// Widen an int stored where a float is declared.
fn coerce(value: Value, ty: &Type) -> Value {
    match (value, ty) {
        (Value::Int(n), Type::Float) => Value::Float(n as f64),
        (value, _) => value,
    }
}

fn set_slot(space: &mut Vec<Value>, slot: u32, value: Value) {
    let slot = slot as usize;
    if slot >= space.len() {
        space.resize(slot + 1, Value::Null);
    }
    space[slot] = value;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompilerContext;
    use crate::lang::ast::Decl;
    use crate::lang::build::AstBuilder;
    use crate::resolve::resolve;
    use pretty_assertions::assert_eq;

    fn interpret(decls: Vec<Decl>, config: VmConfig) -> (Exec<Option<Value>>, String) {
        let unit = CompileUnit::new(decls);
        let res = resolve(&unit, &mut CompilerContext::new());
        assert!(res.is_ok(), "{}", res.diagnostics);
        let mut interp = Interpreter::with_config(&unit, &res, config);
        let result = interp.run();
        (result, interp.output().to_string())
    }

    #[test]
    fn test_loop_with_break_and_continue() {
        // int i = 0; int sum = 0;
        // while (true) { i = i + 1; if (i > 10) break; if (i % 2 == 0) continue; sum = sum + i; }
        // return sum;
        let b = AstBuilder::new();
        let body = b.block(vec![
            b.set("i", b.binary(BinOp::Add, b.ident("i"), b.int(1))),
            b.if_(b.binary(BinOp::Gt, b.ident("i"), b.int(10)), b.break_(), None),
            b.if_(
                b.binary(
                    BinOp::Eq,
                    b.binary(BinOp::Rem, b.ident("i"), b.int(2)),
                    b.int(0),
                ),
                b.continue_(),
                None,
            ),
            b.set("sum", b.binary(BinOp::Add, b.ident("sum"), b.ident("i"))),
        ]);
        let main = b.func(
            "int",
            "main",
            vec![],
            vec![
                b.var("int", "i", Some(b.int(0))),
                b.var("int", "sum", Some(b.int(0))),
                b.while_(b.bool(true), body),
                b.ret(Some(b.ident("sum"))),
            ],
        );
        let (result, _) = interpret(vec![main], VmConfig::default());
        assert_eq!(result, Ok(Some(Value::Int(25))));
    }

    #[test]
    fn test_globals_structs_and_print() {
        let b = AstBuilder::new();
        let decls = vec![
            b.struct_("Point", &[("int", "x"), ("float", "y")]),
            b.global("int", "g", Some(b.int(7))),
            b.func(
                "void",
                "main",
                vec![],
                vec![
                    b.var("Point", "p", Some(b.new_struct("Point"))),
                    b.assign(b.field(b.ident("p"), "y"), b.ident("g")),
                    b.print(b.field(b.ident("p"), "y")),
                    b.print(b.field(b.ident("p"), "x")),
                    b.var("float", "f", None),
                    b.print(b.ident("f")),
                ],
            ),
        ];
        let (result, output) = interpret(decls, VmConfig::default());
        assert_eq!(result, Ok(None));
        assert_eq!(output, "7\nnull\n0\n");
    }

    #[test]
    fn test_recursion_depth_limit() {
        let b = AstBuilder::new();
        let decls = vec![b.func(
            "void",
            "main",
            vec![],
            vec![b.expr_stmt(b.call("main", vec![]))],
        )];
        let config = VmConfig::builder().max_call_depth(16).build();
        let (result, _) = interpret(decls, config);
        let err = result.unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::StackOverflow(_)));
        assert_eq!(err.call_depth, 16);
    }

    /// int count(int n) { if (n <= 0) return 0; return 1 + count(n - 1); }
    /// int main() { return count(depth); }
    fn counting_recursion(depth: i64) -> Vec<Decl> {
        let b = AstBuilder::new();
        vec![
            b.func(
                "int",
                "count",
                vec![b.param("int", "n")],
                vec![
                    b.if_(
                        b.binary(BinOp::Le, b.ident("n"), b.int(0)),
                        b.ret(Some(b.int(0))),
                        None,
                    ),
                    b.ret(Some(b.binary(
                        BinOp::Add,
                        b.int(1),
                        b.call("count", vec![b.binary(BinOp::Sub, b.ident("n"), b.int(1))]),
                    ))),
                ],
            ),
            b.func("int", "main", vec![], vec![b.ret(Some(b.call("count", vec![b.int(depth)])))]),
        ]
    }

    #[test]
    fn test_deep_recursion_within_limit() {
        let config = VmConfig::default();
        let depth = config.max_call_depth as i64 - 10;
        let (result, _) = interpret(counting_recursion(depth), config);
        assert_eq!(result, Ok(Some(Value::Int(depth))));
    }

    #[test]
    fn test_recursion_past_limit_overflows() {
        let (result, _) = interpret(counting_recursion(5_000), VmConfig::default());
        let err = result.unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::StackOverflow(_)));
        assert_eq!(err.call_depth, 1000);
    }

    #[test]
    fn test_call_depth_capped_by_native_stack() {
        let config = VmConfig::builder().max_call_depth(usize::MAX).build();
        let depth = MAX_INTERP_CALL_DEPTH as i64 + 10;
        let (result, _) = interpret(counting_recursion(depth), config);
        let err = result.unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::StackOverflow(_)));
        assert_eq!(err.call_depth, MAX_INTERP_CALL_DEPTH);
    }

    #[test]
    fn test_runtime_faults_carry_spans() {
        let b = AstBuilder::new();
        let decls = vec![b.func(
            "int",
            "main",
            vec![],
            vec![
                b.var("int", "z", Some(b.int(0))),
                b.at(5, 9).ret(Some(b.binary(BinOp::Div, b.int(1), b.ident("z")))),
            ],
        )];
        let (result, _) = interpret(decls, VmConfig::default());
        let err = result.unwrap_err();
        assert_eq!(err.kind, RuntimeErrorKind::DivisionByZero);
        assert_eq!(err.span, Some(Span::new(5, 9)));
        assert_eq!(err.call_stack, vec!["main".to_string()]);
    }

    #[test]
    fn test_step_limit() {
        let b = AstBuilder::new();
        let decls = vec![b.func(
            "void",
            "main",
            vec![],
            vec![b.while_(b.bool(true), b.block(vec![]))],
        )];
        let config = VmConfig::builder().max_steps(100).build();
        let (result, _) = interpret(decls, config);
        assert_eq!(result.unwrap_err().kind, RuntimeErrorKind::StepLimitExceeded(100));
    }

    #[test]
    fn test_refuses_programs_with_errors() {
        let b = AstBuilder::new();
        let unit = CompileUnit::new(vec![b.func("void", "main", vec![], vec![b.print(b.ident("nope"))])]);
        let res = resolve(&unit, &mut CompilerContext::new());
        let err = Interpreter::new(&unit, &res).run().unwrap_err();
        assert!(matches!(err.kind, RuntimeErrorKind::NotReady(_)));
    }
}
