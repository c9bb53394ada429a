use std::collections::HashMap;

use super::{ENTRY, Expr, Func, GlobalVar, Item, LabelId, Prog, Stmt, StructLayout, UnaryOp};
use crate::context::CompilerContext;
use crate::lang::ast::{self, BinOp, CompileUnit, ExprKind, FuncDecl, StmtKind};
use crate::resolve::Resolution;
use crate::symtab::{SymbolId, Type};

/// Lower a resolved compile unit to IR.
///
/// Works best-effort on units with resolution errors: unresolved names lower
/// to `null` so every function still gets a body. Such a program is never
/// assembled.
pub fn build(unit: &CompileUnit, res: &Resolution, ctx: &mut CompilerContext) -> Prog {
    let mut prog = Prog {
        globals: ctx.global_count(),
        ..Prog::default()
    };

    let mut structs = HashMap::new();
    for decl in unit.structs() {
        let Some(id) = res.declared(decl.id) else {
            continue;
        };
        let Some(info) = res.table.symbol(id).struct_info() else {
            continue;
        };
        structs.insert(id, prog.structs.len() as u32);
        prog.structs.push(StructLayout {
            name: decl.name.clone(),
            fields: info.fields.keys().cloned().collect(),
        });
    }

    let mut builder = IrBuilder {
        res,
        ctx,
        structs,
        body: Vec::new(),
        temps: 0,
        loops: Vec::new(),
        ret: Type::Void,
    };

    prog.items.push(Item::Func(builder.lower_entry(unit)));

    for decl in &unit.decls {
        match decl {
            ast::Decl::Var(v) => {
                if let Some(id) = res.declared(v.id) {
                    let sym = res.table.symbol(id);
                    prog.items.push(Item::Global(GlobalVar {
                        name: sym.name.clone(),
                        slot: sym.slot.unwrap_or(0),
                        symbol: id,
                    }));
                }
            }
            ast::Decl::Func(f) => {
                if let Some(id) = res.declared(f.id) {
                    prog.items.push(Item::Func(builder.lower_func(f, id)));
                }
            }
            ast::Decl::Struct(_) => {}
        }
    }

    tracing::debug!(
        functions = prog.functions().count(),
        structs = prog.structs.len(),
        "IR built"
    );
    prog
}

struct Loop {
    test: LabelId,
    end: LabelId,
}

struct IrBuilder<'a> {
    res: &'a Resolution,
    ctx: &'a mut CompilerContext,
    /// Struct symbol to its index in `Prog::structs`.
    structs: HashMap<SymbolId, u32>,
    body: Vec<Stmt>,
    /// Next free operand slot.
    temps: u32,
    loops: Vec<Loop>,
    /// Return type of the function being lowered.
    ret: Type,
}

impl IrBuilder<'_> {
    fn emit(&mut self, stmt: Stmt) {
        self.body.push(stmt);
    }

    fn begin(&mut self, ret: Type) {
        self.body.clear();
        self.temps = 0;
        self.loops.clear();
        self.ret = ret;
    }

    /// Put `value` in the next operand slot and return that slot.
    fn push_temp(&mut self, value: Expr) -> Expr {
        let slot = Expr::OperandSlot(self.temps);
        self.temps += 1;
        if value != slot {
            self.emit(Stmt::Assign {
                dst: slot.clone(),
                src: value,
            });
        }
        slot
    }

    fn release(&mut self, n: u32) {
        self.temps -= n;
    }

    /// Widen an int temporary in place when a float is expected.
    fn coerce(&mut self, temp: &Expr, from: &Type, to: &Type) {
        if *from == Type::Int && *to == Type::Float {
            self.emit(Stmt::Assign {
                dst: temp.clone(),
                src: Expr::unary(UnaryOp::IntToFloat, false, temp.clone()),
            });
        }
    }

    fn storage(&self, id: SymbolId) -> Expr {
        let sym = self.res.table.symbol(id);
        let slot = sym.slot.unwrap_or(0);
        if sym.is_global() {
            Expr::Var(slot)
        } else {
            Expr::FrameSlot(slot)
        }
    }

    fn default_value(ty: &Type) -> Expr {
        match ty {
            Type::Int => Expr::IntVal(0),
            Type::Float => Expr::FloatVal(0.0),
            Type::Bool => Expr::BoolVal(false),
            Type::Char => Expr::CharVal('\0'),
            _ => Expr::NullVal,
        }
    }

    // ─── Functions ───────────────────────────────────────────────────────

    /// `<start>`: initialize globals in declaration order, then call `main`.
    fn lower_entry(&mut self, unit: &CompileUnit) -> Func {
        let main = self.res.main();
        let main_ty = main
            .map(|m| self.res.table.symbol(m).ty.clone())
            .unwrap_or(Type::Void);
        let returns = main_ty != Type::Void;
        self.begin(main_ty);

        for v in unit.globals() {
            let Some(id) = self.res.declared(v.id) else {
                continue;
            };
            let ty = self.res.table.symbol(id).ty.clone();
            let value = match &v.init {
                Some(init) => {
                    let t = self.lower_value(init);
                    self.coerce(&t, &self.res.type_of(init.id), &ty);
                    t
                }
                None => self.push_temp(Self::default_value(&ty)),
            };
            let dst = self.storage(id);
            self.emit(Stmt::Assign { dst, src: value });
            self.release(1);
        }

        match main {
            Some(main) => {
                let nargs = self
                    .res
                    .table
                    .symbol(main)
                    .method()
                    .map_or(0, |m| m.arg_count() as u32);
                for _ in 0..nargs {
                    self.push_temp(Expr::NullVal);
                }
                self.release(nargs);
                let call = Expr::CallFunc {
                    name: "main".to_string(),
                    arg_count: nargs,
                    symbol: Some(main),
                    builtin: None,
                    returns,
                };
                if returns {
                    let t = self.push_temp(call);
                    self.release(1);
                    self.emit(Stmt::ReturnVal(Some(t)));
                } else {
                    self.emit(Stmt::ExprStmt(call));
                    self.emit(Stmt::ReturnVal(None));
                }
            }
            None => self.emit(Stmt::ReturnVal(None)),
        }

        Func {
            name: ENTRY.to_string(),
            symbol: None,
            nargs: 0,
            nlocals: 0,
            returns,
            body: std::mem::take(&mut self.body),
        }
    }

    fn lower_func(&mut self, decl: &FuncDecl, id: SymbolId) -> Func {
        let sym = self.res.table.symbol(id);
        let (nargs, nlocals) = sym
            .method()
            .map_or((0, 0), |m| (m.arg_count() as u32, m.nlocals));
        let ret = sym.ty.clone();
        let returns = ret != Type::Void;
        self.begin(ret);

        for stmt in &decl.body.stmts {
            self.lower_stmt(stmt);
        }
        if !matches!(self.body.last(), Some(Stmt::ReturnVal(_))) {
            self.emit(Stmt::ReturnVal(None));
        }

        Func {
            name: decl.name.clone(),
            symbol: Some(id),
            nargs,
            nlocals,
            returns,
            body: std::mem::take(&mut self.body),
        }
    }

    // ─── Statements ──────────────────────────────────────────────────────

    fn lower_stmt(&mut self, stmt: &ast::Stmt) {
        match &stmt.kind {
            StmtKind::Var(v) => {
                let Some(id) = self.res.declared(v.id) else {
                    return;
                };
                let ty = self.res.table.symbol(id).ty.clone();
                let value = match &v.init {
                    Some(init) => {
                        let t = self.lower_value(init);
                        self.coerce(&t, &self.res.type_of(init.id), &ty);
                        t
                    }
                    None => self.push_temp(Self::default_value(&ty)),
                };
                let dst = self.storage(id);
                self.emit(Stmt::Assign { dst, src: value });
                self.release(1);
            }
            StmtKind::Assign { target, value } => self.lower_assign(target, value),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let c = self.lower_value(cond);
                self.release(1);
                let end = self.ctx.new_label();
                match else_branch {
                    Some(else_branch) => {
                        let otherwise = self.ctx.new_label();
                        self.emit(Stmt::CJmp {
                            cond: c,
                            target: otherwise,
                        });
                        self.lower_stmt(then_branch);
                        self.emit(Stmt::Jmp(end));
                        self.emit(Stmt::Label(otherwise));
                        self.lower_stmt(else_branch);
                    }
                    None => {
                        self.emit(Stmt::CJmp { cond: c, target: end });
                        self.lower_stmt(then_branch);
                    }
                }
                self.emit(Stmt::Label(end));
            }
            StmtKind::While { cond, body } => {
                let test = self.ctx.new_label();
                let end = self.ctx.new_label();
                self.emit(Stmt::Label(test));
                let c = self.lower_value(cond);
                self.release(1);
                self.emit(Stmt::CJmp { cond: c, target: end });
                self.loops.push(Loop { test, end });
                self.lower_stmt(body);
                self.loops.pop();
                self.emit(Stmt::Jmp(test));
                self.emit(Stmt::Label(end));
            }
            StmtKind::Break => {
                if let Some(l) = self.loops.last() {
                    let end = l.end;
                    self.emit(Stmt::Jmp(end));
                }
            }
            StmtKind::Continue => {
                if let Some(l) = self.loops.last() {
                    let test = l.test;
                    self.emit(Stmt::Jmp(test));
                }
            }
            StmtKind::Return(value) => {
                let value = value.as_ref().map(|e| {
                    let t = self.lower_value(e);
                    let ret = self.ret.clone();
                    self.coerce(&t, &self.res.type_of(e.id), &ret);
                    self.release(1);
                    t
                });
                self.emit(Stmt::ReturnVal(value));
            }
            StmtKind::Expr(e) => {
                if let Some(t) = self.lower_expr(e) {
                    self.release(1);
                    self.emit(Stmt::ExprStmt(t));
                }
            }
            StmtKind::Block(block) => {
                for s in &block.stmts {
                    self.lower_stmt(s);
                }
            }
        }
    }

    fn lower_assign(&mut self, target: &ast::Expr, value: &ast::Expr) {
        let target_ty = self.res.type_of(target.id);
        let value_ty = self.res.type_of(value.id);

        match &target.kind {
            ExprKind::Ident(_) => {
                let Some(id) = self.res.binding(target.id) else {
                    return;
                };
                let v = self.lower_value(value);
                self.coerce(&v, &value_ty, &target_ty);
                let dst = self.storage(id);
                self.emit(Stmt::Assign { dst, src: v });
                self.release(1);
            }
            ExprKind::Field { object, field } => {
                let o = self.lower_value(object);
                let v = self.lower_value(value);
                self.coerce(&v, &value_ty, &target_ty);
                let dst = Expr::ClassAccessExpr {
                    object: Box::new(o),
                    field: self.field_index(target.id),
                    name: field.clone(),
                };
                self.emit(Stmt::Assign { dst, src: v });
                self.release(2);
            }
            ExprKind::Index { array, index } => {
                let a = self.lower_value(array);
                let i = self.lower_value(index);
                let v = self.lower_value(value);
                self.coerce(&v, &value_ty, &target_ty);
                let dst = Expr::ArrayAccessExpr {
                    array: Box::new(a),
                    index: Box::new(i),
                };
                self.emit(Stmt::Assign { dst, src: v });
                self.release(3);
            }
            _ => {}
        }
    }

    // ─── Expressions ─────────────────────────────────────────────────────

    fn field_index(&self, node: ast::NodeId) -> u32 {
        self.res
            .binding(node)
            .and_then(|f| self.res.table.symbol(f).field_index())
            .unwrap_or(0)
    }

    /// Lower `expr` into a fresh operand slot.
    fn lower_value(&mut self, expr: &ast::Expr) -> Expr {
        match self.lower_expr(expr) {
            Some(t) => t,
            None => self.push_temp(Expr::NullVal),
        }
    }

    /// Lower `expr`, returning the operand slot holding its value, or `None`
    /// for a call that returns nothing.
    fn lower_expr(&mut self, expr: &ast::Expr) -> Option<Expr> {
        let value = match &expr.kind {
            ExprKind::Int(n) => Expr::IntVal(*n),
            ExprKind::Float(n) => Expr::FloatVal(*n),
            ExprKind::Bool(b) => Expr::BoolVal(*b),
            ExprKind::Char(c) => Expr::CharVal(*c),
            ExprKind::Str(s) => Expr::StringVal(s.clone()),
            ExprKind::Null => Expr::NullVal,
            ExprKind::Ident(_) => match self.res.binding(expr.id) {
                Some(id) => self.storage(id),
                None => Expr::NullVal,
            },
            ExprKind::Binary { op, lhs, rhs } if op.is_logical() => {
                return Some(self.short_circuit(*op, lhs, rhs));
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lt = self.res.type_of(lhs.id);
                let rt = self.res.type_of(rhs.id);
                let float = lt == Type::Float || rt == Type::Float;
                let l = self.lower_value(lhs);
                if float {
                    self.coerce(&l, &lt, &Type::Float);
                }
                let r = self.lower_value(rhs);
                if float {
                    self.coerce(&r, &rt, &Type::Float);
                }
                self.release(2);
                Expr::bin(*op, float, l, r)
            }
            ExprKind::Unary { op, operand } => {
                let float = self.res.type_of(operand.id) == Type::Float;
                let v = self.lower_value(operand);
                self.release(1);
                let op = match op {
                    ast::UnaryOp::Neg => UnaryOp::Neg,
                    ast::UnaryOp::Not => UnaryOp::Not,
                };
                Expr::unary(op, float, v)
            }
            ExprKind::Call { callee, args } => return self.lower_call(expr, callee, args),
            ExprKind::Field { object, field } => {
                let o = self.lower_value(object);
                self.release(1);
                Expr::ClassAccessExpr {
                    object: Box::new(o),
                    field: self.field_index(expr.id),
                    name: field.clone(),
                }
            }
            ExprKind::Index { array, index } => {
                let a = self.lower_value(array);
                let i = self.lower_value(index);
                self.release(2);
                Expr::ArrayAccessExpr {
                    array: Box::new(a),
                    index: Box::new(i),
                }
            }
            ExprKind::NewStruct(name) => {
                let ty = self
                    .res
                    .binding(expr.id)
                    .and_then(|id| self.structs.get(&id).copied())
                    .unwrap_or(0);
                Expr::NewStruct {
                    ty,
                    name: name.clone(),
                }
            }
            ExprKind::NewArray { len, .. } => {
                let n = self.lower_value(len);
                self.release(1);
                Expr::NewArray { len: Box::new(n) }
            }
        };
        Some(self.push_temp(value))
    }

    fn lower_call(&mut self, expr: &ast::Expr, callee: &str, args: &[ast::Expr]) -> Option<Expr> {
        let symbol = self.res.binding(expr.id);
        let method = symbol.and_then(|id| {
            let sym = self.res.table.symbol(id);
            sym.method().map(|m| (sym.ty.clone(), m.builtin, m.params.clone()))
        });
        let (ret, builtin, params) = method.unwrap_or((Type::Void, None, Vec::new()));

        for (i, arg) in args.iter().enumerate() {
            let t = self.lower_value(arg);
            if builtin.is_some() {
                continue;
            }
            if let Some(p) = params.get(i) {
                let expected = self.res.table.symbol(*p).ty.clone();
                self.coerce(&t, &self.res.type_of(arg.id), &expected);
            }
        }
        let arg_count = args.len() as u32;
        self.release(arg_count);

        let returns = ret != Type::Void && ret != Type::Undefined;
        let call = Expr::CallFunc {
            name: callee.to_string(),
            arg_count,
            symbol,
            builtin,
            returns,
        };
        if returns {
            Some(self.push_temp(call))
        } else {
            self.emit(Stmt::ExprStmt(call));
            None
        }
    }

    /// `a && b` and `a || b`, evaluating `b` only when needed. Both paths
    /// leave the result in the same operand slot.
    fn short_circuit(&mut self, op: BinOp, lhs: &ast::Expr, rhs: &ast::Expr) -> Expr {
        let end = self.ctx.new_label();
        let skip = self.ctx.new_label();

        let l = self.lower_value(lhs);
        self.release(1);
        self.emit(Stmt::CJmp { cond: l, target: skip });

        if op == BinOp::And {
            self.lower_value(rhs);
            self.release(1);
            self.emit(Stmt::Jmp(end));
            self.emit(Stmt::Label(skip));
            let result = self.push_temp(Expr::BoolVal(false));
            self.emit(Stmt::Label(end));
            result
        } else {
            self.push_temp(Expr::BoolVal(true));
            self.release(1);
            self.emit(Stmt::Jmp(end));
            self.emit(Stmt::Label(skip));
            let result = self.lower_value(rhs);
            self.emit(Stmt::Label(end));
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::build::AstBuilder;
    use crate::resolve::resolve;
    use pretty_assertions::assert_eq;

    fn lower(unit: &CompileUnit) -> Prog {
        let mut ctx = CompilerContext::new();
        let res = resolve(unit, &mut ctx);
        assert!(res.is_ok(), "{}", res.diagnostics);
        build(unit, &res, &mut ctx)
    }

    fn func_text(prog: &Prog, name: &str) -> String {
        prog.function(name).expect(name).to_string()
    }

    #[test]
    fn test_lower_arithmetic_and_return() {
        let b = AstBuilder::new();
        let unit = CompileUnit::new(vec![b.func(
            "int",
            "main",
            vec![],
            vec![
                b.var("int", "x", Some(b.binary(BinOp::Add, b.int(1), b.int(2)))),
                b.ret(Some(b.ident("x"))),
            ],
        )]);

        let prog = lower(&unit);
        assert_eq!(
            func_text(&prog, "main"),
            "\
func main(args=0, locals=1) -> value
    t0 = 1
    t1 = 2
    t0 = t0 + t1
    $0 = t0
    t0 = $0
    ret t0
"
        );
    }

    #[test]
    fn test_lower_while_loop() {
        let b = AstBuilder::new();
        let unit = CompileUnit::new(vec![b.func(
            "void",
            "main",
            vec![],
            vec![
                b.var("int", "i", Some(b.int(0))),
                b.while_(
                    b.binary(BinOp::Lt, b.ident("i"), b.int(3)),
                    b.block(vec![b.set("i", b.binary(BinOp::Add, b.ident("i"), b.int(1)))]),
                ),
            ],
        )]);

        let prog = lower(&unit);
        assert_eq!(
            func_text(&prog, "main"),
            "\
func main(args=0, locals=1)
    t0 = 0
    $0 = t0
L0:
    t0 = $0
    t1 = 3
    t0 = t0 < t1
    cjmp t0, L1
    t0 = $0
    t1 = 1
    t0 = t0 + t1
    $0 = t0
    jmp L0
L1:
    ret
"
        );
    }

    #[test]
    fn test_lower_if_else() {
        let b = AstBuilder::new();
        let unit = CompileUnit::new(vec![b.func(
            "void",
            "main",
            vec![],
            vec![b.if_(
                b.bool(true),
                b.print(b.int(1)),
                Some(b.print(b.int(2))),
            )],
        )]);

        let prog = lower(&unit);
        assert_eq!(
            func_text(&prog, "main"),
            "\
func main(args=0, locals=0)
    t0 = true
    cjmp t0, L1
    t0 = 1
    call print/1
    jmp L0
L1:
    t0 = 2
    call print/1
L0:
    ret
"
        );
    }

    #[test]
    fn test_break_and_continue_target_loop_labels() {
        let b = AstBuilder::new();
        let unit = CompileUnit::new(vec![b.func(
            "void",
            "main",
            vec![],
            vec![b.while_(
                b.bool(true),
                b.block(vec![
                    b.if_(b.bool(false), b.continue_(), None),
                    b.break_(),
                ]),
            )],
        )]);

        let prog = lower(&unit);
        let body = &prog.function("main").unwrap().body;
        assert!(body.contains(&Stmt::Jmp(LabelId(0))));
        assert!(body.contains(&Stmt::Jmp(LabelId(1))));
    }

    #[test]
    fn test_short_circuit_and() {
        let b = AstBuilder::new();
        let unit = CompileUnit::new(vec![b.func(
            "bool",
            "main",
            vec![],
            vec![b.ret(Some(b.binary(BinOp::And, b.bool(true), b.bool(false))))],
        )]);

        let prog = lower(&unit);
        assert_eq!(
            func_text(&prog, "main"),
            "\
func main(args=0, locals=0) -> value
    t0 = true
    cjmp t0, L1
    t0 = false
    jmp L0
L1:
    t0 = false
L0:
    ret t0
"
        );
    }

    #[test]
    fn test_mixed_arithmetic_converts_int_operand() {
        let b = AstBuilder::new();
        let unit = CompileUnit::new(vec![b.func(
            "float",
            "main",
            vec![],
            vec![b.ret(Some(b.binary(BinOp::Mul, b.int(2), b.float(1.5))))],
        )]);

        let prog = lower(&unit);
        assert_eq!(
            func_text(&prog, "main"),
            "\
func main(args=0, locals=0) -> value
    t0 = 2
    t0 = itof t0
    t1 = 1.5
    t0 = t0 *. t1
    ret t0
"
        );
    }

    #[test]
    fn test_entry_initializes_globals_then_calls_main() {
        let b = AstBuilder::new();
        let unit = CompileUnit::new(vec![
            b.global("int", "g", Some(b.int(7))),
            b.global("float", "h", None),
            b.func("void", "main", vec![], vec![]),
        ]);

        let prog = lower(&unit);
        assert_eq!(prog.globals, 2);
        assert_eq!(
            func_text(&prog, ENTRY),
            "\
func <start>(args=0, locals=0)
    t0 = 7
    @0 = t0
    t0 = 0.0
    @1 = t0
    call main/0
    ret
"
        );
    }

    #[test]
    fn test_struct_field_store() {
        let b = AstBuilder::new();
        let unit = CompileUnit::new(vec![
            b.struct_("Point", &[("int", "x"), ("int", "y")]),
            b.func(
                "void",
                "main",
                vec![],
                vec![
                    b.var("Point", "p", Some(b.new_struct("Point"))),
                    b.assign(b.field(b.ident("p"), "y"), b.int(5)),
                ],
            ),
        ]);

        let prog = lower(&unit);
        assert_eq!(prog.structs[0].fields, vec!["x", "y"]);
        assert_eq!(
            func_text(&prog, "main"),
            "\
func main(args=0, locals=1)
    t0 = new Point
    $0 = t0
    t0 = $0
    t1 = 5
    t0.y = t1
    ret
"
        );
    }
}
