use super::Resolution;
use crate::compile_error::CompileError;
use crate::lang::ast::*;
use crate::lang::span::Span;
use crate::symtab::{Builtin, SymbolId, SymbolKind, Type};

/// Resolve every use from its stashed scope and type-check expressions.
pub(super) fn run(unit: &CompileUnit, res: &mut Resolution) {
    let mut pass = BindPass { res, ret: None };

    for decl in &unit.decls {
        match decl {
            Decl::Var(v) => pass.bind_var(v),
            Decl::Func(f) => {
                let Some(id) = pass.res.declared(f.id) else {
                    continue;
                };
                pass.ret = Some(pass.res.table.symbol(id).ty.clone());
                for stmt in &f.body.stmts {
                    pass.bind_stmt(stmt);
                }
                pass.ret = None;
            }
            Decl::Struct(_) => {}
        }
    }
}

struct BindPass<'a> {
    res: &'a mut Resolution,
    /// Return type of the function being checked.
    ret: Option<Type>,
}

impl BindPass<'_> {
    fn error(&mut self, error: CompileError) {
        self.res.diagnostics.push(error);
    }

    fn mismatch(&mut self, expected: &Type, found: &Type, span: Span) {
        let expected = self.res.table.type_name(expected);
        let found = self.res.table.type_name(found);
        self.error(CompileError::type_mismatch(expected, found, span));
    }

    /// Report unless a value of type `found` fits where `expected` is wanted.
    fn expect(&mut self, expected: &Type, found: &Type, span: Span) {
        if !expected.accepts(found) {
            self.mismatch(expected, found, span);
        }
    }

    fn lookup(&self, node: NodeId, name: &str) -> Option<SymbolId> {
        let ns = self.res.scopes.get(&node)?;
        self.res.table.resolve_visible(ns.scope, ns.visible, name)
    }

    // ─── Statements ──────────────────────────────────────────────────────

    fn bind_var(&mut self, decl: &VarDecl) {
        let init_ty = decl.init.as_ref().map(|init| (self.expr_type(init), init.span));
        let Some(id) = self.res.declared(decl.id) else {
            return;
        };
        if let Some((found, span)) = init_ty {
            let declared = self.res.table.symbol(id).ty.clone();
            self.expect(&declared, &found, span);
        }
    }

    fn bind_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Var(v) => self.bind_var(v),
            StmtKind::Assign { target, value } => {
                let target_ty = self.expr_type(target);
                let value_ty = self.expr_type(value);
                if !target.is_lvalue() {
                    self.error(CompileError::not_assignable(target.span));
                } else {
                    self.expect(&target_ty, &value_ty, value.span);
                }
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.condition(cond);
                self.bind_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.bind_stmt(else_branch);
                }
            }
            StmtKind::While { cond, body } => {
                self.condition(cond);
                self.bind_stmt(body);
            }
            StmtKind::Break | StmtKind::Continue => {}
            StmtKind::Return(value) => {
                let ret = self.ret.clone().unwrap_or(Type::Undefined);
                match value {
                    Some(value) => {
                        let found = self.expr_type(value);
                        if ret == Type::Void {
                            self.mismatch(&Type::Void, &found, value.span);
                        } else {
                            self.expect(&ret, &found, value.span);
                        }
                    }
                    None => {
                        if ret != Type::Void && !ret.is_undefined() {
                            self.mismatch(&ret, &Type::Void, stmt.span);
                        }
                    }
                }
            }
            StmtKind::Expr(e) => {
                self.expr_type(e);
            }
            StmtKind::Block(block) => {
                for s in &block.stmts {
                    self.bind_stmt(s);
                }
            }
        }
    }

    fn condition(&mut self, cond: &Expr) {
        let ty = self.expr_type(cond);
        if ty != Type::Bool && !ty.is_undefined() {
            self.mismatch(&Type::Bool, &ty, cond.span);
        }
    }

    // ─── Expressions ─────────────────────────────────────────────────────

    /// Compute, record and return the static type of `expr`.
    fn expr_type(&mut self, expr: &Expr) -> Type {
        let ty = self.compute_type(expr);
        self.res.types.insert(expr.id, ty.clone());
        ty
    }

    fn compute_type(&mut self, expr: &Expr) -> Type {
        match &expr.kind {
            ExprKind::Int(_) => Type::Int,
            ExprKind::Float(_) => Type::Float,
            ExprKind::Bool(_) => Type::Bool,
            ExprKind::Char(_) => Type::Char,
            ExprKind::Str(_) => Type::String,
            ExprKind::Null => Type::Null,
            ExprKind::Ident(name) => self.ident(expr, name),
            ExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs),
            ExprKind::Unary { op, operand } => {
                let ty = self.expr_type(operand);
                match op {
                    UnaryOp::Neg if ty.is_numeric() => ty,
                    UnaryOp::Neg => {
                        self.error(CompileError::type_mismatch("int or float", self.res.table.type_name(&ty), operand.span));
                        Type::Undefined
                    }
                    UnaryOp::Not => {
                        self.expect(&Type::Bool, &ty, operand.span);
                        Type::Bool
                    }
                }
            }
            ExprKind::Call { callee, args } => self.call(expr, callee, args),
            ExprKind::Field { object, field } => {
                let object_ty = self.expr_type(object);
                match object_ty {
                    Type::Struct(strukt) => match self.res.table.resolve_member(strukt, field) {
                        Some(fid) => {
                            self.res.bindings.insert(expr.id, fid);
                            self.res.table.symbol(fid).ty.clone()
                        }
                        None => {
                            let owner = self.res.table.symbol(strukt).name.clone();
                            self.error(
                                CompileError::unresolved_symbol(field, expr.span)
                                    .with_hint(format!("struct '{}' has no field '{}'", owner, field)),
                            );
                            Type::Undefined
                        }
                    },
                    Type::Undefined => Type::Undefined,
                    other => {
                        self.error(CompileError::type_mismatch("struct", self.res.table.type_name(&other), object.span));
                        Type::Undefined
                    }
                }
            }
            ExprKind::Index { array, index } => {
                let array_ty = self.expr_type(array);
                let index_ty = self.expr_type(index);
                self.expect(&Type::Int, &index_ty, index.span);
                match array_ty {
                    Type::Array(elem) => *elem,
                    Type::Undefined => Type::Undefined,
                    other => {
                        self.error(CompileError::type_mismatch("array", self.res.table.type_name(&other), array.span));
                        Type::Undefined
                    }
                }
            }
            ExprKind::NewStruct(name) => match self.lookup(expr.id, name) {
                Some(id) if matches!(self.res.table.symbol(id).kind, SymbolKind::Struct(_)) => {
                    self.res.bindings.insert(expr.id, id);
                    Type::Struct(id)
                }
                Some(id) => {
                    let kind = self.res.table.symbol(id).kind_name();
                    self.error(CompileError::type_mismatch("struct", kind, expr.span));
                    Type::Undefined
                }
                None => {
                    self.error(CompileError::unresolved_symbol(name, expr.span));
                    Type::Undefined
                }
            },
            ExprKind::NewArray { elem, len } => {
                let len_ty = self.expr_type(len);
                self.expect(&Type::Int, &len_ty, len.span);
                let scope = self.res.scope_of(expr.id);
                let elem_ty = scope.and_then(|s| self.res.table.resolve_type(s, elem));
                match elem_ty {
                    Some(t) => Type::Array(Box::new(t)),
                    None => {
                        self.error(CompileError::unresolved_symbol(&elem.to_string(), expr.span));
                        Type::Undefined
                    }
                }
            }
        }
    }

    fn ident(&mut self, expr: &Expr, name: &str) -> Type {
        let Some(id) = self.lookup(expr.id, name) else {
            self.error(CompileError::unresolved_symbol(name, expr.span));
            return Type::Undefined;
        };
        let sym = self.res.table.symbol(id);
        if sym.is_storage() {
            let ty = sym.ty.clone();
            self.res.bindings.insert(expr.id, id);
            ty
        } else {
            let kind = sym.kind_name();
            self.error(
                CompileError::type_mismatch("variable", kind, expr.span)
                    .with_hint(format!("'{}' is a {}, not a value", name, kind)),
            );
            Type::Undefined
        }
    }

    fn binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Type {
        let lt = self.expr_type(lhs);
        let rt = self.expr_type(rhs);

        if op.is_logical() {
            self.expect(&Type::Bool, &lt, lhs.span);
            self.expect(&Type::Bool, &rt, rhs.span);
            return Type::Bool;
        }

        if op.is_equality() {
            if !lt.comparable(&rt) {
                self.mismatch(&lt, &rt, rhs.span);
            }
            return Type::Bool;
        }

        let mut numeric = true;
        for (ty, span) in [(&lt, lhs.span), (&rt, rhs.span)] {
            if !ty.is_numeric() {
                numeric = false;
                self.error(CompileError::type_mismatch("int or float", self.res.table.type_name(ty), span));
            }
        }
        if op == BinOp::Rem && (lt == Type::Float || rt == Type::Float) {
            self.error(CompileError::type_mismatch("int", "float", rhs.span));
        }

        if op.is_ordering() {
            Type::Bool
        } else if numeric {
            lt.widen(&rt)
        } else {
            Type::Undefined
        }
    }

    fn call(&mut self, expr: &Expr, callee: &str, args: &[Expr]) -> Type {
        let arg_types: Vec<Type> = args.iter().map(|a| self.expr_type(a)).collect();

        let Some(id) = self.lookup(expr.id, callee) else {
            self.error(CompileError::unresolved_symbol(callee, expr.span));
            return Type::Undefined;
        };
        let sym = self.res.table.symbol(id);
        let Some(method) = sym.method() else {
            let kind = sym.kind_name();
            self.error(CompileError::type_mismatch("function", kind, expr.span));
            return Type::Undefined;
        };

        let ret = sym.ty.clone();
        let builtin = method.builtin;
        let params: Vec<Type> = method
            .params
            .iter()
            .map(|p| self.res.table.symbol(*p).ty.clone())
            .collect();
        self.res.bindings.insert(expr.id, id);

        if params.len() != args.len() {
            self.error(
                CompileError::type_mismatch(
                    format!("{} argument(s)", params.len()),
                    args.len().to_string(),
                    expr.span,
                )
                .with_hint(format!("in call to '{}'", callee)),
            );
            return ret;
        }

        for ((arg, found), expected) in args.iter().zip(&arg_types).zip(&params) {
            if builtin == Some(Builtin::Print) {
                if *found == Type::Void {
                    self.error(CompileError::type_mismatch("value", "void", arg.span));
                }
            } else {
                self.expect(expected, found, arg.span);
            }
        }
        ret
    }
}
