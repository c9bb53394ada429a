use std::cell::Cell;

use super::ast::*;
use super::span::Span;

/// Convenience constructor for AST nodes.
///
/// Hands out fresh node ids and stamps every node with the current source
/// position, which callers move with [`AstBuilder::at`]. Methods take `&self`
/// so construction calls nest naturally:
///
/// ```
/// use cymbol::lang::{AstBuilder, BinOp};
///
/// let b = AstBuilder::new();
/// let sum = b.binary(BinOp::Add, b.int(1), b.int(2));
/// assert_ne!(sum.id, b.int(3).id);
/// ```
#[derive(Debug)]
pub struct AstBuilder {
    next_id: Cell<u32>,
    span: Cell<Span>,
}

impl Default for AstBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AstBuilder {
    pub fn new() -> Self {
        AstBuilder {
            next_id: Cell::new(0),
            span: Cell::new(Span::new(1, 1)),
        }
    }

    /// Set the position stamped on nodes created from now on.
    pub fn at(&self, line: usize, col: usize) -> &Self {
        self.span.set(Span::new(line, col));
        self
    }

    /// Shorthand for `at(line, 1)`.
    pub fn line(&self, line: usize) -> &Self {
        self.at(line, 1)
    }

    fn fresh(&self) -> (NodeId, Span) {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        (NodeId(id), self.span.get())
    }

    fn expr(&self, kind: ExprKind) -> Expr {
        let (id, span) = self.fresh();
        Expr { id, span, kind }
    }

    fn stmt(&self, kind: StmtKind) -> Stmt {
        let (id, span) = self.fresh();
        Stmt { id, span, kind }
    }

    // ─── Types ───────────────────────────────────────────────────────────

    pub fn ty(&self, name: &str) -> TypeRef {
        TypeRef::named(name)
    }

    pub fn array_ty(&self, elem: &str) -> TypeRef {
        TypeRef::array_of(TypeRef::named(elem))
    }

    // ─── Expressions ─────────────────────────────────────────────────────

    pub fn int(&self, n: i64) -> Expr {
        self.expr(ExprKind::Int(n))
    }

    pub fn float(&self, n: f64) -> Expr {
        self.expr(ExprKind::Float(n))
    }

    pub fn bool(&self, b: bool) -> Expr {
        self.expr(ExprKind::Bool(b))
    }

    pub fn char(&self, c: char) -> Expr {
        self.expr(ExprKind::Char(c))
    }

    pub fn str(&self, s: &str) -> Expr {
        self.expr(ExprKind::Str(s.to_string()))
    }

    pub fn null(&self) -> Expr {
        self.expr(ExprKind::Null)
    }

    pub fn ident(&self, name: &str) -> Expr {
        self.expr(ExprKind::Ident(name.to_string()))
    }

    pub fn binary(&self, op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        self.expr(ExprKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    pub fn unary(&self, op: UnaryOp, operand: Expr) -> Expr {
        self.expr(ExprKind::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    pub fn call(&self, callee: &str, args: Vec<Expr>) -> Expr {
        self.expr(ExprKind::Call {
            callee: callee.to_string(),
            args,
        })
    }

    pub fn field(&self, object: Expr, field: &str) -> Expr {
        self.expr(ExprKind::Field {
            object: Box::new(object),
            field: field.to_string(),
        })
    }

    pub fn index(&self, array: Expr, index: Expr) -> Expr {
        self.expr(ExprKind::Index {
            array: Box::new(array),
            index: Box::new(index),
        })
    }

    pub fn new_struct(&self, name: &str) -> Expr {
        self.expr(ExprKind::NewStruct(name.to_string()))
    }

    pub fn new_array(&self, elem: TypeRef, len: Expr) -> Expr {
        self.expr(ExprKind::NewArray {
            elem,
            len: Box::new(len),
        })
    }

    // ─── Statements ──────────────────────────────────────────────────────

    pub fn var_decl(&self, ty: TypeRef, name: &str, init: Option<Expr>) -> VarDecl {
        let (id, span) = self.fresh();
        VarDecl {
            id,
            span,
            name: name.to_string(),
            ty,
            init,
        }
    }

    /// `ty name [= init];` as a statement.
    pub fn var(&self, ty: &str, name: &str, init: Option<Expr>) -> Stmt {
        let decl = self.var_decl(self.ty(ty), name, init);
        self.stmt(StmtKind::Var(decl))
    }

    pub fn var_typed(&self, ty: TypeRef, name: &str, init: Option<Expr>) -> Stmt {
        let decl = self.var_decl(ty, name, init);
        self.stmt(StmtKind::Var(decl))
    }

    pub fn assign(&self, target: Expr, value: Expr) -> Stmt {
        self.stmt(StmtKind::Assign { target, value })
    }

    /// `name = value;`
    pub fn set(&self, name: &str, value: Expr) -> Stmt {
        let target = self.ident(name);
        self.assign(target, value)
    }

    pub fn if_(&self, cond: Expr, then_branch: Stmt, else_branch: Option<Stmt>) -> Stmt {
        self.stmt(StmtKind::If {
            cond,
            then_branch: Box::new(then_branch),
            else_branch: else_branch.map(Box::new),
        })
    }

    pub fn while_(&self, cond: Expr, body: Stmt) -> Stmt {
        self.stmt(StmtKind::While {
            cond,
            body: Box::new(body),
        })
    }

    pub fn break_(&self) -> Stmt {
        self.stmt(StmtKind::Break)
    }

    pub fn continue_(&self) -> Stmt {
        self.stmt(StmtKind::Continue)
    }

    pub fn ret(&self, value: Option<Expr>) -> Stmt {
        self.stmt(StmtKind::Return(value))
    }

    pub fn expr_stmt(&self, expr: Expr) -> Stmt {
        self.stmt(StmtKind::Expr(expr))
    }

    /// `print(value);`
    pub fn print(&self, value: Expr) -> Stmt {
        let call = self.call("print", vec![value]);
        self.expr_stmt(call)
    }

    pub fn block(&self, stmts: Vec<Stmt>) -> Stmt {
        let body = self.body(stmts);
        self.stmt(StmtKind::Block(body))
    }

    pub fn body(&self, stmts: Vec<Stmt>) -> Block {
        let (id, span) = self.fresh();
        Block { id, span, stmts }
    }

    // ─── Declarations ────────────────────────────────────────────────────

    pub fn param(&self, ty: &str, name: &str) -> VarDecl {
        self.var_decl(self.ty(ty), name, None)
    }

    pub fn func(&self, ret: &str, name: &str, params: Vec<VarDecl>, body: Vec<Stmt>) -> Decl {
        let body = self.body(body);
        let (id, span) = self.fresh();
        Decl::Func(FuncDecl {
            id,
            span,
            name: name.to_string(),
            ret: self.ty(ret),
            params,
            body,
        })
    }

    pub fn global(&self, ty: &str, name: &str, init: Option<Expr>) -> Decl {
        Decl::Var(self.var_decl(self.ty(ty), name, init))
    }

    /// `struct name { ty field; ... }` from `(type, field)` pairs.
    pub fn struct_(&self, name: &str, fields: &[(&str, &str)]) -> Decl {
        let fields = fields
            .iter()
            .map(|(ty, field)| self.var_decl(self.ty(ty), field, None))
            .collect();
        let (id, span) = self.fresh();
        Decl::Struct(StructDecl {
            id,
            span,
            name: name.to_string(),
            fields,
        })
    }
}
