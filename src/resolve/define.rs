use super::{NodeScope, Resolution};
use crate::compile_error::CompileError;
use crate::context::CompilerContext;
use crate::lang::ast::*;
use crate::lang::span::Span;
use crate::symtab::{MethodInfo, ScopeId, ScopeKind, StructInfo, Symbol, SymbolId, SymbolKind, Type};

/// Build the scope tree and define every declared name.
pub(super) fn run(unit: &CompileUnit, ctx: &mut CompilerContext, res: &mut Resolution) {
    let global = res.table.global_scope();
    let mut pass = DefinePass {
        res,
        ctx,
        current: global,
        loop_depth: 0,
    };

    // struct names first, so any declaration may mention any struct type
    let structs: Vec<(&StructDecl, Option<SymbolId>)> = unit
        .structs()
        .map(|s| (s, pass.define_struct(s)))
        .collect();
    for (decl, id) in structs {
        if let Some(id) = id {
            pass.define_fields(decl, id);
        }
    }

    for decl in &unit.decls {
        match decl {
            Decl::Func(f) => pass.define_func(f),
            Decl::Var(v) => pass.define_global(v),
            Decl::Struct(_) => {}
        }
    }

    if pass.res.table.function("main").is_none() {
        pass.res.diagnostics.push(
            CompileError::unresolved_symbol("main", Span::default())
                .with_hint("every program needs an entry function 'main'"),
        );
    }
}

struct DefinePass<'a> {
    res: &'a mut Resolution,
    ctx: &'a mut CompilerContext,
    current: ScopeId,
    loop_depth: usize,
}

impl DefinePass<'_> {
    fn stash(&mut self, node: NodeId) {
        let visible = self.res.table.scope(self.current).len();
        self.res.scopes.insert(
            node,
            NodeScope {
                scope: self.current,
                visible,
            },
        );
    }

    /// Define `symbol` in the current scope. A name already defined there is
    /// reported and the new symbol dropped.
    fn declare(&mut self, symbol: Symbol, node: NodeId) -> Option<SymbolId> {
        let (name, span) = (symbol.name.clone(), symbol.span);
        match self.res.table.define(self.current, symbol) {
            Ok(id) => {
                self.res.decls.insert(node, id);
                Some(id)
            }
            Err(existing) => {
                let first = self.res.table.symbol(existing).span;
                self.res
                    .diagnostics
                    .push(CompileError::duplicate_symbol(&name, span, first));
                None
            }
        }
    }

    fn resolve_type(&mut self, ty: &TypeRef, span: Span) -> Type {
        match self.res.table.resolve_type(self.current, ty) {
            Some(t) => t,
            None => {
                self.res
                    .diagnostics
                    .push(CompileError::unresolved_symbol(base_type_name(ty), span));
                Type::Undefined
            }
        }
    }

    fn with_scope(&mut self, kind: ScopeKind, f: impl FnOnce(&mut Self)) {
        let saved = self.current;
        self.current = self.res.table.push_scope(kind, saved);
        f(self);
        self.current = saved;
    }

    // ─── Structs ─────────────────────────────────────────────────────────

    fn define_struct(&mut self, decl: &StructDecl) -> Option<SymbolId> {
        let info = StructInfo {
            scope: self.current,
            fields: Default::default(),
        };
        let symbol = Symbol::new(&decl.name, Type::Undefined, SymbolKind::Struct(info), decl.span);
        let id = self.declare(symbol, decl.id)?;
        let scope = self.res.table.push_scope(ScopeKind::Struct(id), self.current);

        let sym = self.res.table.symbol_mut(id);
        sym.ty = Type::Struct(id);
        if let SymbolKind::Struct(info) = &mut sym.kind {
            info.scope = scope;
        }
        Some(id)
    }

    fn define_fields(&mut self, decl: &StructDecl, id: SymbolId) {
        let Some(scope) = self.res.table.symbol(id).struct_info().map(|s| s.scope) else {
            return;
        };
        let saved = self.current;
        self.current = scope;

        for field in &decl.fields {
            let ty = self.resolve_type(&field.ty, field.span);
            let index = self.res.table.scope(scope).len() as u32;
            let symbol = Symbol::new(&field.name, ty, SymbolKind::Field { index }, field.span);
            let Some(fid) = self.declare(symbol, field.id) else {
                continue;
            };
            if let SymbolKind::Struct(info) = &mut self.res.table.symbol_mut(id).kind {
                info.fields.insert(field.name.clone(), fid);
            }
        }

        self.current = saved;
    }

    // ─── Globals and functions ───────────────────────────────────────────

    fn define_global(&mut self, decl: &VarDecl) {
        if let Some(init) = &decl.init {
            self.walk_expr(init);
        }
        let ty = self.resolve_type(&decl.ty, decl.span);
        let symbol = Symbol::new(&decl.name, ty, SymbolKind::Variable { global: true }, decl.span);
        if let Some(id) = self.declare(symbol, decl.id) {
            let slot = self.ctx.next_global_slot();
            self.res.table.symbol_mut(id).slot = Some(slot);
        }
    }

    fn define_func(&mut self, decl: &FuncDecl) {
        let ret = self.resolve_type(&decl.ret, decl.span);
        let info = MethodInfo {
            params: Vec::new(),
            scope: self.current,
            body: Some(decl.body.id),
            nlocals: 0,
            builtin: None,
        };
        let symbol = Symbol::new(&decl.name, ret, SymbolKind::Method(info), decl.span);
        // a rejected duplicate's body is never looked at again
        let Some(id) = self.declare(symbol, decl.id) else {
            return;
        };

        self.ctx.begin_function();
        self.loop_depth = 0;

        let mut params = Vec::new();
        let mut scope = self.current;
        self.with_scope(ScopeKind::Method(id), |pass| {
            scope = pass.current;
            for p in &decl.params {
                let ty = pass.resolve_type(&p.ty, p.span);
                let symbol = Symbol::new(&p.name, ty, SymbolKind::Parameter, p.span);
                if let Some(pid) = pass.declare(symbol, p.id) {
                    let slot = pass.ctx.next_slot();
                    pass.res.table.symbol_mut(pid).slot = Some(slot);
                    params.push(pid);
                }
            }
            pass.stash(decl.body.id);
            for stmt in &decl.body.stmts {
                pass.define_stmt(stmt);
            }
        });

        let nlocals = self.ctx.slots_used() - params.len() as u32;
        if let SymbolKind::Method(info) = &mut self.res.table.symbol_mut(id).kind {
            info.params = params;
            info.scope = scope;
            info.nlocals = nlocals;
        }
    }

    // ─── Statements ──────────────────────────────────────────────────────

    fn define_stmt(&mut self, stmt: &Stmt) {
        self.stash(stmt.id);

        match &stmt.kind {
            StmtKind::Var(v) => {
                if let Some(init) = &v.init {
                    self.walk_expr(init);
                }
                self.stash(v.id);
                let ty = self.resolve_type(&v.ty, v.span);
                let symbol = Symbol::new(&v.name, ty, SymbolKind::Variable { global: false }, v.span);
                if let Some(id) = self.declare(symbol, v.id) {
                    let slot = self.ctx.next_slot();
                    self.res.table.symbol_mut(id).slot = Some(slot);
                }
            }
            StmtKind::Assign { target, value } => {
                self.walk_expr(target);
                self.walk_expr(value);
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.walk_expr(cond);
                self.define_branch(then_branch);
                if let Some(else_branch) = else_branch {
                    self.define_branch(else_branch);
                }
            }
            StmtKind::While { cond, body } => {
                self.walk_expr(cond);
                self.loop_depth += 1;
                self.define_branch(body);
                self.loop_depth -= 1;
            }
            StmtKind::Break => {
                if self.loop_depth == 0 {
                    self.res
                        .diagnostics
                        .push(CompileError::break_outside_loop(stmt.span));
                }
            }
            StmtKind::Continue => {
                if self.loop_depth == 0 {
                    self.res
                        .diagnostics
                        .push(CompileError::continue_outside_loop(stmt.span));
                }
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.walk_expr(value);
                }
            }
            StmtKind::Expr(e) => self.walk_expr(e),
            StmtKind::Block(block) => {
                self.with_scope(ScopeKind::Local, |pass| {
                    pass.stash(block.id);
                    for s in &block.stmts {
                        pass.define_stmt(s);
                    }
                });
            }
        }
    }

    /// `if` and `while` bodies get their own scope even without braces.
    fn define_branch(&mut self, stmt: &Stmt) {
        if matches!(stmt.kind, StmtKind::Block(_)) {
            self.define_stmt(stmt);
        } else {
            self.with_scope(ScopeKind::Local, |pass| pass.define_stmt(stmt));
        }
    }

    fn walk_expr(&mut self, expr: &Expr) {
        self.stash(expr.id);

        match &expr.kind {
            ExprKind::Binary { lhs, rhs, .. } => {
                self.walk_expr(lhs);
                self.walk_expr(rhs);
            }
            ExprKind::Unary { operand, .. } => self.walk_expr(operand),
            ExprKind::Call { args, .. } => {
                for a in args {
                    self.walk_expr(a);
                }
            }
            ExprKind::Field { object, .. } => self.walk_expr(object),
            ExprKind::Index { array, index } => {
                self.walk_expr(array);
                self.walk_expr(index);
            }
            ExprKind::NewArray { len, .. } => self.walk_expr(len),
            ExprKind::Int(_)
            | ExprKind::Float(_)
            | ExprKind::Bool(_)
            | ExprKind::Char(_)
            | ExprKind::Str(_)
            | ExprKind::Null
            | ExprKind::Ident(_)
            | ExprKind::NewStruct(_) => {}
        }
    }
}

fn base_type_name(ty: &TypeRef) -> &str {
    match ty {
        TypeRef::Named(n) => n,
        TypeRef::Array(elem) => base_type_name(elem),
    }
}
