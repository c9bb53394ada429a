//! Scope resolution.
//!
//! Two passes over the AST. The define pass builds the scope tree, creates a
//! symbol for every declaration and stashes the scope each node was seen in.
//! The bind pass looks every use up from its stashed scope, records the
//! binding and the expression's type, and runs the light type checks.

mod bind;
mod define;

use std::collections::HashMap;

use crate::compile_error::Diagnostics;
use crate::context::CompilerContext;
use crate::lang::ast::{CompileUnit, NodeId};
use crate::symtab::{ScopeId, SymbolId, SymbolTable, Type};

/// Scope a node was seen in, and how many declarations of that scope
/// preceded it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeScope {
    pub scope: ScopeId,
    pub visible: usize,
}

/// Everything the later passes need from resolution.
///
/// The symbol table is read-only from here on.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub table: SymbolTable,
    pub diagnostics: Diagnostics,
    pub(crate) scopes: HashMap<NodeId, NodeScope>,
    pub(crate) decls: HashMap<NodeId, SymbolId>,
    pub(crate) bindings: HashMap<NodeId, SymbolId>,
    pub(crate) types: HashMap<NodeId, Type>,
}

impl Resolution {
    fn new() -> Self {
        Resolution {
            table: SymbolTable::new(),
            diagnostics: Diagnostics::new(),
            scopes: HashMap::new(),
            decls: HashMap::new(),
            bindings: HashMap::new(),
            types: HashMap::new(),
        }
    }

    /// Symbol a use (identifier, call, member access, `new`) refers to.
    pub fn binding(&self, node: NodeId) -> Option<SymbolId> {
        self.bindings.get(&node).copied()
    }

    /// Symbol created for a declaration node. Duplicates that were rejected
    /// have none.
    pub fn declared(&self, node: NodeId) -> Option<SymbolId> {
        self.decls.get(&node).copied()
    }

    pub fn scope_of(&self, node: NodeId) -> Option<ScopeId> {
        self.scopes.get(&node).map(|s| s.scope)
    }

    /// Static type of an expression node.
    pub fn type_of(&self, node: NodeId) -> Type {
        self.types.get(&node).cloned().unwrap_or(Type::Undefined)
    }

    pub fn main(&self) -> Option<SymbolId> {
        self.table.function("main")
    }

    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Run both resolution passes over `unit`.
pub fn resolve(unit: &CompileUnit, ctx: &mut CompilerContext) -> Resolution {
    let mut res = Resolution::new();
    define::run(unit, ctx, &mut res);
    bind::run(unit, &mut res);
    tracing::debug!(
        symbols = res.table.symbols().count(),
        errors = res.diagnostics.len(),
        "resolution finished"
    );
    res
}
