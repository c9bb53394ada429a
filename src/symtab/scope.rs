use indexmap::IndexMap;

use super::symbol::SymbolId;

/// Index of a scope in the [`SymbolTable`](super::SymbolTable) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    /// A block, `if` branch or loop body.
    Local,
    /// Parameters and top-level locals of the function.
    Method(SymbolId),
    /// Fields of the struct.
    Struct(SymbolId),
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    pub enclosing: Option<ScopeId>,
    /// How many of the enclosing scope's symbols were declared when this
    /// scope was opened. Block-scoped names declared later stay invisible.
    pub(super) parent_visible: usize,
    symbols: IndexMap<String, SymbolId>,
}

impl Scope {
    pub(super) fn new(kind: ScopeKind, enclosing: Option<ScopeId>, parent_visible: usize) -> Self {
        Scope {
            kind,
            enclosing,
            parent_visible,
            symbols: IndexMap::new(),
        }
    }

    pub fn lookup_local(&self, name: &str) -> Option<SymbolId> {
        self.symbols.get(name).copied()
    }

    /// Lookup restricted to the first `visible` declarations.
    pub(super) fn lookup_visible(&self, name: &str, visible: usize) -> Option<SymbolId> {
        match self.symbols.get_full(name) {
            Some((index, _, id)) if index < visible => Some(*id),
            _ => None,
        }
    }

    pub(super) fn insert(&mut self, name: &str, id: SymbolId) {
        self.symbols.insert(name.to_string(), id);
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Symbols in declaration order.
    pub fn symbols(&self) -> impl Iterator<Item = (&str, SymbolId)> {
        self.symbols.iter().map(|(n, id)| (n.as_str(), *id))
    }

    /// Declarations in block and function scopes are only visible after the
    /// point of declaration; global and struct members are visible anywhere.
    pub fn is_ordered(&self) -> bool {
        matches!(self.kind, ScopeKind::Local | ScopeKind::Method(_))
    }
}
