use indexmap::IndexMap;

use super::scope::ScopeId;
use super::types::Type;
use crate::lang::ast::NodeId;
use crate::lang::span::Span;

/// Index of a symbol in the [`SymbolTable`](super::SymbolTable) arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(pub u32);

/// Functions the backend provides without a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// `void print(any)`
    Print,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    /// Parameters in declaration order.
    pub params: Vec<SymbolId>,
    /// Scope holding the parameters and top-level body declarations.
    pub scope: ScopeId,
    pub body: Option<NodeId>,
    /// Slots used by locals, excluding parameters.
    pub nlocals: u32,
    pub builtin: Option<Builtin>,
}

impl MethodInfo {
    pub fn arg_count(&self) -> usize {
        self.params.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructInfo {
    pub scope: ScopeId,
    /// Field name to field symbol, in declaration order.
    pub fields: IndexMap<String, SymbolId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SymbolKind {
    Variable { global: bool },
    Parameter,
    /// Struct field at the given offset.
    Field { index: u32 },
    Method(MethodInfo),
    Struct(StructInfo),
    /// Primitive type name (`int`, `float`, ...).
    BuiltinType,
}

/// A named entity.
///
/// The owning scope is recorded for diagnostics only; resolution never walks
/// from a symbol back to its scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub ty: Type,
    pub scope: ScopeId,
    /// Frame slot for locals and parameters, global slot for globals.
    pub slot: Option<u32>,
    pub kind: SymbolKind,
    pub span: Span,
}

impl Symbol {
    pub fn new(name: impl Into<String>, ty: Type, kind: SymbolKind, span: Span) -> Self {
        Symbol {
            name: name.into(),
            ty,
            scope: ScopeId(0),
            slot: None,
            kind,
            span,
        }
    }

    pub fn with_slot(mut self, slot: u32) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn method(&self) -> Option<&MethodInfo> {
        match &self.kind {
            SymbolKind::Method(m) => Some(m),
            _ => None,
        }
    }

    pub fn struct_info(&self) -> Option<&StructInfo> {
        match &self.kind {
            SymbolKind::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Variables and parameters: things that hold a value.
    pub fn is_storage(&self) -> bool {
        matches!(
            self.kind,
            SymbolKind::Variable { .. } | SymbolKind::Parameter
        )
    }

    pub fn is_global(&self) -> bool {
        matches!(self.kind, SymbolKind::Variable { global: true })
    }

    pub fn is_type(&self) -> bool {
        matches!(self.kind, SymbolKind::Struct(_) | SymbolKind::BuiltinType)
    }

    pub fn field_index(&self) -> Option<u32> {
        match self.kind {
            SymbolKind::Field { index } => Some(index),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            SymbolKind::Variable { global: true } => "global variable",
            SymbolKind::Variable { global: false } => "variable",
            SymbolKind::Parameter => "parameter",
            SymbolKind::Field { .. } => "field",
            SymbolKind::Method(_) => "function",
            SymbolKind::Struct(_) => "struct",
            SymbolKind::BuiltinType => "type",
        }
    }
}
