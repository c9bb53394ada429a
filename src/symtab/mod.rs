//! Symbols and lexical scopes.
//!
//! Scopes and symbols live in one arena, [`SymbolTable`], and refer to each
//! other by id. Only child to parent edges are stored: a scope knows its
//! enclosing scope, never its children.

pub mod scope;
pub mod symbol;
pub mod types;

pub use scope::{Scope, ScopeId, ScopeKind};
pub use symbol::{Builtin, MethodInfo, StructInfo, Symbol, SymbolId, SymbolKind};
pub use types::Type;

use crate::lang::ast::TypeRef;
use crate::lang::span::Span;

const PRIMITIVES: [(&str, Type); 6] = [
    ("int", Type::Int),
    ("float", Type::Float),
    ("bool", Type::Bool),
    ("char", Type::Char),
    ("string", Type::String),
    ("void", Type::Void),
];

#[derive(Debug, Clone)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    symbols: Vec<Symbol>,
    global: ScopeId,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// A table holding only the global scope with the primitive types and
    /// the builtin functions.
    pub fn new() -> Self {
        let mut table = SymbolTable {
            scopes: vec![Scope::new(ScopeKind::Global, None, 0)],
            symbols: Vec::new(),
            global: ScopeId(0),
        };
        let global = table.global;

        for (name, ty) in PRIMITIVES {
            let sym = Symbol::new(name, ty, SymbolKind::BuiltinType, Span::default());
            let _ = table.define(global, sym);
        }

        table.define_builtin(Builtin::Print, "print", &["value"]);
        table
    }

    fn define_builtin(&mut self, builtin: Builtin, name: &str, params: &[&str]) {
        let global = self.global;
        let placeholder = Symbol::new(
            name,
            Type::Void,
            SymbolKind::Method(MethodInfo {
                params: Vec::new(),
                scope: global,
                body: None,
                nlocals: 0,
                builtin: Some(builtin),
            }),
            Span::default(),
        );
        let Ok(method) = self.define(global, placeholder) else {
            return;
        };
        let scope = self.push_scope(ScopeKind::Method(method), global);
        let mut ids = Vec::new();
        for (slot, param) in params.iter().enumerate() {
            let sym = Symbol::new(*param, Type::Undefined, SymbolKind::Parameter, Span::default())
                .with_slot(slot as u32);
            if let Ok(id) = self.define(scope, sym) {
                ids.push(id);
            }
        }
        if let SymbolKind::Method(info) = &mut self.symbol_mut(method).kind {
            info.params = ids;
            info.scope = scope;
        }
    }

    pub fn global_scope(&self) -> ScopeId {
        self.global
    }

    /// Open a new scope nested in `enclosing`.
    pub fn push_scope(&mut self, kind: ScopeKind, enclosing: ScopeId) -> ScopeId {
        let parent_visible = self.scope(enclosing).len();
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes
            .push(Scope::new(kind, Some(enclosing), parent_visible));
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub(crate) fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    pub fn symbols(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (SymbolId(i as u32), s))
    }

    /// Add `symbol` to `scope`.
    ///
    /// If the scope already defines the name, nothing is added and the id of
    /// the existing definition comes back as the error.
    pub fn define(&mut self, scope: ScopeId, mut symbol: Symbol) -> Result<SymbolId, SymbolId> {
        if let Some(existing) = self.scope(scope).lookup_local(&symbol.name) {
            return Err(existing);
        }
        let id = SymbolId(self.symbols.len() as u32);
        symbol.scope = scope;
        self.scopes[scope.0 as usize].insert(&symbol.name, id);
        self.symbols.push(symbol);
        Ok(id)
    }

    /// Find `name` in `scope` or the nearest enclosing scope that defines it.
    pub fn resolve(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        self.resolve_visible(scope, usize::MAX, name)
    }

    /// Like [`resolve`](Self::resolve), but in block and function scopes only
    /// the first `visible` declarations of `scope` (and the declarations that
    /// preceded each nested scope in its parents) are considered.
    pub fn resolve_visible(&self, scope: ScopeId, visible: usize, name: &str) -> Option<SymbolId> {
        let mut current = Some(scope);
        let mut limit = visible;

        while let Some(id) = current {
            let s = self.scope(id);
            let found = if s.is_ordered() {
                s.lookup_visible(name, limit)
            } else {
                s.lookup_local(name)
            };
            if found.is_some() {
                return found;
            }
            limit = s.parent_visible;
            current = s.enclosing;
        }
        None
    }

    /// Resolve `name` inside the struct's own field scope only.
    pub fn resolve_member(&self, strukt: SymbolId, name: &str) -> Option<SymbolId> {
        let info = self.symbol(strukt).struct_info()?;
        info.fields.get(name).copied()
    }

    /// Turn a written type into a [`Type`], resolving names from `scope`.
    pub fn resolve_type(&self, scope: ScopeId, ty: &TypeRef) -> Option<Type> {
        match ty {
            TypeRef::Named(name) => {
                let id = self.resolve(scope, name)?;
                let sym = self.symbol(id);
                match sym.kind {
                    SymbolKind::BuiltinType => Some(sym.ty.clone()),
                    SymbolKind::Struct(_) => Some(Type::Struct(id)),
                    _ => None,
                }
            }
            TypeRef::Array(elem) => {
                let elem = self.resolve_type(scope, elem)?;
                Some(Type::Array(Box::new(elem)))
            }
        }
    }

    /// The function whose body contains `scope`, if any.
    pub fn enclosing_method(&self, scope: ScopeId) -> Option<SymbolId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let s = self.scope(id);
            if let ScopeKind::Method(m) = s.kind {
                return Some(m);
            }
            current = s.enclosing;
        }
        None
    }

    /// A function declared at global level.
    pub fn function(&self, name: &str) -> Option<SymbolId> {
        let id = self.scope(self.global).lookup_local(name)?;
        self.symbol(id).method().map(|_| id)
    }

    /// Human-readable type name for diagnostics.
    pub fn type_name(&self, ty: &Type) -> String {
        match ty {
            Type::Int => "int".to_string(),
            Type::Float => "float".to_string(),
            Type::Bool => "bool".to_string(),
            Type::Char => "char".to_string(),
            Type::String => "string".to_string(),
            Type::Void => "void".to_string(),
            Type::Null => "null".to_string(),
            Type::Struct(id) => self.symbol(*id).name.clone(),
            Type::Array(elem) => format!("{}[]", self.type_name(elem)),
            Type::Undefined => "<undefined>".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str, line: usize) -> Symbol {
        Symbol::new(
            name,
            Type::Int,
            SymbolKind::Variable { global: false },
            Span::new(line, 1),
        )
    }

    #[test]
    fn test_primitives_and_print_predefined() {
        let table = SymbolTable::new();
        let global = table.global_scope();
        for name in ["int", "float", "bool", "char", "string", "void"] {
            let id = table.resolve(global, name).expect(name);
            assert!(table.symbol(id).is_type());
        }
        let print = table.function("print").expect("print");
        let info = table.symbol(print).method().expect("method");
        assert_eq!(info.builtin, Some(Builtin::Print));
        assert_eq!(info.arg_count(), 1);
    }

    #[test]
    fn test_inner_definition_shadows_outer() {
        let mut table = SymbolTable::new();
        let global = table.global_scope();
        let outer = table.define(global, var("x", 1)).unwrap();
        let block = table.push_scope(ScopeKind::Local, global);
        let inner = table.define(block, var("x", 2)).unwrap();

        assert_eq!(table.resolve(block, "x"), Some(inner));
        assert_eq!(table.resolve(global, "x"), Some(outer));
    }

    #[test]
    fn test_redefinition_returns_existing() {
        let mut table = SymbolTable::new();
        let global = table.global_scope();
        let first = table.define(global, var("x", 1)).unwrap();
        assert_eq!(table.define(global, var("x", 2)), Err(first));
        assert_eq!(table.symbol(first).span.line, 1);
    }

    #[test]
    fn test_unresolved_name() {
        let table = SymbolTable::new();
        assert_eq!(table.resolve(table.global_scope(), "nope"), None);
    }

    #[test]
    fn test_block_names_visible_only_after_declaration() {
        let mut table = SymbolTable::new();
        let global = table.global_scope();
        let outer = table.define(global, var("x", 1)).unwrap();
        let block = table.push_scope(ScopeKind::Local, global);
        let inner = table.define(block, var("x", 3)).unwrap();

        // a use recorded before the inner declaration sees the global
        assert_eq!(table.resolve_visible(block, 0, "x"), Some(outer));
        assert_eq!(table.resolve_visible(block, 1, "x"), Some(inner));
    }

    #[test]
    fn test_nested_scope_sees_only_earlier_parent_names() {
        let mut table = SymbolTable::new();
        let global = table.global_scope();
        let block = table.push_scope(ScopeKind::Local, global);
        table.define(block, var("a", 1)).unwrap();
        let nested = table.push_scope(ScopeKind::Local, block);
        table.define(block, var("b", 5)).unwrap();

        assert!(table.resolve(nested, "a").is_some());
        assert!(table.resolve(nested, "b").is_none());
    }

    #[test]
    fn test_member_resolution_stays_in_struct() {
        let mut table = SymbolTable::new();
        let global = table.global_scope();
        table.define(global, var("y", 1)).unwrap();

        let strukt = table
            .define(
                global,
                Symbol::new(
                    "Point",
                    Type::Void,
                    SymbolKind::Struct(StructInfo {
                        scope: global,
                        fields: Default::default(),
                    }),
                    Span::default(),
                ),
            )
            .unwrap();
        let fields = table.push_scope(ScopeKind::Struct(strukt), global);
        let x = table
            .define(
                fields,
                Symbol::new("x", Type::Int, SymbolKind::Field { index: 0 }, Span::default()),
            )
            .unwrap();
        if let SymbolKind::Struct(info) = &mut table.symbol_mut(strukt).kind {
            info.scope = fields;
            info.fields.insert("x".to_string(), x);
        }

        assert_eq!(table.resolve_member(strukt, "x"), Some(x));
        assert_eq!(table.resolve_member(strukt, "y"), None);
    }

    #[test]
    fn test_resolve_array_type() {
        let table = SymbolTable::new();
        let ty = table
            .resolve_type(table.global_scope(), &TypeRef::array_of(TypeRef::named("int")))
            .unwrap();
        assert_eq!(ty, Type::Array(Box::new(Type::Int)));
        assert_eq!(table.type_name(&ty), "int[]");
    }
}
