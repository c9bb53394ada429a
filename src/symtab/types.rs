use super::symbol::SymbolId;

/// Static type of a symbol or expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Float,
    Bool,
    Char,
    String,
    Void,
    /// Type of the `null` literal.
    Null,
    Struct(SymbolId),
    Array(Box<Type>),
    /// Result of an unresolved name or a failed check. Compatible with
    /// everything so one error does not cascade.
    Undefined,
}

impl Type {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Int | Type::Float | Type::Undefined)
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Type::Struct(_) | Type::Array(_) | Type::String | Type::Null
        )
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Type::Undefined)
    }

    /// Whether a value of type `value` may be stored where `self` is expected.
    ///
    /// `int` widens to `float`; `null` fits any reference type.
    pub fn accepts(&self, value: &Type) -> bool {
        match (self, value) {
            (Type::Undefined, _) | (_, Type::Undefined) => true,
            (Type::Float, Type::Int) => true,
            (target, Type::Null) => target.is_reference(),
            (Type::Array(a), Type::Array(b)) => a == b || a.is_undefined() || b.is_undefined(),
            (a, b) => a == b,
        }
    }

    /// Whether `==`/`!=` may compare the two types.
    pub fn comparable(&self, other: &Type) -> bool {
        self.accepts(other) || other.accepts(self)
    }

    /// Result type of arithmetic on two numeric operands.
    pub fn widen(&self, other: &Type) -> Type {
        match (self, other) {
            (Type::Undefined, _) | (_, Type::Undefined) => Type::Undefined,
            (Type::Float, _) | (_, Type::Float) => Type::Float,
            _ => Type::Int,
        }
    }
}
