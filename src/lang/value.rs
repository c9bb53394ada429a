use serde::{Deserialize, Serialize};

/// Handle to an object on a VM heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeapRef(pub u32);

/// Runtime value of the stack VM and the tree-walking interpreter.
///
/// Values are the only data that can live on the operand stack, in frame
/// locals, in globals or in heap object fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// 64-bit signed integer.
    Int(i64),

    /// 64-bit floating-point number.
    Float(f64),

    Bool(bool),

    Char(char),

    /// Immutable string.
    Str(String),

    /// Reference to a struct or array instance.
    Ref(HeapRef),

    Null,
}

impl Value {
    /// Name of the value's type, as used in runtime type errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Char(_) => "char",
            Value::Str(_) => "string",
            Value::Ref(_) => "reference",
            Value::Null => "null",
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view used when strict type checking is off: booleans count as
    /// 0/1, chars as their code point and floats truncate.
    pub fn coerce_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(*b as i64),
            Value::Char(c) => Some(*c as i64),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn coerce_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            Value::Bool(b) => Some(*b as i64 as f64),
            Value::Char(c) => Some(*c as u32 as f64),
            _ => None,
        }
    }

    /// Truthiness used when strict type checking is off.
    pub fn coerce_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(n) => Some(*n != 0),
            Value::Null => Some(false),
            Value::Ref(_) => Some(true),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Char(c) => write!(f, "{}", c),
            Value::Str(s) => write!(f, "{}", s),
            Value::Ref(r) => write!(f, "<ref {}>", r.0),
            Value::Null => write!(f, "null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Float(1.5).to_string(), "1.5");
        assert_eq!(Value::Str("hi".into()).to_string(), "hi");
        assert_eq!(Value::Ref(HeapRef(3)).to_string(), "<ref 3>");
        assert_eq!(Value::Null.to_string(), "null");
    }

    #[test]
    fn test_lax_coercions() {
        assert_eq!(Value::Bool(true).coerce_int(), Some(1));
        assert_eq!(Value::Char('A').coerce_int(), Some(65));
        assert_eq!(Value::Int(2).coerce_float(), Some(2.0));
        assert_eq!(Value::Int(0).coerce_bool(), Some(false));
        assert_eq!(Value::Str("x".into()).coerce_int(), None);
    }
}
