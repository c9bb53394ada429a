use thiserror::Error;

use crate::lang::span::Span;

/// What went wrong at compile time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileErrorKind {
    #[error("unresolved symbol '{name}'")]
    UnresolvedSymbol { name: String },

    #[error("duplicate symbol '{name}' (first defined at {first})")]
    DuplicateSymbol { name: String, first: Span },

    #[error("unresolved label '{label}'")]
    UnresolvedLabel { label: String },

    #[error("duplicate label '{label}'")]
    DuplicateLabel { label: String },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// A construct that is valid but appeared where it is not allowed.
    #[error("{what}: {reason}")]
    InvalidPosition { what: String, reason: String },

    #[error("operand {value} out of range for '{mnemonic}' ({reason})")]
    OperandOutOfRange {
        mnemonic: String,
        value: i64,
        reason: String,
    },

    #[error("unknown mnemonic '{0}'")]
    UnknownMnemonic(String),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("stack check failed in '{function}': {message}")]
    StackCheck { function: String, message: String },
}

/// A compile-time error with its source position and an optional hint.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub span: Span,
    pub hint: Option<String>,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, span: Span) -> Self {
        CompileError {
            kind,
            span,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Create an error for a name no enclosing scope defines
    pub fn unresolved_symbol(name: &str, span: Span) -> Self {
        Self::new(
            CompileErrorKind::UnresolvedSymbol {
                name: name.to_string(),
            },
            span,
        )
    }

    /// Create an error for a second definition of a name in the same scope
    pub fn duplicate_symbol(name: &str, span: Span, first: Span) -> Self {
        Self::new(
            CompileErrorKind::DuplicateSymbol {
                name: name.to_string(),
                first,
            },
            span,
        )
        .with_hint("the first definition is kept; rename or remove this one")
    }

    pub fn unresolved_label(label: &str, span: Span) -> Self {
        Self::new(
            CompileErrorKind::UnresolvedLabel {
                label: label.to_string(),
            },
            span,
        )
        .with_hint("jump targets must be labels defined in the same function")
    }

    pub fn duplicate_label(label: &str, span: Span) -> Self {
        Self::new(
            CompileErrorKind::DuplicateLabel {
                label: label.to_string(),
            },
            span,
        )
    }

    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>, span: Span) -> Self {
        Self::new(
            CompileErrorKind::TypeMismatch {
                expected: expected.into(),
                found: found.into(),
            },
            span,
        )
    }

    /// Create an error for `break` outside any loop
    pub fn break_outside_loop(span: Span) -> Self {
        Self::new(
            CompileErrorKind::InvalidPosition {
                what: "break".to_string(),
                reason: "not inside a loop".to_string(),
            },
            span,
        )
        .with_hint("break may only appear in the body of a while loop")
    }

    /// Create an error for `continue` outside any loop
    pub fn continue_outside_loop(span: Span) -> Self {
        Self::new(
            CompileErrorKind::InvalidPosition {
                what: "continue".to_string(),
                reason: "not inside a loop".to_string(),
            },
            span,
        )
        .with_hint("continue may only appear in the body of a while loop")
    }

    /// Create an error for an assignment to something that is not a variable,
    /// field or array element
    pub fn not_assignable(span: Span) -> Self {
        Self::new(
            CompileErrorKind::InvalidPosition {
                what: "assignment".to_string(),
                reason: "left-hand side is not assignable".to_string(),
            },
            span,
        )
    }

    pub fn operand_out_of_range(
        mnemonic: &str,
        value: i64,
        reason: impl Into<String>,
        span: Span,
    ) -> Self {
        Self::new(
            CompileErrorKind::OperandOutOfRange {
                mnemonic: mnemonic.to_string(),
                value,
                reason: reason.into(),
            },
            span,
        )
    }

    pub fn unknown_mnemonic(mnemonic: &str, span: Span) -> Self {
        Self::new(
            CompileErrorKind::UnknownMnemonic(mnemonic.to_string()),
            span,
        )
    }

    pub fn syntax(message: impl Into<String>, span: Span) -> Self {
        Self::new(CompileErrorKind::Syntax(message.into()), span)
    }

    pub fn stack_check(function: &str, message: impl Into<String>, span: Span) -> Self {
        Self::new(
            CompileErrorKind::StackCheck {
                function: function.to_string(),
                message: message.into(),
            },
            span,
        )
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "compile error at {}: {}", self.span, self.kind)?;
        if let Some(h) = &self.hint {
            write!(f, "\n  hint: {}", h)?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}

// =============================================================================
// Diagnostics
// =============================================================================

/// Every compile-time error recorded by the passes, reported together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
    errors: Vec<CompileError>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: CompileError) {
        tracing::debug!(span = %error.span, "{}", error.kind);
        self.errors.push(error);
    }

    pub fn extend(&mut self, other: Diagnostics) {
        for e in other.errors {
            self.push(e);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompileError> {
        self.errors.iter()
    }

    /// Errors ordered by source position; errors at the same position keep
    /// the order they were recorded in.
    pub fn sorted(mut self) -> Self {
        self.errors.sort_by_key(|e| e.span);
        self
    }

    pub fn count(&self, pred: impl Fn(&CompileErrorKind) -> bool) -> usize {
        self.errors.iter().filter(|e| pred(&e.kind)).count()
    }

    /// `Ok(value)` when nothing was recorded, otherwise the sorted errors.
    pub fn into_result<T>(self, value: T) -> Result<T, Diagnostics> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self.sorted())
        }
    }
}

impl From<CompileError> for Diagnostics {
    fn from(error: CompileError) -> Self {
        Diagnostics {
            errors: vec![error],
        }
    }
}

impl IntoIterator for Diagnostics {
    type Item = CompileError;
    type IntoIter = std::vec::IntoIter<CompileError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl std::fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", e)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostics {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_symbol_display() {
        let err = CompileError::duplicate_symbol("x", Span::new(4, 5), Span::new(2, 5));

        let msg = err.to_string();
        assert!(msg.contains("4:5"));
        assert!(msg.contains("duplicate symbol 'x'"));
        assert!(msg.contains("first defined at 2:5"));
        assert!(msg.contains("hint"));
    }

    #[test]
    fn test_break_outside_loop_display() {
        let err = CompileError::break_outside_loop(Span::new(1, 1));

        let msg = err.to_string();
        assert!(msg.contains("break"));
        assert!(msg.contains("not inside a loop"));
        assert!(msg.contains("while loop"));
    }

    #[test]
    fn test_type_mismatch_display() {
        let err = CompileError::type_mismatch("int", "string", Span::new(3, 2));
        assert!(err.to_string().contains("expected int, found string"));
        assert!(err.hint.is_none());
    }

    #[test]
    fn test_operand_out_of_range_display() {
        let err = CompileError::operand_out_of_range("load", 9, "frame has 3 slots", Span::new(1, 1));
        let msg = err.to_string();
        assert!(msg.contains("operand 9"));
        assert!(msg.contains("'load'"));
        assert!(msg.contains("frame has 3 slots"));
    }

    #[test]
    fn test_error_implements_std_error() {
        let err = CompileError::syntax("oops", Span::default());
        let as_error: &dyn std::error::Error = &err;
        assert!(as_error.source().is_some());
    }

    #[test]
    fn test_diagnostics_sorted_by_position() {
        let mut diags = Diagnostics::new();
        diags.push(CompileError::unresolved_symbol("b", Span::new(5, 1)));
        diags.push(CompileError::unresolved_symbol("a", Span::new(2, 9)));
        diags.push(CompileError::unresolved_symbol("c", Span::new(2, 3)));

        let names: Vec<String> = diags
            .sorted()
            .into_iter()
            .map(|e| match e.kind {
                CompileErrorKind::UnresolvedSymbol { name } => name,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(names, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_into_result() {
        assert_eq!(Diagnostics::new().into_result(7), Ok(7));

        let diags: Diagnostics = CompileError::syntax("bad", Span::default()).into();
        assert_eq!(diags.into_result(7).map_err(|d| d.len()), Err(1));
    }

    #[test]
    fn test_count_by_kind() {
        let mut diags = Diagnostics::new();
        diags.push(CompileError::unresolved_symbol("a", Span::default()));
        diags.push(CompileError::syntax("x", Span::default()));
        let unresolved =
            diags.count(|k| matches!(k, CompileErrorKind::UnresolvedSymbol { .. }));
        assert_eq!(unresolved, 1);
    }
}
