use crate::lang::span::Span;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeErrorKind {
    #[error("stack overflow: {0}")]
    StackOverflow(String),

    #[error("stack underflow")]
    StackUnderflow,

    #[error("heap exhausted: requested {requested} cells, {available} available")]
    HeapExhausted { requested: usize, available: usize },

    #[error("illegal opcode {0}")]
    IllegalOpcode(u8),

    #[error("division by zero")]
    DivisionByZero,

    #[error("execution step limit exceeded ({0})")]
    StepLimitExceeded(u64),

    #[error("index {index} out of bounds for length {length}")]
    OutOfBounds { index: i64, length: usize },

    #[error("type error: expected {expected}, found {found}")]
    TypeError { expected: String, found: String },

    #[error("null reference")]
    NullReference,

    #[error("program of {size} words exceeds the instruction cache ({capacity})")]
    ProgramTooLarge { size: usize, capacity: usize },

    #[error("not runnable: {0}")]
    NotReady(String),
}

impl RuntimeErrorKind {
    pub fn type_error(expected: impl Into<String>, found: impl Into<String>) -> Self {
        RuntimeErrorKind::TypeError {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// A fatal execution fault, with where it happened.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    /// Code offset of the faulting instruction (virtual machines).
    pub offset: Option<usize>,
    /// The faulting instruction, disassembled.
    pub instruction: Option<String>,
    /// Source position (interpreter).
    pub span: Option<Span>,
    pub call_depth: usize,
    /// Active functions, outermost first.
    pub call_stack: Vec<String>,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind) -> Self {
        RuntimeError {
            kind,
            offset: None,
            instruction: None,
            span: None,
            call_depth: 0,
            call_stack: Vec::new(),
        }
    }

    pub fn at(mut self, offset: usize, instruction: impl Into<String>) -> Self {
        self.offset = Some(offset);
        self.instruction = Some(instruction.into());
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn with_call_stack(mut self, call_stack: Vec<String>) -> Self {
        self.call_depth = call_stack.len();
        self.call_stack = call_stack;
        self
    }
}

impl From<RuntimeErrorKind> for RuntimeError {
    fn from(kind: RuntimeErrorKind) -> Self {
        RuntimeError::new(kind)
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "runtime error: {}", self.kind)?;

        if let (Some(offset), Some(ins)) = (self.offset, &self.instruction) {
            write!(f, "\n  at {}: {}", offset, ins)?;
        }
        if let Some(span) = self.span {
            write!(f, "\n  at {}", span)?;
        }

        if !self.call_stack.is_empty() {
            write!(f, "\n  call stack:")?;

            for (i, frame) in self.call_stack.iter().rev().enumerate() {
                write!(f, "\n    {}: {}", i, frame)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.kind)
    }
}
