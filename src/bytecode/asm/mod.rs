//! Reader for the line-oriented assembly text of both instruction sets.
//!
//! ```text
//! .globals 1
//! .struct Point: x, y
//! .def fib: args=1, locals=0
//!     load 0
//!     iconst 2
//!     ilt
//!     brf recurse
//!     load 0
//!     retv
//! recurse:
//!     ...
//! ```
//!
//! Directives: `.globals N`, `.struct Name: f1, f2`, `.def name: args=A,
//! locals=L[, stack=S]`, `.entry name` and `.word N` (a raw instruction
//! word). Labels are local to the function they appear in. Instructions
//! before the first `.def` form an implicit `main`. Comments start with `;`,
//! `#` or `//`.

pub mod lexer;
pub mod register;
pub mod stack;

pub use register::assemble_register;
pub use stack::assemble_stack;

use lexer::{Lexer, Spanned, Token};

use super::disasm::first_field_offset;
use super::program::{FunctionInfo, Isa, LabelInfo, Program, StructInfo};
use crate::compile_error::{CompileError, Diagnostics};
use crate::lang::span::Span;

/// One operand as written.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Operand {
    pub token: Token,
    pub span: Span,
}

/// One instruction line, or a `.word`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Instr {
    pub span: Span,
    pub mnemonic: String,
    pub operands: Vec<Operand>,
}

/// Result of the first pass: a program skeleton (tables, function bounds,
/// label offsets, no code) and the instructions of each function.
pub(crate) struct Layout {
    pub program: Program,
    pub bodies: Vec<Vec<Instr>>,
    /// Span of each function's `.def`, used for whole-function errors.
    pub spans: Vec<Span>,
}

// =============================================================================
// Pass 1: lines, directives and label offsets
// =============================================================================

pub(crate) fn layout(text: &str, isa: Isa, diagnostics: &mut Diagnostics) -> Layout {
    let mut layout = Layout {
        program: Program::new(isa),
        bodies: Vec::new(),
        spans: Vec::new(),
    };

    let tokens = match Lexer::new(text).tokenize() {
        Ok(tokens) => tokens,
        Err(e) => {
            diagnostics.push(e);
            return layout;
        }
    };

    let mut entry: Option<(String, Span)> = None;
    let mut offset = 0usize;

    for line in tokens.split(|t| matches!(t.token, Token::Newline | Token::Eof)) {
        let mut line = line;

        // leading `label:`
        if let [
            Spanned {
                token: Token::Ident(name),
                span,
            },
            Spanned {
                token: Token::Colon, ..
            },
            rest @ ..,
        ] = line
        {
            if !name.starts_with('.') {
                layout.ensure_function(*span);
                let function = layout.bodies.len() - 1;
                if layout.program.label_offset(function, name).is_some() {
                    diagnostics.push(CompileError::duplicate_label(name, *span));
                } else {
                    layout.program.labels.push(LabelInfo {
                        function,
                        name: name.clone(),
                        offset,
                    });
                }
                line = rest;
            }
        }

        let Some(first) = line.first() else {
            continue;
        };
        let Token::Ident(word) = &first.token else {
            diagnostics.push(CompileError::syntax(
                format!("expected a mnemonic or directive, found {:?}", first.token),
                first.span,
            ));
            continue;
        };

        match word.as_str() {
            ".globals" => match &line[1..] {
                [Spanned {
                    token: Token::Int(n),
                    ..
                }] if *n >= 0 => layout.program.globals = *n as u32,
                _ => diagnostics.push(CompileError::syntax("expected '.globals N'", first.span)),
            },
            ".struct" => match parse_struct(&line[1..]) {
                Some(s) => {
                    if layout.program.struct_index(&s.name).is_some() {
                        diagnostics.push(CompileError::duplicate_symbol(&s.name, first.span, first.span));
                    } else {
                        layout.program.structs.push(s);
                    }
                }
                None => diagnostics.push(CompileError::syntax(
                    "expected '.struct Name: field, ...'",
                    first.span,
                )),
            },
            ".def" => match parse_def(&line[1..]) {
                Ok(info) => {
                    if let Some(i) = layout.program.function_index(&info.name) {
                        let first_span = layout.spans[i];
                        diagnostics.push(CompileError::duplicate_symbol(&info.name, first.span, first_span));
                    }
                    layout.begin_function(info, offset, first.span);
                }
                Err(message) => diagnostics.push(CompileError::syntax(message, first.span)),
            },
            ".entry" => match &line[1..] {
                [Spanned {
                    token: Token::Ident(name),
                    ..
                }] => entry = Some((name.clone(), first.span)),
                _ => diagnostics.push(CompileError::syntax("expected '.entry name'", first.span)),
            },
            w if w.starts_with('.') && w != ".word" => {
                diagnostics.push(CompileError::syntax(format!("unknown directive '{}'", w), first.span));
            }
            _ => match parse_operands(&line[1..]) {
                Ok(operands) => {
                    layout.ensure_function(first.span);
                    if let Some(body) = layout.bodies.last_mut() {
                        body.push(Instr {
                            span: first.span,
                            mnemonic: word.clone(),
                            operands,
                        });
                    }
                    offset += 1;
                }
                Err(e) => diagnostics.push(e),
            },
        }
    }

    let mut address = 0;
    for (info, body) in layout.program.functions.iter_mut().zip(&layout.bodies) {
        info.address = address;
        address += body.len();
        info.end = address;
    }

    layout.program.entry = match entry {
        Some((name, span)) => layout.program.function_index(&name).unwrap_or_else(|| {
            diagnostics.push(CompileError::unresolved_symbol(&name, span));
            0
        }),
        None => layout.program.function_index("main").unwrap_or(0),
    };
    layout
}

impl Layout {
    fn begin_function(&mut self, info: FunctionInfo, address: usize, span: Span) {
        self.program.functions.push(FunctionInfo { address, ..info });
        self.bodies.push(Vec::new());
        self.spans.push(span);
    }

    /// Open the implicit `main` when code appears before any `.def`.
    fn ensure_function(&mut self, span: Span) {
        if self.bodies.is_empty() {
            self.begin_function(
                FunctionInfo {
                    name: "main".to_string(),
                    address: 0,
                    end: 0,
                    nargs: 0,
                    nlocals: 0,
                    returns: false,
                    max_stack: 0,
                },
                0,
                span,
            );
        }
    }
}

fn parse_struct(tokens: &[Spanned]) -> Option<StructInfo> {
    let [
        Spanned {
            token: Token::Ident(name),
            ..
        },
        Spanned {
            token: Token::Colon, ..
        },
        rest @ ..,
    ] = tokens
    else {
        return None;
    };

    let mut fields = Vec::new();
    for (i, t) in rest.iter().enumerate() {
        match (&t.token, i % 2) {
            (Token::Ident(f), 0) => fields.push(f.clone()),
            (Token::Comma, 1) => {}
            _ => return None,
        }
    }
    Some(StructInfo {
        name: name.clone(),
        fields,
    })
}

/// `name: args=A, locals=L, stack=S` with the keys in any order.
fn parse_def(tokens: &[Spanned]) -> Result<FunctionInfo, String> {
    let usage = "expected '.def name: args=A, locals=L'";
    let [
        Spanned {
            token: Token::Ident(name),
            ..
        },
        rest @ ..,
    ] = tokens
    else {
        return Err(usage.to_string());
    };

    let mut info = FunctionInfo {
        name: name.clone(),
        address: 0,
        end: 0,
        nargs: 0,
        nlocals: 0,
        returns: false,
        max_stack: 0,
    };
    let rest = match rest {
        [] => return Ok(info),
        [
            Spanned {
                token: Token::Colon, ..
            },
            rest @ ..,
        ] => rest,
        _ => return Err(usage.to_string()),
    };

    for pair in rest.split(|t| t.token == Token::Comma) {
        let (key, value) = match pair {
            [
                Spanned {
                    token: Token::Ident(key),
                    ..
                },
                Spanned { token: Token::Eq, .. },
                Spanned {
                    token: Token::Int(value),
                    ..
                },
            ] if *value >= 0 => (key.as_str(), *value as u32),
            _ => return Err(usage.to_string()),
        };
        match key {
            "args" => info.nargs = value,
            "locals" => info.nlocals = value,
            "stack" => {}
            other => return Err(format!("unknown .def key '{}'", other)),
        }
    }
    Ok(info)
}

fn parse_operands(tokens: &[Spanned]) -> Result<Vec<Operand>, CompileError> {
    let mut operands = Vec::new();
    if tokens.is_empty() {
        return Ok(operands);
    }
    for group in tokens.split(|t| t.token == Token::Comma) {
        match group {
            [t] => operands.push(Operand {
                token: t.token.clone(),
                span: t.span,
            }),
            [] => {
                let span = tokens.first().map(|t| t.span).unwrap_or_default();
                return Err(CompileError::syntax("empty operand", span));
            }
            [t, ..] => {
                return Err(CompileError::syntax(
                    "operands must be separated by ','",
                    t.span,
                ));
            }
        }
    }
    Ok(operands)
}

// =============================================================================
// Pass 2 helpers: operand resolution
// =============================================================================

/// Resolves symbolic operands against the program skeleton while one
/// function is encoded.
pub(crate) struct Resolver<'a> {
    pub program: &'a mut Program,
    pub function: usize,
    pub diagnostics: &'a mut Diagnostics,
}

impl Resolver<'_> {
    pub fn error(&mut self, error: CompileError) {
        self.diagnostics.push(error);
    }

    pub fn current(&self) -> &FunctionInfo {
        &self.program.functions[self.function]
    }

    /// Check the operand count; `optional` more may follow.
    pub fn arity(&mut self, instr: &Instr, expected: usize, optional: usize) -> bool {
        let n = instr.operands.len();
        if n < expected || n > expected + optional {
            self.error(CompileError::syntax(
                format!(
                    "'{}' expects {} operand(s), found {}",
                    instr.mnemonic, expected, n
                ),
                instr.span,
            ));
            return false;
        }
        true
    }

    pub fn int(&mut self, mnemonic: &str, op: &Operand, min: i64, max: i64) -> i64 {
        match op.token {
            Token::Int(n) if (min..=max).contains(&n) => n,
            Token::Int(n) => {
                self.error(CompileError::operand_out_of_range(
                    mnemonic,
                    n,
                    format!("expected {}..={}", min, max),
                    op.span,
                ));
                0
            }
            _ => {
                self.error(CompileError::syntax(
                    format!("'{}' expects an integer operand", mnemonic),
                    op.span,
                ));
                0
            }
        }
    }

    /// A label of the current function, or a literal absolute offset.
    pub fn label(&mut self, op: &Operand) -> i64 {
        match &op.token {
            Token::Int(n) => *n,
            Token::Ident(name) => match self.program.label_offset(self.function, name) {
                Some(offset) => offset as i64,
                None => {
                    self.error(CompileError::unresolved_label(name, op.span));
                    0
                }
            },
            _ => {
                self.error(CompileError::syntax("expected a label", op.span));
                0
            }
        }
    }

    pub fn function_ref(&mut self, op: &Operand) -> Option<usize> {
        let index = match &op.token {
            Token::Ident(name) => self.program.function_index(name),
            Token::Int(n) => usize::try_from(*n)
                .ok()
                .filter(|i| *i < self.program.functions.len()),
            _ => None,
        };
        if index.is_none() {
            let name = match &op.token {
                Token::Ident(name) => name.clone(),
                other => format!("{:?}", other),
            };
            self.error(CompileError::unresolved_symbol(&name, op.span));
        }
        index
    }

    /// `call f` or `call f, n`; `n` must match the callee's argument count.
    pub fn call_target(&mut self, instr: &Instr) -> i64 {
        if !self.arity(instr, 1, 1) {
            return 0;
        }
        let Some(index) = self.function_ref(&instr.operands[0]) else {
            return 0;
        };
        if let Some(count) = instr.operands.get(1) {
            let nargs = self.program.functions[index].nargs as i64;
            let n = self.int("call", count, 0, i64::MAX);
            if n != nargs {
                let name = self.program.functions[index].name.clone();
                self.error(CompileError::operand_out_of_range(
                    "call",
                    n,
                    format!("'{}' takes {} argument(s)", name, nargs),
                    count.span,
                ));
            }
        }
        index as i64
    }

    pub fn struct_ref(&mut self, op: &Operand) -> i64 {
        let index = match &op.token {
            Token::Ident(name) => self.program.struct_index(name),
            Token::Int(n) => usize::try_from(*n)
                .ok()
                .filter(|i| *i < self.program.structs.len()),
            _ => None,
        };
        match index {
            Some(i) => i as i64,
            None => {
                self.error(CompileError::unresolved_symbol(&format!("{:?}", op.token), op.span));
                0
            }
        }
    }

    /// Field offset from `n`, `Struct.field` or a bare field name (first
    /// struct declaring it).
    pub fn field(&mut self, op: &Operand) -> i64 {
        let offset = match &op.token {
            Token::Int(n) if *n >= 0 => Some(*n as usize),
            Token::Ident(name) => match name.split_once('.') {
                Some((strukt, field)) => self
                    .program
                    .struct_index(strukt)
                    .and_then(|s| self.program.field_offset(s, field)),
                None => first_field_offset(self.program, name),
            },
            _ => None,
        };
        match offset {
            Some(off) => off as i64,
            None => {
                let name = match &op.token {
                    Token::Ident(name) => name.clone(),
                    other => format!("{:?}", other),
                };
                self.error(CompileError::unresolved_symbol(&name, op.span));
                0
            }
        }
    }

    /// Operand of `.word`.
    pub fn raw_word(&mut self, instr: &Instr) -> u32 {
        if !self.arity(instr, 1, 0) {
            return 0;
        }
        self.int(".word", &instr.operands[0], 0, u32::MAX as i64) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile_error::CompileErrorKind;
    use pretty_assertions::assert_eq;

    fn lay(text: &str) -> (Layout, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let layout = layout(text, Isa::Stack, &mut diagnostics);
        (layout, diagnostics)
    }

    #[test]
    fn test_directives_and_bounds() {
        let (layout, diagnostics) = lay(
            "\
.globals 2
.struct Point: x, y
.def f: args=1, locals=2, stack=3
    load 0
    retv
.def main: locals=0
    iconst 1
    call f, 1
    pop
    ret
",
        );
        assert!(diagnostics.is_empty(), "{}", diagnostics);
        let p = &layout.program;
        assert_eq!(p.globals, 2);
        assert_eq!(p.structs[0].fields, vec!["x", "y"]);
        assert_eq!((p.functions[0].address, p.functions[0].end), (0, 2));
        assert_eq!((p.functions[1].address, p.functions[1].end), (2, 6));
        assert_eq!(p.functions[0].nlocals, 2);
        assert_eq!(p.entry, 1);
        assert_eq!(layout.bodies[1][1].operands.len(), 2);
    }

    #[test]
    fn test_labels_are_per_function() {
        let (layout, diagnostics) = lay(
            "\
.def a: args=0, locals=0
top: br top
.def b: args=0, locals=0
    nop
top:
    br top
",
        );
        assert!(diagnostics.is_empty(), "{}", diagnostics);
        assert_eq!(layout.program.label_offset(0, "top"), Some(0));
        assert_eq!(layout.program.label_offset(1, "top"), Some(2));
    }

    #[test]
    fn test_implicit_main() {
        let (layout, _) = lay("iconst 1\nhalt\n");
        assert_eq!(layout.program.functions[0].name, "main");
        assert_eq!(layout.bodies[0].len(), 2);
    }

    #[test]
    fn test_duplicate_label_and_function() {
        let (_, diagnostics) = lay(
            "\
.def f: args=0, locals=0
x:
x:
    ret
.def f: args=0, locals=0
    ret
",
        );
        assert_eq!(diagnostics.count(|k| matches!(k, CompileErrorKind::DuplicateLabel { .. })), 1);
        assert_eq!(diagnostics.count(|k| matches!(k, CompileErrorKind::DuplicateSymbol { .. })), 1);
    }

    #[test]
    fn test_bad_directive() {
        let (_, diagnostics) = lay(".def f args=0\n.bogus 1\n");
        assert_eq!(diagnostics.count(|k| matches!(k, CompileErrorKind::Syntax(_))), 2);
    }

    #[test]
    fn test_entry_directive() {
        let (layout, diagnostics) = lay(".entry go\n.def main\nret\n.def go\nret\n");
        assert!(diagnostics.is_empty(), "{}", diagnostics);
        assert_eq!(layout.program.entry, 1);
    }
}
