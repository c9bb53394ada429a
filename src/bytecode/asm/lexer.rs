use crate::compile_error::CompileError;
use crate::lang::span::Span;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Mnemonics, directives, names and registers. May contain `.` and `$`;
    /// `<name>` is a single identifier.
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Char(char),
    Colon,
    Comma,
    Eq,
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Span,
}

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn current(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.current();
        if ch == Some('\n') {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        self.pos += 1;
        ch
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.col)
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::syntax(message, self.span())
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current() {
            if ch == ' ' || ch == '\t' || ch == '\r' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn skip_comment(&mut self) {
        while let Some(ch) = self.current() {
            if ch == '\n' {
                break;
            }
            self.advance();
        }
    }

    /// The character after a backslash.
    fn read_escape(&mut self) -> Result<char, CompileError> {
        let ch = match self.current() {
            Some('n') => '\n',
            Some('t') => '\t',
            Some('r') => '\r',
            Some('\\') => '\\',
            Some('"') => '"',
            Some('\'') => '\'',
            Some('0') => '\0',
            Some('u') => {
                self.advance();
                if self.current() != Some('{') {
                    return Err(self.error("expected '{' after \\u"));
                }
                self.advance();
                let mut hex = String::new();
                while let Some(ch) = self.current() {
                    if ch == '}' {
                        break;
                    }
                    hex.push(ch);
                    self.advance();
                }
                let c = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .filter(|_| self.current() == Some('}'))
                    .ok_or_else(|| self.error(format!("invalid unicode escape: \\u{{{}}}", hex)))?;
                self.advance();
                return Ok(c);
            }
            Some(ch) => return Err(self.error(format!("unknown escape sequence: \\{}", ch))),
            None => return Err(self.error("unexpected EOF in escape sequence")),
        };
        self.advance();
        Ok(ch)
    }

    fn read_string(&mut self) -> Result<Token, CompileError> {
        let start = self.span();
        self.advance();

        let mut string = String::new();
        loop {
            match self.current() {
                Some('"') => {
                    self.advance();
                    return Ok(Token::Str(string));
                }
                Some('\\') => {
                    self.advance();
                    string.push(self.read_escape()?);
                }
                Some('\n') | None => {
                    return Err(CompileError::syntax("unterminated string literal", start));
                }
                Some(ch) => {
                    string.push(ch);
                    self.advance();
                }
            }
        }
    }

    fn read_char(&mut self) -> Result<Token, CompileError> {
        let start = self.span();
        self.advance();
        let ch = match self.current() {
            Some('\\') => {
                self.advance();
                self.read_escape()?
            }
            Some(ch) if ch != '\'' && ch != '\n' => {
                self.advance();
                ch
            }
            _ => return Err(CompileError::syntax("empty character literal", start)),
        };
        if self.current() != Some('\'') {
            return Err(CompileError::syntax("unterminated character literal", start));
        }
        self.advance();
        Ok(Token::Char(ch))
    }

    fn read_number(&mut self) -> Result<Token, CompileError> {
        let start = self.span();
        let mut text = String::new();
        if self.current() == Some('-') {
            text.push('-');
            self.advance();
        }

        if self.current() == Some('0') && matches!(self.peek(), Some('x') | Some('X')) {
            self.advance();
            self.advance();
            let mut hex = String::new();
            while let Some(ch) = self.current() {
                if ch.is_ascii_hexdigit() {
                    hex.push(ch);
                    self.advance();
                } else {
                    break;
                }
            }
            let value = i64::from_str_radix(&hex, 16)
                .map_err(|_| CompileError::syntax(format!("invalid hex number: 0x{}", hex), start))?;
            return Ok(Token::Int(if text.is_empty() { value } else { -value }));
        }

        let mut is_float = false;
        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                text.push(ch);
            } else if ch == '.' && !is_float && self.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                text.push(ch);
            } else if (ch == 'e' || ch == 'E')
                && self
                    .peek()
                    .is_some_and(|c| c.is_ascii_digit() || c == '-' || c == '+')
            {
                is_float = true;
                text.push(ch);
                self.advance();
                if let Some(sign @ ('-' | '+')) = self.current() {
                    text.push(sign);
                    self.advance();
                }
                continue;
            } else {
                break;
            }
            self.advance();
        }

        if is_float {
            text.parse()
                .map(Token::Float)
                .map_err(|_| CompileError::syntax(format!("invalid float: {}", text), start))
        } else {
            text.parse()
                .map(Token::Int)
                .map_err(|_| CompileError::syntax(format!("invalid integer: {}", text), start))
        }
    }

    fn read_identifier(&mut self) -> Result<Token, CompileError> {
        let start = self.span();
        let mut ident = String::new();

        if self.current() == Some('<') {
            while let Some(ch) = self.current() {
                ident.push(ch);
                self.advance();
                if ch == '>' {
                    return Ok(Token::Ident(ident));
                }
                if ch == '\n' {
                    break;
                }
            }
            return Err(CompileError::syntax("unterminated '<' name", start));
        }

        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' || ch == '.' || ch == '$' {
                ident.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        Ok(Token::Ident(ident))
    }

    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, CompileError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace();
            let span = self.span();

            let token = match self.current() {
                None => {
                    tokens.push(Spanned {
                        token: Token::Eof,
                        span,
                    });
                    break;
                }
                Some(';') | Some('#') => {
                    self.skip_comment();
                    continue;
                }
                Some('/') if self.peek() == Some('/') => {
                    self.skip_comment();
                    continue;
                }
                Some('\n') => {
                    self.advance();
                    Token::Newline
                }
                Some(':') => {
                    self.advance();
                    Token::Colon
                }
                Some(',') => {
                    self.advance();
                    Token::Comma
                }
                Some('=') => {
                    self.advance();
                    Token::Eq
                }
                Some('"') => self.read_string()?,
                Some('\'') => self.read_char()?,
                Some('-') if self.peek().is_some_and(|c| c.is_ascii_digit()) => self.read_number()?,
                Some(ch) if ch.is_ascii_digit() => self.read_number()?,
                Some(ch) if ch.is_alphabetic() || "_.$<".contains(ch) => self.read_identifier()?,
                Some(ch) => return Err(self.error(format!("unexpected character: '{}'", ch))),
            };
            tokens.push(Spanned { token, span });
        }

        Ok(tokens)
    }
}
