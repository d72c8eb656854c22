//! Lexer for Quadrate source.
//!
//! Single-pass and table-free: classify the next non-whitespace,
//! non-comment byte and dispatch. Tokens carry the 1-based line and
//! column of their first character; `raw` is the exact source slice and
//! `text` the semantic payload (decoded escapes for strings, joined
//! scope for `a::b`).

use crate::diagnostics::{Diagnostic, DiagnosticKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    ScopedIdentifier,
    Number,
    StringLiteral,
    Keyword,
    Operator,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// Semantic text: decoded payload for strings, lexeme otherwise.
    pub text: String,
    /// Exact source slice the token was produced from.
    pub raw: String,
    /// 1-based line of the first character.
    pub line: usize,
    /// 1-based column of the first character.
    pub column: usize,
}

impl Token {
    fn new(kind: TokenKind, text: impl Into<String>, raw: impl Into<String>, line: usize, column: usize) -> Self {
        Token {
            kind,
            text: text.into(),
            raw: raw.into(),
            line,
            column,
        }
    }

    pub fn is(&self, text: &str) -> bool {
        self.text == text
    }
}

const KEYWORDS: &[&str] = &[
    "fn", "use", "import", "as", "const", "struct", "pub", "if", "else", "for", "loop", "switch",
    "case", "default", "break", "continue", "return", "defer", "ctx", "local",
];

fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    filename: String,
}

impl Lexer {
    pub fn new(source: &str, filename: &str) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            filename: filename.to_string(),
        }
    }

    /// Tokenize the whole buffer. Lexical problems are reported as
    /// diagnostics; lexing continues after each so later phases can see
    /// everything that did tokenize.
    pub fn tokenize(mut self) -> (Vec<Token>, Vec<Diagnostic>) {
        let mut tokens = Vec::new();
        let mut diagnostics = Vec::new();

        while let Some(c) = self.peek() {
            if c == '\n' {
                self.advance_newline();
                continue;
            }
            if c.is_whitespace() {
                self.advance();
                continue;
            }
            if c == '/' && self.peek_at(1) == Some('/') {
                self.skip_line_comment();
                continue;
            }
            if c == '/' && self.peek_at(1) == Some('*') {
                self.skip_block_comment(&mut diagnostics);
                continue;
            }

            let line = self.line;
            let column = self.column;

            if is_identifier_start(c) {
                tokens.push(self.lex_identifier(line, column));
            } else if c.is_ascii_digit() {
                match self.lex_number(line, column) {
                    Ok(tok) => tokens.push(tok),
                    Err(d) => diagnostics.push(d),
                }
            } else if c == '"' {
                match self.lex_string(line, column) {
                    Ok(tok) => tokens.push(tok),
                    Err(d) => diagnostics.push(d),
                }
            } else if let Some(tok) = self.lex_operator(line, column) {
                tokens.push(tok);
            } else {
                diagnostics.push(Diagnostic::error(
                    DiagnosticKind::Lexical,
                    format!("illegal character '{}'", c),
                    &self.filename,
                    line,
                    column,
                ));
                self.advance();
            }
        }

        (tokens, diagnostics)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        self.column += 1;
        Some(c)
    }

    fn advance_newline(&mut self) {
        self.pos += 1;
        self.line += 1;
        self.column = 1;
    }

    fn skip_line_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.advance();
        }
    }

    /// Block comments do not nest: the first `*/` closes the comment.
    fn skip_block_comment(&mut self, diagnostics: &mut Vec<Diagnostic>) {
        let start_line = self.line;
        let start_column = self.column;
        self.advance(); // '/'
        self.advance(); // '*'
        loop {
            match self.peek() {
                None => {
                    diagnostics.push(Diagnostic::error(
                        DiagnosticKind::Lexical,
                        "unterminated block comment".to_string(),
                        &self.filename,
                        start_line,
                        start_column,
                    ));
                    return;
                }
                Some('\n') => self.advance_newline(),
                Some('*') if self.peek_at(1) == Some('/') => {
                    self.advance();
                    self.advance();
                    return;
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }

    fn lex_identifier(&mut self, line: usize, column: usize) -> Token {
        let mut raw = String::new();
        if self.peek() == Some('$') {
            // `$` stands alone: the loop iterator reference
            raw.push('$');
            self.advance();
            return Token::new(TokenKind::Identifier, raw.clone(), raw, line, column);
        }
        while let Some(c) = self.peek() {
            if is_identifier_char(c) {
                raw.push(c);
                self.advance();
            } else {
                break;
            }
        }

        // `::` joins two identifiers into a single scoped token
        if self.peek() == Some(':')
            && self.peek_at(1) == Some(':')
            && self.peek_at(2).map(is_identifier_start).unwrap_or(false)
        {
            self.advance();
            self.advance();
            let mut name = String::new();
            while let Some(c) = self.peek() {
                if is_identifier_char(c) {
                    name.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            let joined = format!("{}::{}", raw, name);
            return Token::new(TokenKind::ScopedIdentifier, joined.clone(), joined, line, column);
        }

        let kind = if KEYWORDS.contains(&raw.as_str()) {
            TokenKind::Keyword
        } else {
            TokenKind::Identifier
        };
        Token::new(kind, raw.clone(), raw, line, column)
    }

    fn lex_number(&mut self, line: usize, column: usize) -> Result<Token, Diagnostic> {
        let mut raw = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                raw.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') && self.peek_at(1).map(|c| c.is_ascii_digit()).unwrap_or(false) {
            raw.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    raw.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        } else if !raw.contains('.') && raw.parse::<i64>().is_err() {
            // integer literal out of 64-bit range
            return Err(Diagnostic::error(
                DiagnosticKind::Lexical,
                format!("integer literal '{}' out of range", raw),
                &self.filename,
                line,
                column,
            ));
        }
        Ok(Token::new(TokenKind::Number, raw.clone(), raw, line, column))
    }

    fn lex_string(&mut self, line: usize, column: usize) -> Result<Token, Diagnostic> {
        let mut raw = String::from('"');
        let mut text = String::new();
        self.advance(); // opening quote
        loop {
            match self.peek() {
                None | Some('\n') => {
                    return Err(Diagnostic::error(
                        DiagnosticKind::Lexical,
                        "unterminated string literal".to_string(),
                        &self.filename,
                        line,
                        column,
                    ));
                }
                Some('"') => {
                    raw.push('"');
                    self.advance();
                    return Ok(Token::new(TokenKind::StringLiteral, text, raw, line, column));
                }
                Some('\\') => {
                    raw.push('\\');
                    self.advance();
                    match self.peek() {
                        None | Some('\n') => {
                            return Err(Diagnostic::error(
                                DiagnosticKind::Lexical,
                                "unterminated string literal".to_string(),
                                &self.filename,
                                line,
                                column,
                            ));
                        }
                        Some(esc) => {
                            raw.push(esc);
                            self.advance();
                            text.push(match esc {
                                'n' => '\n',
                                'r' => '\r',
                                't' => '\t',
                                '\\' => '\\',
                                '"' => '"',
                                '0' => '\0',
                                // any other backslash pair passes the
                                // escaped character through
                                other => other,
                            });
                        }
                    }
                }
                Some(c) => {
                    raw.push(c);
                    text.push(c);
                    self.advance();
                }
            }
        }
    }

    fn lex_operator(&mut self, line: usize, column: usize) -> Option<Token> {
        let c = self.peek()?;
        let two: Option<String> = self.peek_at(1).map(|n| {
            let mut s = String::new();
            s.push(c);
            s.push(n);
            s
        });
        if let Some(pair) = two {
            if matches!(pair.as_str(), "==" | "!=" | "<=" | ">=" | "--") {
                self.advance();
                self.advance();
                return Some(Token::new(TokenKind::Operator, pair.clone(), pair, line, column));
            }
        }
        if "(){},@&!?+-*/%=<>:.".contains(c) {
            self.advance();
            let s = c.to_string();
            return Some(Token::new(TokenKind::Operator, s.clone(), s, line, column));
        }
        None
    }
}

/// Convenience wrapper used by the driver's `--dump-tokens`.
pub fn dump_tokens(source: &str, filename: &str) -> String {
    let (tokens, _) = Lexer::new(source, filename).tokenize();
    let mut out = String::new();
    for tok in &tokens {
        out.push_str(&format!(
            "{}:{}:{} {:?} {:?}\n",
            filename, tok.line, tok.column, tok.kind, tok.text
        ));
    }
    out
}
