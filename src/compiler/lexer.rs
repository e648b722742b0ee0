//! Lexical Analysis
//!
//! Compiler pass that tokenizes a preprocessed _Quill_ source file, producing
//! a sequence of tokens and the list of include directives.

use std::fmt;
use std::ops::Range;

use crate::compiler::parser::types::ValueType;
use crate::{CompileError, Context, Result, fmt_token_err};

/// Reserved words of the _Quill_ language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Int,
    Float,
    Void,
    String,
    If,
    Else,
    While,
    Return,
    Extern,
}

impl Keyword {
    fn from_ident(ident: &str) -> Option<Self> {
        match ident {
            "int" => Some(Keyword::Int),
            "float" => Some(Keyword::Float),
            "void" => Some(Keyword::Void),
            "string" => Some(Keyword::String),
            "if" => Some(Keyword::If),
            "else" => Some(Keyword::Else),
            "while" => Some(Keyword::While),
            "return" => Some(Keyword::Return),
            "extern" => Some(Keyword::Extern),
            _ => None,
        }
    }

    /// Returns the type named by this keyword, if it is a type specifier.
    #[must_use]
    pub const fn value_type(self) -> Option<ValueType> {
        match self {
            Keyword::Int => Some(ValueType::Int),
            Keyword::Float => Some(ValueType::Float),
            Keyword::Void => Some(ValueType::Void),
            Keyword::String => Some(ValueType::Str),
            _ => None,
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Keyword::Int => "int",
            Keyword::Float => "float",
            Keyword::Void => "void",
            Keyword::String => "string",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::While => "while",
            Keyword::Return => "return",
            Keyword::Extern => "extern",
        }
    }
}

/// Types of operators.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    /// `=` assignment operator.
    Assign,
    /// `||` logical OR operator.
    LogOr,
    /// `&&` logical AND operator.
    LogAnd,
    /// `==` equal-to relational operator.
    Eq,
    /// `!=` not-equal relational operator.
    NotEq,
    /// `<` less-than relational operator.
    LessThan,
    /// `<=` less-than-or-equal relational operator.
    LessThanEq,
    /// `>` greater-than relational operator.
    GreaterThan,
    /// `>=` greater-than-or-equal relational operator.
    GreaterThanEq,
    /// `+` addition operator.
    Plus,
    /// `-` subtraction operator.
    Minus,
    /// `*` multiplication operator.
    Asterisk,
    /// `/` division operator.
    Division,
    /// `%` remainder operator.
    Remainder,
    /// `-` negation operator (a `-` where an operand is expected).
    Negate,
    /// `!` logical NOT operator.
    LogNot,
}

impl OperatorKind {
    /// Returns the source text of the operator.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            OperatorKind::Assign => "=",
            OperatorKind::LogOr => "||",
            OperatorKind::LogAnd => "&&",
            OperatorKind::Eq => "==",
            OperatorKind::NotEq => "!=",
            OperatorKind::LessThan => "<",
            OperatorKind::LessThanEq => "<=",
            OperatorKind::GreaterThan => ">",
            OperatorKind::GreaterThanEq => ">=",
            OperatorKind::Plus => "+",
            OperatorKind::Minus | OperatorKind::Negate => "-",
            OperatorKind::Asterisk => "*",
            OperatorKind::Division => "/",
            OperatorKind::Remainder => "%",
            OperatorKind::LogNot => "!",
        }
    }
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorKind::Negate => write!(f, "op(unary '-')"),
            op => write!(f, "op('{}')", op.as_str()),
        }
    }
}

impl fmt::Debug for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Types of lexical elements.
#[derive(Clone, PartialEq)]
#[allow(missing_docs)]
pub enum TokenType {
    Keyword(Keyword),
    Ident(String),
    IntLiteral(i32),
    FloatLiteral(f32),
    CharLiteral(u8),
    /// String literal with escapes already resolved.
    StrLiteral(String),
    Operator(OperatorKind),
    ParenOpen,
    ParenClose,
    BraceOpen,
    BraceClose,
    Comma,
    Semicolon,
    Ellipsis,
    /// `#include` directive naming a module (never part of the main token
    /// sequence).
    Include(String),
}

impl TokenType {
    /// Returns `true` if a token of this type ends an operand, so that a
    /// following `-` is binary subtraction.
    const fn ends_operand(&self) -> bool {
        matches!(
            self,
            TokenType::Ident(_)
                | TokenType::IntLiteral(_)
                | TokenType::FloatLiteral(_)
                | TokenType::CharLiteral(_)
                | TokenType::StrLiteral(_)
                | TokenType::ParenClose
        )
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Keyword(k) => write!(f, "keyword({:?})", k.as_str()),
            TokenType::Ident(i) => write!(f, "ident({i:?})"),
            TokenType::IntLiteral(v) => write!(f, "int(\"{v}\")"),
            TokenType::FloatLiteral(v) => write!(f, "float(\"{v:?}\")"),
            TokenType::CharLiteral(v) => write!(f, "char({:?})", char::from(*v)),
            TokenType::StrLiteral(s) => write!(f, "string({s:?})"),
            TokenType::Operator(op) => fmt::Display::fmt(op, f),
            TokenType::ParenOpen => write!(f, "'('"),
            TokenType::ParenClose => write!(f, "')'"),
            TokenType::BraceOpen => write!(f, "'{{'"),
            TokenType::BraceClose => write!(f, "'}}'"),
            TokenType::Comma => write!(f, "','"),
            TokenType::Semicolon => write!(f, "';'"),
            TokenType::Ellipsis => write!(f, "'...'"),
            TokenType::Include(m) => write!(f, "include({m:?})"),
        }
    }
}

impl fmt::Debug for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Keyword(k) => write!(f, "{}", k.as_str()),
            TokenType::Ident(i) => write!(f, "{i}"),
            TokenType::IntLiteral(v) => write!(f, "{v}"),
            TokenType::FloatLiteral(v) => write!(f, "{v:?}"),
            TokenType::CharLiteral(v) => write!(f, "{:?}", char::from(*v)),
            TokenType::StrLiteral(s) => write!(f, "{s:?}"),
            TokenType::Operator(op) => fmt::Debug::fmt(op, f),
            TokenType::ParenOpen => write!(f, "("),
            TokenType::ParenClose => write!(f, ")"),
            TokenType::BraceOpen => write!(f, "{{"),
            TokenType::BraceClose => write!(f, "}}"),
            TokenType::Comma => write!(f, ","),
            TokenType::Semicolon => write!(f, ";"),
            TokenType::Ellipsis => write!(f, "..."),
            TokenType::Include(m) => write!(f, "#include <{m}>"),
        }
    }
}

/// Location of processed `Token`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Location {
    pub line: usize,
    pub col: usize,
    /// Range of line in source code this token appears.
    pub line_span: Range<usize>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Minimal lexical element.
#[derive(Clone, PartialEq)]
#[allow(missing_docs)]
pub struct Token {
    pub ty: TokenType,
    /// Source text the token was produced from.
    pub text: String,
    pub loc: Location,
}

impl Token {
    /// Formats an error pointing at this token, including its source line.
    #[must_use]
    pub fn error(&self, ctx: &Context<'_>, msg: impl fmt::Display) -> String {
        let line_content = ctx.src.get(self.loc.line_span.clone()).unwrap_or("");

        fmt_token_err!(
            ctx.in_path.display(),
            self.loc.line,
            self.loc.col,
            self.text.len().saturating_sub(1),
            line_content,
            "{msg}"
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t    {}", self.loc, self.ty)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.ty)
    }
}

/// Include directive found in the source (e.g. `#include <io>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Include {
    pub module: String,
    pub loc: Location,
}

/// Result of tokenizing a whole source file.
#[derive(Debug)]
pub struct Tokens {
    pub tokens: Vec<Token>,
    pub includes: Vec<Include>,
    /// Human-readable dump of every token, when requested.
    pub dump: Option<String>,
}

/// Tokenizes the whole of `ctx.src`, separating include directives from the
/// main token sequence.
///
/// # Errors
///
/// Returns an error on the first unrecognized character, unterminated literal
/// or malformed number.
pub fn tokenize(ctx: &Context<'_>, dump: bool) -> Result<Tokens> {
    let mut tokens = Vec::new();
    let mut includes = Vec::new();
    let mut dump_text = dump.then(String::new);

    for token in Lexer::new(ctx) {
        let token = token?;

        if let Some(text) = dump_text.as_mut() {
            text.push_str(&format!("{}:{token}\n", ctx.in_path.display()));
        }

        match token.ty {
            TokenType::Include(module) => includes.push(Include {
                module,
                loc: token.loc,
            }),
            _ => tokens.push(token),
        }
    }

    Ok(Tokens {
        tokens,
        includes,
        dump: dump_text,
    })
}

/// Produces tokens lazily from a _Quill_ source file.
#[derive(Debug)]
pub struct Lexer<'a> {
    ctx: &'a Context<'a>,
    src: &'a [u8],
    cur: usize,
    // Track source code line spans for each token.
    line_end: usize,
    // Index of the beginning of a newline (to calculate the current column and
    // line span).
    bol: usize,
    line: usize,
    // Whether the last token produced ends an operand (decides unary '-').
    after_operand: bool,
    // Whether the last token produced is a unary '-'.
    after_negate: bool,
}

impl<'a> Lexer<'a> {
    /// Returns a new `Lexer`.
    ///
    /// Identifiers and literals are limited to _ASCII_.
    #[must_use]
    pub fn new(ctx: &'a Context<'_>) -> Self {
        let src = ctx.src.as_bytes();
        let line_end = src.iter().position(|&b| b == b'\n').unwrap_or(src.len());

        Self {
            ctx,
            src,
            cur: 0,
            line_end,
            bol: 0,
            line: 1,
            after_operand: false,
            after_negate: false,
        }
    }

    /// Skips over a newline, advancing to the start of the next line.
    fn consume_newline(&mut self) {
        self.cur += 1;
        self.bol = self.cur;
        self.line += 1;
        self.line_end = self.src[self.cur..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(self.src.len(), |i| self.cur + i);
    }

    /// Skips over an identifier or keyword (starting with an ASCII uppercase/
    /// lowercase letter or '_'), producing a `Token`.
    fn consume_ident(&mut self) -> Token {
        let col = self.col();
        let start = self.cur;

        while self.has_next() && (self.first().is_ascii_alphanumeric() || self.first() == b'_') {
            self.cur += 1;
        }

        let text = self.slice(start..self.cur);
        let ty = Keyword::from_ident(text).map_or_else(
            || TokenType::Ident(text.to_string()),
            TokenType::Keyword,
        );

        self.token(ty, start, col)
    }

    /// Skips over an integer or float literal, producing a `Token`.
    fn consume_number(&mut self) -> Result<Token> {
        let col = self.col();
        let start = self.cur;
        let mut is_float = false;

        self.skip_digits();

        if self.has_next() && self.first() == b'.' && self.peek(1) != Some(b'.') {
            is_float = true;
            self.cur += 1;
            self.skip_digits();
        }

        if self.has_next() && matches!(self.first(), b'e' | b'E') {
            let sign = usize::from(matches!(self.peek(1), Some(b'+' | b'-')));

            if self.peek(1 + sign).is_some_and(|b| b.is_ascii_digit()) {
                is_float = true;
                self.cur += 1 + sign;
                self.skip_digits();
            }
        }

        // Identifiers are not allowed to begin with digits.
        if self.has_next() && (self.first().is_ascii_alphanumeric() || self.first() == b'_') {
            let literal_len = self.cur - start;
            let suffix_start = self.cur;

            // Continue consuming the invalid suffix.
            while self.has_next() && (self.first().is_ascii_alphanumeric() || self.first() == b'_')
            {
                self.cur += 1;
            }

            let suffix = self.slice(suffix_start..self.cur);

            return Err(self.error(
                col + literal_len,
                suffix.len() - 1,
                format!("invalid suffix '{suffix}' on numeric literal"),
            ));
        }

        let text = self.slice(start..self.cur);

        if is_float {
            match text.parse::<f32>() {
                Ok(value) if value.is_finite() => {
                    Ok(self.token(TokenType::FloatLiteral(value), start, col))
                }
                _ => Err(self.error(
                    col,
                    text.len() - 1,
                    "floating constant exceeds range of 'float'",
                )),
            }
        } else {
            let value = match text.parse::<i32>() {
                Ok(value) => value,
                // The magnitude of `i32::MIN` is only valid under a unary '-',
                // which wraps it back to `i32::MIN`.
                Err(_) if self.after_negate && text.parse::<i64>() == Ok(1 << 31) => i32::MIN,
                Err(_) => {
                    return Err(self.error(
                        col,
                        text.len() - 1,
                        "integer constant is too large for its type (32-bit signed)",
                    ));
                }
            };

            Ok(self.token(TokenType::IntLiteral(value), start, col))
        }
    }

    /// Skips over a char literal (`'a'`, `'\n'`), producing a `Token`.
    fn consume_char(&mut self) -> Result<Token> {
        let col = self.col();
        let start = self.cur;
        self.cur += 1;

        let value = match self.next_literal_byte(b'\'') {
            Some(Ok(b)) => b,
            Some(Err(msg)) => return Err(self.error(col, self.cur - start - 1, msg)),
            None => return Err(self.error(col, 0, "empty or unterminated character literal")),
        };

        if !self.has_next() || self.first() != b'\'' {
            return Err(self.error(col, 0, "unterminated or multi-character literal"));
        }

        self.cur += 1;

        Ok(self.token(TokenType::CharLiteral(value), start, col))
    }

    /// Skips over a string literal, producing a `Token`.
    fn consume_string(&mut self) -> Result<Token> {
        let col = self.col();
        let start = self.cur;
        self.cur += 1;

        let mut value = Vec::new();

        loop {
            match self.next_literal_byte(b'"') {
                Some(Ok(b)) => value.push(b),
                Some(Err(msg)) => return Err(self.error(col, self.cur - start - 1, msg)),
                None => break,
            }
        }

        if !self.has_next() || self.first() != b'"' {
            return Err(self.error(col, 0, "missing terminating '\"' character"));
        }

        self.cur += 1;

        let value = String::from_utf8_lossy(&value).into_owned();

        Ok(self.token(TokenType::StrLiteral(value), start, col))
    }

    /// Returns the next byte of a literal closed by `quote`, resolving escape
    /// sequences. Returns `None` at the closing quote, a newline or the end of
    /// input (without consuming it).
    fn next_literal_byte(&mut self, quote: u8) -> Option<std::result::Result<u8, String>> {
        if !self.has_next() || self.first() == quote || self.first() == b'\n' {
            return None;
        }

        let b = self.first();
        self.cur += 1;

        if b != b'\\' {
            return Some(Ok(b));
        }

        let Some(escaped) = self.peek(0).filter(|&e| e != b'\n') else {
            return Some(Err("incomplete escape sequence".into()));
        };

        self.cur += 1;

        Some(match escaped {
            b'n' => Ok(b'\n'),
            b't' => Ok(b'\t'),
            b'r' => Ok(b'\r'),
            b'0' => Ok(0),
            b'\\' | b'\'' | b'"' => Ok(escaped),
            other => Err(format!("unknown escape sequence '\\{}'", char::from(other))),
        })
    }

    /// Skips over an `#include <name>` or `#include "name"` directive.
    fn consume_directive(&mut self) -> Result<Token> {
        let col = self.col();
        let start = self.cur;
        self.cur += 1;

        let word_start = self.cur;
        while self.has_next() && self.first().is_ascii_alphabetic() {
            self.cur += 1;
        }

        let directive = self.slice(word_start..self.cur);
        if directive != "include" {
            return Err(self.error(
                col,
                directive.len(),
                format!("invalid preprocessing directive '#{directive}'"),
            ));
        }

        while self.has_next() && matches!(self.first(), b' ' | b'\t') {
            self.cur += 1;
        }

        let close = match self.peek(0) {
            Some(b'<') => b'>',
            Some(b'"') => b'"',
            _ => {
                return Err(self.error(
                    col,
                    self.cur - start - 1,
                    "#include expects \"NAME\" or <NAME>",
                ));
            }
        };

        self.cur += 1;
        let name_start = self.cur;

        while self.has_next() && self.first() != close && self.first() != b'\n' {
            self.cur += 1;
        }

        if !self.has_next() || self.first() != close || self.cur == name_start {
            return Err(self.error(
                col,
                self.cur - start - 1,
                "#include expects \"NAME\" or <NAME>",
            ));
        }

        let module = self.slice(name_start..self.cur).trim().to_string();
        self.cur += 1;

        Ok(self.token(TokenType::Include(module), start, col))
    }

    fn skip_digits(&mut self) {
        while self.has_next() && self.first().is_ascii_digit() {
            self.cur += 1;
        }
    }

    /// Builds a token spanning `start..cur`.
    fn token(&mut self, ty: TokenType, start: usize, col: usize) -> Token {
        self.after_operand = ty.ends_operand();
        self.after_negate = matches!(ty, TokenType::Operator(OperatorKind::Negate));

        Token {
            ty,
            text: self.slice(start..self.cur).to_string(),
            loc: Location {
                line: self.line,
                col,
                line_span: self.bol..self.line_end,
            },
        }
    }

    /// Builds a token for a punctuator/operator of `len` bytes at the cursor.
    fn punct(&mut self, ty: TokenType, len: usize) -> Token {
        let col = self.col();
        let start = self.cur;
        self.cur += len;
        self.token(ty, start, col)
    }

    fn operator(&mut self, op: OperatorKind) -> Token {
        self.punct(TokenType::Operator(op), op.as_str().len())
    }

    /// Formats a lexical error at column `col` of the current line.
    fn error(&self, col: usize, marker_len: usize, msg: impl fmt::Display) -> CompileError {
        CompileError::Lex(fmt_token_err!(
            self.ctx.in_path.display(),
            self.line,
            col,
            marker_len,
            self.slice(self.bol..self.line_end),
            "{msg}"
        ))
    }

    /// Returns the source text for the given byte range, or an empty string if
    /// it does not fall on character boundaries.
    fn slice(&self, range: Range<usize>) -> &'a str {
        self.ctx.src.get(range).unwrap_or("")
    }

    /// Returns the current column in the line.
    #[inline]
    const fn col(&self) -> usize {
        self.cur - self.bol + 1
    }

    /// Returns the byte from `src` at the current cursor position. Does **not**
    /// update the cursor position.
    ///
    /// # Panic
    ///
    /// Will _panic_ if the cursor position is out of bounds.
    #[inline]
    const fn first(&self) -> u8 {
        self.src[self.cur]
    }

    /// Returns the byte `n` positions after the cursor, if any.
    #[inline]
    fn peek(&self, n: usize) -> Option<u8> {
        self.src.get(self.cur + n).copied()
    }

    /// Returns `true` if the cursor position is within bounds of `src`.
    #[inline]
    const fn has_next(&self) -> bool {
        self.cur < self.src.len()
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.has_next() {
            let next = self.peek(1);

            let token = match self.first() {
                b'\n' => {
                    self.consume_newline();
                    continue;
                }
                b if b.is_ascii_whitespace() => {
                    self.cur += 1;
                    continue;
                }
                b'0'..=b'9' => return Some(self.consume_number()),
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => return Some(Ok(self.consume_ident())),
                b'\'' => return Some(self.consume_char()),
                b'"' => return Some(self.consume_string()),
                b'#' => return Some(self.consume_directive()),
                b'-' if self.after_operand => self.operator(OperatorKind::Minus),
                b'-' => self.operator(OperatorKind::Negate),
                b'+' => self.operator(OperatorKind::Plus),
                b'*' => self.operator(OperatorKind::Asterisk),
                b'/' => self.operator(OperatorKind::Division),
                b'%' => self.operator(OperatorKind::Remainder),
                b'&' if next == Some(b'&') => self.operator(OperatorKind::LogAnd),
                b'|' if next == Some(b'|') => self.operator(OperatorKind::LogOr),
                b'<' if next == Some(b'=') => self.operator(OperatorKind::LessThanEq),
                b'<' => self.operator(OperatorKind::LessThan),
                b'>' if next == Some(b'=') => self.operator(OperatorKind::GreaterThanEq),
                b'>' => self.operator(OperatorKind::GreaterThan),
                b'!' if next == Some(b'=') => self.operator(OperatorKind::NotEq),
                b'!' => self.operator(OperatorKind::LogNot),
                b'=' if next == Some(b'=') => self.operator(OperatorKind::Eq),
                b'=' => self.operator(OperatorKind::Assign),
                b'(' => self.punct(TokenType::ParenOpen, 1),
                b')' => self.punct(TokenType::ParenClose, 1),
                b'{' => self.punct(TokenType::BraceOpen, 1),
                b'}' => self.punct(TokenType::BraceClose, 1),
                b',' => self.punct(TokenType::Comma, 1),
                b';' => self.punct(TokenType::Semicolon, 1),
                b'.' if next == Some(b'.') && self.peek(2) == Some(b'.') => {
                    self.punct(TokenType::Ellipsis, 3)
                }
                b => {
                    let col = self.col();
                    self.cur += 1;

                    let stray = if b.is_ascii() {
                        char::from(b).to_string()
                    } else {
                        format!("\\x{b:02x}")
                    };

                    return Some(Err(self.error(col, 0, format!("stray '{stray}' in program"))));
                }
            };

            return Some(Ok(token));
        }

        None
    }
}
