//! Function Splitting
//!
//! Compiler pass that partitions the token sequence into per-function token
//! ranges and `extern` declarations, checking structural well-formedness
//! (balanced braces, parsable signatures, unique names).

use std::collections::HashSet;
use std::fmt;

use crate::Context;
use crate::compiler::lexer::{Keyword, Token, TokenType};
use crate::compiler::parser::types::{Param, Signature, ValueType};
use crate::diagnostics::{Checked, LogEntry};

/// Tokens of one function definition, from return type to closing brace.
#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    pub signature: Signature,
    tokens: Vec<Token>,
    /// Index of the first body token (after `{`) in the unstripped tokens.
    body_start: usize,
    /// Header (through `{`) and closing `}` removed by
    /// `remove_start_and_end`.
    wrapper: Option<(Vec<Token>, Token)>,
}

impl FunctionDefinition {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.signature.name
    }

    /// Current tokens: the whole definition, or only the body once stripped.
    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    #[must_use]
    pub const fn is_stripped(&self) -> bool {
        self.wrapper.is_some()
    }

    /// Strips the signature header and the outermost braces, leaving the
    /// body statements. Calling it again has no effect.
    pub fn remove_start_and_end(&mut self) {
        if self.wrapper.is_some() {
            return;
        }

        let mut body = std::mem::take(&mut self.tokens);
        let Some(close) = body.pop() else {
            return;
        };
        let header = body.drain(..self.body_start).collect();

        self.tokens = body;
        self.wrapper = Some((header, close));
    }

    /// Returns the original token sequence, undoing `remove_start_and_end`.
    #[must_use]
    pub fn rewrap(&self) -> Vec<Token> {
        match &self.wrapper {
            None => self.tokens.clone(),
            Some((header, close)) => header
                .iter()
                .chain(&self.tokens)
                .chain(std::iter::once(close))
                .cloned()
                .collect(),
        }
    }

    /// Consumes the definition, returning its current tokens.
    #[must_use]
    pub fn into_tokens(self) -> Vec<Token> {
        self.tokens
    }
}

impl fmt::Display for FunctionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} tokens]", self.signature, self.tokens.len())
    }
}

/// Top-level items of a source file.
#[derive(Debug, Default)]
pub struct SplitProgram {
    /// Function definitions in source order.
    pub functions: Vec<FunctionDefinition>,
    /// `extern` declarations in source order.
    pub externs: Vec<Signature>,
}

/// Splits `tokens` into function definitions and `extern` declarations.
///
/// Errors are accumulated: after a malformed item the scan resumes at the
/// next top-level item, so every structural problem in the file is reported.
#[must_use]
pub fn split_functions(ctx: &Context<'_>, tokens: &[Token]) -> Checked<SplitProgram> {
    let mut splitter = Splitter {
        ctx,
        tokens,
        pos: 0,
        names: HashSet::new(),
        program: SplitProgram::default(),
        diagnostics: Vec::new(),
    };

    splitter.run();

    Checked::new(splitter.program, splitter.diagnostics)
}

struct Splitter<'a> {
    ctx: &'a Context<'a>,
    tokens: &'a [Token],
    pos: usize,
    names: HashSet<String>,
    program: SplitProgram,
    diagnostics: Vec<LogEntry>,
}

impl<'a> Splitter<'a> {
    fn run(&mut self) {
        while let Some(ty) = self.ty(self.pos) {
            match ty {
                TokenType::Keyword(Keyword::Extern) => self.extern_decl(),
                TokenType::Keyword(k) if k.value_type().is_some() => self.definition(),
                TokenType::BraceClose => {
                    self.error(self.pos, "unmatched '}'");
                    self.pos += 1;
                }
                ty => {
                    let msg = format!("expected function definition or declaration, found {ty}");
                    self.error(self.pos, msg);
                    self.pos += 1;
                    self.resync();
                }
            }
        }
    }

    /// `type IDENT ( params ) { ... }`
    fn definition(&mut self) {
        let start = self.pos;

        let Some(signature) = self.header(false) else {
            self.resync();
            return;
        };

        if self.ty(self.pos) != Some(&TokenType::BraceOpen) {
            let msg = format!("expected '{{' after signature of '{}'", signature.name);
            self.error(self.pos, msg);
            self.resync();
            return;
        }

        let open = self.pos;
        let Some(close) = self.matching_brace(open) else {
            self.error(open, "unmatched '{'");
            self.pos = self.tokens.len();
            return;
        };

        self.pos = close + 1;

        if close == open + 1 {
            let msg = format!("function '{}' has an empty body", signature.name);
            self.error(open, msg);
            return;
        }

        if !self.names.insert(signature.name.clone()) {
            let msg = format!("redefinition of '{}'", signature.name);
            self.error(start + 1, msg);
            return;
        }

        self.program.functions.push(FunctionDefinition {
            signature,
            tokens: self.tokens[start..=close].to_vec(),
            body_start: open + 1 - start,
            wrapper: None,
        });
    }

    /// `extern type IDENT ( params ) ;`
    fn extern_decl(&mut self) {
        let start = self.pos;
        self.pos += 1;

        let Some(mut signature) = self.header(true) else {
            self.resync();
            return;
        };

        if self.ty(self.pos) == Some(&TokenType::Semicolon) {
            self.pos += 1;
        } else {
            self.error(self.pos, "expected ';' after extern declaration");
            self.resync();
            return;
        }

        if !self.names.insert(signature.name.clone()) {
            let msg = format!("redefinition of '{}'", signature.name);
            self.error(start + 2, msg);
            return;
        }

        signature.external = true;
        self.program.externs.push(signature);
    }

    /// Parses `type IDENT ( params )`, leaving the cursor after `)`.
    fn header(&mut self, external: bool) -> Option<Signature> {
        let ret = match self.ty(self.pos) {
            Some(TokenType::Keyword(k)) => k.value_type(),
            _ => None,
        };

        let Some(ret) = ret else {
            self.error(self.pos, "expected return type");
            return None;
        };

        self.pos += 1;

        if ret == ValueType::Str {
            self.error(self.pos - 1, "functions cannot return 'string'");
            return None;
        }

        let Some(TokenType::Ident(name)) = self.ty(self.pos).cloned() else {
            self.error(self.pos, "expected function name after return type");
            return None;
        };

        self.pos += 1;

        if self.ty(self.pos) != Some(&TokenType::ParenOpen) {
            self.error(self.pos, format!("expected '(' after function name '{name}'"));
            return None;
        }

        self.pos += 1;

        let (params, variadic) = self.params(&name, external)?;

        Some(Signature {
            name,
            params,
            ret,
            variadic,
            external,
        })
    }

    /// Parses a parameter list after `(`, leaving the cursor after `)`.
    fn params(&mut self, name: &str, external: bool) -> Option<(Vec<Param>, bool)> {
        let mut params: Vec<Param> = Vec::new();

        if self.eat(&TokenType::ParenClose) {
            return Some((params, false));
        }

        if self.ty(self.pos) == Some(&TokenType::Keyword(Keyword::Void))
            && self.ty(self.pos + 1) == Some(&TokenType::ParenClose)
        {
            self.pos += 2;
            return Some((params, false));
        }

        loop {
            if self.ty(self.pos) == Some(&TokenType::Ellipsis) {
                if !external {
                    self.error(
                        self.pos,
                        "variadic parameters are only allowed on 'extern' declarations",
                    );
                    return None;
                }

                self.pos += 1;

                if !self.eat(&TokenType::ParenClose) {
                    self.error(self.pos, "expected ')' after '...'");
                    return None;
                }

                return Some((params, true));
            }

            let ty = match self.ty(self.pos) {
                Some(TokenType::Keyword(k)) => k.value_type(),
                _ => None,
            };

            let Some(ty) = ty.filter(|ty| *ty != ValueType::Void) else {
                self.error(self.pos, format!("malformed parameter list for '{name}'"));
                return None;
            };

            if ty == ValueType::Str && !external {
                self.error(
                    self.pos,
                    "'string' parameters are only allowed on 'extern' declarations",
                );
                return None;
            }

            self.pos += 1;

            let Some(TokenType::Ident(param)) = self.ty(self.pos).cloned() else {
                self.error(self.pos, format!("expected parameter name in '{name}'"));
                return None;
            };

            if params.iter().any(|p| p.name == param) {
                self.error(self.pos, format!("duplicate parameter '{param}'"));
                return None;
            }

            self.pos += 1;
            params.push(Param { name: param, ty });

            if self.eat(&TokenType::ParenClose) {
                return Some((params, false));
            }

            if !self.eat(&TokenType::Comma) {
                self.error(self.pos, format!("malformed parameter list for '{name}'"));
                return None;
            }
        }
    }

    /// Skips to the start of the next top-level item, stepping over any
    /// balanced `{ ... }` region on the way.
    fn resync(&mut self) {
        while let Some(ty) = self.ty(self.pos) {
            match ty {
                TokenType::Keyword(Keyword::Extern) => return,
                TokenType::Keyword(k) if k.value_type().is_some() => return,
                TokenType::BraceOpen => {
                    if let Some(close) = self.matching_brace(self.pos) {
                        self.pos = close + 1;
                    } else {
                        self.error(self.pos, "unmatched '{'");
                        self.pos = self.tokens.len();
                    }
                }
                _ => self.pos += 1,
            }
        }
    }

    /// Returns the index of the `}` closing the `{` at `open`.
    fn matching_brace(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;

        for (i, token) in self.tokens.iter().enumerate().skip(open) {
            match token.ty {
                TokenType::BraceOpen => depth += 1,
                TokenType::BraceClose => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                _ => {}
            }
        }

        None
    }

    fn eat(&mut self, expected: &TokenType) -> bool {
        if self.ty(self.pos) == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn ty(&self, idx: usize) -> Option<&'a TokenType> {
        let tokens: &'a [Token] = self.tokens;
        tokens.get(idx).map(|t| &t.ty)
    }

    /// Records an error at token `idx` (the last token if `idx` is past the
    /// end).
    fn error(&mut self, idx: usize, msg: impl fmt::Display) {
        let tokens: &'a [Token] = self.tokens;
        let Some(token) = tokens.get(idx).or_else(|| tokens.last()) else {
            return;
        };

        let entry = LogEntry::error(token.error(self.ctx, msg));
        self.diagnostics.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::tokenize;
    use std::path::Path;

    fn split(src: &str) -> Checked<SplitProgram> {
        let ctx = Context {
            in_path: Path::new("test.ql"),
            src,
        };
        let tokens = tokenize(&ctx, false).expect("source should tokenize").tokens;
        split_functions(&ctx, &tokens)
    }

    fn texts(tokens: &[Token]) -> Vec<&str> {
        tokens.iter().map(|t| t.text.as_str()).collect()
    }

    #[test]
    fn split_two_functions() {
        let checked = split(
            "int add(int a, int b) { return a + b; }\nfloat half(float x) { return x / 2.0; }",
        );

        assert!(checked.is_ok());

        let names: Vec<_> = checked.value.functions.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["add", "half"]);

        let add = &checked.value.functions[0].signature;
        assert_eq!(add.params.len(), 2);
        assert_eq!(add.ret, ValueType::Int);
        assert!(!add.external);
    }

    #[test]
    fn split_strip_and_rewrap() {
        let mut checked = split("int main(void) { int x = 1; { x = 2; } return x; }");
        let func = &mut checked.value.functions[0];
        let original = func.tokens().to_vec();

        func.remove_start_and_end();
        assert!(func.is_stripped());
        assert_eq!(
            texts(func.tokens()),
            vec![
                "int", "x", "=", "1", ";", "{", "x", "=", "2", ";", "}", "return", "x", ";"
            ]
        );

        func.remove_start_and_end();
        assert_eq!(func.tokens().len(), 14);

        assert!(func.rewrap() == original);
    }

    #[test]
    fn split_extern_declarations() {
        let checked = split(
            "extern int printf(string fmt, ...);\nextern void exit(int code);\nint main() { return 0; }",
        );

        assert!(checked.is_ok());

        let externs = &checked.value.externs;
        assert_eq!(externs.len(), 2);
        assert!(externs[0].variadic && externs[0].external);
        assert_eq!(externs[0].params[0].ty, ValueType::Str);
        assert_eq!(externs[1].ret, ValueType::Void);
        assert_eq!(checked.value.functions.len(), 1);
    }

    #[test]
    fn split_errors_accumulate() {
        let checked = split(
            "int f() {}\nint g(int) { return 1; }\nint h() { return 2; }\n}",
        );

        assert!(!checked.is_ok());
        assert_eq!(checked.error_count(), 3);
        assert!(checked.diagnostics[0].message.contains("empty body"));
        assert!(checked.diagnostics[1].message.contains("expected parameter name"));
        assert!(checked.diagnostics[2].message.contains("unmatched '}'"));

        let names: Vec<_> = checked.value.functions.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["h"]);
    }

    #[test]
    fn split_invalid_duplicate_name() {
        let checked = split("int f() { return 1; }\nfloat f() { return 2.0; }");

        assert_eq!(checked.error_count(), 1);
        assert!(checked.diagnostics[0].message.contains("redefinition of 'f'"));
        assert_eq!(checked.value.functions.len(), 1);
    }

    #[test]
    fn split_invalid_unmatched_open_brace() {
        let checked = split("int main() { if (1) { return 0; }");

        assert_eq!(checked.error_count(), 1);
        assert!(checked.diagnostics[0].message.contains("unmatched '{'"));
        assert!(checked.value.functions.is_empty());
    }

    #[test]
    fn split_invalid_stray_tokens() {
        let checked = split("x = 3;\nint main() { return 0; }");

        assert_eq!(checked.error_count(), 1);
        assert_eq!(checked.value.functions.len(), 1);
    }

    #[test]
    fn split_invalid_variadic_definition() {
        let checked = split("int f(int a, ...) { return a; }");

        assert!(!checked.is_ok());
        assert!(checked.value.functions.is_empty());
    }
}
