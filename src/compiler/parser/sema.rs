//! Syntax Analysis
//!
//! Compiler pass that validates the body tokens of one function before they
//! are converted to postfix. The whole body is scanned: after an error the
//! analyzer resynchronizes at the next statement so every problem is reported
//! in a single run.

use std::fmt;

use super::symbols::{DefinedFunctionTable, VariableList};
use super::types::{Signature, ValueType};
use crate::Context;
use crate::compiler::lexer::{Keyword, OperatorKind, Token, TokenType};
use crate::diagnostics::{Checked, LogEntry};

/// Kind of value an expression produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExprKind {
    Value(ValueType),
    /// Result of calling a `void` function.
    Void,
    /// String literal.
    Str,
}

/// An error has been recorded and the current statement must be abandoned.
#[derive(Debug)]
struct Reported;

type Step<T> = std::result::Result<T, Reported>;

/// Validates the (stripped) body of `current`.
///
/// `vars` must be seeded with the function's parameters and receives every
/// local declaration. `defined` holds the functions defined or declared
/// before `current`; `current` itself may be called recursively.
///
/// With `permissive` set, no checks are performed: the tokens are passed
/// through unchanged with a warning.
#[must_use]
pub fn analyze_function(
    ctx: &Context<'_>,
    body: Vec<Token>,
    vars: &mut VariableList,
    defined: &DefinedFunctionTable,
    current: &Signature,
    permissive: bool,
) -> Checked<Vec<Token>> {
    if permissive {
        let warning = LogEntry::warning(format!(
            "syntax analysis of '{}' skipped (permissive mode)",
            current.name
        ));
        return Checked::new(body, vec![warning]);
    }

    let mut analyzer = Analyzer {
        ctx,
        tokens: &body,
        pos: 0,
        vars,
        defined,
        current,
        diagnostics: Vec::new(),
    };

    analyzer.run();
    let diagnostics = analyzer.diagnostics;

    Checked::new(body, diagnostics)
}

struct Analyzer<'a> {
    ctx: &'a Context<'a>,
    tokens: &'a [Token],
    pos: usize,
    vars: &'a mut VariableList,
    defined: &'a DefinedFunctionTable,
    current: &'a Signature,
    diagnostics: Vec<LogEntry>,
}

impl<'a> Analyzer<'a> {
    fn run(&mut self) {
        while self.pos < self.tokens.len() {
            self.statement();
        }
    }

    fn statement(&mut self) {
        if self.try_statement().is_err() {
            self.synchronize();
        }
    }

    fn try_statement(&mut self) -> Step<()> {
        let Some(token) = self.peek() else {
            return Ok(());
        };

        match &token.ty {
            TokenType::Keyword(Keyword::Int | Keyword::Float) => self.declaration(),
            TokenType::Keyword(Keyword::Return) => self.return_stmt(),
            TokenType::Keyword(Keyword::If) => self.if_stmt(),
            TokenType::Keyword(Keyword::While) => self.while_stmt(),
            TokenType::Keyword(Keyword::Else) => {
                Err(self.error_at(token, "'else' without a previous 'if'"))
            }
            TokenType::Keyword(_) => {
                Err(self.error_at(token, format!("unexpected keyword '{}'", token.text)))
            }
            TokenType::BraceOpen => self.block(),
            TokenType::BraceClose => {
                self.pos += 1;
                Err(self.error_at(token, "unmatched '}'"))
            }
            TokenType::Semicolon => Err(self.error_at(token, "expected statement before ';'")),
            _ => self.expr_statement(),
        }
    }

    /// Skips past the next `;`, or up to the next `{`/`}`, always making
    /// progress.
    fn synchronize(&mut self) {
        let start = self.pos;

        while let Some(token) = self.peek() {
            match token.ty {
                TokenType::Semicolon => {
                    self.pos += 1;
                    return;
                }
                TokenType::BraceOpen | TokenType::BraceClose if self.pos > start => return,
                _ => self.pos += 1,
            }
        }
    }

    /// `{ stmt* }`
    fn block(&mut self) -> Step<()> {
        self.expect(&TokenType::BraceOpen, "expected '{'")?;

        loop {
            match self.peek().map(|t| &t.ty) {
                None => return Err(self.error_here("expected '}' before end of function")),
                Some(TokenType::BraceClose) => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(_) => self.statement(),
            }
        }
    }

    /// `('int' | 'float') IDENT [ '=' expr ] ';'`
    fn declaration(&mut self) -> Step<()> {
        let ty_token = self.advance();
        let ty = match ty_token.ty {
            TokenType::Keyword(Keyword::Float) => ValueType::Float,
            _ => ValueType::Int,
        };

        let Some(name) = self.peek().filter(|t| matches!(t.ty, TokenType::Ident(_))) else {
            let msg = format!("expected identifier after '{}'", ty_token.text);
            return Err(self.error_here(msg));
        };

        self.pos += 1;

        if self.peek_is(&TokenType::Operator(OperatorKind::Assign)) {
            self.pos += 1;
            let start = self.peek();
            let init = self.expression()?;
            self.require_value(init, start);
        }

        if !self.vars.declare(&name.text, ty) {
            self.error_at(name, format!("redeclaration of '{}'", name.text));
        }

        self.expect(&TokenType::Semicolon, "expected ';' after declaration")?;

        Ok(())
    }

    /// `'return' [ expr ] ';'`
    fn return_stmt(&mut self) -> Step<()> {
        let ret_token = self.advance();
        let ret = self.current.ret;

        if self.peek_is(&TokenType::Semicolon) {
            if ret != ValueType::Void {
                let msg = format!("'return' with no value, in function returning '{ret}'");
                self.error_at(ret_token, msg);
            }

            self.pos += 1;
            return Ok(());
        }

        let start = self.peek();
        let value = self.expression()?;

        if ret == ValueType::Void {
            self.error_at(ret_token, "'return' with a value, in function returning 'void'");
        } else {
            self.require_value(value, start);
        }

        self.expect(&TokenType::Semicolon, "expected ';' after return value")?;

        Ok(())
    }

    /// `'if' '(' expr ')' block [ 'else' ( block | if ) ]`
    fn if_stmt(&mut self) -> Step<()> {
        self.pos += 1;
        self.condition("if")?;
        self.block()?;

        if !self.peek_is(&TokenType::Keyword(Keyword::Else)) {
            return Ok(());
        }

        self.pos += 1;

        match self.peek().map(|t| &t.ty) {
            Some(TokenType::Keyword(Keyword::If)) => self.if_stmt(),
            Some(TokenType::BraceOpen) => self.block(),
            _ => Err(self.error_here("expected '{' or 'if' after 'else'")),
        }
    }

    /// `'while' '(' expr ')' block`
    fn while_stmt(&mut self) -> Step<()> {
        self.pos += 1;
        self.condition("while")?;
        self.block()
    }

    fn condition(&mut self, keyword: &str) -> Step<()> {
        self.expect(&TokenType::ParenOpen, format!("expected '(' after '{keyword}'"))?;

        let start = self.peek();
        let cond = self.expression()?;
        self.require_value(cond, start);

        self.expect(&TokenType::ParenClose, "expected ')' after condition")?;

        Ok(())
    }

    /// `expr ';'`
    fn expr_statement(&mut self) -> Step<()> {
        let start = self.peek();
        let kind = self.expression()?;

        if kind == ExprKind::Str
            && let Some(start) = start
        {
            self.error_at(start, "string literal is only allowed as a call argument");
        }

        self.expect(&TokenType::Semicolon, "expected ';' after expression")?;

        Ok(())
    }

    /// `IDENT '=' expr | binary`
    fn expression(&mut self) -> Step<ExprKind> {
        if let (Some(target), Some(next)) = (self.peek_at(0), self.peek_at(1))
            && matches!(target.ty, TokenType::Ident(_))
            && next.ty == TokenType::Operator(OperatorKind::Assign)
        {
            self.pos += 2;

            let ty = self.lookup_var(target);
            let start = self.peek();
            let value = self.expression()?;
            self.require_value(value, start);

            return Ok(ExprKind::Value(ty.unwrap_or(ValueType::Int)));
        }

        let kind = self.binary(0)?;

        if self.peek_is(&TokenType::Operator(OperatorKind::Assign)) {
            return Err(self.error_here("lvalue required as left operand of assignment"));
        }

        Ok(kind)
    }

    /// Precedence climbing over binary operators with at least `min_prec`.
    fn binary(&mut self, min_prec: u8) -> Step<ExprKind> {
        let mut lhs = self.unary()?;

        while let Some(token) = self.peek()
            && let TokenType::Operator(op) = token.ty
            && op.is_binary()
            && op.precedence() >= min_prec
        {
            self.pos += 1;
            let rhs = self.binary(op.precedence() + 1)?;
            lhs = self.check_binary(op, token, lhs, rhs);
        }

        Ok(lhs)
    }

    fn check_binary(
        &mut self,
        op: OperatorKind,
        token: &Token,
        lhs: ExprKind,
        rhs: ExprKind,
    ) -> ExprKind {
        let (ExprKind::Value(lt), ExprKind::Value(rt)) = (lhs, rhs) else {
            let msg = if lhs == ExprKind::Void || rhs == ExprKind::Void {
                "void value not ignored as it ought to be".to_string()
            } else {
                format!("invalid operands to binary {op:?} (string literal)")
            };
            self.error_at(token, msg);
            return ExprKind::Value(ValueType::Int);
        };

        let common = lt.common(rt);

        if op == OperatorKind::Remainder && common == ValueType::Float {
            self.error_at(token, "invalid operands to binary % (have 'float')");
        }

        match op {
            OperatorKind::Plus
            | OperatorKind::Minus
            | OperatorKind::Asterisk
            | OperatorKind::Division
            | OperatorKind::Remainder => ExprKind::Value(common),
            _ => ExprKind::Value(ValueType::Int),
        }
    }

    /// `('-' | '!') unary | primary`
    fn unary(&mut self) -> Step<ExprKind> {
        if let Some(token) = self.peek()
            && let TokenType::Operator(op @ (OperatorKind::Negate | OperatorKind::LogNot)) =
                token.ty
        {
            self.pos += 1;

            return Ok(match self.unary()? {
                ExprKind::Value(_) if op == OperatorKind::LogNot => ExprKind::Value(ValueType::Int),
                ExprKind::Value(ty) => ExprKind::Value(ty),
                _ => {
                    self.error_at(token, format!("invalid operand to unary '{op:?}'"));
                    ExprKind::Value(ValueType::Int)
                }
            });
        }

        self.primary()
    }

    fn primary(&mut self) -> Step<ExprKind> {
        let Some(token) = self.peek() else {
            return Err(self.error_here("expected expression before end of function"));
        };

        match &token.ty {
            TokenType::IntLiteral(_) | TokenType::CharLiteral(_) => {
                self.pos += 1;
                Ok(ExprKind::Value(ValueType::Int))
            }
            TokenType::FloatLiteral(_) => {
                self.pos += 1;
                Ok(ExprKind::Value(ValueType::Float))
            }
            TokenType::StrLiteral(_) => {
                self.pos += 1;
                Ok(ExprKind::Str)
            }
            TokenType::Ident(_) if self.peek_at(1).map(|t| &t.ty) == Some(&TokenType::ParenOpen) => {
                self.call(token)
            }
            TokenType::Ident(_) => {
                self.pos += 1;
                let ty = self.lookup_var(token);
                Ok(ExprKind::Value(ty.unwrap_or(ValueType::Int)))
            }
            TokenType::ParenOpen => {
                self.pos += 1;
                let kind = self.expression()?;
                self.expect(&TokenType::ParenClose, "expected ')'")?;
                Ok(kind)
            }
            ty => Err(self.error_at(token, format!("expected expression before {ty}"))),
        }
    }

    /// `IDENT '(' [ expr { ',' expr } ] ')'`
    fn call(&mut self, name: &'a Token) -> Step<ExprKind> {
        self.pos += 2;

        let defined: &'a DefinedFunctionTable = self.defined;
        let sig = if name.text == self.current.name {
            Some(self.current)
        } else {
            defined.get(&name.text)
        };

        if sig.is_none() {
            let msg = format!(
                "call to undefined function '{}' (functions must be declared before use)",
                name.text
            );
            self.error_at(name, msg);
        }

        let mut args = Vec::new();

        if self.peek_is(&TokenType::ParenClose) {
            self.pos += 1;
        } else {
            loop {
                let start = self.peek();
                let kind = self.expression()?;
                args.push((kind, start));

                if self.peek_is(&TokenType::ParenClose) {
                    self.pos += 1;
                    break;
                }

                self.expect(&TokenType::Comma, "expected ',' or ')' in argument list")?;
            }
        }

        let Some(sig) = sig else {
            return Ok(ExprKind::Value(ValueType::Int));
        };

        if !sig.accepts_arity(args.len()) {
            let expected = if sig.variadic {
                format!("at least {}", sig.params.len())
            } else {
                sig.params.len().to_string()
            };
            let msg = format!(
                "wrong number of arguments to function '{}' (expected {expected}, have {})",
                sig.name,
                args.len()
            );
            self.error_at(name, msg);
        }

        for (i, (kind, start)) in args.into_iter().enumerate() {
            let msg = match (sig.param_type(i), kind) {
                (Some(ValueType::Str) | None, ExprKind::Str) => continue,
                (Some(ValueType::Str), _) => {
                    format!("argument {} of '{}' must be a string literal", i + 1, sig.name)
                }
                (_, ExprKind::Str) => format!(
                    "string literal passed to non-string parameter {} of '{}'",
                    i + 1,
                    sig.name
                ),
                (_, ExprKind::Void) => "void value not ignored as it ought to be".to_string(),
                _ => continue,
            };

            let token = start.unwrap_or(name);
            self.error_at(token, msg);
        }

        Ok(match sig.ret {
            ValueType::Void => ExprKind::Void,
            ty => ExprKind::Value(ty),
        })
    }

    /// Records an error if `kind` is not a numeric value.
    fn require_value(&mut self, kind: ExprKind, start: Option<&'a Token>) {
        let msg = match kind {
            ExprKind::Value(_) => return,
            ExprKind::Void => "void value not ignored as it ought to be",
            ExprKind::Str => "string literal is only allowed as a call argument",
        };

        match start {
            Some(token) => {
                self.error_at(token, msg);
            }
            None => {
                self.error_here(msg);
            }
        }
    }

    /// Returns the type of the variable named by `token`, recording an error
    /// if it has not been declared.
    fn lookup_var(&mut self, token: &'a Token) -> Option<ValueType> {
        let ty = self.vars.get(&token.text);

        if ty.is_none() {
            let msg = if token.text == self.current.name || self.defined.contains(&token.text) {
                format!("'{}' is a function, not a variable", token.text)
            } else {
                format!("'{}' undeclared (first use in this function)", token.text)
            };
            self.error_at(token, msg);
        }

        ty
    }

    fn expect(&mut self, ty: &TokenType, msg: impl fmt::Display) -> Step<&'a Token> {
        match self.peek() {
            Some(token) if token.ty == *ty => {
                self.pos += 1;
                Ok(token)
            }
            _ => Err(self.error_here(msg)),
        }
    }

    fn error_at(&mut self, token: &Token, msg: impl fmt::Display) -> Reported {
        let entry = LogEntry::error(token.error(self.ctx, msg));
        self.diagnostics.push(entry);
        Reported
    }

    /// Records an error at the current token (or the last one at the end of
    /// the body).
    fn error_here(&mut self, msg: impl fmt::Display) -> Reported {
        let tokens: &'a [Token] = self.tokens;

        match tokens.get(self.pos).or_else(|| tokens.last()) {
            Some(token) => self.error_at(token, msg),
            None => {
                let entry = LogEntry::error(format!("in function '{}': {msg}", self.current.name));
                self.diagnostics.push(entry);
                Reported
            }
        }
    }

    fn advance(&mut self) -> &'a Token {
        let tokens: &'a [Token] = self.tokens;
        let token = &tokens[self.pos];
        self.pos += 1;
        token
    }

    fn peek(&self) -> Option<&'a Token> {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> Option<&'a Token> {
        let tokens: &'a [Token] = self.tokens;
        tokens.get(self.pos + n)
    }

    fn peek_is(&self, ty: &TokenType) -> bool {
        self.peek().is_some_and(|t| t.ty == *ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::tokenize;
    use crate::compiler::split::split_functions;
    use crate::diagnostics::Severity;
    use std::path::Path;

    /// Analyzes every function of `src` in order, returning all diagnostics.
    fn analyze(src: &str, permissive: bool) -> Vec<LogEntry> {
        let ctx = Context {
            in_path: Path::new("test.ql"),
            src,
        };
        let tokens = tokenize(&ctx, false).expect("source should tokenize").tokens;
        let split = split_functions(&ctx, &tokens);
        assert!(split.is_ok(), "source should split: {:?}", split.diagnostics);

        let mut defined = DefinedFunctionTable::default();
        for ext in split.value.externs {
            defined.add(ext);
        }

        let mut diagnostics = Vec::new();
        for mut func in split.value.functions {
            func.remove_start_and_end();
            let sig = func.signature.clone();
            let mut vars = VariableList::from_params(&sig.params);
            let checked = analyze_function(
                &ctx,
                func.into_tokens(),
                &mut vars,
                &defined,
                &sig,
                permissive,
            );
            diagnostics.extend(checked.diagnostics);
            defined.add(sig);
        }

        diagnostics
    }

    fn errors(src: &str) -> Vec<String> {
        analyze(src, false)
            .into_iter()
            .filter(|e| e.severity == Severity::Error)
            .map(|e| e.message)
            .collect()
    }

    fn assert_single_error(src: &str, expected: &str) {
        let errors = errors(src);
        assert_eq!(errors.len(), 1, "{errors:#?}");
        assert!(errors[0].contains(expected), "{}", errors[0]);
    }

    #[test]
    fn sema_valid_program() {
        let src = r#"
extern int printf(string fmt, ...);

float average(int a, int b) {
    float sum = a + b;
    return sum / 2;
}

int main() {
    int i = 0;
    float total = 0.0;
    while (i < 10 && !(i == 5)) {
        total = total + average(i, -i * 2);
        i = i + 1;
    }
    if (total > 1.5) {
        printf("%f\n", total);
    } else if (total == 0) {
        printf("zero\n");
    } else {
        i = 'a' % 3;
    }
    return 0;
}
"#;

        assert!(errors(src).is_empty(), "{:#?}", errors(src));
    }

    #[test]
    fn sema_invalid_undeclared_variable() {
        assert_single_error("int main() { x = 1; return 0; }", "'x' undeclared");
    }

    #[test]
    fn sema_invalid_redeclaration() {
        assert_single_error(
            "int main(int a) { int b = 1; float a = 2.0; return b; }",
            "redeclaration of 'a'",
        );
    }

    #[test]
    fn sema_declaration_visible_after_block() {
        assert!(errors("int main() { if (1) { int x = 2; } return x; }").is_empty());
    }

    #[test]
    fn sema_invalid_missing_semicolon() {
        assert_single_error(
            "int main() { int x = 1 return x; }",
            "expected ';' after declaration",
        );
    }

    #[test]
    fn sema_invalid_unbalanced_parens() {
        assert_single_error("int main() { return (1 + 2; }", "expected ')'");
    }

    #[test]
    fn sema_invalid_operator_sequence() {
        assert_single_error("int main() { return 1 + * 2; }", "expected expression");
    }

    #[test]
    fn sema_invalid_assignment_target() {
        assert_single_error("int main() { int x; 1 = x; return 0; }", "lvalue required");
    }

    #[test]
    fn sema_errors_accumulate() {
        let errors = errors("int main() { y = 1; z = 2; return 0 }");
        assert_eq!(errors.len(), 3, "{errors:#?}");
    }

    #[test]
    fn sema_forward_reference_is_rejected() {
        assert_single_error(
            "int a() { return b(); }\nint b() { return 1; }",
            "call to undefined function 'b'",
        );
        assert!(errors("int b() { return 1; }\nint a() { return b(); }").is_empty());
    }

    #[test]
    fn sema_recursion_is_allowed() {
        let src = "int fact(int n) { if (n < 2) { return 1; } return n * fact(n - 1); }";
        assert!(errors(src).is_empty());
    }

    #[test]
    fn sema_invalid_arity() {
        assert_single_error(
            "int add(int a, int b) { return a + b; }\nint main() { return add(1); }",
            "expected 2, have 1",
        );
        assert_single_error(
            "extern int printf(string fmt, ...);\nint main() { printf(); return 0; }",
            "expected at least 1, have 0",
        );
    }

    #[test]
    fn sema_invalid_void_value() {
        assert_single_error(
            "void f() { return; }\nint main() { int x = f(); return x; }",
            "void value not ignored",
        );
        assert!(errors("void f() { return; }\nint main() { f(); return 0; }").is_empty());
    }

    #[test]
    fn sema_invalid_return_mismatch() {
        assert_single_error("int main() { return; }", "'return' with no value");
        assert_single_error("void f() { return 1; }", "'return' with a value");
    }

    #[test]
    fn sema_invalid_string_literals() {
        assert_single_error("int main() { int x = \"a\"; return x; }", "string literal");
        assert_single_error(
            "extern int puts(string s);\nint main() { puts(3); return 0; }",
            "must be a string literal",
        );
        assert_single_error(
            "int f(int a) { return a; }\nint main() { return f(\"x\"); }",
            "string literal passed to non-string parameter",
        );
    }

    #[test]
    fn sema_invalid_float_remainder() {
        assert_single_error("int main() { float f = 2.5; return f % 2; }", "binary %");
    }

    #[test]
    fn sema_invalid_dangling_else() {
        let errors = errors("int main() { else { return 1; } return 0; }");
        assert!(errors[0].contains("'else' without a previous 'if'"));
    }

    #[test]
    fn sema_invalid_if_without_block() {
        assert_single_error("int main() { if (1) return 1; return 0; }", "expected '{'");
    }

    #[test]
    fn sema_permissive_skips_checks() {
        let diagnostics = analyze("int main() { y = 1 +; return; }", true);

        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].severity, Severity::Warning);
    }
}
