//! Postfix Conversion
//!
//! Compiler pass that reorders the validated body tokens of a function into
//! reverse-Polish order using the shunting-yard algorithm.
//!
//! Statement keywords follow their operands (`x P(e) = int ;`,
//! `P(e) return ;`, `P(c) if { ... } else { ... }`, `P(c) while { ... }`).
//! Grouping parentheses and commas are dropped, while the parentheses of a
//! call are kept to delimit its arguments (`f ( P(a) P(b) )`).

use std::iter::Peekable;
use std::vec::IntoIter;

use crate::compiler::lexer::{Keyword, OperatorKind, Token, TokenType};
use crate::{CompileError, Context, Result};

impl OperatorKind {
    /// Binding strength (higher binds tighter).
    #[must_use]
    pub const fn precedence(self) -> u8 {
        match self {
            OperatorKind::Assign => 0,
            OperatorKind::LogOr => 1,
            OperatorKind::LogAnd => 2,
            OperatorKind::Eq | OperatorKind::NotEq => 3,
            OperatorKind::LessThan
            | OperatorKind::LessThanEq
            | OperatorKind::GreaterThan
            | OperatorKind::GreaterThanEq => 4,
            OperatorKind::Plus | OperatorKind::Minus => 5,
            OperatorKind::Asterisk | OperatorKind::Division | OperatorKind::Remainder => 6,
            OperatorKind::Negate | OperatorKind::LogNot => 7,
        }
    }

    /// Returns `true` for prefix operators (`-x`, `!x`).
    #[must_use]
    pub const fn is_unary(self) -> bool {
        matches!(self, OperatorKind::Negate | OperatorKind::LogNot)
    }

    /// Returns `true` for left-associative binary operators (everything but
    /// assignment).
    #[must_use]
    pub const fn is_binary(self) -> bool {
        !self.is_unary() && !matches!(self, OperatorKind::Assign)
    }

    /// Returns `true` if operators of equal precedence group from the right.
    #[must_use]
    pub const fn is_right_assoc(self) -> bool {
        matches!(
            self,
            OperatorKind::Assign | OperatorKind::Negate | OperatorKind::LogNot
        )
    }
}

/// Entries of the operator stack.
#[derive(Debug)]
enum Pending {
    Operator(Token, OperatorKind),
    /// Grouping `(`, discarded once matched.
    Group(Token),
    /// `(` of a call, already emitted to the output.
    Call(Token),
}

/// Converts the body tokens of one function to postfix order.
///
/// # Errors
///
/// Returns an error if grouping parentheses are unbalanced or a statement is
/// not terminated.
pub fn to_postfix(ctx: &Context<'_>, body: Vec<Token>) -> Result<Vec<Token>> {
    let mut converter = Converter {
        ctx,
        tokens: body.into_iter().peekable(),
        out: Vec::new(),
    };

    while let Some(token) = converter.tokens.next() {
        converter.statement(token)?;
    }

    Ok(converter.out)
}

struct Converter<'a> {
    ctx: &'a Context<'a>,
    tokens: Peekable<IntoIter<Token>>,
    out: Vec<Token>,
}

impl Converter<'_> {
    fn statement(&mut self, token: Token) -> Result<()> {
        match token.ty {
            TokenType::BraceOpen | TokenType::BraceClose | TokenType::Keyword(Keyword::Else) => {
                self.out.push(token);
            }
            TokenType::Keyword(Keyword::Int | Keyword::Float | Keyword::Return) => {
                let (expr, semicolon) = self.take_statement(&token)?;
                self.expression(expr)?;
                self.out.push(token);
                self.out.push(semicolon);
            }
            TokenType::Keyword(Keyword::If | Keyword::While) => {
                let cond = self.take_condition(&token)?;
                self.expression(cond)?;
                self.out.push(token);
            }
            _ => {
                let (mut expr, semicolon) = self.take_statement(&token)?;
                expr.insert(0, token);
                self.expression(expr)?;
                self.out.push(semicolon);
            }
        }

        Ok(())
    }

    /// Takes the tokens up to the next `;`, returning them and the `;`.
    fn take_statement(&mut self, start: &Token) -> Result<(Vec<Token>, Token)> {
        let mut expr = Vec::new();

        while let Some(token) = self.tokens.next() {
            match token.ty {
                TokenType::Semicolon => return Ok((expr, token)),
                TokenType::BraceOpen | TokenType::BraceClose => {
                    return Err(self.error(&token, "expected ';' before brace"));
                }
                _ => expr.push(token),
            }
        }

        Err(self.error(start, "statement is not terminated by ';'"))
    }

    /// Takes the parenthesised condition following `if`/`while`, without the
    /// outer parentheses.
    fn take_condition(&mut self, keyword: &Token) -> Result<Vec<Token>> {
        match self.tokens.next() {
            Some(token) if token.ty == TokenType::ParenOpen => {}
            _ => return Err(self.error(keyword, format!("expected '(' after '{}'", keyword.text))),
        }

        let mut depth = 1usize;
        let mut cond = Vec::new();

        for token in self.tokens.by_ref() {
            match token.ty {
                TokenType::ParenOpen => depth += 1,
                TokenType::ParenClose => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(cond);
                    }
                }
                _ => {}
            }

            cond.push(token);
        }

        Err(self.error(keyword, "unbalanced '(' in condition"))
    }

    /// Shunting-yard over one expression, appending the result to the output.
    fn expression(&mut self, expr: Vec<Token>) -> Result<()> {
        let mut stack: Vec<Pending> = Vec::new();
        let mut tokens = expr.into_iter().peekable();

        while let Some(token) = tokens.next() {
            match token.ty {
                TokenType::Ident(_)
                    if tokens.peek().is_some_and(|t| t.ty == TokenType::ParenOpen) =>
                {
                    self.out.push(token);

                    if let Some(paren) = tokens.next() {
                        self.out.push(paren.clone());
                        stack.push(Pending::Call(paren));
                    }
                }
                TokenType::Ident(_)
                | TokenType::IntLiteral(_)
                | TokenType::FloatLiteral(_)
                | TokenType::CharLiteral(_)
                | TokenType::StrLiteral(_) => self.out.push(token),
                TokenType::ParenOpen => stack.push(Pending::Group(token)),
                TokenType::Comma => loop {
                    match stack.pop() {
                        Some(Pending::Operator(op, _)) => self.out.push(op),
                        Some(call @ Pending::Call(_)) => {
                            stack.push(call);
                            break;
                        }
                        _ => return Err(self.error(&token, "',' outside of an argument list")),
                    }
                },
                TokenType::ParenClose => loop {
                    match stack.pop() {
                        Some(Pending::Operator(op, _)) => self.out.push(op),
                        Some(Pending::Group(_)) => break,
                        Some(Pending::Call(_)) => {
                            self.out.push(token);
                            break;
                        }
                        None => return Err(self.error(&token, "unbalanced ')'")),
                    }
                },
                TokenType::Operator(op) if op.is_unary() => stack.push(Pending::Operator(token, op)),
                TokenType::Operator(op) => {
                    while let Some(Pending::Operator(_, top)) = stack.last() {
                        let top = *top;
                        let pops = top.precedence() > op.precedence()
                            || (top.precedence() == op.precedence() && !op.is_right_assoc());

                        if !pops {
                            break;
                        }

                        if let Some(Pending::Operator(top_token, _)) = stack.pop() {
                            self.out.push(top_token);
                        }
                    }

                    stack.push(Pending::Operator(token, op));
                }
                _ => return Err(self.error(&token, format!("unexpected {} in expression", token.ty))),
            }
        }

        while let Some(pending) = stack.pop() {
            match pending {
                Pending::Operator(token, _) => self.out.push(token),
                Pending::Group(token) | Pending::Call(token) => {
                    return Err(self.error(&token, "unbalanced '('"));
                }
            }
        }

        Ok(())
    }

    fn error(&self, token: &Token, msg: impl std::fmt::Display) -> CompileError {
        CompileError::Postfix(token.error(self.ctx, msg))
    }
}
