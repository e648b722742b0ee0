//! Abstract Syntax Tree
//!
//! Compiler pass that rebuilds a tree from the postfix token sequence of one
//! function. Operands are collected on a build stack; operators, call
//! parentheses and statement keywords pop what they need and push the node
//! they form.

use std::fmt;
use std::iter::Peekable;
use std::vec::IntoIter;

use super::types::ValueType;
use crate::compiler::lexer::{Keyword, OperatorKind, Token, TokenType};
use crate::{CompileError, Result};

/// _AST_ unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    /// `-` unary operator.
    Negate,
    /// `!` unary operator.
    Not,
}

impl fmt::Display for UnaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOperator::Negate => write!(f, "Negate"),
            UnaryOperator::Not => write!(f, "Not"),
        }
    }
}

/// _AST_ binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    /// `+` binary operator.
    Add,
    /// `-` binary operator.
    Subtract,
    /// `*` binary operator.
    Multiply,
    /// `/` binary operator.
    Divide,
    /// `%` binary operator.
    Remainder,
    /// `&&` binary operator.
    LogAnd,
    /// `||` binary operator.
    LogOr,
    /// `==` binary operator.
    Eq,
    /// `!=` binary operator.
    NotEq,
    /// `<` binary operator.
    OrdLess,
    /// `<=` binary operator.
    OrdLessEq,
    /// `>` binary operator.
    OrdGreater,
    /// `>=` binary operator.
    OrdGreaterEq,
}

impl BinaryOperator {
    /// Returns `true` if the operator yields a truth value (`0` or `1`).
    #[must_use]
    pub const fn is_relational(self) -> bool {
        matches!(
            self,
            BinaryOperator::Eq
                | BinaryOperator::NotEq
                | BinaryOperator::OrdLess
                | BinaryOperator::OrdLessEq
                | BinaryOperator::OrdGreater
                | BinaryOperator::OrdGreaterEq
        )
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryOperator::Add => write!(f, "Add"),
            BinaryOperator::Subtract => write!(f, "Sub"),
            BinaryOperator::Multiply => write!(f, "Mul"),
            BinaryOperator::Divide => write!(f, "Div"),
            BinaryOperator::Remainder => write!(f, "Rem"),
            BinaryOperator::LogAnd => write!(f, "And"),
            BinaryOperator::LogOr => write!(f, "Or"),
            BinaryOperator::Eq => write!(f, "Eq"),
            BinaryOperator::NotEq => write!(f, "NotEq"),
            BinaryOperator::OrdLess => write!(f, "Less"),
            BinaryOperator::OrdLessEq => write!(f, "LessEq"),
            BinaryOperator::OrdGreater => write!(f, "Greater"),
            BinaryOperator::OrdGreaterEq => write!(f, "GreaterEq"),
        }
    }
}

/// Kinds of internal (non-leaf) nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Root of a function: its statements in source order.
    Body,
    /// `{ ... }` statements.
    Block,
    /// Expression evaluated for its effects.
    ExprStmt,
    /// `type x` with an optional initializer (`[ident]` or `[ident, init]`).
    Declare(ValueType),
    /// `[value]` or `[]`.
    Return,
    /// `[cond, then]` or `[cond, then, else]`.
    If,
    /// `[cond, body]`.
    While,
    /// `[target, value]`.
    Assign,
    Unary(UnaryOperator),
    Binary(BinaryOperator),
    /// Arguments in order; the node token is the callee.
    Call,
}

/// _AST_ node: a leaf token (literal or identifier) or an internal node.
#[derive(Debug, Clone)]
pub enum AstNode {
    Leaf(Token),
    Internal {
        kind: NodeKind,
        /// Token the node was formed by (`None` for the root).
        token: Option<Token>,
        children: Vec<AstNode>,
    },
}

impl AstNode {
    /// Source line the node originates from.
    #[must_use]
    pub fn line(&self) -> usize {
        match self {
            AstNode::Leaf(token)
            | AstNode::Internal {
                token: Some(token), ..
            } => token.loc.line,
            AstNode::Internal {
                token: None,
                children,
                ..
            } => children.first().map_or(0, AstNode::line),
        }
    }

    #[must_use]
    pub fn children(&self) -> &[AstNode] {
        match self {
            AstNode::Leaf(_) => &[],
            AstNode::Internal { children, .. } => children,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> Option<NodeKind> {
        match self {
            AstNode::Leaf(_) => None,
            AstNode::Internal { kind, .. } => Some(*kind),
        }
    }

    fn internal(kind: NodeKind, token: Token, children: Vec<AstNode>) -> Self {
        AstNode::Internal {
            kind,
            token: Some(token),
            children,
        }
    }

    fn fmt_with_indent(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);

        match self {
            AstNode::Leaf(token) => writeln!(f, "{pad}{:?}", token.ty),
            AstNode::Internal {
                kind,
                token,
                children,
            } => {
                match (kind, token) {
                    (NodeKind::Call, Some(token)) => writeln!(f, "{pad}Call {:?}", token.ty)?,
                    (NodeKind::Unary(op), _) => writeln!(f, "{pad}Unary {op}")?,
                    (NodeKind::Binary(op), _) => writeln!(f, "{pad}Binary {op}")?,
                    (NodeKind::Declare(ty), _) => writeln!(f, "{pad}Declare {ty}")?,
                    (kind, _) => writeln!(f, "{pad}{kind:?}")?,
                }

                for child in children {
                    child.fmt_with_indent(f, indent + 1)?;
                }

                Ok(())
            }
        }
    }
}

impl fmt::Display for AstNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_with_indent(f, 0)
    }
}

/// Builds the tree of one function from its postfix token sequence. The root
/// is a `NodeKind::Body` node.
///
/// # Errors
///
/// Returns `CompileError::Internal` if the sequence is not well-formed
/// postfix (which validated input never produces).
pub fn build_ast(postfix: Vec<Token>) -> Result<AstNode> {
    let mut builder = Builder {
        tokens: postfix.into_iter().peekable(),
    };

    let mut statements = Vec::new();

    loop {
        match builder.next_statement()? {
            Step::Statement(node) => statements.push(node),
            Step::End(None) => break,
            Step::End(Some(close)) => return Err(malformed(&close, "'}' without a block")),
        }
    }

    Ok(AstNode::Internal {
        kind: NodeKind::Body,
        token: None,
        children: statements,
    })
}

/// Entries of the build stack.
enum Entry {
    Node(AstNode),
    /// `(` opening the arguments of a call.
    Args(Token),
}

enum Step {
    Statement(AstNode),
    /// `}` closing the enclosing block, or the end of input.
    End(Option<Token>),
}

struct Builder {
    tokens: Peekable<IntoIter<Token>>,
}

impl Builder {
    /// Reads exactly one statement.
    fn next_statement(&mut self) -> Result<Step> {
        let mut stack: Vec<Entry> = Vec::new();

        loop {
            let Some(token) = self.tokens.next() else {
                return match stack.pop() {
                    None => Ok(Step::End(None)),
                    Some(Entry::Node(node)) => Err(CompileError::Internal(format!(
                        "malformed postfix: statement at line {} is not terminated",
                        node.line()
                    ))),
                    Some(Entry::Args(paren)) => Err(malformed(&paren, "unclosed argument list")),
                };
            };

            match token.ty {
                TokenType::Ident(_)
                | TokenType::IntLiteral(_)
                | TokenType::FloatLiteral(_)
                | TokenType::CharLiteral(_)
                | TokenType::StrLiteral(_) => stack.push(Entry::Node(AstNode::Leaf(token))),
                TokenType::ParenOpen => stack.push(Entry::Args(token)),
                TokenType::ParenClose => {
                    let call = Self::close_call(&mut stack, &token)?;
                    stack.push(Entry::Node(call));
                }
                TokenType::Operator(op) => {
                    let node = Self::operator(&mut stack, op, token)?;
                    stack.push(Entry::Node(node));
                }
                TokenType::Keyword(Keyword::Return) => {
                    let children = match stack.pop() {
                        None => Vec::new(),
                        Some(Entry::Node(value)) => vec![value],
                        Some(Entry::Args(_)) => return Err(malformed(&token, "'return' in call")),
                    };
                    stack.push(Entry::Node(AstNode::internal(NodeKind::Return, token, children)));
                }
                TokenType::Keyword(kw @ (Keyword::Int | Keyword::Float)) => {
                    let ty = if kw == Keyword::Float {
                        ValueType::Float
                    } else {
                        ValueType::Int
                    };

                    let children = match pop_node(&mut stack, &token)? {
                        ident @ AstNode::Leaf(Token {
                            ty: TokenType::Ident(_),
                            ..
                        }) => vec![ident],
                        AstNode::Internal {
                            kind: NodeKind::Assign,
                            children,
                            ..
                        } => children,
                        _ => return Err(malformed(&token, "declaration without a name")),
                    };

                    let decl = AstNode::internal(NodeKind::Declare(ty), token, children);
                    stack.push(Entry::Node(decl));
                }
                TokenType::Semicolon => {
                    let node = pop_node(&mut stack, &token)?;

                    if !stack.is_empty() {
                        return Err(malformed(&token, "dangling operands"));
                    }

                    return Ok(Step::Statement(match node.kind() {
                        Some(NodeKind::Declare(_) | NodeKind::Return) => node,
                        _ => AstNode::internal(NodeKind::ExprStmt, token, vec![node]),
                    }));
                }
                TokenType::Keyword(Keyword::If) => {
                    let cond = pop_node(&mut stack, &token)?;
                    ensure_empty(&stack, &token)?;

                    let mut children = vec![cond, self.block(&token)?];

                    if self
                        .tokens
                        .next_if(|t| t.ty == TokenType::Keyword(Keyword::Else))
                        .is_some()
                    {
                        children.push(self.else_branch(&token)?);
                    }

                    return Ok(Step::Statement(AstNode::internal(NodeKind::If, token, children)));
                }
                TokenType::Keyword(Keyword::While) => {
                    let cond = pop_node(&mut stack, &token)?;
                    ensure_empty(&stack, &token)?;

                    let body = self.block(&token)?;

                    return Ok(Step::Statement(AstNode::internal(
                        NodeKind::While,
                        token,
                        vec![cond, body],
                    )));
                }
                TokenType::BraceOpen => {
                    ensure_empty(&stack, &token)?;
                    return Ok(Step::Statement(self.block_body(token)?));
                }
                TokenType::BraceClose => {
                    ensure_empty(&stack, &token)?;
                    return Ok(Step::End(Some(token)));
                }
                _ => return Err(malformed(&token, "unexpected token")),
            }
        }
    }

    /// Reads a `{ ... }` block that must follow `owner`.
    fn block(&mut self, owner: &Token) -> Result<AstNode> {
        match self.tokens.next() {
            Some(open) if open.ty == TokenType::BraceOpen => self.block_body(open),
            _ => Err(malformed(owner, "expected a block")),
        }
    }

    /// Reads statements up to the `}` matching `open`.
    fn block_body(&mut self, open: Token) -> Result<AstNode> {
        let mut statements = Vec::new();

        loop {
            match self.next_statement()? {
                Step::Statement(node) => statements.push(node),
                Step::End(Some(_)) => {
                    return Ok(AstNode::internal(NodeKind::Block, open, statements));
                }
                Step::End(None) => return Err(malformed(&open, "block is not closed")),
            }
        }
    }

    /// Reads the statement after `else`: a block or a nested `if`.
    fn else_branch(&mut self, owner: &Token) -> Result<AstNode> {
        if self
            .tokens
            .peek()
            .is_some_and(|t| t.ty == TokenType::BraceOpen)
        {
            return self.block(owner);
        }

        match self.next_statement()? {
            Step::Statement(node) if node.kind() == Some(NodeKind::If) => Ok(node),
            _ => Err(malformed(owner, "'else' must be followed by a block or 'if'")),
        }
    }

    /// Pops the arguments of the call closed by `close` and its callee.
    fn close_call(stack: &mut Vec<Entry>, close: &Token) -> Result<AstNode> {
        let mut args = Vec::new();

        loop {
            match stack.pop() {
                Some(Entry::Node(arg)) => args.push(arg),
                Some(Entry::Args(_)) => break,
                None => return Err(malformed(close, "')' without a call")),
            }
        }

        args.reverse();

        match stack.pop() {
            Some(Entry::Node(AstNode::Leaf(callee))) if matches!(callee.ty, TokenType::Ident(_)) => {
                Ok(AstNode::internal(NodeKind::Call, callee, args))
            }
            _ => Err(malformed(close, "call without a callee")),
        }
    }

    /// Pops the operands of `op` (right operand first) and forms its node.
    fn operator(stack: &mut Vec<Entry>, op: OperatorKind, token: Token) -> Result<AstNode> {
        let unary = match op {
            OperatorKind::Negate => Some(UnaryOperator::Negate),
            OperatorKind::LogNot => Some(UnaryOperator::Not),
            _ => None,
        };

        if let Some(unary) = unary {
            let operand = pop_node(stack, &token)?;
            return Ok(AstNode::internal(NodeKind::Unary(unary), token, vec![operand]));
        }

        let rhs = pop_node(stack, &token)?;
        let lhs = pop_node(stack, &token)?;

        let kind = match op {
            OperatorKind::Assign => NodeKind::Assign,
            OperatorKind::LogOr => NodeKind::Binary(BinaryOperator::LogOr),
            OperatorKind::LogAnd => NodeKind::Binary(BinaryOperator::LogAnd),
            OperatorKind::Eq => NodeKind::Binary(BinaryOperator::Eq),
            OperatorKind::NotEq => NodeKind::Binary(BinaryOperator::NotEq),
            OperatorKind::LessThan => NodeKind::Binary(BinaryOperator::OrdLess),
            OperatorKind::LessThanEq => NodeKind::Binary(BinaryOperator::OrdLessEq),
            OperatorKind::GreaterThan => NodeKind::Binary(BinaryOperator::OrdGreater),
            OperatorKind::GreaterThanEq => NodeKind::Binary(BinaryOperator::OrdGreaterEq),
            OperatorKind::Plus => NodeKind::Binary(BinaryOperator::Add),
            OperatorKind::Minus => NodeKind::Binary(BinaryOperator::Subtract),
            OperatorKind::Asterisk => NodeKind::Binary(BinaryOperator::Multiply),
            OperatorKind::Division => NodeKind::Binary(BinaryOperator::Divide),
            OperatorKind::Remainder => NodeKind::Binary(BinaryOperator::Remainder),
            OperatorKind::Negate | OperatorKind::LogNot => {
                return Err(malformed(&token, "unary operator with two operands"));
            }
        };

        Ok(AstNode::internal(kind, token, vec![lhs, rhs]))
    }
}

fn pop_node(stack: &mut Vec<Entry>, token: &Token) -> Result<AstNode> {
    match stack.pop() {
        Some(Entry::Node(node)) => Ok(node),
        Some(Entry::Args(_)) | None => Err(malformed(token, "missing operand")),
    }
}

fn ensure_empty(stack: &[Entry], token: &Token) -> Result<()> {
    if stack.is_empty() {
        Ok(())
    } else {
        Err(malformed(token, "dangling operands"))
    }
}

fn malformed(token: &Token, what: &str) -> CompileError {
    CompileError::Internal(format!(
        "malformed postfix at {} ({:?}): {what}",
        token.loc, token.ty
    ))
}
