//! Intermediate Representation
//!
//! Compiler pass that lowers the abstract syntax tree (_AST_) of a function
//! into intermediate representation (_IR_) using three-address code (_TAC_).

use std::collections::HashMap;
use std::fmt;

use crate::compiler::lexer::{Token, TokenType};
use crate::compiler::parser::ast::{AstNode, BinaryOperator, NodeKind, UnaryOperator};
use crate::compiler::parser::symbols::DefinedFunctionTable;
use crate::compiler::parser::types::{Signature, ValueType};
use crate::{CompileError, Result};

/// _IR_ function definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Var>,
    pub ret: ValueType,
    pub instructions: Vec<Instruction>,
    /// Source line of the statement each instruction was lowered from
    /// (parallel to `instructions`).
    pub lines: Vec<usize>,
}

impl Function {
    /// Keeps only the instructions whose flag in `keep` is `true`, along with
    /// their source lines.
    pub fn retain(&mut self, keep: &[bool]) {
        let mut flags = keep.iter();
        self.instructions
            .retain(|_| flags.next().copied().unwrap_or(true));

        let mut flags = keep.iter();
        self.lines.retain(|_| flags.next().copied().unwrap_or(true));
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|p| format!("{} {}", p.ty, p.name))
            .collect::<Vec<_>>()
            .join(", ");

        writeln!(f, "Fn {:?}({params}) -> {}", self.name, self.ret)?;

        for inst in &self.instructions {
            writeln!(f, "{:8}{inst}", "")?;
        }

        Ok(())
    }
}

/// Named, typed storage location (user variable or temporary).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Var {
    pub name: String,
    pub ty: ValueType,
}

impl Var {
    /// Returns `true` for compiler-generated temporaries.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.name.starts_with("tmp.")
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.name)
    }
}

/// _IR_ value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Constant int value (32-bit).
    Int(i32),
    /// Constant float value (32-bit).
    Float(f32),
    /// String literal (only as a call argument).
    Str(String),
    Var(Var),
}

impl Value {
    #[must_use]
    pub const fn ty(&self) -> ValueType {
        match self {
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Str(_) => ValueType::Str,
            Value::Var(var) => var.ty,
        }
    }

    #[must_use]
    pub const fn as_var(&self) -> Option<&Var> {
        match self {
            Value::Var(var) => Some(var),
            _ => None,
        }
    }

    /// Returns `true` for numeric constants.
    #[must_use]
    pub const fn is_constant(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Var(var) => write!(f, "{var}"),
        }
    }
}

/// _IR_ instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Returns a value (if any) to the caller.
    Return(Option<Value>),
    /// Perform a unary operation on `src`, storing the result in `dst`.
    Unary {
        op: UnaryOperator,
        src: Value,
        dst: Var,
    },
    /// Perform a binary operation on `lhs` and `rhs`, storing the result in
    /// `dst`. Both operands have the same type.
    Binary {
        op: BinaryOperator,
        lhs: Value,
        rhs: Value,
        dst: Var,
    },
    /// Copies the value from `src` into `dst` (same type).
    Copy { src: Value, dst: Var },
    /// Converts `src` between `int` and `float`, storing it in `dst`.
    Convert { src: Value, dst: Var },
    /// Unconditionally jumps to the point in code labeled by an "identifier".
    Jump(String),
    /// Conditionally jumps to the point in code labeled by an "identifier" if
    /// the condition evaluates to zero.
    JumpIfZero { cond: Value, target: String },
    /// Conditionally jumps to the point in code labeled by an "identifier" if
    /// the condition does not evaluates to zero.
    JumpIfNotZero { cond: Value, target: String },
    /// Associates an "identifier" with a location in the program.
    Label(String),
    /// Function call. `dst` is `None` when the result is unused or `void`.
    Call {
        callee: String,
        args: Vec<Value>,
        dst: Option<Var>,
        ret: ValueType,
        /// Index of the first variadic argument, for variadic callees.
        varargs_at: Option<usize>,
    },
}

impl Instruction {
    /// Variable written by the instruction.
    #[must_use]
    pub const fn dst(&self) -> Option<&Var> {
        match self {
            Instruction::Unary { dst, .. }
            | Instruction::Binary { dst, .. }
            | Instruction::Copy { dst, .. }
            | Instruction::Convert { dst, .. } => Some(dst),
            Instruction::Call { dst, .. } => dst.as_ref(),
            _ => None,
        }
    }

    /// Values read by the instruction.
    #[must_use]
    pub fn operands(&self) -> Vec<&Value> {
        match self {
            Instruction::Return(v) => v.iter().collect(),
            Instruction::Unary { src, .. }
            | Instruction::Copy { src, .. }
            | Instruction::Convert { src, .. } => vec![src],
            Instruction::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Instruction::JumpIfZero { cond, .. } | Instruction::JumpIfNotZero { cond, .. } => {
                vec![cond]
            }
            Instruction::Call { args, .. } => args.iter().collect(),
            Instruction::Jump(_) | Instruction::Label(_) => Vec::new(),
        }
    }

    /// Mutable access to the values read by the instruction.
    pub fn operands_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Instruction::Return(v) => v.iter_mut().collect(),
            Instruction::Unary { src, .. }
            | Instruction::Copy { src, .. }
            | Instruction::Convert { src, .. } => vec![src],
            Instruction::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Instruction::JumpIfZero { cond, .. } | Instruction::JumpIfNotZero { cond, .. } => {
                vec![cond]
            }
            Instruction::Call { args, .. } => args.iter_mut().collect(),
            Instruction::Jump(_) | Instruction::Label(_) => Vec::new(),
        }
    }
}

/// Writes `name src -> dst` with the arrow aligned on a fixed column.
fn fmt_arrow(f: &mut fmt::Formatter<'_>, name: &str, src: &str, dst: &str) -> fmt::Result {
    let max_width: usize = 32;
    let width = max_width.saturating_sub(src.len());

    write!(f, "{name:<17}{src} {:>width$}  {dst}", "->")
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Return(Some(v)) => write!(f, "{:<17}{v}", "Return"),
            Instruction::Return(None) => write!(f, "Return"),
            Instruction::Unary { op, src, dst } => {
                fmt_arrow(f, &format!("{op}"), &format!("{src}"), &format!("{dst}"))
            }
            Instruction::Binary { op, lhs, rhs, dst } => fmt_arrow(
                f,
                &format!("{op}"),
                &format!("{lhs}, {rhs}"),
                &format!("{dst}"),
            ),
            Instruction::Copy { src, dst } => {
                fmt_arrow(f, "Copy", &format!("{src}"), &format!("{dst}"))
            }
            Instruction::Convert { src, dst } => fmt_arrow(
                f,
                &format!("Convert({})", dst.ty),
                &format!("{src}"),
                &format!("{dst}"),
            ),
            Instruction::Jump(target) => write!(f, "{:<17}{target:?}", "Jump"),
            Instruction::JumpIfZero { cond, target } => {
                fmt_arrow(f, "JumpIfZero", &format!("{cond}"), &format!("{target:?}"))
            }
            Instruction::JumpIfNotZero { cond, target } => {
                fmt_arrow(f, "JumpIfNotZero", &format!("{cond}"), &format!("{target:?}"))
            }
            Instruction::Label(label) => write!(f, "{:<17}{label:?}", "Label"),
            Instruction::Call {
                callee, args, dst, ..
            } => {
                let args = args
                    .iter()
                    .map(|val| format!("{val}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let dst = dst.as_ref().map_or_else(|| "_".to_string(), |d| format!("{d}"));

                fmt_arrow(f, &format!("Call({callee:?})"), &args, &dst)
            }
        }
    }
}

/// Lowers the statements of one function into three-address code (_TAC_).
///
/// Temporaries (`tmp.<n>`) and labels (`<func>.lbl.<n>.<suffix>`) are never
/// reused within the function.
#[derive(Debug)]
pub struct IrBuilder<'a> {
    func: &'a Signature,
    defined: &'a DefinedFunctionTable,
    /// Types of the variables declared so far.
    vars: HashMap<String, ValueType>,
    instructions: Vec<Instruction>,
    // For temporary variables.
    tmp_count: usize,
    // For `jmp` labels.
    label_count: usize,
}

impl<'a> IrBuilder<'a> {
    /// Returns a builder for the body of `func`, resolving calls through
    /// `defined`.
    #[must_use]
    pub fn new(func: &'a Signature, defined: &'a DefinedFunctionTable) -> Self {
        Self {
            func,
            defined,
            vars: func.params.iter().map(|p| (p.name.clone(), p.ty)).collect(),
            instructions: Vec::new(),
            tmp_count: 0,
            label_count: 0,
        }
    }

    /// Lowers one top-level statement, returning its instructions and the
    /// source line it starts on.
    ///
    /// # Errors
    ///
    /// Returns `CompileError::Type` on misuse of typed values and
    /// `CompileError::Internal` on a malformed tree.
    pub fn lower_statement(&mut self, node: &AstNode) -> Result<(Vec<Instruction>, usize)> {
        self.statement(node)?;
        Ok((std::mem::take(&mut self.instructions), node.line()))
    }

    /// Returns a new temporary variable of type `ty`.
    fn new_tmp(&mut self, ty: ValueType) -> Var {
        let name = format!("tmp.{}", self.tmp_count);
        self.tmp_count += 1;
        Var { name, ty }
    }

    /// Returns a new label identifier, appending the provided suffix.
    fn new_label(&mut self, suffix: &str) -> String {
        let label = format!("{}.lbl.{}.{suffix}", self.func.name, self.label_count);
        self.label_count += 1;
        label
    }

    fn push(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }

    fn statement(&mut self, node: &AstNode) -> Result<()> {
        let AstNode::Internal { kind, children, .. } = node else {
            return Err(internal(node, "leaf in statement position"));
        };

        match (kind, children.as_slice()) {
            (NodeKind::Body | NodeKind::Block, stmts) => {
                for stmt in stmts {
                    self.statement(stmt)?;
                }
            }
            (NodeKind::ExprStmt, [expr]) => {
                if expr.kind() == Some(NodeKind::Call) {
                    let _ = self.call(expr)?;
                } else {
                    let _ = self.value(expr)?;
                }
            }
            (NodeKind::Declare(ty), [AstNode::Leaf(name), rest @ ..]) if rest.len() <= 1 => {
                let TokenType::Ident(name) = &name.ty else {
                    return Err(internal(node, "declaration without a name"));
                };

                // The initializer cannot see the variable it initializes.
                let init = match rest.first() {
                    Some(init) => Some(self.scalar(init)?),
                    None => None,
                };

                self.vars.insert(name.clone(), *ty);

                if let Some(init) = init {
                    let src = self.coerce(init, *ty);
                    self.push(Instruction::Copy {
                        src,
                        dst: Var {
                            name: name.clone(),
                            ty: *ty,
                        },
                    });
                }
            }
            (NodeKind::Return, []) => {
                if self.func.ret != ValueType::Void {
                    return Err(type_err(
                        node,
                        format!("'return' with no value, in function returning '{}'", self.func.ret),
                    ));
                }

                self.push(Instruction::Return(None));
            }
            (NodeKind::Return, [value]) => {
                if self.func.ret == ValueType::Void {
                    return Err(type_err(
                        node,
                        "'return' with a value, in function returning 'void'",
                    ));
                }

                let value = self.scalar(value)?;
                let value = self.coerce(value, self.func.ret);
                self.push(Instruction::Return(Some(value)));
            }
            (NodeKind::If, [cond, then, opt_else @ ..]) if opt_else.len() <= 1 => {
                let cond = self.condition(cond)?;

                let e_lbl = self.new_label("if.end");

                if let Some(else_stmt) = opt_else.first() {
                    let else_lbl = self.new_label("else");

                    self.push(Instruction::JumpIfZero {
                        cond,
                        target: else_lbl.clone(),
                    });

                    self.statement(then)?;

                    self.push(Instruction::Jump(e_lbl.clone()));
                    self.push(Instruction::Label(else_lbl));

                    self.statement(else_stmt)?;
                } else {
                    self.push(Instruction::JumpIfZero {
                        cond,
                        target: e_lbl.clone(),
                    });

                    self.statement(then)?;
                }

                self.push(Instruction::Label(e_lbl));
            }
            (NodeKind::While, [cond, body]) => {
                let start_lbl = self.new_label("while.start");
                let end_lbl = self.new_label("while.end");

                self.push(Instruction::Label(start_lbl.clone()));

                let cond = self.condition(cond)?;
                self.push(Instruction::JumpIfZero {
                    cond,
                    target: end_lbl.clone(),
                });

                self.statement(body)?;

                self.push(Instruction::Jump(start_lbl));
                self.push(Instruction::Label(end_lbl));
            }
            _ => return Err(internal(node, "malformed statement")),
        }

        Ok(())
    }

    /// Lowers an expression that must produce a value.
    fn value(&mut self, node: &AstNode) -> Result<Value> {
        let (kind, children) = match node {
            AstNode::Leaf(token) => return self.leaf(node, token),
            AstNode::Internal { kind, children, .. } => (kind, children),
        };

        match (kind, children.as_slice()) {
            (NodeKind::Unary(op), [operand]) => {
                let src = self.scalar(operand)?;

                match (op, src.ty()) {
                    // `!x` on a float compares against `0.0`.
                    (UnaryOperator::Not, ValueType::Float) => {
                        let dst = self.new_tmp(ValueType::Int);
                        self.push(Instruction::Binary {
                            op: BinaryOperator::Eq,
                            lhs: src,
                            rhs: Value::Float(0.0),
                            dst: dst.clone(),
                        });
                        Ok(Value::Var(dst))
                    }
                    (op, ty) => {
                        let ty = if *op == UnaryOperator::Not {
                            ValueType::Int
                        } else {
                            ty
                        };
                        let dst = self.new_tmp(ty);
                        self.push(Instruction::Unary {
                            op: *op,
                            src,
                            dst: dst.clone(),
                        });
                        Ok(Value::Var(dst))
                    }
                }
            }
            (NodeKind::Binary(op @ (BinaryOperator::LogAnd | BinaryOperator::LogOr)), [lhs, rhs]) => {
                self.short_circuit(*op, lhs, rhs)
            }
            (NodeKind::Binary(op), [lhs, rhs]) => {
                let lhs = self.scalar(lhs)?;
                let rhs = self.scalar(rhs)?;
                let common = lhs.ty().common(rhs.ty());

                if *op == BinaryOperator::Remainder && common == ValueType::Float {
                    return Err(type_err(node, "invalid operands to binary % (have 'float')"));
                }

                let lhs = self.coerce(lhs, common);
                let rhs = self.coerce(rhs, common);

                let ty = if op.is_relational() {
                    ValueType::Int
                } else {
                    common
                };
                let dst = self.new_tmp(ty);

                self.push(Instruction::Binary {
                    op: *op,
                    lhs,
                    rhs,
                    dst: dst.clone(),
                });

                Ok(Value::Var(dst))
            }
            (NodeKind::Assign, [target, value]) => {
                let dst = match target {
                    AstNode::Leaf(token) => match self.leaf(target, token)? {
                        Value::Var(var) => var,
                        _ => return Err(type_err(node, "lvalue required as left operand of assignment")),
                    },
                    AstNode::Internal { .. } => {
                        return Err(type_err(node, "lvalue required as left operand of assignment"));
                    }
                };

                let src = self.scalar(value)?;
                let src = self.coerce(src, dst.ty);

                self.push(Instruction::Copy {
                    src,
                    dst: dst.clone(),
                });

                Ok(Value::Var(dst))
            }
            (NodeKind::Call, _) => self
                .call(node)?
                .ok_or_else(|| type_err(node, "void value not ignored as it ought to be")),
            _ => Err(internal(node, "malformed expression")),
        }
    }

    /// Lowers a leaf (literal or identifier).
    fn leaf(&self, node: &AstNode, token: &Token) -> Result<Value> {
        match &token.ty {
            TokenType::Ident(name) => match self.vars.get(name) {
                Some(ty) => Ok(Value::Var(Var {
                    name: name.clone(),
                    ty: *ty,
                })),
                None => Err(type_err(node, format!("'{name}' undeclared"))),
            },
            TokenType::IntLiteral(v) => Ok(Value::Int(*v)),
            TokenType::CharLiteral(b) => Ok(Value::Int(i32::from(*b))),
            TokenType::FloatLiteral(v) => Ok(Value::Float(*v)),
            TokenType::StrLiteral(s) => Ok(Value::Str(s.clone())),
            _ => Err(internal(node, "unexpected leaf")),
        }
    }

    /// Lowers an expression that must produce an `int` or `float`.
    fn scalar(&mut self, node: &AstNode) -> Result<Value> {
        let value = self.value(node)?;

        if value.ty().is_scalar() {
            Ok(value)
        } else {
            Err(type_err(node, "string literal is only allowed as a call argument"))
        }
    }

    /// Lowers a condition to an `int` truth value.
    fn condition(&mut self, node: &AstNode) -> Result<Value> {
        let value = self.scalar(node)?;
        Ok(self.truth(value))
    }

    /// Returns `value` as an `int` that is zero iff `value` is zero.
    fn truth(&mut self, value: Value) -> Value {
        if value.ty() != ValueType::Float {
            return value;
        }

        let dst = self.new_tmp(ValueType::Int);
        self.push(Instruction::Binary {
            op: BinaryOperator::NotEq,
            lhs: value,
            rhs: Value::Float(0.0),
            dst: dst.clone(),
        });

        Value::Var(dst)
    }

    /// Converts `value` to `ty` if their types differ.
    fn coerce(&mut self, value: Value, ty: ValueType) -> Value {
        if value.ty() == ty || !ty.is_scalar() || !value.ty().is_scalar() {
            return value;
        }

        let dst = self.new_tmp(ty);
        self.push(Instruction::Convert {
            src: value,
            dst: dst.clone(),
        });

        Value::Var(dst)
    }

    /// Lowers `&&` and `||`: `rhs` is only evaluated when `lhs` does not
    /// already decide the result.
    fn short_circuit(&mut self, op: BinaryOperator, lhs: &AstNode, rhs: &AstNode) -> Result<Value> {
        let lhs = self.condition(lhs)?;
        let dst = self.new_tmp(ValueType::Int);

        if op == BinaryOperator::LogAnd {
            let f_lbl = self.new_label("and.false");
            let e_lbl = self.new_label("and.end");

            self.push(Instruction::JumpIfZero {
                cond: lhs,
                target: f_lbl.clone(),
            });

            let rhs = self.condition(rhs)?;

            self.instructions.extend([
                Instruction::JumpIfZero {
                    cond: rhs,
                    target: f_lbl.clone(),
                },
                Instruction::Copy {
                    src: Value::Int(1),
                    dst: dst.clone(),
                },
                Instruction::Jump(e_lbl.clone()),
                Instruction::Label(f_lbl),
                Instruction::Copy {
                    src: Value::Int(0),
                    dst: dst.clone(),
                },
                Instruction::Label(e_lbl),
            ]);
        } else {
            let t_lbl = self.new_label("or.true");
            let e_lbl = self.new_label("or.end");

            self.push(Instruction::JumpIfNotZero {
                cond: lhs,
                target: t_lbl.clone(),
            });

            let rhs = self.condition(rhs)?;

            self.instructions.extend([
                Instruction::JumpIfNotZero {
                    cond: rhs,
                    target: t_lbl.clone(),
                },
                Instruction::Copy {
                    src: Value::Int(0),
                    dst: dst.clone(),
                },
                Instruction::Jump(e_lbl.clone()),
                Instruction::Label(t_lbl),
                Instruction::Copy {
                    src: Value::Int(1),
                    dst: dst.clone(),
                },
                Instruction::Label(e_lbl),
            ]);
        }

        Ok(Value::Var(dst))
    }

    /// Lowers a call, returning its result (`None` for `void` callees).
    fn call(&mut self, node: &AstNode) -> Result<Option<Value>> {
        let AstNode::Internal {
            token: Some(callee),
            children: args,
            ..
        } = node
        else {
            return Err(internal(node, "call without a callee"));
        };

        let defined: &'a DefinedFunctionTable = self.defined;
        let sig: &'a Signature = if callee.text == self.func.name {
            self.func
        } else {
            defined.get(&callee.text).ok_or_else(|| {
                type_err(node, format!("call to undeclared function '{}'", callee.text))
            })?
        };

        if !sig.accepts_arity(args.len()) {
            return Err(type_err(
                node,
                format!("wrong number of arguments to function '{}'", sig.name),
            ));
        }

        let mut values = Vec::with_capacity(args.len());

        for (i, arg) in args.iter().enumerate() {
            let value = self.value(arg)?;

            let value = match (sig.param_type(i), value.ty()) {
                (Some(ValueType::Str), ValueType::Str) | (None, _) => value,
                (Some(ty), from) if ty.is_scalar() && from.is_scalar() => self.coerce(value, ty),
                _ => {
                    return Err(type_err(
                        arg,
                        format!("incompatible type for argument {} of '{}'", i + 1, sig.name),
                    ));
                }
            };

            values.push(value);
        }

        let dst = (sig.ret != ValueType::Void).then(|| self.new_tmp(sig.ret));

        self.push(Instruction::Call {
            callee: sig.name.clone(),
            args: values,
            dst: dst.clone(),
            ret: sig.ret,
            varargs_at: sig.variadic.then_some(sig.params.len()),
        });

        Ok(dst.map(Value::Var))
    }
}

/// Generates the intermediate representation (_IR_) of the function with
/// signature `sig` and tree `ast` (a `NodeKind::Body` root).
///
/// A default return (`0`, `0.0` or nothing) is appended when the last
/// instruction is not a return.
///
/// # Errors
///
/// Returns an error if a statement cannot be lowered.
pub fn generate_ir(
    sig: &Signature,
    defined: &DefinedFunctionTable,
    ast: &AstNode,
) -> Result<Function> {
    let mut builder = IrBuilder::new(sig, defined);

    let mut instructions = Vec::new();
    let mut lines = Vec::new();

    for stmt in ast.children() {
        let (insts, line) = builder.lower_statement(stmt)?;

        lines.extend(std::iter::repeat_n(line, insts.len()));
        instructions.extend(insts);
    }

    if !matches!(instructions.last(), Some(Instruction::Return(_))) {
        let value = match sig.ret {
            ValueType::Int => Some(Value::Int(0)),
            ValueType::Float => Some(Value::Float(0.0)),
            ValueType::Void | ValueType::Str => None,
        };

        lines.push(lines.last().copied().unwrap_or(0));
        instructions.push(Instruction::Return(value));
    }

    Ok(Function {
        name: sig.name.clone(),
        params: sig
            .params
            .iter()
            .map(|p| Var {
                name: p.name.clone(),
                ty: p.ty,
            })
            .collect(),
        ret: sig.ret,
        instructions,
        lines,
    })
}

fn type_err(node: &AstNode, msg: impl fmt::Display) -> CompileError {
    CompileError::Type(format!("line {}: error: {msg}", node.line()))
}

fn internal(node: &AstNode, what: &str) -> CompileError {
    CompileError::Internal(format!("{what} in tree at line {}", node.line()))
}
