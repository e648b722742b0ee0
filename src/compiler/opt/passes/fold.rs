//! Constant Folding
//!
//! Transforms an intermediate representation (_IR_) by propagating constants
//! within straight-line code and evaluating constant expressions at
//! compile-time.

use std::collections::HashMap;

use crate::compiler::ir::{Function, Instruction, Value};
use crate::compiler::parser::ast::{BinaryOperator, UnaryOperator};
use crate::compiler::parser::types::ValueType;

/// Result of inspecting one instruction.
enum Fold {
    /// Replace with `Copy` of the constant into the same destination.
    Constant(Value),
    /// Conditional jump that is always taken.
    Taken(String),
    /// Conditional jump that is never taken.
    Dropped,
    Keep,
}

/// Transforms an intermediate representation (_IR_) function by folding
/// all constant expressions in a single linear pass.
///
/// Variables holding known constants are substituted into later operands.
/// What is known is forgotten at every label, since control may reach a label
/// from elsewhere.
pub fn fold_ir_const(func: &mut Function) {
    let mut known: HashMap<String, Value> = HashMap::new();
    let mut keep = vec![true; func.instructions.len()];

    for (i, inst) in func.instructions.iter_mut().enumerate() {
        if let Instruction::Label(_) = inst {
            known.clear();
            continue;
        }

        for operand in inst.operands_mut() {
            if let Value::Var(var) = operand
                && let Some(constant) = known.get(&var.name)
            {
                *operand = constant.clone();
            }
        }

        match inspect(inst) {
            Fold::Constant(src) => {
                if let Some(dst) = inst.dst().cloned() {
                    *inst = Instruction::Copy { src, dst };
                }
            }
            Fold::Taken(target) => *inst = Instruction::Jump(target),
            Fold::Dropped => keep[i] = false,
            Fold::Keep => {}
        }

        if let Some(dst) = inst.dst() {
            match &*inst {
                Instruction::Copy { src, .. } if src.is_constant() => {
                    known.insert(dst.name.clone(), src.clone());
                }
                _ => {
                    known.remove(&dst.name);
                }
            }
        }
    }

    func.retain(&keep);
}

fn inspect(inst: &Instruction) -> Fold {
    let folded = match inst {
        Instruction::Unary { op, src, .. } => eval_unary(*op, src),
        Instruction::Binary { op, lhs, rhs, .. } => eval_binary(*op, lhs, rhs),
        Instruction::Convert { src, dst } => eval_convert(src, dst.ty),
        Instruction::JumpIfZero { cond, target } | Instruction::JumpIfNotZero { cond, target } => {
            let Some(zero) = is_zero(cond) else {
                return Fold::Keep;
            };

            let jumps_on_zero = matches!(inst, Instruction::JumpIfZero { .. });

            return if zero == jumps_on_zero {
                Fold::Taken(target.clone())
            } else {
                Fold::Dropped
            };
        }
        _ => None,
    };

    folded.map_or(Fold::Keep, Fold::Constant)
}

#[allow(clippy::float_cmp)]
fn is_zero(value: &Value) -> Option<bool> {
    match value {
        Value::Int(x) => Some(*x == 0),
        Value::Float(x) => Some(*x == 0.0),
        _ => None,
    }
}

fn eval_unary(op: UnaryOperator, src: &Value) -> Option<Value> {
    match (op, src) {
        (UnaryOperator::Negate, Value::Int(x)) => Some(Value::Int(x.wrapping_neg())),
        (UnaryOperator::Negate, Value::Float(x)) => Some(Value::Float(-x)),
        (UnaryOperator::Not, Value::Int(x)) => Some(Value::Int(i32::from(*x == 0))),
        _ => None,
    }
}

fn eval_binary(op: BinaryOperator, lhs: &Value, rhs: &Value) -> Option<Value> {
    match (lhs, rhs) {
        (Value::Int(x), Value::Int(y)) => eval_int(op, *x, *y).map(Value::Int),
        (Value::Float(x), Value::Float(y)) => eval_float(op, *x, *y),
        _ => None,
    }
}

fn eval_int(op: BinaryOperator, x: i32, y: i32) -> Option<i32> {
    let val = match op {
        BinaryOperator::Add => x.wrapping_add(y),
        BinaryOperator::Subtract => x.wrapping_sub(y),
        BinaryOperator::Multiply => x.wrapping_mul(y),
        // Left for the target to trap on.
        BinaryOperator::Divide | BinaryOperator::Remainder if y == 0 || (x == i32::MIN && y == -1) => {
            return None;
        }
        BinaryOperator::Divide => x / y,
        BinaryOperator::Remainder => x % y,
        BinaryOperator::LogAnd => i32::from(x != 0 && y != 0),
        BinaryOperator::LogOr => i32::from(x != 0 || y != 0),
        BinaryOperator::Eq => i32::from(x == y),
        BinaryOperator::NotEq => i32::from(x != y),
        BinaryOperator::OrdLess => i32::from(x < y),
        BinaryOperator::OrdLessEq => i32::from(x <= y),
        BinaryOperator::OrdGreater => i32::from(x > y),
        BinaryOperator::OrdGreaterEq => i32::from(x >= y),
    };

    Some(val)
}

#[allow(clippy::float_cmp)]
fn eval_float(op: BinaryOperator, x: f32, y: f32) -> Option<Value> {
    let val = match op {
        BinaryOperator::Add => Value::Float(x + y),
        BinaryOperator::Subtract => Value::Float(x - y),
        BinaryOperator::Multiply => Value::Float(x * y),
        BinaryOperator::Divide if y == 0.0 => return None,
        BinaryOperator::Divide => Value::Float(x / y),
        BinaryOperator::Remainder | BinaryOperator::LogAnd | BinaryOperator::LogOr => return None,
        BinaryOperator::Eq => Value::Int(i32::from(x == y)),
        BinaryOperator::NotEq => Value::Int(i32::from(x != y)),
        BinaryOperator::OrdLess => Value::Int(i32::from(x < y)),
        BinaryOperator::OrdLessEq => Value::Int(i32::from(x <= y)),
        BinaryOperator::OrdGreater => Value::Int(i32::from(x > y)),
        BinaryOperator::OrdGreaterEq => Value::Int(i32::from(x >= y)),
    };

    Some(val)
}

#[allow(clippy::cast_precision_loss)]
fn eval_convert(src: &Value, to: ValueType) -> Option<Value> {
    match (src, to) {
        (Value::Int(x), ValueType::Float) => Some(Value::Float(*x as f32)),
        // Out of range values are left to the target's conversion.
        (Value::Float(x), ValueType::Int) if *x >= -2_147_483_648.0 && *x < 2_147_483_648.0 => {
            Some(Value::Int(*x as i32))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ir::Var;

    fn tmp(n: usize, ty: ValueType) -> Var {
        Var {
            name: format!("tmp.{n}"),
            ty,
        }
    }

    fn func(instructions: Vec<Instruction>) -> Function {
        Function {
            name: "f".into(),
            params: Vec::new(),
            ret: ValueType::Int,
            lines: vec![1; instructions.len()],
            instructions,
        }
    }

    #[test]
    fn fold_arithmetic_and_propagate() {
        let mut f = func(vec![
            Instruction::Binary {
                op: BinaryOperator::Multiply,
                lhs: Value::Int(4),
                rhs: Value::Int(2),
                dst: tmp(0, ValueType::Int),
            },
            Instruction::Binary {
                op: BinaryOperator::Add,
                lhs: Value::Int(3),
                rhs: Value::Var(tmp(0, ValueType::Int)),
                dst: tmp(1, ValueType::Int),
            },
            Instruction::Return(Some(Value::Var(tmp(1, ValueType::Int)))),
        ]);

        fold_ir_const(&mut f);

        assert_eq!(f.instructions[2], Instruction::Return(Some(Value::Int(11))));
    }

    #[test]
    fn fold_never_divides_by_zero() {
        let div = Instruction::Binary {
            op: BinaryOperator::Divide,
            lhs: Value::Int(1),
            rhs: Value::Int(0),
            dst: tmp(0, ValueType::Int),
        };
        let rem = Instruction::Binary {
            op: BinaryOperator::Remainder,
            lhs: Value::Int(i32::MIN),
            rhs: Value::Int(-1),
            dst: tmp(1, ValueType::Int),
        };
        let fdiv = Instruction::Binary {
            op: BinaryOperator::Divide,
            lhs: Value::Float(1.0),
            rhs: Value::Float(0.0),
            dst: tmp(2, ValueType::Float),
        };

        let mut f = func(vec![div.clone(), rem.clone(), fdiv.clone()]);
        fold_ir_const(&mut f);

        assert_eq!(f.instructions, vec![div, rem, fdiv]);
    }

    #[test]
    fn fold_constant_jumps() {
        let mut f = func(vec![
            Instruction::JumpIfZero {
                cond: Value::Int(0),
                target: "a".into(),
            },
            Instruction::JumpIfNotZero {
                cond: Value::Int(0),
                target: "b".into(),
            },
            Instruction::Label("a".into()),
            Instruction::Return(Some(Value::Int(1))),
        ]);

        fold_ir_const(&mut f);

        assert_eq!(
            f.instructions,
            vec![
                Instruction::Jump("a".into()),
                Instruction::Label("a".into()),
                Instruction::Return(Some(Value::Int(1))),
            ]
        );
        assert_eq!(f.lines.len(), 3);
    }

    #[test]
    fn fold_forgets_constants_at_labels() {
        let x = Var {
            name: "x".into(),
            ty: ValueType::Int,
        };

        let mut f = func(vec![
            Instruction::Copy {
                src: Value::Int(1),
                dst: x.clone(),
            },
            Instruction::Label("loop".into()),
            Instruction::Return(Some(Value::Var(x.clone()))),
        ]);

        fold_ir_const(&mut f);

        assert_eq!(f.instructions[2], Instruction::Return(Some(Value::Var(x))));
    }

    #[test]
    fn fold_conversions() {
        let mut f = func(vec![
            Instruction::Convert {
                src: Value::Int(3),
                dst: tmp(0, ValueType::Float),
            },
            Instruction::Convert {
                src: Value::Float(-2.75),
                dst: tmp(1, ValueType::Int),
            },
            Instruction::Convert {
                src: Value::Float(1e10),
                dst: tmp(2, ValueType::Int),
            },
        ]);

        fold_ir_const(&mut f);

        assert_eq!(
            f.instructions[0],
            Instruction::Copy {
                src: Value::Float(3.0),
                dst: tmp(0, ValueType::Float),
            }
        );
        assert_eq!(
            f.instructions[1],
            Instruction::Copy {
                src: Value::Int(-2),
                dst: tmp(1, ValueType::Int),
            }
        );
        assert!(matches!(f.instructions[2], Instruction::Convert { .. }));
    }
}
