//! Reference evaluator for _IR_ functions, used to check that optimization
//! preserves behavior.

use std::collections::HashMap;

use crate::compiler::ir::{Function, Instruction, Value};
use crate::compiler::parser::ast::{BinaryOperator, UnaryOperator};
use crate::compiler::parser::types::ValueType;

/// Run-time value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i32),
    Float(f32),
}

const STEP_LIMIT: usize = 100_000;

/// Runs `func` with `args` bound to its parameters, returning its result
/// (`None` for `void` returns). Calls are not supported.
pub fn run(func: &Function, args: &[Scalar]) -> Option<Scalar> {
    let labels: HashMap<&str, usize> = func
        .instructions
        .iter()
        .enumerate()
        .filter_map(|(i, inst)| match inst {
            Instruction::Label(l) => Some((l.as_str(), i)),
            _ => None,
        })
        .collect();

    let mut env: HashMap<String, Scalar> = func
        .params
        .iter()
        .zip(args)
        .map(|(p, v)| (p.name.clone(), *v))
        .collect();

    let mut pc = 0;

    for _ in 0..STEP_LIMIT {
        let inst = &func.instructions[pc];
        pc += 1;

        let load = |value: &Value| match value {
            Value::Int(v) => Scalar::Int(*v),
            Value::Float(v) => Scalar::Float(*v),
            Value::Var(var) => *env
                .get(&var.name)
                .unwrap_or_else(|| panic!("read of unset variable {}", var.name)),
            Value::Str(_) => panic!("string outside of a call"),
        };

        match inst {
            Instruction::Return(v) => return v.as_ref().map(load),
            Instruction::Copy { src, dst } => {
                let v = load(src);
                env.insert(dst.name.clone(), v);
            }
            Instruction::Convert { src, dst } => {
                let v = match (load(src), dst.ty) {
                    (Scalar::Int(x), ValueType::Float) => Scalar::Float(x as f32),
                    (Scalar::Float(x), ValueType::Int) => Scalar::Int(x as i32),
                    (v, _) => v,
                };
                env.insert(dst.name.clone(), v);
            }
            Instruction::Unary { op, src, dst } => {
                let v = match (op, load(src)) {
                    (UnaryOperator::Negate, Scalar::Int(x)) => Scalar::Int(x.wrapping_neg()),
                    (UnaryOperator::Negate, Scalar::Float(x)) => Scalar::Float(-x),
                    (UnaryOperator::Not, Scalar::Int(x)) => Scalar::Int(i32::from(x == 0)),
                    (UnaryOperator::Not, Scalar::Float(x)) => Scalar::Int(i32::from(x == 0.0)),
                };
                env.insert(dst.name.clone(), v);
            }
            Instruction::Binary { op, lhs, rhs, dst } => {
                let v = binary(*op, load(lhs), load(rhs));
                env.insert(dst.name.clone(), v);
            }
            Instruction::Jump(target) => pc = labels[target.as_str()],
            Instruction::JumpIfZero { cond, target } => {
                if load(cond) == Scalar::Int(0) {
                    pc = labels[target.as_str()];
                }
            }
            Instruction::JumpIfNotZero { cond, target } => {
                if load(cond) != Scalar::Int(0) {
                    pc = labels[target.as_str()];
                }
            }
            Instruction::Label(_) => {}
            Instruction::Call { callee, .. } => panic!("call to '{callee}' is not supported"),
        }
    }

    panic!("step limit exceeded in '{}'", func.name)
}

fn binary(op: BinaryOperator, lhs: Scalar, rhs: Scalar) -> Scalar {
    let truth = |b: bool| Scalar::Int(i32::from(b));

    match (lhs, rhs) {
        (Scalar::Int(x), Scalar::Int(y)) => match op {
            BinaryOperator::Add => Scalar::Int(x.wrapping_add(y)),
            BinaryOperator::Subtract => Scalar::Int(x.wrapping_sub(y)),
            BinaryOperator::Multiply => Scalar::Int(x.wrapping_mul(y)),
            BinaryOperator::Divide => Scalar::Int(x / y),
            BinaryOperator::Remainder => Scalar::Int(x % y),
            BinaryOperator::LogAnd => truth(x != 0 && y != 0),
            BinaryOperator::LogOr => truth(x != 0 || y != 0),
            BinaryOperator::Eq => truth(x == y),
            BinaryOperator::NotEq => truth(x != y),
            BinaryOperator::OrdLess => truth(x < y),
            BinaryOperator::OrdLessEq => truth(x <= y),
            BinaryOperator::OrdGreater => truth(x > y),
            BinaryOperator::OrdGreaterEq => truth(x >= y),
        },
        (Scalar::Float(x), Scalar::Float(y)) => match op {
            BinaryOperator::Add => Scalar::Float(x + y),
            BinaryOperator::Subtract => Scalar::Float(x - y),
            BinaryOperator::Multiply => Scalar::Float(x * y),
            BinaryOperator::Divide => Scalar::Float(x / y),
            BinaryOperator::Eq => truth(x == y),
            BinaryOperator::NotEq => truth(x != y),
            BinaryOperator::OrdLess => truth(x < y),
            BinaryOperator::OrdLessEq => truth(x <= y),
            BinaryOperator::OrdGreater => truth(x > y),
            BinaryOperator::OrdGreaterEq => truth(x >= y),
            _ => panic!("invalid float operation {op}"),
        },
        _ => panic!("mismatched operand types for {op}"),
    }
}
