//! Dead Store Elimination (DSE)
//!
//! Transforms an intermediate representation (_IR_) by removing assignments to
//! temporaries that are never read.

use std::collections::HashMap;

use crate::compiler::ir::{Function, Instruction, Value};
use crate::compiler::parser::ast::BinaryOperator;
use crate::compiler::parser::types::ValueType;

/// Transforms an intermediate representation (_IR_) function by removing
/// dead stores to temporaries.
///
/// Temporaries are always written before they are read, so a single reverse
/// scan also removes stores that only fed other dead stores. Stores to user
/// variables are kept, and calls are kept (only their unused result is
/// discarded).
pub fn dead_store(func: &mut Function) {
    let mut reads: HashMap<String, usize> = HashMap::new();

    for inst in &func.instructions {
        for var in inst.operands().into_iter().filter_map(Value::as_var) {
            *reads.entry(var.name.clone()).or_default() += 1;
        }
    }

    let mut keep = vec![true; func.instructions.len()];

    for (i, inst) in func.instructions.iter_mut().enumerate().rev() {
        let dead = inst
            .dst()
            .is_some_and(|dst| dst.is_temporary() && reads.get(&dst.name).is_none_or(|n| *n == 0));

        if !dead {
            continue;
        }

        if let Instruction::Call { dst, .. } = inst {
            *dst = None;
            continue;
        }

        if may_trap(inst) {
            continue;
        }

        keep[i] = false;

        for var in inst.operands().into_iter().filter_map(Value::as_var) {
            if let Some(count) = reads.get_mut(&var.name) {
                *count = count.saturating_sub(1);
            }
        }
    }

    func.retain(&keep);
}

/// Returns `true` for integer divisions that may fault at run time.
fn may_trap(inst: &Instruction) -> bool {
    match inst {
        Instruction::Binary {
            op: BinaryOperator::Divide | BinaryOperator::Remainder,
            rhs,
            ..
        } if rhs.ty() == ValueType::Int => !matches!(rhs, Value::Int(y) if *y != 0 && *y != -1),
        _ => false,
    }
}
