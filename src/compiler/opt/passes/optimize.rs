//! Optimization Pipeline
//!
//! Executes machine-independent optimization passes on the intermediate
//! representation (_IR_) of a function.

use crate::compiler::ir::Function;
use crate::compiler::opt::passes::{dead_store, fold_ir_const};

/// Runs constant folding followed by dead store elimination once over the
/// given _IR_ function.
///
/// Redundancy spanning labels may survive. Running the passes again on the
/// result leaves it unchanged.
pub fn optimize_ir(func: &mut Function) {
    if func.instructions.is_empty() {
        return;
    }

    fold_ir_const(func);
    dead_store(func);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Context;
    use crate::compiler::ir::{Instruction, Value, generate_ir};
    use crate::compiler::lexer::tokenize;
    use crate::compiler::opt::interp::{Scalar, run};
    use crate::compiler::parser::ast::build_ast;
    use crate::compiler::parser::postfix::to_postfix;
    use crate::compiler::parser::symbols::DefinedFunctionTable;
    use crate::compiler::parser::types::{Param, Signature, ValueType};
    use std::path::Path;

    fn lower(body: &str, params: &[(&str, ValueType)], ret: ValueType) -> Function {
        let ctx = Context {
            in_path: Path::new("test.ql"),
            src: body,
        };
        let tokens = tokenize(&ctx, false).expect("source should tokenize").tokens;
        let postfix = to_postfix(&ctx, tokens).expect("body should convert");
        let ast = build_ast(postfix).expect("postfix should build");

        let sig = Signature {
            name: "f".into(),
            params: params
                .iter()
                .map(|(n, ty)| Param {
                    name: (*n).into(),
                    ty: *ty,
                })
                .collect(),
            ret,
            variadic: false,
            external: false,
        };

        generate_ir(&sig, &DefinedFunctionTable::default(), &ast).expect("body should lower")
    }

    fn optimized(func: &Function) -> Function {
        let mut func = func.clone();
        optimize_ir(&mut func);
        func
    }

    #[test]
    fn optimize_return_of_addition_to_literal() {
        let func = optimized(&lower("return 1 + 2;", &[], ValueType::Int));

        assert_eq!(func.instructions, vec![Instruction::Return(Some(Value::Int(3)))]);
    }

    #[test]
    fn optimize_is_idempotent() {
        let bodies = [
            "return 1 + 2;",
            "int x = 3; int y = x * 2 - 1; if (y > 4 && x != 0) { return y; } return -y;",
            "int i = 0; int s = 0; while (i < n) { s = s + i % 3; i = i + 1; } return s;",
            "float a = 1.5; float b = a * 2; if (!b) { return 1; } return b / 0.5 + n;",
        ];

        for body in bodies {
            let once = optimized(&lower(body, &[("n", ValueType::Int)], ValueType::Int));
            let twice = optimized(&once);

            assert_eq!(once, twice, "optimizing twice changed:\n{once}");
        }
    }

    #[test]
    fn optimize_preserves_behavior() {
        let cases: [(&str, ValueType, &[Scalar]); 6] = [
            ("return 3 + 4 * 2;", ValueType::Int, &[Scalar::Int(0)]),
            (
                "int x = n * 2; if (x > 10 || n == 1) { return x - 1; } else { return x + 1; }",
                ValueType::Int,
                &[Scalar::Int(7)],
            ),
            (
                "int x = n * 2; if (x > 10 || n == 1) { return x - 1; } else { return x + 1; }",
                ValueType::Int,
                &[Scalar::Int(2)],
            ),
            (
                "int i = 0; int s = 0; while (i < n) { s = s + i * i; i = i + 1; } return s;",
                ValueType::Int,
                &[Scalar::Int(6)],
            ),
            (
                "float a = 2.5; int k = 7 / 2; return a * k + n;",
                ValueType::Float,
                &[Scalar::Int(1)],
            ),
            (
                "int a = 10 % 4; int b = !a; if (b) { return 0; } return -(a + n) / 2;",
                ValueType::Int,
                &[Scalar::Int(-9)],
            ),
        ];

        for (body, ret, args) in cases {
            let func = lower(body, &[("n", ValueType::Int)], ret);
            let opt = optimized(&func);

            assert_eq!(run(&func, args), run(&opt, args), "behavior changed for {body}");
        }
    }

    #[test]
    fn optimize_known_results() {
        let func = lower("int x = 2; return x * 3 + 1;", &[], ValueType::Int);
        assert_eq!(run(&optimized(&func), &[]), Some(Scalar::Int(7)));

        let func = lower("return 7 / 2 * 1.0;", &[], ValueType::Float);
        assert_eq!(run(&optimized(&func), &[]), Some(Scalar::Float(3.0)));
    }

    #[test]
    fn optimize_propagates_through_user_variables() {
        let func = optimized(&lower(
            "int x = 4; int y = x + 1; return y * 2;",
            &[],
            ValueType::Int,
        ));

        assert_eq!(
            func.instructions.last(),
            Some(&Instruction::Return(Some(Value::Int(10))))
        );

        let stored: Vec<&str> = func
            .instructions
            .iter()
            .filter_map(|inst| match inst {
                Instruction::Copy { dst, .. } if !dst.is_temporary() => Some(dst.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(stored, ["x", "y"]);
    }

    #[test]
    fn optimize_folds_int_min_literal() {
        let func = optimized(&lower("return -2147483648;", &[], ValueType::Int));

        assert_eq!(func.instructions, vec![Instruction::Return(Some(Value::Int(i32::MIN)))]);
    }

    #[test]
    fn optimize_keeps_division_by_zero() {
        let func = optimized(&lower("int x = 1 / 0; return 0;", &[], ValueType::Int));

        assert!(func.instructions.iter().any(|i| matches!(i, Instruction::Binary { .. })));
    }
}
