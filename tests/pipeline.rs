use std::path::Path;

use quillc::compiler::codegen::DataEntry;
use quillc::compiler::ir::{Instruction, Value};
use quillc::compiler::lexer::{Keyword, OperatorKind, TokenType, tokenize};
use quillc::compiler::parser::postfix::to_postfix;
use quillc::compiler::preprocess::remove_comments;
use quillc::compiler::split::split_functions;
use quillc::{CompileError, CompileOptions, Compilation, Context, DiagnosticLog, compile_source};

fn ctx(src: &str) -> Context<'_> {
    Context {
        in_path: Path::new("main.ql"),
        src,
    }
}

fn compile(src: &str) -> Result<Compilation, CompileError> {
    let mut log = DiagnosticLog::new();
    compile_source(&ctx(src), &CompileOptions::default(), &mut log)
}

#[test]
fn return_of_constant_sum_folds_to_literal() {
    let compilation = compile("int main() { return 1 + 2; }").expect("program should compile");
    let main = &compilation.functions[0];

    assert_eq!(main.post_ir.instructions, vec![Instruction::Return(Some(Value::Int(3)))]);
    assert!(main.asm.data.is_empty());
    assert!(main.asm.lines.iter().any(|l| l == "    mov eax, 3"));
    assert!(compilation.module.data.is_empty());
}

#[test]
fn postfix_evaluates_with_precedence() {
    let src = "return 3 + 4 * 2;";
    let tokens = tokenize(&ctx(src), false).expect("source should tokenize").tokens;
    let postfix = to_postfix(&ctx(src), tokens).expect("statement should convert");

    let mut stack: Vec<i32> = Vec::new();

    for token in postfix {
        match token.ty {
            TokenType::IntLiteral(v) => stack.push(v),
            TokenType::Operator(op) => {
                let rhs = stack.pop().expect("operand");
                let lhs = stack.pop().expect("operand");

                stack.push(match op {
                    OperatorKind::Plus => lhs + rhs,
                    OperatorKind::Minus => lhs - rhs,
                    OperatorKind::Asterisk => lhs * rhs,
                    other => panic!("unexpected operator {other}"),
                });
            }
            TokenType::Keyword(Keyword::Return) => break,
            other => panic!("unexpected token {other}"),
        }
    }

    assert_eq!(stack, [11]);
}

#[test]
fn calls_must_follow_callee_definition() {
    let forward = "int a() { return b(); }\nint b() { return 1; }";
    assert!(matches!(compile(forward), Err(CompileError::Syntax { count: 1 })));

    let backward = "int b() { return 1; }\nint a() { return b(); }";
    assert!(compile(backward).is_ok());

    let recursive = "int fact(int n) { if (n < 2) { return 1; } return n * fact(n - 1); }";
    assert!(compile(recursive).is_ok());
}

#[test]
fn comment_removal_preserves_tokens() {
    let sources = [
        "int main() { int x = 1; return x; }",
        "int main() {\n    int x = 1; // one\n    /* multi\n line */ return x;\n}",
        "int main() { printf(\"/* kept */\"); return 0; } /* trailing */",
    ];

    for src in sources {
        let stripped = remove_comments(&ctx(src)).expect("comments should be removed");

        assert_eq!(stripped.len(), src.len());
        assert_eq!(stripped.lines().count(), src.lines().count());

        let once = remove_comments(&ctx(&stripped)).expect("comments should be removed");
        assert_eq!(once, stripped);
    }

    let plain = "int main() { return 0; }";
    assert_eq!(remove_comments(&ctx(plain)).expect("no comments"), plain);
}

#[test]
fn split_functions_rewrap_round_trip() {
    let src = "extern int printf(string fmt, ...);\n\
               int add(int a, int b) { return a + b; }\n\
               int main() { if (1) { printf(\"%d\\n\", add(1, 2)); } return 0; }";
    let tokens = tokenize(&ctx(src), false).expect("source should tokenize").tokens;

    let split = split_functions(&ctx(src), &tokens);
    assert!(split.is_ok());

    for mut func in split.value.functions {
        let original = func.tokens().to_vec();

        func.remove_start_and_end();
        assert!(func.tokens().len() < original.len());
        assert_eq!(func.rewrap(), original);
    }
}

#[test]
fn float_constants_shared_across_functions() {
    let src = "float a() { return 2.5; }\nfloat b() { float x = 2.5; return x * 4; }";
    let compilation = compile(src).expect("program should compile");

    let floats: Vec<&DataEntry> = compilation
        .module
        .data
        .iter()
        .filter(|e| matches!(e, DataEntry::Float { value, .. } if *value == 2.5))
        .collect();

    assert_eq!(floats.len(), 1);
    assert!(compilation.functions[1].asm.data.iter().all(|e| !matches!(e, DataEntry::Float { value, .. } if *value == 2.5)));
}

#[test]
fn module_lists_includes_externs_and_globals() {
    let src = "#include <io>\n\
               extern int printf(string fmt, ...);\n\
               int square(int n) { return n * n; }\n\
               int main() { printf(\"%d\\n\", square(7)); return 0; }";
    let text = compile(src).expect("program should compile").module.to_string();

    assert!(text.starts_with("%include \"io.asm\""));
    assert!(text.contains("extern _printf\n"));
    assert!(text.contains("global _square\nglobal _main\n"));
    assert!(text.contains("section .data\n    __string0 db \"%d\", 10, 0\n"));

    let text_section = text.find("section .text").expect("text section");
    assert!(text.find("_square:").expect("square block") > text_section);
    assert!(text.find("_square:") < text.find("_main:"));
}
