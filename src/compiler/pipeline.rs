//! Compilation pipeline for one _Quill_ source file.
//!
//! Sequences every compiler pass from comment removal to module assembly,
//! recording stage messages in the run's `DiagnosticLog`. Nothing here
//! touches the filesystem; the driver persists the returned artifacts.

use crate::compiler::codegen::{
    self, AsmBlock, FloatConstantTable, LoweringRecord, OffsetTable, StringTable,
};
use crate::compiler::emit::{self, Module};
use crate::compiler::ir;
use crate::compiler::lexer::{self, Token};
use crate::compiler::opt::optimize_ir;
use crate::compiler::parser::ast::build_ast;
use crate::compiler::parser::postfix::to_postfix;
use crate::compiler::parser::sema::analyze_function;
use crate::compiler::parser::symbols::{DefinedFunctionTable, VariableList};
use crate::compiler::parser::types::Signature;
use crate::compiler::preprocess::remove_comments;
use crate::compiler::split::split_functions;
use crate::{CompileError, Context, DiagnosticLog, Result};

/// Options of the compiler core.
#[derive(Debug, Default, Clone, Copy)]
pub struct CompileOptions {
    /// Produce a dump of every token.
    pub dump_tokens: bool,
    /// Skip syntax validation (escape hatch, logged as a warning).
    pub permissive: bool,
}

/// State shared by every function of one run.
#[derive(Debug, Default)]
pub struct CompilationContext {
    pub offsets: OffsetTable,
    pub floats: FloatConstantTable,
    pub strings: StringTable,
    /// `extern` declarations and every function analysed so far.
    pub defined: DefinedFunctionTable,
}

/// Intermediate results of one function.
#[derive(Debug)]
pub struct FunctionArtifacts {
    pub name: String,
    /// _IR_ as generated.
    pub pre_ir: ir::Function,
    /// _IR_ after optimization.
    pub post_ir: ir::Function,
    pub asm: AsmBlock,
    pub lowering: Vec<LoweringRecord>,
}

/// Result of compiling one source file.
#[derive(Debug)]
pub struct Compilation {
    /// Per-function artifacts in definition order.
    pub functions: Vec<FunctionArtifacts>,
    pub module: Module,
    /// Token dump, when requested.
    pub token_dump: Option<String>,
}

/// Compiles the source in `ctx` into a NASM module.
///
/// # Errors
///
/// Returns an error from the first stage that fails. Best-effort stages
/// (function splitting, syntax analysis) record every diagnostic in `log`
/// before failing with the number of errors found.
pub fn compile_source(
    ctx: &Context<'_>,
    opts: &CompileOptions,
    log: &mut DiagnosticLog,
) -> Result<Compilation> {
    log.info("Removing comments");
    let src = remove_comments(ctx)?;
    let ctx = ctx.with_src(&src);

    log.info("Performing lexical analysis on file");
    let tokens = lexer::tokenize(&ctx, opts.dump_tokens)?;
    log.info("Lexical analysis finished");

    if !tokens.includes.is_empty() {
        let modules: Vec<&str> = tokens.includes.iter().map(|i| i.module.as_str()).collect();
        log.info(format!("Includes found: {}", modules.join(", ")));
    }

    log.info("Separating functions");
    let split = split_functions(&ctx, &tokens.tokens);
    let count = split.error_count();
    log.extend(split.diagnostics);

    if count > 0 {
        log.error("Compilation errors occurred");
        return Err(CompileError::Structure { count });
    }

    let program = split.value;
    log.info(format!("{} function(s) separated", program.functions.len()));

    let mut cctx = CompilationContext::default();

    for ext in &program.externs {
        cctx.defined.add(ext.clone());
    }

    let mut bodies = Vec::with_capacity(program.functions.len());
    let mut errors = 0;

    for mut func in program.functions {
        log.info(format!("Performing syntax analysis on \"{}\"", func.name()));

        func.remove_start_and_end();
        let sig = func.signature.clone();
        let mut vars = VariableList::from_params(&sig.params);

        let checked = analyze_function(
            &ctx,
            func.into_tokens(),
            &mut vars,
            &cctx.defined,
            &sig,
            opts.permissive,
        );

        errors += checked.error_count();
        log.extend(checked.diagnostics);

        cctx.defined.add(sig.clone());
        bodies.push((sig, checked.value));
    }

    if errors > 0 {
        log.error("Compilation errors occurred");
        return Err(CompileError::Syntax { count: errors });
    }

    let mut functions = Vec::with_capacity(bodies.len());

    for (sig, body) in bodies {
        functions.push(compile_function(&ctx, &sig, body, &mut cctx, log)?);
    }

    log.info("Making build assembly");
    let blocks = functions.iter().map(|f| f.asm.clone()).collect();
    let module = emit::assemble_module(&tokens.includes, &program.externs, blocks);

    Ok(Compilation {
        functions,
        module,
        token_dump: tokens.dump,
    })
}

/// Runs the per-function passes (postfix to assembly) on a validated body.
fn compile_function(
    ctx: &Context<'_>,
    sig: &Signature,
    body: Vec<Token>,
    cctx: &mut CompilationContext,
    log: &mut DiagnosticLog,
) -> Result<FunctionArtifacts> {
    log.info(format!("Converting \"{}\" to postfix", sig.name));
    let postfix = to_postfix(ctx, body)?;

    log.info(format!("Making abstract syntax tree for \"{}\"", sig.name));
    let ast = build_ast(postfix)?;
    log::debug!("AST of \"{}\":\n{ast}", sig.name);

    log.info(format!("Making intermediate code for \"{}\"", sig.name));
    let pre_ir = ir::generate_ir(sig, &cctx.defined, &ast)?;

    log.info(format!(
        "Optimising and converting intermediate code into assembly for \"{}\"",
        sig.name
    ));
    let mut post_ir = pre_ir.clone();
    optimize_ir(&mut post_ir);

    let out = codegen::generate_asm(
        &post_ir,
        &mut cctx.offsets,
        &mut cctx.floats,
        &mut cctx.strings,
    )?;

    log.info(format!(
        "Assembly created for \"{}\" ({} IR instruction(s), {} removed)",
        sig.name,
        post_ir.instructions.len(),
        pre_ir.instructions.len() - post_ir.instructions.len()
    ));

    Ok(FunctionArtifacts {
        name: sig.name.clone(),
        pre_ir,
        post_ir,
        asm: out.block,
        lowering: out.lowering,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Severity;
    use std::path::Path;

    fn compile(src: &str, opts: CompileOptions) -> (Result<Compilation>, DiagnosticLog) {
        let ctx = Context {
            in_path: Path::new("test.ql"),
            src,
        };
        let mut log = DiagnosticLog::new();
        let result = compile_source(&ctx, &opts, &mut log);

        (result, log)
    }

    #[test]
    fn pipeline_compiles_functions_in_order() {
        let src = "#include <io>\n\
                   extern int printf(string fmt, ...);\n\
                   /* halves */ float half(int n) { return n / 2.0; }\n\
                   int main() { printf(\"%f\\n\", half(3)); return 0; }\n";

        let (result, log) = compile(src, CompileOptions::default());
        let compilation = result.expect("program should compile");

        let names: Vec<&str> = compilation.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["half", "main"]);

        assert_eq!(compilation.module.includes, ["io"]);
        assert_eq!(compilation.module.externs, ["_printf"]);
        assert_eq!(compilation.module.globals, ["_half", "_main"]);
        assert!(compilation.token_dump.is_none());
        assert!(!log.has_errors());

        for func in &compilation.functions {
            assert_eq!(func.lowering.len(), func.post_ir.instructions.len());
        }
    }

    #[test]
    fn pipeline_aborts_on_syntax_errors() {
        let (result, log) = compile(
            "int f() { return x; }\nint main() { y = 1; return 0; }",
            CompileOptions::default(),
        );

        assert!(matches!(result, Err(CompileError::Syntax { count: 2 })));
        assert_eq!(log.error_count(), 3);
    }

    #[test]
    fn pipeline_aborts_on_structure_errors() {
        let (result, log) = compile("int main() { return 0;", CompileOptions::default());

        assert!(matches!(result, Err(CompileError::Structure { .. })));
        assert!(log.has_errors());
    }

    #[test]
    fn pipeline_permissive_mode_warns() {
        let (result, log) = compile(
            "int main() { return 1 + 2; }",
            CompileOptions {
                dump_tokens: true,
                permissive: true,
            },
        );

        let compilation = result.expect("program should compile");
        assert!(compilation.token_dump.is_some());
        assert!(
            log.entries()
                .iter()
                .any(|e| e.severity == Severity::Warning && e.message.contains("permissive"))
        );
    }
}
