//! Compiler driver that orchestrates the multi-stage process of compiling a
//! _Quill_ source file into an executable.
//!
//! The driver owns everything that touches the filesystem: reading the input,
//! writing per-function artifacts and `build.asm`, invoking the toolchain, and
//! flushing the diagnostic log to `buildlog.log`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::compiler::pipeline::{Compilation, CompileOptions, compile_source};
use crate::compiler::toolchain::Toolchain;
use crate::{CompileError, Context, DiagnosticLog, Result};

/// Orchestration settings of one compiler run.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Input _Quill_ file.
    pub input: PathBuf,
    /// File name of the executable, created in `build_dir`.
    pub output: String,
    pub build_dir: PathBuf,
    pub log_dir: PathBuf,
    pub options: CompileOptions,
    /// Assemble and link `build.asm` after writing it.
    pub link: bool,
    pub toolchain: Toolchain,
}

/// Executes the compilation pipeline for `cfg.input`.
///
/// The diagnostic log is written to `<log_dir>/buildlog.log` whether or not
/// the run succeeds.
///
/// # Errors
///
/// Returns an error if the input cannot be read, any compilation stage fails,
/// an artifact cannot be written, or the toolchain fails.
pub fn run_compiler(cfg: &DriverConfig) -> Result<()> {
    let mut log = DiagnosticLog::new();

    let result = build(cfg, &mut log);

    if let Err(err) = &result {
        log.error(err.to_string());
    }

    flush_log(cfg, &log)?;

    result
}

fn build(cfg: &DriverConfig, log: &mut DiagnosticLog) -> Result<()> {
    create_dir(&cfg.build_dir)?;
    create_dir(&cfg.log_dir)?;

    let src = fs::read_to_string(&cfg.input).map_err(|err| {
        CompileError::io(
            format!("failed to read input file '{}'", cfg.input.display()),
            err,
        )
    })?;

    let ctx = Context {
        in_path: &cfg.input,
        src: &src,
    };

    log.info(format!("Compiling '{}'", cfg.input.display()));
    let compilation = compile_source(&ctx, &cfg.options, log)?;

    if let Some(dump) = &compilation.token_dump {
        print!("{dump}");
    }

    write_artifacts(cfg, &compilation)?;

    let asm_path = cfg.build_dir.join("build.asm");
    write(&asm_path, compilation.module.to_string())?;
    log.info(format!("Made build assembly '{}'", asm_path.display()));

    if !cfg.link {
        log.info("Linking skipped");
        return Ok(());
    }

    let obj = cfg.toolchain.assemble(&cfg.build_dir, log)?;
    let exe = cfg.toolchain.link(&obj, &cfg.build_dir, &cfg.output, log)?;
    log.info(format!("Executable written to '{}'", exe.display()));

    Ok(())
}

/// Writes `<fn>.preint`, `<fn>.postint` and `<fn>.asm` to the build
/// directory and `<fn>codelog.log` to the log directory for every function.
fn write_artifacts(cfg: &DriverConfig, compilation: &Compilation) -> Result<()> {
    for func in &compilation.functions {
        let base = cfg.build_dir.join(&func.name);

        write(&base.with_extension("preint"), func.pre_ir.to_string())?;
        write(&base.with_extension("postint"), func.post_ir.to_string())?;
        write(&base.with_extension("asm"), func.asm.to_string())?;

        let codelog: String = func
            .lowering
            .iter()
            .map(|record| format!("{record}\n\n"))
            .collect();

        write(
            &cfg.log_dir.join(format!("{}codelog.log", func.name)),
            codelog,
        )?;
    }

    Ok(())
}

fn flush_log(cfg: &DriverConfig, log: &DiagnosticLog) -> Result<()> {
    create_dir(&cfg.log_dir)?;
    write(&cfg.log_dir.join("buildlog.log"), log.to_string())
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|err| {
        CompileError::io(
            format!("failed to create directory '{}'", path.display()),
            err,
        )
    })
}

fn write(path: &Path, contents: String) -> Result<()> {
    fs::write(path, contents)
        .map_err(|err| CompileError::io(format!("failed to write '{}'", path.display()), err))
}
