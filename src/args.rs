//! Module for parsing command-line arguments passed to the compiler.

use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

use crate::compiler::driver::DriverConfig;
use crate::compiler::pipeline::CompileOptions;
use crate::compiler::toolchain::Toolchain;

/// Compiler command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "quillc", version, about = "Compile a Quill source file to a 32-bit executable")]
pub struct Args {
    /// Input file containing Quill source code.
    #[arg(short = 'i', long = "in", value_name = "FILE")]
    pub input: PathBuf,
    /// File name of the executable, created in the build directory.
    #[arg(short = 'o', long = "out", default_value = "a.exe")]
    pub output: String,
    /// Print every token produced by the lexer.
    #[arg(long)]
    pub lex: bool,
    /// Print stage progress to the terminal.
    #[arg(short, long)]
    pub verbose: bool,
    /// Developer mode (same as `--lex --verbose`).
    #[arg(long)]
    pub dev: bool,
    /// Disable syntax validation.
    #[arg(long)]
    pub permissive: bool,
    /// Directory for build artifacts.
    #[arg(long, default_value = "build")]
    pub build_dir: PathBuf,
    /// Directory for log files.
    #[arg(long, default_value = "log")]
    pub log_dir: PathBuf,
    /// Stop after writing `build.asm`.
    #[arg(long)]
    pub no_link: bool,
    /// Assembler program.
    #[arg(long, default_value = "nasm")]
    pub nasm: String,
    /// Linker program.
    #[arg(long, default_value = "gcc")]
    pub linker: String,
}

impl Args {
    /// Log level for the terminal logger.
    #[must_use]
    pub const fn log_level(&self) -> LevelFilter {
        if self.verbose || self.dev {
            LevelFilter::Info
        } else {
            LevelFilter::Warn
        }
    }

    #[must_use]
    pub fn into_config(self) -> DriverConfig {
        DriverConfig {
            options: CompileOptions {
                dump_tokens: self.lex || self.dev,
                permissive: self.permissive,
            },
            input: self.input,
            output: self.output,
            build_dir: self.build_dir,
            log_dir: self.log_dir,
            link: !self.no_link,
            toolchain: Toolchain {
                nasm: self.nasm,
                linker: self.linker,
            },
        }
    }
}
