//! Quill Compiler (`quillc`) command-line entry point.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(rust_2018_idioms)]

use std::process;

use anyhow::Context as _;
use clap::Parser;

use quillc::args::Args;
use quillc::compiler::driver::run_compiler;
use quillc::report_err;

fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(args.log_level())
        .format_timestamp(None)
        .init();

    let input = args.input.clone();
    let cfg = args.into_config();

    run_compiler(&cfg)
        .with_context(|| format!("failed to compile '{}'", input.display()))
}

fn main() {
    let program = std::env::args()
        .next()
        .unwrap_or_else(|| "quillc".to_string());

    if let Err(err) = run() {
        report_err!(program, "{err:#}");
        process::exit(1);
    }
}
