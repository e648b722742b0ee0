//! Quill Compiler (`quillc`).
//!
//! Compiles Quill source files into Intel-syntax 32-bit x86 assembly for
//! NASM (`-f win32`), then hands the module to an external assembler and
//! linker.

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::use_self)]
#![allow(clippy::redundant_else)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::module_name_repetitions)]
#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub mod args;
pub mod compiler;
pub mod diagnostics;
pub mod error;

use std::path::Path;

pub use compiler::pipeline::{CompileOptions, Compilation, compile_source};
pub use diagnostics::{DiagnosticLog, LogEntry, Severity};
pub use error::{CompileError, Result};

/// Information about the current compilation input.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    /// Path of the input _Quill_ file.
    pub in_path: &'a Path,
    /// Source text (raw before preprocessing, comment-free afterwards).
    pub src: &'a str,
}

impl<'a> Context<'a> {
    /// Returns a copy of the context reading from `src` instead.
    #[must_use]
    pub const fn with_src(&self, src: &'a str) -> Self {
        Self {
            in_path: self.in_path,
            src,
        }
    }

    /// Returns the content of the 1-based source line `line`, or an empty
    /// string if the line does not exist.
    #[must_use]
    pub fn src_line(&self, line: usize) -> &'a str {
        line.checked_sub(1)
            .and_then(|idx| self.src.lines().nth(idx))
            .unwrap_or("")
    }
}
