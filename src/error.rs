//! Compiler errors and macros for reporting them.

use thiserror::Error;

/// Result type used throughout the compilation pipeline.
pub type Result<T> = std::result::Result<T, CompileError>;

/// Fatal errors, classified by the pipeline stage that raised them.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Malformed comment (e.g. unterminated `/*`).
    #[error("{0}")]
    Preprocess(String),
    /// Unrecognized character, unterminated literal or malformed number.
    #[error("{0}")]
    Lex(String),
    /// Unbalanced braces or malformed signatures found while splitting
    /// functions.
    #[error("{count} structural error(s) found while separating functions")]
    Structure { count: usize },
    /// Violations found by the syntax analyzer, across all functions.
    #[error("{count} syntax error(s) found")]
    Syntax { count: usize },
    /// Unbalanced grouping found while converting an expression to postfix.
    #[error("{0}")]
    Postfix(String),
    /// Misuse of typed values that survives syntax analysis (e.g. `%` on
    /// floats).
    #[error("{0}")]
    Type(String),
    /// Broken invariant between pipeline stages (not a user error).
    #[error("internal compiler error: {0}")]
    Internal(String),
    /// External assembler or linker failed.
    #[error("{tool} failed:\n{stderr}")]
    Toolchain { tool: String, stderr: String },
    /// Reading input or writing build artifacts failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl CompileError {
    /// Returns `true` if the error indicates a bug in an upstream stage rather
    /// than a problem with the user's source.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, CompileError::Internal(_))
    }

    /// Wraps an I/O error with a description of the failed operation.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CompileError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Report a generic error message, printing to `stderr`.
#[macro_export]
macro_rules! report_err {
    ($program:expr, $($arg:tt)+) => {{
        eprintln!("\x1b[1;1m{}\x1b[0m: \x1b[1;31merror:\x1b[0m {}", $program, format!($($arg)+));
    }};
}

/// Format an error related to a token (with token position and line content)
/// into a `String`.
///
/// Messages end up in the build log, so no terminal escapes are used.
#[macro_export]
macro_rules! fmt_token_err {
    ($file:expr, $line:expr, $col:expr, $marker_len:expr, $line_content:expr, $($arg:tt)+) => {{
        format!(
            "{}:{line}:{col}: error: {}\n{:>5} | {}\n{:>5} | {:>col$}{}",
            $file,
            format!($($arg)+),
            $line,
            $line_content,
            "",
            "^",
            "~".repeat($marker_len),
            line = $line,
            col = $col
        )
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_err_points_at_column() {
        let msg = fmt_token_err!("a.ql", 2, 5, 2, "int x@ = 1;", "stray '{}' in program", '@');

        assert!(msg.starts_with("a.ql:2:5: error: stray '@' in program"));
        assert!(msg.ends_with("    ^~~"));
    }

    #[test]
    fn internal_errors_are_distinguished() {
        assert!(CompileError::Internal("bad postfix".into()).is_internal());
        assert!(!CompileError::Syntax { count: 1 }.is_internal());
    }
}
