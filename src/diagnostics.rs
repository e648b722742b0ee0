//! Run-scoped diagnostic log.
//!
//! Every pipeline stage records its progress and problems here. Entries are
//! forwarded to the `log` facade as they arrive and the whole log is flushed
//! to `buildlog.log` by the driver at the end of a run.

use std::fmt;

/// Severity of a `LogEntry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// Single diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub message: String,
    pub severity: Severity,
}

impl LogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Info,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Warning,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity: Severity::Error,
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.severity, self.message)
    }
}

/// Append-only list of `LogEntry` values for one compiler run.
#[derive(Debug, Default)]
pub struct DiagnosticLog {
    entries: Vec<LogEntry>,
}

impl DiagnosticLog {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Records `entry`, forwarding it to the `log` facade.
    pub fn push(&mut self, entry: LogEntry) {
        match entry.severity {
            Severity::Info => log::info!("{}", entry.message),
            Severity::Warning => log::warn!("{}", entry.message),
            Severity::Error => log::error!("{}", entry.message),
        }

        self.entries.push(entry);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(LogEntry::info(message));
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.push(LogEntry::warning(message));
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(LogEntry::error(message));
    }

    /// Records every entry from `entries` in order.
    pub fn extend(&mut self, entries: impl IntoIterator<Item = LogEntry>) {
        for entry in entries {
            self.push(entry);
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.severity == Severity::Error)
            .count()
    }

    /// Returns `true` if any entry has `Severity::Error`, which makes the run
    /// exit with a non-zero status.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }
}

impl fmt::Display for DiagnosticLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }

        Ok(())
    }
}

/// Output of a best-effort stage: the (possibly partial) value together with
/// every diagnostic the stage produced.
#[derive(Debug)]
pub struct Checked<T> {
    pub value: T,
    pub diagnostics: Vec<LogEntry>,
}

impl<T> Checked<T> {
    pub const fn new(value: T, diagnostics: Vec<LogEntry>) -> Self {
        Self { value, diagnostics }
    }

    /// Continue flag: `true` if no diagnostic is an error.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.error_count() == 0
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|e| e.severity == Severity::Error)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_counts_only_errors() {
        let mut log = DiagnosticLog::new();
        log.info("Removing comments");
        log.warning("syntax analysis disabled");

        assert!(!log.has_errors());

        log.error("unmatched '{'");

        assert_eq!(log.error_count(), 1);
        assert_eq!(log.entries().len(), 3);
        assert_eq!(
            log.to_string(),
            "[INFO] Removing comments\n[WARNING] syntax analysis disabled\n[ERROR] unmatched '{'\n"
        );
    }

    #[test]
    fn checked_warnings_still_continue() {
        let checked = Checked::new((), vec![LogEntry::warning("permissive")]);
        assert!(checked.is_ok());

        let checked = Checked::new((), vec![LogEntry::info("a"), LogEntry::error("b")]);
        assert!(!checked.is_ok());
        assert_eq!(checked.error_count(), 1);
    }
}
