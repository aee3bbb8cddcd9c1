//! Sinks for `/log` output.
//!
//! `/log expr` (spec.md §4.3) writes to stderr; the executor bridge also routes captured
//! subprocess stderr here. A single write-method trait suffices since mlld's log lines
//! are always newline-terminated records rather than streamed argument-by-argument.

use std::io::{self, Write as _};

/// Trait for handling `/log` output.
///
/// Implement this to capture or redirect log lines emitted by sandboxed mlld source.
/// The default implementation, [`StderrLog`], writes to the process's stderr.
pub trait LogWriter {
    /// Writes one complete log line (without a trailing newline; the implementation
    /// adds it).
    fn log_line(&mut self, line: &str);
}

/// Default `LogWriter` that writes to stderr.
#[derive(Debug, Default)]
pub struct StderrLog;

impl LogWriter for StderrLog {
    fn log_line(&mut self, line: &str) {
        let mut stderr = io::stderr();
        let _ = writeln!(stderr, "{line}");
    }
}

/// A `LogWriter` that collects all output into a string, for tests and for hosts that
/// want to inspect log output programmatically instead of mixing it into the process's
/// stderr.
#[derive(Debug, Default)]
pub struct CollectLog(Vec<String>);

impl CollectLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn into_lines(self) -> Vec<String> {
        self.0
    }
}

impl LogWriter for CollectLog {
    fn log_line(&mut self, line: &str) {
        self.0.push(line.to_string());
    }
}

/// A `LogWriter` that discards all output.
#[derive(Debug, Default)]
pub struct NoLog;

impl LogWriter for NoLog {
    fn log_line(&mut self, _line: &str) {}
}

#[cfg(test)]
mod tests {
    use super::{CollectLog, LogWriter};

    #[test]
    fn collect_log_records_lines_in_order() {
        let mut log = CollectLog::new();
        log.log_line("first");
        log.log_line("second");
        assert_eq!(log.lines(), ["first", "second"]);
    }
}
