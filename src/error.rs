//! The interpreter's single error currency (spec.md §7).
//!
//! A flat, `strum`-derived error-kind enum plus a `RunResult<T>` alias: one error
//! type, carrying a `kind` tag plus structured context, rather than a tree of
//! `thiserror` enums per module. `RuntimeError` additionally carries a `trace` of
//! pipeline/stage/guard
//! breadcrumbs, since mlld errors are routinely raised several stages deep inside a
//! pipeline and the host needs that context to render a useful diagnostic.

use std::fmt;

use strum::{Display, EnumString};

use crate::ast::Location;

/// Result type alias used throughout the crate.
pub type RunResult<T> = Result<T, RuntimeError>;

/// The kind of failure, independent of the specific message (spec.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    ParseError,
    VariableRedefinition,
    UndefinedReference,
    FieldAccessError,
    ImportResolutionError,
    IntegrityError,
    NeedsUnsatisfied,
    ExecutionError,
    GuardDenial,
    BailError,
    CancellationError,
}

impl ErrorKind {
    /// Errors whose kind is inherently retryable (spec.md §7: "Errors whose kind is
    /// `retryable`"). Only `ExecutionError` is retryable by default — a failed shell
    /// command or a thrown JS/Python exception is exactly the case a pipeline `retry
    /// "hint"` exists to recover from.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::ExecutionError)
    }

    /// The process exit code this error kind maps to when surfaced at the top level
    /// of a CLI host (spec.md §6).
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::ParseError => 2,
            Self::ImportResolutionError | Self::IntegrityError | Self::NeedsUnsatisfied => 3,
            Self::GuardDenial => 4,
            Self::BailError => 5,
            Self::VariableRedefinition
            | Self::UndefinedReference
            | Self::FieldAccessError
            | Self::ExecutionError
            | Self::CancellationError => 1,
        }
    }
}

/// One entry in a `RuntimeError`'s trace: the pipeline/stage/guard context active when
/// the error was raised. Populated by the pipeline engine (C6) and guard enforcer (C7)
/// as an error unwinds through their frames.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum TraceEntry {
    Pipeline { pipeline_id: String, stage_index: usize },
    Guard { guard_name: String, scope: String },
    Directive { kind: String },
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pipeline { pipeline_id, stage_index } => {
                write!(f, "pipeline:{pipeline_id}@{stage_index}")
            }
            Self::Guard { guard_name, scope } => write!(f, "guard:{guard_name}@{scope}"),
            Self::Directive { kind } => write!(f, "directive:{kind}"),
        }
    }
}

/// A structured runtime error (spec.md §7).
///
/// One `RuntimeError` is raised per run; the output materializer commits whatever was
/// emitted before the error (spec.md §7, "User-visible failure").
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    pub location: Option<Location>,
    pub source_file: Option<String>,
    pub cause: Option<Box<RuntimeError>>,
    pub trace: Vec<TraceEntry>,
}

impl RuntimeError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            location: None,
            source_file: None,
            cause: None,
            trace: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub fn with_source_file(mut self, source_file: impl Into<String>) -> Self {
        self.source_file = Some(source_file.into());
        self
    }

    #[must_use]
    pub fn with_cause(mut self, cause: RuntimeError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Pushes a trace entry onto the *front* of the trace, so the outermost frame
    /// (closest to the top-level error site) reads first — matching the order a
    /// pipeline's stages were invoked in.
    pub fn push_trace(&mut self, entry: TraceEntry) {
        self.trace.insert(0, entry);
    }

    pub fn variable_redefinition(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ErrorKind::VariableRedefinition, format!("variable '{name}' is already defined in this scope"))
    }

    pub fn undefined_reference(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(ErrorKind::UndefinedReference, format!("'{name}' is not defined"))
    }

    pub fn field_access(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FieldAccessError, message)
    }

    pub fn import_resolution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ImportResolutionError, message)
    }

    pub fn integrity(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IntegrityError, message)
    }

    pub fn needs_unsatisfied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NeedsUnsatisfied, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExecutionError, message)
    }

    pub fn guard_denial(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::GuardDenial, message)
    }

    pub fn bail(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BailError, message)
    }

    pub fn cancellation() -> Self {
        Self::new(ErrorKind::CancellationError, "execution was cancelled by the host")
    }

    /// Whether this error's kind is retryable (spec.md §7).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(location) = &self.location {
            write!(f, " at {location}")?;
        }
        if let Some(source_file) = &self.source_file {
            write!(f, " ({source_file})")?;
        }
        for entry in &self.trace {
            write!(f, "\n  in {entry}")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, "\ncaused by: {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::{ErrorKind, RuntimeError, TraceEntry};

    #[test]
    fn exit_codes_match_spec() {
        assert_eq!(ErrorKind::ParseError.exit_code(), 2);
        assert_eq!(ErrorKind::ImportResolutionError.exit_code(), 3);
        assert_eq!(ErrorKind::GuardDenial.exit_code(), 4);
        assert_eq!(ErrorKind::BailError.exit_code(), 5);
        assert_eq!(ErrorKind::ExecutionError.exit_code(), 1);
    }

    #[test]
    fn only_execution_errors_are_retryable() {
        assert!(ErrorKind::ExecutionError.is_retryable());
        assert!(!ErrorKind::GuardDenial.is_retryable());
    }

    #[test]
    fn display_includes_trace_in_push_order() {
        let mut err = RuntimeError::execution("boom");
        err.push_trace(TraceEntry::Pipeline {
            pipeline_id: "p1".into(),
            stage_index: 0,
        });
        err.push_trace(TraceEntry::Guard {
            guard_name: "g".into(),
            scope: "secret".into(),
        });
        let rendered = err.to_string();
        assert!(rendered.contains("guard:g@secret"));
        assert!(rendered.contains("pipeline:p1@0"));
    }
}
