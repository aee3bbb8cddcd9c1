//! Interpreter execution tracing infrastructure.
//!
//! Provides a trait-based tracing system for the evaluator with zero-cost abstraction.
//! When using [`NoopTracer`], all trace methods compile away entirely via monomorphization —
//! identical to how [`NoLimitTracker`](crate::resource::NoLimitTracker) eliminates resource
//! checking overhead in production.
//!
//! # Architecture
//!
//! The [`EvalTracer`] trait defines hook points at key execution events: directive
//! dispatch, guard decisions, and pipeline stage transitions/retries. Concrete
//! implementations collect different kinds of data:
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (production default) |
//! | [`StderrTracer`] | Human-readable execution log to stderr |
//! | [`RecordingTracer`] | Full event recording, surfaced to source as `mx.guard.trace` |
//!
//! # Usage
//!
//! The evaluator is parameterized as `Evaluator<'a, T: ResourceTracker, L: LogWriter, Tr: EvalTracer>`.
//! Callers choose the tracer at construction time:
//!
//! ```ignore
//! // Production (zero overhead):
//! let mut ev = Evaluator::new(&mut env, &mut log, NoopTracer);
//!
//! // Debugging:
//! let mut ev = Evaluator::new(&mut env, &mut log, StderrTracer::new());
//! ```

use crate::ast::Location;

/// Trace event emitted during evaluation.
///
/// Used by [`RecordingTracer`] to capture a full execution trace, surfaced to mlld
/// source as `mx.guard.trace[].guardName` / `.replacement.value` / `.reason` (spec.md
/// §4.7).
#[derive(Debug, Clone)]
pub enum TraceEvent {
    /// A directive was dispatched.
    Directive {
        kind: String,
        location: Location,
    },
    /// A guard rule fired on a scope, producing an outcome.
    Guard {
        guard_name: String,
        scope: String,
        outcome: GuardOutcomeKind,
        reason: Option<String>,
    },
    /// A pipeline stage was invoked.
    PipelineStage {
        pipeline_id: String,
        stage_index: usize,
    },
    /// A pipeline stage was re-invoked after a `retry` outcome.
    PipelineRetry {
        pipeline_id: String,
        stage_index: usize,
        hint: String,
        attempt: u32,
    },
}

/// The coarse shape of a guard's decision, independent of any transform payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcomeKind {
    Allow,
    AllowTransformed,
    Deny,
    Retry,
}

/// Trait for evaluator execution tracing.
///
/// All methods have default no-op implementations, so [`NoopTracer`] requires zero
/// lines of code and compiles to zero instructions. Implementations only override the
/// hooks they care about. The evaluator carries the tracer as a type parameter
/// `Tr: EvalTracer`, so the compiler can inline and eliminate no-op calls at compile time
/// (identical to `ResourceTracker`).
pub trait EvalTracer: std::fmt::Debug {
    /// Called before a directive is dispatched. This is the hottest hook — called once
    /// per directive evaluated.
    #[inline(always)]
    fn on_directive(&mut self, _kind: &str, _location: Location) {}

    /// Called after a guard rule has produced an outcome for a hook point.
    #[inline(always)]
    fn on_guard(&mut self, _guard_name: &str, _scope: &str, _outcome: GuardOutcomeKind, _reason: Option<&str>) {}

    /// Called when a pipeline stage is invoked.
    #[inline(always)]
    fn on_pipeline_stage(&mut self, _pipeline_id: &str, _stage_index: usize) {}

    /// Called when a pipeline stage is re-invoked following a `retry` outcome.
    #[inline(always)]
    fn on_pipeline_retry(&mut self, _pipeline_id: &str, _stage_index: usize, _hint: &str, _attempt: u32) {}
}

/// A tracer that does nothing.
///
/// All trait methods use the default no-op implementations. Because the evaluator
/// carries the tracer as a type parameter, the compiler monomorphizes
/// `Evaluator<..., NoopTracer>` and inlines every hook to nothing — zero runtime cost.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl EvalTracer for NoopTracer {}

/// Tracer that prints a human-readable execution log to stderr.
///
/// Output format:
/// ```text
/// [var@3:0] directive dispatched
///   guard secret@op:show -> deny (no secrets in shell)
/// [pipeline p1] stage 0
///   retry "be better" (attempt 2)
/// ```
#[derive(Debug)]
pub struct StderrTracer {
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self { limit: None, count: 0, stopped: false }
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self { limit: Some(limit), count: 0, stopped: false }
    }

    fn tick(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} events) ---");
            self.stopped = true;
        }
        true
    }
}

impl Default for StderrTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl EvalTracer for StderrTracer {
    fn on_directive(&mut self, kind: &str, location: Location) {
        if self.tick() {
            eprintln!("[{location}] directive {kind}");
        }
    }

    fn on_guard(&mut self, guard_name: &str, scope: &str, outcome: GuardOutcomeKind, reason: Option<&str>) {
        if self.tick() {
            let reason = reason.map(|r| format!(" ({r})")).unwrap_or_default();
            eprintln!("  guard {guard_name}@{scope} -> {outcome:?}{reason}");
        }
    }

    fn on_pipeline_stage(&mut self, pipeline_id: &str, stage_index: usize) {
        if self.tick() {
            eprintln!("[pipeline {pipeline_id}] stage {stage_index}");
        }
    }

    fn on_pipeline_retry(&mut self, pipeline_id: &str, stage_index: usize, hint: &str, attempt: u32) {
        if self.tick() {
            eprintln!("[pipeline {pipeline_id}] stage {stage_index} retry \"{hint}\" (attempt {attempt})");
        }
    }
}

/// Tracer that records all events for deterministic replay or post-mortem analysis.
///
/// Captures every trace event into a `Vec<TraceEvent>`. Used by tests asserting on
/// guard ordering and by the `mx.guard.trace` reserved-variable implementation, which
/// filters this event stream down to guard events for the currently active pipeline.
#[derive(Debug)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self { events: Vec::new(), limit: None }
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self { events: Vec::with_capacity(limit.min(1024)), limit: Some(limit) }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    fn at_limit(&self) -> bool {
        self.limit.is_some_and(|l| self.events.len() >= l)
    }
}

impl Default for RecordingTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl EvalTracer for RecordingTracer {
    fn on_directive(&mut self, kind: &str, location: Location) {
        if self.at_limit() {
            return;
        }
        self.events.push(TraceEvent::Directive { kind: kind.to_string(), location });
    }

    fn on_guard(&mut self, guard_name: &str, scope: &str, outcome: GuardOutcomeKind, reason: Option<&str>) {
        if self.at_limit() {
            return;
        }
        self.events.push(TraceEvent::Guard {
            guard_name: guard_name.to_string(),
            scope: scope.to_string(),
            outcome,
            reason: reason.map(String::from),
        });
    }

    fn on_pipeline_stage(&mut self, pipeline_id: &str, stage_index: usize) {
        if self.at_limit() {
            return;
        }
        self.events.push(TraceEvent::PipelineStage {
            pipeline_id: pipeline_id.to_string(),
            stage_index,
        });
    }

    fn on_pipeline_retry(&mut self, pipeline_id: &str, stage_index: usize, hint: &str, attempt: u32) {
        if self.at_limit() {
            return;
        }
        self.events.push(TraceEvent::PipelineRetry {
            pipeline_id: pipeline_id.to_string(),
            stage_index,
            hint: hint.to_string(),
            attempt,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::{EvalTracer, GuardOutcomeKind, NoopTracer, RecordingTracer};
    use crate::ast::Location;

    #[test]
    fn noop_tracer_records_nothing_observable() {
        let mut tracer = NoopTracer;
        tracer.on_directive("var", Location::new(0, 0, 0));
    }

    #[test]
    fn recording_tracer_captures_guard_outcomes_in_order() {
        let mut tracer = RecordingTracer::new();
        tracer.on_guard("g1", "secret", GuardOutcomeKind::Deny, Some("no secrets"));
        tracer.on_guard("g2", "secret", GuardOutcomeKind::Allow, None);
        assert_eq!(tracer.events().len(), 2);
    }

    #[test]
    fn recording_tracer_respects_limit() {
        let mut tracer = RecordingTracer::with_limit(1);
        tracer.on_directive("var", Location::new(0, 0, 0));
        tracer.on_directive("show", Location::new(0, 1, 0));
        assert_eq!(tracer.events().len(), 1);
    }
}
