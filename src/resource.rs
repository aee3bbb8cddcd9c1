//! Resource accounting: recursion depth, loop iteration caps, and wall-clock limits.
//!
//! mlld has no managed heap, so this module skips allocation/memory accounting and
//! keeps the three limits that still apply to a tree-walking evaluator: recursion
//! depth (nested `/exe` calls,
//! nested `when`/`for` expressions), loop iteration counts (`/loop(max, interval)`,
//! spec.md §5), and execution deadlines (the host's `timeout` option, spec.md §6).

use std::{
    fmt,
    time::{Duration, Instant},
};

use crate::error::RuntimeError;

/// Error returned when a resource limit is exceeded during evaluation.
#[derive(Debug, Clone)]
pub enum ResourceError {
    /// `/loop` or a pipeline retry exceeded its iteration cap.
    Iteration { limit: usize, count: usize },
    /// The host-configured execution deadline elapsed.
    Time { limit: Duration, elapsed: Duration },
    /// Nested evaluation (directive/expression recursion) exceeded the configured depth.
    Recursion { limit: usize, depth: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Iteration { limit, count } => write!(f, "iteration limit exceeded: {count} > {limit}"),
            Self::Time { limit, elapsed } => write!(f, "time limit exceeded: {elapsed:?} > {limit:?}"),
            Self::Recursion { limit, depth } => write!(f, "recursion limit exceeded: {depth} > {limit}"),
        }
    }
}

impl std::error::Error for ResourceError {}

impl From<ResourceError> for RuntimeError {
    fn from(err: ResourceError) -> Self {
        RuntimeError::execution(err.to_string())
    }
}

/// Trait for tracking resource usage during a single `process()`/`execute()` run.
///
/// All implementations should be cheap to call at every loop iteration and every
/// directive dispatch — this is consulted far more often than any other host hook.
pub trait ResourceTracker: fmt::Debug {
    /// Called once per `/loop` or pipeline-retry iteration.
    fn on_iteration(&mut self) -> Result<(), ResourceError>;

    /// Called periodically (at directive boundaries) to check the wall-clock deadline.
    fn check_time(&mut self) -> Result<(), ResourceError>;

    /// Called before recursing into a nested evaluation (a directive inside a `when`
    /// action, a nested `/exe` call, a nested pipeline stage).
    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError>;
}

/// Default recursion depth, matching CPython's own default stack limit.
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1000;

/// Default cap applied to `/loop` and pipeline retries when the host does not override it.
pub const DEFAULT_MAX_LOOP_ITERATIONS: usize = 10_000;

/// Configuration for resource limits. All limits are optional; `None` disables a check.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ResourceLimits {
    pub max_iterations: Option<usize>,
    pub max_duration: Option<Duration>,
    pub max_recursion_depth: Option<usize>,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_iterations: Some(DEFAULT_MAX_LOOP_ITERATIONS),
            max_duration: None,
            max_recursion_depth: Some(DEFAULT_MAX_RECURSION_DEPTH),
        }
    }
}

impl ResourceLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_iterations(mut self, limit: usize) -> Self {
        self.max_iterations = Some(limit);
        self
    }

    #[must_use]
    pub fn max_duration(mut self, limit: Duration) -> Self {
        self.max_duration = Some(limit);
        self
    }

    #[must_use]
    pub fn max_recursion_depth(mut self, limit: Option<usize>) -> Self {
        self.max_recursion_depth = limit;
        self
    }
}

/// A resource tracker with no limits — used in tests and for trusted, host-supervised
/// embeddings where the host itself enforces a wall-clock timeout externally.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLimitTracker;

impl ResourceTracker for NoLimitTracker {
    fn on_iteration(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    fn check_time(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    fn check_recursion_depth(&self, _current_depth: usize) -> Result<(), ResourceError> {
        Ok(())
    }
}

/// A resource tracker that enforces [`ResourceLimits`].
#[derive(Debug)]
pub struct LimitedTracker {
    limits: ResourceLimits,
    start_time: Instant,
    iteration_count: usize,
}

impl LimitedTracker {
    #[must_use]
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            start_time: Instant::now(),
            iteration_count: 0,
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    #[must_use]
    pub fn iteration_count(&self) -> usize {
        self.iteration_count
    }
}

impl ResourceTracker for LimitedTracker {
    fn on_iteration(&mut self) -> Result<(), ResourceError> {
        self.iteration_count += 1;
        if let Some(max) = self.limits.max_iterations
            && self.iteration_count > max
        {
            return Err(ResourceError::Iteration {
                limit: max,
                count: self.iteration_count,
            });
        }
        Ok(())
    }

    fn check_time(&mut self) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_duration {
            let elapsed = self.start_time.elapsed();
            if elapsed > max {
                return Err(ResourceError::Time { limit: max, elapsed });
            }
        }
        Ok(())
    }

    fn check_recursion_depth(&self, current_depth: usize) -> Result<(), ResourceError> {
        if let Some(max) = self.limits.max_recursion_depth
            && current_depth >= max
        {
            return Err(ResourceError::Recursion {
                limit: max,
                depth: current_depth + 1,
            });
        }
        Ok(())
    }
}
