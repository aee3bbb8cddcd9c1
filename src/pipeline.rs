//! Pipeline Engine (spec.md §4.6, C6).
//!
//! Chains stage invocations connected by `|`, with an optional parallel `||` form and
//! retry semantics driven by guard/`when` outcomes. Like [`crate::guard`], this module
//! does not itself know how to invoke a stage's executable (that requires the full
//! evaluator) — stage invocation and after-guard evaluation are injected through the
//! [`StageInvoker`] trait, keeping `pipeline` free of a dependency on `evaluator`.

use crate::ast::{Node, StageRef};
use crate::error::RuntimeError;
use crate::guard::GuardOutcome;
use crate::structured_value::StructuredValue;
use crate::tracer::EvalTracer;
use crate::value::Value;

/// Context exposed to stages via `@mx.try`, `@mx.tries`, `@mx.hint`, `@mx.hintHistory`,
/// `@mx.pipelineId`, `@mx.stageIndex` (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub pipeline_id: String,
    pub stage_index: usize,
    pub try_count: u32,
    pub max_retries: u32,
    pub hint: Option<String>,
    pub hint_history: Vec<String>,
}

impl PipelineContext {
    #[must_use]
    pub fn new(pipeline_id: impl Into<String>, stage_index: usize, max_retries: u32) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            stage_index,
            try_count: 0,
            max_retries,
            hint: None,
            hint_history: Vec::new(),
        }
    }
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Outcome of invoking a single pipeline stage's target (spec.md §4.6 step 4). A
/// stage's own `when` body can issue `retry`/`deny` directly, as a reserved verb,
/// rather than returning a value — distinct from an `after op:run` guard's `Retry`
/// (handled separately via [`StageInvoker::run_after_guards`]), which re-runs the
/// *same* stage. An in-body retry instead re-runs the *previous* stage.
#[derive(Debug, Clone)]
pub enum StageOutcome {
    Value(StructuredValue),
    RetryPrevious(String),
    Denied(String),
}

/// Injected capability: invokes a single pipeline stage's target and evaluates its
/// after-guards. Implemented by the evaluator (C3).
pub trait StageInvoker {
    fn invoke_stage(&mut self, target: &Node, input: &StructuredValue, ctx: &PipelineContext) -> Result<StageOutcome, RuntimeError>;

    fn run_after_guards(&mut self, output: StructuredValue, ctx: &PipelineContext) -> Result<GuardOutcome, RuntimeError>;
}

/// Recognizes the built-in `@json` / `@json.strict` / `@json.llm` transformers
/// (spec.md §4.6), which short-circuit stage invocation rather than dispatching to an
/// executable. Returns `None` for a stage that isn't a built-in transform.
fn builtin_transform(target: &Node, input: &StructuredValue) -> Option<Result<StructuredValue, RuntimeError>> {
    let Node::VariableReference { identifier, fields, .. } = target else {
        return None;
    };
    let name = match (identifier.as_str(), fields.first()) {
        ("json", None) => "json",
        ("json", Some(crate::ast::FieldAccess::Field(f))) if f == "strict" => "json.strict",
        ("json", Some(crate::ast::FieldAccess::Field(f))) if f == "llm" => "json.llm",
        _ => return None,
    };
    Some(apply_json_transform(name, input))
}

fn apply_json_transform(name: &str, input: &StructuredValue) -> Result<StructuredValue, RuntimeError> {
    let text = input.as_text();
    let parsed = match name {
        "json" | "json.strict" => Value::from_json_str(text.trim()),
        "json.llm" => {
            let extracted = extract_json_like_substring(text).unwrap_or(text);
            Value::from_json_str(extracted.trim())
        }
        _ => unreachable!("unrecognized transform name"),
    };
    let data = parsed.map_err(|e| RuntimeError::execution(format!("{name} transform failed: {e}")))?;
    let mut mx = input.mx.clone();
    mx.push_source(format!("pipeline:{name}"));
    Ok(StructuredValue::from_value(data, mx))
}

/// Extracts the first top-level `{...}` or `[...]` substring from LLM-style prose, for
/// `@json.llm`.
fn extract_json_like_substring(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let opener = text.as_bytes()[start];
    let closer = if opener == b'{' { b'}' } else { b']' };
    let mut depth = 0i32;
    for (i, b) in text.as_bytes().iter().enumerate().skip(start) {
        if *b == opener {
            depth += 1;
        } else if *b == closer {
            depth -= 1;
            if depth == 0 {
                return Some(&text[start..=i]);
            }
        }
    }
    None
}

/// Result of running one stage to completion, including its own after-guard retry
/// loop: either it produced a final value, or its body asked to retry the previous
/// stage (spec.md §4.6 step 4).
enum StageStepResult {
    Advance(StructuredValue),
    RetryPrevious(String),
}

/// The pipeline engine: runs a head value through a sequence of stages.
#[derive(Debug, Default)]
pub struct PipelineEngine;

impl PipelineEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Runs `head` through `stages` in order, applying retry semantics at each stage
    /// boundary (spec.md §4.6 steps 1-5). `pipeline_id` identifies this run for tracing
    /// and for `@mx.pipelineId`. `inputs[i]` is the value stage `i` was last invoked
    /// with, kept around so a stage's own in-body `retry` can re-invoke stage `i - 1`
    /// with the exact input it originally received (spec.md §4.6 step 4).
    pub fn run_sequential(
        &self,
        pipeline_id: &str,
        head: StructuredValue,
        stages: &[StageRef],
        invoker: &mut dyn StageInvoker,
        tracer: &mut dyn EvalTracer,
    ) -> Result<StructuredValue, RuntimeError> {
        let mut inputs = vec![head];
        let mut stage_index = 0usize;
        // How many retry-previous rounds this position has been through. When a
        // stage retries the one before it, both stages are re-entering the same
        // round, so the retried stage inherits the requester's count: a `@mx.try`
        // read inside either stage during that round sees the same number.
        let mut retry_counts = vec![0u32; stages.len()];
        while stage_index < stages.len() {
            let input = inputs[stage_index].clone();
            match self.run_stage(pipeline_id, stage_index, &stages[stage_index].target, input, retry_counts[stage_index], invoker, tracer)? {
                StageStepResult::Advance(value) => {
                    inputs.truncate(stage_index + 1);
                    inputs.push(value);
                    stage_index += 1;
                }
                StageStepResult::RetryPrevious(hint) => {
                    if stage_index == 0 {
                        return Err(RuntimeError::execution(format!(
                            "pipeline '{pipeline_id}' stage 0 requested retry of a previous stage, but it is the first stage"
                        )));
                    }
                    retry_counts[stage_index] += 1;
                    if retry_counts[stage_index] > DEFAULT_MAX_RETRIES {
                        return Err(RuntimeError::execution(format!(
                            "pipeline '{pipeline_id}' stage {stage_index} exceeded max retries ({DEFAULT_MAX_RETRIES}) retrying a previous stage"
                        )));
                    }
                    tracer.on_pipeline_retry(pipeline_id, stage_index, &hint, retry_counts[stage_index]);
                    stage_index -= 1;
                    retry_counts[stage_index] = retry_counts[stage_index + 1];
                }
            }
        }
        Ok(inputs.into_iter().last().unwrap_or_else(StructuredValue::null))
    }

    fn run_stage(
        &self,
        pipeline_id: &str,
        stage_index: usize,
        target: &Node,
        input: StructuredValue,
        initial_try_count: u32,
        invoker: &mut dyn StageInvoker,
        tracer: &mut dyn EvalTracer,
    ) -> Result<StageStepResult, RuntimeError> {
        let mut ctx = PipelineContext::new(pipeline_id, stage_index, DEFAULT_MAX_RETRIES);
        ctx.try_count = initial_try_count;
        let stage_input = input;
        loop {
            tracer.on_pipeline_stage(pipeline_id, stage_index);
            let outcome = if let Some(result) = builtin_transform(target, &stage_input) {
                StageOutcome::Value(result?)
            } else {
                invoker.invoke_stage(target, &stage_input, &ctx)?
            };
            let output = match outcome {
                StageOutcome::RetryPrevious(hint) => return Ok(StageStepResult::RetryPrevious(hint)),
                StageOutcome::Denied(reason) => return Err(RuntimeError::guard_denial(reason)),
                StageOutcome::Value(value) => value,
            };
            let output_for_allow = output.clone();
            match invoker.run_after_guards(output, &ctx)? {
                GuardOutcome::Allow => return Ok(StageStepResult::Advance(output_for_allow)),
                GuardOutcome::AllowTransformed(value) => return Ok(StageStepResult::Advance(value)),
                GuardOutcome::Deny(reason) => {
                    return Err(RuntimeError::guard_denial(reason));
                }
                GuardOutcome::Retry(hint) => {
                    if ctx.try_count >= ctx.max_retries {
                        return Err(RuntimeError::execution(format!(
                            "pipeline '{pipeline_id}' stage {stage_index} exceeded max retries ({})",
                            ctx.max_retries
                        )));
                    }
                    ctx.try_count += 1;
                    ctx.hint_history.push(hint.clone());
                    ctx.hint = Some(hint.clone());
                    tracer.on_pipeline_retry(pipeline_id, stage_index, &hint, ctx.try_count);
                    // stage_input unchanged: re-invoke the same stage with the same input.
                }
            }
        }
    }

    /// Runs every stage over the same `input` concurrently and returns results ordered
    /// by source position (spec.md §4.6 parallel variant, §5 join ordering guarantee).
    ///
    /// This crate is single-threaded and cooperatively asynchronous (spec.md §5): "join"
    /// here means driving each stage's synchronous invocation to completion in turn
    /// while preserving the *result* ordering contract; a host embedding this engine in
    /// a multi-threaded executor may run `invoke_stage` calls on separate tasks as long
    /// as it preserves this ordering when collecting results.
    pub fn run_parallel(
        &self,
        pipeline_id: &str,
        input: StructuredValue,
        stages: &[StageRef],
        invoker: &mut dyn StageInvoker,
        tracer: &mut dyn EvalTracer,
    ) -> Result<StructuredValue, RuntimeError> {
        let mut results = Vec::with_capacity(stages.len());
        for (stage_index, stage) in stages.iter().enumerate() {
            match self.run_stage(pipeline_id, stage_index, &stage.target, input.clone(), 0, invoker, tracer)? {
                StageStepResult::Advance(value) => results.push(value),
                StageStepResult::RetryPrevious(_) => {
                    return Err(RuntimeError::execution(format!(
                        "pipeline '{pipeline_id}' stage {stage_index} requested retry of a previous stage, which is not supported in a parallel pipeline"
                    )));
                }
            }
        }
        let mut mx = crate::structured_value::Mx::new();
        let mut items = Vec::with_capacity(results.len());
        for value in &results {
            mx.merge_from(&value.mx);
            items.push(value.as_data().clone());
        }
        Ok(StructuredValue::from_value(Value::Array(items), mx))
    }
}
