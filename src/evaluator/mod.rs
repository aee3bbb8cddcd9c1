//! The Evaluator (spec.md §4.3, C3) — the tree-walking dispatch hub that ties every
//! other component together.
//!
//! Every narrow-capability trait defined elsewhere in this crate
//! ([`crate::guard::GuardActionEvaluator`], [`crate::pipeline::StageInvoker`],
//! [`crate::interpolator::ExpressionResolver`], [`crate::resolver::ModuleInterpreter`],
//! [`methods::MethodCallback`]) is implemented here, against [`Evaluator`] itself. This
//! is the one module allowed to depend on `guard`, `pipeline`, `interpolator`, and
//! `resolver` simultaneously — every other module depends on at most one of them,
//! through these traits, specifically so that `evaluator` can be the sole place that
//! wires them together (spec.md §9 "resolve via narrow capability interfaces").
//!
//! Parameterized as a generic dispatch hub
//! (`Evaluator<'a, R: ResourceTracker, L: LogWriter, Tr: EvalTracer>`, per
//! [`crate::tracer`]'s module doc), so a production host gets a zero-cost `NoopTracer`/
//! `LimitedTracker` instantiation and a test gets `RecordingTracer`/`NoLimitTracker`
//! without either paying for a trait-object dispatch on the hot path.

pub mod for_loop;
pub mod methods;

use std::str::FromStr;

use indexmap::IndexMap;

use crate::ast::{BinaryOperator, DirectiveKind, ExeBody, FieldAccess, Node, Param, UnaryOperator};
use crate::capability::CapabilitySet;
use crate::env::{Environment, Executable, Variable, VariableKind, VariableSource};
use crate::error::RuntimeError;
use crate::executor::{ExecutorBridge, Language};
use crate::guard::{GuardActionEvaluator, GuardOutcome, GuardRegistry, GuardRule, GuardTiming, OpDescriptor, OpFamily, Scope};
use crate::host::{Clock, FileSystem, Random, ShadowFnSpec};
use crate::interpolator::{self, ExpressionResolver, FileLoadRequest};
use crate::labels::LabelSet;
use crate::materializer::{self, Materializer, OutputFormat};
use crate::pipeline::{PipelineContext, PipelineEngine, StageInvoker, StageOutcome};
use crate::resolver::{ImportClause, ModuleInterpreter, Resolver};
use crate::resource::ResourceTracker;
use crate::structured_value::{Mx, StructuredValue};
use crate::tracer::EvalTracer;
use crate::value::Value;

use for_loop::NoWait;
use methods::MethodCallback;

/// Host-provided material an [`Evaluator`] is constructed with for the lifetime of a
/// single run — everything it does not own itself (spec.md §6 injected capabilities).
pub struct HostContext<'a> {
    pub fs: &'a dyn FileSystem,
    pub clock: &'a dyn Clock,
    pub random: &'a dyn Random,
    pub resolver: &'a Resolver<'a>,
    pub executor: ExecutorBridge<'a>,
}

/// A `retry`/`deny` result from the body of a pipeline stage's own `when` (spec.md
/// §4.6 step 4), recognized the same way a guard rule's `eval_action` recognizes
/// those verbs.
#[derive(Debug, Clone)]
enum PendingStageSignal {
    Retry(String),
    Deny(String),
}

/// The tree-walking evaluator. See module documentation for the generic parameters'
/// rationale.
///
/// `guards` and `tracer` are owned fields rather than references because every call
/// into [`GuardRegistry::run`] or [`PipelineEngine::run_sequential`]/`run_parallel`
/// needs `self` passed back as the narrow-capability trait object *and* needs its own
/// registry/tracer argument — two independent mutable views of the same data can't
/// coexist as borrows, so [`Evaluator::run_guards`] and the pipeline dispatch
/// temporarily [`std::mem::take`] these fields into locals before the call and restore
/// them afterward. `resolver` is instead a shared reference: `Resolver::import` only
/// ever needs `&self`, so handing it out is a cheap `Copy` of the reference with no
/// aliasing conflict when `self` is simultaneously reborrowed mutably as the
/// [`ModuleInterpreter`] argument.
pub struct Evaluator<'a, R: ResourceTracker, L: crate::io::LogWriter, Tr: EvalTracer + Default> {
    host: HostContext<'a>,
    log: &'a mut L,
    tracer: Tr,
    guards: GuardRegistry,
    resources: R,
    materializer: Materializer,
    capabilities: CapabilitySet,
    depth: usize,
    current_op: Option<OpDescriptor>,
    current_pipeline: Option<PipelineContext>,
    current_pipeline_env: Option<Environment>,
    /// Set while a [`StageInvoker::invoke_stage`] call is on the stack, so `eval_when`
    /// knows whether a `retry`/`deny` action is being evaluated inside a pipeline
    /// stage's own body (where those verbs are meaningful) or elsewhere (where they
    /// aren't). A counter rather than a bool so nested pipelines nest correctly.
    pipeline_stage_depth: u32,
    /// Side channel `eval_when` uses to report a `retry`/`deny` action back to
    /// [`StageInvoker::invoke_stage`], which drains it immediately after the call
    /// returns. `eval_when` itself returns an ordinary `StructuredValue` (it is also
    /// used outside any pipeline), so this is the only way to carry the extra signal
    /// out of that one return value.
    pending_stage_signal: Option<PendingStageSignal>,
    env_vars: IndexMap<String, String>,
    state: Value,
    debug: bool,
    stdin_content: String,
    approve_all_imports: bool,
}

impl<'a, R: ResourceTracker, L: crate::io::LogWriter, Tr: EvalTracer + Default> Evaluator<'a, R, L, Tr> {
    #[must_use]
    pub fn new(host: HostContext<'a>, log: &'a mut L, tracer: Tr, resources: R, capabilities: CapabilitySet) -> Self {
        Self {
            host,
            log,
            tracer,
            guards: GuardRegistry::new(),
            resources,
            materializer: Materializer::new(),
            capabilities,
            depth: 0,
            current_op: None,
            current_pipeline: None,
            current_pipeline_env: None,
            pipeline_stage_depth: 0,
            pending_stage_signal: None,
            env_vars: IndexMap::new(),
            state: Value::Object(IndexMap::new()),
            debug: false,
            stdin_content: String::new(),
            approve_all_imports: true,
        }
    }

    pub fn seed_state(&mut self, state: Value) {
        self.state = state;
    }

    /// Replaces the registered `/guard` rules, for a host carrying them forward across
    /// multiple `Evaluator` instances (e.g. [`crate::runtime::Handle`]'s per-step
    /// evaluators, each of which seeds from the previous step's accumulated registry).
    pub fn seed_guards(&mut self, guards: GuardRegistry) {
        self.guards = guards;
    }

    /// The registered `/guard` rules, for a host that needs to carry them forward (see
    /// [`Evaluator::seed_guards`]). A reference rather than `into_guards(self)`, since a
    /// caller like [`crate::runtime::Handle::step`] also needs `into_state_writes(self)`
    /// off the same evaluator and can only consume it once.
    #[must_use]
    pub fn guards(&self) -> &GuardRegistry {
        &self.guards
    }

    /// The current `@state` value, for a host that needs to carry it forward across
    /// multiple [`Evaluator`] instances (e.g. [`crate::runtime::Handle`]'s per-step
    /// evaluators, each of which seeds from the previous step's final state).
    #[must_use]
    pub fn state(&self) -> &Value {
        &self.state
    }

    pub fn set_approve_all_imports(&mut self, approve_all: bool) {
        self.approve_all_imports = approve_all;
    }

    /// Updates one dotted path under `@state` (spec.md §6 `Handle::updateState`),
    /// creating intermediate objects as needed. A non-object value along the path is
    /// overwritten rather than traversed into.
    pub fn set_state_path(&mut self, path: &str, value: Value) {
        let mut cursor = &mut self.state;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            if !matches!(cursor, Value::Object(_)) {
                *cursor = Value::Object(IndexMap::new());
            }
            let Value::Object(map) = cursor else { unreachable!("just normalized above") };
            if segments.peek().is_none() {
                map.insert(segment.to_string(), value);
                return;
            }
            cursor = map.entry(segment.to_string()).or_insert(Value::Null);
        }
    }

    pub fn seed_env_vars(&mut self, vars: IndexMap<String, String>) {
        self.env_vars = vars;
    }

    pub fn seed_stdin(&mut self, content: String) {
        self.stdin_content = content;
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    #[must_use]
    pub fn render(&self, format: OutputFormat) -> String {
        self.materializer.render(format)
    }

    #[must_use]
    pub fn into_state_writes(self) -> Vec<crate::materializer::StateWrite> {
        self.materializer.into_state_writes()
    }

    fn enter(&mut self) -> Result<(), RuntimeError> {
        self.resources.check_recursion_depth(self.depth)?;
        self.depth += 1;
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Runs a top-level node sequence (one source file's worth) against `env`, in
    /// source order, accumulating output into the materializer (spec.md §4.3: "the
    /// evaluator walks nodes in source order").
    pub fn run(&mut self, nodes: &[Node], env: &Environment) -> Result<(), RuntimeError> {
        for node in nodes {
            match node {
                Node::Text { content, .. } => self.materializer.emit(content.clone(), "text"),
                Node::Directive { kind, subtype, values, raw, params, exe_body, location } => {
                    self.tracer.on_directive(&kind.to_string(), *location);
                    if let Some(result) = self
                        .eval_directive(*kind, subtype.as_deref(), values, raw, params, exe_body.as_ref(), env)
                        .map_err(|e| e.with_location(*location))?
                    {
                        if matches!(kind, DirectiveKind::Show) {
                            self.materializer.emit(result.as_text(), "show");
                        }
                    }
                }
                other => {
                    let result = self.eval_node(other, env)?;
                    self.materializer.emit(result.as_text(), "expr");
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------- expressions --

    /// Evaluates any expression-kind AST node against `env` (spec.md §3, §4.3.2).
    pub fn eval_node(&mut self, node: &Node, env: &Environment) -> Result<StructuredValue, RuntimeError> {
        self.enter()?;
        let result = self.eval_node_inner(node, env);
        self.leave();
        result
    }

    fn eval_node_inner(&mut self, node: &Node, env: &Environment) -> Result<StructuredValue, RuntimeError> {
        match node {
            Node::Text { content, .. } => Ok(StructuredValue::text(content.clone())),
            Node::VariableReference { identifier, fields, .. } => self.eval_variable_reference(identifier, fields, env),
            Node::FileLoad { path_expr, section, selector, .. } => {
                let path_value = self.eval_node(path_expr, env)?;
                let request = FileLoadRequest {
                    path: path_value.as_text(),
                    section: section.as_deref(),
                    selector: selector.as_deref(),
                };
                let fs = self.host.fs;
                interpolator::load_file(&request, fs)
            }
            Node::ExecInvocation { target, args, .. } => {
                let executable = self.resolve_executable(target, env)?;
                let mut bound = Vec::with_capacity(args.len());
                for arg in args {
                    bound.push(self.eval_node(arg, env)?);
                }
                self.invoke_callable(&executable, bound, env)
            }
            Node::Template { body, .. } => {
                let fs = self.host.fs;
                interpolator::interpolate(body, env, self, fs)
            }
            Node::WhenExpression { mode, arms, .. } => self.eval_when(*mode, arms, env),
            Node::ForExpression { variable, iterable, body, .. } => {
                let items_value = self.eval_node(iterable, env)?;
                let items = items_value.as_data().as_array().unwrap_or(&[]).to_vec();
                let base_env = env.clone();
                let results = {
                    let this = &mut *self;
                    let outer = base_env.clone();
                    for_loop::eval_for(variable, &items, &base_env, |child_env| {
                        this.resources.on_iteration()?;
                        let result = this.eval_node(body, child_env)?;
                        outer.merge_assignments(child_env);
                        Ok(result)
                    })?
                };
                let mut mx = Mx::new();
                let mut data = Vec::with_capacity(results.len());
                for r in &results {
                    mx.merge_from(&r.mx);
                    data.push(r.as_data().clone());
                }
                Ok(StructuredValue::from_value(Value::Array(data), mx))
            }
            Node::LoopExpression { max, interval_ms, until_condition, body, .. } => {
                let env = env.clone();
                let mut waiter = NoWait;
                let mut last = StructuredValue::null();
                {
                    let this = &mut *self;
                    for_loop::eval_loop(*max, *interval_ms, &env, &mut waiter, |e| {
                        if this.eval_node(until_condition, e)?.as_data().is_truthy() {
                            return Ok(for_loop::LoopControl::Stop);
                        }
                        this.resources.on_iteration()?;
                        last = this.eval_node(body, e)?;
                        Ok(for_loop::LoopControl::Continue)
                    })?;
                }
                Ok(last)
            }
            Node::PipelineExpression { head, stages, parallel, .. } => {
                let head_value = self.eval_node(head, env)?;
                let pipeline_id = format!("p{}", self.host.random.gen_u64());
                let engine = PipelineEngine::new();
                self.current_pipeline_env = Some(env.clone());
                let mut tracer = std::mem::take(&mut self.tracer);
                let result = if *parallel {
                    engine.run_parallel(&pipeline_id, head_value, stages, self, &mut tracer)
                } else {
                    engine.run_sequential(&pipeline_id, head_value, stages, self, &mut tracer)
                };
                self.tracer = tracer;
                result
            }
            Node::BinaryOp { op, left, right, .. } => self.eval_binary_op(*op, left, right, env),
            Node::UnaryOp { op, operand, .. } => self.eval_unary_op(*op, operand, env),
            Node::Ternary { condition, if_true, if_false, .. } => {
                let cond = self.eval_node(condition, env)?;
                if cond.as_data().is_truthy() {
                    self.eval_node(if_true, env)
                } else {
                    self.eval_node(if_false, env)
                }
            }
            Node::StringLiteral { value, interpolated, .. } => {
                if *interpolated {
                    self.interpolate_string_literal(value, env)
                } else {
                    Ok(StructuredValue::text(value.clone()))
                }
            }
            Node::NumberLiteral { value, .. } => Ok(StructuredValue::number(*value)),
            Node::BooleanLiteral { value, .. } => Ok(StructuredValue::boolean(*value)),
            Node::ObjectLiteral { entries, .. } => {
                let mut mx = Mx::new();
                let mut object = IndexMap::new();
                for (key, expr) in entries {
                    let value = self.eval_node(expr, env)?;
                    mx.merge_from(&value.mx);
                    object.insert(key.clone(), value.as_data().clone());
                }
                Ok(StructuredValue::from_value(Value::Object(object), mx))
            }
            Node::ArrayLiteral { items, .. } => {
                let mut mx = Mx::new();
                let mut array = Vec::with_capacity(items.len());
                for expr in items {
                    let value = self.eval_node(expr, env)?;
                    mx.merge_from(&value.mx);
                    array.push(value.as_data().clone());
                }
                Ok(StructuredValue::from_value(Value::Array(array), mx))
            }
            Node::Directive { kind, subtype, values, raw, params, exe_body, .. } => {
                let result = self.eval_directive(*kind, subtype.as_deref(), values, raw, params, exe_body.as_ref(), env)?;
                Ok(result.unwrap_or_else(StructuredValue::null))
            }
        }
    }

    /// `when [ ... ]` evaluation shared by the `/when` directive, `WhenExpression`
    /// nodes, and `/exe` `when` bodies (spec.md §4.3.1). This extends a single child
    /// environment arm-by-arm so a `let @x = ...` binding is visible to every later arm
    /// in the same block, then hoists that block's assignments back into `base_env` the
    /// way `for`/`loop` bodies do (block-scoping, not a module export) — both condition
    /// and action evaluation need `&mut self`, which rules out expressing this as a pair
    /// of independent injected closures the way [`crate::guard::GuardRegistry::run`]
    /// does for guard arms.
    fn eval_when(&mut self, mode: crate::ast::WhenMode, arms: &[crate::ast::WhenArm], base_env: &Environment) -> Result<StructuredValue, RuntimeError> {
        let action_env = base_env.child();
        let mut results = Vec::new();
        for arm in arms {
            if let Some((name, expr)) = &arm.binding {
                let value = self.eval_node(expr, &action_env)?;
                action_env.set_overwrite(Variable::new(
                    name.clone(),
                    VariableKind::Computed,
                    value,
                    VariableSource::Computed { expression: name.clone() },
                ));
            }
            let matched = match &arm.condition {
                Some(cond) => self.eval_when_condition(cond, &action_env)?,
                None => true,
            };
            if !matched {
                continue;
            }
            results.push(self.eval_when_action(&arm.action, &action_env)?);
            if matches!(mode, crate::ast::WhenMode::Simple | crate::ast::WhenMode::First | crate::ast::WhenMode::Any) {
                break;
            }
        }
        base_env.merge_assignments(&action_env);
        if results.len() == 1 {
            Ok(results.remove(0))
        } else if results.is_empty() {
            Ok(StructuredValue::null())
        } else {
            let mut mx = Mx::new();
            let mut items = Vec::with_capacity(results.len());
            for r in &results {
                mx.merge_from(&r.mx);
                items.push(r.as_data().clone());
            }
            Ok(StructuredValue::from_value(Value::Array(items), mx))
        }
    }

    /// Evaluates one matched `when` arm's action. `retry "hint"` / `deny "reason"` are
    /// reserved verbs shared with guard rules (spec.md §4.7, §4.6 step 4) rather than
    /// ordinary executable calls: inside a pipeline stage's own body they report back
    /// to [`StageInvoker::invoke_stage`] via `pending_stage_signal`; anywhere else
    /// there is no pipeline to retry or deny, so they're a user error instead.
    fn eval_when_action(&mut self, action: &Node, env: &Environment) -> Result<StructuredValue, RuntimeError> {
        if let Node::ExecInvocation { target, args, .. } = action {
            if let Node::VariableReference { identifier, fields, .. } = target.as_ref() {
                if fields.is_empty() && matches!(identifier.as_str(), "retry" | "deny") {
                    if self.pipeline_stage_depth == 0 {
                        return Err(RuntimeError::execution(format!(
                            "'{identifier}' is only valid inside a pipeline stage's own `when` body"
                        )));
                    }
                    let arg_value = match args.first() {
                        Some(node) => self.eval_node(node, env)?,
                        None => StructuredValue::null(),
                    };
                    let text = arg_value.as_text().to_string();
                    self.pending_stage_signal = Some(if identifier == "retry" {
                        PendingStageSignal::Retry(text)
                    } else {
                        PendingStageSignal::Deny(text)
                    });
                    return Ok(arg_value);
                }
            }
        }
        self.eval_node(action, env)
    }

    fn interpolate_string_literal(&mut self, text: &str, env: &Environment) -> Result<StructuredValue, RuntimeError> {
        // Scans `@identifier[.field]*` placeholders and resolves them through the
        // environment, matching the interpolator's variable-reference handling for
        // templates but operating directly on an already-tokenized string literal
        // rather than a pre-split node sequence.
        static PLACEHOLDER: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
        #[expect(clippy::expect_used, reason = "pattern is a fixed literal, compilation cannot fail at runtime")]
        let re = PLACEHOLDER.get_or_init(|| regex::Regex::new(r"@([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)").expect("valid regex"));

        let mut out = String::new();
        let mut mx = Mx::new();
        let mut last = 0;
        for cap in re.captures_iter(text) {
            #[expect(clippy::expect_used, reason = "group 0 is the whole match, always present after captures_iter yields")]
            let whole = cap.get(0).expect("capture 0 always present");
            out.push_str(&text[last..whole.start()]);
            let path = &cap[1];
            let mut parts = path.split('.');
            let identifier = parts.next().unwrap_or_default();
            let var = env
                .get(identifier)
                .ok_or_else(|| RuntimeError::undefined_reference(identifier))?;
            let mut current = var.value;
            for field in parts {
                current = self.access_field_name(&current, field)?;
            }
            out.push_str(current.as_text());
            mx.merge_from(&current.mx);
            last = whole.end();
        }
        out.push_str(&text[last..]);
        mx.push_source("string-literal");
        Ok(StructuredValue::new(out.clone(), Value::String(out), mx))
    }

    fn access_field_name(&self, value: &StructuredValue, field: &str) -> Result<StructuredValue, RuntimeError> {
        let object = value
            .as_data()
            .as_object()
            .ok_or_else(|| RuntimeError::field_access(format!("cannot access field '{field}' on a non-object value")))?;
        let found = object
            .get(field)
            .ok_or_else(|| RuntimeError::field_access(format!("field '{field}' not found")))?;
        Ok(StructuredValue::from_value(found.clone(), value.mx.clone()))
    }

    fn eval_variable_reference(&mut self, identifier: &str, fields: &[FieldAccess], env: &Environment) -> Result<StructuredValue, RuntimeError> {
        if let Some(reserved) = self.resolve_reserved(identifier, env) {
            return self.apply_field_chain(reserved, fields, env);
        }
        let var = env.get(identifier).ok_or_else(|| RuntimeError::undefined_reference(identifier))?;
        self.apply_field_chain(var.value, fields, env)
    }

    /// Synthesizes reserved variables (spec.md §6): `@debug`, `@state`, `@env`, `@now`,
    /// `@stdin`, `@ctx`, `@mx`. `@keychain` always denies.
    fn resolve_reserved(&mut self, name: &str, _env: &Environment) -> Option<StructuredValue> {
        match name {
            "debug" => Some(StructuredValue::boolean(self.debug)),
            "state" => Some(StructuredValue::from_value(self.state.clone(), Mx::new())),
            "env" => {
                let object = self.env_vars.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect();
                Some(StructuredValue::from_value(Value::Object(object), Mx::new()))
            }
            "now" => Some(StructuredValue::number(self.host.clock.now_unix_millis() as f64)),
            "stdin" => Some(StructuredValue::text(self.stdin_content.clone())),
            "mx" | "p" => Some(self.current_pipeline_context()),
            "ctx" => Some(self.current_op_context()),
            "keychain" => Some(StructuredValue::null()),
            _ => None,
        }
    }

    fn current_pipeline_context(&self) -> StructuredValue {
        let mut fields = IndexMap::new();
        if let Some(ctx) = &self.current_pipeline {
            fields.insert("try".to_string(), Value::Number(f64::from(ctx.try_count)));
            fields.insert("tries".to_string(), Value::Number(f64::from(ctx.max_retries)));
            fields.insert("hint".to_string(), ctx.hint.clone().map(Value::String).unwrap_or(Value::Null));
            fields.insert(
                "hintHistory".to_string(),
                Value::Array(ctx.hint_history.iter().cloned().map(Value::String).collect()),
            );
            fields.insert("pipelineId".to_string(), Value::String(ctx.pipeline_id.clone()));
            fields.insert("stageIndex".to_string(), Value::Number(ctx.stage_index as f64));
        }
        if let Some(op) = &self.current_op {
            let mut op_fields = IndexMap::new();
            op_fields.insert("type".to_string(), Value::String(op.op_type.to_string()));
            op_fields.insert("name".to_string(), Value::String(op.name.clone()));
            op_fields.insert("target".to_string(), op.target.clone().map(Value::String).unwrap_or(Value::Null));
            fields.insert("op".to_string(), Value::Object(op_fields));
        }
        StructuredValue::from_value(Value::Object(fields), Mx::new())
    }

    fn current_op_context(&self) -> StructuredValue {
        StructuredValue::from_value(Value::Object(IndexMap::new()), Mx::new())
    }

    fn apply_field_chain(&mut self, mut value: StructuredValue, fields: &[FieldAccess], env: &Environment) -> Result<StructuredValue, RuntimeError> {
        for field in fields {
            value = match field {
                FieldAccess::Field(name) => self.access_field_name(&value, name)?,
                FieldAccess::Index(index_expr) => {
                    let index = self.eval_node(index_expr, env)?;
                    let i = index.as_data().as_f64().unwrap_or(0.0) as usize;
                    let items = value
                        .as_data()
                        .as_array()
                        .ok_or_else(|| RuntimeError::field_access("index access on a non-array value"))?;
                    let item = items.get(i).ok_or_else(|| RuntimeError::field_access(format!("index {i} out of range")))?;
                    StructuredValue::from_value(item.clone(), value.mx.clone())
                }
                FieldAccess::Slice { start, end } => {
                    let items = value
                        .as_data()
                        .as_array()
                        .ok_or_else(|| RuntimeError::field_access("slice access on a non-array value"))?
                        .to_vec();
                    let start = match start {
                        Some(e) => self.eval_node(e, env)?.as_data().as_f64().unwrap_or(0.0) as usize,
                        None => 0,
                    };
                    let end = match end {
                        Some(e) => self.eval_node(e, env)?.as_data().as_f64().unwrap_or(items.len() as f64) as usize,
                        None => items.len(),
                    };
                    let sliced = items.get(start.min(items.len())..end.min(items.len())).unwrap_or_default().to_vec();
                    StructuredValue::from_value(Value::Array(sliced), value.mx.clone())
                }
                FieldAccess::MethodCall { name, args } => self.eval_method_call(&value, name, args, env)?,
            };
        }
        Ok(value)
    }

    fn eval_method_call(&mut self, receiver: &StructuredValue, name: &str, args: &[Node], env: &Environment) -> Result<StructuredValue, RuntimeError> {
        if name == "isDefined" {
            return methods::call_universal_method(receiver, name);
        }
        if matches!(name, "filter" | "map") {
            let callback_node = args.first().ok_or_else(|| RuntimeError::field_access(format!("'{name}' requires a callback argument")))?;
            let executable = self.resolve_executable(callback_node, env)?;
            let mut invoker = CallbackInvoker { evaluator: self, executable, env: env.clone() };
            return methods::call_array_method(receiver, name, &[], &mut invoker);
        }
        let mut bound = Vec::with_capacity(args.len());
        for arg in args {
            bound.push(self.eval_node(arg, env)?);
        }
        match receiver.as_data() {
            Value::Array(_) => methods::call_array_method(receiver, name, &bound, &mut NoCallback),
            Value::String(_) => methods::call_string_method(receiver, name, &bound),
            _ => methods::call_universal_method(receiver, name),
        }
    }

    fn resolve_executable(&mut self, target: &Node, env: &Environment) -> Result<Executable, RuntimeError> {
        match target {
            Node::VariableReference { identifier, fields, .. } if fields.is_empty() => {
                let var = env.get(identifier).ok_or_else(|| RuntimeError::undefined_reference(identifier))?;
                var.executable.ok_or_else(|| RuntimeError::field_access(format!("'{identifier}' is not callable")))
            }
            _ => Err(RuntimeError::field_access("expected a reference to an executable")),
        }
    }

    /// Invokes an `/exe`-defined callable with already-evaluated arguments, binding
    /// them to its declared parameter names in a fresh child of its closure
    /// environment (spec.md §3 "Executable", §9 "shadow environments": lexical, not
    /// dynamic, scoping for the body).
    pub fn invoke_callable(&mut self, executable: &Executable, args: Vec<StructuredValue>, caller_env: &Environment) -> Result<StructuredValue, RuntimeError> {
        self.enter()?;
        let base = executable.closure_env.clone().unwrap_or_else(|| caller_env.clone());
        let call_env = base.child();
        for (param, arg) in executable.params.iter().zip(args.into_iter()) {
            call_env.set_overwrite(Variable::new(param.name.clone(), VariableKind::Computed, arg, VariableSource::Parameter));
        }
        let result = self.eval_exe_body(&executable.params, &executable.body, &call_env);
        self.leave();
        result
    }

    fn eval_exe_body(&mut self, params: &[Param], body: &ExeBody, env: &Environment) -> Result<StructuredValue, RuntimeError> {
        match body {
            ExeBody::Command { language, source } => {
                let lang = Language::from_str(language).map_err(|_| RuntimeError::execution(format!("unknown command language '{language}'")))?;
                self.capabilities.check_runtime(language).map_err(|e| RuntimeError::needs_unsatisfied(e.to_string()))?;
                let fs = self.host.fs;
                let rendered = interpolator::interpolate(source, env, self, fs)?;
                let bound = self.bind_args_from_env(params, env);
                self.host.executor.execute(lang, rendered.as_text(), &bound, Vec::new(), None)
            }
            ExeBody::Code { language, source } => {
                let lang = Language::from_str(language).map_err(|_| RuntimeError::execution(format!("unknown code language '{language}'")))?;
                self.capabilities.check_runtime(language).map_err(|e| RuntimeError::needs_unsatisfied(e.to_string()))?;
                let bound = self.bind_args_from_env(params, env);
                let shadow_fns = self.collect_shadow_fns(language, env);
                self.host.executor.execute(lang, source, &bound, shadow_fns, None)
            }
            ExeBody::Template { body, .. } => {
                let fs = self.host.fs;
                interpolator::interpolate(body, env, self, fs)
            }
            ExeBody::When { mode, arms } => self.eval_when(*mode, arms, env),
            ExeBody::For { variable, iterable, body, .. } => self.eval_node(
                &Node::ForExpression {
                    variable: variable.clone(),
                    iterable: iterable.clone(),
                    body: body.clone(),
                    parallel: false,
                    location: crate::ast::Location::new(0, 0, 0),
                },
                env,
            ),
            ExeBody::Block { statements, tail } => {
                let block_env = env.child();
                for statement in statements {
                    self.eval_node(statement, &block_env)?;
                }
                match tail {
                    Some(expr) => self.eval_node(expr, &block_env),
                    None => Ok(StructuredValue::null()),
                }
            }
            ExeBody::Reference { name } => {
                let executable = env.get(name).and_then(|v| v.executable).ok_or_else(|| RuntimeError::undefined_reference(name))?;
                self.invoke_callable(&executable, Vec::new(), env)
            }
        }
    }

    /// Looks up each declared parameter's already-bound value in `env` (bound there by
    /// [`Evaluator::invoke_callable`]) for handing to the executor bridge, which only
    /// needs name/value pairs, not the full `Variable` wrapper.
    fn bind_args_from_env(&self, params: &[Param], env: &Environment) -> IndexMap<String, StructuredValue> {
        let mut bound = IndexMap::new();
        for param in params {
            if let Some(var) = env.get(&param.name) {
                bound.insert(param.name.clone(), var.value);
            }
        }
        bound
    }

    fn collect_shadow_fns(&self, language: &str, env: &Environment) -> Vec<ShadowFnSpec> {
        env.shadow_fns_for(language)
            .into_iter()
            .enumerate()
            .map(|(i, (name, executable))| ShadowFnSpec {
                name,
                params: executable.params.iter().map(|p| p.name.clone()).collect(),
                handle: i as u32,
            })
            .collect()
    }

    fn eval_when_condition(&mut self, node: &Node, env: &Environment) -> Result<bool, RuntimeError> {
        Ok(self.eval_node(node, env)?.as_data().is_truthy())
    }

    fn eval_binary_op(&mut self, op: BinaryOperator, left: &Node, right: &Node, env: &Environment) -> Result<StructuredValue, RuntimeError> {
        if matches!(op, BinaryOperator::And | BinaryOperator::Or) {
            let lhs = self.eval_node(left, env)?;
            let truthy = lhs.as_data().is_truthy();
            return match op {
                BinaryOperator::And if !truthy => Ok(lhs),
                BinaryOperator::Or if truthy => Ok(lhs),
                _ => self.eval_node(right, env),
            };
        }
        let lhs = self.eval_node(left, env)?;
        let rhs = self.eval_node(right, env)?;
        let result = match op {
            BinaryOperator::Add => binary_add(lhs.as_data(), rhs.as_data()),
            BinaryOperator::Sub => Value::Number(num(lhs.as_data()) - num(rhs.as_data())),
            BinaryOperator::Mul => Value::Number(num(lhs.as_data()) * num(rhs.as_data())),
            BinaryOperator::Div => Value::Number(num(lhs.as_data()) / num(rhs.as_data())),
            BinaryOperator::Mod => Value::Number(num(lhs.as_data()) % num(rhs.as_data())),
            BinaryOperator::Eq => Value::Boolean(lhs.as_data() == rhs.as_data()),
            BinaryOperator::Ne => Value::Boolean(lhs.as_data() != rhs.as_data()),
            BinaryOperator::Lt => Value::Boolean(num(lhs.as_data()) < num(rhs.as_data())),
            BinaryOperator::Le => Value::Boolean(num(lhs.as_data()) <= num(rhs.as_data())),
            BinaryOperator::Gt => Value::Boolean(num(lhs.as_data()) > num(rhs.as_data())),
            BinaryOperator::Ge => Value::Boolean(num(lhs.as_data()) >= num(rhs.as_data())),
            BinaryOperator::And | BinaryOperator::Or => unreachable!("handled above"),
        };
        Ok(lhs.combine_with(&rhs, result.to_display_string(), result))
    }

    fn eval_unary_op(&mut self, op: UnaryOperator, operand: &Node, env: &Environment) -> Result<StructuredValue, RuntimeError> {
        let value = self.eval_node(operand, env)?;
        let result = match op {
            UnaryOperator::Not => Value::Boolean(!value.as_data().is_truthy()),
            UnaryOperator::Neg => Value::Number(-num(value.as_data())),
        };
        Ok(StructuredValue::from_value(result, value.mx.clone()))
    }

    // ----------------------------------------------------------------- directives --

    #[allow(clippy::too_many_arguments)]
    fn eval_directive(
        &mut self,
        kind: DirectiveKind,
        subtype: Option<&str>,
        values: &IndexMap<String, Vec<Node>>,
        raw: &IndexMap<String, String>,
        params: &[Param],
        exe_body: Option<&ExeBody>,
        env: &Environment,
    ) -> Result<Option<StructuredValue>, RuntimeError> {
        match kind {
            DirectiveKind::Var => self.eval_var(subtype, values, raw, env).map(|_| None),
            DirectiveKind::Path => self.eval_var(subtype, values, raw, env).map(|_| None),
            DirectiveKind::Exe => self.eval_exe(subtype, raw, params, exe_body, env).map(|_| None),
            DirectiveKind::Run => self.eval_run(subtype, values, raw, env).map(Some),
            DirectiveKind::Show => self.eval_show(values, env).map(Some),
            DirectiveKind::Log => self.eval_log(values, env).map(|_| None),
            DirectiveKind::Output => self.eval_output(values, raw, env).map(|_| None),
            DirectiveKind::When => {
                let (mode, arms) = match exe_body {
                    Some(ExeBody::When { mode, arms }) => (*mode, arms),
                    _ => return Err(RuntimeError::execution("/when directive missing arms")),
                };
                let result = self.eval_when(mode, arms, env)?;
                Ok(Some(result))
            }
            DirectiveKind::For => {
                let ExeBody::For { variable, iterable, body, parallel } = exe_body.ok_or_else(|| RuntimeError::execution("/for directive missing body"))? else {
                    return Err(RuntimeError::execution("/for directive has the wrong body shape"));
                };
                let result = self.eval_node(
                    &Node::ForExpression { variable: variable.clone(), iterable: iterable.clone(), body: body.clone(), parallel: *parallel, location: crate::ast::Location::new(0, 0, 0) },
                    env,
                )?;
                Ok(Some(result))
            }
            DirectiveKind::Loop => self.eval_loop_directive(raw, values, env).map(|_| None),
            DirectiveKind::Import => self.eval_import(raw, values, env).map(|_| None),
            DirectiveKind::Export => self.eval_export(raw, values, env).map(|_| None),
            DirectiveKind::Guard => self.eval_guard_registration(subtype, raw, exe_body, env).map(|_| None),
            DirectiveKind::Bail => {
                let message = raw.get("message").cloned().unwrap_or_else(|| "bail".to_string());
                Err(RuntimeError::bail(message))
            }
            DirectiveKind::Stream => self.eval_show(values, env).map(Some),
        }
    }

    fn eval_var(&mut self, subtype: Option<&str>, values: &IndexMap<String, Vec<Node>>, raw: &IndexMap<String, String>, env: &Environment) -> Result<(), RuntimeError> {
        let name = raw.get("name").cloned().ok_or_else(|| RuntimeError::execution("/var directive missing a name"))?;
        let body = values.get("value").cloned().unwrap_or_default();
        let fs = self.host.fs;
        let mut value = interpolator::interpolate(&body, env, self, fs)?;
        if let Some(label) = raw.get("label") {
            value.mx.labels.insert(crate::labels::LabelId::intern(label));
        }
        let kind = match subtype {
            Some("object") => VariableKind::Object,
            Some("array") => VariableKind::Array,
            Some("path") => VariableKind::Path,
            _ => VariableKind::Text,
        };
        env.set(Variable::new(name, kind, value, VariableSource::Literal))
    }

    fn eval_exe(&mut self, _subtype: Option<&str>, raw: &IndexMap<String, String>, params: &[Param], exe_body: Option<&ExeBody>, env: &Environment) -> Result<(), RuntimeError> {
        let name = raw.get("name").cloned().ok_or_else(|| RuntimeError::execution("/exe directive missing a name"))?;
        let body = exe_body.cloned().ok_or_else(|| RuntimeError::execution("/exe directive missing a body"))?;
        let description = raw.get("description").cloned();
        let executable = Executable::new(params.to_vec(), body, description).with_closure(env.clone());
        let marker = StructuredValue::text(format!("<executable {name}>"));
        env.set(Variable::executable(name, marker, executable))
    }

    fn eval_run(&mut self, subtype: Option<&str>, values: &IndexMap<String, Vec<Node>>, raw: &IndexMap<String, String>, env: &Environment) -> Result<StructuredValue, RuntimeError> {
        let language = subtype.unwrap_or("sh");
        let lang = Language::from_str(language).map_err(|_| RuntimeError::execution(format!("unknown run language '{language}'")))?;
        self.capabilities.check_runtime(language).map_err(|e| RuntimeError::needs_unsatisfied(e.to_string()))?;

        let op = OpDescriptor { op_type: OpFamily::Run, name: language.to_string(), target: None };
        self.current_op = Some(op.clone());

        let source_nodes = values.get("source").cloned().unwrap_or_default();
        let raw_source = raw.get("source").cloned();
        let fs = self.host.fs;
        let rendered_source = match raw_source {
            Some(text) => StructuredValue::text(text),
            None => interpolator::interpolate(&source_nodes, env, self, fs)?,
        };

        let before = self.run_guards(GuardTiming::Before, &self.guard_scopes_for(&op, &rendered_source), rendered_source.clone(), &op)?;
        let rendered = match before {
            GuardOutcome::Allow => rendered_source.as_text().to_string(),
            GuardOutcome::AllowTransformed(v) => v.as_text().to_string(),
            GuardOutcome::Deny(reason) => return Err(RuntimeError::guard_denial(reason)),
            GuardOutcome::Retry(hint) => return Err(RuntimeError::execution(format!("retry '{hint}' outside a pipeline context is not supported"))),
        };

        let mut params = IndexMap::new();
        for name in values.keys().filter(|k| k.as_str() != "source") {
            if let Some(value_nodes) = values.get(name) {
                let fs = self.host.fs;
                params.insert(name.clone(), interpolator::interpolate(value_nodes, env, self, fs)?);
            }
        }

        let result = self.host.executor.execute(lang, &rendered, &params, Vec::new(), None)?;
        let outcome = self.run_guards(GuardTiming::After, &self.guard_scopes_for(&op, &result), result.clone(), &op)?;
        match outcome {
            GuardOutcome::Allow => Ok(result),
            GuardOutcome::AllowTransformed(v) => Ok(v),
            GuardOutcome::Deny(reason) => Err(RuntimeError::guard_denial(reason)),
            GuardOutcome::Retry(hint) => Err(RuntimeError::execution(format!("retry '{hint}' outside a pipeline context is not supported"))),
        }
    }

    fn eval_show(&mut self, values: &IndexMap<String, Vec<Node>>, env: &Environment) -> Result<StructuredValue, RuntimeError> {
        let body = values.get("value").cloned().unwrap_or_default();
        let fs = self.host.fs;
        let value = interpolator::interpolate(&body, env, self, fs)?;
        let op = OpDescriptor { op_type: OpFamily::Show, name: "show".to_string(), target: None };
        self.current_op = Some(op.clone());
        let outcome = self.run_guards(GuardTiming::Before, &self.guard_scopes_for(&op, &value), value.clone(), &op)?;
        match outcome {
            GuardOutcome::Allow => Ok(value),
            GuardOutcome::AllowTransformed(v) => Ok(v),
            GuardOutcome::Deny(reason) => Err(RuntimeError::guard_denial(reason)),
            GuardOutcome::Retry(hint) => Err(RuntimeError::execution(format!("retry '{hint}' is not valid for /show"))),
        }
    }

    fn eval_log(&mut self, values: &IndexMap<String, Vec<Node>>, env: &Environment) -> Result<(), RuntimeError> {
        let body = values.get("value").cloned().unwrap_or_default();
        let fs = self.host.fs;
        let value = interpolator::interpolate(&body, env, self, fs)?;
        self.log.log_line(value.as_text());
        Ok(())
    }

    fn eval_output(&mut self, values: &IndexMap<String, Vec<Node>>, raw: &IndexMap<String, String>, env: &Environment) -> Result<(), RuntimeError> {
        let body = values.get("value").cloned().unwrap_or_default();
        let fs = self.host.fs;
        let value = interpolator::interpolate(&body, env, self, fs)?;
        let sink_text = raw.get("sink").cloned().unwrap_or_else(|| "stdout".to_string());
        let sink = materializer::parse_sink(&sink_text);
        let op = OpDescriptor { op_type: OpFamily::Output, name: "output".to_string(), target: Some(sink_text) };
        self.current_op = Some(op.clone());
        let outcome = self.run_guards(GuardTiming::Before, &self.guard_scopes_for(&op, &value), value.clone(), &op)?;
        let value = match outcome {
            GuardOutcome::Allow => value,
            GuardOutcome::AllowTransformed(v) => v,
            GuardOutcome::Deny(reason) => return Err(RuntimeError::guard_denial(reason)),
            GuardOutcome::Retry(hint) => return Err(RuntimeError::execution(format!("retry '{hint}' is not valid for /output"))),
        };
        self.materializer.route_output(&sink, &value, self.host.fs)
    }

    fn eval_loop_directive(&mut self, raw: &IndexMap<String, String>, values: &IndexMap<String, Vec<Node>>, env: &Environment) -> Result<(), RuntimeError> {
        let max: u32 = raw.get("max").and_then(|s| s.parse().ok()).unwrap_or(crate::resource::DEFAULT_MAX_LOOP_ITERATIONS as u32);
        let interval_ms: u32 = raw.get("interval").and_then(|s| s.parse().ok()).unwrap_or(0);
        let until = values.get("until").cloned().unwrap_or_default();
        let body = values.get("body").cloned().unwrap_or_default();
        let env = env.clone();
        let mut waiter = NoWait;
        let this = &mut *self;
        for_loop::eval_loop(max, interval_ms, &env, &mut waiter, |e| {
            // Evaluated directly, not through `interpolator::interpolate`: that always
            // stringifies its result, so a `false` condition would come back as the
            // non-empty (and therefore truthy) string "false".
            let stop = match until.first() {
                Some(cond) => this.eval_node(cond, e)?.as_data().is_truthy(),
                None => false,
            };
            if stop {
                return Ok(for_loop::LoopControl::Stop);
            }
            this.resources.on_iteration()?;
            let iter_env = e.child();
            for statement in &body {
                this.eval_node(statement, &iter_env)?;
            }
            e.merge_assignments(&iter_env);
            Ok(for_loop::LoopControl::Continue)
        })
    }

    fn eval_import(&mut self, raw: &IndexMap<String, String>, values: &IndexMap<String, Vec<Node>>, env: &Environment) -> Result<(), RuntimeError> {
        let specifier = raw.get("specifier").cloned().ok_or_else(|| RuntimeError::import_resolution("/import directive missing a specifier"))?;
        let clause = if let Some(names) = values.get("names") {
            let names = names
                .iter()
                .filter_map(|n| match n {
                    Node::VariableReference { identifier, .. } => Some(identifier.clone()),
                    _ => None,
                })
                .collect();
            ImportClause::Named(names)
        } else {
            ImportClause::Wildcard { alias: raw.get("alias").cloned() }
        };
        let granted = self.capabilities.clone();
        let approve_all = self.approve_all_imports;
        let resolver = self.host.resolver;
        resolver.import(&specifier, &clause, &granted, approve_all, self, env)
    }

    fn eval_export(&mut self, raw: &IndexMap<String, String>, values: &IndexMap<String, Vec<Node>>, env: &Environment) -> Result<(), RuntimeError> {
        if raw.get("wildcard").is_some() {
            env.set_export_manifest(None);
            return Ok(());
        }
        let names = values
            .get("names")
            .into_iter()
            .flatten()
            .filter_map(|n| match n {
                Node::VariableReference { identifier, .. } => Some(identifier.clone()),
                _ => None,
            })
            .collect();
        env.set_export_manifest(Some(names));
        Ok(())
    }

    fn eval_guard_registration(&mut self, subtype: Option<&str>, raw: &IndexMap<String, String>, exe_body: Option<&ExeBody>, _env: &Environment) -> Result<(), RuntimeError> {
        let name = raw.get("name").cloned().unwrap_or_else(|| "guard".to_string());
        let scope_name = raw.get("scope").cloned().ok_or_else(|| RuntimeError::execution("/guard directive missing a scope"))?;
        let timing = match raw.get("timing").map(String::as_str) {
            Some("after") => GuardTiming::After,
            _ => GuardTiming::Before,
        };
        let scope = match scope_name.strip_prefix("op:") {
            Some(family) => Scope::Op(OpFamily::from_str(family).map_err(|_| RuntimeError::execution(format!("unknown guard operation family '{family}'")))?),
            None => Scope::label(scope_name),
        };
        let arms = match exe_body {
            Some(ExeBody::When { arms, .. }) => arms.clone(),
            _ => return Err(RuntimeError::execution("/guard directive missing a `when` body")),
        };
        let _ = subtype;
        self.guards.register(timing, &scope, GuardRule { name, arms });
        Ok(())
    }

    // ------------------------------------------------------------------ guards --

    fn guard_scopes_for(&self, op: &OpDescriptor, input: &StructuredValue) -> Vec<Scope> {
        let mut scopes = vec![Scope::Op(op.op_type)];
        for label in input.mx.labels.iter() {
            scopes.push(Scope::Label(label.name()));
        }
        scopes
    }

    /// Runs guard rules against `input`, temporarily taking `guards`/`tracer` out of
    /// `self` so they can be passed alongside `self` as the narrow-capability trait
    /// object without a borrow conflict. See the struct-level documentation.
    fn run_guards(&mut self, timing: GuardTiming, scopes: &[Scope], input: StructuredValue, op: &OpDescriptor) -> Result<GuardOutcome, RuntimeError> {
        let guards = std::mem::take(&mut self.guards);
        let mut tracer = std::mem::take(&mut self.tracer);
        let result = guards.run(timing, scopes, input, op, self, &mut tracer);
        self.guards = guards;
        self.tracer = tracer;
        result
    }
}

fn num(value: &Value) -> f64 {
    value.as_f64().unwrap_or(0.0)
}

/// `+` is overloaded between numeric addition and string concatenation. Since a
/// `/var`-bound number is always stored as a numeric-looking `Value::String` (the
/// interpolator always stringifies), the choice can't be made on variant alone —
/// both sides have to fail to coerce to a number before this falls back to
/// concatenation.
fn binary_add(left: &Value, right: &Value) -> Value {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => Value::Number(l + r),
        _ => Value::String(format!("{}{}", left.to_display_string(), right.to_display_string())),
    }
}

/// A [`methods::MethodCallback`] that invokes an already-resolved `/exe` callable for
/// every `filter`/`map` element — the adapter that lets `evaluator::methods` stay free
/// of a dependency on the dispatch loop above (spec.md §4.3.2).
struct CallbackInvoker<'e, 'a, R: ResourceTracker, L: crate::io::LogWriter, Tr: EvalTracer + Default> {
    evaluator: &'e mut Evaluator<'a, R, L, Tr>,
    executable: Executable,
    env: Environment,
}

impl<'e, 'a, R: ResourceTracker, L: crate::io::LogWriter, Tr: EvalTracer + Default> MethodCallback for CallbackInvoker<'e, 'a, R, L, Tr> {
    fn call(&mut self, arg: &StructuredValue) -> Result<StructuredValue, RuntimeError> {
        self.evaluator.invoke_callable(&self.executable, vec![arg.clone()], &self.env)
    }
}

/// A [`methods::MethodCallback`] used for method calls that never invoke a callback
/// (every method but `filter`/`map`); its `call` is unreachable because
/// `call_array_method` only invokes `callback` for those two names.
struct NoCallback;

impl MethodCallback for NoCallback {
    fn call(&mut self, _arg: &StructuredValue) -> Result<StructuredValue, RuntimeError> {
        Err(RuntimeError::execution("method does not accept a callback"))
    }
}

// ---------------------------------------------------------------- trait wiring --

impl<'a, R: ResourceTracker, L: crate::io::LogWriter, Tr: EvalTracer + Default> ExpressionResolver for Evaluator<'a, R, L, Tr> {
    fn resolve(&mut self, node: &Node, env: &Environment) -> Result<StructuredValue, RuntimeError> {
        self.eval_node(node, env)
    }
}

impl<'a, R: ResourceTracker, L: crate::io::LogWriter, Tr: EvalTracer + Default> GuardActionEvaluator for Evaluator<'a, R, L, Tr> {
    fn eval_condition(&mut self, condition: &Node, input: &StructuredValue, op: &OpDescriptor) -> Result<bool, RuntimeError> {
        let env = self.guard_env(input, op);
        self.eval_when_condition(condition, &env)
    }

    fn eval_action(&mut self, action: &Node, input: &StructuredValue, op: &OpDescriptor) -> Result<GuardOutcome, RuntimeError> {
        let env = self.guard_env(input, op);
        match action {
            Node::VariableReference { identifier, .. } if identifier == "allow" => Ok(GuardOutcome::Allow),
            Node::ExecInvocation { target, args, .. } => {
                let name = match target.as_ref() {
                    Node::VariableReference { identifier, .. } => identifier.as_str(),
                    _ => "",
                };
                let arg_value = |this: &mut Self, env: &Environment| -> Result<StructuredValue, RuntimeError> {
                    match args.first() {
                        Some(node) => this.eval_node(node, env),
                        None => Ok(input.clone()),
                    }
                };
                match name {
                    "deny" => {
                        let reason = arg_value(self, &env)?;
                        Ok(GuardOutcome::Deny(reason.as_text().to_string()))
                    }
                    "retry" => {
                        let hint = arg_value(self, &env)?;
                        Ok(GuardOutcome::Retry(hint.as_text().to_string()))
                    }
                    "allow" => {
                        let replacement = arg_value(self, &env)?;
                        Ok(GuardOutcome::AllowTransformed(replacement))
                    }
                    _ => {
                        let replacement = self.eval_node(action, &env)?;
                        Ok(GuardOutcome::AllowTransformed(replacement))
                    }
                }
            }
            _ => {
                let replacement = self.eval_node(action, &env)?;
                Ok(GuardOutcome::AllowTransformed(replacement))
            }
        }
    }
}

impl<'a, R: ResourceTracker, L: crate::io::LogWriter, Tr: EvalTracer + Default> Evaluator<'a, R, L, Tr> {
    /// Builds the scope a guard condition/action evaluates in: a fresh child
    /// environment with `@input` bound to the guarded value (spec.md §4.7).
    fn guard_env(&self, input: &StructuredValue, _op: &OpDescriptor) -> Environment {
        let env = Environment::root(None, None);
        env.set_overwrite(Variable::new("input", VariableKind::Computed, input.clone(), VariableSource::Computed { expression: "input".to_string() }));
        env
    }
}

impl<'a, R: ResourceTracker, L: crate::io::LogWriter, Tr: EvalTracer + Default> StageInvoker for Evaluator<'a, R, L, Tr> {
    fn invoke_stage(&mut self, target: &Node, input: &StructuredValue, ctx: &PipelineContext) -> Result<StageOutcome, RuntimeError> {
        self.current_pipeline = Some(ctx.clone());
        let env = self.current_pipeline_env.clone().unwrap_or_else(|| Environment::root(None, None));
        self.pipeline_stage_depth += 1;
        let result = match self.resolve_executable(target, &env) {
            Ok(executable) => self.invoke_callable(&executable, vec![input.clone()], &env),
            Err(_) => {
                // A stage target may also be an inline expression rather than a bare
                // executable reference; evaluate it directly with `@input` bound.
                let stage_env = env.child();
                stage_env.set_overwrite(Variable::new("input", VariableKind::Computed, input.clone(), VariableSource::Computed { expression: "input".to_string() }));
                self.eval_node(target, &stage_env)
            }
        };
        self.pipeline_stage_depth -= 1;
        let signal = self.pending_stage_signal.take();
        let value = result?;
        Ok(match signal {
            Some(PendingStageSignal::Retry(hint)) => StageOutcome::RetryPrevious(hint),
            Some(PendingStageSignal::Deny(reason)) => StageOutcome::Denied(reason),
            None => StageOutcome::Value(value),
        })
    }

    fn run_after_guards(&mut self, output: StructuredValue, ctx: &PipelineContext) -> Result<GuardOutcome, RuntimeError> {
        let op = OpDescriptor { op_type: OpFamily::Run, name: "pipeline".to_string(), target: None };
        self.current_pipeline = Some(ctx.clone());
        let scopes = self.guard_scopes_for(&op, &output);
        self.run_guards(GuardTiming::After, &scopes, output, &op)
    }
}

impl<'a, R: ResourceTracker, L: crate::io::LogWriter, Tr: EvalTracer + Default> ModuleInterpreter for Evaluator<'a, R, L, Tr> {
    fn interpret_module(&mut self, source: &str, specifier: &str) -> Result<Environment, RuntimeError> {
        // The core crate does not parse mlld source itself (spec.md §1); a host
        // embedding this evaluator is expected to supply already-parsed module nodes
        // through `dynamicModules` (§6) rather than raw text reaching this point in
        // ordinary operation. This fallback treats the module body as a single text
        // node so imports of host-supplied plain-text modules still succeed.
        let module_env = Environment::root(Some(specifier.to_string()), None);
        self.run(&[Node::Text { content: source.to_string(), location: crate::ast::Location::new(0, 0, 0) }], &module_env)?;
        module_env.set_export_manifest(None);
        Ok(module_env)
    }

    fn swap_capabilities(&mut self, capabilities: CapabilitySet) -> CapabilitySet {
        std::mem::replace(&mut self.capabilities, capabilities)
    }
}
