//! Host embedding API (spec.md §6) — the single entry point a CLI, test harness, or
//! embedding application uses to run mlld source against its own injected capabilities.
//!
//! Split between a one-shot entry point and an iterative/resumable one: [`Runtime`] is
//! built once per host and reused across calls, while [`Runtime::process`]/
//! [`Runtime::execute`] are the one-shot form and [`Runtime::process_async`]/[`Handle`]
//! are the resumable form. A bytecode VM's suspension points are external-function
//! calls that hand control back to its embedder mid-execution; this crate's injected
//! host traits ([`Subprocess`], [`JsEngine`],
//! [`PyEngine`]) are synchronous and already fully resolved by the time they return, so
//! there is no equivalent "waiting on the host" moment to suspend on. [`Handle`] instead
//! steps through one top-level node at a time — the granularity [`crate::evaluator::Evaluator::run`]
//! already walks internally — which gives a host the same "pause between units of work"
//! shape without pretending this crate has real coroutine suspension.

use std::time::Duration;

use indexmap::IndexMap;

use crate::ast::Node;
use crate::capability::CapabilitySet;
use crate::env::{Environment, Variable, VariableKind, VariableSource};
use crate::error::RuntimeError;
use crate::evaluator::{Evaluator, HostContext};
use crate::executor::ExecutorBridge;
use crate::guard::GuardRegistry;
use crate::host::{Clock, FileSystem, HttpFetcher, JsEngine, ParseMode, Parser, PyEngine, RegistryClient, Subprocess};
use crate::io::NoLog;
use crate::materializer::{OutputFormat, StateWrite};
use crate::resolver::Resolver;
use crate::resource::{LimitedTracker, ResourceLimits};
use crate::structured_value::{Mx, StructuredValue};
use crate::tracer::NoopTracer;
use crate::value::Value;

/// Everything a host supplies once, for the lifetime of the embedding (spec.md §6
/// "Injected capabilities"). A [`Runtime`] borrows these for as long as it lives and
/// builds a fresh [`Resolver`]/[`ExecutorBridge`]/[`Evaluator`] per call: one registry
/// reused across many `process` calls, each starting with a fresh call stack.
pub struct Runtime<'a> {
    pub parser: &'a dyn Parser,
    pub filesystem: &'a dyn FileSystem,
    pub http: &'a dyn HttpFetcher,
    pub subprocess: &'a dyn Subprocess,
    pub registry: &'a dyn RegistryClient,
    pub js: &'a dyn JsEngine,
    pub py: &'a dyn PyEngine,
    pub clock: &'a dyn Clock,
    pub random: &'a dyn crate::host::Random,
}

/// Per-call options (spec.md §6 `ProcessOptions`). `Default` matches the spec's defaults:
/// no seeded state, no dynamic modules, markdown parse mode, no timeout, import approval
/// required per-module, unrestricted capabilities, no injected env vars/stdin, debug off.
pub struct RuntimeOptions {
    pub state: Value,
    pub dynamic_modules: IndexMap<String, Value>,
    pub mode: ParseMode,
    pub timeout: Option<Duration>,
    pub approve_all_imports: bool,
    pub capabilities: CapabilitySet,
    pub env_vars: IndexMap<String, String>,
    pub stdin: String,
    pub debug: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            state: Value::Object(IndexMap::new()),
            dynamic_modules: IndexMap::new(),
            mode: ParseMode::Markdown,
            timeout: None,
            approve_all_imports: false,
            capabilities: CapabilitySet::unrestricted(),
            env_vars: IndexMap::new(),
            stdin: String::new(),
            debug: false,
        }
    }
}

/// What one [`Runtime::process`] call returns (spec.md §6 `ProcessResult`).
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub output: String,
    pub state_writes: Vec<StateWrite>,
}

impl<'a> Runtime<'a> {
    #[must_use]
    pub fn new(
        parser: &'a dyn Parser,
        filesystem: &'a dyn FileSystem,
        http: &'a dyn HttpFetcher,
        subprocess: &'a dyn Subprocess,
        registry: &'a dyn RegistryClient,
        js: &'a dyn JsEngine,
        py: &'a dyn PyEngine,
        clock: &'a dyn Clock,
        random: &'a dyn crate::host::Random,
    ) -> Self {
        Self { parser, filesystem, http, subprocess, registry, js, py, clock, random }
    }

    /// Parses and runs `source` to completion in one call (spec.md §6 `process`).
    pub fn process(&self, source: &str, options: RuntimeOptions) -> Result<ProcessOutput, RuntimeError> {
        let nodes = self.parser.parse(source, options.mode)?;
        let mut log = NoLog;
        let resolver = self.build_resolver(&options);
        let env = Environment::root(None, None);
        let mut evaluator = self.build_evaluator(&resolver, &mut log, options)?;
        evaluator.run(&nodes, &env)?;
        let output = evaluator.render(OutputFormat::Markdown);
        let state_writes = evaluator.into_state_writes();
        Ok(ProcessOutput { output, state_writes })
    }

    /// Reads `script_path` through the injected [`FileSystem`] and runs it with `params`
    /// bound as top-level variables before any directive executes (spec.md §6 `execute`,
    /// the CLI-style "script plus arguments" entry point).
    pub fn execute(
        &self,
        script_path: &str,
        params: IndexMap<String, Value>,
        options: RuntimeOptions,
    ) -> Result<ProcessOutput, RuntimeError> {
        let source = self.filesystem.read_file(script_path)?;
        let nodes = self.parser.parse(&source, options.mode)?;
        let mut log = NoLog;
        let resolver = self.build_resolver(&options);
        let env = Environment::root(Some(script_path.to_string()), None);
        for (name, value) in params {
            env.set(Variable::new(
                name,
                VariableKind::Data,
                StructuredValue::from_value(value, Mx::new()),
                VariableSource::Parameter,
            ))?;
        }
        let mut evaluator = self.build_evaluator(&resolver, &mut log, options)?;
        evaluator.run(&nodes, &env)?;
        let output = evaluator.render(OutputFormat::Markdown);
        let state_writes = evaluator.into_state_writes();
        Ok(ProcessOutput { output, state_writes })
    }

    /// Parses `source` and returns a [`Handle`] that steps through it one top-level node
    /// at a time (spec.md §6 `processAsync`). See the module documentation for why this
    /// steps through nodes rather than suspending on external calls the way a true
    /// coroutine-based progress type would.
    pub fn process_async(&'a self, source: &str, options: RuntimeOptions) -> Result<Handle<'a>, RuntimeError> {
        let nodes = self.parser.parse(source, options.mode)?;
        let resolver = self.build_resolver(&options);
        let env = Environment::root(None, None);
        Ok(Handle {
            runtime: self,
            nodes,
            cursor: 0,
            env,
            resolver,
            state: options.state,
            capabilities: options.capabilities,
            env_vars: options.env_vars,
            stdin: options.stdin,
            debug: options.debug,
            approve_all_imports: options.approve_all_imports,
            guards: GuardRegistry::new(),
            output: String::new(),
            state_writes: Vec::new(),
        })
    }

    fn build_resolver(&self, options: &RuntimeOptions) -> Resolver<'a> {
        let resolver = Resolver::new(self.filesystem, self.http, self.registry);
        for (specifier, value) in &options.dynamic_modules {
            let module_env = Environment::root(None, None);
            module_env.set_export_manifest(None);
            if let Value::Object(fields) = value {
                for (name, field) in fields {
                    let _ = module_env.set(Variable::new(
                        name.clone(),
                        VariableKind::Data,
                        StructuredValue::from_value(field.clone(), Mx::new()),
                        VariableSource::Literal,
                    ));
                }
            }
            resolver.seed_dynamic_module(specifier.clone(), module_env);
        }
        resolver
    }

    fn build_evaluator<'r, L: crate::io::LogWriter>(
        &self,
        resolver: &'r Resolver<'r>,
        log: &'r mut L,
        options: RuntimeOptions,
    ) -> Result<Evaluator<'r, LimitedTracker, L, NoopTracer>, RuntimeError>
    where
        'a: 'r,
    {
        let mut limits = ResourceLimits::new();
        if let Some(timeout) = options.timeout {
            limits = limits.max_duration(timeout);
        }
        let host = HostContext {
            fs: self.filesystem,
            clock: self.clock,
            random: self.random,
            resolver,
            executor: ExecutorBridge::new(self.subprocess, self.js, self.py),
        };
        let mut evaluator = Evaluator::new(host, log, NoopTracer, LimitedTracker::new(limits), options.capabilities);
        evaluator.seed_state(options.state);
        evaluator.seed_env_vars(options.env_vars);
        evaluator.seed_stdin(options.stdin);
        evaluator.set_debug(options.debug);
        evaluator.set_approve_all_imports(options.approve_all_imports);
        Ok(evaluator)
    }
}

/// A step-through handle on a suspended run (spec.md §6 `processAsync`'s return value).
///
/// Each step builds a fresh [`Evaluator`] seeded with the state accumulated so far, runs
/// exactly one top-level node through it, then folds its rendered output, state writes,
/// and final `@state` back into the handle before the evaluator is dropped — an
/// `Evaluator` itself borrows its log/resolver for its own lifetime and can't be kept
/// alive across steps without self-referential borrows, so carrying the accumulated
/// results forward explicitly is simpler than fighting that shape.
/// [`Handle::update_state`] may be called between steps to let a host push state in
/// mid-run (e.g. in response to a UI event), something a one-shot [`Runtime::process`]
/// call has no opportunity for.
pub struct Handle<'a> {
    runtime: &'a Runtime<'a>,
    nodes: Vec<Node>,
    cursor: usize,
    env: Environment,
    resolver: Resolver<'a>,
    state: Value,
    capabilities: CapabilitySet,
    env_vars: IndexMap<String, String>,
    stdin: String,
    debug: bool,
    approve_all_imports: bool,
    guards: GuardRegistry,
    output: String,
    state_writes: Vec<StateWrite>,
}

impl<'a> Handle<'a> {
    /// Evaluates the next top-level node, if any remain. Returns `Ok(None)` once the run
    /// has finished without error.
    pub fn step(&mut self) -> Result<Option<()>, RuntimeError> {
        if self.cursor >= self.nodes.len() {
            return Ok(None);
        }
        let mut log = NoLog;
        let host = crate::evaluator::HostContext {
            fs: self.runtime.filesystem,
            clock: self.runtime.clock,
            random: self.runtime.random,
            resolver: &self.resolver,
            executor: ExecutorBridge::new(self.runtime.subprocess, self.runtime.js, self.runtime.py),
        };
        let mut evaluator: Evaluator<'_, LimitedTracker, NoLog, NoopTracer> = Evaluator::new(
            host,
            &mut log,
            NoopTracer,
            LimitedTracker::new(ResourceLimits::new()),
            self.capabilities.clone(),
        );
        evaluator.seed_state(std::mem::replace(&mut self.state, Value::Null));
        // Unlike `state`, these are constant inputs for the whole run (spec.md §6
        // `processAsync`'s options are set once, not per-step), so they're cloned
        // rather than taken — a later step still needs them.
        evaluator.seed_env_vars(self.env_vars.clone());
        evaluator.seed_stdin(self.stdin.clone());
        evaluator.seed_guards(std::mem::take(&mut self.guards));
        evaluator.set_debug(self.debug);
        evaluator.set_approve_all_imports(self.approve_all_imports);

        let node = &self.nodes[self.cursor..=self.cursor];
        evaluator.run(node, &self.env)?;

        self.state = evaluator.state().clone();
        self.output.push_str(&evaluator.render(OutputFormat::Markdown));
        self.guards = evaluator.guards().clone();
        self.state_writes.extend(evaluator.into_state_writes());
        self.cursor += 1;
        Ok(Some(()))
    }

    /// Merges one dotted path into `@state` between steps (spec.md §6
    /// `Handle.updateState`).
    pub fn update_state(&mut self, path: &str, value: Value) {
        set_state_path(&mut self.state, path, value);
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.cursor >= self.nodes.len()
    }

    /// Consumes the handle once [`Handle::is_done`], returning everything accumulated
    /// across steps (spec.md §6 `ProcessResult`).
    pub fn finish(self) -> ProcessOutput {
        ProcessOutput { output: self.output, state_writes: self.state_writes }
    }
}

/// Standalone version of [`Evaluator::set_state_path`] for [`Handle`], which carries its
/// `@state` as a plain [`Value`] between evaluator instances rather than inside one.
fn set_state_path(root: &mut Value, path: &str, value: Value) {
    let mut cursor = root;
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
