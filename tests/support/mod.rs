//! Test doubles for the injected capability traits (`mlld_core::host`).
//!
//! This crate has no `Parser` of its own (spec.md §1 scope), so every integration test
//! builds `mlld_core::ast::Node` trees by hand and drives `Evaluator`/`Runtime` directly
//! rather than parsing mlld source text. The fakes here stand in for the filesystem,
//! network, subprocess, registry, and language engines a real host would supply.

use std::cell::RefCell;
use std::collections::HashMap;

use mlld_core::ast::{DirectiveKind, ExeBody, Location, Node, Param};
use mlld_core::error::RuntimeError;
use mlld_core::host::{CodeRequest, FileStat, FileSystem, HttpFetcher, HttpResponse, JsEngine, ParseMode, Parser, ProcessOutput, PyEngine, RegistryClient, RegistryModule, Subprocess};
use mlld_core::value::Value;
use indexmap::IndexMap;

/// An in-memory filesystem seeded with a fixed set of files, for file-load expressions,
/// `/output` file sinks, and path-specifier imports.
#[derive(Default)]
pub struct FakeFileSystem {
    files: RefCell<HashMap<String, String>>,
}

impl FakeFileSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_file(self, path: &str, contents: &str) -> Self {
        self.files.borrow_mut().insert(path.to_string(), contents.to_string());
        self
    }

    #[must_use]
    pub fn written(&self, path: &str) -> Option<String> {
        self.files.borrow().get(path).cloned()
    }
}

impl FileSystem for FakeFileSystem {
    fn read_file(&self, path: &str) -> Result<String, RuntimeError> {
        self.files
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| RuntimeError::execution(format!("no such file '{path}'")))
    }

    fn write_file(&self, path: &str, contents: &str) -> Result<(), RuntimeError> {
        self.files.borrow_mut().insert(path.to_string(), contents.to_string());
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.files.borrow().contains_key(path)
    }

    fn mkdir(&self, _path: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn stat(&self, path: &str) -> Result<FileStat, RuntimeError> {
        let files = self.files.borrow();
        let len = files.get(path).map(|c| c.len() as u64).unwrap_or(0);
        Ok(FileStat { is_dir: false, len, modified_unix_secs: None })
    }

    fn read_dir(&self, path: &str) -> Result<Vec<String>, RuntimeError> {
        let prefix = format!("{path}/");
        Ok(self.files.borrow().keys().filter(|p| p.starts_with(&prefix)).cloned().collect())
    }
}

/// An `HttpFetcher` that serves fixed responses keyed by URL.
#[derive(Default)]
pub struct FakeHttpFetcher {
    responses: HashMap<String, String>,
}

impl FakeHttpFetcher {
    #[must_use]
    pub fn with_response(mut self, url: &str, content: &str) -> Self {
        self.responses.insert(url.to_string(), content.to_string());
        self
    }
}

impl HttpFetcher for FakeHttpFetcher {
    fn fetch(&self, url: &str, _headers: &[(String, String)]) -> Result<HttpResponse, RuntimeError> {
        self.responses
            .get(url)
            .cloned()
            .map(|content| HttpResponse { content, headers: Vec::new(), status: 200 })
            .ok_or_else(|| RuntimeError::import_resolution(format!("no fixture for url '{url}'")))
    }
}

/// A scripted `Subprocess`: each call pops the next queued output, repeating the last
/// one once the queue is exhausted (so a test doesn't have to size the queue exactly to
/// the number of retries it expects).
pub struct ScriptedSubprocess {
    outputs: RefCell<Vec<ProcessOutput>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedSubprocess {
    #[must_use]
    pub fn new(outputs: Vec<ProcessOutput>) -> Self {
        Self { outputs: RefCell::new(outputs), calls: RefCell::new(Vec::new()) }
    }

    #[must_use]
    pub fn succeeding(stdout: &str) -> Self {
        Self::new(vec![ProcessOutput { stdout: stdout.to_string(), stderr: String::new(), exit_code: 0 }])
    }

    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl Subprocess for ScriptedSubprocess {
    fn spawn(&self, command: &str, _env: &[(String, String)], _cwd: Option<&str>, _stdin: Option<&str>) -> Result<ProcessOutput, RuntimeError> {
        self.calls.borrow_mut().push(command.to_string());
        let mut outputs = self.outputs.borrow_mut();
        if outputs.len() > 1 {
            Ok(outputs.remove(0))
        } else {
            Ok(outputs.first().cloned().unwrap_or(ProcessOutput { stdout: String::new(), stderr: String::new(), exit_code: 0 }))
        }
    }
}

/// A `RegistryClient` that always fails — no integration test here exercises registry
/// specifiers directly (the resolver's own unit coverage handles specifier
/// classification), so this stands in only to satisfy `Runtime::new`'s signature.
pub struct NoRegistry;

impl RegistryClient for NoRegistry {
    fn resolve(&self, specifier: &str) -> Result<RegistryModule, RuntimeError> {
        Err(RuntimeError::import_resolution(format!("registry specifiers are not exercised in tests: '{specifier}'")))
    }
}

/// A `JsEngine`/`PyEngine` double that returns a fixed `Value` regardless of the code
/// text, while recording every request it received for assertions.
pub struct FakeCodeEngine {
    result: Value,
    requests: RefCell<Vec<String>>,
}

impl FakeCodeEngine {
    #[must_use]
    pub fn returning(result: Value) -> Self {
        Self { result, requests: RefCell::new(Vec::new()) }
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl JsEngine for FakeCodeEngine {
    fn eval(&self, request: CodeRequest<'_>) -> Result<Value, RuntimeError> {
        self.requests.borrow_mut().push(request.code.to_string());
        Ok(self.result.clone())
    }
}

impl PyEngine for FakeCodeEngine {
    fn eval(&self, request: CodeRequest<'_>) -> Result<Value, RuntimeError> {
        self.requests.borrow_mut().push(request.code.to_string());
        Ok(self.result.clone())
    }
}

/// A `Parser` that ignores the source text entirely and returns a fixed node sequence —
/// stands in for the real mlld grammar (out of scope for this crate) so `Runtime`-level
/// tests can drive already-built AST through the actual host-embedding entry points.
pub struct FixedParser {
    nodes: Vec<Node>,
}

impl FixedParser {
    #[must_use]
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }
}

impl Parser for FixedParser {
    fn parse(&self, _source: &str, _mode: ParseMode) -> Result<Vec<Node>, RuntimeError> {
        Ok(self.nodes.clone())
    }
}

// ---------------------------------------------------------------- AST builders --

/// A zeroed `Location`; none of these tests assert on source spans.
#[must_use]
pub fn loc() -> Location {
    Location::new(0, 0, 0)
}

#[must_use]
pub fn text(content: &str) -> Node {
    Node::Text { content: content.to_string(), location: loc() }
}

#[must_use]
pub fn var_ref(identifier: &str) -> Node {
    Node::VariableReference { identifier: identifier.to_string(), fields: Vec::new(), location: loc() }
}

#[must_use]
pub fn string_literal(value: &str) -> Node {
    Node::StringLiteral { value: value.to_string(), interpolated: false, location: loc() }
}

#[must_use]
pub fn number_literal(value: f64) -> Node {
    Node::NumberLiteral { value, location: loc() }
}

/// A `@identifier.field` reference.
#[must_use]
pub fn field_ref(identifier: &str, field: &str) -> Node {
    Node::VariableReference {
        identifier: identifier.to_string(),
        fields: vec![mlld_core::ast::FieldAccess::Field(field.to_string())],
        location: loc(),
    }
}

#[must_use]
pub fn binary_op(op: mlld_core::ast::BinaryOperator, left: Node, right: Node) -> Node {
    Node::BinaryOp { op, left: Box::new(left), right: Box::new(right), location: loc() }
}

/// A bare `name(args...)` call, used both for invoking `/exe` callables and for guard
/// actions like `deny "..."` / `retry "..."`.
#[must_use]
pub fn call(name: &str, args: Vec<Node>) -> Node {
    Node::ExecInvocation { target: Box::new(var_ref(name)), args, location: loc() }
}

#[must_use]
pub fn pipeline(head: Node, stage_targets: Vec<Node>, parallel: bool) -> Node {
    Node::PipelineExpression {
        head: Box::new(head),
        stages: stage_targets.into_iter().map(|target| mlld_core::ast::StageRef { target }).collect(),
        parallel,
        location: loc(),
    }
}

#[must_use]
pub fn when_arm(condition: Option<Node>, action: Node) -> mlld_core::ast::WhenArm {
    mlld_core::ast::WhenArm { condition, action, binding: None }
}

/// Builds a `/var @name = ...` directive whose value is the given template body nodes.
#[must_use]
pub fn var_directive(name: &str, body: Vec<Node>) -> Node {
    let mut values = IndexMap::new();
    values.insert("value".to_string(), body);
    let mut raw = IndexMap::new();
    raw.insert("name".to_string(), name.to_string());
    Node::Directive {
        kind: DirectiveKind::Var,
        subtype: None,
        values,
        raw,
        params: Vec::new(),
        exe_body: None,
        location: loc(),
    }
}

/// Builds a `/var @name = "..."` directive carrying a security label.
#[must_use]
pub fn labeled_var_directive(name: &str, body: Vec<Node>, label: &str) -> Node {
    let mut values = IndexMap::new();
    values.insert("value".to_string(), body);
    let mut raw = IndexMap::new();
    raw.insert("name".to_string(), name.to_string());
    raw.insert("label".to_string(), label.to_string());
    Node::Directive {
        kind: DirectiveKind::Var,
        subtype: None,
        values,
        raw,
        params: Vec::new(),
        exe_body: None,
        location: loc(),
    }
}

#[must_use]
pub fn array_literal(items: Vec<Node>) -> Node {
    Node::ArrayLiteral { items, location: loc() }
}

/// Builds a `/run <language> {raw_source}` directive with a literal (non-interpolated)
/// command body.
#[must_use]
pub fn run_directive(language: &str, raw_source: &str) -> Node {
    let mut raw = IndexMap::new();
    raw.insert("source".to_string(), raw_source.to_string());
    Node::Directive {
        kind: DirectiveKind::Run,
        subtype: Some(language.to_string()),
        values: IndexMap::new(),
        raw,
        params: Vec::new(),
        exe_body: None,
        location: loc(),
    }
}

/// Builds a `/for @variable in iterable => body` directive.
#[must_use]
pub fn for_directive(variable: &str, iterable: Node, body: Node, parallel: bool) -> Node {
    Node::Directive {
        kind: DirectiveKind::For,
        subtype: None,
        values: IndexMap::new(),
        raw: IndexMap::new(),
        params: Vec::new(),
        exe_body: Some(ExeBody::For { variable: variable.to_string(), iterable: Box::new(iterable), body: Box::new(body), parallel }),
        location: loc(),
    }
}

/// Builds a `/loop(max, interval) until <cond> => <body...>` directive.
#[must_use]
pub fn loop_directive(max: u32, interval_ms: u32, until: Vec<Node>, body: Vec<Node>) -> Node {
    let mut raw = IndexMap::new();
    raw.insert("max".to_string(), max.to_string());
    raw.insert("interval".to_string(), interval_ms.to_string());
    let mut values = IndexMap::new();
    values.insert("until".to_string(), until);
    values.insert("body".to_string(), body);
    Node::Directive {
        kind: DirectiveKind::Loop,
        subtype: None,
        values,
        raw,
        params: Vec::new(),
        exe_body: None,
        location: loc(),
    }
}

/// Builds a `/when <mode> [ ... ]` directive.
#[must_use]
pub fn when_directive(mode: mlld_core::ast::WhenMode, arms: Vec<mlld_core::ast::WhenArm>) -> Node {
    Node::Directive {
        kind: DirectiveKind::When,
        subtype: None,
        values: IndexMap::new(),
        raw: IndexMap::new(),
        params: Vec::new(),
        exe_body: Some(ExeBody::When { mode, arms }),
        location: loc(),
    }
}

/// Builds a `/show ...` directive.
#[must_use]
pub fn show_directive(body: Vec<Node>) -> Node {
    let mut values = IndexMap::new();
    values.insert("value".to_string(), body);
    Node::Directive {
        kind: DirectiveKind::Show,
        subtype: None,
        values,
        raw: IndexMap::new(),
        params: Vec::new(),
        exe_body: None,
        location: loc(),
    }
}

/// Builds a `/log ...` directive.
#[must_use]
pub fn log_directive(body: Vec<Node>) -> Node {
    let mut values = IndexMap::new();
    values.insert("value".to_string(), body);
    Node::Directive {
        kind: DirectiveKind::Log,
        subtype: None,
        values,
        raw: IndexMap::new(),
        params: Vec::new(),
        exe_body: None,
        location: loc(),
    }
}

/// Builds an `/output ... to <sink>` directive.
#[must_use]
pub fn output_directive(body: Vec<Node>, sink: &str) -> Node {
    let mut values = IndexMap::new();
    values.insert("value".to_string(), body);
    let mut raw = IndexMap::new();
    raw.insert("sink".to_string(), sink.to_string());
    Node::Directive {
        kind: DirectiveKind::Output,
        subtype: None,
        values,
        raw,
        params: Vec::new(),
        exe_body: None,
        location: loc(),
    }
}

/// Builds an `/exe @name(params) = <exe_body>` directive.
#[must_use]
pub fn exe_directive(name: &str, params: Vec<&str>, body: ExeBody) -> Node {
    let mut raw = IndexMap::new();
    raw.insert("name".to_string(), name.to_string());
    Node::Directive {
        kind: DirectiveKind::Exe,
        subtype: None,
        values: IndexMap::new(),
        raw,
        params: params.into_iter().map(|p| Param { name: p.to_string(), type_hint: None }).collect(),
        exe_body: Some(body),
        location: loc(),
    }
}

/// Builds a `/guard name scope timing [ when [...] ]` directive.
#[must_use]
pub fn guard_directive(name: &str, scope: &str, timing: &str, arms: Vec<mlld_core::ast::WhenArm>) -> Node {
    let mut raw = IndexMap::new();
    raw.insert("name".to_string(), name.to_string());
    raw.insert("scope".to_string(), scope.to_string());
    raw.insert("timing".to_string(), timing.to_string());
    Node::Directive {
        kind: DirectiveKind::Guard,
        subtype: None,
        values: IndexMap::new(),
        raw,
        params: Vec::new(),
        exe_body: Some(ExeBody::When { mode: mlld_core::ast::WhenMode::First, arms }),
        location: loc(),
    }
}

/// Builds a `/import { names } from "specifier"` directive.
#[must_use]
pub fn import_named(names: &[&str], specifier: &str) -> Node {
    let mut values = IndexMap::new();
    values.insert("names".to_string(), names.iter().map(|n| var_ref(n)).collect());
    let mut raw = IndexMap::new();
    raw.insert("specifier".to_string(), specifier.to_string());
    Node::Directive {
        kind: DirectiveKind::Import,
        subtype: None,
        values,
        raw,
        params: Vec::new(),
        exe_body: None,
        location: loc(),
    }
}

/// Builds a wildcard `/import * from "specifier"` directive, optionally aliased.
#[must_use]
pub fn import_wildcard(specifier: &str, alias: Option<&str>) -> Node {
    let mut raw = IndexMap::new();
    raw.insert("specifier".to_string(), specifier.to_string());
    if let Some(alias) = alias {
        raw.insert("alias".to_string(), alias.to_string());
    }
    Node::Directive {
        kind: DirectiveKind::Import,
        subtype: None,
        values: IndexMap::new(),
        raw,
        params: Vec::new(),
        exe_body: None,
        location: loc(),
    }
}

/// Builds an `/export { names }` directive.
#[must_use]
pub fn export_named(names: &[&str]) -> Node {
    let mut values = IndexMap::new();
    values.insert("names".to_string(), names.iter().map(|n| var_ref(n)).collect());
    Node::Directive {
        kind: DirectiveKind::Export,
        subtype: None,
        values,
        raw: IndexMap::new(),
        params: Vec::new(),
        exe_body: None,
        location: loc(),
    }
}
