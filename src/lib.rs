//! mlld interpreter core: AST evaluation, environment/scoping, structured values with
//! provenance and security labels, the pipeline engine, guard/taint enforcement, the
//! resolver/import subsystem, and the multi-language executor bridge (spec.md §1).
//!
//! Parsing, the CLI/TUI/LSP surface, editor bundles, the module registry's HTTP
//! protocol, an MCP server, and an on-disk lock-file format are out of scope: every
//! external collaborator this crate needs is reached through an injected trait in
//! [`host`], and a host embeds this crate through [`runtime::Runtime`].
#![expect(clippy::too_many_arguments, reason = "host construction and directive dispatch carry wide signatures")]
#![expect(clippy::type_complexity, reason = "evaluator closures over injected capabilities are intentionally rich")]

pub mod ast;
pub mod capability;
pub mod env;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod guard;
pub mod host;
mod intern;
pub mod interpolator;
pub mod io;
pub mod labels;
pub mod materializer;
pub mod pipeline;
pub mod resolver;
pub mod resource;
pub mod runtime;
pub mod structured_value;
pub mod tracer;
pub mod value;

pub use crate::{
    capability::{Capability, CapabilitySet, Needs, PermissionDenied},
    env::{Environment, Executable, Variable, VariableKind, VariableSource},
    error::{ErrorKind, RunResult, RuntimeError, TraceEntry},
    evaluator::{Evaluator, HostContext},
    executor::ExecutorBridge,
    guard::{GuardOutcome, GuardRegistry, GuardRule},
    host::{Clock, FileSystem, HttpFetcher, JsEngine, Parser, PyEngine, Random, RegistryClient, Subprocess},
    materializer::{Materializer, OutputFormat, StateWrite},
    resolver::Resolver,
    runtime::{Handle, ProcessOutput, Runtime, RuntimeOptions},
    structured_value::{Mx, StructuredValue},
    value::Value,
};
