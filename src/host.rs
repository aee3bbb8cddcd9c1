//! Injected capability traits — the external collaborators this crate consumes rather
//! than implements (spec.md §1 scope note, §6 "Injected capabilities").
//!
//! The core never reads a filesystem, spawns a process, or opens a socket directly: it
//! calls through these traits, which a host (CLI, test harness, embedding application)
//! supplies: capability-gated syscall wrappers generalized from "a VM's view of the
//! OS" to "the interpreter's view of its embedding host."

use crate::ast::Node;
use crate::error::RuntimeError;

/// Parses mlld source into an AST. The parser itself is out of scope for this crate
/// (spec.md §1); only its output shape (`crate::ast`) is defined here.
pub trait Parser {
    fn parse(&self, source: &str, mode: ParseMode) -> Result<Vec<Node>, RuntimeError>;
}

/// Disambiguates directive syntax: markdown mode requires a leading `/`; strict mode
/// accepts bare keywords (spec.md §9 open question 2 — left to the parser).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Markdown,
    Strict,
}

/// Filesystem access for file-load expressions, `/path`, and file-sink `/output`.
pub trait FileSystem {
    fn read_file(&self, path: &str) -> Result<String, RuntimeError>;
    fn write_file(&self, path: &str, contents: &str) -> Result<(), RuntimeError>;
    fn exists(&self, path: &str) -> bool;
    fn mkdir(&self, path: &str) -> Result<(), RuntimeError>;
    fn stat(&self, path: &str) -> Result<FileStat, RuntimeError>;
    fn read_dir(&self, path: &str) -> Result<Vec<String>, RuntimeError>;
}

#[derive(Debug, Clone, Copy)]
pub struct FileStat {
    pub is_dir: bool,
    pub len: u64,
    pub modified_unix_secs: Option<i64>,
}

/// HTTP(S) access for URL-specifier imports.
pub trait HttpFetcher {
    fn fetch(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse, RuntimeError>;
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub content: String,
    pub headers: Vec<(String, String)>,
    pub status: u16,
}

/// Subprocess execution for `cmd`/`sh` executables.
pub trait Subprocess {
    fn spawn(&self, command: &str, env: &[(String, String)], cwd: Option<&str>, stdin: Option<&str>) -> Result<ProcessOutput, RuntimeError>;
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Resolves `@author/module[@version|@tag]` registry specifiers.
pub trait RegistryClient {
    fn resolve(&self, specifier: &str) -> Result<RegistryModule, RuntimeError>;
}

#[derive(Debug, Clone)]
pub struct RegistryModule {
    pub content: String,
    pub integrity: String,
    pub needs: crate::capability::Needs,
    pub dependencies: Vec<String>,
}

/// Injected sandboxed JavaScript engine for `js`/`node` executable bodies
/// (spec.md §4.5). The core never embeds a JS runtime itself; a host supplies one
/// (e.g. a V8 isolate or QuickJS context) the same way it supplies [`Subprocess`].
pub trait JsEngine {
    fn eval(&self, request: CodeRequest<'_>) -> Result<crate::value::Value, RuntimeError>;
}

/// Injected Python engine for `py`/`python` executable bodies (spec.md §4.5).
pub trait PyEngine {
    fn eval(&self, request: CodeRequest<'_>) -> Result<crate::value::Value, RuntimeError>;
}

/// One shadow-function registration made callable inside a code block
/// (spec.md §4.5, §9 "Executable shadow environments").
#[derive(Debug, Clone)]
pub struct ShadowFnSpec {
    pub name: String,
    pub params: Vec<String>,
    /// Opaque handle the engine uses to call back into the interpreter for this
    /// function (an index into the evaluator's own table); the core treats this as
    /// inert data when constructing the request.
    pub handle: u32,
}

/// A single code-execution request passed to [`JsEngine`]/[`PyEngine`].
#[derive(Debug, Clone)]
pub struct CodeRequest<'a> {
    pub code: &'a str,
    pub params: Vec<(String, crate::value::Value)>,
    pub shadow_fns: Vec<ShadowFnSpec>,
    /// `true` for `node`/`python` (separate-process variants with fuller API access)
    /// as opposed to `js`/`py` (in-process, sandboxed).
    pub separate_process: bool,
}

/// Injected clock, for reproducible `@now` and deterministic tests.
pub trait Clock {
    fn now_unix_millis(&self) -> i64;
}

/// Injected RNG, for reproducible `@mx`/pipeline identifiers in tests.
pub trait Random {
    fn gen_u64(&self) -> u64;
}

/// A [`Clock`] backed by [`std::time::SystemTime`]. Not reproducible; intended for
/// production hosts that don't need deterministic timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix_millis(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// A [`Clock`] that always returns the same instant, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_unix_millis(&self) -> i64 {
        self.0
    }
}

/// A [`Random`] backed by `rand`'s thread-local generator. Not reproducible; intended
/// for production hosts that don't need deterministic `@mx` identifiers, mirroring
/// [`SystemClock`]'s role for [`Clock`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl Random for ThreadRandom {
    fn gen_u64(&self) -> u64 {
        rand::random()
    }
}

/// A [`Random`] seeded with a fixed value, for deterministic `@mx`/pipeline identifiers
/// in tests, mirroring [`FixedClock`]'s role for [`Clock`]. Uses `ChaCha8Rng` rather than
/// a hand-rolled counter so a host can still get varied-looking ids across calls while
/// keeping the overall sequence reproducible run to run.
pub struct SeededRandom(std::cell::RefCell<rand_chacha::ChaCha8Rng>);

impl SeededRandom {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        use rand::SeedableRng;
        Self(std::cell::RefCell::new(rand_chacha::ChaCha8Rng::seed_from_u64(seed)))
    }
}

impl Random for SeededRandom {
    fn gen_u64(&self) -> u64 {
        use rand::RngCore;
        self.0.borrow_mut().next_u64()
    }
}
