//! Executor Bridge (spec.md §4.5, C5).
//!
//! Unified `execute(lang, code, params, shadowEnvs) -> StructuredValue` interface over
//! shell (`cmd`/`sh`), JavaScript (`js`/`node`), and Python (`py`/`python`). Each
//! language's actual runtime is an injected host capability
//! ([`crate::host::Subprocess`], [`crate::host::JsEngine`], [`crate::host::PyEngine`]);
//! this module owns parameter binding, shell escaping, and the per-language request
//! construction, not the engines themselves.

pub mod js;
pub mod python;
pub mod shell;

use indexmap::IndexMap;

use crate::error::RuntimeError;
use crate::host::{JsEngine, PyEngine, Subprocess};
use crate::structured_value::{Mx, StructuredValue};
use crate::value::Value;

/// A language an `/exe` code body or command block targets (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Language {
    Sh,
    Cmd,
    Js,
    Node,
    Py,
    Python,
}

/// Bridges `/exe` code/command bodies to their host-supplied runtimes.
pub struct ExecutorBridge<'a> {
    subprocess: &'a dyn Subprocess,
    js: &'a dyn JsEngine,
    py: &'a dyn PyEngine,
}

impl<'a> ExecutorBridge<'a> {
    #[must_use]
    pub fn new(subprocess: &'a dyn Subprocess, js: &'a dyn JsEngine, py: &'a dyn PyEngine) -> Self {
        Self { subprocess, js, py }
    }

    /// Invokes `lang` with `source` (a shell command template for `sh`/`cmd`, or a code
    /// body for `js`/`node`/`py`/`python`), binding `params` and injecting
    /// `shadow_fns`. Labels from every parameter are unioned into the result
    /// (spec.md §4.2: "code-block outputs inherit labels from all parameters").
    pub fn execute(
        &self,
        lang: Language,
        source: &str,
        params: &IndexMap<String, StructuredValue>,
        shadow_fns: Vec<crate::host::ShadowFnSpec>,
        cwd: Option<&str>,
    ) -> Result<StructuredValue, RuntimeError> {
        let mut mx = Mx::new();
        for value in params.values() {
            mx.merge_from(&value.mx);
        }

        let result = match lang {
            Language::Sh | Language::Cmd => shell::run_command(self.subprocess, lang, source, params, cwd)?,
            Language::Js | Language::Node => js::run_js(self.js, lang, source, params, shadow_fns)?,
            Language::Py | Language::Python => python::run_python(self.py, lang, source, params, shadow_fns)?,
        };

        mx.push_source(format!("{lang}:exec"));
        Ok(StructuredValue::from_value(result, mx))
    }
}
