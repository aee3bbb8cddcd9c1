//! `js`/`node` code execution (spec.md §4.5).
//!
//! Parameters bind as same-named variables in a sandboxed scope; shadow functions are
//! injected as callables. `js` permits both expression-body and statement-body forms,
//! auto-wrapping in `return (…)` when no explicit return/semicolon is present. `node`
//! runs in a separate process for Node-only APIs — the distinction is carried as
//! [`crate::host::CodeRequest::separate_process`] for the injected engine to act on.

use indexmap::IndexMap;

use super::Language;
use crate::error::RuntimeError;
use crate::host::{CodeRequest, JsEngine, ShadowFnSpec};
use crate::structured_value::StructuredValue;
use crate::value::Value;

/// Wraps an expression-body `js { … }` in `return (…)` when the body has no explicit
/// `return` and doesn't already end a statement with `;` (spec.md §4.5).
fn auto_wrap_expression_body(code: &str) -> String {
    let trimmed = code.trim();
    let looks_like_statements = trimmed.contains("return") || trimmed.ends_with(';') || trimmed.ends_with('}');
    if looks_like_statements {
        code.to_string()
    } else {
        format!("return ({trimmed});")
    }
}

pub fn run_js(
    engine: &dyn JsEngine,
    lang: Language,
    code: &str,
    params: &IndexMap<String, StructuredValue>,
    shadow_fns: Vec<ShadowFnSpec>,
) -> Result<Value, RuntimeError> {
    let prepared = auto_wrap_expression_body(code);
    let request = CodeRequest {
        code: &prepared,
        params: params.iter().map(|(name, value)| (name.clone(), value.as_data().clone())).collect(),
        shadow_fns,
        separate_process: lang == Language::Node,
    };
    engine.eval(request)
}
