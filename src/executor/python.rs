//! `py`/`python` code execution (spec.md §4.5).
//!
//! Parameters bind as Python locals; primitive types pass through with numeric
//! coercion attempted; `StructuredValue`s pass as dicts/lists tagged with
//! `__mlld_type__`/`__mlld_metadata__` so Python-side helpers (`mlld.is_variable`) can
//! recognize them.

use indexmap::IndexMap;

use super::Language;
use crate::error::RuntimeError;
use crate::host::{CodeRequest, PyEngine, ShadowFnSpec};
use crate::structured_value::StructuredValue;
use crate::value::Value;

/// Attempts to coerce a scalar string to a number, matching the loose numeric coercion
/// applied to command-line-style parameters; leaves every other shape untouched.
fn coerce_param(value: &StructuredValue) -> Value {
    match value.as_data() {
        Value::String(s) => s.parse::<f64>().map(Value::Number).unwrap_or_else(|_| Value::String(s.clone())),
        other @ (Value::Array(_) | Value::Object(_)) => tag_structured(other.clone(), value),
        other => other.clone(),
    }
}

/// Wraps an object/array parameter with `__mlld_type__`/`__mlld_metadata__` markers so
/// Python-side code can distinguish an mlld StructuredValue from a plain dict/list.
fn tag_structured(data: Value, original: &StructuredValue) -> Value {
    let mut metadata = indexmap::IndexMap::new();
    metadata.insert("labels".to_string(), Value::Array(original.mx.labels.iter().map(|l| Value::String(l.name())).collect()));
    metadata.insert("sources".to_string(), Value::Array(original.mx.sources.iter().cloned().map(Value::String).collect()));

    let mut wrapper = indexmap::IndexMap::new();
    wrapper.insert("__mlld_type__".to_string(), Value::String(type_tag(&data).to_string()));
    wrapper.insert("__mlld_metadata__".to_string(), Value::Object(metadata));
    wrapper.insert("value".to_string(), data);
    Value::Object(wrapper)
}

fn type_tag(value: &Value) -> &'static str {
    match value {
        Value::Array(_) => "array",
        Value::Object(_) => "object",
        _ => "scalar",
    }
}

pub fn run_python(
    engine: &dyn PyEngine,
    lang: Language,
    code: &str,
    params: &IndexMap<String, StructuredValue>,
    shadow_fns: Vec<ShadowFnSpec>,
) -> Result<Value, RuntimeError> {
    let request = CodeRequest {
        code,
        params: params.iter().map(|(name, value)| (name.clone(), coerce_param(value))).collect(),
        shadow_fns,
        separate_process: lang == Language::Python,
    };
    engine.eval(request)
}
