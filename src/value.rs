//! `Value` — the structured (computation-facing) half of a `StructuredValue` (spec.md §3).
//!
//! A JSON-ish dynamic value shape used at the host/embedder boundary, specialized here
//! into mlld's own object/array/scalar model — this is the `Value` referenced by
//! `StructuredValue.data` (spec.md §4.2), not a general
//! embedded-language object system, so it carries no identity/heap semantics, only
//! structural equality.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A structured, JSON-shaped value: the computation-facing form bound to `.data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
}

impl Value {
    #[must_use]
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Boolean(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::String(s) => !s.is_empty(),
            Self::Array(items) => !items.is_empty(),
            Self::Object(entries) => !entries.is_empty(),
        }
    }

    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Self::Object(entries) => Some(entries),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Coerces to a number, including a numeric-looking string (spec.md §8 property 6:
    /// a `/var`/template-bound value's `.data` is always `Value::String`, so arithmetic
    /// and comparisons over it need this fallback to stay numeric rather than always
    /// reading as `0.0`).
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Renders the value's canonical text form, used when a `Value` needs to be coerced
    /// down to `.text` without going through the full interpolator (e.g. shell argument
    /// binding of a scalar parameter).
    #[must_use]
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Boolean(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => s.clone(),
            Self::Array(_) | Self::Object(_) => json_display(self),
        }
    }

    /// Parses a JSON document into a `Value`, used by the interpolator for `.json`
    /// file-loads and by `/var` literal object/array construction.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Parses a YAML document into a `Value`, used by the interpolator for `.yaml`/
    /// `.yml` file-loads (spec.md §4.4 step 4).
    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        n.to_string()
    }
}

/// JSON text for an `Array`/`Object`, routing nested numbers through [`format_number`]
/// rather than `serde_json`'s own float formatting (which renders a whole number like
/// `30.0` with a trailing `.0` instead of `30`).
fn json_display(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Number(n) => format_number(*n),
        Value::String(s) => serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(json_display).collect();
            format!("[{}]", parts.join(","))
        }
        Value::Object(entries) => {
            let parts: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}:{}", serde_json::to_string(k).unwrap_or_default(), json_display(v)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}
