//! `StructuredValue` — the `.text`/`.data`/`.mx` triple that crosses every boundary in the
//! interpreter (spec.md §2 C2, §4.2).
//!
//! This is the crate's central value type: every directive result, every interpolated
//! template, every executor return, and every pipeline stage output is one of these.
//! The invariant the whole module exists to uphold (spec.md §8 property 1) is that
//! `.mx.labels` only ever grows across a transformation chain — enforced here by making
//! every constructor that combines multiple `StructuredValue`s take the union of their
//! label sets, rather than leaving callers to remember to do it.

use std::fmt;

use crate::ast::Location;
use crate::labels::LabelSet;
use crate::value::Value;

/// Host-supplied policy context attached to a value at creation (e.g. a module's
/// declared trust level). Opaque to the interpreter; threaded through for guards that
/// want to inspect it.
pub type PolicyContext = crate::value::Value;

/// Provenance and security metadata carried alongside a `StructuredValue` (spec.md §3,
/// `.mx`).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Mx {
    pub labels: LabelSet,
    pub taint: LabelSet,
    /// Operation names that produced or touched this value, in order
    /// (`"template"`, `"js:funcName"`, `"pipeline:stage@2"`, `"guard:name"`).
    pub sources: Vec<String>,
    /// An approximate token count for the value's text form, used by streaming sinks'
    /// progress counters.
    pub tokens: u32,
    pub policy: Option<PolicyContext>,
    pub defined_at: Option<Location>,
    /// Set only for values produced by evaluating an expression (as opposed to a
    /// literal), naming the expression kind that produced it (e.g. `"binary_op:+"`).
    pub expression_provenance: Option<String>,
}

impl Mx {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_location(mut self, location: Location) -> Self {
        self.defined_at = Some(location);
        self
    }

    #[must_use]
    pub fn with_labels(mut self, labels: LabelSet) -> Self {
        self.labels = labels;
        self
    }

    pub fn push_source(&mut self, source: impl Into<String>) {
        self.sources.push(source.into());
    }

    /// Merges another value's metadata into this one: labels and taint union, sources
    /// concatenate, token count accumulates. This is the single place the
    /// label-monotonicity invariant is enforced for compound operations.
    pub fn merge_from(&mut self, other: &Mx) {
        self.labels = self.labels.union(&other.labels);
        self.taint = self.taint.union(&other.taint);
        self.sources.extend(other.sources.iter().cloned());
        self.tokens = self.tokens.saturating_add(other.tokens);
    }
}

/// The uniform value wrapper that crosses every boundary in the interpreter
/// (spec.md §4.2).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StructuredValue {
    text: String,
    data: Value,
    pub mx: Mx,
}

impl StructuredValue {
    #[must_use]
    pub fn new(text: impl Into<String>, data: Value, mx: Mx) -> Self {
        Self { text: text.into(), data, mx }
    }

    /// Constructs a scalar text value whose `.data` is the same string.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            data: Value::String(text.clone()),
            text,
            mx: Mx::default(),
        }
    }

    #[must_use]
    pub fn number(n: f64) -> Self {
        Self {
            text: crate::value::Value::Number(n).to_display_string(),
            data: Value::Number(n),
            mx: Mx::default(),
        }
    }

    #[must_use]
    pub fn boolean(b: bool) -> Self {
        Self {
            text: b.to_string(),
            data: Value::Boolean(b),
            mx: Mx::default(),
        }
    }

    #[must_use]
    pub fn null() -> Self {
        Self {
            text: String::new(),
            data: Value::Null,
            mx: Mx::default(),
        }
    }

    /// Wraps a `Value` of any shape, deriving `.text` via its display form. Used when an
    /// executor or field access produces structured data directly.
    #[must_use]
    pub fn from_value(data: Value, mx: Mx) -> Self {
        let text = data.to_display_string();
        Self { text, data, mx }
    }

    #[must_use]
    pub fn with_mx(mut self, mx: Mx) -> Self {
        self.mx = mx;
        self
    }

    /// `asText(v)` (spec.md §4.2): the canonical display-boundary projection.
    #[must_use]
    pub fn as_text(&self) -> &str {
        &self.text
    }

    /// `asData(v)` (spec.md §4.2): the computation-boundary projection.
    #[must_use]
    pub fn as_data(&self) -> &Value {
        &self.data
    }

    pub fn into_parts(self) -> (String, Value, Mx) {
        (self.text, self.data, self.mx)
    }

    /// Combines this value with another, unioning metadata — used by concatenation,
    /// template interpolation, and any other operation that folds several
    /// `StructuredValue`s into one (spec.md §4.2 rule).
    #[must_use]
    pub fn combine_with(mut self, other: &StructuredValue, combined_text: String, combined_data: Value) -> Self {
        self.mx.merge_from(&other.mx);
        self.text = combined_text;
        self.data = combined_data;
        self
    }
}

impl fmt::Display for StructuredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// `isStructured(v) -> bool` (spec.md §4.2) — a pass-through predicate used at API
/// boundaries that accept either a raw `Value` or an already-wrapped `StructuredValue`.
/// Since this crate's boundary types are statically distinguished, this is a trivial
/// `true`, kept as a named function so call sites read the same as the specification.
#[must_use]
pub fn is_structured(_value: &StructuredValue) -> bool {
    true
}

/// Unions the `.mx.labels`/`.taint`/`.sources` of a slice of inputs into one `Mx`,
/// stamped with `location`. Used by the interpolator and pipeline engine when combining
/// many inputs into a single output value (spec.md §4.2, §4.4 step 5).
#[must_use]
pub fn merge_mx<'a>(inputs: impl IntoIterator<Item = &'a Mx>, location: Option<Location>) -> Mx {
    let mut merged = Mx::new();
    for input in inputs {
        merged.merge_from(input);
    }
    merged.defined_at = location;
    merged
}
