//! Built-in array/string/universal methods (spec.md §4.3.2).
//!
//! The specification leaves the exact built-in method set to the implementer, advising
//! "prefer fewer, well-tested methods rather than reproduce every observed usage"
//! (spec.md §9 open question 3). This module implements exactly the conservative set
//! SPEC_FULL.md settles on: arrays (`join`, `includes`, `filter`, `map`, `length`,
//! `isArray`), strings (`toLowerCase`, `toUpperCase`, `split`, `trim`, `includes`,
//! `slice`), and the universal `isDefined`.
//!
//! `filter`/`map` take a predicate/mapper expressed as an already-evaluated callback
//! rather than this module invoking the evaluator itself — see [`MethodCallback`] — to
//! keep this a leaf module with no dependency on `evaluator::mod`'s dispatch loop.

use crate::error::RuntimeError;
use crate::structured_value::StructuredValue;
use crate::value::Value;

/// Invokes an `/exe`-defined or inline callable for `filter`/`map`, injected by the
/// caller (the evaluator, which alone knows how to invoke an `Executable`).
pub trait MethodCallback {
    fn call(&mut self, arg: &StructuredValue) -> Result<StructuredValue, RuntimeError>;
}

/// Method calls preserve `.mx` (spec.md §4.3.2): the receiver's metadata carries
/// through to the result, with the method name appended to `sources`.
fn carry_mx(receiver: &StructuredValue, data: Value, method: &str) -> StructuredValue {
    let mut mx = receiver.mx.clone();
    mx.push_source(format!("method:{method}"));
    StructuredValue::from_value(data, mx)
}

pub fn call_array_method(
    receiver: &StructuredValue,
    name: &str,
    args: &[StructuredValue],
    callback: &mut dyn MethodCallback,
) -> Result<StructuredValue, RuntimeError> {
    let items = receiver
        .as_data()
        .as_array()
        .ok_or_else(|| RuntimeError::field_access(format!("'{name}' called on a non-array value")))?;

    match name {
        "join" => {
            let separator = args.first().map(StructuredValue::as_text).unwrap_or(",");
            let joined = items.iter().map(Value::to_display_string).collect::<Vec<_>>().join(separator);
            Ok(carry_mx(receiver, Value::String(joined), name))
        }
        "includes" => {
            let needle = args.first().ok_or_else(|| RuntimeError::field_access("'includes' requires one argument"))?;
            let found = items.iter().any(|item| item == needle.as_data());
            Ok(carry_mx(receiver, Value::Boolean(found), name))
        }
        "length" => Ok(carry_mx(receiver, Value::Number(items.len() as f64), name)),
        "isArray" => Ok(carry_mx(receiver, Value::Boolean(true), name)),
        "filter" => {
            let mut kept = Vec::new();
            for item in items {
                let wrapped = StructuredValue::from_value(item.clone(), receiver.mx.clone());
                if callback.call(&wrapped)?.as_data().is_truthy() {
                    kept.push(item.clone());
                }
            }
            Ok(carry_mx(receiver, Value::Array(kept), name))
        }
        "map" => {
            let mut mapped = Vec::with_capacity(items.len());
            for item in items {
                let wrapped = StructuredValue::from_value(item.clone(), receiver.mx.clone());
                mapped.push(callback.call(&wrapped)?.as_data().clone());
            }
            Ok(carry_mx(receiver, Value::Array(mapped), name))
        }
        other => Err(RuntimeError::field_access(format!("unknown array method '{other}'"))),
    }
}

pub fn call_string_method(receiver: &StructuredValue, name: &str, args: &[StructuredValue]) -> Result<StructuredValue, RuntimeError> {
    let text = receiver.as_text();
    match name {
        "toLowerCase" => Ok(carry_mx(receiver, Value::String(text.to_lowercase()), name)),
        "toUpperCase" => Ok(carry_mx(receiver, Value::String(text.to_uppercase()), name)),
        "trim" => Ok(carry_mx(receiver, Value::String(text.trim().to_string()), name)),
        "split" => {
            let separator = args.first().map(StructuredValue::as_text).unwrap_or(",");
            let parts = if separator.is_empty() {
                text.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                text.split(separator).map(|s| Value::String(s.to_string())).collect()
            };
            Ok(carry_mx(receiver, Value::Array(parts), name))
        }
        "includes" => {
            let needle = args.first().map(StructuredValue::as_text).unwrap_or("");
            Ok(carry_mx(receiver, Value::Boolean(text.contains(needle)), name))
        }
        "slice" => {
            let chars: Vec<char> = text.chars().collect();
            let start = args.first().and_then(|a| a.as_data().as_f64()).unwrap_or(0.0).max(0.0) as usize;
            let end = args
                .get(1)
                .and_then(|a| a.as_data().as_f64())
                .map(|n| n as usize)
                .unwrap_or(chars.len())
                .min(chars.len());
            let sliced: String = chars.get(start.min(end)..end).unwrap_or_default().iter().collect();
            Ok(carry_mx(receiver, Value::String(sliced), name))
        }
        other => Err(RuntimeError::field_access(format!("unknown string method '{other}'"))),
    }
}

/// `isDefined` — the one universal method available on every value (spec.md §4.3.2).
pub fn call_universal_method(receiver: &StructuredValue, name: &str) -> Result<StructuredValue, RuntimeError> {
    match name {
        "isDefined" => Ok(carry_mx(receiver, Value::Boolean(!matches!(receiver.as_data(), Value::Null)), name)),
        other => Err(RuntimeError::field_access(format!("unknown method '{other}'"))),
    }
}
