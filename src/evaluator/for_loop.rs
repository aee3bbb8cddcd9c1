//! `for` and `loop` control flow (spec.md §4.3 `/for`, `/loop`, §5 concurrency model).
//!
//! `for @v in iterable => body`: iterates in source order, binding `variable` fresh in a
//! child environment per item. The `parallel` variant conceptually spawns child tasks
//! over an immutable read view of the parent environment and assembles results in
//! source order (spec.md §5) — this tree-walker evaluates sequentially regardless, since
//! sequential evaluation already satisfies that ordering guarantee; a host embedding
//! this crate in a multi-threaded executor may run iterations concurrently as long as
//! it preserves the same result ordering when collecting them.
//!
//! `/loop(max, interval) until cond [ body ]`: repeats `body` until `cond` is true or
//! `max` iterations elapse. The interval is a minimum pause between iterations, injected
//! via [`IntervalWaiter`] so this module stays free of a real async runtime dependency.

use crate::env::{Environment, Variable, VariableKind, VariableSource};
use crate::error::RuntimeError;
use crate::structured_value::{Mx, StructuredValue};
use crate::value::Value;

/// Injected pacing capability for `/loop(max, interval)`'s minimum pause between
/// iterations. [`NoWait`] is appropriate for tests and for hosts that apply their own
/// scheduling around `/loop` bodies.
pub trait IntervalWaiter {
    fn wait_ms(&mut self, ms: u32);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoWait;

impl IntervalWaiter for NoWait {
    fn wait_ms(&mut self, _ms: u32) {}
}

/// Evaluates `for @variable_name in items => body`, returning one result per item in
/// source order (spec.md §4.3: "if body is an expression, collect results into an
/// array").
///
/// Does not itself consult a [`crate::resource::ResourceTracker`]: `eval_body` is a
/// closure over the full evaluator, which already owns the tracker, so the iteration
/// check belongs inside `eval_body` (its first line) rather than as a second parameter
/// here — threading both would require two independent mutable borrows of the same
/// tracker at the call site.
pub fn eval_for(
    variable_name: &str,
    items: &[Value],
    base_env: &Environment,
    mut eval_body: impl FnMut(&Environment) -> Result<StructuredValue, RuntimeError>,
) -> Result<Vec<StructuredValue>, RuntimeError> {
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let child = base_env.child();
        child.set_overwrite(Variable::new(
            variable_name,
            VariableKind::Computed,
            StructuredValue::from_value(item.clone(), Mx::new()),
            VariableSource::ForBinding,
        ));
        results.push(eval_body(&child)?);
    }
    Ok(results)
}

/// What one `eval_loop` step did: stop because `until` was already true, or run the
/// body and continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Stop,
    Continue,
}

/// Evaluates `/loop(max, interval) until cond [ body ]` for effect (spec.md §4.3).
///
/// `step` is checked before each iteration, including the first: it evaluates `until`
/// itself and returns [`LoopControl::Stop`] without running the body when `until` is
/// already true, or runs the body and returns [`LoopControl::Continue`] otherwise. Both
/// halves are combined into one closure (rather than a separate `eval_until`/`eval_body`
/// pair) because a caller closing over the same `&mut Evaluator` for both would need two
/// simultaneous mutable borrows of it — one closure avoids that. The loop stops as soon
/// as `step` returns `Stop`, or once `max` iterations have run, whichever comes first. As
/// with [`eval_for`], iteration accounting belongs inside `step`.
pub fn eval_loop(
    max: u32,
    interval_ms: u32,
    env: &Environment,
    waiter: &mut dyn IntervalWaiter,
    mut step: impl FnMut(&Environment) -> Result<LoopControl, RuntimeError>,
) -> Result<(), RuntimeError> {
    let mut count = 0u32;
    loop {
        if count >= max {
            break;
        }
        if step(env)? == LoopControl::Stop {
            break;
        }
        count += 1;
        if count < max {
            waiter.wait_ms(interval_ms);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{eval_for, eval_loop, LoopControl, NoWait};
    use crate::env::Environment;
    use crate::structured_value::StructuredValue;
    use crate::value::Value;

    #[test]
    fn for_collects_results_in_source_order() {
        let env = Environment::root(None, None);
        let items = vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)];
        let results = eval_for("n", &items, &env, |child_env| {
            let var = child_env.get("n").expect("bound");
            let n = var.value.as_data().as_f64().unwrap_or(0.0);
            Ok(StructuredValue::number(n * 2.0))
        })
        .unwrap();
        let values: Vec<_> = results.iter().map(|r| r.as_data().as_f64().unwrap_or(0.0)).collect();
        assert_eq!(values, vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn loop_stops_at_max_iterations() {
        let env = Environment::root(None, None);
        let mut waiter = NoWait;
        let mut iterations = 0;
        eval_loop(3, 0, &env, &mut waiter, |_| {
            iterations += 1;
            Ok(LoopControl::Continue)
        })
        .unwrap();
        assert_eq!(iterations, 3);
    }

    #[test]
    fn loop_stops_early_when_until_is_true() {
        let env = Environment::root(None, None);
        let mut waiter = NoWait;
        let mut iterations = 0;
        eval_loop(10, 0, &env, &mut waiter, |_| {
            if iterations == 2 {
                return Ok(LoopControl::Stop);
            }
            iterations += 1;
            Ok(LoopControl::Continue)
        })
        .unwrap();
        assert_eq!(iterations, 2);
    }
}
