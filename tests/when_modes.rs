//! `/when` directive dispatch across `Simple`/`First`/`All`/`Any` modes, driven
//! through the full `Evaluator::eval_when` (spec.md §4.3.1).

mod support;

use mlld_core::ast::{BinaryOperator, WhenArm, WhenMode};
use mlld_core::host::{FixedClock, ThreadRandom};
use mlld_core::runtime::{Runtime, RuntimeOptions};
use mlld_core::value::Value;

use support::{binary_op, number_literal, show_directive, string_literal, var_directive, var_ref, when_directive, FakeCodeEngine, FakeFileSystem, FakeHttpFetcher, FixedParser, NoRegistry, ScriptedSubprocess};

fn arm(condition: Option<mlld_core::ast::Node>, action: mlld_core::ast::Node) -> WhenArm {
    WhenArm { condition, action, binding: None }
}

/// `Simple` mode stops at the first matching arm and its action's value is the
/// directive's own result, never a collected array.
#[test]
fn simple_mode_stops_at_first_match() {
    let fs = FakeFileSystem::new();
    let http = FakeHttpFetcher::default();
    let subprocess = ScriptedSubprocess::succeeding("");
    let registry = NoRegistry;
    let engine = FakeCodeEngine::returning(Value::Null);
    let clock = FixedClock(0);
    let random = ThreadRandom;

    let arms = vec![
        arm(Some(binary_op(BinaryOperator::Eq, number_literal(1.0), number_literal(1.0))), string_literal("first")),
        arm(Some(binary_op(BinaryOperator::Eq, number_literal(1.0), number_literal(1.0))), string_literal("second")),
    ];
    let nodes = vec![var_directive("r", vec![when_directive(WhenMode::Simple, arms)]), show_directive(vec![var_ref("r")])];
    let parser = FixedParser::new(nodes);
    let rt = Runtime::new(&parser, &fs, &http, &subprocess, &registry, &engine, &engine, &clock, &random);

    let output = rt.process("unused", RuntimeOptions::default()).expect("simple mode runs").output;
    assert_eq!(output.trim(), "first");
}

/// `First` mode behaves the same as `Simple`: it stops as soon as one arm matches,
/// even though a later arm would also match.
#[test]
fn first_mode_stops_at_first_match() {
    let fs = FakeFileSystem::new();
    let http = FakeHttpFetcher::default();
    let subprocess = ScriptedSubprocess::succeeding("");
    let registry = NoRegistry;
    let engine = FakeCodeEngine::returning(Value::Null);
    let clock = FixedClock(0);
    let random = ThreadRandom;

    let arms = vec![arm(None, string_literal("caught-all")), arm(None, string_literal("never reached"))];
    let nodes = vec![var_directive("r", vec![when_directive(WhenMode::First, arms)]), show_directive(vec![var_ref("r")])];
    let parser = FixedParser::new(nodes);
    let rt = Runtime::new(&parser, &fs, &http, &subprocess, &registry, &engine, &engine, &clock, &random);

    let output = rt.process("unused", RuntimeOptions::default()).expect("first mode runs").output;
    assert_eq!(output.trim(), "caught-all");
}

/// `Any` mode also stops at the first match — matching `First`'s short-circuit.
#[test]
fn any_mode_stops_at_first_match() {
    let fs = FakeFileSystem::new();
    let http = FakeHttpFetcher::default();
    let subprocess = ScriptedSubprocess::succeeding("");
    let registry = NoRegistry;
    let engine = FakeCodeEngine::returning(Value::Null);
    let clock = FixedClock(0);
    let random = ThreadRandom;

    let arms = vec![arm(None, string_literal("one")), arm(None, string_literal("two"))];
    let nodes = vec![var_directive("r", vec![when_directive(WhenMode::Any, arms)]), show_directive(vec![var_ref("r")])];
    let parser = FixedParser::new(nodes);
    let rt = Runtime::new(&parser, &fs, &http, &subprocess, &registry, &engine, &engine, &clock, &random);

    let output = rt.process("unused", RuntimeOptions::default()).expect("any mode runs").output;
    assert_eq!(output.trim(), "one");
}

/// `All` mode evaluates every matching arm and collects their results into an array,
/// rendered as its JSON form by `/show` (matching the array-interpolation behavior
/// already confirmed for `/for` in `scenarios_s1_s6.rs::s4_for_loop_collects_array_results`).
#[test]
fn all_mode_collects_every_matching_arm() {
    let fs = FakeFileSystem::new();
    let http = FakeHttpFetcher::default();
    let subprocess = ScriptedSubprocess::succeeding("");
    let registry = NoRegistry;
    let engine = FakeCodeEngine::returning(Value::Null);
    let clock = FixedClock(0);
    let random = ThreadRandom;

    let arms = vec![arm(None, number_literal(1.0)), arm(None, number_literal(2.0)), arm(None, number_literal(3.0))];
    let nodes = vec![var_directive("r", vec![when_directive(WhenMode::All, arms)]), show_directive(vec![var_ref("r")])];
    let parser = FixedParser::new(nodes);
    let rt = Runtime::new(&parser, &fs, &http, &subprocess, &registry, &engine, &engine, &clock, &random);

    let output = rt.process("unused", RuntimeOptions::default()).expect("all mode runs").output;
    assert_eq!(output.trim(), "[1,2,3]");
}

/// A `let`-bound arm extends the scope of every subsequent arm in the same block,
/// and the binding is hoisted out to the surrounding environment once the block
/// finishes (spec.md §4.3.1's cross-arm `let` visibility).
#[test]
fn let_binding_is_visible_to_later_arms_and_hoisted_outward() {
    let fs = FakeFileSystem::new();
    let http = FakeHttpFetcher::default();
    let subprocess = ScriptedSubprocess::succeeding("");
    let registry = NoRegistry;
    let engine = FakeCodeEngine::returning(Value::Null);
    let clock = FixedClock(0);
    let random = ThreadRandom;

    let binding_arm = WhenArm { condition: None, action: var_ref("greeting"), binding: Some(("greeting".to_string(), string_literal("hi"))) };
    let nodes = vec![
        var_directive("r", vec![when_directive(WhenMode::Simple, vec![binding_arm])]),
        show_directive(vec![var_ref("r"), support::text(" "), var_ref("greeting")]),
    ];
    let parser = FixedParser::new(nodes);
    let rt = Runtime::new(&parser, &fs, &http, &subprocess, &registry, &engine, &engine, &clock, &random);

    let output = rt.process("unused", RuntimeOptions::default()).expect("the binding hoists out of the when block").output;
    assert_eq!(output.trim(), "hi hi");
}
