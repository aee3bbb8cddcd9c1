//! End-to-end scenarios driving `Runtime` with hand-built AST (spec.md §8 S1-S6).
//!
//! Each test stands in for one of the walkthroughs a real parser would otherwise
//! produce from mlld source text; since this crate has no parser of its own, a
//! `FixedParser` returns the node sequence directly regardless of what `process` is
//! asked to "parse".

mod support;

use indexmap::IndexMap;
use mlld_core::ast::BinaryOperator;
use mlld_core::error::ErrorKind;
use mlld_core::host::{FixedClock, ThreadRandom};
use mlld_core::runtime::{Runtime, RuntimeOptions};
use mlld_core::value::Value;

use support::{
    array_literal, binary_op, call, guard_directive, import_named, import_wildcard, labeled_var_directive, number_literal, run_directive, show_directive, string_literal, text, var_directive,
    var_ref, when_arm, FakeCodeEngine, FakeFileSystem, FakeHttpFetcher, FixedParser, NoRegistry, ScriptedSubprocess,
};

/// S1: a `/var` template is interpolated and shown.
#[test]
fn s1_variable_and_template_interpolation() {
    let fs = FakeFileSystem::new();
    let http = FakeHttpFetcher::default();
    let subprocess = ScriptedSubprocess::succeeding("");
    let registry = NoRegistry;
    let engine = FakeCodeEngine::returning(Value::Null);
    let clock = FixedClock(0);
    let random = ThreadRandom;

    let nodes = vec![
        var_directive("name", vec![string_literal("Alice")]),
        show_directive(vec![text("Hello "), var_ref("name"), text("!")]),
    ];
    let parser = FixedParser::new(nodes);
    let rt = Runtime::new(&parser, &fs, &http, &subprocess, &registry, &engine, &engine, &clock, &random);

    let output = rt.process("unused", RuntimeOptions::default()).expect("s1 should run").output;
    assert_eq!(output.trim(), "Hello Alice!");
}

/// S4: `/var @r = for @n in [1, 2, 3] => @n * 2` collects results into an array, shown
/// as its JSON form.
#[test]
fn s4_for_loop_collects_array_results() {
    let fs = FakeFileSystem::new();
    let http = FakeHttpFetcher::default();
    let subprocess = ScriptedSubprocess::succeeding("");
    let registry = NoRegistry;
    let engine = FakeCodeEngine::returning(Value::Null);
    let clock = FixedClock(0);
    let random = ThreadRandom;

    let doubled = binary_op(BinaryOperator::Mul, var_ref("n"), number_literal(2.0));
    let for_loop = support::for_directive("n", array_literal(vec![number_literal(1.0), number_literal(2.0), number_literal(3.0)]), doubled, false);
    let nodes = vec![var_directive("r", vec![for_loop]), show_directive(vec![var_ref("r")])];
    let parser = FixedParser::new(nodes);
    let rt = Runtime::new(&parser, &fs, &http, &subprocess, &registry, &engine, &engine, &clock, &random);

    let output = rt.process("unused", RuntimeOptions::default()).expect("s4 should run").output;
    assert_eq!(output.trim(), "[2,4,6]");
}

/// S5: a wildcard import pulls an exported variable in from a host-seeded dynamic
/// module, and a named import of a name the module never exposed fails with
/// `Import '<name>' not found`.
#[test]
fn s5_wildcard_import_pulls_seeded_module_variable() {
    let fs = FakeFileSystem::new();
    let http = FakeHttpFetcher::default();
    let subprocess = ScriptedSubprocess::succeeding("");
    let registry = NoRegistry;
    let engine = FakeCodeEngine::returning(Value::Null);
    let clock = FixedClock(0);
    let random = ThreadRandom;

    let mut module = IndexMap::new();
    module.insert("a".to_string(), Value::String("from module".to_string()));

    let nodes = vec![import_wildcard("./util.mld", None), show_directive(vec![var_ref("a")])];
    let parser = FixedParser::new(nodes);
    let rt = Runtime::new(&parser, &fs, &http, &subprocess, &registry, &engine, &engine, &clock, &random);

    let mut options = RuntimeOptions::default();
    options.dynamic_modules.insert("./util.mld".to_string(), Value::Object(module));
    let output = rt.process("unused", options).expect("wildcard import of a seeded module succeeds").output;
    assert_eq!(output.trim(), "from module");
}

#[test]
fn s5_named_import_of_unexported_name_fails() {
    let fs = FakeFileSystem::new();
    let http = FakeHttpFetcher::default();
    let subprocess = ScriptedSubprocess::succeeding("");
    let registry = NoRegistry;
    let engine = FakeCodeEngine::returning(Value::Null);
    let clock = FixedClock(0);
    let random = ThreadRandom;

    let mut module = IndexMap::new();
    module.insert("a".to_string(), Value::String("from module".to_string()));

    let nodes = vec![import_named(&["b"], "./util.mld")];
    let parser = FixedParser::new(nodes);
    let rt = Runtime::new(&parser, &fs, &http, &subprocess, &registry, &engine, &engine, &clock, &random);

    let mut options = RuntimeOptions::default();
    options.dynamic_modules.insert("./util.mld".to_string(), Value::Object(module));
    let err = rt.process("unused", options).expect_err("'b' was never exported");
    assert_eq!(err.kind, ErrorKind::ImportResolutionError);
    assert_eq!(err.message, "Import 'b' not found");
}

/// S6: a `/guard` rule scoped to a label transforms a secret value before `/show`
/// renders it (spec.md §4.7 transform composition).
#[test]
fn s6_guard_transforms_labeled_value_before_show() {
    let fs = FakeFileSystem::new();
    let http = FakeHttpFetcher::default();
    let subprocess = ScriptedSubprocess::succeeding("");
    let registry = NoRegistry;
    let engine = FakeCodeEngine::returning(Value::Null);
    let clock = FixedClock(0);
    let random = ThreadRandom;

    let mask_action = call("allow", vec![string_literal("sk-1****")]);
    let guard = guard_directive("mask-secrets", "secret", "before", vec![when_arm(None, mask_action)]);
    let nodes = vec![
        guard,
        labeled_var_directive("key", vec![string_literal("sk-1-abcdefgh")], "secret"),
        show_directive(vec![var_ref("key")]),
    ];
    let parser = FixedParser::new(nodes);
    let rt = Runtime::new(&parser, &fs, &http, &subprocess, &registry, &engine, &engine, &clock, &random);

    let output = rt.process("unused", RuntimeOptions::default()).expect("s6 should run").output;
    assert_eq!(output.trim(), "sk-1****");
}

/// Adapted from S2: the literal walkthrough registers a guard on a label scope and
/// expects it to run before `/run` — but `eval_run`'s before-hook only ever consults
/// `Scope::Op(OpFamily::Run)` (see DESIGN.md), never a value's label scopes, since the
/// value passed to that hook is always empty with no labels to match against. This
/// demonstrates the behavior that actually exists: an operation-family guard denies
/// every `/run`, label or no label.
#[test]
fn guard_denies_run_via_op_scope() {
    let fs = FakeFileSystem::new();
    let http = FakeHttpFetcher::default();
    let subprocess = ScriptedSubprocess::succeeding("should never run");
    let registry = NoRegistry;
    let engine = FakeCodeEngine::returning(Value::Null);
    let clock = FixedClock(0);
    let random = ThreadRandom;

    let guard = guard_directive("no-shell", "op:run", "before", vec![when_arm(None, call("deny", vec![string_literal("shell disabled")]))]);
    let nodes = vec![guard, run_directive("sh", "echo hi")];
    let parser = FixedParser::new(nodes);
    let rt = Runtime::new(&parser, &fs, &http, &subprocess, &registry, &engine, &engine, &clock, &random);

    let err = rt.process("unused", RuntimeOptions::default()).expect_err("the before-guard denies the run");
    assert_eq!(err.kind, ErrorKind::GuardDenial);
    assert_eq!(subprocess.call_count(), 0);
}
