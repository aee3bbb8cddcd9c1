//! Guard / Taint Enforcer (spec.md §4.7, C7).
//!
//! Guards are first-class rules registered via `/guard @name for <scope> = when [ … ]`.
//! This module owns registration, scope lookup, and outcome composition; it deliberately
//! does *not* know how to evaluate a `when` condition or action against an `Environment`
//! — that requires the full expression evaluator, which in turn calls into this module
//! to run guards at hook points. To avoid a circular dependency between `guard` and
//! `evaluator`, the condition/action evaluation is injected through the
//! [`GuardActionEvaluator`] trait (spec.md §9 design note: "resolve via narrow
//! capability interfaces passed as constructor arguments").

use std::collections::HashMap;

use crate::ast::WhenArm;
use crate::error::RuntimeError;
use crate::structured_value::StructuredValue;
use crate::tracer::{EvalTracer, GuardOutcomeKind};

/// The class of operation a guard scope can target (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum OpFamily {
    Run,
    Show,
    Output,
    Exe,
}

/// What a guard rule is registered against: a label name or an operation family.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Label(String),
    Op(OpFamily),
}

impl Scope {
    #[must_use]
    pub fn label(name: impl Into<String>) -> Self {
        Self::Label(name.into())
    }

    #[must_use]
    pub fn as_key(&self) -> String {
        match self {
            Self::Label(name) => name.clone(),
            Self::Op(family) => format!("op:{family}"),
        }
    }
}

/// Describes the operation currently being guarded, exposed to guard conditions as
/// `@mx.op` (spec.md §4.7).
#[derive(Debug, Clone)]
pub struct OpDescriptor {
    pub op_type: OpFamily,
    pub name: String,
    pub target: Option<String>,
}

/// The result of evaluating one guard rule against a value (spec.md §4.7).
#[derive(Debug, Clone)]
pub enum GuardOutcome {
    /// Pass the value through unchanged.
    Allow,
    /// Replace the value with a new one (labels are NOT shed: the caller must union the
    /// original value's labels into the replacement — see spec.md §4.7 "transform
    /// composition").
    AllowTransformed(StructuredValue),
    /// Block the operation with a reason; a surrounding `when` may observe `denied`.
    Deny(String),
    /// Trigger pipeline retry semantics with a hint.
    Retry(String),
}

impl GuardOutcome {
    #[must_use]
    fn kind(&self) -> GuardOutcomeKind {
        match self {
            Self::Allow => GuardOutcomeKind::Allow,
            Self::AllowTransformed(_) => GuardOutcomeKind::AllowTransformed,
            Self::Deny(_) => GuardOutcomeKind::Deny,
            Self::Retry(_) => GuardOutcomeKind::Retry,
        }
    }
}

/// A registered guard rule: a named `when` block evaluated at a hook point.
#[derive(Debug, Clone)]
pub struct GuardRule {
    pub name: String,
    pub arms: Vec<WhenArm>,
}

/// Whether a rule fires before or after the guarded operation (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardTiming {
    Before,
    After,
}

/// Injected capability: evaluates a guard condition/action against the current
/// environment. Implemented by the evaluator (C3); kept as a trait here so this module
/// has no dependency on `evaluator`.
pub trait GuardActionEvaluator {
    /// Evaluates a `when` arm's condition as a boolean, with `@input` and `@mx.op` bound
    /// in scope. Returns `Ok(true)` for the wildcard `*` condition.
    fn eval_condition(&mut self, condition: &crate::ast::Node, input: &StructuredValue, op: &OpDescriptor) -> Result<bool, RuntimeError>;

    /// Evaluates a matched arm's action, producing the guard outcome it names
    /// (`allow`, `allow <expr>`, `deny <expr>`, `retry <expr>`).
    fn eval_action(&mut self, action: &crate::ast::Node, input: &StructuredValue, op: &OpDescriptor) -> Result<GuardOutcome, RuntimeError>;
}

/// Guard rules registered on a scope, keyed separately for before/after timing, in
/// registration order (spec.md §4.7: "guards registered on the same scope fire in
/// registration order").
#[derive(Debug, Default, Clone)]
pub struct GuardRegistry {
    before: HashMap<String, Vec<GuardRule>>,
    after: HashMap<String, Vec<GuardRule>>,
}

impl GuardRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, timing: GuardTiming, scope: &Scope, rule: GuardRule) {
        let table = match timing {
            GuardTiming::Before => &mut self.before,
            GuardTiming::After => &mut self.after,
        };
        table.entry(scope.as_key()).or_default().push(rule);
    }

    #[must_use]
    pub fn rules_for(&self, timing: GuardTiming, scope: &Scope) -> &[GuardRule] {
        let table = match timing {
            GuardTiming::Before => &self.before,
            GuardTiming::After => &self.after,
        };
        table.get(&scope.as_key()).map_or(&[], Vec::as_slice)
    }

    /// Runs every rule registered on `scope` (and, for label scopes, on every label the
    /// value actually carries) in registration order, short-circuiting on the first
    /// `Deny`/`Retry` outcome. `AllowTransformed` replaces `input` for the remainder of
    /// the chain so that later guards see the transformed value — and so a deny guard
    /// after a transform still denies (spec.md §4.7 "transform composition").
    pub fn run(
        &self,
        timing: GuardTiming,
        scopes: &[Scope],
        mut input: StructuredValue,
        op: &OpDescriptor,
        evaluator: &mut dyn GuardActionEvaluator,
        tracer: &mut dyn EvalTracer,
    ) -> Result<GuardOutcome, RuntimeError> {
        for scope in scopes {
            for rule in self.rules_for(timing, scope) {
                for arm in &rule.arms {
                    let matched = match &arm.condition {
                        Some(cond) => evaluator.eval_condition(cond, &input, op)?,
                        None => true,
                    };
                    if !matched {
                        continue;
                    }
                    let outcome = evaluator.eval_action(&arm.action, &input, op)?;
                    let reason = match &outcome {
                        GuardOutcome::Deny(r) | GuardOutcome::Retry(r) => Some(r.as_str()),
                        _ => None,
                    };
                    tracer.on_guard(&rule.name, &scope.as_key(), outcome.kind(), reason);
                    match outcome {
                        GuardOutcome::Allow => break,
                        GuardOutcome::AllowTransformed(replacement) => {
                            let mut replacement = replacement;
                            replacement.mx.merge_from(&input.mx);
                            input = replacement;
                            break;
                        }
                        deny_or_retry => return Ok(deny_or_retry),
                    }
                }
            }
        }
        Ok(GuardOutcome::AllowTransformed(input))
    }
}

#[cfg(test)]
mod tests {
    use super::{GuardActionEvaluator, GuardOutcome, GuardRegistry, GuardRule, GuardTiming, OpDescriptor, OpFamily, Scope};
    use crate::ast::{Location, Node};
    use crate::error::RuntimeError;
    use crate::structured_value::StructuredValue;
    use crate::tracer::NoopTracer;

    struct AlwaysDeny;
    impl GuardActionEvaluator for AlwaysDeny {
        fn eval_condition(&mut self, _c: &Node, _i: &StructuredValue, _o: &OpDescriptor) -> Result<bool, RuntimeError> {
            Ok(true)
        }
        fn eval_action(&mut self, _a: &Node, _i: &StructuredValue, _o: &OpDescriptor) -> Result<GuardOutcome, RuntimeError> {
            Ok(GuardOutcome::Deny("no secrets in shell".into()))
        }
    }

    fn wildcard_arm() -> crate::ast::WhenArm {
        crate::ast::WhenArm {
            condition: None,
            action: Node::Text { content: String::new(), location: Location::new(0, 0, 0) },
            binding: None,
        }
    }

    #[test]
    fn deny_short_circuits_registration_order() {
        let mut registry = GuardRegistry::new();
        registry.register(
            GuardTiming::Before,
            &Scope::label("secret"),
            GuardRule { name: "g1".into(), arms: vec![wildcard_arm()] },
        );
        let op = OpDescriptor { op_type: OpFamily::Run, name: "cmd".into(), target: None };
        let outcome = registry
            .run(
                GuardTiming::Before,
                &[Scope::label("secret")],
                StructuredValue::text("sk-123"),
                &op,
                &mut AlwaysDeny,
                &mut NoopTracer,
            )
            .unwrap();
        assert!(matches!(outcome, GuardOutcome::Deny(ref r) if r == "no secrets in shell"));
    }

    #[test]
    fn no_rules_registered_allows_through() {
        let registry = GuardRegistry::new();
        let op = OpDescriptor { op_type: OpFamily::Show, name: "show".into(), target: None };
        let outcome = registry
            .run(
                GuardTiming::Before,
                &[Scope::label("secret")],
                StructuredValue::text("hi"),
                &op,
                &mut AlwaysDeny,
                &mut NoopTracer,
            )
            .unwrap();
        assert!(matches!(outcome, GuardOutcome::AllowTransformed(_)));
    }
}
