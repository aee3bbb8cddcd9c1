//! `Environment` — lexical scoping for variables, exports, and shadow functions
//! (spec.md §3, §4.1).
//!
//! A parent-linked frame chain with lazy child creation, adapted to mlld's
//! directive-scoped block model: a child environment is created per `when` arm,
//! `for`/`loop` body, and `/exe` invocation, and merged back into its parent only for
//! the bindings the child's export manifest names.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{ExeBody, Node, Param};
use crate::error::RuntimeError;
use crate::structured_value::StructuredValue;

/// What a bound name represents (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum VariableKind {
    Text,
    Data,
    Object,
    Array,
    Path,
    Executable,
    Computed,
}

/// Where a variable's value came from, for diagnostics and `@ctx` introspection.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum VariableSource {
    Literal,
    Import { specifier: String },
    ForBinding,
    Parameter,
    Computed { expression: String },
}

/// A constructed `/exe` definition, stored as a variable of kind `executable`
/// (spec.md §3's `Executable`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Executable {
    pub params: Vec<Param>,
    pub body: ExeBody,
    pub description: Option<String>,
    /// The environment the `/exe` was defined in, captured at definition time so its
    /// body resolves free variables lexically instead of against whatever scope
    /// happens to be calling it. Not serialized — a restored snapshot re-binds each
    /// executable's closure to the restored root environment on first call after load.
    #[serde(skip)]
    pub closure_env: Option<Environment>,
}

impl Executable {
    #[must_use]
    pub fn new(params: Vec<Param>, body: ExeBody, description: Option<String>) -> Self {
        Self { params, body, description, closure_env: None }
    }

    #[must_use]
    pub fn with_closure(mut self, env: Environment) -> Self {
        self.closure_env = Some(env);
        self
    }
}

/// One bound name in an environment (spec.md §3's `Variable`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Variable {
    pub name: String,
    pub kind: VariableKind,
    pub value: StructuredValue,
    pub source: VariableSource,
    pub executable: Option<Executable>,
}

impl Variable {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: VariableKind, value: StructuredValue, source: VariableSource) -> Self {
        Self { name: name.into(), kind, value, source, executable: None }
    }

    #[must_use]
    pub fn executable(name: impl Into<String>, value: StructuredValue, executable: Executable) -> Self {
        Self {
            name: name.into(),
            kind: VariableKind::Executable,
            value,
            source: VariableSource::Literal,
            executable: Some(executable),
        }
    }
}

/// What a child environment's bindings are exported to its parent on merge
/// (spec.md §4.1 `setExportManifest`).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub enum ExportManifest {
    /// No `/export` directive has run yet in this scope: nothing is hoisted on merge
    /// unless the caller explicitly opts in (block bodies used for their side effects,
    /// e.g. `when` actions, always hoist their assignments regardless of this default —
    /// see [`Environment::merge_assignments`]).
    #[default]
    None,
    Wildcard,
    Named(Vec<String>),
}

type ShadowFn = Rc<Executable>;

struct EnvInner {
    parent: Option<Environment>,
    vars: RefCell<IndexMap<String, Variable>>,
    export_manifest: RefCell<ExportManifest>,
    shadow_envs: RefCell<HashMap<String, HashMap<String, ShadowFn>>>,
    emitted_nodes: RefCell<Vec<Node>>,
    current_file_path: Option<String>,
    project_root: Option<String>,
}

/// A lexical scope. Cheap to clone (an `Rc` handle); `child()` creates a new frame
/// linked to this one as parent.
#[derive(Clone)]
pub struct Environment(Rc<EnvInner>);

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("vars", &self.0.vars.borrow().keys().collect::<Vec<_>>())
            .field("has_parent", &self.0.parent.is_some())
            .finish()
    }
}

impl Environment {
    #[must_use]
    pub fn root(current_file_path: Option<String>, project_root: Option<String>) -> Self {
        Self(Rc::new(EnvInner {
            parent: None,
            vars: RefCell::new(IndexMap::new()),
            export_manifest: RefCell::new(ExportManifest::default()),
            shadow_envs: RefCell::new(HashMap::new()),
            emitted_nodes: RefCell::new(Vec::new()),
            current_file_path,
            project_root,
        }))
    }

    /// `child() -> Env` (spec.md §4.1): a lazily-populated frame whose reads fall
    /// through to `self` when a name is not locally bound.
    #[must_use]
    pub fn child(&self) -> Self {
        Self(Rc::new(EnvInner {
            parent: Some(self.clone()),
            vars: RefCell::new(IndexMap::new()),
            export_manifest: RefCell::new(ExportManifest::default()),
            shadow_envs: RefCell::new(HashMap::new()),
            emitted_nodes: RefCell::new(Vec::new()),
            current_file_path: self.0.current_file_path.clone(),
            project_root: self.0.project_root.clone(),
        }))
    }

    /// `get(name) -> Variable?` (spec.md §4.1): walks the parent chain, first match wins.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Variable> {
        if let Some(var) = self.0.vars.borrow().get(name) {
            return Some(var.clone());
        }
        self.0.parent.as_ref().and_then(|parent| parent.get(name))
    }

    /// `set(name, variable)` (spec.md §4.1): fails with `VariableRedefinition` if `name`
    /// is already bound *in this scope*. Shadowing an outer scope's binding is allowed.
    pub fn set(&self, variable: Variable) -> Result<(), RuntimeError> {
        let mut vars = self.0.vars.borrow_mut();
        if vars.contains_key(&variable.name) {
            return Err(RuntimeError::variable_redefinition(variable.name));
        }
        vars.insert(variable.name.clone(), variable);
        Ok(())
    }

    /// Like [`Environment::set`] but overwrites any existing binding in this scope.
    /// Used internally for reserved-name synthesis and for-loop binding reassignment
    /// across iterations, where shadowing within the same logical binding is expected
    /// rather than a user redefinition error.
    pub fn set_overwrite(&self, variable: Variable) {
        self.0.vars.borrow_mut().insert(variable.name.clone(), variable);
    }

    /// `setExportManifest(entries | null)` (spec.md §4.1). `None` means wildcard.
    pub fn set_export_manifest(&self, names: Option<Vec<String>>) {
        let manifest = match names {
            None => ExportManifest::Wildcard,
            Some(names) => ExportManifest::Named(names),
        };
        *self.0.export_manifest.borrow_mut() = manifest;
    }

    /// `merge(child)` (spec.md §4.1): hoists only the child's exported identifiers (or
    /// all, under a wildcard manifest) into `self`. Emitted nodes always hoist.
    pub fn merge(&self, child: &Environment) {
        let manifest = child.0.export_manifest.borrow();
        let child_vars = child.0.vars.borrow();
        for (name, variable) in child_vars.iter() {
            let should_export = match &*manifest {
                ExportManifest::None => false,
                ExportManifest::Wildcard => true,
                ExportManifest::Named(names) => names.contains(name),
            };
            if should_export {
                self.0.vars.borrow_mut().insert(name.clone(), variable.clone());
            }
        }
        self.0.emitted_nodes.borrow_mut().extend(child.0.emitted_nodes.borrow().iter().cloned());
    }

    /// Hoists every binding a child block produced, regardless of export manifest —
    /// used for `when`/`for`/`loop` bodies, whose local assignments are ordinary block
    /// scoping rather than module exports.
    pub fn merge_assignments(&self, child: &Environment) {
        for (name, variable) in child.0.vars.borrow().iter() {
            self.0.vars.borrow_mut().insert(name.clone(), variable.clone());
        }
        self.0.emitted_nodes.borrow_mut().extend(child.0.emitted_nodes.borrow().iter().cloned());
    }

    pub fn emit_node(&self, node: Node) {
        self.0.emitted_nodes.borrow_mut().push(node);
    }

    #[must_use]
    pub fn take_emitted_nodes(&self) -> Vec<Node> {
        std::mem::take(&mut self.0.emitted_nodes.borrow_mut())
    }

    pub fn register_shadow_fn(&self, lang: impl Into<String>, name: impl Into<String>, executable: Executable) {
        self.0
            .shadow_envs
            .borrow_mut()
            .entry(lang.into())
            .or_default()
            .insert(name.into(), Rc::new(executable));
    }

    #[must_use]
    pub fn shadow_fns_for(&self, lang: &str) -> HashMap<String, Rc<Executable>> {
        let mut merged = self.0.parent.as_ref().map(|p| p.shadow_fns_for(lang)).unwrap_or_default();
        if let Some(local) = self.0.shadow_envs.borrow().get(lang) {
            merged.extend(local.iter().map(|(k, v)| (k.clone(), Rc::clone(v))));
        }
        merged
    }

    /// Returns this environment's own exported variables, per its export manifest
    /// (spec.md §4.8 step 7: the set a `/import` clause filters against).
    #[must_use]
    pub fn exported_vars(&self) -> Vec<Variable> {
        let manifest = self.0.export_manifest.borrow();
        self.0
            .vars
            .borrow()
            .values()
            .filter(|v| match &*manifest {
                ExportManifest::None => false,
                ExportManifest::Wildcard => true,
                ExportManifest::Named(names) => names.contains(&v.name),
            })
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn current_file_path(&self) -> Option<&str> {
        self.0.current_file_path.as_deref()
    }

    #[must_use]
    pub fn project_root(&self) -> Option<&str> {
        self.0.project_root.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::{Environment, Variable, VariableKind, VariableSource};
    use crate::structured_value::StructuredValue;

    fn var(name: &str) -> Variable {
        Variable::new(name, VariableKind::Text, StructuredValue::text("v"), VariableSource::Literal)
    }

    #[test]
    fn get_walks_parent_chain() {
        let root = Environment::root(None, None);
        root.set(var("x")).unwrap();
        let child = root.child();
        assert!(child.get("x").is_some());
    }

    #[test]
    fn set_rejects_redefinition_in_same_scope() {
        let root = Environment::root(None, None);
        root.set(var("x")).unwrap();
        assert!(root.set(var("x")).is_err());
    }

    #[test]
    fn shadowing_across_scopes_is_allowed() {
        let root = Environment::root(None, None);
        root.set(var("x")).unwrap();
        let child = root.child();
        assert!(child.set(var("x")).is_ok());
    }

    #[test]
    fn merge_only_hoists_exported_names() {
        let root = Environment::root(None, None);
        let child = root.child();
        child.set(var("exported")).unwrap();
        child.set(var("hidden")).unwrap();
        child.set_export_manifest(Some(vec!["exported".to_string()]));
        root.merge(&child);
        assert!(root.get("exported").is_some());
        assert!(root.get("hidden").is_none());
    }

    #[test]
    fn exported_vars_respects_named_manifest() {
        let module = Environment::root(None, None);
        module.set(var("a")).unwrap();
        module.set(var("b")).unwrap();
        module.set_export_manifest(Some(vec!["a".to_string()]));
        let exported: Vec<_> = module.exported_vars().into_iter().map(|v| v.name).collect();
        assert_eq!(exported, vec!["a".to_string()]);
    }

    #[test]
    fn wildcard_manifest_hoists_everything() {
        let root = Environment::root(None, None);
        let child = root.child();
        child.set(var("a")).unwrap();
        child.set_export_manifest(None);
        root.merge(&child);
        assert!(root.get("a").is_some());
    }
}
