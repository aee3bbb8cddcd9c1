//! Resolver / Importer (spec.md §4.8, C8).
//!
//! Resolves `/import` specifiers into module source, verifies integrity, caches
//! content-addressed results, and materializes selected exports into the importing
//! environment. Module interpretation itself (parsing + evaluating the resolved source)
//! is injected via [`ModuleInterpreter`] to keep this module free of a dependency on
//! `evaluator`, matching the narrow-capability-interface pattern used by
//! [`crate::guard`] and [`crate::pipeline`].
//!
//! Uses a content-addressed caching idiom (hash-keyed lookup before falling back to a
//! slow path), generalized from bytecode caching to module source caching, with a
//! permission-check style for `needs` enforcement.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use sha2::{Digest, Sha256};

use crate::capability::{Capability, CapabilitySet, Needs};
use crate::env::Environment;
use crate::error::RuntimeError;
use crate::host::{FileSystem, HttpFetcher, RegistryClient};

/// Converts a module's declared `needs` into the `Capability` values a granted set's
/// `subset` is filtered against, for `approveAllImports: false` narrowing (spec.md §6).
fn needs_as_capabilities(needs: &Needs) -> Vec<Capability> {
    let mut caps = Vec::new();
    caps.extend(needs.runtimes.iter().cloned().map(Capability::Runtime));
    caps.extend(needs.tools.iter().cloned().map(Capability::Tool));
    caps.extend(needs.packages.iter().cloned().map(Capability::Package));
    caps.extend(needs.capabilities.iter().cloned().map(Capability::Custom));
    caps
}

/// How a `/import` specifier was classified (spec.md §4.8 step 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecifierKind {
    RelativeFile(String),
    AbsoluteFile(String),
    Url(String),
    Registry { author: String, module: String, version: Option<String> },
}

/// Caching/freshness modifier on an import specifier (spec.md §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportModifier {
    #[default]
    Module,
    Static,
    Live,
    Cached { ttl_secs: u64 },
}

/// `classify_specifier` (spec.md §4.8 step 1).
#[must_use]
pub fn classify_specifier(specifier: &str) -> SpecifierKind {
    if let Some(rest) = specifier.strip_prefix('@') {
        let (author, rest) = rest.split_once('/').unwrap_or((rest, ""));
        let (module, version) = match rest.split_once('@') {
            Some((m, v)) => (m, Some(v.to_string())),
            None => (rest, None),
        };
        return SpecifierKind::Registry {
            author: author.to_string(),
            module: module.to_string(),
            version,
        };
    }
    if specifier.starts_with("http://") || specifier.starts_with("https://") {
        return SpecifierKind::Url(specifier.to_string());
    }
    if specifier.starts_with('/') {
        return SpecifierKind::AbsoluteFile(specifier.to_string());
    }
    SpecifierKind::RelativeFile(specifier.to_string())
}

/// `/import { @a, @b }` vs `/import * as @ns` (spec.md §4.8 step 6).
#[derive(Debug, Clone)]
pub enum ImportClause {
    Named(Vec<String>),
    Wildcard { alias: Option<String> },
}

/// Injected capability: interprets already-resolved module source into a fresh child
/// environment. Implemented by the evaluator (C3).
pub trait ModuleInterpreter {
    fn interpret_module(&mut self, source: &str, specifier: &str) -> Result<Environment, RuntimeError>;

    /// Installs `capabilities` as the set in effect for the module body about to be
    /// interpreted, returning whatever was in effect before (for the caller to restore
    /// once interpretation finishes). Used to narrow a transitively-imported module to
    /// its own declared `needs` under `approveAllImports: false` (spec.md §6).
    fn swap_capabilities(&mut self, capabilities: CapabilitySet) -> CapabilitySet;
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Clone)]
struct CacheEntry {
    content: String,
    integrity: String,
    env: Environment,
}

/// Resolves and caches `/import` specifiers for the lifetime of a single run.
///
/// The cache is keyed by specifier; deduplication (spec.md §4.8 "Deduplication")
/// returns the same cached `Environment` for repeated imports of the same specifier
/// within a run. Circular imports are detected via an in-flight set and short-circuit
/// to a snapshot of the partially-populated environment (spec.md §4.8).
pub struct Resolver<'a> {
    filesystem: &'a dyn FileSystem,
    http: &'a dyn HttpFetcher,
    registry: &'a dyn RegistryClient,
    cache: RefCell<HashMap<String, CacheEntry>>,
    in_flight: RefCell<HashSet<String>>,
}

impl<'a> Resolver<'a> {
    #[must_use]
    pub fn new(filesystem: &'a dyn FileSystem, http: &'a dyn HttpFetcher, registry: &'a dyn RegistryClient) -> Self {
        Self {
            filesystem,
            http,
            registry,
            cache: RefCell::new(HashMap::new()),
            in_flight: RefCell::new(HashSet::new()),
        }
    }

    /// Runs the full import protocol (spec.md §4.8 steps 1-7) for one `/import` site.
    #[allow(clippy::too_many_arguments)]
    pub fn import(
        &self,
        specifier: &str,
        clause: &ImportClause,
        granted: &CapabilitySet,
        approve_all: bool,
        interpreter: &mut dyn ModuleInterpreter,
        importer: &Environment,
    ) -> Result<(), RuntimeError> {
        let module_env = self.resolve_and_interpret(specifier, granted, approve_all, interpreter)?;
        self.apply_clause(&module_env, clause, specifier, importer)?;
        Ok(())
    }

    /// Steps 1-5: classify, fetch, hash/cache, interpret, and enforce `needs` against
    /// the importer's own granted capabilities (spec.md §4.8 step 4). When `approve_all`
    /// is `false`, the module body is interpreted under a capability set narrowed to
    /// exactly its own declared `needs`, so a transitively-imported module can't exercise
    /// capabilities the importer holds but the module never asked for (spec.md §6
    /// `approveAllImports`).
    fn resolve_and_interpret(&self, specifier: &str, granted: &CapabilitySet, approve_all: bool, interpreter: &mut dyn ModuleInterpreter) -> Result<Environment, RuntimeError> {
        if let Some(entry) = self.cache.borrow().get(specifier) {
            return Ok(entry.env.clone());
        }
        if self.in_flight.borrow().contains(specifier) {
            // Circular import: `interpret_module` below runs a module body to
            // completion or error in one call, so there is no partially-populated
            // environment to hand back mid-interpretation — the importer sees an
            // empty environment instead of whatever exports the in-flight module has
            // bound so far (see DESIGN.md's resolver entry).
            return Ok(Environment::root(None, None));
        }
        self.in_flight.borrow_mut().insert(specifier.to_string());

        let (content, integrity, needs) = self.fetch(specifier)?;
        let mut effective = granted.clone();
        if let Some(needs) = &needs {
            if let Some(reason) = needs.unsatisfied(granted) {
                self.in_flight.borrow_mut().remove(specifier);
                return Err(RuntimeError::needs_unsatisfied(format!("'{specifier}' {reason}")));
            }
            if !approve_all {
                effective = granted.subset(&needs_as_capabilities(needs));
            }
        }

        let previous = interpreter.swap_capabilities(effective);
        let result = interpreter.interpret_module(&content, specifier);
        interpreter.swap_capabilities(previous);
        self.in_flight.borrow_mut().remove(specifier);
        let env = result?;

        self.cache.borrow_mut().insert(
            specifier.to_string(),
            CacheEntry { content, integrity, env: env.clone() },
        );
        Ok(env)
    }

    /// Pre-populates the cache with a module environment built from host-supplied
    /// content rather than a fetched specifier (spec.md §6 `dynamicModules`).
    pub fn seed_dynamic_module(&self, specifier: impl Into<String>, env: Environment) {
        self.cache.borrow_mut().insert(
            specifier.into(),
            CacheEntry { content: String::new(), integrity: String::new(), env },
        );
    }

    fn fetch(&self, specifier: &str) -> Result<(String, String, Option<Needs>), RuntimeError> {
        match classify_specifier(specifier) {
            SpecifierKind::RelativeFile(path) | SpecifierKind::AbsoluteFile(path) => {
                let content = self.filesystem.read_file(&path)?;
                let integrity = content_hash(&content);
                Ok((content, integrity, None))
            }
            SpecifierKind::Url(url) => {
                let response = self.http.fetch(&url, &[])?;
                let integrity = content_hash(&response.content);
                Ok((response.content, integrity, None))
            }
            SpecifierKind::Registry { author, module, version } => {
                let spec = match version {
                    Some(v) => format!("@{author}/{module}@{v}"),
                    None => format!("@{author}/{module}"),
                };
                let resolved = self.registry.resolve(&spec)?;
                let computed = content_hash(&resolved.content);
                if resolved.integrity != computed {
                    return Err(RuntimeError::integrity(format!(
                        "integrity mismatch for '{spec}': expected {}, computed {computed}",
                        resolved.integrity
                    )));
                }
                Ok((resolved.content, resolved.integrity, Some(resolved.needs)))
            }
        }
    }

    /// Step 6-7: filters by the import clause and copies selected variables into the
    /// importer's environment, preserving `.mx` and descriptors.
    fn apply_clause(&self, module_env: &Environment, clause: &ImportClause, specifier: &str, importer: &Environment) -> Result<(), RuntimeError> {
        match clause {
            ImportClause::Named(names) => {
                let exported = module_env.exported_vars();
                for name in names {
                    let variable = exported
                        .iter()
                        .find(|v| &v.name == name)
                        .cloned()
                        .ok_or_else(|| RuntimeError::import_resolution(format!("Import '{name}' not found")))?;
                    importer.set(variable)?;
                }
            }
            ImportClause::Wildcard { alias } => {
                let exported = module_env.exported_vars();
                match alias {
                    None => {
                        for variable in exported {
                            importer.set(variable)?;
                        }
                    }
                    Some(namespace) => {
                        // A namespace import binds one variable whose `.data` is an
                        // object of the module's exports (spec.md §4.8 step 7).
                        let mut fields = indexmap::IndexMap::new();
                        let mut mx = crate::structured_value::Mx::new();
                        for variable in &exported {
                            fields.insert(variable.name.clone(), variable.value.as_data().clone());
                            mx.merge_from(&variable.value.mx);
                        }
                        mx.push_source(format!("import:{specifier}"));
                        let value = crate::structured_value::StructuredValue::from_value(crate::value::Value::Object(fields), mx);
                        importer.set(crate::env::Variable::new(
                            namespace.clone(),
                            crate::env::VariableKind::Object,
                            value,
                            crate::env::VariableSource::Import { specifier: specifier.to_string() },
                        ))?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{classify_specifier, SpecifierKind};

    #[test]
    fn classifies_relative_path() {
        assert_eq!(classify_specifier("./util.mld"), SpecifierKind::RelativeFile("./util.mld".to_string()));
    }

    #[test]
    fn classifies_registry_module_with_version() {
        match classify_specifier("@author/mod@1.2.3") {
            SpecifierKind::Registry { author, module, version } => {
                assert_eq!(author, "author");
                assert_eq!(module, "mod");
                assert_eq!(version.as_deref(), Some("1.2.3"));
            }
            other => panic!("unexpected classification: {other:?}"),
        }
    }

    #[test]
    fn classifies_url() {
        assert!(matches!(classify_specifier("https://example.com/m.mld"), SpecifierKind::Url(_)));
    }
}
