//! Import/resolver behavior beyond the S5 walkthrough (spec.md §4.8, §6): `needs`
//! enforcement, `approveAllImports` capability narrowing, and circular-import handling.

mod support;

use mlld_core::capability::{Capability, CapabilitySet, Needs};
use mlld_core::env::Environment;
use mlld_core::error::{ErrorKind, RuntimeError};
use mlld_core::host::{RegistryClient, RegistryModule};
use mlld_core::resolver::{ImportClause, ModuleInterpreter, Resolver};
use sha2::{Digest, Sha256};

use support::{FakeFileSystem, FakeHttpFetcher};

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A `RegistryClient` serving one fixed module, for exercising the `needs` path that
/// only registry specifiers carry.
struct FixedRegistry {
    content: String,
    needs: Needs,
}

impl RegistryClient for FixedRegistry {
    fn resolve(&self, _specifier: &str) -> Result<RegistryModule, RuntimeError> {
        Ok(RegistryModule {
            content: self.content.clone(),
            integrity: content_hash(&self.content),
            needs: self.needs.clone(),
            dependencies: Vec::new(),
        })
    }
}

/// Records the capability set it was asked to interpret a module under, standing in
/// for the evaluator's own `ModuleInterpreter` impl without requiring a full
/// `Evaluator`.
struct RecordingInterpreter {
    seen_capabilities: Vec<CapabilitySet>,
    current: CapabilitySet,
}

impl RecordingInterpreter {
    fn new() -> Self {
        Self { seen_capabilities: Vec::new(), current: CapabilitySet::none() }
    }
}

impl ModuleInterpreter for RecordingInterpreter {
    fn interpret_module(&mut self, _source: &str, specifier: &str) -> Result<Environment, RuntimeError> {
        self.seen_capabilities.push(self.current.clone());
        let env = Environment::root(Some(specifier.to_string()), None);
        env.set_export_manifest(None);
        Ok(env)
    }

    fn swap_capabilities(&mut self, capabilities: CapabilitySet) -> CapabilitySet {
        std::mem::replace(&mut self.current, capabilities)
    }
}

#[test]
fn needs_unsatisfied_denies_the_import() {
    let fs = FakeFileSystem::new();
    let http = FakeHttpFetcher::default();
    let registry = FixedRegistry {
        content: "module body".to_string(),
        needs: Needs { tools: vec!["git".to_string()], ..Needs::default() },
    };
    let resolver = Resolver::new(&fs, &http, &registry);
    let mut interpreter = RecordingInterpreter::new();

    let err = resolver
        .import(
            "@author/mod",
            &ImportClause::Wildcard { alias: None },
            &CapabilitySet::none(),
            true,
            &mut interpreter,
            &Environment::root(None, None),
        )
        .expect_err("the importer never granted the 'git' tool");
    assert_eq!(err.kind, ErrorKind::NeedsUnsatisfied);
    assert!(interpreter.seen_capabilities.is_empty(), "interpretation never starts once needs fail");
}

#[test]
fn approve_all_imports_false_narrows_to_declared_needs() {
    let fs = FakeFileSystem::new();
    let http = FakeHttpFetcher::default();
    let registry = FixedRegistry {
        content: "module body".to_string(),
        needs: Needs { runtimes: vec!["js".to_string()], ..Needs::default() },
    };
    let resolver = Resolver::new(&fs, &http, &registry);
    let mut interpreter = RecordingInterpreter::new();
    let granted = CapabilitySet::unrestricted();

    resolver
        .import(
            "@author/mod",
            &ImportClause::Wildcard { alias: None },
            &granted,
            false,
            &mut interpreter,
            &Environment::root(None, None),
        )
        .expect("js is granted, so the declared need is satisfied");

    let seen = interpreter.seen_capabilities.first().expect("interpret_module ran exactly once");
    assert!(seen.allows_runtime("js"));
    assert!(!seen.allows_runtime("py"), "narrowed set drops capabilities the module never declared");
}

#[test]
fn approve_all_imports_true_skips_narrowing() {
    let fs = FakeFileSystem::new();
    let http = FakeHttpFetcher::default();
    let registry = FixedRegistry {
        content: "module body".to_string(),
        needs: Needs { runtimes: vec!["js".to_string()], ..Needs::default() },
    };
    let resolver = Resolver::new(&fs, &http, &registry);
    let mut interpreter = RecordingInterpreter::new();
    let granted = CapabilitySet::unrestricted();

    resolver
        .import(
            "@author/mod",
            &ImportClause::Wildcard { alias: None },
            &granted,
            true,
            &mut interpreter,
            &Environment::root(None, None),
        )
        .expect("approveAllImports bypasses narrowing");

    let seen = interpreter.seen_capabilities.first().expect("interpret_module ran exactly once");
    assert!(seen.allows_runtime("py"), "the full granted set passes through untouched");
}

#[test]
fn registry_integrity_mismatch_is_rejected() {
    struct TamperedRegistry;
    impl RegistryClient for TamperedRegistry {
        fn resolve(&self, _specifier: &str) -> Result<RegistryModule, RuntimeError> {
            Ok(RegistryModule {
                content: "module body".to_string(),
                integrity: "not-the-real-hash".to_string(),
                needs: Needs::default(),
                dependencies: Vec::new(),
            })
        }
    }
    let fs = FakeFileSystem::new();
    let http = FakeHttpFetcher::default();
    let registry = TamperedRegistry;
    let resolver = Resolver::new(&fs, &http, &registry);
    let mut interpreter = RecordingInterpreter::new();

    let err = resolver
        .import(
            "@author/mod",
            &ImportClause::Wildcard { alias: None },
            &CapabilitySet::unrestricted(),
            true,
            &mut interpreter,
            &Environment::root(None, None),
        )
        .expect_err("computed hash never matches the claimed integrity value");
    assert_eq!(err.kind, ErrorKind::IntegrityError);
}

#[test]
fn circular_import_resolves_to_an_empty_environment() {
    // `Resolver::resolve_and_interpret` marks a specifier in-flight before fetching;
    // an interpreter whose own `interpret_module` re-enters the same specifier
    // observes the in-flight short-circuit rather than recursing.
    struct SelfImportingInterpreter<'r> {
        resolver: &'r Resolver<'r>,
        reentered: std::cell::Cell<bool>,
    }
    impl<'r> ModuleInterpreter for SelfImportingInterpreter<'r> {
        fn interpret_module(&mut self, _source: &str, specifier: &str) -> Result<Environment, RuntimeError> {
            let inner = Environment::root(None, None);
            self.resolver
                .import(specifier, &ImportClause::Wildcard { alias: None }, &CapabilitySet::unrestricted(), true, self, &inner)?;
            self.reentered.set(true);
            inner.set_export_manifest(None);
            Ok(inner)
        }
        fn swap_capabilities(&mut self, capabilities: CapabilitySet) -> CapabilitySet {
            capabilities
        }
    }

    let fs = FakeFileSystem::new().with_file("./self.mld", "body");
    let http = FakeHttpFetcher::default();
    let registry_stub = support::NoRegistry;
    let resolver = Resolver::new(&fs, &http, &registry_stub);
    let mut interpreter = SelfImportingInterpreter { resolver: &resolver, reentered: std::cell::Cell::new(false) };

    resolver
        .import(
            "./self.mld",
            &ImportClause::Wildcard { alias: None },
            &CapabilitySet::unrestricted(),
            true,
            &mut interpreter,
            &Environment::root(None, None),
        )
        .expect("the circular branch short-circuits rather than recursing forever");
    assert!(interpreter.reentered.get());
}

#[test]
fn dynamic_module_seeding_bypasses_interpretation_entirely() {
    let fs = FakeFileSystem::new();
    let http = FakeHttpFetcher::default();
    let registry_stub = support::NoRegistry;
    let resolver = Resolver::new(&fs, &http, &registry_stub);

    let module_env = Environment::root(None, None);
    module_env
        .set(mlld_core::env::Variable::new(
            "a",
            mlld_core::env::VariableKind::Text,
            mlld_core::structured_value::StructuredValue::text("seeded"),
            mlld_core::env::VariableSource::Literal,
        ))
        .expect("fresh scope accepts the binding");
    module_env.set_export_manifest(None);
    resolver.seed_dynamic_module("./seeded.mld", module_env);

    let mut interpreter = RecordingInterpreter::new();
    let importer = Environment::root(None, None);
    resolver
        .import("./seeded.mld", &ImportClause::Wildcard { alias: None }, &CapabilitySet::unrestricted(), true, &mut interpreter, &importer)
        .expect("a seeded specifier resolves from the cache");

    assert!(interpreter.seen_capabilities.is_empty(), "the cache hit short-circuits before interpret_module ever runs");
    assert_eq!(importer.get("a").expect("imported").value.as_text(), "seeded");
}

