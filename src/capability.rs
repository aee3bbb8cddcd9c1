//! Host-granted capability checks for module `needs` and executor dispatch.
//!
//! A registry module may declare `needs: { runtimes, tools, packages, capabilities }`
//! (spec.md §4.8 step 5). Before the resolver materializes the module's variables into
//! the importing environment, every declared need must be satisfied by the host's
//! granted [`CapabilitySet`] or the import fails with `NeedsUnsatisfied`. The executor
//! bridge (C5) consults the same set before invoking a language runtime, so a host that
//! never granted `Runtime("py")` cannot have `py { ... }` blocks executed even if one
//! appears in source.
//!
//! This is distinct from the guard/taint enforcer (`guard.rs`): capabilities gate *which
//! external operations exist at all* for a run; guards gate *what labeled data may flow*
//! through operations that are otherwise permitted.
//!
//! # Usage
//!
//! ```
//! use mlld_core::capability::{Capability, CapabilitySet};
//!
//! let caps = CapabilitySet::new(vec![
//!     Capability::Runtime("js".into()),
//!     Capability::Tool("git".into()),
//! ]);
//!
//! assert!(caps.allows_runtime("js"));
//! assert!(!caps.allows_runtime("python"));
//! ```

use std::fmt;

/// A single permission grant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Capability {
    /// Permission to invoke a language runtime (`js`, `node`, `py`, `python`, `sh`, `cmd`).
    Runtime(String),
    /// Permission to shell out to a named external tool, as declared by a module's
    /// `needs.tools`.
    Tool(String),
    /// Permission to rely on a named package dependency being resolvable by the host.
    Package(String),
    /// Permission to perform any subprocess spawn, regardless of runtime/tool name.
    AnySubprocess,
    /// Permission to perform network fetches (URL imports, registry resolution).
    Network,
    /// Custom capability identified by a string key, for host-specific extensions.
    Custom(String),
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Runtime(name) => write!(f, "runtime:{name}"),
            Self::Tool(name) => write!(f, "tool:{name}"),
            Self::Package(name) => write!(f, "package:{name}"),
            Self::AnySubprocess => f.write_str("subprocess:*"),
            Self::Network => f.write_str("network"),
            Self::Custom(key) => write!(f, "custom:{key}"),
        }
    }
}

/// Error returned when an operation is denied by the capability set.
///
/// Surfaced to callers as `NeedsUnsatisfied` (resolver) or `ExecutionError` (executor).
#[derive(Debug, Clone)]
pub struct PermissionDenied {
    pub operation: String,
    pub required: String,
}

impl fmt::Display for PermissionDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "needs not satisfied: {} requires capability '{}'",
            self.operation, self.required
        )
    }
}

impl std::error::Error for PermissionDenied {}

/// A set of granted capabilities for a run.
///
/// Immutable once constructed. A module imported under `approveAllImports: false`
/// narrows to its own declared `needs` via [`CapabilitySet::subset`] before its body is
/// interpreted, so a transitively-imported module cannot exercise capabilities the
/// importer itself never received.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CapabilitySet {
    capabilities: Vec<Capability>,
}

impl CapabilitySet {
    #[must_use]
    pub fn new(capabilities: Vec<Capability>) -> Self {
        Self { capabilities }
    }

    /// No capabilities granted — every runtime/tool/network check fails.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// All built-in runtimes, subprocess access, and network access granted.
    /// Appropriate for a trusted host (e.g. a developer's own CLI session).
    #[must_use]
    pub fn unrestricted() -> Self {
        Self {
            capabilities: vec![
                Capability::Runtime("sh".into()),
                Capability::Runtime("cmd".into()),
                Capability::Runtime("js".into()),
                Capability::Runtime("node".into()),
                Capability::Runtime("py".into()),
                Capability::Runtime("python".into()),
                Capability::AnySubprocess,
                Capability::Network,
            ],
        }
    }

    pub fn check_runtime(&self, runtime: &str) -> Result<(), PermissionDenied> {
        if self.capabilities.iter().any(|c| matches!(c, Capability::Runtime(name) if name == runtime)) {
            return Ok(());
        }
        Err(PermissionDenied {
            operation: format!("invoke runtime '{runtime}'"),
            required: format!("runtime:{runtime}"),
        })
    }

    pub fn check_tool(&self, tool: &str) -> Result<(), PermissionDenied> {
        let allowed = self.capabilities.iter().any(|c| match c {
            Capability::Tool(name) => name == tool,
            Capability::AnySubprocess => true,
            _ => false,
        });
        if allowed {
            return Ok(());
        }
        Err(PermissionDenied {
            operation: format!("use tool '{tool}'"),
            required: format!("tool:{tool}"),
        })
    }

    pub fn check_package(&self, package: &str) -> Result<(), PermissionDenied> {
        if self.capabilities.iter().any(|c| matches!(c, Capability::Package(name) if name == package)) {
            return Ok(());
        }
        Err(PermissionDenied {
            operation: format!("depend on package '{package}'"),
            required: format!("package:{package}"),
        })
    }

    pub fn check_network(&self) -> Result<(), PermissionDenied> {
        if self.capabilities.iter().any(|c| matches!(c, Capability::Network)) {
            return Ok(());
        }
        Err(PermissionDenied {
            operation: "network fetch".to_string(),
            required: "network".to_string(),
        })
    }

    #[must_use]
    pub fn allows_runtime(&self, runtime: &str) -> bool {
        self.check_runtime(runtime).is_ok()
    }

    /// Retains only capabilities that also appear in `restrict` — used to narrow a
    /// module's effective grant to its own declared `needs`.
    #[must_use]
    pub fn subset(&self, restrict: &[Capability]) -> Self {
        Self {
            capabilities: self.capabilities.iter().filter(|c| restrict.contains(c)).cloned().collect(),
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Capability] {
        &self.capabilities
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.capabilities.is_empty() {
            return f.write_str("CapabilitySet(none)");
        }
        f.write_str("CapabilitySet(")?;
        for (i, cap) in self.capabilities.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{cap}")?;
        }
        f.write_str(")")
    }
}

/// A module's declared runtime/tool/package/capability requirements, parsed from its
/// `needs` manifest (spec.md §4.8 step 5).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Needs {
    pub runtimes: Vec<String>,
    pub tools: Vec<String>,
    pub packages: Vec<String>,
    pub capabilities: Vec<String>,
}

impl Needs {
    /// Checks every declared need against `granted`, returning the first unsatisfied
    /// requirement's description, if any.
    #[must_use]
    pub fn unsatisfied(&self, granted: &CapabilitySet) -> Option<String> {
        for runtime in &self.runtimes {
            if granted.check_runtime(runtime).is_err() {
                return Some(format!("runtime '{runtime}'"));
            }
        }
        for tool in &self.tools {
            if granted.check_tool(tool).is_err() {
                return Some(format!("tool '{tool}'"));
            }
        }
        for package in &self.packages {
            if granted.check_package(package).is_err() {
                return Some(format!("package '{package}'"));
            }
        }
        for capability in &self.capabilities {
            let ok = granted
                .as_slice()
                .iter()
                .any(|c| matches!(c, Capability::Custom(name) if name == capability));
            if !ok {
                return Some(format!("capability '{capability}'"));
            }
        }
        None
    }
}
