//! Security/provenance labels attached to structured values (spec.md §2, §4.7).
//!
//! A label marks data as having passed through a particular trust boundary (e.g.
//! `"untrusted"`, `"secret"`, `"network"`). Guards (C7) key their before/after rules on
//! label membership. Labels only ever accumulate on a value — spec.md's taint-monotonicity
//! invariant (resolved open question: "taint is monotone; labels are never stripped,
//! only added, as data flows through pipeline stages and field access") — so the only
//! mutating operation this module exposes is a union.
//!
//! Labels are interned once via [`crate::intern::Interner`] so that set membership and
//! union are cheap integer operations instead of string comparisons, which matters
//! because every pipeline stage and every field access re-checks label membership.

use std::fmt;

use smallvec::SmallVec;

use crate::intern::{Interner, StringId};

/// An interned label identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct LabelId(StringId);

impl LabelId {
    #[must_use]
    pub fn intern(name: &str) -> Self {
        Self(Interner::intern(name))
    }

    #[must_use]
    pub fn name(self) -> String {
        Interner::resolve(self.0)
    }
}

impl fmt::Display for LabelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A set of labels carried by a structured value.
///
/// Small by construction — real mlld programs attach a handful of labels per value — so
/// this is backed by a `SmallVec` rather than a hash set, kept sorted and deduplicated so
/// equality and union are simple merges.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LabelSet(SmallVec<[LabelId; 4]>);

impl LabelSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn single(label: LabelId) -> Self {
        let mut set = Self::default();
        set.insert(label);
        set
    }

    #[must_use]
    pub fn from_names(names: &[&str]) -> Self {
        let mut set = Self::default();
        for name in names {
            set.insert(LabelId::intern(name));
        }
        set
    }

    pub fn insert(&mut self, label: LabelId) {
        if let Err(pos) = self.0.binary_search(&label) {
            self.0.insert(pos, label);
        }
    }

    #[must_use]
    pub fn contains(&self, label: LabelId) -> bool {
        self.0.binary_search(&label).is_ok()
    }

    #[must_use]
    pub fn contains_name(&self, name: &str) -> bool {
        self.0.iter().any(|l| l.name() == name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = LabelId> + '_ {
        self.0.iter().copied()
    }

    /// Merges `other` into a fresh set — used when a pipeline stage's output inherits
    /// its input's labels plus whatever the stage itself adds (monotone taint).
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut merged = self.clone();
        for label in other.iter() {
            merged.insert(label);
        }
        merged
    }

    pub fn extend(&mut self, other: &Self) {
        for label in other.iter() {
            self.insert(label);
        }
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{label}")?;
        }
        f.write_str("}")
    }
}

impl FromIterator<LabelId> for LabelSet {
    fn from_iter<T: IntoIterator<Item = LabelId>>(iter: T) -> Self {
        let mut set = Self::default();
        for label in iter {
            set.insert(label);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::{LabelId, LabelSet};

    #[test]
    fn insert_deduplicates() {
        let mut set = LabelSet::new();
        let label = LabelId::intern("secret");
        set.insert(label);
        set.insert(label);
        assert_eq!(set.iter().count(), 1);
    }

    #[test]
    fn union_is_monotone() {
        let a = LabelSet::from_names(&["network"]);
        let b = LabelSet::from_names(&["secret"]);
        let merged = a.union(&b);
        assert!(merged.contains_name("network"));
        assert!(merged.contains_name("secret"));
    }

    #[test]
    fn contains_name_matches_interned_label() {
        let set = LabelSet::from_names(&["untrusted"]);
        assert!(set.contains_name("untrusted"));
        assert!(!set.contains_name("trusted"));
    }
}
