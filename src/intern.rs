//! String interning for labels and identifiers.
//!
//! `DataLabel`s (`secret`, `untrusted`, `pii`, user-defined tags) and variable/executable
//! names are compared and hashed far more often than they are displayed, so both are
//! stored as small interned ids rather than cloned `String`s, trimmed down to the
//! single flat namespace mlld needs (no per-executor string tables, no static-ASCII
//! fast path).

use std::sync::{Mutex, OnceLock};

use ahash::AHashMap;

/// Index into the global interner's storage.
///
/// `u32` keeps label sets and `sources` compact; a run interning more than ~4 billion
/// distinct strings is not a case this crate needs to support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct StringId(u32);

impl StringId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Default)]
struct InternerTables {
    strings: Vec<Box<str>>,
    lookup: AHashMap<Box<str>, StringId>,
}

/// A process-wide string interner.
///
/// Interning is append-only and guarded by a mutex; reads (`resolve`) only need the
/// mutex for the duration of a vec index, so contention is negligible compared to the
/// work a directive evaluation does around it.
#[derive(Debug, Default)]
pub struct Interner;

static TABLES: OnceLock<Mutex<InternerTables>> = OnceLock::new();

fn tables() -> &'static Mutex<InternerTables> {
    TABLES.get_or_init(|| Mutex::new(InternerTables::default()))
}

impl Interner {
    /// Interns `s`, returning a stable id. Repeated interning of the same text returns
    /// the same id.
    ///
    /// A poisoned mutex (a prior panic while a thread held the lock) recovers the guard
    /// rather than propagating the poison, since stale-but-consistent interner state is
    /// still safe to read and extend.
    pub fn intern(s: &str) -> StringId {
        let mut tables = tables().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(id) = tables.lookup.get(s) {
            return *id;
        }
        let next = tables.strings.len();
        let id = StringId(u32::try_from(next).unwrap_or(u32::MAX));
        tables.strings.push(s.into());
        tables.lookup.insert(s.into(), id);
        id
    }

    /// Resolves an id back to its text.
    ///
    /// # Panics
    /// Panics if `id` was not produced by [`Interner::intern`] on this process.
    #[must_use]
    pub fn resolve(id: StringId) -> String {
        let tables = tables().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        tables.strings[id.index()].to_string()
    }
}
