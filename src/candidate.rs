//! The object under optimization: a finite map from component name to component text.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A 0-based dense index into the candidate pool, assigned on admission.
///
/// Kept as a newtype (rather than a bare `usize`) so it can't be accidentally mixed up
/// with a minibatch index or a raw `DataId` at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProgramIdx(pub usize);

impl ProgramIdx {
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for ProgramIdx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A candidate program: component name → component text.
///
/// The key set is arbitrary but, within a single run, identical across every candidate
/// (all descend from the seed's key set). Candidates are immutable once admitted —
/// mutation always produces a new `Candidate` rather than editing one in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    components: BTreeMap<String, String>,
}

impl Candidate {
    pub fn new(components: BTreeMap<String, String>) -> Self {
        Self { components }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.components.get(name).map(String::as_str)
    }

    pub fn component_names(&self) -> impl Iterator<Item = &str> {
        self.components.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Returns a copy with `name` overwritten by `text`, leaving every other
    /// component untouched.
    pub fn with_component(&self, name: &str, text: String) -> Self {
        let mut components = self.components.clone();
        components.insert(name.to_string(), text);
        Self { components }
    }

    pub fn has_same_keys_as(&self, other: &Candidate) -> bool {
        self.components.keys().eq(other.components.keys())
    }
}
