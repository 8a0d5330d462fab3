//! Handle normalization and the in-memory handle sets that back filtering.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Which of the two synchronized lists an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    Muted,
    Blocked,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Muted => "muted",
            ListKind::Blocked => "blocked",
        }
    }

    /// GraphQL operation name that serves this list.
    pub fn operation(&self) -> &'static str {
        match self {
            ListKind::Muted => "MutedAccounts",
            ListKind::Blocked => "BlockedAccountsAll",
        }
    }
}

/// Add/remove verb observed on a list mutation endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListAction {
    Add,
    Remove,
}

impl ListAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListAction::Add => "add",
            ListAction::Remove => "remove",
        }
    }
}

/// Canonical handle form: lowercase, without leading `@` sigils.
///
/// Idempotent, so values already stored in canonical form pass through
/// unchanged.
pub fn normalize_handle(handle: &str) -> String {
    handle.to_lowercase().trim_start_matches('@').to_string()
}

/// Set of canonical handles. Every entry point normalizes, so lookups with
/// raw `@Name` strings behave the same as lookups with stored values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleSet {
    inner: HashSet<String>,
}

impl HandleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_stored<S: AsRef<str>>(handles: &[S]) -> Self {
        let mut set = Self::new();
        for handle in handles {
            set.insert(handle.as_ref());
        }
        set
    }

    /// Returns true when the set changed.
    pub fn insert(&mut self, handle: &str) -> bool {
        let normalized = normalize_handle(handle);
        if normalized.is_empty() {
            return false;
        }
        self.inner.insert(normalized)
    }

    /// Returns true when the set changed.
    pub fn remove(&mut self, handle: &str) -> bool {
        self.inner.remove(&normalize_handle(handle))
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.inner.contains(&normalize_handle(handle))
    }

    pub fn extend(&mut self, other: HandleSet) {
        self.inner.extend(other.inner);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.inner.iter().map(String::as_str)
    }

    /// Sorted snapshot for persistence, so repeated refreshes of identical
    /// content serialize identically.
    pub fn to_vec(&self) -> Vec<String> {
        let mut out: Vec<String> = self.inner.iter().cloned().collect();
        out.sort_unstable();
        out
    }
}
