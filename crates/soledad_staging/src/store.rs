//! Staging store trait definition.

use crate::error::StagingResult;
use std::fmt;

/// Identity of a staged entry: one revision of one document.
///
/// Revisions are never reused with different content, so the pair is
/// enough to tell whether a staged value is still valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageKey {
    /// Document identifier.
    pub doc_id: String,
    /// Document revision.
    pub rev: String,
}

impl StageKey {
    /// Creates a new key.
    pub fn new(doc_id: impl Into<String>, rev: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            rev: rev.into(),
        }
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.doc_id, self.rev)
    }
}

/// A keyed store for precomputed document payloads.
///
/// # Invariants
///
/// - Every method is atomic with respect to a single key
/// - `get` after `put` returns exactly the bytes that were put
/// - `delete` on a missing key succeeds and changes nothing
/// - `take` reads and removes in one step, so two concurrent callers
///   never both observe the same value
/// - Stores must be `Send + Sync`; the sync engine shares one store
///   between the staging workers and the network path
///
/// # Implementors
///
/// - [`super::InMemoryStaging`] - For testing
/// - [`super::FileStaging`] - For persistent staging
pub trait StagingStore: Send + Sync {
    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be written.
    fn put(&self, key: &StageKey, value: &[u8]) -> StagingResult<()>;

    /// Returns the value staged under `key`, or `None` on a miss.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry exists but cannot be read.
    fn get(&self, key: &StageKey) -> StagingResult<Option<Vec<u8>>>;

    /// Removes and returns the value staged under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry exists but cannot be read or removed.
    fn take(&self, key: &StageKey) -> StagingResult<Option<Vec<u8>>>;

    /// Removes the entry for `key` if present.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing entry cannot be removed.
    fn delete(&self, key: &StageKey) -> StagingResult<()>;

    /// Returns true if an entry exists for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be inspected.
    fn contains(&self, key: &StageKey) -> StagingResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Returns the keys of all staged entries, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    fn keys(&self) -> StagingResult<Vec<StageKey>>;

    /// Returns the number of staged entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    fn len(&self) -> StagingResult<usize> {
        Ok(self.keys()?.len())
    }

    /// Returns true if nothing is staged.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be listed.
    fn is_empty(&self) -> StagingResult<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display() {
        let key = StageKey::new("doc-1", "replica:3");
        assert_eq!(key.to_string(), "doc-1@replica:3");
    }

    #[test]
    fn key_ordering_is_by_doc_then_rev() {
        let mut keys = vec![
            StageKey::new("b", "1"),
            StageKey::new("a", "2"),
            StageKey::new("a", "1"),
        ];
        keys.sort();
        assert_eq!(keys[0], StageKey::new("a", "1"));
        assert_eq!(keys[2], StageKey::new("b", "1"));
    }
}
