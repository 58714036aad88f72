//! In-memory staging store for testing.

use crate::error::StagingResult;
use crate::store::{StageKey, StagingStore};
use parking_lot::RwLock;
use std::collections::HashMap;

/// An in-memory staging store.
///
/// This store keeps all entries in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Sessions that do not need to resume after a restart
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads.
#[derive(Debug, Default)]
pub struct InMemoryStaging {
    entries: RwLock<HashMap<StageKey, Vec<u8>>>,
}

impl InMemoryStaging {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl StagingStore for InMemoryStaging {
    fn put(&self, key: &StageKey, value: &[u8]) -> StagingResult<()> {
        self.entries.write().insert(key.clone(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &StageKey) -> StagingResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn take(&self, key: &StageKey) -> StagingResult<Option<Vec<u8>>> {
        Ok(self.entries.write().remove(key))
    }

    fn delete(&self, key: &StageKey) -> StagingResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn contains(&self, key: &StageKey) -> StagingResult<bool> {
        Ok(self.entries.read().contains_key(key))
    }

    fn keys(&self) -> StagingResult<Vec<StageKey>> {
        let mut keys: Vec<StageKey> = self.entries.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn len(&self) -> StagingResult<usize> {
        Ok(self.entries.read().len())
    }
}
