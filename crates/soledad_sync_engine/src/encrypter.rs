//! Pipelined encryption of outgoing documents.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use soledad_crypto::DocumentCrypto;
use soledad_staging::{StageKey, StagingStore};
use soledad_sync_protocol::Document;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};

/// Counters of an encrypter pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Documents encrypted and written to the staging store.
    pub staged: u64,
    /// Staging computations that failed or crashed.
    pub failed: u64,
    /// Lookups that found nothing after a failed computation.
    pub misses_after_failure: u64,
}

struct Inner {
    store: Arc<dyn StagingStore>,
    crypto: Arc<DocumentCrypto>,
    permits: Arc<Semaphore>,
    in_flight: Mutex<HashMap<StageKey, watch::Receiver<bool>>>,
    failed: Mutex<HashSet<StageKey>>,
    stats: Mutex<PoolStats>,
}

/// Encrypts documents ahead of the send and parks the ciphertext in a
/// staging store.
///
/// Each scheduled document is tracked until its computation ends, so a
/// lookup for it waits instead of racing the encryption. At most
/// `pool_size` encryptions run at a time, on the blocking thread pool.
#[derive(Clone)]
pub struct SyncEncrypterPool {
    inner: Arc<Inner>,
}

impl SyncEncrypterPool {
    /// Creates a pool writing into `store`.
    pub fn new(store: Arc<dyn StagingStore>, crypto: Arc<DocumentCrypto>, pool_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                crypto,
                permits: Arc::new(Semaphore::new(pool_size.max(1))),
                in_flight: Mutex::new(HashMap::new()),
                failed: Mutex::new(HashSet::new()),
                stats: Mutex::new(PoolStats::default()),
            }),
        }
    }

    /// Returns the staging store.
    pub fn store(&self) -> &Arc<dyn StagingStore> {
        &self.inner.store
    }

    /// Returns the counters.
    pub fn stats(&self) -> PoolStats {
        self.inner.stats.lock().clone()
    }

    /// Number of computations not yet finished.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Schedules encryption of `doc`.
    ///
    /// Tombstones and documents already staged or scheduled are skipped.
    /// Returns immediately; must be called from within a tokio runtime.
    pub fn stage_for_send(&self, doc: &Document) -> SyncResult<()> {
        let Some(content) = doc.content.clone() else {
            return Ok(());
        };
        let key = StageKey::new(doc.doc_id.as_str(), doc.rev.as_str());
        if self.inner.store.contains(&key)? {
            return Ok(());
        }

        let (done_tx, done_rx) = watch::channel(false);
        {
            let mut in_flight = self.inner.in_flight.lock();
            if in_flight.contains_key(&key) {
                return Ok(());
            }
            in_flight.insert(key.clone(), done_rx);
        }
        self.inner.failed.lock().remove(&key);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let result = inner.encrypt_and_stage(&key, content).await;
            match result {
                Ok(()) => inner.stats.lock().staged += 1,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "failed to stage document");
                    inner.stats.lock().failed += 1;
                    inner.failed.lock().insert(key.clone());
                }
            }
            inner.in_flight.lock().remove(&key);
            let _ = done_tx.send(true);
        });
        Ok(())
    }

    /// Returns the staged ciphertext of `(doc_id, rev)`.
    ///
    /// Waits for a scheduled computation of that key to finish first.
    /// `None` is a staging miss: the caller encrypts inline instead.
    pub async fn get_staged(&self, doc_id: &str, rev: &str) -> SyncResult<Option<Vec<u8>>> {
        let key = StageKey::new(doc_id, rev);
        let pending = self.inner.in_flight.lock().get(&key).cloned();
        if let Some(mut done) = pending {
            // an Err means the task went away; the store tells what is left
            let _ = done.wait_for(|finished| *finished).await;
        }

        let staged = self.inner.store.get(&key)?;
        if staged.is_none() && self.inner.failed.lock().contains(&key) {
            tracing::warn!(key = %key, "staging miss after failed encryption, encrypting inline");
            self.inner.stats.lock().misses_after_failure += 1;
        }
        Ok(staged)
    }

    /// Removes the staged entry of `(doc_id, rev)`. Idempotent.
    pub fn delete_staged(&self, doc_id: &str, rev: &str) -> SyncResult<()> {
        let key = StageKey::new(doc_id, rev);
        self.inner.store.delete(&key)?;
        self.inner.failed.lock().remove(&key);
        Ok(())
    }

    /// Waits until every scheduled computation has finished.
    pub async fn drain(&self) {
        let pending: Vec<_> = self.inner.in_flight.lock().values().cloned().collect();
        for mut done in pending {
            let _ = done.wait_for(|finished| *finished).await;
        }
    }
}

impl Inner {
    async fn encrypt_and_stage(&self, key: &StageKey, content: Vec<u8>) -> SyncResult<()> {
        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| SyncError::PoolFailed("encrypter pool closed".into()))?;

        let crypto = Arc::clone(&self.crypto);
        let doc_id = key.doc_id.clone();
        let rev = key.rev.clone();
        let blob = tokio::task::spawn_blocking(move || crypto.encrypt_doc(&doc_id, &rev, &content))
            .await
            .map_err(|e| SyncError::PoolFailed(format!("encryption task crashed: {e}")))??;

        self.store.put(key, blob.as_bytes())?;
        tracing::trace!(key = %key, "staged document");
        Ok(())
    }
}

impl fmt::Debug for SyncEncrypterPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEncrypterPool")
            .field("in_flight", &self.in_flight())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use soledad_crypto::Secret;
    use soledad_staging::{InMemoryStaging, StagingResult};

    fn crypto() -> Arc<DocumentCrypto> {
        Arc::new(DocumentCrypto::new(&Secret::from_string("s".repeat(50))))
    }

    fn pool() -> (SyncEncrypterPool, Arc<InMemoryStaging>) {
        let store = Arc::new(InMemoryStaging::new());
        (SyncEncrypterPool::new(store.clone(), crypto(), 2), store)
    }

    #[tokio::test]
    async fn staged_content_decrypts_to_original() {
        let (pool, _) = pool();
        let doc = Document::new("doc-1", "r:1", br#"{"n": 1}"#.to_vec());
        pool.stage_for_send(&doc).unwrap();

        let staged = pool.get_staged("doc-1", "r:1").await.unwrap().unwrap();
        let plain = crypto().decrypt_doc("doc-1", "r:1", &staged).unwrap();
        assert_eq!(plain, br#"{"n": 1}"#);
        assert_eq!(pool.stats().staged, 1);
    }

    #[tokio::test]
    async fn tombstones_are_not_staged() {
        let (pool, store) = pool();
        pool.stage_for_send(&Document::tombstone("gone", "r:2")).unwrap();
        pool.drain().await;
        assert!(store.is_empty().unwrap());
        assert_eq!(pool.get_staged("gone", "r:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_key_is_a_miss() {
        let (pool, _) = pool();
        assert_eq!(pool.get_staged("nope", "r").await.unwrap(), None);
        assert_eq!(pool.stats().misses_after_failure, 0);
    }

    #[tokio::test]
    async fn delete_staged_is_idempotent() {
        let (pool, store) = pool();
        pool.stage_for_send(&Document::new("d", "1", b"x".to_vec())).unwrap();
        pool.drain().await;
        assert_eq!(store.len().unwrap(), 1);

        pool.delete_staged("d", "1").unwrap();
        pool.delete_staged("d", "1").unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn drain_waits_for_everything() {
        let (pool, store) = pool();
        for i in 0..20 {
            pool.stage_for_send(&Document::new(format!("doc-{i}"), "1", vec![b'x'; 1000]))
                .unwrap();
        }
        pool.drain().await;
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(store.len().unwrap(), 20);
    }

    struct FailingStore;

    impl StagingStore for FailingStore {
        fn put(&self, _key: &StageKey, _value: &[u8]) -> StagingResult<()> {
            Err(soledad_staging::StagingError::Corrupted("disk full".into()))
        }
        fn get(&self, _key: &StageKey) -> StagingResult<Option<Vec<u8>>> {
            Ok(None)
        }
        fn take(&self, _key: &StageKey) -> StagingResult<Option<Vec<u8>>> {
            Ok(None)
        }
        fn delete(&self, _key: &StageKey) -> StagingResult<()> {
            Ok(())
        }
        fn keys(&self) -> StagingResult<Vec<StageKey>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn failure_is_counted_and_reported_as_miss() {
        let pool = SyncEncrypterPool::new(Arc::new(FailingStore), crypto(), 1);
        pool.stage_for_send(&Document::new("d", "1", b"x".to_vec())).unwrap();

        assert_eq!(pool.get_staged("d", "1").await.unwrap(), None);
        let stats = pool.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.misses_after_failure, 1);
        assert_eq!(stats.staged, 0);
    }
}
