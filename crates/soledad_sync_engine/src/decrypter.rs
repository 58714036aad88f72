//! Deferred decryption of received documents.

use crate::error::{SyncError, SyncResult};
use crate::inserter::{insert_blocking, DocInserter};
use parking_lot::Mutex;
use soledad_crypto::{is_symmetrically_encrypted, DocumentCrypto};
use soledad_staging::{StageKey, StagingStore};
use soledad_sync_protocol::Document;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A received document waiting for decryption.
#[derive(Debug, Clone)]
struct Received {
    idx: usize,
    doc: Document,
    generation: u64,
    transaction_id: String,
    /// Whether the ciphertext was parked in the staging store.
    staged: bool,
}

type Decryption = (Received, JoinHandle<SyncResult<Option<Vec<u8>>>>);

/// Decrypts received documents off the network path and inserts them into
/// the local replica strictly in index order.
///
/// Received ciphertext is parked in the staging store and taken back out
/// for decryption. If the pool fails, whatever is still parked is discarded
/// by [`finish`](Self::finish). Indices start at 1 and must have no gaps.
pub struct SyncDecrypterPool {
    sender: Option<mpsc::Sender<Received>>,
    worker: Option<JoinHandle<SyncResult<usize>>>,
    store: Arc<dyn StagingStore>,
    staged: Mutex<Vec<StageKey>>,
}

impl SyncDecrypterPool {
    /// Starts the pool. Must be called from within a tokio runtime.
    pub fn start(
        store: Arc<dyn StagingStore>,
        crypto: Arc<DocumentCrypto>,
        inserter: Arc<dyn DocInserter>,
        pool_size: usize,
        queue_size: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        let worker = Worker {
            store: Arc::clone(&store),
            crypto,
            inserter,
            pool_size: pool_size.max(1),
        };
        Self {
            sender: Some(sender),
            worker: Some(tokio::spawn(worker.run(receiver))),
            store,
            staged: Mutex::new(Vec::new()),
        }
    }

    /// Queues document number `idx` for decryption and insertion.
    ///
    /// Waits while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::PoolFailed`] if the pool has stopped, typically
    /// because an earlier document failed; [`finish`](Self::finish) reports
    /// the cause.
    pub async fn insert_received_doc(
        &self,
        idx: usize,
        doc: Document,
        generation: u64,
        transaction_id: &str,
    ) -> SyncResult<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| SyncError::PoolFailed("decrypter pool is finished".into()))?;

        let mut staged = false;
        if let Some(content) = doc.content() {
            if is_symmetrically_encrypted(content) {
                let key = StageKey::new(doc.doc_id.as_str(), doc.rev.as_str());
                self.store.put(&key, content)?;
                self.staged.lock().push(key);
                staged = true;
            }
        }

        sender
            .send(Received {
                idx,
                doc,
                generation,
                transaction_id: transaction_id.to_string(),
                staged,
            })
            .await
            .map_err(|_| SyncError::PoolFailed("decrypter pool stopped".into()))
    }

    /// Closes the queue and waits for every queued document to be inserted.
    ///
    /// Returns the number of documents inserted.
    ///
    /// # Errors
    ///
    /// Returns the first decryption or insertion failure. Ciphertext staged
    /// for documents that were not inserted is deleted before returning.
    pub async fn finish(&mut self) -> SyncResult<usize> {
        self.sender.take();
        let result = match self.worker.take() {
            Some(worker) => worker
                .await
                .map_err(|e| SyncError::PoolFailed(format!("decrypter worker crashed: {e}")))
                .and_then(|inserted| inserted),
            None => Ok(0),
        };

        let staged = std::mem::take(&mut *self.staged.lock());
        if result.is_err() {
            self.discard(&staged);
        }
        result
    }

    fn discard(&self, keys: &[StageKey]) {
        let mut failed = 0;
        for key in keys {
            if let Err(e) = self.store.delete(key) {
                tracing::warn!(key = %key, error = %e, "could not discard staged ciphertext");
                failed += 1;
            }
        }
        tracing::debug!(staged = keys.len(), failed, "discarded staged ciphertext");
    }
}

impl fmt::Debug for SyncDecrypterPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncDecrypterPool")
            .field("open", &self.sender.is_some())
            .field("staged", &self.staged.lock().len())
            .finish()
    }
}

struct Worker {
    store: Arc<dyn StagingStore>,
    crypto: Arc<DocumentCrypto>,
    inserter: Arc<dyn DocInserter>,
    pool_size: usize,
}

impl Worker {
    async fn run(self, mut receiver: mpsc::Receiver<Received>) -> SyncResult<usize> {
        let mut pending = BTreeMap::new();
        let mut running: VecDeque<Decryption> = VecDeque::new();
        let mut next = 1;
        let mut inserted = 0;

        while let Some(received) = receiver.recv().await {
            pending.insert(received.idx, received);
            while let Some(received) = pending.remove(&next) {
                next += 1;
                if running.len() >= self.pool_size {
                    if let Some(head) = running.pop_front() {
                        self.complete(head).await?;
                        inserted += 1;
                    }
                }
                running.push_back(self.decrypt(received));
            }
        }

        while let Some(head) = running.pop_front() {
            self.complete(head).await?;
            inserted += 1;
        }
        if let Some(idx) = pending.keys().next() {
            return Err(SyncError::PoolFailed(format!(
                "document {next} never arrived, {idx} is waiting"
            )));
        }
        tracing::debug!(inserted, "decrypter pool finished");
        Ok(inserted)
    }

    /// Takes the staged ciphertext back out and decrypts it on the blocking
    /// pool. A staging miss falls back to the content received in memory.
    fn decrypt(&self, mut received: Received) -> Decryption {
        let store = Arc::clone(&self.store);
        let crypto = Arc::clone(&self.crypto);
        let key = StageKey::new(received.doc.doc_id.as_str(), received.doc.rev.as_str());
        let staged = received.staged;
        let received_content = received.doc.content.take();

        let handle = tokio::task::spawn_blocking(move || -> SyncResult<Option<Vec<u8>>> {
            let content = if staged {
                match store.take(&key)? {
                    Some(ciphertext) => Some(ciphertext),
                    None => {
                        tracing::warn!(key = %key, "staged ciphertext missing, using received copy");
                        received_content
                    }
                }
            } else {
                received_content
            };
            match content {
                Some(content) if is_symmetrically_encrypted(&content) => {
                    Ok(Some(crypto.decrypt_doc(&key.doc_id, &key.rev, &content)?))
                }
                other => Ok(other),
            }
        });
        (received, handle)
    }

    async fn complete(&self, (received, handle): Decryption) -> SyncResult<()> {
        let content = handle
            .await
            .map_err(|e| SyncError::PoolFailed(format!("decryption task crashed: {e}")))??;
        let Received {
            idx,
            doc,
            generation,
            transaction_id,
            ..
        } = received;

        let doc = Document { content, ..doc };
        let doc_id = doc.doc_id.clone();
        insert_blocking(&self.inserter, doc, generation, transaction_id).await?;
        tracing::trace!(idx, doc_id = %doc_id, "inserted received document");
        Ok(())
    }
}
