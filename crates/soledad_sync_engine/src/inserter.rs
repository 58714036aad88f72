//! Hand-off of received documents to the local replica.

use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use soledad_sync_protocol::Document;
use std::sync::Arc;

/// Inserts received documents into the local replica.
///
/// Called once per received document, in the order the remote sent them.
/// The implementation decides how to merge (the local replica applies
/// take-other semantics); an error aborts the sync.
///
/// Calls are made on tokio's blocking pool, one at a time, so an
/// implementation may block on disk or locks.
pub trait DocInserter: Send + Sync {
    /// Inserts `doc`, received at remote `generation`/`transaction_id`.
    fn insert_doc(&self, doc: Document, generation: u64, transaction_id: &str) -> SyncResult<()>;
}

/// Runs one [`DocInserter::insert_doc`] on the blocking pool.
pub(crate) async fn insert_blocking(
    inserter: &Arc<dyn DocInserter>,
    doc: Document,
    generation: u64,
    transaction_id: String,
) -> SyncResult<()> {
    let inserter = Arc::clone(inserter);
    tokio::task::spawn_blocking(move || inserter.insert_doc(doc, generation, &transaction_id))
        .await
        .map_err(|e| SyncError::PoolFailed(format!("insert task crashed: {e}")))?
}

/// A document as recorded by [`MemoryInserter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertedDoc {
    /// The document.
    pub doc: Document,
    /// Remote generation.
    pub generation: u64,
    /// Remote transaction id.
    pub transaction_id: String,
}

/// In-memory inserter for testing.
#[derive(Debug, Default)]
pub struct MemoryInserter {
    inserted: RwLock<Vec<InsertedDoc>>,
}

impl MemoryInserter {
    /// Creates an empty inserter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the inserted documents, in insertion order.
    pub fn inserted(&self) -> Vec<InsertedDoc> {
        self.inserted.read().clone()
    }
}

impl DocInserter for MemoryInserter {
    fn insert_doc(&self, doc: Document, generation: u64, transaction_id: &str) -> SyncResult<()> {
        self.inserted.write().push(InsertedDoc {
            doc,
            generation,
            transaction_id: transaction_id.to_string(),
        });
        Ok(())
    }
}
