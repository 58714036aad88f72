//! Receive phase: download of remote changes, one document per request.

use crate::decrypter::SyncDecrypterPool;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::http::{HttpClient, HttpTransport, Method};
use crate::inserter::{insert_blocking, DocInserter};
use futures::stream::{self, StreamExt};
use soledad_crypto::{is_symmetrically_encrypted, DocumentCrypto};
use soledad_staging::StagingStore;
use soledad_sync_protocol::{
    receive_body, Document, ReceiveResponse, SyncHeader, GET_CONTENT_TYPE,
};
use std::sync::Arc;

/// Called with the remote replica uid when the remote database was created
/// during this sync.
pub type EnsureCallback = dyn Fn(&str) + Send + Sync;

/// Where the remote stands after the receive phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveOutcome {
    /// Remote generation.
    pub generation: u64,
    /// Transaction id paired with `generation`.
    pub transaction_id: String,
    /// Number of documents received.
    pub received: usize,
}

/// Downloads remote changes and hands them to the local replica.
///
/// The first request reveals how many documents there are; the rest are
/// fetched concurrently but inserted in the order the remote numbered them.
pub struct DocFetcher<'a, C: HttpClient> {
    pub(crate) transport: &'a HttpTransport<C>,
    pub(crate) url: &'a str,
    pub(crate) crypto: &'a Arc<DocumentCrypto>,
    pub(crate) store: &'a Arc<dyn StagingStore>,
    pub(crate) events: &'a EventBus,
    pub(crate) concurrency: usize,
    pub(crate) decrypt_pool_size: usize,
    pub(crate) decrypt_queue_size: usize,
}

/// Per-session receive state.
struct Session<'a> {
    inserter: &'a Arc<dyn DocInserter>,
    ensure_callback: Option<&'a EnsureCallback>,
    decrypter: Option<SyncDecrypterPool>,
    total: usize,
}

impl<C: HttpClient> DocFetcher<'_, C> {
    /// Receives every change the remote has after `header`'s position.
    ///
    /// With `defer_decryption`, encrypted documents go through a decrypter
    /// pool; otherwise they are decrypted inline before insertion. When
    /// nothing is received, the position in `header` is returned.
    pub async fn receive_docs(
        &self,
        header: &SyncHeader,
        inserter: &Arc<dyn DocInserter>,
        ensure_callback: Option<&EnsureCallback>,
        defer_decryption: bool,
    ) -> SyncResult<ReceiveOutcome> {
        let first = self.fetch_one(header, 0).await?;
        let total = first.metadata.number_of_changes;

        let mut session = Session {
            inserter,
            ensure_callback,
            decrypter: None,
            total,
        };
        if defer_decryption && total > 0 {
            session.decrypter = Some(SyncDecrypterPool::start(
                Arc::clone(self.store),
                Arc::clone(self.crypto),
                Arc::clone(inserter),
                self.decrypt_pool_size,
                self.decrypt_queue_size,
            ));
        }

        let result = self.receive_all(header, first, &mut session).await;
        match session.decrypter.as_mut() {
            Some(decrypter) => match (result, decrypter.finish().await) {
                // the pool stopped early; its own error says why
                (Err(SyncError::PoolFailed(_)), Err(cause)) => Err(cause),
                (Err(e), _) => Err(e),
                (Ok(_), Err(e)) => Err(e),
                (Ok(outcome), Ok(_)) => Ok(outcome),
            },
            None => result,
        }
    }

    async fn receive_all(
        &self,
        header: &SyncHeader,
        first: ReceiveResponse,
        session: &mut Session<'_>,
    ) -> SyncResult<ReceiveOutcome> {
        let mut outcome = ReceiveOutcome {
            generation: header.last_known_generation,
            transaction_id: header.last_known_trans_id.clone(),
            received: 0,
        };
        if session.total == 0 {
            self.notify_ensure(&first, session);
            return Ok(outcome);
        }

        self.handle(1, first, session, &mut outcome).await?;

        let mut rest = stream::iter(1..session.total)
            .map(|received| self.fetch_one(header, received))
            .buffered(self.concurrency.max(1));
        let mut idx = 1;
        while let Some(response) = rest.next().await {
            idx += 1;
            self.handle(idx, response?, session, &mut outcome).await?;
        }

        Ok(outcome)
    }

    async fn fetch_one(&self, header: &SyncHeader, received: usize) -> SyncResult<ReceiveResponse> {
        let body = receive_body(header, received)?;
        let response = self
            .transport
            .request(
                Method::Post,
                self.url,
                &[("content-type", GET_CONTENT_TYPE)],
                Some(body.into_bytes()),
            )
            .await?;
        Ok(ReceiveResponse::parse(&response)?)
    }

    fn notify_ensure(&self, response: &ReceiveResponse, session: &Session<'_>) {
        if let (Some(callback), Some(uid)) =
            (session.ensure_callback, response.metadata.replica_uid.as_deref())
        {
            tracing::info!(replica_uid = uid, "remote database created");
            callback(uid);
        }
    }

    async fn handle(
        &self,
        idx: usize,
        response: ReceiveResponse,
        session: &mut Session<'_>,
        outcome: &mut ReceiveOutcome,
    ) -> SyncResult<()> {
        self.notify_ensure(&response, session);
        let ReceiveResponse { metadata, entry } = response;
        let entry =
            entry.ok_or_else(|| SyncError::BrokenSyncStream(format!("document {idx} missing")))?;

        let generation = entry.gen;
        let transaction_id = entry.trans_id.clone();
        let doc = entry.into_document();

        match session.decrypter.as_ref() {
            Some(decrypter) => {
                decrypter
                    .insert_received_doc(idx, doc, generation, &transaction_id)
                    .await?;
            }
            None => {
                let doc = self.decrypt_inline(doc).await?;
                insert_blocking(session.inserter, doc, generation, transaction_id).await?;
            }
        }

        outcome.generation = metadata.new_generation;
        outcome.transaction_id = metadata.new_transaction_id;
        outcome.received = idx;
        self.events.emit(SyncEvent::ReceiveStatus {
            received: idx,
            total: session.total,
        });
        Ok(())
    }

    async fn decrypt_inline(&self, doc: Document) -> SyncResult<Document> {
        let encrypted = doc.content().is_some_and(is_symmetrically_encrypted);
        let Some(content) = doc.content.clone().filter(|_| encrypted) else {
            return Ok(doc);
        };

        let crypto = Arc::clone(self.crypto);
        let (doc_id, rev) = (doc.doc_id.clone(), doc.rev.clone());
        let plain = tokio::task::spawn_blocking(move || crypto.decrypt_doc(&doc_id, &rev, &content))
            .await
            .map_err(|e| SyncError::PoolFailed(format!("inline decryption crashed: {e}")))??;
        Ok(Document {
            content: Some(plain),
            ..doc
        })
    }
}
