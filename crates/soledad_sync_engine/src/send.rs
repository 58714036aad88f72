//! Send phase: chunked upload of local changes.

use crate::encrypter::SyncEncrypterPool;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::http::{HttpClient, HttpTransport, Method};
use soledad_crypto::DocumentCrypto;
use soledad_staging::StagingError;
use soledad_sync_protocol::{
    ChangedDoc, Document, RequestBodyBuilder, SendEntry, SendResponse, SyncHeader,
    PUT_CONTENT_TYPE,
};
use std::sync::Arc;

/// Uploads a batch of changed documents.
///
/// The whole batch is assembled into one body, then sent as consecutive
/// chunks; chunk N is only sent after chunk N-1 was accepted. Nothing is
/// retried.
#[derive(Debug)]
pub struct DocSender<'a, C: HttpClient> {
    pub(crate) transport: &'a HttpTransport<C>,
    pub(crate) url: &'a str,
    pub(crate) crypto: &'a Arc<DocumentCrypto>,
    pub(crate) encrypter: Option<&'a SyncEncrypterPool>,
    pub(crate) events: &'a EventBus,
    pub(crate) chunk_size: usize,
    pub(crate) max_chunk_bytes: Option<usize>,
}

impl<C: HttpClient> DocSender<'_, C> {
    /// Sends `docs` (ordered by generation) and returns the remote
    /// position after the last chunk, or `None` if there was nothing to
    /// send.
    pub async fn send_docs(
        &self,
        docs: &[ChangedDoc],
        header: &SyncHeader,
    ) -> SyncResult<Option<SendResponse>> {
        if docs.is_empty() {
            return Ok(None);
        }

        let total = docs.len();
        let mut builder = RequestBodyBuilder::new(header)?;
        for (idx, changed) in docs.iter().enumerate() {
            let content = self.encrypted_content(&changed.doc).await?;
            builder.push(&SendEntry {
                id: changed.doc.doc_id.clone(),
                rev: changed.doc.rev.clone(),
                content,
                gen: changed.generation,
                trans_id: changed.transaction_id.clone(),
                number_of_docs: total,
                doc_idx: idx + 1,
            })?;
        }
        let body = builder.finish();

        let mut last = None;
        for chunk in body.chunks(self.chunk_size, self.max_chunk_bytes) {
            let response = self
                .transport
                .request(
                    Method::Post,
                    self.url,
                    &[("content-type", PUT_CONTENT_TYPE)],
                    Some(chunk.body.into_bytes()),
                )
                .await?;
            let position = SendResponse::decode(&response)?;
            tracing::debug!(
                docs = ?chunk.entries,
                new_generation = position.new_generation,
                "chunk accepted"
            );

            if let Some(encrypter) = self.encrypter {
                for changed in &docs[chunk.entries.clone()] {
                    encrypter.delete_staged(&changed.doc.doc_id, &changed.doc.rev)?;
                }
            }
            self.events.emit(SyncEvent::SendStatus {
                sent: chunk.entries.end,
                total,
            });
            last = Some(position);
        }

        Ok(last)
    }

    /// Returns the ciphertext to send for `doc`: staged if available,
    /// encrypted inline otherwise, `None` for a tombstone.
    async fn encrypted_content(&self, doc: &Document) -> SyncResult<Option<String>> {
        let Some(content) = doc.content.clone() else {
            return Ok(None);
        };

        if let Some(encrypter) = self.encrypter {
            if let Some(staged) = encrypter.get_staged(&doc.doc_id, &doc.rev).await? {
                let staged = String::from_utf8(staged).map_err(|_| {
                    StagingError::Corrupted(format!("staged {}@{} is not text", doc.doc_id, doc.rev))
                })?;
                return Ok(Some(staged));
            }
        }

        let crypto = Arc::clone(self.crypto);
        let doc_id = doc.doc_id.clone();
        let rev = doc.rev.clone();
        let blob = tokio::task::spawn_blocking(move || crypto.encrypt_doc(&doc_id, &rev, &content))
            .await
            .map_err(|e| SyncError::PoolFailed(format!("inline encryption crashed: {e}")))??;
        Ok(Some(blob))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use crate::mock::MockHttpClient;
    use soledad_crypto::Secret;
    use soledad_staging::{InMemoryStaging, StagingStore};
    use std::sync::atomic::{AtomicU64, Ordering};

    fn crypto() -> Arc<DocumentCrypto> {
        Arc::new(DocumentCrypto::new(&Secret::from_string("x".repeat(50))))
    }

    fn counting_server() -> MockHttpClient {
        let generation = AtomicU64::new(10);
        MockHttpClient::new(move |_| {
            let gen = generation.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(HttpResponse::ok(format!(
                r#"[{{"new_generation": {gen}, "new_transaction_id": "T-{gen}"}}]"#
            )))
        })
    }

    fn docs(n: usize) -> Vec<ChangedDoc> {
        (1..=n)
            .map(|i| {
                ChangedDoc::new(
                    Document::new(format!("doc-{i}"), "r:1", format!("{{\"i\": {i}}}").into_bytes()),
                    i as u64,
                    format!("L-{i}"),
                )
            })
            .collect()
    }

    fn header() -> SyncHeader {
        SyncHeader::new(10, "T-10", "sync", false)
    }

    #[tokio::test]
    async fn empty_batch_sends_nothing() {
        let transport = HttpTransport::new(counting_server());
        let crypto = crypto();
        let events = EventBus::new(4);
        let sender = DocSender {
            transport: &transport,
            url: "https://s/sync-from/a",
            crypto: &crypto,
            encrypter: None,
            events: &events,
            chunk_size: 1,
            max_chunk_bytes: None,
        };

        assert_eq!(sender.send_docs(&[], &header()).await.unwrap(), None);
        assert_eq!(transport.client().request_count(), 0);
    }

    #[tokio::test]
    async fn chunks_and_cleans_staging() {
        let transport = HttpTransport::new(counting_server());
        let crypto = crypto();
        let store = Arc::new(InMemoryStaging::new());
        let encrypter = SyncEncrypterPool::new(store.clone(), crypto.clone(), 2);
        let events = EventBus::new(16);
        let mut rx = events.subscribe();

        let docs = docs(5);
        for changed in &docs {
            encrypter.stage_for_send(&changed.doc).unwrap();
        }

        let sender = DocSender {
            transport: &transport,
            url: "https://s/sync-from/a",
            crypto: &crypto,
            encrypter: Some(&encrypter),
            events: &events,
            chunk_size: 2,
            max_chunk_bytes: None,
        };
        let result = sender.send_docs(&docs, &header()).await.unwrap().unwrap();

        // ceil(5 / 2) requests, result of the last one
        assert_eq!(transport.client().request_count(), 3);
        assert_eq!(result.new_generation, 13);
        assert_eq!(result.new_transaction_id, "T-13");
        assert!(store.is_empty().unwrap());

        let mut sent = Vec::new();
        while let Ok(SyncEvent::SendStatus { sent: s, total }) = rx.try_recv() {
            assert_eq!(total, 5);
            sent.push(s);
        }
        assert_eq!(sent, [2, 4, 5]);
    }

    #[tokio::test]
    async fn tombstones_and_inline_encryption() {
        let transport = HttpTransport::new(counting_server());
        let crypto = crypto();
        let events = EventBus::new(4);
        let docs = vec![
            ChangedDoc::new(Document::tombstone("gone", "r:2"), 1, "L-1"),
            ChangedDoc::new(Document::new("live", "r:1", b"{}".to_vec()), 2, "L-2"),
        ];
        let sender = DocSender {
            transport: &transport,
            url: "https://s/sync-from/a",
            crypto: &crypto,
            encrypter: None,
            events: &events,
            chunk_size: 10,
            max_chunk_bytes: None,
        };
        sender.send_docs(&docs, &header()).await.unwrap();

        let requests = transport.client().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].header("content-type"), Some(PUT_CONTENT_TYPE));
        let values: Vec<serde_json::Value> =
            serde_json::from_str(requests[0].body_text().unwrap()).unwrap();
        assert_eq!(values.len(), 3);
        assert!(values[1]["content"].is_null());
        let blob = values[2]["content"].as_str().unwrap();
        assert_eq!(crypto.decrypt_doc("live", "r:1", blob.as_bytes()).unwrap(), b"{}");
        assert_eq!(values[2]["doc_idx"], 2);
        assert_eq!(values[2]["number_of_docs"], 2);
    }

    #[tokio::test]
    async fn failure_aborts_remaining_chunks() {
        let transport = HttpTransport::new(MockHttpClient::new(|_| {
            Ok(HttpResponse::new(500, "internal"))
        }));
        let crypto = crypto();
        let events = EventBus::new(4);
        let sender = DocSender {
            transport: &transport,
            url: "https://s/sync-from/a",
            crypto: &crypto,
            encrypter: None,
            events: &events,
            chunk_size: 1,
            max_chunk_bytes: None,
        };
        let err = sender.send_docs(&docs(3), &header()).await.unwrap_err();
        assert!(matches!(err, SyncError::Http { status: 500, .. }));
        assert_eq!(transport.client().request_count(), 1);
    }
}
