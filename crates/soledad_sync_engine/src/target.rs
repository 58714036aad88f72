//! Sync orchestrator: one remote replica, many sync sessions.

use crate::config::SyncConfig;
use crate::encrypter::{PoolStats, SyncEncrypterPool};
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, SyncEvent};
use crate::fetch::{DocFetcher, EnsureCallback};
use crate::http::{Credentials, HttpClient, HttpTransport, Method};
use crate::inserter::DocInserter;
use crate::send::DocSender;
use parking_lot::RwLock;
use soledad_crypto::DocumentCrypto;
use soledad_staging::StagingStore;
use soledad_sync_protocol::{ChangedDoc, RecordSyncInfo, SyncHeader, SyncInfo};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

/// Statistics about sync exchanges.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Exchanges that completed.
    pub exchanges_completed: u64,
    /// Exchanges that failed.
    pub exchanges_failed: u64,
    /// Documents sent over all exchanges.
    pub docs_sent: u64,
    /// Documents received over all exchanges.
    pub docs_received: u64,
    /// End of the last completed exchange.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Remote position after an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOutcome {
    /// New remote generation.
    pub generation: u64,
    /// Transaction id paired with `generation`.
    pub transaction_id: String,
    /// Documents sent.
    pub sent: usize,
    /// Documents received.
    pub received: usize,
}

/// Parameters of one [`SyncTarget::sync_exchange`] call.
pub struct SyncExchange<'a> {
    docs_by_generation: &'a [ChangedDoc],
    last_known_generation: u64,
    last_known_trans_id: String,
    insert_doc_cb: Arc<dyn DocInserter>,
    ensure_callback: Option<&'a EnsureCallback>,
    defer_decryption: bool,
    sync_id: Option<String>,
}

impl<'a> SyncExchange<'a> {
    /// Creates an exchange sending `docs_by_generation` (oldest first) and
    /// inserting received documents through `insert_doc_cb`.
    pub fn new(
        docs_by_generation: &'a [ChangedDoc],
        last_known_generation: u64,
        last_known_trans_id: impl Into<String>,
        insert_doc_cb: Arc<dyn DocInserter>,
    ) -> Self {
        Self {
            docs_by_generation,
            last_known_generation,
            last_known_trans_id: last_known_trans_id.into(),
            insert_doc_cb,
            ensure_callback: None,
            defer_decryption: true,
            sync_id: None,
        }
    }

    /// Asks the remote to create its database if needed and reports the
    /// new replica uid to `callback`.
    pub fn with_ensure_callback(mut self, callback: &'a EnsureCallback) -> Self {
        self.ensure_callback = Some(callback);
        self
    }

    /// Decrypts received documents through the decrypter pool.
    pub fn with_defer_decryption(mut self, defer: bool) -> Self {
        self.defer_decryption = defer;
        self
    }

    /// Sets the sync session id (a fresh UUID by default).
    pub fn with_sync_id(mut self, sync_id: impl Into<String>) -> Self {
        self.sync_id = Some(sync_id.into());
        self
    }
}

/// A remote replica reachable over HTTPS.
///
/// Each exchange sends the local changes first, then receives the remote
/// changes, and finally returns the newest remote position.
pub struct SyncTarget<C: HttpClient> {
    config: SyncConfig,
    base_url: String,
    transport: HttpTransport<C>,
    crypto: Arc<DocumentCrypto>,
    store: Arc<dyn StagingStore>,
    encrypter: Option<SyncEncrypterPool>,
    events: EventBus,
    stats: RwLock<SyncStats>,
}

impl<C: HttpClient> SyncTarget<C> {
    /// Creates a target.
    ///
    /// `store` holds staged ciphertext in both directions; an encrypter
    /// pool is created over it when `config.defer_encryption` is set.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the configuration is invalid.
    pub fn new(
        config: SyncConfig,
        client: C,
        credentials: Option<Credentials>,
        crypto: Arc<DocumentCrypto>,
        store: Arc<dyn StagingStore>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let transport = match credentials {
            Some(credentials) => HttpTransport::with_credentials(client, credentials),
            None => HttpTransport::new(client),
        };
        let encrypter = config.defer_encryption.then(|| {
            SyncEncrypterPool::new(Arc::clone(&store), Arc::clone(&crypto), config.encrypt_pool_size)
        });

        Ok(Self {
            base_url: config.base_url(),
            events: EventBus::new(config.event_capacity),
            config,
            transport,
            crypto,
            store,
            encrypter,
            stats: RwLock::new(SyncStats::default()),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns `<server_url>/sync-from/<source_replica_uid>`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the transport.
    pub fn transport(&self) -> &HttpTransport<C> {
        &self.transport
    }

    /// Subscribes to progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Returns the exchange statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns the encrypter pool counters, if pipelining is enabled.
    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.encrypter.as_ref().map(SyncEncrypterPool::stats)
    }

    /// Replaces the credentials used by later requests.
    pub fn set_creds(&self, credentials: Credentials) {
        self.transport.set_creds(credentials);
    }

    /// Replaces the token used by later requests.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if no credentials were set.
    pub fn set_token(&self, token: impl Into<String>) -> SyncResult<()> {
        self.transport.set_token(token)
    }

    /// Fetches what the remote knows about itself and about this replica.
    pub async fn get_sync_info(&self) -> SyncResult<SyncInfo> {
        let body = self
            .transport
            .request(Method::Get, &self.base_url, &[], None)
            .await?;
        let info = SyncInfo::decode(&body)?;
        tracing::debug!(
            target_replica = %info.target_replica_uid,
            target_generation = info.target_replica_generation,
            source_generation = info.source_replica_generation,
            "sync info"
        );
        Ok(info)
    }

    /// Records on the remote that this replica is at
    /// `generation`/`transaction_id`.
    pub async fn record_sync_info(&self, generation: u64, transaction_id: &str) -> SyncResult<()> {
        let body = RecordSyncInfo::new(generation, transaction_id).encode()?;
        self.transport
            .request(
                Method::Put,
                &self.base_url,
                &[("content-type", "application/json")],
                Some(body),
            )
            .await?;
        tracing::debug!(generation, transaction_id, "recorded sync info");
        Ok(())
    }

    /// Runs one sync session: send, receive, reconcile.
    ///
    /// Returns the send result if it is ahead of what the receive phase
    /// reported, the receive result otherwise.
    pub async fn sync_exchange(&self, exchange: SyncExchange<'_>) -> SyncResult<ExchangeOutcome> {
        let result = self.run_exchange(exchange).await;

        let mut stats = self.stats.write();
        match &result {
            Ok(outcome) => {
                stats.exchanges_completed += 1;
                stats.docs_sent += outcome.sent as u64;
                stats.docs_received += outcome.received as u64;
                stats.last_sync_time = Some(Instant::now());
                stats.last_error = None;
            }
            Err(e) => {
                stats.exchanges_failed += 1;
                stats.last_error = Some(e.to_string());
            }
        }
        result
    }

    async fn run_exchange(&self, exchange: SyncExchange<'_>) -> SyncResult<ExchangeOutcome> {
        let SyncExchange {
            docs_by_generation: docs,
            last_known_generation,
            last_known_trans_id,
            insert_doc_cb,
            ensure_callback,
            defer_decryption,
            sync_id,
        } = exchange;
        let sync_id = sync_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let header = SyncHeader::new(
            last_known_generation,
            last_known_trans_id,
            sync_id.as_str(),
            ensure_callback.is_some(),
        );

        if let Some(encrypter) = &self.encrypter {
            for changed in docs {
                encrypter.stage_for_send(&changed.doc)?;
            }
        }

        tracing::info!(sync_id = %sync_id, docs = docs.len(), "sending local changes");
        let sender = DocSender {
            transport: &self.transport,
            url: &self.base_url,
            crypto: &self.crypto,
            encrypter: self.encrypter.as_ref(),
            events: &self.events,
            chunk_size: self.config.send_chunk_size,
            max_chunk_bytes: self.config.max_chunk_bytes,
        };
        let sent = sender.send_docs(docs, &header).await?;

        tracing::info!(sync_id = %sync_id, "receiving remote changes");
        let fetcher = DocFetcher {
            transport: &self.transport,
            url: &self.base_url,
            crypto: &self.crypto,
            store: &self.store,
            events: &self.events,
            concurrency: self.config.fetch_concurrency,
            decrypt_pool_size: self.config.decrypt_pool_size,
            decrypt_queue_size: self.config.decrypt_queue_size,
        };
        let received = fetcher
            .receive_docs(&header, &insert_doc_cb, ensure_callback, defer_decryption)
            .await?;

        let mut outcome = ExchangeOutcome {
            generation: received.generation,
            transaction_id: received.transaction_id,
            sent: docs.len(),
            received: received.received,
        };
        if let Some(sent) = sent {
            if sent.new_generation > outcome.generation {
                outcome.generation = sent.new_generation;
                outcome.transaction_id = sent.new_transaction_id;
            }
        }

        tracing::info!(
            sync_id = %sync_id,
            sent = outcome.sent,
            received = outcome.received,
            generation = outcome.generation,
            "sync exchange finished"
        );
        Ok(outcome)
    }

    /// Waits for pending staging work and refuses further requests.
    pub async fn close(&self) {
        if let Some(encrypter) = &self.encrypter {
            encrypter.drain().await;
        }
        self.transport.close();
    }
}

impl<C: HttpClient> fmt::Debug for SyncTarget<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncTarget")
            .field("base_url", &self.base_url)
            .field("encrypter", &self.encrypter)
            .field("connected", &self.transport.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use crate::inserter::MemoryInserter;
    use crate::mock::MockHttpClient;
    use soledad_crypto::Secret;
    use soledad_staging::InMemoryStaging;
    use soledad_sync_protocol::Document;

    fn target(client: MockHttpClient) -> SyncTarget<MockHttpClient> {
        SyncTarget::new(
            SyncConfig::new("https://sync.example.org/", "replica-a"),
            client,
            Some(Credentials::new("user-1", "token-1")),
            Arc::new(DocumentCrypto::new(&Secret::from_string("t".repeat(50)))),
            Arc::new(InMemoryStaging::new()),
        )
        .unwrap()
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = SyncTarget::new(
            SyncConfig::new("", "replica-a"),
            MockHttpClient::new(|_| Ok(HttpResponse::ok("{}"))),
            None,
            Arc::new(DocumentCrypto::new(&Secret::from_string("t".repeat(50)))),
            Arc::new(InMemoryStaging::new()),
        );
        assert!(matches!(result, Err(SyncError::Config(_))));
    }

    #[tokio::test]
    async fn sync_info_roundtrip() {
        let target = target(MockHttpClient::new(|req| match req.method {
            Method::Get => Ok(HttpResponse::ok(
                r#"{"target_replica_uid": "remote", "target_replica_generation": 9,
                    "target_replica_transaction_id": "T-9",
                    "source_replica_generation": 4, "source_transaction_id": "L-4"}"#,
            )),
            _ => Ok(HttpResponse::ok("{}")),
        }));

        let info = target.get_sync_info().await.unwrap();
        assert_eq!(info.target_replica_uid, "remote");
        assert_eq!(info.target_replica_generation, 9);
        assert_eq!(info.source_transaction_id, "L-4");

        target.record_sync_info(12, "L-12").await.unwrap();
        let requests = target.transport().client().requests();
        assert_eq!(requests[0].url, "https://sync.example.org/sync-from/replica-a");
        assert_eq!(requests[1].method, Method::Put);
        assert_eq!(requests[1].header("content-type"), Some("application/json"));
        let body: serde_json::Value =
            serde_json::from_str(requests[1].body_text().unwrap()).unwrap();
        assert_eq!(body["generation"], 12);
        assert_eq!(body["transaction_id"], "L-12");
    }

    #[tokio::test]
    async fn failed_exchange_is_counted() {
        let target = target(MockHttpClient::new(|_| {
            Ok(HttpResponse::new(401, "401 Unauthorized"))
        }));
        let docs = vec![ChangedDoc::new(Document::new("a", "1", b"{}".to_vec()), 1, "L-1")];
        let exchange = SyncExchange::new(&docs, 0, "", Arc::new(MemoryInserter::new()));

        let err = target.sync_exchange(exchange).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidAuthToken));
        let stats = target.stats();
        assert_eq!(stats.exchanges_failed, 1);
        assert_eq!(stats.exchanges_completed, 0);
        assert!(stats.last_error.is_some());
    }

    #[tokio::test]
    async fn close_refuses_requests() {
        let target = target(MockHttpClient::new(|_| Ok(HttpResponse::ok("{}"))));
        target.close().await;
        assert!(matches!(
            target.get_sync_info().await,
            Err(SyncError::Transport { retryable: false, .. })
        ));
    }
}
