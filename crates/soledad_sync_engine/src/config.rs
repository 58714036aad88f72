//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use std::time::Duration;

/// Configuration for a sync target.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Server URL (e.g. `https://sync.example.org:2323`).
    pub server_url: String,
    /// Uid of the local replica.
    pub source_replica_uid: String,
    /// Request timeout.
    pub timeout: Duration,
    /// Documents sent per request.
    pub send_chunk_size: usize,
    /// Optional upper bound on a send request body, in bytes.
    pub max_chunk_bytes: Option<usize>,
    /// Encrypt outgoing documents ahead of the send through the pool.
    pub defer_encryption: bool,
    /// Concurrent encryptions in the encrypter pool.
    pub encrypt_pool_size: usize,
    /// Concurrent decryptions in the decrypter pool.
    pub decrypt_pool_size: usize,
    /// Queue length in front of the decrypter pool.
    pub decrypt_queue_size: usize,
    /// Concurrent receive requests.
    pub fetch_concurrency: usize,
    /// Buffered events per subscriber.
    pub event_capacity: usize,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(server_url: impl Into<String>, source_replica_uid: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            source_replica_uid: source_replica_uid.into(),
            timeout: Duration::from_secs(30),
            send_chunk_size: 1,
            max_chunk_bytes: None,
            defer_encryption: true,
            encrypt_pool_size: 4,
            decrypt_pool_size: 4,
            decrypt_queue_size: 64,
            fetch_concurrency: 4,
            event_capacity: 256,
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the number of documents per send request.
    pub fn with_send_chunk_size(mut self, size: usize) -> Self {
        self.send_chunk_size = size;
        self
    }

    /// Bounds the size of a send request body.
    pub fn with_max_chunk_bytes(mut self, bytes: usize) -> Self {
        self.max_chunk_bytes = Some(bytes);
        self
    }

    /// Enables or disables pipelined encryption.
    pub fn with_defer_encryption(mut self, defer: bool) -> Self {
        self.defer_encryption = defer;
        self
    }

    /// Sets the encrypter pool size.
    pub fn with_encrypt_pool_size(mut self, size: usize) -> Self {
        self.encrypt_pool_size = size;
        self
    }

    /// Sets the decrypter pool size.
    pub fn with_decrypt_pool_size(mut self, size: usize) -> Self {
        self.decrypt_pool_size = size;
        self
    }

    /// Sets the number of concurrent receive requests.
    pub fn with_fetch_concurrency(mut self, concurrency: usize) -> Self {
        self.fetch_concurrency = concurrency;
        self
    }

    /// Sets the per-subscriber event buffer.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Endpoint of the sync resource: `<server_url>/sync-from/<source_replica_uid>`.
    pub fn base_url(&self) -> String {
        format!(
            "{}/sync-from/{}",
            self.server_url.trim_end_matches('/'),
            self.source_replica_uid
        )
    }

    /// Checks that the configuration is usable.
    pub fn validate(&self) -> SyncResult<()> {
        if self.server_url.is_empty() {
            return Err(SyncError::Config("server_url is empty".into()));
        }
        if self.source_replica_uid.is_empty() {
            return Err(SyncError::Config("source_replica_uid is empty".into()));
        }
        let sizes = [
            ("send_chunk_size", self.send_chunk_size),
            ("encrypt_pool_size", self.encrypt_pool_size),
            ("decrypt_pool_size", self.decrypt_pool_size),
            ("decrypt_queue_size", self.decrypt_queue_size),
            ("fetch_concurrency", self.fetch_concurrency),
            ("event_capacity", self.event_capacity),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(SyncError::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}
