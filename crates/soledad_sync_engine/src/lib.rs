//! # Soledad Sync Engine
//!
//! Encrypted, resumable document sync against a Soledad server.
//!
//! This crate provides:
//! - Token-authenticated HTTPS transport pinned to one certificate
//! - Pipelined encryption of outgoing documents through a staging store
//! - Chunked upload of local changes
//! - Concurrent download of remote changes, inserted in order
//! - The [`SyncTarget`] orchestrator tying these together
//!
//! ## Architecture
//!
//! A sync exchange is **send-then-receive**:
//! 1. Local changes are staged for encryption and sent in chunks
//! 2. Remote changes are fetched one document per request
//! 3. The newest remote generation of the two phases is returned
//!
//! The server never sees plaintext: every document content is an
//! authenticated ciphertext bound to its id and revision.
//!
//! ## Key Invariants
//!
//! - A chunk is sent only after the previous one was accepted
//! - Received documents are inserted strictly in remote order
//! - Staged ciphertext is deleted once its document is delivered
//! - Nothing is retried; the caller decides
//!
//! ## Example
//!
//! ```no_run
//! use soledad_sync_engine::{
//!     Credentials, MemoryInserter, PinnedHttpClient, SyncConfig, SyncExchange, SyncTarget,
//! };
//! use soledad_crypto::{KeyManager, SecretsConfig};
//! use soledad_staging::FileStaging;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let keys = KeyManager::open(SecretsConfig::new("/var/lib/soledad", "alice@example.org"))?;
//! keys.ensure_identity("alice@example.org")?;
//! keys.ensure_secret()?;
//! keys.load_secret()?;
//!
//! let config = SyncConfig::new("https://sync.example.org:2323", "replica-1");
//! let client = PinnedHttpClient::from_file("/var/lib/soledad/server.pem", config.timeout)?;
//! let target = SyncTarget::new(
//!     config,
//!     client,
//!     Some(Credentials::new("user-uuid", "token")),
//!     Arc::new(keys.document_crypto()?),
//!     Arc::new(FileStaging::open("/var/lib/soledad/staging".as_ref())?),
//! )?;
//!
//! let replica = Arc::new(MemoryInserter::new());
//! let outcome = target
//!     .sync_exchange(SyncExchange::new(&[], 0, "", replica))
//!     .await?;
//! target.record_sync_info(outcome.generation, &outcome.transaction_id).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod decrypter;
mod encrypter;
mod error;
mod events;
mod fetch;
mod http;
mod inserter;
mod mock;
mod pinned;
mod send;
mod target;

pub use config::SyncConfig;
pub use decrypter::SyncDecrypterPool;
pub use encrypter::{PoolStats, SyncEncrypterPool};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, SyncEvent};
pub use fetch::{EnsureCallback, ReceiveOutcome};
pub use http::{Credentials, HttpClient, HttpRequest, HttpResponse, HttpTransport, Method};
pub use inserter::{DocInserter, InsertedDoc, MemoryInserter};
pub use mock::MockHttpClient;
pub use pinned::PinnedHttpClient;
pub use target::{ExchangeOutcome, SyncExchange, SyncStats, SyncTarget};
