//! # Soledad Staging
//!
//! Staging store for pipelined document crypto.
//!
//! The sync engine encrypts outgoing documents (and decrypts incoming ones)
//! ahead of the network exchange. The results are parked here, keyed by
//! `(doc_id, rev)`, until the document is confirmed sent or inserted.
//!
//! Stores are **opaque byte stores**: they do not know whether a value is
//! ciphertext, plaintext or a serialized record.
//!
//! ## Available Stores
//!
//! - [`InMemoryStaging`] - For testing and ephemeral sessions
//! - [`FileStaging`] - Survives process restarts, one file per entry
//!
//! ## Example
//!
//! ```rust
//! use soledad_staging::{InMemoryStaging, StageKey, StagingStore};
//!
//! let store = InMemoryStaging::new();
//! let key = StageKey::new("doc-1", "replica:1");
//! store.put(&key, b"ciphertext").unwrap();
//! assert_eq!(store.get(&key).unwrap().as_deref(), Some(&b"ciphertext"[..]));
//! store.delete(&key).unwrap();
//! store.delete(&key).unwrap(); // deleting twice is a no-op
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod store;

pub use error::{StagingError, StagingResult};
pub use file::FileStaging;
pub use memory::InMemoryStaging;
pub use store::{StageKey, StagingStore};
