//! # Soledad Sync Protocol
//!
//! Wire format of the Soledad sync exchange.
//!
//! This crate provides:
//! - `Document` and `ChangedDoc` for the documents being exchanged
//! - Sync info messages (`SyncInfo`, `RecordSyncInfo`)
//! - An append-only send body builder and its chunk iterator
//! - The receive response parser
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod body;
mod document;
mod error;
mod messages;
mod stream;

pub use body::{receive_body, BodyChunk, Chunks, CompletedBody, RequestBodyBuilder};
pub use document::{ChangedDoc, Document};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ReceiveMetadata, ReceiveProgress, ReceivedEntry, RecordSyncInfo, SendEntry, SendResponse,
    SyncHeader, SyncInfo, GET_CONTENT_TYPE, PUT_CONTENT_TYPE,
};
pub use stream::ReceiveResponse;
