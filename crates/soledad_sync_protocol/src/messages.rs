//! JSON messages of the sync exchange.

use crate::document::Document;
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};

/// Content type of a send (put) request.
pub const PUT_CONTENT_TYPE: &str = "application/x-soledad-sync-put";

/// Content type of a receive (get) request.
pub const GET_CONTENT_TYPE: &str = "application/x-soledad-sync-get";

/// What the remote replica knows about itself and about this replica.
///
/// Returned by `GET <base>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncInfo {
    /// Remote replica uid.
    pub target_replica_uid: String,
    /// Remote replica generation.
    pub target_replica_generation: u64,
    /// Transaction id paired with `target_replica_generation`.
    #[serde(default)]
    pub target_replica_transaction_id: String,
    /// Last generation of this replica the remote has seen.
    pub source_replica_generation: u64,
    /// Transaction id paired with `source_replica_generation`.
    #[serde(default)]
    pub source_transaction_id: String,
}

impl SyncInfo {
    /// Decodes from a JSON response body.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Body of `PUT <base>`, recording this replica's position on the remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSyncInfo {
    /// Generation to record.
    pub generation: u64,
    /// Transaction id paired with `generation`.
    pub transaction_id: String,
}

impl RecordSyncInfo {
    /// Creates a record request.
    pub fn new(generation: u64, transaction_id: impl Into<String>) -> Self {
        Self {
            generation,
            transaction_id: transaction_id.into(),
        }
    }

    /// Encodes to JSON.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// First element of every send and receive request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncHeader {
    /// Last remote generation this replica has seen.
    pub last_known_generation: u64,
    /// Transaction id paired with `last_known_generation`.
    pub last_known_trans_id: String,
    /// Identifier of this sync session.
    pub sync_id: String,
    /// Asks the remote to create the database if it does not exist.
    pub ensure: bool,
}

impl SyncHeader {
    /// Creates a header.
    pub fn new(
        last_known_generation: u64,
        last_known_trans_id: impl Into<String>,
        sync_id: impl Into<String>,
        ensure: bool,
    ) -> Self {
        Self {
            last_known_generation,
            last_known_trans_id: last_known_trans_id.into(),
            sync_id: sync_id.into(),
            ensure,
        }
    }
}

/// One document in a send request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEntry {
    /// Document id.
    pub id: String,
    /// Document revision.
    pub rev: String,
    /// Encrypted content, `None` for a tombstone.
    pub content: Option<String>,
    /// Generation of the change.
    pub gen: u64,
    /// Transaction id of the change.
    pub trans_id: String,
    /// Number of documents in the whole send.
    pub number_of_docs: usize,
    /// 1-based position of this document in the whole send.
    pub doc_idx: usize,
}

/// Second element of a receive request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveProgress {
    /// Number of documents already received in this session.
    pub received: usize,
}

/// The remote position after a send request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResponse {
    /// Remote generation after applying the chunk.
    pub new_generation: u64,
    /// Transaction id paired with `new_generation`.
    pub new_transaction_id: String,
}

impl SendResponse {
    /// Decodes a send response: a JSON array whose first element carries
    /// the new remote position.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        let mut values: Vec<serde_json::Value> = serde_json::from_slice(bytes)?;
        if values.is_empty() {
            return Err(ProtocolError::MissingField("new_generation"));
        }
        let first = values.swap_remove(0);
        if first.get("new_generation").is_none() {
            return Err(ProtocolError::MissingField("new_generation"));
        }
        if first.get("new_transaction_id").is_none() {
            return Err(ProtocolError::MissingField("new_transaction_id"));
        }
        Ok(serde_json::from_value(first)?)
    }
}

/// Metadata line of a receive response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveMetadata {
    /// Remote generation.
    pub new_generation: u64,
    /// Transaction id paired with `new_generation`.
    pub new_transaction_id: String,
    /// Total number of documents the remote will send in this session.
    pub number_of_changes: usize,
    /// Remote replica uid, sent when the remote database was just created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replica_uid: Option<String>,
}

/// Document line of a receive response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedEntry {
    /// Document id.
    pub id: String,
    /// Document revision.
    pub rev: String,
    /// Content as stored remotely, `None` for a tombstone.
    pub content: Option<String>,
    /// Remote generation of the change.
    pub gen: u64,
    /// Remote transaction id of the change.
    pub trans_id: String,
}

impl ReceivedEntry {
    /// Converts into a [`Document`].
    pub fn into_document(self) -> Document {
        Document {
            doc_id: self.id,
            rev: self.rev,
            content: self.content.map(String::into_bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_info_decode() {
        let body = br#"{
            "target_replica_uid": "remote",
            "target_replica_generation": 7,
            "target_replica_transaction_id": "T-7",
            "source_replica_generation": 3,
            "source_transaction_id": "T-3"
        }"#;
        let info = SyncInfo::decode(body).unwrap();
        assert_eq!(info.target_replica_uid, "remote");
        assert_eq!(info.target_replica_generation, 7);
        assert_eq!(info.source_replica_generation, 3);
        assert_eq!(info.source_transaction_id, "T-3");
    }

    #[test]
    fn sync_info_fresh_remote() {
        let body = br#"{"target_replica_uid": "r", "target_replica_generation": 0,
                        "source_replica_generation": 0}"#;
        let info = SyncInfo::decode(body).unwrap();
        assert_eq!(info.target_replica_transaction_id, "");
        assert_eq!(info.source_transaction_id, "");
    }

    #[test]
    fn record_sync_info_encode() {
        let bytes = RecordSyncInfo::new(12, "T-12").encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["generation"], 12);
        assert_eq!(value["transaction_id"], "T-12");
    }

    #[test]
    fn send_response_uses_first_element() {
        let body = br#"[{"new_generation": 5, "new_transaction_id": "T-5"}, {"extra": 1}]"#;
        let response = SendResponse::decode(body).unwrap();
        assert_eq!(response.new_generation, 5);
        assert_eq!(response.new_transaction_id, "T-5");
    }

    #[test]
    fn send_response_missing_fields() {
        assert!(matches!(
            SendResponse::decode(b"[]"),
            Err(ProtocolError::MissingField("new_generation"))
        ));
        assert!(matches!(
            SendResponse::decode(br#"[{"new_generation": 1}]"#),
            Err(ProtocolError::MissingField("new_transaction_id"))
        ));
        assert!(matches!(
            SendResponse::decode(b"not json"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn received_entry_into_document() {
        let entry = ReceivedEntry {
            id: "doc".into(),
            rev: "r:1".into(),
            content: None,
            gen: 4,
            trans_id: "T-4".into(),
        };
        assert!(entry.into_document().is_tombstone());
    }
}
