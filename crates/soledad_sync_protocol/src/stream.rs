//! Receive response parsing.
//!
//! The remote answers each receive request with one line per element:
//!
//! ```text
//! [
//! {"new_generation": .., "new_transaction_id": .., "number_of_changes": ..},
//! {"id": .., "rev": .., "content": .., "gen": .., "trans_id": ..}
//! ]
//! ```
//!
//! The document line is present whenever `number_of_changes` is non-zero.

use crate::error::{ProtocolError, ProtocolResult};
use crate::messages::{ReceiveMetadata, ReceivedEntry};

/// A parsed receive response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveResponse {
    /// Remote position and session size.
    pub metadata: ReceiveMetadata,
    /// The document carried by this response.
    pub entry: Option<ReceivedEntry>,
}

fn strip_comma(line: &str) -> &str {
    line.trim_end().strip_suffix(',').unwrap_or(line.trim_end())
}

impl ReceiveResponse {
    /// Parses a receive response body.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::BrokenSyncStream`] for anything that is not
    /// a well-framed response.
    pub fn parse(bytes: &[u8]) -> ProtocolResult<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| ProtocolError::broken("response is not UTF-8"))?;
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();

        let data = match lines.as_slice() {
            [first, data @ .., last] if first.trim() == "[" && last.trim() == "]" => data,
            _ => return Err(ProtocolError::broken("response is not a framed array")),
        };
        let metadata_line = data
            .first()
            .ok_or_else(|| ProtocolError::broken("missing metadata line"))?;
        let metadata: ReceiveMetadata = serde_json::from_str(strip_comma(metadata_line))
            .map_err(|e| ProtocolError::broken(format!("bad metadata: {e}")))?;

        let entry = if metadata.number_of_changes > 0 {
            let line = data
                .get(1)
                .ok_or_else(|| ProtocolError::broken("missing document line"))?;
            let entry: ReceivedEntry = serde_json::from_str(strip_comma(line))
                .map_err(|e| ProtocolError::broken(format!("bad document line: {e}")))?;
            Some(entry)
        } else {
            None
        };

        let expected = 1 + usize::from(entry.is_some());
        if data.len() > expected {
            return Err(ProtocolError::broken(format!(
                "{} unexpected data lines",
                data.len() - expected
            )));
        }

        Ok(Self { metadata, entry })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_document() {
        let body = "[\r\n\
            {\"new_generation\": 9, \"new_transaction_id\": \"T-9\", \"number_of_changes\": 2},\r\n\
            {\"id\": \"doc-1\", \"rev\": \"r:1\", \"content\": \"{}\", \"gen\": 8, \"trans_id\": \"T-8\"}\r\n\
            ]";
        let response = ReceiveResponse::parse(body.as_bytes()).unwrap();
        assert_eq!(response.metadata.new_generation, 9);
        assert_eq!(response.metadata.number_of_changes, 2);
        assert_eq!(response.metadata.replica_uid, None);

        let entry = response.entry.unwrap();
        assert_eq!(entry.id, "doc-1");
        assert_eq!(entry.content.as_deref(), Some("{}"));
        assert_eq!(entry.gen, 8);
    }

    #[test]
    fn parse_without_changes() {
        let body = "[\r\n{\"new_generation\": 0, \"new_transaction_id\": \"\", \
                    \"number_of_changes\": 0, \"replica_uid\": \"remote-uid\"}\r\n]";
        let response = ReceiveResponse::parse(body.as_bytes()).unwrap();
        assert!(response.entry.is_none());
        assert_eq!(response.metadata.replica_uid.as_deref(), Some("remote-uid"));
    }

    #[test]
    fn parse_tombstone() {
        let body = "[\n{\"new_generation\": 2, \"new_transaction_id\": \"T\", \"number_of_changes\": 1},\n\
                    {\"id\": \"d\", \"rev\": \"r\", \"content\": null, \"gen\": 2, \"trans_id\": \"T\"}\n]";
        let entry = ReceiveResponse::parse(body.as_bytes()).unwrap().entry.unwrap();
        assert!(entry.content.is_none());
    }

    #[test]
    fn broken_streams() {
        let cases: &[&str] = &[
            "",
            "[",
            "{}",
            "[\r\n]",
            "[\r\n{\"new_generation\": 1}\r\n]",
            "[\r\nnot json\r\n]",
            // changes announced, document missing
            "[\r\n{\"new_generation\": 1, \"new_transaction_id\": \"T\", \"number_of_changes\": 1}\r\n]",
            // more than one document per response
            "[\r\n{\"new_generation\": 2, \"new_transaction_id\": \"T\", \"number_of_changes\": 2},\r\n\
             {\"id\": \"a\", \"rev\": \"1\", \"content\": null, \"gen\": 1, \"trans_id\": \"T\"},\r\n\
             {\"id\": \"b\", \"rev\": \"1\", \"content\": null, \"gen\": 2, \"trans_id\": \"T\"}\r\n]",
            // data after a metadata-only response
            "[\r\n{\"new_generation\": 1, \"new_transaction_id\": \"T\", \"number_of_changes\": 0},\r\n{}\r\n]",
            // document line without a revision
            "[\r\n{\"new_generation\": 1, \"new_transaction_id\": \"T\", \"number_of_changes\": 1},\r\n{\"id\": \"d\"}\r\n]",
        ];
        for body in cases {
            assert!(
                matches!(
                    ReceiveResponse::parse(body.as_bytes()),
                    Err(ProtocolError::BrokenSyncStream(_))
                ),
                "expected broken stream for {body:?}"
            );
        }
    }
}
