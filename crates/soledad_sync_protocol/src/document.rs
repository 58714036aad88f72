//! Documents as the sync exchange sees them.

/// A versioned document.
///
/// `content` is `None` for a tombstone (a deleted document). Documents are
/// immutable; a new revision is a new `Document`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Document identifier.
    pub doc_id: String,
    /// Revision identifier. A revision uniquely determines the content.
    pub rev: String,
    /// Serialized content, or `None` for a tombstone.
    pub content: Option<Vec<u8>>,
}

impl Document {
    /// Creates a live document.
    pub fn new(doc_id: impl Into<String>, rev: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            doc_id: doc_id.into(),
            rev: rev.into(),
            content: Some(content.into()),
        }
    }

    /// Creates a tombstone.
    pub fn tombstone(doc_id: impl Into<String>, rev: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            rev: rev.into(),
            content: None,
        }
    }

    /// Returns true if the document has been deleted.
    pub fn is_tombstone(&self) -> bool {
        self.content.is_none()
    }

    /// Returns the content bytes, if any.
    pub fn content(&self) -> Option<&[u8]> {
        self.content.as_deref()
    }
}

/// A changed document together with the local generation that changed it.
///
/// A send batch is a slice of these, ordered by generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedDoc {
    /// The document at its current revision.
    pub doc: Document,
    /// Generation at which the change happened.
    pub generation: u64,
    /// Transaction id paired with `generation`.
    pub transaction_id: String,
}

impl ChangedDoc {
    /// Creates a changed-document record.
    pub fn new(doc: Document, generation: u64, transaction_id: impl Into<String>) -> Self {
        Self {
            doc,
            generation,
            transaction_id: transaction_id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tombstone_has_no_content() {
        let doc = Document::tombstone("doc-1", "replica:2");
        assert!(doc.is_tombstone());
        assert_eq!(doc.content(), None);

        let live = Document::new("doc-1", "replica:1", b"{}".to_vec());
        assert!(!live.is_tombstone());
        assert_eq!(live.content(), Some(&b"{}"[..]));
    }
}
