//! Request body framing.
//!
//! A request body is a JSON array written one element per line:
//!
//! ```text
//! [\r\n<header>,\r\n<entry>,\r\n<entry>\r\n]
//! ```
//!
//! The send body is assembled once with [`RequestBodyBuilder`] and then
//! cut into per-request chunks with [`CompletedBody::chunks`]. Every chunk
//! repeats the header.

use crate::error::ProtocolResult;
use crate::messages::{ReceiveProgress, SendEntry, SyncHeader};
use std::ops::Range;

const OPEN: &str = "[";
const CLOSE: &str = "\r\n]";
const SEPARATOR: &str = ",\r\n";
const FIRST: &str = "\r\n";

fn frame<'a>(header: &str, entries: impl Iterator<Item = &'a str>) -> String {
    let mut body = String::from(OPEN);
    body.push_str(FIRST);
    body.push_str(header);
    for entry in entries {
        body.push_str(SEPARATOR);
        body.push_str(entry);
    }
    body.push_str(CLOSE);
    body
}

/// Builds the body of a receive request: the header plus how many
/// documents have already been received.
pub fn receive_body(header: &SyncHeader, received: usize) -> ProtocolResult<String> {
    let header = serde_json::to_string(header)?;
    let progress = serde_json::to_string(&ReceiveProgress { received })?;
    Ok(frame(&header, std::iter::once(progress.as_str())))
}

/// Append-only builder of a send body.
#[derive(Debug, Clone)]
pub struct RequestBodyBuilder {
    header: String,
    entries: Vec<String>,
}

impl RequestBodyBuilder {
    /// Starts a body with `header`.
    pub fn new(header: &SyncHeader) -> ProtocolResult<Self> {
        Ok(Self {
            header: serde_json::to_string(header)?,
            entries: Vec::new(),
        })
    }

    /// Appends one document entry.
    pub fn push(&mut self, entry: &SendEntry) -> ProtocolResult<()> {
        self.entries.push(serde_json::to_string(entry)?);
        Ok(())
    }

    /// Number of entries appended so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entry has been appended.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Freezes the body.
    pub fn finish(self) -> CompletedBody {
        CompletedBody {
            header: self.header,
            entries: self.entries,
        }
    }
}

/// A finished send body, ready to be cut into requests.
#[derive(Debug, Clone)]
pub struct CompletedBody {
    header: String,
    entries: Vec<String>,
}

impl CompletedBody {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The whole body as a single request.
    pub fn render(&self) -> String {
        frame(&self.header, self.entries.iter().map(String::as_str))
    }

    /// Cuts the body into request bodies of at most `chunk_size` entries.
    ///
    /// With `max_chunk_bytes` set, a chunk also stops growing before it
    /// would exceed that many bytes, but always carries at least one entry.
    /// A `chunk_size` of zero is treated as one. An empty body yields no
    /// chunks.
    pub fn chunks(&self, chunk_size: usize, max_chunk_bytes: Option<usize>) -> Chunks<'_> {
        Chunks {
            body: self,
            next: 0,
            chunk_size: chunk_size.max(1),
            max_chunk_bytes,
        }
    }
}

/// One request body cut from a [`CompletedBody`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyChunk {
    /// The framed request body.
    pub body: String,
    /// Indices (0-based) of the entries it carries.
    pub entries: Range<usize>,
}

/// Iterator returned by [`CompletedBody::chunks`].
#[derive(Debug)]
pub struct Chunks<'a> {
    body: &'a CompletedBody,
    next: usize,
    chunk_size: usize,
    max_chunk_bytes: Option<usize>,
}

impl Iterator for Chunks<'_> {
    type Item = BodyChunk;

    fn next(&mut self) -> Option<BodyChunk> {
        let entries = &self.body.entries;
        if self.next >= entries.len() {
            return None;
        }

        let start = self.next;
        let mut size = OPEN.len() + FIRST.len() + self.body.header.len() + CLOSE.len();
        let mut end = start;
        while end < entries.len() && end - start < self.chunk_size {
            let grown = size + SEPARATOR.len() + entries[end].len();
            if end > start && self.max_chunk_bytes.is_some_and(|max| grown > max) {
                break;
            }
            size = grown;
            end += 1;
        }

        self.next = end;
        Some(BodyChunk {
            body: frame(
                &self.body.header,
                entries[start..end].iter().map(String::as_str),
            ),
            entries: start..end,
        })
    }
}
