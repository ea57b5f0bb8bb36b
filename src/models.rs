//! Core data types shared by the document adapters, the index and the
//! pipeline stages.

use serde::{Deserialize, Serialize};

/// Source tag for documents that arrived with a request.
pub const UPLOAD_SOURCE: &str = "upload";

/// A unit of extracted text plus where it came from.
///
/// Produced by a document adapter and consumed only while building an
/// index. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Origin file name or object key (e.g. `"papers/rag.pdf"`).
    pub name: String,
    /// `"s3:<bucket>"` or [`UPLOAD_SOURCE`].
    pub source: String,
    pub content_type: String,
    pub text: String,
}

/// One uploaded file as received over the wire.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct UploadPayload {
    pub name: String,
    /// Base64-encoded file content.
    pub data: String,
}

/// A slice of a document's text, the unit that gets embedded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub document: String,
    pub chunk_index: usize,
    pub text: String,
}

/// A chunk returned by an index query, with its similarity score.
#[derive(Debug, Clone, PartialEq)]
pub struct Snippet {
    pub document: String,
    pub text: String,
    pub score: f32,
}
