//! The persistent-corpus capability.
//!
//! The persistent index is built from whatever a [`DocumentSource`]
//! returns. The production implementation is
//! [`S3Source`](crate::connector_s3::S3Source); tests substitute in-memory
//! sources that count how often they are fetched.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Document;

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Short label for logs (e.g. `"s3://papers/2024/"`).
    fn describe(&self) -> String;

    /// Fetch every document in the corpus.
    ///
    /// Authentication and connectivity failures propagate; this call is
    /// not retried by callers.
    async fn load(&self) -> Result<Vec<Document>>;
}
