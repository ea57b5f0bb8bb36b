//! Context retrieval: composes upload and persistent-corpus snippets into
//! the single context string handed to generation.

use async_trait::async_trait;
use std::sync::Arc;

use crate::embedding::Embedder;
use crate::error::Result;
use crate::index::{render_snippets, IndexOptions, VectorIndex};
use crate::models::UploadPayload;
use crate::persistent::PersistentIndex;
use crate::pipeline::{RequestState, Stage, StateUpdate};
use crate::uploads::load_uploaded_documents;

pub const UPLOADS_LABEL: &str = "Uploaded PDFs";
pub const PERSISTENT_LABEL: &str = "S3 Documents";
/// Context used when neither source produced anything.
pub const NO_CONTEXT: &str = "No context available.";

#[derive(Debug, Clone, PartialEq)]
pub struct ContextFragment {
    pub label: &'static str,
    pub text: String,
}

impl ContextFragment {
    pub fn render(&self) -> String {
        format!("[{}]\n{}", self.label, self.text)
    }
}

/// Join fragments with a blank line, or return [`NO_CONTEXT`].
pub fn compose_context(fragments: &[ContextFragment]) -> String {
    if fragments.is_empty() {
        return NO_CONTEXT.to_string();
    }
    fragments
        .iter()
        .map(ContextFragment::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// One side of retrieval: returns rendered snippets for `question`.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, question: &str, uploads: &[UploadPayload]) -> Result<String>;
}

/// Builds a throwaway index from the request's uploads and queries it.
pub struct UploadRetriever {
    embedder: Arc<dyn Embedder>,
    options: IndexOptions,
    top_k: usize,
}

impl UploadRetriever {
    pub fn new(embedder: Arc<dyn Embedder>, options: IndexOptions, top_k: usize) -> Self {
        Self {
            embedder,
            options,
            top_k,
        }
    }
}

#[async_trait]
impl Retriever for UploadRetriever {
    async fn retrieve(&self, question: &str, uploads: &[UploadPayload]) -> Result<String> {
        tracing::info!("building index from {} uploaded PDF(s)", uploads.len());
        let documents = load_uploaded_documents(uploads).await?;
        let index = VectorIndex::build(&documents, self.embedder.as_ref(), &self.options).await?;
        let snippets = index
            .query(question, self.top_k, self.embedder.as_ref(), &self.options)
            .await?;
        Ok(render_snippets(&snippets))
    }
}

/// Queries the shared persistent index.
pub struct PersistentRetriever {
    index: Arc<PersistentIndex>,
    embedder: Arc<dyn Embedder>,
    options: IndexOptions,
    top_k: usize,
}

impl PersistentRetriever {
    pub fn new(
        index: Arc<PersistentIndex>,
        embedder: Arc<dyn Embedder>,
        options: IndexOptions,
        top_k: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            options,
            top_k,
        }
    }
}

#[async_trait]
impl Retriever for PersistentRetriever {
    async fn retrieve(&self, question: &str, _uploads: &[UploadPayload]) -> Result<String> {
        let index = self.index.get().await?;
        let snippets = index
            .query(question, self.top_k, self.embedder.as_ref(), &self.options)
            .await?;
        Ok(render_snippets(&snippets))
    }
}

pub struct RetrievalStage {
    uploads: Arc<dyn Retriever>,
    persistent: Arc<dyn Retriever>,
}

impl RetrievalStage {
    pub fn new(uploads: Arc<dyn Retriever>, persistent: Arc<dyn Retriever>) -> Self {
        Self {
            uploads,
            persistent,
        }
    }
}

#[async_trait]
impl Stage for RetrievalStage {
    fn name(&self) -> &'static str {
        "retrieve"
    }

    async fn run(&self, state: &RequestState) -> Result<StateUpdate> {
        let from_uploads = async {
            if state.uploads.is_empty() {
                Ok(None)
            } else {
                self.uploads
                    .retrieve(&state.question, &state.uploads)
                    .await
                    .map(Some)
            }
        };
        let from_persistent = async {
            if state.use_persistent {
                self.persistent
                    .retrieve(&state.question, &[])
                    .await
                    .map(Some)
            } else {
                Ok(None)
            }
        };

        // Both run concurrently; the fragment order below stays fixed.
        let (uploaded, persisted) = tokio::try_join!(from_uploads, from_persistent)?;

        // A blank upload result is dropped; a queried corpus always
        // contributes its fragment, even when it rendered nothing.
        let mut fragments = Vec::with_capacity(2);
        if let Some(text) = uploaded.filter(|t| !t.trim().is_empty()) {
            fragments.push(ContextFragment {
                label: UPLOADS_LABEL,
                text,
            });
        }
        if let Some(text) = persisted {
            fragments.push(ContextFragment {
                label: PERSISTENT_LABEL,
                text,
            });
        }

        Ok(StateUpdate {
            context: Some(compose_context(&fragments)),
            response: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixed {
        text: &'static str,
        delay_ms: u64,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(text: &'static str, delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                text,
                delay_ms,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Retriever for Fixed {
        async fn retrieve(&self, _q: &str, _u: &[UploadPayload]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            Ok(self.text.to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl Retriever for Broken {
        async fn retrieve(&self, _q: &str, _u: &[UploadPayload]) -> Result<String> {
            Err(RagError::unavailable(crate::error::DEP_S3, "access denied"))
        }
    }

    fn upload() -> Vec<UploadPayload> {
        vec![UploadPayload {
            name: "a.pdf".into(),
            data: String::new(),
        }]
    }

    async fn context_of(stage: &RetrievalStage, state: RequestState) -> String {
        stage.run(&state).await.unwrap().context.unwrap()
    }

    #[tokio::test]
    async fn uploads_come_first_even_when_slower() {
        let stage = RetrievalStage::new(Fixed::new("from pdf", 80), Fixed::new("from s3", 0));
        let ctx = context_of(&stage, RequestState::new("q", upload(), true)).await;
        assert_eq!(ctx, "[Uploaded PDFs]\nfrom pdf\n\n[S3 Documents]\nfrom s3");
    }

    #[tokio::test]
    async fn sources_are_skipped_when_not_requested() {
        let uploads = Fixed::new("from pdf", 0);
        let s3 = Fixed::new("from s3", 0);
        let stage = RetrievalStage::new(uploads.clone(), s3.clone());

        let ctx = context_of(&stage, RequestState::new("q", Vec::new(), true)).await;
        assert_eq!(ctx, "[S3 Documents]\nfrom s3");
        assert_eq!(uploads.calls.load(Ordering::SeqCst), 0);

        let ctx = context_of(&stage, RequestState::new("q", upload(), false)).await;
        assert_eq!(ctx, "[Uploaded PDFs]\nfrom pdf");
        assert_eq!(s3.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sentinel_only_when_nothing_was_queried() {
        let stage = RetrievalStage::new(Fixed::new("", 0), Fixed::new("", 0));
        for _ in 0..3 {
            assert_eq!(
                context_of(&stage, RequestState::new("q", Vec::new(), false)).await,
                NO_CONTEXT
            );
            assert_eq!(
                context_of(&stage, RequestState::new("q", upload(), false)).await,
                NO_CONTEXT
            );
        }
    }

    #[tokio::test]
    async fn empty_corpus_result_keeps_its_fragment() {
        let stage = RetrievalStage::new(Fixed::new("  ", 0), Fixed::new("", 0));
        assert_eq!(
            context_of(&stage, RequestState::new("q", Vec::new(), true)).await,
            "[S3 Documents]\n"
        );
        assert_eq!(
            context_of(&stage, RequestState::new("q", upload(), true)).await,
            "[S3 Documents]\n"
        );
    }

    #[tokio::test]
    async fn persistent_failure_propagates() {
        let stage = RetrievalStage::new(Fixed::new("from pdf", 0), Arc::new(Broken));
        let err = stage
            .run(&RequestState::new("q", upload(), true))
            .await
            .unwrap_err();
        assert_eq!(err.dependency(), Some("s3"));
    }
}
