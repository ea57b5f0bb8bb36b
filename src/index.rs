//! In-memory semantic index with a JSON snapshot format.
//!
//! A [`VectorIndex`] holds chunks and their embedding vectors and answers
//! top-k queries by brute-force cosine similarity. The same type serves the
//! persistent corpus (saved to and loaded from a snapshot directory) and
//! the per-request upload corpus (built, queried once, dropped).

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::chunk::chunk_text;
use crate::embedding::{cosine_similarity, embed_query, Embedder};
use crate::error::{with_deadline, RagError, Result, DEP_EMBEDDING};
use crate::models::{Chunk, Document, Snippet};

/// File name of the serialized index inside a snapshot directory.
pub const SNAPSHOT_FILE: &str = "index.json";

/// Settings that shape index construction and embedding calls.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub max_tokens: usize,
    pub batch_size: usize,
    pub embed_timeout_secs: u64,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            batch_size: 64,
            embed_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexedChunk {
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    /// Embedding model the vectors were produced with.
    model: String,
    /// Unix seconds.
    created_at: i64,
    entries: Vec<IndexedChunk>,
}

impl VectorIndex {
    /// Chunk, embed and index `documents`.
    ///
    /// An empty document set (or one with no text) produces an empty index
    /// without calling the embedder.
    pub async fn build(
        documents: &[Document],
        embedder: &dyn Embedder,
        options: &IndexOptions,
    ) -> Result<Self> {
        let chunks: Vec<Chunk> = documents
            .iter()
            .flat_map(|doc| chunk_text(&doc.name, &doc.text, options.max_tokens))
            .collect();

        let mut entries = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(options.batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = with_deadline(
                DEP_EMBEDDING,
                options.embed_timeout_secs,
                embedder.embed(&texts),
            )
            .await?;
            if vectors.len() != batch.len() {
                return Err(RagError::unavailable(
                    DEP_EMBEDDING,
                    format!(
                        "expected {} embeddings, got {}",
                        batch.len(),
                        vectors.len()
                    ),
                ));
            }
            entries.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(chunk, vector)| IndexedChunk { chunk, vector }),
            );
        }

        tracing::debug!(
            documents = documents.len(),
            chunks = entries.len(),
            "index built"
        );

        Ok(Self {
            model: embedder.model_name().to_string(),
            created_at: chrono::Utc::now().timestamp(),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Vector length of the stored entries, `None` for an empty index.
    pub fn dims(&self) -> Option<usize> {
        self.entries.first().map(|e| e.vector.len())
    }

    /// Return the `top_k` chunks most similar to `question`, best first.
    pub async fn query(
        &self,
        question: &str,
        top_k: usize,
        embedder: &dyn Embedder,
        options: &IndexOptions,
    ) -> Result<Vec<Snippet>> {
        if self.entries.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = with_deadline(
            DEP_EMBEDDING,
            options.embed_timeout_secs,
            embed_query(embedder, question),
        )
        .await?;

        let mut scored: Vec<(f32, &IndexedChunk)> = self
            .entries
            .iter()
            .map(|e| (cosine_similarity(&query_vec, &e.vector), e))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(top_k)
            .map(|(score, e)| Snippet {
                document: e.chunk.document.clone(),
                text: e.chunk.text.clone(),
                score,
            })
            .collect())
    }

    /// Serialize into `dir/index.json`, writing a temp file then renaming.
    pub async fn save(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        let tmp = dir.join(format!("{}.tmp", SNAPSHOT_FILE));
        tokio::fs::write(&tmp, serde_json::to_vec(self)?).await?;
        tokio::fs::rename(&tmp, dir.join(SNAPSHOT_FILE)).await?;
        Ok(())
    }

    pub async fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(SNAPSHOT_FILE);
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            RagError::internal(format!(
                "snapshot directory {} has no readable {}: {}",
                dir.display(),
                SNAPSHOT_FILE,
                e
            ))
        })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            RagError::internal(format!("corrupt snapshot {}: {}", path.display(), e))
        })
    }
}

/// Render snippets as one text block: each snippet's text under its
/// document name, separated by blank lines. Empty when there are none.
pub fn render_snippets(snippets: &[Snippet]) -> String {
    snippets
        .iter()
        .map(|s| format!("({})\n{}", s.document, s.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Embeds text as keyword counts over a fixed vocabulary.
    pub struct KeywordEmbedder {
        pub vocabulary: Vec<&'static str>,
        pub calls: AtomicUsize,
    }

    impl KeywordEmbedder {
        pub fn new(vocabulary: &[&'static str]) -> Self {
            Self {
                vocabulary: vocabulary.to_vec(),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Embedder for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keyword-test"
        }

        fn dims(&self) -> usize {
            self.vocabulary.len()
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let lower = t.to_lowercase();
                    self.vocabulary
                        .iter()
                        .map(|w| lower.matches(w).count() as f32)
                        .collect()
                })
                .collect())
        }
    }

    pub fn doc(name: &str, text: &str) -> Document {
        Document {
            name: name.to_string(),
            source: "test".to_string(),
            content_type: "text/plain".to_string(),
            text: text.to_string(),
        }
    }
}
