//! The process-wide persistent index.
//!
//! Policy: a non-empty snapshot directory is loaded as-is; otherwise the
//! corpus is fetched from the [`DocumentSource`], indexed, and written to
//! the snapshot directory. The first successful result is cached for the
//! lifetime of the [`PersistentIndex`]. Concurrent first callers wait on a
//! single build; a failed build caches nothing, so the next caller retries.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::index::{IndexOptions, VectorIndex};
use crate::sources::DocumentSource;

pub struct PersistentIndex {
    snapshot_dir: PathBuf,
    source: Arc<dyn DocumentSource>,
    embedder: Arc<dyn Embedder>,
    options: IndexOptions,
    cell: OnceCell<Arc<VectorIndex>>,
}

impl PersistentIndex {
    pub fn new(
        snapshot_dir: PathBuf,
        source: Arc<dyn DocumentSource>,
        embedder: Arc<dyn Embedder>,
        options: IndexOptions,
    ) -> Self {
        Self {
            snapshot_dir,
            source,
            embedder,
            options,
            cell: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<Arc<VectorIndex>> {
        self.cell
            .get_or_try_init(|| async { self.load_or_build().await.map(Arc::new) })
            .await
            .cloned()
    }

    async fn load_or_build(&self) -> Result<VectorIndex> {
        if snapshot_is_populated(&self.snapshot_dir) {
            tracing::info!(dir = %self.snapshot_dir.display(), "loading index from snapshot");
            let index = VectorIndex::load(&self.snapshot_dir).await?;
            if let Some(dims) = index.dims() {
                if dims != self.embedder.dims() {
                    return Err(RagError::internal(format!(
                        "snapshot in {} holds {}-dimensional vectors but embedder {} produces {}; \
                         run `askdocs index rebuild`",
                        self.snapshot_dir.display(),
                        dims,
                        self.embedder.model_name(),
                        self.embedder.dims()
                    )));
                }
            }
            if index.model() != self.embedder.model_name() {
                tracing::warn!(
                    snapshot_model = index.model(),
                    embedder_model = self.embedder.model_name(),
                    "snapshot was built with a different embedding model"
                );
            }
            return Ok(index);
        }

        tracing::info!(source = %self.source.describe(), "building index from S3");
        // Each S3 call carries its own deadline inside the source.
        let documents = self.source.load().await?;
        let index = VectorIndex::build(&documents, self.embedder.as_ref(), &self.options).await?;
        index.save(&self.snapshot_dir).await?;
        tracing::info!(
            documents = documents.len(),
            chunks = index.len(),
            dir = %self.snapshot_dir.display(),
            "snapshot written"
        );
        Ok(index)
    }
}

/// True when `dir` exists and has at least one entry.
pub fn snapshot_is_populated(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// Remove the snapshot directory so the next [`PersistentIndex::get`]
/// rebuilds from the source.
pub fn clear_snapshot(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
