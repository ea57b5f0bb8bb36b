//! Per-request upload ingestion.
//!
//! Uploaded PDFs arrive base64-encoded. Each request gets its own
//! temporary directory: payloads are decoded and written there, then every
//! `*.pdf` file in the directory is extracted into a [`Document`]. The
//! directory is a [`TempDir`] guard, so it is removed when this function
//! returns, whether extraction succeeded or not.
//!
//! A payload that fails to decode or extract is skipped with a warning;
//! the rest of the batch still loads.

use base64::Engine;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::error::{RagError, Result};
use crate::extract::{extract_text, MIME_PDF};
use crate::models::{Document, UploadPayload, UPLOAD_SOURCE};

/// Load uploads inside a fresh directory under the system temp dir.
pub async fn load_uploaded_documents(payloads: &[UploadPayload]) -> Result<Vec<Document>> {
    let dir = TempDir::new()?;
    load_into(dir, payloads).await
}

/// Same as [`load_uploaded_documents`], rooted at `parent`.
pub async fn load_uploaded_documents_in(
    parent: &Path,
    payloads: &[UploadPayload],
) -> Result<Vec<Document>> {
    let dir = TempDir::new_in(parent)?;
    load_into(dir, payloads).await
}

async fn load_into(dir: TempDir, payloads: &[UploadPayload]) -> Result<Vec<Document>> {
    for (i, payload) in payloads.iter().enumerate() {
        let bytes = match decode_payload(payload) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "skipping upload");
                continue;
            }
        };
        let path = unique_path(dir.path(), &sanitize_name(&payload.name, i), i).await;
        tokio::fs::write(&path, bytes).await?;
    }

    let mut documents = Vec::new();
    for path in pdf_files(dir.path()) {
        match extract_pdf(path.clone()).await {
            Ok(doc) => documents.push(doc),
            Err(e) => tracing::warn!(error = %e, "skipping upload"),
        }
    }

    // Removal errors are not the caller's problem.
    if let Err(e) = dir.close() {
        tracing::debug!(error = %e, "failed to remove upload directory");
    }
    Ok(documents)
}

fn decode_payload(payload: &UploadPayload) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(payload.data.trim())
        .map_err(|e| RagError::Decode {
            name: payload.name.clone(),
            message: format!("invalid base64: {}", e),
        })
}

/// Keep only the final path component so a crafted name can't escape the
/// upload directory.
fn sanitize_name(name: &str, index: usize) -> String {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && *n != "." && *n != "..")
        .map(str::to_string)
        .unwrap_or_else(|| format!("upload-{}.pdf", index))
}

async fn unique_path(dir: &Path, name: &str, index: usize) -> PathBuf {
    let path = dir.join(name);
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        dir.join(format!("{}-{}", index, name))
    } else {
        path
    }
}

fn pdf_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    files.sort();
    files
}

async fn extract_pdf(path: PathBuf) -> Result<Document> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let task_name = name.clone();
    let joined = tokio::task::spawn_blocking(move || -> Result<String> {
        let bytes = std::fs::read(&path)?;
        extract_text(&bytes, MIME_PDF).map_err(|e| RagError::Decode {
            name: task_name,
            message: e.to_string(),
        })
    })
    .await;

    let text = match joined {
        Ok(res) => res?,
        Err(e) => {
            return Err(RagError::Decode {
                name,
                message: format!("extractor panicked: {}", e),
            })
        }
    };

    Ok(Document {
        name,
        source: UPLOAD_SOURCE.to_string(),
        content_type: MIME_PDF.to_string(),
        text,
    })
}
