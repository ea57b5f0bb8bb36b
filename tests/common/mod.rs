//! Fakes and helpers shared by the integration tests.
#![allow(dead_code)]

use askdocs::app::Services;
use askdocs::config::Config;
use askdocs::embedding::Embedder;
use askdocs::error::{RagError, Result};
use askdocs::llm::LanguageModel;
use askdocs::models::Document;
use askdocs::sources::DocumentSource;
use async_trait::async_trait;
use base64::Engine;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ─── Fake services ──────────────────────────────────────────────────

/// Embeds text as keyword counts over a fixed vocabulary.
pub struct KeywordEmbedder;

const VOCABULARY: &[&str] = &["rag", "retrieval", "generation", "pasta", "invoice", "phrase"];

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dims(&self) -> usize {
        VOCABULARY.len()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                VOCABULARY
                    .iter()
                    .map(|w| lower.matches(w).count() as f32)
                    .collect()
            })
            .collect())
    }
}

/// In-memory corpus that counts how often it is fetched.
pub struct MemorySource {
    docs: Vec<Document>,
    fail: bool,
    fetches: AtomicUsize,
}

impl MemorySource {
    pub fn new(docs: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            docs: docs
                .iter()
                .map(|(name, text)| Document {
                    name: name.to_string(),
                    source: "s3:test".to_string(),
                    content_type: "text/plain".to_string(),
                    text: text.to_string(),
                })
                .collect(),
            fail: false,
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            docs: Vec::new(),
            fail: true,
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    fn describe(&self) -> String {
        "memory://test".to_string()
    }

    async fn load(&self) -> Result<Vec<Document>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RagError::unavailable("s3", "HTTP 403: AccessDenied"));
        }
        Ok(self.docs.clone())
    }
}

/// Returns a canned answer and keeps every prompt it was sent.
pub struct RecordingModel {
    answer: String,
    prompts: Mutex<Vec<String>>,
}

impl RecordingModel {
    pub fn new(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: answer.to_string(),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for RecordingModel {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.answer.clone())
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

pub fn test_config(tmp: &TempDir) -> Config {
    let root = tmp.path();
    let config_content = format!(
        r#"
[server]
bind = "127.0.0.1:0"
static_dir = "{}"

[storage]
snapshot_dir = "{}"

[s3]
bucket = "test-bucket"

[retrieval]
top_k = 3
"#,
        root.join("static").display(),
        root.join("storage").display()
    );
    toml::from_str(&config_content).unwrap()
}

pub fn services(
    cfg: &Config,
    source: Arc<MemorySource>,
    model: Arc<RecordingModel>,
) -> Services {
    Services::new(cfg.clone(), source, Arc::new(KeywordEmbedder), model)
}

/// Minimal single-page PDF whose only text is `phrase`.
/// Offsets in the xref table are computed so pdf-extract can parse it.
pub fn pdf_with_text(phrase: &str) -> Vec<u8> {
    let content = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            content.len(),
            content
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

pub fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}
