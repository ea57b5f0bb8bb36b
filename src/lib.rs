//! # askdocs
//!
//! Question answering over documents. A question is answered by an LLM
//! using context retrieved from two places: a persistent index built once
//! from an S3 bucket, and a throwaway index built from PDFs uploaded with
//! the request.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────────────┐   ┌────────────┐
//! │ HTTP/CLI │──▶│ retrieve                  │──▶│  generate  │
//! │ handler  │   │  uploads ─▶ ephemeral idx │   │   (LLM)    │
//! └──────────┘   │  S3 ─▶ persistent idx     │   └────────────┘
//!                └──────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and env overrides |
//! | [`error`] | Failure taxonomy |
//! | [`models`] | Core data types |
//! | [`sources`] / [`connector_s3`] | Persistent corpus |
//! | [`uploads`] | Per-request PDF ingestion |
//! | [`extract`] | PDF, DOCX and plain-text extraction |
//! | [`chunk`] | Paragraph chunking |
//! | [`embedding`] | Embedding providers |
//! | [`index`] / [`persistent`] | Vector index and its snapshot |
//! | [`llm`] | Chat-completions client |
//! | [`retrieval`] / [`generation`] / [`pipeline`] | The two-step workflow |
//! | [`handler`] / [`server`] | Request handling and HTTP |
//! | [`app`] | Service wiring |

pub mod app;
pub mod chunk;
pub mod config;
pub mod connector_s3;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generation;
pub mod handler;
pub mod index;
pub mod llm;
pub mod logging;
pub mod models;
pub mod persistent;
pub mod pipeline;
pub mod retrieval;
pub mod server;
pub mod sources;
pub mod uploads;
