//! # askdocs CLI
//!
//! ```bash
//! askdocs --config ./config/askdocs.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `askdocs serve` | Start the HTTP server |
//! | `askdocs ask "<question>"` | Answer one question from the terminal |
//! | `askdocs index build` | Build (or load) the persistent snapshot |
//! | `askdocs index rebuild` | Clear the snapshot and build it again |
//! | `askdocs index status` | Show what the snapshot contains |
//! | `askdocs models` | List models offered by the LLM endpoint |

use anyhow::Context;
use base64::Engine;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use askdocs::app::Services;
use askdocs::config::{self, Config};
use askdocs::handler::{handle_ask, AskRequest};
use askdocs::index::VectorIndex;
use askdocs::llm::ChatCompletionsModel;
use askdocs::models::UploadPayload;
use askdocs::persistent::{clear_snapshot, snapshot_is_populated};
use askdocs::{logging, server};

/// Ask questions over an S3 document corpus and uploaded PDFs.
#[derive(Parser)]
#[command(name = "askdocs", version)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/askdocs.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve,

    /// Answer a single question and print the result.
    Ask {
        question: String,

        /// PDF to include as an upload. Repeatable.
        #[arg(long = "pdf")]
        pdfs: Vec<PathBuf>,

        /// Query the persistent corpus. Defaults to true when no --pdf is given.
        #[arg(long)]
        use_s3: Option<bool>,
    },

    /// Manage the persistent index snapshot.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// List model ids offered by the configured LLM endpoint.
    Models,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Load the snapshot, or build it from S3 if none exists.
    Build,
    /// Delete the snapshot and build it from S3.
    Rebuild,
    /// Print snapshot location, chunk count and embedding model.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            let services = Services::from_config(&cfg)?;
            server::run_server(&services).await?;
            services.shutdown();
        }
        Commands::Ask {
            question,
            pdfs,
            use_s3,
        } => {
            let services = Services::from_config(&cfg)?;
            let request = AskRequest {
                question: Some(question),
                pdf_files: read_uploads(&pdfs)?,
                use_s3,
            };
            let response = handle_ask(&services.pipeline, request).await?;
            println!("{}", response.response);
            services.shutdown();
        }
        Commands::Index { action } => run_index(&cfg, action).await?,
        Commands::Models => {
            let model = ChatCompletionsModel::new(&cfg.llm)?;
            for id in model.list_models().await? {
                println!("{}", id);
            }
        }
    }

    Ok(())
}

async fn run_index(cfg: &Config, action: IndexAction) -> anyhow::Result<()> {
    let dir = cfg.storage.snapshot_dir.clone();
    match action {
        IndexAction::Status => {
            println!("snapshot: {}", dir.display());
            if !snapshot_is_populated(&dir) {
                println!("status:   empty (built from S3 on first request)");
                return Ok(());
            }
            let index = VectorIndex::load(&dir).await?;
            let created = chrono::DateTime::<chrono::Utc>::from_timestamp(index.created_at(), 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| index.created_at().to_string());
            println!("chunks:   {}", index.len());
            println!("model:    {}", index.model());
            println!("created:  {}", created);
        }
        IndexAction::Build | IndexAction::Rebuild => {
            if matches!(action, IndexAction::Rebuild) {
                clear_snapshot(&dir)
                    .with_context(|| format!("failed to clear {}", dir.display()))?;
            }
            let services = Services::from_config(cfg)?;
            let index = services.persistent.get().await?;
            println!("{} chunks in {}", index.len(), dir.display());
            services.shutdown();
        }
    }
    Ok(())
}

fn read_uploads(paths: &[PathBuf]) -> anyhow::Result<Vec<UploadPayload>> {
    paths
        .iter()
        .map(|path| -> anyhow::Result<UploadPayload> {
            let bytes =
                std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(UploadPayload {
                name,
                data: base64::engine::general_purpose::STANDARD.encode(bytes),
            })
        })
        .collect()
}
