//! # docintel CLI
//!
//! ## Usage
//!
//! ```bash
//! docintel --config ./config/docintel.example.toml <command>
//! ```
//!
//! Without `--config` the built-in defaults apply (OCR on, model disabled).
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docintel detect <file>` | Report the detected document kind |
//! | `docintel extract <file>` | Extract text, falling back to OCR per page |
//! | `docintel chunk <file>` | Show the chunk layout of a document |
//! | `docintel analyze <intent> <file>` | Run an analysis intent |
//! | `docintel compare <a> <b>` | Compare two documents item by item |
//! | `docintel check [--require-ocr]` | Check model and OCR availability |
//! | `docintel completions <shell>` | Print shell completions |
//!
//! Results are printed as JSON on stdout. Logs go to stderr and follow
//! `RUST_LOG` (default `docintel=info`).

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docintel::cancel::CancelToken;
use docintel::config::{self, Config};
use docintel::models::{AnalysisIntent, AnalysisResult, AnalysisStatus, Document};
use docintel::pipeline::Pipeline;

#[derive(Parser)]
#[command(
    name = "docintel",
    about = "Document ingestion, OCR-backed text extraction, and LLM analysis",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect a file's document kind from its content.
    Detect {
        file: PathBuf,
        /// Declared kind or content-type, used only as a tiebreak.
        #[arg(long)]
        kind: Option<String>,
    },

    /// Extract text with per-page OCR fallback.
    Extract {
        file: PathBuf,
        #[arg(long)]
        kind: Option<String>,
        /// Print the full extraction result instead of the summary.
        #[arg(long)]
        full: bool,
    },

    /// Show how a document is chunked.
    Chunk {
        file: PathBuf,
        #[arg(long)]
        kind: Option<String>,
    },

    /// Analyze a document.
    Analyze {
        intent: IntentArg,
        file: PathBuf,
        /// Question for the `qa` intent.
        #[arg(long, short)]
        question: Option<String>,
    },

    /// Compare two documents (e.g. a resume against a job description).
    Compare { first: PathBuf, second: PathBuf },

    /// Check model provider and OCR availability.
    Check {
        /// Exit with an error when OCR cannot run.
        #[arg(long)]
        require_ocr: bool,
    },

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum IntentArg {
    Summarize,
    Entities,
    KeyElements,
    Qa,
    Skills,
    Experience,
}

impl From<IntentArg> for AnalysisIntent {
    fn from(arg: IntentArg) -> Self {
        match arg {
            IntentArg::Summarize => AnalysisIntent::Summarize,
            IntentArg::Entities => AnalysisIntent::ExtractEntities,
            IntentArg::KeyElements => AnalysisIntent::KeyElements,
            IntentArg::Qa => AnalysisIntent::Qa,
            IntentArg::Skills => AnalysisIntent::Skills,
            IntentArg::Experience => AnalysisIntent::Experience,
        }
    }
}

/// Upload metadata printed by `extract`.
#[derive(Serialize)]
struct ExtractSummary<'a> {
    document: &'a Document,
    method: docintel::models::ExtractionMethod,
    confidence: f32,
    stats: docintel::models::TextStats,
    warnings: &'a [docintel::models::ExtractionWarning],
    text: String,
}

#[derive(Serialize)]
struct ChunkSummary {
    index: usize,
    chars: usize,
    start: usize,
    end: usize,
    segments: std::ops::Range<usize>,
    overlap_len: usize,
    hard_split: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "docintel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "docintel", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };
    let pipeline = Pipeline::from_config(&cfg)?;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    match cli.command {
        Commands::Detect { file, kind } => {
            let document = load(&pipeline, &file, kind.as_deref())?;
            emit(&document)?;
        }
        Commands::Extract { file, kind, full } => {
            let document = load(&pipeline, &file, kind.as_deref())?;
            let extraction = pipeline.extract(&document, &cancel).await?;
            if full {
                emit(extraction.as_ref())?;
            } else {
                emit(&ExtractSummary {
                    document: &document,
                    method: extraction.method,
                    confidence: extraction.confidence,
                    stats: extraction.stats(),
                    warnings: &extraction.warnings,
                    text: extraction.full_text(),
                })?;
            }
        }
        Commands::Chunk { file, kind } => {
            let document = load(&pipeline, &file, kind.as_deref())?;
            let extraction = pipeline.extract(&document, &cancel).await?;
            let chunked = pipeline.chunk(&extraction)?;
            let summary: Vec<ChunkSummary> = chunked
                .chunks
                .iter()
                .map(|c| ChunkSummary {
                    index: c.index,
                    chars: c.text.chars().count(),
                    start: c.start,
                    end: c.end,
                    segments: c.segment_range.clone(),
                    overlap_len: c.overlap_len,
                    hard_split: c.hard_split,
                })
                .collect();
            emit(&summary)?;
        }
        Commands::Analyze {
            intent,
            file,
            question,
        } => {
            let document = load(&pipeline, &file, None)?;
            let result = pipeline
                .analyze(intent.into(), &[document], question, &cancel)
                .await?;
            report(&result)?;
        }
        Commands::Compare { first, second } => {
            let a = load(&pipeline, &first, None)?;
            let b = load(&pipeline, &second, None)?;
            let result = pipeline
                .analyze(AnalysisIntent::Compare, &[a, b], None, &cancel)
                .await?;
            report(&result)?;
        }
        Commands::Check { require_ocr } => {
            let health = pipeline.health().await;
            emit(&health)?;
            if require_ocr {
                pipeline.ensure_ocr().await?;
            }
        }
        // Printed before the config is loaded.
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn load(pipeline: &Pipeline, path: &Path, declared: Option<&str>) -> Result<Document> {
    let payload =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path.file_name().and_then(|n| n.to_str());
    Ok(pipeline.ingest(payload, filename, declared)?)
}

fn report(result: &AnalysisResult) -> Result<()> {
    emit(result)?;
    match result.status {
        AnalysisStatus::Complete | AnalysisStatus::Partial => Ok(()),
        AnalysisStatus::Failed => bail!("analysis failed: every model call failed"),
        AnalysisStatus::Cancelled => bail!("analysis cancelled"),
    }
}

/// Pretty JSON for terminals, compact JSON for pipes.
fn emit<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = if atty::is(atty::Stream::Stdout) {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", json);
    Ok(())
}
