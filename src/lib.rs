//! # mrtp
//!
//! Medical Report Translation Pipeline: turn a folder of office-document
//! medical reports into one JSON file of structured, multilingual records.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input dir
//!  │
//!  ├─ 1. Discover   list *.docx in a stable order
//!  ├─ 2. Convert    docx → PDF (headless LibreOffice, temp dir per document)
//!  ├─ 3. Resolve    PDF text layer, or OCR every page when it is too short
//!  ├─ 4. Extract    text → patient fields + per-organ captions (JSON)
//!  ├─ 5. Translate  captions → one mapping per target language
//!  └─ 6. Output     one JSON array, written atomically at the end
//! ```
//!
//! Every model call goes to one OpenAI-compatible chat-completion endpoint
//! (LM Studio on `localhost:1234` by default). Documents are processed one at
//! a time; a document that fails any stage is skipped and the batch goes on.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mrtp::{run_batch_to_file, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder()
//!         .model("google/gemma-3-12b")
//!         .build()?;
//!     let stats = run_batch_to_file("reports/", "out/reports.json", &config).await?;
//!     eprintln!("{}/{} documents", stats.succeeded, stats.documents_found);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `mrtp` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! mrtp = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod batch;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod report;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{ChatBackend, ChatMessage, ChatRequest, HttpChatBackend};
pub use batch::{run_batch, run_batch_sync, run_batch_to_file, write_reports, Pipeline};
pub use config::{KeyMismatchPolicy, Language, PipelineConfig, PipelineConfigBuilder};
pub use error::{DocumentError, FailureKind, PipelineError};
pub use pipeline::convert::{ConvertedPdf, DocumentConverter, SofficeConverter};
pub use pipeline::json::parse_llm_json_output;
pub use pipeline::render::{PageSource, PdfiumPageSource};
pub use pipeline::resolve::{MinLengthPolicy, OcrPolicy};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use report::{
    BatchOutput, BatchStats, Captions, DocumentOutcome, DocumentStage, FinalReport,
    SkippedDocument, StructuredRecord, TranslatedCaptions,
};
