//! Batch orchestration entry points.
//!
//! Documents are processed strictly one after another: every network call
//! for a document finishes before the next document starts, and the backend
//! never sees two requests at once. A document that fails any stage is
//! skipped; the batch itself only fails when it cannot start or when nothing
//! succeeded.

use crate::backend::{ChatBackend, HttpChatBackend};
use crate::config::{Language, PipelineConfig};
use crate::error::{DocumentError, PipelineError};
use crate::pipeline::convert::{DocumentConverter, SofficeConverter};
use crate::pipeline::discover::{discover_documents, display_name};
use crate::pipeline::extract::FieldExtractor;
use crate::pipeline::ocr::OcrAdapter;
use crate::pipeline::render::{PageSource, PdfiumPageSource};
use crate::pipeline::resolve::{MinLengthPolicy, OcrPolicy, ResolvedText, TextSourceResolver};
use crate::pipeline::translate::Translator;
use crate::progress::ProgressCallback;
use crate::report::{
    BatchOutput, BatchStats, DocumentOutcome, DocumentStage, FinalReport, SkippedDocument,
    TranslatedCaptions,
};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// All stages wired together for one batch.
pub struct Pipeline {
    converter: Arc<dyn DocumentConverter>,
    resolver: TextSourceResolver,
    extractor: FieldExtractor,
    translator: Translator,
    source_language: Language,
    target_languages: Vec<Language>,
    progress: Option<ProgressCallback>,
}

impl Pipeline {
    /// Build the stages, using injected collaborators where the config has them.
    ///
    /// # Errors
    /// [`PipelineError::BackendNotConfigured`] when the HTTP client cannot be
    /// built, [`PipelineError::PdfiumBindingFailed`] when no page source is
    /// injected and pdfium cannot be loaded.
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let backend = resolve_backend(config)?;
        let converter: Arc<dyn DocumentConverter> = match config.converter {
            Some(ref c) => Arc::clone(c),
            None => Arc::new(SofficeConverter::from_config(config)),
        };
        let pages: Arc<dyn PageSource> = match config.page_source {
            Some(ref p) => Arc::clone(p),
            None => Arc::new(PdfiumPageSource::from_config(config)?),
        };
        let policy: Arc<dyn OcrPolicy> = match config.ocr_policy {
            Some(ref p) => Arc::clone(p),
            None => Arc::new(MinLengthPolicy::new(config.ocr_threshold)),
        };

        let ocr = OcrAdapter::new(Arc::clone(&backend), config);
        Ok(Self {
            converter,
            resolver: TextSourceResolver::new(pages, ocr, policy, config),
            extractor: FieldExtractor::new(Arc::clone(&backend), config),
            translator: Translator::new(backend, config),
            source_language: config.source_language.clone(),
            target_languages: config.target_languages.clone(),
            progress: config.progress_callback.clone(),
        })
    }

    /// Run one document to a terminal state.
    pub async fn process_document(&self, path: &Path) -> DocumentOutcome {
        self.process_indexed(path, 1, 1).await
    }

    /// Run every document in order and collect the outcomes.
    pub async fn process_documents(&self, paths: &[PathBuf]) -> BatchOutput {
        let total = paths.len();
        if let Some(ref cb) = self.progress {
            cb.on_batch_start(total);
        }

        let mut outcomes = Vec::with_capacity(total);
        for (idx, path) in paths.iter().enumerate() {
            outcomes.push(self.process_indexed(path, idx + 1, total).await);
        }

        let output = BatchOutput::from_outcomes(outcomes);
        if let Some(ref cb) = self.progress {
            cb.on_batch_complete(total, output.stats.succeeded);
        }
        output
    }

    async fn process_indexed(&self, path: &Path, index: usize, total: usize) -> DocumentOutcome {
        let mut job = DocumentJob::new(display_name(path), self.progress.as_ref());
        info!("[{}/{}] Processing {}", index, total, job.name);
        if let Some(ref cb) = self.progress {
            cb.on_document_start(index, total, &job.name);
        }

        match self.run_stages(path, &mut job).await {
            Ok((report, resolved)) => {
                job.advance(DocumentStage::Succeeded);
                if let Some(ref cb) = self.progress {
                    cb.on_document_complete(index, total, &job.name);
                }
                DocumentOutcome::Succeeded {
                    report,
                    used_ocr: resolved.used_ocr,
                    ocr_pages: resolved.ocr_pages,
                    ocr_pages_failed: resolved.ocr_pages_failed,
                }
            }
            Err(error) => {
                let last_stage = job.stage.clone();
                warn!(
                    document = %job.name,
                    stage = %last_stage,
                    kind = %error.kind(),
                    "skipping document: {}",
                    error
                );
                if let Some(raw) = error.raw_response() {
                    debug!(document = %job.name, "raw response: {}", raw);
                }
                if let Some(ref cb) = self.progress {
                    cb.on_document_skipped(index, total, &job.name, &last_stage, &error);
                }
                job.advance(DocumentStage::Skipped);
                DocumentOutcome::Skipped(SkippedDocument {
                    source_file: job.name,
                    last_stage,
                    kind: error.kind(),
                    error,
                })
            }
        }
    }

    async fn run_stages(
        &self,
        path: &Path,
        job: &mut DocumentJob<'_>,
    ) -> Result<(FinalReport, ResolvedText), DocumentError> {
        let pdf = self.converter.to_pdf(path).await?;
        job.advance(DocumentStage::Converted);

        let resolved = self.resolver.resolve(pdf.path(), &job.name).await?;
        // The converted PDF is no longer needed once the text is known.
        drop(pdf);
        job.advance(DocumentStage::TextResolved {
            used_ocr: resolved.used_ocr,
        });

        let record = self.extractor.extract(&resolved.text).await?;
        job.advance(DocumentStage::FieldsExtracted);

        let mut translations = Vec::with_capacity(self.target_languages.len());
        for language in &self.target_languages {
            let captions = self.translator.translate(&record.captions, language).await?;
            job.advance(DocumentStage::Translated {
                language: language.code.clone(),
            });
            translations.push(TranslatedCaptions {
                language: language.clone(),
                captions,
            });
        }

        let report = FinalReport::new(
            job.name.clone(),
            record,
            self.source_language.clone(),
            translations,
        );
        Ok((report, resolved))
    }
}

/// Stage tracking for one document.
struct DocumentJob<'a> {
    name: String,
    stage: DocumentStage,
    progress: Option<&'a ProgressCallback>,
}

impl<'a> DocumentJob<'a> {
    fn new(name: String, progress: Option<&'a ProgressCallback>) -> Self {
        Self {
            name,
            stage: DocumentStage::Ingested,
            progress,
        }
    }

    fn advance(&mut self, stage: DocumentStage) {
        debug!(document = %self.name, "{} → {}", self.stage, stage);
        if let Some(cb) = self.progress {
            cb.on_stage(&self.name, &stage);
        }
        self.stage = stage;
    }
}

/// Process every matching document in `input_dir`.
///
/// # Errors
/// Only run-level failures: a missing or unreadable directory, no matching
/// files, or a pipeline that cannot be constructed. Per-document failures end
/// up in [`BatchOutput::skipped`].
pub async fn run_batch(
    input_dir: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<BatchOutput, PipelineError> {
    let start = Instant::now();
    let input_dir = input_dir.as_ref();
    info!("Starting batch: {}", input_dir.display());

    let files = discover_documents(input_dir, &config.input_extensions)?;
    if files.is_empty() {
        return Err(PipelineError::NoInputFiles {
            path: input_dir.to_path_buf(),
            extensions: describe_extensions(&config.input_extensions),
        });
    }
    info!("Found {} documents", files.len());

    let pipeline = Pipeline::new(config)?;
    let mut output = pipeline.process_documents(&files).await;
    output.stats.total_duration_ms = start.elapsed().as_millis() as u64;

    info!(
        "Batch complete: {}/{} documents succeeded, {}ms total",
        output.stats.succeeded, output.stats.documents_found, output.stats.total_duration_ms
    );
    Ok(output)
}

/// Process `input_dir` and write the reports to `output_path`.
///
/// Nothing is written when no document succeeded.
pub async fn run_batch_to_file(
    input_dir: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<BatchStats, PipelineError> {
    let output = run_batch(input_dir, config).await?;

    if output.is_empty() {
        return Err(PipelineError::NoSuccessfulReports {
            total: output.stats.documents_found,
            skipped: output.stats.skipped,
            first_error: output
                .first_error()
                .unwrap_or_else(|| "Unknown error".to_string()),
        });
    }

    write_reports(output_path.as_ref(), &output.reports).await?;
    Ok(output.stats)
}

/// Synchronous wrapper around [`run_batch_to_file`].
///
/// Creates a temporary tokio runtime internally.
pub fn run_batch_sync(
    input_dir: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &PipelineConfig,
) -> Result<BatchStats, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(run_batch_to_file(input_dir, output_path, config))
}

/// Write `reports` as one JSON array, indented by four spaces, non-ASCII kept as-is.
///
/// Parent directories are created. Uses atomic write (temp file + rename) to
/// prevent partial files.
pub async fn write_reports(path: &Path, reports: &[FinalReport]) -> Result<(), PipelineError> {
    let json = render_reports(reports)?;
    let write_err = |e: std::io::Error| PipelineError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let mut tmp_name = OsString::from(path.as_os_str());
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    info!("Wrote {} reports to {}", reports.len(), path.display());
    Ok(())
}

/// Serialise reports the way they are written to disk.
pub fn render_reports(reports: &[FinalReport]) -> Result<Vec<u8>, PipelineError> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    reports.serialize(&mut ser)?;
    Ok(buf)
}

fn describe_extensions(extensions: &[String]) -> String {
    extensions
        .iter()
        .map(|e| format!(".{e}"))
        .collect::<Vec<_>>()
        .join("/")
}

/// Pick the inference backend: the injected one, or an HTTP client for `endpoint`.
fn resolve_backend(config: &PipelineConfig) -> Result<Arc<dyn ChatBackend>, PipelineError> {
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }
    Ok(Arc::new(HttpChatBackend::from_config(config)?))
}
