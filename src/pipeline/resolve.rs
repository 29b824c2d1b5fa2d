//! Text source resolution: use the PDF's own text layer, or fall back to OCR.
//!
//! Whether direct text is good enough is decided by an [`OcrPolicy`]. The
//! default [`MinLengthPolicy`] treats anything shorter than a fixed number of
//! characters as "this document has no embedded text layer" (typically a
//! scanned image pasted into a Word file).

use crate::config::PipelineConfig;
use crate::error::DocumentError;
use crate::pipeline::ocr::OcrAdapter;
use crate::pipeline::render::PageSource;
use crate::progress::ProgressCallback;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decides whether directly extracted text is unusable and OCR is needed.
pub trait OcrPolicy: Send + Sync {
    fn needs_ocr(&self, text: &str) -> bool;
}

/// OCR when the text is shorter than `min_chars` characters.
///
/// Layout whitespace counts; a blank text layer is sent to OCR by the
/// resolver regardless of the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinLengthPolicy {
    pub min_chars: usize,
}

impl MinLengthPolicy {
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }
}

impl OcrPolicy for MinLengthPolicy {
    fn needs_ocr(&self, text: &str) -> bool {
        text.chars().count() < self.min_chars
    }
}

/// Text chosen for a document, plus how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedText {
    pub text: String,
    pub used_ocr: bool,
    /// Pages sent to OCR.
    pub ocr_pages: usize,
    /// OCR pages that produced no text.
    pub ocr_pages_failed: usize,
}

/// Chooses between the text layer and OCR for one PDF.
pub struct TextSourceResolver {
    pages: Arc<dyn PageSource>,
    ocr: OcrAdapter,
    policy: Arc<dyn OcrPolicy>,
    force_ocr: bool,
    progress: Option<ProgressCallback>,
}

impl TextSourceResolver {
    pub fn new(
        pages: Arc<dyn PageSource>,
        ocr: OcrAdapter,
        policy: Arc<dyn OcrPolicy>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            pages,
            ocr,
            policy,
            force_ocr: config.force_ocr,
            progress: config.progress_callback.clone(),
        }
    }

    /// Produce the document text.
    ///
    /// `name` is only used for progress events and logs.
    pub async fn resolve(&self, pdf: &Path, name: &str) -> Result<ResolvedText, DocumentError> {
        if !self.force_ocr {
            let direct = match self.pages.extract_text(pdf).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(document = name, "text layer unavailable: {}", e);
                    String::new()
                }
            };

            // An empty text layer is never usable, whatever the policy says.
            if !direct.trim().is_empty() && !self.policy.needs_ocr(&direct) {
                debug!(
                    document = name,
                    chars = direct.chars().count(),
                    "using text layer"
                );
                return Ok(ResolvedText {
                    text: direct,
                    used_ocr: false,
                    ocr_pages: 0,
                    ocr_pages_failed: 0,
                });
            }
            info!(
                document = name,
                chars = direct.chars().count(),
                "text layer unusable, falling back to OCR"
            );
        }

        self.ocr_document(pdf, name).await
    }

    async fn ocr_document(&self, pdf: &Path, name: &str) -> Result<ResolvedText, DocumentError> {
        let images = self.pages.render_pages(pdf).await.unwrap_or_else(|e| {
            warn!(document = name, "rasterisation failed: {}", e);
            Vec::new()
        });

        if images.is_empty() {
            return Err(DocumentError::Extraction {
                detail: "could not extract page images from the PDF".into(),
            });
        }

        let total = images.len();
        info!(document = name, pages = total, "performing OCR");

        let mut texts = Vec::with_capacity(total);
        let mut failed = 0;
        for (idx, image) in images.into_iter().enumerate() {
            if let Some(ref cb) = self.progress {
                cb.on_ocr_page(name, idx + 1, total);
            }
            let outcome = self.ocr.recognize(&image).await;
            // Page images are released one by one as soon as they are recognised.
            drop(image);
            match outcome.text() {
                Some(text) => texts.push(text.to_string()),
                None => {
                    failed += 1;
                    warn!(document = name, page = idx + 1, "no text from page");
                }
            }
        }

        if texts.is_empty() {
            return Err(DocumentError::Extraction {
                detail: format!("OCR returned no text for any of {total} pages"),
            });
        }

        Ok(ResolvedText {
            text: texts.join("\n\n"),
            used_ocr: true,
            ocr_pages: total,
            ocr_pages_failed: failed,
        })
    }
}
