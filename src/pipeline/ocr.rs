//! OCR adapter: one rendered page → one vision request → recognised text.
//!
//! The adapter never fails. Encoding errors, transport errors and timeouts
//! come back as [`OcrOutcome::Failed`], and the resolver treats such a page
//! as "no text from this page" rather than abandoning the document.

use crate::backend::{complete_with_retries, ChatBackend, ChatMessage, ChatRequest, ContentPart};
use crate::config::PipelineConfig;
use crate::pipeline::encode::encode_page;
use crate::prompts::ocr_instruction;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Result of recognising one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrOutcome {
    /// Text returned by the model (may be empty).
    Text(String),
    /// The page could not be recognised; the reason is for diagnostics only.
    Failed(String),
}

impl OcrOutcome {
    /// Usable text, or `None` for failures and blank answers.
    pub fn text(&self) -> Option<&str> {
        match self {
            OcrOutcome::Text(t) if !t.trim().is_empty() => Some(t),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, OcrOutcome::Failed(_))
    }
}

/// Sends page images to a vision-capable model.
#[derive(Clone)]
pub struct OcrAdapter {
    backend: Arc<dyn ChatBackend>,
    model: String,
    instruction: String,
    temperature: f32,
    max_tokens: u32,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl OcrAdapter {
    pub fn new(backend: Arc<dyn ChatBackend>, config: &PipelineConfig) -> Self {
        Self {
            backend,
            model: config.model.clone(),
            instruction: ocr_instruction(&config.source_language),
            temperature: config.temperature,
            max_tokens: config.ocr_max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }

    /// Recognise the text on one rendered page.
    pub async fn recognize(&self, page: &DynamicImage) -> OcrOutcome {
        match encode_page(page) {
            Ok(url) => self.recognize_data_url(url).await,
            Err(e) => {
                warn!("page encoding failed: {}", e);
                OcrOutcome::Failed(format!("image encoding failed: {e}"))
            }
        }
    }

    /// Recognise an already-encoded `data:` URL.
    pub async fn recognize_data_url(&self, image_url: String) -> OcrOutcome {
        let start = Instant::now();
        let request = self.build_request(image_url);

        match complete_with_retries(
            self.backend.as_ref(),
            &request,
            self.max_retries,
            self.retry_backoff_ms,
        )
        .await
        {
            Ok(text) => {
                debug!(
                    chars = text.chars().count(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "page recognised"
                );
                OcrOutcome::Text(text)
            }
            Err(e) => {
                warn!("vision request failed: {}", e);
                OcrOutcome::Failed(e.to_string())
            }
        }
    }

    fn build_request(&self, image_url: String) -> ChatRequest {
        ChatRequest::new(
            self.model.clone(),
            vec![ChatMessage::user_parts(vec![
                ContentPart::text(self.instruction.clone()),
                ContentPart::image_url(image_url),
            ])],
        )
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens)
    }
}
