//! Configuration types for the report pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. The backend address, the model name, the
//! per-call timeout and the OCR threshold all live here and are handed to each
//! stage at construction time, so tests can swap in a fake backend, converter
//! or page source without touching global state.

use crate::backend::ChatBackend;
use crate::error::PipelineError;
use crate::pipeline::convert::DocumentConverter;
use crate::pipeline::render::PageSource;
use crate::pipeline::resolve::OcrPolicy;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Default chat-completion endpoint (a local LM Studio server).
pub const DEFAULT_ENDPOINT: &str = "http://localhost:1234/v1/chat/completions";

/// Default model identifier.
pub const DEFAULT_MODEL: &str = "google/gemma-3-12b";

/// Minimum number of characters of direct text before OCR is skipped.
pub const DEFAULT_OCR_THRESHOLD: usize = 50;

/// Largest accepted page upscale factor.
pub const MAX_UPSCALE: u32 = 8;

/// Largest accepted number of transport retries.
pub const MAX_RETRIES: u32 = 10;

/// Configuration for a batch run.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use mrtp::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .endpoint("http://localhost:1234/v1/chat/completions")
///     .model("google/gemma-3-12b")
///     .ocr_threshold(50)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Chat-completion endpoint URL.
    pub endpoint: String,

    /// Model identifier used for OCR, extraction and translation.
    pub model: String,

    /// Optional bearer token sent as `Authorization: Bearer <key>`.
    pub api_key: Option<String>,

    /// Per-request timeout in seconds. Default: 180.
    ///
    /// A timeout is reported exactly like any other transport failure.
    pub timeout_secs: u64,

    /// Minimum length (in characters) of direct text before it counts as usable. Default: 50.
    pub ocr_threshold: usize,

    /// Skip the text layer and always OCR. Default: false.
    pub force_ocr: bool,

    /// Sampling temperature for every request. Default: 0.1.
    pub temperature: f32,

    /// `max_tokens` for OCR requests. Text requests leave it unset. Default: 32000.
    pub ocr_max_tokens: u32,

    /// Rasterization DPI. Default: 500.
    pub dpi: u32,

    /// Integer upscale factor applied after rasterization. Default: 2.
    pub upscale: u32,

    /// Language the reports are written in. Default: Russian (`ru`).
    pub source_language: Language,

    /// Languages to translate the captions into, in output order.
    /// Default: English (`en`), Kazakh (`kz`).
    pub target_languages: Vec<Language>,

    /// File extensions (without dot, case-insensitive) picked up from the input directory.
    pub input_extensions: Vec<String>,

    /// Office-to-PDF converter executable. Default: `soffice`.
    pub converter_command: String,

    /// Bound on a single document conversion, in seconds. Default: 120.
    pub conversion_timeout_secs: u64,

    /// Corrective re-prompts after a malformed JSON answer. Default: 0.
    pub parse_retries: u32,

    /// Transport retries per request. Default: 0.
    pub max_retries: u32,

    /// Initial transport retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// What to do when a translation comes back with a different key set. Default: reject.
    pub key_mismatch: KeyMismatchPolicy,

    /// Pre-constructed inference backend. Takes precedence over `endpoint`.
    pub backend: Option<Arc<dyn ChatBackend>>,

    /// Pre-constructed document converter. Default: [`crate::pipeline::convert::SofficeConverter`].
    pub converter: Option<Arc<dyn DocumentConverter>>,

    /// Pre-constructed page source. Default: [`crate::pipeline::render::PdfiumPageSource`].
    pub page_source: Option<Arc<dyn PageSource>>,

    /// OCR decision strategy. Default: [`crate::pipeline::resolve::MinLengthPolicy`]
    /// with `ocr_threshold`.
    pub ocr_policy: Option<Arc<dyn OcrPolicy>>,

    /// Optional per-document progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout_secs: 180,
            ocr_threshold: DEFAULT_OCR_THRESHOLD,
            force_ocr: false,
            temperature: 0.1,
            ocr_max_tokens: 32_000,
            dpi: 500,
            upscale: 2,
            source_language: Language::new("Russian", "ru"),
            target_languages: vec![Language::new("English", "en"), Language::new("Kazakh", "kz")],
            input_extensions: vec!["docx".to_string()],
            converter_command: "soffice".to_string(),
            conversion_timeout_secs: 120,
            parse_retries: 0,
            max_retries: 0,
            retry_backoff_ms: 500,
            key_mismatch: KeyMismatchPolicy::default(),
            backend: None,
            converter: None,
            page_source: None,
            ocr_policy: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .field("ocr_threshold", &self.ocr_threshold)
            .field("force_ocr", &self.force_ocr)
            .field("temperature", &self.temperature)
            .field("ocr_max_tokens", &self.ocr_max_tokens)
            .field("dpi", &self.dpi)
            .field("upscale", &self.upscale)
            .field("source_language", &self.source_language)
            .field("target_languages", &self.target_languages)
            .field("input_extensions", &self.input_extensions)
            .field("converter_command", &self.converter_command)
            .field("parse_retries", &self.parse_retries)
            .field("max_retries", &self.max_retries)
            .field("key_mismatch", &self.key_mismatch)
            .field("backend", &self.backend.as_ref().map(|_| "<dyn ChatBackend>"))
            .field("converter", &self.converter.as_ref().map(|_| "<dyn DocumentConverter>"))
            .field("page_source", &self.page_source.as_ref().map(|_| "<dyn PageSource>"))
            .field("ocr_policy", &self.ocr_policy.as_ref().map(|_| "<dyn OcrPolicy>"))
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn ocr_threshold(mut self, chars: usize) -> Self {
        self.config.ocr_threshold = chars;
        self
    }

    pub fn force_ocr(mut self, v: bool) -> Self {
        self.config.force_ocr = v;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn ocr_max_tokens(mut self, n: u32) -> Self {
        self.config.ocr_max_tokens = n;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn upscale(mut self, factor: u32) -> Self {
        self.config.upscale = factor;
        self
    }

    pub fn source_language(mut self, language: Language) -> Self {
        self.config.source_language = language;
        self
    }

    pub fn target_languages(mut self, languages: Vec<Language>) -> Self {
        self.config.target_languages = languages;
        self
    }

    pub fn input_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.input_extensions = extensions
            .into_iter()
            .map(|e| e.into().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    pub fn converter_command(mut self, command: impl Into<String>) -> Self {
        self.config.converter_command = command.into();
        self
    }

    pub fn conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conversion_timeout_secs = secs;
        self
    }

    pub fn parse_retries(mut self, n: u32) -> Self {
        self.config.parse_retries = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn key_mismatch(mut self, policy: KeyMismatchPolicy) -> Self {
        self.config.key_mismatch = policy;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ChatBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn converter(mut self, converter: Arc<dyn DocumentConverter>) -> Self {
        self.config.converter = Some(converter);
        self
    }

    pub fn page_source(mut self, source: Arc<dyn PageSource>) -> Self {
        self.config.page_source = Some(source);
        self
    }

    pub fn ocr_policy(mut self, policy: Arc<dyn OcrPolicy>) -> Self {
        self.config.ocr_policy = Some(policy);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, PipelineError> {
        let c = &self.config;
        if c.backend.is_none()
            && !(c.endpoint.starts_with("http://") || c.endpoint.starts_with("https://"))
        {
            return Err(PipelineError::InvalidConfig(format!(
                "endpoint must be an http(s) URL, got '{}'",
                c.endpoint
            )));
        }
        if c.model.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("model must not be empty".into()));
        }
        if c.timeout_secs == 0 {
            return Err(PipelineError::InvalidConfig("timeout must be ≥ 1s".into()));
        }
        if !(72..=1200).contains(&c.dpi) {
            return Err(PipelineError::InvalidConfig(format!(
                "DPI must be 72–1200, got {}",
                c.dpi
            )));
        }
        if !(1..=MAX_UPSCALE).contains(&c.upscale) {
            return Err(PipelineError::InvalidConfig(format!(
                "upscale must be 1–{MAX_UPSCALE}, got {}",
                c.upscale
            )));
        }
        if c.max_retries > MAX_RETRIES {
            return Err(PipelineError::InvalidConfig(format!(
                "max retries must be ≤ {MAX_RETRIES}, got {}",
                c.max_retries
            )));
        }
        if c.input_extensions.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "at least one input extension is required".into(),
            ));
        }

        // Caption keys are `captions_<code>`; two equal codes would overwrite each other.
        let mut codes = HashSet::new();
        codes.insert(c.source_language.code.as_str());
        for lang in &c.target_languages {
            if lang.code.is_empty() || lang.name.is_empty() {
                return Err(PipelineError::InvalidConfig(format!(
                    "language needs both a name and a code, got {lang:?}"
                )));
            }
            if !codes.insert(lang.code.as_str()) {
                return Err(PipelineError::InvalidConfig(format!(
                    "duplicate language code '{}'",
                    lang.code
                )));
            }
        }
        Ok(self.config)
    }
}

// ── Enums & small types ─────────────────────────────────────────────────────

/// A named language plus the short code used in output keys (`captions_<code>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Language {
    /// Name used in prompts, e.g. "English".
    pub name: String,
    /// Short code used in output keys, e.g. "en".
    pub code: String,
}

impl Language {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
        }
    }

    /// Parse `Name:code`, e.g. `"Kazakh:kz"`. The code is required.
    pub fn parse(s: &str) -> Option<Self> {
        let (name, code) = s.trim().split_once(':')?;
        let (name, code) = (name.trim(), code.trim());
        if name.is_empty() || code.is_empty() {
            return None;
        }
        Some(Self::new(name, code.to_lowercase()))
    }

    /// Output key holding captions in this language.
    pub fn caption_key(&self) -> String {
        format!("captions_{}", self.code)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.code)
    }
}

/// How the translator handles an answer whose key set differs from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyMismatchPolicy {
    /// Treat any missing or extra key as a parse failure. (default)
    #[default]
    Reject,
    /// Drop extra keys and fill missing ones with the source-language text.
    Reconcile,
}
