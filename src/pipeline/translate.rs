//! Caption translation: one request per target language.
//!
//! The model is asked to keep the keys and translate only the values. Its
//! answer is checked against the input key set; what happens on a mismatch
//! depends on [`KeyMismatchPolicy`].

use crate::backend::{ChatBackend, ChatMessage, ChatRequest};
use crate::config::{KeyMismatchPolicy, Language, PipelineConfig};
use crate::error::DocumentError;
use crate::pipeline::extract::scalar_to_string;
use crate::pipeline::json::{complete_and_decode, parse_llm_json_output};
use crate::prompts::{translation_prompt, translation_system_prompt};
use crate::report::Captions;
use std::sync::Arc;
use tracing::{debug, warn};

const WHAT: &str = "translation";

/// Translates caption values from the source language.
#[derive(Clone)]
pub struct Translator {
    backend: Arc<dyn ChatBackend>,
    model: String,
    temperature: f32,
    source_language: Language,
    key_mismatch: KeyMismatchPolicy,
    parse_retries: u32,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl Translator {
    pub fn new(backend: Arc<dyn ChatBackend>, config: &PipelineConfig) -> Self {
        Self {
            backend,
            model: config.model.clone(),
            temperature: config.temperature,
            source_language: config.source_language.clone(),
            key_mismatch: config.key_mismatch,
            parse_retries: config.parse_retries,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }

    /// Translate every value of `captions` into `target`.
    ///
    /// The result has exactly the keys of `captions`.
    pub async fn translate(
        &self,
        captions: &Captions,
        target: &Language,
    ) -> Result<Captions, DocumentError> {
        let captions_json = serde_json::to_string_pretty(captions).map_err(|e| {
            DocumentError::parse(WHAT, format!("cannot serialise captions: {e}"), "")
        })?;

        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(translation_system_prompt(&self.source_language, target)),
                ChatMessage::user(translation_prompt(&captions_json, target)),
            ],
        )
        .with_temperature(self.temperature);

        let policy = self.key_mismatch;
        let translated = complete_and_decode(
            self.backend.as_ref(),
            request,
            self.parse_retries,
            self.max_retries,
            self.retry_backoff_ms,
            |raw| decode_translation(raw, captions, policy),
        )
        .await?;

        debug!(language = %target.code, keys = translated.len(), "captions translated");
        Ok(translated)
    }
}

/// Decode a translation answer and enforce the key set of `source`.
pub fn decode_translation(
    raw: &str,
    source: &Captions,
    policy: KeyMismatchPolicy,
) -> Result<Captions, DocumentError> {
    let value = parse_llm_json_output(raw).map_err(|e| DocumentError::parse(WHAT, e.to_string(), raw))?;
    let obj = value
        .as_object()
        .ok_or_else(|| DocumentError::parse(WHAT, "expected a JSON object", raw))?;

    let mut translated = Captions::new();
    for (k, v) in obj {
        match scalar_to_string(v) {
            Some(s) => {
                translated.insert(k.clone(), s);
            }
            None if policy == KeyMismatchPolicy::Reconcile && !source.contains_key(k) => {}
            None => {
                return Err(DocumentError::parse(
                    WHAT,
                    format!("value for \"{k}\" is not a string"),
                    raw,
                ))
            }
        }
    }

    // A blank translation only counts as missing when there was text to translate.
    let missing: Vec<&str> = source
        .iter()
        .filter(|(k, original)| {
            translated
                .get(*k)
                .is_none_or(|v| v.trim().is_empty() && !original.trim().is_empty())
        })
        .map(|(k, _)| k.as_str())
        .collect();
    let extra: Vec<&str> = translated
        .keys()
        .filter(|k| !source.contains_key(*k))
        .map(String::as_str)
        .collect();

    if missing.is_empty() && extra.is_empty() {
        return Ok(translated);
    }

    match policy {
        KeyMismatchPolicy::Reject => Err(DocumentError::parse(
            WHAT,
            format!("key set differs from input (missing or empty: {missing:?}, unexpected: {extra:?})"),
            raw,
        )),
        KeyMismatchPolicy::Reconcile => {
            warn!(?missing, ?extra, "reconciling translated key set");
            Ok(source
                .iter()
                .map(|(k, original)| {
                    let v = translated
                        .get(k)
                        .filter(|v| !v.trim().is_empty())
                        .unwrap_or(original);
                    (k.clone(), v.clone())
                })
                .collect())
        }
    }
}
