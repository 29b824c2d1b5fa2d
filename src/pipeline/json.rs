//! Parsing model answers that should be JSON.
//!
//! Models wrap JSON in markdown fences or add a sentence around it even when
//! told not to. [`parse_llm_json_output`] tries, in order:
//!
//! 1. the trimmed answer as-is
//! 2. the first fenced block (` ```json … ``` ` or ` ``` … ``` `)
//! 3. the slice from the first `{` to the last `}`
//!
//! and returns the first candidate that parses. Parsing is a pure function of
//! the input string; nothing is retried or repaired here.

use crate::backend::{complete_with_retries, ChatBackend, ChatMessage, ChatRequest};
use crate::error::{DocumentError, FailureKind};
use crate::prompts::corrective_prompt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

static RE_FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[ \t]*(?:json|JSON)?[ \t]*\r?\n?(.*?)```").unwrap());

/// Parse a model answer into a JSON value.
///
/// Returns `Err` (never panics) when no candidate parses, e.g. for `"not json"`.
pub fn parse_llm_json_output(raw: &str) -> Result<Value, serde_json::Error> {
    let trimmed = raw.trim();
    let direct = serde_json::from_str::<Value>(trimmed);
    if direct.is_ok() {
        return direct;
    }

    if let Some(caps) = RE_FENCED_BLOCK.captures(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(caps[1].trim()) {
            return Ok(v);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(v) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                return Ok(v);
            }
        }
    }

    direct
}

/// Send `request` and decode the answer with `decode`, re-prompting on parse failures.
///
/// Each corrective round appends the bad answer as an assistant turn followed
/// by a user turn describing the problem. Transport failures are returned
/// immediately (after the transport retries of [`complete_with_retries`]).
pub(crate) async fn complete_and_decode<T, F>(
    backend: &dyn ChatBackend,
    mut request: ChatRequest,
    parse_retries: u32,
    max_retries: u32,
    retry_backoff_ms: u64,
    decode: F,
) -> Result<T, DocumentError>
where
    F: Fn(&str) -> Result<T, DocumentError>,
{
    let mut round = 0;
    loop {
        let raw = complete_with_retries(backend, &request, max_retries, retry_backoff_ms).await?;
        match decode(&raw) {
            Ok(value) => return Ok(value),
            Err(e) if e.kind() == FailureKind::Parse && round < parse_retries => {
                round += 1;
                warn!("re-prompting after unusable answer ({}/{}): {}", round, parse_retries, e);
                let problem = match &e {
                    DocumentError::Parse { detail, .. } => detail.clone(),
                    other => other.to_string(),
                };
                request.messages.push(ChatMessage::assistant(raw));
                request.messages.push(ChatMessage::user(corrective_prompt(&problem)));
            }
            Err(e) => return Err(e),
        }
    }
}
