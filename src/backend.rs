//! Inference backend: the chat-completion wire format and its HTTP client.
//!
//! Every stage that talks to a model (OCR, field extraction, translation)
//! goes through the [`ChatBackend`] trait. The production implementation,
//! [`HttpChatBackend`], POSTs an OpenAI-compatible request body to a single
//! configurable endpoint and returns `choices[0].message.content`. Tests plug
//! in a scripted backend through [`crate::PipelineConfig::backend`].
//!
//! Non-2xx statuses, transport errors and timeouts all collapse into
//! [`DocumentError::Transport`]: from a caller's point of view the backend
//! simply returned no content.

use crate::config::PipelineConfig;
use crate::error::{DocumentError, PipelineError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

// ── Wire types ───────────────────────────────────────────────────────────────

/// Request body for a chat-completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn with_max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    /// True when any message carries an image part.
    pub fn has_image(&self) -> bool {
        self.messages.iter().any(|m| match &m.content {
            MessageContent::Parts(parts) => {
                parts.iter().any(|p| matches!(p, ContentPart::ImageUrl { .. }))
            }
            MessageContent::Text(_) => false,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// A user turn made of parts, e.g. an instruction plus an image.
    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }

    /// Concatenated text of every text part.
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Message content: a plain string or a list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn image_url(url: impl Into<String>) -> Self {
        ContentPart::ImageUrl {
            image_url: ImageUrl { url: url.into() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// The subset of the response body the pipeline reads.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

// ── Backend trait ────────────────────────────────────────────────────────────

/// A chat-completion service.
///
/// Implementations return the assistant's text (`choices[0].message.content`)
/// or a [`DocumentError::Transport`].
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<String, DocumentError>;
}

/// Delay before retry number `attempt` (1-based): `base`, `2·base`, `4·base`, …
/// saturating at `u64::MAX`.
pub(crate) fn backoff_delay_ms(base: u64, attempt: u32) -> u64 {
    let factor = 2u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    base.saturating_mul(factor)
}

/// Send `request`, retrying transport failures with exponential backoff.
///
/// With `max_retries = 0` this is a single attempt.
pub async fn complete_with_retries(
    backend: &dyn ChatBackend,
    request: &ChatRequest,
    max_retries: u32,
    retry_backoff_ms: u64,
) -> Result<String, DocumentError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let backoff = backoff_delay_ms(retry_backoff_ms, attempt);
            warn!("retry {}/{} after {}ms", attempt, max_retries, backoff);
            sleep(Duration::from_millis(backoff)).await;
        }

        match backend.complete(request).await {
            Ok(content) => return Ok(content),
            Err(e) => {
                warn!("attempt {} failed: {}", attempt + 1, e);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| DocumentError::Transport {
        detail: "no attempt was made".into(),
    }))
}

// ── HTTP implementation ──────────────────────────────────────────────────────

/// [`ChatBackend`] over HTTP against an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct HttpChatBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl HttpChatBackend {
    /// Build a client with a per-request timeout.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, PipelineError> {
        let endpoint = endpoint.into();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PipelineError::BackendNotConfigured {
                endpoint: endpoint.clone(),
                detail: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint,
            api_key,
            timeout_secs,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Self::new(&config.endpoint, config.api_key.clone(), config.timeout_secs)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<String, DocumentError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                DocumentError::Transport {
                    detail: format!("request timed out after {}s", self.timeout_secs),
                }
            } else {
                DocumentError::Transport {
                    detail: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DocumentError::Transport {
                detail: format!("HTTP {}: {}", status, truncate(&body, 200)),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                DocumentError::Transport {
                    detail: format!("response timed out after {}s", self.timeout_secs),
                }
            } else {
                DocumentError::Transport {
                    detail: format!("malformed response body: {e}"),
                }
            }
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| DocumentError::Transport {
                detail: "response contained no choices[0].message.content".into(),
            })?;

        debug!(chars = content.chars().count(), "chat completion received");
        Ok(content)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{cut}\u{2026}")
    }
}
