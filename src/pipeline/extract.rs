//! Structured field extraction: report text → [`StructuredRecord`].

use crate::backend::{ChatBackend, ChatMessage, ChatRequest};
use crate::config::{Language, PipelineConfig};
use crate::error::DocumentError;
use crate::pipeline::json::{complete_and_decode, parse_llm_json_output};
use crate::prompts::{extraction_prompt, EXTRACTION_SYSTEM_PROMPT};
use crate::report::{Captions, StructuredRecord, CONCLUSION_KEY, UNKNOWN};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

const WHAT: &str = "structured record";

/// Asks the model to pull patient fields and per-organ findings out of report text.
#[derive(Clone)]
pub struct FieldExtractor {
    backend: Arc<dyn ChatBackend>,
    model: String,
    temperature: f32,
    source_language: Language,
    parse_retries: u32,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl FieldExtractor {
    pub fn new(backend: Arc<dyn ChatBackend>, config: &PipelineConfig) -> Self {
        Self {
            backend,
            model: config.model.clone(),
            temperature: config.temperature,
            source_language: config.source_language.clone(),
            parse_retries: config.parse_retries,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }

    /// Extract the record, failing with a parse error when the answer lacks findings.
    pub async fn extract(&self, text: &str) -> Result<StructuredRecord, DocumentError> {
        let request = ChatRequest::new(
            self.model.clone(),
            vec![
                ChatMessage::system(EXTRACTION_SYSTEM_PROMPT),
                ChatMessage::user(extraction_prompt(text, &self.source_language)),
            ],
        )
        .with_temperature(self.temperature);

        let source = &self.source_language;
        let record = complete_and_decode(
            self.backend.as_ref(),
            request,
            self.parse_retries,
            self.max_retries,
            self.retry_backoff_ms,
            |raw| decode_record(raw, source),
        )
        .await?;

        debug!(
            patient_id = %record.patient_id,
            captions = record.captions.len(),
            "fields extracted"
        );
        Ok(record)
    }
}

/// Decode a raw extraction answer.
///
/// Accepts `captions` or `captions_<source code>` for the findings. Missing or
/// null patient fields become `"N/A"`; numbers and booleans are stringified.
pub fn decode_record(raw: &str, source: &Language) -> Result<StructuredRecord, DocumentError> {
    let value = parse_llm_json_output(raw).map_err(|e| DocumentError::parse(WHAT, e.to_string(), raw))?;
    let obj = value
        .as_object()
        .ok_or_else(|| DocumentError::parse(WHAT, "expected a JSON object", raw))?;

    let captions_value = obj
        .get("captions")
        .or_else(|| obj.get(&source.caption_key()))
        .ok_or_else(|| DocumentError::parse(WHAT, "missing \"captions\" mapping", raw))?;
    let captions = decode_captions(captions_value, raw)?;
    if captions.is_empty() {
        return Err(DocumentError::parse(WHAT, "\"captions\" mapping is empty", raw));
    }
    if !captions.contains_key(CONCLUSION_KEY) {
        warn!("extracted captions have no \"{}\" entry", CONCLUSION_KEY);
    }

    Ok(StructuredRecord {
        patient_group: scalar_field(obj, "patient_group", raw)?,
        patient_id: scalar_field(obj, "patient_id", raw)?,
        age: scalar_field(obj, "age", raw)?,
        gender: scalar_field(obj, "gender", raw)?,
        captions,
    })
}

fn decode_captions(value: &Value, raw: &str) -> Result<Captions, DocumentError> {
    let map = value
        .as_object()
        .ok_or_else(|| DocumentError::parse(WHAT, "\"captions\" must be an object", raw))?;

    map.iter()
        .map(|(k, v)| match scalar_to_string(v) {
            Some(s) => Ok((k.clone(), s)),
            None => Err(DocumentError::parse(
                WHAT,
                format!("caption \"{k}\" is not a string"),
                raw,
            )),
        })
        .collect()
}

fn scalar_field(obj: &Map<String, Value>, key: &str, raw: &str) -> Result<String, DocumentError> {
    match obj.get(key) {
        None => Ok(UNKNOWN.to_string()),
        Some(v) => scalar_to_string(v)
            .ok_or_else(|| DocumentError::parse(WHAT, format!("\"{key}\" is not a scalar"), raw)),
    }
}

/// Strings as-is, numbers and booleans stringified, null as `"N/A"`.
/// Arrays and objects have no string form.
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(UNKNOWN.to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn ru() -> Language {
        Language::new("Russian", "ru")
    }

    #[test]
    fn decodes_full_record() {
        let raw = r#"```json
{
  "patient_group": "Группа 1",
  "patient_id": "P-017",
  "age": 54,
  "gender": "М",
  "captions": {"печень": "без особенностей", "conclusion": "без патологии"}
}
```"#;
        let r = decode_record(raw, &ru()).unwrap();
        assert_eq!(r.patient_id, "P-017");
        assert_eq!(r.age, "54");
        assert_eq!(r.captions.len(), 2);
        assert_eq!(r.captions["conclusion"], "без патологии");
    }

    #[test]
    fn missing_scalars_become_unknown() {
        let raw = r#"{"patient_id": null, "captions": {"conclusion": "норма"}}"#;
        let r = decode_record(raw, &ru()).unwrap();
        assert_eq!(r.patient_id, "N/A");
        assert_eq!(r.patient_group, "N/A");
        assert_eq!(r.gender, "N/A");
    }

    #[test]
    fn accepts_language_suffixed_captions_key() {
        let raw = r#"{"captions_ru": {"liver": "норма"}}"#;
        let r = decode_record(raw, &ru()).unwrap();
        assert_eq!(r.captions["liver"], "норма");
    }

    #[test]
    fn missing_captions_is_parse_failure() {
        let raw = r#"{"patient_id": "1", "age": "40"}"#;
        let err = decode_record(raw, &ru()).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Parse);
        assert_eq!(err.raw_response(), Some(raw));
    }

    #[test]
    fn empty_or_malformed_captions_rejected() {
        assert!(decode_record(r#"{"captions": {}}"#, &ru()).is_err());
        assert!(decode_record(r#"{"captions": ["a"]}"#, &ru()).is_err());
        assert!(decode_record(r#"{"captions": {"liver": {"x": 1}}}"#, &ru()).is_err());
        assert!(decode_record(r#"{"age": [1], "captions": {"a": "b"}}"#, &ru()).is_err());
        assert!(decode_record("[1, 2]", &ru()).is_err());
        assert!(decode_record("not json", &ru()).is_err());
    }

    struct Canned(String, Mutex<Vec<ChatRequest>>);

    #[async_trait]
    impl ChatBackend for Canned {
        async fn complete(&self, request: &ChatRequest) -> Result<String, DocumentError> {
            self.1.lock().unwrap().push(request.clone());
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn extract_sends_system_and_user_turns() {
        let backend = Arc::new(Canned(
            r#"{"patient_group":"A","patient_id":"7","age":"33","gender":"F","captions":{"conclusion":"норма"}}"#.into(),
            Mutex::new(vec![]),
        ));
        let extractor = FieldExtractor::new(backend.clone(), &PipelineConfig::default());
        let record = extractor.extract("ПЕЧЕНЬ: норма").await.unwrap();
        assert_eq!(record.patient_group, "A");

        let seen = backend.1.lock().unwrap();
        assert_eq!(seen[0].messages.len(), 2);
        assert!(seen[0].messages[1].text().contains("ПЕЧЕНЬ: норма"));
        assert_eq!(seen[0].max_tokens, None);
        assert!(!seen[0].has_image());
    }
}
