//! Result types: structured records, final reports and batch summaries.

use crate::config::Language;
use crate::error::{DocumentError, FailureKind};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Value used for a scalar patient field the model did not provide.
pub const UNKNOWN: &str = "N/A";

/// Reserved caption key holding the report's conclusion.
pub const CONCLUSION_KEY: &str = "conclusion";

/// Organ/section name → free-text finding.
pub type Captions = BTreeMap<String, String>;

/// Typed result of field extraction.
///
/// `captions` is never empty; the decoder rejects records without findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuredRecord {
    pub patient_group: String,
    pub patient_id: String,
    pub age: String,
    pub gender: String,
    pub captions: Captions,
}

/// Captions translated into one target language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedCaptions {
    pub language: Language,
    pub captions: Captions,
}

/// One entry of the output file.
///
/// Serialises as a flat object: `source_file`, the four patient fields,
/// `captions_<source>` and one `captions_<target>` per translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalReport {
    pub source_file: String,
    pub patient_group: String,
    pub patient_id: String,
    pub age: String,
    pub gender: String,
    pub source_language: Language,
    pub captions: Captions,
    pub translations: Vec<TranslatedCaptions>,
}

impl FinalReport {
    pub fn new(
        source_file: impl Into<String>,
        record: StructuredRecord,
        source_language: Language,
        translations: Vec<TranslatedCaptions>,
    ) -> Self {
        Self {
            source_file: source_file.into(),
            patient_group: record.patient_group,
            patient_id: record.patient_id,
            age: record.age,
            gender: record.gender,
            source_language,
            captions: record.captions,
            translations,
        }
    }

    /// Captions for `code`, whether source or translated.
    pub fn captions_for(&self, code: &str) -> Option<&Captions> {
        if self.source_language.code == code {
            return Some(&self.captions);
        }
        self.translations
            .iter()
            .find(|t| t.language.code == code)
            .map(|t| &t.captions)
    }
}

impl Serialize for FinalReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(7 + self.translations.len()))?;
        map.serialize_entry("source_file", &self.source_file)?;
        map.serialize_entry("patient_group", &self.patient_group)?;
        map.serialize_entry("patient_id", &self.patient_id)?;
        map.serialize_entry("age", &self.age)?;
        map.serialize_entry("gender", &self.gender)?;
        map.serialize_entry(&self.source_language.caption_key(), &self.captions)?;
        for t in &self.translations {
            map.serialize_entry(&t.language.caption_key(), &t.captions)?;
        }
        map.end()
    }
}

/// Where a document is in its lifecycle.
///
/// ```text
/// Ingested → Converted → TextResolved → FieldsExtracted → Translated(..)* → Succeeded
///     └──────────┴────────────┴────────────────┴──────────────┴──────────→ Skipped
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum DocumentStage {
    Ingested,
    Converted,
    TextResolved { used_ocr: bool },
    FieldsExtracted,
    Translated { language: String },
    Succeeded,
    Skipped,
}

impl DocumentStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStage::Succeeded | DocumentStage::Skipped)
    }
}

impl fmt::Display for DocumentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentStage::Ingested => f.write_str("ingested"),
            DocumentStage::Converted => f.write_str("converted"),
            DocumentStage::TextResolved { used_ocr: true } => f.write_str("text resolved (OCR)"),
            DocumentStage::TextResolved { used_ocr: false } => f.write_str("text resolved"),
            DocumentStage::FieldsExtracted => f.write_str("fields extracted"),
            DocumentStage::Translated { language } => write!(f, "translated ({language})"),
            DocumentStage::Succeeded => f.write_str("succeeded"),
            DocumentStage::Skipped => f.write_str("skipped"),
        }
    }
}

/// A document that was dropped, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedDocument {
    pub source_file: String,
    /// Last stage completed before the failure.
    pub last_stage: DocumentStage,
    pub kind: FailureKind,
    pub error: DocumentError,
}

/// Terminal result of one document.
#[derive(Debug, Clone)]
pub enum DocumentOutcome {
    Succeeded {
        report: FinalReport,
        used_ocr: bool,
        ocr_pages: usize,
        ocr_pages_failed: usize,
    },
    Skipped(SkippedDocument),
}

impl DocumentOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DocumentOutcome::Succeeded { .. })
    }
}

/// Aggregate numbers for a batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub documents_found: usize,
    pub succeeded: usize,
    pub skipped: usize,
    /// Successful documents whose text came from OCR.
    pub ocr_documents: usize,
    /// Pages sent to OCR across successful documents.
    pub ocr_pages: usize,
    /// OCR pages that returned no text.
    pub ocr_pages_failed: usize,
    pub total_duration_ms: u64,
}

/// Everything a batch produced, in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchOutput {
    pub reports: Vec<FinalReport>,
    pub skipped: Vec<SkippedDocument>,
    pub stats: BatchStats,
}

impl BatchOutput {
    /// Fold per-document outcomes into the output collection.
    ///
    /// Order of `reports` follows the order of `outcomes`.
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = DocumentOutcome>) -> Self {
        outcomes.into_iter().fold(Self::default(), |mut acc, outcome| {
            acc.stats.documents_found += 1;
            match outcome {
                DocumentOutcome::Succeeded {
                    report,
                    used_ocr,
                    ocr_pages,
                    ocr_pages_failed,
                } => {
                    acc.stats.succeeded += 1;
                    if used_ocr {
                        acc.stats.ocr_documents += 1;
                    }
                    acc.stats.ocr_pages += ocr_pages;
                    acc.stats.ocr_pages_failed += ocr_pages_failed;
                    acc.reports.push(report);
                }
                DocumentOutcome::Skipped(skipped) => {
                    acc.stats.skipped += 1;
                    acc.skipped.push(skipped);
                }
            }
            acc
        })
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Display string of the first skip reason, if any.
    pub fn first_error(&self) -> Option<String> {
        self.skipped
            .first()
            .map(|s| format!("{}: {}", s.source_file, s.error))
    }
}
