//! Error types for the mrtp library.
//!
//! Two distinct error types reflect two distinct failure scopes:
//!
//! * [`PipelineError`] is **fatal to the run**. The batch cannot start or its
//!   result cannot be delivered (input directory missing, nothing to process,
//!   nothing succeeded, output file not writable). Returned as
//!   `Err(PipelineError)` from the top-level `run_batch*` functions.
//!
//! * [`DocumentError`] is **fatal to one document**: conversion, text
//!   extraction, a malformed model answer or a transport problem. The batch
//!   records it inside [`crate::report::DocumentOutcome::Skipped`] and moves on
//!   to the next document.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the mrtp library.
///
/// Per-document failures use [`DocumentError`] and never surface here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input directory does not exist or is not a directory.
    #[error("Input directory not found: '{path}'")]
    InputDirNotFound { path: PathBuf },

    /// The input directory could not be listed.
    #[error("Failed to read input directory '{path}': {source}")]
    InputDirUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Discovery matched nothing.
    #[error("No {extensions} files found in '{path}'")]
    NoInputFiles { path: PathBuf, extensions: String },

    // ── Batch result ──────────────────────────────────────────────────────
    /// Every document was skipped; there is nothing to write.
    #[error("No data was processed successfully ({skipped}/{total} documents skipped).\nFirst error: {first_error}")]
    NoSuccessfulReports {
        total: usize,
        skipped: usize,
        first_error: String,
    },

    // ── Backend errors ────────────────────────────────────────────────────
    /// The HTTP client for the inference backend could not be built.
    #[error("Inference backend '{endpoint}' is not usable: {detail}")]
    BackendNotConfigured { endpoint: String, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not serialise the reports.
    #[error("Failed to serialise reports: {0}")]
    Serialization(#[from] serde_json::Error),

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium for your platform and either place it next to the \
executable or set PDFIUM_DYNAMIC_LIB_PATH=/path/to/libpdfium.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The four failure classes a single document can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The document could not be rendered to PDF.
    Conversion,
    /// Neither the text layer nor OCR produced usable text.
    Extraction,
    /// A model answer did not have the required shape.
    Parse,
    /// The inference backend could not be reached, timed out or answered non-2xx.
    Transport,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Conversion => "conversion failure",
            FailureKind::Extraction => "extraction failure",
            FailureKind::Parse => "parse failure",
            FailureKind::Transport => "transport failure",
        };
        f.write_str(s)
    }
}

/// A non-fatal error for a single document.
///
/// Stored in [`crate::report::SkippedDocument`] when a document is abandoned.
/// The batch continues with the next document.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum DocumentError {
    /// The office document could not be converted to PDF.
    #[error("conversion failed: {detail}")]
    Conversion { detail: String },

    /// No usable text from the text layer or from OCR.
    #[error("no text could be extracted: {detail}")]
    Extraction { detail: String },

    /// The model's answer could not be interpreted.
    ///
    /// `raw` keeps the full response for diagnostics.
    #[error("failed to parse {what}: {detail}")]
    Parse {
        what: String,
        detail: String,
        raw: String,
    },

    /// Network error, non-2xx status or timeout talking to the backend.
    #[error("inference request failed: {detail}")]
    Transport { detail: String },
}

impl DocumentError {
    /// The failure class of this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            DocumentError::Conversion { .. } => FailureKind::Conversion,
            DocumentError::Extraction { .. } => FailureKind::Extraction,
            DocumentError::Parse { .. } => FailureKind::Parse,
            DocumentError::Transport { .. } => FailureKind::Transport,
        }
    }

    /// The raw model response attached to a parse failure, if any.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            DocumentError::Parse { raw, .. } => Some(raw),
            _ => None,
        }
    }

    pub(crate) fn parse(what: impl Into<String>, detail: impl Into<String>, raw: &str) -> Self {
        DocumentError::Parse {
            what: what.into(),
            detail: detail.into(),
            raw: raw.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_successful_reports_display() {
        let e = PipelineError::NoSuccessfulReports {
            total: 3,
            skipped: 3,
            first_error: "conversion failed: soffice exited with 1".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("3/3"), "got: {msg}");
        assert!(msg.contains("soffice"), "got: {msg}");
    }

    #[test]
    fn no_input_files_display() {
        let e = PipelineError::NoInputFiles {
            path: PathBuf::from("/data/in"),
            extensions: ".docx".into(),
        };
        assert_eq!(e.to_string(), "No .docx files found in '/data/in'");
    }

    #[test]
    fn document_error_kinds() {
        let cases = [
            (DocumentError::Conversion { detail: "x".into() }, FailureKind::Conversion),
            (DocumentError::Extraction { detail: "x".into() }, FailureKind::Extraction),
            (DocumentError::parse("translation", "x", "raw"), FailureKind::Parse),
            (DocumentError::Transport { detail: "x".into() }, FailureKind::Transport),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn parse_error_keeps_raw_response() {
        let e = DocumentError::parse("structured record", "expected value", "not json");
        assert_eq!(e.raw_response(), Some("not json"));
        assert!(e.to_string().contains("structured record"));
        assert_eq!(DocumentError::Transport { detail: "t".into() }.raw_response(), None);
    }

    #[test]
    fn failure_kind_serialises_snake_case() {
        let s = serde_json::to_string(&FailureKind::Transport).unwrap();
        assert_eq!(s, "\"transport\"");
    }
}
