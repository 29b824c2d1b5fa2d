//! Progress-callback trait for per-document batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to receive
//! events as the orchestrator moves each document through its stages. The CLI
//! uses it to drive a terminal progress bar; library users can forward events
//! anywhere.
//!
//! # Example
//!
//! ```rust
//! use mrtp::{BatchProgressCallback, PipelineConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     done: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, index: usize, total: usize, name: &str) {
//!         self.done.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{index}/{total} {name} done");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { done: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::DocumentError;
use crate::report::DocumentStage;
use std::sync::Arc;

/// Called by the orchestrator as it processes each document.
///
/// Documents are processed one at a time, so events for different documents
/// never interleave. All methods default to no-ops.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once after discovery, before the first document.
    fn on_batch_start(&self, total_documents: usize) {
        let _ = total_documents;
    }

    /// Called when a document is pulled from the batch.
    ///
    /// `index` is 1-based.
    fn on_document_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called each time a document reaches a new stage.
    fn on_stage(&self, name: &str, stage: &DocumentStage) {
        let _ = (name, stage);
    }

    /// Called before each page is sent to OCR.
    ///
    /// `page` is 1-based.
    fn on_ocr_page(&self, name: &str, page: usize, total_pages: usize) {
        let _ = (name, page, total_pages);
    }

    /// Called when a document produced a report.
    fn on_document_complete(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called when a document is abandoned.
    ///
    /// `stage` is the last stage the document completed.
    fn on_document_skipped(
        &self,
        index: usize,
        total: usize,
        name: &str,
        stage: &DocumentStage,
        error: &DocumentError,
    ) {
        let _ = (index, total, name, stage, error);
    }

    /// Called once after every document reached a terminal state.
    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let _ = (total_documents, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct TrackingCallback {
        started: AtomicUsize,
        completed: AtomicUsize,
        skipped: AtomicUsize,
        success_total: AtomicUsize,
    }

    impl BatchProgressCallback for TrackingCallback {
        fn on_document_start(&self, _index: usize, _total: usize, _name: &str) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_complete(&self, _index: usize, _total: usize, _name: &str) {
            self.completed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_document_skipped(
            &self,
            _index: usize,
            _total: usize,
            _name: &str,
            _stage: &DocumentStage,
            _error: &DocumentError,
        ) {
            self.skipped.fetch_add(1, Ordering::SeqCst);
        }

        fn on_batch_complete(&self, _total: usize, success_count: usize) {
            self.success_total.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_document_start(1, 2, "a.docx");
        cb.on_stage("a.docx", &DocumentStage::Converted);
        cb.on_ocr_page("a.docx", 1, 3);
        cb.on_document_complete(1, 2, "a.docx");
        cb.on_document_skipped(
            2,
            2,
            "b.docx",
            &DocumentStage::Ingested,
            &DocumentError::Conversion { detail: "x".into() },
        );
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();
        tracker.on_document_start(1, 2, "a.docx");
        tracker.on_document_complete(1, 2, "a.docx");
        tracker.on_document_start(2, 2, "b.docx");
        tracker.on_document_skipped(
            2,
            2,
            "b.docx",
            &DocumentStage::TextResolved { used_ocr: false },
            &DocumentError::Transport { detail: "timeout".into() },
        );
        tracker.on_batch_complete(2, 1);

        assert_eq!(tracker.started.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completed.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.skipped.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.success_total.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: ProgressCallback = Arc::new(NoopProgressCallback);
        cb.on_batch_start(10);
        cb.on_document_start(1, 10, "x.docx");
    }
}
