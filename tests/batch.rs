//! Batch-level integration tests.
//!
//! The converter, the page source and the inference backend are replaced by
//! in-process fakes, so these run without LibreOffice, pdfium or a model
//! server. A fake "document" is a text file: its content is the PDF text
//! layer, or `SCAN:<n>` for an image-only document with `n` pages.

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use mrtp::{
    run_batch, run_batch_to_file, BatchProgressCallback, ChatBackend, ChatRequest, ConvertedPdf,
    DocumentConverter, DocumentError, DocumentStage, FailureKind, PageSource, PipelineConfig,
    PipelineError,
};
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const REPORT_TEXT: &str = "Пациент: группа 1, ID 7, возраст 40, пол М. \
ПЕЧЕНЬ: размеры не увеличены, структура однородная. \
ЗАКЛЮЧЕНИЕ: без патологии.";

// ── Fakes ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ScriptedBackend {
    requests: Mutex<Vec<ChatRequest>>,
    ocr_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    drop_kazakh_key: bool,
    /// 1-based OCR calls that time out.
    failing_ocr_calls: Vec<usize>,
    /// Every OCR call comes back blank.
    blank_ocr: bool,
}

impl ScriptedBackend {
    fn dropping_kazakh_key() -> Self {
        Self {
            drop_kazakh_key: true,
            ..Self::default()
        }
    }

    fn failing_ocr_calls(calls: &[usize]) -> Self {
        Self {
            failing_ocr_calls: calls.to_vec(),
            ..Self::default()
        }
    }

    fn blank_ocr() -> Self {
        Self {
            blank_ocr: true,
            ..Self::default()
        }
    }

    fn image_requests(&self) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.has_image())
            .count()
    }

    fn extraction_inputs(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.has_image() && r.messages[0].text().contains("data extraction"))
            .map(|r| r.messages[1].text())
            .collect()
    }

    fn reply(&self, request: &ChatRequest) -> Result<String, DocumentError> {
        if request.has_image() {
            let n = self.ocr_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.failing_ocr_calls.contains(&n) {
                return Err(DocumentError::Transport {
                    detail: "request timed out after 180s".into(),
                });
            }
            if self.blank_ocr {
                return Ok("  \n".to_string());
            }
            return Ok(format!("страница {n}: ПЕЧЕНЬ без особенностей"));
        }
        Ok(self.text_reply(request))
    }

    fn text_reply(&self, request: &ChatRequest) -> String {

        let system = request.messages[0].text();
        let user = request.messages[request.messages.len() - 1].text();

        if system.contains("data extraction") {
            if user.contains("NO_CAPTIONS") {
                return r#"{"patient_group": "1", "patient_id": "7", "age": "40", "gender": "М"}"#
                    .to_string();
            }
            return "```json\n{\n  \"patient_group\": \"1\",\n  \"patient_id\": \"7\",\n  \
                    \"age\": 40,\n  \"gender\": \"М\",\n  \"captions\": {\n    \
                    \"liver\": \"норма\",\n    \"conclusion\": \"без патологии\"\n  }\n}\n```"
                .to_string();
        }
        if system.contains("to English") {
            return r#"{"liver": "normal", "conclusion": "no pathology"}"#.to_string();
        }
        if system.contains("to Kazakh") {
            if self.drop_kazakh_key {
                return r#"{"liver": "қалыпты"}"#.to_string();
            }
            return r#"{"liver": "қалыпты", "conclusion": "патологиясыз"}"#.to_string();
        }
        "unexpected request".to_string()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<String, DocumentError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;

        self.requests.lock().unwrap().push(request.clone());
        let reply = self.reply(request);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
    }
}

/// Passes files through unchanged; names containing "broken" fail.
struct FakeConverter;

#[async_trait]
impl DocumentConverter for FakeConverter {
    async fn to_pdf(&self, input: &Path) -> Result<ConvertedPdf, DocumentError> {
        let name = input.file_name().unwrap().to_string_lossy();
        if name.contains("broken") {
            return Err(DocumentError::Conversion {
                detail: "soffice exited with exit status: 1".into(),
            });
        }
        Ok(ConvertedPdf::Original(input.to_path_buf()))
    }
}

struct FakePageSource;

fn read_fake(pdf: &Path) -> Result<String, DocumentError> {
    std::fs::read_to_string(pdf).map_err(|e| DocumentError::Extraction {
        detail: e.to_string(),
    })
}

#[async_trait]
impl PageSource for FakePageSource {
    async fn extract_text(&self, pdf: &Path) -> Result<String, DocumentError> {
        let content = read_fake(pdf)?;
        if content.starts_with("SCAN:") {
            Ok(String::new())
        } else {
            Ok(content)
        }
    }

    async fn render_pages(&self, pdf: &Path) -> Result<Vec<DynamicImage>, DocumentError> {
        let content = read_fake(pdf)?;
        // `SCAN:0` renders no pages at all.
        let pages = content
            .strip_prefix("SCAN:")
            .and_then(|n| n.trim().parse::<usize>().ok())
            .unwrap_or(1);
        Ok((0..pages)
            .map(|_| DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([255, 255, 255]))))
            .collect())
    }
}

#[derive(Default)]
struct RecordingProgress {
    ocr_pages: Mutex<Vec<(String, usize, usize)>>,
    skipped: Mutex<Vec<(String, DocumentStage)>>,
    batch: Mutex<Option<(usize, usize)>>,
}

impl BatchProgressCallback for RecordingProgress {
    fn on_ocr_page(&self, name: &str, page: usize, total_pages: usize) {
        self.ocr_pages
            .lock()
            .unwrap()
            .push((name.to_string(), page, total_pages));
    }

    fn on_document_skipped(
        &self,
        _index: usize,
        _total: usize,
        name: &str,
        stage: &DocumentStage,
        _error: &DocumentError,
    ) {
        self.skipped
            .lock()
            .unwrap()
            .push((name.to_string(), stage.clone()));
    }

    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        *self.batch.lock().unwrap() = Some((total_documents, success_count));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn input_dir(files: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, content) in files {
        std::fs::write(dir.path().join(name), content).unwrap();
    }
    dir
}

fn config_with(backend: Arc<ScriptedBackend>, progress: Option<Arc<RecordingProgress>>) -> PipelineConfig {
    let mut builder = PipelineConfig::builder()
        .backend(backend)
        .converter(Arc::new(FakeConverter))
        .page_source(Arc::new(FakePageSource));
    if let Some(p) = progress {
        builder = builder.progress_callback(p);
    }
    builder.build().unwrap()
}

fn read_output(path: &Path) -> Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn failed_conversion_is_skipped_and_order_is_kept() {
    let dir = input_dir(&[
        ("1.docx", REPORT_TEXT),
        ("2_broken.docx", REPORT_TEXT),
        ("3.docx", REPORT_TEXT),
    ]);
    let out = tempfile::tempdir().unwrap();
    let out_path = out.path().join("reports.json");
    let backend = Arc::new(ScriptedBackend::default());
    let progress = Arc::new(RecordingProgress::default());
    let config = config_with(backend.clone(), Some(progress.clone()));

    let stats = run_batch_to_file(dir.path(), &out_path, &config).await.unwrap();
    assert_eq!(stats.documents_found, 3);
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.skipped, 1);

    let value = read_output(&out_path);
    let names: Vec<_> = value
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["source_file"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["1.docx", "3.docx"]);

    let skipped = progress.skipped.lock().unwrap();
    assert_eq!(skipped.as_slice(), &[("2_broken.docx".to_string(), DocumentStage::Ingested)]);
    assert_eq!(*progress.batch.lock().unwrap(), Some((3, 2)));
}

#[tokio::test]
async fn empty_directory_reports_no_files_and_writes_nothing() {
    let dir = input_dir(&[("notes.txt", "not a report")]);
    let out = tempfile::tempdir().unwrap();
    let out_path = out.path().join("reports.json");
    let config = config_with(Arc::new(ScriptedBackend::default()), None);

    let err = run_batch_to_file(dir.path(), &out_path, &config).await.unwrap_err();
    assert!(matches!(err, PipelineError::NoInputFiles { .. }), "got: {err}");
    assert!(err.to_string().contains("No .docx files found"));
    assert!(!out_path.exists());
}

#[tokio::test]
async fn missing_input_directory_is_fatal() {
    let config = config_with(Arc::new(ScriptedBackend::default()), None);
    let err = run_batch("/definitely/not/here", &config).await.unwrap_err();
    assert!(matches!(err, PipelineError::InputDirNotFound { .. }));
}

#[tokio::test]
async fn extraction_without_captions_skips_the_document() {
    let dir = input_dir(&[
        ("a.docx", REPORT_TEXT),
        ("b.docx", &format!("{REPORT_TEXT} NO_CAPTIONS")),
    ]);
    let config = config_with(Arc::new(ScriptedBackend::default()), None);

    let output = run_batch(dir.path(), &config).await.unwrap();
    assert_eq!(output.reports.len(), 1);
    assert_eq!(output.reports[0].source_file, "a.docx");

    let skipped = &output.skipped[0];
    assert_eq!(skipped.source_file, "b.docx");
    assert_eq!(skipped.kind, FailureKind::Parse);
    assert_eq!(skipped.last_stage, DocumentStage::TextResolved { used_ocr: false });
    assert!(skipped.error.raw_response().unwrap().contains("patient_id"));
}

#[tokio::test]
async fn nothing_succeeded_means_no_output_file() {
    let dir = input_dir(&[("x_broken.docx", REPORT_TEXT), ("y_broken.docx", REPORT_TEXT)]);
    let out = tempfile::tempdir().unwrap();
    let out_path = out.path().join("reports.json");
    let config = config_with(Arc::new(ScriptedBackend::default()), None);

    let err = run_batch_to_file(dir.path(), &out_path, &config).await.unwrap_err();
    match err {
        PipelineError::NoSuccessfulReports {
            total,
            skipped,
            ref first_error,
        } => {
            assert_eq!((total, skipped), (2, 2));
            assert!(first_error.starts_with("x_broken.docx"), "got: {first_error}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!out_path.exists());
}

#[tokio::test]
async fn long_text_layer_never_calls_ocr() {
    let dir = input_dir(&[("a.docx", REPORT_TEXT)]);
    let backend = Arc::new(ScriptedBackend::default());
    let config = config_with(backend.clone(), None);

    let output = run_batch(dir.path(), &config).await.unwrap();
    assert_eq!(output.stats.succeeded, 1);
    assert_eq!(output.stats.ocr_documents, 0);
    assert_eq!(backend.image_requests(), 0);
    assert!(backend.extraction_inputs()[0].contains(REPORT_TEXT));
}

#[tokio::test]
async fn scanned_document_is_ocred_page_by_page_in_order() {
    let dir = input_dir(&[("scan.docx", "SCAN:3")]);
    let backend = Arc::new(ScriptedBackend::default());
    let progress = Arc::new(RecordingProgress::default());
    let config = config_with(backend.clone(), Some(progress.clone()));

    let output = run_batch(dir.path(), &config).await.unwrap();
    assert_eq!(output.stats.ocr_documents, 1);
    assert_eq!(output.stats.ocr_pages, 3);
    assert_eq!(output.stats.ocr_pages_failed, 0);
    assert_eq!(backend.image_requests(), 3);

    let pages: Vec<_> = progress
        .ocr_pages
        .lock()
        .unwrap()
        .iter()
        .map(|(_, page, total)| (*page, *total))
        .collect();
    assert_eq!(pages, vec![(1, 3), (2, 3), (3, 3)]);

    // OCR text replaces the empty text layer; pages are joined in order.
    let input = &backend.extraction_inputs()[0];
    let p1 = input.find("страница 1").unwrap();
    let p2 = input.find("страница 2").unwrap();
    let p3 = input.find("страница 3").unwrap();
    assert!(p1 < p2 && p2 < p3);
}

#[tokio::test]
async fn force_ocr_ignores_a_usable_text_layer() {
    let dir = input_dir(&[("a.docx", REPORT_TEXT)]);
    let backend = Arc::new(ScriptedBackend::default());
    let config = PipelineConfig::builder()
        .backend(backend.clone())
        .converter(Arc::new(FakeConverter))
        .page_source(Arc::new(FakePageSource))
        .force_ocr(true)
        .build()
        .unwrap();

    let output = run_batch(dir.path(), &config).await.unwrap();
    assert_eq!(output.stats.ocr_documents, 1);
    assert_eq!(backend.image_requests(), 1);
    assert!(!backend.extraction_inputs()[0].contains(REPORT_TEXT));
}

#[tokio::test]
async fn translation_key_mismatch_skips_the_document() {
    let dir = input_dir(&[("a.docx", REPORT_TEXT)]);
    let config = config_with(Arc::new(ScriptedBackend::dropping_kazakh_key()), None);

    let output = run_batch(dir.path(), &config).await.unwrap();
    assert!(output.is_empty());
    let skipped = &output.skipped[0];
    assert_eq!(skipped.kind, FailureKind::Parse);
    assert_eq!(
        skipped.last_stage,
        DocumentStage::Translated {
            language: "en".into()
        }
    );
}

#[tokio::test]
async fn requests_are_never_concurrent() {
    let dir = input_dir(&[("a.docx", REPORT_TEXT), ("b.docx", "SCAN:2"), ("c.docx", REPORT_TEXT)]);
    let backend = Arc::new(ScriptedBackend::default());
    let config = config_with(backend.clone(), None);

    let output = run_batch(dir.path(), &config).await.unwrap();
    assert_eq!(output.stats.succeeded, 3);
    assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn output_file_has_flat_multilingual_records() {
    let dir = input_dir(&[("report.docx", REPORT_TEXT)]);
    let out = tempfile::tempdir().unwrap();
    let out_path = out.path().join("nested/dir/reports.json");
    let config = config_with(Arc::new(ScriptedBackend::default()), None);

    run_batch_to_file(dir.path(), &out_path, &config).await.unwrap();

    let raw = std::fs::read_to_string(&out_path).unwrap();
    assert!(raw.contains("без патологии"), "Cyrillic must not be escaped");
    assert!(raw.contains("\n    {\n        \"source_file\""));

    let record = &read_output(&out_path)[0];
    let keys: Vec<_> = record.as_object().unwrap().keys().cloned().collect();
    for key in [
        "source_file",
        "patient_group",
        "patient_id",
        "age",
        "gender",
        "captions_ru",
        "captions_en",
        "captions_kz",
    ] {
        assert!(keys.contains(&key.to_string()), "missing {key}");
    }
    assert_eq!(record["age"], "40");
    assert_eq!(record["captions_ru"]["liver"], "норма");
    assert_eq!(record["captions_en"]["conclusion"], "no pathology");
    assert_eq!(record["captions_kz"]["conclusion"], "патологиясыз");
}

#[tokio::test]
async fn failed_ocr_page_is_skipped_and_document_still_succeeds() {
    let dir = input_dir(&[("scan.docx", "SCAN:3")]);
    let backend = Arc::new(ScriptedBackend::failing_ocr_calls(&[2]));
    let config = config_with(backend.clone(), None);

    let output = run_batch(dir.path(), &config).await.unwrap();
    assert_eq!(output.stats.succeeded, 1);
    assert_eq!(output.stats.ocr_pages, 3);
    assert_eq!(output.stats.ocr_pages_failed, 1);
    assert_eq!(backend.image_requests(), 3);

    let input = &backend.extraction_inputs()[0];
    assert!(input.contains("страница 1: ПЕЧЕНЬ без особенностей\n\nстраница 3"));
    assert!(!input.contains("страница 2"));
}

#[tokio::test]
async fn every_ocr_page_failing_is_an_extraction_failure() {
    let dir = input_dir(&[("scan.docx", "SCAN:2")]);
    let backend = Arc::new(ScriptedBackend::failing_ocr_calls(&[1, 2]));
    let config = config_with(backend.clone(), None);

    let output = run_batch(dir.path(), &config).await.unwrap();
    assert!(output.reports.is_empty());
    assert_eq!(output.skipped[0].kind, FailureKind::Extraction);
    assert_eq!(output.skipped[0].last_stage, DocumentStage::Converted);
    assert!(backend.extraction_inputs().is_empty());
}

#[tokio::test]
async fn blank_ocr_pages_are_an_extraction_failure() {
    let dir = input_dir(&[("scan.docx", "SCAN:2"), ("text.docx", REPORT_TEXT)]);
    let config = config_with(Arc::new(ScriptedBackend::blank_ocr()), None);

    let output = run_batch(dir.path(), &config).await.unwrap();
    assert_eq!(output.reports.len(), 1);
    assert_eq!(output.reports[0].source_file, "text.docx");
    assert_eq!(output.skipped[0].source_file, "scan.docx");
    assert_eq!(output.skipped[0].kind, FailureKind::Extraction);
}

#[tokio::test]
async fn document_without_pages_is_an_extraction_failure() {
    let dir = input_dir(&[("empty.docx", "SCAN:0")]);
    let backend = Arc::new(ScriptedBackend::default());
    let config = config_with(backend.clone(), None);

    let output = run_batch(dir.path(), &config).await.unwrap();
    assert!(output.reports.is_empty());
    assert_eq!(output.skipped[0].kind, FailureKind::Extraction);
    assert_eq!(backend.image_requests(), 0);
}
