//! CLI binary for mrtp.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` and prints progress and results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use mrtp::{
    run_batch_to_file, BatchProgressCallback, DocumentError, DocumentStage, KeyMismatchPolicy,
    Language, PipelineConfig, PipelineError, ProgressCallback,
};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Exit status when documents were found but none produced a report.
const EXIT_NO_REPORTS: u8 = 2;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback ────────────────────────────────────────────────────

/// Per-document log lines on stdout, with an indicatif bar below them
/// unless `--no-progress` is set.
struct CliProgressCallback {
    bar: Option<ProgressBar>,
    document_started: Mutex<Option<Instant>>,
    skipped: AtomicUsize,
}

impl CliProgressCallback {
    fn new(with_bar: bool) -> Arc<Self> {
        let bar = with_bar.then(|| {
            let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stdout());
            let style = ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} documents  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
            bar.set_style(style);
            bar.set_prefix("Processing");
            bar.enable_steady_tick(Duration::from_millis(80));
            bar
        });

        Arc::new(Self {
            bar,
            document_started: Mutex::new(None),
            skipped: AtomicUsize::new(0),
        })
    }

    fn line(&self, text: String) {
        match self.bar {
            Some(ref bar) => bar.println(text),
            None => println!("{text}"),
        }
    }

    fn status(&self, text: String) {
        if let Some(ref bar) = self.bar {
            bar.set_message(text);
        }
    }

    fn elapsed(&self) -> String {
        let secs = self
            .document_started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        dim(&format!("{secs:.1}s"))
    }

    fn advance(&self) {
        if let Some(ref bar) = self.bar {
            bar.inc(1);
        }
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        if let Some(ref bar) = self.bar {
            bar.set_length(total_documents as u64);
            bar.reset_eta();
        }
        self.line(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Found {total_documents} documents to process"))
        ));
    }

    fn on_document_start(&self, index: usize, total: usize, name: &str) {
        if let Ok(mut t) = self.document_started.lock() {
            *t = Some(Instant::now());
        }
        if self.bar.is_none() {
            self.line(format!("[{index}/{total}] Processing: {name}"));
        }
        self.status(name.to_string());
    }

    fn on_stage(&self, name: &str, stage: &DocumentStage) {
        self.status(format!("{name}: {stage}"));
    }

    fn on_ocr_page(&self, name: &str, page: usize, total_pages: usize) {
        if self.bar.is_none() {
            self.line(format!("  OCR page {page}/{total_pages}"));
        }
        self.status(format!("{name}: OCR page {page}/{total_pages}"));
    }

    fn on_document_complete(&self, index: usize, total: usize, name: &str) {
        self.line(format!(
            "  {} [{:>3}/{:<3}]  {}  {}",
            green("✓"),
            index,
            total,
            name,
            self.elapsed(),
        ));
        self.advance();
    }

    fn on_document_skipped(
        &self,
        index: usize,
        total: usize,
        name: &str,
        stage: &DocumentStage,
        error: &DocumentError,
    ) {
        self.skipped.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let error = error.to_string();
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error
        };

        self.line(format!(
            "  {} [{:>3}/{:<3}]  {}  {}  {}",
            red("✗"),
            index,
            total,
            name,
            red(&format!("after {stage}: {msg}")),
            self.elapsed(),
        ));
        self.advance();
    }

    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
        let skipped = self.skipped.load(Ordering::SeqCst);
        println!(
            "{} {}/{} documents processed  ({} skipped)",
            if skipped == 0 {
                green("✔")
            } else if success_count == 0 {
                red("✘")
            } else {
                cyan("⚠")
            },
            bold(&success_count.to_string()),
            total_documents,
            skipped,
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Process every .docx in reports/ with a local LM Studio server
  mrtp --input-dir reports/ --output-file out/reports.json

  # Always OCR, even when the text layer looks usable
  mrtp --input-dir scans/ --output-file out.json --force-ocr

  # Different model and target languages
  mrtp -i reports/ -o out.json --model qwen2.5-vl-7b \
       --languages English:en,German:de

  # Retry malformed JSON answers once with a corrective prompt
  mrtp -i reports/ -o out.json --parse-retries 1

OUTPUT:
  One JSON array, one object per successful document:
    source_file, patient_group, patient_id, age, gender,
    captions_<source>, captions_<target>...
  Documents that fail any stage are left out. Nothing is written when
  no document succeeds (exit status 2).

ENVIRONMENT VARIABLES:
  MRTP_*                   Every flag can be set as MRTP_<FLAG>, e.g. MRTP_MODEL
  PDFIUM_DYNAMIC_LIB_PATH  Path to libpdfium (otherwise next to the binary,
                           the current directory, then system paths)
  RUST_LOG                 Override the log filter (logs go to stderr)

SETUP:
  1. Install LibreOffice (for `soffice`) and libpdfium.
  2. Start an OpenAI-compatible server with a vision model loaded.
  3. mrtp --input-dir reports/ --output-file out.json
"#;

/// Extract, structure and translate medical reports with a local LLM.
#[derive(Parser, Debug)]
#[command(
    name = "mrtp",
    version,
    about = "Extract, structure and translate medical reports with a local LLM",
    long_about = "Convert every office document in a directory to PDF, read its text \
(falling back to vision OCR for scanned pages), extract patient fields and per-organ \
findings as JSON, translate the findings, and write one JSON array of reports.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory containing the source documents.
    #[arg(short, long, env = "MRTP_INPUT_DIR")]
    input_dir: PathBuf,

    /// JSON file to write the reports to (parent directories are created).
    #[arg(short, long, env = "MRTP_OUTPUT_FILE")]
    output_file: PathBuf,

    /// Skip the text layer and OCR every page.
    #[arg(
        long,
        env = "MRTP_FORCE_OCR",
        num_args = 0..=1,
        default_value_t = false,
        default_missing_value = "true",
        action = clap::ArgAction::Set
    )]
    force_ocr: bool,

    /// Chat-completion endpoint URL.
    #[arg(long, env = "MRTP_ENDPOINT", default_value = mrtp::config::DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Model identifier.
    #[arg(long, env = "MRTP_MODEL", default_value = mrtp::config::DEFAULT_MODEL)]
    model: String,

    /// Bearer token for the endpoint.
    #[arg(long, env = "MRTP_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Per-request timeout in seconds.
    #[arg(long, env = "MRTP_TIMEOUT", default_value_t = 180)]
    timeout: u64,

    /// Minimum characters of direct text before OCR is skipped.
    #[arg(long, env = "MRTP_OCR_THRESHOLD", default_value_t = mrtp::config::DEFAULT_OCR_THRESHOLD)]
    ocr_threshold: usize,

    /// Source language as Name:code.
    #[arg(long, env = "MRTP_SOURCE_LANGUAGE", default_value = "Russian:ru")]
    source_language: String,

    /// Target languages as comma-separated Name:code pairs.
    #[arg(
        long,
        env = "MRTP_LANGUAGES",
        value_delimiter = ',',
        default_value = "English:en,Kazakh:kz"
    )]
    languages: Vec<String>,

    /// Rasterization DPI for OCR (72–1200).
    #[arg(long, env = "MRTP_DPI", default_value_t = 500,
          value_parser = clap::value_parser!(u32).range(72..=1200))]
    dpi: u32,

    /// Integer upscale factor applied after rasterization (1–8).
    #[arg(long, env = "MRTP_UPSCALE", default_value_t = 2,
          value_parser = clap::value_parser!(u32).range(1..=8))]
    upscale: u32,

    /// Office-to-PDF converter executable.
    #[arg(long, env = "MRTP_CONVERTER", default_value = "soffice")]
    converter: String,

    /// Input file extensions, comma-separated.
    #[arg(long, env = "MRTP_EXTENSIONS", value_delimiter = ',', default_value = "docx")]
    extensions: Vec<String>,

    /// Corrective re-prompts after a malformed JSON answer.
    #[arg(long, env = "MRTP_PARSE_RETRIES", default_value_t = 0)]
    parse_retries: u32,

    /// Transport retries per request (0–10).
    #[arg(long, env = "MRTP_MAX_RETRIES", default_value_t = 0,
          value_parser = clap::value_parser!(u32).range(0..=10))]
    max_retries: u32,

    /// What to do when a translation changes the key set.
    #[arg(long, env = "MRTP_KEY_MISMATCH", value_enum, default_value = "reject")]
    key_mismatch: KeyMismatchArg,

    /// Disable the progress bar (plain progress lines instead).
    #[arg(long, env = "MRTP_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "MRTP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "MRTP_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum KeyMismatchArg {
    Reject,
    Reconcile,
}

impl From<KeyMismatchArg> for KeyMismatchPolicy {
    fn from(v: KeyMismatchArg) -> Self {
        match v {
            KeyMismatchArg::Reject => KeyMismatchPolicy::Reject,
            KeyMismatchArg::Reconcile => KeyMismatchPolicy::Reconcile,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar carries the per-document feedback; library logs only
    // show warnings while it is active.
    let show_bar = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if show_bar {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if cli.quiet {
        None
    } else {
        Some(CliProgressCallback::new(show_bar) as Arc<dyn BatchProgressCallback>)
    };

    let config = build_config(&cli, progress_cb)?;

    // ── Run batch ────────────────────────────────────────────────────────
    match run_batch_to_file(&cli.input_dir, &cli.output_file, &config).await {
        Ok(stats) => {
            if !cli.quiet {
                println!(
                    "{}  {}/{} documents  {}ms  →  {}",
                    if stats.skipped == 0 {
                        green("✔")
                    } else {
                        cyan("⚠")
                    },
                    stats.succeeded,
                    stats.documents_found,
                    stats.total_duration_ms,
                    bold(&cli.output_file.display().to_string()),
                );
                if stats.ocr_documents > 0 {
                    println!(
                        "   {} via OCR  /  {} pages  /  {} pages without text",
                        dim(&stats.ocr_documents.to_string()),
                        dim(&stats.ocr_pages.to_string()),
                        dim(&stats.ocr_pages_failed.to_string()),
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ PipelineError::NoInputFiles { .. }) => {
            println!("{e}");
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ PipelineError::NoSuccessfulReports { .. }) => {
            println!("{e}");
            Ok(ExitCode::from(EXIT_NO_REPORTS))
        }
        Err(e) => Err(anyhow::Error::new(e).context("Batch failed")),
    }
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let source_language = Language::parse(&cli.source_language)
        .with_context(|| format!("Invalid --source-language '{}'", cli.source_language))?;
    let target_languages = parse_languages(&cli.languages)?;

    let mut builder = PipelineConfig::builder()
        .endpoint(&cli.endpoint)
        .model(&cli.model)
        .timeout_secs(cli.timeout)
        .ocr_threshold(cli.ocr_threshold)
        .force_ocr(cli.force_ocr)
        .dpi(cli.dpi)
        .upscale(cli.upscale)
        .source_language(source_language)
        .target_languages(target_languages)
        .input_extensions(cli.extensions.iter().map(|e| e.trim()))
        .converter_command(&cli.converter)
        .parse_retries(cli.parse_retries)
        .max_retries(cli.max_retries)
        .key_mismatch(cli.key_mismatch.clone().into());

    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Parse `--languages` entries into [`Language`]s.
fn parse_languages(specs: &[String]) -> Result<Vec<Language>> {
    let languages = specs
        .iter()
        .filter(|s| !s.trim().is_empty())
        .map(|s| Language::parse(s).with_context(|| format!("Invalid language '{s}', expected Name:code")))
        .collect::<Result<Vec<_>>>()?;

    if languages.is_empty() {
        anyhow::bail!("At least one target language is required");
    }
    Ok(languages)
}
