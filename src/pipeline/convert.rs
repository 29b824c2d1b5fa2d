//! Document conversion: office document → PDF.
//!
//! pdfium needs a PDF on disk, so every input goes through a
//! [`DocumentConverter`] first. The default [`SofficeConverter`] shells out to
//! LibreOffice in headless mode and writes into a `TempDir` owned by the
//! returned [`ConvertedPdf`]; the PDF disappears when the job is dropped.
//! Inputs that already are PDFs pass through untouched.

use crate::config::PipelineConfig;
use crate::error::DocumentError;
use async_trait::async_trait;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

/// A PDF ready for the text-source stage.
#[derive(Debug)]
pub enum ConvertedPdf {
    /// The input already was a PDF.
    Original(PathBuf),
    /// Converted into a temp directory; kept alive until the job ends.
    Converted { path: PathBuf, _temp_dir: TempDir },
}

impl ConvertedPdf {
    /// Path to the PDF regardless of how it was obtained.
    pub fn path(&self) -> &Path {
        match self {
            ConvertedPdf::Original(p) => p,
            ConvertedPdf::Converted { path, .. } => path,
        }
    }
}

/// Converts a source document into a PDF.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    async fn to_pdf(&self, input: &Path) -> Result<ConvertedPdf, DocumentError>;
}

/// [`DocumentConverter`] backed by `soffice --headless --convert-to pdf`.
#[derive(Debug, Clone)]
pub struct SofficeConverter {
    command: String,
    timeout: Duration,
}

impl SofficeConverter {
    pub fn new(command: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            command: command.into(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(&config.converter_command, config.conversion_timeout_secs)
    }
}

#[async_trait]
impl DocumentConverter for SofficeConverter {
    async fn to_pdf(&self, input: &Path) -> Result<ConvertedPdf, DocumentError> {
        if is_pdf_path(input) {
            check_pdf_magic(input)?;
            debug!("{} is already a PDF", input.display());
            return Ok(ConvertedPdf::Original(input.to_path_buf()));
        }

        let temp_dir = TempDir::with_prefix("mrtp-").map_err(|e| DocumentError::Conversion {
            detail: format!("cannot create temp dir: {e}"),
        })?;
        let out_dir = temp_dir.path().join("out");
        // A private profile lets several converters run without fighting over the user profile lock.
        let profile_dir = temp_dir.path().join("profile");

        info!("Converting {} to PDF", input.display());
        let run = Command::new(&self.command)
            .arg(format!("-env:UserInstallation=file://{}", profile_dir.display()))
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(&out_dir)
            .arg(input)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| DocumentError::Conversion {
                detail: format!(
                    "{} did not finish within {}s",
                    self.command,
                    self.timeout.as_secs()
                ),
            })?
            .map_err(|e| DocumentError::Conversion {
                detail: format!("cannot run {}: {e}", self.command),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DocumentError::Conversion {
                detail: format!("{} exited with {}: {}", self.command, output.status, stderr.trim()),
            });
        }

        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let pdf_path = out_dir.join(format!("{stem}.pdf"));
        if !pdf_path.is_file() {
            return Err(DocumentError::Conversion {
                detail: format!("{} produced no PDF for {}", self.command, input.display()),
            });
        }
        check_pdf_magic(&pdf_path)?;

        debug!("Converted to temporary file {}", pdf_path.display());
        Ok(ConvertedPdf::Converted {
            path: pdf_path,
            _temp_dir: temp_dir,
        })
    }
}

fn is_pdf_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Reject files that do not start with `%PDF`.
fn check_pdf_magic(path: &Path) -> Result<(), DocumentError> {
    let mut magic = [0u8; 4];
    std::fs::File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map_err(|e| DocumentError::Conversion {
            detail: format!("cannot read {}: {e}", path.display()),
        })?;
    if &magic != b"%PDF" {
        return Err(DocumentError::Conversion {
            detail: format!("{} is not a PDF (first bytes {:?})", path.display(), magic),
        });
    }
    Ok(())
}
