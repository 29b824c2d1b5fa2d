//! PDF access via pdfium: native text layer and page rasterization.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state; it must not run on the
//! Tokio worker threads. Both operations move onto the blocking pool.
//!
//! A fresh `Pdfium` handle is bound per operation because the upstream type
//! is not `Send`. The OS caches the `dlopen`, so repeat binds are cheap.

use crate::config::PipelineConfig;
use crate::error::{DocumentError, PipelineError};
use async_trait::async_trait;
use image::imageops::FilterType;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Access to the pages of a PDF.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Text of every page, concatenated in page order.
    async fn extract_text(&self, pdf: &Path) -> Result<String, DocumentError>;

    /// Every page as an image, in page order.
    async fn render_pages(&self, pdf: &Path) -> Result<Vec<DynamicImage>, DocumentError>;
}

/// [`PageSource`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumPageSource {
    dpi: u32,
    upscale: u32,
}

impl PdfiumPageSource {
    /// Create a page source, verifying that pdfium can be bound.
    pub fn new(dpi: u32, upscale: u32) -> Result<Self, PipelineError> {
        load_pdfium().map_err(|e| PipelineError::PdfiumBindingFailed(e.to_string()))?;
        Ok(Self {
            dpi,
            upscale: upscale.max(1),
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Self::new(config.dpi, config.upscale)
    }
}

#[async_trait]
impl PageSource for PdfiumPageSource {
    async fn extract_text(&self, pdf: &Path) -> Result<String, DocumentError> {
        let path = pdf.to_path_buf();
        tokio::task::spawn_blocking(move || extract_text_blocking(&path))
            .await
            .map_err(|e| DocumentError::Extraction {
                detail: format!("text task panicked: {e}"),
            })?
    }

    async fn render_pages(&self, pdf: &Path) -> Result<Vec<DynamicImage>, DocumentError> {
        let path = pdf.to_path_buf();
        let (dpi, upscale) = (self.dpi, self.upscale);
        tokio::task::spawn_blocking(move || render_pages_blocking(&path, dpi, upscale))
            .await
            .map_err(|e| DocumentError::Extraction {
                detail: format!("render task panicked: {e}"),
            })?
    }
}

/// Bind to the pdfium dynamic library.
///
/// Discovery order:
/// 1. `PDFIUM_DYNAMIC_LIB_PATH` env var (explicit path to the library file)
/// 2. Alongside the running executable
/// 3. The current directory
/// 4. System library search paths
fn load_pdfium() -> Result<Pdfium, DocumentError> {
    let bind_err = |e: PdfiumError| DocumentError::Extraction {
        detail: format!("cannot bind pdfium: {e:?}"),
    };

    if let Ok(path) = std::env::var("PDFIUM_DYNAMIC_LIB_PATH") {
        debug!(path = %path, "Loading pdfium from env var");
        let bindings = Pdfium::bind_to_library(&path).map_err(bind_err)?;
        return Ok(Pdfium::new(bindings));
    }

    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
        candidates.push(dir);
    }
    candidates.push(PathBuf::from("./"));

    for dir in &candidates {
        let lib = Pdfium::pdfium_platform_library_name_at_path(dir.to_string_lossy().as_ref());
        if let Ok(bindings) = Pdfium::bind_to_library(&lib) {
            debug!(dir = %dir.display(), "Loaded pdfium from candidate directory");
            return Ok(Pdfium::new(bindings));
        }
    }

    let bindings = Pdfium::bind_to_system_library().map_err(bind_err)?;
    Ok(Pdfium::new(bindings))
}

fn open_error(path: &Path) -> impl Fn(PdfiumError) -> DocumentError + '_ {
    move |e| DocumentError::Extraction {
        detail: format!("cannot open {}: {e:?}", path.display()),
    }
}

fn extract_text_blocking(pdf_path: &Path) -> Result<String, DocumentError> {
    let pdfium = load_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(open_error(pdf_path))?;

    let mut text = String::new();
    for (idx, page) in document.pages().iter().enumerate() {
        let page_text = page.text().map_err(|e| DocumentError::Extraction {
            detail: format!("text layer of page {} unreadable: {e:?}", idx + 1),
        })?;
        text.push_str(&page_text.all());
    }

    debug!(chars = text.chars().count(), "Extracted text layer");
    Ok(text)
}

fn render_pages_blocking(
    pdf_path: &Path,
    dpi: u32,
    upscale: u32,
) -> Result<Vec<DynamicImage>, DocumentError> {
    let pdfium = load_pdfium()?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(open_error(pdf_path))?;

    // PDF user space is 72 points per inch.
    let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);

    let pages = document.pages();
    let mut images = Vec::with_capacity(pages.len() as usize);

    for (idx, page) in pages.iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| DocumentError::Extraction {
                detail: format!("rasterisation failed for page {}: {e:?}", idx + 1),
            })?;

        let image = upscale_image(bitmap.as_image(), upscale);
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        images.push(image);
    }

    info!("Rendered {} pages at {} DPI ×{}", images.len(), dpi, upscale);
    Ok(images)
}

/// Bicubic upscale by an integer factor. A factor of 1 returns the image unchanged.
pub fn upscale_image(image: DynamicImage, factor: u32) -> DynamicImage {
    if factor <= 1 {
        return image;
    }
    let (w, h) = (image.width(), image.height());
    image.resize_exact(w.saturating_mul(factor), h.saturating_mul(factor), FilterType::CatmullRom)
}
