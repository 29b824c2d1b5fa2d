//! Pipeline stages for report extraction.
//!
//! Each submodule implements one step. The external collaborators
//! (conversion, rasterization, the inference backend) sit behind traits so
//! every stage can be tested on its own with fakes.
//!
//! ## Data Flow
//!
//! ```text
//! discover ──▶ convert ──▶ resolve ──────────────▶ extract ──▶ translate ×N
//! (input dir)  (→ PDF)     ├ render (text layer)    (record)   (captions)
//!                          └ render → encode → ocr
//! ```
//!
//! 1. [`discover`]  list the input documents in a stable order
//! 2. [`convert`]   office document → PDF in a managed temp dir
//! 3. [`render`]    PDF text layer and page rasterization via pdfium
//! 4. [`encode`]    page image → JPEG `data:` URL
//! 5. [`ocr`]       one vision request per page
//! 6. [`resolve`]   text layer or OCR fallback, decided by an [`resolve::OcrPolicy`]
//! 7. [`json`]      fence stripping and strict JSON parsing of model answers
//! 8. [`extract`]   free text → [`crate::report::StructuredRecord`]
//! 9. [`translate`] captions → captions in a target language

pub mod convert;
pub mod discover;
pub mod encode;
pub mod extract;
pub mod json;
pub mod ocr;
pub mod render;
pub mod resolve;
pub mod translate;
