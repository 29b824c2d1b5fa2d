//! Input discovery: list the documents of a batch.
//!
//! The listing is non-recursive and sorted by file name, so two runs over the
//! same directory process documents in the same order and produce the same
//! output order.

use crate::error::PipelineError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// List files in `dir` whose extension is one of `extensions` (case-insensitive).
///
/// Office lock files (`~$name.docx`) and hidden files are ignored.
pub fn discover_documents(dir: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, PipelineError> {
    if !dir.is_dir() {
        return Err(PipelineError::InputDirNotFound {
            path: dir.to_path_buf(),
        });
    }

    let entries = std::fs::read_dir(dir).map_err(|e| PipelineError::InputDirUnreadable {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            !name.starts_with("~$") && !name.starts_with('.')
        })
        .filter(|path| has_extension(path, extensions))
        .collect();

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    debug!("Discovered {} documents in {}", files.len(), dir.display());
    Ok(files)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|want| want.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Display name of a document: its file name.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
