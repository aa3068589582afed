//! Document discovery.
//!
//! Collects the PDF and DOCX files to evaluate from explicit paths and
//! from a directory tree.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Extensions the extraction endpoint accepts.
pub const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "docx"];

/// Whether the path names a supported document, by extension.
pub fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_lowercase();
            DOCUMENT_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.') || name.starts_with("~$"))
            .unwrap_or(false)
}

/// Every document beneath `dir`, sorted by path. Hidden entries and
/// Office lock files are skipped.
pub fn scan_directory(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut documents = Vec::new();

    for entry in WalkDir::new(dir).into_iter().filter_entry(|e| !is_hidden(e)) {
        let entry =
            entry.with_context(|| format!("Failed to read directory: {}", dir.display()))?;
        if entry.file_type().is_file() && is_document(entry.path()) {
            documents.push(entry.into_path());
        }
    }

    documents.sort();
    debug!("Found {} documents in {}", documents.len(), dir.display());
    Ok(documents)
}

/// Explicit files first, in the order given, then the directory's
/// documents. Duplicates are dropped.
pub fn collect_documents(files: &[PathBuf], dir: Option<&Path>) -> Result<Vec<PathBuf>> {
    let mut documents: Vec<PathBuf> = Vec::new();

    let scanned = match dir {
        Some(dir) => scan_directory(dir)?,
        None => Vec::new(),
    };

    for path in files.iter().cloned().chain(scanned) {
        if !documents.contains(&path) {
            documents.push(path);
        }
    }

    Ok(documents)
}
