//! Catalog document loading and chunking.
//!
//! Extracts plain text from the reference documents (PDF, txt, md) that
//! back the retrieval index, and splits it into fixed-size overlapping
//! character windows. Smaller windows improve recall but cost more context
//! tokens per retrieved item; the defaults live in
//! [`crate::config::GuichetConfig`].
//!
//! A corrupt or unsupported file yields
//! [`EngineError::UnreadableDocument`]; the directory loader logs it and
//! moves on, so one bad PDF never aborts an index build.

use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::vector_index::IndexedChunk;

/// One catalog document, reduced to plain text.
#[derive(Debug, Clone)]
pub struct CatalogDocument {
    /// Where the text came from (the file name).
    pub source_id: String,
    pub text: String,
}

/// Supplier of catalog documents for an index build.
///
/// The index cache only depends on this trait, so tests can count build
/// cycles with a spy implementation.
pub trait DocumentSource: Send + Sync {
    fn load(&self) -> Result<Vec<CatalogDocument>>;

    /// Newest modification time across the source documents, used for
    /// staleness checks on a persisted index. `None` means the source
    /// cannot tell, in which case a persisted copy is trusted.
    fn latest_modification(&self) -> Result<Option<SystemTime>> {
        Ok(None)
    }
}

fn is_supported(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref(),
        Some("pdf") | Some("txt") | Some("md") | Some("markdown")
    )
}

/// Extract plain text from a single document file.
///
/// # Errors
/// [`EngineError::UnreadableDocument`] when the file cannot be read,
/// cannot be parsed, or has an unsupported extension.
pub fn extract_text(path: &Path) -> Result<String> {
    let unreadable = |reason: String| EngineError::UnreadableDocument {
        path: path.display().to_string(),
        reason,
    };

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "pdf" => {
            let bytes = fs::read(path).map_err(|e| unreadable(e.to_string()))?;
            pdf_extract::extract_text_from_mem(&bytes)
                .map_err(|e| unreadable(format!("pdf parse error: {e}")))
        }
        "txt" | "md" | "markdown" => {
            fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))
        }
        other => Err(unreadable(format!("unsupported file type: .{other}"))),
    }
}

/// Loads every supported document under one directory.
pub struct CatalogLoader {
    dir: PathBuf,
}

impl CatalogLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn supported_files(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            warn!("catalog directory {} does not exist", self.dir.display());
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_supported(path))
            .collect();
        paths.sort();
        Ok(paths)
    }
}

impl DocumentSource for CatalogLoader {
    fn load(&self) -> Result<Vec<CatalogDocument>> {
        let mut documents = Vec::new();
        for path in self.supported_files()? {
            let source_id = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unnamed")
                .to_string();
            match extract_text(&path) {
                Ok(text) if !text.trim().is_empty() => {
                    documents.push(CatalogDocument { source_id, text });
                }
                Ok(_) => warn!("skipping {}: no extractable text", path.display()),
                Err(err) => warn!("skipping document: {err}"),
            }
        }
        Ok(documents)
    }

    fn latest_modification(&self) -> Result<Option<SystemTime>> {
        let mut newest = None;
        for path in self.supported_files()? {
            if let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) {
                newest = Some(newest.map_or(modified, |n: SystemTime| n.max(modified)));
            }
        }
        Ok(newest)
    }
}

/// Split text into overlapping character windows.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() || chunk_size == 0 {
        return vec![];
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let step = chunk_size.saturating_sub(overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + chunk_size).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim().to_string();
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
        if end >= chars.len() {
            break;
        }
        start += step;
    }

    chunks
}

/// Chunk a set of documents, tagging each chunk with its source.
pub fn split_documents(
    documents: &[CatalogDocument],
    chunk_size: usize,
    overlap: usize,
) -> Vec<IndexedChunk> {
    documents
        .iter()
        .flat_map(|doc| {
            chunk_text(&doc.text, chunk_size, overlap)
                .into_iter()
                .map(|text| IndexedChunk {
                    text,
                    source_id: doc.source_id.clone(),
                })
        })
        .collect()
}
