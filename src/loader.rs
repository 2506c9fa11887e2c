//! Document loading: read one file and split its text into pages.
//!
//! PDFs are extracted page by page with `pdf-extract`. Plain text and
//! Markdown files are read as UTF-8, with form feeds (`\x0c`) treated as page
//! breaks so pre-extracted text keeps its pagination.

use std::path::Path;

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{Document, Page};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";
pub const MIME_MARKDOWN: &str = "text/markdown";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported document type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("document is not valid UTF-8: {0}")]
    Encoding(String),
    #[error("document {0} contains no extractable text")]
    Empty(String),
}

/// Guess the content type from the file extension.
pub fn content_type_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "txt" | "text" => Some(MIME_TEXT),
        "md" | "markdown" => Some(MIME_MARKDOWN),
        _ => None,
    }
}

/// Load a document from disk into page-level text units.
///
/// Fails if the file cannot be read, its type is unsupported, or no page
/// contains any text.
pub fn load_document(path: &Path) -> Result<Document, LoadError> {
    let bytes = std::fs::read(path).map_err(|e| LoadError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let content_type = content_type_for(path)
        .ok_or_else(|| LoadError::UnsupportedContentType(path.display().to_string()))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let document = load_from_bytes(&name, path, &bytes, content_type)?;
    info!(
        document = %document.name,
        pages = document.pages.len(),
        bytes = document.text_len(),
        "loaded document"
    );
    Ok(document)
}

/// Build a [`Document`] from raw bytes of a known content type.
pub fn load_from_bytes(
    name: &str,
    path: &Path,
    bytes: &[u8],
    content_type: &str,
) -> Result<Document, LoadError> {
    let page_texts = match content_type {
        MIME_PDF => extract_pdf_pages(bytes)?,
        MIME_TEXT | MIME_MARKDOWN => {
            let text =
                std::str::from_utf8(bytes).map_err(|e| LoadError::Encoding(e.to_string()))?;
            text.split('\x0c').map(|s| s.to_string()).collect()
        }
        other => return Err(LoadError::UnsupportedContentType(other.to_string())),
    };

    let pages: Vec<Page> = page_texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| Page {
            number: i as u32 + 1,
            text,
        })
        .collect();

    if pages.iter().all(|p| p.text.trim().is_empty()) {
        return Err(LoadError::Empty(name.to_string()));
    }

    let mut hasher = Sha256::new();
    hasher.update(bytes);

    Ok(Document {
        name: name.to_string(),
        path: path.to_path_buf(),
        sha256: format!("{:x}", hasher.finalize()),
        pages,
    })
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, LoadError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| LoadError::Pdf(e.to_string()))?;
    debug!(pages = pages.len(), "extracted PDF pages");
    Ok(pages)
}
