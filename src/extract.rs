//! Text extraction from input files.
//!
//! PDFs go through `pdf-extract`; anything else is read as UTF-8 text.
//! Extracted PDF pages are prefixed with `[Page N]` markers so citations
//! can point readers back to a location in the source document.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::info;

use docchat_core::Metadata;

/// Extraction output: the raw text plus metadata describing its origin.
pub struct Extracted {
    pub text: String,
    pub metadata: Metadata,
}

/// Extract text and source metadata from a file on disk.
pub fn extract_file(path: &Path) -> Result<Extracted> {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let (text, format) = match extension.as_str() {
        "pdf" => (extract_pdf(path)?, "pdf"),
        _ => (
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
            "text",
        ),
    };

    info!(file = %filename, format, chars = text.len(), "extracted document text");

    let mut metadata = Metadata::new();
    metadata.insert("filename".to_string(), Value::String(filename));
    metadata.insert("format".to_string(), Value::String(format.to_string()));

    Ok(Extracted { text, metadata })
}

fn extract_pdf(path: &Path) -> Result<String> {
    let raw = pdf_extract::extract_text(path)
        .with_context(|| format!("Failed to extract text from {}", path.display()))?;
    Ok(tag_pages(&raw))
}

/// Replace form-feed page breaks with `[Page N]` markers. Input without
/// form feeds is tagged as a single page.
fn tag_pages(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 16);
    for (i, page) in raw.split('\u{c}').enumerate() {
        if page.trim().is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&format!("[Page {}] ", i + 1));
        out.push_str(page.trim());
    }
    out
}
