//! Overlapping fixed-size text chunker with cleaning.
//!
//! Splits cleaned document text into chunks of at most `max_size`
//! characters, each overlapping the previous by exactly `overlap`
//! characters. Chunk boundaries prefer whitespace near the cut point
//! (within a small lookback window) to avoid mid-word breaks, falling back
//! to a hard cut when no whitespace is nearby.
//!
//! # Algorithm
//!
//! 1. Clean the text: drop repeated header/footer lines, strip control
//!    characters, collapse whitespace runs to single spaces.
//! 2. Scan left to right; each chunk spans `[start, end)` where `end` is
//!    `start + max_size` clipped to the text length, possibly snapped back
//!    to a whitespace boundary.
//! 3. The next chunk starts at `end - overlap`, so rejoining the chunks
//!    after removing each chunk's trailing `overlap` characters (except the
//!    last) exactly reproduces the cleaned text.
//! 4. Stop once a chunk reaches the end of the text; no chunk is ever
//!    entirely contained in the previous chunk's overlap.
//!
//! # Example
//!
//! ```rust
//! use docchat_core::chunk::chunk_text;
//!
//! let chunks = chunk_text("doc-1", "ABCDEFGHIJ", 4, 2, &Default::default()).unwrap();
//! let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
//! assert_eq!(texts, ["ABCD", "CDEF", "EFGH", "GHIJ"]);
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::CoreError;
use crate::models::{Chunk, Metadata};

/// How far back from the hard cut point to look for a whitespace boundary.
const BOUNDARY_LOOKBACK: usize = 24;

/// A header/footer line must repeat at least this many times to be dropped.
const REPEATED_LINE_MIN_COUNT: usize = 3;

/// Lines longer than this are never treated as headers/footers.
const REPEATED_LINE_MAX_CHARS: usize = 80;

/// Split `text` into overlapping chunks carrying `metadata` plus their own
/// sequence index.
///
/// Empty (or whitespace-only) text yields an empty sequence, not an error.
///
/// # Errors
///
/// `InvalidConfiguration` unless `0 < overlap < max_size`.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_size: usize,
    overlap: usize,
    metadata: &Metadata,
) -> Result<Vec<Chunk>, CoreError> {
    validate_params(max_size, overlap)?;

    let cleaned = clean_text(text);
    if cleaned.is_empty() {
        return Ok(Vec::new());
    }

    let chars: Vec<char> = cleaned.chars().collect();
    let len = chars.len();

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0usize;

    loop {
        let hard_end = (start + max_size).min(len);
        let end = if hard_end < len {
            snap_to_whitespace(&chars, start, hard_end, overlap)
        } else {
            hard_end
        };

        let piece: String = chars[start..end].iter().collect();
        chunks.push(make_chunk(document_id, index, &piece, metadata));

        if end >= len {
            break;
        }
        start = end - overlap;
        index += 1;
    }

    Ok(chunks)
}

/// Validate chunking parameters: `0 < overlap < max_size`.
pub fn validate_params(max_size: usize, overlap: usize) -> Result<(), CoreError> {
    if max_size == 0 {
        return Err(CoreError::InvalidConfiguration(
            "chunk max_size must be > 0".to_string(),
        ));
    }
    if overlap == 0 || overlap >= max_size {
        return Err(CoreError::InvalidConfiguration(format!(
            "chunk overlap must satisfy 0 < overlap < max_size (got overlap={}, max_size={})",
            overlap, max_size
        )));
    }
    Ok(())
}

/// Clean raw extracted text before chunking.
///
/// - Drops lines that repeat across the document (page headers/footers):
///   a trimmed, non-empty line of at most 80 characters occurring three or
///   more times. This is a tunable heuristic, not an exact contract.
/// - Strips control characters.
/// - Collapses every whitespace run to a single space and trims the ends.
pub fn clean_text(text: &str) -> String {
    let without_repeats = drop_repeated_lines(text);

    let mut out = String::with_capacity(without_repeats.len());
    let mut pending_space = false;
    for c in without_repeats.chars() {
        if c.is_whitespace() {
            pending_space = true;
        } else if c.is_control() {
            // Non-whitespace control characters are dropped outright.
        } else {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        }
    }
    out
}

/// Remove lines that look like repeated page headers/footers.
fn drop_repeated_lines(text: &str) -> String {
    use std::collections::HashMap;

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if !trimmed.is_empty() && trimmed.chars().count() <= REPEATED_LINE_MAX_CHARS {
            *counts.entry(trimmed).or_insert(0) += 1;
        }
    }

    let has_repeats = counts.values().any(|&c| c >= REPEATED_LINE_MIN_COUNT);
    if !has_repeats {
        return text.to_string();
    }

    text.lines()
        .filter(|line| {
            let trimmed = line.trim();
            trimmed.is_empty()
                || counts
                    .get(trimmed)
                    .map(|&c| c < REPEATED_LINE_MIN_COUNT)
                    .unwrap_or(true)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Snap a cut point back to just after the nearest whitespace within the
/// lookback window. Falls back to the hard cut when no whitespace is found
/// or when snapping would stall the scan (`end - overlap <= start`).
fn snap_to_whitespace(chars: &[char], start: usize, hard_end: usize, overlap: usize) -> usize {
    let window_start = hard_end.saturating_sub(BOUNDARY_LOOKBACK).max(start);
    for pos in (window_start..hard_end).rev() {
        if chars[pos].is_whitespace() {
            let end = pos + 1;
            if end > start + overlap {
                return end;
            }
            break;
        }
    }
    hard_end
}

/// Create a single [`Chunk`] with a UUID and SHA-256 content hash.
fn make_chunk(document_id: &str, index: usize, text: &str, metadata: &Metadata) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
        metadata: metadata.clone(),
    }
}
