//! Core data models used throughout the retrieval core.
//!
//! These types represent the chunks produced from note directories and the
//! hits handed back to the evaluator.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// One bounded-length excerpt of a source file.
///
/// Chunks are immutable: an edited file produces new chunk text and therefore
/// a new [`identity`](Chunk::identity).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Caller-supplied category (`notes`, `rubrics`, `examples`, ...).
    pub kind: String,
    /// Absolute path of the file the chunk was cut from.
    pub source: PathBuf,
    pub text: String,
}

impl Chunk {
    pub fn new(kind: impl Into<String>, source: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            source: source.into(),
            text: text.into(),
        }
    }

    /// Content-addressed cache key: `source#sha256(text)`.
    pub fn identity(&self) -> String {
        format!("{}#{}", self.source.display(), hash_text(&self.text))
    }
}

/// A ranked retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteHit {
    /// Similarity (vector), overlap ratio (keyword), or the best raw score
    /// across fused queries. Rounded to 3 decimals.
    pub score: f64,
    pub source: PathBuf,
    pub kind: String,
    /// Whitespace-collapsed excerpt, at most 160 characters.
    pub snippet: String,
}

/// SHA-256 of `text` as lowercase hex.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
