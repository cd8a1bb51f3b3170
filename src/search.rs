//! Single-query similarity search in keyword or vector mode.
//!
//! # Keyword mode
//!
//! Query and chunk are tokenized independently. Text containing CJK
//! characters becomes overlapping character bigrams (whitespace removed);
//! anything else becomes lowercase words split on non-alphanumeric runs.
//!
//! ```text
//! score = |query tokens ∩ chunk tokens| / max(1, |query tokens|)
//! ```
//!
//! # Vector mode
//!
//! The query (truncated to `query_max_chars`) is embedded once, the corpus is
//! brought up to date in the embedding cache, and every chunk with a cached
//! vector is scored by cosine similarity. Chunks without a vector are skipped.
//!
//! Both modes filter to `score >= min_score`, sort descending with ties kept
//! in corpus order, and keep the first `top_k`.
//!
//! The entry point is [`RetrievalStore::search`](crate::store::RetrievalStore::search);
//! this module holds the scoring pieces.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::cache::EmbeddingCache;
use crate::config::VectorSettings;
use crate::embedding::cosine_similarity;
use crate::models::{Chunk, NoteHit};

/// Maximum snippet length in characters.
pub const SNIPPET_CHARS: usize = 160;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Keyword,
    Vector,
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchMode::Keyword => f.write_str("keyword"),
            SearchMode::Vector => f.write_str("vector"),
        }
    }
}

/// Per-call retrieval options.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub mode: SearchMode,
    pub top_k: usize,
    pub min_score: f64,
    /// Required in vector mode.
    pub vector: Option<VectorSettings>,
}

impl SearchOptions {
    pub fn keyword(top_k: usize, min_score: f64) -> Self {
        Self {
            mode: SearchMode::Keyword,
            top_k,
            min_score,
            vector: None,
        }
    }

    pub fn vector(top_k: usize, min_score: f64, settings: VectorSettings) -> Self {
        Self {
            mode: SearchMode::Vector,
            top_k,
            min_score,
            vector: Some(settings),
        }
    }
}

/// A chunk with its unrounded score.
#[derive(Debug, Clone, Copy)]
pub struct Ranked<'a> {
    pub chunk: &'a Chunk,
    pub score: f64,
}

impl Ranked<'_> {
    pub fn to_hit(&self) -> NoteHit {
        NoteHit {
            score: round_score(self.score),
            source: self.chunk.source.clone(),
            kind: self.chunk.kind.clone(),
            snippet: snippet(&self.chunk.text),
        }
    }
}

/// Check if a single character is CJK.
#[inline]
fn is_cjk_char(c: char) -> bool {
    let code = c as u32;
    (0x4E00..=0x9FFF).contains(&code) || // CJK Unified Ideographs
    (0x3400..=0x4DBF).contains(&code) || // Extension A
    (0x3040..=0x309F).contains(&code) || // Hiragana
    (0x30A0..=0x30FF).contains(&code) || // Katakana
    (0xAC00..=0xD7AF).contains(&code) // Hangul
}

pub fn has_cjk(text: &str) -> bool {
    text.chars().any(is_cjk_char)
}

/// Token set for keyword scoring.
pub fn tokenize(text: &str) -> HashSet<String> {
    let lower = text.to_lowercase();
    if has_cjk(&lower) {
        let chars: Vec<char> = lower.chars().filter(|c| !c.is_whitespace()).collect();
        if chars.len() == 1 {
            return chars.iter().map(|c| c.to_string()).collect();
        }
        return chars.windows(2).map(|w| w.iter().collect()).collect();
    }
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Fraction of query tokens present in `text`.
pub fn keyword_score(query_tokens: &HashSet<String>, text: &str) -> f64 {
    let chunk_tokens = tokenize(text);
    let overlap = query_tokens.intersection(&chunk_tokens).count();
    overlap as f64 / query_tokens.len().max(1) as f64
}

pub fn keyword_rank<'a>(query: &str, corpus: &'a [Chunk], top_k: usize, min_score: f64) -> Vec<Ranked<'a>> {
    let query_tokens = tokenize(query);
    let scored = corpus.iter().map(|chunk| Ranked {
        chunk,
        score: keyword_score(&query_tokens, &chunk.text),
    });
    select_top(scored, top_k, min_score)
}

/// Score every chunk that has a cached vector.
pub fn vector_rank<'a>(
    query_vec: &[f32],
    corpus: &'a [Chunk],
    cache: &EmbeddingCache,
    top_k: usize,
    min_score: f64,
) -> Vec<Ranked<'a>> {
    let scored = corpus.iter().filter_map(|chunk| {
        let vector = cache.get(&chunk.identity())?;
        Some(Ranked {
            chunk,
            score: cosine_similarity(query_vec, vector),
        })
    });
    select_top(scored, top_k, min_score)
}

fn select_top<'a>(scored: impl Iterator<Item = Ranked<'a>>, top_k: usize, min_score: f64) -> Vec<Ranked<'a>> {
    let mut ranked: Vec<Ranked<'a>> = scored.filter(|r| r.score >= min_score).collect();
    // Stable sort: ties keep corpus order
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranked.truncate(top_k);
    ranked
}

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Collapse whitespace runs and cap at [`SNIPPET_CHARS`] characters.
pub fn snippet(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, SNIPPET_CHARS).to_string()
}

/// Round to 3 decimals for display.
pub fn round_score(score: f64) -> f64 {
    (score * 1000.0).round() / 1000.0
}
