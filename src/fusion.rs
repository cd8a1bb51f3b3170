//! Multi-query retrieval with reciprocal rank fusion.
//!
//! # Algorithm
//!
//! 1. Trim, drop empty, de-duplicate, and cap the queries at [`MAX_QUERIES`].
//! 2. Search each query at a widened depth `max(top_k, min(2·top_k, 20))`.
//! 3. For each `(source, snippet)` at 0-based rank `r` in a list, add
//!    `1 / (60 + r + 1)` to its fused score and remember the best raw score
//!    seen for it.
//! 4. Sort by fused score, then best raw score, then first appearance.
//! 5. Truncate to `top_k`.
//!
//! If fewer than `min(top_k, 3)` hits survive, the fusion reruns with a
//! relaxed threshold (`0.12` when the configured one was at least `0.2`, otherwise
//! `configured × 0.6`), then once more with `-1`.
//!
//! Each query is searched once, without a score floor. A ranked list sorted by
//! descending score filtered at a threshold is a prefix of that list, so every
//! relaxation step is a filter over the same lists and costs no extra
//! embedding calls.

use anyhow::Result;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::models::{Chunk, NoteHit};
use crate::search::{round_score, snippet, Ranked, SearchOptions};
use crate::store::RetrievalStore;

/// Most distinct queries fused in one call.
pub const MAX_QUERIES: usize = 8;

/// Reciprocal rank fusion constant.
pub const RRF_K: f64 = 60.0;

/// Queries searched at once; bounds concurrent embedding calls.
pub const QUERY_CONCURRENCY: usize = 4;

/// Threshold used by the final relaxation step (keeps every score).
const UNFILTERED: f64 = -1.0;

/// Trimmed, non-empty, de-duplicated queries in first-seen order, at most
/// [`MAX_QUERIES`].
pub fn normalize_queries<S: AsRef<str>>(queries: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    queries
        .iter()
        .map(|q| q.as_ref().trim())
        .filter(|q| !q.is_empty())
        .filter(|q| seen.insert(q.to_string()))
        .take(MAX_QUERIES)
        .map(str::to_string)
        .collect()
}

/// Per-query search depth before fusion.
pub fn widened_top_k(top_k: usize) -> usize {
    top_k.max((2 * top_k).min(20))
}

/// Threshold for the first relaxation step.
pub fn relaxed_min_score(min_score: f64) -> f64 {
    if min_score >= 0.2 {
        0.12
    } else {
        min_score * 0.6
    }
}

struct Fused<'a> {
    chunk: &'a Chunk,
    snippet: String,
    rrf: f64,
    best: f64,
}

/// Fuse ranked lists, keeping only entries scoring at least `min_score`.
pub fn rrf_fuse(lists: &[Vec<Ranked<'_>>], min_score: f64, top_k: usize) -> Vec<NoteHit> {
    let mut order: Vec<Fused<'_>> = Vec::new();
    let mut index: HashMap<(&Path, String), usize> = HashMap::new();

    for list in lists {
        let passing = list.iter().take_while(|r| r.score >= min_score);
        for (rank, ranked) in passing.enumerate() {
            let snip = snippet(&ranked.chunk.text);
            let key = (ranked.chunk.source.as_path(), snip.clone());
            let contribution = 1.0 / (RRF_K + rank as f64 + 1.0);

            match index.get(&key) {
                Some(&i) => {
                    let entry = &mut order[i];
                    entry.rrf += contribution;
                    entry.best = entry.best.max(ranked.score);
                }
                None => {
                    index.insert(key, order.len());
                    order.push(Fused {
                        chunk: ranked.chunk,
                        snippet: snip,
                        rrf: contribution,
                        best: ranked.score,
                    });
                }
            }
        }
    }

    // Stable: equal entries keep first-seen order
    order.sort_by(|a, b| {
        b.rrf
            .partial_cmp(&a.rrf)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.best.partial_cmp(&a.best).unwrap_or(std::cmp::Ordering::Equal))
    });
    order.truncate(top_k);

    order
        .into_iter()
        .map(|f| NoteHit {
            score: round_score(f.best),
            source: f.chunk.source.clone(),
            kind: f.chunk.kind.clone(),
            snippet: f.snippet,
        })
        .collect()
}

impl RetrievalStore {
    /// Search several related queries and fuse them into one ranked list.
    pub async fn search_multi<S: AsRef<str>>(
        &self,
        queries: &[S],
        corpus: &[Chunk],
        options: &SearchOptions,
    ) -> Result<Vec<NoteHit>> {
        let queries = normalize_queries(queries);

        let per_query = SearchOptions {
            top_k: widened_top_k(options.top_k),
            min_score: UNFILTERED,
            ..options.clone()
        };

        let lists: Vec<Vec<Ranked<'_>>> = stream::iter(queries.iter())
            .map(|q| self.search_ranked(q, corpus, &per_query))
            .buffered(QUERY_CONCURRENCY)
            .try_collect()
            .await?;

        let wanted = options.top_k.min(3);
        let mut hits = rrf_fuse(&lists, options.min_score, options.top_k);
        if hits.len() < wanted {
            let relaxed = relaxed_min_score(options.min_score);
            tracing::debug!(found = hits.len(), relaxed, "relaxing min_score");
            hits = rrf_fuse(&lists, relaxed, options.top_k);
            if hits.len() < wanted {
                hits = rrf_fuse(&lists, UNFILTERED, options.top_k);
            }
        }
        Ok(hits)
    }
}
