//! Background warmup: pre-fill the embedding cache for a whole corpus.
//!
//! Runs the same gap-filling and pruning as an interactive vector search, but
//! batch by batch with progress reports and cooperative cancellation, so the
//! first real query pays no cold-start embedding cost.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::VectorSettings;
use crate::models::Chunk;
use crate::progress::WarmupProgress;
use crate::store::RetrievalStore;

/// Outcome of a warmup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WarmupReport {
    /// Chunks that were missing an embedding when the pass started.
    pub total: usize,
    /// Embeddings computed by this pass.
    pub created: usize,
    /// Chunks that already had an embedding.
    pub cached: usize,
    /// True when cancellation stopped the pass early.
    pub aborted: bool,
}

impl RetrievalStore {
    /// Embed every chunk of `corpus` that has no cached vector.
    ///
    /// Reports `(0, total)` first and `(done, total)` after each batch. The
    /// cancel token is checked before each batch and never interrupts one in
    /// flight. Stale entries are pruned and the cache is saved when anything
    /// changed, including after cancellation.
    pub async fn warmup(
        &self,
        corpus: &[Chunk],
        settings: &VectorSettings,
        progress: &dyn WarmupProgress,
        cancel: &CancellationToken,
    ) -> Result<WarmupReport> {
        let embedder = self.embedder_for(settings)?;
        let cache = self.cache_for(settings).await;
        let mut cache = cache.lock().await;

        let pending = cache.missing(corpus);
        let embeddable: HashSet<String> = corpus
            .iter()
            .filter(|c| !c.text.trim().is_empty())
            .map(Chunk::identity)
            .collect();

        let mut report = WarmupReport {
            total: pending.len(),
            cached: embeddable.len() - pending.len(),
            ..WarmupReport::default()
        };

        progress.report(0, report.total);

        let mut done = 0;
        for batch in pending.chunks(settings.batch_size.max(1)) {
            if cancel.is_cancelled() {
                report.aborted = true;
                break;
            }
            report.created += cache.embed_batch(batch, embedder.as_ref()).await?;
            done += batch.len();
            progress.report(done, report.total);
        }

        let pruned = cache.prune(corpus);
        if report.created > 0 || pruned > 0 {
            cache.save().await?;
        }

        info!(
            model_key = cache.model_key(),
            path = %cache.path().display(),
            total = report.total,
            created = report.created,
            cached = report.cached,
            pruned,
            aborted = report.aborted,
            "warmup finished"
        );
        Ok(report)
    }
}
