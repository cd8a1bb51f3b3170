//! The retrieval store: explicit owner of every cache the core keeps.
//!
//! A [`RetrievalStore`] holds the corpus memo and one embedding cache per
//! `provider|base_url|model` key. The orchestrator creates one per session
//! (or per process) and drops it when done; nothing is shared through hidden
//! globals, so tests and concurrent sessions stay isolated.
//!
//! Each embedding cache sits behind its own async mutex, so concurrent
//! callers serialize writers per model key.

use anyhow::Result;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::cache::{cache_file_path, EmbeddingCache};
use crate::config::{Settings, VectorSettings};
use crate::corpus::{Corpus, CorpusBuilder};
use crate::embedding::{embed_query, Embedder, HttpEmbedder};
use crate::error::ConfigError;
use crate::models::{Chunk, NoteHit};
use crate::search::{keyword_rank, truncate_chars, vector_rank, Ranked, SearchMode, SearchOptions};

pub type SharedCache = Arc<AsyncMutex<EmbeddingCache>>;

pub struct RetrievalStore {
    cache_dir: PathBuf,
    corpus: CorpusBuilder,
    caches: Mutex<HashMap<String, SharedCache>>,
    embedders: Mutex<HashMap<String, Arc<dyn Embedder>>>,
    embedder_override: Option<Arc<dyn Embedder>>,
}

impl RetrievalStore {
    pub fn new(cache_dir: impl Into<PathBuf>, max_chunk_chars: usize) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            corpus: CorpusBuilder::new(max_chunk_chars),
            caches: Mutex::new(HashMap::new()),
            embedders: Mutex::new(HashMap::new()),
            embedder_override: None,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.cache_dir.clone(), settings.max_chunk_chars)
    }

    /// Use `embedder` for every vector operation instead of building an
    /// [`HttpEmbedder`] from the vector settings.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder_override = Some(embedder);
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn corpus_builder(&self) -> &CorpusBuilder {
        &self.corpus
    }

    /// Build (or reuse) the corpus for `dirs_by_kind`.
    pub async fn build(&self, dirs_by_kind: &BTreeMap<String, PathBuf>) -> Result<Corpus> {
        self.corpus.build(dirs_by_kind).await
    }

    /// Drop the corpus memo and all in-memory embedding caches.
    pub fn clear(&self) {
        self.corpus.invalidate();
        if let Ok(mut caches) = self.caches.lock() {
            caches.clear();
        }
        if let Ok(mut embedders) = self.embedders.lock() {
            embedders.clear();
        }
    }

    /// The embedding cache for `settings`, loaded from disk on first use.
    pub async fn cache_for(&self, settings: &VectorSettings) -> SharedCache {
        let key = settings.cache_key();
        let existing = self.caches.lock().ok().and_then(|c| c.get(&key).cloned());
        if let Some(cache) = existing {
            return cache;
        }

        let path = cache_file_path(&self.cache_dir, &key);
        let loaded = Arc::new(AsyncMutex::new(EmbeddingCache::load(path, &key).await));

        match self.caches.lock() {
            Ok(mut caches) => Arc::clone(caches.entry(key).or_insert(loaded)),
            Err(_) => loaded,
        }
    }

    /// Validated embedder for `settings`.
    pub fn embedder_for(&self, settings: &VectorSettings) -> Result<Arc<dyn Embedder>> {
        settings.validate()?;
        if let Some(embedder) = &self.embedder_override {
            return Ok(Arc::clone(embedder));
        }

        let key = settings.cache_key();
        if let Some(embedder) = self.embedders.lock().ok().and_then(|e| e.get(&key).cloned()) {
            return Ok(embedder);
        }
        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(settings)?);
        if let Ok(mut embedders) = self.embedders.lock() {
            embedders.insert(key, Arc::clone(&embedder));
        }
        Ok(embedder)
    }

    /// Fill the embedding cache for `corpus`. Returns the number of entries
    /// newly computed.
    pub async fn ensure_embeddings(&self, corpus: &[Chunk], settings: &VectorSettings) -> Result<usize> {
        let embedder = self.embedder_for(settings)?;
        let cache = self.cache_for(settings).await;
        let mut cache = cache.lock().await;
        cache
            .ensure_embeddings(corpus, embedder.as_ref(), settings.batch_size)
            .await
    }

    /// Top-K chunks for one query.
    ///
    /// In vector mode, incomplete vector settings fail with a [`ConfigError`]
    /// before any network call, even for an empty corpus.
    pub async fn search(&self, query: &str, corpus: &[Chunk], options: &SearchOptions) -> Result<Vec<NoteHit>> {
        let ranked = self.search_ranked(query, corpus, options).await?;
        Ok(ranked.iter().map(Ranked::to_hit).collect())
    }

    /// Like [`search`](Self::search) but with unrounded scores and borrowed
    /// chunks.
    pub async fn search_ranked<'a>(
        &self,
        query: &str,
        corpus: &'a [Chunk],
        options: &SearchOptions,
    ) -> Result<Vec<Ranked<'a>>> {
        match options.mode {
            SearchMode::Keyword => {
                if corpus.is_empty() || query.trim().is_empty() {
                    return Ok(Vec::new());
                }
                Ok(keyword_rank(query, corpus, options.top_k, options.min_score))
            }
            SearchMode::Vector => {
                let settings = options
                    .vector
                    .as_ref()
                    .ok_or(ConfigError::MissingVectorSettings)?;
                let embedder = self.embedder_for(settings)?;
                if corpus.is_empty() || query.trim().is_empty() {
                    return Ok(Vec::new());
                }

                let query = truncate_chars(query.trim(), settings.query_max_chars);
                let query_vec = embed_query(embedder.as_ref(), query).await?;

                let cache = self.cache_for(settings).await;
                let mut cache = cache.lock().await;
                let created = cache
                    .ensure_embeddings(corpus, embedder.as_ref(), settings.batch_size)
                    .await?;
                if created > 0 {
                    debug!(created, "embedded new chunks during search");
                }

                Ok(vector_rank(&query_vec, corpus, &cache, options.top_k, options.min_score))
            }
        }
    }
}
