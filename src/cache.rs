//! Content-addressed embedding cache backed by one JSON file per model.
//!
//! Entries map a chunk [identity](crate::models::Chunk::identity) to its
//! vector. The file lives at `{cache_dir}/embeddings-{hash}.json`, where the
//! hash is derived from `provider|base_url|model`, so different embedding
//! spaces never share a file.
//!
//! # File format
//!
//! ```json
//! { "version": 1, "modelKey": "openai|https://api.openai.com/v1|text-embedding-3-small",
//!   "items": { "/notes/a.md#9f86d0...": [0.01, -0.2, ...] } }
//! ```
//!
//! A file that is missing, malformed, from another version, or for another
//! model key loads as a cold (empty) cache. It is never an error.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::embedding::Embedder;
use crate::models::{hash_text, Chunk};

/// Current on-disk format version.
pub const CACHE_VERSION: u32 = 1;

/// Default number of texts per embedding call.
pub const DEFAULT_BATCH_SIZE: usize = 16;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheFile {
    version: u32,
    model_key: String,
    items: HashMap<String, Vec<f32>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheFileRef<'a> {
    version: u32,
    model_key: &'a str,
    items: BTreeMap<&'a str, &'a [f32]>,
}

/// Why a cache file was not used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColdReason {
    Missing,
    Unreadable(String),
    Malformed(String),
    VersionMismatch(u32),
    ModelKeyMismatch(String),
}

/// Outcome of reading a cache file.
#[derive(Debug)]
pub enum CacheLoad {
    Warm(HashMap<String, Vec<f32>>),
    Cold(ColdReason),
}

/// Cache file path for a `provider|base_url|model` key.
pub fn cache_file_path(cache_dir: &Path, model_key: &str) -> PathBuf {
    let digest = hash_text(model_key);
    cache_dir.join(format!("embeddings-{}.json", &digest[..16]))
}

/// Read and validate a cache file.
pub async fn read_cache_file(path: &Path, model_key: &str) -> CacheLoad {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return CacheLoad::Cold(ColdReason::Missing)
        }
        Err(e) => return CacheLoad::Cold(ColdReason::Unreadable(e.to_string())),
    };
    parse_cache_file(&content, model_key)
}

fn parse_cache_file(content: &str, model_key: &str) -> CacheLoad {
    let file: CacheFile = match serde_json::from_str(content) {
        Ok(file) => file,
        Err(e) => return CacheLoad::Cold(ColdReason::Malformed(e.to_string())),
    };
    if file.version != CACHE_VERSION {
        return CacheLoad::Cold(ColdReason::VersionMismatch(file.version));
    }
    if file.model_key != model_key {
        return CacheLoad::Cold(ColdReason::ModelKeyMismatch(file.model_key));
    }
    let items = file
        .items
        .into_iter()
        .filter(|(_, v)| !v.is_empty())
        .collect();
    CacheLoad::Warm(items)
}

/// A chunk queued for embedding.
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub identity: String,
    pub text: String,
}

/// In-memory embedding map for one model key, bound to its cache file.
#[derive(Debug)]
pub struct EmbeddingCache {
    model_key: String,
    path: PathBuf,
    items: HashMap<String, Vec<f32>>,
}

impl EmbeddingCache {
    /// An empty cache that will persist to `path`.
    pub fn empty(path: PathBuf, model_key: &str) -> Self {
        Self {
            model_key: model_key.to_string(),
            path,
            items: HashMap::new(),
        }
    }

    /// Load the cache at `path`, falling back to an empty cache.
    pub async fn load(path: PathBuf, model_key: &str) -> Self {
        let mut cache = Self::empty(path, model_key);
        match read_cache_file(&cache.path, model_key).await {
            CacheLoad::Warm(items) => {
                debug!(path = %cache.path.display(), entries = items.len(), "embedding cache loaded");
                cache.items = items;
            }
            CacheLoad::Cold(reason) => {
                debug!(path = %cache.path.display(), ?reason, "starting with a cold embedding cache");
            }
        }
        cache
    }

    pub fn model_key(&self) -> &str {
        &self.model_key
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, identity: &str) -> Option<&[f32]> {
        self.items.get(identity).map(Vec::as_slice)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.items.contains_key(identity)
    }

    /// Chunks with non-empty text and no cached vector, one per identity,
    /// in corpus order.
    pub fn missing(&self, corpus: &[Chunk]) -> Vec<PendingChunk> {
        let mut seen = HashSet::new();
        corpus
            .iter()
            .filter(|c| !c.text.trim().is_empty())
            .filter_map(|c| {
                let identity = c.identity();
                if self.items.contains_key(&identity) || !seen.insert(identity.clone()) {
                    return None;
                }
                Some(PendingChunk {
                    identity,
                    text: c.text.clone(),
                })
            })
            .collect()
    }

    /// Embed one batch and store every non-empty vector returned.
    ///
    /// Returns the number of entries created. A text without a usable vector
    /// is skipped and will be queued again on the next pass.
    pub async fn embed_batch(&mut self, batch: &[PendingChunk], embedder: &dyn Embedder) -> Result<usize> {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;

        let mut created = 0;
        for (item, vector) in batch.iter().zip(vectors) {
            if vector.is_empty() {
                continue;
            }
            self.items.insert(item.identity.clone(), vector);
            created += 1;
        }
        if created < batch.len() {
            debug!(
                model = embedder.model_name(),
                requested = batch.len(),
                created,
                "embedding batch returned fewer vectors"
            );
        }
        Ok(created)
    }

    /// Drop entries whose identity is not produced by `corpus`. Returns the
    /// number removed.
    pub fn prune(&mut self, corpus: &[Chunk]) -> usize {
        let live: HashSet<String> = corpus.iter().map(Chunk::identity).collect();
        let before = self.items.len();
        self.items.retain(|identity, _| live.contains(identity));
        before - self.items.len()
    }

    /// Write the cache file atomically, creating the directory if needed.
    pub async fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create cache dir: {}", dir.display()))?;
        }

        let file = CacheFileRef {
            version: CACHE_VERSION,
            model_key: &self.model_key,
            items: self
                .items
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_slice()))
                .collect(),
        };
        let json = serde_json::to_vec(&file)?;

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json)
            .await
            .with_context(|| format!("Failed to write cache file: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("Failed to replace cache file: {}", self.path.display()))?;
        Ok(())
    }

    /// Fill every gap for `corpus`, prune stale entries, and persist if
    /// anything changed. Returns the number of newly computed entries.
    ///
    /// Batches are issued strictly one after another. An embedding failure
    /// propagates; entries from earlier batches stay in memory.
    pub async fn ensure_embeddings(
        &mut self,
        corpus: &[Chunk],
        embedder: &dyn Embedder,
        batch_size: usize,
    ) -> Result<usize> {
        let pending = self.missing(corpus);
        let mut created = 0;
        for batch in pending.chunks(batch_size.max(1)) {
            created += self.embed_batch(batch, embedder).await?;
        }

        let pruned = self.prune(corpus);
        if created > 0 || pruned > 0 {
            info!(
                model = embedder.model_name(),
                path = %self.path().display(),
                created,
                pruned,
                entries = self.items.len(),
                "saving embedding cache"
            );
            self.save().await?;
        }
        Ok(created)
    }
}
