//! TOML configuration parsing and one-shot resolution.
//!
//! [`load_config`] reads and validates the file; [`Config::resolve`] applies
//! environment fallbacks once and produces the immutable [`Settings`] value
//! everything downstream consumes.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cache::DEFAULT_BATCH_SIZE;
use crate::chunk::DEFAULT_MAX_CHUNK_CHARS;
use crate::error::ConfigError;
use crate::search::{SearchMode, SearchOptions};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub vector: VectorConfig,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/cache")
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_max_chunk_chars")]
    pub max_chunk_chars: usize,
    /// Directory per kind, e.g. `notes = "./notes"`.
    #[serde(default)]
    pub dirs: BTreeMap<String, PathBuf>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            max_chunk_chars: DEFAULT_MAX_CHUNK_CHARS,
            dirs: BTreeMap::new(),
        }
    }
}

fn default_max_chunk_chars() -> usize {
    DEFAULT_MAX_CHUNK_CHARS
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default)]
    pub mode: SearchMode,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::default(),
            top_k: default_top_k(),
            min_score: default_min_score(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_min_score() -> f64 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable consulted when `api_key` is empty.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_query_max_chars")]
    pub query_max_chars: usize,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            api_key: None,
            api_key_env: default_api_key_env(),
            model: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            batch_size: default_batch_size(),
            query_max_chars: default_query_max_chars(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_query_max_chars() -> usize {
    2000
}

fn default_base_url(provider: &str) -> &'static str {
    match provider {
        "ollama" => "http://localhost:11434",
        _ => "https://api.openai.com/v1",
    }
}

/// Fully-resolved embedding settings for one provider/endpoint/model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorSettings {
    pub provider: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub batch_size: usize,
    pub query_max_chars: usize,
}

impl VectorSettings {
    /// Settings with the default tuning values and the given identity fields.
    pub fn new(provider: &str, base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            provider: provider.to_string(),
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            batch_size: default_batch_size(),
            query_max_chars: default_query_max_chars(),
        }
    }

    /// Fail fast unless provider, base URL, API key, and model are all set.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let required = [
            ("provider", &self.provider),
            ("base_url", &self.base_url),
            ("api_key", &self.api_key),
            ("model", &self.model),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingVectorField(name));
            }
        }
        Ok(())
    }

    /// `provider|base_url|model`, the fingerprint of one embedding space.
    pub fn cache_key(&self) -> String {
        format!("{}|{}|{}", self.provider, self.base_url, self.model)
    }
}

/// Immutable settings produced once by [`Config::resolve`].
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache_dir: PathBuf,
    pub max_chunk_chars: usize,
    pub dirs: BTreeMap<String, PathBuf>,
    pub search: SearchOptions,
}

impl Config {
    /// Apply defaults and the API-key environment fallback.
    ///
    /// Vector settings are attached even when incomplete so that a vector
    /// search reports exactly which field is missing.
    pub fn resolve(&self) -> Settings {
        let v = &self.vector;
        let api_key = v
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(&v.api_key_env).ok())
            .unwrap_or_default();
        let base_url = v
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(&v.provider).to_string());

        let vector = VectorSettings {
            provider: v.provider.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: v.model.clone().unwrap_or_default(),
            timeout_secs: v.timeout_secs,
            max_retries: v.max_retries,
            batch_size: v.batch_size,
            query_max_chars: v.query_max_chars,
        };

        Settings {
            cache_dir: self.cache_dir.clone(),
            max_chunk_chars: self.corpus.max_chunk_chars,
            dirs: self.corpus.dirs.clone(),
            search: SearchOptions {
                mode: self.retrieval.mode,
                top_k: self.retrieval.top_k,
                min_score: self.retrieval.min_score,
                vector: Some(vector),
            },
        }
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.corpus.max_chunk_chars == 0 {
        bail!("corpus.max_chunk_chars must be > 0");
    }
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if config.vector.batch_size < 1 {
        bail!("vector.batch_size must be >= 1");
    }
    if config.vector.query_max_chars < 1 {
        bail!("vector.query_max_chars must be >= 1");
    }
    match config.vector.provider.as_str() {
        "openai" | "ollama" => {}
        other => bail!(ConfigError::UnknownProvider(other.to_string())),
    }

    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}
