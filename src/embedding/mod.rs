//! Embedding API collaborator and vector utilities.
//!
//! Defines the [`Embedder`] trait the retrieval core talks to, and the
//! [`HttpEmbedder`] implementation:
//! - **`openai`**: `POST {base_url}/embeddings` on any OpenAI-compatible
//!   endpoint, bearer-token authenticated.
//! - **`ollama`**: `POST {base_url}/api/embed` on a local Ollama instance.
//!
//! Also provides [`cosine_similarity`] for scoring cached vectors.
//!
//! # Retry Strategy
//!
//! Retries belong to the collaborator, never to the core. [`HttpEmbedder`]
//! uses exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::VectorSettings;
use crate::error::ConfigError;

/// Anything that can turn a batch of texts into vectors.
///
/// Called with `1..=batch_size` texts at a time. The returned list is in input
/// order; an entry may be empty (or the list short) when the backend had no
/// vector for that text, and callers skip such entries.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow!("Empty embedding response for query"))
}

/// HTTP client for OpenAI-compatible and Ollama embedding endpoints.
pub struct HttpEmbedder {
    settings: VectorSettings,
    client: reqwest::Client,
}

impl HttpEmbedder {
    /// Build a client for `settings`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a required field is empty or the provider
    /// is unknown.
    pub fn new(settings: &VectorSettings) -> Result<Self> {
        settings.validate()?;
        match settings.provider.as_str() {
            "openai" | "ollama" => {}
            other => bail!(ConfigError::UnknownProvider(other.to_string())),
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            settings: settings.clone(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        match self.settings.provider.as_str() {
            "ollama" => format!("{}/api/embed", self.settings.base_url),
            _ => format!("{}/embeddings", self.settings.base_url),
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn model_name(&self) -> &str {
        &self.settings.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let provider = self.settings.provider.as_str();
        let url = self.endpoint();
        let body = serde_json::json!({
            "model": self.settings.model,
            "input": texts,
        });

        let mut last_err = None;

        for attempt in 0..=self.settings.max_retries {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s, 8s, ...
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                debug!(provider, attempt, ?delay, "retrying embedding request");
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(&body);
            if provider == "openai" {
                request = request.bearer_auth(&self.settings.api_key);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let text = response.text().await?;
                        return match provider {
                            "ollama" => parse_ollama_response(&text),
                            _ => parse_openai_response(&text),
                        };
                    }

                    let body_text = response.text().await.unwrap_or_default();

                    // Rate limited or server error, retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("{} embedding API error {}: {}", provider, status, body_text));
                        continue;
                    }

                    bail!("{} embedding API error {}: {}", provider, status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow!("{} connection error ({}): {}", provider, url, e));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Embedding failed after retries")))
    }
}

#[derive(Deserialize)]
struct OpenAIResponse {
    data: Vec<OpenAIEmbedding>,
}

#[derive(Deserialize)]
struct OpenAIEmbedding {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct OllamaResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Parse `data[].embedding`, re-ordered by `data[].index` when present.
fn parse_openai_response(body: &str) -> Result<Vec<Vec<f32>>> {
    let mut parsed: OpenAIResponse = serde_json::from_str(body)
        .map_err(|e| anyhow!("Invalid OpenAI embeddings response: {}", e))?;

    if parsed.data.iter().all(|d| d.index.is_some()) {
        parsed.data.sort_by_key(|d| d.index);
    }

    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
}

fn parse_ollama_response(body: &str) -> Result<Vec<Vec<f32>>> {
    let parsed: OllamaResponse = serde_json::from_str(body)
        .map_err(|e| anyhow!("Invalid Ollama embeddings response: {}", e))?;
    Ok(parsed.embeddings)
}

/// Cosine similarity over the overlapping prefix of `a` and `b`.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` when either prefix has zero
/// norm. Minor dimensionality mismatches are tolerated by ignoring the tail
/// of the longer vector.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let n = a.len().min(b.len());

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a[..n].iter().zip(&b[..n]) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}
