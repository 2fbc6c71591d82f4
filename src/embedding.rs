//! Embedding backends and the startup selection ladder.
//!
//! Defines the [`Embedder`] trait and its implementations:
//! - **[`OpenAIEmbedder`]**: calls an OpenAI-compatible `/embeddings` endpoint with batching, retry and backoff.
//! - **[`OllamaEmbedder`]**: calls a local Ollama daemon's `/api/embed` endpoint.
//! - **`LocalEmbedder`**: runs a fastembed model in-process (feature `local-embeddings`); no network after model download.
//!
//! # Selection
//!
//! [`select_embedder`] walks `embedding.candidates` in order, builds each
//! backend and probes it with one embedding call. The first backend that
//! answers is returned and kept for the life of the process. When none
//! answers the caller falls back to keyword scoring ([`Tier::Keyword`]).
//!
//! | Candidate | Tier | Needs |
//! |-----------|------|-------|
//! | `openai` | [`Tier::Remote`] | `OPENAI_API_KEY` (or `embedding.api_key_env`) |
//! | `ollama` | [`Tier::Local`] | a running Ollama daemon |
//! | `local` | [`Tier::Local`] | feature `local-embeddings` |
//!
//! # Retry Strategy
//!
//! Remote backends use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::EmbeddingConfig;

/// Rung of the retrieval degradation ladder currently in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Remote,
    Local,
    Keyword,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Remote => "remote",
            Tier::Local => "local",
            Tier::Keyword => "keyword",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier stored alongside persisted vectors.
    fn model_name(&self) -> &str;
    fn tier(&self) -> Tier;
    /// Embed a batch of texts; one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(&[text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Empty embedding response"))
}

// ============ Selection ============

/// Try each configured candidate in order and return the first that
/// answers a probe embedding.
pub async fn select_embedder(config: &EmbeddingConfig) -> Option<Arc<dyn Embedder>> {
    for name in &config.candidates {
        let embedder = match build_candidate(name, config).await {
            Ok(e) => e,
            Err(e) => {
                warn!(candidate = %name, error = %e, "embedding candidate unavailable");
                continue;
            }
        };
        match probe(embedder.as_ref()).await {
            Ok(dims) => {
                info!(
                    candidate = %name,
                    model = embedder.model_name(),
                    dims,
                    tier = %embedder.tier(),
                    "embedding backend selected"
                );
                return Some(embedder);
            }
            Err(e) => warn!(candidate = %name, error = %e, "embedding probe failed"),
        }
    }
    warn!("no embedding backend available, retrieval uses keyword scoring");
    None
}

async fn build_candidate(name: &str, config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match name {
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => {
            let config = config.clone();
            let embedder =
                tokio::task::spawn_blocking(move || LocalEmbedder::new(&config)).await??;
            Ok(Arc::new(embedder))
        }
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("local embeddings require --features local-embeddings"),
        other => bail!("Unknown embedding candidate: {}", other),
    }
}

async fn probe(embedder: &dyn Embedder) -> Result<usize> {
    let vector = embed_query(embedder, "organizational readiness probe").await?;
    if vector.is_empty() {
        bail!("probe returned an empty vector");
    }
    Ok(vector.len())
}

// ============ OpenAI ============

/// Backend for the OpenAI embeddings API (or any compatible endpoint).
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    dims: Option<usize>,
    api_key: String,
    batch_size: usize,
    max_retries: u32,
}

impl OpenAIEmbedder {
    /// Fails when no API key was resolved from the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| anyhow!("{} environment variable not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dims: config.dims,
            api_key,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn tier(&self) -> Tier {
        Tier::Remote
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let mut body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            if let Some(dims) = self.dims {
                body["dimensions"] = serde_json::json!(dims);
            }
            let json = post_with_retry(
                &self.client,
                &format!("{}/embeddings", self.base_url),
                Some(&self.api_key),
                &body,
                self.max_retries,
                "OpenAI",
            )
            .await?;
            let vectors = parse_openai_response(&json)?;
            if vectors.len() != batch.len() {
                bail!(
                    "OpenAI returned {} embeddings for {} inputs",
                    vectors.len(),
                    batch.len()
                );
            }
            out.extend(vectors);
        }
        Ok(out)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, to_f32_vec(embedding)));
    }

    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Backend for a local Ollama daemon.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.ollama_url.trim_end_matches('/').to_string(),
            model: config.ollama_model.clone(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn tier(&self) -> Tier {
        Tier::Local
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_with_retry(
            &self.client,
            &format!("{}/api/embed", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await
        .map_err(|e| anyhow!("{} (is Ollama running at {}?)", e, self.url))?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| to_f32_vec(values))
                .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

// ============ Local (fastembed) ============

/// In-process embedding model. Loading downloads the model once into the
/// fastembed cache; inference runs on the blocking pool.
#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedder {
    model_name: String,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
    batch_size: usize,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedder {
    /// Blocking: may download model files.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config.local_model.clone();
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(to_fastembed_model(&model_name)?)
                .with_show_download_progress(false),
        )
        .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;
        Ok(Self {
            model_name,
            model: Arc::new(std::sync::Mutex::new(model)),
            batch_size: config.batch_size.max(1),
        })
    }
}

#[cfg(feature = "local-embeddings")]
fn to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, nomic-embed-text-v1.5",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn tier(&self) -> Tier {
        Tier::Local
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        let batch_size = self.batch_size;
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

// ============ Shared HTTP plumbing ============

/// POST a JSON body, retrying 429/5xx and network errors with backoff.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            debug!(attempt, ?delay, backend = label, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(anyhow!("{} API error {}: {}", label, status, body_text));
                    continue;
                }
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow!("{} connection error: {}", label, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} embedding failed after retries", label)))
}

fn to_f32_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian f32 bytes for SQLite BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`; `0.0` for empty or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
