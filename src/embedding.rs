//! Embedding provider abstraction, persistent cache, and vector utilities.
//!
//! Providers:
//! - **[`DisabledProvider`]** — returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]** — calls the OpenAI embeddings API with batching, retry, and backoff.
//! - **[`OllamaProvider`]** — calls a local Ollama instance's `/api/embed` endpoint.
//!
//! # Retry Strategy
//!
//! Transient errors are retried with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! On exhaustion the error surfaces as [`EngineError::ServiceUnavailable`],
//! or [`EngineError::Timeout`] when the last attempt hit its deadline.
//!
//! # Cache
//!
//! Results are cached in the `embedding_cache` table keyed by
//! `(sha256(text), model)`, so a model upgrade misses naturally and the
//! cache survives restarts. Two concurrent misses on the same text may both
//! call the provider; the last upsert wins, which is harmless since the
//! vector is deterministic for a given text and model.

use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{EngineError, Result};

/// Maximum number of texts accepted by [`embed_batch`].
pub const MAX_BATCH: usize = 100;

/// Trait for embedding providers.
///
/// Carries provider metadata; the actual embedding computation is performed
/// by [`embed_texts`] (kept as a free function due to async trait limitations).
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
}

/// Placeholder provider used when embeddings are not configured. The
/// cached paths still construct it so cache keys stay stable, but any
/// call that needs the network fails with `ServiceUnavailable`.
pub struct DisabledProvider;

impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
}

/// Embedding provider using the OpenAI API.
///
/// Calls the `POST /v1/embeddings` endpoint with the configured model.
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| EngineError::Config("embedding.model required for OpenAI provider".into()))?;
        let dims = config
            .dims
            .ok_or_else(|| EngineError::Config("embedding.dims required for OpenAI provider".into()))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(EngineError::Config(
                "OPENAI_API_KEY environment variable not set".into(),
            ));
        }

        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default
/// `http://localhost:11434`). Requires an embedding model to be pulled.
pub struct OllamaProvider {
    model: String,
    dims: usize,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| EngineError::Config("embedding.model required for Ollama provider".into()))?;
        let dims = config
            .dims
            .ok_or_else(|| EngineError::Config("embedding.dims required for Ollama provider".into()))?;

        Ok(Self { model, dims })
    }
}

impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        other => Err(EngineError::Config(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Validate a single embedding input. Callers must chunk oversized text
/// upstream; the engine never silently truncates.
pub fn validate_text(text: &str, max_chars: usize) -> Result<()> {
    if text.trim().is_empty() {
        return Err(EngineError::EmptyText);
    }
    let len = text.chars().count();
    if len > max_chars {
        return Err(EngineError::ContentTooLarge {
            len,
            max: max_chars,
        });
    }
    Ok(())
}

/// Embed a batch of texts using the configured provider, with retry and
/// backoff. Returns vectors in input order. No cache involvement; use
/// [`embed_query`] / [`embed_batch`] for the cached paths.
pub async fn embed_texts(config: &EmbeddingConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    match config.provider.as_str() {
        "openai" => call_with_retry(config, texts, "https://api.openai.com/v1/embeddings").await,
        "ollama" => {
            let base = config
                .url
                .clone()
                .unwrap_or_else(|| "http://localhost:11434".to_string());
            call_with_retry(config, texts, &format!("{}/api/embed", base)).await
        }
        "disabled" => Err(EngineError::ServiceUnavailable {
            service: "embedding",
            attempts: 0,
            reason: "embedding provider is disabled".into(),
        }),
        other => Err(EngineError::Config(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

async fn call_with_retry(
    config: &EmbeddingConfig,
    texts: &[String],
    endpoint: &str,
) -> Result<Vec<Vec<f32>>> {
    let model = config
        .model
        .as_ref()
        .ok_or_else(|| EngineError::Config("embedding.model required".into()))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let body = serde_json::json!({
        "model": model,
        "input": texts,
    });

    let is_openai = config.provider == "openai";
    let mut last_err: Option<EngineError> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut req = client.post(endpoint).json(&body);
        if is_openai {
            let api_key = std::env::var("OPENAI_API_KEY")
                .map_err(|_| EngineError::Config("OPENAI_API_KEY not set".into()))?;
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    let json: serde_json::Value = response.json().await?;
                    return if is_openai {
                        parse_openai_response(&json)
                    } else {
                        parse_ollama_response(&json)
                    };
                }

                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(EngineError::ServiceUnavailable {
                        service: "embedding",
                        attempts: attempt + 1,
                        reason: format!("{}: {}", status, body_text),
                    });
                    continue;
                }

                // Client error (not 429) — don't retry
                let body_text = response.text().await.unwrap_or_default();
                return Err(EngineError::ServiceUnavailable {
                    service: "embedding",
                    attempts: attempt + 1,
                    reason: format!("{}: {}", status, body_text),
                });
            }
            Err(e) => {
                last_err = Some(if e.is_timeout() {
                    EngineError::Timeout("embedding call")
                } else {
                    EngineError::ServiceUnavailable {
                        service: "embedding",
                        attempts: attempt + 1,
                        reason: e.to_string(),
                    }
                });
                continue;
            }
        }
    }

    Err(last_err.unwrap_or(EngineError::ServiceUnavailable {
        service: "embedding",
        attempts: 0,
        reason: "embedding failed after retries".into(),
    }))
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EngineError::Config("invalid OpenAI response: missing data array".into()))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| EngineError::Config("invalid OpenAI response: missing embedding".into()))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }

    Ok(embeddings)
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            EngineError::Config("invalid Ollama response: missing embeddings array".into())
        })?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| {
                EngineError::Config("invalid Ollama response: embedding is not an array".into())
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

/// Embed a single text through the cache.
///
/// Cache hit returns without a network call. On a miss the provider is
/// called, the result validated against the configured dimension, and the
/// vector stored for future lookups.
pub async fn embed_query(
    pool: &SqlitePool,
    config: &EmbeddingConfig,
    text: &str,
) -> Result<Vec<f32>> {
    validate_text(text, config.max_input_chars)?;

    let provider = create_provider(config)?;
    let model = provider.model_name().to_string();
    let hash = hash_text(text);

    if let Some(cached) = cache_get(pool, &hash, &model).await? {
        return Ok(cached);
    }

    let vectors = embed_texts(config, &[text.to_string()]).await?;
    let vec = vectors
        .into_iter()
        .next()
        .ok_or_else(|| EngineError::Config("empty embedding response".into()))?;

    let dims = provider.dims();
    if dims > 0 && vec.len() != dims {
        return Err(EngineError::DimensionMismatch {
            expected: dims,
            actual: vec.len(),
        });
    }

    cache_put(pool, &hash, &model, &vec).await?;
    Ok(vec)
}

/// Embed up to [`MAX_BATCH`] texts, returning a per-item outcome aligned
/// with the input. A single bad item (empty, oversized) never fails the
/// whole batch; a provider failure is reported on every item that needed
/// the provider, while cached items still succeed.
pub async fn embed_batch(
    pool: &SqlitePool,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Result<Vec<f32>>>> {
    if texts.len() > MAX_BATCH {
        return Err(EngineError::BatchTooLarge {
            len: texts.len(),
            max: MAX_BATCH,
        });
    }

    let provider = create_provider(config)?;
    let model = provider.model_name().to_string();
    let mut outcomes: Vec<Option<Result<Vec<f32>>>> = texts.iter().map(|_| None).collect();
    let mut misses: Vec<usize> = Vec::new();

    for (i, text) in texts.iter().enumerate() {
        if let Err(e) = validate_text(text, config.max_input_chars) {
            outcomes[i] = Some(Err(e));
            continue;
        }
        let hash = hash_text(text);
        match cache_get(pool, &hash, &model).await? {
            Some(vec) => outcomes[i] = Some(Ok(vec)),
            None => misses.push(i),
        }
    }

    if !misses.is_empty() {
        let miss_texts: Vec<String> = misses.iter().map(|&i| texts[i].clone()).collect();
        match embed_texts(config, &miss_texts).await {
            Ok(vectors) => {
                let dims = provider.dims();
                for (&i, vec) in misses.iter().zip(vectors.into_iter()) {
                    if dims > 0 && vec.len() != dims {
                        outcomes[i] = Some(Err(EngineError::DimensionMismatch {
                            expected: dims,
                            actual: vec.len(),
                        }));
                        continue;
                    }
                    let hash = hash_text(&texts[i]);
                    cache_put(pool, &hash, &model, &vec).await?;
                    outcomes[i] = Some(Ok(vec));
                }
            }
            Err(e) => {
                let reason = e.to_string();
                for &i in &misses {
                    outcomes[i] = Some(Err(EngineError::ServiceUnavailable {
                        service: "embedding",
                        attempts: config.max_retries + 1,
                        reason: reason.clone(),
                    }));
                }
            }
        }
    }

    Ok(outcomes
        .into_iter()
        .map(|o| o.unwrap_or(Err(EngineError::EmptyText)))
        .collect())
}

// ============ Cache ============

/// SHA-256 hex digest used as the cache key for a text.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

async fn cache_get(pool: &SqlitePool, hash: &str, model: &str) -> Result<Option<Vec<f32>>> {
    let row = sqlx::query("SELECT embedding FROM embedding_cache WHERE text_hash = ? AND model = ?")
        .bind(hash)
        .bind(model)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| {
        let blob: Vec<u8> = r.get("embedding");
        blob_to_vec(&blob)
    }))
}

async fn cache_put(pool: &SqlitePool, hash: &str, model: &str, vec: &[f32]) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO embedding_cache (text_hash, model, dims, embedding, created_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(text_hash, model) DO UPDATE SET
            dims = excluded.dims,
            embedding = excluded.embedding,
            created_at = excluded.created_at
        "#,
    )
    .bind(hash)
    .bind(model)
    .bind(vec.len() as i64)
    .bind(vec_to_blob(vec))
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Drop all cached vectors. Used by `embed rebuild` on a model upgrade.
pub async fn cache_clear(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM embedding_cache").execute(pool).await?;
    Ok(result.rows_affected())
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors of
/// different lengths.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_empty_and_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_validate_text_empty() {
        assert!(matches!(
            validate_text("   ", 100),
            Err(EngineError::EmptyText)
        ));
    }

    #[test]
    fn test_validate_text_too_large() {
        let text = "x".repeat(101);
        assert!(matches!(
            validate_text(&text, 100),
            Err(EngineError::ContentTooLarge { len: 101, max: 100 })
        ));
    }

    #[test]
    fn test_validate_text_at_limit() {
        let text = "x".repeat(100);
        assert!(validate_text(&text, 100).is_ok());
    }

    #[test]
    fn test_hash_text_stable() {
        assert_eq!(hash_text("alaska milk"), hash_text("alaska milk"));
        assert_ne!(hash_text("alaska milk"), hash_text("palmolive soap"));
    }

    #[test]
    fn test_create_provider_unknown_rejected() {
        let mut cfg = crate::config::EmbeddingConfig::default();
        cfg.provider = "cohere".to_string();
        assert!(matches!(
            create_provider(&cfg),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_provider_carries_config_metadata() {
        let mut cfg = crate::config::EmbeddingConfig::default();
        cfg.provider = "ollama".to_string();
        cfg.model = Some("nomic-embed-text".to_string());
        cfg.dims = Some(768);
        let provider = create_provider(&cfg).unwrap();
        assert_eq!(provider.model_name(), "nomic-embed-text");
        assert_eq!(provider.dims(), 768);
    }

    #[tokio::test]
    async fn test_embed_query_rejects_provider_without_model() {
        let pool = crate::db::connect_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        let mut cfg = crate::config::EmbeddingConfig::default();
        cfg.provider = "ollama".to_string(); // model and dims missing

        let err = embed_query(&pool, &cfg, "Alaska milk").await.unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn test_embed_batch_rejects_misconfigured_provider() {
        let pool = crate::db::connect_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        let mut cfg = crate::config::EmbeddingConfig::default();
        cfg.provider = "openai".to_string(); // model missing

        let err = embed_batch(&pool, &cfg, &["some text".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[tokio::test]
    async fn test_cache_roundtrip() {
        let pool = crate::db::connect_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        let vec = vec![0.5f32, -0.25, 1.0];
        cache_put(&pool, "h1", "model-a", &vec).await.unwrap();
        let hit = cache_get(&pool, "h1", "model-a").await.unwrap();
        assert_eq!(hit, Some(vec.clone()));

        // Different model version misses
        let miss = cache_get(&pool, "h1", "model-b").await.unwrap();
        assert!(miss.is_none());

        cache_clear(&pool).await.unwrap();
        assert!(cache_get(&pool, "h1", "model-a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_embed_batch_rejects_oversized_batch() {
        let pool = crate::db::connect_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        let texts: Vec<String> = (0..101).map(|i| format!("text {}", i)).collect();
        let cfg = crate::config::EmbeddingConfig::default();
        assert!(matches!(
            embed_batch(&pool, &cfg, &texts).await,
            Err(EngineError::BatchTooLarge { len: 101, max: 100 })
        ));
    }

    #[tokio::test]
    async fn test_embed_batch_partial_outcomes_with_disabled_provider() {
        let pool = crate::db::connect_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();

        let cfg = crate::config::EmbeddingConfig::default();
        // Pre-seed the cache so one item succeeds without a provider.
        cache_put(&pool, &hash_text("cached text"), "disabled", &[1.0, 0.0])
            .await
            .unwrap();

        let texts = vec![
            "cached text".to_string(),
            "".to_string(),
            "needs provider".to_string(),
        ];
        let outcomes = embed_batch(&pool, &cfg, &texts).await.unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_ok(), "cached item should succeed");
        assert!(matches!(outcomes[1], Err(EngineError::EmptyText)));
        assert!(matches!(
            outcomes[2],
            Err(EngineError::ServiceUnavailable { .. })
        ));
    }
}
