//! Embedding backfill: vectorize stored items that need it.
//!
//! An item needs embedding when it has no vector (ingested while the
//! provider was down or disabled) or when its vector was computed with a
//! different model than the one currently configured. Backfill runs in
//! batches through the cache, so re-running after a partial failure only
//! pays for the items that are still missing.

use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::{self, MAX_BATCH};
use crate::error::{EngineError, Result};
use crate::models::ItemMetadata;

/// Summary of a backfill pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmbedReport {
    /// Items that needed embedding.
    pub pending: usize,
    /// Items successfully embedded and stored.
    pub embedded: usize,
    /// Items whose embedding failed; they stay pending for the next pass.
    pub failed: usize,
}

/// Embed all items whose vector is missing or was computed with a
/// different model. `limit` caps how many items one pass touches;
/// `dry_run` reports what would be done without calling the provider.
pub async fn run_embed_pending(
    pool: &SqlitePool,
    config: &Config,
    limit: Option<usize>,
    dry_run: bool,
) -> Result<EmbedReport> {
    if !config.embedding.is_enabled() {
        return Err(EngineError::Config(
            "embedding provider is disabled; configure [embedding] first".into(),
        ));
    }
    let model = config
        .embedding
        .model
        .clone()
        .ok_or_else(|| EngineError::Config("embedding.model required".into()))?;

    let pending = fetch_pending(pool, &model, limit).await?;
    let mut report = EmbedReport {
        pending: pending.len(),
        ..EmbedReport::default()
    };

    if dry_run {
        info!(pending = report.pending, model = %model, "dry run; no items embedded");
        return Ok(report);
    }

    let batch_size = config.embedding.batch_size.min(MAX_BATCH).max(1);
    for chunk in pending.chunks(batch_size) {
        let texts: Vec<String> = chunk.iter().map(|p| p.text.clone()).collect();
        let outcomes = embedding::embed_batch(pool, &config.embedding, &texts).await?;

        for (item, outcome) in chunk.iter().zip(outcomes) {
            match outcome {
                Ok(vec) => {
                    store_vector(pool, item, &vec, &model).await?;
                    report.embedded += 1;
                }
                Err(e) => {
                    warn!(id = %item.id, error = %e, "embedding failed; item stays pending");
                    report.failed += 1;
                }
            }
        }
    }

    info!(
        pending = report.pending,
        embedded = report.embedded,
        failed = report.failed,
        model = %model,
        "embed pass complete"
    );
    Ok(report)
}

/// Clear every stored vector and the embedding cache, then re-embed the
/// whole corpus. Used after a model upgrade, where every cached and stored
/// vector is stale at once.
pub async fn run_embed_rebuild(pool: &SqlitePool, config: &Config) -> Result<EmbedReport> {
    if !config.embedding.is_enabled() {
        return Err(EngineError::Config(
            "embedding provider is disabled; configure [embedding] first".into(),
        ));
    }

    let cleared = sqlx::query(
        "UPDATE knowledge_items SET embedding = NULL, embedding_model = NULL, embedding_dims = NULL",
    )
    .execute(pool)
    .await?
    .rows_affected();
    let cache_dropped = embedding::cache_clear(pool).await?;
    info!(cleared, cache_dropped, "vectors cleared for rebuild");

    run_embed_pending(pool, config, None, false).await
}

struct PendingItem {
    id: String,
    text: String,
    metadata_json: String,
}

async fn fetch_pending(
    pool: &SqlitePool,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<PendingItem>> {
    let limit = limit.map(|l| l as i64).unwrap_or(-1);
    let rows = sqlx::query(
        r#"
        SELECT id, text, metadata_json
        FROM knowledge_items
        WHERE embedding IS NULL OR embedding_model IS NULL OR embedding_model != ?
        ORDER BY rowid
        LIMIT ?
        "#,
    )
    .bind(model)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| PendingItem {
            id: row.get("id"),
            text: row.get("text"),
            metadata_json: row.get("metadata_json"),
        })
        .collect())
}

async fn store_vector(
    pool: &SqlitePool,
    item: &PendingItem,
    vec: &[f32],
    model: &str,
) -> Result<()> {
    let mut metadata: ItemMetadata =
        serde_json::from_str(&item.metadata_json).unwrap_or_default();
    metadata.model_version = Some(model.to_string());

    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        UPDATE knowledge_items
        SET embedding = ?, embedding_model = ?, embedding_dims = ?,
            metadata_json = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(embedding::vec_to_blob(vec))
    .bind(model)
    .bind(vec.len() as i64)
    .bind(serde_json::to_string(&metadata)?)
    .bind(now)
    .bind(&item.id)
    .execute(pool)
    .await?;

    Ok(())
}
