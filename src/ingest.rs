//! Batch ingestion of knowledge items.
//!
//! Each record is processed independently: a bad record yields a `failed`
//! outcome in its batch position and never aborts the rest. Records with a
//! `source_ref` matching an existing item update it in place, so upstream
//! pipelines can re-push the same export idempotently.

use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::embedding;
use crate::error::{EngineError, Result};
use crate::models::{IngestOutcome, IngestRecord, IngestStatus, KnowledgeItem};
use crate::vector_store::VectorStore;

/// Ingest a batch of records, returning one outcome per record in order.
///
/// Embedding is best-effort: if the provider is down or disabled the item
/// is still stored with no vector and picked up later by the pending-embed
/// pass. A provided vector with the wrong dimension is a hard per-item
/// failure, not something to silently fix.
pub async fn run_ingest(
    pool: &SqlitePool,
    config: &Config,
    records: Vec<IngestRecord>,
) -> Result<Vec<IngestOutcome>> {
    let dims = config.embedding.dims.unwrap_or(0);
    let store = VectorStore::new(pool.clone(), dims);
    let mut outcomes = Vec::with_capacity(records.len());

    for record in records {
        outcomes.push(ingest_one(pool, config, &store, record).await);
    }

    let created = count_status(&outcomes, IngestStatus::Created);
    let updated = count_status(&outcomes, IngestStatus::Updated);
    let failed = count_status(&outcomes, IngestStatus::Failed);
    info!(created, updated, failed, "ingest batch complete");

    Ok(outcomes)
}

async fn ingest_one(
    pool: &SqlitePool,
    config: &Config,
    store: &VectorStore,
    record: IngestRecord,
) -> IngestOutcome {
    if record.text.trim().is_empty() {
        return failed(None, EngineError::EmptyText);
    }

    let dims = config.embedding.dims.unwrap_or(0);
    if let Some(vec) = &record.embedding {
        if dims > 0 && vec.len() != dims {
            return failed(
                None,
                EngineError::DimensionMismatch {
                    expected: dims,
                    actual: vec.len(),
                },
            );
        }
    }

    // Re-ingest of the same source record updates the existing item.
    let (id, status) = match &record.source_ref {
        Some(source) => match store.find_by_source(source).await {
            Ok(Some(existing)) => (existing, IngestStatus::Updated),
            Ok(None) => (Uuid::new_v4().to_string(), IngestStatus::Created),
            Err(e) => return failed(None, e),
        },
        None => (Uuid::new_v4().to_string(), IngestStatus::Created),
    };

    let mut metadata = record.metadata;
    let embedding = match record.embedding {
        Some(vec) => Some(vec),
        None if config.embedding.is_enabled() => {
            match embedding::embed_query(pool, &config.embedding, &record.text).await {
                Ok(vec) => Some(vec),
                Err(e) => {
                    warn!(error = %e, "inline embedding failed; item stored without vector");
                    None
                }
            }
        }
        None => None,
    };
    if embedding.is_some() {
        metadata.model_version = config.embedding.model.clone();
    }

    let now = chrono::Utc::now().timestamp();
    let item = KnowledgeItem {
        id: id.clone(),
        content_kind: record.content_kind,
        text: record.text,
        embedding,
        metadata,
        source_ref: record.source_ref,
        created_at: now,
        updated_at: now,
    };

    match store.upsert(&item).await {
        Ok(()) => IngestOutcome {
            id: Some(id),
            status,
            error: None,
        },
        Err(e) => failed(Some(id), e),
    }
}

fn failed(id: Option<String>, err: EngineError) -> IngestOutcome {
    IngestOutcome {
        id,
        status: IngestStatus::Failed,
        error: Some(err.to_string()),
    }
}

fn count_status(outcomes: &[IngestOutcome], status: IngestStatus) -> usize {
    outcomes.iter().filter(|o| o.status == status).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentKind, ItemMetadata, SourceRef};

    fn record(text: &str, embedding: Option<Vec<f32>>) -> IngestRecord {
        IngestRecord {
            text: text.to_string(),
            content_kind: ContentKind::PriceFact,
            metadata: ItemMetadata::default(),
            source_ref: None,
            embedding,
        }
    }

    async fn pool() -> SqlitePool {
        let pool = crate::db::connect_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        pool
    }

    fn config_with_dims(dims: usize) -> Config {
        // Provider stays disabled so no network embedding is attempted;
        // dims still gates provided-vector validation.
        toml::from_str(&format!(
            "[db]\npath = \"unused\"\n[embedding]\ndims = {}\n",
            dims
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_bad_record_does_not_abort_batch() {
        let pool = pool().await;
        let config = config_with_dims(3);

        let outcomes = run_ingest(
            &pool,
            &config,
            vec![
                record("Alaska milk price 22", Some(vec![0.1, 0.2, 0.3])),
                record("broken vector", Some(vec![0.1, 0.2])),
                record("Palmolive price 25", None),
            ],
        )
        .await
        .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].status, IngestStatus::Created);
        assert_eq!(outcomes[1].status, IngestStatus::Failed);
        assert!(outcomes[1].error.as_deref().unwrap().contains("dimension"));
        assert_eq!(outcomes[2].status, IngestStatus::Created);
    }

    #[tokio::test]
    async fn test_empty_text_fails_item() {
        let pool = pool().await;
        let config = config_with_dims(0);

        let outcomes = run_ingest(&pool, &config, vec![record("   ", None)])
            .await
            .unwrap();
        assert_eq!(outcomes[0].status, IngestStatus::Failed);
        assert!(outcomes[0].id.is_none());
    }

    #[tokio::test]
    async fn test_source_ref_reingest_updates_in_place() {
        let pool = pool().await;
        let config = config_with_dims(0);

        let mut first = record("Alaska milk price 22", None);
        first.source_ref = Some(SourceRef {
            table: "price_facts".to_string(),
            id: "42".to_string(),
        });
        let mut second = first.clone();
        second.text = "Alaska milk price 23".to_string();

        let out1 = run_ingest(&pool, &config, vec![first]).await.unwrap();
        let out2 = run_ingest(&pool, &config, vec![second]).await.unwrap();

        assert_eq!(out1[0].status, IngestStatus::Created);
        assert_eq!(out2[0].status, IngestStatus::Updated);
        assert_eq!(out1[0].id, out2[0].id);

        let store = VectorStore::new(pool.clone(), 0);
        assert_eq!(store.count().await.unwrap(), 1);
        let item = store
            .get(out2[0].id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.text, "Alaska milk price 23");
    }

    #[tokio::test]
    async fn test_disabled_provider_stores_without_vector() {
        let pool = pool().await;
        let config = config_with_dims(0);

        let outcomes = run_ingest(&pool, &config, vec![record("some insight", None)])
            .await
            .unwrap();
        assert_eq!(outcomes[0].status, IngestStatus::Created);

        let store = VectorStore::new(pool.clone(), 0);
        let item = store
            .get(outcomes[0].id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(item.embedding.is_none());
        assert!(item.metadata.model_version.is_none());
    }
}
