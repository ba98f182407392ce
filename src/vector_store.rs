//! Canonical item storage with cosine-similarity search.
//!
//! Owns the `knowledge_items` rows and keeps the FTS index in sync on every
//! write, so the keyword channel never sees an item the vector channel
//! doesn't know about. Vector search is an exhaustive cosine scan over the
//! stored BLOBs: exact, and fast enough for corpora well below 10^5 items.
//! Incremental inserts need no index rebuild.

use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{EngineError, Result};
use crate::models::{
    ContentKind, ItemMetadata, KnowledgeItem, RetrievalMethod, RetrievalResult, SourceRef,
};

#[derive(Clone)]
pub struct VectorStore {
    pool: SqlitePool,
    dims: usize,
}

impl VectorStore {
    /// `dims` is the store-wide embedding dimension; every vector written
    /// through [`upsert`](Self::upsert) must match it.
    pub fn new(pool: SqlitePool, dims: usize) -> Self {
        Self { pool, dims }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Insert or update an item, idempotent by `id`.
    ///
    /// Fails with [`EngineError::DimensionMismatch`] if the item carries a
    /// vector whose length differs from the store's configured dimension;
    /// the failure is local to this item. The FTS row is replaced in the
    /// same transaction so readers never observe a half-written item.
    pub async fn upsert(&self, item: &KnowledgeItem) -> Result<()> {
        if item.text.trim().is_empty() {
            return Err(EngineError::EmptyText);
        }
        if let Some(vec) = &item.embedding {
            if self.dims > 0 && vec.len() != self.dims {
                return Err(EngineError::DimensionMismatch {
                    expected: self.dims,
                    actual: vec.len(),
                });
            }
        }

        let blob = item.embedding.as_ref().map(|v| vec_to_blob(v));
        let embedding_dims = item.embedding.as_ref().map(|v| v.len() as i64);
        let metadata_json = serde_json::to_string(&item.metadata)?;
        let (source_table, source_id) = match &item.source_ref {
            Some(r) => (Some(r.table.clone()), Some(r.id.clone())),
            None => (None, None),
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO knowledge_items
                (id, content_kind, text, embedding, embedding_model, embedding_dims,
                 metadata_json, source_table, source_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                content_kind = excluded.content_kind,
                text = excluded.text,
                embedding = excluded.embedding,
                embedding_model = excluded.embedding_model,
                embedding_dims = excluded.embedding_dims,
                metadata_json = excluded.metadata_json,
                source_table = excluded.source_table,
                source_id = excluded.source_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&item.id)
        .bind(item.content_kind.as_str())
        .bind(&item.text)
        .bind(&blob)
        .bind(&item.metadata.model_version)
        .bind(embedding_dims)
        .bind(&metadata_json)
        .bind(&source_table)
        .bind(&source_id)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM items_fts WHERE item_id = ?")
            .bind(&item.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO items_fts (item_id, text) VALUES (?, ?)")
            .bind(&item.id)
            .bind(&item.text)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Return up to `k` nearest neighbors by cosine similarity, optionally
    /// pre-filtered by content kind. Ties break by insertion order.
    pub async fn search(
        &self,
        query_vec: &[f32],
        k: usize,
        filter: Option<ContentKind>,
    ) -> Result<Vec<RetrievalResult>> {
        let rows = match filter {
            Some(kind) => {
                sqlx::query(
                    r#"
                    SELECT rowid, id, content_kind, text, embedding, metadata_json
                    FROM knowledge_items
                    WHERE embedding IS NOT NULL AND content_kind = ?
                    "#,
                )
                .bind(kind.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT rowid, id, content_kind, text, embedding, metadata_json
                    FROM knowledge_items
                    WHERE embedding IS NOT NULL
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut scored: Vec<(i64, RetrievalResult)> = rows
            .iter()
            .filter_map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                // Vectors from an older model with a different dimension
                // are stale and never match the query.
                if vec.len() != query_vec.len() {
                    return None;
                }
                let similarity = cosine_similarity(query_vec, &vec) as f64;
                Some((
                    row.get::<i64, _>("rowid"),
                    result_from_row(row, similarity, RetrievalMethod::Semantic),
                ))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.score
                .partial_cmp(&a.1.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);

        Ok(scored.into_iter().map(|(_, r)| r).collect())
    }

    /// Remove an item; subsequent searches never return it.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM knowledge_items WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM items_fts WHERE item_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Cascade delete: remove every item whose source reference matches the
    /// deleted upstream record. Returns the number of items removed.
    pub async fn delete_by_source(&self, table: &str, source_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            DELETE FROM items_fts WHERE item_id IN
                (SELECT id FROM knowledge_items WHERE source_table = ? AND source_id = ?)
            "#,
        )
        .bind(table)
        .bind(source_id)
        .execute(&mut *tx)
        .await?;
        let result =
            sqlx::query("DELETE FROM knowledge_items WHERE source_table = ? AND source_id = ?")
                .bind(table)
                .bind(source_id)
                .execute(&mut *tx)
                .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Look up the id of an item previously ingested for the same source
    /// record, enabling idempotent re-ingestion.
    pub async fn find_by_source(&self, source_ref: &SourceRef) -> Result<Option<String>> {
        let id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM knowledge_items WHERE source_table = ? AND source_id = ?",
        )
        .bind(&source_ref.table)
        .bind(&source_ref.id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    /// Fetch a full item by id.
    pub async fn get(&self, id: &str) -> Result<Option<KnowledgeItem>> {
        let row = sqlx::query(
            r#"
            SELECT id, content_kind, text, embedding, metadata_json,
                   source_table, source_id, created_at, updated_at
            FROM knowledge_items WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let kind: String = row.get("content_kind");
            let metadata_json: String = row.get("metadata_json");
            let blob: Option<Vec<u8>> = row.get("embedding");
            let source_table: Option<String> = row.get("source_table");
            let source_id: Option<String> = row.get("source_id");
            KnowledgeItem {
                id: row.get("id"),
                content_kind: kind.parse().unwrap_or(ContentKind::Other),
                text: row.get("text"),
                embedding: blob.map(|b| blob_to_vec(&b)),
                metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
                source_ref: match (source_table, source_id) {
                    (Some(table), Some(id)) => Some(SourceRef { table, id }),
                    _ => None,
                },
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            }
        }))
    }

    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM knowledge_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn result_from_row(
    row: &sqlx::sqlite::SqliteRow,
    score: f64,
    method: RetrievalMethod,
) -> RetrievalResult {
    let kind: String = row.get("content_kind");
    let metadata_json: String = row.get("metadata_json");
    RetrievalResult {
        id: row.get("id"),
        text: row.get("text"),
        content_kind: kind.parse().unwrap_or(ContentKind::Other),
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        score,
        method,
    }
}
