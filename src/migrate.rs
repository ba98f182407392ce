use sqlx::SqlitePool;

use crate::error::Result;

/// Create the schema. Idempotent, safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Knowledge items. The embedding column is nullable: an item may be
    // stored before its vector is computed, and any text change clears the
    // vector so text and embedding never desynchronize. rowid preserves
    // insertion order for deterministic tie-breaking.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_items (
            id TEXT PRIMARY KEY,
            content_kind TEXT NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB,
            embedding_model TEXT,
            embedding_dims INTEGER,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            source_table TEXT,
            source_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Embedding cache, keyed by content hash + model so a model upgrade
    // naturally misses. Survives restarts.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedding_cache (
            text_hash TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (text_hash, model)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 virtual table for keyword search.
    // FTS5 CREATE is not idempotent natively, so we check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='items_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE items_fts USING fts5(
                item_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    // Secondary indexes for metadata filtering and source cascade deletes.
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_kind ON knowledge_items(content_kind)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_items_source ON knowledge_items(source_table, source_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
