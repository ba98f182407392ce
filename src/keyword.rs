//! Keyword search over the FTS5 index (BM25 ranking).
//!
//! This is the complement/fallback channel to semantic search: it works
//! without any embedding provider, and when no token matches it returns an
//! empty result set rather than an error.

use sqlx::{Row, SqlitePool};

use crate::error::Result;
use crate::models::{ContentKind, ItemMetadata, RetrievalMethod, RetrievalResult};

/// Search the FTS index, returning up to `k` results ranked by BM25.
///
/// Tokens are OR-combined so a query like "Alaska pricing" still matches an
/// item containing only "Alaska". Raw user input never reaches the MATCH
/// expression directly: tokens are extracted and quoted first, so FTS
/// operator syntax in a question cannot cause a query error.
pub async fn search(
    pool: &SqlitePool,
    query: &str,
    k: i64,
    filter: Option<ContentKind>,
) -> Result<Vec<RetrievalResult>> {
    let match_expr = match build_match_expr(query) {
        Some(expr) => expr,
        None => return Ok(Vec::new()),
    };

    let rows = match filter {
        Some(kind) => {
            sqlx::query(
                r#"
                SELECT f.item_id, f.rank, i.content_kind, i.text, i.metadata_json
                FROM items_fts f
                JOIN knowledge_items i ON i.id = f.item_id
                WHERE f.items_fts MATCH ? AND i.content_kind = ?
                ORDER BY f.rank
                LIMIT ?
                "#,
            )
            .bind(&match_expr)
            .bind(kind.as_str())
            .bind(k)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT f.item_id, f.rank, i.content_kind, i.text, i.metadata_json
                FROM items_fts f
                JOIN knowledge_items i ON i.id = f.item_id
                WHERE f.items_fts MATCH ?
                ORDER BY f.rank
                LIMIT ?
                "#,
            )
            .bind(&match_expr)
            .bind(k)
            .fetch_all(pool)
            .await?
        }
    };

    let results = rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            let kind: String = row.get("content_kind");
            let metadata_json: String = row.get("metadata_json");
            RetrievalResult {
                id: row.get("item_id"),
                text: row.get("text"),
                content_kind: kind.parse().unwrap_or(ContentKind::Other),
                metadata: serde_json::from_str::<ItemMetadata>(&metadata_json)
                    .unwrap_or_default(),
                score: raw_score_negate(rank),
                method: RetrievalMethod::Keyword,
            }
        })
        .collect();

    Ok(results)
}

/// BM25 rank from FTS5 is "lower is better"; negate so higher = better,
/// matching the semantic channel's orientation before normalization.
fn raw_score_negate(rank: f64) -> f64 {
    -rank
}

/// Extract alphanumeric tokens and quote each one, OR-combined.
/// Returns `None` when the query contains no usable tokens.
fn build_match_expr(query: &str) -> Option<String> {
    let tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t))
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" OR "))
    }
}
