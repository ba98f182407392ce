//! Hybrid retrieval: concurrent semantic + keyword search, normalized and
//! merged into one ranked, deduplicated candidate list.
//!
//! Failure semantics: a channel that errors degrades to an empty
//! contribution, logged, never a hard failure. Both channels empty is a
//! valid outcome ("no context found") that callers must handle explicitly.

use std::collections::HashMap;

use sqlx::SqlitePool;
use tracing::warn;

use crate::config::Config;
use crate::embedding;
use crate::error::Result;
use crate::keyword;
use crate::models::{ContentKind, RetrievalMethod, RetrievalResult};
use crate::vector_store::VectorStore;

/// Which channels to consult. `Hybrid` is the default; the single-channel
/// modes exist for diagnostics and for corpora without embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Keyword,
    Semantic,
    #[default]
    Hybrid,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "keyword" => Ok(Mode::Keyword),
            "semantic" => Ok(Mode::Semantic),
            "hybrid" => Ok(Mode::Hybrid),
            _ => Err(format!(
                "unknown search mode: '{}'. Use keyword, semantic, or hybrid.",
                s
            )),
        }
    }
}

/// Retrieve the top `final_k` results for a query.
///
/// The query is embedded once; semantic and keyword search then run
/// concurrently so end-to-end latency is bounded by the slower channel, not
/// their sum. If embedding fails (provider disabled, unavailable, or timed
/// out) the retriever degrades to keyword-only results.
///
/// The merge is deterministic for identical inputs: scores are min-max
/// normalized per channel, blended with the configured semantic weight,
/// deduplicated by item id, and tie-broken by id ascending.
pub async fn retrieve(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    final_k: usize,
    filter: Option<ContentKind>,
    mode: Mode,
) -> Result<Vec<RetrievalResult>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let use_semantic = mode != Mode::Keyword && config.embedding.is_enabled();
    let use_keyword = mode != Mode::Semantic;

    // A per-request limit may exceed the configured candidate pool; each
    // channel must fetch at least final_k or the merge cannot satisfy it.
    let k_semantic = config.retrieval.candidate_k_semantic.max(final_k as i64);
    let k_keyword = config.retrieval.candidate_k_keyword.max(final_k as i64);

    let semantic_fut = async {
        if !use_semantic {
            return Vec::new();
        }
        let query_vec = match embedding::embed_query(pool, &config.embedding, query).await {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "query embedding failed; degrading to keyword-only");
                return Vec::new();
            }
        };
        let store = VectorStore::new(pool.clone(), config.embedding.dims.unwrap_or(0));
        match store.search(&query_vec, k_semantic as usize, filter).await
        {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "semantic search failed; degrading to keyword-only");
                Vec::new()
            }
        }
    };

    let keyword_fut = async {
        if !use_keyword {
            return Vec::new();
        }
        match keyword::search(pool, query, k_keyword, filter).await {
            Ok(results) => results,
            Err(e) => {
                warn!(error = %e, "keyword search failed; continuing without it");
                Vec::new()
            }
        }
    };

    let (semantic, kw) = tokio::join!(semantic_fut, keyword_fut);

    let weight = match mode {
        Mode::Keyword => 0.0,
        Mode::Semantic => 1.0,
        Mode::Hybrid => config.retrieval.semantic_weight,
    };

    Ok(merge(semantic, kw, weight, final_k))
}

/// Blend the two channels into one ranked list.
///
/// Each channel's scores are min-max normalized to [0,1] within its own
/// result set so the two become comparable. An item present in both sets
/// gets `w * semantic + (1 - w) * keyword` and is marked `hybrid`; an item
/// present in one keeps its method, with the missing channel contributing
/// zero (not imputed). Sort is combined score descending, id ascending.
pub fn merge(
    semantic: Vec<RetrievalResult>,
    keyword: Vec<RetrievalResult>,
    semantic_weight: f64,
    final_k: usize,
) -> Vec<RetrievalResult> {
    let sem_norm = normalize_scores(&semantic);
    let kw_norm = normalize_scores(&keyword);

    struct Entry {
        result: RetrievalResult,
        sem: Option<f64>,
        kw: Option<f64>,
    }

    let mut by_id: HashMap<String, Entry> = HashMap::new();

    for (result, norm) in semantic.into_iter().zip(sem_norm) {
        by_id.insert(
            result.id.clone(),
            Entry {
                result,
                sem: Some(norm),
                kw: None,
            },
        );
    }
    for (result, norm) in keyword.into_iter().zip(kw_norm) {
        match by_id.get_mut(&result.id) {
            Some(entry) => entry.kw = Some(norm),
            None => {
                by_id.insert(
                    result.id.clone(),
                    Entry {
                        result,
                        sem: None,
                        kw: Some(norm),
                    },
                );
            }
        }
    }

    let mut merged: Vec<RetrievalResult> = by_id
        .into_values()
        .map(|entry| {
            let combined = semantic_weight * entry.sem.unwrap_or(0.0)
                + (1.0 - semantic_weight) * entry.kw.unwrap_or(0.0);
            let method = match (entry.sem, entry.kw) {
                (Some(_), Some(_)) => RetrievalMethod::Hybrid,
                (Some(_), None) => RetrievalMethod::Semantic,
                _ => RetrievalMethod::Keyword,
            };
            RetrievalResult {
                score: combined,
                method,
                ..entry.result
            }
        })
        .collect();

    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    merged.truncate(final_k);

    merged
}

/// Min-max normalize raw scores to [0, 1] within one result set.
/// A singleton or all-equal set normalizes to 1.0 everywhere.
fn normalize_scores(results: &[RetrievalResult]) -> Vec<f64> {
    if results.is_empty() {
        return Vec::new();
    }

    let s_min = results
        .iter()
        .map(|r| r.score)
        .fold(f64::INFINITY, f64::min);
    let s_max = results
        .iter()
        .map(|r| r.score)
        .fold(f64::NEG_INFINITY, f64::max);

    results
        .iter()
        .map(|r| {
            if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (r.score - s_min) / (s_max - s_min)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentKind, ItemMetadata};

    fn result(id: &str, score: f64, method: RetrievalMethod) -> RetrievalResult {
        RetrievalResult {
            id: id.to_string(),
            text: format!("text for {}", id),
            content_kind: ContentKind::MarketInsight,
            metadata: ItemMetadata::default(),
            score,
            method,
        }
    }

    fn sem(id: &str, score: f64) -> RetrievalResult {
        result(id, score, RetrievalMethod::Semantic)
    }

    fn kw(id: &str, score: f64) -> RetrievalResult {
        result(id, score, RetrievalMethod::Keyword)
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_single_is_one() {
        let norms = normalize_scores(&[sem("a", 5.0)]);
        assert!((norms[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_range() {
        let norms = normalize_scores(&[sem("a", 10.0), sem("b", 5.0), sem("c", 0.0)]);
        assert!((norms[0] - 1.0).abs() < 1e-9);
        assert!((norms[1] - 0.5).abs() < 1e-9);
        assert!((norms[2] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal() {
        let norms = normalize_scores(&[kw("a", 3.0), kw("b", 3.0)]);
        assert!(norms.iter().all(|n| (*n - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_normalize_stays_in_unit_interval() {
        let norms = normalize_scores(&[kw("a", -5.0), kw("b", 100.0), kw("c", 42.0)]);
        assert!(norms.iter().all(|n| (0.0..=1.0).contains(n)));
    }

    #[test]
    fn test_merge_dedupes_item_in_both_channels() {
        let merged = merge(
            vec![sem("a", 0.9), sem("b", 0.5)],
            vec![kw("a", 10.0), kw("c", 2.0)],
            0.7,
            10,
        );
        let a_count = merged.iter().filter(|r| r.id == "a").count();
        assert_eq!(a_count, 1, "item in both channels must appear once");
        let a = merged.iter().find(|r| r.id == "a").unwrap();
        assert_eq!(a.method, RetrievalMethod::Hybrid);
        // Top normalized score in both channels: 0.7 * 1.0 + 0.3 * 1.0
        assert!((a.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_merge_missing_channel_contributes_zero() {
        let merged = merge(vec![sem("a", 0.9), sem("b", 0.5)], vec![], 0.7, 10);
        let b = merged.iter().find(|r| r.id == "b").unwrap();
        // b's normalized semantic score is 0.0 (min of the set); keyword
        // contributes zero rather than being imputed.
        assert!((b.score - 0.0).abs() < 1e-9);
        assert_eq!(b.method, RetrievalMethod::Semantic);
    }

    #[test]
    fn test_merge_deterministic() {
        let run = || {
            merge(
                vec![sem("a", 0.9), sem("b", 0.7), sem("c", 0.1)],
                vec![kw("b", 4.0), kw("d", 3.0), kw("a", 1.0)],
                0.7,
                4,
            )
        };
        let first = run();
        let second = run();
        let ids1: Vec<&str> = first.iter().map(|r| r.id.as_str()).collect();
        let ids2: Vec<&str> = second.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids1, ids2);
        for (x, y) in first.iter().zip(second.iter()) {
            assert_eq!(x.score, y.score);
            assert_eq!(x.method, y.method);
        }
    }

    #[test]
    fn test_merge_tie_breaks_by_id_ascending() {
        let merged = merge(vec![sem("z", 1.0), sem("a", 1.0)], vec![], 1.0, 10);
        // Equal scores after normalization (both 1.0): id ascending wins.
        assert_eq!(merged[0].id, "a");
        assert_eq!(merged[1].id, "z");
    }

    #[test]
    fn test_merge_truncates_to_final_k() {
        let merged = merge(
            vec![sem("a", 0.9), sem("b", 0.8), sem("c", 0.7)],
            vec![kw("d", 5.0), kw("e", 4.0)],
            0.7,
            2,
        );
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_weight_zero_is_keyword_ordering() {
        let merged = merge(
            vec![sem("a", 0.1), sem("b", 0.9)],
            vec![kw("a", 10.0), kw("b", 1.0)],
            0.0,
            10,
        );
        assert_eq!(merged[0].id, "a", "weight 0 must follow keyword scores");
    }

    #[test]
    fn test_weight_one_is_semantic_ordering() {
        let merged = merge(
            vec![sem("a", 0.1), sem("b", 0.9)],
            vec![kw("a", 10.0), kw("b", 1.0)],
            1.0,
            10,
        );
        assert_eq!(merged[0].id, "b", "weight 1 must follow semantic scores");
    }

    #[test]
    fn test_merge_both_empty_is_empty() {
        assert!(merge(vec![], vec![], 0.7, 5).is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_degrades_to_keyword_when_embedding_disabled() {
        use crate::models::KnowledgeItem;
        use crate::vector_store::VectorStore;

        let pool = crate::db::connect_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        let store = VectorStore::new(pool.clone(), 0);
        for (id, text) in [("a", "Alaska milk price 22"), ("b", "Palmolive price 25")] {
            store
                .upsert(&KnowledgeItem {
                    id: id.to_string(),
                    content_kind: ContentKind::PriceFact,
                    text: text.to_string(),
                    embedding: None,
                    metadata: ItemMetadata::default(),
                    source_ref: None,
                    created_at: 0,
                    updated_at: 0,
                })
                .await
                .unwrap();
        }

        let config: crate::config::Config = toml::from_str(
            "[db]\npath = \"unused\"\n",
        )
        .unwrap();

        let results = retrieve(&pool, &config, "Alaska pricing", 1, None, Mode::Hybrid)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");
        assert_eq!(results[0].method, RetrievalMethod::Keyword);
    }

    #[tokio::test]
    async fn test_request_limit_above_candidate_k_widens_channels() {
        use crate::models::KnowledgeItem;
        use crate::vector_store::VectorStore;

        let pool = crate::db::connect_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        let store = VectorStore::new(pool.clone(), 0);
        for i in 0..25 {
            store
                .upsert(&KnowledgeItem {
                    id: format!("item-{:02}", i),
                    content_kind: ContentKind::PriceFact,
                    text: format!("price fact number {}", i),
                    embedding: None,
                    metadata: ItemMetadata::default(),
                    source_ref: None,
                    created_at: 0,
                    updated_at: 0,
                })
                .await
                .unwrap();
        }

        // Default candidate_k is 20; a request for 25 must widen the
        // keyword channel instead of silently capping at 20.
        let config: crate::config::Config = toml::from_str("[db]\npath = \"unused\"\n").unwrap();
        let results = retrieve(&pool, &config, "price", 25, None, Mode::Hybrid)
            .await
            .unwrap();
        assert_eq!(results.len(), 25);
    }

    #[tokio::test]
    async fn test_retrieve_empty_store_returns_empty_not_error() {
        let pool = crate::db::connect_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        let config: crate::config::Config = toml::from_str("[db]\npath = \"unused\"\n").unwrap();

        let results = retrieve(&pool, &config, "anything at all", 5, None, Mode::Hybrid)
            .await
            .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_retrieve_blank_query_returns_empty() {
        let pool = crate::db::connect_memory().await.unwrap();
        crate::migrate::run_migrations(&pool).await.unwrap();
        let config: crate::config::Config = toml::from_str("[db]\npath = \"unused\"\n").unwrap();

        let results = retrieve(&pool, &config, "   ", 5, None, Mode::Hybrid)
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
