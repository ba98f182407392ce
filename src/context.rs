//! Context assembly: trim ranked results to a size budget.
//!
//! The bundle is transient: built per query, handed to the synthesizer,
//! then dropped.

use crate::models::RetrievalResult;

/// Ordered, budget-bounded context for answer synthesis.
///
/// Order matches the retriever's ranking so the synthesizer sees the most
/// relevant context first.
#[derive(Debug, Clone, Default)]
pub struct ContextBundle {
    pub results: Vec<RetrievalResult>,
    /// Total characters of included text; always <= the assembly budget.
    pub total_chars: usize,
}

impl ContextBundle {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }
}

/// Greedily include results in ranked order within `budget_chars`.
///
/// An item is included whole or excluded; text is never split across the
/// boundary. An oversized item is skipped rather than ending assembly, so a
/// smaller lower-ranked item can still fit; relative order is preserved
/// either way.
pub fn assemble(results: Vec<RetrievalResult>, budget_chars: usize) -> ContextBundle {
    let mut bundle = ContextBundle::default();

    for result in results {
        let item_chars = result.text.chars().count();
        if bundle.total_chars + item_chars > budget_chars {
            continue;
        }
        bundle.total_chars += item_chars;
        bundle.results.push(result);
    }

    bundle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentKind, ItemMetadata, RetrievalMethod};

    fn result(id: &str, text: &str, score: f64) -> RetrievalResult {
        RetrievalResult {
            id: id.to_string(),
            text: text.to_string(),
            content_kind: ContentKind::MarketInsight,
            metadata: ItemMetadata::default(),
            score,
            method: RetrievalMethod::Keyword,
        }
    }

    #[test]
    fn test_budget_never_exceeded() {
        let results = vec![
            result("a", "aaaaa", 0.9), // 5 chars
            result("b", "bbbbb", 0.8),
            result("c", "ccccc", 0.7),
        ];
        let bundle = assemble(results, 11);
        assert_eq!(bundle.len(), 2);
        assert!(bundle.total_chars <= 11);
    }

    #[test]
    fn test_item_never_split() {
        let results = vec![result("a", "aaaaaaaaaa", 0.9)]; // 10 chars
        let bundle = assemble(results, 9);
        assert!(bundle.is_empty(), "item must be excluded whole, not cut");
    }

    #[test]
    fn test_oversized_item_skipped_smaller_still_fits() {
        let results = vec![
            result("big", &"x".repeat(100), 0.9),
            result("small", "ok", 0.8),
        ];
        let bundle = assemble(results, 10);
        assert_eq!(bundle.len(), 1);
        assert_eq!(bundle.results[0].id, "small");
    }

    #[test]
    fn test_ranked_order_preserved() {
        let results = vec![
            result("first", "aa", 0.9),
            result("second", "bb", 0.5),
            result("third", "cc", 0.1),
        ];
        let bundle = assemble(results, 100);
        let ids: Vec<&str> = bundle.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_empty_input_empty_bundle() {
        let bundle = assemble(Vec::new(), 100);
        assert!(bundle.is_empty());
        assert_eq!(bundle.total_chars, 0);
    }

    #[test]
    fn test_exact_fit_included() {
        let results = vec![result("a", "12345", 0.9)];
        let bundle = assemble(results, 5);
        assert_eq!(bundle.len(), 1);
        assert_eq!(bundle.total_chars, 5);
    }
}
