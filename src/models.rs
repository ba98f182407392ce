//! Core data models used throughout the engine.
//!
//! These types represent the knowledge items, retrieval results, and
//! ingestion/query payloads that flow through the pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Category of a knowledge item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Brand,
    Product,
    MarketInsight,
    PriceFact,
    #[serde(other)]
    Other,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Brand => "brand",
            ContentKind::Product => "product",
            ContentKind::MarketInsight => "market_insight",
            ContentKind::PriceFact => "price_fact",
            ContentKind::Other => "other",
        }
    }
}

impl FromStr for ContentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "brand" => Ok(ContentKind::Brand),
            "product" => Ok(ContentKind::Product),
            "market_insight" => Ok(ContentKind::MarketInsight),
            "price_fact" => Ok(ContentKind::PriceFact),
            "other" => Ok(ContentKind::Other),
            _ => Err(format!(
                "unknown content kind: '{}'. Use brand, product, market_insight, price_fact, or other.",
                s
            )),
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weak back-reference to the originating record. Lookup only, never an
/// ownership edge; deleting the source record cascades via this reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub table: String,
    pub id: String,
}

/// Metadata attached to a knowledge item.
///
/// Recognized keys are typed fields validated at ingestion time; anything
/// else lands in `extra` so upstream pipelines can attach arbitrary
/// annotations without a schema change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Model version the stored embedding was computed with. Set by the
    /// engine on embed, used to detect stale vectors after a model upgrade.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A unit of market intelligence stored in the engine.
///
/// `text` and `embedding` are never desynchronized: any text change clears
/// the stored vector until it is re-embedded.
#[derive(Debug, Clone)]
pub struct KnowledgeItem {
    pub id: String,
    pub content_kind: ContentKind,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
    pub metadata: ItemMetadata,
    pub source_ref: Option<SourceRef>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Which search channel produced (or contributed to) a retrieval result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMethod {
    Semantic,
    Keyword,
    /// Matched by both channels; score is the weighted blend.
    Hybrid,
}

impl RetrievalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMethod::Semantic => "semantic",
            RetrievalMethod::Keyword => "keyword",
            RetrievalMethod::Hybrid => "hybrid",
        }
    }
}

/// A scored search hit.
///
/// Raw scores are comparable only within the same method; the hybrid
/// merge normalizes them before blending.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub id: String,
    pub text: String,
    pub content_kind: ContentKind,
    pub metadata: ItemMetadata,
    pub score: f64,
    pub method: RetrievalMethod,
}

/// One record in an ingestion batch.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRecord {
    pub text: String,
    pub content_kind: ContentKind,
    #[serde(default)]
    pub metadata: ItemMetadata,
    #[serde(default)]
    pub source_ref: Option<SourceRef>,
    /// Precomputed vector, if the upstream pipeline already embedded the
    /// text. Validated against the configured dimension on upsert.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

/// Per-item ingestion status. Failures never abort the rest of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Created,
    Updated,
    Failed,
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Created => "created",
            IngestStatus::Updated => "updated",
            IngestStatus::Failed => "failed",
        }
    }
}

/// Outcome of ingesting a single record.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: IngestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A query against the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,
    #[serde(default)]
    pub kind: Option<ContentKind>,
}

fn default_context_limit() -> usize {
    5
}

/// Provenance entry attached to an answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceAttribution {
    pub id: String,
    pub excerpt: String,
    pub score: f64,
    pub method: RetrievalMethod,
    /// Converted display amount for price facts, when a display currency
    /// is configured (e.g. `"0.38 USD"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub converted: Option<String>,
}

/// Response to a query: the synthesized answer plus provenance.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceAttribution>,
    pub latency_ms: u64,
}
