//! Query orchestration: retrieve, assemble, synthesize, attribute.
//!
//! This is the one place the full pipeline is wired together. The CLI and
//! the HTTP server both call [`answer_query`] so their behavior cannot
//! drift apart.

use std::time::Instant;

use sqlx::SqlitePool;
use tracing::info;

use crate::config::Config;
use crate::context;
use crate::currency;
use crate::error::Result;
use crate::models::{QueryRequest, QueryResponse, SourceAttribution};
use crate::retrieve::{self, Mode};
use crate::synthesize::{self, Synthesizer};

/// Answer returned when retrieval finds nothing. An empty corpus or an
/// unmatched question is a valid state, never an error, and the
/// synthesizer is not consulted so it cannot hallucinate from nothing.
pub const NO_CONTEXT_ANSWER: &str =
    "No relevant market data found for this question. Try rephrasing or ingest more data.";

/// Run the full query pipeline: hybrid retrieval, context assembly within
/// the character budget, answer synthesis, and source attribution.
pub async fn answer_query(
    pool: &SqlitePool,
    config: &Config,
    synthesizer: &dyn Synthesizer,
    request: &QueryRequest,
    mode: Mode,
) -> Result<QueryResponse> {
    let started = Instant::now();

    let results = retrieve::retrieve(
        pool,
        config,
        &request.question,
        request.context_limit,
        request.kind,
        mode,
    )
    .await?;

    let bundle = context::assemble(results, config.retrieval.context_budget_chars);

    if bundle.is_empty() {
        info!(question = %request.question, "no context found");
        return Ok(QueryResponse {
            answer: NO_CONTEXT_ANSWER.to_string(),
            sources: Vec::new(),
            latency_ms: started.elapsed().as_millis() as u64,
        });
    }

    let sources: Vec<SourceAttribution> = bundle
        .results
        .iter()
        .map(|r| SourceAttribution {
            id: r.id.clone(),
            excerpt: synthesize::excerpt(&r.text),
            score: r.score,
            method: r.method,
            converted: currency::annotate(&r.metadata, &config.currency),
        })
        .collect();

    let synthesis = synthesizer.synthesize(&request.question, &bundle).await?;

    let latency_ms = started.elapsed().as_millis() as u64;
    info!(
        question = %request.question,
        sources = sources.len(),
        latency_ms,
        model = synthesizer.model_name(),
        "query answered"
    );

    Ok(QueryResponse {
        answer: synthesis.answer,
        sources,
        latency_ms,
    })
}
