//! Answer synthesis boundary.
//!
//! The synthesizer is a black box behind the [`Synthesizer`] trait so the
//! retrieval pipeline never depends on a concrete LLM backend and tests can
//! swap in a scripted implementation. Citations produced here flow through
//! the engine unmodified; provenance is never rewritten downstream.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

use crate::config::SynthesisConfig;
use crate::context::ContextBundle;
use crate::error::{EngineError, Result};

/// Reference back to a knowledge item that backed the answer.
#[derive(Debug, Clone, Serialize)]
pub struct Citation {
    pub id: String,
    pub excerpt: String,
}

/// A synthesized answer with its provenance.
#[derive(Debug, Clone)]
pub struct Synthesis {
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// Narrow interface to the answer-synthesis backend.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Produce an answer from the question and the assembled context.
    /// Implementations must ground the answer in the provided context and
    /// return one citation per context item, in bundle order.
    async fn synthesize(&self, question: &str, context: &ContextBundle) -> Result<Synthesis>;

    fn model_name(&self) -> &str;
}

/// Build the configured synthesizer.
pub fn create_synthesizer(config: &SynthesisConfig) -> Result<Box<dyn Synthesizer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledSynthesizer)),
        "openai" => Ok(Box::new(OpenAISynthesizer::new(config)?)),
        other => Err(EngineError::Config(format!(
            "Unknown synthesis provider: {}",
            other
        ))),
    }
}

/// Placeholder used when no synthesis backend is configured. Retrieval
/// still works; the engine returns sources without a generated answer.
pub struct DisabledSynthesizer;

#[async_trait]
impl Synthesizer for DisabledSynthesizer {
    async fn synthesize(&self, _question: &str, context: &ContextBundle) -> Result<Synthesis> {
        Ok(Synthesis {
            answer: "(synthesis disabled; see sources)".to_string(),
            citations: citations_from_bundle(context),
        })
    }

    fn model_name(&self) -> &str {
        "disabled"
    }
}

/// Synthesizer backed by the OpenAI chat completions API.
///
/// Uses the same retry policy as the embedding client: 429/5xx and network
/// errors retry with exponential backoff, other 4xx fail immediately. Every
/// attempt carries the configured timeout; exhausting the deadline surfaces
/// [`EngineError::Timeout`] rather than a partial answer.
pub struct OpenAISynthesizer {
    model: String,
    timeout: Duration,
    max_retries: u32,
}

impl OpenAISynthesizer {
    pub fn new(config: &SynthesisConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| EngineError::Config("synthesis.model required for OpenAI provider".into()))?;

        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(EngineError::Config(
                "OPENAI_API_KEY environment variable not set".into(),
            ));
        }

        Ok(Self {
            model,
            timeout: Duration::from_secs(config.timeout_secs),
            max_retries: config.max_retries,
        })
    }

    fn build_prompt(question: &str, context: &ContextBundle) -> String {
        let mut prompt = String::from(
            "Answer the question using only the numbered context entries below. \
             Cite entries as [n]. If the context does not contain the answer, \
             say the data is insufficient.\n\n",
        );
        for (i, result) in context.results.iter().enumerate() {
            prompt.push_str(&format!("[{}] {}\n", i + 1, result.text));
        }
        prompt.push_str(&format!("\nQuestion: {}", question));
        prompt
    }
}

#[async_trait]
impl Synthesizer for OpenAISynthesizer {
    async fn synthesize(&self, question: &str, context: &ContextBundle) -> Result<Synthesis> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| EngineError::Config("OPENAI_API_KEY not set".into()))?;

        let client = reqwest::Client::builder().timeout(self.timeout).build()?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": Self::build_prompt(question, context) }
            ],
        });

        let mut last_err: Option<EngineError> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post("https://api.openai.com/v1/chat/completions")
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        let answer = json
                            .pointer("/choices/0/message/content")
                            .and_then(|c| c.as_str())
                            .ok_or_else(|| {
                                EngineError::Synthesis(
                                    "invalid response: missing message content".into(),
                                )
                            })?
                            .to_string();

                        return Ok(Synthesis {
                            answer,
                            citations: citations_from_bundle(context),
                        });
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(EngineError::ServiceUnavailable {
                            service: "synthesis",
                            attempts: attempt + 1,
                            reason: format!("{}: {}", status, body_text),
                        });
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    return Err(EngineError::Synthesis(format!(
                        "{}: {}",
                        status, body_text
                    )));
                }
                Err(e) => {
                    last_err = Some(if e.is_timeout() {
                        EngineError::Timeout("synthesis call")
                    } else {
                        EngineError::ServiceUnavailable {
                            service: "synthesis",
                            attempts: attempt + 1,
                            reason: e.to_string(),
                        }
                    });
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or(EngineError::ServiceUnavailable {
            service: "synthesis",
            attempts: 0,
            reason: "synthesis failed after retries".into(),
        }))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// One citation per bundled item, preserving bundle order.
pub fn citations_from_bundle(context: &ContextBundle) -> Vec<Citation> {
    context
        .results
        .iter()
        .map(|r| Citation {
            id: r.id.clone(),
            excerpt: excerpt(&r.text),
        })
        .collect()
}

/// Display excerpt: the first 240 characters of an item's text.
pub fn excerpt(text: &str) -> String {
    text.chars().take(240).collect()
}
