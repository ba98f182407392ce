use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub currency: CurrencyConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Inputs longer than this are rejected; callers must chunk upstream.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
            max_input_chars: 8000,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_input_chars() -> usize {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Weight of the semantic channel in the hybrid blend; the keyword
    /// channel gets the complement.
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_semantic: i64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k_keyword: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: usize,
    /// Maximum assembled context size in characters.
    #[serde(default = "default_context_budget")]
    pub context_budget_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            semantic_weight: default_semantic_weight(),
            candidate_k_semantic: default_candidate_k(),
            candidate_k_keyword: default_candidate_k(),
            final_limit: default_final_limit(),
            context_budget_chars: default_context_budget(),
        }
    }
}

fn default_semantic_weight() -> f64 {
    0.7
}
fn default_candidate_k() -> i64 {
    20
}
fn default_final_limit() -> usize {
    5
}
fn default_context_budget() -> usize {
    6000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SynthesisConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_synthesis_retries")]
    pub max_retries: u32,
    #[serde(default = "default_synthesis_timeout")]
    pub timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            max_retries: 3,
            timeout_secs: 60,
        }
    }
}

impl SynthesisConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_synthesis_retries() -> u32 {
    3
}
fn default_synthesis_timeout() -> u64 {
    60
}

/// Display-currency conversion for price facts. The rate is explicit
/// configuration, never ambient state: units of `display` per one unit
/// of `source`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CurrencyConfig {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub display: Option<String>,
    #[serde(default)]
    pub rate: Option<f64>,
}

impl CurrencyConfig {
    pub fn is_enabled(&self) -> bool {
        self.source.is_some() && self.display.is_some() && self.rate.is_some()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7410".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.semantic_weight) {
        anyhow::bail!("retrieval.semantic_weight must be in [0.0, 1.0]");
    }
    if config.retrieval.context_budget_chars == 0 {
        anyhow::bail!("retrieval.context_budget_chars must be > 0");
    }
    if config.retrieval.candidate_k_semantic < config.retrieval.final_limit as i64
        || config.retrieval.candidate_k_keyword < config.retrieval.final_limit as i64
    {
        anyhow::bail!("per-channel candidate_k must be >= retrieval.final_limit");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    // Validate synthesis
    match config.synthesis.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown synthesis provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.synthesis.is_enabled() && config.synthesis.model.is_none() {
        anyhow::bail!("synthesis.model must be specified when provider is enabled");
    }

    // Validate currency
    if let Some(rate) = config.currency.rate {
        if !rate.is_finite() || rate <= 0.0 {
            anyhow::bail!("currency.rate must be a positive finite number");
        }
    }
    let currency_parts = [
        config.currency.source.is_some(),
        config.currency.display.is_some(),
        config.currency.rate.is_some(),
    ];
    if currency_parts.iter().any(|p| *p) && !currency_parts.iter().all(|p| *p) {
        anyhow::bail!("currency config requires source, display, and rate together");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_minimal_config_defaults() {
        let f = write_config("[db]\npath = \"/tmp/scout.sqlite\"\n");
        let cfg = load_config(f.path()).unwrap();
        assert!(!cfg.embedding.is_enabled());
        assert!(!cfg.synthesis.is_enabled());
        assert!((cfg.retrieval.semantic_weight - 0.7).abs() < 1e-9);
        assert_eq!(cfg.retrieval.final_limit, 5);
        assert_eq!(cfg.retrieval.context_budget_chars, 6000);
    }

    #[test]
    fn test_enabled_embedding_requires_dims_and_model() {
        let f = write_config(
            "[db]\npath = \"/tmp/scout.sqlite\"\n[embedding]\nprovider = \"openai\"\n",
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_weight_out_of_range_rejected() {
        let f = write_config(
            "[db]\npath = \"/tmp/scout.sqlite\"\n[retrieval]\nsemantic_weight = 1.5\n",
        );
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_partial_currency_rejected() {
        let f = write_config("[db]\npath = \"/tmp/scout.sqlite\"\n[currency]\nrate = 58.0\n");
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_full_currency_accepted() {
        let f = write_config(
            "[db]\npath = \"/tmp/scout.sqlite\"\n[currency]\nsource = \"PHP\"\ndisplay = \"USD\"\nrate = 0.0172\n",
        );
        let cfg = load_config(f.path()).unwrap();
        assert!(cfg.currency.is_enabled());
    }
}
