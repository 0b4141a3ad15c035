//! TOML configuration.
//!
//! Only `[db]` is required; every other section falls back to its defaults.
//! API keys are read from the environment (`OPENAI_API_KEY`,
//! `ANTHROPIC_API_KEY`), never from the file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub contextual: ContextualConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Pick size/overlap/separators per document. When false every document
    /// uses the base strategy.
    #[serde(default = "default_true")]
    pub adaptive: bool,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { adaptive: true }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            url: None,
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

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// `"hybrid"` (semantic + BM25 fused with RRF) or `"semantic"`.
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
    #[serde(default = "default_max_results")]
    pub default_max_results: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Each branch fetches `max_results * candidate_multiplier` before fusion.
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_metadata_ttl_secs")]
    pub metadata_ttl_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            rrf_k: default_rrf_k(),
            default_max_results: default_max_results(),
            similarity_threshold: default_similarity_threshold(),
            candidate_multiplier: default_candidate_multiplier(),
            metadata_ttl_secs: default_metadata_ttl_secs(),
        }
    }
}

fn default_mode() -> String {
    "hybrid".to_string()
}
fn default_rrf_k() -> u32 {
    60
}
fn default_max_results() -> usize {
    5
}
fn default_similarity_threshold() -> f64 {
    0.7
}
fn default_candidate_multiplier() -> usize {
    2
}
fn default_metadata_ttl_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextualConfig {
    #[serde(default)]
    pub enabled: bool,
    /// `"streaming"` or `"batch"`. Honored for every document.
    #[serde(default = "default_contextual_mode")]
    pub mode: String,
    #[serde(default = "default_contextual_model")]
    pub model: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_max_tokens_per_document")]
    pub max_tokens_per_document: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
    #[serde(default = "default_batch_poll_interval_secs")]
    pub batch_poll_interval_secs: u64,
    #[serde(default = "default_batch_timeout_secs")]
    pub batch_timeout_secs: u64,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_overlap_threshold")]
    pub overlap_threshold: f64,
    /// Generation calls allowed per owner per UTC day; 0 is unlimited.
    #[serde(default)]
    pub daily_request_cap: u64,
}

impl Default for ContextualConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: default_contextual_mode(),
            model: default_contextual_model(),
            api_url: default_api_url(),
            max_tokens_per_document: default_max_tokens_per_document(),
            request_timeout_secs: default_request_timeout_secs(),
            min_request_interval_ms: default_min_request_interval_ms(),
            batch_poll_interval_secs: default_batch_poll_interval_secs(),
            batch_timeout_secs: default_batch_timeout_secs(),
            max_context_chars: default_max_context_chars(),
            overlap_threshold: default_overlap_threshold(),
            daily_request_cap: 0,
        }
    }
}

fn default_contextual_mode() -> String {
    "streaming".to_string()
}
fn default_contextual_model() -> String {
    "claude-3-7-sonnet-latest".to_string()
}
fn default_api_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_max_tokens_per_document() -> usize {
    100_000
}
fn default_request_timeout_secs() -> u64 {
    120
}
fn default_min_request_interval_ms() -> u64 {
    2000
}
fn default_batch_poll_interval_secs() -> u64 {
    30
}
fn default_batch_timeout_secs() -> u64 {
    3600
}
fn default_max_context_chars() -> usize {
    500
}
fn default_overlap_threshold() -> f64 {
    0.8
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_rerank_model")]
    pub model: String,
    /// Fused candidates handed to the cross-encoder.
    #[serde(default = "default_rerank_candidates")]
    pub candidates: usize,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: default_rerank_model(),
            candidates: default_rerank_candidates(),
        }
    }
}

fn default_rerank_model() -> String {
    "bge-reranker-base".to_string()
}
fn default_rerank_candidates() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkersConfig {
    #[serde(default = "default_blocking_threads")]
    pub blocking_threads: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            blocking_threads: default_blocking_threads(),
        }
    }
}

fn default_blocking_threads() -> usize {
    4
}

fn default_true() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    if config.embedding.is_enabled() && config.embedding.provider != "local" {
        if config.embedding.dims.unwrap_or(0) == 0 {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    let retrieval = &config.retrieval;
    match retrieval.mode.as_str() {
        "hybrid" | "semantic" => {}
        other => bail!(
            "Unknown retrieval mode: '{}'. Must be hybrid or semantic.",
            other
        ),
    }
    if retrieval.rrf_k == 0 {
        bail!("retrieval.rrf_k must be > 0");
    }
    if !(-1.0..=1.0).contains(&retrieval.similarity_threshold) {
        bail!("retrieval.similarity_threshold must be in [-1.0, 1.0]");
    }
    if retrieval.candidate_multiplier == 0 {
        bail!("retrieval.candidate_multiplier must be >= 1");
    }

    let contextual = &config.contextual;
    match contextual.mode.as_str() {
        "streaming" | "batch" => {}
        other => bail!(
            "Unknown contextual mode: '{}'. Must be streaming or batch.",
            other
        ),
    }
    if !(contextual.overlap_threshold > 0.0 && contextual.overlap_threshold <= 1.0) {
        bail!("contextual.overlap_threshold must be in (0.0, 1.0]");
    }
    if contextual.max_context_chars == 0 {
        bail!("contextual.max_context_chars must be > 0");
    }

    if config.workers.blocking_threads == 0 {
        bail!("workers.blocking_threads must be > 0");
    }

    Ok(())
}
