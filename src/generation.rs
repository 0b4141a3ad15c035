//! Generative provider used by the contextual enricher.
//!
//! [`ContextGenerator`] covers the two call shapes the enricher needs: one
//! message per chunk (streaming mode) and a message batch job (batch mode).
//! [`AnthropicGenerator`] implements it over the Anthropic Messages and
//! Message Batches HTTP APIs. The whole document goes into a system block
//! marked `cache_control: ephemeral`, so every chunk request for the same
//! document hits the provider's prompt cache.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use hybrid_context_core::context::{chunk_message, document_block, SYSTEM_PROMPT};

use crate::config::ContextualConfig;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROMPT_CACHING_BETA: &str = "prompt-caching-2024-07-31";
const MAX_OUTPUT_TOKENS: u32 = 1024;

/// Token accounting reported by the provider for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

/// Text produced for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated {
    pub text: String,
    pub usage: TokenUsage,
}

/// One request inside a batch job.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub custom_id: String,
    pub chunk: String,
}

/// Processing state of a batch job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStatus {
    InProgress,
    Canceling,
    Ended,
    Failed,
    Expired,
    Other(String),
}

impl BatchStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "in_progress" => BatchStatus::InProgress,
            "canceling" => BatchStatus::Canceling,
            "ended" => BatchStatus::Ended,
            "failed" => BatchStatus::Failed,
            "expired" => BatchStatus::Expired,
            other => BatchStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Canceling => "canceling",
            BatchStatus::Ended => "ended",
            BatchStatus::Failed => "failed",
            BatchStatus::Expired => "expired",
            BatchStatus::Other(s) => s,
        }
    }
}

/// Result of one batch item.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Succeeded(Generated),
    /// `errored`, `canceled` or `expired` at the item level.
    NotSucceeded(String),
}

#[async_trait]
pub trait ContextGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(&self, document: &str, chunk: &str) -> Result<Generated>;

    /// Submit all items as one job; returns the job id.
    async fn submit_batch(&self, document: &str, items: &[BatchItem]) -> Result<String>;

    async fn batch_status(&self, batch_id: &str) -> Result<BatchStatus>;

    /// Per-item outcomes keyed by `custom_id`. Only valid once the job ended.
    async fn batch_results(&self, batch_id: &str) -> Result<HashMap<String, BatchOutcome>>;
}

/// Request parameters shared by single and batched calls.
pub fn message_params(model: &str, document: &str, chunk: &str) -> serde_json::Value {
    json!({
        "model": model,
        "max_tokens": MAX_OUTPUT_TOKENS,
        "temperature": 0.0,
        "system": [
            { "type": "text", "text": SYSTEM_PROMPT },
            {
                "type": "text",
                "text": document_block(document),
                "cache_control": { "type": "ephemeral" }
            }
        ],
        "messages": [
            { "role": "user", "content": chunk_message(chunk) }
        ]
    })
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: TokenUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

impl MessageResponse {
    fn into_generated(self) -> Generated {
        let text = self
            .content
            .into_iter()
            .find_map(|b| b.text)
            .unwrap_or_default()
            .trim()
            .to_string();
        Generated {
            text,
            usage: self.usage,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BatchResponse {
    id: String,
    processing_status: String,
    #[serde(default)]
    results_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchResultLine {
    custom_id: String,
    result: BatchResultBody,
}

#[derive(Debug, Deserialize)]
struct BatchResultBody {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<MessageResponse>,
}

/// Parse the JSONL body served at a batch's `results_url`.
pub fn parse_batch_results(body: &str) -> Result<HashMap<String, BatchOutcome>> {
    let mut outcomes = HashMap::new();
    for (n, line) in body.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed: BatchResultLine = serde_json::from_str(line)
            .with_context(|| format!("Invalid batch result line {}", n + 1))?;
        let outcome = match (parsed.result.kind.as_str(), parsed.result.message) {
            ("succeeded", Some(message)) => BatchOutcome::Succeeded(message.into_generated()),
            (kind, _) => BatchOutcome::NotSucceeded(kind.to_string()),
        };
        outcomes.insert(parsed.custom_id, outcome);
    }
    Ok(outcomes)
}

/// Anthropic API client. Reads `ANTHROPIC_API_KEY` from the environment.
pub struct AnthropicGenerator {
    model: String,
    api_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicGenerator {
    pub fn new(config: &ContextualConfig) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| {
            anyhow!("ANTHROPIC_API_KEY environment variable not set (contextual.enabled = true)")
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            model: config.model.clone(),
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("anthropic-beta", PROMPT_CACHING_BETA)
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = builder.send().await.context("Anthropic request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Anthropic API error {}: {}", status, body);
        }
        Ok(response.json().await?)
    }

    async fn fetch_batch(&self, batch_id: &str) -> Result<BatchResponse> {
        let url = format!("{}/v1/messages/batches/{}", self.api_url, batch_id);
        self.send_json(self.request(reqwest::Method::GET, &url)).await
    }
}

#[async_trait]
impl ContextGenerator for AnthropicGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, document: &str, chunk: &str) -> Result<Generated> {
        let url = format!("{}/v1/messages", self.api_url);
        let body = message_params(&self.model, document, chunk);
        let response: MessageResponse = self
            .send_json(self.request(reqwest::Method::POST, &url).json(&body))
            .await?;
        debug!(usage = ?response.usage, "context generated");
        Ok(response.into_generated())
    }

    async fn submit_batch(&self, document: &str, items: &[BatchItem]) -> Result<String> {
        let url = format!("{}/v1/messages/batches", self.api_url);
        let requests: Vec<serde_json::Value> = items
            .iter()
            .map(|item| {
                json!({
                    "custom_id": item.custom_id,
                    "params": message_params(&self.model, document, &item.chunk),
                })
            })
            .collect();
        let response: BatchResponse = self
            .send_json(
                self.request(reqwest::Method::POST, &url)
                    .json(&json!({ "requests": requests })),
            )
            .await?;
        Ok(response.id)
    }

    async fn batch_status(&self, batch_id: &str) -> Result<BatchStatus> {
        let batch = self.fetch_batch(batch_id).await?;
        Ok(BatchStatus::parse(&batch.processing_status))
    }

    async fn batch_results(&self, batch_id: &str) -> Result<HashMap<String, BatchOutcome>> {
        let batch = self.fetch_batch(batch_id).await?;
        let results_url = batch
            .results_url
            .ok_or_else(|| anyhow!("batch {} has no results yet", batch_id))?;
        let response = self
            .request(reqwest::Method::GET, &results_url)
            .send()
            .await
            .context("Failed to download batch results")?;
        let status = response.status();
        if !status.is_success() {
            bail!("Anthropic batch results error {}", status);
        }
        parse_batch_results(&response.text().await?)
    }
}
