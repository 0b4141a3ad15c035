//! Contextual enrichment of chunks.
//!
//! For each chunk the enricher asks a [`ContextGenerator`] for a short
//! description that situates the chunk in its document. The processing
//! mode is fixed when the enricher is built:
//!
//! - **Streaming**: one request at a time (a single-permit semaphore),
//!   spaced at least `min_request_interval` apart, each bounded by
//!   `request_timeout`.
//! - **Batch**: one batch job for the whole document, polled every
//!   `batch_poll_interval` until it ends. `failed`/`expired` or running past
//!   `batch_timeout` fails the whole pass with a [`EngineError`] batch
//!   variant. There is no fallback to streaming.
//!
//! Individual contexts that fail validation, time out, or error leave their
//! chunk non-contextualized; they never fail the pass.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use hybrid_context_core::context::{estimate_tokens, ContextRules};
use hybrid_context_core::error::EngineError;
use hybrid_context_core::models::EnrichedChunk;

use crate::config::ContextualConfig;
use crate::generation::{BatchItem, BatchOutcome, BatchStatus, ContextGenerator, TokenUsage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentMode {
    Streaming,
    Batch,
}

impl EnrichmentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentMode::Streaming => "streaming",
            EnrichmentMode::Batch => "batch",
        }
    }
}

impl std::str::FromStr for EnrichmentMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "streaming" => Ok(EnrichmentMode::Streaming),
            "batch" => Ok(EnrichmentMode::Batch),
            other => bail!("Unknown contextual mode: '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnricherSettings {
    pub enabled: bool,
    pub mode: EnrichmentMode,
    pub max_tokens_per_document: usize,
    pub request_timeout: Duration,
    pub min_request_interval: Duration,
    pub batch_poll_interval: Duration,
    pub batch_timeout: Duration,
    pub rules: ContextRules,
    /// Requests per caller per UTC day; 0 is unlimited.
    pub daily_request_cap: u64,
}

impl EnricherSettings {
    pub fn from_config(config: &ContextualConfig) -> Result<Self> {
        Ok(Self {
            enabled: config.enabled,
            mode: config.mode.parse()?,
            max_tokens_per_document: config.max_tokens_per_document,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            min_request_interval: Duration::from_millis(config.min_request_interval_ms),
            batch_poll_interval: Duration::from_secs(config.batch_poll_interval_secs),
            batch_timeout: Duration::from_secs(config.batch_timeout_secs),
            rules: ContextRules {
                max_chars: config.max_context_chars,
                overlap_threshold: config.overlap_threshold,
            },
            daily_request_cap: config.daily_request_cap,
        })
    }
}

impl Default for EnricherSettings {
    fn default() -> Self {
        Self::from_config(&ContextualConfig::default()).unwrap_or(Self {
            enabled: false,
            mode: EnrichmentMode::Streaming,
            max_tokens_per_document: 100_000,
            request_timeout: Duration::from_secs(120),
            min_request_interval: Duration::from_millis(2000),
            batch_poll_interval: Duration::from_secs(30),
            batch_timeout: Duration::from_secs(3600),
            rules: ContextRules::default(),
            daily_request_cap: 0,
        })
    }
}

/// Running totals since the enricher was created.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnrichmentStats {
    pub total_requests: u64,
    pub successful: u64,
    pub rejected: u64,
    pub failed: u64,
    pub skipped_by_cap: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

impl EnrichmentStats {
    /// Share of cacheable prompt tokens served from the provider cache.
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_read_tokens + self.cache_creation_tokens;
        if total == 0 {
            0.0
        } else {
            self.cache_read_tokens as f64 / total as f64
        }
    }

    fn add_usage(&mut self, usage: &TokenUsage) {
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cache_read_tokens += usage.cache_read_input_tokens;
        self.cache_creation_tokens += usage.cache_creation_input_tokens;
    }
}

/// Result of one enrichment pass over a document.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentOutcome {
    /// One entry per input chunk, in input order.
    pub chunks: Vec<EnrichedChunk>,
    /// Set when the document was not sent to the provider at all.
    pub skipped_reason: Option<String>,
}

impl EnrichmentOutcome {
    fn untouched(chunks: &[String], reason: Option<String>) -> Self {
        Self {
            chunks: chunks.iter().map(EnrichedChunk::plain).collect(),
            skipped_reason: reason,
        }
    }

    pub fn contextualized_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_contextualized).count()
    }
}

pub struct ContextualEnricher {
    settings: EnricherSettings,
    generator: Option<Arc<dyn ContextGenerator>>,
    in_flight: Semaphore,
    last_request: Mutex<Option<Instant>>,
    usage: Mutex<HashMap<String, (NaiveDate, u64)>>,
    stats: Mutex<EnrichmentStats>,
}

impl ContextualEnricher {
    pub fn new(settings: EnricherSettings, generator: Option<Arc<dyn ContextGenerator>>) -> Self {
        Self {
            settings,
            generator,
            in_flight: Semaphore::new(1),
            last_request: Mutex::new(None),
            usage: Mutex::new(HashMap::new()),
            stats: Mutex::new(EnrichmentStats::default()),
        }
    }

    /// An enricher that never calls a provider.
    pub fn disabled() -> Self {
        Self::new(
            EnricherSettings {
                enabled: false,
                ..EnricherSettings::default()
            },
            None,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled && self.generator.is_some()
    }

    pub fn mode(&self) -> EnrichmentMode {
        self.settings.mode
    }

    pub fn stats(&self) -> EnrichmentStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, update: impl FnOnce(&mut EnrichmentStats)) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        update(&mut stats);
    }

    /// Enrich every chunk of one document on behalf of `caller`.
    ///
    /// Returns `Err` only when a batch job fails or times out (or cannot be
    /// submitted or polled); per-chunk problems degrade that chunk.
    pub async fn process_document_chunks(
        &self,
        caller: &str,
        chunks: &[String],
        full_document: &str,
    ) -> Result<EnrichmentOutcome> {
        let generator = match (&self.generator, self.settings.enabled) {
            (Some(generator), true) => generator.clone(),
            _ => {
                debug!(chunks = chunks.len(), "contextual enrichment disabled");
                return Ok(EnrichmentOutcome::untouched(chunks, None));
            }
        };

        let doc_tokens = estimate_tokens(full_document);
        if doc_tokens > self.settings.max_tokens_per_document {
            warn!(
                doc_tokens,
                cap = self.settings.max_tokens_per_document,
                "document too large for contextual enrichment, skipping"
            );
            return Ok(EnrichmentOutcome::untouched(
                chunks,
                Some(format!(
                    "document too large ({} tokens > {})",
                    doc_tokens, self.settings.max_tokens_per_document
                )),
            ));
        }

        let outcome = match self.settings.mode {
            EnrichmentMode::Streaming => {
                self.process_streaming(generator.as_ref(), caller, chunks, full_document)
                    .await
            }
            EnrichmentMode::Batch => {
                self.process_batch(generator.as_ref(), caller, chunks, full_document)
                    .await?
            }
        };

        info!(
            mode = self.settings.mode.as_str(),
            contextualized = outcome.contextualized_count(),
            total = chunks.len(),
            "contextual enrichment finished"
        );
        Ok(outcome)
    }

    async fn process_streaming(
        &self,
        generator: &dyn ContextGenerator,
        caller: &str,
        chunks: &[String],
        full_document: &str,
    ) -> EnrichmentOutcome {
        let mut enriched = Vec::with_capacity(chunks.len());

        for (idx, chunk) in chunks.iter().enumerate() {
            if !self.try_consume(caller) {
                debug!(chunk = idx, caller, "daily request cap reached, skipping chunk");
                self.record(|s| s.skipped_by_cap += 1);
                enriched.push(EnrichedChunk::plain(chunk));
                continue;
            }

            let context = self.generate_one(generator, chunk, full_document).await;
            enriched.push(match context {
                Some(ctx) => EnrichedChunk::contextualized(chunk, ctx),
                None => EnrichedChunk::plain(chunk),
            });
        }

        EnrichmentOutcome {
            chunks: enriched,
            skipped_reason: None,
        }
    }

    /// One spaced, single-flight, time-bounded call, validated.
    async fn generate_one(
        &self,
        generator: &dyn ContextGenerator,
        chunk: &str,
        full_document: &str,
    ) -> Option<String> {
        let _permit = self.in_flight.acquire().await.ok()?;
        self.wait_for_spacing().await;
        self.record(|s| s.total_requests += 1);

        let result = tokio::time::timeout(
            self.settings.request_timeout,
            generator.generate(full_document, chunk),
        )
        .await;

        match result {
            Ok(Ok(generated)) => {
                self.record(|s| s.add_usage(&generated.usage));
                self.accept(&generated.text, chunk)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "context generation failed");
                self.record(|s| s.failed += 1);
                None
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.settings.request_timeout.as_secs(),
                    "context generation timed out"
                );
                self.record(|s| s.failed += 1);
                None
            }
        }
    }

    async fn wait_for_spacing(&self) {
        let wait = {
            let last = self.last_request.lock().unwrap_or_else(|e| e.into_inner());
            last.and_then(|t| self.settings.min_request_interval.checked_sub(t.elapsed()))
        };
        if let Some(wait) = wait {
            debug!(?wait, "spacing provider requests");
            tokio::time::sleep(wait).await;
        }
        *self.last_request.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }

    fn accept(&self, text: &str, chunk: &str) -> Option<String> {
        match self.settings.rules.validate(text, chunk) {
            Ok(context) => {
                self.record(|s| s.successful += 1);
                Some(context)
            }
            Err(reason) => {
                debug!(%reason, "generated context rejected");
                self.record(|s| s.rejected += 1);
                None
            }
        }
    }

    async fn process_batch(
        &self,
        generator: &dyn ContextGenerator,
        caller: &str,
        chunks: &[String],
        full_document: &str,
    ) -> Result<EnrichmentOutcome> {
        let mut items = Vec::new();
        for (idx, chunk) in chunks.iter().enumerate() {
            if self.try_consume(caller) {
                items.push(BatchItem {
                    custom_id: format!("chunk_{}", idx),
                    chunk: chunk.clone(),
                });
            } else {
                self.record(|s| s.skipped_by_cap += 1);
            }
        }
        if items.is_empty() {
            return Ok(EnrichmentOutcome::untouched(chunks, None));
        }

        let batch_id = generator.submit_batch(full_document, &items).await?;
        self.record(|s| s.total_requests += items.len() as u64);
        info!(%batch_id, requests = items.len(), "batch submitted");

        self.wait_for_batch(generator, &batch_id).await?;
        let mut results = generator.batch_results(&batch_id).await?;

        let mut enriched = Vec::with_capacity(chunks.len());
        for (idx, chunk) in chunks.iter().enumerate() {
            let context = match results.remove(&format!("chunk_{}", idx)) {
                Some(BatchOutcome::Succeeded(generated)) => {
                    self.record(|s| s.add_usage(&generated.usage));
                    self.accept(&generated.text, chunk)
                }
                Some(BatchOutcome::NotSucceeded(kind)) => {
                    warn!(chunk = idx, %kind, "batch item did not succeed");
                    self.record(|s| s.failed += 1);
                    None
                }
                None => {
                    if items.iter().any(|i| i.custom_id == format!("chunk_{}", idx)) {
                        warn!(chunk = idx, "no batch result for chunk");
                        self.record(|s| s.failed += 1);
                    }
                    None
                }
            };
            enriched.push(match context {
                Some(ctx) => EnrichedChunk::contextualized(chunk, ctx),
                None => EnrichedChunk::plain(chunk),
            });
        }

        Ok(EnrichmentOutcome {
            chunks: enriched,
            skipped_reason: None,
        })
    }

    async fn wait_for_batch(&self, generator: &dyn ContextGenerator, batch_id: &str) -> Result<()> {
        let started = Instant::now();
        loop {
            let status = generator.batch_status(batch_id).await?;
            debug!(%batch_id, status = status.as_str(), "batch status");
            match status {
                BatchStatus::Ended => {
                    info!(%batch_id, elapsed_secs = started.elapsed().as_secs(), "batch ended");
                    return Ok(());
                }
                BatchStatus::Failed | BatchStatus::Expired => {
                    return Err(EngineError::BatchJobFailed {
                        batch_id: batch_id.to_string(),
                        status: status.as_str().to_string(),
                    }
                    .into());
                }
                _ => {}
            }

            let elapsed = started.elapsed();
            if elapsed >= self.settings.batch_timeout {
                return Err(EngineError::BatchTimeout {
                    batch_id: batch_id.to_string(),
                    secs: self.settings.batch_timeout.as_secs(),
                }
                .into());
            }
            let remaining = self.settings.batch_timeout - elapsed;
            tokio::time::sleep(self.settings.batch_poll_interval.min(remaining)).await;
        }
    }

    fn try_consume(&self, caller: &str) -> bool {
        self.try_consume_on(caller, chrono::Utc::now().date_naive())
    }

    fn try_consume_on(&self, caller: &str, today: NaiveDate) -> bool {
        let mut usage = self.usage.lock().unwrap_or_else(|e| e.into_inner());
        let entry = usage.entry(caller.to_string()).or_insert((today, 0));
        if entry.0 != today {
            *entry = (today, 0);
        }
        if self.settings.daily_request_cap > 0 && entry.1 >= self.settings.daily_request_cap {
            return false;
        }
        entry.1 += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::Generated;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Reply = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

    struct ScriptedGenerator {
        reply: Reply,
        delay: Duration,
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
        started: Mutex<Vec<Instant>>,
        statuses: Mutex<VecDeque<BatchStatus>>,
        submitted: Mutex<Vec<BatchItem>>,
    }

    impl ScriptedGenerator {
        fn new(reply: Reply) -> Self {
            Self {
                reply,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                started: Mutex::new(Vec::new()),
                statuses: Mutex::new(VecDeque::new()),
                submitted: Mutex::new(Vec::new()),
            }
        }

        fn describing() -> Self {
            Self::new(Box::new(|chunk: &str| -> Result<String> {
                Ok(format!("Section describing {} characters of text", chunk.len()))
            }))
        }

        fn with_statuses(self, statuses: &[BatchStatus]) -> Self {
            *self.statuses.lock().unwrap() = statuses.iter().cloned().collect();
            self
        }
    }

    #[async_trait]
    impl ContextGenerator for ScriptedGenerator {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _document: &str, chunk: &str) -> Result<Generated> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.started.lock().unwrap().push(Instant::now());
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Generated {
                text: (self.reply)(chunk)?,
                usage: TokenUsage {
                    input_tokens: 100,
                    output_tokens: 10,
                    cache_read_input_tokens: 80,
                    cache_creation_input_tokens: 20,
                },
            })
        }

        async fn submit_batch(&self, _document: &str, items: &[BatchItem]) -> Result<String> {
            self.submitted.lock().unwrap().extend(items.iter().cloned());
            Ok("batch_1".to_string())
        }

        async fn batch_status(&self, _batch_id: &str) -> Result<BatchStatus> {
            Ok(self
                .statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(BatchStatus::InProgress))
        }

        async fn batch_results(&self, _batch_id: &str) -> Result<HashMap<String, BatchOutcome>> {
            let items = self.submitted.lock().unwrap().clone();
            let mut out = HashMap::new();
            for item in items {
                let outcome = match (self.reply)(&item.chunk) {
                    Ok(text) => BatchOutcome::Succeeded(Generated {
                        text,
                        usage: TokenUsage::default(),
                    }),
                    Err(_) => BatchOutcome::NotSucceeded("errored".to_string()),
                };
                out.insert(item.custom_id, outcome);
            }
            Ok(out)
        }
    }

    fn settings(mode: EnrichmentMode) -> EnricherSettings {
        EnricherSettings {
            enabled: true,
            mode,
            min_request_interval: Duration::ZERO,
            batch_poll_interval: Duration::from_millis(5),
            batch_timeout: Duration::from_secs(5),
            ..EnricherSettings::default()
        }
    }

    fn chunks(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("chunk number {} body", i)).collect()
    }

    #[tokio::test]
    async fn test_disabled_makes_no_calls() {
        let generator = Arc::new(ScriptedGenerator::describing());
        let enricher = ContextualEnricher::new(
            EnricherSettings {
                enabled: false,
                ..settings(EnrichmentMode::Streaming)
            },
            Some(generator.clone()),
        );
        let out = enricher
            .process_document_chunks("owner", &chunks(3), "doc")
            .await
            .unwrap();
        assert_eq!(out.chunks.len(), 3);
        assert!(out
            .chunks
            .iter()
            .all(|c| !c.is_contextualized && c.contextual_content.is_none()));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_streaming_contextualizes_in_order() {
        let generator = Arc::new(ScriptedGenerator::describing());
        let enricher = ContextualEnricher::new(settings(EnrichmentMode::Streaming), Some(generator));
        let input = chunks(3);
        let out = enricher
            .process_document_chunks("owner", &input, "doc")
            .await
            .unwrap();
        for (c, original) in out.chunks.iter().zip(&input) {
            assert_eq!(&c.content, original);
            assert!(c.is_contextualized);
        }
        let stats = enricher.stats();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.successful, 3);
        assert!((stats.cache_hit_rate() - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_streaming_spacing_and_single_flight() {
        let mut generator = ScriptedGenerator::describing();
        generator.delay = Duration::from_millis(10);
        let generator = Arc::new(generator);
        let enricher = Arc::new(ContextualEnricher::new(
            EnricherSettings {
                min_request_interval: Duration::from_millis(60),
                ..settings(EnrichmentMode::Streaming)
            },
            Some(generator.clone()),
        ));

        // Two documents enriched concurrently still share one request slot.
        let a = {
            let e = enricher.clone();
            tokio::spawn(async move { e.process_document_chunks("o", &chunks(2), "doc a").await })
        };
        let b = {
            let e = enricher.clone();
            tokio::spawn(async move { e.process_document_chunks("o", &chunks(2), "doc b").await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(generator.peak.load(Ordering::SeqCst), 1);
        let mut starts = generator.started.lock().unwrap().clone();
        starts.sort();
        assert_eq!(starts.len(), 4);
        for pair in starts.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(55));
        }
    }

    #[tokio::test]
    async fn test_rejected_context_leaves_chunk_plain() {
        let generator = Arc::new(ScriptedGenerator::new(Box::new(|chunk: &str| -> Result<String> {
            Ok(chunk.to_string())
        })));
        let enricher = ContextualEnricher::new(settings(EnrichmentMode::Streaming), Some(generator));
        let out = enricher
            .process_document_chunks("owner", &chunks(2), "doc")
            .await
            .unwrap();
        assert!(out.chunks.iter().all(|c| !c.is_contextualized));
        assert_eq!(enricher.stats().rejected, 2);
    }

    #[tokio::test]
    async fn test_provider_error_degrades_chunk() {
        let generator = Arc::new(ScriptedGenerator::new(Box::new(|chunk: &str| -> Result<String> {
            if chunk.contains(" 1 ") {
                bail!("overloaded")
            } else {
                Ok("Opening section of the handbook".to_string())
            }
        })));
        let enricher = ContextualEnricher::new(settings(EnrichmentMode::Streaming), Some(generator));
        let out = enricher
            .process_document_chunks("owner", &chunks(3), "doc")
            .await
            .unwrap();
        let flags: Vec<bool> = out.chunks.iter().map(|c| c.is_contextualized).collect();
        assert_eq!(flags, vec![true, false, true]);
        assert_eq!(enricher.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let mut generator = ScriptedGenerator::describing();
        generator.delay = Duration::from_millis(200);
        let enricher = ContextualEnricher::new(
            EnricherSettings {
                request_timeout: Duration::from_millis(20),
                ..settings(EnrichmentMode::Streaming)
            },
            Some(Arc::new(generator)),
        );
        let out = enricher
            .process_document_chunks("owner", &chunks(1), "doc")
            .await
            .unwrap();
        assert!(!out.chunks[0].is_contextualized);
        assert_eq!(enricher.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_oversized_document_skips_enrichment() {
        let generator = Arc::new(ScriptedGenerator::describing());
        let enricher = ContextualEnricher::new(
            EnricherSettings {
                max_tokens_per_document: 10,
                ..settings(EnrichmentMode::Streaming)
            },
            Some(generator.clone()),
        );
        let out = enricher
            .process_document_chunks("owner", &chunks(2), &"x".repeat(100))
            .await
            .unwrap();
        assert!(out.skipped_reason.is_some());
        assert!(out.chunks.iter().all(|c| !c.is_contextualized));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_daily_cap_skips_further_calls() {
        let generator = Arc::new(ScriptedGenerator::describing());
        let enricher = ContextualEnricher::new(
            EnricherSettings {
                daily_request_cap: 2,
                ..settings(EnrichmentMode::Streaming)
            },
            Some(generator.clone()),
        );
        let out = enricher
            .process_document_chunks("owner", &chunks(4), "doc")
            .await
            .unwrap();
        let flags: Vec<bool> = out.chunks.iter().map(|c| c.is_contextualized).collect();
        assert_eq!(flags, vec![true, true, false, false]);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(enricher.stats().skipped_by_cap, 2);

        // Another caller has its own allowance.
        let other = enricher
            .process_document_chunks("someone-else", &chunks(1), "doc")
            .await
            .unwrap();
        assert!(other.chunks[0].is_contextualized);
    }

    #[test]
    fn test_usage_counter_resets_on_new_day() {
        let enricher = ContextualEnricher::new(
            EnricherSettings {
                daily_request_cap: 1,
                ..settings(EnrichmentMode::Streaming)
            },
            None,
        );
        let day1 = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        assert!(enricher.try_consume_on("o", day1));
        assert!(!enricher.try_consume_on("o", day1));
        assert!(enricher.try_consume_on("o", day2));
    }

    #[tokio::test]
    async fn test_batch_success() {
        let generator = Arc::new(
            ScriptedGenerator::describing()
                .with_statuses(&[BatchStatus::InProgress, BatchStatus::Ended]),
        );
        let enricher = ContextualEnricher::new(settings(EnrichmentMode::Batch), Some(generator.clone()));
        let out = enricher
            .process_document_chunks("owner", &chunks(3), "doc")
            .await
            .unwrap();
        assert_eq!(out.contextualized_count(), 3);
        let ids: Vec<String> = generator
            .submitted
            .lock()
            .unwrap()
            .iter()
            .map(|i| i.custom_id.clone())
            .collect();
        assert_eq!(ids, vec!["chunk_0", "chunk_1", "chunk_2"]);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_batch_failed_status_is_fatal() {
        for status in [BatchStatus::Failed, BatchStatus::Expired] {
            let generator = Arc::new(
                ScriptedGenerator::describing().with_statuses(&[BatchStatus::InProgress, status]),
            );
            let enricher = ContextualEnricher::new(settings(EnrichmentMode::Batch), Some(generator.clone()));
            let err = enricher
                .process_document_chunks("owner", &chunks(2), "doc")
                .await
                .unwrap_err();
            let engine_err = err.downcast_ref::<EngineError>().unwrap();
            assert!(matches!(engine_err, EngineError::BatchJobFailed { .. }));
            // No fallback to per-chunk requests.
            assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        }
    }

    #[tokio::test]
    async fn test_batch_timeout_is_fatal() {
        let generator = Arc::new(ScriptedGenerator::describing());
        let enricher = ContextualEnricher::new(
            EnricherSettings {
                batch_timeout: Duration::from_millis(30),
                ..settings(EnrichmentMode::Batch)
            },
            Some(generator),
        );
        let err = enricher
            .process_document_chunks("owner", &chunks(2), "doc")
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::BatchTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn test_batch_item_errors_degrade_only_that_chunk() {
        let generator = Arc::new(
            ScriptedGenerator::new(Box::new(|chunk: &str| -> Result<String> {
                if chunk.contains(" 0 ") {
                    bail!("errored")
                } else {
                    Ok("Part of the quarterly report".to_string())
                }
            }))
            .with_statuses(&[BatchStatus::Ended]),
        );
        let enricher = ContextualEnricher::new(settings(EnrichmentMode::Batch), Some(generator));
        let out = enricher
            .process_document_chunks("owner", &chunks(2), "doc")
            .await
            .unwrap();
        assert!(!out.chunks[0].is_contextualized);
        assert!(out.chunks[1].is_contextualized);
    }
}
