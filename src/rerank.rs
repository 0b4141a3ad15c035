//! Optional cross-encoder reranking of fused results.
//!
//! The model loads in the background ([`Reranker::warm_up`]); until it is
//! ready, and whenever inference fails, [`Reranker::rerank`] hands back its
//! input truncated to the requested count.

use std::sync::{Arc, Mutex, RwLock};

use anyhow::Result;
use tracing::{debug, info, warn};

use hybrid_context_core::models::SearchResult;

use crate::config::RerankConfig;
use crate::workers::BlockingPool;

/// Relevance scorer for `(query, document)` pairs. Runs on the blocking pool.
pub trait CrossEncoder: Send + Sync {
    /// One score per document, in input order; higher is more relevant.
    fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;
}

#[cfg(feature = "local-embeddings-fastembed")]
pub struct FastembedCrossEncoder {
    model: Mutex<fastembed::TextRerank>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl FastembedCrossEncoder {
    pub fn load(model_name: &str) -> Result<Self> {
        let model = match model_name.to_lowercase().as_str() {
            "bge-reranker-base" => fastembed::RerankerModel::BGERerankerBase,
            "bge-reranker-v2-m3" => fastembed::RerankerModel::BGERerankerV2M3,
            other => anyhow::bail!("Unknown rerank model: '{}'", other),
        };
        let reranker = fastembed::TextRerank::try_new(
            fastembed::RerankInitOptions::new(model).with_show_download_progress(false),
        )
        .map_err(|e| anyhow::anyhow!("Failed to load rerank model: {}", e))?;
        Ok(Self {
            model: Mutex::new(reranker),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
impl CrossEncoder for FastembedCrossEncoder {
    fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let docs: Vec<&str> = documents.iter().map(String::as_str).collect();
        let mut model = self.model.lock().unwrap_or_else(|e| e.into_inner());
        let ranked = model
            .rerank(query, docs, false, None)
            .map_err(|e| anyhow::anyhow!("Rerank inference failed: {}", e))?;

        let mut scores = vec![f32::NEG_INFINITY; documents.len()];
        for r in ranked {
            if let Some(slot) = scores.get_mut(r.index) {
                *slot = r.score;
            }
        }
        Ok(scores)
    }
}

pub struct Reranker {
    enabled: bool,
    model_name: String,
    encoder: RwLock<Option<Arc<dyn CrossEncoder>>>,
    pool: BlockingPool,
}

impl Reranker {
    pub fn new(config: &RerankConfig, pool: BlockingPool) -> Self {
        Self {
            enabled: config.enabled,
            model_name: config.model.clone(),
            encoder: RwLock::new(None),
            pool,
        }
    }

    pub fn disabled(pool: BlockingPool) -> Self {
        Self::new(&RerankConfig::default(), pool)
    }

    /// A reranker that is already loaded with `encoder`.
    pub fn with_encoder(encoder: Arc<dyn CrossEncoder>, pool: BlockingPool) -> Self {
        Self {
            enabled: true,
            model_name: "custom".to_string(),
            encoder: RwLock::new(Some(encoder)),
            pool,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_loaded(&self) -> bool {
        self.encoder
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    fn current(&self) -> Option<Arc<dyn CrossEncoder>> {
        if !self.enabled {
            return None;
        }
        self.encoder
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Load the configured model. Does nothing when reranking is disabled
    /// or a model is already loaded.
    pub async fn warm_up(&self) -> Result<()> {
        if !self.enabled || self.is_loaded() {
            return Ok(());
        }
        let encoder = self.load_encoder().await?;
        *self.encoder.write().unwrap_or_else(|e| e.into_inner()) = Some(encoder);
        info!(model = %self.model_name, "reranker ready");
        Ok(())
    }

    #[cfg(feature = "local-embeddings-fastembed")]
    async fn load_encoder(&self) -> Result<Arc<dyn CrossEncoder>> {
        let name = self.model_name.clone();
        let encoder = self
            .pool
            .run(move || FastembedCrossEncoder::load(&name))
            .await??;
        Ok(Arc::new(encoder))
    }

    #[cfg(not(feature = "local-embeddings-fastembed"))]
    async fn load_encoder(&self) -> Result<Arc<dyn CrossEncoder>> {
        anyhow::bail!("Reranking requires --features local-embeddings-fastembed")
    }

    /// Reorder `results` by cross-encoder score and keep the top `limit`.
    pub async fn rerank(
        &self,
        query: &str,
        mut results: Vec<SearchResult>,
        limit: usize,
    ) -> Vec<SearchResult> {
        let encoder = match self.current() {
            Some(encoder) if results.len() >= 2 => encoder,
            _ => {
                results.truncate(limit);
                return results;
            }
        };

        let query_owned = query.to_string();
        let documents: Vec<String> = results.iter().map(|r| r.content.clone()).collect();
        let scored = self
            .pool
            .run(move || encoder.score(&query_owned, &documents))
            .await
            .and_then(|r| r);

        match scored {
            Ok(scores) if scores.len() == results.len() => {
                let mut paired: Vec<(f32, SearchResult)> = scores.into_iter().zip(results).collect();
                paired.sort_by(|a, b| b.0.total_cmp(&a.0));
                debug!(candidates = paired.len(), "reranked results");
                paired
                    .into_iter()
                    .take(limit)
                    .map(|(score, mut r)| {
                        r.score = score as f64;
                        r
                    })
                    .collect()
            }
            Ok(scores) => {
                warn!(
                    expected = results.len(),
                    got = scores.len(),
                    "reranker returned wrong number of scores"
                );
                results.truncate(limit);
                results
            }
            Err(e) => {
                warn!(error = %e, "rerank failed, keeping fused order");
                results.truncate(limit);
                results
            }
        }
    }
}
