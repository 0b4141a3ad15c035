//! The [`DocumentEngine`]: one handle owning the store, providers, caches
//! and worker pool.
//!
//! Operations live next to their concerns and extend this type with their
//! own `impl` blocks:
//!
//! | Operation | Module |
//! |-----------|--------|
//! | `ingest`, `migrate_to_contextual` | [`crate::ingest`] |
//! | `search`, `get_context` | [`crate::search`] |
//! | `delete`, `get_document`, `list_documents`, agent links | [`crate::documents`] |

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use hybrid_context_core::bm25::Bm25Index;
use hybrid_context_core::cache::{LexicalIndexCache, MetadataCache};
use hybrid_context_core::embedding::EmbeddingProvider;
use hybrid_context_core::models::DocumentMetadata;
use hybrid_context_core::store::Store;

use crate::config::{Config, RetrievalConfig};
use crate::db;
use crate::embedding;
use crate::enrich::{ContextualEnricher, EnricherSettings, EnrichmentStats};
use crate::generation::{AnthropicGenerator, ContextGenerator};
use crate::migrate;
use crate::rerank::Reranker;
use crate::sqlite_store::SqliteStore;
use crate::workers::BlockingPool;

/// How search combines its branches. Chosen once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStrategy {
    SemanticOnly,
    Hybrid { rrf_k: u32 },
}

impl RetrievalStrategy {
    pub fn from_config(config: &RetrievalConfig) -> Result<Self> {
        match config.mode.as_str() {
            "semantic" => Ok(RetrievalStrategy::SemanticOnly),
            "hybrid" => Ok(RetrievalStrategy::Hybrid {
                rrf_k: config.rrf_k,
            }),
            other => bail!("Unknown retrieval mode: '{}'", other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub retrieval: RetrievalStrategy,
    /// Pick a chunking strategy per document; otherwise always the base one.
    pub adaptive_chunking: bool,
    pub default_max_results: usize,
    pub similarity_threshold: f64,
    pub candidate_multiplier: usize,
    pub metadata_ttl: Duration,
    pub embed_batch_size: usize,
    pub rerank_candidates: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retrieval: RetrievalStrategy::Hybrid { rrf_k: 60 },
            adaptive_chunking: true,
            default_max_results: 5,
            similarity_threshold: 0.7,
            candidate_multiplier: 2,
            metadata_ttl: Duration::from_secs(300),
            embed_batch_size: 64,
            rerank_candidates: 20,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            retrieval: RetrievalStrategy::from_config(&config.retrieval)?,
            adaptive_chunking: config.chunking.adaptive,
            default_max_results: config.retrieval.default_max_results,
            similarity_threshold: config.retrieval.similarity_threshold,
            candidate_multiplier: config.retrieval.candidate_multiplier,
            metadata_ttl: Duration::from_secs(config.retrieval.metadata_ttl_secs),
            embed_batch_size: config.embedding.batch_size,
            rerank_candidates: config.rerank.candidates,
        })
    }
}

/// Everything the engine is assembled from. Tests inject their own.
pub struct EngineParts {
    pub store: Arc<dyn Store>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub enricher: ContextualEnricher,
    pub reranker: Arc<Reranker>,
    pub pool: BlockingPool,
    pub settings: EngineSettings,
}

pub struct DocumentEngine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) embedder: Arc<dyn EmbeddingProvider>,
    pub(crate) enricher: ContextualEnricher,
    pub(crate) reranker: Arc<Reranker>,
    pub(crate) pool: BlockingPool,
    pub(crate) settings: EngineSettings,
    pub(crate) metadata: MetadataCache,
    pub(crate) lexical: LexicalIndexCache,
    warm_up: Mutex<Option<JoinHandle<()>>>,
}

impl DocumentEngine {
    pub fn new(parts: EngineParts) -> Self {
        Self {
            metadata: MetadataCache::new(parts.settings.metadata_ttl),
            lexical: LexicalIndexCache::new(),
            store: parts.store,
            embedder: parts.embedder,
            enricher: parts.enricher,
            reranker: parts.reranker,
            pool: parts.pool,
            settings: parts.settings,
            warm_up: Mutex::new(None),
        }
    }

    /// Open the configured database and build every provider. The reranker
    /// model starts loading in the background.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = BlockingPool::new(config.workers.blocking_threads);

        let db = db::connect(config).await?;
        migrate::apply_schema(&db).await?;
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(db));

        let embedder = embedding::create_provider(&config.embedding, &pool)?;

        let generator: Option<Arc<dyn ContextGenerator>> = if config.contextual.enabled {
            Some(Arc::new(AnthropicGenerator::new(&config.contextual)?))
        } else {
            None
        };
        let enricher =
            ContextualEnricher::new(EnricherSettings::from_config(&config.contextual)?, generator);

        let reranker = Arc::new(Reranker::new(&config.rerank, pool.clone()));

        let engine = Self::new(EngineParts {
            store,
            embedder,
            enricher,
            reranker,
            pool,
            settings: EngineSettings::from_config(config)?,
        });
        engine.start_reranker_warm_up();

        info!(
            retrieval = ?engine.settings.retrieval,
            embedding = engine.embedder.model_name(),
            contextual = engine.enricher.is_enabled(),
            contextual_mode = engine.enricher.mode().as_str(),
            rerank = engine.reranker.is_enabled(),
            "engine ready"
        );
        Ok(engine)
    }

    /// Begin loading the cross-encoder if reranking is enabled.
    pub fn start_reranker_warm_up(&self) {
        if !self.reranker.is_enabled() || self.reranker.is_loaded() {
            return;
        }
        let reranker = self.reranker.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = reranker.warm_up().await {
                warn!(error = %e, "reranker warm-up failed, results will keep fused order");
            }
        });
        *self.warm_up.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Wait for a pending reranker warm-up. Searches never need this; the
    /// CLI uses it so one-shot queries get reranked.
    pub async fn reranker_ready(&self) {
        let handle = self.warm_up.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn reranker(&self) -> &Arc<Reranker> {
        &self.reranker
    }

    pub fn enrichment_stats(&self) -> EnrichmentStats {
        self.enricher.stats()
    }

    /// Rebuild the owner's BM25 index from the store and swap it in.
    ///
    /// Concurrent rebuilds may finish out of order; the one that read the
    /// store last wins. The returned index is never older than this call's
    /// own snapshot.
    pub async fn rebuild_lexical_index(&self, owner_id: &str) -> Result<Arc<Bm25Index>> {
        let ticket = self.lexical.begin_rebuild();
        let chunks = self.store.owner_chunks(owner_id).await?;
        let count = chunks.len();
        let index = Arc::new(self.pool.run(move || Bm25Index::build(&chunks)).await?);
        if self.lexical.install(owner_id, ticket, index.clone()) {
            debug!(owner_id, chunks = count, "lexical index rebuilt");
            return Ok(index);
        }
        debug!(owner_id, chunks = count, "lexical index superseded while rebuilding");
        Ok(self.lexical.get(owner_id).unwrap_or(index))
    }

    /// Rebuild after a committed write. On failure the cached index is
    /// dropped so the next query rebuilds it; the write itself stands.
    pub(crate) async fn refresh_lexical_index(&self, owner_id: &str) {
        if let Err(e) = self.rebuild_lexical_index(owner_id).await {
            self.lexical.invalidate(owner_id);
            warn!(owner_id, error = %e, "lexical index rebuild failed, next query will retry");
        }
    }

    /// The owner's current index, built on first use.
    pub(crate) async fn lexical_index(&self, owner_id: &str) -> Result<Arc<Bm25Index>> {
        match self.lexical.get(owner_id) {
            Some(index) => Ok(index),
            None => self.rebuild_lexical_index(owner_id).await,
        }
    }

    pub fn has_lexical_index(&self, owner_id: &str) -> bool {
        self.lexical.contains(owner_id)
    }

    /// Title and type for result assembly, through the TTL cache.
    pub(crate) async fn document_metadata(
        &self,
        document_id: &str,
    ) -> Result<Option<DocumentMetadata>> {
        let key = document_id.to_string();
        if let Some(meta) = self.metadata.get(&key) {
            return Ok(Some(meta));
        }
        let fetched = self.store.get_document_metadata(document_id).await?;
        if let Some(meta) = &fetched {
            self.metadata.insert(key, meta.clone());
        }
        Ok(fetched)
    }
}
