//! Library-level tests of the document engine over the in-memory store,
//! with deterministic embedding and generation providers.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::Notify;

use hybrid_context::enrich::{ContextualEnricher, EnricherSettings, EnrichmentMode};
use hybrid_context::generation::{
    BatchItem, BatchOutcome, BatchStatus, ContextGenerator, Generated, TokenUsage,
};
use hybrid_context::rerank::{CrossEncoder, Reranker};
use hybrid_context::workers::BlockingPool;
use hybrid_context::{DocumentEngine, EngineParts, EngineSettings, RetrievalStrategy};
use hybrid_context_core::embedding::EmbeddingProvider;
use hybrid_context_core::error::EngineError;
use hybrid_context_core::models::{
    Chunk, Document, DocumentMetadata, EmbeddedChunk, SearchScope,
};
use hybrid_context_core::store::memory::InMemoryStore;
use hybrid_context_core::store::{Store, VectorHit};

const OWNER: &str = "owner-1";

/// Maps text to the vector of the first marker word it contains.
struct KeywordEmbedder {
    rules: Vec<(&'static str, Vec<f32>)>,
    fallback: Vec<f32>,
    seen: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl KeywordEmbedder {
    fn new(rules: Vec<(&'static str, Vec<f32>)>) -> Self {
        Self {
            rules,
            fallback: vec![0.0, 0.0, 0.0, 1.0],
            seen: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    /// alpha/bravo/charlie chunks; a query without markers sits closest to
    /// alpha, then bravo, then charlie.
    fn ranked() -> Self {
        Self::new(vec![
            ("alpha", vec![1.0, 0.0, 0.0, 0.0]),
            ("bravo", vec![0.0, 1.0, 0.0, 0.0]),
            ("charlie", vec![0.0, 0.0, 1.0, 0.0]),
            ("", vec![1.0, 0.8, 0.5, 0.0]),
        ])
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        self.rules
            .iter()
            .find(|(marker, _)| lower.contains(marker))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dims(&self) -> usize {
        4
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("embedding service unavailable");
        }
        self.seen.lock().unwrap().extend(texts.iter().cloned());
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

/// Always answers with the same description.
struct FixedGenerator {
    calls: AtomicUsize,
    batch_status: BatchStatus,
}

impl FixedGenerator {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            batch_status: BatchStatus::Ended,
        }
    }

    fn failing_batches() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            batch_status: BatchStatus::Failed,
        }
    }
}

const CONTEXT: &str = "Part of the acmecorp employee handbook.";

#[async_trait]
impl ContextGenerator for FixedGenerator {
    fn model_name(&self) -> &str {
        "fixed"
    }

    async fn generate(&self, _document: &str, _chunk: &str) -> Result<Generated> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Generated {
            text: CONTEXT.to_string(),
            usage: TokenUsage::default(),
        })
    }

    async fn submit_batch(&self, _document: &str, _items: &[BatchItem]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("batch-test".to_string())
    }

    async fn batch_status(&self, _batch_id: &str) -> Result<BatchStatus> {
        Ok(self.batch_status.clone())
    }

    async fn batch_results(&self, _batch_id: &str) -> Result<HashMap<String, BatchOutcome>> {
        Ok(HashMap::new())
    }
}

/// Like [`FixedGenerator`], but keeps every document text it was given.
#[derive(Default)]
struct RecordingGenerator {
    documents: Mutex<Vec<String>>,
}

#[async_trait]
impl ContextGenerator for RecordingGenerator {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn generate(&self, document: &str, _chunk: &str) -> Result<Generated> {
        self.documents.lock().unwrap().push(document.to_string());
        Ok(Generated {
            text: CONTEXT.to_string(),
            usage: TokenUsage::default(),
        })
    }

    async fn submit_batch(&self, _document: &str, _items: &[BatchItem]) -> Result<String> {
        bail!("batch mode not used here")
    }

    async fn batch_status(&self, _batch_id: &str) -> Result<BatchStatus> {
        Ok(BatchStatus::Failed)
    }

    async fn batch_results(&self, _batch_id: &str) -> Result<HashMap<String, BatchOutcome>> {
        Ok(HashMap::new())
    }
}

/// In-memory store whose owner-wide chunk scan can be made to fail, or to
/// hold its result once until released so a later writer overtakes it.
#[derive(Default)]
struct StallingStore {
    inner: InMemoryStore,
    fail_scans: AtomicBool,
    hold_next_scan: AtomicBool,
    scan_held: Notify,
    release_scan: Notify,
}

#[async_trait]
impl Store for StallingStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        self.inner.insert_document(doc).await
    }

    async fn insert_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        self.inner.insert_chunks(chunks).await
    }

    async fn update_chunk(&self, chunk: &Chunk, embedding: &[f32]) -> Result<()> {
        self.inner.update_chunk(chunk, embedding).await
    }

    async fn update_document_metadata(
        &self,
        document_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        self.inner.update_document_metadata(document_id, metadata).await
    }

    async fn get_document(&self, document_id: &str, owner_id: &str) -> Result<Option<Document>> {
        self.inner.get_document(document_id, owner_id).await
    }

    async fn list_documents(&self, owner_id: &str) -> Result<Vec<Document>> {
        self.inner.list_documents(owner_id).await
    }

    async fn get_document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        self.inner.get_document_chunks(document_id).await
    }

    async fn get_document_metadata(&self, document_id: &str) -> Result<Option<DocumentMetadata>> {
        self.inner.get_document_metadata(document_id).await
    }

    async fn delete_document(&self, document_id: &str, owner_id: &str) -> Result<bool> {
        self.inner.delete_document(document_id, owner_id).await
    }

    async fn owner_chunks(&self, owner_id: &str) -> Result<Vec<Chunk>> {
        if self.fail_scans.load(Ordering::SeqCst) {
            bail!("chunk scan unavailable");
        }
        let chunks = self.inner.owner_chunks(owner_id).await?;
        if self.hold_next_scan.swap(false, Ordering::SeqCst) {
            self.scan_held.notify_one();
            self.release_scan.notified().await;
        }
        Ok(chunks)
    }

    async fn vector_search(
        &self,
        owner_id: &str,
        query_vec: &[f32],
        threshold: f64,
        limit: usize,
        documents: Option<&HashSet<String>>,
    ) -> Result<Vec<VectorHit>> {
        self.inner
            .vector_search(owner_id, query_vec, threshold, limit, documents)
            .await
    }

    async fn agent_document_ids(&self, agent_id: &str) -> Result<HashSet<String>> {
        self.inner.agent_document_ids(agent_id).await
    }

    async fn link_agent_document(&self, agent_id: &str, document_id: &str) -> Result<()> {
        self.inner.link_agent_document(agent_id, document_id).await
    }

    async fn unlink_agent_document(&self, agent_id: &str, document_id: &str) -> Result<bool> {
        self.inner.unlink_agent_document(agent_id, document_id).await
    }
}

fn engine_over(store: Arc<StallingStore>) -> DocumentEngine {
    let pool = BlockingPool::new(2);
    DocumentEngine::new(EngineParts {
        store,
        embedder: Arc::new(KeywordEmbedder::ranked()),
        enricher: ContextualEnricher::disabled(),
        reranker: Arc::new(Reranker::disabled(pool.clone())),
        pool,
        settings: settings(),
    })
}

/// Reverses whatever order it is given.
struct ReversingEncoder;

impl CrossEncoder for ReversingEncoder {
    fn score(&self, _query: &str, documents: &[String]) -> Result<Vec<f32>> {
        Ok((0..documents.len()).map(|i| i as f32).collect())
    }
}

fn settings() -> EngineSettings {
    EngineSettings {
        retrieval: RetrievalStrategy::Hybrid { rrf_k: 60 },
        adaptive_chunking: false,
        similarity_threshold: 0.0,
        ..EngineSettings::default()
    }
}

fn streaming(enabled: bool) -> EnricherSettings {
    EnricherSettings {
        enabled,
        mode: EnrichmentMode::Streaming,
        min_request_interval: Duration::ZERO,
        batch_poll_interval: Duration::from_millis(5),
        ..EnricherSettings::default()
    }
}

struct Harness {
    engine: DocumentEngine,
    store: Arc<InMemoryStore>,
    embedder: Arc<KeywordEmbedder>,
}

fn harness_with(
    store: Arc<InMemoryStore>,
    embedder: Arc<KeywordEmbedder>,
    enricher: ContextualEnricher,
    reranker: Option<Reranker>,
) -> Harness {
    let pool = BlockingPool::new(2);
    let reranker = reranker.unwrap_or_else(|| Reranker::disabled(pool.clone()));
    let engine = DocumentEngine::new(EngineParts {
        store: store.clone(),
        embedder: embedder.clone(),
        enricher,
        reranker: Arc::new(reranker),
        pool,
        settings: settings(),
    });
    Harness {
        engine,
        store,
        embedder,
    }
}

fn harness() -> Harness {
    harness_with(
        Arc::new(InMemoryStore::new()),
        Arc::new(KeywordEmbedder::ranked()),
        ContextualEnricher::disabled(),
        None,
    )
}

/// About 700 characters starting with `lead`, so two never fit one
/// base-size chunk.
fn paragraph(lead: &str) -> String {
    let mut text = lead.to_string();
    while text.len() < 700 {
        text.push_str(" filler text about nothing in particular");
    }
    text
}

fn three_chunk_text() -> String {
    [
        paragraph("alpha opening remarks"),
        paragraph("bravo middle section"),
        paragraph("charlie closing notes mention zephyr once"),
    ]
    .join("\n\n")
}

async fn ingest_text(engine: &DocumentEngine, text: &str, title: &str) -> String {
    engine
        .ingest(text.as_bytes(), "text", OWNER, title)
        .await
        .unwrap()
}

fn scope() -> SearchScope {
    SearchScope::owner(OWNER)
}

#[tokio::test]
async fn test_ingest_stores_contiguous_chunks_in_order() {
    let h = harness();
    let text = three_chunk_text();
    let id = ingest_text(&h.engine, &text, "Handbook").await;

    let doc = h.engine.get_document(&id, OWNER).await.unwrap().unwrap();
    let indices: Vec<i64> = doc.chunks.iter().map(|c| c.chunk_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert!(doc.chunks[0].content.starts_with("alpha"));
    assert!(doc.chunks[1].content.starts_with("bravo"));
    assert!(doc.chunks[2].content.starts_with("charlie"));
    assert_eq!(doc.document.metadata["chunk_count"], 3);
    assert_eq!(doc.document.metadata["contextual"]["enabled"], false);
    assert!(doc.chunks.iter().all(|c| !c.is_contextualized));
    assert!(h.engine.has_lexical_index(OWNER));
}

#[tokio::test]
async fn test_unsupported_file_type_rejected_before_processing() {
    let h = harness();
    let err = h
        .engine
        .ingest(b"some text", "docx", OWNER, "Bad")
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::UnsupportedFileType(t)) if t == "docx"
    ));
    assert!(h.embedder.seen.lock().unwrap().is_empty());
    assert!(h.engine.list_documents(OWNER).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_lexical_hit_tops_fused_ranking() {
    let h = harness();
    ingest_text(&h.engine, &three_chunk_text(), "Handbook").await;

    // Semantic alone ranks the zephyr chunk last.
    let semantic_engine = DocumentEngine::new(EngineParts {
        store: h.store.clone(),
        embedder: h.embedder.clone(),
        enricher: ContextualEnricher::disabled(),
        reranker: Arc::new(Reranker::disabled(BlockingPool::new(1))),
        pool: BlockingPool::new(1),
        settings: EngineSettings {
            retrieval: RetrievalStrategy::SemanticOnly,
            ..settings()
        },
    });
    let semantic = semantic_engine
        .search("zephyr", &scope(), 3, None)
        .await
        .unwrap();
    assert_eq!(semantic.len(), 3);
    assert!(semantic[2].content.starts_with("charlie"));

    // With the semantic branch filtered out, only the lexical hit remains.
    let lexical = h.engine.search("zephyr", &scope(), 3, Some(0.99)).await.unwrap();
    assert_eq!(lexical.len(), 1);
    assert!(lexical[0].content.starts_with("charlie"));

    // Fused: 1/63 + 1/61 beats 1/61 alone.
    let fused = h.engine.search("zephyr", &scope(), 3, None).await.unwrap();
    assert_eq!(fused.len(), 3);
    assert!(fused[0].content.starts_with("charlie"));
    assert!((fused[0].score - (1.0 / 63.0 + 1.0 / 61.0)).abs() < 1e-12);
    assert!(fused[1].content.starts_with("alpha"));
    assert!((fused[1].score - 1.0 / 61.0).abs() < 1e-12);
    assert_eq!(fused[0].document_title, "Handbook");
    assert_eq!(fused[0].document_type, "text");
}

#[tokio::test]
async fn test_deleted_document_leaves_lexical_results() {
    let h = harness();
    let keep = ingest_text(&h.engine, "bravo notes about quokka habitats", "Keep").await;
    let gone = ingest_text(&h.engine, "bravo notes about wombat burrows", "Gone").await;

    let before = h.engine.search("wombat", &scope(), 5, Some(0.99)).await.unwrap();
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].document_id, gone);

    assert!(h.engine.delete(&gone, OWNER).await.unwrap());
    assert!(!h.engine.has_lexical_index(OWNER));

    let after = h.engine.search("wombat", &scope(), 5, Some(0.99)).await.unwrap();
    assert!(after.is_empty());
    let other = h.engine.search("quokka", &scope(), 5, Some(0.99)).await.unwrap();
    assert_eq!(other[0].document_id, keep);

    // Deleting again, or as someone else, matches nothing.
    assert!(!h.engine.delete(&gone, OWNER).await.unwrap());
    assert!(!h.engine.delete(&keep, "intruder").await.unwrap());
}

#[tokio::test]
async fn test_agent_without_links_sees_nothing() {
    let h = harness();
    let linked = ingest_text(&h.engine, "alpha guide to zephyr winds", "Winds").await;
    ingest_text(&h.engine, "bravo zephyr cotton fabric", "Fabric").await;

    let unscoped = h.engine.search("zephyr", &scope(), 5, None).await.unwrap();
    assert_eq!(unscoped.len(), 2);

    let agent_scope = scope().with_agent("agent-7");
    assert!(h
        .engine
        .search("zephyr", &agent_scope, 5, None)
        .await
        .unwrap()
        .is_empty());

    h.engine
        .link_agent_document("agent-7", &linked, OWNER)
        .await
        .unwrap();
    let scoped = h.engine.search("zephyr", &agent_scope, 5, None).await.unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].document_id, linked);

    let context = h.engine.get_context("zephyr", &agent_scope, 1000).await.unwrap();
    assert!(context.starts_with("[From: Winds]\n"));
    assert!(!context.contains("Fabric"));
}

#[tokio::test]
async fn test_link_requires_owned_document() {
    let h = harness();
    let id = ingest_text(&h.engine, "alpha private notes", "Private").await;
    let err = h
        .engine
        .link_agent_document("agent-1", &id, "someone-else")
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::NotFound(_))
    ));
    assert!(h.engine.agent_documents("agent-1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_disabled_enrichment_makes_no_calls() {
    let generator = Arc::new(FixedGenerator::new());
    let h = harness_with(
        Arc::new(InMemoryStore::new()),
        Arc::new(KeywordEmbedder::ranked()),
        ContextualEnricher::new(streaming(false), Some(generator.clone())),
        None,
    );
    let id = ingest_text(&h.engine, &three_chunk_text(), "Plain").await;

    assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    let doc = h.engine.get_document(&id, OWNER).await.unwrap().unwrap();
    assert!(doc
        .chunks
        .iter()
        .all(|c| !c.is_contextualized && c.contextual_content.is_none()));
}

#[tokio::test]
async fn test_streaming_enrichment_feeds_embedding_and_bm25() {
    let generator = Arc::new(FixedGenerator::new());
    let h = harness_with(
        Arc::new(InMemoryStore::new()),
        Arc::new(KeywordEmbedder::ranked()),
        ContextualEnricher::new(streaming(true), Some(generator.clone())),
        None,
    );
    let id = ingest_text(&h.engine, &three_chunk_text(), "Handbook").await;

    assert_eq!(generator.calls.load(Ordering::SeqCst), 3);
    let doc = h.engine.get_document(&id, OWNER).await.unwrap().unwrap();
    assert!(doc.chunks.iter().all(|c| c.is_contextualized));
    assert_eq!(doc.chunks[0].contextual_content.as_deref(), Some(CONTEXT));
    assert_eq!(doc.document.metadata["contextual"]["contextualized_chunks"], 3);

    let embedded = h.embedder.seen.lock().unwrap().clone();
    assert!(embedded
        .iter()
        .all(|t| t.starts_with(&format!("{}\n\n", CONTEXT))));

    // The generated context is searchable even though no chunk contains it.
    let hits = h.engine.search("acmecorp", &scope(), 5, Some(0.99)).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert!(!hits[0].content.contains("acmecorp"));

    let stats = h.engine.enrichment_stats();
    assert_eq!(stats.total_requests, 3);
    assert_eq!(stats.successful, 3);
}

#[tokio::test]
async fn test_failed_batch_still_ingests_without_context() {
    let generator = Arc::new(FixedGenerator::failing_batches());
    let mut enricher_settings = streaming(true);
    enricher_settings.mode = EnrichmentMode::Batch;
    let h = harness_with(
        Arc::new(InMemoryStore::new()),
        Arc::new(KeywordEmbedder::ranked()),
        ContextualEnricher::new(enricher_settings, Some(generator)),
        None,
    );
    let id = ingest_text(&h.engine, &three_chunk_text(), "Handbook").await;

    let doc = h.engine.get_document(&id, OWNER).await.unwrap().unwrap();
    assert_eq!(doc.chunks.len(), 3);
    assert!(doc.chunks.iter().all(|c| !c.is_contextualized));
    let error = doc.document.metadata["contextual"]["error"]
        .as_str()
        .unwrap();
    assert!(error.contains("failed"));
}

#[tokio::test]
async fn test_embedding_failure_stores_nothing() {
    let h = harness();
    h.embedder.fail.store(true, Ordering::SeqCst);
    let err = h
        .engine
        .ingest(three_chunk_text().as_bytes(), "text", OWNER, "Doomed")
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::Embedding { chunk_index: 0, .. })
    ));
    assert!(h.engine.list_documents(OWNER).await.unwrap().is_empty());
    assert_eq!(h.store.chunk_count().unwrap(), 0);
}

#[tokio::test]
async fn test_semantic_failure_falls_back_to_lexical() {
    let h = harness();
    ingest_text(&h.engine, &three_chunk_text(), "Handbook").await;
    h.embedder.fail.store(true, Ordering::SeqCst);

    let results = h.engine.search("zephyr", &scope(), 3, None).await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].content.starts_with("charlie"));
}

#[tokio::test]
async fn test_search_validation() {
    let h = harness();
    ingest_text(&h.engine, "alpha content", "Doc").await;

    for (query, threshold) in [("   ", None), ("alpha", Some(1.5)), ("alpha", Some(-2.0))] {
        let err = h
            .engine
            .search(query, &scope(), 5, threshold)
            .await
            .unwrap_err();
        assert!(err
            .downcast_ref::<EngineError>()
            .is_some_and(EngineError::is_validation));
    }
    assert!(h.engine.search("alpha", &scope(), 0, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_get_context_budget_and_empty() {
    let h = harness();
    ingest_text(&h.engine, &three_chunk_text(), "Handbook").await;

    let none = h.engine.get_context("nonexistentterm", &scope(), 5000).await;
    // No lexical match; the semantic branch still returns chunks.
    assert!(none.unwrap().starts_with("[From: Handbook]"));

    let tiny = h.engine.get_context("zephyr", &scope(), 10).await.unwrap();
    assert_eq!(tiny, "");

    let one = h.engine.get_context("zephyr", &scope(), 800).await.unwrap();
    assert!(one.starts_with("[From: Handbook]\ncharlie"));
    assert!(!one.contains("\n---\n"));

    let all = h.engine.get_context("zephyr", &scope(), 5000).await.unwrap();
    assert_eq!(all.matches("\n---\n").count(), 2);
}

#[tokio::test]
async fn test_migrate_to_contextual() {
    let store = Arc::new(InMemoryStore::new());
    let embedder = Arc::new(KeywordEmbedder::ranked());
    let plain = harness_with(store.clone(), embedder.clone(), ContextualEnricher::disabled(), None);
    let id = ingest_text(&plain.engine, &three_chunk_text(), "Handbook").await;

    let generator = Arc::new(FixedGenerator::new());
    let enriched = harness_with(
        store.clone(),
        embedder,
        ContextualEnricher::new(streaming(true), Some(generator.clone())),
        None,
    );
    let report = enriched.engine.migrate_to_contextual(&id, OWNER).await.unwrap();
    assert_eq!(report.total_chunks, 3);
    assert_eq!(report.already_contextualized, 0);
    assert_eq!(report.newly_contextualized, 3);
    assert_eq!(report.failed, 0);

    let chunks = store.get_document_chunks(&id).await.unwrap();
    assert!(chunks.iter().all(|c| c.is_contextualized));
    let hits = enriched
        .engine
        .search("acmecorp", &scope(), 5, Some(0.99))
        .await
        .unwrap();
    assert_eq!(hits.len(), 3);

    let again = enriched.engine.migrate_to_contextual(&id, OWNER).await.unwrap();
    assert_eq!(again.already_contextualized, 3);
    assert_eq!(again.newly_contextualized, 0);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 3);

    let err = enriched
        .engine
        .migrate_to_contextual(&id, "someone-else")
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EngineError>(),
        Some(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_reranker_reorders_fused_results() {
    let pool = BlockingPool::new(1);
    let h = harness_with(
        Arc::new(InMemoryStore::new()),
        Arc::new(KeywordEmbedder::ranked()),
        ContextualEnricher::disabled(),
        Some(Reranker::with_encoder(Arc::new(ReversingEncoder), pool)),
    );
    ingest_text(&h.engine, &three_chunk_text(), "Handbook").await;

    let results = h.engine.search("zephyr", &scope(), 2, None).await.unwrap();
    assert_eq!(results.len(), 2);
    // Fused order is charlie, alpha, bravo; the encoder reverses it.
    assert!(results[0].content.starts_with("bravo"));
    assert!(results[1].content.starts_with("alpha"));
}

#[tokio::test]
async fn test_unloaded_reranker_keeps_fused_order() {
    let config = hybrid_context::config::RerankConfig {
        enabled: true,
        ..Default::default()
    };
    let pool = BlockingPool::new(1);
    let h = harness_with(
        Arc::new(InMemoryStore::new()),
        Arc::new(KeywordEmbedder::ranked()),
        ContextualEnricher::disabled(),
        Some(Reranker::new(&config, pool)),
    );
    ingest_text(&h.engine, &three_chunk_text(), "Handbook").await;

    let results = h.engine.search("zephyr", &scope(), 2, None).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].content.starts_with("charlie"));
    assert!(results[1].content.starts_with("alpha"));
}

#[tokio::test]
async fn test_list_documents_newest_first_and_owner_scoped() {
    let h = harness();
    let first = ingest_text(&h.engine, "alpha first", "First").await;
    h.engine
        .ingest(b"alpha other owner", "text", "owner-2", "Theirs")
        .await
        .unwrap();

    let docs = h.engine.list_documents(OWNER).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, first);
    assert!(h.engine.get_document(&first, "owner-2").await.unwrap().is_none());

    let theirs = h
        .engine
        .search("other", &SearchScope::owner("owner-2"), 5, Some(0.99))
        .await
        .unwrap();
    assert_eq!(theirs.len(), 1);
    let mine = h.engine.search("other", &scope(), 5, Some(0.99)).await.unwrap();
    assert!(mine.is_empty());
}

#[tokio::test]
async fn test_slow_index_rebuild_does_not_hide_newer_document() {
    let store = Arc::new(StallingStore::default());
    let engine = engine_over(store.clone());
    store.hold_next_scan.store(true, Ordering::SeqCst);

    let first = engine.ingest(b"bravo notes about quokka habitats", "text", OWNER, "First");
    let second = async {
        store.scan_held.notified().await;
        let id = engine
            .ingest(b"bravo notes about wombat burrows", "text", OWNER, "Second")
            .await;
        store.release_scan.notify_one();
        id
    };
    let (first, second) = tokio::join!(first, second);
    first.unwrap();
    let second = second.unwrap();

    let hits = engine.search("wombat", &scope(), 5, Some(0.99)).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document_id, second);
    let older = engine.search("quokka", &scope(), 5, Some(0.99)).await.unwrap();
    assert_eq!(older.len(), 1);
}

#[tokio::test]
async fn test_rebuild_failure_after_commit_keeps_document() {
    let store = Arc::new(StallingStore::default());
    let engine = engine_over(store.clone());
    store.fail_scans.store(true, Ordering::SeqCst);

    let id = engine
        .ingest(b"alpha guide to zephyr winds", "text", OWNER, "Winds")
        .await
        .unwrap();
    assert!(engine.get_document(&id, OWNER).await.unwrap().is_some());
    assert!(!engine.has_lexical_index(OWNER));

    // The next query rebuilds the index once the store recovers.
    store.fail_scans.store(false, Ordering::SeqCst);
    let hits = engine.search("zephyr", &scope(), 5, Some(0.99)).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].document_id, id);
    assert!(engine.has_lexical_index(OWNER));
}

#[tokio::test]
async fn test_unbounded_max_results_returns_everything() {
    let h = harness();
    ingest_text(&h.engine, &three_chunk_text(), "Handbook").await;

    let results = h
        .engine
        .search("zephyr", &scope(), usize::MAX, None)
        .await
        .unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[0].content.starts_with("charlie"));
}

#[tokio::test]
async fn test_migrate_sends_document_text_without_repeats() {
    let text = (0..400).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ");
    let store = Arc::new(InMemoryStore::new());
    let embedder = Arc::new(KeywordEmbedder::ranked());
    let plain = harness_with(store.clone(), embedder.clone(), ContextualEnricher::disabled(), None);
    let id = ingest_text(&plain.engine, &text, "Words").await;
    let chunks = store.get_document_chunks(&id).await.unwrap();
    assert!(chunks.len() > 2);

    let generator = Arc::new(RecordingGenerator::default());
    let enriched = harness_with(
        store.clone(),
        embedder,
        ContextualEnricher::new(streaming(true), Some(generator.clone())),
        None,
    );
    enriched.engine.migrate_to_contextual(&id, OWNER).await.unwrap();

    let documents = generator.documents.lock().unwrap();
    assert_eq!(documents.len(), chunks.len());
    assert!(documents.iter().all(|d| *d == text));
}
