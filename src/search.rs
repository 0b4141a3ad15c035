//! Hybrid retrieval: semantic and BM25 branches, fused with RRF, optionally
//! reranked.
//!
//! The two branches run concurrently. A failing branch is logged and
//! contributes nothing; only when every branch fails is the result empty.
//! Agent scoping resolves the agent's linked documents first and restricts
//! both branches to them before ranking.

use std::collections::HashSet;

use anyhow::Result;
use serde_json::json;
use tracing::{debug, error, warn};

use hybrid_context_core::error::EngineError;
use hybrid_context_core::fusion::reciprocal_rank_fusion;
use hybrid_context_core::models::{Chunk, SearchResult, SearchScope};

use crate::config::Config;
use crate::engine::{DocumentEngine, RetrievalStrategy};

/// Results pulled into a prompt context.
pub const CONTEXT_RESULTS: usize = 5;

const CONTEXT_SEPARATOR: &str = "\n---\n";

impl DocumentEngine {
    /// Ranked chunks of `scope.owner_id` matching `query`, best first.
    ///
    /// `similarity_threshold` defaults to the configured one and applies to
    /// the semantic branch only.
    pub async fn search(
        &self,
        query: &str,
        scope: &SearchScope,
        max_results: usize,
        similarity_threshold: Option<f64>,
    ) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() {
            return Err(EngineError::InvalidQuery("query must not be empty".to_string()).into());
        }
        let threshold = similarity_threshold.unwrap_or(self.settings.similarity_threshold);
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(EngineError::InvalidQuery(format!(
                "similarity_threshold {} outside [-1, 1]",
                threshold
            ))
            .into());
        }
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let documents = match &scope.agent_id {
            Some(agent_id) => {
                let linked = self.store.agent_document_ids(agent_id).await?;
                if linked.is_empty() {
                    debug!(agent_id, "agent has no linked documents");
                    return Ok(Vec::new());
                }
                Some(linked)
            }
            None => None,
        };

        let target = if self.reranker.is_enabled() {
            max_results.max(self.settings.rerank_candidates)
        } else {
            max_results
        };
        let candidates = target.saturating_mul(self.settings.candidate_multiplier.max(1));
        let owner = scope.owner_id.as_str();

        let fused = match self.settings.retrieval {
            RetrievalStrategy::SemanticOnly => {
                match self
                    .semantic_candidates(query, owner, threshold, candidates, documents.as_ref())
                    .await
                {
                    Ok(mut results) => {
                        results.truncate(target);
                        results
                    }
                    Err(e) => {
                        error!(error = %e, "semantic search failed");
                        Vec::new()
                    }
                }
            }
            RetrievalStrategy::Hybrid { rrf_k } => {
                let (semantic, lexical) = tokio::join!(
                    self.semantic_candidates(query, owner, threshold, candidates, documents.as_ref()),
                    self.lexical_candidates(query, owner, candidates, documents.as_ref()),
                );
                let (semantic, lexical) = match (semantic, lexical) {
                    (Ok(s), Ok(l)) => (s, l),
                    (Ok(s), Err(e)) => {
                        warn!(error = %e, "lexical search failed, using semantic results only");
                        (s, Vec::new())
                    }
                    (Err(e), Ok(l)) => {
                        warn!(error = %e, "semantic search failed, using lexical results only");
                        (Vec::new(), l)
                    }
                    (Err(se), Err(le)) => {
                        error!(semantic = %se, lexical = %le, "both search branches failed");
                        return Ok(Vec::new());
                    }
                };
                debug!(
                    semantic = semantic.len(),
                    lexical = lexical.len(),
                    "fusing candidates"
                );
                reciprocal_rank_fusion(semantic, lexical, rrf_k, target)
            }
        };

        Ok(self.reranker.rerank(query, fused, max_results).await)
    }

    /// Top results formatted for inclusion in a prompt, within a character
    /// budget of `max_tokens`. Empty when nothing matches.
    pub async fn get_context(
        &self,
        query: &str,
        scope: &SearchScope,
        max_tokens: usize,
    ) -> Result<String> {
        let results = self.search(query, scope, CONTEXT_RESULTS, None).await?;
        Ok(format_context(&results, max_tokens))
    }

    async fn semantic_candidates(
        &self,
        query: &str,
        owner_id: &str,
        threshold: f64,
        limit: usize,
        documents: Option<&HashSet<String>>,
    ) -> Result<Vec<SearchResult>> {
        let query_vec = self.embedder.embed_query(query).await?;
        let hits = self
            .store
            .vector_search(owner_id, &query_vec, threshold, limit, documents)
            .await?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            if let Some(result) = self.assemble_result(&hit.chunk, hit.similarity).await? {
                results.push(result);
            }
        }
        Ok(results)
    }

    async fn lexical_candidates(
        &self,
        query: &str,
        owner_id: &str,
        limit: usize,
        documents: Option<&HashSet<String>>,
    ) -> Result<Vec<SearchResult>> {
        let index = self.lexical_index(owner_id).await?;
        let scorer = index.clone();
        let query_owned = query.to_string();
        let filter = documents.cloned();
        let hits = self
            .pool
            .run(move || scorer.search(&query_owned, limit, filter.as_ref()))
            .await?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(chunk) = index.chunk(&hit.chunk_id) else {
                continue;
            };
            if let Some(result) = self.assemble_result(chunk, hit.score).await? {
                results.push(result);
            }
        }
        Ok(results)
    }

    /// `None` when the chunk's document no longer exists.
    async fn assemble_result(&self, chunk: &Chunk, score: f64) -> Result<Option<SearchResult>> {
        let Some(meta) = self.document_metadata(&chunk.document_id).await? else {
            return Ok(None);
        };
        let mut metadata = serde_json::to_value(&chunk.metadata)?;
        metadata["chunk_index"] = json!(chunk.chunk_index);
        metadata["is_contextualized"] = json!(chunk.is_contextualized);

        Ok(Some(SearchResult {
            chunk_id: chunk.id.clone(),
            document_id: chunk.document_id.clone(),
            content: chunk.content.clone(),
            contextual_content: chunk.contextual_content.clone(),
            score,
            document_title: meta.title,
            document_type: meta.doc_type.as_str().to_string(),
            metadata,
        }))
    }
}

/// Join `[From: title]` labelled results until adding the next one would
/// exceed `max_chars`.
pub fn format_context(results: &[SearchResult], max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut used = 0usize;

    for result in results {
        let part = format!("[From: {}]\n{}\n", result.document_title, result.content);
        let len = part.chars().count();
        if used + len > max_chars {
            break;
        }
        used += len;
        parts.push(part);
    }
    parts.join(CONTEXT_SEPARATOR)
}

fn scope_for(owner: &str, agent: Option<String>) -> SearchScope {
    let scope = SearchScope::owner(owner);
    match agent {
        Some(agent) => scope.with_agent(agent),
        None => scope,
    }
}

/// `hctx search`.
pub async fn run_search(
    config: &Config,
    query: &str,
    owner: &str,
    agent: Option<String>,
    limit: Option<usize>,
    threshold: Option<f64>,
    as_json: bool,
) -> Result<()> {
    let engine = DocumentEngine::from_config(config).await?;
    engine.reranker_ready().await;

    let scope = scope_for(owner, agent);
    let limit = limit.unwrap_or(engine.settings().default_max_results);
    let results = engine.search(query, &scope, limit, threshold).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.4}] {} ({})",
            i + 1,
            result.score,
            result.document_title,
            result.document_type
        );
        if let Some(ctx) = &result.contextual_content {
            println!("    context: \"{}\"", ctx.replace('\n', " ").trim());
        }
        println!("    excerpt: \"{}\"", excerpt(&result.content, 240));
        println!("    chunk: {}", result.chunk_id);
        println!();
    }
    Ok(())
}

/// `hctx context`.
pub async fn run_context(
    config: &Config,
    query: &str,
    owner: &str,
    agent: Option<String>,
    max_tokens: usize,
) -> Result<()> {
    let engine = DocumentEngine::from_config(config).await?;
    engine.reranker_ready().await;

    let context = engine
        .get_context(query, &scope_for(owner, agent), max_tokens)
        .await?;
    if context.is_empty() {
        println!("No context.");
    } else {
        println!("{}", context);
    }
    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let trimmed = flat.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((byte, _)) => format!("{}…", &trimmed[..byte]),
        None => trimmed.to_string(),
    }
}
