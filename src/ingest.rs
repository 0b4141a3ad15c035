//! Document ingestion and contextual migration.
//!
//! # Ingestion Pipeline
//!
//! ```text
//! bytes ──▶ extract ──▶ choose strategy ──▶ chunk ──▶ enrich ──▶ embed ──▶ store ──▶ BM25 rebuild
//! ```
//!
//! Enrichment never fails an ingestion: a failed batch job is logged and
//! recorded under `contextual.error` in the document metadata, and every
//! chunk is stored non-contextualized. Embedding failures do fail it; the
//! document row is removed again and no chunk becomes searchable. Once the
//! chunks are committed the document stays, even if the BM25 rebuild fails.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use hybrid_context_core::chunk::{chunk_document, reassemble_text};
use hybrid_context_core::error::EngineError;
use hybrid_context_core::models::{Chunk, Document, DocumentType, EmbeddedChunk, EnrichedChunk};
use hybrid_context_core::strategy::{choose_strategy, ChunkingStrategy};

use crate::config::Config;
use crate::engine::DocumentEngine;
use crate::extract;

/// Outcome of [`DocumentEngine::migrate_to_contextual`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub total_chunks: usize,
    pub already_contextualized: usize,
    pub newly_contextualized: usize,
    /// Chunks that were attempted but are still not contextualized.
    pub failed: usize,
}

fn apply_enrichment(chunk: &mut Chunk, enriched: EnrichedChunk) {
    chunk.metadata.contextual_length = enriched
        .contextual_content
        .as_ref()
        .map(|c| c.chars().count());
    chunk.contextual_content = enriched.contextual_content;
    chunk.is_contextualized = enriched.is_contextualized;
}

impl DocumentEngine {
    /// Ingest one file for `owner_id` and return the new document id.
    ///
    /// `file_type` must be `pdf` or `text`; anything else is rejected before
    /// any processing.
    pub async fn ingest(
        &self,
        file_content: &[u8],
        file_type: &str,
        owner_id: &str,
        title: &str,
    ) -> Result<String> {
        let doc_type: DocumentType = file_type.parse()?;

        let bytes = file_content.to_vec();
        let pages = self
            .pool
            .run(move || extract::extract_pages(&bytes, doc_type))
            .await??;
        let full_text = extract::full_text(&pages);

        let strategy = if self.settings.adaptive_chunking {
            choose_strategy(&full_text, doc_type, title)
        } else {
            ChunkingStrategy::base()
        };

        let document_id = Uuid::new_v4().to_string();
        let mut chunks = chunk_document(&document_id, &pages, &strategy);
        if chunks.is_empty() {
            return Err(EngineError::EmptyDocument.into());
        }
        info!(
            %document_id,
            strategy = ?strategy.name,
            chunk_size = strategy.chunk_size,
            chunks = chunks.len(),
            "document chunked"
        );

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let mut contextual = json!({
            "enabled": self.enricher.is_enabled(),
            "mode": self.enricher.mode().as_str(),
        });
        match self
            .enricher
            .process_document_chunks(owner_id, &texts, &full_text)
            .await
        {
            Ok(outcome) => {
                contextual["contextualized_chunks"] = json!(outcome.contextualized_count());
                if let Some(reason) = &outcome.skipped_reason {
                    contextual["skipped_reason"] = json!(reason);
                }
                for (chunk, enriched) in chunks.iter_mut().zip(outcome.chunks) {
                    apply_enrichment(chunk, enriched);
                }
            }
            Err(e) => {
                error!(%document_id, error = %e, "contextual enrichment failed, storing chunks without context");
                contextual["contextualized_chunks"] = json!(0);
                contextual["error"] = json!(e.to_string());
            }
        }

        let document = Document {
            id: document_id.clone(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            doc_type,
            metadata: json!({
                "chunk_count": chunks.len(),
                "char_count": full_text.chars().count(),
                "page_count": pages.len(),
                "chunking_strategy": strategy,
                "embedding_model": self.embedder.model_name(),
                "contextual": contextual,
            }),
            created_at: chrono::Utc::now().timestamp(),
        };
        self.store.insert_document(&document).await?;

        let stored = match self.embed_chunks(&chunks).await {
            Ok(vectors) => {
                let embedded: Vec<EmbeddedChunk> = chunks
                    .into_iter()
                    .zip(vectors)
                    .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
                    .collect();
                self.store.insert_chunks(&embedded).await.map(|_| embedded.len())
            }
            Err(e) => Err(e),
        };

        let chunk_count = match stored {
            Ok(n) => n,
            Err(e) => {
                warn!(%document_id, error = %e, "ingestion failed, removing document");
                if let Err(cleanup) = self.store.delete_document(&document_id, owner_id).await {
                    error!(%document_id, error = %cleanup, "failed to remove partially ingested document");
                }
                return Err(e);
            }
        };

        self.refresh_lexical_index(owner_id).await;
        info!(%document_id, owner_id, chunks = chunk_count, "document ingested");
        Ok(document_id)
    }

    /// Enrich and re-embed the chunks of an existing document that have no
    /// context yet. Batch failures are returned to the caller.
    pub async fn migrate_to_contextual(
        &self,
        document_id: &str,
        owner_id: &str,
    ) -> Result<MigrationReport> {
        let document = self
            .store
            .get_document(document_id, owner_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(document_id.to_string()))?;

        let chunks = self.store.get_document_chunks(document_id).await?;
        let mut report = MigrationReport {
            total_chunks: chunks.len(),
            already_contextualized: chunks.iter().filter(|c| c.is_contextualized).count(),
            ..MigrationReport::default()
        };

        let pending: Vec<Chunk> = chunks
            .iter()
            .filter(|c| !c.is_contextualized)
            .cloned()
            .collect();
        if pending.is_empty() {
            info!(document_id, "every chunk already contextualized");
            return Ok(report);
        }

        let max_overlap = document.metadata["chunking_strategy"]["chunk_overlap"]
            .as_u64()
            .map_or(usize::MAX, |n| n as usize);
        let full_text = reassemble_text(&chunks, max_overlap);
        let texts: Vec<String> = pending.iter().map(|c| c.content.clone()).collect();
        let outcome = self
            .enricher
            .process_document_chunks(owner_id, &texts, &full_text)
            .await?;

        let mut updated: Vec<Chunk> = Vec::new();
        for (mut chunk, enriched) in pending.into_iter().zip(outcome.chunks) {
            if enriched.is_contextualized {
                apply_enrichment(&mut chunk, enriched);
                updated.push(chunk);
            }
        }
        report.newly_contextualized = updated.len();
        report.failed = texts.len() - updated.len();

        let vectors = self.embed_chunks(&updated).await?;
        for (chunk, embedding) in updated.iter().zip(&vectors) {
            self.store.update_chunk(chunk, embedding).await?;
        }

        let mut metadata = document.metadata.clone();
        if !metadata.is_object() {
            metadata = json!({});
        }
        metadata["contextual"] = json!({
            "enabled": true,
            "mode": self.enricher.mode().as_str(),
            "contextualized_chunks": report.already_contextualized + report.newly_contextualized,
            "migrated_at": chrono::Utc::now().to_rfc3339(),
        });
        self.store
            .update_document_metadata(document_id, &metadata)
            .await?;

        self.refresh_lexical_index(owner_id).await;
        info!(
            document_id,
            newly = report.newly_contextualized,
            failed = report.failed,
            "contextual migration finished"
        );
        Ok(report)
    }

    /// Embed each chunk's indexed text, `embed_batch_size` at a time.
    pub(crate) async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>> {
        let batch_size = self.settings.embed_batch_size.max(1);
        let mut vectors = Vec::with_capacity(chunks.len());

        for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
            let first = batch_no * batch_size;
            let texts: Vec<String> = batch.iter().map(Chunk::indexed_text).collect();
            let embedded = self
                .embedder
                .embed(&texts)
                .await
                .map_err(|e| EngineError::Embedding {
                    chunk_index: first,
                    message: e.to_string(),
                })?;
            if embedded.len() != batch.len() {
                return Err(EngineError::Embedding {
                    chunk_index: first,
                    message: format!(
                        "expected {} vectors, provider returned {}",
                        batch.len(),
                        embedded.len()
                    ),
                }
                .into());
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }
}

/// Infer `pdf`/`text` from a file extension.
fn file_type_from_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some("pdf"),
        "txt" | "text" | "md" => Some("text"),
        _ => None,
    }
}

/// `hctx ingest`: read a file from disk and ingest it.
pub async fn run_ingest(
    config: &Config,
    path: &Path,
    owner: &str,
    title: Option<String>,
    file_type: Option<String>,
) -> Result<()> {
    let file_type = match file_type {
        Some(t) => t,
        None => file_type_from_path(path)
            .map(str::to_string)
            .ok_or_else(|| {
                EngineError::UnsupportedFileType(
                    path.extension()
                        .and_then(|e| e.to_str())
                        .unwrap_or("")
                        .to_string(),
                )
            })?,
    };
    // Reject before touching the database.
    file_type.parse::<DocumentType>()?;

    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let title = title.unwrap_or_else(|| {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("untitled")
            .to_string()
    });

    let engine = DocumentEngine::from_config(config).await?;
    let document_id = engine.ingest(&bytes, &file_type, owner, &title).await?;
    println!("{}", document_id);

    let stats = engine.enrichment_stats();
    if stats.total_requests > 0 {
        println!(
            "contextual: {} ok, {} rejected, {} failed, cache hit rate {:.0}%",
            stats.successful,
            stats.rejected,
            stats.failed,
            stats.cache_hit_rate() * 100.0
        );
    }
    Ok(())
}

/// `hctx migrate`: contextualize an existing document.
pub async fn run_migrate(config: &Config, document_id: &str, owner: &str) -> Result<()> {
    let engine = DocumentEngine::from_config(config).await?;
    let report = engine.migrate_to_contextual(document_id, owner).await?;
    println!(
        "{} chunks: {} already contextualized, {} newly contextualized, {} failed",
        report.total_chunks,
        report.already_contextualized,
        report.newly_contextualized,
        report.failed
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_from_path() {
        assert_eq!(file_type_from_path(Path::new("a/report.PDF")), Some("pdf"));
        assert_eq!(file_type_from_path(Path::new("notes.txt")), Some("text"));
        assert_eq!(file_type_from_path(Path::new("readme.md")), Some("text"));
        assert_eq!(file_type_from_path(Path::new("sheet.xlsx")), None);
        assert_eq!(file_type_from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_apply_enrichment_records_length() {
        let mut chunk = Chunk {
            id: "c".to_string(),
            document_id: "d".to_string(),
            chunk_index: 0,
            content: "body".to_string(),
            contextual_content: None,
            is_contextualized: false,
            hash: String::new(),
            metadata: Default::default(),
        };
        apply_enrichment(&mut chunk, EnrichedChunk::contextualized("body", "héllo"));
        assert!(chunk.is_contextualized);
        assert_eq!(chunk.metadata.contextual_length, Some(5));
        assert_eq!(chunk.indexed_text(), "héllo\n\nbody");
    }
}
