//! Document reads, deletion and agent links.

use std::collections::HashSet;

use anyhow::Result;
use serde::Serialize;
use tracing::info;

use hybrid_context_core::error::EngineError;
use hybrid_context_core::models::{Chunk, Document};

use crate::config::Config;
use crate::engine::DocumentEngine;

/// A document with its chunks in index order.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentWithChunks {
    #[serde(flatten)]
    pub document: Document,
    pub chunks: Vec<Chunk>,
}

impl DocumentEngine {
    pub async fn get_document(
        &self,
        document_id: &str,
        owner_id: &str,
    ) -> Result<Option<DocumentWithChunks>> {
        let Some(document) = self.store.get_document(document_id, owner_id).await? else {
            return Ok(None);
        };
        let chunks = self.store.get_document_chunks(document_id).await?;
        Ok(Some(DocumentWithChunks { document, chunks }))
    }

    /// The owner's documents, newest first.
    pub async fn list_documents(&self, owner_id: &str) -> Result<Vec<Document>> {
        self.store.list_documents(owner_id).await
    }

    /// Delete a document with its chunks and agent links.
    ///
    /// Drops the owner's lexical index so the next query rebuilds without
    /// the document. Returns `false` when nothing matched.
    pub async fn delete(&self, document_id: &str, owner_id: &str) -> Result<bool> {
        let deleted = self.store.delete_document(document_id, owner_id).await?;
        if deleted {
            self.lexical.invalidate(owner_id);
            self.metadata.remove(&document_id.to_string());
            info!(document_id, owner_id, "document deleted");
        }
        Ok(deleted)
    }

    /// Link an agent to one of the owner's documents. Idempotent.
    pub async fn link_agent_document(
        &self,
        agent_id: &str,
        document_id: &str,
        owner_id: &str,
    ) -> Result<()> {
        if self.store.get_document(document_id, owner_id).await?.is_none() {
            return Err(EngineError::NotFound(document_id.to_string()).into());
        }
        self.store.link_agent_document(agent_id, document_id).await
    }

    pub async fn unlink_agent_document(&self, agent_id: &str, document_id: &str) -> Result<bool> {
        self.store.unlink_agent_document(agent_id, document_id).await
    }

    pub async fn agent_documents(&self, agent_id: &str) -> Result<HashSet<String>> {
        self.store.agent_document_ids(agent_id).await
    }
}

fn format_created(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// `hctx get`.
pub async fn run_get(config: &Config, id: &str, owner: &str) -> Result<()> {
    let engine = DocumentEngine::from_config(config).await?;
    let doc = engine
        .get_document(id, owner)
        .await?
        .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

    println!("--- Document ---");
    println!("id: {}", doc.document.id);
    println!("title: {}", doc.document.title);
    println!("type: {}", doc.document.doc_type);
    println!("owner: {}", doc.document.owner_id);
    println!("created: {}", format_created(doc.document.created_at));
    println!("metadata: {}", doc.document.metadata);
    println!();
    println!("--- Chunks ({}) ---", doc.chunks.len());
    for chunk in &doc.chunks {
        let marker = if chunk.is_contextualized { "*" } else { " " };
        println!("[{}]{} {}", chunk.chunk_index, marker, chunk.content);
        if let Some(ctx) = &chunk.contextual_content {
            println!("     context: {}", ctx);
        }
    }
    Ok(())
}

/// `hctx list`.
pub async fn run_list(config: &Config, owner: &str) -> Result<()> {
    let engine = DocumentEngine::from_config(config).await?;
    let docs = engine.list_documents(owner).await?;
    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    for doc in docs {
        let chunks = doc
            .metadata
            .get("chunk_count")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        println!(
            "{}  {:<5} {:>5} chunks  {}  {}",
            doc.id,
            doc.doc_type.as_str(),
            chunks,
            format_created(doc.created_at),
            doc.title
        );
    }
    Ok(())
}

/// `hctx delete`.
pub async fn run_delete(config: &Config, id: &str, owner: &str) -> Result<()> {
    let engine = DocumentEngine::from_config(config).await?;
    if engine.delete(id, owner).await? {
        println!("Deleted {}", id);
        Ok(())
    } else {
        Err(EngineError::NotFound(id.to_string()).into())
    }
}

/// `hctx link`.
pub async fn run_link(config: &Config, agent: &str, document: &str, owner: &str) -> Result<()> {
    let engine = DocumentEngine::from_config(config).await?;
    engine.link_agent_document(agent, document, owner).await?;
    println!("Linked {} -> {}", agent, document);
    Ok(())
}

/// `hctx unlink`.
pub async fn run_unlink(config: &Config, agent: &str, document: &str) -> Result<()> {
    let engine = DocumentEngine::from_config(config).await?;
    if engine.unlink_agent_document(agent, document).await? {
        println!("Unlinked {} -> {}", agent, document);
    } else {
        println!("No link between {} and {}", agent, document);
    }
    Ok(())
}
