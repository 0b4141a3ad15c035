//! Core data models used throughout Hybrid Context.
//!
//! These types represent the documents, chunks, and search results that flow
//! through the ingestion and retrieval pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Declared type of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Pdf,
    Text,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Pdf => "pdf",
            DocumentType::Text => "text",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(DocumentType::Pdf),
            "text" | "txt" => Ok(DocumentType::Text),
            other => Err(EngineError::UnsupportedFileType(other.to_string())),
        }
    }
}

/// A stored document. Owns its chunks; deleting it deletes them.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub doc_type: DocumentType,
    /// Chunk count, chunking strategy, and enrichment statistics.
    pub metadata: serde_json::Value,
    pub created_at: i64,
}

/// Per-chunk metadata persisted next to the chunk text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Source page (PDF only, 1-based).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub char_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contextual_length: Option<usize>,
}

/// A section of a document's text.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    /// Original chunk text.
    pub content: String,
    /// Generated situating description, if enrichment succeeded.
    pub contextual_content: Option<String>,
    pub is_contextualized: bool,
    /// SHA-256 of `content`.
    pub hash: String,
    pub metadata: ChunkMetadata,
}

impl Chunk {
    /// Text used for both embedding and lexical indexing.
    ///
    /// Contextualized chunks are prefixed with their description; all
    /// others use the original content alone.
    pub fn indexed_text(&self) -> String {
        match (&self.contextual_content, self.is_contextualized) {
            (Some(ctx), true) => format!("{}\n\n{}", ctx, self.content),
            _ => self.content.clone(),
        }
    }
}

/// A chunk handed to storage together with its embedding.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// Lightweight document fields needed to assemble search results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentMetadata {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub doc_type: DocumentType,
}

/// Output of the contextual enricher for one chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedChunk {
    pub content: String,
    pub contextual_content: Option<String>,
    pub is_contextualized: bool,
}

impl EnrichedChunk {
    pub fn plain(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            contextual_content: None,
            is_contextualized: false,
        }
    }

    pub fn contextualized(content: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            contextual_content: Some(context.into()),
            is_contextualized: true,
        }
    }
}

/// Who is asking: the owner whose documents are searched, and optionally
/// the agent whose linked documents restrict the search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchScope {
    pub owner_id: String,
    pub agent_id: Option<String>,
}

impl SearchScope {
    pub fn owner(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            agent_id: None,
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

/// A ranked chunk returned by search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub document_id: String,
    /// Original chunk text (never the enriched text).
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contextual_content: Option<String>,
    pub score: f64,
    pub document_title: String,
    pub document_type: String,
    pub metadata: serde_json::Value,
}
