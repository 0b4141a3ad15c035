//! Storage abstraction for Hybrid Context.
//!
//! The [`Store`] trait defines every persistence operation the engine
//! needs, enabling pluggable backends (SQLite in the app crate, in-memory
//! here for tests).
//!
//! Every read that returns chunks is scoped by owner, directly or through a
//! document the caller already resolved for that owner. A backend must never
//! return another owner's rows.

pub mod memory;

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, Document, DocumentMetadata, EmbeddedChunk};

/// A chunk matched by vector similarity.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk: Chunk,
    /// Cosine similarity between the query and the stored embedding.
    pub similarity: f64,
}

/// Abstract storage backend.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert_document`](Store::insert_document) | Create a document row |
/// | [`insert_chunks`](Store::insert_chunks) | Store a document's chunks with vectors, atomically |
/// | [`update_chunk`](Store::update_chunk) | Rewrite a chunk's enrichment and vector in place |
/// | [`update_document_metadata`](Store::update_document_metadata) | Replace document metadata |
/// | [`get_document`](Store::get_document) | Owner-scoped document lookup |
/// | [`list_documents`](Store::list_documents) | An owner's documents, newest first |
/// | [`get_document_chunks`](Store::get_document_chunks) | A document's chunks in index order |
/// | [`get_document_metadata`](Store::get_document_metadata) | Lightweight fields for result assembly |
/// | [`delete_document`](Store::delete_document) | Remove a document, its chunks and links |
/// | [`owner_chunks`](Store::owner_chunks) | Every chunk an owner has (lexical index input) |
/// | [`vector_search`](Store::vector_search) | Owner-scoped nearest-neighbour query |
/// | [`agent_document_ids`](Store::agent_document_ids) | Documents linked to an agent |
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_document(&self, doc: &Document) -> Result<()>;

    /// Insert all chunks of one document. Either every chunk becomes
    /// visible or none does.
    async fn insert_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<()>;

    /// Overwrite `contextual_content`, `is_contextualized`, metadata and
    /// embedding of an existing chunk, matched by id.
    async fn update_chunk(&self, chunk: &Chunk, embedding: &[f32]) -> Result<()>;

    async fn update_document_metadata(
        &self,
        document_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<()>;

    /// `None` when the document does not exist or belongs to someone else.
    async fn get_document(&self, document_id: &str, owner_id: &str) -> Result<Option<Document>>;

    async fn list_documents(&self, owner_id: &str) -> Result<Vec<Document>>;

    async fn get_document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>>;

    async fn get_document_metadata(&self, document_id: &str) -> Result<Option<DocumentMetadata>>;

    /// Returns `false` when nothing matched `(document_id, owner_id)`.
    async fn delete_document(&self, document_id: &str, owner_id: &str) -> Result<bool>;

    async fn owner_chunks(&self, owner_id: &str) -> Result<Vec<Chunk>>;

    /// Chunks of `owner_id` with similarity ≥ `threshold`, best first.
    ///
    /// When `documents` is set, only chunks of those documents qualify.
    async fn vector_search(
        &self,
        owner_id: &str,
        query_vec: &[f32],
        threshold: f64,
        limit: usize,
        documents: Option<&HashSet<String>>,
    ) -> Result<Vec<VectorHit>>;

    async fn agent_document_ids(&self, agent_id: &str) -> Result<HashSet<String>>;

    async fn link_agent_document(&self, agent_id: &str, document_id: &str) -> Result<()>;

    /// Returns `false` when the link did not exist.
    async fn unlink_agent_document(&self, agent_id: &str, document_id: &str) -> Result<bool>;
}

/// Order vector hits best first, ties by `(document_id, chunk_index)`.
pub fn sort_vector_hits(hits: &mut [VectorHit]) {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
            .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
    });
}
