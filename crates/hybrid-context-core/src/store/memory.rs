//! In-memory [`Store`] implementation for tests and embedding in other
//! processes.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity over the owner's stored vectors.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, Document, DocumentMetadata, EmbeddedChunk};

use super::{sort_vector_hits, Store, VectorHit};

#[derive(Default)]
struct Tables {
    docs: HashMap<String, Document>,
    chunks: Vec<EmbeddedChunk>,
    links: HashSet<(String, String)>,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    /// Number of stored chunks across all owners.
    pub fn chunk_count(&self) -> Result<usize> {
        Ok(self.read()?.chunks.len())
    }
}

fn owned_by<'a>(tables: &'a Tables, owner_id: &'a str) -> impl Fn(&EmbeddedChunk) -> bool + 'a {
    move |ec| {
        tables
            .docs
            .get(&ec.chunk.document_id)
            .is_some_and(|d| d.owner_id == owner_id)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        let mut t = self.write()?;
        if t.docs.contains_key(&doc.id) {
            bail!("document {} already exists", doc.id);
        }
        t.docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        let mut t = self.write()?;
        for ec in chunks {
            if !t.docs.contains_key(&ec.chunk.document_id) {
                bail!("chunk {} references unknown document", ec.chunk.id);
            }
            let duplicate = t.chunks.iter().any(|s| {
                s.chunk.document_id == ec.chunk.document_id
                    && s.chunk.chunk_index == ec.chunk.chunk_index
            });
            if duplicate {
                bail!(
                    "chunk index {} already stored for document {}",
                    ec.chunk.chunk_index,
                    ec.chunk.document_id
                );
            }
        }
        t.chunks.extend(chunks.iter().cloned());
        Ok(())
    }

    async fn update_chunk(&self, chunk: &Chunk, embedding: &[f32]) -> Result<()> {
        let mut t = self.write()?;
        let stored = t
            .chunks
            .iter_mut()
            .find(|s| s.chunk.id == chunk.id)
            .ok_or_else(|| anyhow!("chunk {} not found", chunk.id))?;
        stored.chunk.contextual_content = chunk.contextual_content.clone();
        stored.chunk.is_contextualized = chunk.is_contextualized;
        stored.chunk.metadata = chunk.metadata.clone();
        stored.embedding = embedding.to_vec();
        Ok(())
    }

    async fn update_document_metadata(
        &self,
        document_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let mut t = self.write()?;
        let doc = t
            .docs
            .get_mut(document_id)
            .ok_or_else(|| anyhow!("document {} not found", document_id))?;
        doc.metadata = metadata.clone();
        Ok(())
    }

    async fn get_document(&self, document_id: &str, owner_id: &str) -> Result<Option<Document>> {
        let t = self.read()?;
        Ok(t.docs
            .get(document_id)
            .filter(|d| d.owner_id == owner_id)
            .cloned())
    }

    async fn list_documents(&self, owner_id: &str) -> Result<Vec<Document>> {
        let t = self.read()?;
        let mut docs: Vec<Document> = t
            .docs
            .values()
            .filter(|d| d.owner_id == owner_id)
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn get_document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let t = self.read()?;
        let mut chunks: Vec<Chunk> = t
            .chunks
            .iter()
            .filter(|s| s.chunk.document_id == document_id)
            .map(|s| s.chunk.clone())
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn get_document_metadata(&self, document_id: &str) -> Result<Option<DocumentMetadata>> {
        let t = self.read()?;
        Ok(t.docs.get(document_id).map(|d| DocumentMetadata {
            id: d.id.clone(),
            owner_id: d.owner_id.clone(),
            title: d.title.clone(),
            doc_type: d.doc_type,
        }))
    }

    async fn delete_document(&self, document_id: &str, owner_id: &str) -> Result<bool> {
        let mut t = self.write()?;
        let owned = t
            .docs
            .get(document_id)
            .is_some_and(|d| d.owner_id == owner_id);
        if !owned {
            return Ok(false);
        }
        t.chunks.retain(|s| s.chunk.document_id != document_id);
        t.links.retain(|(_, doc)| doc != document_id);
        t.docs.remove(document_id);
        Ok(true)
    }

    async fn owner_chunks(&self, owner_id: &str) -> Result<Vec<Chunk>> {
        let t = self.read()?;
        let is_owned = owned_by(&t, owner_id);
        let mut chunks: Vec<Chunk> = t
            .chunks
            .iter()
            .filter(|s| is_owned(s))
            .map(|s| s.chunk.clone())
            .collect();
        chunks.sort_by(|a, b| {
            a.document_id
                .cmp(&b.document_id)
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        });
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
        let t = self.read()?;
        let is_owned = owned_by(&t, owner_id);
        let mut hits: Vec<VectorHit> = t
            .chunks
            .iter()
            .filter(|s| is_owned(s))
            .filter(|s| documents.map_or(true, |set| set.contains(&s.chunk.document_id)))
            .filter_map(|s| {
                let similarity = cosine_similarity(query_vec, &s.embedding) as f64;
                (similarity >= threshold).then(|| VectorHit {
                    chunk: s.chunk.clone(),
                    similarity,
                })
            })
            .collect();
        sort_vector_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn agent_document_ids(&self, agent_id: &str) -> Result<HashSet<String>> {
        let t = self.read()?;
        Ok(t.links
            .iter()
            .filter(|(agent, _)| agent == agent_id)
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    async fn link_agent_document(&self, agent_id: &str, document_id: &str) -> Result<()> {
        let mut t = self.write()?;
        if !t.docs.contains_key(document_id) {
            bail!("document {} not found", document_id);
        }
        t.links
            .insert((agent_id.to_string(), document_id.to_string()));
        Ok(())
    }

    async fn unlink_agent_document(&self, agent_id: &str, document_id: &str) -> Result<bool> {
        let mut t = self.write()?;
        Ok(t.links
            .remove(&(agent_id.to_string(), document_id.to_string())))
    }
}
