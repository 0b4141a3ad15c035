//! SQLite-backed [`Store`] implementation.
//!
//! Vectors live in the `chunks.embedding` BLOB column (little-endian `f32`).
//! Vector search loads the owner's embeddings and ranks them by cosine
//! similarity in Rust, so no SQLite extension is needed.

use std::collections::HashSet;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use hybrid_context_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use hybrid_context_core::models::{
    Chunk, ChunkMetadata, Document, DocumentMetadata, DocumentType, EmbeddedChunk,
};
use hybrid_context_core::store::{sort_vector_hits, Store, VectorHit};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

const CHUNK_COLUMNS: &str = "c.id, c.document_id, c.chunk_index, c.content, c.contextual_content, \
                             c.is_contextualized, c.hash, c.metadata_json";

fn parse_doc_type(raw: &str) -> Result<DocumentType> {
    raw.parse::<DocumentType>()
        .map_err(|e| anyhow!("corrupt documents.doc_type: {}", e))
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let metadata_json: String = row.get("metadata_json");
    let doc_type: String = row.get("doc_type");
    Ok(Document {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        title: row.get("title"),
        doc_type: parse_doc_type(&doc_type)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
        created_at: row.get("created_at"),
    })
}

fn row_to_chunk(row: &SqliteRow) -> Chunk {
    let metadata_json: String = row.get("metadata_json");
    let is_contextualized: i64 = row.get("is_contextualized");
    Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        content: row.get("content"),
        contextual_content: row.get("contextual_content"),
        is_contextualized: is_contextualized != 0,
        hash: row.get("hash"),
        metadata: serde_json::from_str::<ChunkMetadata>(&metadata_json).unwrap_or_default(),
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, owner_id, title, doc_type, metadata_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.owner_id)
        .bind(&doc.title)
        .bind(doc.doc_type.as_str())
        .bind(doc.metadata.to_string())
        .bind(doc.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert document {}", doc.id))?;
        Ok(())
    }

    async fn insert_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for ec in chunks {
            let chunk = &ec.chunk;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, content, contextual_content,
                                    is_contextualized, embedding, hash, metadata_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(&chunk.contextual_content)
            .bind(chunk.is_contextualized as i64)
            .bind(vec_to_blob(&ec.embedding))
            .bind(&chunk.hash)
            .bind(serde_json::to_string(&chunk.metadata)?)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert chunk {}", chunk.chunk_index))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_chunk(&self, chunk: &Chunk, embedding: &[f32]) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE chunks
            SET contextual_content = ?, is_contextualized = ?, metadata_json = ?, embedding = ?
            WHERE id = ?
            "#,
        )
        .bind(&chunk.contextual_content)
        .bind(chunk.is_contextualized as i64)
        .bind(serde_json::to_string(&chunk.metadata)?)
        .bind(vec_to_blob(embedding))
        .bind(&chunk.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            anyhow::bail!("chunk {} not found", chunk.id);
        }
        Ok(())
    }

    async fn update_document_metadata(
        &self,
        document_id: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query("UPDATE documents SET metadata_json = ? WHERE id = ?")
            .bind(metadata.to_string())
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_document(&self, document_id: &str, owner_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT id, owner_id, title, doc_type, metadata_json, created_at \
             FROM documents WHERE id = ? AND owner_id = ?",
        )
        .bind(document_id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_document).transpose()
    }

    async fn list_documents(&self, owner_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            "SELECT id, owner_id, title, doc_type, metadata_json, created_at \
             FROM documents WHERE owner_id = ? ORDER BY created_at DESC, id ASC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_document).collect()
    }

    async fn get_document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks c WHERE c.document_id = ? ORDER BY c.chunk_index ASC",
            CHUNK_COLUMNS
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn get_document_metadata(&self, document_id: &str) -> Result<Option<DocumentMetadata>> {
        let row = sqlx::query("SELECT id, owner_id, title, doc_type FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let doc_type: String = r.get("doc_type");
                Ok(Some(DocumentMetadata {
                    id: r.get("id"),
                    owner_id: r.get("owner_id"),
                    title: r.get("title"),
                    doc_type: parse_doc_type(&doc_type)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn delete_document(&self, document_id: &str, owner_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let owned: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM documents WHERE id = ? AND owner_id = ?",
        )
        .bind(document_id)
        .bind(owner_id)
        .fetch_one(&mut *tx)
        .await?;

        if !owned {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM agent_documents WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn owner_chunks(&self, owner_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks c JOIN documents d ON d.id = c.document_id \
             WHERE d.owner_id = ? ORDER BY c.document_id ASC, c.chunk_index ASC",
            CHUNK_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn vector_search(
        &self,
        owner_id: &str,
        query_vec: &[f32],
        threshold: f64,
        limit: usize,
        documents: Option<&HashSet<String>>,
    ) -> Result<Vec<VectorHit>> {
        let rows = sqlx::query(&format!(
            "SELECT {}, c.embedding FROM chunks c JOIN documents d ON d.id = c.document_id \
             WHERE d.owner_id = ?",
            CHUNK_COLUMNS
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        let mut hits: Vec<VectorHit> = rows
            .iter()
            .filter_map(|row| {
                let document_id: String = row.get("document_id");
                if documents.is_some_and(|set| !set.contains(&document_id)) {
                    return None;
                }
                let blob: Vec<u8> = row.get("embedding");
                let similarity = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
                (similarity >= threshold).then(|| VectorHit {
                    chunk: row_to_chunk(row),
                    similarity,
                })
            })
            .collect();

        sort_vector_hits(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }

    async fn agent_document_ids(&self, agent_id: &str) -> Result<HashSet<String>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT document_id FROM agent_documents WHERE agent_id = ?")
                .bind(agent_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().collect())
    }

    async fn link_agent_document(&self, agent_id: &str, document_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_documents (agent_id, document_id, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT(agent_id, document_id) DO NOTHING
            "#,
        )
        .bind(agent_id)
        .bind(document_id)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unlink_agent_document(&self, agent_id: &str, document_id: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM agent_documents WHERE agent_id = ? AND document_id = ?")
                .bind(agent_id)
                .bind(document_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
