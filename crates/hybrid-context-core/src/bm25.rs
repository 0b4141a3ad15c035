//! Okapi BM25 lexical index over one owner's chunks.
//!
//! The index is built in one pass from a chunk snapshot and is immutable
//! afterwards; a rebuild produces a fresh [`Bm25Index`] that replaces the
//! old one wholesale (see [`crate::cache::LexicalIndexCache`]).
//!
//! Scoring is delegated to the `bm25` crate. Tokenization is lower-casing
//! plus whitespace splitting with no stemming or stopword removal, so scores
//! are reproducible across runs. Contextualized chunks are indexed on their
//! enriched text ([`Chunk::indexed_text`]).

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

use bm25::{Document, SearchEngine, SearchEngineBuilder, Tokenizer};

use crate::models::Chunk;

/// Term-frequency saturation.
pub const K1: f32 = 1.5;
/// Length normalization.
pub const B: f32 = 0.75;

/// One lexical match.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub score: f64,
}

/// Lower-case and split on whitespace.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(|t| t.to_lowercase()).collect()
}

/// [`tokenize`] as a `bm25` tokenizer, used for both chunks and queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn tokenize(&self, input_text: &str) -> Vec<String> {
        tokenize(input_text)
    }
}

type ChunkSearchEngine = SearchEngine<String, u32, WhitespaceTokenizer>;

/// Immutable BM25 index, keyed by chunk id.
pub struct Bm25Index {
    engine: ChunkSearchEngine,
    chunks: HashMap<String, Chunk>,
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::build(&[])
    }
}

impl fmt::Debug for Bm25Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bm25Index")
            .field("chunks", &self.chunks.len())
            .finish_non_exhaustive()
    }
}

impl Bm25Index {
    pub fn build(chunks: &[Chunk]) -> Self {
        let documents: Vec<Document<String>> = chunks
            .iter()
            .map(|chunk| Document {
                id: chunk.id.clone(),
                contents: chunk.indexed_text(),
            })
            .collect();

        let engine: ChunkSearchEngine =
            SearchEngineBuilder::with_tokenizer_and_documents(WhitespaceTokenizer, documents)
                .k1(K1)
                .b(B)
                .build();

        Self {
            engine,
            chunks: chunks.iter().map(|c| (c.id.clone(), c.clone())).collect(),
        }
    }

    /// The chunk snapshot the index was built from.
    pub fn chunk(&self, chunk_id: &str) -> Option<&Chunk> {
        self.chunks.get(chunk_id)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Score every chunk against `query` and return the best `limit`.
    ///
    /// When `documents` is set, only chunks of those documents are ranked.
    /// Chunks with a non-positive score are never returned.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        documents: Option<&HashSet<String>>,
    ) -> Vec<LexicalHit> {
        if limit == 0 || self.chunks.is_empty() || tokenize(query).is_empty() {
            return Vec::new();
        }

        // The engine knows nothing about documents, so rank the whole
        // index and filter afterwards.
        let mut hits: Vec<LexicalHit> = self
            .engine
            .search(query, self.chunks.len())
            .into_iter()
            .filter(|result| result.score > 0.0)
            .filter_map(|result| {
                let chunk = self.chunks.get(&result.document.id)?;
                if documents.is_some_and(|set| !set.contains(&chunk.document_id)) {
                    return None;
                }
                Some(LexicalHit {
                    chunk_id: chunk.id.clone(),
                    document_id: chunk.document_id.clone(),
                    chunk_index: chunk.chunk_index,
                    score: f64::from(result.score),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.document_id.cmp(&b.document_id))
                .then_with(|| a.chunk_index.cmp(&b.chunk_index))
        });
        hits.truncate(limit);
        hits
    }
}
