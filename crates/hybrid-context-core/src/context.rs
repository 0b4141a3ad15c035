//! Prompt text and validation for generated chunk contexts.
//!
//! The generation call itself lives in the application crate; this module
//! holds the pure parts: what is asked and whether the answer is usable.

use std::collections::HashSet;

use crate::bm25::tokenize;

/// Rough characters-per-token ratio used to size documents.
pub const CHARS_PER_TOKEN: usize = 4;

pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 500;
pub const DEFAULT_OVERLAP_THRESHOLD: f64 = 0.8;

pub const SYSTEM_PROMPT: &str = "You are an AI assistant that helps create contextual information \
for document chunks to improve search retrieval.";

const CHUNK_INSTRUCTION: &str = "Please give a short succinct context to situate this chunk within \
the overall document for the purposes of improving search retrieval of the chunk. Answer only with \
the succinct context and nothing else.";

/// The cacheable system block carrying the whole document.
pub fn document_block(document: &str) -> String {
    format!("<document>\n{}\n</document>", document)
}

/// The per-chunk user message.
pub fn chunk_message(chunk: &str) -> String {
    format!(
        "Here is the chunk we want to situate within the whole document:\n\n<chunk>\n{}\n</chunk>\n\n{}",
        chunk, CHUNK_INSTRUCTION
    )
}

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

/// Why a generated context was refused.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    Empty,
    TooLong { chars: usize, max: usize },
    EchoesChunk { overlap: f64 },
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Empty => write!(f, "empty context"),
            Rejection::TooLong { chars, max } => {
                write!(f, "context too long ({} chars > {})", chars, max)
            }
            Rejection::EchoesChunk { overlap } => {
                write!(f, "context repeats the chunk ({:.0}% token overlap)", overlap * 100.0)
            }
        }
    }
}

/// Limits applied to every generated context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContextRules {
    pub max_chars: usize,
    pub overlap_threshold: f64,
}

impl Default for ContextRules {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_CONTEXT_CHARS,
            overlap_threshold: DEFAULT_OVERLAP_THRESHOLD,
        }
    }
}

impl ContextRules {
    /// Return the trimmed context if it passes, otherwise the reason.
    pub fn validate(&self, context: &str, chunk: &str) -> Result<String, Rejection> {
        let trimmed = context.trim();
        if trimmed.is_empty() {
            return Err(Rejection::Empty);
        }
        let chars = trimmed.chars().count();
        if chars > self.max_chars {
            return Err(Rejection::TooLong {
                chars,
                max: self.max_chars,
            });
        }
        let overlap = token_overlap(trimmed, chunk);
        if overlap > self.overlap_threshold {
            return Err(Rejection::EchoesChunk { overlap });
        }
        Ok(trimmed.to_string())
    }
}

/// Share of the context's distinct tokens that also occur in the chunk.
pub fn token_overlap(context: &str, chunk: &str) -> f64 {
    let context_tokens: HashSet<String> = tokenize(context).into_iter().collect();
    if context_tokens.is_empty() {
        return 0.0;
    }
    let chunk_tokens: HashSet<String> = tokenize(chunk).into_iter().collect();
    let shared = context_tokens.intersection(&chunk_tokens).count();
    shared as f64 / context_tokens.len() as f64
}
