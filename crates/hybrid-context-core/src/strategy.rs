//! Adaptive chunking strategy selection.
//!
//! [`analyze_document`] measures a document's structure and vocabulary;
//! [`choose_strategy`] turns those measurements into a [`ChunkingStrategy`]
//! (chunk size, overlap, separator list) that the splitter in
//! [`crate::chunk`] then applies.
//!
//! # Decision order
//!
//! The first matching rule wins:
//!
//! | Rule | Signal | Size / overlap |
//! |------|--------|----------------|
//! | minimal | fewer than [`MIN_DOCUMENT_CHARS`] characters | `max(chars / 2, 400)` / 50 |
//! | technical | code fences, or technical density ≥ 3% | 600 / 150 |
//! | structured | ≥ 3 headings and ≥ 5 paragraphs | 1000 / 100 |
//! | academic | academic density ≥ 1% | 800 (+100 for long sentences) / 120 |
//! | base | otherwise | 800 / 80 |
//!
//! Sizes are then clamped to `[MIN_CHUNK_SIZE, MAX_CHUNK_SIZE]` and the
//! overlap to at most a third of the size. Everything here is a pure
//! function of its inputs.

use serde::{Deserialize, Serialize};

use crate::models::DocumentType;

pub const MIN_DOCUMENT_CHARS: usize = 2000;
pub const MIN_CHUNK_SIZE: usize = 300;
pub const MAX_CHUNK_SIZE: usize = 1200;
pub const BASE_CHUNK_SIZE: usize = 800;
pub const BASE_OVERLAP: usize = 80;

const MINIMAL_FLOOR: usize = 400;
const MINIMAL_OVERLAP: usize = 50;
const TECHNICAL_DENSITY_THRESHOLD: f64 = 0.03;
const ACADEMIC_DENSITY_THRESHOLD: f64 = 0.01;
const STRUCTURED_MIN_HEADERS: usize = 3;
const STRUCTURED_MIN_PARAGRAPHS: usize = 5;
const LONG_SENTENCE_WORDS: f64 = 25.0;

const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", " ", ""];
const CODE_SEPARATORS: &[&str] = &["\n```", "\n\n", "\n", " ", ""];
const HEADING_SEPARATORS: &[&str] = &["\n# ", "\n## ", "\n### ", "\n\n", "\n", " ", ""];
const SENTENCE_SEPARATORS: &[&str] = &["\n\n", ". ", "? ", "! ", "\n", " ", ""];

const TECHNICAL_TERMS: &[&str] = &[
    "api", "algorithm", "async", "backend", "binary", "buffer", "cache", "class", "cli",
    "compile", "compiler", "config", "configuration", "container", "cpu", "database",
    "debug", "deploy", "deployment", "docker", "endpoint", "framework", "frontend",
    "function", "http", "https", "implementation", "interface", "json", "kernel",
    "kubernetes", "latency", "library", "memory", "method", "module", "parameter",
    "protocol", "query", "runtime", "schema", "sdk", "server", "sql", "struct", "thread",
    "token", "variable", "yaml",
];

const ACADEMIC_TERMS: &[&str] = &[
    "abstract", "analysis", "conclusion", "consequently", "empirical", "et", "evidence",
    "findings", "furthermore", "hypothesis", "literature", "methodology", "moreover",
    "participants", "proposition", "research", "significant", "study", "theoretical",
    "thesis",
];

/// Which rule produced a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Minimal,
    Technical,
    Structured,
    Academic,
    Base,
}

/// Chunking parameters chosen for one document. Stored in the document's
/// metadata so the split can be explained later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkingStrategy {
    pub name: StrategyKind,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub separators: Vec<String>,
    pub rationale: String,
}

impl ChunkingStrategy {
    /// The strategy used when adaptive chunking is turned off.
    pub fn base() -> Self {
        build(
            StrategyKind::Base,
            BASE_CHUNK_SIZE,
            BASE_OVERLAP,
            DEFAULT_SEPARATORS,
            "adaptive chunking disabled".to_string(),
        )
    }
}

/// Structural and lexical measurements of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentAnalysis {
    pub doc_type: DocumentType,
    pub total_chars: usize,
    pub header_count: usize,
    pub list_items: usize,
    pub code_fences: usize,
    pub table_rows: usize,
    pub paragraph_count: usize,
    pub word_count: usize,
    pub avg_sentence_words: f64,
    pub technical_density: f64,
    pub academic_density: f64,
}

/// Measure `text`. The title is counted toward vocabulary density.
pub fn analyze_document(text: &str, doc_type: DocumentType, title: &str) -> DocumentAnalysis {
    let mut header_count = 0;
    let mut list_items = 0;
    let mut fence_lines = 0;
    let mut table_rows = 0;

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            fence_lines += 1;
        } else if is_heading(trimmed) {
            header_count += 1;
        } else if is_list_item(trimmed) {
            list_items += 1;
        } else if trimmed.starts_with('|') && trimmed.matches('|').count() >= 2 {
            table_rows += 1;
        }
    }

    let paragraph_count = text
        .split("\n\n")
        .filter(|p| !p.trim().is_empty())
        .count();

    let words: Vec<String> = text
        .split_whitespace()
        .chain(title.split_whitespace())
        .map(normalize_word)
        .filter(|w| !w.is_empty())
        .collect();
    let word_count = words.len();

    let technical = words
        .iter()
        .filter(|w| TECHNICAL_TERMS.contains(&w.as_str()))
        .count();
    let academic = words
        .iter()
        .filter(|w| ACADEMIC_TERMS.contains(&w.as_str()))
        .count();

    let sentences = text
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
        .max(1);
    let text_words = text.split_whitespace().count();

    DocumentAnalysis {
        doc_type,
        total_chars: text.chars().count(),
        header_count,
        list_items,
        code_fences: fence_lines / 2 + fence_lines % 2,
        table_rows,
        paragraph_count,
        word_count,
        avg_sentence_words: text_words as f64 / sentences as f64,
        technical_density: density(technical, word_count),
        academic_density: density(academic, word_count),
    }
}

/// Pick the chunking strategy for a document.
pub fn choose_strategy(text: &str, doc_type: DocumentType, title: &str) -> ChunkingStrategy {
    strategy_for(&analyze_document(text, doc_type, title))
}

/// Apply the decision table to an existing analysis.
pub fn strategy_for(a: &DocumentAnalysis) -> ChunkingStrategy {
    if a.total_chars < MIN_DOCUMENT_CHARS {
        return build(
            StrategyKind::Minimal,
            (a.total_chars / 2).max(MINIMAL_FLOOR),
            MINIMAL_OVERLAP,
            DEFAULT_SEPARATORS,
            format!(
                "short document ({} chars < {})",
                a.total_chars, MIN_DOCUMENT_CHARS
            ),
        );
    }

    if a.code_fences > 0 || a.technical_density >= TECHNICAL_DENSITY_THRESHOLD {
        let separators = if a.code_fences > 0 {
            CODE_SEPARATORS
        } else {
            DEFAULT_SEPARATORS
        };
        return build(
            StrategyKind::Technical,
            600,
            150,
            separators,
            format!(
                "technical content ({} code blocks, {:.1}% technical terms)",
                a.code_fences,
                a.technical_density * 100.0
            ),
        );
    }

    if a.header_count >= STRUCTURED_MIN_HEADERS && a.paragraph_count >= STRUCTURED_MIN_PARAGRAPHS {
        return build(
            StrategyKind::Structured,
            1000,
            100,
            HEADING_SEPARATORS,
            format!(
                "structured document ({} headings, {} paragraphs, {} list items, {} table rows)",
                a.header_count, a.paragraph_count, a.list_items, a.table_rows
            ),
        );
    }

    if a.academic_density >= ACADEMIC_DENSITY_THRESHOLD {
        let long_sentences = a.avg_sentence_words > LONG_SENTENCE_WORDS;
        let size = if long_sentences {
            BASE_CHUNK_SIZE + 100
        } else {
            BASE_CHUNK_SIZE
        };
        return build(
            StrategyKind::Academic,
            size,
            120,
            SENTENCE_SEPARATORS,
            format!(
                "academic vocabulary ({:.1}%), avg sentence {:.1} words",
                a.academic_density * 100.0,
                a.avg_sentence_words
            ),
        );
    }

    build(
        StrategyKind::Base,
        BASE_CHUNK_SIZE,
        BASE_OVERLAP,
        DEFAULT_SEPARATORS,
        format!("general {} document", a.doc_type),
    )
}

fn build(
    name: StrategyKind,
    size: usize,
    overlap: usize,
    separators: &[&str],
    rationale: String,
) -> ChunkingStrategy {
    let chunk_size = size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
    ChunkingStrategy {
        name,
        chunk_size,
        chunk_overlap: overlap.min(chunk_size / 3),
        separators: separators.iter().map(|s| s.to_string()).collect(),
        rationale,
    }
}

fn density(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

fn normalize_word(word: &str) -> String {
    word.trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

fn is_heading(line: &str) -> bool {
    if let Some(rest) = line.strip_prefix('#') {
        let rest = rest.trim_start_matches('#');
        return rest.starts_with(' ') && !rest.trim().is_empty();
    }
    // All-caps short lines are treated as headings (common in PDFs).
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    line.chars().count() <= 60
        && letters.len() >= 3
        && letters.iter().all(|c| c.is_uppercase())
        && !line.ends_with('.')
}

fn is_list_item(line: &str) -> bool {
    if line.starts_with("- ") || line.starts_with("* ") || line.starts_with("• ") {
        return true;
    }
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    digits > 0 && (line[digits..].starts_with(". ") || line[digits..].starts_with(") "))
}
