//! Recursive separator-based text splitter.
//!
//! Applies a [`ChunkingStrategy`] to document text and produces [`Chunk`]s.
//! Every emitted chunk is a contiguous, whitespace-trimmed substring of the
//! input; consecutive chunks share up to `chunk_overlap` characters.
//!
//! # Algorithm
//!
//! 1. Pick the first separator in the strategy's list that occurs in the
//!    text (`""` always matches and splits into single characters).
//! 2. Split on it, keeping the separator with one of the pieces so the
//!    pieces concatenate back to the original text. Heading and fence
//!    separators (`"\n# "`, `"\n```"`) stay with the piece they introduce;
//!    all others stay with the piece they end.
//! 3. Greedily merge consecutive pieces into windows of at most
//!    `chunk_size` characters. After a window is emitted, trailing pieces
//!    totalling at most `chunk_overlap` characters seed the next window.
//! 4. A piece longer than `chunk_size` is split recursively with the
//!    remaining separators.
//!
//! Lengths are counted in `char`s, so multi-byte text is never cut inside a
//! UTF-8 sequence.
//!
//! # Example
//!
//! ```rust
//! use hybrid_context_core::chunk::{chunk_document, PageText};
//! use hybrid_context_core::strategy::ChunkingStrategy;
//!
//! let pages = [PageText::text("Hello world.\n\nSecond paragraph.")];
//! let chunks = chunk_document("doc-123", &pages, &ChunkingStrategy::base());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use std::collections::VecDeque;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, ChunkMetadata};
use crate::strategy::ChunkingStrategy;

/// Text of one source page. Plain-text documents are a single page with no
/// page number.
#[derive(Debug, Clone, PartialEq)]
pub struct PageText {
    pub page: Option<u32>,
    pub text: String,
}

impl PageText {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            page: None,
            text: text.into(),
        }
    }

    pub fn numbered(page: u32, text: impl Into<String>) -> Self {
        Self {
            page: Some(page),
            text: text.into(),
        }
    }
}

/// Split every page and number the chunks `0..N-1` across the whole
/// document, in page order.
pub fn chunk_document(
    document_id: &str,
    pages: &[PageText],
    strategy: &ChunkingStrategy,
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut index: i64 = 0;

    for page in pages {
        for piece in split_text(&page.text, strategy) {
            chunks.push(make_chunk(document_id, index, page.page, &piece));
            index += 1;
        }
    }

    chunks
}

/// Rebuild document text from its stored chunks in order.
///
/// The text a chunk repeats from its predecessor on the same page is dropped;
/// only whole words, at most `max_overlap` characters, count as repeated.
/// Chunks of different pages are joined with a blank line, as
/// `extract`'s page text is.
pub fn reassemble_text(chunks: &[Chunk], max_overlap: usize) -> String {
    let mut text = String::new();
    let mut previous: Option<&Chunk> = None;

    for chunk in chunks {
        match previous {
            None => text.push_str(&chunk.content),
            Some(prev) => {
                let shared = if prev.metadata.page == chunk.metadata.page {
                    repeated_prefix_len(&prev.content, &chunk.content, max_overlap)
                } else {
                    0
                };
                if shared == 0 {
                    text.push_str("\n\n");
                }
                text.push_str(&chunk.content[shared..]);
            }
        }
        previous = Some(chunk);
    }
    text
}

/// Byte length of the longest word-aligned prefix of `next` that `prev`
/// ends with.
fn repeated_prefix_len(prev: &str, next: &str, max_chars: usize) -> usize {
    let ends: Vec<usize> = next
        .char_indices()
        .map(|(i, c)| i + c.len_utf8())
        .take(max_chars)
        .collect();

    ends.into_iter()
        .rev()
        .find(|&end| {
            let ends_word = next[end..].chars().next().map_or(true, char::is_whitespace);
            ends_word
                && prev.strip_suffix(&next[..end]).is_some_and(|before| {
                    before.chars().next_back().map_or(true, char::is_whitespace)
                })
        })
        .unwrap_or(0)
}

/// Split one block of text according to `strategy`.
pub fn split_text(text: &str, strategy: &ChunkingStrategy) -> Vec<String> {
    let size = strategy.chunk_size.max(1);
    let overlap = strategy.chunk_overlap.min(size.saturating_sub(1));
    let separators: Vec<&str> = strategy.separators.iter().map(String::as_str).collect();

    let mut windows = Vec::new();
    split_recursive(text, &separators, size, overlap, &mut windows);

    windows
        .into_iter()
        .map(|w| w.trim().to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

fn split_recursive<'a>(
    text: &'a str,
    separators: &[&str],
    size: usize,
    overlap: usize,
    out: &mut Vec<&'a str>,
) {
    let (separator, rest) = pick_separator(text, separators);
    let pieces = split_keeping(text, separator);

    let mut pending: Vec<&'a str> = Vec::new();
    for piece in pieces {
        if char_len(piece) <= size {
            pending.push(piece);
            continue;
        }
        merge_pieces(text, &pending, size, overlap, out);
        pending.clear();
        if rest.is_empty() {
            out.push(piece);
        } else {
            split_recursive(piece, rest, size, overlap, out);
        }
    }
    merge_pieces(text, &pending, size, overlap, out);
}

fn pick_separator<'s, 'l>(text: &str, separators: &'l [&'s str]) -> (&'s str, &'l [&'s str]) {
    for (i, sep) in separators.iter().enumerate() {
        if sep.is_empty() || text.contains(sep) {
            return (*sep, &separators[i + 1..]);
        }
    }
    ("", &[])
}

/// Split without losing any bytes: the returned slices concatenate back to
/// `text`.
fn split_keeping<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let leading = separator.starts_with('\n') && !separator.trim().is_empty();
    let mut pieces = Vec::new();
    let mut start = 0;
    for (pos, sep) in text.match_indices(separator) {
        let cut = if leading { pos } else { pos + sep.len() };
        if cut > start {
            pieces.push(&text[start..cut]);
            start = cut;
        }
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Merge adjacent pieces of `source` into windows. Pieces are consecutive
/// slices of `source`, so a window is the slice from its first piece to
/// the end of its last.
fn merge_pieces<'a>(
    source: &'a str,
    pieces: &[&'a str],
    size: usize,
    overlap: usize,
    out: &mut Vec<&'a str>,
) {
    let mut window: VecDeque<(&'a str, usize)> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);
        if total + len > size && !window.is_empty() {
            out.push(span(source, &window));
            while total > overlap || (total + len > size && total > 0) {
                match window.pop_front() {
                    Some((_, l)) => total -= l,
                    None => break,
                }
            }
        }
        window.push_back((piece, len));
        total += len;
    }

    if !window.is_empty() {
        out.push(span(source, &window));
    }
}

fn span<'a>(source: &'a str, window: &VecDeque<(&'a str, usize)>) -> &'a str {
    let (first, last) = match (window.front(), window.back()) {
        (Some((f, _)), Some((l, _))) => (*f, *l),
        _ => return "",
    };
    let base = source.as_ptr() as usize;
    let start = first.as_ptr() as usize - base;
    let end = last.as_ptr() as usize - base + last.len();
    &source[start..end]
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Create a single [`Chunk`] with a UUID and SHA-256 content hash.
fn make_chunk(document_id: &str, index: i64, page: Option<u32>, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        content: text.to_string(),
        contextual_content: None,
        is_contextualized: false,
        hash,
        metadata: ChunkMetadata {
            page,
            char_length: char_len(text),
            contextual_length: None,
        },
    }
}
