//! Text extraction for ingested files.
//!
//! Produces one [`PageText`] per PDF page (pages are separated by form feeds
//! in `pdf-extract` output) or a single unnumbered page for plain text.

use anyhow::Result;

use hybrid_context_core::chunk::PageText;
use hybrid_context_core::error::EngineError;
use hybrid_context_core::models::DocumentType;

const PAGE_BREAK: char = '\u{000C}';

/// Extract page texts from raw file bytes.
///
/// Fails with [`EngineError::EmptyDocument`] when nothing but whitespace
/// comes out and with [`EngineError::MalformedDocument`] when the PDF cannot
/// be parsed.
pub fn extract_pages(bytes: &[u8], doc_type: DocumentType) -> Result<Vec<PageText>> {
    let pages = match doc_type {
        DocumentType::Pdf => extract_pdf(bytes)?,
        DocumentType::Text => vec![PageText::text(String::from_utf8_lossy(bytes))],
    };

    let pages: Vec<PageText> = pages
        .into_iter()
        .filter(|p| !p.text.trim().is_empty())
        .collect();
    if pages.is_empty() {
        return Err(EngineError::EmptyDocument.into());
    }
    Ok(pages)
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<PageText>> {
    let text = pdf_extract::extract_text_from_mem(bytes)
        .map_err(|e| {
            EngineError::MalformedDocument(format!("PDF extraction failed: {}", e))
        })?;
    Ok(split_pages(&text))
}

fn split_pages(text: &str) -> Vec<PageText> {
    text.split(PAGE_BREAK)
        .enumerate()
        .map(|(i, page)| PageText::numbered(i as u32 + 1, page))
        .collect()
}

/// Full document text in page order, as sent to the enricher.
pub fn full_text(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|p| p.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
