//! Bulletin text extraction.
//!
//! Two interchangeable strategies sit behind [`BulletinExtractor`], selected
//! per invocation by `extraction.extractor`:
//!
//! - **high_fidelity** — full layout-aware extraction via `pdf-extract`.
//!   Slower, better text ordering on multi-column bulletins.
//! - **fast** — raw content-stream decoding via `lopdf`. No layout handling.
//!
//! Extraction is fatal for a document when the source is unreadable or
//! yields zero extractable characters.

use crate::config::ExtractionConfig;

/// Extraction error. Fatal for the document; the orchestrator records it
/// verbatim as the document's last error.
#[derive(Debug)]
pub enum ExtractionError {
    /// The raw file is gone from the storage medium.
    FileMissing(String),
    /// The file exists but cannot be parsed as a bulletin.
    Unreadable(String),
    /// Parsing succeeded but produced no extractable characters.
    EmptyText,
}

impl std::fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionError::FileMissing(name) => write!(f, "source file missing: {}", name),
            ExtractionError::Unreadable(e) => write!(f, "extraction failed: {}", e),
            ExtractionError::EmptyText => write!(f, "document yielded no extractable text"),
        }
    }
}

impl std::error::Error for ExtractionError {}

/// Plain text plus page count, as produced by either strategy.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub text: String,
    pub page_count: usize,
}

/// Capability interface for the two extraction strategies.
pub trait BulletinExtractor: Send + Sync {
    fn name(&self) -> &'static str;
    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ExtractionError>;
}

/// Layout-aware extraction through `pdf-extract`.
pub struct HighFidelityExtractor;

impl BulletinExtractor for HighFidelityExtractor {
    fn name(&self) -> &'static str {
        "high_fidelity"
    }

    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ExtractionError> {
        let text = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| ExtractionError::Unreadable(e.to_string()))?;
        finish(text, page_count(bytes))
    }
}

/// Content-stream decoding through `lopdf`. Lower fidelity: text order
/// follows the stream, headers and columns may interleave.
pub struct FastExtractor;

impl BulletinExtractor for FastExtractor {
    fn name(&self) -> &'static str {
        "fast"
    }

    fn extract(&self, bytes: &[u8]) -> Result<Extraction, ExtractionError> {
        let doc = lopdf::Document::load_mem(bytes)
            .map_err(|e| ExtractionError::Unreadable(e.to_string()))?;
        let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
        let text = doc
            .extract_text(&pages)
            .map_err(|e| ExtractionError::Unreadable(e.to_string()))?;
        finish(text, pages.len())
    }
}

fn finish(text: String, page_count: usize) -> Result<Extraction, ExtractionError> {
    if text.trim().is_empty() {
        return Err(ExtractionError::EmptyText);
    }
    Ok(Extraction { text, page_count })
}

/// Page count from the lopdf page tree; 0 when the tree is unreadable.
fn page_count(bytes: &[u8]) -> usize {
    lopdf::Document::load_mem(bytes)
        .map(|doc| doc.get_pages().len())
        .unwrap_or(0)
}

/// Instantiate the configured strategy.
pub fn create_extractor(config: &ExtractionConfig) -> anyhow::Result<Box<dyn BulletinExtractor>> {
    match config.extractor.as_str() {
        "high_fidelity" => Ok(Box::new(HighFidelityExtractor)),
        "fast" => Ok(Box::new(FastExtractor)),
        other => anyhow::bail!(
            "Unknown extractor: '{}'. Must be high_fidelity or fast.",
            other
        ),
    }
}

/// Minimal valid single-page PDF containing the given phrase.
/// Builds body then xref with correct byte offsets. Test fixture only.
#[cfg(test)]
pub(crate) fn minimal_pdf(phrase: &str) -> Vec<u8> {
    let stream = format!("BT /F1 12 Tf 100 700 Td ({}) Tj ET", phrase);
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(
        format!(
            "4 0 obj << /Length {} >> stream\n{}\nendstream endobj\n",
            stream.len(),
            stream
        )
        .as_bytes(),
    );
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4, o5] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}
