//! Story text extraction from uploaded PDFs.
//!
//! Parsing runs inside `spawn_blocking`: lopdf is synchronous and a large
//! novel chapter can take long enough to stall a Tokio worker.

use crate::error::ComicError;
use async_trait::async_trait;
use tracing::debug;

/// Turns document bytes into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Fails with [`ComicError::ExtractionFailed`] on malformed input.
    async fn extract(&self, bytes: Vec<u8>) -> Result<String, ComicError>;
}

/// [`TextExtractor`] backed by lopdf's content-stream text extraction.
#[derive(Debug, Default, Clone, Copy)]
pub struct LopdfTextExtractor;

#[async_trait]
impl TextExtractor for LopdfTextExtractor {
    async fn extract(&self, bytes: Vec<u8>) -> Result<String, ComicError> {
        tokio::task::spawn_blocking(move || extract_pdf_text(&bytes))
            .await
            .map_err(|e| ComicError::Internal(format!("Extraction task panicked: {e}")))?
    }
}

/// Blocking implementation: concatenate the text of every page in order.
fn extract_pdf_text(bytes: &[u8]) -> Result<String, ComicError> {
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        return Err(ComicError::ExtractionFailed(
            "file is not a PDF (missing %PDF header)".into(),
        ));
    }

    let doc = lopdf::Document::load_mem(bytes)
        .map_err(|e| ComicError::ExtractionFailed(format!("cannot parse PDF: {e}")))?;

    let pages = doc.get_pages();
    let mut text = String::new();
    for (page_num, _) in &pages {
        match doc.extract_text(&[*page_num]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(e) => debug!("Page {}: no extractable text ({})", page_num, e),
        }
    }

    if text.trim().is_empty() {
        return Err(ComicError::ExtractionFailed(format!(
            "no text found in {} pages (scanned document?)",
            pages.len()
        )));
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_pdf_bytes() {
        let err = LopdfTextExtractor
            .extract(b"hello world".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, ComicError::ExtractionFailed(_)));
    }

    #[tokio::test]
    async fn rejects_truncated_pdf() {
        let err = LopdfTextExtractor
            .extract(b"%PDF-1.5\n1 0 obj".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, ComicError::ExtractionFailed(_)));
    }
}
