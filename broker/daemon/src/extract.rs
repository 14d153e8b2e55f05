//! PDF Text Extraction
//!
//! [`PdfTextExtractor`] reads a stored upload and pulls out its embedded text
//! layer with `pdf-extract`. Scanned PDFs without a text layer yield an empty
//! string, which the router reports as a failed extraction.

use std::path::Path;

use async_trait::async_trait;
use docchat_core::document::{ExtractError, TextExtractor};

/// Extracts the text layer of digital PDFs
#[derive(Clone, Copy, Debug, Default)]
pub struct PdfTextExtractor;

impl PdfTextExtractor {
    fn extract_from_bytes(bytes: &[u8]) -> Result<String, ExtractError> {
        pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError(e.to_string()))
    }
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract(&self, path: &Path) -> Result<String, ExtractError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ExtractError(format!("cannot read {}: {e}", path.display())))?;

        // Parsing is CPU-bound and the parser may panic on malformed input
        let text = tokio::task::spawn_blocking(move || Self::extract_from_bytes(&bytes))
            .await
            .map_err(|e| ExtractError(format!("PDF parser aborted: {e}")))??;

        tracing::debug!(path = %path.display(), chars = text.chars().count(), "Extracted PDF text");
        Ok(text)
    }
}
