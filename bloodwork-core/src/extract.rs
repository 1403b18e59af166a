//! Document-to-text extraction.
//!
//! PDFs are parsed in memory with `pdf-extract`, so no temporary files are ever
//! written. Plain-text exports are accepted as-is. Either way the result is
//! whitespace-normalized: every run of whitespace collapses to a single space.

use crate::error::ExtractionError;
use crate::types::{ExtractedText, RawDocument};
use async_trait::async_trait;
use tracing::debug;

const PDF_MAGIC: &[u8] = b"%PDF-";
const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// Turns a raw document into plain text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract(&self, document: RawDocument) -> Result<ExtractedText, ExtractionError>;
}

/// Formats the default extractor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    PlainText,
    Unknown,
}

impl DocumentFormat {
    /// A PDF starts with `%PDF-`, after an optional BOM and leading whitespace.
    pub fn detect(bytes: &[u8]) -> Self {
        let head = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
        if head.trim_ascii_start().starts_with(PDF_MAGIC) {
            return DocumentFormat::Pdf;
        }
        match std::str::from_utf8(bytes) {
            Ok(text) if !text.contains('\0') => DocumentFormat::PlainText,
            _ => DocumentFormat::Unknown,
        }
    }
}

/// Extractor for PDF and UTF-8 text documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentTextExtractor;

impl DocumentTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextExtractor for DocumentTextExtractor {
    async fn extract(&self, document: RawDocument) -> Result<ExtractedText, ExtractionError> {
        if document.is_empty() {
            return Err(ExtractionError::EmptyDocument);
        }

        let format = DocumentFormat::detect(document.as_bytes());
        debug!(bytes = document.len(), ?format, "Extracting document text");

        let raw = match format {
            DocumentFormat::Pdf => {
                let bytes = document.into_bytes();
                // A panic inside the parser surfaces here as a JoinError.
                tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
                    .await
                    .map_err(|e| ExtractionError::Parse {
                        message: format!("PDF parser aborted: {}", e),
                    })?
                    .map_err(|e| ExtractionError::Parse {
                        message: e.to_string(),
                    })?
            }
            DocumentFormat::PlainText => String::from_utf8(document.into_bytes()).map_err(|e| {
                ExtractionError::UnsupportedFormat {
                    detail: e.to_string(),
                }
            })?,
            DocumentFormat::Unknown => {
                return Err(ExtractionError::UnsupportedFormat {
                    detail: "expected a PDF or UTF-8 text document".to_string(),
                });
            }
        };

        Ok(ExtractedText::new(normalize_whitespace(&raw)))
    }
}

/// Collapse every whitespace run to a single space.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
