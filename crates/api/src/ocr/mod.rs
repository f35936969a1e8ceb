//! OCR collaborator
//!
//! Uploads are checked against the supported content types here; the
//! recognition itself is delegated to an [`OcrEngine`].

pub mod llm;
pub mod prompts;
pub mod render;

use async_trait::async_trait;

pub use llm::LlmOcrEngine;
pub use render::{PageRenderer, PdfiumRenderer};

pub const PDF_MIME: &str = "application/pdf";

#[derive(Debug, thiserror::Error)]
pub enum OcrError {
    #[error("OCR request failed: {0}")]
    Request(String),
    #[error("OCR service returned status {0}")]
    Status(u16),
    #[error("Invalid OCR response: {0}")]
    InvalidResponse(String),
    #[error("PDF rendering failed: {0}")]
    Render(String),
}

/// Turns a document into Markdown
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn process(&self, bytes: &[u8], filename: &str, mime: &str) -> Result<String, OcrError>;
}

/// Content types accepted for upload, with their canonical form
const ALLOWED_TYPES: &[(&str, &str)] = &[
    (PDF_MIME, PDF_MIME),
    ("image/jpeg", "image/jpeg"),
    ("image/jpg", "image/jpeg"),
    ("image/png", "image/png"),
    ("image/webp", "image/webp"),
];

/// Canonical MIME type for a supported upload, `None` when unsupported.
///
/// Parameters such as `; charset=...` are ignored.
pub fn canonical_mime(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    ALLOWED_TYPES
        .iter()
        .find(|(accepted, _)| *accepted == essence)
        .map(|(_, canonical)| *canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_types() {
        assert_eq!(canonical_mime("application/pdf"), Some("application/pdf"));
        assert_eq!(canonical_mime("image/png"), Some("image/png"));
        assert_eq!(canonical_mime("image/webp"), Some("image/webp"));
        assert_eq!(canonical_mime("IMAGE/JPEG"), Some("image/jpeg"));
    }

    #[test]
    fn test_jpg_alias_is_canonicalised() {
        assert_eq!(canonical_mime("image/jpg"), Some("image/jpeg"));
    }

    #[test]
    fn test_parameters_are_ignored() {
        assert_eq!(
            canonical_mime("application/pdf; name=book.pdf"),
            Some("application/pdf")
        );
    }

    #[test]
    fn test_unsupported_types() {
        assert_eq!(canonical_mime("image/gif"), None);
        assert_eq!(canonical_mime("text/plain"), None);
        assert_eq!(canonical_mime(""), None);
    }
}
