//! OCR through an OpenAI-compatible chat-completions proxy.
//!
//! Two passes per page: a vision model transcribes the page from an
//! inline base64 data URL, then a text model cleans up the Markdown.
//! PDFs are rasterised first and every page goes through both passes.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::prompts::{FORMAT_PROMPT, OCR_PROMPT};
use super::render::{PageRenderer, PdfiumRenderer};
use super::{OcrEngine, OcrError, PDF_MIME};
use crate::config::OcrConfig;

const MAX_TOKENS: u32 = 16_000;

/// Separator between pages of a multi-page document
pub const PAGE_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: serde_json::Value,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Build a `data:` URL for inline upload
pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// Language-model backed OCR engine
#[derive(Clone)]
pub struct LlmOcrEngine {
    http_client: reqwest::Client,
    config: OcrConfig,
    renderer: Arc<dyn PageRenderer>,
}

impl LlmOcrEngine {
    pub fn new(config: OcrConfig) -> Result<Self, OcrError> {
        let renderer = PdfiumRenderer::new(
            config.pdf_max_pixels,
            config.pdfium_library_dir.as_ref().map(PathBuf::from),
        );
        Self::with_renderer(config, Arc::new(renderer))
    }

    /// Engine with an explicit PDF renderer
    pub fn with_renderer(
        config: OcrConfig,
        renderer: Arc<dyn PageRenderer>,
    ) -> Result<Self, OcrError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| OcrError::Request(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http_client,
            config,
            renderer,
        })
    }

    async fn complete(
        &self,
        model: &str,
        messages: serde_json::Value,
        temperature: f32,
    ) -> Result<Option<String>, OcrError> {
        let url = format!(
            "{}/chat/completions",
            self.config.proxy_url.trim_end_matches('/')
        );
        let request = ChatRequest {
            model,
            messages,
            max_tokens: MAX_TOKENS,
            temperature,
        };

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.config.proxy_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(model = %model, error = %e, "LLM proxy request failed");
                OcrError::Request(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(model = %model, status = status.as_u16(), "LLM proxy returned error");
            return Err(OcrError::Status(status.as_u16()));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| OcrError::InvalidResponse(e.to_string()))?;

        Ok(body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content))
    }

    /// Vision pass over one page
    async fn recognise(&self, bytes: &[u8], mime: &str) -> Result<String, OcrError> {
        let messages = json!([{
            "role": "user",
            "content": [
                {"type": "text", "text": OCR_PROMPT},
                {"type": "image_url", "image_url": {"url": data_url(mime, bytes)}}
            ]
        }]);

        Ok(self
            .complete(&self.config.ocr_model, messages, 0.1)
            .await?
            .unwrap_or_default())
    }

    /// Formatting pass; falls back to the raw text when the model returns nothing
    async fn format(&self, raw: String) -> Result<String, OcrError> {
        let messages = json!([
            {"role": "system", "content": FORMAT_PROMPT},
            {"role": "user", "content": raw}
        ]);

        let formatted = self
            .complete(&self.config.format_model, messages, 0.0)
            .await?
            .filter(|text| !text.trim().is_empty());
        Ok(formatted.unwrap_or(raw))
    }

    async fn transcribe(&self, bytes: &[u8], mime: &str) -> Result<String, OcrError> {
        let raw = self.recognise(bytes, mime).await?;
        self.format(raw).await
    }
}

/// Join per-page Markdown; headings are only added when there is more than one page
pub fn join_pages(pages: Vec<String>) -> String {
    if pages.len() <= 1 {
        return pages.into_iter().next().unwrap_or_default();
    }
    pages
        .iter()
        .enumerate()
        .map(|(index, markdown)| format!("## Page {}\n\n{}", index + 1, markdown))
        .collect::<Vec<_>>()
        .join(PAGE_SEPARATOR)
}

#[async_trait]
impl OcrEngine for LlmOcrEngine {
    async fn process(&self, bytes: &[u8], filename: &str, mime: &str) -> Result<String, OcrError> {
        tracing::debug!(filename = %filename, mime = %mime, size = bytes.len(), "Starting OCR");

        let markdown = if mime == PDF_MIME {
            let pages = self.renderer.render_pages(bytes).await.map_err(|e| {
                tracing::error!(filename = %filename, error = %e, "PDF rasterisation failed");
                e
            })?;
            tracing::debug!(filename = %filename, pages = pages.len(), "PDF rasterised");

            let mut transcribed = Vec::with_capacity(pages.len());
            for page in &pages {
                transcribed.push(self.transcribe(page, "image/png").await?);
            }
            join_pages(transcribed)
        } else {
            self.transcribe(bytes, mime).await?
        };

        tracing::info!(
            filename = %filename,
            markdown_len = markdown.len(),
            "OCR complete"
        );
        Ok(markdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn config(url: String) -> OcrConfig {
        OcrConfig {
            proxy_url: url,
            proxy_key: "sk-test".to_string(),
            ocr_model: "vision-model".to_string(),
            format_model: "format-model".to_string(),
            timeout: Duration::from_secs(5),
            ..OcrConfig::default()
        }
    }

    /// Renders a fixed number of pages without touching pdfium
    struct FakeRenderer {
        pages: usize,
        calls: AtomicUsize,
    }

    impl FakeRenderer {
        fn new(pages: usize) -> Arc<Self> {
            Arc::new(Self {
                pages,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PageRenderer for FakeRenderer {
        async fn render_pages(&self, _pdf: &[u8]) -> Result<Vec<Vec<u8>>, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.pages == 0 {
                return Err(OcrError::Render("PDF has no pages".to_string()));
            }
            Ok((0..self.pages).map(|i| format!("png-{}", i).into_bytes()).collect())
        }
    }

    async fn mock_passes(server: &mut mockito::ServerGuard, times: usize) -> Vec<mockito::Mock> {
        let vision = server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::PartialJson(json!({"model": "vision-model"})),
                mockito::Matcher::Regex("data:image/png;base64,".to_string()),
            ]))
            .with_status(200)
            .with_body(completion("raw"))
            .expect(times)
            .create_async()
            .await;
        let format = server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::PartialJson(json!({"model": "format-model"})))
            .with_status(200)
            .with_body(completion("text"))
            .expect(times)
            .create_async()
            .await;
        vec![vision, format]
    }

    fn completion(content: &str) -> String {
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]}).to_string()
    }

    #[test]
    fn test_data_url() {
        assert_eq!(data_url("image/png", b"abc"), "data:image/png;base64,YWJj");
    }

    #[tokio::test]
    async fn test_two_pass_pipeline() {
        let mut server = mockito::Server::new_async().await;
        let vision = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(mockito::Matcher::PartialJson(json!({"model": "vision-model"})))
            .with_status(200)
            .with_body(completion("raw $x^2$"))
            .create_async()
            .await;
        let format = server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::PartialJson(json!({"model": "format-model"})))
            .with_status(200)
            .with_body(completion("# Page\n\n$x^2$"))
            .create_async()
            .await;

        let engine = LlmOcrEngine::new(config(server.url())).unwrap();
        let markdown = engine
            .process(b"png-bytes", "page.png", "image/png")
            .await
            .unwrap();

        assert_eq!(markdown, "# Page\n\n$x^2$");
        vision.assert_async().await;
        format.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_format_falls_back_to_raw() {
        let mut server = mockito::Server::new_async().await;
        let _vision = server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::PartialJson(json!({"model": "vision-model"})))
            .with_status(200)
            .with_body(completion("raw text"))
            .create_async()
            .await;
        let _format = server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::PartialJson(json!({"model": "format-model"})))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":null}}]}"#)
            .create_async()
            .await;

        let engine = LlmOcrEngine::new(config(server.url())).unwrap();
        let markdown = engine
            .process(b"webp-bytes", "page.webp", "image/webp")
            .await
            .unwrap();
        assert_eq!(markdown, "raw text");
    }

    #[test]
    fn test_join_pages() {
        assert_eq!(join_pages(vec![]), "");
        assert_eq!(join_pages(vec!["only".to_string()]), "only");
        assert_eq!(
            join_pages(vec!["a".to_string(), "b".to_string()]),
            "## Page 1\n\na\n\n---\n\n## Page 2\n\nb"
        );
    }

    #[tokio::test]
    async fn test_pdf_pages_each_get_both_passes() {
        let mut server = mockito::Server::new_async().await;
        let mocks = mock_passes(&mut server, 3).await;

        let renderer = FakeRenderer::new(3);
        let engine = LlmOcrEngine::with_renderer(config(server.url()), renderer.clone()).unwrap();
        let markdown = engine
            .process(b"%PDF-1.7", "book.pdf", PDF_MIME)
            .await
            .unwrap();

        assert_eq!(
            markdown,
            "## Page 1\n\ntext\n\n---\n\n## Page 2\n\ntext\n\n---\n\n## Page 3\n\ntext"
        );
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 1);
        for mock in mocks {
            mock.assert_async().await;
        }
    }

    #[tokio::test]
    async fn test_single_page_pdf_has_no_heading() {
        let mut server = mockito::Server::new_async().await;
        let mocks = mock_passes(&mut server, 1).await;

        let engine =
            LlmOcrEngine::with_renderer(config(server.url()), FakeRenderer::new(1)).unwrap();
        let markdown = engine
            .process(b"%PDF-1.7", "page.pdf", PDF_MIME)
            .await
            .unwrap();

        assert_eq!(markdown, "text");
        for mock in mocks {
            mock.assert_async().await;
        }
    }

    #[tokio::test]
    async fn test_render_failure_skips_model_calls() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .expect(0)
            .create_async()
            .await;

        let engine =
            LlmOcrEngine::with_renderer(config(server.url()), FakeRenderer::new(0)).unwrap();
        let err = engine
            .process(b"%PDF-1.7", "empty.pdf", PDF_MIME)
            .await
            .unwrap_err();

        assert!(matches!(err, OcrError::Render(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_images_skip_the_renderer() {
        let mut server = mockito::Server::new_async().await;
        let _vision = server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::Regex("data:image/jpeg;base64,".to_string()))
            .with_status(200)
            .with_body(completion("raw"))
            .create_async()
            .await;
        let _format = server
            .mock("POST", "/chat/completions")
            .match_body(mockito::Matcher::PartialJson(json!({"model": "format-model"})))
            .with_status(200)
            .with_body(completion("text"))
            .create_async()
            .await;

        let renderer = FakeRenderer::new(2);
        let engine = LlmOcrEngine::with_renderer(config(server.url()), renderer.clone()).unwrap();
        let markdown = engine
            .process(b"jpeg-bytes", "page.jpg", "image/jpeg")
            .await
            .unwrap();

        assert_eq!(markdown, "text");
        assert_eq!(renderer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_upstream_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .create_async()
            .await;

        let engine = LlmOcrEngine::new(config(server.url())).unwrap();
        let err = engine
            .process(b"x", "page.png", "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, OcrError::Status(503)));
    }
}
