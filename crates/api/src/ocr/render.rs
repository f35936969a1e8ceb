//! PDF rasterisation
//!
//! The vision model only reads images, so each PDF page is rendered to a
//! PNG before recognition. Pdfium is CPU-bound and not async-aware; all
//! calls into it run on the blocking pool.

use std::io::Cursor;
use std::path::PathBuf;

use async_trait::async_trait;
use image::ImageFormat;
use pdfium_render::prelude::*;

use super::OcrError;

/// Turns a PDF into one PNG per page, in page order
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render_pages(&self, pdf: &[u8]) -> Result<Vec<Vec<u8>>, OcrError>;
}

/// Renderer backed by the pdfium shared library
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    /// Longest edge of a rendered page, in pixels
    max_pixels: u32,
    /// Directory holding the pdfium library; system search path when `None`
    library_dir: Option<PathBuf>,
}

impl PdfiumRenderer {
    pub fn new(max_pixels: u32, library_dir: Option<PathBuf>) -> Self {
        Self {
            max_pixels,
            library_dir,
        }
    }

    fn bind(&self) -> Result<Pdfium, OcrError> {
        let bindings = match &self.library_dir {
            Some(dir) => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| {
            tracing::error!(library_dir = ?self.library_dir, error = %e, "Failed to load pdfium");
            OcrError::Render(format!("pdfium unavailable: {}", e))
        })?;
        Ok(Pdfium::new(bindings))
    }

    fn render_blocking(&self, pdf: &[u8]) -> Result<Vec<Vec<u8>>, OcrError> {
        let pdfium = self.bind()?;
        let document = pdfium
            .load_pdf_from_byte_slice(pdf, None)
            .map_err(|e| OcrError::Render(format!("unreadable PDF: {:?}", e)))?;

        let edge = i32::try_from(self.max_pixels).unwrap_or(i32::MAX);
        let render_config = PdfRenderConfig::new()
            .set_target_width(edge)
            .set_maximum_height(edge);

        let pages = document.pages();
        tracing::debug!(pages = pages.len(), "PDF loaded");

        let mut rendered = Vec::with_capacity(pages.len() as usize);
        for (index, page) in pages.iter().enumerate() {
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                OcrError::Render(format!("page {} failed to render: {:?}", index + 1, e))
            })?;

            let mut png = Vec::new();
            bitmap
                .as_image()
                .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
                .map_err(|e| {
                    OcrError::Render(format!("page {} failed to encode: {}", index + 1, e))
                })?;
            rendered.push(png);
        }

        if rendered.is_empty() {
            return Err(OcrError::Render("PDF has no pages".to_string()));
        }
        Ok(rendered)
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn render_pages(&self, pdf: &[u8]) -> Result<Vec<Vec<u8>>, OcrError> {
        let renderer = self.clone();
        let pdf = pdf.to_vec();

        tokio::task::spawn_blocking(move || renderer.render_blocking(&pdf))
            .await
            .map_err(|e| OcrError::Render(format!("render task panicked: {}", e)))?
    }
}
