//! PDF rasterisation: render the first pages of a document via pdfium.
//!
//! ## Why a trait?
//!
//! pdfium is a native library that may be missing on the host. The extractor
//! talks to [`PageRenderer`] so that hosts can plug in another rasteriser and
//! tests can run without a pdfium binary.
//!
//! ## Why scale, then cap?
//!
//! Recognition accuracy depends on glyph height in pixels, so pages are
//! rendered at a fixed upscale factor rather than a fixed width. The
//! `max_rendered_pixels` cap still bounds memory for poster-sized pages.
//!
//! Every pdfium object (library binding, document, page, bitmap) is a scoped
//! value dropped before [`PdfiumRenderer::render`] returns, on success and on
//! every error path alike.

use crate::error::ExtractionError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use tracing::{debug, info};

/// Rendering parameters for one document.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    /// Render at most this many leading pages.
    pub max_pages: usize,
    /// Upscale factor applied to the page's natural size.
    pub scale: f32,
    /// Cap on either rendered dimension.
    pub max_pixels: u32,
}

/// Rasterises paginated documents into image surfaces.
///
/// Implementations are called from a blocking thread.
pub trait PageRenderer: Send + Sync {
    /// Render up to `options.max_pages` leading pages, in page order.
    fn render(
        &self,
        document: &[u8],
        options: &RenderOptions,
    ) -> Result<Vec<DynamicImage>, ExtractionError>;
}

/// pdfium-backed renderer.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRenderer {
    library: Option<PathBuf>,
}

impl PdfiumRenderer {
    /// Bind to the system pdfium library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind to an explicit pdfium shared library.
    pub fn with_library(path: impl Into<PathBuf>) -> Self {
        Self {
            library: Some(path.into()),
        }
    }

    fn bind(&self) -> Result<Pdfium, ExtractionError> {
        let bindings = match &self.library {
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_system_library(),
        };
        bindings
            .map(Pdfium::new)
            .map_err(|e| {
                ExtractionError::RenderFailure(format!("failed to bind pdfium: {:?}", e))
            })
    }
}

impl PageRenderer for PdfiumRenderer {
    fn render(
        &self,
        document: &[u8],
        options: &RenderOptions,
    ) -> Result<Vec<DynamicImage>, ExtractionError> {
        let pdfium = self.bind()?;

        let doc = pdfium
            .load_pdf_from_byte_slice(document, None)
            .map_err(|e| ExtractionError::RenderFailure(format!("failed to open PDF: {:?}", e)))?;

        let pages = doc.pages();
        let total_pages = pages.len() as usize;
        let count = total_pages.min(options.max_pages);
        info!("PDF loaded: {} pages, rendering {}", total_pages, count);

        let max_pixels = i32::try_from(options.max_pixels).unwrap_or(i32::MAX);
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(options.scale)
            .set_maximum_width(max_pixels)
            .set_maximum_height(max_pixels);

        let mut surfaces = Vec::with_capacity(count);
        for idx in 0..count {
            let page = pages.get(idx as u16).map_err(|e| {
                ExtractionError::RenderFailure(format!("page {}: {:?}", idx + 1, e))
            })?;

            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                ExtractionError::RenderFailure(format!("page {}: {:?}", idx + 1, e))
            })?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            surfaces.push(image);
        }

        Ok(surfaces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renderer_remembers_library_path() {
        let r = PdfiumRenderer::with_library("/opt/pdfium/libpdfium.so");
        assert_eq!(r.library.as_deref(), Some(std::path::Path::new("/opt/pdfium/libpdfium.so")));
        assert!(PdfiumRenderer::new().library.is_none());
    }
}
