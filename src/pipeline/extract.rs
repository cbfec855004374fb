//! Document Text Extractor: blob + media type → normalised text.
//!
//! ```text
//! media type ──▶ allow-list ──▶ acquire engine ──▶ render (PDF) / decode (image)
//!                    │                                   │
//!               Unsupported                       recognise each surface
//!                                                        │
//!                                        join pages ──▶ normalise ──▶ Text | NoText
//! ```
//!
//! The allow-list check runs before anything is acquired or read. From the
//! moment the engine is acquired its [`EngineLease`] is in scope, so every
//! `?` below releases it on the way out.

use crate::config::IntakeConfig;
use crate::error::ExtractionError;
use crate::pipeline::input::{FileBlob, MediaType};
use crate::pipeline::ocr::{EngineLease, RecognitionBackend, TesseractBackend};
use crate::pipeline::postprocess::{self, Recognized};
use crate::pipeline::render::{PageRenderer, PdfiumRenderer, RenderOptions};
use crate::prompts::DECODE_ERROR_SENTINEL;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Converts uploaded documents and images to text.
///
/// Cloning is cheap and shares the renderer and recognition backend.
#[derive(Clone)]
pub struct DocumentExtractor {
    renderer: Arc<dyn PageRenderer>,
    recognition: Arc<dyn RecognitionBackend>,
    render: RenderOptions,
    page_separator: String,
}

impl std::fmt::Debug for DocumentExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentExtractor")
            .field("renderer", &"<dyn PageRenderer>")
            .field("recognition", &"<dyn RecognitionBackend>")
            .field("render", &self.render)
            .field("page_separator", &self.page_separator)
            .finish()
    }
}

impl DocumentExtractor {
    /// Extractor with explicit engines and the rendering policy from `config`.
    pub fn new(
        config: &IntakeConfig,
        renderer: Arc<dyn PageRenderer>,
        recognition: Arc<dyn RecognitionBackend>,
    ) -> Self {
        Self {
            renderer,
            recognition,
            render: RenderOptions {
                max_pages: config.max_pages,
                scale: config.render_scale,
                max_pixels: config.max_rendered_pixels,
            },
            page_separator: config.page_separator.clone(),
        }
    }

    /// pdfium renderer + Tesseract CLI, as configured.
    pub fn from_config(config: &IntakeConfig) -> Self {
        let renderer = match &config.pdfium_library {
            Some(path) => PdfiumRenderer::with_library(path),
            None => PdfiumRenderer::new(),
        };
        let recognition = TesseractBackend::new(&config.tesseract_path, &config.ocr_language);
        Self::new(config, Arc::new(renderer), Arc::new(recognition))
    }

    /// Extract text from `blob` on the blocking pool.
    pub async fn extract(&self, blob: FileBlob) -> Result<Recognized, ExtractionError> {
        if blob.media().is_none() {
            return Err(ExtractionError::Unsupported {
                media_type: blob.media_type,
            });
        }

        let this = self.clone();
        tokio::task::spawn_blocking(move || this.extract_blocking(&blob.data, &blob.media_type))
            .await
            .map_err(|e| {
                ExtractionError::RecognitionFailure(format!("extraction task failed: {e}"))
            })?
    }

    /// Blocking implementation of [`Self::extract`].
    pub fn extract_blocking(
        &self,
        data: &[u8],
        media_type: &str,
    ) -> Result<Recognized, ExtractionError> {
        let unsupported = || ExtractionError::Unsupported {
            media_type: media_type.to_string(),
        };
        let media = MediaType::from_mime(media_type).ok_or_else(unsupported)?;

        let start = Instant::now();
        let mut engine = EngineLease::acquire(self.recognition.as_ref())?;

        let raw = if media.is_paginated() {
            let surfaces = self.renderer.render(data, &self.render)?;
            let mut texts = Vec::with_capacity(surfaces.len());
            for (idx, surface) in surfaces.iter().enumerate() {
                let text = engine.recognize(surface)?;
                debug!("Page {}: {} chars recognised", idx + 1, text.len());
                texts.push(text);
            }
            texts.join(&self.page_separator)
        } else {
            let format = media.image_format().ok_or_else(unsupported)?;
            let image = image::load_from_memory_with_format(data, format).map_err(|e| {
                ExtractionError::RenderFailure(format!("cannot decode {}: {e}", media.mime()))
            })?;
            engine.recognize(&image)?
        };
        drop(engine);

        let recognized = postprocess::finish(&raw);
        info!(
            "Extraction finished ({}, {} bytes) in {}ms: {}",
            media.mime(),
            data.len(),
            start.elapsed().as_millis(),
            match &recognized {
                Recognized::Text(t) => format!("{} chars", t.len()),
                Recognized::NoText => "no text".to_string(),
            }
        );
        Ok(recognized)
    }
}

/// Map an extraction outcome to the string shown as the file's decoded text.
pub fn decoded_text(outcome: &Result<Recognized, ExtractionError>) -> String {
    match outcome {
        Ok(recognized) => recognized.display_text().to_string(),
        Err(_) => DECODE_ERROR_SENTINEL.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ocr::Recognizer;
    use image::DynamicImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Recognition double: counts acquire/terminate, returns scripted page texts.
    #[derive(Default)]
    struct ScriptedBackend {
        acquired: AtomicUsize,
        released: Arc<AtomicUsize>,
        pages: Mutex<Vec<Result<String, ExtractionError>>>,
    }

    impl ScriptedBackend {
        fn with_pages(pages: Vec<Result<String, ExtractionError>>) -> Arc<Self> {
            Arc::new(Self {
                pages: Mutex::new(pages),
                ..Default::default()
            })
        }
    }

    struct ScriptedEngine {
        script: Vec<Result<String, ExtractionError>>,
        released: Arc<AtomicUsize>,
    }

    impl Recognizer for ScriptedEngine {
        fn recognize(&mut self, _image: &DynamicImage) -> Result<String, ExtractionError> {
            if self.script.is_empty() {
                return Ok(String::new());
            }
            self.script.remove(0)
        }

        fn terminate(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl RecognitionBackend for ScriptedBackend {
        fn acquire(&self) -> Result<Box<dyn Recognizer>, ExtractionError> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedEngine {
                script: std::mem::take(&mut *self.pages.lock().unwrap()),
                released: Arc::clone(&self.released),
            }))
        }
    }

    /// Renderer double producing `n` blank pages, honouring `max_pages`.
    struct BlankPages(usize);

    impl PageRenderer for BlankPages {
        fn render(
            &self,
            _document: &[u8],
            options: &RenderOptions,
        ) -> Result<Vec<DynamicImage>, ExtractionError> {
            Ok((0..self.0.min(options.max_pages))
                .map(|_| DynamicImage::new_rgb8(8, 8))
                .collect())
        }
    }

    struct BrokenRenderer;

    impl PageRenderer for BrokenRenderer {
        fn render(
            &self,
            _document: &[u8],
            _options: &RenderOptions,
        ) -> Result<Vec<DynamicImage>, ExtractionError> {
            Err(ExtractionError::RenderFailure("corrupt xref".into()))
        }
    }

    fn png_bytes() -> Vec<u8> {
        crate::pipeline::encode::encode_png(&DynamicImage::new_rgb8(6, 6)).unwrap()
    }

    fn extractor(
        renderer: Arc<dyn PageRenderer>,
        backend: Arc<ScriptedBackend>,
    ) -> DocumentExtractor {
        DocumentExtractor::new(&IntakeConfig::default(), renderer, backend)
    }

    #[test]
    fn unsupported_type_acquires_nothing() {
        let backend = ScriptedBackend::with_pages(vec![]);
        let ex = extractor(Arc::new(BlankPages(1)), Arc::clone(&backend));
        let err = ex.extract_blocking(b"hello", "text/plain").unwrap_err();
        assert_eq!(
            err,
            ExtractionError::Unsupported {
                media_type: "text/plain".into()
            }
        );
        assert_eq!(backend.acquired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn pdf_pages_are_capped_joined_and_normalised() {
        let backend = ScriptedBackend::with_pages(vec![
            Ok("First  page\n".into()),
            Ok("\nsecond\tpage".into()),
            Ok("third".into()),
            Ok("fourth (never rendered)".into()),
        ]);
        let ex = extractor(Arc::new(BlankPages(5)), Arc::clone(&backend));
        let out = ex.extract_blocking(b"%PDF-1.7", "application/pdf").unwrap();
        assert_eq!(out, Recognized::Text("First page second page third".into()));
        assert_eq!(backend.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(backend.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn blank_image_yields_sentinel_not_error() {
        let backend = ScriptedBackend::with_pages(vec![Ok("  \n ".into())]);
        let ex = extractor(Arc::new(BlankPages(0)), Arc::clone(&backend));
        let out = ex.extract_blocking(&png_bytes(), "image/png").unwrap();
        assert_eq!(out, Recognized::NoText);
        assert_eq!(decoded_text(&Ok(out)), crate::prompts::NO_TEXT_SENTINEL);
    }

    #[test]
    fn mid_pipeline_failure_releases_engine() {
        let backend = ScriptedBackend::with_pages(vec![
            Ok("page one".into()),
            Err(ExtractionError::RecognitionFailure("engine crashed".into())),
            Ok("page three".into()),
        ]);
        let ex = extractor(Arc::new(BlankPages(3)), Arc::clone(&backend));
        let out = ex.extract_blocking(b"%PDF", "application/pdf");
        assert!(matches!(out, Err(ExtractionError::RecognitionFailure(_))));
        assert_eq!(
            backend.acquired.load(Ordering::SeqCst),
            backend.released.load(Ordering::SeqCst)
        );
        assert_eq!(decoded_text(&out), DECODE_ERROR_SENTINEL);
    }

    #[test]
    fn render_failure_releases_engine() {
        let backend = ScriptedBackend::with_pages(vec![]);
        let ex = extractor(Arc::new(BrokenRenderer), Arc::clone(&backend));
        let out = ex.extract_blocking(b"%PDF", "application/pdf");
        assert!(matches!(out, Err(ExtractionError::RenderFailure(_))));
        assert_eq!(backend.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(backend.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn undecodable_image_is_render_failure() {
        let backend = ScriptedBackend::with_pages(vec![]);
        let ex = extractor(Arc::new(BlankPages(0)), Arc::clone(&backend));
        let out = ex.extract_blocking(b"not a jpeg", "image/jpeg");
        assert!(matches!(out, Err(ExtractionError::RenderFailure(_))));
        assert_eq!(backend.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn async_extract_runs_on_blocking_pool() {
        let backend = ScriptedBackend::with_pages(vec![Ok("Hello World".into())]);
        let ex = extractor(Arc::new(BlankPages(0)), Arc::clone(&backend));
        let blob = FileBlob::new("hello.png", "image/png", png_bytes());
        let out = ex.extract(blob).await.unwrap();
        assert_eq!(out, Recognized::Text("Hello World".into()));
        assert_eq!(backend.released.load(Ordering::SeqCst), 1);
    }
}
