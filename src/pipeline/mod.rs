//! Pipeline stages of the Document Text Extractor.
//!
//! Each submodule implements one transformation step, so each can be tested
//! on its own and the native engines (pdfium, Tesseract) can be swapped
//! behind their traits without touching the other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ ocr ──▶ postprocess
//! (blob)    (pdfium)   (PNG)     (tess)   (normalise)
//! ```
//!
//! 1. [`input`]  : the uploaded bytes and their allow-listed media type
//! 2. [`render`] : rasterise the first pages of a PDF at a fixed upscale
//! 3. [`encode`] : PNG-encode surfaces for the engine; `data:` previews
//! 4. [`ocr`]    : scoped recognition-engine handles
//! 5. [`postprocess`] : whitespace normalisation and the no-text outcome
//!
//! [`extract`] drives the stages and owns the resource discipline.

pub mod encode;
pub mod extract;
pub mod input;
pub mod ocr;
pub mod postprocess;
pub mod render;
