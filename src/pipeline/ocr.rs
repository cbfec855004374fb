//! Optical recognition engines and their scoped lifetime.
//!
//! An engine handle is acquired once per extraction call and wrapped in an
//! [`EngineLease`]. The lease's `Drop` terminates the engine, so the handle is
//! released exactly once whichever way the call exits: normal return, early
//! `?` on a failed page, or a panic unwinding through the blocking task.
//!
//! The shipped engine drives the `tesseract` command-line tool. Each lease
//! owns a private temporary directory for the page surfaces it is given;
//! terminating the engine removes it.

use crate::error::ExtractionError;
use crate::pipeline::encode::encode_png;
use image::DynamicImage;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;
use tracing::{debug, warn};

/// Tesseract page segmentation mode 3: fully automatic, no OSD.
const TESSERACT_PAGE_SEGMENT_MODE: &str = "3";
const TESSERACT_OUTPUT_TARGET: &str = "stdout";

/// Factory for recognition engine handles.
pub trait RecognitionBackend: Send + Sync {
    /// Start a fresh engine for one extraction call.
    fn acquire(&self) -> Result<Box<dyn Recognizer>, ExtractionError>;
}

/// A live recognition engine.
pub trait Recognizer: Send {
    /// Recognise the text on one surface.
    fn recognize(&mut self, image: &DynamicImage) -> Result<String, ExtractionError>;

    /// Release every resource held by the engine. Called exactly once, by
    /// [`EngineLease`].
    fn terminate(&mut self);
}

/// Scoped ownership of a [`Recognizer`].
pub struct EngineLease {
    engine: Box<dyn Recognizer>,
}

impl EngineLease {
    /// Acquire an engine from `backend`; the returned lease terminates it on drop.
    pub fn acquire(backend: &dyn RecognitionBackend) -> Result<Self, ExtractionError> {
        let engine = backend.acquire()?;
        Ok(Self { engine })
    }
}

impl Deref for EngineLease {
    type Target = dyn Recognizer;

    fn deref(&self) -> &Self::Target {
        self.engine.as_ref()
    }
}

impl DerefMut for EngineLease {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.engine.as_mut()
    }
}

impl Drop for EngineLease {
    fn drop(&mut self) {
        self.engine.terminate();
    }
}

/// `tesseract` CLI backend.
#[derive(Debug, Clone)]
pub struct TesseractBackend {
    executable: PathBuf,
    language: String,
}

impl TesseractBackend {
    pub fn new(executable: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        Self {
            executable: executable.into(),
            language: language.into(),
        }
    }
}

impl Default for TesseractBackend {
    fn default() -> Self {
        Self::new("tesseract", "eng")
    }
}

impl RecognitionBackend for TesseractBackend {
    fn acquire(&self) -> Result<Box<dyn Recognizer>, ExtractionError> {
        let workdir = tempfile::Builder::new()
            .prefix("intake-ocr-")
            .tempdir()
            .map_err(|e| ExtractionError::RecognitionFailure(format!("scratch dir: {e}")))?;
        debug!("Tesseract engine acquired ({})", workdir.path().display());

        Ok(Box::new(TesseractEngine {
            executable: self.executable.clone(),
            language: self.language.clone(),
            workdir: Some(workdir),
            pages_seen: 0,
        }))
    }
}

struct TesseractEngine {
    executable: PathBuf,
    language: String,
    workdir: Option<TempDir>,
    pages_seen: usize,
}

impl Recognizer for TesseractEngine {
    fn recognize(&mut self, image: &DynamicImage) -> Result<String, ExtractionError> {
        let workdir = self
            .workdir
            .as_ref()
            .ok_or_else(|| {
                ExtractionError::RecognitionFailure("engine already terminated".into())
            })?;

        self.pages_seen += 1;
        let surface = workdir.path().join(format!("page-{}.png", self.pages_seen));
        let png = encode_png(image)
            .map_err(|e| ExtractionError::RecognitionFailure(format!("PNG encoding: {e}")))?;
        std::fs::write(&surface, png)
            .map_err(|e| ExtractionError::RecognitionFailure(format!("write surface: {e}")))?;

        let output = Command::new(&self.executable)
            .arg(&surface)
            .arg(TESSERACT_OUTPUT_TARGET)
            .args(["-l", &self.language, "--psm", TESSERACT_PAGE_SEGMENT_MODE])
            .output()
            .map_err(|e| {
                ExtractionError::RecognitionFailure(format!(
                    "failed to run {}: {e}",
                    self.executable.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::RecognitionFailure(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| ExtractionError::RecognitionFailure(format!("non-UTF-8 output: {e}")))
    }

    fn terminate(&mut self) {
        if let Some(dir) = self.workdir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!("Failed to remove OCR scratch dir {}: {}", path.display(), e);
            } else {
                debug!("Tesseract engine released ({})", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        released: Arc<AtomicUsize>,
    }

    impl Recognizer for Counting {
        fn recognize(&mut self, _image: &DynamicImage) -> Result<String, ExtractionError> {
            Err(ExtractionError::RecognitionFailure("boom".into()))
        }

        fn terminate(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingBackend {
        released: Arc<AtomicUsize>,
    }

    impl RecognitionBackend for CountingBackend {
        fn acquire(&self) -> Result<Box<dyn Recognizer>, ExtractionError> {
            Ok(Box::new(Counting {
                released: Arc::clone(&self.released),
            }))
        }
    }

    fn blank() -> DynamicImage {
        DynamicImage::new_rgb8(4, 4)
    }

    #[test]
    fn lease_terminates_once_on_error_path() {
        let released = Arc::new(AtomicUsize::new(0));
        let backend = CountingBackend {
            released: Arc::clone(&released),
        };
        let run = || -> Result<String, ExtractionError> {
            let mut lease = EngineLease::acquire(&backend)?;
            lease.recognize(&blank())
        };
        assert!(run().is_err());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn tesseract_terminate_removes_workdir() {
        let backend = TesseractBackend::default();
        let mut engine = backend.acquire().unwrap();
        engine.terminate();
        // second call is a no-op
        engine.terminate();
        let err = engine.recognize(&blank()).unwrap_err();
        assert!(err.to_string().contains("terminated"));
    }

    #[test]
    fn missing_executable_is_recognition_failure() {
        let backend = TesseractBackend::new("/nonexistent/tesseract-binary", "eng");
        let mut lease = EngineLease::acquire(&backend).unwrap();
        let err = lease.recognize(&blank()).unwrap_err();
        assert!(matches!(err, ExtractionError::RecognitionFailure(_)));
    }
}
