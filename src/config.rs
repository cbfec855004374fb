//! Configuration for the intake pipeline.
//!
//! Every tunable lives in [`IntakeConfig`], built via its
//! [`IntakeConfigBuilder`]. The extractor, the speech session, the metrics
//! recorder and the coordinator all read from the same struct, so one value
//! can be logged or diffed to explain a run.

use crate::error::IntakeError;
use std::path::PathBuf;

/// Configuration for an [`crate::coordinator::InputCoordinator`] and the
/// components it drives.
///
/// # Example
/// ```rust
/// use edgequake_intake::IntakeConfig;
///
/// let config = IntakeConfig::builder()
///     .chat_endpoint("http://localhost:8000")
///     .max_pages(2)
///     .metrics_enabled(true)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_pages, 2);
/// ```
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Base URL of the chat backend; requests go to `{chat_endpoint}/chat`.
    /// Default: `http://127.0.0.1:8000`.
    pub chat_endpoint: String,

    /// Transport-level timeout for one chat request, in seconds. Default: 60.
    ///
    /// This is the only timeout on dispatch; the coordinator itself never
    /// cancels an in-flight request.
    pub request_timeout_secs: u64,

    /// Character ceiling for one submitted message. Default: 4000.
    pub max_input_chars: usize,

    /// Replies shorter than this (after trimming) are treated as a degenerate
    /// generation and replaced by the retry prompt. Default: 2.
    pub min_reply_chars: usize,

    /// Maximum number of PDF pages rendered and recognised per file. Default: 3.
    pub max_pages: usize,

    /// Upscale factor applied when rasterising PDF pages. Default: 2.0.
    ///
    /// Tesseract is most accurate with glyphs around 30 px tall; at 72 pt/in
    /// a 2× render of body text lands close to that.
    pub render_scale: f32,

    /// Cap on the longest edge of a rendered page, in pixels. Default: 4000.
    /// Clamped to `100..=16384`.
    pub max_rendered_pixels: u32,

    /// Inserted between page texts before normalisation. Default: `"\n\n"`.
    pub page_separator: String,

    /// Tesseract language code. Default: `eng`.
    pub ocr_language: String,

    /// Tesseract executable. Default: `tesseract` (looked up on `PATH`).
    pub tesseract_path: PathBuf,

    /// Explicit pdfium shared library. If None, the system library is used.
    pub pdfium_library: Option<PathBuf>,

    /// BCP-47 tag handed to the speech engine. Default: `en-US`.
    pub speech_language: String,

    /// Base URL of an OpenAI-compatible transcription API; recordings go to
    /// `{stt_endpoint}/audio/transcriptions`. Default: `https://api.openai.com/v1`.
    pub stt_endpoint: String,

    /// Transcription model. Default: `whisper-1`.
    pub stt_model: String,

    /// Bearer token for the transcription API. Default: None.
    pub stt_api_key: Option<String>,

    /// Record a [`crate::metrics::MetricSample`] per dispatch. Default: false.
    pub metrics_enabled: bool,

    /// Ring capacity for metric samples. Default: 50.
    pub metrics_capacity: usize,

    /// Key under which the conversation log is persisted. Default: `chat-messages`.
    pub store_key: String,

    /// System prompt used by [`crate::transport::LlmChatBackend`]. Default: None.
    pub system_prompt: Option<String>,

    /// Sampling temperature used by [`crate::transport::LlmChatBackend`]. Default: 0.7.
    pub temperature: f32,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            chat_endpoint: "http://127.0.0.1:8000".to_string(),
            request_timeout_secs: 60,
            max_input_chars: 4000,
            min_reply_chars: 2,
            max_pages: 3,
            render_scale: 2.0,
            max_rendered_pixels: 4000,
            page_separator: "\n\n".to_string(),
            ocr_language: "eng".to_string(),
            tesseract_path: PathBuf::from("tesseract"),
            pdfium_library: None,
            speech_language: "en-US".to_string(),
            stt_endpoint: "https://api.openai.com/v1".to_string(),
            stt_model: "whisper-1".to_string(),
            stt_api_key: None,
            metrics_enabled: false,
            metrics_capacity: 50,
            store_key: "chat-messages".to_string(),
            system_prompt: None,
            temperature: 0.7,
        }
    }
}

impl IntakeConfig {
    /// Create a new builder for `IntakeConfig`.
    pub fn builder() -> IntakeConfigBuilder {
        IntakeConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`IntakeConfig`].
#[derive(Debug)]
pub struct IntakeConfigBuilder {
    config: IntakeConfig,
}

impl IntakeConfigBuilder {
    pub fn chat_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.chat_endpoint = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs.max(1);
        self
    }

    pub fn max_input_chars(mut self, n: usize) -> Self {
        self.config.max_input_chars = n;
        self
    }

    pub fn min_reply_chars(mut self, n: usize) -> Self {
        self.config.min_reply_chars = n;
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn render_scale(mut self, factor: f32) -> Self {
        self.config.render_scale = factor.clamp(0.5, 8.0);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.clamp(100, 16_384);
        self
    }

    pub fn page_separator(mut self, sep: impl Into<String>) -> Self {
        self.config.page_separator = sep.into();
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn tesseract_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tesseract_path = path.into();
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn speech_language(mut self, lang: impl Into<String>) -> Self {
        self.config.speech_language = lang.into();
        self
    }

    pub fn stt_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.stt_endpoint = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn stt_model(mut self, model: impl Into<String>) -> Self {
        self.config.stt_model = model.into();
        self
    }

    /// Blank keys are ignored.
    pub fn stt_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.config.stt_api_key = Some(key).filter(|k| !k.trim().is_empty());
        self
    }

    pub fn metrics_enabled(mut self, v: bool) -> Self {
        self.config.metrics_enabled = v;
        self
    }

    pub fn metrics_capacity(mut self, n: usize) -> Self {
        self.config.metrics_capacity = n;
        self
    }

    pub fn store_key(mut self, key: impl Into<String>) -> Self {
        self.config.store_key = key.into();
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<IntakeConfig, IntakeError> {
        let c = &self.config;
        if c.max_input_chars == 0 {
            return Err(IntakeError::InvalidConfig(
                "max_input_chars must be ≥ 1".into(),
            ));
        }
        if c.max_pages == 0 {
            return Err(IntakeError::InvalidConfig("max_pages must be ≥ 1".into()));
        }
        if c.metrics_capacity == 0 {
            return Err(IntakeError::InvalidConfig(
                "metrics_capacity must be ≥ 1".into(),
            ));
        }
        if c.store_key.is_empty()
            || !c
                .store_key
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err(IntakeError::InvalidConfig(format!(
                "store_key must be non-empty [A-Za-z0-9_-], got {:?}",
                c.store_key
            )));
        }
        for (name, url) in [
            ("chat_endpoint", &c.chat_endpoint),
            ("stt_endpoint", &c.stt_endpoint),
        ] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(IntakeError::InvalidConfig(format!(
                    "{name} must be an HTTP/HTTPS URL, got {url:?}"
                )));
            }
        }
        if c.stt_model.trim().is_empty() {
            return Err(IntakeError::InvalidConfig("stt_model must not be empty".into()));
        }
        Ok(self.config)
    }
}
