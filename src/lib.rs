//! # edgequake-intake
//!
//! Turn uploaded documents, images and live speech into chat input.
//!
//! Users rarely type everything they want to ask about. They drop in a
//! scanned PDF, a screenshot, or just talk. This crate normalises all three
//! into plain text and feeds it through one serialised chat channel with
//! per-request timing, keeping the conversation log consistent while decodes
//! and speech capture finish at unpredictable times.
//!
//! ## Pipeline Overview
//!
//! ```text
//! file / image / speech / text
//!  │
//!  ├─ 1. Input     allow-listed media type, magic-byte sniffing
//!  ├─ 2. Render    first pages via pdfium at 2× (CPU-bound, spawn_blocking)
//!  ├─ 3. Recognise Tesseract per surface, engine released on every path
//!  ├─ 4. Normalise whitespace collapse, "no text" sentinel
//!  ├─ 5. Submit    validation, oversize notice, one user message
//!  └─ 6. Dispatch  /chat or in-process LLM, busy flag, metrics sample
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_intake::{
//!     Collaborators, DocumentExtractor, FileBlob, HttpChatBackend, InputCoordinator,
//!     IntakeConfig, JsonFileStore, MessageKind, UnsupportedSpeechBackend,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = IntakeConfig::default();
//!     let collaborators = Collaborators::new(
//!         Arc::new(HttpChatBackend::new(&config)?),
//!         Arc::new(JsonFileStore::at_dir(".intake")),
//!         DocumentExtractor::from_config(&config),
//!         Arc::new(UnsupportedSpeechBackend),
//!     );
//!     let mut chat = InputCoordinator::open(config, collaborators)?;
//!
//!     chat.submit("What is pdfium?", MessageKind::UserText).await.ok();
//!     chat.attach_file(FileBlob::from_path("scan.pdf")?).await;
//!
//!     for message in chat.messages() {
//!         println!("{} {:?}: {:?}", message.id, message.kind, message.as_text());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | The `intake` binary (clap, anyhow, indicatif, tracing-subscriber) |
//! | `microphone` | off | [`speech::microphone::MicrophoneSource`] via cpal |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-intake = { version = "0.1", default-features = false }
//! ```
//!
//! ## Native Requirements
//!
//! | Capability | Needs |
//! |------------|-------|
//! | PDF pages  | a pdfium shared library (`PDFIUM_LIB_PATH` or the system path) |
//! | OCR        | the `tesseract` executable and its language data |
//! | Speech     | an input device (`microphone`) and a `/audio/transcriptions` API, |
//! |            | or a platform recogniser pushing into a [`SpeechFeed`] |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod coordinator;
pub mod error;
pub mod message;
pub mod metrics;
pub mod observer;
pub mod pipeline;
pub mod prompts;
pub mod speech;
pub mod store;
pub mod transport;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{IntakeConfig, IntakeConfigBuilder};
pub use coordinator::{Collaborators, InputCoordinator, PendingDecode};
pub use error::{ExtractionError, IntakeError, SpeechError, TransportError, ValidationError};
pub use message::{
    ConversationLog, DecodingStatus, FileRef, Message, MessageContent, MessageId, MessageKind,
};
pub use metrics::{MetricSample, MetricsRecorder, MetricsSummary};
pub use observer::{ConversationObserver, NoopObserver};
pub use pipeline::extract::DocumentExtractor;
pub use pipeline::input::{FileBlob, MediaType};
pub use pipeline::postprocess::Recognized;
pub use speech::{
    AudioSource, CapturedAudio, ChannelSpeechBackend, HttpTranscriber, Recording,
    RecordingSpeechBackend, SessionEvent, SessionState, SpeechBackend, SpeechFeed, Transcriber,
    TranscriptionSession, UnsupportedSpeechBackend,
};
pub use store::{ConversationStore, JsonFileStore, MemoryStore};
pub use transport::{ChatBackend, ChatReply, HttpChatBackend, LlmChatBackend};
