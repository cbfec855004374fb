//! Error types for the edgequake-intake library.
//!
//! Each failure family gets its own type because each one is handled at a
//! different boundary:
//!
//! * [`IntakeError`]: **fatal**. The coordinator cannot be built, the store
//!   cannot be read, or an attached path cannot be loaded. Returned from
//!   constructors and loaders only.
//!
//! * [`ExtractionError`]: a document or image could not be turned into text.
//!   Never crosses the coordinator boundary: it is mapped to the
//!   `"Error decoding file."` sentinel and shown as decoded text.
//!
//! * [`TransportError`]: the chat backend failed. Logged with its raw detail,
//!   replaced in the conversation by a fixed apology.
//!
//! * [`SpeechError`]: the host has no speech capability, or capture or
//!   transcription failed.
//!
//! * [`ValidationError`]: user input rejected before any network call.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors returned by the edgequake-intake library.
#[derive(Debug, Error)]
pub enum IntakeError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Input errors ──────────────────────────────────────────────────────
    /// Attached file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Attached file exists but could not be read.
    #[error("Failed to read '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Store errors ──────────────────────────────────────────────────────
    /// The conversation log file could not be read or written.
    #[error("Conversation store I/O failed for '{path}': {source}")]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The conversation log file exists but is not valid JSON.
    #[error(
        "Conversation store '{path}' is corrupt: {detail}\n\
         Delete the file or run /clear to start over."
    )]
    StoreCorrupt { path: PathBuf, detail: String },

    // ── Backend errors ────────────────────────────────────────────────────
    /// No LLM provider could be created for the in-process chat backend.
    #[error("LLM provider '{provider}' is not configured: {hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A document or image could not be converted to text.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ExtractionError {
    /// Media type is outside the accepted allow-list. Raised before any I/O.
    #[error("Unsupported media type '{media_type}' (accepted: PDF, PNG, JPEG, GIF)")]
    Unsupported { media_type: String },

    /// A page or image surface could not be produced.
    #[error("Rendering failed: {0}")]
    RenderFailure(String),

    /// The recognition engine could not be started or failed on a page.
    #[error("Recognition failed: {0}")]
    RecognitionFailure(String),
}

/// The chat backend did not return a usable reply.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The request never produced a response (connection refused, timeout, …).
    #[error("Chat request failed: {0}")]
    Request(String),

    /// The backend answered with a non-2xx status.
    #[error("Chat backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The body was not JSON or lacked the `response` field.
    #[error("Malformed chat response: {0}")]
    Malformed(String),
}

/// Speech capture errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpeechError {
    /// The host has no speech-recognition capability.
    #[error("Speech recognition is not supported on this host")]
    UnsupportedCapability,

    /// The audio device could not be opened, started or stopped.
    #[error("Speech capture failed: {0}")]
    CaptureFailed(String),

    /// The recorded utterance could not be turned into text.
    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),
}

/// Input rejected by [`crate::coordinator::InputCoordinator::submit`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Nothing left after trimming.
    #[error("Message is empty")]
    Empty,

    /// Longer than the configured character ceiling.
    #[error("Message is {len} characters long (limit {max})")]
    Oversize { len: usize, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_display_names_type() {
        let e = ExtractionError::Unsupported {
            media_type: "text/plain".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("text/plain"), "got: {msg}");
        assert!(msg.contains("PDF"));
    }

    #[test]
    fn status_display_includes_code() {
        let e = TransportError::Status {
            status: 502,
            body: "bad gateway".into(),
        };
        assert!(e.to_string().contains("502"));
        assert!(e.to_string().contains("bad gateway"));
    }

    #[test]
    fn oversize_display() {
        let e = ValidationError::Oversize { len: 5001, max: 4000 };
        assert!(e.to_string().contains("5001"));
        assert!(e.to_string().contains("4000"));
    }

    #[test]
    fn store_io_keeps_source() {
        use std::error::Error as _;
        let e = IntakeError::StoreIo {
            path: PathBuf::from("/tmp/chat-messages.json"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(e.source().is_some());
        assert!(e.to_string().contains("chat-messages.json"));
    }
}
