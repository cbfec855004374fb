//! Speech Transcription Session: one continuous capture, one utterance.
//!
//! ```text
//!            start()                     stop() / engine end
//!   Idle ─────────────▶ Listening ───────────────────────────▶ Idle
//!                          │
//!                 CaptureEvent::Result ──▶ interim text (replace)
//!                          │                 + finalized segment (append, if final)
//! ```
//!
//! A [`SpeechBackend`] is the host's speech capability. Each Listening period
//! holds exactly one [`Capture`] (the engine handle); it is dropped the
//! moment the session returns to Idle. The session turns the capture's raw
//! event stream into [`SessionEvent`]s for exactly one consumer, the
//! coordinator, ending every Listening period with exactly one
//! [`SessionEvent::Ended`].
//!
//! The session only reports. Deciding what to do with an empty utterance is
//! the caller's job.
//!
//! Backends:
//!
//! * [`RecordingSpeechBackend`]: records from an [`AudioSource`] and uploads
//!   the utterance to a [`Transcriber`] when the session stops. The
//!   `microphone` feature adds a cpal-backed source.
//! * [`ChannelSpeechBackend`]: a platform recogniser pushes results through a
//!   [`SpeechFeed`].
//! * [`UnsupportedSpeechBackend`]: the host has no speech capability.

#[cfg(feature = "microphone")]
pub mod microphone;
pub mod recording;
pub mod transcribe;

pub use recording::{AudioSource, Recording, RecordingSpeechBackend};
pub use transcribe::{CapturedAudio, HttpTranscriber, Transcriber};

use crate::error::SpeechError;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

/// Raw event produced by a speech engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Newest recognised fragment. `is_final` fragments are accumulated.
    Result { transcript: String, is_final: bool },
    /// The engine stopped (requested, or on its own after silence).
    End,
}

/// Stops a running engine. After `stop` the capture's event stream must
/// terminate (with or without a trailing [`CaptureEvent::End`]).
pub trait CaptureControl: Send {
    fn stop(&mut self);
}

/// Exclusive handle on a running speech engine.
pub struct Capture {
    events: BoxStream<'static, CaptureEvent>,
    control: Box<dyn CaptureControl>,
}

impl Capture {
    pub fn new(
        events: impl Stream<Item = CaptureEvent> + Send + 'static,
        control: impl CaptureControl + 'static,
    ) -> Self {
        Self {
            events: events.boxed(),
            control: Box::new(control),
        }
    }
}

/// The host's speech-recognition capability.
pub trait SpeechBackend: Send + Sync {
    /// Whether the host can recognise speech at all.
    fn is_supported(&self) -> bool;

    /// Start an engine for `language`.
    fn begin(&self, language: &str) -> Result<Capture, SpeechError>;
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
}

/// What the session reports to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The live interim text changed to this value.
    Interim(String),
    /// The Listening period is over; read [`TranscriptionSession::accumulated_text`].
    Ended,
}

/// One conversation's speech session.
pub struct TranscriptionSession {
    backend: Arc<dyn SpeechBackend>,
    language: String,
    state: SessionState,
    capture: Option<Capture>,
    segments: Vec<String>,
    interim: Option<String>,
    pending: VecDeque<SessionEvent>,
}

impl std::fmt::Debug for TranscriptionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscriptionSession")
            .field("language", &self.language)
            .field("state", &self.state)
            .field("segments", &self.segments)
            .field("interim", &self.interim)
            .finish()
    }
}

impl TranscriptionSession {
    /// Create a session. Fails with [`SpeechError::UnsupportedCapability`]
    /// when the backend has no speech capability.
    pub fn new(
        backend: Arc<dyn SpeechBackend>,
        language: impl Into<String>,
    ) -> Result<Self, SpeechError> {
        if !backend.is_supported() {
            return Err(SpeechError::UnsupportedCapability);
        }
        Ok(Self {
            backend,
            language: language.into(),
            state: SessionState::Idle,
            capture: None,
            segments: Vec::new(),
            interim: None,
            pending: VecDeque::new(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_listening(&self) -> bool {
        self.state == SessionState::Listening
    }

    /// Begin listening. A no-op while already Listening.
    pub fn start(&mut self) -> Result<(), SpeechError> {
        if self.is_listening() {
            debug!("Speech session already listening; start ignored");
            return Ok(());
        }
        let capture = self.backend.begin(&self.language)?;
        self.capture = Some(capture);
        self.segments.clear();
        self.interim = None;
        self.pending.clear();
        self.state = SessionState::Listening;
        info!("Speech session listening ({})", self.language);
        Ok(())
    }

    /// Stop listening. Buffered results are applied in order, the engine is
    /// released and one [`SessionEvent::Ended`] is queued for
    /// [`Self::next_event`]. A no-op while Idle.
    pub async fn stop(&mut self) {
        let Some(mut capture) = self.capture.take() else {
            return;
        };
        capture.control.stop();
        while let Some(event) = capture.events.next().await {
            match event {
                CaptureEvent::Result { transcript, is_final } => {
                    let ev = self.apply_result(transcript, is_final);
                    self.pending.push_back(ev);
                }
                CaptureEvent::End => break,
            }
        }
        drop(capture);
        self.finish();
        self.pending.push_back(SessionEvent::Ended);
    }

    /// Next event for the consumer, in capture order. `None` once Idle and
    /// every queued event has been delivered.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        if let Some(ev) = self.pending.pop_front() {
            return Some(ev);
        }
        let capture = self.capture.as_mut()?;
        match capture.events.next().await {
            Some(CaptureEvent::Result { transcript, is_final }) => {
                Some(self.apply_result(transcript, is_final))
            }
            Some(CaptureEvent::End) | None => {
                self.capture = None;
                self.finish();
                Some(SessionEvent::Ended)
            }
        }
    }

    /// The live, replace-only interim text.
    pub fn interim_text(&self) -> Option<&str> {
        self.interim.as_deref()
    }

    /// Finalized segments of the current (or last) Listening period, joined
    /// with single spaces and trimmed. Empty if nothing was captured.
    pub fn accumulated_text(&self) -> String {
        self.segments.join(" ").trim().to_string()
    }

    fn apply_result(&mut self, transcript: String, is_final: bool) -> SessionEvent {
        if is_final {
            let segment = transcript.trim();
            if !segment.is_empty() {
                self.segments.push(segment.to_string());
            }
        }
        self.interim = Some(transcript.clone());
        SessionEvent::Interim(transcript)
    }

    fn finish(&mut self) {
        self.state = SessionState::Idle;
        self.interim = None;
        info!(
            "Speech session ended: {} segment(s), {} chars",
            self.segments.len(),
            self.accumulated_text().len()
        );
    }
}

// ── Backends ─────────────────────────────────────────────────────────────

/// Backend for hosts without any speech capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedSpeechBackend;

impl SpeechBackend for UnsupportedSpeechBackend {
    fn is_supported(&self) -> bool {
        false
    }

    fn begin(&self, _language: &str) -> Result<Capture, SpeechError> {
        Err(SpeechError::UnsupportedCapability)
    }
}

type FeedSlot = Arc<Mutex<Option<mpsc::UnboundedSender<CaptureEvent>>>>;

/// Producer side of a [`ChannelSpeechBackend`]: a platform recogniser (a GUI
/// speech bridge, a local whisper worker) pushes its results here.
#[derive(Clone, Default)]
pub struct SpeechFeed {
    slot: FeedSlot,
}

impl SpeechFeed {
    /// Deliver a result to the open capture. Returns false if none is open.
    pub fn push_result(&self, transcript: impl Into<String>, is_final: bool) -> bool {
        self.send(CaptureEvent::Result {
            transcript: transcript.into(),
            is_final,
        })
    }

    /// End the open capture from the engine side.
    pub fn end(&self) {
        if let Some(tx) = lock(&self.slot).take() {
            let _ = tx.send(CaptureEvent::End);
        }
    }

    pub fn is_open(&self) -> bool {
        lock(&self.slot).is_some()
    }

    fn send(&self, event: CaptureEvent) -> bool {
        match lock(&self.slot).as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

/// Speech backend fed through a [`SpeechFeed`].
#[derive(Clone)]
pub struct ChannelSpeechBackend {
    slot: FeedSlot,
}

impl ChannelSpeechBackend {
    pub fn new() -> (Self, SpeechFeed) {
        let feed = SpeechFeed::default();
        (
            Self {
                slot: Arc::clone(&feed.slot),
            },
            feed,
        )
    }
}

impl SpeechBackend for ChannelSpeechBackend {
    fn is_supported(&self) -> bool {
        true
    }

    fn begin(&self, language: &str) -> Result<Capture, SpeechError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.slot) = Some(tx);
        debug!("Channel speech capture opened ({})", language);
        Ok(Capture::new(
            UnboundedReceiverStream::new(rx),
            ChannelControl {
                slot: Arc::clone(&self.slot),
            },
        ))
    }
}

struct ChannelControl {
    slot: FeedSlot,
}

impl CaptureControl for ChannelControl {
    fn stop(&mut self) {
        // Dropping the sender terminates the stream after End.
        if let Some(tx) = lock(&self.slot).take() {
            let _ = tx.send(CaptureEvent::End);
        }
    }
}

type FeedGuard<'a> = std::sync::MutexGuard<'a, Option<mpsc::UnboundedSender<CaptureEvent>>>;

fn lock(slot: &FeedSlot) -> FeedGuard<'_> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
