//! Input Coordinator: the single writer of the conversation log.
//!
//! ```text
//!  text ───────────────────────────────┐
//!  file ──▶ extractor (blocking pool) ──┼──▶ submit ──▶ dispatch ──▶ reply
//!  voice ─▶ transcription session ──────┘      │            │
//!                                         validation   busy flag + metrics
//! ```
//!
//! Every mutator takes `&mut self`, so at most one dispatch is ever in flight
//! and a second submission waits for the first reply (serialised). File
//! decodes run on the blocking pool while the coordinator stays usable; their
//! outcome is written back to the message found **by id**, since other
//! messages may have been appended in the meantime.
//!
//! Every log mutation is persisted through the [`ConversationStore`] and
//! reported to the [`ConversationObserver`]. Store failures are logged and
//! never interrupt the flow.

use crate::config::IntakeConfig;
use crate::error::{
    ExtractionError, IntakeError, SpeechError, TransportError, ValidationError,
};
use crate::message::{
    ConversationLog, DecodingStatus, Message, MessageContent, MessageId, MessageKind,
};
use crate::metrics::{MetricsRecorder, RequestId};
use crate::observer::{NoopObserver, SharedObserver};
use crate::pipeline::encode::preview_data_uri;
use crate::pipeline::extract::{decoded_text, DocumentExtractor};
use crate::pipeline::input::FileBlob;
use crate::pipeline::postprocess::Recognized;
use crate::prompts;
use crate::speech::{SessionEvent, SessionState, SpeechBackend, TranscriptionSession};
use crate::store::ConversationStore;
use crate::transport::{ChatBackend, ChatReply};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// External collaborators of a coordinator.
#[derive(Clone)]
pub struct Collaborators {
    pub backend: Arc<dyn ChatBackend>,
    pub store: Arc<dyn ConversationStore>,
    pub extractor: DocumentExtractor,
    pub speech: Arc<dyn SpeechBackend>,
    pub observer: SharedObserver,
}

impl Collaborators {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        store: Arc<dyn ConversationStore>,
        extractor: DocumentExtractor,
        speech: Arc<dyn SpeechBackend>,
    ) -> Self {
        Self {
            backend,
            store,
            extractor,
            speech,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: SharedObserver) -> Self {
        self.observer = observer;
        self
    }
}

/// A file decode started by [`InputCoordinator::begin_file`].
#[derive(Debug)]
pub struct PendingDecode {
    id: MessageId,
    task: JoinHandle<Result<Recognized, ExtractionError>>,
}

impl PendingDecode {
    /// Id of the file message this decode belongs to.
    pub fn id(&self) -> MessageId {
        self.id
    }
}

/// Owns one conversation.
pub struct InputCoordinator {
    config: IntakeConfig,
    backend: Arc<dyn ChatBackend>,
    store: Arc<dyn ConversationStore>,
    extractor: DocumentExtractor,
    speech: Arc<dyn SpeechBackend>,
    observer: SharedObserver,
    log: ConversationLog,
    busy: bool,
    voice: Option<TranscriptionSession>,
    files: HashMap<MessageId, FileBlob>,
    metrics: MetricsRecorder,
    next_request: RequestId,
}

impl std::fmt::Debug for InputCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputCoordinator")
            .field("messages", &self.log.len())
            .field("busy", &self.busy)
            .field("voice", &self.voice_state())
            .field("metrics", &self.metrics.len())
            .finish()
    }
}

impl InputCoordinator {
    /// Load the persisted log under `config.store_key` and take ownership of it.
    pub fn open(
        config: IntakeConfig,
        collaborators: Collaborators,
    ) -> Result<Self, IntakeError> {
        let mut messages = collaborators.store.load(&config.store_key)?;
        let settled = settle_interrupted_decodes(&mut messages);
        if settled > 0 {
            warn!(
                "{} file decode(s) were interrupted by a restart; marked failed",
                settled
            );
        }
        let log = ConversationLog::from_messages(messages);
        info!(
            "Conversation '{}' opened with {} message(s)",
            config.store_key,
            log.len()
        );

        let metrics = MetricsRecorder::new(config.metrics_enabled, config.metrics_capacity);
        Ok(Self {
            backend: collaborators.backend,
            store: collaborators.store,
            extractor: collaborators.extractor,
            speech: collaborators.speech,
            observer: collaborators.observer,
            log,
            busy: false,
            voice: None,
            files: HashMap::new(),
            metrics,
            next_request: 0,
            config,
        })
    }

    pub fn config(&self) -> &IntakeConfig {
        &self.config
    }

    // ── Read side ────────────────────────────────────────────────────────

    pub fn messages(&self) -> &[Message] {
        self.log.as_slice()
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.log.get(id)
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Thumbnail reference of a file message.
    pub fn preview(&self, id: MessageId) -> Option<&str> {
        self.log.get(id)?.preview.as_deref()
    }

    /// Bytes of a file attached in this process.
    pub fn file(&self, id: MessageId) -> Option<&FileBlob> {
        self.files.get(&id)
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut MetricsRecorder {
        &mut self.metrics
    }

    pub fn voice_state(&self) -> SessionState {
        self.voice
            .as_ref()
            .map_or(SessionState::Idle, TranscriptionSession::state)
    }

    // ── Text ─────────────────────────────────────────────────────────────

    /// Append a user message of `kind` and dispatch it.
    ///
    /// Empty input is rejected silently. Input over the character ceiling is
    /// rejected with one oversize notice in the log. Neither reaches the
    /// backend.
    ///
    /// Cancel safe in the same way as [`Self::dispatch`]: once the user
    /// message is appended it always gets a reply.
    pub async fn submit(
        &mut self,
        content: &str,
        kind: MessageKind,
    ) -> Result<(), ValidationError> {
        let text = self.validate(content)?;
        let id = self.log.allocate_id();
        self.append(Message::text(id, kind, text.as_str()));
        self.dispatch(&text).await;
        Ok(())
    }

    /// Send `content` to the backend and append the reply.
    ///
    /// Transport failures become the fixed apology; a reply shorter than
    /// `min_reply_chars` becomes the retry prompt. The busy flag is set for
    /// the duration of the call and always cleared before returning.
    ///
    /// # Cancel safety
    ///
    /// Dropping the future while the backend call is pending abandons the
    /// request: its metric start is discarded, the apology is appended and
    /// the busy flag is cleared.
    pub async fn dispatch(&mut self, content: &str) {
        let backend = Arc::clone(&self.backend);
        let guard = DispatchGuard::begin(self);
        let outcome = backend.send(content).await;
        guard.finish(outcome);
    }

    fn reply_text(
        &mut self,
        request: RequestId,
        outcome: Result<ChatReply, TransportError>,
    ) -> String {
        match outcome {
            Ok(reply) => {
                self.metrics.complete(
                    request,
                    &reply.response,
                    reply.model.as_deref(),
                    reply.inference_time,
                );
                let length = reply.response.trim().chars().count();
                if length < self.config.min_reply_chars {
                    warn!(
                        "Degenerate reply ({} chars, minimum {}); asking the user to retry",
                        length, self.config.min_reply_chars
                    );
                    prompts::RETRY_PROMPT_REPLY.to_string()
                } else {
                    reply.response
                }
            }
            Err(e) => {
                error!("Chat dispatch failed: {}", e);
                self.metrics.abandon(request);
                prompts::APOLOGY_REPLY.to_string()
            }
        }
    }

    fn settle_dispatch(&mut self, reply_text: String) {
        let id = self.log.allocate_id();
        self.append(Message::bot(id, reply_text));
        if let Some(reply) = self.log.get(id) {
            self.observer.on_reply(reply);
        }
        self.set_busy(false);
    }

    // ── Files ────────────────────────────────────────────────────────────

    /// Decode `blob` and, if text came out, submit the file prompt.
    pub async fn attach_file(&mut self, blob: FileBlob) -> MessageId {
        let pending = self.begin_file(blob);
        let id = pending.id();
        self.finish_file(pending).await;
        id
    }

    /// Append a Pending file message and start decoding in the background.
    ///
    /// # Panics
    ///
    /// Spawns onto the current Tokio runtime, so it panics when called
    /// outside one.
    pub fn begin_file(&mut self, blob: FileBlob) -> PendingDecode {
        let id = self.log.allocate_id();
        let preview = preview_data_uri(&blob);
        self.append(Message::file(id, blob.file_ref(), Some(preview)));
        self.files.insert(id, blob.clone());

        self.update(id, |m| {
            m.advance_decoding(DecodingStatus::Running);
        });
        info!(
            "Decoding {} ({}, {} bytes) as {}",
            blob.name,
            blob.media_type,
            blob.len(),
            id
        );

        let extractor = self.extractor.clone();
        let task = tokio::spawn(async move { extractor.extract(blob).await });
        PendingDecode { id, task }
    }

    /// Apply a finished decode to its message and auto-submit its text.
    pub async fn finish_file(&mut self, pending: PendingDecode) {
        let PendingDecode { id, task } = pending;
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(ExtractionError::RecognitionFailure(format!(
                "extraction task failed: {e}"
            ))),
        };
        if let Err(e) = &outcome {
            warn!("Decoding {} failed: {}", id, e);
        }

        let decoded = decoded_text(&outcome);
        let status = if outcome.is_ok() {
            DecodingStatus::Completed
        } else {
            DecodingStatus::Failed
        };

        let found = self.update(id, |m| {
            if m.advance_decoding(status) {
                m.decoded = Some(decoded.clone());
            }
        });
        if !found {
            debug!("File message {} is gone; decode result dropped", id);
            return;
        }

        if prompts::is_sentinel(&decoded) {
            return;
        }
        let prompt = prompts::file_prompt(&decoded);
        if let Err(e) = self.submit(&prompt, MessageKind::UserText).await {
            debug!("File prompt for {} not sent: {}", id, e);
        }
    }

    // ── Voice ────────────────────────────────────────────────────────────

    /// Start listening, or end the current utterance if already listening.
    /// The session is created on first use.
    pub async fn toggle_voice(&mut self) -> Result<SessionState, SpeechError> {
        if self.voice_state() == SessionState::Listening {
            self.stop_voice().await;
            return Ok(SessionState::Idle);
        }

        let session = match self.voice.take() {
            Some(session) => session,
            None => TranscriptionSession::new(
                Arc::clone(&self.speech),
                self.config.speech_language.as_str(),
            )?,
        };
        self.voice.insert(session).start()?;
        Ok(SessionState::Listening)
    }

    /// Wait for the next session event and apply it to the log. `None` when
    /// there is no session or it has nothing more to report.
    ///
    /// Safe to race against other input in `tokio::select!`: a cancelled wait
    /// loses no event, and a cancelled dispatch is settled as in
    /// [`Self::dispatch`].
    pub async fn pump_voice(&mut self) -> Option<SessionEvent> {
        let event = self.voice.as_mut()?.next_event().await?;
        self.apply_voice_event(&event).await;
        Some(event)
    }

    /// End the utterance and apply everything the session still reports.
    pub async fn stop_voice(&mut self) {
        let Some(session) = self.voice.as_mut() else {
            return;
        };
        session.stop().await;
        while self.pump_voice().await.is_some() {}
    }

    async fn apply_voice_event(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Interim(text) => {
                let interim = self.log.interim().map(|m| m.id);
                match interim {
                    Some(id) => {
                        self.update(id, |m| m.content = MessageContent::Text(text.clone()));
                    }
                    None => {
                        let id = self.log.allocate_id();
                        self.append(Message::interim_audio(id, text.as_str()));
                    }
                }
            }
            SessionEvent::Ended => {
                let text = self
                    .voice
                    .as_ref()
                    .map(TranscriptionSession::accumulated_text)
                    .unwrap_or_default();
                self.finish_utterance(&text).await;
            }
        }
    }

    async fn finish_utterance(&mut self, text: &str) {
        let interim = self.log.interim().map(|m| m.id);
        let validated = if text.trim().is_empty() {
            Err(ValidationError::Empty)
        } else {
            self.validate(text)
        };

        let text = match validated {
            Ok(text) => text,
            Err(e) => {
                debug!("Utterance dropped: {}", e);
                if let Some(id) = interim {
                    self.remove(id);
                }
                return;
            }
        };

        match interim {
            Some(id) => {
                self.update(id, |m| {
                    m.content = MessageContent::Text(text.clone());
                    m.interim = false;
                });
            }
            None => {
                let id = self.log.allocate_id();
                self.append(Message::text(id, MessageKind::UserAudio, text.as_str()));
            }
        }
        self.dispatch(&text).await;
    }

    // ── Log housekeeping ─────────────────────────────────────────────────

    /// Empty the log and the stored copy. Ids keep counting.
    pub fn clear(&mut self) {
        self.log.clear();
        self.files.clear();
        if let Err(e) = self.store.clear(&self.config.store_key) {
            warn!("Failed to clear stored conversation: {}", e);
        }
        self.observer.on_cleared();
        info!("Conversation '{}' cleared", self.config.store_key);
    }

    fn validate(&mut self, content: &str) -> Result<String, ValidationError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::Empty);
        }
        let len = trimmed.chars().count();
        let max = self.config.max_input_chars;
        if len > max {
            info!("Rejected {} char message (limit {})", len, max);
            let id = self.log.allocate_id();
            self.append(Message::bot(id, prompts::oversize_notice(len, max)));
            return Err(ValidationError::Oversize { len, max });
        }
        Ok(trimmed.to_string())
    }

    fn append(&mut self, message: Message) {
        let id = message.id;
        self.log.push(message);
        if let Some(m) = self.log.get(id) {
            self.observer.on_message_appended(m);
        }
        self.persist();
    }

    /// Mutate the message `id` in place. Returns false if it no longer exists.
    fn update(&mut self, id: MessageId, f: impl FnOnce(&mut Message)) -> bool {
        let Some(message) = self.log.get_mut(id) else {
            return false;
        };
        f(message);
        self.observer.on_message_updated(message);
        self.persist();
        true
    }

    fn remove(&mut self, id: MessageId) {
        if self.log.remove(id).is_some() {
            self.files.remove(&id);
            self.observer.on_message_removed(id);
            self.persist();
        }
    }

    fn set_busy(&mut self, busy: bool) {
        if self.busy != busy {
            self.busy = busy;
            self.observer.on_busy_changed(busy);
        }
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.config.store_key, self.log.as_slice()) {
            warn!("Failed to persist conversation: {}", e);
        }
    }
}

/// One dispatch in flight. Holds the busy flag; settles the conversation on
/// drop if the reply never arrived.
struct DispatchGuard<'a> {
    chat: &'a mut InputCoordinator,
    request: RequestId,
    settled: bool,
}

impl<'a> DispatchGuard<'a> {
    fn begin(chat: &'a mut InputCoordinator) -> Self {
        chat.set_busy(true);
        let request = chat.next_request;
        chat.next_request += 1;
        chat.metrics.start(request);
        Self {
            chat,
            request,
            settled: false,
        }
    }

    fn finish(mut self, outcome: Result<ChatReply, TransportError>) {
        let text = self.chat.reply_text(self.request, outcome);
        self.settled = true;
        self.chat.settle_dispatch(text);
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        warn!("Chat request {} cancelled before a reply arrived", self.request);
        self.chat.metrics.abandon(self.request);
        self.chat.settle_dispatch(prompts::APOLOGY_REPLY.to_string());
    }
}

/// Fail file messages whose decode never finished (the process stopped
/// mid-decode). Returns how many were touched.
fn settle_interrupted_decodes(messages: &mut [Message]) -> usize {
    let mut settled = 0;
    for message in messages.iter_mut().filter(|m| !m.decoding().is_terminal()) {
        if message.decoding() == DecodingStatus::Pending {
            message.advance_decoding(DecodingStatus::Running);
        }
        if message.advance_decoding(DecodingStatus::Failed) {
            message.decoded = Some(prompts::DECODE_ERROR_SENTINEL.to_string());
            settled += 1;
        }
    }
    settled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::FileRef;

    fn file_message(id: u64) -> Message {
        Message::file(
            MessageId(id),
            FileRef {
                name: "scan.pdf".into(),
                media_type: "application/pdf".into(),
                size: 10,
            },
            None,
        )
    }

    #[test]
    fn interrupted_decodes_are_failed_on_load() {
        let mut running = file_message(1);
        running.advance_decoding(DecodingStatus::Running);
        let mut done = file_message(2);
        done.advance_decoding(DecodingStatus::Running);
        done.advance_decoding(DecodingStatus::Completed);
        let text = Message::text(MessageId(3), MessageKind::UserText, "hi");

        let mut messages = vec![file_message(0), running, done, text];
        assert_eq!(settle_interrupted_decodes(&mut messages), 2);
        assert_eq!(messages[0].decoding(), DecodingStatus::Failed);
        assert_eq!(messages[1].decoding(), DecodingStatus::Failed);
        assert_eq!(messages[1].decoded.as_deref(), Some(prompts::DECODE_ERROR_SENTINEL));
        assert_eq!(messages[2].decoding(), DecodingStatus::Completed);
        assert_eq!(messages[3].decoding(), DecodingStatus::None);
    }
}
