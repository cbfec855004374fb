//! Conversation messages and the ordered log that holds them.
//!
//! Messages are addressed by [`MessageId`], never by position: a file decode
//! or a voice interim update can land after any number of other messages were
//! appended, and the id is the only handle that stays valid across that.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Stable, creation-ordered message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who produced a message and through which input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    UserText,
    UserFile,
    UserAudio,
    BotReply,
}

/// Decode progress of a [`MessageKind::UserFile`] message.
///
/// Moves strictly forward one step at a time:
/// `None → Pending → Running → Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DecodingStatus {
    #[default]
    None,
    Pending,
    Running,
    Completed,
    Failed,
}

impl DecodingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DecodingStatus::Completed | DecodingStatus::Failed)
    }

    /// Whether `next` is the legal successor of `self`.
    pub fn can_advance_to(self, next: DecodingStatus) -> bool {
        use DecodingStatus::*;
        matches!(
            (self, next),
            (None, Pending) | (Pending, Running) | (Running, Completed) | (Running, Failed)
        )
    }
}

/// Reference to an uploaded file. The bytes themselves are never stored in
/// the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    pub media_type: String,
    pub size: usize,
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageContent {
    Text(String),
    File(FileRef),
}

/// One entry in the conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub kind: MessageKind,
    pub content: MessageContent,
    decoding: DecodingStatus,
    /// Decoded text (or sentinel) of a file message once decoding finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoded: Option<String>,
    /// `data:` URI for thumbnail rendering. Not persisted.
    #[serde(skip)]
    pub preview: Option<String>,
    /// Set on the single voice entry that is still being recorded.
    #[serde(default)]
    pub interim: bool,
    pub created_at: SystemTime,
}

impl Message {
    fn new(id: MessageId, kind: MessageKind, content: MessageContent) -> Self {
        Self {
            id,
            kind,
            content,
            decoding: DecodingStatus::None,
            decoded: None,
            preview: None,
            interim: false,
            created_at: SystemTime::now(),
        }
    }

    /// A finalized text message of the given kind.
    pub fn text(id: MessageId, kind: MessageKind, text: impl Into<String>) -> Self {
        Self::new(id, kind, MessageContent::Text(text.into()))
    }

    /// A bot reply.
    pub fn bot(id: MessageId, text: impl Into<String>) -> Self {
        Self::text(id, MessageKind::BotReply, text)
    }

    /// A file message, already in [`DecodingStatus::Pending`].
    pub fn file(id: MessageId, file: FileRef, preview: Option<String>) -> Self {
        let mut msg = Self::new(id, MessageKind::UserFile, MessageContent::File(file));
        msg.decoding = DecodingStatus::Pending;
        msg.preview = preview;
        msg
    }

    /// The live voice entry shown while a session is listening.
    pub fn interim_audio(id: MessageId, text: impl Into<String>) -> Self {
        let mut msg = Self::text(id, MessageKind::UserAudio, text);
        msg.interim = true;
        msg
    }

    pub fn decoding(&self) -> DecodingStatus {
        self.decoding
    }

    /// Move the decode status forward. Returns false (and changes nothing)
    /// when `next` is not the legal successor of the current status.
    pub fn advance_decoding(&mut self, next: DecodingStatus) -> bool {
        if self.kind != MessageKind::UserFile || !self.decoding.can_advance_to(next) {
            return false;
        }
        self.decoding = next;
        true
    }

    /// The text body, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            MessageContent::File(_) => None,
        }
    }
}

/// Ordered, id-addressed conversation log.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    messages: Vec<Message>,
    next_id: u64,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted messages; new ids continue after the
    /// highest id found. A leftover interim entry from an interrupted session
    /// is dropped.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        let next_id = messages.iter().map(|m| m.id.0 + 1).max().unwrap_or(0);
        let messages = messages.into_iter().filter(|m| !m.interim).collect();
        Self { messages, next_id }
    }

    /// Allocate a fresh id.
    pub fn allocate_id(&mut self) -> MessageId {
        let id = MessageId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn get_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == id)
    }

    pub fn remove(&mut self, id: MessageId) -> Option<Message> {
        let pos = self.messages.iter().position(|m| m.id == id)?;
        Some(self.messages.remove(pos))
    }

    /// The entry currently marked as recording, if any.
    pub fn interim(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.interim)
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Remove every message. Ids keep counting up.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_ref() -> FileRef {
        FileRef {
            name: "scan.png".into(),
            media_type: "image/png".into(),
            size: 10,
        }
    }

    #[test]
    fn decoding_moves_forward_only() {
        let mut msg = Message::file(MessageId(0), file_ref(), None);
        assert_eq!(msg.decoding(), DecodingStatus::Pending);
        assert!(!msg.advance_decoding(DecodingStatus::Completed));
        assert!(msg.advance_decoding(DecodingStatus::Running));
        assert!(msg.advance_decoding(DecodingStatus::Completed));
        assert!(!msg.advance_decoding(DecodingStatus::Failed));
        assert!(!msg.advance_decoding(DecodingStatus::Pending));
        assert_eq!(msg.decoding(), DecodingStatus::Completed);
    }

    #[test]
    fn text_messages_never_decode() {
        let mut msg = Message::text(MessageId(1), MessageKind::UserText, "hi");
        assert!(!msg.advance_decoding(DecodingStatus::Pending));
        assert_eq!(msg.decoding(), DecodingStatus::None);
    }

    #[test]
    fn lookup_by_id_survives_appends() {
        let mut log = ConversationLog::new();
        let a = log.allocate_id();
        log.push(Message::file(a, file_ref(), None));
        for _ in 0..3 {
            let id = log.allocate_id();
            log.push(Message::text(id, MessageKind::UserText, "later"));
        }
        assert_eq!(log.get(a).unwrap().kind, MessageKind::UserFile);
        assert!(log.remove(a).is_some());
        assert!(log.get(a).is_none());
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn ids_resume_after_reload() {
        let msgs = vec![
            Message::text(MessageId(4), MessageKind::UserText, "a"),
            Message::bot(MessageId(7), "b"),
            Message::interim_audio(MessageId(8), "stale"),
        ];
        let mut log = ConversationLog::from_messages(msgs);
        assert_eq!(log.len(), 2);
        assert!(log.interim().is_none());
        assert_eq!(log.allocate_id(), MessageId(9));
    }

    #[test]
    fn serde_skips_preview() {
        let msg = Message::file(MessageId(2), file_ref(), Some("data:image/png;base64,AA".into()));
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("base64"));
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.preview, None);
        assert_eq!(back.decoding(), DecodingStatus::Pending);
    }
}
