//! Observer trait for render and playback collaborators.
//!
//! Inject an [`Arc<dyn ConversationObserver>`] when opening an
//! [`crate::coordinator::InputCoordinator`] to be told about every change to
//! the conversation: a UI re-renders the affected row, a markdown renderer
//! formats a finished reply, a text-to-speech engine speaks it.
//!
//! # Example
//!
//! ```rust
//! use edgequake_intake::{ConversationObserver, Message};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct ReplyCounter {
//!     replies: AtomicUsize,
//! }
//!
//! impl ConversationObserver for ReplyCounter {
//!     fn on_reply(&self, message: &Message) {
//!         self.replies.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("bot: {:?}", message.as_text());
//!     }
//! }
//!
//! let observer: Arc<dyn ConversationObserver> = Arc::new(ReplyCounter {
//!     replies: AtomicUsize::new(0),
//! });
//! ```

use crate::message::{Message, MessageId};
use std::sync::Arc;

/// Called by the coordinator after each state change.
///
/// All methods have default no-op implementations so implementors only
/// override what they care about. Callbacks run inline on the coordinator's
/// task and must not block.
pub trait ConversationObserver: Send + Sync {
    /// A message was appended to the end of the log.
    fn on_message_appended(&self, message: &Message) {
        let _ = message;
    }

    /// A message changed in place (decode progress, interim text, finalisation).
    fn on_message_updated(&self, message: &Message) {
        let _ = message;
    }

    /// A message was dropped from the log (discarded interim voice entry).
    fn on_message_removed(&self, id: MessageId) {
        let _ = id;
    }

    /// The busy flag changed.
    fn on_busy_changed(&self, busy: bool) {
        let _ = busy;
    }

    /// A finished bot reply is ready to be rendered and optionally spoken.
    fn on_reply(&self, message: &Message) {
        let _ = message;
    }

    /// The log was cleared.
    fn on_cleared(&self) {}
}

/// Default observer when none is configured.
pub struct NoopObserver;

impl ConversationObserver for NoopObserver {}

/// Convenience alias for the type held by the coordinator.
pub type SharedObserver = Arc<dyn ConversationObserver>;
