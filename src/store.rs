//! Persistence of the conversation log under a fixed key.

use crate::error::IntakeError;
use crate::message::Message;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

/// Where the conversation log lives between runs.
pub trait ConversationStore: Send + Sync {
    /// The stored log, or an empty one if nothing was saved under `key`.
    fn load(&self, key: &str) -> Result<Vec<Message>, IntakeError>;

    /// Replace the stored log.
    fn save(&self, key: &str, messages: &[Message]) -> Result<(), IntakeError>;

    /// Forget the stored log.
    fn clear(&self, key: &str) -> Result<(), IntakeError>;
}

/// One pretty-printed JSON file per key: `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn at_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> IntakeError + '_ {
    move |source| IntakeError::StoreIo {
        path: path.to_path_buf(),
        source,
    }
}

impl ConversationStore for JsonFileStore {
    fn load(&self, key: &str) -> Result<Vec<Message>, IntakeError> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(vec![]);
        }

        let raw = fs::read_to_string(&path).map_err(io_err(&path))?;
        let messages: Vec<Message> =
            serde_json::from_str(&raw).map_err(|e| IntakeError::StoreCorrupt {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        debug!("Loaded {} message(s) from {}", messages.len(), path.display());
        Ok(messages)
    }

    fn save(&self, key: &str, messages: &[Message]) -> Result<(), IntakeError> {
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;

        let path = self.path_for(key);
        let json = serde_json::to_string_pretty(messages)
            .map_err(|e| IntakeError::Internal(format!("serialising conversation: {e}")))?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<(), IntakeError> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(&path).map_err(io_err(&path))?;
        }
        Ok(())
    }
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    logs: Mutex<HashMap<String, Vec<Message>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn logs(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Message>>> {
        self.logs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConversationStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Vec<Message>, IntakeError> {
        Ok(self.logs().get(key).cloned().unwrap_or_default())
    }

    fn save(&self, key: &str, messages: &[Message]) -> Result<(), IntakeError> {
        self.logs().insert(key.to_string(), messages.to_vec());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<(), IntakeError> {
        self.logs().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageId, MessageKind};

    fn sample() -> Vec<Message> {
        vec![
            Message::text(MessageId(0), MessageKind::UserText, "Hello"),
            Message::bot(MessageId(1), "Hi there!"),
        ]
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::at_dir(dir.path());
        assert!(store.load("chat-messages").unwrap().is_empty());
    }

    #[test]
    fn save_then_load_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::at_dir(dir.path().join("nested"));
        store.save("chat-messages", &sample()).unwrap();

        let path = store.path_for("chat-messages");
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let back = store.load("chat-messages").unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].as_text(), Some("Hi there!"));

        store.clear("chat-messages").unwrap();
        assert!(!path.exists());
        store.clear("chat-messages").unwrap();
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::at_dir(dir.path());
        fs::write(store.path_for("chat-messages"), "{not json").unwrap();
        let err = store.load("chat-messages").unwrap_err();
        assert!(matches!(err, IntakeError::StoreCorrupt { .. }));
    }

    #[test]
    fn memory_store_keys_are_independent() {
        let store = MemoryStore::new();
        store.save("a", &sample()).unwrap();
        assert_eq!(store.load("a").unwrap().len(), 2);
        assert!(store.load("b").unwrap().is_empty());
        store.clear("a").unwrap();
        assert!(store.load("a").unwrap().is_empty());
    }
}
