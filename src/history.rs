use crate::conversation::ChatHistory;
use crate::error::ControlError;
use crate::profile::{write_json_atomic, ProfilePaths};
use std::io::ErrorKind;
use tracing::debug;

/// One JSON transcript per peer under `<profile>/chats/`.
#[derive(Clone, Debug)]
pub struct ChatHistoryStore {
    paths: ProfilePaths,
}

impl ChatHistoryStore {
    pub fn new(paths: ProfilePaths) -> Self {
        Self { paths }
    }

    /// `Ok(None)` when nothing has been stored for `peer` yet.
    pub fn load(&self, peer: &str) -> Result<Option<ChatHistory>, ControlError> {
        let path = self.paths.chat_history(peer);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(peer, "no chat history yet");
                return Ok(None);
            }
            Err(e) => return Err(ControlError::Store(format!("read {}: {}", path.display(), e))),
        };
        let history = serde_json::from_slice(&bytes)
            .map_err(|e| ControlError::Store(format!("parse {}: {}", path.display(), e)))?;
        Ok(Some(history))
    }

    pub fn save(&self, history: &ChatHistory) -> Result<(), ControlError> {
        write_json_atomic(&self.paths.chat_history(&history.peer), history)
    }
}
