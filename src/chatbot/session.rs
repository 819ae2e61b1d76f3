//! Per-chat conversation history.

use std::collections::HashMap;

use log::debug;
use tokio::sync::Mutex;

use crate::openrouter::Message;
use crate::types::ChatId;

/// Messages kept per chat before the oldest are dropped.
pub const MAX_HISTORY_MESSAGES: usize = 40;

/// In-memory history keyed by chat id. Sessions are created on first use.
pub struct SessionStore {
    sessions: Mutex<HashMap<ChatId, Vec<Message>>>,
    max_messages: usize,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(MAX_HISTORY_MESSAGES)
    }
}

impl SessionStore {
    pub fn new(max_messages: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_messages,
        }
    }

    /// Snapshot of the chat's history, empty for an unknown chat.
    pub async fn history(&self, chat_id: ChatId) -> Vec<Message> {
        self.sessions
            .lock()
            .await
            .get(&chat_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Appends a completed exchange, trimming the oldest messages past the cap.
    pub async fn append(&self, chat_id: ChatId, messages: impl IntoIterator<Item = Message>) {
        let mut sessions = self.sessions.lock().await;
        let history = sessions.entry(chat_id).or_default();
        history.extend(messages);
        if history.len() > self.max_messages {
            let excess = history.len() - self.max_messages;
            history.drain(..excess);
            debug!("Trimmed {excess} old messages from chat {chat_id}");
        }
    }

    pub async fn reset(&self, chat_id: ChatId) {
        if self.sessions.lock().await.remove(&chat_id).is_some() {
            debug!("Reset conversation for chat {chat_id}");
        }
    }
}
