//! Conversation state, serialized per chat.
//!
//! Canonical history cannot tolerate interleaved mutation, so each chat key
//! owns a fair async mutex: turns for the same chat run one at a time in
//! submission order, while different chats proceed concurrently. In-memory
//! state is authoritative for the session; when a storage backend is
//! attached, history is additionally persisted at
//! `conversations/{chat_id}.json` as a JSON array of canonical messages.
//! Persistence failures are logged and never fail the turn.

use crate::storage::Storage;
use crate::types::Message;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use tracing::warn;

/// Key prefix for persisted conversations.
const CONVERSATION_PREFIX: &str = "conversations/";

/// History plus a lazy-load marker for the persistence backend.
#[derive(Debug, Default)]
pub struct ConversationState {
    /// Canonical messages in chronological order.
    pub messages: Vec<Message>,
    loaded: bool,
}

/// Per-chat serialized access to conversation history.
pub struct ConversationStore {
    conversations: Mutex<HashMap<String, Arc<tokio::sync::Mutex<ConversationState>>>>,
    storage: Option<Arc<dyn Storage>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    /// An in-memory store with no persistence.
    pub fn new() -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            storage: None,
        }
    }

    /// Attaches a persistence backend.
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    fn entry_key(chat_id: &str) -> String {
        format!("{}{}.json", CONVERSATION_PREFIX, chat_id)
    }

    fn slot(&self, chat_id: &str) -> Arc<tokio::sync::Mutex<ConversationState>> {
        let mut map = self
            .conversations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.entry(chat_id.to_string()).or_default().clone()
    }

    /// Acquires the chat's lock, loading persisted history on first touch.
    ///
    /// The returned guard holds the conversation exclusively; a second
    /// caller for the same chat waits until it is dropped. The mutex is
    /// fair, so waiting turns run in submission order.
    pub async fn begin(&self, chat_id: &str) -> OwnedMutexGuard<ConversationState> {
        let slot = self.slot(chat_id);
        let mut guard = slot.lock_owned().await;
        if !guard.loaded {
            guard.loaded = true;
            if let Some(storage) = &self.storage {
                match storage.get(&Self::entry_key(chat_id)).await {
                    Ok(Some(bytes)) => match serde_json::from_slice::<Vec<Message>>(&bytes) {
                        Ok(messages) => guard.messages = messages,
                        Err(err) => {
                            warn!(chat_id, %err, "ignoring corrupt persisted conversation")
                        }
                    },
                    Ok(None) => {}
                    Err(err) => warn!(chat_id, %err, "failed to load persisted conversation"),
                }
            }
        }
        guard
    }

    /// Persists the chat's history if a backend is attached. Failures are
    /// logged; in-memory state stays authoritative.
    pub async fn persist(&self, chat_id: &str, messages: &[Message]) {
        let Some(storage) = &self.storage else {
            return;
        };
        match serde_json::to_vec(messages) {
            Ok(bytes) => {
                if let Err(err) = storage.put(&Self::entry_key(chat_id), &bytes).await {
                    warn!(chat_id, %err, "failed to persist conversation");
                }
            }
            Err(err) => warn!(chat_id, %err, "failed to encode conversation"),
        }
    }

    /// Clears a chat's history in memory and in the backend.
    pub async fn clear(&self, chat_id: &str) {
        let slot = self.slot(chat_id);
        let mut guard = slot.lock_owned().await;
        guard.messages.clear();
        guard.loaded = true;
        if let Some(storage) = &self.storage {
            if let Err(err) = storage.delete(&Self::entry_key(chat_id)).await {
                warn!(chat_id, %err, "failed to delete persisted conversation");
            }
        }
    }

    /// Conversation and message counts across all chats.
    pub async fn stats(&self) -> (usize, usize) {
        let slots: Vec<Arc<tokio::sync::Mutex<ConversationState>>> = {
            let map = self
                .conversations
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            map.values().cloned().collect()
        };
        let mut total = 0;
        for slot in &slots {
            total += slot.lock().await.messages.len();
        }
        (slots.len(), total)
    }
}

impl std::fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationStore")
            .field("persistent", &self.storage.is_some())
            .finish()
    }
}
