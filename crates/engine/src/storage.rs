//! Storage collaborator boundary.
//!
//! The engine treats thread and message persistence as an external concern:
//! it consumes this trait and assumes atomic, strongly consistent reads and
//! writes. [`InMemoryStore`] backs tests and embedded use.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use lq_domain::chat::{StoredMessage, Thread};
use lq_domain::error::{Error, Result};

/// Partial thread update. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct ThreadPatch {
    pub summary_text: Option<String>,
    pub summary_model: Option<String>,
    pub summary_updated_at: Option<DateTime<Utc>>,
    pub turn_count: Option<u32>,
    pub token_estimate: Option<u32>,
}

#[async_trait]
pub trait ThreadStore: Send + Sync {
    async fn get_thread(&self, id: Uuid) -> Result<Thread>;

    /// All messages of a thread in insertion order.
    async fn list_messages(&self, thread_id: Uuid) -> Result<Vec<StoredMessage>>;

    async fn create_message(&self, message: StoredMessage) -> Result<()>;

    async fn patch_thread(&self, id: Uuid, patch: ThreadPatch) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct InMemoryStore {
    threads: Mutex<HashMap<Uuid, Thread>>,
    messages: Mutex<HashMap<Uuid, Vec<StoredMessage>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_thread(&self, thread: Thread) {
        self.threads.lock().insert(thread.id, thread);
    }
}

#[async_trait]
impl ThreadStore for InMemoryStore {
    async fn get_thread(&self, id: Uuid) -> Result<Thread> {
        self.threads
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::Storage(format!("no such thread: {id}")))
    }

    async fn list_messages(&self, thread_id: Uuid) -> Result<Vec<StoredMessage>> {
        Ok(self
            .messages
            .lock()
            .get(&thread_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_message(&self, message: StoredMessage) -> Result<()> {
        if !self.threads.lock().contains_key(&message.thread_id) {
            return Err(Error::Storage(format!(
                "no such thread: {}",
                message.thread_id
            )));
        }
        self.messages
            .lock()
            .entry(message.thread_id)
            .or_default()
            .push(message);
        Ok(())
    }

    async fn patch_thread(&self, id: Uuid, patch: ThreadPatch) -> Result<()> {
        let mut threads = self.threads.lock();
        let thread = threads
            .get_mut(&id)
            .ok_or_else(|| Error::Storage(format!("no such thread: {id}")))?;

        if let Some(summary_text) = patch.summary_text {
            thread.summary_text = Some(summary_text);
        }
        if let Some(summary_model) = patch.summary_model {
            thread.summary_model = Some(summary_model);
        }
        if let Some(at) = patch.summary_updated_at {
            thread.summary_updated_at = Some(at);
        }
        if let Some(turn_count) = patch.turn_count {
            thread.turn_count = turn_count;
        }
        if let Some(token_estimate) = patch.token_estimate {
            thread.token_estimate = token_estimate;
        }
        Ok(())
    }
}
