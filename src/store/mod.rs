//! Message stores keyed by conversation
//!
//! A store holds the ordered snapshot of one conversation. Backends wrap a
//! base store (compression) or a remote memory service (search).

mod compression;
mod search;

pub use compression::{CompressionStore, DEFAULT_COMPRESSION_THRESHOLD};
pub use search::{SearchBackedStore, DEFAULT_TOP_K};

use crate::message::{ChatMessage, ConversationId};
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;

/// Key-value contract over conversation snapshots
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Full snapshot for `id`, empty if nothing was written yet
    async fn get(&self, id: &ConversationId) -> Result<Vec<ChatMessage>>;

    /// Replace the snapshot for `id`
    async fn replace(&self, id: &ConversationId, messages: Vec<ChatMessage>) -> Result<()>;

    async fn delete(&self, id: &ConversationId) -> Result<()>;
}

/// Stores that can return a query-relevant subset of a conversation
#[async_trait]
pub trait MessageSearch: Send + Sync {
    async fn search(&self, id: &ConversationId, query: &str) -> Result<Vec<ChatMessage>>;
}

/// Process-local store, lost on restart
#[derive(Debug, Default)]
pub struct InMemoryStore {
    messages: DashMap<ConversationId, Vec<ChatMessage>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn get(&self, id: &ConversationId) -> Result<Vec<ChatMessage>> {
        Ok(self
            .messages
            .get(id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn replace(&self, id: &ConversationId, messages: Vec<ChatMessage>) -> Result<()> {
        self.messages.insert(id.clone(), messages);
        Ok(())
    }

    async fn delete(&self, id: &ConversationId) -> Result<()> {
        self.messages.remove(id);
        Ok(())
    }
}
