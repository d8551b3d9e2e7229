//! Search-backed store over a remote memory service.
//!
//! Writes forward only the newest user/assistant turn (the service already
//! holds earlier ones) and overwrite a local cache with the caller's full
//! view. Reads prefer that cache; searches always go remote and never touch
//! it.

use super::{MessageSearch, MessageStore};
use crate::mem0::{RemoteMemory, RemoteMessage};
use crate::message::{ChatMessage, ConversationId};
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_TOP_K: usize = 3;

pub struct SearchBackedStore {
    remote: Arc<dyn RemoteMemory>,
    app_id: String,
    top_k: usize,
    local_cache: DashMap<ConversationId, Vec<ChatMessage>>,
}

impl SearchBackedStore {
    pub fn new(remote: Arc<dyn RemoteMemory>, app_id: impl Into<String>) -> Self {
        Self {
            remote,
            app_id: app_id.into(),
            top_k: DEFAULT_TOP_K,
            local_cache: DashMap::new(),
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Cached snapshot, if any
    pub fn cached(&self, id: &ConversationId) -> Option<Vec<ChatMessage>> {
        self.local_cache.get(id).map(|entry| entry.value().clone())
    }
}

/// Newest user/assistant turn in remote form
fn latest_remote_turn(messages: &[ChatMessage]) -> Option<RemoteMessage> {
    messages.iter().rev().find_map(|msg| match msg {
        ChatMessage::User { text } => Some(RemoteMessage::new("user", text.clone())),
        ChatMessage::Assistant { text, .. } => Some(RemoteMessage::new("assistant", text.clone())),
        ChatMessage::System { .. } | ChatMessage::ToolResult { .. } => None,
    })
}

/// Translate memory records into messages.
///
/// The service does not report roles, so every record becomes a User
/// message. Records without a non-blank textual `memory` field are skipped.
pub fn messages_from_memories(response: &Value) -> Vec<ChatMessage> {
    let records = match response {
        Value::Array(records) => records.as_slice(),
        Value::Object(map) => match map.get("results") {
            Some(Value::Array(records)) => records.as_slice(),
            _ => &[],
        },
        _ => &[],
    };

    records
        .iter()
        .filter_map(|record| record.get("memory").and_then(Value::as_str))
        .filter(|memory| !memory.trim().is_empty())
        .map(ChatMessage::user)
        .collect()
}

#[async_trait]
impl MessageStore for SearchBackedStore {
    async fn get(&self, id: &ConversationId) -> Result<Vec<ChatMessage>> {
        debug!("Getting messages for memory ID: {}", id);

        if let Some(cached) = self.cached(id).filter(|m| !m.is_empty()) {
            debug!("Returning cached messages for memory ID: {}", id);
            return Ok(cached);
        }

        let response = self.remote.get_memories(id.as_str(), &self.app_id).await?;
        let messages = messages_from_memories(&response);
        self.local_cache.insert(id.clone(), messages.clone());

        info!(
            "Retrieved {} messages from mem0 for memory ID: {}",
            messages.len(),
            id
        );
        Ok(messages)
    }

    async fn replace(&self, id: &ConversationId, messages: Vec<ChatMessage>) -> Result<()> {
        info!("Updating messages for memory ID: {}", id);

        if messages.is_empty() {
            warn!("No messages to update for memory ID: {}", id);
            return Ok(());
        }

        if let Some(turn) = latest_remote_turn(&messages) {
            self.remote
                .add_memory(id.as_str(), &self.app_id, std::slice::from_ref(&turn))
                .await?;
            info!("Added {} message to mem0 for user: {}", turn.role, id);
        }

        self.local_cache.insert(id.clone(), messages);
        Ok(())
    }

    async fn delete(&self, id: &ConversationId) -> Result<()> {
        info!("Deleting messages for memory ID: {}", id);
        self.local_cache.remove(id);
        warn!("Delete only removed messages from the local cache; remote memories for {} are kept", id);
        Ok(())
    }
}

#[async_trait]
impl MessageSearch for SearchBackedStore {
    async fn search(&self, id: &ConversationId, query: &str) -> Result<Vec<ChatMessage>> {
        info!("Searching messages for memory ID: {} with query: {}", id, query);

        let response = self
            .remote
            .search_memories(query, id.as_str(), &self.app_id, self.top_k)
            .await?;
        let messages = messages_from_memories(&response);

        info!("Found {} relevant messages for query: {}", messages.len(), query);
        Ok(messages)
    }
}
