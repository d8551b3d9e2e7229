//! Chat memory view for a single conversation

use super::QuerySource;
use crate::message::{ChatMessage, ConversationId};
use crate::store::{MessageSearch, MessageStore};
use crate::{RecallError, Result};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

pub const DEFAULT_MAX_MESSAGES: usize = 20;

/// `add` / `messages` / `clear` for one conversation, bound to one store.
///
/// With a searcher attached, `messages()` returns only what is relevant to
/// the query in flight and falls back to the full history when there is no
/// query or the search fails.
pub struct ChatMemory {
    id: ConversationId,
    store: Arc<dyn MessageStore>,
    search: Option<Arc<dyn MessageSearch>>,
    query_source: Option<Arc<dyn QuerySource>>,
    max_messages: usize,
    /// Latest System message; only used with a searcher, whose store drops them
    system_message: RwLock<Option<ChatMessage>>,
    /// Serializes read-modify-write cycles of `add`
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for ChatMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatMemory")
            .field("id", &self.id)
            .field("searchable", &self.search.is_some())
            .field("max_messages", &self.max_messages)
            .finish()
    }
}

impl ChatMemory {
    pub fn builder() -> ChatMemoryBuilder {
        ChatMemoryBuilder::default()
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    fn current_query(&self) -> Option<String> {
        self.query_source
            .as_ref()
            .and_then(|source| source.current_query(&self.id))
            .filter(|query| !query.trim().is_empty())
    }

    pub async fn add(&self, message: ChatMessage) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        debug!("Adding {} message to memory ID: {}", message.type_name(), self.id);

        if self.search.is_some() && message.is_system() {
            *self.system_message.write().await = Some(message);
            return Ok(());
        }

        // Always extend the full history: a search result is only a partial view
        let mut messages = self.store.get(&self.id).await?;
        messages.push(message);
        keep_newest(&mut messages, self.max_messages);
        self.store.replace(&self.id, messages).await
    }

    pub async fn messages(&self) -> Result<Vec<ChatMessage>> {
        debug!("Getting messages for memory ID: {}", self.id);

        let query = self.current_query();
        let mut searched = false;
        let mut history = match (&self.search, &query) {
            (Some(search), Some(query)) => {
                debug!("Searching with query: {}", query);
                match search.search(&self.id, query).await {
                    Ok(found) => {
                        searched = true;
                        found
                    }
                    Err(e) => {
                        error!(
                            "Search failed for memory ID {}, falling back to full history: {}",
                            self.id, e
                        );
                        self.store.get(&self.id).await?
                    }
                }
            }
            _ => {
                debug!("Getting all messages (no query provided)");
                self.store.get(&self.id).await?
            }
        };

        let system = self.system_message.read().await.clone();
        let framing = usize::from(system.is_some()) + usize::from(searched);
        keep_newest(&mut history, self.max_messages.saturating_sub(framing));

        let mut result = Vec::with_capacity(history.len() + framing);
        result.extend(system);
        result.append(&mut history);
        if searched {
            // Search results never contain the turn being answered
            if let Some(query) = query {
                result.push(ChatMessage::user(query));
            }
        }
        // Framing alone can exceed a tiny bound; the newest messages win
        keep_newest(&mut result, self.max_messages);
        Ok(result)
    }

    pub async fn clear(&self) -> Result<()> {
        info!("Clearing messages for memory ID: {}", self.id);
        let _guard = self.write_lock.lock().await;
        self.store.delete(&self.id).await?;
        *self.system_message.write().await = None;
        Ok(())
    }
}

/// Drop the oldest messages beyond `max`
fn keep_newest(messages: &mut Vec<ChatMessage>, max: usize) {
    if messages.len() > max {
        let excess = messages.len() - max;
        messages.drain(..excess);
    }
}

#[derive(Default)]
pub struct ChatMemoryBuilder {
    id: Option<ConversationId>,
    store: Option<Arc<dyn MessageStore>>,
    search: Option<Arc<dyn MessageSearch>>,
    query_source: Option<Arc<dyn QuerySource>>,
    max_messages: Option<usize>,
}

impl ChatMemoryBuilder {
    pub fn memory_id(mut self, id: impl Into<ConversationId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn search(mut self, search: Arc<dyn MessageSearch>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn query_source(mut self, source: Arc<dyn QuerySource>) -> Self {
        self.query_source = Some(source);
        self
    }

    pub fn max_messages(mut self, max: usize) -> Self {
        self.max_messages = Some(max);
        self
    }

    pub fn build(self) -> Result<ChatMemory> {
        let store = self.store.ok_or(RecallError::Builder("store"))?;
        let id = self.id.ok_or(RecallError::Builder("memory_id"))?;
        Ok(ChatMemory {
            id,
            store,
            search: self.search,
            query_source: self.query_source,
            max_messages: self.max_messages.unwrap_or(DEFAULT_MAX_MESSAGES).max(1),
            system_message: RwLock::new(None),
            write_lock: Mutex::new(()),
        })
    }
}
