//! Per-conversation cache of chat memories

use super::{ChatMemory, QuerySource, DEFAULT_MAX_MESSAGES};
use crate::config::{MemoryBackend, RecallConfig};
use crate::generation::TextGenerator;
use crate::mem0::{Mem0Client, RemoteMemory};
use crate::message::ConversationId;
use crate::query_context::QueryRegisterSource;
use crate::store::{CompressionStore, MessageSearch, MessageStore, SearchBackedStore};
use crate::Result;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Hands out one [`ChatMemory`] per conversation id, all sharing one store.
///
/// The first `get` for an id creates its memory; every later `get` returns
/// the same instance until the entry is cleared. Entries are never evicted.
pub struct MemoryProvider {
    store: Arc<dyn MessageStore>,
    search: Option<Arc<dyn MessageSearch>>,
    query_source: Arc<dyn QuerySource>,
    max_messages: usize,
    memories: DashMap<ConversationId, Arc<ChatMemory>>,
}

impl MemoryProvider {
    /// Provider over a plain store, without relevance search
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            store,
            search: None,
            query_source: Arc::new(QueryRegisterSource),
            max_messages: DEFAULT_MAX_MESSAGES,
            memories: DashMap::new(),
        }
    }

    pub fn compression(store: Arc<CompressionStore>) -> Self {
        Self::new(store)
    }

    pub fn search_backed(store: Arc<SearchBackedStore>) -> Self {
        let search: Arc<dyn MessageSearch> = store.clone();
        Self {
            search: Some(search),
            ..Self::new(store)
        }
    }

    /// Build the store stack selected by `config.memory.provider`
    pub fn from_config(config: &RecallConfig, generator: Arc<dyn TextGenerator>) -> Result<Self> {
        let provider = match config.memory.provider {
            MemoryBackend::Compression => {
                info!(
                    "Using compression memory (threshold: {}, retained turns: {})",
                    config.memory.compression_threshold, config.memory.retained_turns
                );
                let store = CompressionStore::new(generator)
                    .with_threshold(config.memory.compression_threshold)
                    .with_retained_turns(config.memory.retained_turns);
                Self::compression(Arc::new(store))
            }
            MemoryBackend::Mem0 => {
                info!(
                    "Using mem0 memory (app: {}, top_k: {})",
                    config.mem0.app_id, config.mem0.top_k
                );
                let remote: Arc<dyn RemoteMemory> =
                    Arc::new(Mem0Client::from_config(&config.mem0, &config.http)?);
                let store = SearchBackedStore::new(remote, config.mem0.app_id.clone())
                    .with_top_k(config.mem0.top_k);
                Self::search_backed(Arc::new(store))
            }
        };
        Ok(provider.with_max_messages(config.memory.max_messages))
    }

    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }

    pub fn with_query_source(mut self, source: Arc<dyn QuerySource>) -> Self {
        self.query_source = source;
        self
    }

    /// Shared store behind every memory
    pub fn store(&self) -> Arc<dyn MessageStore> {
        self.store.clone()
    }

    pub fn get(&self, id: &ConversationId) -> Result<Arc<ChatMemory>> {
        let entry = self.memories.entry(id.clone()).or_try_insert_with(|| {
            debug!("Creating chat memory for ID: {}", id);
            let mut builder = ChatMemory::builder()
                .memory_id(id.clone())
                .store(self.store.clone())
                .query_source(self.query_source.clone())
                .max_messages(self.max_messages);
            if let Some(search) = &self.search {
                builder = builder.search(search.clone());
            }
            builder.build().map(Arc::new)
        })?;
        Ok(Arc::clone(entry.value()))
    }

    /// Forget the cached memory for `id`; stored history is untouched
    pub fn clear_memory_cache(&self, id: &ConversationId) {
        if self.memories.remove(id).is_some() {
            info!("Cleared memory cache for ID: {}", id);
        }
    }

    pub fn clear_all_memory_cache(&self) {
        self.memories.clear();
        info!("Cleared all memory caches");
    }

    pub fn cache_size(&self) -> usize {
        self.memories.len()
    }
}
