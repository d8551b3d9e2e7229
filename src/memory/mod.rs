//! Memory module for Recall
//!
//! Per-conversation chat memory views, the provider that caches them, and
//! the running-summary helpers used by compaction.

mod chat_memory;
pub mod compact;
mod provider;

pub use chat_memory::{ChatMemory, ChatMemoryBuilder, DEFAULT_MAX_MESSAGES};
pub use compact::{SUMMARIZATION_PROMPT, SUMMARY_PREFIX};
pub use provider::MemoryProvider;

use crate::message::ConversationId;

/// Where a chat memory learns the query currently in flight
pub trait QuerySource: Send + Sync {
    fn current_query(&self, id: &ConversationId) -> Option<String>;
}

impl<F> QuerySource for F
where
    F: Fn(&ConversationId) -> Option<String> + Send + Sync,
{
    fn current_query(&self, id: &ConversationId) -> Option<String> {
        self(id)
    }
}
