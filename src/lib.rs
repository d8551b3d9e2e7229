//! Recall - conversational memory for chat services
//!
//! Keeps chat history bounded and relevant, and scoped to the request that
//! needs it:
//! - Semantic compression of old turns into a running summary
//! - Remote relevance search against a mem0-style memory service
//! - Request-scoped query propagation across tasks, workers and streams

pub mod assistant;
pub mod config;
pub mod generation;
pub mod mem0;
pub mod memory;
pub mod message;
pub mod query_context;
pub mod store;

pub use assistant::ChatAssistant;
pub use config::{MemoryBackend, RecallConfig};
pub use generation::{OpenAiGenerator, TextGenerator, TextStream};
pub use mem0::{Mem0Client, RemoteMemory, RemoteMessage};
pub use memory::{ChatMemory, MemoryProvider, QuerySource};
pub use message::{ChatMessage, ConversationId, ToolExecutionRequest};
pub use query_context::{QueryCarrier, QueryContext, QueryRegisterSource};
pub use store::{CompressionStore, InMemoryStore, MessageSearch, MessageStore, SearchBackedStore};

/// Result type for Recall operations
pub type Result<T> = std::result::Result<T, RecallError>;

/// Errors that can occur in Recall
#[derive(Debug, thiserror::Error)]
pub enum RecallError {
    /// Connect, read or overall response timeout on a remote call
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Connection failure or unreadable body on a remote call
    #[error("Transport error: {0}")]
    Transport(String),

    /// Remote service answered with a non-2xx status
    #[error("Remote API error {status}: {detail}")]
    Remote { status: u16, detail: String },

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Required builder field missing at construction time
    #[error("Builder error: {0} must be set")]
    Builder(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RecallError {
    /// True for timeouts on the underlying transport
    pub fn is_timeout(&self) -> bool {
        matches!(self, RecallError::Timeout(_))
    }
}
