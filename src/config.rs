//! Configuration for Recall
//!
//! Loaded from `~/.recall/config.toml` (or an explicit path), then overridden
//! by environment variables. Every field has a default so an empty file is a
//! valid compression-backend config.

use crate::{RecallError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Which store backs the chat memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    /// Summarize old turns into a running summary
    #[default]
    Compression,
    /// Relevance search against the mem0 memory API
    Mem0,
}

impl std::str::FromStr for MemoryBackend {
    type Err = RecallError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compression" => Ok(Self::Compression),
            "mem0" => Ok(Self::Mem0),
            other => Err(RecallError::Config(format!("unknown memory provider '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub provider: MemoryBackend,
    /// Snapshots longer than this get compacted
    pub compression_threshold: usize,
    /// Raw turns kept next to the summary after compaction
    pub retained_turns: usize,
    /// Upper bound on messages handed to the model
    pub max_messages: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            provider: MemoryBackend::Compression,
            compression_threshold: 5,
            retained_turns: 0,
            max_messages: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Mem0Config {
    pub api_key: Option<String>,
    pub app_id: String,
    pub top_k: usize,
    pub base_url: String,
}

impl Default for Mem0Config {
    fn default() -> Self {
        Self {
            api_key: None,
            app_id: "recall".to_string(),
            top_k: 3,
            base_url: "https://api.mem0.ai".to_string(),
        }
    }
}

/// Transport budget for the remote memory API
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub response_timeout_secs: u64,
    /// Connect and per-read budget
    pub io_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            response_timeout_secs: 30,
            io_timeout_secs: 1,
        }
    }
}

impl HttpConfig {
    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    pub memory: MemoryConfig,
    pub mem0: Mem0Config,
    pub http: HttpConfig,
    pub llm: LlmConfig,
}

impl RecallConfig {
    /// Load from `path`, or from the default location when present.
    ///
    /// Environment overrides are applied and the result validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `MEM0_API_KEY`, `OPENAI_API_KEY` and `RECALL_PROVIDER`.
    ///
    /// `lookup` abstracts the environment so tests stay hermetic.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_blank("MEM0_API_KEY") {
            self.mem0.api_key = Some(key.trim().to_string());
        }
        if let Some(key) = non_blank("OPENAI_API_KEY") {
            self.llm.api_key = Some(key.trim().to_string());
        }
        if let Some(provider) = non_blank("RECALL_PROVIDER") {
            match provider.parse() {
                Ok(backend) => self.memory.provider = backend,
                Err(e) => tracing::warn!("Ignoring RECALL_PROVIDER: {}", e),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.memory.max_messages == 0 {
            return Err(RecallError::Config(
                "memory.max_messages must be at least 1".to_string(),
            ));
        }
        if self.memory.provider == MemoryBackend::Mem0 {
            let configured = self
                .mem0
                .api_key
                .as_deref()
                .is_some_and(|k| !k.trim().is_empty());
            if !configured {
                return Err(RecallError::Config(
                    "mem0 API key must be configured (mem0.api_key or MEM0_API_KEY)".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// `~/.recall/config.toml`, or `$RECALL_HOME/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("RECALL_HOME") {
        return Some(PathBuf::from(home).join("config.toml"));
    }
    dirs::home_dir().map(|home| home.join(".recall").join("config.toml"))
}
