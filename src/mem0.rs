//! Client for the mem0 memory API
//!
//! Every call is a single JSON POST with `Authorization: Token <key>`.
//! Connect and read timeouts are short, the overall response timeout longer;
//! a timeout surfaces as `RecallError::Timeout`.

use crate::config::{HttpConfig, Mem0Config};
use crate::generation::openai::{extract_error_detail, truncate_error_detail};
use crate::{RecallError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info};

const ADD_MEMORIES_PATH: &str = "/v1/memories/";
const GET_MEMORIES_PATH: &str = "/v2/memories/";
const SEARCH_MEMORIES_PATH: &str = "/v2/memories/search/";
const MAX_ERROR_DETAIL_CHARS: usize = 300;

/// One conversational turn as the memory service stores it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub role: String,
    pub content: String,
}

impl RemoteMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Remote memory collaborator. Responses are returned as raw JSON so the
/// caller decides how tolerant to be about record shape.
#[async_trait]
pub trait RemoteMemory: Send + Sync {
    async fn add_memory(&self, user_id: &str, app_id: &str, messages: &[RemoteMessage])
        -> Result<Value>;

    async fn get_memories(&self, user_id: &str, app_id: &str) -> Result<Value>;

    async fn search_memories(
        &self,
        query: &str,
        user_id: &str,
        app_id: &str,
        top_k: usize,
    ) -> Result<Value>;
}

pub struct Mem0Client {
    client: Client,
    base_url: String,
    api_key: String,
}

impl Mem0Client {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, http: &HttpConfig) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(RecallError::Config("mem0 API key must be configured".to_string()));
        }

        let client = Client::builder()
            .timeout(http.response_timeout())
            .connect_timeout(http.io_timeout())
            .read_timeout(http.io_timeout())
            .user_agent(concat!("recall/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RecallError::Config(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn from_config(mem0: &Mem0Config, http: &HttpConfig) -> Result<Self> {
        let api_key = mem0.api_key.clone().ok_or_else(|| {
            RecallError::Config("mem0 API key must be configured".to_string())
        })?;
        info!("Creating mem0 client for app: {}", mem0.app_id);
        Self::new(api_key, mem0.base_url.clone(), http)
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        let text = response.text().await.map_err(map_reqwest_error)?;
        if !status.is_success() {
            let detail = truncate_error_detail(&extract_error_detail(&text), MAX_ERROR_DETAIL_CHARS);
            return Err(RecallError::Remote {
                status: status.as_u16(),
                detail,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// `{"AND": [{"user_id": ..}, {"app_id": ..}]}`
fn scope_filters(user_id: &str, app_id: &str) -> Value {
    json!({
        "AND": [
            { "user_id": user_id },
            { "app_id": app_id },
        ]
    })
}

#[async_trait]
impl RemoteMemory for Mem0Client {
    async fn add_memory(
        &self,
        user_id: &str,
        app_id: &str,
        messages: &[RemoteMessage],
    ) -> Result<Value> {
        let body = json!({
            "messages": messages,
            "user_id": user_id,
            "app_id": app_id,
            "version": "v2",
        });
        self.post(ADD_MEMORIES_PATH, &body).await.inspect_err(|e| {
            error!("Failed to add memory: {}", e);
        })
    }

    async fn get_memories(&self, user_id: &str, app_id: &str) -> Result<Value> {
        let body = json!({ "filters": scope_filters(user_id, app_id) });
        self.post(GET_MEMORIES_PATH, &body).await.inspect_err(|e| {
            error!("Failed to get memories: {}", e);
        })
    }

    async fn search_memories(
        &self,
        query: &str,
        user_id: &str,
        app_id: &str,
        top_k: usize,
    ) -> Result<Value> {
        let body = json!({
            "query": query,
            "filters": scope_filters(user_id, app_id),
            "top_k": top_k,
        });
        self.post(SEARCH_MEMORIES_PATH, &body).await.inspect_err(|e| {
            error!("Failed to search memories: {}", e);
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> RecallError {
    if e.is_timeout() {
        RecallError::Timeout(e.to_string())
    } else if e.is_connect() {
        RecallError::Transport(format!("network: {e}"))
    } else if e.is_decode() || e.is_body() {
        RecallError::Transport(format!("body: {e}"))
    } else {
        RecallError::Transport(e.to_string())
    }
}
