//! OpenAI-compatible chat-completions generator
//!
//! Works against api.openai.com or any server exposing `/chat/completions`
//! (ollama, lmstudio, vLLM). Streaming replies are parsed from SSE `data:`
//! lines and forwarded through a channel.

use super::{TextGenerator, TextStream};
use crate::config::LlmConfig;
use crate::message::ChatMessage;
use crate::{RecallError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

const DEFAULT_MAX_TOKENS: u32 = 2048;
const DEFAULT_TEMPERATURE: f32 = 0.3;
const MAX_ERROR_DETAIL_CHARS: usize = 500;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        let (role, tool_call_id) = match msg {
            ChatMessage::System { .. } => ("system", None),
            ChatMessage::User { .. } => ("user", None),
            ChatMessage::Assistant { .. } => ("assistant", None),
            ChatMessage::ToolResult { id, .. } => ("tool", Some(id.clone())),
        };
        Self {
            role: role.to_string(),
            content: Some(msg.text().to_string()),
            tool_call_id,
        }
    }
}

/// Chat-completions client with bearer auth
pub struct OpenAiGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(15))
            .user_agent(concat!("recall/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RecallError::Config(format!("http client: {e}")))?;

        info!(
            "Generator: model={}, base_url={}, auth={}",
            config.model,
            config.base_url,
            config.api_key.is_some()
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    async fn send(&self, messages: Vec<WireMessage>, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            stream,
        };

        let mut req_builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if stream {
            req_builder = req_builder.header("Accept", "text/event-stream");
        }
        if let Some(key) = &self.api_key {
            req_builder = req_builder.bearer_auth(key);
        }

        let response = req_builder
            .json(&request)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        check_response_status(response).await
    }

    async fn complete(&self, messages: Vec<WireMessage>) -> Result<String> {
        debug!("Chat completion with {} messages", messages.len());
        let response = self.send(messages, false).await?;
        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| RecallError::Generation(e.to_string()))?;

        Ok(chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        debug!("Calling generator with prompt length: {}", prompt.len());
        self.complete(vec![WireMessage {
            role: "user".to_string(),
            content: Some(prompt.to_string()),
            tool_call_id: None,
        }])
        .await
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        self.complete(messages.iter().map(WireMessage::from).collect())
            .await
    }

    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        let response = self
            .send(messages.iter().map(WireMessage::from).collect(), true)
            .await?;

        let (tx, rx) = mpsc::channel::<Result<String>>(32);
        let mut bytes = response.bytes_stream();
        tokio::spawn(async move {
            let mut lines = SseLines::default();
            while let Some(chunk_result) = bytes.next().await {
                let chunk = match chunk_result {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(map_reqwest_error(e))).await;
                        return;
                    }
                };
                lines.push(&chunk);

                while let Some(line) = lines.next_line() {
                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };
                    let data = data.trim();
                    if data == "[DONE]" {
                        return;
                    }
                    match serde_json::from_str::<StreamChunk>(data) {
                        Ok(parsed) => {
                            let Some(choice) = parsed.choices.into_iter().next() else {
                                continue;
                            };
                            if let Some(content) = choice.delta.content {
                                if !content.is_empty() && tx.send(Ok(content)).await.is_err() {
                                    // receiver dropped
                                    return;
                                }
                            }
                            if choice.finish_reason.is_some() {
                                return;
                            }
                        }
                        Err(e) => warn!("Skipping unparsable stream chunk: {}", e),
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

/// Raw SSE bytes split into complete lines.
///
/// Lines are decoded only once their newline arrived, so a multibyte
/// character split across network chunks stays intact.
#[derive(Debug, Default)]
struct SseLines {
    buffer: Vec<u8>,
}

impl SseLines {
    fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    fn next_line(&mut self) -> Option<String> {
        let newline_pos = self.buffer.iter().position(|b| *b == b'\n')?;
        let line: Vec<u8> = self.buffer.drain(..=newline_pos).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }
}

async fn check_response_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = truncate_error_detail(&extract_error_detail(&body), MAX_ERROR_DETAIL_CHARS);
    Err(RecallError::Generation(if detail.is_empty() {
        format!("API error {status}")
    } else {
        format!("API error {status}: {detail}")
    }))
}

pub(crate) fn extract_error_detail(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(msg) = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
        {
            return msg.to_string();
        }
        if let Some(msg) = value.get("error").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
        if let Some(msg) = value.get("message").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
        if let Some(msg) = value.get("detail").and_then(|m| m.as_str()) {
            return msg.to_string();
        }
    }

    trimmed.to_string()
}

pub(crate) fn truncate_error_detail(detail: &str, max_chars: usize) -> String {
    if detail.chars().count() <= max_chars {
        return detail.to_string();
    }

    let mut truncated = detail.chars().take(max_chars).collect::<String>();
    truncated.push_str("... [truncated]");
    truncated
}

fn map_reqwest_error(e: reqwest::Error) -> RecallError {
    if e.is_timeout() {
        RecallError::Timeout(e.to_string())
    } else if e.is_connect() {
        RecallError::Generation(format!("network: {e}"))
    } else {
        RecallError::Generation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> LlmConfig {
        LlmConfig {
            base_url: base_url.to_string(),
            model: "test-model".to_string(),
            api_key: Some("sk-test".to_string()),
            timeout_secs: 5,
        }
    }

    #[test]
    fn test_extract_error_detail() {
        assert_eq!(
            extract_error_detail(r#"{"error":{"message":"bad key"}}"#),
            "bad key"
        );
        assert_eq!(extract_error_detail(r#"{"detail":"nope"}"#), "nope");
        assert_eq!(extract_error_detail("  plain  "), "plain");
        assert_eq!(extract_error_detail(""), "");
    }

    #[test]
    fn test_truncate_error_detail() {
        assert_eq!(truncate_error_detail("short", 10), "short");
        assert_eq!(truncate_error_detail("abcdef", 3), "abc... [truncated]");
    }

    #[tokio::test]
    async fn test_generate_returns_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "SUMMARY"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let generator = OpenAiGenerator::new(&config(&server.uri())).unwrap();
        assert_eq!(generator.generate("summarize").await.unwrap(), "SUMMARY");
    }

    #[tokio::test]
    async fn test_generate_surfaces_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_string(r#"{"error":{"message":"invalid api key"}}"#),
            )
            .mount(&server)
            .await;

        let generator = OpenAiGenerator::new(&config(&server.uri())).unwrap();
        let err = generator.generate("x").await.unwrap_err();
        assert!(matches!(err, RecallError::Generation(ref m) if m.contains("invalid api key")));
    }

    #[test]
    fn test_sse_lines_keep_split_multibyte_characters() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut lines = SseLines::default();
        lines.push(&line[..split]);
        assert_eq!(lines.next_line(), None);
        lines.push(&line[split..]);
        let decoded = lines.next_line().unwrap();
        assert!(decoded.contains("café"), "got {decoded}");
        assert_eq!(lines.next_line(), None);
    }

    /// Serves one chunked SSE response, writing `parts` as separate HTTP chunks
    async fn serve_chunked(parts: Vec<Vec<u8>>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 8192];
            let _ = socket.read(&mut request).await.unwrap();

            socket
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n",
                )
                .await
                .unwrap();
            for part in parts {
                socket
                    .write_all(format!("{:x}\r\n", part.len()).as_bytes())
                    .await
                    .unwrap();
                socket.write_all(&part).await.unwrap();
                socket.write_all(b"\r\n").await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
            socket.write_all(b"0\r\n\r\n").await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_chat_stream_decodes_character_split_across_chunks() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"café\"},\"finish_reason\":null}]}\n\n",
            "data: [DONE]\n\n",
        )
        .as_bytes();
        let split = body.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let base_url = serve_chunked(vec![body[..split].to_vec(), body[split..].to_vec()]).await;

        let generator = OpenAiGenerator::new(&config(&base_url)).unwrap();
        let chunks: Vec<String> = generator
            .chat_stream(&[ChatMessage::user("hi")])
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["café".to_string()]);
    }

    #[tokio::test]
    async fn test_chat_stream_collects_deltas() {
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let generator = OpenAiGenerator::new(&config(&server.uri())).unwrap();
        let stream = generator
            .chat_stream(&[ChatMessage::user("hi")])
            .await
            .unwrap();
        let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;
        assert_eq!(chunks, vec!["Hel".to_string(), "lo".to_string()]);
    }
}
