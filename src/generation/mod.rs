//! Text-generation collaborator used for chat replies and summaries

pub(crate) mod openai;

pub use openai::OpenAiGenerator;

use crate::message::ChatMessage;
use crate::Result;
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Incremental reply chunks
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Single prompt in, full text out. Errors propagate to the caller.
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// Reply to a conversation. Defaults to a flattened transcript prompt.
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        self.generate(&transcript(messages)).await
    }

    /// Streamed reply. Defaults to a single chunk from [`TextGenerator::chat`].
    async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<TextStream> {
        let reply = self.chat(messages).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(reply) })))
    }
}

/// Plain transcript used by generators without a message-based API
pub fn transcript(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|msg| match msg {
            ChatMessage::System { text } => format!("[System] {}", text),
            ChatMessage::User { text } => format!("[User] {}", text),
            ChatMessage::Assistant { text, .. } => format!("[Assistant] {}", text),
            ChatMessage::ToolResult {
                tool_name, text, ..
            } => format!("[Tool {}] {}", tool_name, text),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct Echo;

    #[async_trait]
    impl TextGenerator for Echo {
        async fn generate(&self, prompt: &str) -> Result<String> {
            Ok(prompt.to_string())
        }
    }

    #[test]
    fn test_transcript() {
        let text = transcript(&[ChatMessage::system("s"), ChatMessage::user("u")]);
        assert_eq!(text, "[System] s\n\n[User] u");
    }

    #[tokio::test]
    async fn test_default_stream_yields_single_chunk() {
        let mut stream = Echo.chat_stream(&[ChatMessage::user("hello")]).await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), "[User] hello");
        assert!(stream.next().await.is_none());
    }
}
