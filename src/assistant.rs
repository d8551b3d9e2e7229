//! Chat assistant: one inbound message in, one reply out, with memory.
//!
//! Each call builds a [`QueryCarrier`] holding the inbound message as the
//! query for its conversation, so a search-backed memory can look up what is
//! relevant to it wherever `messages()` ends up running.

use crate::generation::{TextGenerator, TextStream};
use crate::memory::compact::is_summary_message;
use crate::memory::{ChatMemory, MemoryProvider};
use crate::message::{ChatMessage, ConversationId};
use crate::query_context::QueryCarrier;
use crate::Result;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const SYSTEM_PROMPT: &str = "You are a polite assistant";

pub struct ChatAssistant {
    provider: Arc<MemoryProvider>,
    generator: Arc<dyn TextGenerator>,
    system_prompt: String,
}

impl ChatAssistant {
    pub fn new(provider: Arc<MemoryProvider>, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            provider,
            generator,
            system_prompt: SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn provider(&self) -> &Arc<MemoryProvider> {
        &self.provider
    }

    /// Record `message`, then return the model input: system prompt first,
    /// history after
    async fn prepare(&self, memory: &ChatMemory, message: &str) -> Result<Vec<ChatMessage>> {
        memory.add(ChatMessage::user(message)).await?;
        let history = memory.messages().await?;

        let mut input = Vec::with_capacity(history.len() + 1);
        input.push(ChatMessage::system(self.system_prompt.clone()));
        // Stored summaries stay; other System messages are superseded by the prompt
        input.extend(
            history
                .into_iter()
                .filter(|m| !m.is_system() || is_summary_message(m.text())),
        );
        Ok(input)
    }

    pub async fn chat(&self, id: &ConversationId, message: &str) -> Result<String> {
        info!("Chat request for memory ID: {}", id);
        let memory = self.provider.get(id)?;
        let carrier = QueryCarrier::new().with_query(id.clone(), message);

        carrier
            .scope(async {
                let input = self.prepare(&memory, message).await?;
                debug!("Sending {} messages to generator", input.len());
                let reply = self.generator.chat(&input).await?;
                memory.add(ChatMessage::assistant(reply.clone())).await?;
                Ok::<_, crate::RecallError>(reply)
            })
            .await
    }

    /// Streamed variant of [`ChatAssistant::chat`].
    ///
    /// Chunks are forwarded as they arrive. The assembled reply is added to
    /// memory once the stream ends; a failed stream adds nothing.
    pub async fn chat_streaming(&self, id: &ConversationId, message: &str) -> Result<TextStream> {
        info!("Streaming chat request for memory ID: {}", id);
        let memory = self.provider.get(id)?;
        let carrier = QueryCarrier::new().with_query(id.clone(), message);

        let chunks = carrier
            .scope(async {
                let input = self.prepare(&memory, message).await?;
                self.generator.chat_stream(&input).await
            })
            .await?;

        let state = StreamState {
            chunks,
            memory,
            reply: String::new(),
            failed: false,
        };
        let stream = futures::stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    state.reply.push_str(&chunk);
                    Some((Ok(chunk), Some(state)))
                }
                Some(Err(e)) => {
                    state.failed = true;
                    Some((Err(e), Some(state)))
                }
                None => {
                    if state.failed {
                        warn!("Stream failed for memory ID {}, reply not stored", state.memory.id());
                        return None;
                    }
                    let reply = std::mem::take(&mut state.reply);
                    match state.memory.add(ChatMessage::assistant(reply)).await {
                        Ok(()) => None,
                        Err(e) => Some((Err(e), None)),
                    }
                }
            }
        });

        Ok(Box::pin(carrier.propagate(stream)))
    }
}

struct StreamState {
    chunks: TextStream,
    memory: Arc<ChatMemory>,
    reply: String,
    failed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use crate::RecallError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Scripted {
        seen: Mutex<Vec<Vec<ChatMessage>>>,
        chunks: Vec<&'static str>,
        fail_midway: bool,
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok("summary".to_string())
        }

        async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok("Nice to meet you".to_string())
        }

        async fn chat_stream(&self, messages: &[ChatMessage]) -> Result<TextStream> {
            self.seen.lock().unwrap().push(messages.to_vec());
            let mut items: Vec<Result<String>> =
                self.chunks.iter().map(|c| Ok(c.to_string())).collect();
            if self.fail_midway {
                items.push(Err(RecallError::Generation("network: reset".to_string())));
            }
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    fn assistant(generator: Arc<Scripted>) -> ChatAssistant {
        let provider = MemoryProvider::new(Arc::new(InMemoryStore::new()));
        ChatAssistant::new(Arc::new(provider), generator)
    }

    #[tokio::test]
    async fn test_chat_records_both_turns() {
        let generator = Arc::new(Scripted::default());
        let assistant = assistant(generator.clone());
        let id = ConversationId::from("user123");

        let reply = assistant.chat(&id, "My name is Will").await.unwrap();
        assert_eq!(reply, "Nice to meet you");

        let seen = generator.seen.lock().unwrap().clone();
        assert_eq!(
            seen[0],
            vec![
                ChatMessage::system(SYSTEM_PROMPT),
                ChatMessage::user("My name is Will"),
            ]
        );

        let memory = assistant.provider().get(&id).unwrap();
        assert_eq!(
            memory.messages().await.unwrap(),
            vec![
                ChatMessage::user("My name is Will"),
                ChatMessage::assistant("Nice to meet you"),
            ]
        );
    }

    #[tokio::test]
    async fn test_streaming_stores_assembled_reply() {
        let generator = Arc::new(Scripted {
            chunks: vec!["Hel", "lo ", "Will"],
            ..Default::default()
        });
        let assistant = assistant(generator);
        let id = ConversationId::from("user123");

        let chunks: Vec<String> = assistant
            .chat_streaming(&id, "hi")
            .await
            .unwrap()
            .map(|c| c.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec!["Hel", "lo ", "Will"]);

        let memory = assistant.provider().get(&id).unwrap();
        assert_eq!(
            memory.messages().await.unwrap(),
            vec![ChatMessage::user("hi"), ChatMessage::assistant("Hello Will")]
        );
    }

    #[tokio::test]
    async fn test_failed_stream_stores_no_reply() {
        let generator = Arc::new(Scripted {
            chunks: vec!["partial"],
            fail_midway: true,
            ..Default::default()
        });
        let assistant = assistant(generator);
        let id = ConversationId::from("user123");

        let results: Vec<Result<String>> = assistant
            .chat_streaming(&id, "hi")
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(results.len(), 2);
        assert!(results[1].is_err());

        let memory = assistant.provider().get(&id).unwrap();
        assert_eq!(memory.messages().await.unwrap(), vec![ChatMessage::user("hi")]);
    }
}
