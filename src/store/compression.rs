//! Compression store: folds old turns into a running summary.
//!
//! On every write the policy is checked in order:
//!   1. empty snapshot            -> ignored
//!   2. pending tool calls last   -> written as-is
//!   3. System / ToolResult last  -> written as-is
//!   4. len <= threshold          -> written as-is
//!   5. otherwise                 -> compacted into one System message

use super::{InMemoryStore, MessageStore};
use crate::generation::TextGenerator;
use crate::memory::compact::{build_compaction_input, render_prompt, splice_summary};
use crate::message::{ChatMessage, ConversationId};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 5;

pub struct CompressionStore {
    delegate: Arc<dyn MessageStore>,
    generator: Arc<dyn TextGenerator>,
    threshold: usize,
    retained_turns: usize,
}

impl CompressionStore {
    /// Compression over a process-local store
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self::with_delegate(Arc::new(InMemoryStore::new()), generator)
    }

    pub fn with_delegate(delegate: Arc<dyn MessageStore>, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            delegate,
            generator,
            threshold: DEFAULT_COMPRESSION_THRESHOLD,
            retained_turns: 0,
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    /// Keep the newest `n` raw messages after the summary.
    ///
    /// Zero (the default) persists the summary alone.
    pub fn with_retained_turns(mut self, n: usize) -> Self {
        self.retained_turns = n;
        self
    }

    async fn compress(&self, id: &ConversationId, messages: &[ChatMessage]) -> Result<String> {
        info!(
            "Triggering semantic compression for memory ID: {} with {} messages",
            id,
            messages.len()
        );
        let input = build_compaction_input(messages);
        let prompt = render_prompt(&input);
        self.generator.generate(&prompt).await
    }

    /// Newest raw messages to keep next to the summary, never starting on a
    /// tool result whose request was summarized away
    fn retained_tail(&self, messages: &[ChatMessage]) -> Vec<ChatMessage> {
        if self.retained_turns == 0 {
            return Vec::new();
        }
        let raw: Vec<&ChatMessage> = messages.iter().filter(|m| !m.is_system()).collect();
        let start = raw.len().saturating_sub(self.retained_turns);
        raw[start..]
            .iter()
            .skip_while(|m| matches!(m, ChatMessage::ToolResult { .. }))
            .map(|m| (*m).clone())
            .collect()
    }
}

#[async_trait]
impl MessageStore for CompressionStore {
    async fn get(&self, id: &ConversationId) -> Result<Vec<ChatMessage>> {
        let messages = self.delegate.get(id).await?;
        debug!("getMessages memory ID: {}, {} messages", id, messages.len());
        Ok(messages)
    }

    async fn replace(&self, id: &ConversationId, messages: Vec<ChatMessage>) -> Result<()> {
        info!("Updating memory ID: {} with {} messages", id, messages.len());

        let Some(last) = messages.last() else {
            warn!("No messages to compress for memory ID: {}", id);
            return Ok(());
        };

        match last {
            ChatMessage::Assistant { tool_requests, .. } if !tool_requests.is_empty() => {
                info!(
                    "Skipping compression for memory ID: {} [function call in the last message]",
                    id
                );
                return self.delegate.replace(id, messages).await;
            }
            ChatMessage::System { .. } | ChatMessage::ToolResult { .. } => {
                info!(
                    "Skipping compression for memory ID: {} [system message or function call response in the last message]",
                    id
                );
                return self.delegate.replace(id, messages).await;
            }
            ChatMessage::User { .. } | ChatMessage::Assistant { .. } => {}
        }

        if messages.len() <= self.threshold {
            debug!(
                "No compression for memory ID: {} [not more than {} messages]",
                id, self.threshold
            );
            return self.delegate.replace(id, messages).await;
        }

        let summary = self.compress(id, &messages).await?;

        let existing_system = messages.iter().find_map(|m| match m {
            ChatMessage::System { text } => Some(text.as_str()),
            _ => None,
        });
        let system = ChatMessage::system(splice_summary(existing_system, &summary));
        info!("Generated system message with summary: {}", system.text());

        let mut compacted = vec![system];
        compacted.extend(self.retained_tail(&messages));
        info!(
            "Updating memory messages of memory ID: {} ({} -> {} messages)",
            id,
            messages.len(),
            compacted.len()
        );
        self.delegate.replace(id, compacted).await
    }

    async fn delete(&self, id: &ConversationId) -> Result<()> {
        info!("Deleting memory ID: {}", id);
        self.delegate.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::compact::SUMMARY_PREFIX;
    use crate::message::ToolExecutionRequest;
    use crate::RecallError;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Returns a fixed summary and records every prompt
    struct FixedGenerator {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    impl FixedGenerator {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TextGenerator for FixedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(self.reply.clone())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Err(RecallError::Generation("model unavailable".to_string()))
        }
    }

    fn id() -> ConversationId {
        ConversationId::from("c1")
    }

    fn six_turns() -> Vec<ChatMessage> {
        vec![
            ChatMessage::system("You are helpful"),
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
            ChatMessage::user("q2"),
            ChatMessage::assistant("a2"),
            ChatMessage::user("q3"),
        ]
    }

    fn pending_tool_call() -> ChatMessage {
        ChatMessage::assistant_with_tools(
            "",
            vec![ToolExecutionRequest {
                id: "call_1".to_string(),
                name: "lookup".to_string(),
                arguments: "{}".to_string(),
            }],
        )
    }

    #[tokio::test]
    async fn test_compacts_into_single_system_message() {
        let generator = FixedGenerator::new("SUMMARY");
        let store = CompressionStore::new(generator.clone());

        store.replace(&id(), six_turns()).await.unwrap();

        let stored = store.get(&id()).await.unwrap();
        assert_eq!(
            stored,
            vec![ChatMessage::system(format!(
                "You are helpful\n\n{}\nSUMMARY",
                SUMMARY_PREFIX
            ))]
        );
        assert_eq!(generator.calls(), 1);

        let prompt = generator.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("User: hi\nAssistant: hello\n"));
        assert!(prompt.ends_with("User: q3\n"));
        assert!(!prompt.contains("You are helpful"));
    }

    #[tokio::test]
    async fn test_short_snapshot_passes_through() {
        let generator = FixedGenerator::new("SUMMARY");
        let store = CompressionStore::new(generator.clone());

        for len in 1..=DEFAULT_COMPRESSION_THRESHOLD {
            let snapshot: Vec<ChatMessage> = six_turns().into_iter().take(len).collect();
            store.replace(&id(), snapshot.clone()).await.unwrap();
            assert_eq!(store.get(&id()).await.unwrap(), snapshot);
        }
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_pending_tool_call_never_compacts() {
        let generator = FixedGenerator::new("SUMMARY");
        let store = CompressionStore::new(generator.clone()).with_threshold(2);

        let mut snapshot = six_turns();
        snapshot.extend(six_turns());
        snapshot.push(pending_tool_call());

        store.replace(&id(), snapshot.clone()).await.unwrap();
        assert_eq!(store.get(&id()).await.unwrap(), snapshot);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_system_or_tool_result_last_passes_through() {
        let generator = FixedGenerator::new("SUMMARY");
        let store = CompressionStore::new(generator.clone());

        let mut with_tool_result = six_turns();
        with_tool_result.push(pending_tool_call());
        with_tool_result.push(ChatMessage::tool_result("call_1", "lookup", "42"));
        store.replace(&id(), with_tool_result.clone()).await.unwrap();
        assert_eq!(store.get(&id()).await.unwrap(), with_tool_result);

        let mut with_system = six_turns();
        with_system.push(ChatMessage::system("late instructions"));
        store.replace(&id(), with_system.clone()).await.unwrap();
        assert_eq!(store.get(&id()).await.unwrap(), with_system);

        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_snapshot_is_ignored() {
        let generator = FixedGenerator::new("SUMMARY");
        let store = CompressionStore::new(generator.clone());

        store.replace(&id(), vec![ChatMessage::user("keep")]).await.unwrap();
        store.replace(&id(), Vec::new()).await.unwrap();

        assert_eq!(store.get(&id()).await.unwrap(), vec![ChatMessage::user("keep")]);
    }

    #[tokio::test]
    async fn test_repeated_compaction_keeps_one_summary_section() {
        let generator = FixedGenerator::new("S1");
        let store = CompressionStore::new(generator.clone()).with_threshold(2);

        store.replace(&id(), six_turns()).await.unwrap();
        let mut snapshot = store.get(&id()).await.unwrap();
        snapshot.push(ChatMessage::user("q4"));
        snapshot.push(ChatMessage::assistant("a4"));

        let second = CompressionStore::with_delegate(
            Arc::new(InMemoryStore::new()),
            FixedGenerator::new("S2"),
        )
        .with_threshold(2);
        second.replace(&id(), snapshot).await.unwrap();

        let stored = second.get(&id()).await.unwrap();
        assert_eq!(stored.len(), 1);
        let text = stored[0].text();
        assert_eq!(text.matches(SUMMARY_PREFIX).count(), 1);
        assert_eq!(text, format!("You are helpful\n\n{}\nS2", SUMMARY_PREFIX));
    }

    #[tokio::test]
    async fn test_prior_summary_is_fed_back() {
        let generator = FixedGenerator::new("S2");
        let store = CompressionStore::new(generator.clone()).with_threshold(2);

        let snapshot = vec![
            ChatMessage::system(format!("{}\nS1", SUMMARY_PREFIX)),
            ChatMessage::user("q"),
            ChatMessage::assistant("a"),
        ];
        store.replace(&id(), snapshot).await.unwrap();

        let prompt = generator.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Context: S1\nUser: q\nAssistant: a\n"));
        assert_eq!(
            store.get(&id()).await.unwrap(),
            vec![ChatMessage::system(format!("{}\nS2", SUMMARY_PREFIX))]
        );
    }

    #[tokio::test]
    async fn test_generation_failure_propagates_and_keeps_history() {
        let store = CompressionStore::new(Arc::new(FailingGenerator)).with_threshold(2);

        store
            .replace(&id(), vec![ChatMessage::user("a"), ChatMessage::assistant("b")])
            .await
            .unwrap();
        let err = store.replace(&id(), six_turns()).await.unwrap_err();
        assert!(matches!(err, RecallError::Generation(_)));
        assert_eq!(store.get(&id()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retained_turns_follow_summary() {
        let store = CompressionStore::new(FixedGenerator::new("S")).with_retained_turns(2);

        store.replace(&id(), six_turns()).await.unwrap();
        let stored = store.get(&id()).await.unwrap();
        assert_eq!(stored.len(), 3);
        assert!(stored[0].is_system());
        assert_eq!(stored[1], ChatMessage::assistant("a2"));
        assert_eq!(stored[2], ChatMessage::user("q3"));
    }
}
