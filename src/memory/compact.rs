//! Running-summary compaction helpers.
//!
//! A compacted conversation is a single System message:
//!   [optional preamble]\n\n<SUMMARY_PREFIX>\n<summary>
//! Compaction feeds any previous summary back into the prompt and splices the
//! new one in place of the old, so at most one marker exists per message.

use crate::message::ChatMessage;
use tracing::debug;

/// Marker that introduces the running summary inside a System message
pub const SUMMARY_PREFIX: &str =
    "Context: The following is a summary of the previous conversation:";

/// Instruction preamble sent to the generator before the dialogue lines
pub const SUMMARIZATION_PROMPT: &str =
    "Summarize the following dialogue into a brief summary, preserving context and tone:\n\n";

/// Check if a System text carries a running summary
pub fn is_summary_message(content: &str) -> bool {
    content.contains(SUMMARY_PREFIX)
}

/// Text following the marker, trimmed. `None` without a marker.
pub fn extract_summary(content: &str) -> Option<&str> {
    content
        .find(SUMMARY_PREFIX)
        .map(|idx| content[idx + SUMMARY_PREFIX.len()..].trim())
}

/// Messages that get rendered into the summarization prompt.
///
/// System messages only contribute their previous summary (if any); their
/// instructions are kept out of the new summary.
pub fn build_compaction_input(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut input = Vec::with_capacity(messages.len());
    for msg in messages {
        match msg {
            ChatMessage::System { text } => {
                if let Some(summary) = extract_summary(text) {
                    input.push(ChatMessage::system(summary));
                }
            }
            ChatMessage::User { .. }
            | ChatMessage::Assistant { .. }
            | ChatMessage::ToolResult { .. } => input.push(msg.clone()),
        }
    }
    input
}

/// Render the summarization prompt, one line per message in original order
pub fn render_prompt(input: &[ChatMessage]) -> String {
    let mut prompt = String::from(SUMMARIZATION_PROMPT);
    for msg in input {
        match msg {
            ChatMessage::System { text } => {
                prompt.push_str("Context: ");
                prompt.push_str(text);
                prompt.push('\n');
            }
            ChatMessage::User { text } => {
                prompt.push_str("User: ");
                prompt.push_str(text);
                prompt.push('\n');
            }
            ChatMessage::Assistant { text, .. } => {
                prompt.push_str("Assistant: ");
                prompt.push_str(text);
                prompt.push('\n');
            }
            ChatMessage::ToolResult { tool_name, .. } => {
                debug!("Skipping tool result from {} in summary prompt", tool_name);
            }
        }
    }
    prompt
}

/// Splice `summary` into an existing System text (or start a new one).
///
/// Anything before an existing marker is kept as preamble; the old summary
/// is replaced, never appended to.
pub fn splice_summary(system_text: Option<&str>, summary: &str) -> String {
    let section = format!("{}\n{}", SUMMARY_PREFIX, summary);

    let preamble = match system_text {
        None => return section,
        Some(text) => match text.find(SUMMARY_PREFIX) {
            Some(idx) => text[..idx].trim_end(),
            None => text.trim_end(),
        },
    };

    if preamble.is_empty() {
        section
    } else {
        format!("{}\n\n{}", preamble, section)
    }
}
