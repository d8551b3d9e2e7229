//! Chat message model shared by every store and collaborator

use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Opaque key scoping one conversation's memory
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A tool invocation the model asked for and that has not been answered yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolExecutionRequest {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One entry of a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatMessage {
    System {
        text: String,
    },
    User {
        text: String,
    },
    Assistant {
        text: String,
        /// Non-empty while the model waits on tool results
        tool_requests: Vec<ToolExecutionRequest>,
    },
    ToolResult {
        id: String,
        tool_name: String,
        text: String,
    },
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self::System { text: text.into() }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            text: text.into(),
            tool_requests: Vec::new(),
        }
    }

    /// Assistant turn that still waits on tool execution
    pub fn assistant_with_tools(
        text: impl Into<String>,
        tool_requests: Vec<ToolExecutionRequest>,
    ) -> Self {
        Self::Assistant {
            text: text.into(),
            tool_requests,
        }
    }

    pub fn tool_result(
        id: impl Into<String>,
        tool_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::ToolResult {
            id: id.into(),
            tool_name: tool_name.into(),
            text: text.into(),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::System { text } => text,
            Self::User { text } => text,
            Self::Assistant { text, .. } => text,
            Self::ToolResult { text, .. } => text,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System { .. })
    }

    pub fn has_tool_execution_requests(&self) -> bool {
        match self {
            Self::Assistant { tool_requests, .. } => !tool_requests.is_empty(),
            Self::System { .. } | Self::User { .. } | Self::ToolResult { .. } => false,
        }
    }

    /// Wire name of the message type
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::System { .. } => "SYSTEM",
            Self::User { .. } => "USER",
            Self::Assistant { .. } => "AI",
            Self::ToolResult { .. } => "TOOL_EXECUTION_RESULT",
        }
    }
}

impl Serialize for ChatMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let pending_tools = self.has_tool_execution_requests();
        let len = if pending_tools { 3 } else { 2 };
        let mut state = serializer.serialize_struct("ChatMessage", len)?;
        state.serialize_field("type", self.type_name())?;
        state.serialize_field("text", self.text())?;
        if pending_tools {
            state.serialize_field("hasToolExecutionRequests", &true)?;
        }
        state.end()
    }
}
