//! Turn requests and the conversation shapes sent to the completion service.

use bon::Builder;
use serde::{Deserialize, Serialize};

/// Tool definition sent to the completion service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// How the model may choose tools.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolChoice {
    #[default]
    Auto,
    /// Force a call to the named tool.
    Tool(String),
}

impl ToolChoice {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Auto => serde_json::json!({"type": "auto"}),
            Self::Tool(name) => serde_json::json!({"type": "tool", "name": name}),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One block of message content, serialized in the service's wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

/// A message in the conversation sent for one exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl ConversationMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content,
        }
    }

    pub fn user_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content,
        }
    }
}

/// Input to one Turn Streamer invocation. Immutable once the turn starts.
#[derive(Debug, Clone, Builder)]
pub struct TurnRequest {
    /// User input, already flattened to plain text.
    #[builder(into)]
    pub input: String,
    #[builder(into)]
    pub system: String,
    #[builder(into)]
    pub model: String,
    /// Core action schema plus any externally discovered tool schemas.
    #[builder(default)]
    pub tools: Vec<ToolDefinition>,
    #[builder(default = 1024)]
    pub max_tokens: u32,
    /// Force the model to answer through the core tool.
    #[builder(default)]
    pub force_tool: bool,
}
