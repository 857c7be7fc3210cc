//! Output of one Turn Streamer invocation.

use serde::{Deserialize, Serialize};

use super::payload::TurnPayload;
use super::usage::Usage;

/// A structured, named tool invocation emitted by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Result of executing one action, keyed by the action id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final assembly of one network exchange.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnResult {
    /// Accumulated assistant text.
    pub raw_text: String,
    /// Merged canonical payload, or `None` when nothing could be recovered.
    pub parsed: Option<TurnPayload>,
    /// Ids of the core tool invocations that produced a valid payload.
    pub tool_use_ids: Vec<String>,
    /// Per-invocation payloads, in the same order as `tool_use_ids`.
    pub tool_inputs: Vec<TurnPayload>,
    pub usage: Option<Usage>,
    /// Invocations of externally registered tools, passed through untouched.
    pub external_tool_uses: Vec<ToolUse>,
    /// Thread id echoed by the service, if any.
    pub thread_id: Option<String>,
}

impl TurnResult {
    /// The single core tool-use id, when exactly one was parsed.
    pub fn tool_use_id(&self) -> Option<&str> {
        match self.tool_use_ids.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }

    /// The single core tool input, when exactly one was parsed.
    pub fn tool_input(&self) -> Option<&TurnPayload> {
        match self.tool_inputs.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}
