//! Settled result of one thread turn.

use serde::{Deserialize, Serialize};

use crate::types::{Action, MemoryOps, SubagentCall, ToolUse, TurnPayload, TurnResult, Usage};

/// Message used when a turn produced nothing to say.
pub const DEFAULT_DONE_MESSAGE: &str = "已完成任务。";

/// Message used when a turn failed without a usable error message.
pub const DEFAULT_FAILURE_MESSAGE: &str = "Claude Agent 请求失败。";

/// A core tool invocation to answer in a follow-up turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUseRecord {
    pub id: String,
    pub input: TurnPayload,
}

impl ToolUseRecord {
    /// Ids of the actions this invocation proposed.
    pub fn action_ids(&self) -> Vec<&str> {
        self.input
            .actions()
            .iter()
            .map(|a| a.id.as_str())
            .filter(|id| !id.is_empty())
            .collect()
    }
}

/// What a turn settled to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnOutcome {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Text shown to the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_actions: Option<bool>,
    #[serde(default)]
    pub tool_use_ids: Vec<String>,
    #[serde(default)]
    pub tool_inputs: Vec<TurnPayload>,
    #[serde(default)]
    pub thoughts: Vec<String>,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryOps>,
    #[serde(default)]
    pub subagents: Vec<SubagentCall>,
    #[serde(default)]
    pub external_tool_uses: Vec<ToolUse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TurnOutcome {
    /// A turn that failed with `error`.
    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            error: Some(if error.trim().is_empty() {
                DEFAULT_FAILURE_MESSAGE.to_string()
            } else {
                error
            }),
            ..Default::default()
        }
    }

    /// A turn that only has something to say.
    pub fn message_only(message: impl Into<String>, usage: Option<Usage>) -> Self {
        Self {
            message: Some(message.into()),
            usage,
            ..Default::default()
        }
    }

    /// Fold a streamer result into an outcome.
    ///
    /// The message falls back from the payload message to the first step,
    /// then the raw text, then [`DEFAULT_DONE_MESSAGE`].
    pub fn from_result(result: TurnResult) -> Self {
        let TurnResult {
            raw_text,
            parsed,
            tool_use_ids,
            tool_inputs,
            usage,
            external_tool_uses,
            thread_id,
        } = result;

        let Some(mut payload) = parsed else {
            return Self {
                thread_id,
                external_tool_uses,
                ..Self::message_only(non_empty_or_done(raw_text.trim()), usage)
            };
        };
        payload.ensure_action_ids();

        let message = payload
            .message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .or_else(|| {
                payload
                    .steps
                    .as_ref()
                    .and_then(|steps| steps.first())
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
            })
            .unwrap_or_else(|| non_empty_or_done(raw_text.trim()))
            .to_string();

        Self {
            thread_id,
            message: Some(message),
            actions: payload.actions.unwrap_or_default(),
            parallel_actions: payload.parallel_actions,
            tool_use_ids,
            tool_inputs,
            thoughts: payload.thoughts.unwrap_or_default(),
            steps: payload.steps.unwrap_or_default(),
            memory: payload.memory.filter(|m| !m.is_empty()),
            subagents: payload.subagents.unwrap_or_default(),
            external_tool_uses,
            usage,
            error: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }

    /// The message text, or an empty string.
    pub fn text(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }

    /// Core tool invocations paired with their payloads, ready for a
    /// follow-up turn.
    pub fn tool_uses(&self) -> Vec<ToolUseRecord> {
        self.tool_use_ids
            .iter()
            .zip(&self.tool_inputs)
            .map(|(id, input)| ToolUseRecord {
                id: id.clone(),
                input: input.clone(),
            })
            .collect()
    }
}

fn non_empty_or_done(text: &str) -> &str {
    if text.is_empty() {
        DEFAULT_DONE_MESSAGE
    } else {
        text
    }
}
