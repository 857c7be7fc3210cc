//! Incremental views of a turn while it streams.

use serde::{Deserialize, Serialize};

use super::payload::{Action, TurnPayload};

/// Partial, monotonically-growing view of the assistant output.
///
/// Each update supersedes the previous one for the fields it carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thoughts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<Action>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_actions: Option<bool>,
}

impl StreamUpdate {
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            message: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn thoughts(chunk: impl Into<String>) -> Self {
        Self {
            thoughts: Some(vec![chunk.into()]),
            ..Default::default()
        }
    }

    /// Whether this update carries anything a consumer renders live.
    ///
    /// Snapshots that only carry actions are not forwarded.
    pub fn is_renderable(&self) -> bool {
        self.message.is_some() || self.thoughts.is_some() || self.steps.is_some()
    }
}

impl From<TurnPayload> for StreamUpdate {
    fn from(payload: TurnPayload) -> Self {
        Self {
            message: payload.message,
            thoughts: payload.thoughts,
            steps: payload.steps,
            actions: payload.actions,
            parallel_actions: payload.parallel_actions,
        }
    }
}
