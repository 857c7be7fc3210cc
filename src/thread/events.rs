//! Thread events: the wire-level units a consumer pulls from a turn.

use serde::{Deserialize, Serialize};

use crate::types::{Action, TurnPayload, Usage};

/// Events emitted while a thread runs a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ThreadEvent {
    /// First event of the first turn of a fresh thread.
    #[serde(rename = "thread.started")]
    ThreadStarted(ThreadStartedEvent),
    #[serde(rename = "turn.started")]
    TurnStarted(TurnStartedEvent),
    #[serde(rename = "turn.completed")]
    TurnCompleted(TurnCompletedEvent),
    #[serde(rename = "turn.failed")]
    TurnFailed(TurnFailedEvent),
    #[serde(rename = "item.started")]
    ItemStarted(ItemEvent),
    #[serde(rename = "item.updated")]
    ItemUpdated(ItemEvent),
    /// An item reached its final state.
    #[serde(rename = "item.completed")]
    ItemCompleted(ItemEvent),
    /// The turn raised instead of settling.
    #[serde(rename = "error")]
    Error(ThreadErrorEvent),
}

impl ThreadEvent {
    pub fn thread_started(thread_id: impl Into<String>) -> Self {
        Self::ThreadStarted(ThreadStartedEvent {
            thread_id: thread_id.into(),
        })
    }

    pub fn turn_started() -> Self {
        Self::TurnStarted(TurnStartedEvent {})
    }

    pub fn turn_completed(usage: Option<Usage>) -> Self {
        Self::TurnCompleted(TurnCompletedEvent { usage })
    }

    pub fn turn_failed(message: impl Into<String>) -> Self {
        Self::TurnFailed(TurnFailedEvent {
            error: ThreadErrorEvent {
                message: message.into(),
            },
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ThreadErrorEvent {
            message: message.into(),
        })
    }

    /// Whether this event ends the turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TurnCompleted(_) | Self::TurnFailed(_))
    }

    /// The item carried by an `item.*` event.
    pub fn item(&self) -> Option<&ThreadItem> {
        match self {
            Self::ItemStarted(e) | Self::ItemUpdated(e) | Self::ItemCompleted(e) => Some(&e.item),
            _ => None,
        }
    }

    /// Wire name of the event, as in the `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ThreadStarted(_) => "thread.started",
            Self::TurnStarted(_) => "turn.started",
            Self::TurnCompleted(_) => "turn.completed",
            Self::TurnFailed(_) => "turn.failed",
            Self::ItemStarted(_) => "item.started",
            Self::ItemUpdated(_) => "item.updated",
            Self::ItemCompleted(_) => "item.completed",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreadStartedEvent {
    pub thread_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TurnStartedEvent {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnCompletedEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnFailedEvent {
    pub error: ThreadErrorEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ItemEvent {
    pub item: ThreadItem,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreadErrorEvent {
    pub message: String,
}

/// One discrete piece of turn output.
///
/// The id is stable across the item's started, updated and completed events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThreadItem {
    pub id: String,
    #[serde(flatten)]
    pub details: ThreadItemDetails,
}

impl ThreadItem {
    pub fn new(id: impl Into<String>, details: ThreadItemDetails) -> Self {
        Self {
            id: id.into(),
            details,
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.details.kind()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThreadItemDetails {
    AgentMessage(AgentMessageItem),
    Reasoning(ReasoningItem),
    TodoList(TodoListItem),
    BrowserActions(BrowserActionsItem),
    Error(ErrorItem),
}

impl ThreadItemDetails {
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::AgentMessage(_) => ItemKind::AgentMessage,
            Self::Reasoning(_) => ItemKind::Reasoning,
            Self::TodoList(_) => ItemKind::TodoList,
            Self::BrowserActions(_) => ItemKind::BrowserActions,
            Self::Error(_) => ItemKind::Error,
        }
    }
}

/// Item kinds; each kind gets at most one id per turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    AgentMessage,
    Reasoning,
    TodoList,
    BrowserActions,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMessageItem {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningItem {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TodoItem {
    pub text: String,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TodoListItem {
    pub items: Vec<TodoItem>,
}

impl TodoListItem {
    pub fn from_steps(steps: &[String]) -> Self {
        Self {
            items: steps
                .iter()
                .map(|text| TodoItem {
                    text: text.clone(),
                    completed: false,
                })
                .collect(),
        }
    }
}

/// A batch of proposed browser actions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BrowserActionsItem {
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_use_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_inputs: Option<Vec<TurnPayload>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_actions: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorItem {
    pub message: String,
}
