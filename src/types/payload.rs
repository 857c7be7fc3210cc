//! Canonical turn payload: the normalized structured result of one turn.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// Closed vocabulary of browser action types.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ActionType {
    Click,
    Scroll,
    Touch,
    Screenshot,
    Navigate,
    ClickDom,
    Input,
    DoubleClick,
    RightClick,
    Hover,
    Key,
    Type,
    Drag,
    Select,
    Focus,
    Blur,
    #[serde(rename = "getDOM")]
    #[strum(serialize = "getDOM")]
    GetDom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollBehavior {
    Auto,
    Smooth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
}

/// One normalized, executable browser operation.
///
/// After normalization `id` is always non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<ScrollBehavior>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<ImageFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clear: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctrl_key: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_key: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shift_key: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_key: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Map<String, serde_json::Value>>,
}

impl Action {
    /// Bare action of the given type with no id and no fields.
    pub fn new(action_type: ActionType) -> Self {
        Self {
            id: String::new(),
            action_type,
            note: None,
            selector: None,
            x: None,
            y: None,
            button: None,
            behavior: None,
            format: None,
            url: None,
            text: None,
            clear: None,
            key: None,
            code: None,
            ctrl_key: None,
            alt_key: None,
            shift_key: None,
            meta_key: None,
            repeat: None,
            delay_ms: None,
            target_selector: None,
            to_x: None,
            to_y: None,
            value: None,
            label: None,
            options: None,
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }
}

/// A delegated sub-conversation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubagentCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub prompt: String,
}

/// Memory instructions forwarded verbatim to the memory store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryOps {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove: Option<Vec<String>>,
}

impl MemoryOps {
    pub fn is_empty(&self) -> bool {
        self.set.as_ref().map_or(true, |s| s.is_empty())
            && self.remove.as_ref().map_or(true, |r| r.is_empty())
    }
}

/// The canonical, schema-valid structured result of a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<Action>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_actions: Option<bool>,
    #[serde(
        default,
        deserialize_with = "string_or_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub thoughts: Option<Vec<String>>,
    #[serde(
        default,
        deserialize_with = "string_or_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub steps: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryOps>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagents: Option<Vec<SubagentCall>>,
}

impl TurnPayload {
    /// Union-merge `other` into `self`.
    ///
    /// First non-empty message wins, lists concatenate in encounter order,
    /// `parallel_actions` is OR-ed, `memory.set` shallow-merges with later keys
    /// winning, and `memory.remove` unions as an ordered set. The operation is
    /// associative.
    pub fn merge(mut self, other: TurnPayload) -> TurnPayload {
        if self.message.as_deref().map_or(true, str::is_empty) {
            if let Some(message) = other.message.filter(|m| !m.is_empty()) {
                self.message = Some(message);
            }
        }

        extend_non_empty(&mut self.actions, other.actions);
        extend_non_empty(&mut self.thoughts, other.thoughts);
        extend_non_empty(&mut self.steps, other.steps);
        extend_non_empty(&mut self.subagents, other.subagents);

        if let Some(parallel) = other.parallel_actions {
            self.parallel_actions = Some(self.parallel_actions.unwrap_or(false) || parallel);
        }

        if let Some(memory) = other.memory {
            let merged = self.memory.get_or_insert_with(MemoryOps::default);
            if let Some(set) = memory.set {
                merged.set.get_or_insert_with(BTreeMap::new).extend(set);
            }
            if let Some(remove) = memory.remove.filter(|r| !r.is_empty()) {
                let existing = merged.remove.get_or_insert_with(Vec::new);
                for key in remove {
                    if !existing.contains(&key) {
                        existing.push(key);
                    }
                }
            }
        }

        self
    }

    /// Assign a fresh opaque id to every action lacking one.
    pub fn ensure_action_ids(&mut self) {
        for action in self.actions.iter_mut().flatten() {
            if action.id.is_empty() {
                action.id = uuid::Uuid::new_v4().simple().to_string();
            }
        }
    }

    pub fn actions(&self) -> &[Action] {
        self.actions.as_deref().unwrap_or_default()
    }
}

/// Merge payloads produced by independent tool invocations of one turn.
pub fn merge_payloads(payloads: Vec<TurnPayload>) -> Option<TurnPayload> {
    let mut iter = payloads.into_iter();
    let first = iter.next()?;
    let mut rest = iter.peekable();
    if rest.peek().is_none() {
        return Some(first);
    }
    Some(
        std::iter::once(first)
            .chain(rest)
            .fold(TurnPayload::default(), TurnPayload::merge),
    )
}

fn extend_non_empty<T>(target: &mut Option<Vec<T>>, source: Option<Vec<T>>) {
    if let Some(items) = source.filter(|items| !items.is_empty()) {
        target.get_or_insert_with(Vec::new).extend(items);
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
    }

    Ok(
        match Option::<StringOrList>::deserialize(deserializer)? {
            None => None,
            Some(StringOrList::One(s)) => Some(vec![s]),
            Some(StringOrList::Many(list)) => Some(list),
        },
    )
}
