//! Payload normalizer.
//!
//! Turns heterogeneous, sometimes malformed model output into the canonical
//! [`TurnPayload`]. Both entry points are total: anything that cannot be
//! recovered into a schema-valid payload yields `None`.
//!
//! Normalization runs in a fixed order:
//!
//! 1. fold aliased memory keys into the nested `memory` object,
//! 2. unwrap invoke-by-name envelopes and pull out embedded payloads,
//! 3. canonicalize action type aliases and drop unknown action types,
//! 4. validate against the canonical schema (fail closed),
//! 5. recursively normalize embedded payloads and union-merge them in.

pub mod aliases;
pub mod recover;
pub mod schema;

pub use recover::normalize_from_text;
pub use schema::core_tool_definition;

use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::types::{ActionType, TurnPayload};

use aliases::{
    canonical_action_type, CORE_TOOL_NAME, ENVELOPE_NAME_KEYS, MARKDOWN_FLAG_KEYS,
    MEMORY_KEY_ALIASES, PAYLOAD_KEYS, SUBAGENTS_ACTION_TYPE,
};

/// Normalize a structured payload value into the canonical schema.
///
/// Never panics; returns `None` for anything that fails validation after
/// repair. Every action in the result carries a non-empty id.
pub fn normalize(raw: &Value) -> Option<TurnPayload> {
    let (reshaped, embedded) = reshape(raw.clone());

    let mut payload = match serde_json::from_value::<TurnPayload>(reshaped) {
        Ok(payload) => payload,
        Err(err) => {
            debug!(error = %err, "payload rejected by schema validation");
            return None;
        }
    };

    for item in embedded {
        payload = payload.merge(normalize(&item)?);
    }

    payload.ensure_action_ids();
    Some(payload)
}

/// Normalize a batch of payload values and merge them in order.
///
/// Values that fail normalization are skipped, matching how independent tool
/// invocations are treated.
pub fn normalize_all<'a>(values: impl IntoIterator<Item = &'a Value>) -> Option<TurnPayload> {
    crate::types::merge_payloads(values.into_iter().filter_map(normalize).collect())
}

enum Unwrapped {
    Action(Value),
    Embedded(Value),
}

/// Apply alias folding and envelope flattening, returning the reshaped value
/// and any embedded payloads found inside action arguments.
fn reshape(raw: Value) -> (Value, Vec<Value>) {
    let Value::Object(mut obj) = raw else {
        return (raw, Vec::new());
    };

    fold_memory_aliases(&mut obj);

    let mut embedded = Vec::new();
    match obj.remove("actions") {
        Some(Value::Array(actions)) => {
            let mut subagents = match obj.get("subagents") {
                Some(Value::Array(list)) => list.clone(),
                _ => Vec::new(),
            };

            let mut next_actions = Vec::with_capacity(actions.len());
            for action in actions {
                match unwrap_envelope(action) {
                    Unwrapped::Embedded(args) => embedded.push(args),
                    Unwrapped::Action(record) => {
                        if let Some(record) = canonicalize_action(record, &mut subagents) {
                            next_actions.push(record);
                        }
                    }
                }
            }

            obj.insert("actions".into(), Value::Array(next_actions));
            if !subagents.is_empty() {
                obj.insert("subagents".into(), Value::Array(subagents));
            }
        }
        Some(other) => {
            obj.insert("actions".into(), other);
        }
        None => {}
    }

    (Value::Object(obj), embedded)
}

fn fold_memory_aliases(obj: &mut Map<String, Value>) {
    let has_alias = MEMORY_KEY_ALIASES
        .iter()
        .any(|(alias, _)| obj.get(*alias).is_some_and(is_truthy));
    if !has_alias {
        return;
    }

    let mut memory = match obj.remove("memory") {
        Some(Value::Object(memory)) => memory,
        _ => Map::new(),
    };

    for (alias, field) in MEMORY_KEY_ALIASES {
        let Some(value) = obj.remove(*alias) else {
            continue;
        };
        let accepted = match *field {
            "set" => value.is_object(),
            _ => value.is_array(),
        };
        if accepted {
            memory.insert((*field).to_string(), value);
        }
    }

    obj.insert("memory".into(), Value::Object(memory));
}

fn unwrap_envelope(action: Value) -> Unwrapped {
    let Value::Object(record) = action else {
        return Unwrapped::Action(action);
    };

    let tool_name = ENVELOPE_NAME_KEYS
        .iter()
        .find_map(|key| record.get(*key).and_then(Value::as_str))
        .unwrap_or("");

    if tool_name == CORE_TOOL_NAME {
        if let Some(Value::Object(args)) = record.get("args") {
            if PAYLOAD_KEYS.iter().any(|key| args.contains_key(*key)) {
                return Unwrapped::Embedded(Value::Object(args.clone()));
            }
        }
    }

    let args = record.get("args").filter(|args| is_truthy(args));

    if record.get("type").and_then(Value::as_str) == Some(CORE_TOOL_NAME) {
        if let Some(args) = args {
            if let Some(action_type) = args.get("action").and_then(Value::as_str) {
                return Unwrapped::Action(flatten_action(action_type, args.get("args")));
            }
        }
    }

    if let (Some(action_type), Some(args)) = (record.get("action").and_then(Value::as_str), args) {
        if !record.get("type").is_some_and(is_truthy) {
            return Unwrapped::Action(flatten_action(action_type, Some(args)));
        }
    }

    Unwrapped::Action(Value::Object(record))
}

fn flatten_action(action_type: &str, args: Option<&Value>) -> Value {
    let mut flat = Map::new();
    flat.insert("type".into(), Value::String(action_type.to_string()));
    if let Some(Value::Object(args)) = args {
        flat.extend(args.clone());
    }
    Value::Object(flat)
}

fn canonicalize_action(record: Value, subagents: &mut Vec<Value>) -> Option<Value> {
    let Value::Object(mut record) = record else {
        return None;
    };

    let raw_type = record
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let action_type = canonical_action_type(&raw_type).to_string();
    if action_type != raw_type {
        record.insert("type".into(), Value::String(action_type.clone()));
    }

    if action_type == ActionType::GetDom.as_ref() {
        let include_markdown = MARKDOWN_FLAG_KEYS
            .iter()
            .find_map(|key| record.get(*key).and_then(Value::as_bool));
        if let Some(include_markdown) = include_markdown {
            let mut options = match record.remove("options") {
                Some(Value::Object(options)) => options,
                _ => Map::new(),
            };
            options.insert("includeMarkdown".into(), Value::Bool(include_markdown));
            record.insert("options".into(), Value::Object(options));
        }
    }

    if action_type == SUBAGENTS_ACTION_TYPE {
        if let Some(Value::Array(list)) = record.get("subagents") {
            subagents.extend(list.iter().cloned());
            return None;
        }
    }

    if !action_type.is_empty() && action_type.parse::<ActionType>().is_err() {
        trace!(action_type = %action_type, "dropping action outside the vocabulary");
        return None;
    }

    Some(Value::Object(record))
}

pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
