//! JSON schema of the core structured-output tool.

use serde_json::{json, Value};
use strum::IntoEnumIterator;

use crate::types::{ActionType, ToolDefinition};

use super::aliases::CORE_TOOL_NAME;

const CORE_TOOL_DESCRIPTION: &str =
    "Respond with a message and optional browser actions. Use parallelActions=true for independent actions.";

/// Tool definition the model answers through.
pub fn core_tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: CORE_TOOL_NAME.to_string(),
        description: CORE_TOOL_DESCRIPTION.to_string(),
        input_schema: input_schema(),
    }
}

fn input_schema() -> Value {
    let action_types: Vec<String> = ActionType::iter().map(|t| t.to_string()).collect();

    json!({
        "type": "object",
        "properties": {
            "message": {"type": "string"},
            "actions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "type": {"type": "string", "enum": action_types},
                        "note": {"type": "string"},
                        "selector": {"type": "string"},
                        "x": {"type": "number"},
                        "y": {"type": "number"},
                        "button": {"type": "number"},
                        "behavior": {"type": "string", "enum": ["auto", "smooth"]},
                        "format": {"type": "string", "enum": ["png", "jpeg"]},
                        "url": {"type": "string"},
                        "text": {"type": "string"},
                        "clear": {"type": "boolean"},
                        "key": {"type": "string"},
                        "code": {"type": "string"},
                        "ctrlKey": {"type": "boolean"},
                        "altKey": {"type": "boolean"},
                        "shiftKey": {"type": "boolean"},
                        "metaKey": {"type": "boolean"},
                        "repeat": {"type": "boolean"},
                        "delayMs": {"type": "number"},
                        "targetSelector": {"type": "string"},
                        "toX": {"type": "number"},
                        "toY": {"type": "number"},
                        "value": {"type": "string"},
                        "label": {"type": "string"},
                        "options": {"type": "object"}
                    },
                    "required": ["type"]
                }
            },
            "subagents": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "name": {"type": "string"},
                        "prompt": {"type": "string"}
                    },
                    "required": ["prompt"]
                }
            },
            "thoughts": {"type": "array", "items": {"type": "string"}},
            "steps": {"type": "array", "items": {"type": "string"}},
            "parallelActions": {"type": "boolean"},
            "memory": {
                "type": "object",
                "properties": {
                    "set": {"type": "object"},
                    "remove": {"type": "array", "items": {"type": "string"}}
                }
            }
        },
        "required": []
    })
}
