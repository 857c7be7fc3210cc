//! Alias table for alternate upstream spellings.
//!
//! Every field-level alias the normalizer understands lives here; the
//! normalizer consults these tables once per payload.

/// Name of the core structured-output tool.
pub const CORE_TOOL_NAME: &str = "browser_actions";

/// Name prefix reserved for externally registered (non-core) tools.
pub const EXTERNAL_TOOL_PREFIX: &str = "mcp__";

/// Top-level payload keys. An argument object containing any of these is
/// treated as an embedded payload.
pub const PAYLOAD_KEYS: &[&str] = &[
    "actions",
    "subagents",
    "message",
    "steps",
    "thoughts",
    "memory",
    "parallelActions",
];

/// Flattened top-level memory keys and the nested field they map to.
pub const MEMORY_KEY_ALIASES: &[(&str, &str)] = &[("memory.set", "set"), ("memory.remove", "remove")];

/// Keys consulted, in order, for the tool name of an invoke-by-name envelope.
pub const ENVELOPE_NAME_KEYS: &[&str] = &["name", "tool", "type"];

/// Alternate action type spellings.
pub const ACTION_TYPE_ALIASES: &[(&str, &str)] = &[("DOM", "getDOM"), ("dom", "getDOM")];

/// Flags that request markdown alongside a DOM snapshot, folded into
/// `options.includeMarkdown`.
pub const MARKDOWN_FLAG_KEYS: &[&str] = &["includeMarkdown", "getMarkdown"];

/// Pseudo action type carrying a subagent list instead of a browser action.
pub const SUBAGENTS_ACTION_TYPE: &str = "subagents";

/// Resolve an action type alias to its canonical name.
pub fn canonical_action_type(raw: &str) -> &str {
    ACTION_TYPE_ALIASES
        .iter()
        .find(|(alias, _)| *alias == raw)
        .map(|(_, canonical)| *canonical)
        .unwrap_or(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dom_aliases_resolve_to_get_dom() {
        assert_eq!(canonical_action_type("DOM"), "getDOM");
        assert_eq!(canonical_action_type("dom"), "getDOM");
        assert_eq!(canonical_action_type("click"), "click");
    }
}
