//! Recovery of structured payloads from free-form model text.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::trace;

use crate::types::TurnPayload;

use super::normalize;

fn code_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)^```(?:json)?\s*(.*?)\s*```$").expect("valid regex"))
}

fn trailing_comma_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([}\]])").expect("valid regex"))
}

fn empty_list_value_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#""(thoughts|steps|actions|subagents)"\s*:\s*([},])"#).expect("valid regex")
    })
}

fn empty_memory_value_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""memory"\s*:\s*([},])"#).expect("valid regex"))
}

fn key_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(thoughts|steps|actions|message|parallelActions|memory|subagents)\s*:\s*(.*)$")
            .expect("valid regex")
    })
}

/// Recover a canonical payload from raw model text.
///
/// Tries the body of a single fenced code block, or the raw text, as JSON
/// after light repair. When that yields nothing, or only an empty payload,
/// text whose first line opens with a payload key is read as a
/// line-oriented `key: value` rendering. Each candidate goes through
/// [`normalize`].
pub fn normalize_from_text(text: &str) -> Option<TurnPayload> {
    let from_json = parse_json_candidate(text);
    if from_json.as_ref().is_some_and(|p| *p != TurnPayload::default()) {
        return from_json;
    }

    parse_key_value_lines(text)
        .and_then(|value| normalize(&value))
        .or(from_json)
}

fn parse_json_candidate(text: &str) -> Option<TurnPayload> {
    let candidate = structured_candidate(text).filter(|c| !c.is_empty())?;
    let repaired = repair_json(&candidate).unwrap_or(candidate);
    match serde_json::from_str::<Value>(&repaired) {
        Ok(value) => normalize(&value),
        Err(err) => {
            trace!(error = %err, "text is not parseable as JSON");
            None
        }
    }
}

/// Body of the text when it is exactly one fenced code block (optionally
/// tagged `json`).
pub fn extract_single_code_fence(text: &str) -> Option<&str> {
    code_fence_re()
        .captures(text.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// The part of `raw` worth attempting to parse as JSON.
///
/// Returns `None` when the text contains a fence that is not the whole text;
/// such text is prose with an embedded snippet, not a payload.
fn structured_candidate(raw: &str) -> Option<String> {
    if let Some(body) = extract_single_code_fence(raw) {
        return Some(body.trim().to_string());
    }
    if raw.contains("```") {
        return None;
    }
    let trimmed = raw.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed.to_string());
    }
    Some(raw.to_string())
}

/// Light JSON repair.
///
/// Slices from the first `{` to the last `}`, strips trailing commas before a
/// closing bracket, and fills empty values of list-valued keys with `[]` and
/// of `memory` with `{}`. Returns `None` when the text has no object span.
pub fn repair_json(raw: &str) -> Option<String> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    let sliced = &raw[start..=end];
    let repaired = trailing_comma_re().replace_all(sliced, "${1}");
    let repaired = empty_list_value_re().replace_all(&repaired, "\"${1}\":[]${2}");
    let repaired = empty_memory_value_re().replace_all(&repaired, "\"memory\":{}${1}");
    Some(repaired.into_owned())
}

/// Parse a line-oriented `key: value` rendering of a payload.
///
/// The first non-empty line must start with a recognized payload key. Values
/// may span lines while brackets remain open. Each value is parsed as JSON
/// when possible and kept as a trimmed string otherwise.
fn parse_key_value_lines(raw: &str) -> Option<Value> {
    let text = raw.trim();
    if text.is_empty() || text.contains("```") {
        return None;
    }
    if text.starts_with('{') && text.ends_with('}') {
        return None;
    }

    let lines = text.lines().map(str::trim).filter(|line| !line.is_empty());
    let first = lines.clone().next()?;
    if !key_line_re().is_match(first) {
        return None;
    }

    let mut result = Map::new();
    let mut current: Option<(String, String)> = None;
    let mut depth: i64 = 0;

    for line in lines {
        match key_line_re().captures(line) {
            Some(caps) if depth == 0 => {
                flush_entry(&mut result, current.take());
                let value = caps[2].to_string();
                depth = bracket_delta(&value);
                current = Some((caps[1].to_string(), value));
            }
            _ => {
                if let Some((_, value)) = current.as_mut() {
                    value.push('\n');
                    value.push_str(line);
                    depth += bracket_delta(line);
                }
            }
        }
    }
    flush_entry(&mut result, current);

    if result.is_empty() {
        None
    } else {
        Some(Value::Object(result))
    }
}

fn flush_entry(result: &mut Map<String, Value>, entry: Option<(String, String)>) {
    let Some((key, value)) = entry else {
        return;
    };
    if value.is_empty() {
        return;
    }
    let trimmed = value.trim();
    let parsed =
        serde_json::from_str::<Value>(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()));
    result.insert(key, parsed);
}

fn bracket_delta(line: &str) -> i64 {
    line.chars().fold(0, |depth, c| match c {
        '[' | '{' => depth + 1,
        ']' | '}' => depth - 1,
        _ => depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActionType;
    use pretty_assertions::assert_eq;

    #[test]
    fn recovers_fenced_json() {
        let text = "```json\n{\"message\":\"Done\",\"actions\":[{\"type\":\"DOM\",\"getMarkdown\":true}]}\n```";
        let payload = normalize_from_text(text).unwrap();
        assert_eq!(payload.message.as_deref(), Some("Done"));
        let action = &payload.actions()[0];
        assert_eq!(action.action_type, ActionType::GetDom);
        assert_eq!(
            action.options.as_ref().and_then(|o| o.get("includeMarkdown")),
            Some(&Value::Bool(true))
        );
        assert!(!action.id.is_empty());
    }

    #[test]
    fn repairs_empty_list_values() {
        let payload = normalize_from_text("{\"thoughts\":,\"message\":\"ok\"}").unwrap();
        assert_eq!(payload.message.as_deref(), Some("ok"));
        assert_eq!(payload.thoughts, Some(Vec::new()));
    }

    #[test]
    fn repairs_trailing_commas_and_surrounding_prose() {
        let payload =
            normalize_from_text("Here you go: {\"steps\": [\"a\", \"b\",], \"memory\": }").unwrap();
        assert_eq!(payload.steps, Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(payload.memory, Some(Default::default()));
    }

    #[test]
    fn parses_key_value_lines() {
        let text = "message: Looking now\nactions: [\n  {\"type\": \"scroll\", \"y\": 300}\n]\nparallelActions: true";
        let payload = normalize_from_text(text).unwrap();
        assert_eq!(payload.message.as_deref(), Some("Looking now"));
        assert_eq!(payload.actions()[0].action_type, ActionType::Scroll);
        assert_eq!(payload.parallel_actions, Some(true));
    }

    #[test]
    fn json_candidate_wins_over_key_value_lines() {
        let text = "message: from lines\nnote {\"message\": \"from json\"}";
        let payload = normalize_from_text(text).unwrap();
        assert_eq!(payload.message.as_deref(), Some("from json"));
    }

    #[test]
    fn empty_object_is_still_a_payload() {
        assert_eq!(normalize_from_text("{}"), Some(TurnPayload::default()));
    }

    #[test]
    fn plain_prose_is_not_a_payload() {
        assert_eq!(normalize_from_text("I clicked the button for you."), None);
        assert_eq!(normalize_from_text(""), None);
        assert_eq!(normalize_from_text("see ```js\nx()\n``` for details"), None);
    }

    #[test]
    fn repair_json_slices_object_span() {
        assert_eq!(repair_json("x {\"a\":1,} y").as_deref(), Some("{\"a\":1}"));
        assert_eq!(repair_json("no object"), None);
        assert_eq!(repair_json("} backwards {"), None);
    }

    #[test]
    fn extracts_only_whole_text_fences() {
        assert_eq!(extract_single_code_fence("```\n{}\n```"), Some("{}"));
        assert_eq!(extract_single_code_fence("```JSON\n{\"a\":1}\n```"), Some("{\"a\":1}"));
        assert_eq!(extract_single_code_fence("text ```{}```"), None);
    }
}
