//! System prompt assembly.

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::config::{AgentSettings, SubagentConfig};
use crate::payload::aliases::CORE_TOOL_NAME;
use crate::types::ActionType;

/// The browser tab a turn runs against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<i64>,
}

impl TabContext {
    /// `key=value` description of the known fields, or `None` if none are.
    pub fn describe(&self) -> Option<String> {
        let parts: Vec<String> = [
            self.id.map(|id| format!("id={id}")),
            self.title.as_deref().filter(|t| !t.is_empty()).map(|t| format!("title={t}")),
            self.url.as_deref().filter(|u| !u.is_empty()).map(|u| format!("url={u}")),
            self.status.as_deref().filter(|s| !s.is_empty()).map(|s| format!("status={s}")),
            self.active.map(|a| format!("active={a}")),
            self.window_id.map(|w| format!("windowId={w}")),
        ]
        .into_iter()
        .flatten()
        .collect();

        (!parts.is_empty()).then(|| parts.join(", "))
    }
}

/// Build the system prompt for a turn.
pub fn build_system_prompt(
    settings: &AgentSettings,
    subagent: Option<&SubagentConfig>,
    tab: Option<&TabContext>,
    memory_line: Option<&str>,
) -> String {
    let vocabulary: Vec<String> = ActionType::iter().map(|t| t.to_string()).collect();

    let mut lines = vec![
        "You are the lead agent of a browser side-panel assistant and may delegate to the configured subagents.".to_string(),
        format!("Answer through the {CORE_TOOL_NAME} tool; do not write JSON as plain text."),
        format!("Actions may only use these types: {}.", vocabulary.join(", ")),
        "Read text and structure through the DOM first; screenshot or scroll only when the DOM is not enough.".to_string(),
        "Give a selector when targeting an element, otherwise x/y coordinates.".to_string(),
        "getDOM accepts includeMarkdown to also return a markdown summary of the page text.".to_string(),
        "Explore the current page and take the next feasible step yourself; ask the user only when you truly cannot continue, and say exactly what you need.".to_string(),
        "Put independent actions in one batch and set parallelActions to true.".to_string(),
        "To delegate, return a subagents array whose entries carry an id or name and a prompt; call several subagents in one turn when possible.".to_string(),
        "Write memory with memory.set and delete it with memory.remove.".to_string(),
        "External tool services are not subagents; never list them in subagents.".to_string(),
        "Base steps and thoughts on observable evidence from the page, the DOM or screenshots. When evidence is missing, say it is unconfirmed.".to_string(),
        "Build selectors from stable attributes such as id, name, data-testid, aria-label and role; narrow the scope and query the DOM again when a target is ambiguous.".to_string(),
    ];

    if settings.enable_thoughts {
        lines.push("Deep thinking is allowed; put your reasoning in the thoughts array.".into());
    }
    lines.push("List readable step descriptions matching the actions in the steps array.".into());

    if let Some(tab) = tab.and_then(TabContext::describe) {
        lines.push(format!("Current tab: {tab}"));
    }
    if let Some(master) = settings.master_system_prompt.as_deref().filter(|p| !p.is_empty()) {
        lines.push(master.to_string());
    }
    if let Some(memory) = memory_line.filter(|m| !m.is_empty()) {
        lines.push(memory.to_string());
    }
    if let Some(extra) = subagent
        .and_then(|s| s.system_prompt.as_deref())
        .filter(|p| !p.is_empty())
    {
        lines.push(extra.to_string());
    }

    lines.join("\n")
}

/// System prompt for a delegated subagent call.
pub fn subagent_prompt(subagent: &SubagentConfig) -> String {
    let mut lines = vec![
        "You are a collaborating subagent. Reply with a concise plain-text conclusion or steps.",
        "Do not output JSON and do not include actions.",
    ];
    if let Some(extra) = subagent.system_prompt.as_deref().filter(|p| !p.is_empty()) {
        lines.push(extra);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tab_description_skips_unknown_fields() {
        let tab = TabContext {
            id: Some(7),
            url: Some("https://example.com".into()),
            active: Some(true),
            ..Default::default()
        };
        assert_eq!(
            tab.describe().as_deref(),
            Some("id=7, url=https://example.com, active=true")
        );
        assert_eq!(TabContext::default().describe(), None);
    }

    #[test]
    fn prompt_lists_vocabulary_and_context() {
        let settings = AgentSettings {
            enable_thoughts: true,
            master_system_prompt: Some("Be polite.".into()),
            ..Default::default()
        };
        let tab = TabContext {
            title: Some("Inbox".into()),
            ..Default::default()
        };
        let prompt = build_system_prompt(&settings, None, Some(&tab), Some("Remembered context: a=1"));

        assert!(prompt.contains("click, scroll"));
        assert!(prompt.contains("getDOM"));
        assert!(prompt.contains("thoughts array"));
        assert!(prompt.contains("Current tab: title=Inbox"));
        assert!(prompt.ends_with("Be polite.\nRemembered context: a=1"));
    }

    #[test]
    fn thinking_line_only_when_enabled() {
        let prompt = build_system_prompt(&AgentSettings::default(), None, None, None);
        assert!(!prompt.contains("thoughts array"));
        assert!(prompt.ends_with("in the steps array."));
    }

    #[test]
    fn subagent_prompt_appends_its_instructions() {
        let helper = SubagentConfig {
            system_prompt: Some("Cite sources.".into()),
            ..Default::default()
        };
        assert!(subagent_prompt(&helper).ends_with("\nCite sources."));
    }
}
