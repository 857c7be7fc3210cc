//! Agent client: the settings, transport and memory its threads share, and
//! the turn logic they run.

use std::sync::{Arc, OnceLock};

use futures::future::join_all;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{AgentSettings, SubagentConfig};
use crate::error::AgentError;
use crate::payload::aliases::CORE_TOOL_NAME;
use crate::payload::{core_tool_definition, normalize_from_text};
use crate::provider::{create_transport, CompletionTransport, ProviderRequest};
use crate::streamer::{TurnStreamer, UpdateSink};
use crate::types::{
    ActionResult, ContentBlock, ConversationMessage, StreamUpdate, SubagentCall, ToolChoice,
    ToolDefinition, TurnRequest, Usage,
};
use crate::util::retry::RetryPolicy;

use super::controller::Thread;
use super::memory::{InMemoryStore, MemorySink};
use super::outcome::{ToolUseRecord, TurnOutcome};
use super::prompt::{build_system_prompt, subagent_prompt, TabContext};

/// Reply when a turn delegates only to subagents that are not configured.
pub const NO_SUBAGENT_MESSAGE: &str = "未找到可用的子代理，请检查子代理配置或更换任务。";
const SUBAGENT_NOT_FOUND: &str = "未找到子代理";
const SUBAGENTS_DONE_NOTICE: &str = "已完成子代理任务，正在汇总结果…";
const UNVERIFIED: &str = "待确认";
const MAX_CHECKLIST_ITEMS: usize = 10;

/// Produces the settings in force for the next turn.
pub type SettingsProvider = Arc<dyn Fn() -> AgentSettings + Send + Sync>;

/// Per-thread options. Fields left unset fall back to the settings.
#[derive(Debug, Clone, Default)]
pub struct ThreadOptions {
    pub model: Option<String>,
    /// Replaces the generated system prompt.
    pub system_prompt: Option<String>,
    pub tab: Option<TabContext>,
    /// Run turns as this subagent.
    pub subagent: Option<SubagentConfig>,
    /// Schemas of externally registered tools offered next to the core tool.
    pub external_tools: Vec<ToolDefinition>,
    /// Defaults to forcing the core tool when no external tools are offered.
    pub force_tool: Option<bool>,
}

impl ThreadOptions {
    /// `other`'s set fields win.
    pub fn overlay(&self, other: &ThreadOptions) -> ThreadOptions {
        ThreadOptions {
            model: other.model.clone().or_else(|| self.model.clone()),
            system_prompt: other
                .system_prompt
                .clone()
                .or_else(|| self.system_prompt.clone()),
            tab: other.tab.clone().or_else(|| self.tab.clone()),
            subagent: other.subagent.clone().or_else(|| self.subagent.clone()),
            external_tools: if other.external_tools.is_empty() {
                self.external_tools.clone()
            } else {
                other.external_tools.clone()
            },
            force_tool: other.force_tool.or(self.force_tool),
        }
    }

    fn forces_tool(&self) -> bool {
        self.force_tool.unwrap_or(self.external_tools.is_empty())
    }
}

/// Entry point: creates threads and runs the helper prompts around them.
#[derive(Clone)]
pub struct AgentClient {
    settings: SettingsProvider,
    transport: Option<Arc<dyn CompletionTransport>>,
    retry: Option<RetryPolicy>,
    memory: Arc<dyn MemorySink>,
    defaults: ThreadOptions,
}

impl AgentClient {
    /// Client over a fixed settings snapshot.
    pub fn new(settings: AgentSettings) -> Self {
        Self::from_provider(move || settings.clone())
    }

    /// Client that re-reads its settings at the start of every turn.
    pub fn from_provider(provider: impl Fn() -> AgentSettings + Send + Sync + 'static) -> Self {
        Self {
            settings: Arc::new(provider),
            transport: None,
            retry: None,
            memory: Arc::new(InMemoryStore::new()),
            defaults: ThreadOptions::default(),
        }
    }

    /// Client over settings loaded from the config file and environment.
    pub fn from_env() -> Result<Self, AgentError> {
        Ok(Self::new(AgentSettings::load()?))
    }

    /// Use this transport instead of one built from the settings.
    pub fn with_transport(mut self, transport: Arc<dyn CompletionTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use this retry policy instead of the default with the configured
    /// retry count.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemorySink>) -> Self {
        self.memory = memory;
        self
    }

    /// Options every thread starts from.
    pub fn with_thread_defaults(mut self, defaults: ThreadOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// A new thread. Its first turn announces `thread.started`.
    pub fn start_thread(&self, options: ThreadOptions) -> Thread {
        Thread::new(self.clone(), None, self.defaults.overlay(&options), true)
    }

    /// Continue an existing thread by id. No `thread.started` is emitted.
    pub fn resume_thread(&self, id: impl Into<String>, options: ThreadOptions) -> Thread {
        Thread::new(
            self.clone(),
            Some(id.into()),
            self.defaults.overlay(&options),
            false,
        )
    }

    pub fn settings(&self) -> AgentSettings {
        (self.settings)()
    }

    pub fn memory(&self) -> &Arc<dyn MemorySink> {
        &self.memory
    }

    fn streamer(&self, settings: &AgentSettings) -> Result<TurnStreamer, AgentError> {
        let transport = match &self.transport {
            Some(transport) => transport.clone(),
            None => create_transport(settings)?,
        };
        let retry = self
            .retry
            .clone()
            .unwrap_or_else(|| RetryPolicy::default().with_max_retries(settings.max_retries));
        Ok(TurnStreamer::new(transport).with_retry(retry))
    }

    fn system_prompt(&self, settings: &AgentSettings, options: &ThreadOptions) -> String {
        if let Some(prompt) = options.system_prompt.as_deref().filter(|p| !p.is_empty()) {
            return prompt.to_string();
        }
        let mut prompt = build_system_prompt(
            settings,
            options.subagent.as_ref(),
            options.tab.as_ref(),
            self.memory.prompt_line().as_deref(),
        );
        if !options.external_tools.is_empty() {
            prompt.push_str(
                "\nExternal tools are registered as tools named mcp__<service>__<tool>; call them directly instead of describing the call in text.",
            );
        }
        prompt
    }

    fn model(&self, settings: &AgentSettings, options: &ThreadOptions, input: &str) -> String {
        options
            .model
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| settings.select_model(input, options.subagent.as_ref()).to_string())
    }

    fn remember(&self, outcome: &TurnOutcome) {
        if let Some(memory) = &outcome.memory {
            self.memory.apply(memory);
        }
    }

    /// Run one turn. Failures are reported through [`TurnOutcome::error`].
    pub(crate) async fn execute_turn(
        &self,
        input: &str,
        options: &ThreadOptions,
        thread_id: String,
        on_update: Option<&UpdateSink>,
    ) -> TurnOutcome {
        let settings = self.settings();
        let mut outcome = match self.first_pass(&settings, input, options, on_update).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "turn failed");
                TurnOutcome::failed(failure_message(&err))
            }
        };
        outcome.thread_id.get_or_insert(thread_id);
        outcome
    }

    async fn first_pass(
        &self,
        settings: &AgentSettings,
        input: &str,
        options: &ThreadOptions,
        on_update: Option<&UpdateSink>,
    ) -> Result<TurnOutcome, AgentError> {
        let streamer = self.streamer(settings)?;
        let system = self.system_prompt(settings, options);
        let model = self.model(settings, options, input);

        let request = TurnRequest::builder()
            .input(input)
            .system(system.clone())
            .model(model.clone())
            .tools(options.external_tools.clone())
            .max_tokens(settings.effective_max_tokens())
            .force_tool(options.forces_tool())
            .build();

        info!(%model, transport = streamer.transport_name(), "running turn");
        let result = streamer.stream_turn(&request, on_update).await?;
        let outcome = TurnOutcome::from_result(result);

        if !outcome.subagents.is_empty() {
            let delegation = Delegation {
                settings,
                streamer: &streamer,
                input,
                system: &system,
                model: &model,
                reasoning: settings.wants_reasoning(input),
            };
            return self.delegate(delegation, outcome, on_update).await;
        }

        self.remember(&outcome);
        Ok(outcome)
    }

    /// Run the requested subagents in parallel and summarize their reports
    /// in one more exchange.
    async fn delegate(
        &self,
        delegation: Delegation<'_>,
        outcome: TurnOutcome,
        on_update: Option<&UpdateSink>,
    ) -> Result<TurnOutcome, AgentError> {
        let settings = delegation.settings;
        let resolvable = outcome
            .subagents
            .iter()
            .any(|call| settings.resolve_subagent(call.id.as_deref(), call.name.as_deref()).is_some());
        if !resolvable {
            debug!(requested = outcome.subagents.len(), "no configured subagent matches");
            return Ok(TurnOutcome {
                thread_id: outcome.thread_id,
                ..TurnOutcome::message_only(NO_SUBAGENT_MESSAGE, outcome.usage)
            });
        }

        let reports = join_all(
            outcome
                .subagents
                .iter()
                .map(|call| call_subagent(&delegation, call)),
        )
        .await;

        if let Some(sink) = on_update {
            sink(StreamUpdate::message(SUBAGENTS_DONE_NOTICE));
        }

        let prompt = format!(
            "Original request:\n{}\n\nSubagent results:\n{}",
            delegation.input,
            serde_json::to_string(&reports)?
        );
        let request = ProviderRequest {
            model: delegation.model.to_string(),
            system: format!("{}\nDo not call subagents again.", delegation.system),
            messages: vec![ConversationMessage::user(prompt)],
            tools: vec![core_tool_definition()],
            max_tokens: settings.effective_max_tokens(),
            tool_choice: Some(ToolChoice::Auto),
        };
        let result = delegation
            .streamer
            .stream_conversation(&request, on_update)
            .await?;

        let mut aggregated = TurnOutcome::from_result(result);
        aggregated.usage = sum_usage(outcome.usage, aggregated.usage);
        aggregated.thread_id = aggregated.thread_id.or(outcome.thread_id);
        self.remember(&aggregated);
        Ok(aggregated)
    }

    /// Run a follow-up turn that answers earlier tool invocations with the
    /// results of executing their actions.
    ///
    /// Only invalid arguments fail the call; exchange failures are reported
    /// through [`TurnOutcome::error`].
    pub(crate) async fn execute_followup(
        &self,
        input: &str,
        tool_uses: &[ToolUseRecord],
        results: &[ActionResult],
        options: &ThreadOptions,
        thread_id: String,
        on_update: Option<&UpdateSink>,
    ) -> Result<TurnOutcome, AgentError> {
        let messages = followup_conversation(input, tool_uses, results)?;
        let settings = self.settings();

        let exchange = async {
            let streamer = self.streamer(&settings)?;
            let request = ProviderRequest {
                model: self.model(&settings, options, input),
                system: self.system_prompt(&settings, options),
                messages,
                tools: vec![core_tool_definition()],
                max_tokens: settings.effective_max_tokens(),
                tool_choice: Some(ToolChoice::Auto),
            };
            info!(model = %request.model, tool_uses = tool_uses.len(), "running follow-up turn");
            streamer.stream_conversation(&request, on_update).await
        };

        let mut outcome = match exchange.await {
            Ok(result) => {
                let outcome = TurnOutcome::from_result(result);
                self.remember(&outcome);
                outcome
            }
            Err(err) => {
                warn!(error = %err, "follow-up turn failed");
                TurnOutcome::failed(failure_message(&err))
            }
        };
        outcome.thread_id.get_or_insert(thread_id);
        Ok(outcome)
    }

    /// Split a request into at most ten checklist items. Empty on failure.
    pub async fn generate_checklist(&self, input: &str, options: &ThreadOptions) -> Vec<String> {
        let settings = self.settings();
        let system = [
            self.system_prompt(&settings, options),
            "Split the user's request into an actionable checklist of at most 7 items.".into(),
            "Output only the items, one per line, and nothing else.".into(),
        ]
        .join("\n");

        match self.helper_text(&settings, options, &system, input).await {
            Ok(raw) => parse_checklist(&raw),
            Err(err) => {
                debug!(error = %err, "checklist generation failed");
                Vec::new()
            }
        }
    }

    /// One-sentence verdict on whether a checklist was completed.
    ///
    /// Falls back to "待确认" when the verdict cannot be obtained.
    pub async fn verify_checklist(
        &self,
        input: &str,
        checklist: &[String],
        final_message: &str,
        options: &ThreadOptions,
    ) -> String {
        let settings = self.settings();
        let system = [
            self.system_prompt(&settings, options),
            "You check whether a checklist was completed, using only the information given.".into(),
            "Answer in one short sentence: 已完成 or 未完成, followed by a brief reason.".into(),
        ]
        .join("\n");
        let checklist = serde_json::to_string(checklist).unwrap_or_default();
        let prompt =
            format!("User request: {input}\nChecklist: {checklist}\nFinal output: {final_message}");

        match self.helper_text(&settings, options, &system, &prompt).await {
            Ok(verdict) if !verdict.is_empty() => verdict,
            Ok(_) => UNVERIFIED.to_string(),
            Err(err) => {
                debug!(error = %err, "checklist verification failed");
                UNVERIFIED.to_string()
            }
        }
    }

    async fn helper_text(
        &self,
        settings: &AgentSettings,
        options: &ThreadOptions,
        system: &str,
        prompt: &str,
    ) -> Result<String, AgentError> {
        let streamer = self.streamer(settings)?;
        let model = settings.model_for(options.subagent.as_ref(), false);
        streamer
            .stream_text(model, system, prompt, settings.effective_max_tokens())
            .await
    }
}

/// What one delegated call needs from the turn that requested it.
struct Delegation<'a> {
    settings: &'a AgentSettings,
    streamer: &'a TurnStreamer,
    input: &'a str,
    system: &'a str,
    model: &'a str,
    reasoning: bool,
}

#[derive(Debug, Serialize)]
struct SubagentReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn call_subagent(delegation: &Delegation<'_>, call: &SubagentCall) -> SubagentReport {
    let mut report = SubagentReport {
        id: call.id.clone(),
        name: call.name.clone(),
        output: None,
        error: None,
    };
    let settings = delegation.settings;
    let Some(target) = settings.resolve_subagent(call.id.as_deref(), call.name.as_deref()) else {
        report.error = Some(SUBAGENT_NOT_FOUND.into());
        return report;
    };

    debug!(subagent = %target.id, "delegating");
    let result = delegation
        .streamer
        .stream_text(
            settings.model_for(Some(target), delegation.reasoning),
            &subagent_prompt(target),
            &call.prompt,
            settings.effective_max_tokens(),
        )
        .await;
    match result {
        Ok(output) => report.output = Some(output),
        Err(err) => report.error = Some(err.to_string()),
    }
    report
}

/// Conversation for a follow-up turn: the user input, the assistant's
/// earlier tool invocations, and one tool result per invocation holding the
/// results of the actions it proposed.
pub fn followup_conversation(
    input: &str,
    tool_uses: &[ToolUseRecord],
    results: &[ActionResult],
) -> Result<Vec<ConversationMessage>, AgentError> {
    if tool_uses.is_empty() {
        return Err(AgentError::InvalidState(
            "a follow-up turn needs at least one tool use to answer".into(),
        ));
    }
    if tool_uses.iter().any(|u| u.id.trim().is_empty()) {
        return Err(AgentError::InvalidState(
            "a tool use without an id cannot be answered".into(),
        ));
    }

    let mut calls = Vec::with_capacity(tool_uses.len());
    let mut answers = Vec::with_capacity(tool_uses.len());
    for tool_use in tool_uses {
        calls.push(ContentBlock::ToolUse {
            id: tool_use.id.clone(),
            name: CORE_TOOL_NAME.to_string(),
            input: serde_json::to_value(&tool_use.input)?,
        });

        let action_ids = tool_use.action_ids();
        let matching: Vec<&ActionResult> = results
            .iter()
            .filter(|r| action_ids.contains(&r.id.as_str()))
            .collect();
        answers.push(ContentBlock::ToolResult {
            tool_use_id: tool_use.id.clone(),
            content: serde_json::to_string(&matching)?,
            is_error: false,
        });
    }

    Ok(vec![
        ConversationMessage::user(input),
        ConversationMessage::assistant_blocks(calls),
        ConversationMessage::user_blocks(answers),
    ])
}

fn checklist_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[-*+\d.、\s]+").expect("valid regex"))
}

fn checklist_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(thoughts?|steps?|actions?)\s*:").expect("valid regex"))
}

/// Checklist items from model text: the payload's steps or thoughts when it
/// parses, otherwise one item per non-empty line with list markers removed.
pub fn parse_checklist(raw: &str) -> Vec<String> {
    if let Some(payload) = normalize_from_text(raw) {
        for list in [payload.steps, payload.thoughts].into_iter().flatten() {
            if !list.is_empty() {
                return list.into_iter().take(MAX_CHECKLIST_ITEMS).collect();
            }
        }
    }

    raw.lines()
        .map(|line| checklist_prefix_re().replace(line, "").trim().to_string())
        .filter(|line| !line.is_empty())
        .filter(|line| !checklist_label_re().is_match(line))
        .take(MAX_CHECKLIST_ITEMS)
        .collect()
}

/// Message recorded for a failed turn: the bare configuration message, or
/// the error's display text.
fn failure_message(err: &AgentError) -> String {
    match err {
        AgentError::Configuration(message) => message.clone(),
        other => other.to_string(),
    }
}

fn sum_usage(first: Option<Usage>, second: Option<Usage>) -> Option<Usage> {
    match (first, second) {
        (Some(mut total), Some(more)) => {
            total.merge(&more);
            Some(total)
        }
        (first, second) => first.or(second),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, ActionType, TurnPayload};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(id: &str, action_ids: &[&str]) -> ToolUseRecord {
        let actions = action_ids
            .iter()
            .map(|id| {
                let mut action = Action::new(ActionType::Click);
                action.id = id.to_string();
                action
            })
            .collect();
        ToolUseRecord {
            id: id.into(),
            input: TurnPayload {
                actions: Some(actions),
                ..Default::default()
            },
        }
    }

    fn ok(id: &str) -> ActionResult {
        ActionResult {
            id: id.into(),
            success: true,
            output: None,
            error: None,
        }
    }

    #[test]
    fn followup_routes_results_to_their_tool_use() {
        let messages = followup_conversation(
            "continue",
            &[record("t1", &["a1"]), record("t2", &["a2", "a3"]), record("t3", &[])],
            &[ok("a3"), ok("a1"), ok("zz")],
        )
        .unwrap();

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], ConversationMessage::user("continue"));

        let ContentBlock::ToolUse { name, input, .. } = &messages[1].content[0] else {
            panic!("expected tool use");
        };
        assert_eq!(name, CORE_TOOL_NAME);
        assert_eq!(input["actions"][0]["id"], "a1");

        let contents: Vec<serde_json::Value> = messages[2]
            .content
            .iter()
            .map(|block| match block {
                ContentBlock::ToolResult { content, .. } => serde_json::from_str(content).unwrap(),
                _ => panic!("expected tool result"),
            })
            .collect();
        assert_eq!(
            contents,
            vec![
                json!([{"id": "a1", "success": true}]),
                json!([{"id": "a3", "success": true}]),
                json!([]),
            ]
        );
    }

    #[test]
    fn followup_without_tool_uses_is_rejected() {
        assert!(matches!(
            followup_conversation("x", &[], &[]),
            Err(AgentError::InvalidState(_))
        ));
        assert!(matches!(
            followup_conversation("x", &[record(" ", &[])], &[]),
            Err(AgentError::InvalidState(_))
        ));
    }

    #[test]
    fn checklist_from_lines() {
        let raw = "1. Open the inbox\n- Find the invoice\n\nSteps: ignored\n* Download it";
        assert_eq!(
            parse_checklist(raw),
            vec!["Open the inbox", "Find the invoice", "Download it"]
        );
    }

    #[test]
    fn checklist_from_payload_steps() {
        let raw = r#"{"steps": ["a", "b"], "thoughts": ["t"]}"#;
        assert_eq!(parse_checklist(raw), vec!["a", "b"]);
    }

    #[test]
    fn overlay_prefers_turn_options() {
        let base = ThreadOptions {
            model: Some("base".into()),
            force_tool: Some(true),
            ..Default::default()
        };
        let turn = ThreadOptions {
            model: Some("turn".into()),
            ..Default::default()
        };
        let merged = base.overlay(&turn);
        assert_eq!(merged.model.as_deref(), Some("turn"));
        assert_eq!(merged.force_tool, Some(true));
    }

    #[test]
    fn tool_is_forced_only_without_external_tools() {
        let mut options = ThreadOptions::default();
        assert!(options.forces_tool());
        options.external_tools.push(ToolDefinition {
            name: "mcp__docs__search".into(),
            description: "search".into(),
            input_schema: json!({"type": "object"}),
        });
        assert!(!options.forces_tool());
    }

    #[test]
    fn configuration_failures_keep_their_bare_message() {
        let err = AgentError::Configuration("set a key".into());
        assert_eq!(failure_message(&err), "set a key");
        assert_eq!(
            failure_message(&AgentError::api(500, "down")),
            "API error (status 500): down"
        );
    }
}
