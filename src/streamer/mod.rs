//! Turn streamer: one network exchange, retried as a unit.
//!
//! The streamer sends a request through a [`CompletionTransport`], folds the
//! incoming deltas into a [`TurnResult`], and reports a best-guess
//! [`StreamUpdate`] after every increment. Retries wrap connect and consume
//! together, so a stream that dies halfway is replayed from the start.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, trace};

use crate::error::AgentError;
use crate::payload::aliases::{CORE_TOOL_NAME, EXTERNAL_TOOL_PREFIX};
use crate::payload::{core_tool_definition, is_truthy, normalize, normalize_from_text};
use crate::provider::{CompletionTransport, ProviderRequest, StreamDelta};
use crate::types::{
    merge_payloads, normalize_usage, ConversationMessage, StreamUpdate, ToolChoice, ToolUse,
    TurnPayload, TurnRequest, TurnResult, Usage,
};
use crate::util::retry::RetryPolicy;
use crate::util::timeout::next_within;

/// Callback receiving live updates while a turn streams.
pub type UpdateSink = Arc<dyn Fn(StreamUpdate) + Send + Sync>;

/// Drives turns against one transport.
#[derive(Clone)]
pub struct TurnStreamer {
    transport: Arc<dyn CompletionTransport>,
    retry: RetryPolicy,
    /// Longest silence tolerated between two deltas.
    idle_timeout: Option<Duration>,
}

impl TurnStreamer {
    pub fn new(transport: Arc<dyn CompletionTransport>) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
            idle_timeout: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn transport_name(&self) -> &str {
        self.transport.name()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Stream a single-input turn with the core action tool available.
    pub async fn stream_turn(
        &self,
        request: &TurnRequest,
        on_update: Option<&UpdateSink>,
    ) -> Result<TurnResult, AgentError> {
        let provider_request =
            tool_request(request, vec![ConversationMessage::user(request.input.clone())]);
        self.stream_conversation(&provider_request, on_update).await
    }

    /// Stream an arbitrary conversation, retrying transient failures.
    ///
    /// Each retry is announced to `on_update` as a message update before the
    /// back-off sleep. The last error is returned unchanged.
    pub async fn stream_conversation(
        &self,
        request: &ProviderRequest,
        on_update: Option<&UpdateSink>,
    ) -> Result<TurnResult, AgentError> {
        let result = self
            .retry
            .execute_with_observer(
                || self.attempt(request, on_update),
                |attempt, delay, error| {
                    if let Some(sink) = on_update {
                        sink(StreamUpdate::message(
                            self.retry.retry_message(attempt, delay, error),
                        ));
                    }
                },
            )
            .await?;

        debug!(
            transport = self.transport.name(),
            tool_uses = result.tool_use_ids.len(),
            external_tool_uses = result.external_tool_uses.len(),
            parsed = result.parsed.is_some(),
            "turn assembled"
        );
        Ok(result)
    }

    /// Plain text completion without tools. Returns the trimmed text.
    pub async fn stream_text(
        &self,
        model: &str,
        system: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, AgentError> {
        let request = ProviderRequest {
            model: model.to_string(),
            system: system.to_string(),
            messages: vec![ConversationMessage::user(prompt)],
            tools: Vec::new(),
            max_tokens,
            tool_choice: None,
        };
        let result = self.stream_conversation(&request, None).await?;
        Ok(result.raw_text.trim().to_string())
    }

    async fn attempt(
        &self,
        request: &ProviderRequest,
        on_update: Option<&UpdateSink>,
    ) -> Result<TurnResult, AgentError> {
        let emit = |update: StreamUpdate| {
            if let Some(sink) = on_update {
                sink(update);
            }
        };

        let mut stream = self.transport.stream(request).await?;

        let mut raw_text = String::new();
        let mut tool_names: HashMap<String, String> = HashMap::new();
        let mut tool_uses = Vec::new();
        let mut usage: Option<Usage> = None;
        let mut thread_id = None;

        while let Some(delta) = next_within(&mut stream, self.idle_timeout).await? {
            match delta? {
                StreamDelta::Text(chunk) => {
                    if chunk.is_empty() {
                        continue;
                    }
                    raw_text.push_str(&chunk);
                    emit(StreamUpdate::message(raw_text.clone()));
                }
                StreamDelta::Thinking(chunk) => {
                    if !chunk.is_empty() {
                        emit(StreamUpdate::thoughts(chunk));
                    }
                }
                StreamDelta::ToolUseStart { id, name } => {
                    trace!(%id, %name, "tool use started");
                    tool_names.insert(id, name);
                }
                StreamDelta::ToolInputJson { id, snapshot, .. } => {
                    let is_core = tool_names.get(&id).map(String::as_str) == Some(CORE_TOOL_NAME);
                    let Some(snapshot) = snapshot.filter(|_| is_core) else {
                        continue;
                    };
                    if let Some(payload) = normalize(&snapshot) {
                        let update = StreamUpdate::from(payload);
                        if update.is_renderable() {
                            emit(update);
                        }
                    }
                }
                StreamDelta::ToolUse(tool) => tool_uses.push(tool),
                StreamDelta::Usage(raw) => {
                    if let Some(next) = normalize_usage(&raw) {
                        usage = Some(fold_usage(usage, next));
                    }
                }
                StreamDelta::ThreadId(id) => thread_id = Some(id),
                StreamDelta::Done => break,
            }
        }

        Ok(assemble(raw_text, tool_uses, usage, thread_id))
    }
}

/// Build a tool-calling request: the core tool first, then any extras.
pub fn tool_request(request: &TurnRequest, messages: Vec<ConversationMessage>) -> ProviderRequest {
    let mut tools = Vec::with_capacity(request.tools.len() + 1);
    if !request.tools.iter().any(|t| t.name == CORE_TOOL_NAME) {
        tools.push(core_tool_definition());
    }
    tools.extend(request.tools.iter().cloned());

    let tool_choice = if request.force_tool {
        ToolChoice::Tool(CORE_TOOL_NAME.to_string())
    } else {
        ToolChoice::Auto
    };

    ProviderRequest {
        model: request.model.clone(),
        system: request.system.clone(),
        messages,
        tools,
        max_tokens: request.max_tokens,
        tool_choice: Some(tool_choice),
    }
}

/// Assemble the final result of one exchange.
///
/// Core tool invocations are normalized and union-merged. When none yields
/// a payload, the accumulated text is recovered instead. Invocations of
/// external tools are passed through untouched.
pub fn assemble(
    raw_text: String,
    tool_uses: Vec<ToolUse>,
    usage: Option<Usage>,
    thread_id: Option<String>,
) -> TurnResult {
    let mut tool_use_ids = Vec::new();
    let mut tool_inputs = Vec::new();
    let mut external_tool_uses = Vec::new();

    for tool in tool_uses {
        if tool.name.starts_with(EXTERNAL_TOOL_PREFIX) {
            external_tool_uses.push(tool);
            continue;
        }
        if tool.name != CORE_TOOL_NAME || tool.id.is_empty() || !is_truthy(&tool.input) {
            continue;
        }
        match tool_input_payload(&tool.input) {
            Some(payload) => {
                tool_use_ids.push(tool.id);
                tool_inputs.push(payload);
            }
            None => debug!(id = %tool.id, "tool input did not normalize"),
        }
    }

    let parsed = merge_payloads(tool_inputs.clone()).or_else(|| normalize_from_text(&raw_text));

    TurnResult {
        raw_text,
        parsed,
        tool_use_ids,
        tool_inputs,
        usage,
        external_tool_uses,
        thread_id,
    }
}

fn tool_input_payload(input: &Value) -> Option<TurnPayload> {
    match input {
        Value::String(text) => normalize_from_text(text),
        other => normalize(other),
    }
}

/// Later usage reports win field by field, except where they report zero.
fn fold_usage(previous: Option<Usage>, next: Usage) -> Usage {
    let Some(previous) = previous else {
        return next;
    };
    let pick = |old: u64, new: u64| if new > 0 { new } else { old };
    Usage {
        input_tokens: pick(previous.input_tokens, next.input_tokens),
        cached_input_tokens: pick(previous.cached_input_tokens, next.cached_input_tokens),
        output_tokens: pick(previous.output_tokens, next.output_tokens),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use crate::provider::DeltaStream;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays one scripted response per call.
    struct Scripted {
        responses: Mutex<VecDeque<Result<Vec<Result<StreamDelta, AgentError>>, AgentError>>>,
        requests: Mutex<Vec<ProviderRequest>>,
    }

    impl Scripted {
        fn new(
            responses: Vec<Result<Vec<Result<StreamDelta, AgentError>>, AgentError>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionTransport for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn stream(&self, request: &ProviderRequest) -> Result<DeltaStream, AgentError> {
            self.requests.lock().unwrap().push(request.clone());
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AgentError::Other("script exhausted".into())));
            Ok(Box::pin(futures::stream::iter(next?)))
        }
    }

    fn tool_use(id: &str, name: &str, input: Value) -> Result<StreamDelta, AgentError> {
        Ok(StreamDelta::ToolUse(ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }))
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            max_jitter: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn collecting_sink() -> (UpdateSink, Arc<Mutex<Vec<StreamUpdate>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = seen.clone();
        let sink: UpdateSink = Arc::new(move |update| sink_seen.lock().unwrap().push(update));
        (sink, seen)
    }

    fn turn(force_tool: bool) -> TurnRequest {
        TurnRequest::builder()
            .input("open the page")
            .system("sys")
            .model("claude-test")
            .force_tool(force_tool)
            .build()
    }

    #[tokio::test]
    async fn text_deltas_emit_cumulative_messages() {
        let transport = Scripted::new(vec![Ok(vec![
            Ok(StreamDelta::Text("Hel".into())),
            Ok(StreamDelta::Text("lo".into())),
            Ok(StreamDelta::Thinking("hmm".into())),
            Ok(StreamDelta::Done),
        ])]);
        let (sink, seen) = collecting_sink();

        let result = TurnStreamer::new(transport)
            .stream_turn(&turn(false), Some(&sink))
            .await
            .unwrap();

        assert_eq!(result.raw_text, "Hello");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                StreamUpdate::message("Hel"),
                StreamUpdate::message("Hello"),
                StreamUpdate::thoughts("hmm"),
            ]
        );
        // Plain text that is not a payload still yields no structure.
        assert_eq!(result.parsed, None);
    }

    #[tokio::test]
    async fn tool_snapshots_are_normalized_into_updates() {
        let transport = Scripted::new(vec![Ok(vec![
            Ok(StreamDelta::ToolUseStart {
                id: "t1".into(),
                name: CORE_TOOL_NAME.into(),
            }),
            Ok(StreamDelta::ToolInputJson {
                id: "t1".into(),
                partial_json: String::new(),
                snapshot: Some(json!({"message": "Work"})),
            }),
            Ok(StreamDelta::ToolInputJson {
                id: "t1".into(),
                partial_json: String::new(),
                snapshot: Some(json!({"actions": [{"type": "click"}]})),
            }),
            tool_use("t1", CORE_TOOL_NAME, json!({"message": "Working", "steps": ["a"]})),
            Ok(StreamDelta::Done),
        ])]);
        let (sink, seen) = collecting_sink();

        let result = TurnStreamer::new(transport)
            .stream_turn(&turn(true), Some(&sink))
            .await
            .unwrap();

        // The actions-only snapshot is not renderable.
        assert_eq!(*seen.lock().unwrap(), vec![StreamUpdate::message("Work")]);
        assert_eq!(result.tool_use_ids, vec!["t1".to_string()]);
        let parsed = result.parsed.unwrap();
        assert_eq!(parsed.message.as_deref(), Some("Working"));
        assert_eq!(parsed.steps, Some(vec!["a".to_string()]));
    }

    #[tokio::test]
    async fn forced_turn_requests_the_core_tool() {
        let transport = Scripted::new(vec![Ok(vec![Ok(StreamDelta::Done)])]);
        TurnStreamer::new(transport.clone())
            .stream_turn(&turn(true), None)
            .await
            .unwrap();

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].tools[0].name, CORE_TOOL_NAME);
        assert_eq!(
            requests[0].tool_choice,
            Some(ToolChoice::Tool(CORE_TOOL_NAME.into()))
        );
        assert_eq!(requests[0].messages, vec![ConversationMessage::user("open the page")]);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_announce_progress_and_replay_the_exchange() {
        let transport = Scripted::new(vec![
            Err(AgentError::RateLimited {
                retry_after_ms: Some(2000),
            }),
            Ok(vec![Ok(StreamDelta::Text("ok".into())), Ok(StreamDelta::Done)]),
        ]);
        let (sink, seen) = collecting_sink();

        let result = TurnStreamer::new(transport.clone())
            .with_retry(quick_retry())
            .stream_turn(&turn(false), Some(&sink))
            .await
            .unwrap();

        assert_eq!(result.raw_text, "ok");
        assert_eq!(transport.calls(), 2);
        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[0].message.as_deref(),
            Some("请求过于频繁，2000ms 后重试（1/3）…")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn mid_stream_truncation_is_retried() {
        let transport = Scripted::new(vec![
            Ok(vec![
                Ok(StreamDelta::Text("partial".into())),
                Err(AgentError::Stream("stream ended without an assistant message".into())),
            ]),
            Ok(vec![Ok(StreamDelta::Text("full".into())), Ok(StreamDelta::Done)]),
        ]);

        let result = TurnStreamer::new(transport.clone())
            .with_retry(quick_retry())
            .stream_turn(&turn(false), None)
            .await
            .unwrap();

        assert_eq!(result.raw_text, "full");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let transport = Scripted::new(vec![Err(AgentError::Authentication("bad key".into()))]);

        let err = TurnStreamer::new(transport.clone())
            .with_retry(quick_retry())
            .stream_turn(&turn(false), None)
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::Authentication(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_stream_times_out() {
        struct Stalled;

        #[async_trait]
        impl CompletionTransport for Stalled {
            fn name(&self) -> &str {
                "stalled"
            }

            async fn stream(&self, _: &ProviderRequest) -> Result<DeltaStream, AgentError> {
                Ok(futures::stream::pending().boxed())
            }
        }

        let err = TurnStreamer::new(Arc::new(Stalled))
            .with_idle_timeout(Duration::from_secs(5))
            .stream_turn(&turn(false), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Timeout(5000)));
    }

    #[tokio::test]
    async fn stream_text_trims_and_sends_no_tools() {
        let transport = Scripted::new(vec![Ok(vec![
            Ok(StreamDelta::Text("  summary \n".into())),
            Ok(StreamDelta::Done),
        ])]);
        let text = TurnStreamer::new(transport.clone())
            .stream_text("m", "sys", "summarize", 256)
            .await
            .unwrap();

        assert_eq!(text, "summary");
        let requests = transport.requests.lock().unwrap();
        assert!(requests[0].tools.is_empty());
        assert_eq!(requests[0].tool_choice, None);
    }

    #[tokio::test]
    async fn usage_and_thread_id_are_collected() {
        let transport = Scripted::new(vec![Ok(vec![
            Ok(StreamDelta::ThreadId("th_9".into())),
            Ok(StreamDelta::Usage(json!({"input_tokens": 12, "output_tokens": 1}))),
            Ok(StreamDelta::Usage(json!({"output_tokens": 40}))),
            Ok(StreamDelta::Done),
        ])]);
        let result = TurnStreamer::new(transport)
            .stream_turn(&turn(false), None)
            .await
            .unwrap();

        assert_eq!(result.thread_id.as_deref(), Some("th_9"));
        assert_eq!(
            result.usage,
            Some(Usage {
                input_tokens: 12,
                cached_input_tokens: 0,
                output_tokens: 40,
            })
        );
    }

    #[test]
    fn independent_tool_uses_merge_in_order() {
        let result = assemble(
            String::new(),
            vec![
                ToolUse {
                    id: "a".into(),
                    name: CORE_TOOL_NAME.into(),
                    input: json!({"message": "a", "actions": [{"type": "scroll"}]}),
                },
                ToolUse {
                    id: "b".into(),
                    name: CORE_TOOL_NAME.into(),
                    input: json!({"actions": [{"type": "click", "selector": "#x"}]}),
                },
            ],
            None,
            None,
        );

        let parsed = result.parsed.unwrap();
        assert_eq!(parsed.message.as_deref(), Some("a"));
        let types: Vec<_> = parsed.actions().iter().map(|a| a.action_type.to_string()).collect();
        assert_eq!(types, vec!["scroll", "click"]);
        assert!(parsed.actions().iter().all(|a| !a.id.is_empty()));
        assert_eq!(result.tool_use_ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(result.tool_inputs.len(), 2);
    }

    #[test]
    fn external_tools_pass_through_and_text_is_the_fallback() {
        let result = assemble(
            r#"{"message": "from text"}"#.into(),
            vec![
                ToolUse {
                    id: "m1".into(),
                    name: "mcp__search__query".into(),
                    input: json!({"q": "rust"}),
                },
                ToolUse {
                    id: String::new(),
                    name: CORE_TOOL_NAME.into(),
                    input: json!({"message": "ignored"}),
                },
            ],
            None,
            None,
        );

        assert_eq!(result.external_tool_uses.len(), 1);
        assert_eq!(result.external_tool_uses[0].name, "mcp__search__query");
        assert!(result.tool_use_ids.is_empty());
        assert_eq!(
            result.parsed.and_then(|p| p.message).as_deref(),
            Some("from text")
        );
    }

    #[test]
    fn string_tool_input_is_recovered_as_text() {
        let result = assemble(
            String::new(),
            vec![ToolUse {
                id: "t".into(),
                name: CORE_TOOL_NAME.into(),
                input: Value::String(r#"{"message":"ok",}"#.into()),
            }],
            None,
            None,
        );
        assert_eq!(result.tool_use_id(), Some("t"));
        assert_eq!(result.parsed.and_then(|p| p.message).as_deref(), Some("ok"));
    }
}
