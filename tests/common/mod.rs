//! Shared test helpers and a scripted transport.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use agent_thread::config::AgentSettings;
use agent_thread::error::AgentError;
use agent_thread::provider::{CompletionTransport, DeltaStream, ProviderRequest, StreamDelta};
use agent_thread::thread::{AgentClient, StreamedTurn, ThreadEvent, TurnOutcome};
use agent_thread::types::ToolUse;
use agent_thread::util::retry::RetryPolicy;

pub const CORE_TOOL: &str = "browser_actions";

type Script = Result<Vec<Result<StreamDelta, AgentError>>, AgentError>;

/// A transport that replays one scripted response per call and records
/// every request it receives.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a response that streams these deltas.
    pub fn push_stream(&self, deltas: Vec<StreamDelta>) {
        self.script
            .lock()
            .unwrap()
            .push_back(Ok(deltas.into_iter().map(Ok).collect()));
    }

    /// Queue a response that fails mid-stream after these deltas.
    pub fn push_broken_stream(&self, deltas: Vec<StreamDelta>, error: AgentError) {
        let mut items: Vec<_> = deltas.into_iter().map(Ok).collect();
        items.push(Err(error));
        self.script.lock().unwrap().push_back(Ok(items));
    }

    /// Queue a response that fails before streaming.
    pub fn push_error(&self, error: AgentError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<DeltaStream, AgentError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AgentError::Other("script exhausted".into())));
        Ok(futures::stream::iter(next?).boxed())
    }
}

pub fn text(chunk: &str) -> StreamDelta {
    StreamDelta::Text(chunk.to_string())
}

pub fn thinking(chunk: &str) -> StreamDelta {
    StreamDelta::Thinking(chunk.to_string())
}

pub fn usage(input: u64, output: u64) -> StreamDelta {
    StreamDelta::Usage(json!({"input_tokens": input, "output_tokens": output}))
}

/// A complete core tool invocation with no intermediate snapshots.
pub fn core_tool(id: &str, input: Value) -> StreamDelta {
    StreamDelta::ToolUse(ToolUse {
        id: id.to_string(),
        name: CORE_TOOL.to_string(),
        input,
    })
}

/// A core tool invocation streamed as growing snapshots, then completed.
pub fn streamed_core_tool(id: &str, snapshots: &[Value]) -> Vec<StreamDelta> {
    let mut deltas = vec![StreamDelta::ToolUseStart {
        id: id.to_string(),
        name: CORE_TOOL.to_string(),
    }];
    for snapshot in snapshots {
        deltas.push(StreamDelta::ToolInputJson {
            id: id.to_string(),
            partial_json: snapshot.to_string(),
            snapshot: Some(snapshot.clone()),
        });
    }
    if let Some(last) = snapshots.last() {
        deltas.push(core_tool(id, last.clone()));
    }
    deltas
}

pub fn test_settings() -> AgentSettings {
    AgentSettings {
        api_key: Some("test-key".into()),
        ..Default::default()
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(1),
        multiplier: 1.0,
        max_jitter: Duration::ZERO,
        max_retry_after: Duration::from_millis(5),
    }
}

pub fn test_client(transport: Arc<ScriptedTransport>) -> AgentClient {
    AgentClient::new(test_settings())
        .with_transport(transport)
        .with_retry(fast_retry())
}

/// Drain a streamed turn and wait for its completion.
pub async fn drain(turn: StreamedTurn) -> (Vec<ThreadEvent>, Result<TurnOutcome, AgentError>) {
    let events: Vec<ThreadEvent> = turn.events.collect().await;
    let outcome = turn.completion.wait().await;
    (events, outcome)
}

pub fn kinds(events: &[ThreadEvent]) -> Vec<&'static str> {
    events.iter().map(ThreadEvent::kind).collect()
}
