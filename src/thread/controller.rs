//! Thread controller: one conversation thread and the turns run on it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::AgentError;
use crate::streamer::UpdateSink;
use crate::types::{ActionResult, StreamUpdate, Usage};
use crate::util::usage::UsageTracker;

use super::client::{AgentClient, ThreadOptions};
use super::events::{ItemEvent, ThreadEvent, ThreadItem, ThreadItemDetails};
use super::items::{error_item, new_id, ItemIds, ItemTracker};
use super::outcome::{ToolUseRecord, TurnOutcome};
use super::queue::EventQueue;

/// Message reported when a turn raised without a usable message.
pub const THREAD_FAILURE_MESSAGE: &str = "线程执行失败";

/// User input for a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentInput {
    Text(String),
    Items(Vec<UserInput>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserInput {
    Text { text: String },
    Image { url: String },
}

impl AgentInput {
    /// Plain text sent to the model. Text items are joined by blank lines;
    /// images are not forwarded.
    pub fn flatten(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Items(items) => items
                .iter()
                .filter_map(|item| match item {
                    UserInput::Text { text } => Some(text.as_str()),
                    UserInput::Image { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

impl From<&str> for AgentInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for AgentInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<UserInput>> for AgentInput {
    fn from(items: Vec<UserInput>) -> Self {
        Self::Items(items)
    }
}

/// Per-call options.
#[derive(Clone, Default)]
pub struct TurnOptions {
    /// Overlaid on the thread's options for this call only.
    pub options: ThreadOptions,
    /// Receives every live update before it becomes an event.
    pub on_update: Option<UpdateSink>,
}

impl TurnOptions {
    pub fn with_update_sink(mut self, sink: UpdateSink) -> Self {
        self.on_update = Some(sink);
        self
    }
}

/// A settled turn, collected from its events.
#[derive(Debug, Clone)]
pub struct Turn {
    /// Completed items, in completion order.
    pub items: Vec<ThreadItem>,
    /// Text of the last agent message.
    pub final_response: String,
    pub usage: Option<Usage>,
    pub outcome: TurnOutcome,
}

/// Settles once the turn's terminal event has been queued.
///
/// Independent of whether the event stream is read.
pub struct TurnCompletion(JoinHandle<Result<TurnOutcome, AgentError>>);

impl TurnCompletion {
    pub async fn wait(self) -> Result<TurnOutcome, AgentError> {
        self.0
            .await
            .map_err(|e| AgentError::Other(format!("turn task failed: {e}")))?
    }
}

/// A turn running in the background.
pub struct StreamedTurn {
    pub events: BoxStream<'static, ThreadEvent>,
    pub completion: TurnCompletion,
}

struct ThreadState {
    id: Mutex<Option<String>>,
    emit_started: AtomicBool,
    usage: UsageTracker,
}

impl ThreadState {
    fn current_id(&self) -> Option<String> {
        self.id.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The thread id, minted on first use.
    fn ensure_id(&self) -> String {
        self.id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(new_id)
            .clone()
    }

    fn finish_turn(&self, outcome: &TurnOutcome) {
        if let Some(id) = outcome.thread_id.as_deref().filter(|id| !id.is_empty()) {
            let mut current = self.id.lock().unwrap_or_else(PoisonError::into_inner);
            if current.as_deref() != Some(id) {
                debug!(thread_id = id, "adopting service thread id");
                *current = Some(id.to_string());
            }
        }
        self.usage.record(outcome.usage.as_ref());
    }
}

/// A conversation thread.
///
/// Turns on one thread must not overlap; run the next turn after the
/// previous one settled.
pub struct Thread {
    client: AgentClient,
    options: ThreadOptions,
    state: Arc<ThreadState>,
}

impl Thread {
    pub(crate) fn new(
        client: AgentClient,
        id: Option<String>,
        options: ThreadOptions,
        emit_started: bool,
    ) -> Self {
        Self {
            client,
            options,
            state: Arc::new(ThreadState {
                id: Mutex::new(id.filter(|id| !id.is_empty())),
                emit_started: AtomicBool::new(emit_started),
                usage: UsageTracker::new(),
            }),
        }
    }

    /// Thread id, once minted or supplied.
    pub fn id(&self) -> Option<String> {
        self.state.current_id()
    }

    pub fn options(&self) -> &ThreadOptions {
        &self.options
    }

    /// Usage summed over every settled turn.
    pub fn usage(&self) -> Usage {
        self.state.usage.total_usage()
    }

    pub fn turn_count(&self) -> u64 {
        self.state.usage.turn_count()
    }

    /// Run a turn to completion.
    ///
    /// Fails with [`AgentError::TurnFailed`] when the turn settles as failed.
    pub async fn run(
        &self,
        input: impl Into<AgentInput>,
        turn: TurnOptions,
    ) -> Result<Turn, AgentError> {
        collect(self.run_streamed(input, turn)).await
    }

    /// Start a turn and return its live events.
    pub fn run_streamed(&self, input: impl Into<AgentInput>, turn: TurnOptions) -> StreamedTurn {
        let input = input.into().flatten();
        let options = self.options.overlay(&turn.options);
        let client = self.client.clone();

        self.build_streamed(turn.on_update, move |thread_id, sink| async move {
            Ok(client
                .execute_turn(&input, &options, thread_id, Some(&sink))
                .await)
        })
    }

    /// Run a turn without events and return what it settled to.
    pub async fn run_raw(&self, input: impl Into<AgentInput>, turn: TurnOptions) -> TurnOutcome {
        let input = input.into().flatten();
        let options = self.options.overlay(&turn.options);
        let thread_id = self.begin_turn();

        let outcome = self
            .client
            .execute_turn(&input, &options, thread_id, turn.on_update.as_ref())
            .await;
        self.state.finish_turn(&outcome);
        outcome
    }

    /// Answer earlier tool invocations with their action results and run
    /// the next turn to completion.
    pub async fn run_followup(
        &self,
        input: impl Into<AgentInput>,
        tool_uses: Vec<ToolUseRecord>,
        results: Vec<ActionResult>,
        turn: TurnOptions,
    ) -> Result<Turn, AgentError> {
        collect(self.run_followup_streamed(input, tool_uses, results, turn)).await
    }

    /// Streaming form of [`Thread::run_followup`].
    pub fn run_followup_streamed(
        &self,
        input: impl Into<AgentInput>,
        tool_uses: Vec<ToolUseRecord>,
        results: Vec<ActionResult>,
        turn: TurnOptions,
    ) -> StreamedTurn {
        let input = input.into().flatten();
        let options = self.options.overlay(&turn.options);
        let client = self.client.clone();

        self.build_streamed(turn.on_update, move |thread_id, sink| async move {
            client
                .execute_followup(&input, &tool_uses, &results, &options, thread_id, Some(&sink))
                .await
        })
    }

    fn begin_turn(&self) -> String {
        self.state.emit_started.store(false, Ordering::SeqCst);
        self.state.ensure_id()
    }

    fn build_streamed<F, Fut>(&self, on_update: Option<UpdateSink>, execute: F) -> StreamedTurn
    where
        F: FnOnce(String, UpdateSink) -> Fut + Send + 'static,
        Fut: Future<Output = Result<TurnOutcome, AgentError>> + Send + 'static,
    {
        let (queue, events) = EventQueue::new();
        let queue = Arc::new(queue);

        let announce = self.state.emit_started.swap(false, Ordering::SeqCst);
        let thread_id = self.state.ensure_id();
        if announce {
            queue.push(ThreadEvent::thread_started(thread_id.clone()));
        }
        queue.push(ThreadEvent::turn_started());

        let tracker = Arc::new(Mutex::new(ItemTracker::new(ItemIds::generate())));
        let sink: UpdateSink = {
            let queue = queue.clone();
            let tracker = tracker.clone();
            Arc::new(move |update: StreamUpdate| {
                let events = tracker
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .observe(&update);
                if let Some(external) = &on_update {
                    external(update);
                }
                for event in events {
                    queue.push(event);
                }
            })
        };

        let state = self.state.clone();
        let handle = tokio::spawn(async move {
            match execute(thread_id, sink).await {
                Ok(outcome) => {
                    state.finish_turn(&outcome);
                    if let Some(message) = &outcome.error {
                        queue.push(completed(error_item(message)));
                        queue.push(ThreadEvent::turn_failed(message.clone()));
                    } else {
                        let items = tracker
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .settle(&outcome);
                        for item in items {
                            queue.push(completed(item));
                        }
                        queue.push(ThreadEvent::turn_completed(outcome.usage));
                    }
                    queue.close();
                    Ok(outcome)
                }
                Err(err) => {
                    warn!(error = %err, "turn raised");
                    let message = match err.to_string() {
                        m if m.trim().is_empty() => THREAD_FAILURE_MESSAGE.to_string(),
                        m => m,
                    };
                    queue.push(completed(error_item(&message)));
                    queue.push(ThreadEvent::error(message.clone()));
                    queue.push(ThreadEvent::turn_failed(message));
                    queue.close();
                    Err(err)
                }
            }
        });

        StreamedTurn {
            events,
            completion: TurnCompletion(handle),
        }
    }
}

fn completed(item: ThreadItem) -> ThreadEvent {
    ThreadEvent::ItemCompleted(ItemEvent { item })
}

async fn collect(streamed: StreamedTurn) -> Result<Turn, AgentError> {
    let StreamedTurn {
        mut events,
        completion,
    } = streamed;

    let mut items = Vec::new();
    let mut usage = None;
    let mut failure = None;
    while let Some(event) = events.next().await {
        match event {
            ThreadEvent::ItemCompleted(ItemEvent { item }) => items.push(item),
            ThreadEvent::TurnCompleted(done) => usage = done.usage,
            ThreadEvent::TurnFailed(failed) => failure = Some(failed.error.message),
            ThreadEvent::Error(error) => {
                failure.get_or_insert(error.message);
            }
            _ => {}
        }
    }

    let outcome = completion.wait().await?;
    if let Some(message) = failure {
        return Err(AgentError::TurnFailed(message));
    }

    let final_response = items
        .iter()
        .rev()
        .find_map(|item| match &item.details {
            ThreadItemDetails::AgentMessage(message) => Some(message.text.clone()),
            _ => None,
        })
        .unwrap_or_else(|| outcome.text().to_string());

    Ok(Turn {
        items,
        final_response,
        usage,
        outcome,
    })
}
