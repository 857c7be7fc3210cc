//! Convenience re-exports for common use.

pub use crate::config::{AgentSettings, ApiFlavor, SubagentConfig};
pub use crate::error::{AgentError, Result};
pub use crate::payload::{normalize, normalize_from_text};
pub use crate::streamer::{TurnStreamer, UpdateSink};
pub use crate::thread::{
    AgentClient, AgentInput, StreamedTurn, TabContext, Thread, ThreadEvent, ThreadItem,
    ThreadItemDetails, ThreadOptions, Turn, TurnOptions, TurnOutcome,
};
pub use crate::types::{
    Action, ActionResult, ActionType, StreamUpdate, TurnPayload, TurnRequest, TurnResult, Usage,
};
pub use crate::util::retry::RetryPolicy;
