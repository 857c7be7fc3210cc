//! Threads: identity, per-turn event sequencing, and the turn logic behind
//! them.
//!
//! A [`Thread`] runs one turn at a time. Each streamed turn produces, in
//! order: `thread.started` (first turn of a fresh thread only),
//! `turn.started`, `item.started`/`item.updated` while the model streams,
//! `item.completed` for every settled item, and exactly one of
//! `turn.completed` or `turn.failed`.

pub mod client;
pub mod controller;
pub mod events;
pub mod items;
pub mod memory;
pub mod outcome;
pub mod prompt;
pub mod queue;

pub use client::{followup_conversation, parse_checklist, AgentClient, ThreadOptions};
pub use controller::{
    AgentInput, StreamedTurn, Thread, Turn, TurnCompletion, TurnOptions, UserInput,
};
pub use events::{ItemKind, ThreadEvent, ThreadItem, ThreadItemDetails};
pub use memory::{InMemoryStore, MemorySink};
pub use outcome::{ToolUseRecord, TurnOutcome};
pub use prompt::TabContext;
pub use queue::EventQueue;
