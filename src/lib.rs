//! agent-thread: streaming turn orchestration for tool-calling browser
//! agents.
//!
//! A turn sends one request to a streaming completion service, folds the
//! model's text, thinking and tool-call fragments into a canonical payload,
//! and exposes the result as an ordered sequence of thread events.
//!
//! # Quick Start
//!
//! ```no_run
//! use agent_thread::prelude::*;
//! use futures::StreamExt;
//!
//! # async fn example() -> agent_thread::error::Result<()> {
//! let client = AgentClient::from_env()?;
//! let thread = client.start_thread(ThreadOptions::default());
//!
//! let mut turn = thread.run_streamed("Open the pricing page", TurnOptions::default());
//! while let Some(event) = turn.events.next().await {
//!     println!("{}", event.kind());
//! }
//! let outcome = turn.completion.wait().await?;
//! println!("{} actions proposed", outcome.actions.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod payload;
pub mod prelude;
pub mod provider;
pub mod streamer;
pub mod thread;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
