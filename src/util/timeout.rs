//! Idle deadline for delta streams.

use std::time::Duration;

use futures::{Stream, StreamExt};

use crate::error::AgentError;

/// Next item of `stream`, failing with [`AgentError::Timeout`] when the
/// service stays silent longer than `idle`. No deadline when `idle` is `None`.
pub async fn next_within<S>(stream: &mut S, idle: Option<Duration>) -> Result<Option<S::Item>, AgentError>
where
    S: Stream + Unpin,
{
    let Some(idle) = idle else {
        return Ok(stream.next().await);
    };
    tokio::time::timeout(idle, stream.next())
        .await
        .map_err(|_| AgentError::Timeout(idle.as_millis() as u64))
}
