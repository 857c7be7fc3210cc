//! Completion-service transports.
//!
//! A transport owns one HTTP exchange and turns the service's event stream
//! into [`StreamDelta`]s. Everything above it (retry, normalization, thread
//! events) is transport-agnostic.

pub mod http;
pub mod partial_json;

#[cfg(feature = "messages")]
pub mod anthropic;
#[cfg(feature = "responses")]
pub mod anthropic_responses;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::config::{AgentSettings, ApiFlavor};
use crate::error::AgentError;
use crate::types::{ConversationMessage, ToolChoice, ToolDefinition, ToolUse};

/// A request sent to the completion service.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ConversationMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
    /// `None` leaves tool choice to the service default.
    pub tool_choice: Option<ToolChoice>,
}

/// One incremental event from the completion service.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    Text(String),
    Thinking(String),
    ToolUseStart {
        id: String,
        name: String,
    },
    /// A fragment of a tool invocation's input.
    ToolInputJson {
        id: String,
        partial_json: String,
        /// Best-effort parse of everything received so far for this tool.
        snapshot: Option<serde_json::Value>,
    },
    /// A fully materialized tool invocation.
    ToolUse(ToolUse),
    /// Raw accounting, not yet normalized.
    Usage(serde_json::Value),
    /// Thread id echoed by the service.
    ThreadId(String),
    Done,
}

pub type DeltaStream = BoxStream<'static, Result<StreamDelta, AgentError>>;

/// Core trait implemented by every completion transport.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// Transport name (e.g., "messages", "responses").
    fn name(&self) -> &str;

    /// Send the request and stream the service's deltas.
    ///
    /// Non-success statuses fail here, before any delta is produced.
    async fn stream(&self, request: &ProviderRequest) -> Result<DeltaStream, AgentError>;
}

/// Create the transport selected by the settings' API flavor.
pub fn create_transport(
    settings: &AgentSettings,
) -> Result<Arc<dyn CompletionTransport>, AgentError> {
    let api_key = settings.require_api_key()?.to_string();
    match settings.api_flavor {
        #[cfg(feature = "messages")]
        ApiFlavor::Messages => Ok(Arc::new(
            anthropic::MessagesTransport::new(api_key, settings.base_url.clone())
                .with_timeout(settings.request_timeout()),
        )),
        #[cfg(feature = "responses")]
        ApiFlavor::Responses => Ok(Arc::new(
            anthropic_responses::ResponsesTransport::new(api_key, settings.base_url.clone())
                .with_timeout(settings.request_timeout()),
        )),
        #[allow(unreachable_patterns)]
        flavor => Err(AgentError::Configuration(format!(
            "API flavor '{flavor}' is not enabled in this build"
        ))),
    }
}
