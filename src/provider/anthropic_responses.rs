//! Responses-style event-stream transport.
//!
//! Same service, different surface: a flat `input` list, function-style tool
//! definitions, and a plain `data:` line protocol whose events may carry
//! usage at several nesting levels.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::error::AgentError;
use crate::types::ToolDefinition;

use super::http::{
    anthropic_headers, next_line, parse_sse_data, retry_after_header, shared_client,
    status_to_error, stream_error_event,
};
use super::partial_json::ToolInputBuffer;
use super::{CompletionTransport, DeltaStream, ProviderRequest, StreamDelta};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2024-01-01";
const BETA_FLAGS: &str = "responses-2025-01-01";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Paths at which an event may carry usage, checked in order.
const USAGE_POINTERS: &[&str] = &["/usage", "/response/usage", "/message/usage", "/result/usage"];

pub struct ResponsesTransport {
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl ResponsesTransport {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            api_key,
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_request_body(&self, request: &ProviderRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "system": [{"type": "text", "text": request.system}],
            "input": request.messages,
            "stream": true,
        });

        if let Some(obj) = body.as_object_mut() {
            if !request.tools.is_empty() {
                let tools: Vec<Value> = request.tools.iter().map(function_tool).collect();
                obj.insert("tools".into(), tools.into());
            }
            if let Some(ref tool_choice) = request.tool_choice {
                obj.insert("tool_choice".into(), tool_choice.to_json());
            }
        }

        body
    }
}

fn function_tool(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "name": tool.name,
        "description": tool.description,
        "parameters": tool.input_schema,
    })
}

fn event_usage(event: &Value) -> Option<&Value> {
    USAGE_POINTERS
        .iter()
        .filter_map(|pointer| event.pointer(pointer))
        .find(|usage| usage.is_object())
}

/// Thread id echoed by the service. Per-response ids are not thread ids.
fn event_thread_id(event: &Value) -> Option<&str> {
    event
        .get("thread_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

#[async_trait]
impl CompletionTransport for ResponsesTransport {
    fn name(&self) -> &str {
        "responses"
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<DeltaStream, AgentError> {
        let body = self.build_request_body(request);
        let url = format!("{}/responses", self.base_url);

        debug!(model = %request.model, "Responses stream");

        let resp = shared_client()
            .post(&url)
            .headers(anthropic_headers(&self.api_key, API_VERSION, Some(BETA_FLAGS)))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after = retry_after_header(resp.headers());
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, retry_after, &body_text));
        }

        let byte_stream = resp.bytes_stream();

        let stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            let mut tools: HashMap<u64, ToolInputBuffer> = HashMap::new();
            let mut thread_id_sent = false;
            futures::pin_mut!(byte_stream);

            'outer: while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(AgentError::Network(e));
                        return;
                    }
                };

                buffer.extend_from_slice(&chunk);

                while let Some(line) = next_line(&mut buffer) {
                    let Some(data) = parse_sse_data(&line) else {
                        continue;
                    };
                    let event = match serde_json::from_str::<Value>(data) {
                        Ok(event) => event,
                        Err(err) => {
                            trace!(error = %err, "skipping malformed event chunk");
                            continue;
                        }
                    };

                    if let Some(usage) = event_usage(&event) {
                        yield Ok(StreamDelta::Usage(usage.clone()));
                    }
                    if !thread_id_sent {
                        if let Some(id) = event_thread_id(&event) {
                            thread_id_sent = true;
                            yield Ok(StreamDelta::ThreadId(id.to_string()));
                        }
                    }

                    let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
                    match event.get("type").and_then(Value::as_str).unwrap_or("") {
                        "content_block_start" => {
                            let Some(block) = event.get("content_block") else {
                                continue;
                            };
                            if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                                let tool = ToolInputBuffer::new(
                                    block.get("id").and_then(Value::as_str).unwrap_or(""),
                                    block.get("name").and_then(Value::as_str).unwrap_or(""),
                                    block.get("input").cloned(),
                                );
                                yield Ok(StreamDelta::ToolUseStart {
                                    id: tool.id.clone(),
                                    name: tool.name.clone(),
                                });
                                tools.insert(index, tool);
                            }
                        }
                        "content_block_delta" => {
                            let Some(delta) = event.get("delta") else {
                                continue;
                            };
                            match delta.get("type").and_then(Value::as_str).unwrap_or("") {
                                "text_delta" => {
                                    let text = delta.get("text").and_then(Value::as_str).unwrap_or("");
                                    yield Ok(StreamDelta::Text(text.to_string()));
                                }
                                "thinking_delta" => {
                                    let thinking = delta.get("thinking").and_then(Value::as_str).unwrap_or("");
                                    yield Ok(StreamDelta::Thinking(thinking.to_string()));
                                }
                                "input_json_delta" => {
                                    let Some(json) = delta.get("partial_json").and_then(Value::as_str) else {
                                        continue;
                                    };
                                    let Some(tool) = tools.get_mut(&index) else {
                                        continue;
                                    };
                                    let snapshot = tool.push(json);
                                    yield Ok(StreamDelta::ToolInputJson {
                                        id: tool.id.clone(),
                                        partial_json: json.to_string(),
                                        snapshot,
                                    });
                                }
                                _ => {}
                            }
                        }
                        "content_block_stop" => {
                            if let Some(tool) = tools.remove(&index) {
                                yield Ok(StreamDelta::ToolUse(tool.finish()));
                            }
                        }
                        "error" => {
                            yield Err(stream_error_event(&event));
                            return;
                        }
                        "message_stop" | "response.completed" => break 'outer,
                        _ => {}
                    }
                }
            }

            let mut open: Vec<_> = tools.into_iter().collect();
            open.sort_by_key(|(index, _)| *index);
            for (_, tool) in open {
                yield Ok(StreamDelta::ToolUse(tool.finish()));
            }
            yield Ok(StreamDelta::Done);
        };

        Ok(Box::pin(stream))
    }
}
