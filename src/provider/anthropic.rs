//! Anthropic Messages API transport.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::AgentError;

use super::http::{
    anthropic_headers, next_line, parse_sse_data, retry_after_header, shared_client,
    status_to_error, stream_error_event,
};
use super::partial_json::ToolInputBuffer;
use super::{CompletionTransport, DeltaStream, ProviderRequest, StreamDelta};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

pub struct MessagesTransport {
    api_key: String,
    base_url: String,
    timeout: Duration,
}

impl MessagesTransport {
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
        let mut body = serde_json::json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": request.messages,
            "stream": true,
        });

        if let Some(obj) = body.as_object_mut() {
            if !request.system.is_empty() {
                obj.insert("system".into(), request.system.clone().into());
            }
            if !request.tools.is_empty() {
                obj.insert("tools".into(), serde_json::json!(request.tools));
            }
            if let Some(ref tool_choice) = request.tool_choice {
                obj.insert("tool_choice".into(), tool_choice.to_json());
            }
        }

        body
    }
}

/// An open content block, keyed by block index.
enum OpenBlock {
    Tool(ToolInputBuffer),
    Other,
}

#[async_trait]
impl CompletionTransport for MessagesTransport {
    fn name(&self) -> &str {
        "messages"
    }

    async fn stream(&self, request: &ProviderRequest) -> Result<DeltaStream, AgentError> {
        let body = self.build_request_body(request);
        let url = format!("{}/messages", self.base_url);

        debug!(model = %request.model, messages = request.messages.len(), "Messages stream");

        let resp = shared_client()
            .post(&url)
            .headers(anthropic_headers(&self.api_key, API_VERSION, None))
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
            let mut blocks: HashMap<u64, OpenBlock> = HashMap::new();
            let mut produced = false;
            let mut finished = false;
            futures::pin_mut!(byte_stream);

            'outer: while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(AgentError::Network(e));
                        finished = true;
                        break;
                    }
                };

                buffer.extend_from_slice(&chunk);

                while let Some(line) = next_line(&mut buffer) {
                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }
                    let Some(data) = parse_sse_data(&line) else {
                        continue;
                    };
                    let event = match serde_json::from_str::<Value>(data) {
                        Ok(event) => event,
                        Err(err) => {
                            trace!(error = %err, "skipping malformed stream chunk");
                            continue;
                        }
                    };

                    let index = event.get("index").and_then(Value::as_u64).unwrap_or(0);
                    match event.get("type").and_then(Value::as_str).unwrap_or("") {
                        "message_start" => {
                            if let Some(usage) = event.pointer("/message/usage") {
                                yield Ok(StreamDelta::Usage(usage.clone()));
                            }
                        }
                        "content_block_start" => {
                            let Some(block) = event.get("content_block") else {
                                continue;
                            };
                            let block_type = block.get("type").and_then(Value::as_str).unwrap_or("");
                            match block_type {
                                "tool_use" => {
                                    let tool = ToolInputBuffer::new(
                                        block.get("id").and_then(Value::as_str).unwrap_or(""),
                                        block.get("name").and_then(Value::as_str).unwrap_or(""),
                                        block.get("input").cloned(),
                                    );
                                    produced = true;
                                    yield Ok(StreamDelta::ToolUseStart {
                                        id: tool.id.clone(),
                                        name: tool.name.clone(),
                                    });
                                    blocks.insert(index, OpenBlock::Tool(tool));
                                }
                                "text" => {
                                    if let Some(text) = block.get("text").and_then(Value::as_str).filter(|t| !t.is_empty()) {
                                        produced = true;
                                        yield Ok(StreamDelta::Text(text.to_string()));
                                    }
                                    blocks.insert(index, OpenBlock::Other);
                                }
                                _ => {
                                    blocks.insert(index, OpenBlock::Other);
                                }
                            }
                        }
                        "content_block_delta" => {
                            let Some(delta) = event.get("delta") else {
                                continue;
                            };
                            match delta.get("type").and_then(Value::as_str).unwrap_or("") {
                                "text_delta" => {
                                    if let Some(text) = delta.get("text").and_then(Value::as_str) {
                                        produced = true;
                                        yield Ok(StreamDelta::Text(text.to_string()));
                                    }
                                }
                                "thinking_delta" => {
                                    if let Some(thinking) = delta.get("thinking").and_then(Value::as_str) {
                                        produced = true;
                                        yield Ok(StreamDelta::Thinking(thinking.to_string()));
                                    }
                                }
                                "input_json_delta" => {
                                    let Some(json) = delta.get("partial_json").and_then(Value::as_str) else {
                                        continue;
                                    };
                                    let Some(OpenBlock::Tool(tool)) = blocks.get_mut(&index) else {
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
                            if let Some(OpenBlock::Tool(tool)) = blocks.remove(&index) {
                                yield Ok(StreamDelta::ToolUse(tool.finish()));
                            }
                        }
                        "message_delta" => {
                            if let Some(usage) = event.get("usage") {
                                yield Ok(StreamDelta::Usage(usage.clone()));
                            }
                        }
                        "message_stop" => {
                            finished = true;
                            yield Ok(StreamDelta::Done);
                            break 'outer;
                        }
                        "error" => {
                            finished = true;
                            yield Err(stream_error_event(&event));
                            break 'outer;
                        }
                        _ => {}
                    }
                }
            }

            if !finished {
                if produced {
                    let mut open: Vec<_> = blocks.into_iter().collect();
                    open.sort_by_key(|(index, _)| *index);
                    for (_, block) in open {
                        if let OpenBlock::Tool(tool) = block {
                            yield Ok(StreamDelta::ToolUse(tool.finish()));
                        }
                    }
                    yield Ok(StreamDelta::Done);
                } else {
                    yield Err(AgentError::Stream(
                        "stream ended without an assistant message".into(),
                    ));
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
