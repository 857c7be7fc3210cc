//! Shared HTTP client, SSE parsing, and error mapping.

use std::sync::OnceLock;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, RETRY_AFTER};

use crate::error::AgentError;
use crate::util::retry::parse_retry_after;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
///
/// Per-request timeouts are set by each transport.
pub fn shared_client() -> &'static reqwest::Client {
    SHARED_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .build()
            .expect("Failed to build HTTP client")
    })
}

/// Build Anthropic-style headers (x-api-key).
pub fn anthropic_headers(api_key: &str, version: &str, beta: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(val) = HeaderValue::from_str(api_key) {
        headers.insert("x-api-key", val);
    }
    if let Ok(val) = HeaderValue::from_str(version) {
        headers.insert("anthropic-version", val);
    }
    if let Some(val) = beta.and_then(|b| HeaderValue::from_str(b).ok()) {
        headers.insert("anthropic-beta", val);
    }
    headers
}

/// Parse an SSE "data:" line, returning None for "[DONE]".
pub fn parse_sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    if data == "[DONE]" {
        return None;
    }
    Some(data)
}

/// Pop the next complete line from a streaming byte buffer.
///
/// Incomplete trailing bytes stay in the buffer until more arrive, so a
/// multibyte character split across network chunks is decoded whole.
pub fn next_line(buffer: &mut Vec<u8>) -> Option<String> {
    let line_end = buffer.iter().position(|&b| b == b'\n')?;
    let line = String::from_utf8_lossy(&buffer[..line_end]).trim().to_string();
    buffer.drain(..=line_end);
    Some(line)
}

/// Read the `Retry-After` header in milliseconds.
pub fn retry_after_header(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after)
}

/// Map a non-success HTTP response to an error.
pub fn status_to_error(status: u16, retry_after_ms: Option<u64>, body: &str) -> AgentError {
    let message = error_message(body);
    match status {
        401 | 403 => AgentError::Authentication(message),
        429 => AgentError::RateLimited { retry_after_ms },
        _ => AgentError::Api {
            status,
            message,
            retry_after_ms,
        },
    }
}

/// Map an `error` event received mid-stream to an error.
pub fn stream_error_event(event: &serde_json::Value) -> AgentError {
    let kind = event
        .pointer("/error/type")
        .and_then(|t| t.as_str())
        .unwrap_or("");
    let message = event
        .pointer("/error/message")
        .and_then(|m| m.as_str())
        .unwrap_or("stream error")
        .to_string();
    match kind {
        "rate_limit_error" => AgentError::RateLimited {
            retry_after_ms: None,
        },
        "overloaded_error" => AgentError::api(529, message),
        "api_error" => AgentError::api(500, message),
        _ => AgentError::Stream(message),
    }
}

/// Prefer the service's `error.message` over the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}
