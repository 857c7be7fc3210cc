//! Token usage accounting and normalization.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token usage for one turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    /// Accumulate another usage into this one. Counts saturate at `u64::MAX`.
    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.cached_input_tokens = self
            .cached_input_tokens
            .saturating_add(other.cached_input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

const INPUT_KEYS: &[&str] = &["input_tokens", "inputTokens", "prompt_tokens", "promptTokens"];
const OUTPUT_KEYS: &[&str] = &[
    "output_tokens",
    "outputTokens",
    "completion_tokens",
    "completionTokens",
];
const CACHED_KEYS: &[&str] = &[
    "cache_read_input_tokens",
    "cacheReadInputTokens",
    "cached_input_tokens",
    "cachedInputTokens",
    "cached_tokens",
    "cachedTokens",
];

/// Canonicalize a provider usage object into [`Usage`].
///
/// Accepts snake_case and camelCase spellings and several aliases for the
/// cache-read counter (including the nested `input_tokens_details.cached_tokens`
/// shape). Returns `None` when neither an input nor an output count is present.
pub fn normalize_usage(raw: &Value) -> Option<Usage> {
    let obj = raw.as_object()?;

    let input = first_count(raw, INPUT_KEYS);
    let output = first_count(raw, OUTPUT_KEYS);
    if input.is_none() && output.is_none() {
        return None;
    }

    let cached = first_count(raw, CACHED_KEYS).or_else(|| {
        ["input_tokens_details", "inputTokensDetails", "prompt_tokens_details"]
            .iter()
            .filter_map(|key| obj.get(*key))
            .find_map(|details| first_count(details, CACHED_KEYS))
    });

    Some(Usage {
        input_tokens: input.unwrap_or(0),
        cached_input_tokens: cached.unwrap_or(0),
        output_tokens: output.unwrap_or(0),
    })
}

fn first_count(raw: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter()
        .filter_map(|key| raw.get(*key))
        .find_map(as_count)
}

fn as_count(value: &Value) -> Option<u64> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    match value.as_f64() {
        Some(f) if f.is_finite() && f >= 0.0 => Some(f.floor() as u64),
        _ => None,
    }
}
