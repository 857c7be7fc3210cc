//! Retry classification and the retry driver.

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use crate::error::AgentError;

/// Why an error is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    RateLimit,
    /// Upstream closed the stream before producing anything useful.
    TransientStream,
    ServerError,
}

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff for attempt 0.
    pub initial_backoff: Duration,
    /// Cap on the exponential backoff, before jitter.
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Upper bound of the random jitter added to exponential backoff.
    pub max_jitter: Duration,
    /// Cap on a server-provided `Retry-After` hint.
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(8000),
            multiplier: 2.0,
            max_jitter: Duration::from_millis(250),
            max_retry_after: Duration::from_secs(30),
        }
    }
}

fn rate_limit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)rate.?limit|too many requests").expect("valid regex")
    })
}

fn transient_stream_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)stream ended without|ended without sending any chunks|no chunks")
            .expect("valid regex")
    })
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Classify an error, returning `None` when it is not retryable.
    ///
    /// Checked in order: rate limit, transient stream truncation, server
    /// error.
    pub fn reason(error: &AgentError) -> Option<RetryReason> {
        let status = error.status();
        let message = error.to_string();

        if status == Some(429)
            || rate_limit_re().is_match(error.kind_name())
            || rate_limit_re().is_match(&message)
        {
            return Some(RetryReason::RateLimit);
        }
        if transient_stream_re().is_match(&message) {
            return Some(RetryReason::TransientStream);
        }
        if status.is_some_and(|s| (500..600).contains(&s)) {
            return Some(RetryReason::ServerError);
        }
        None
    }

    /// Delay before retrying after `error` on the given zero-based attempt,
    /// or `None` when the error is not retryable.
    pub fn classify(&self, error: &AgentError, attempt: u32) -> Option<Duration> {
        let reason = Self::reason(error)?;

        if reason == RetryReason::TransientStream {
            return Some(Duration::from_millis(500) + Duration::from_millis(500).mul_f64(rand_factor()));
        }

        if let Some(ms) = error.retry_after_ms().filter(|ms| *ms > 0) {
            return Some(Duration::from_millis(ms).min(self.max_retry_after));
        }

        Some(self.backoff(attempt) + self.max_jitter.mul_f64(rand_factor()))
    }

    /// Exponential backoff for an attempt, without jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(31) as i32);
        Duration::from_secs_f64(
            (self.initial_backoff.as_secs_f64() * factor).min(self.max_backoff.as_secs_f64()),
        )
    }

    /// Human-readable progress line shown while waiting to retry.
    ///
    /// `attempt` is the one-based number of the retry about to happen.
    pub fn retry_message(&self, attempt: u32, delay: Duration, error: &AgentError) -> String {
        let ms = delay.as_millis();
        let total = self.max_attempts();
        match Self::reason(error) {
            Some(RetryReason::RateLimit) => {
                format!("请求过于频繁，{ms}ms 后重试（{attempt}/{total}）…")
            }
            _ => format!("连接中断，{ms}ms 后重试（{attempt}/{total}）…"),
        }
    }

    /// Execute an async operation with retry.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        self.execute_with_observer(operation, |_, _, _| {}).await
    }

    /// Execute an async operation with retry, calling `observer` with the
    /// one-based retry number, the delay, and the error before each sleep.
    ///
    /// The final error is returned unchanged once retries are exhausted or
    /// the error is not retryable.
    pub async fn execute_with_observer<F, Fut, T, O>(
        &self,
        mut operation: F,
        mut observer: O,
    ) -> Result<T, AgentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
        O: FnMut(u32, Duration, &AgentError),
    {
        let mut attempt = 0;
        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if attempt >= self.max_retries {
                return Err(error);
            }
            let Some(delay) = self.classify(&error, attempt) else {
                return Err(error);
            };
            attempt += 1;

            tracing::warn!(
                attempt,
                max_retries = self.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after error"
            );
            observer(attempt, delay, &error);
            tokio::time::sleep(delay).await;
        }
    }
}

/// Parse a `Retry-After` header value into milliseconds.
///
/// Accepts a positive number of seconds or an HTTP date in the future.
pub fn parse_retry_after(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<f64>() {
        return (seconds.is_finite() && seconds > 0.0).then(|| (seconds * 1000.0).round() as u64);
    }
    let date = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let ms = (date.with_timezone(&chrono::Utc) - chrono::Utc::now()).num_milliseconds();
    (ms > 0).then_some(ms as u64)
}

/// Simple pseudo-random factor [0, 1) without pulling in rand crate.
fn rand_factor() -> f64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
        .hash(&mut hasher);
    std::thread::current().id().hash(&mut hasher);

    let hash = hasher.finish();
    (hash % 10000) as f64 / 10000.0
}
