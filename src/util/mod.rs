//! Utility modules: retry, usage tracking, timeout.

pub mod retry;
pub mod timeout;
pub mod usage;
