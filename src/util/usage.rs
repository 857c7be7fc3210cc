//! Usage tracking across the turns of a thread.

use std::sync::{Arc, PoisonError, RwLock};

use crate::types::usage::Usage;

/// Tracks cumulative usage across turns.
#[derive(Clone)]
pub struct UsageTracker {
    inner: Arc<RwLock<UsageTrackerInner>>,
}

#[derive(Default)]
struct UsageTrackerInner {
    total_usage: Usage,
    turn_count: u64,
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UsageTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(UsageTrackerInner::default())),
        }
    }

    /// Record one turn. Turns without accounting still count.
    pub fn record(&self, usage: Option<&Usage>) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(usage) = usage {
            inner.total_usage.merge(usage);
        }
        inner.turn_count += 1;
    }

    /// Get total usage.
    pub fn total_usage(&self) -> Usage {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).total_usage
    }

    /// Get number of turns tracked.
    pub fn turn_count(&self) -> u64 {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).turn_count
    }

    /// Reset all tracking.
    pub fn reset(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *inner = UsageTrackerInner::default();
    }
}
