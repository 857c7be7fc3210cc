//! Memory sink: where a turn's memory instructions go.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use crate::types::MemoryOps;

/// Receives memory instructions from settled turns.
pub trait MemorySink: Send + Sync {
    /// Apply `set` then `remove`, verbatim.
    fn apply(&self, ops: &MemoryOps);

    /// One line describing the stored memory for the system prompt.
    fn prompt_line(&self) -> Option<String> {
        None
    }
}

/// Process-local key/value memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl MemorySink for InMemoryStore {
    fn apply(&self, ops: &MemoryOps) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for (key, value) in ops.set.iter().flatten() {
            if !key.is_empty() {
                entries.insert(key.clone(), value.clone());
            }
        }
        for key in ops.remove.iter().flatten() {
            entries.remove(key);
        }
    }

    fn prompt_line(&self) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        if entries.is_empty() {
            return None;
        }
        let pairs: Vec<String> = entries.iter().map(|(k, v)| format!("{k}={v}")).collect();
        Some(format!("Remembered context: {}", pairs.join("; ")))
    }
}
