//! Per-strategy alert de-duplication

use std::collections::HashSet;
use std::sync::Mutex;

use crate::types::AlertKey;

/// Keys already alerted since the last daily clear
#[derive(Debug, Default)]
pub struct AlertDeduplicator {
    seen: Mutex<HashSet<AlertKey>>,
}

impl AlertDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True exactly once per key between two clears.
    ///
    /// Check and insert happen under one lock, so two concurrent callers with
    /// the same key cannot both get `true`.
    pub fn should_alert(&self, key: &AlertKey) -> bool {
        let mut seen = match self.seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        seen.insert(key.clone())
    }

    pub fn clear(&self) {
        match self.seen.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    pub fn len(&self) -> usize {
        match self.seen.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
