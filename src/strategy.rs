//! Per-strategy state shared by its scheduler and tracker

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::alerts::AlertDeduplicator;
use crate::config::StrategyConfig;
use crate::types::TradeCandidate;

/// A detection strategy's two entry points
#[async_trait]
pub trait Detector: Send + Sync {
    /// Daily one-shot preparation; returns how many instruments are armed
    async fn build(&self) -> anyhow::Result<usize>;

    /// One live detection pass over the armed instruments
    async fn scan(&self) -> anyhow::Result<Vec<TradeCandidate>>;
}

/// Daily run bookkeeping.
///
/// Written only by the scan scheduler; the tracker just reads `is_enabled`.
#[derive(Debug, Default)]
pub struct ScanRunState {
    last_completed: Mutex<Option<NaiveDate>>,
    enabled: AtomicBool,
}

impl ScanRunState {
    pub fn last_completed(&self) -> Option<NaiveDate> {
        match self.last_completed.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn record_completed(&self, date: NaiveDate) {
        match self.last_completed.lock() {
            Ok(mut guard) => *guard = Some(date),
            Err(poisoned) => *poisoned.into_inner() = Some(date),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

/// Everything one strategy's tasks share
pub struct StrategyHandle {
    pub config: StrategyConfig,
    pub detector: Arc<dyn Detector>,
    /// Held for the whole of a daily build or a tracker pass
    pub scan_lock: tokio::sync::Mutex<()>,
    pub run_state: ScanRunState,
    pub dedup: AlertDeduplicator,
}

impl StrategyHandle {
    pub fn new(config: StrategyConfig, detector: Arc<dyn Detector>) -> Arc<Self> {
        Arc::new(Self {
            config,
            detector,
            scan_lock: tokio::sync::Mutex::new(()),
            run_state: ScanRunState::default(),
            dedup: AlertDeduplicator::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn title(&self) -> &str {
        self.config.display_title()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_starts_idle() {
        let state = ScanRunState::default();
        assert!(!state.is_enabled());
        assert!(state.last_completed().is_none());

        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        state.record_completed(day);
        state.set_enabled(true);
        assert_eq!(state.last_completed(), Some(day));
        assert!(state.is_enabled());
    }
}
