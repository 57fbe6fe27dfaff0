//! Breakout tracker
//!
//! Polls the strategy's detector while its daily scan is done, alerting
//! each (instrument, signal) at most once per day.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::lifecycle::OrderLauncher;
use crate::notify::{format_breakout_alert, NotificationSink};
use crate::shutdown::ShutdownSignal;
use crate::strategy::StrategyHandle;
use crate::types::TradeCandidate;
use crate::worker::WorkerPool;

pub struct BreakoutTracker {
    strategy: Arc<StrategyHandle>,
    clock: Arc<dyn Clock>,
    workers: WorkerPool,
    notifications: NotificationSink,
    launcher: Option<OrderLauncher>,
    interval: Duration,
    idle: Duration,
}

impl BreakoutTracker {
    pub fn new(
        strategy: Arc<StrategyHandle>,
        clock: Arc<dyn Clock>,
        workers: WorkerPool,
        notifications: NotificationSink,
        interval: Duration,
        idle: Duration,
    ) -> Self {
        Self {
            strategy,
            clock,
            workers,
            notifications,
            launcher: None,
            interval,
            idle,
        }
    }

    /// Hand new alerts to the order lifecycle manager
    pub fn with_launcher(mut self, launcher: OrderLauncher) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// One detection pass; returns the candidates that produced a new alert
    pub async fn poll_once(&self) -> Vec<TradeCandidate> {
        let candidates = match self.run_scan().await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(strategy = %self.strategy.name(), "Breakout scan failed: {:#}", e);
                return Vec::new();
            }
        };

        let mut alerted = Vec::new();
        for candidate in candidates {
            if candidate.quantity == 0 {
                debug!(strategy = %self.strategy.name(), "Dropping zero-quantity {}", candidate.name);
                continue;
            }
            if !self.strategy.dedup.should_alert(&candidate.alert_key()) {
                continue;
            }

            info!(
                strategy = %self.strategy.name(),
                "Breakout: {} {} @ {}",
                candidate.side, candidate.name, candidate.price
            );
            self.notifications.notify(format_breakout_alert(
                self.strategy.title(),
                &candidate,
                self.clock.time_of_day(),
            ));

            if self.strategy.config.auto_execute {
                if let Some(launcher) = &self.launcher {
                    launcher.launch(candidate.clone());
                }
            }
            alerted.push(candidate);
        }
        alerted
    }

    async fn run_scan(&self) -> anyhow::Result<Vec<TradeCandidate>> {
        let _guard = self.strategy.scan_lock.lock().await;
        let detector = self.strategy.detector.clone();
        self.workers.run(async move { detector.scan().await }).await
    }

    pub async fn run(self, mut shutdown: ShutdownSignal) {
        info!(strategy = %self.strategy.name(), "Breakout tracker started");

        loop {
            let wait = if self.strategy.run_state.is_enabled() {
                self.poll_once().await;
                self.interval
            } else {
                self.idle
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.recv() => {
                    info!(strategy = %self.strategy.name(), "Breakout tracker stopping");
                    return;
                }
            }
        }
    }
}
