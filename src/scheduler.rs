//! Daily scan scheduler
//!
//! One per strategy. Waits for the trigger time, runs the strategy's build
//! exactly once per market-local day, then enables the breakout tracker.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::notify::{format_scan_complete, NotificationSink};
use crate::shutdown::ShutdownSignal;
use crate::strategy::StrategyHandle;
use crate::worker::WorkerPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Waiting,
    RunToday,
    DoneToday,
}

pub struct ScanScheduler {
    strategy: Arc<StrategyHandle>,
    clock: Arc<dyn Clock>,
    workers: WorkerPool,
    notifications: NotificationSink,
    tick: Duration,
    state: SchedulerState,
}

impl ScanScheduler {
    pub fn new(
        strategy: Arc<StrategyHandle>,
        clock: Arc<dyn Clock>,
        workers: WorkerPool,
        notifications: NotificationSink,
        tick: Duration,
    ) -> Self {
        Self {
            strategy,
            clock,
            workers,
            notifications,
            tick,
            state: SchedulerState::Waiting,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Evaluate one tick and return the resulting state
    pub async fn tick(&mut self) -> SchedulerState {
        let now = self.clock.now();
        let today = now.date_naive();
        let run_state = &self.strategy.run_state;

        // A tick dropped mid-build never recorded the date; start over
        if self.state == SchedulerState::RunToday {
            self.state = SchedulerState::Waiting;
        }

        if self.state == SchedulerState::DoneToday && run_state.last_completed() != Some(today) {
            info!(strategy = %self.strategy.name(), "New trading day {}, waiting for {}", today, self.strategy.config.trigger_time);
            run_state.set_enabled(false);
            self.state = SchedulerState::Waiting;
        }

        if self.state != SchedulerState::Waiting {
            return self.state;
        }

        if now.time() < self.strategy.config.trigger_time || run_state.last_completed() == Some(today) {
            return self.state;
        }

        self.state = SchedulerState::RunToday;
        info!(strategy = %self.strategy.name(), "Running daily scan for {}", today);

        match self.run_build().await {
            Ok(armed) => {
                run_state.record_completed(today);
                self.strategy.dedup.clear();
                run_state.set_enabled(true);
                self.notifications
                    .notify(format_scan_complete(self.strategy.title(), armed));
                info!(strategy = %self.strategy.name(), "Daily scan done: {} instruments armed", armed);
                self.state = SchedulerState::DoneToday;
            }
            Err(e) => {
                error!(strategy = %self.strategy.name(), "Daily scan failed, will retry: {:#}", e);
                self.state = SchedulerState::Waiting;
            }
        }
        self.state
    }

    async fn run_build(&self) -> anyhow::Result<usize> {
        let _guard = self.strategy.scan_lock.lock().await;
        let detector = self.strategy.detector.clone();
        self.workers.run(async move { detector.build().await }).await
    }

    /// Tick forever until shutdown
    pub async fn run(mut self, mut shutdown: ShutdownSignal) {
        info!(
            strategy = %self.strategy.name(),
            "Scheduler started, trigger at {}",
            self.strategy.config.trigger_time
        );

        loop {
            let state = self.tick().await;
            debug!(strategy = %self.strategy.name(), "Scheduler state {:?}", state);

            tokio::select! {
                _ = tokio::time::sleep(self.tick) => {}
                _ = shutdown.recv() => {
                    info!(strategy = %self.strategy.name(), "Scheduler stopping");
                    return;
                }
            }
        }
    }
}
