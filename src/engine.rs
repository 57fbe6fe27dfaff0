//! Engine wiring
//!
//! Builds the shared services once, then spawns a scan scheduler and a
//! breakout tracker per configured strategy.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::broker::{BrokerClient, FundApi, OrderApi, QuoteApi};
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::detectors::RangeBreakoutDetector;
use crate::gateway::QuoteGateway;
use crate::lifecycle::{OrderLauncher, OrderLifecycleManager};
use crate::notify::{spawn_dispatcher, NotificationSink, Notifier};
use crate::scheduler::ScanScheduler;
use crate::shutdown::Shutdown;
use crate::sizing::{FundCache, RiskSizer};
use crate::strategy::StrategyHandle;
use crate::tracker::BreakoutTracker;
use crate::worker::WorkerPool;

/// How long `stop` waits for queued notifications to flush
const NOTIFICATION_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// The three broker-facing contracts
#[derive(Clone)]
pub struct BrokerServices {
    pub orders: Arc<dyn OrderApi>,
    pub quotes: Arc<dyn QuoteApi>,
    pub funds: Arc<dyn FundApi>,
}

impl BrokerServices {
    pub fn from_client(client: Arc<BrokerClient>) -> Self {
        Self {
            orders: client.clone(),
            quotes: client.clone(),
            funds: client,
        }
    }
}

pub struct Engine {
    shutdown: Shutdown,
    strategies: Vec<Arc<StrategyHandle>>,
    tasks: Vec<JoinHandle<()>>,
    launcher: Option<OrderLauncher>,
    notifications: Option<NotificationSink>,
    dispatcher: JoinHandle<()>,
}

impl Engine {
    /// Spawn every long-lived task; must be called inside a tokio runtime
    pub fn start(
        config: &AppConfig,
        broker: BrokerServices,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let shutdown = Shutdown::new();
        let (notifications, rx) = NotificationSink::channel();
        let dispatcher = spawn_dispatcher(rx, notifier);

        let gateway = QuoteGateway::new(broker.quotes, &config.quotes);
        let sizer = RiskSizer::new(config.risk.clone());
        let funds = Arc::new(FundCache::new(broker.funds, clock.clone()));
        let workers = WorkerPool::new(config.workers.max_concurrent);
        let launcher = OrderLauncher::new(
            OrderLifecycleManager::new(
                broker.orders,
                gateway.clone(),
                sizer.clone(),
                notifications.clone(),
                config.lifecycle.clone(),
                config.market.segment,
                clock.clone(),
            ),
            shutdown.clone(),
        );

        if config.strategies.is_empty() {
            warn!("No strategies configured; nothing will be scanned");
        }

        let mut strategies = Vec::with_capacity(config.strategies.len());
        let mut tasks = Vec::with_capacity(config.strategies.len() * 2);

        for strategy_config in &config.strategies {
            let detector = Arc::new(RangeBreakoutDetector::new(
                strategy_config.name.clone(),
                strategy_config.ranges_file.clone(),
                strategy_config.signals_file.clone(),
                config.market.segment,
                gateway.clone(),
                funds.clone(),
                sizer.clone(),
            ));
            let handle = StrategyHandle::new(strategy_config.clone(), detector);

            let scheduler = ScanScheduler::new(
                handle.clone(),
                clock.clone(),
                workers.clone(),
                notifications.clone(),
                config.scheduler.tick(),
            );
            tasks.push(tokio::spawn(scheduler.run(shutdown.subscribe())));

            let mut tracker = BreakoutTracker::new(
                handle.clone(),
                clock.clone(),
                workers.clone(),
                notifications.clone(),
                config.scheduler.tracker_interval(),
                config.scheduler.tracker_idle(),
            );
            if strategy_config.auto_execute {
                tracker = tracker.with_launcher(launcher.clone());
            }
            tasks.push(tokio::spawn(tracker.run(shutdown.subscribe())));

            info!(
                strategy = %strategy_config.name,
                auto_execute = strategy_config.auto_execute,
                "Strategy started"
            );
            strategies.push(handle);
        }

        Self {
            shutdown,
            strategies,
            tasks,
            launcher: Some(launcher),
            notifications: Some(notifications),
            dispatcher,
        }
    }

    pub fn strategies(&self) -> &[Arc<StrategyHandle>] {
        &self.strategies
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Signal every task, wait for schedulers, trackers and in-flight
    /// orders, then flush pending notifications
    pub async fn stop(mut self) {
        self.shutdown.trigger();

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Task ended abnormally: {}", e);
            }
        }

        // Trackers are gone, so nothing launches past this point
        if let Some(launcher) = self.launcher.take() {
            let states = launcher.wait_all().await;
            info!("{} order lifecycle(s) settled", states.len());
        }

        self.notifications.take();
        self.strategies.clear();
        if tokio::time::timeout(NOTIFICATION_FLUSH_TIMEOUT, &mut self.dispatcher)
            .await
            .is_err()
        {
            warn!("Notifications still pending at shutdown");
        }
        info!("Engine stopped");
    }
}
