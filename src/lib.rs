//! Breakout Trader Library
//!
//! Detects intraday range breakouts on a daily schedule, alerts an operator
//! and optionally carries each alert through a broker bracket order.

pub mod alerts;
pub mod broker;
pub mod clock;
pub mod config;
pub mod detectors;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod lifecycle;
pub mod notify;
pub mod scheduler;
pub mod shutdown;
pub mod sizing;
pub mod strategy;
pub mod tracker;
pub mod types;
pub mod worker;

// Re-export main types for convenience
pub use alerts::AlertDeduplicator;
pub use broker::{BrokerClient, FundApi, OrderApi, QuoteApi};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AppConfig, LifecycleConfig, RiskParameters, StrategyConfig};
pub use engine::{BrokerServices, Engine};
pub use error::{BrokerError, OrderError, QuoteError};
pub use gateway::QuoteGateway;
pub use lifecycle::{OrderLauncher, OrderLifecycleManager, OrderState};
pub use notify::{NotificationSink, Notifier};
pub use scheduler::{ScanScheduler, SchedulerState};
pub use shutdown::{Shutdown, ShutdownSignal};
pub use sizing::{size_position, FundCache, PositionSize, RiskSizer};
pub use strategy::{Detector, ScanRunState, StrategyHandle};
pub use tracker::BreakoutTracker;
pub use types::{
    AlertKey, BracketExitStatus, ExitReason, LifecyclePhase, OrderStatus, Quote, Segment, Side,
    SignalRecord, TradeCandidate,
};
pub use worker::WorkerPool;
