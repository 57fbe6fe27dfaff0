//! Engine configuration
//!
//! Loaded from an optional TOML file, then overridden by `TRADER__*`
//! environment variables (e.g. `TRADER__BROKER__ACCESS_TOKEN`).

use chrono::NaiveTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::Segment;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub risk: RiskParameters,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub quotes: QuoteConfig,
    #[serde(default)]
    pub workers: WorkerConfig,
    pub broker: BrokerConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
}

impl AppConfig {
    /// Load from `path` (missing file is fine) plus environment overrides
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let path = path.unwrap_or(DEFAULT_CONFIG_PATH);

        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("TRADER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to read configuration: {}", e))?;

        let config: AppConfig = settings
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.risk.max_loss_per_trade <= Decimal::ZERO {
            return Err(anyhow::anyhow!("risk.max_loss_per_trade must be positive"));
        }
        if self.quotes.max_attempts == 0 {
            return Err(anyhow::anyhow!("quotes.max_attempts must be at least 1"));
        }
        if self.workers.max_concurrent == 0 {
            return Err(anyhow::anyhow!("workers.max_concurrent must be at least 1"));
        }
        // A zero interval would poll the broker in a tight loop
        for (name, secs) in [
            ("scheduler.tick_secs", self.scheduler.tick_secs),
            ("scheduler.tracker_interval_secs", self.scheduler.tracker_interval_secs),
            ("scheduler.tracker_idle_secs", self.scheduler.tracker_idle_secs),
            ("lifecycle.fill_poll_secs", self.lifecycle.fill_poll_secs),
            ("lifecycle.monitor_poll_secs", self.lifecycle.monitor_poll_secs),
            ("lifecycle.quote_retry_secs", self.lifecycle.quote_retry_secs),
        ] {
            if secs == 0 {
                return Err(anyhow::anyhow!("{} must be at least 1", name));
            }
        }
        let mut seen = std::collections::HashSet::new();
        for strategy in &self.strategies {
            if !seen.insert(strategy.name.as_str()) {
                return Err(anyhow::anyhow!("Duplicate strategy name: {}", strategy.name));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct MarketConfig {
    /// Minutes east of UTC for every date/time comparison
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    #[serde(default)]
    pub segment: Segment,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: default_utc_offset_minutes(),
            segment: Segment::default(),
        }
    }
}

/// Risk budget per trade
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RiskParameters {
    /// Ceiling on loss if the stop is hit, in currency units
    #[serde(default = "default_max_loss_per_trade")]
    pub max_loss_per_trade: Decimal,
    /// Broker trailing step as a fraction of R
    #[serde(default = "default_trailing_step_fraction")]
    pub trailing_step_fraction: Decimal,
    /// Target distance in multiples of R
    #[serde(default = "default_target_multiple")]
    pub target_multiple: Decimal,
    /// Intraday leverage by instrument id; missing entries mean 1x
    #[serde(default)]
    pub leverage: HashMap<String, Decimal>,
}

impl Default for RiskParameters {
    fn default() -> Self {
        Self {
            max_loss_per_trade: default_max_loss_per_trade(),
            trailing_step_fraction: default_trailing_step_fraction(),
            target_multiple: default_target_multiple(),
            leverage: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_tracker_interval_secs")]
    pub tracker_interval_secs: u64,
    #[serde(default = "default_tracker_idle_secs")]
    pub tracker_idle_secs: u64,
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn tracker_interval(&self) -> Duration {
        Duration::from_secs(self.tracker_interval_secs)
    }

    pub fn tracker_idle(&self) -> Duration {
        Duration::from_secs(self.tracker_idle_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_scheduler_tick_secs(),
            tracker_interval_secs: default_tracker_interval_secs(),
            tracker_idle_secs: default_tracker_idle_secs(),
        }
    }
}

/// Order lifecycle timings and trigger thresholds
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LifecycleConfig {
    #[serde(default = "default_fill_poll_secs")]
    pub fill_poll_secs: u64,
    #[serde(default = "default_fill_timeout_secs")]
    pub fill_timeout_secs: u64,
    #[serde(default = "default_monitor_poll_secs")]
    pub monitor_poll_secs: u64,
    /// Pause before re-reading a missing quote
    #[serde(default = "default_quote_retry_secs")]
    pub quote_retry_secs: u64,
    /// Favourable move, in R, that books half the position
    #[serde(default = "default_partial_book_r")]
    pub partial_book_r: Decimal,
    /// Favourable move, in R, that moves the stop to break-even
    #[serde(default = "default_trail_r")]
    pub trail_r: Decimal,
    #[serde(default = "default_product_type")]
    pub product_type: String,
}

impl LifecycleConfig {
    pub fn fill_poll(&self) -> Duration {
        Duration::from_secs(self.fill_poll_secs)
    }

    pub fn fill_timeout(&self) -> Duration {
        Duration::from_secs(self.fill_timeout_secs)
    }

    pub fn monitor_poll(&self) -> Duration {
        Duration::from_secs(self.monitor_poll_secs)
    }

    pub fn quote_retry(&self) -> Duration {
        Duration::from_secs(self.quote_retry_secs)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            fill_poll_secs: default_fill_poll_secs(),
            fill_timeout_secs: default_fill_timeout_secs(),
            monitor_poll_secs: default_monitor_poll_secs(),
            quote_retry_secs: default_quote_retry_secs(),
            partial_book_r: default_partial_book_r(),
            trail_r: default_trail_r(),
            product_type: default_product_type(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct QuoteConfig {
    /// Total attempts, including the first
    #[serde(default = "default_quote_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_quote_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl QuoteConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_quote_max_attempts(),
            retry_delay_ms: default_quote_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct WorkerConfig {
    #[serde(default = "default_max_concurrent_workers")]
    pub max_concurrent: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent_workers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub base_url: String,
    pub client_id: String,
    pub access_token: String,
    #[serde(default = "default_broker_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

/// One detection strategy: a daily build at `trigger_time`, then live polling
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    pub name: String,
    /// Heading used in operator notifications
    #[serde(default)]
    pub title: Option<String>,
    #[serde(deserialize_with = "deserialize_time_of_day")]
    pub trigger_time: NaiveTime,
    /// Pre-computed breakout ranges for the day
    pub ranges_file: PathBuf,
    /// Where to write the signals of each pass, if anywhere
    #[serde(default)]
    pub signals_file: Option<PathBuf>,
    /// Hand alerts straight to the order lifecycle manager
    #[serde(default)]
    pub auto_execute: bool,
}

impl StrategyConfig {
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }
}

/// Parse "HH:MM" or "HH:MM:SS"
pub fn parse_time_of_day(s: &str) -> anyhow::Result<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|e| anyhow::anyhow!("Invalid time of day '{}': {}", s, e))
}

fn deserialize_time_of_day<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_time_of_day(&s).map_err(serde::de::Error::custom)
}

fn default_log_level() -> String { "info".to_string() }
fn default_utc_offset_minutes() -> i32 { crate::clock::IST_OFFSET_MINUTES }
fn default_max_loss_per_trade() -> Decimal { Decimal::from(1000) }
fn default_trailing_step_fraction() -> Decimal { Decimal::new(5, 1) }
fn default_target_multiple() -> Decimal { Decimal::new(15, 1) }
fn default_scheduler_tick_secs() -> u64 { 20 }
fn default_tracker_interval_secs() -> u64 { 5 }
fn default_tracker_idle_secs() -> u64 { 5 }
fn default_fill_poll_secs() -> u64 { 30 }
fn default_fill_timeout_secs() -> u64 { 600 }
fn default_monitor_poll_secs() -> u64 { 30 }
fn default_quote_retry_secs() -> u64 { 1 }
fn default_partial_book_r() -> Decimal { Decimal::ONE }
fn default_trail_r() -> Decimal { Decimal::new(15, 1) }
fn default_product_type() -> String { "INTRADAY".to_string() }
fn default_quote_max_attempts() -> u32 { 2 }
fn default_quote_retry_delay_ms() -> u64 { 1000 }
fn default_max_concurrent_workers() -> usize { 4 }
fn default_broker_timeout_secs() -> u64 { 30 }
