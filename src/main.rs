//! Breakout Trader - intraday breakout alerts and bracket-order automation
//!
//! 1. Loads configuration (file + `TRADER__*` environment)
//! 2. Runs each strategy's daily scan at its trigger time
//! 3. Tracks breakouts and alerts the operator once per signal per day
//! 4. Optionally places and manages a bracket order per alert

use std::sync::Arc;
use tracing::info;

use breakout_trader::clock::market_offset;
use breakout_trader::notify::notifier_from_config;
use breakout_trader::{AppConfig, BrokerClient, BrokerServices, Engine, SystemClock};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("TRADER_CONFIG").ok();
    let config = AppConfig::load(config_path.as_deref())?;

    let level = config
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    info!("Starting Breakout Trader...");
    info!(
        "Broker: {}, strategies: {}, market offset: {} min",
        config.broker.base_url,
        config.strategies.len(),
        config.market.utc_offset_minutes
    );

    let clock = Arc::new(SystemClock::new(market_offset(config.market.utc_offset_minutes)?));
    let broker = Arc::new(BrokerClient::new(&config.broker)?);
    let notifier = notifier_from_config(&config.telegram)?;

    let engine = Engine::start(&config, BrokerServices::from_client(broker), notifier, clock);

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");
    engine.stop().await;

    Ok(())
}
