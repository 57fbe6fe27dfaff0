//! End-to-end wiring: config → scheduler → tracker → notifications

mod common;

use async_trait::async_trait;
use breakout_trader::config::{AppConfig, StrategyConfig};
use breakout_trader::engine::{BrokerServices, Engine};
use breakout_trader::notify::Notifier;
use breakout_trader::types::{BracketExitStatus, Leg, OrderStatus};
use chrono::NaiveTime;
use common::{ist_clock, MockBroker};
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct RecordingNotifier(Mutex<Vec<String>>);

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> anyhow::Result<()> {
        self.0.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

fn config(ranges_file: std::path::PathBuf, auto_execute: bool) -> AppConfig {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(
        file,
        r#"
[broker]
base_url = "http://localhost:9"
client_id = "client"
access_token = "token"
"#
    )
    .unwrap();
    let path = file.path().to_string_lossy().to_string();
    let mut config = AppConfig::load(Some(&path)).unwrap();
    config.strategies.push(StrategyConfig {
        name: "opposite_15m".to_string(),
        title: Some("15-Min Opposite Breakout".to_string()),
        trigger_time: NaiveTime::from_hms_opt(9, 46, 0).unwrap(),
        ranges_file,
        signals_file: None,
        auto_execute,
    });
    config
}

fn ranges() -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(
        br#"[{ "instrument_id": "1333", "name": "HDFCBANK", "range_high": 1650,
               "range_low": 1620, "long_stop": 1635, "short_stop": 1640 }]"#,
    )
    .unwrap();
    file
}

#[tokio::test(start_paused = true)]
async fn test_engine_scans_alerts_and_stops() {
    let broker = MockBroker::new();
    broker.set_price("1333", "1655");
    let file = ranges();
    let notifier = Arc::new(RecordingNotifier::default());

    let engine = Engine::start(
        &config(file.path().to_path_buf(), false),
        BrokerServices {
            orders: broker.clone(),
            quotes: broker.clone(),
            funds: broker.clone(),
        },
        notifier.clone(),
        ist_clock(2024, 3, 1, 9, 47),
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(engine.strategies().len(), 1);
    assert!(engine.strategies()[0].run_state.is_enabled());
    engine.stop().await;

    let sent = notifier.0.lock().unwrap().clone();
    assert_eq!(sent.len(), 2, "{:?}", sent);
    assert!(sent[0].contains("scan complete"));
    assert!(sent[1].contains("HDFCBANK"));
    assert!(broker.placed().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_engine_auto_executes_alerts() {
    let broker = MockBroker::new();
    broker.set_price("1333", "1655");
    broker.script_statuses(&[OrderStatus::Traded]);
    broker.script_exits(&[BracketExitStatus::StopHit]);
    let file = ranges();
    let notifier = Arc::new(RecordingNotifier::default());

    let engine = Engine::start(
        &config(file.path().to_path_buf(), true),
        BrokerServices {
            orders: broker.clone(),
            quotes: broker.clone(),
            funds: broker.clone(),
        },
        notifier.clone(),
        ist_clock(2024, 3, 1, 9, 47),
    );

    tokio::time::sleep(Duration::from_secs(120)).await;
    engine.stop().await;

    let placed = broker.placed();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].tag, "HDFCBANK_AUTO");
    let sent = notifier.0.lock().unwrap().clone();
    assert!(sent.iter().any(|s| s.contains("STOP LOSS HIT")), "{:?}", sent);
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_pending_entry_cancel() {
    let broker = MockBroker::new();
    broker.set_price("1333", "1655");
    broker.script_statuses(&[OrderStatus::Pending]);
    *broker.cancel_delay.lock().unwrap() = Some(Duration::from_secs(10));
    let file = ranges();
    let notifier = Arc::new(RecordingNotifier::default());

    let engine = Engine::start(
        &config(file.path().to_path_buf(), true),
        BrokerServices {
            orders: broker.clone(),
            quotes: broker.clone(),
            funds: broker.clone(),
        },
        notifier.clone(),
        ist_clock(2024, 3, 1, 9, 47),
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(broker.placed().len(), 1);
    engine.stop().await;

    assert_eq!(broker.cancels(), vec![Leg::Entry]);
    let sent = notifier.0.lock().unwrap().clone();
    assert!(sent.iter().any(|s| s.contains("Monitoring stopped")), "{:?}", sent);
}
