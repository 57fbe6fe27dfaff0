//! In-memory broker and detector doubles for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use breakout_trader::broker::{FundApi, OrderApi, QuoteApi};
use breakout_trader::clock::{market_offset, ManualClock, IST_OFFSET_MINUTES};
use breakout_trader::error::{BrokerError, BrokerResult};
use breakout_trader::strategy::Detector;
use breakout_trader::types::{
    BracketExitStatus, BracketOrderRequest, Leg, LegChange, OrderStatus, Quote, Segment, Side,
    TradeCandidate,
};
use chrono::TimeZone;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio::sync::mpsc::UnboundedReceiver;

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str_exact(s).unwrap()
}

/// Pop the next scripted value, repeating the last one forever
fn next_scripted<T: Clone>(script: &Mutex<VecDeque<T>>, fallback: T) -> T {
    let mut script = script.lock().unwrap();
    if script.len() > 1 {
        script.pop_front().unwrap()
    } else {
        script.front().cloned().unwrap_or(fallback)
    }
}

/// Scripted broker implementing all three API contracts
#[derive(Default)]
pub struct MockBroker {
    pub order_statuses: Mutex<VecDeque<OrderStatus>>,
    pub exit_statuses: Mutex<VecDeque<BracketExitStatus>>,
    /// Shared price script for every instrument without a fixed price
    pub prices: Mutex<VecDeque<Decimal>>,
    pub fixed_prices: Mutex<HashMap<String, Decimal>>,
    pub balance: Mutex<Decimal>,

    pub placed: Mutex<Vec<BracketOrderRequest>>,
    pub modifies: Mutex<Vec<(Leg, LegChange)>>,
    pub cancels: Mutex<Vec<Leg>>,
    pub status_calls: AtomicUsize,
    pub quote_calls: AtomicUsize,
    /// Bracket-status ("exit") and quote ("quote") reads, in call order
    pub reads: Mutex<Vec<(&'static str, Instant)>>,

    pub reject_placement: Mutex<bool>,
    pub failing_modifies: AtomicUsize,
    pub failing_quotes: AtomicUsize,
    pub failing_exit_checks: AtomicUsize,
    pub failing_cancels: AtomicUsize,
    pub cancel_delay: Mutex<Option<Duration>>,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            balance: Mutex::new(dec("1000000")),
            ..Self::default()
        })
    }

    pub fn script_statuses(&self, statuses: &[OrderStatus]) {
        *self.order_statuses.lock().unwrap() = statuses.iter().copied().collect();
    }

    pub fn script_exits(&self, exits: &[BracketExitStatus]) {
        *self.exit_statuses.lock().unwrap() = exits.iter().copied().collect();
    }

    pub fn script_prices(&self, prices: &[&str]) {
        *self.prices.lock().unwrap() = prices.iter().map(|p| dec(p)).collect();
    }

    pub fn set_price(&self, instrument_id: &str, price: &str) {
        self.fixed_prices
            .lock()
            .unwrap()
            .insert(instrument_id.to_string(), dec(price));
    }

    pub fn modifies(&self) -> Vec<(Leg, LegChange)> {
        self.modifies.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> Vec<Leg> {
        self.cancels.lock().unwrap().clone()
    }

    pub fn placed(&self) -> Vec<BracketOrderRequest> {
        self.placed.lock().unwrap().clone()
    }

    pub fn read_log(&self) -> Vec<(&'static str, Instant)> {
        self.reads.lock().unwrap().clone()
    }
}

/// Decrement a failure budget; true while failures remain
fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl OrderApi for MockBroker {
    async fn place_bracket_order(&self, order: &BracketOrderRequest) -> BrokerResult<String> {
        if *self.reject_placement.lock().unwrap() {
            return Err(BrokerError::Rejected("insufficient margin".into()));
        }
        let mut placed = self.placed.lock().unwrap();
        placed.push(order.clone());
        Ok(format!("ORD-{}", placed.len()))
    }

    async fn modify_leg(&self, _order_id: &str, leg: Leg, change: &LegChange) -> BrokerResult<()> {
        self.modifies.lock().unwrap().push((leg, change.clone()));
        if take_failure(&self.failing_modifies) {
            return Err(BrokerError::Transient("modify timed out".into()));
        }
        Ok(())
    }

    async fn cancel_leg(&self, _order_id: &str, leg: Leg) -> BrokerResult<()> {
        let delay = *self.cancel_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.cancels.lock().unwrap().push(leg);
        if take_failure(&self.failing_cancels) {
            return Err(BrokerError::Transient("cancel timed out".into()));
        }
        Ok(())
    }

    async fn order_status(&self, _order_id: &str) -> BrokerResult<OrderStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(next_scripted(&self.order_statuses, OrderStatus::Pending))
    }

    async fn bracket_exit_status(&self, _order_id: &str) -> BrokerResult<BracketExitStatus> {
        self.reads.lock().unwrap().push(("exit", Instant::now()));
        if take_failure(&self.failing_exit_checks) {
            return Err(BrokerError::Transient("status endpoint down".into()));
        }
        Ok(next_scripted(&self.exit_statuses, BracketExitStatus::None))
    }
}

#[async_trait]
impl QuoteApi for MockBroker {
    async fn quotes(&self, ids: &[String], _segment: Segment) -> BrokerResult<HashMap<String, Quote>> {
        self.quote_calls.fetch_add(1, Ordering::SeqCst);
        self.reads.lock().unwrap().push(("quote", Instant::now()));
        if take_failure(&self.failing_quotes) {
            return Err(BrokerError::Transient("quote timeout".into()));
        }

        let fixed = self.fixed_prices.lock().unwrap().clone();
        let scripted = if ids.iter().any(|id| !fixed.contains_key(id)) {
            Some(next_scripted(&self.prices, Decimal::ZERO))
        } else {
            None
        };

        Ok(ids
            .iter()
            .filter_map(|id| {
                let price = fixed.get(id).copied().or(scripted)?;
                if price.is_zero() {
                    return None;
                }
                Some((
                    id.clone(),
                    Quote {
                        last_price: price,
                        day_low: price,
                        day_high: price,
                        net_change: Decimal::ZERO,
                    },
                ))
            })
            .collect())
    }
}

#[async_trait]
impl FundApi for MockBroker {
    async fn available_balance(&self) -> BrokerResult<Decimal> {
        Ok(*self.balance.lock().unwrap())
    }
}

/// Detector returning a fixed candidate list, optionally failing
#[derive(Default)]
pub struct MockDetector {
    pub candidates: Mutex<Vec<TradeCandidate>>,
    pub builds: AtomicUsize,
    pub scans: AtomicUsize,
    pub failing_builds: AtomicUsize,
    pub failing_scans: AtomicUsize,
}

impl MockDetector {
    pub fn new(candidates: Vec<TradeCandidate>) -> Arc<Self> {
        Arc::new(Self {
            candidates: Mutex::new(candidates),
            ..Self::default()
        })
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for MockDetector {
    async fn build(&self) -> anyhow::Result<usize> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failing_builds) {
            return Err(anyhow::anyhow!("mapping file unavailable"));
        }
        Ok(self.candidates.lock().unwrap().len())
    }

    async fn scan(&self) -> anyhow::Result<Vec<TradeCandidate>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failing_scans) {
            return Err(anyhow::anyhow!("quote packet empty"));
        }
        Ok(self.candidates.lock().unwrap().clone())
    }
}

pub fn candidate(id: &str, name: &str, side: Side, entry: &str, stop: &str, quantity: u64) -> TradeCandidate {
    TradeCandidate {
        instrument_id: id.to_string(),
        name: name.to_string(),
        side,
        price: dec(entry),
        entry: dec(entry),
        stop: dec(stop),
        target: None,
        quantity,
        expected_loss: Decimal::from(quantity) * (dec(entry) - dec(stop)).abs(),
        exposure: Decimal::from(quantity) * dec(entry),
    }
}

/// Market clock at the given IST date and time
pub fn ist_clock(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> Arc<ManualClock> {
    let ist = market_offset(IST_OFFSET_MINUTES).unwrap();
    Arc::new(ManualClock::new(ist.with_ymd_and_hms(y, m, d, hh, mm, 0).unwrap()))
}

/// Everything queued on a notification channel so far
pub fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(text) = rx.try_recv() {
        out.push(text);
    }
    out
}
