//! Core types shared by the detection and execution halves of the engine

use chrono::{DateTime, FixedOffset};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Trade direction, serialised with the broker's transaction spelling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "BUY", alias = "LONG")]
    Long,
    #[serde(rename = "SELL", alias = "SHORT")]
    Short,
}

impl Side {
    /// Transaction type as the broker spells it
    pub fn as_transaction(&self) -> &'static str {
        match self {
            Side::Long => "BUY",
            Side::Short => "SELL",
        }
    }

    /// Signed distance `price` has travelled in this side's favour
    pub fn favorable_move(&self, entry: Decimal, price: Decimal) -> Decimal {
        match self {
            Side::Long => price - entry,
            Side::Short => entry - price,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_transaction())
    }
}

/// Exchange segment a quote request is scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Segment {
    #[default]
    #[serde(rename = "NSE_EQ")]
    NseEq,
    #[serde(rename = "BSE_EQ")]
    BseEq,
    #[serde(rename = "NSE_FNO")]
    NseFno,
}

impl Segment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::NseEq => "NSE_EQ",
            Segment::BseEq => "BSE_EQ",
            Segment::NseFno => "NSE_FNO",
        }
    }

    /// Exchange name used on order placement
    pub fn exchange(&self) -> &'static str {
        match self {
            Segment::NseEq | Segment::NseFno => "NSE",
            Segment::BseEq => "BSE",
        }
    }
}

/// Live quote snapshot for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub last_price: Decimal,
    pub day_low: Decimal,
    pub day_high: Decimal,
    pub net_change: Decimal,
}

/// A sized trade proposal produced by a detector.
///
/// Immutable once handed to the order lifecycle manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeCandidate {
    pub instrument_id: String,
    pub name: String,
    pub side: Side,
    /// Last traded price when the signal fired
    pub price: Decimal,
    pub entry: Decimal,
    pub stop: Decimal,
    /// Defaults to `entry ± target_multiple × R` when absent
    pub target: Option<Decimal>,
    pub quantity: u64,
    pub expected_loss: Decimal,
    pub exposure: Decimal,
}

impl TradeCandidate {
    /// Risk distance (R)
    pub fn risk(&self) -> Decimal {
        (self.entry - self.stop).abs()
    }

    pub fn alert_key(&self) -> AlertKey {
        AlertKey {
            instrument_id: self.instrument_id.clone(),
            signal: self.side,
        }
    }

    pub fn to_record(&self) -> SignalRecord {
        SignalRecord::from(self)
    }
}

/// De-duplication identity for a detected signal, scoped to one trading day
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlertKey {
    pub instrument_id: String,
    pub signal: Side,
}

/// Exchanged signal row.
///
/// Column names are a stable contract with downstream consumers; currency
/// fields are rounded to 2 decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    #[serde(rename = "Stock Name")]
    pub stock_name: String,
    #[serde(rename = "Security ID")]
    pub instrument_id: String,
    #[serde(rename = "Signal")]
    pub signal: Side,
    #[serde(rename = "Price")]
    pub price: Decimal,
    #[serde(rename = "Entry")]
    pub entry: Decimal,
    #[serde(rename = "SL")]
    pub stop: Decimal,
    #[serde(rename = "Quantity")]
    pub quantity: u64,
    #[serde(rename = "Expected Loss")]
    pub expected_loss: Decimal,
    #[serde(rename = "Exposure")]
    pub exposure: Decimal,
}

impl From<&TradeCandidate> for SignalRecord {
    fn from(c: &TradeCandidate) -> Self {
        Self {
            stock_name: c.name.clone(),
            instrument_id: c.instrument_id.clone(),
            signal: c.side,
            price: round2(c.price),
            entry: round2(c.entry),
            stop: round2(c.stop),
            quantity: c.quantity,
            expected_loss: round2(c.expected_loss),
            exposure: round2(c.exposure),
        }
    }
}

/// Round a currency amount to 2 decimals, half away from zero
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Bracket order leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Leg {
    #[serde(rename = "ENTRY_LEG")]
    Entry,
    #[serde(rename = "STOP_LOSS_LEG")]
    StopLoss,
    #[serde(rename = "TARGET_LEG")]
    Target,
}

impl Leg {
    pub fn as_str(&self) -> &'static str {
        match self {
            Leg::Entry => "ENTRY_LEG",
            Leg::StopLoss => "STOP_LOSS_LEG",
            Leg::Target => "TARGET_LEG",
        }
    }
}

/// Fields to change on a leg; `None` leaves the broker's value untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegChange {
    pub quantity: Option<u64>,
    pub price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub target_price: Option<Decimal>,
    pub trailing_step: Option<Decimal>,
}

/// Everything needed to submit a bracket order
#[derive(Debug, Clone, PartialEq)]
pub struct BracketOrderRequest {
    pub instrument_id: String,
    pub segment: Segment,
    pub side: Side,
    pub quantity: u64,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    pub target_price: Decimal,
    pub trailing_step: Decimal,
    pub product_type: String,
    pub tag: String,
}

/// Entry-leg status reported by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Traded,
    Rejected,
    Cancelled,
}

/// Terminal condition of an open bracket, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BracketExitStatus {
    None,
    StopHit,
    TargetHit,
    ParentCancelled,
    ParentRejected,
    ManualExit,
}

impl BracketExitStatus {
    pub fn exit_reason(&self) -> Option<ExitReason> {
        match self {
            BracketExitStatus::None => None,
            BracketExitStatus::StopHit => Some(ExitReason::StopHit),
            BracketExitStatus::TargetHit => Some(ExitReason::TargetHit),
            BracketExitStatus::ParentCancelled => Some(ExitReason::ParentCancelled),
            BracketExitStatus::ParentRejected => Some(ExitReason::ParentRejected),
            BracketExitStatus::ManualExit => Some(ExitReason::ManualExit),
        }
    }
}

/// Why a tracked order left the monitoring loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    StopHit,
    TargetHit,
    ParentCancelled,
    ParentRejected,
    ManualExit,
    TimeoutCancelled,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitReason::StopHit => "STOP_HIT",
            ExitReason::TargetHit => "TARGET_HIT",
            ExitReason::ParentCancelled => "PARENT_CANCELLED",
            ExitReason::ParentRejected => "PARENT_REJECTED",
            ExitReason::ManualExit => "MANUAL_EXIT",
            ExitReason::TimeoutCancelled => "TIMEOUT_CANCELLED",
        };
        f.write_str(s)
    }
}

/// Order lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Submitted,
    Filled,
    Monitoring,
    Rejected,
    Cancelled,
    Exited(ExitReason),
    /// Monitoring stopped by shutdown; remaining legs stay with the broker
    Stopped,
}

impl LifecyclePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecyclePhase::Rejected
                | LifecyclePhase::Cancelled
                | LifecyclePhase::Exited(_)
                | LifecyclePhase::Stopped
        )
    }
}

/// Available funds at a point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FundSnapshot {
    pub balance: Decimal,
    pub fetched_at: DateTime<FixedOffset>,
}
