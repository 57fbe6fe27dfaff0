//! Market-time clock
//!
//! All day-boundary and trigger-time decisions are taken in one fixed market
//! timezone, never in the process's local time.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use std::sync::Mutex;

/// Asia/Kolkata, which has no daylight saving
pub const IST_OFFSET_MINUTES: i32 = 330;

/// Source of "now" in market time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn time_of_day(&self) -> NaiveTime {
        self.now().time()
    }
}

/// Wall clock projected into the market timezone
#[derive(Debug, Clone)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }
}

/// Build a market offset from minutes east of UTC
pub fn market_offset(minutes: i32) -> anyhow::Result<FixedOffset> {
    FixedOffset::east_opt(minutes * 60)
        .ok_or_else(|| anyhow::anyhow!("Invalid market UTC offset: {} minutes", minutes))
}

/// Manually driven clock for tests and replays
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<FixedOffset>>,
}

impl ManualClock {
    pub fn new(start: DateTime<FixedOffset>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<FixedOffset>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
