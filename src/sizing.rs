//! Risk-based position sizing and the shared fund snapshot

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::broker::FundApi;
use crate::clock::Clock;
use crate::config::RiskParameters;
use crate::error::BrokerResult;
use crate::types::{round2, FundSnapshot, Side};

/// Outcome of a sizing decision; quantity 0 means "no trade"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionSize {
    pub quantity: u64,
    pub expected_loss: Decimal,
    pub exposure: Decimal,
}

impl PositionSize {
    pub const NONE: PositionSize = PositionSize {
        quantity: 0,
        expected_loss: Decimal::ZERO,
        exposure: Decimal::ZERO,
    };
}

/// Size a position so a stop-out never loses more than `max_loss`.
///
/// Quantity is the smaller of the risk-bounded and the fund-bounded counts,
/// each floored. A zero stop distance or a non-positive price yields no trade.
pub fn size_position(
    max_loss: Decimal,
    price: Decimal,
    entry: Decimal,
    stop: Decimal,
    fund_balance: Decimal,
    leverage: Decimal,
) -> PositionSize {
    let stop_distance = (entry - stop).abs();
    if stop_distance.is_zero() || price <= Decimal::ZERO || max_loss <= Decimal::ZERO {
        return PositionSize::NONE;
    }

    let qty_by_risk = floor_to_u64(max_loss / stop_distance);
    let buying_power = (fund_balance * leverage).max(Decimal::ZERO);
    let qty_by_fund = floor_to_u64(buying_power / price);
    let quantity = qty_by_risk.min(qty_by_fund);

    let qty = Decimal::from(quantity);
    PositionSize {
        quantity,
        expected_loss: qty * stop_distance,
        exposure: qty * price,
    }
}

fn floor_to_u64(value: Decimal) -> u64 {
    value.floor().to_u64().unwrap_or(0)
}

/// Sizer bound to the configured risk budget and leverage table
#[derive(Debug, Clone)]
pub struct RiskSizer {
    params: RiskParameters,
    /// Instruments already reported as sized at 1x
    unleveraged: Arc<std::sync::Mutex<HashSet<String>>>,
}

impl RiskSizer {
    pub fn new(params: RiskParameters) -> Self {
        Self {
            params,
            unleveraged: Arc::default(),
        }
    }

    pub fn params(&self) -> &RiskParameters {
        &self.params
    }

    /// Configured leverage, or 1x when the instrument has none. The
    /// fallback is warned about once per instrument.
    pub fn leverage_for(&self, instrument_id: &str) -> Decimal {
        match self.params.leverage.get(instrument_id) {
            Some(leverage) => *leverage,
            None => {
                if self.first_fallback(instrument_id) {
                    warn!(
                        instrument = %instrument_id,
                        "No leverage configured, sizing at 1x"
                    );
                } else {
                    debug!(instrument = %instrument_id, "Sizing at 1x");
                }
                Decimal::ONE
            }
        }
    }

    fn first_fallback(&self, instrument_id: &str) -> bool {
        let mut seen = match self.unleveraged.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if seen.contains(instrument_id) {
            return false;
        }
        seen.insert(instrument_id.to_string())
    }

    pub fn size(
        &self,
        price: Decimal,
        entry: Decimal,
        stop: Decimal,
        instrument_id: &str,
        fund: &FundSnapshot,
    ) -> PositionSize {
        let leverage = self.leverage_for(instrument_id);
        let size = size_position(
            self.params.max_loss_per_trade,
            price,
            entry,
            stop,
            fund.balance,
            leverage,
        );
        debug!(
            instrument = %instrument_id,
            quantity = size.quantity,
            "Sized at price {} entry {} stop {} (fund {}, {}x)",
            price, entry, stop, fund.balance, leverage
        );
        size
    }

    /// Target at `entry ± target_multiple × R`, rounded to 2dp
    pub fn default_target(&self, side: Side, entry: Decimal, stop: Decimal) -> Decimal {
        let offset = (entry - stop).abs() * self.params.target_multiple;
        match side {
            Side::Long => round2(entry + offset),
            Side::Short => round2(entry - offset),
        }
    }

    /// Broker trailing step as a fraction of R, rounded to 2dp
    pub fn trailing_step(&self, entry: Decimal, stop: Decimal) -> Decimal {
        round2((entry - stop).abs() * self.params.trailing_step_fraction)
    }
}

/// Process-wide fund snapshot.
///
/// Refreshed at the start of every sizing cycle; the lock fences a refresh
/// against concurrent readers so two decisions never see a torn update.
pub struct FundCache {
    api: Arc<dyn FundApi>,
    clock: Arc<dyn Clock>,
    snapshot: Mutex<Option<FundSnapshot>>,
}

impl FundCache {
    pub fn new(api: Arc<dyn FundApi>, clock: Arc<dyn Clock>) -> Self {
        Self {
            api,
            clock,
            snapshot: Mutex::new(None),
        }
    }

    /// Invalidate and refetch; the old snapshot is kept if the fetch fails
    pub async fn refresh(&self) -> BrokerResult<FundSnapshot> {
        let mut guard = self.snapshot.lock().await;
        let balance = self.api.available_balance().await?;
        let snapshot = FundSnapshot {
            balance: balance.max(Decimal::ZERO),
            fetched_at: self.clock.now(),
        };
        info!("Available funds: {}", snapshot.balance);
        *guard = Some(snapshot);
        Ok(snapshot)
    }

    pub async fn current(&self) -> Option<FundSnapshot> {
        *self.snapshot.lock().await
    }
}
