//! Order lifecycle manager
//!
//! Drives one bracket order from submission through fill-wait and
//! monitoring to a terminal phase. Every tick of the monitoring loop checks
//! the broker-reported bracket status before looking at price, so a
//! terminal condition always wins over a partial-book or trailing signal.

use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::OrderApi;
use crate::clock::Clock;
use crate::config::LifecycleConfig;
use crate::error::OrderError;
use crate::gateway::QuoteGateway;
use crate::notify::{format_order_outcome, format_placement_failed, NotificationSink};
use crate::shutdown::{Shutdown, ShutdownSignal};
use crate::sizing::RiskSizer;
use crate::types::{
    BracketOrderRequest, ExitReason, Leg, LegChange, LifecyclePhase, OrderStatus, Segment, Side,
    TradeCandidate,
};

/// Tracked state of one in-flight order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderState {
    pub id: Uuid,
    pub order_id: String,
    pub instrument_id: String,
    pub name: String,
    pub side: Side,
    pub entry: Decimal,
    /// Current stop; moves to `entry` once trailing is armed
    pub stop: Decimal,
    pub target: Decimal,
    /// Original risk distance (R)
    pub risk: Decimal,
    pub quantity: u64,
    pub remaining: u64,
    pub partial_booked: bool,
    pub trailing_armed: bool,
    pub phase: LifecyclePhase,
    pub created_at: DateTime<FixedOffset>,
}

impl OrderState {
    fn new(
        order_id: String,
        candidate: &TradeCandidate,
        target: Decimal,
        created_at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            instrument_id: candidate.instrument_id.clone(),
            name: candidate.name.clone(),
            side: candidate.side,
            entry: candidate.entry,
            stop: candidate.stop,
            target,
            risk: candidate.risk(),
            quantity: candidate.quantity,
            remaining: candidate.quantity,
            partial_booked: false,
            trailing_armed: false,
            phase: LifecyclePhase::Submitted,
            created_at,
        }
    }

    /// Favourable move from entry, in multiples of R
    pub fn r_multiple(&self, price: Decimal) -> Decimal {
        if self.risk.is_zero() {
            return Decimal::ZERO;
        }
        self.side.favorable_move(self.entry, price) / self.risk
    }
}

/// Shared machinery for running orders; each [`execute`] call owns its own
/// [`OrderState`].
///
/// [`execute`]: OrderLifecycleManager::execute
#[derive(Clone)]
pub struct OrderLifecycleManager {
    orders: Arc<dyn OrderApi>,
    quotes: QuoteGateway,
    sizer: RiskSizer,
    notifications: NotificationSink,
    config: LifecycleConfig,
    segment: Segment,
    clock: Arc<dyn Clock>,
}

impl OrderLifecycleManager {
    pub fn new(
        orders: Arc<dyn OrderApi>,
        quotes: QuoteGateway,
        sizer: RiskSizer,
        notifications: NotificationSink,
        config: LifecycleConfig,
        segment: Segment,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orders,
            quotes,
            sizer,
            notifications,
            config,
            segment,
            clock,
        }
    }

    /// Bracket request with the limit at `limit_price` and the candidate's
    /// entry/stop driving target and trailing step
    pub fn bracket_request(&self, candidate: &TradeCandidate, limit_price: Decimal) -> BracketOrderRequest {
        let target = self.target_for(candidate);
        BracketOrderRequest {
            instrument_id: candidate.instrument_id.clone(),
            segment: self.segment,
            side: candidate.side,
            quantity: candidate.quantity,
            entry_price: limit_price,
            stop_price: candidate.stop,
            target_price: target,
            trailing_step: self.sizer.trailing_step(candidate.entry, candidate.stop),
            product_type: self.config.product_type.clone(),
            tag: format!("{}_AUTO", candidate.name),
        }
    }

    fn target_for(&self, candidate: &TradeCandidate) -> Decimal {
        match candidate.target {
            Some(target) if target > Decimal::ZERO => target,
            _ => self
                .sizer
                .default_target(candidate.side, candidate.entry, candidate.stop),
        }
    }

    /// Run one order to a terminal phase.
    ///
    /// Fails only when the order never reached the broker; that outcome is
    /// notified once and not retried.
    pub async fn execute(
        &self,
        candidate: TradeCandidate,
        mut shutdown: ShutdownSignal,
    ) -> Result<OrderState, OrderError> {
        let order_id = match self.place(&candidate).await {
            Ok(order_id) => order_id,
            Err(e) => {
                error!(instrument = %candidate.instrument_id, "Order placement failed: {}", e);
                self.notifications
                    .notify(format_placement_failed(&candidate, &e.to_string()));
                return Err(e);
            }
        };

        let target = self.target_for(&candidate);
        let mut state = OrderState::new(order_id, &candidate, target, self.clock.now());
        info!(
            lifecycle_id = %state.id,
            order_id = %state.order_id,
            "Tracking {} {} x{} | entry {} stop {} target {}",
            state.side, state.name, state.quantity, state.entry, state.stop, state.target
        );

        self.await_fill(&mut state, &mut shutdown).await;

        if state.phase == LifecyclePhase::Filled {
            state.phase = LifecyclePhase::Monitoring;
            self.monitor(&mut state, &mut shutdown).await;
        }

        info!(
            lifecycle_id = %state.id,
            order_id = %state.order_id,
            "Lifecycle finished: {:?} | {}",
            state.phase, state.name
        );
        if let Some(text) = format_order_outcome(&state.name, &state.order_id, state.phase) {
            self.notifications.notify(text);
        }
        Ok(state)
    }

    async fn place(&self, candidate: &TradeCandidate) -> Result<String, OrderError> {
        let limit_price = self
            .quotes
            .last_price(&candidate.instrument_id, self.segment)
            .await?;
        let request = self.bracket_request(candidate, limit_price);
        self.orders
            .place_bracket_order(&request)
            .await
            .map_err(OrderError::Placement)
    }

    /// Poll the entry leg until it fills, dies, or the timeout elapses
    async fn await_fill(&self, state: &mut OrderState, shutdown: &mut ShutdownSignal) {
        let deadline = Instant::now() + self.config.fill_timeout();

        loop {
            match self.orders.order_status(&state.order_id).await {
                Ok(OrderStatus::Traded) => {
                    info!(order_id = %state.order_id, "Order TRADED | {}", state.name);
                    state.phase = LifecyclePhase::Filled;
                    return;
                }
                Ok(OrderStatus::Rejected) => {
                    warn!(order_id = %state.order_id, "Order REJECTED | {}", state.name);
                    state.phase = LifecyclePhase::Rejected;
                    return;
                }
                Ok(OrderStatus::Cancelled) => {
                    warn!(order_id = %state.order_id, "Order CANCELLED | {}", state.name);
                    state.phase = LifecyclePhase::Cancelled;
                    return;
                }
                Ok(OrderStatus::Pending) => {
                    debug!(order_id = %state.order_id, "Order pending | {}", state.name);
                }
                Err(e) => {
                    warn!(order_id = %state.order_id, "Order status check failed: {}", e);
                }
            }

            if Instant::now() >= deadline {
                warn!(
                    order_id = %state.order_id,
                    "Not filled within {:?}, cancelling entry | {}",
                    self.config.fill_timeout(), state.name
                );
                self.cancel_entry(state).await;
                state.phase = LifecyclePhase::Exited(ExitReason::TimeoutCancelled);
                return;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.fill_poll()) => {}
                _ = shutdown.recv() => {
                    info!(order_id = %state.order_id, "Shutdown during fill-wait, cancelling entry");
                    self.cancel_entry(state).await;
                    state.phase = LifecyclePhase::Stopped;
                    return;
                }
            }
        }
    }

    /// Failure is logged only; the caller moves to a terminal phase regardless
    async fn cancel_entry(&self, state: &OrderState) {
        if let Err(e) = self.orders.cancel_leg(&state.order_id, Leg::Entry).await {
            error!(order_id = %state.order_id, "Failed to cancel entry leg: {}", e);
        }
    }

    async fn monitor(&self, state: &mut OrderState, shutdown: &mut ShutdownSignal) {
        info!(order_id = %state.order_id, "Monitoring {}", state.name);

        loop {
            if shutdown.is_triggered() {
                state.phase = LifecyclePhase::Stopped;
                return;
            }

            match self.orders.bracket_exit_status(&state.order_id).await {
                Ok(status) => {
                    if let Some(reason) = status.exit_reason() {
                        info!(order_id = %state.order_id, "Bracket exited: {} | {}", reason, state.name);
                        state.phase = LifecyclePhase::Exited(reason);
                        return;
                    }
                }
                Err(e) => {
                    warn!(order_id = %state.order_id, "Bracket status unavailable, skipping tick: {}", e);
                    if !self.pause(self.config.monitor_poll(), shutdown).await {
                        state.phase = LifecyclePhase::Stopped;
                        return;
                    }
                    continue;
                }
            }

            let price = match self.quotes.last_price(&state.instrument_id, self.segment).await {
                Ok(price) => price,
                Err(e) => {
                    debug!(order_id = %state.order_id, "No price this tick: {}", e);
                    if !self.pause(self.config.quote_retry(), shutdown).await {
                        state.phase = LifecyclePhase::Stopped;
                        return;
                    }
                    continue;
                }
            };

            debug!(order_id = %state.order_id, "LTP {} ({}R) | {}", price, state.r_multiple(price), state.name);
            self.apply_triggers(state, price).await;

            if !self.pause(self.config.monitor_poll(), shutdown).await {
                state.phase = LifecyclePhase::Stopped;
                return;
            }
        }
    }

    /// Sleep unless shutdown arrives first; false means stop
    async fn pause(&self, duration: Duration, shutdown: &mut ShutdownSignal) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = shutdown.recv() => false,
        }
    }

    /// Partial-book and trailing triggers; each fires at most once
    async fn apply_triggers(&self, state: &mut OrderState, price: Decimal) {
        if state.risk.is_zero() {
            return;
        }
        let moved = state.side.favorable_move(state.entry, price);

        if !state.partial_booked && moved >= state.risk * self.config.partial_book_r {
            self.book_partial(state).await;
        }
        if !state.trailing_armed && moved >= state.risk * self.config.trail_r {
            self.trail_to_entry(state).await;
        }
    }

    async fn book_partial(&self, state: &mut OrderState) {
        let book = state.remaining / 2;
        if book == 0 {
            info!(order_id = %state.order_id, "Nothing to book partially on qty {}", state.remaining);
            state.partial_booked = true;
            return;
        }

        let keep = state.remaining - book;
        let change = LegChange {
            quantity: Some(keep),
            ..LegChange::default()
        };
        match self.orders.modify_leg(&state.order_id, Leg::Entry, &change).await {
            Ok(()) => {
                info!(
                    order_id = %state.order_id,
                    "Partial booking at {}R: booked {}, {} left | {}",
                    self.config.partial_book_r, book, keep, state.name
                );
                state.remaining = keep;
                state.partial_booked = true;
            }
            Err(e) => {
                warn!(order_id = %state.order_id, "Partial booking failed, retrying next tick: {}", e);
            }
        }
    }

    async fn trail_to_entry(&self, state: &mut OrderState) {
        let change = LegChange {
            stop_price: Some(state.entry),
            trailing_step: Some(Decimal::ZERO),
            ..LegChange::default()
        };
        match self.orders.modify_leg(&state.order_id, Leg::StopLoss, &change).await {
            Ok(()) => {
                info!(
                    order_id = %state.order_id,
                    "{}R reached, stop trailed {} -> {} | {}",
                    self.config.trail_r, state.stop, state.entry, state.name
                );
                state.stop = state.entry;
                state.trailing_armed = true;
            }
            Err(e) => {
                warn!(order_id = %state.order_id, "Stop trail failed, retrying next tick: {}", e);
            }
        }
    }
}

/// Spawns one independent lifecycle task per accepted candidate and keeps
/// hold of every task still running, so shutdown can wait for them.
#[derive(Clone)]
pub struct OrderLauncher {
    manager: OrderLifecycleManager,
    shutdown: Shutdown,
    in_flight: Arc<std::sync::Mutex<Vec<JoinHandle<Option<OrderState>>>>>,
}

impl OrderLauncher {
    pub fn new(manager: OrderLifecycleManager, shutdown: Shutdown) -> Self {
        Self {
            manager,
            shutdown,
            in_flight: Arc::default(),
        }
    }

    pub fn launch(&self, candidate: TradeCandidate) {
        let manager = self.manager.clone();
        let signal = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let name = candidate.name.clone();
            match manager.execute(candidate, signal).await {
                Ok(state) => Some(state),
                Err(e) => {
                    error!("Order lifecycle aborted for {}: {}", name, e);
                    None
                }
            }
        });

        let mut in_flight = self.lock_in_flight();
        in_flight.retain(|task| !task.is_finished());
        in_flight.push(handle);
    }

    /// Orders launched and not yet terminal
    pub fn in_flight(&self) -> usize {
        self.lock_in_flight()
            .iter()
            .filter(|task| !task.is_finished())
            .count()
    }

    /// Wait for every launched order to reach a terminal phase. Returns the
    /// final states of the orders still tracked that reached the broker;
    /// tasks already reaped by `launch` are not included.
    pub async fn wait_all(&self) -> Vec<OrderState> {
        let tasks = std::mem::take(&mut *self.lock_in_flight());
        let mut states = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(Some(state)) => states.push(state),
                Ok(None) => {}
                Err(e) => warn!("Order task ended abnormally: {}", e),
            }
        }
        states
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<Option<OrderState>>>> {
        match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str_exact(s).unwrap()
    }

    fn state(side: Side, entry: &str, stop: &str) -> OrderState {
        let candidate = TradeCandidate {
            instrument_id: "2885".to_string(),
            name: "RELIANCE".to_string(),
            side,
            price: dec(entry),
            entry: dec(entry),
            stop: dec(stop),
            target: None,
            quantity: 10,
            expected_loss: Decimal::ZERO,
            exposure: Decimal::ZERO,
        };
        let ist = crate::clock::market_offset(330).unwrap();
        OrderState::new(
            "ORD-1".to_string(),
            &candidate,
            dec("103"),
            ist.with_ymd_and_hms(2024, 3, 1, 9, 50, 0).unwrap(),
        )
    }

    #[test]
    fn test_r_multiple() {
        let long = state(Side::Long, "100", "98");
        assert_eq!(long.risk, dec("2"));
        assert_eq!(long.r_multiple(dec("103")), dec("1.5"));
        assert_eq!(long.r_multiple(dec("99")), dec("-0.5"));

        let short = state(Side::Short, "100", "102");
        assert_eq!(short.r_multiple(dec("98")), dec("1"));
        assert_eq!(short.phase, LifecyclePhase::Submitted);
        assert_eq!(short.remaining, 10);
    }
}
