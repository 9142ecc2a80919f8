use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::journal::{TradeJournal, TradeStatistics};
use super::position::{
    apply_slippage, format_holding, Position, PositionSignal, PositionSummary, TradeSummary,
};
use super::price_feed::PriceOracle;
use crate::error::EngineError;
use crate::models::{ExitReason, Side, TradeAction, TradeRecord};

/// Fixed accounting constants shared by the entry and exit paths
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub initial_balance: f64,
    pub fee_rate: f64,
    pub slippage_rate: f64,
    pub capital_utilization: f64, // fraction of balance committed per entry
    pub min_balance: f64,
    pub trailing_stop_ratio: f64,
    pub partial_take_profit_ratio: f64,
    pub partial_take_profit_threshold_pct: f64,
    pub liquidation_floor_ratio: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            fee_rate: 0.0004,
            slippage_rate: 0.001,
            capital_utilization: 0.95,
            min_balance: 100.0,
            trailing_stop_ratio: 0.02,
            partial_take_profit_ratio: 0.5,
            partial_take_profit_threshold_pct: 10.0,
            liquidation_floor_ratio: 0.05,
        }
    }
}

/// Request to open a position
#[derive(Debug, Clone, PartialEq)]
pub struct EntryOrder {
    pub instrument: String,
    pub side: Side,
    pub price: f64, // requested, before slippage
    pub leverage: f64,
    pub target_price: Option<f64>,
    pub stop_price: Option<f64>,
}

impl EntryOrder {
    pub fn new(instrument: impl Into<String>, side: Side, price: f64, leverage: f64) -> Self {
        Self {
            instrument: instrument.into(),
            side,
            price,
            leverage,
            target_price: None,
            stop_price: None,
        }
    }

    pub fn with_target(mut self, target_price: f64) -> Self {
        self.target_price = Some(target_price);
        self
    }

    pub fn with_stop(mut self, stop_price: f64) -> Self {
        self.stop_price = Some(stop_price);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    Opened,
    Flipped,  // same instrument, opposite side
    Switched, // different instrument
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryOutcome {
    pub kind: EntryKind,
    pub closed: Option<TradeSummary>,
    pub position: Position,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PortfolioStatus {
    pub initial_balance: f64,
    pub balance: f64,
    pub total_value: f64,
    pub position: Option<PositionSummary>,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_pct: f64,
    pub total_return_pct: f64,
    pub statistics: TradeStatistics,
    pub timestamp: DateTime<Utc>,
}

fn validate_price(label: &str, price: f64) -> Result<(), EngineError> {
    if price.is_finite() && price > 0.0 {
        Ok(())
    } else {
        Err(EngineError::invalid(format!(
            "{} must be positive and finite, got {}",
            label, price
        )))
    }
}

/// Cash balance plus at most one open position
///
/// Sole authority over money: every mutation either completes fully or
/// returns an error with balance, position and journal untouched.
pub struct PositionLedger {
    config: LedgerConfig,
    balance: f64,
    position: Option<Position>,
    journal: TradeJournal,
}

impl PositionLedger {
    pub fn new(config: LedgerConfig) -> Self {
        Self {
            balance: config.initial_balance,
            config,
            position: None,
            journal: TradeJournal::new(),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn balance(&self) -> f64 {
        self.balance
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn journal(&self) -> &TradeJournal {
        &self.journal
    }

    /// Open a position; an existing one is closed first at the requested price
    pub fn enter_position(&mut self, order: &EntryOrder) -> Result<EntryOutcome, EngineError> {
        self.enter_position_closing_at(order, order.price)
    }

    /// Open a position, closing a position on another instrument at `switch_close_price`
    ///
    /// A flip (same instrument, opposite side) always closes at the order's
    /// requested price.
    pub fn enter_position_closing_at(
        &mut self,
        order: &EntryOrder,
        switch_close_price: f64,
    ) -> Result<EntryOutcome, EngineError> {
        if order.instrument.trim().is_empty() {
            return Err(EngineError::invalid("instrument must not be empty"));
        }
        validate_price("entry price", order.price)?;
        if !(order.leverage.is_finite() && order.leverage > 0.0) {
            return Err(EngineError::invalid(format!(
                "leverage must be positive and finite, got {}",
                order.leverage
            )));
        }
        if let Some(target) = order.target_price {
            validate_price("target price", target)?;
        }
        if let Some(stop) = order.stop_price {
            validate_price("stop price", stop)?;
        }

        let (kind, close_price) = match &self.position {
            None => (EntryKind::Opened, None),
            Some(p) if p.instrument == order.instrument && p.side == order.side => {
                tracing::info!(
                    instrument = %order.instrument,
                    side = %order.side,
                    "Position already open, entry ignored"
                );
                return Err(EngineError::DuplicatePosition {
                    instrument: order.instrument.clone(),
                    side: order.side,
                });
            }
            Some(p) if p.instrument == order.instrument => (EntryKind::Flipped, Some(order.price)),
            Some(_) => {
                validate_price("switch close price", switch_close_price)?;
                (EntryKind::Switched, Some(switch_close_price))
            }
        };

        // Balance check runs against the balance the close would leave behind
        let projected = match close_price {
            Some(price) => self.balance + self.exit_proceeds(price),
            None => self.balance,
        };
        if projected < self.config.min_balance {
            tracing::warn!(
                instrument = %order.instrument,
                balance = projected,
                minimum = self.config.min_balance,
                "Insufficient balance for entry"
            );
            return Err(EngineError::InsufficientBalance {
                balance: projected,
                minimum: self.config.min_balance,
            });
        }

        let now = Utc::now();
        let closed = match close_price {
            Some(price) => {
                let reason = match kind {
                    EntryKind::Flipped => ExitReason::PositionFlip,
                    _ => ExitReason::InstrumentSwitch,
                };
                Some(self.settle(price, reason, 1.0, now)?)
            }
            None => None,
        };

        let position = self.open(order, now);
        Ok(EntryOutcome {
            kind,
            closed,
            position,
        })
    }

    /// Cash a full close at `market_price` would return
    fn exit_proceeds(&self, market_price: f64) -> f64 {
        match &self.position {
            Some(position) => {
                let fill = apply_slippage(
                    market_price,
                    position.side,
                    TradeAction::Exit,
                    self.config.slippage_rate,
                );
                let valuation = position.valuation(fill, 1.0, self.config.liquidation_floor_ratio);
                valuation.value * (1.0 - self.config.fee_rate)
            }
            None => 0.0,
        }
    }

    fn open(&mut self, order: &EntryOrder, now: DateTime<Utc>) -> Position {
        let fill = apply_slippage(
            order.price,
            order.side,
            TradeAction::Enter,
            self.config.slippage_rate,
        );
        let available = self.balance * self.config.capital_utilization;
        let entry_fee = available * self.config.fee_rate;
        let invested = available - entry_fee;
        let size = invested * order.leverage / fill;

        let position = Position {
            id: Uuid::new_v4(),
            instrument: order.instrument.clone(),
            side: order.side,
            entry_price: fill,
            requested_price: order.price,
            size,
            leverage: order.leverage,
            invested_amount: invested,
            target_price: order.target_price,
            stop_price: order.stop_price,
            trailing_stop: None,
            high_watermark: fill,
            low_watermark: fill,
            partial_profit_taken: false,
            fees_paid: entry_fee,
            entry_time: now,
        };

        self.balance -= available;
        self.journal.append(TradeRecord {
            id: Uuid::new_v4(),
            action: TradeAction::Enter,
            instrument: order.instrument.clone(),
            side: order.side,
            price: fill,
            size,
            leverage: order.leverage,
            invested_amount: invested,
            realized_pnl: None,
            exit_reason: None,
            target_price: order.target_price,
            stop_price: order.stop_price,
            timestamp: now,
        });

        tracing::info!(
            instrument = %order.instrument,
            side = %order.side,
            leverage = order.leverage,
            fill = fill,
            invested = invested,
            fee = entry_fee,
            "Entered position"
        );

        self.position = Some(position.clone());
        position
    }

    /// Close `close_fraction` of the position at `market_price`
    ///
    /// A fraction of 1.0 or more closes everything.
    pub fn exit_position(
        &mut self,
        market_price: f64,
        reason: ExitReason,
        close_fraction: f64,
    ) -> Result<TradeSummary, EngineError> {
        if self.position.is_none() {
            return Err(EngineError::NoOpenPosition);
        }
        validate_price("exit price", market_price)?;
        if close_fraction.is_nan() || close_fraction <= 0.0 {
            return Err(EngineError::invalid(format!(
                "close fraction must be positive, got {}",
                close_fraction
            )));
        }

        self.settle(market_price, reason, close_fraction, Utc::now())
    }

    /// Exit only while `position_id` is still the open position
    ///
    /// Returns `Ok(None)` when the position was closed or replaced
    /// since the caller observed it.
    pub fn exit_matching(
        &mut self,
        position_id: Uuid,
        market_price: f64,
        reason: ExitReason,
        close_fraction: f64,
    ) -> Result<Option<TradeSummary>, EngineError> {
        if !self.holds(position_id) {
            return Ok(None);
        }
        self.exit_position(market_price, reason, close_fraction)
            .map(Some)
    }

    /// Exit only if the open position is on `instrument`
    pub fn exit_instrument(
        &mut self,
        instrument: &str,
        market_price: f64,
        reason: ExitReason,
        close_fraction: f64,
    ) -> Result<TradeSummary, EngineError> {
        let open = self
            .position
            .as_ref()
            .map(|p| p.instrument.clone())
            .ok_or(EngineError::NoOpenPosition)?;
        if open != instrument {
            return Err(EngineError::invalid(format!(
                "exit for {} but the open position is on {}",
                instrument, open
            )));
        }
        self.exit_position(market_price, reason, close_fraction)
    }

    /// Whether `position_id` is the currently open position
    pub fn holds(&self, position_id: Uuid) -> bool {
        self.position.as_ref().is_some_and(|p| p.id == position_id)
    }

    fn settle(
        &mut self,
        market_price: f64,
        reason: ExitReason,
        close_fraction: f64,
        now: DateTime<Utc>,
    ) -> Result<TradeSummary, EngineError> {
        let fee_rate = self.config.fee_rate;
        let slippage_rate = self.config.slippage_rate;
        let floor_ratio = self.config.liquidation_floor_ratio;

        let Some(position) = self.position.as_mut() else {
            return Err(EngineError::NoOpenPosition);
        };

        let fraction = close_fraction.min(1.0);
        let full = fraction >= 1.0;

        let fill = apply_slippage(market_price, position.side, TradeAction::Exit, slippage_rate);
        let slice_size = position.size * fraction;
        let slice_invested = position.invested_amount * fraction;
        let valuation = position.valuation(fill, fraction, floor_ratio);
        let exit_fee = valuation.value * fee_rate;
        let realized_pnl = valuation.pnl - exit_fee;
        let realized_pnl_pct = if slice_invested > 0.0 {
            realized_pnl / slice_invested * 100.0
        } else {
            0.0
        };
        let holding_minutes = position.holding_duration(now).num_minutes();

        let summary = TradeSummary {
            instrument: position.instrument.clone(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price: fill,
            requested_exit_price: market_price,
            size: slice_size,
            leverage: position.leverage,
            invested_amount: slice_invested,
            realized_pnl,
            realized_pnl_pct,
            reason,
            holding_minutes,
            exit_fee,
            total_fees: position.fees_paid + exit_fee,
            partial: !full,
            close_fraction: fraction,
            exited_at: now,
        };

        if full {
            self.position = None;
        } else {
            position.size *= 1.0 - fraction;
            position.invested_amount *= 1.0 - fraction;
            position.fees_paid += exit_fee;
            if reason == ExitReason::PartialTakeProfit {
                position.partial_profit_taken = true;
            }
        }

        self.balance += valuation.value - exit_fee;
        self.journal.append(TradeRecord {
            id: Uuid::new_v4(),
            action: TradeAction::Exit,
            instrument: summary.instrument.clone(),
            side: summary.side,
            price: fill,
            size: slice_size,
            leverage: summary.leverage,
            invested_amount: slice_invested,
            realized_pnl: Some(realized_pnl),
            exit_reason: Some(reason),
            target_price: None,
            stop_price: None,
            timestamp: now,
        });

        tracing::info!(
            instrument = %summary.instrument,
            side = %summary.side,
            reason = %reason,
            fraction = fraction,
            fill = fill,
            pnl = realized_pnl,
            pnl_pct = realized_pnl_pct,
            fee = exit_fee,
            held = %format_holding(holding_minutes),
            "Exited position"
        );

        Ok(summary)
    }

    /// Ratchet the trailing stop on a new favorable extreme; returns whether it moved
    pub fn update_trailing_stop(&mut self, current_price: f64) -> bool {
        let ratio = self.config.trailing_stop_ratio;
        let Some(position) = self.position.as_mut() else {
            return false;
        };
        if !(current_price.is_finite() && current_price > 0.0) {
            return false;
        }

        let candidate = match position.side {
            Side::Long if current_price > position.high_watermark => {
                position.high_watermark = current_price;
                current_price * (1.0 - ratio)
            }
            Side::Short if current_price < position.low_watermark => {
                position.low_watermark = current_price;
                current_price * (1.0 + ratio)
            }
            _ => return false,
        };

        // Watermarks only move favorably, so this never loosens the stop
        let next = match (position.side, position.trailing_stop) {
            (Side::Long, Some(stop)) => stop.max(candidate),
            (Side::Short, Some(stop)) => stop.min(candidate),
            (_, None) => candidate,
        };
        let changed = position.trailing_stop != Some(next);
        position.trailing_stop = Some(next);
        changed
    }

    /// Position alerts at `current_price`; read-only, tags may co-fire
    pub fn check_position_signals(&self, current_price: f64) -> Vec<PositionSignal> {
        let Some(position) = &self.position else {
            return Vec::new();
        };

        let mut signals = Vec::new();
        let favorable = |level: f64| match position.side {
            Side::Long => current_price >= level,
            Side::Short => current_price <= level,
        };
        let adverse = |level: f64| match position.side {
            Side::Long => current_price <= level,
            Side::Short => current_price >= level,
        };

        if position.target_price.is_some_and(favorable) {
            signals.push(PositionSignal::TargetReached);
        }
        if position.trailing_stop.is_some_and(adverse) {
            signals.push(PositionSignal::TrailingStop);
        }
        if position.stop_price.is_some_and(adverse) {
            signals.push(PositionSignal::StopLoss);
        }

        let valuation = position.valuation(current_price, 1.0, self.config.liquidation_floor_ratio);
        if valuation.pnl_pct >= self.config.partial_take_profit_threshold_pct
            && !position.partial_profit_taken
        {
            signals.push(PositionSignal::PartialTakeProfit);
        }

        signals
    }

    /// Projection at `price`, or at the entry fill when no price is known
    pub fn position_summary(&self, price: Option<f64>) -> Result<PositionSummary, EngineError> {
        let position = self.position.as_ref().ok_or(EngineError::NoOpenPosition)?;
        let mark = price
            .filter(|p| p.is_finite() && *p > 0.0)
            .unwrap_or(position.entry_price);

        Ok(PositionSummary::from_position(
            position,
            mark,
            self.config.liquidation_floor_ratio,
            Utc::now(),
        ))
    }

    pub fn portfolio_status(&self, price: Option<f64>) -> PortfolioStatus {
        let summary = self.position_summary(price).ok();
        let position_value = summary.as_ref().map(|s| s.position_value).unwrap_or(0.0);
        let total_value = self.balance + position_value;
        let initial = self.config.initial_balance;

        PortfolioStatus {
            initial_balance: initial,
            balance: self.balance,
            total_value,
            unrealized_pnl: summary.as_ref().map(|s| s.unrealized_pnl).unwrap_or(0.0),
            unrealized_pnl_pct: summary.as_ref().map(|s| s.unrealized_pnl_pct).unwrap_or(0.0),
            total_return_pct: if initial > 0.0 {
                (total_value - initial) / initial * 100.0
            } else {
                0.0
            },
            position: summary,
            statistics: self.journal.statistics(),
            timestamp: Utc::now(),
        }
    }

    /// Force-close any open position, then restore the initial balance
    pub fn reset(&mut self, current_price: Option<f64>) -> Result<Option<TradeSummary>, EngineError> {
        let closed = match (&self.position, current_price) {
            (None, _) => None,
            (Some(position), None) => {
                return Err(EngineError::unavailable(
                    "price oracle",
                    format!("no price for {} to close before reset", position.instrument),
                ));
            }
            (Some(_), Some(price)) => {
                validate_price("reset price", price)?;
                Some(self.settle(price, ExitReason::Reset, 1.0, Utc::now())?)
            }
        };

        self.balance = self.config.initial_balance;
        tracing::info!(balance = self.balance, "Ledger reset");
        Ok(closed)
    }
}

/// Shared handle to a ledger and the oracle used to price it
///
/// Mutations hold the write lock for the whole critical section, so two
/// concurrent entries cannot both see an empty ledger and two exits cannot
/// both settle the same position. Projections read one consistent snapshot.
#[derive(Clone)]
pub struct Ledger {
    inner: Arc<RwLock<PositionLedger>>,
    oracle: Arc<dyn PriceOracle>,
}

impl Ledger {
    pub fn new(config: LedgerConfig, oracle: Arc<dyn PriceOracle>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(PositionLedger::new(config))),
            oracle,
        }
    }

    // A panic mid-operation cannot leave partial state: mutations happen
    // after validation, so recovering the guard is safe
    fn read(&self) -> RwLockReadGuard<'_, PositionLedger> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, PositionLedger> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn oracle(&self) -> Arc<dyn PriceOracle> {
        Arc::clone(&self.oracle)
    }

    pub fn latest_price(&self, instrument: &str) -> Option<f64> {
        self.oracle
            .latest_price(instrument)
            .map(|s| s.price)
            .filter(|p| p.is_finite() && *p > 0.0)
    }

    /// Open a position
    ///
    /// Switching instruments closes the old position at its own oracle
    /// price, falling back to the order's requested price.
    pub fn enter_position(&self, order: &EntryOrder) -> Result<EntryOutcome, EngineError> {
        let mut ledger = self.write();

        let close_price = match ledger.position() {
            Some(p) if p.instrument != order.instrument => {
                self.latest_price(&p.instrument).unwrap_or_else(|| {
                    tracing::warn!(
                        instrument = %p.instrument,
                        "No price for switch close, using requested entry price"
                    );
                    order.price
                })
            }
            _ => order.price,
        };

        ledger.enter_position_closing_at(order, close_price)
    }

    /// Exit only while `position_id` is open; check and settlement share one write lock
    pub fn exit_if(
        &self,
        position_id: Uuid,
        market_price: f64,
        reason: ExitReason,
        close_fraction: f64,
    ) -> Result<Option<TradeSummary>, EngineError> {
        self.write()
            .exit_matching(position_id, market_price, reason, close_fraction)
    }

    pub fn exit_instrument(
        &self,
        instrument: &str,
        market_price: f64,
        reason: ExitReason,
        close_fraction: f64,
    ) -> Result<TradeSummary, EngineError> {
        self.write()
            .exit_instrument(instrument, market_price, reason, close_fraction)
    }

    /// Exit at the oracle's current price for the open instrument
    pub fn exit_at_market(
        &self,
        reason: ExitReason,
        close_fraction: f64,
    ) -> Result<TradeSummary, EngineError> {
        let mut ledger = self.write();
        let instrument = ledger
            .position()
            .map(|p| p.instrument.clone())
            .ok_or(EngineError::NoOpenPosition)?;
        let price = self.latest_price(&instrument).ok_or_else(|| {
            EngineError::unavailable("price oracle", format!("no price for {}", instrument))
        })?;

        ledger.exit_position(price, reason, close_fraction)
    }

    /// Trailing update that leaves a replaced position alone
    pub fn update_trailing_stop_if(&self, position_id: Uuid, current_price: f64) -> bool {
        let mut ledger = self.write();
        ledger.holds(position_id) && ledger.update_trailing_stop(current_price)
    }

    pub fn check_position_signals_if(
        &self,
        position_id: Uuid,
        current_price: f64,
    ) -> Vec<PositionSignal> {
        let ledger = self.read();
        if !ledger.holds(position_id) {
            return Vec::new();
        }
        ledger.check_position_signals(current_price)
    }

    pub fn position(&self) -> Option<Position> {
        self.read().position().cloned()
    }

    pub fn balance(&self) -> f64 {
        self.read().balance()
    }

    pub fn config(&self) -> LedgerConfig {
        self.read().config().clone()
    }

    /// Projection at the oracle's current price
    pub fn position_summary(&self) -> Result<PositionSummary, EngineError> {
        let ledger = self.read();
        let price = ledger
            .position()
            .and_then(|p| self.latest_price(&p.instrument));
        ledger.position_summary(price)
    }

    /// Projection at a caller-supplied price
    pub fn position_summary_at(&self, price: f64) -> Result<PositionSummary, EngineError> {
        self.read().position_summary(Some(price))
    }

    pub fn portfolio_status(&self) -> PortfolioStatus {
        let ledger = self.read();
        let price = ledger
            .position()
            .and_then(|p| self.latest_price(&p.instrument));
        ledger.portfolio_status(price)
    }

    pub fn reset(&self) -> Result<Option<TradeSummary>, EngineError> {
        let mut ledger = self.write();
        let price = ledger
            .position()
            .and_then(|p| self.latest_price(&p.instrument));
        ledger.reset(price)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TradeRecord> {
        self.read().journal().subscribe()
    }

    pub fn trades(&self) -> Vec<TradeRecord> {
        self.read().journal().trades().to_vec()
    }

    pub fn trades_since(&self, seen: usize) -> Vec<TradeRecord> {
        self.read().journal().trades_since(seen).to_vec()
    }

    pub fn statistics(&self) -> TradeStatistics {
        self.read().journal().statistics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::PriceBoard;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn ledger() -> PositionLedger {
        PositionLedger::new(LedgerConfig::default())
    }

    fn round2(x: f64) -> f64 {
        (x * 100.0).round() / 100.0
    }

    #[test]
    fn test_worked_example_matches_hand_computation() {
        let mut ledger = ledger();
        let order = EntryOrder::new("X", Side::Long, 100.0, 2.0)
            .with_target(110.0)
            .with_stop(95.0);

        let outcome = ledger.enter_position(&order).unwrap();
        assert_eq!(outcome.kind, EntryKind::Opened);

        let position = outcome.position;
        assert!((position.entry_price - 100.1).abs() < 1e-9);
        assert_eq!(round2(position.invested_amount), 9496.20);
        assert!((position.size - 189.734_265_734_265_76).abs() < 1e-9);
        assert_eq!(round2(ledger.balance()), 500.00);

        let summary = ledger.exit_position(110.0, ExitReason::Manual, 1.0).unwrap();
        assert!((summary.exit_price - 109.89).abs() < 1e-9);
        assert_eq!(round2(summary.exit_fee), 4.54);
        assert_eq!(round2(summary.realized_pnl), 1852.96);
        assert_eq!(round2(ledger.balance()), 11849.16);
        assert!(ledger.position().is_none());

        let trades = ledger.journal().trades();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].action, TradeAction::Enter);
        assert_eq!(trades[1].realized_pnl, Some(summary.realized_pnl));
    }

    #[test]
    fn test_entry_conserves_capital() {
        let mut ledger = ledger();
        let position = ledger
            .enter_position(&EntryOrder::new("X", Side::Short, 50.0, 5.0))
            .unwrap()
            .position;

        let accounted = ledger.balance() + position.invested_amount + position.fees_paid;
        assert!((accounted - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_same_side_reentry_is_noop() {
        let mut ledger = ledger();
        let order = EntryOrder::new("X", Side::Long, 100.0, 2.0);
        ledger.enter_position(&order).unwrap();

        let balance = ledger.balance();
        let position = ledger.position().cloned();

        let result = ledger.enter_position(&EntryOrder::new("X", Side::Long, 120.0, 5.0));
        assert!(matches!(result, Err(EngineError::DuplicatePosition { .. })));
        assert_eq!(ledger.balance(), balance);
        assert_eq!(ledger.position().cloned(), position);
        assert_eq!(ledger.journal().len(), 1);
    }

    #[test]
    fn test_flip_equals_exit_then_enter() {
        let mut flipped = ledger();
        flipped
            .enter_position(&EntryOrder::new("X", Side::Long, 100.0, 2.0))
            .unwrap();
        let outcome = flipped
            .enter_position(&EntryOrder::new("X", Side::Short, 105.0, 3.0))
            .unwrap();
        assert_eq!(outcome.kind, EntryKind::Flipped);
        assert_eq!(outcome.closed.as_ref().unwrap().reason, ExitReason::PositionFlip);

        let mut manual = ledger();
        manual
            .enter_position(&EntryOrder::new("X", Side::Long, 100.0, 2.0))
            .unwrap();
        manual
            .exit_position(105.0, ExitReason::PositionFlip, 1.0)
            .unwrap();
        manual
            .enter_position(&EntryOrder::new("X", Side::Short, 105.0, 3.0))
            .unwrap();

        assert_eq!(flipped.balance(), manual.balance());
        let (a, b) = (flipped.position().unwrap(), manual.position().unwrap());
        assert_eq!(a.side, Side::Short);
        assert_eq!(a.size, b.size);
        assert_eq!(a.invested_amount, b.invested_amount);

        // Two transactions, never netted
        assert_eq!(flipped.journal().len(), 3);
    }

    #[test]
    fn test_switch_closes_old_instrument() {
        let mut ledger = ledger();
        ledger
            .enter_position(&EntryOrder::new("X", Side::Long, 100.0, 1.0))
            .unwrap();

        let outcome = ledger
            .enter_position_closing_at(&EntryOrder::new("Y", Side::Short, 20.0, 2.0), 101.0)
            .unwrap();

        assert_eq!(outcome.kind, EntryKind::Switched);
        let closed = outcome.closed.unwrap();
        assert_eq!(closed.instrument, "X");
        assert_eq!(closed.requested_exit_price, 101.0);
        assert_eq!(closed.reason, ExitReason::InstrumentSwitch);
        assert_eq!(ledger.position().unwrap().instrument, "Y");
    }

    #[test]
    fn test_failed_flip_leaves_state_unchanged() {
        let mut ledger = PositionLedger::new(LedgerConfig {
            min_balance: 1_000.0,
            ..Default::default()
        });
        ledger
            .enter_position(&EntryOrder::new("X", Side::Long, 100.0, 10.0))
            .unwrap();
        let balance = ledger.balance();

        // Crash wipes the margin down to the floor; projected balance < minimum
        let result = ledger.enter_position(&EntryOrder::new("X", Side::Short, 50.0, 2.0));
        assert!(matches!(result, Err(EngineError::InsufficientBalance { .. })));
        assert_eq!(ledger.balance(), balance);
        assert_eq!(ledger.position().unwrap().side, Side::Long);
        assert_eq!(ledger.journal().len(), 1);
    }

    #[test]
    fn test_insufficient_balance_blocks_entry() {
        let mut ledger = PositionLedger::new(LedgerConfig {
            initial_balance: 50.0,
            ..Default::default()
        });

        let result = ledger.enter_position(&EntryOrder::new("X", Side::Long, 100.0, 2.0));
        assert_eq!(
            result.unwrap_err(),
            EngineError::InsufficientBalance {
                balance: 50.0,
                minimum: 100.0
            }
        );
        assert!(ledger.position().is_none());
        assert!(ledger.journal().is_empty());
        assert_eq!(ledger.balance(), 50.0);
    }

    #[test]
    fn test_invalid_orders_rejected() {
        let mut ledger = ledger();
        for order in [
            EntryOrder::new("X", Side::Long, 0.0, 2.0),
            EntryOrder::new("X", Side::Long, f64::NAN, 2.0),
            EntryOrder::new("X", Side::Long, 100.0, 0.0),
            EntryOrder::new("", Side::Long, 100.0, 1.0),
            EntryOrder::new("X", Side::Long, 100.0, 1.0).with_stop(-1.0),
        ] {
            assert!(matches!(
                ledger.enter_position(&order),
                Err(EngineError::InvalidOrder { .. })
            ));
        }
        assert_eq!(ledger.balance(), 10_000.0);

        ledger
            .enter_position(&EntryOrder::new("X", Side::Long, 100.0, 1.0))
            .unwrap();
        assert!(matches!(
            ledger.exit_position(100.0, ExitReason::Manual, 0.0),
            Err(EngineError::InvalidOrder { .. })
        ));
    }

    #[test]
    fn test_exit_without_position() {
        let mut ledger = ledger();
        assert_eq!(
            ledger.exit_position(100.0, ExitReason::Manual, 1.0),
            Err(EngineError::NoOpenPosition)
        );
        assert!(ledger.position_summary(Some(100.0)).is_err());
        assert!(ledger.journal().is_empty());
    }

    #[test]
    fn test_partial_then_full_exit() {
        let mut split = ledger();
        split
            .enter_position(&EntryOrder::new("X", Side::Long, 100.0, 3.0))
            .unwrap();
        let full_size = split.position().unwrap().size;
        let after_entry = split.balance();

        let first = split
            .exit_position(112.0, ExitReason::PartialTakeProfit, 0.5)
            .unwrap();
        assert!(first.partial);
        let remaining = split.position().unwrap();
        assert!(remaining.partial_profit_taken);
        assert!((remaining.size - full_size * 0.5).abs() < 1e-9);

        let second = split.exit_position(112.0, ExitReason::Manual, 1.0).unwrap();
        assert!(!second.partial);
        assert!(split.position().is_none());

        let proceeds = |s: &TradeSummary| s.invested_amount + s.realized_pnl;
        let expected = after_entry + proceeds(&first) + proceeds(&second);
        assert!((split.balance() - expected).abs() < 1e-6);

        let mut whole = ledger();
        whole
            .enter_position(&EntryOrder::new("X", Side::Long, 100.0, 3.0))
            .unwrap();
        whole.exit_position(112.0, ExitReason::Manual, 1.0).unwrap();
        assert!((split.balance() - whole.balance()).abs() < 1e-6);
    }

    #[test]
    fn test_only_scheduled_partial_sets_flag() {
        let mut ledger = ledger();
        ledger
            .enter_position(&EntryOrder::new("X", Side::Long, 100.0, 2.0))
            .unwrap();
        ledger
            .exit_position(105.0, ExitReason::TargetReached, 0.5)
            .unwrap();
        assert!(!ledger.position().unwrap().partial_profit_taken);
    }

    #[test]
    fn test_liquidation_floor() {
        let mut ledger = ledger();
        let invested = ledger
            .enter_position(&EntryOrder::new("X", Side::Long, 100.0, 10.0))
            .unwrap()
            .position
            .invested_amount;

        let summary = ledger.exit_position(80.0, ExitReason::StopLoss, 1.0).unwrap();
        let floor = invested * 0.05;
        assert!((summary.exit_fee - floor * 0.0004).abs() < 1e-9);
        assert!((summary.realized_pnl - (floor - invested - floor * 0.0004)).abs() < 1e-6);
        assert!(ledger.balance() > 0.0);
    }

    #[test]
    fn test_long_trailing_stop_never_decreases() {
        let mut ledger = ledger();
        ledger
            .enter_position(&EntryOrder::new("X", Side::Long, 100.0, 2.0))
            .unwrap();

        let mut rng = StdRng::seed_from_u64(7);
        let mut price = 100.0;
        let mut last_stop: Option<f64> = None;

        for _ in 0..500 {
            price *= 1.0 + rng.gen_range(-0.03..0.03);
            ledger.update_trailing_stop(price);

            let stop = ledger.position().unwrap().trailing_stop;
            if let (Some(prev), Some(curr)) = (last_stop, stop) {
                assert!(curr >= prev, "trailing stop loosened: {} -> {}", prev, curr);
            }
            assert!(!(last_stop.is_some() && stop.is_none()));
            last_stop = stop;
        }
    }

    #[test]
    fn test_short_trailing_stop_never_increases() {
        let mut ledger = ledger();
        ledger
            .enter_position(&EntryOrder::new("X", Side::Short, 100.0, 2.0))
            .unwrap();

        let mut rng = StdRng::seed_from_u64(11);
        let mut price = 100.0;
        let mut last_stop: Option<f64> = None;

        for _ in 0..500 {
            price *= 1.0 + rng.gen_range(-0.03..0.03);
            ledger.update_trailing_stop(price);

            let stop = ledger.position().unwrap().trailing_stop;
            if let (Some(prev), Some(curr)) = (last_stop, stop) {
                assert!(curr <= prev, "trailing stop loosened: {} -> {}", prev, curr);
            }
            last_stop = stop;
        }
    }

    #[test]
    fn test_trailing_stop_ratchet() {
        let mut ledger = ledger();
        ledger
            .enter_position(&EntryOrder::new("X", Side::Long, 100.0, 2.0))
            .unwrap();

        assert!(!ledger.update_trailing_stop(99.0)); // below fill watermark
        assert!(ledger.update_trailing_stop(110.0));
        assert!((ledger.position().unwrap().trailing_stop.unwrap() - 107.8).abs() < 1e-9);
        assert!(!ledger.update_trailing_stop(105.0));
        assert!((ledger.position().unwrap().trailing_stop.unwrap() - 107.8).abs() < 1e-9);
    }

    #[test]
    fn test_position_signals() {
        let mut ledger = ledger();
        assert!(ledger.check_position_signals(100.0).is_empty());

        ledger
            .enter_position(
                &EntryOrder::new("X", Side::Long, 100.0, 2.0)
                    .with_target(110.0)
                    .with_stop(95.0),
            )
            .unwrap();

        assert!(ledger.check_position_signals(101.0).is_empty());
        assert_eq!(
            ledger.check_position_signals(94.0),
            vec![PositionSignal::StopLoss]
        );

        // +10% at 2x is +20% PnL
        let signals = ledger.check_position_signals(111.0);
        assert!(signals.contains(&PositionSignal::TargetReached));
        assert!(signals.contains(&PositionSignal::PartialTakeProfit));

        ledger.update_trailing_stop(111.0);
        let signals = ledger.check_position_signals(108.0);
        assert!(signals.contains(&PositionSignal::TrailingStop));

        ledger
            .exit_position(111.0, ExitReason::PartialTakeProfit, 0.5)
            .unwrap();
        assert!(!ledger
            .check_position_signals(111.0)
            .contains(&PositionSignal::PartialTakeProfit));
    }

    #[test]
    fn test_short_position_signals() {
        let mut ledger = ledger();
        ledger
            .enter_position(
                &EntryOrder::new("X", Side::Short, 100.0, 1.0)
                    .with_target(90.0)
                    .with_stop(104.0),
            )
            .unwrap();

        assert_eq!(
            ledger.check_position_signals(105.0),
            vec![PositionSignal::StopLoss]
        );
        let signals = ledger.check_position_signals(89.0);
        assert!(signals.contains(&PositionSignal::TargetReached));
        assert!(signals.contains(&PositionSignal::PartialTakeProfit));
    }

    #[test]
    fn test_summary_falls_back_to_entry_price() {
        let mut ledger = ledger();
        ledger
            .enter_position(&EntryOrder::new("X", Side::Long, 100.0, 2.0))
            .unwrap();

        let summary = ledger.position_summary(None).unwrap();
        assert_eq!(summary.current_price, summary.entry_price);
        assert_eq!(summary.unrealized_pnl, 0.0);

        let status = ledger.portfolio_status(Some(110.0));
        assert!(status.unrealized_pnl > 0.0);
        assert!((status.total_value - (status.balance + status.position.unwrap().position_value)).abs() < 1e-9);
    }

    #[test]
    fn test_reset_requires_price_when_position_open() {
        let mut ledger = ledger();
        ledger
            .enter_position(&EntryOrder::new("X", Side::Long, 100.0, 2.0))
            .unwrap();

        assert!(matches!(
            ledger.reset(None),
            Err(EngineError::UpstreamUnavailable { .. })
        ));
        assert!(ledger.position().is_some());

        let closed = ledger.reset(Some(90.0)).unwrap().unwrap();
        assert_eq!(closed.reason, ExitReason::Reset);
        assert!(ledger.position().is_none());
        assert_eq!(ledger.balance(), 10_000.0);
    }

    #[test]
    fn test_handle_switch_uses_oracle_close_price() {
        let board = PriceBoard::new();
        let ledger = Ledger::new(LedgerConfig::default(), Arc::new(board.clone()));

        ledger
            .enter_position(&EntryOrder::new("X", Side::Long, 100.0, 1.0))
            .unwrap();
        board.set_price("X", 104.0);

        let outcome = ledger
            .enter_position(&EntryOrder::new("Y", Side::Long, 20.0, 1.0))
            .unwrap();
        assert_eq!(outcome.closed.unwrap().requested_exit_price, 104.0);

        // No oracle price for Y: fall back to the requested price
        let outcome = ledger
            .enter_position(&EntryOrder::new("Z", Side::Long, 7.0, 1.0))
            .unwrap();
        assert_eq!(outcome.closed.unwrap().requested_exit_price, 7.0);
    }

    #[test]
    fn test_handle_serializes_concurrent_entries() {
        let ledger = Ledger::new(LedgerConfig::default(), Arc::new(PriceBoard::new()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    ledger.enter_position(&EntryOrder::new("X", Side::Long, 100.0, 2.0))
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(ledger.trades().len(), 1);
        assert_eq!(round2(ledger.balance()), 500.0);
    }

    #[test]
    fn test_handle_exit_at_market_and_reset() {
        let board = PriceBoard::new();
        let ledger = Ledger::new(LedgerConfig::default(), Arc::new(board.clone()));

        assert_eq!(
            ledger.exit_at_market(ExitReason::Manual, 1.0),
            Err(EngineError::NoOpenPosition)
        );

        ledger
            .enter_position(&EntryOrder::new("X", Side::Long, 100.0, 2.0))
            .unwrap();
        assert!(matches!(
            ledger.exit_at_market(ExitReason::Manual, 0.5),
            Err(EngineError::UpstreamUnavailable { .. })
        ));
        assert!(matches!(
            ledger.reset(),
            Err(EngineError::UpstreamUnavailable { .. })
        ));

        board.set_price("X", 101.0);
        let summary = ledger.exit_at_market(ExitReason::Manual, 0.5).unwrap();
        assert_eq!(summary.requested_exit_price, 101.0);
        assert!(ledger.position_summary().unwrap().current_price == 101.0);

        ledger.reset().unwrap();
        assert_eq!(ledger.balance(), 10_000.0);
        assert_eq!(ledger.statistics().total_trades, 2);
    }

    #[test]
    fn test_exit_if_ignores_replaced_position() {
        let ledger = Ledger::new(LedgerConfig::default(), Arc::new(PriceBoard::new()));
        ledger
            .enter_position(&EntryOrder::new("X", Side::Long, 100.0, 2.0))
            .unwrap();
        let long_id = ledger.position().unwrap().id;

        ledger
            .enter_position(&EntryOrder::new("X", Side::Short, 104.0, 2.0))
            .unwrap();
        let short = ledger.position().unwrap();
        assert_ne!(short.id, long_id);

        let trades = ledger.trades().len();
        assert_eq!(
            ledger.exit_if(long_id, 104.0, ExitReason::TargetReached, 1.0),
            Ok(None)
        );
        assert!(!ledger.update_trailing_stop_if(long_id, 90.0));
        assert!(ledger.check_position_signals_if(long_id, 1.0).is_empty());
        assert_eq!(ledger.position(), Some(short.clone()));
        assert_eq!(ledger.trades().len(), trades);

        let summary = ledger
            .exit_if(short.id, 103.0, ExitReason::Manual, 1.0)
            .unwrap()
            .expect("current position exits");
        assert_eq!(summary.side, Side::Short);
        assert!(ledger.position().is_none());
        assert_eq!(
            ledger.exit_if(short.id, 103.0, ExitReason::Manual, 1.0),
            Ok(None)
        );
    }

    #[test]
    fn test_exit_instrument_rejects_switched_position() {
        let ledger = Ledger::new(LedgerConfig::default(), Arc::new(PriceBoard::new()));
        assert_eq!(
            ledger.exit_instrument("X", 100.0, ExitReason::Decision, 1.0),
            Err(EngineError::NoOpenPosition)
        );

        ledger
            .enter_position(&EntryOrder::new("X", Side::Long, 100.0, 2.0))
            .unwrap();
        ledger
            .enter_position(&EntryOrder::new("Y", Side::Long, 20.0, 2.0))
            .unwrap();
        let position = ledger.position().unwrap();

        assert!(matches!(
            ledger.exit_instrument("X", 100.0, ExitReason::Decision, 1.0),
            Err(EngineError::InvalidOrder { .. })
        ));
        assert_eq!(ledger.position(), Some(position));

        let summary = ledger
            .exit_instrument("Y", 21.0, ExitReason::Decision, 1.0)
            .unwrap();
        assert_eq!(summary.instrument, "Y");
        assert!(ledger.position().is_none());
    }
}
