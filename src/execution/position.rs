use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::{ExitReason, Side, TradeAction};

/// The single open leveraged position held by a ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub id: Uuid, // fresh per entry; a flip or switch yields a new id
    pub instrument: String,
    pub side: Side,
    pub entry_price: f64,     // fill, after slippage
    pub requested_price: f64, // before slippage
    pub size: f64,
    pub leverage: f64,
    pub invested_amount: f64, // margin, after entry fee
    pub target_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub trailing_stop: Option<f64>,
    pub high_watermark: f64,
    pub low_watermark: f64,
    pub partial_profit_taken: bool,
    pub fees_paid: f64,
    pub entry_time: DateTime<Utc>,
}

impl Position {
    /// Leverage-adjusted valuation of `fraction` of the position at `price`
    pub fn valuation(&self, price: f64, fraction: f64, floor_ratio: f64) -> Valuation {
        value_slice(
            self.invested_amount * fraction,
            self.leverage,
            self.side.change_rate(self.entry_price, price),
            floor_ratio,
        )
    }

    pub fn holding_duration(&self, now: DateTime<Utc>) -> Duration {
        now - self.entry_time
    }
}

/// Value of a margin slice, its PnL, and PnL as a percentage of the margin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Valuation {
    pub value: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
}

/// Value `invested` margin after a directional move of `change_rate`
///
/// The value never drops below `floor_ratio` of the margin (simplified
/// liquidation guard). Zero margin yields a zero valuation.
pub fn value_slice(invested: f64, leverage: f64, change_rate: f64, floor_ratio: f64) -> Valuation {
    if invested <= 0.0 {
        return Valuation {
            value: 0.0,
            pnl: 0.0,
            pnl_pct: 0.0,
        };
    }

    let raw = invested * (1.0 + leverage * change_rate);
    let value = raw.max(invested * floor_ratio);
    let pnl = value - invested;

    Valuation {
        value,
        pnl,
        pnl_pct: pnl / invested * 100.0,
    }
}

/// Apply slippage against the trader
///
/// Buying (enter LONG, exit SHORT) fills higher; selling fills lower.
pub fn apply_slippage(price: f64, side: Side, action: TradeAction, rate: f64) -> f64 {
    let buying = matches!(
        (side, action),
        (Side::Long, TradeAction::Enter) | (Side::Short, TradeAction::Exit)
    );
    if buying {
        price * (1.0 + rate)
    } else {
        price * (1.0 - rate)
    }
}

/// Position-level alerts, declared in dispatch precedence order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSignal {
    StopLoss,
    TrailingStop,
    TargetReached,
    PartialTakeProfit,
}

impl PositionSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSignal::StopLoss => "STOP_LOSS",
            PositionSignal::TrailingStop => "TRAILING_STOP",
            PositionSignal::TargetReached => "TARGET_REACHED",
            PositionSignal::PartialTakeProfit => "PARTIAL_TAKE_PROFIT",
        }
    }
}

impl fmt::Display for PositionSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a (partial) exit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeSummary {
    pub instrument: String,
    pub side: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub requested_exit_price: f64,
    pub size: f64,
    pub leverage: f64,
    pub invested_amount: f64,
    pub realized_pnl: f64,
    pub realized_pnl_pct: f64,
    pub reason: ExitReason,
    pub holding_minutes: i64,
    pub exit_fee: f64,
    pub total_fees: f64,
    pub partial: bool,
    pub close_fraction: f64,
    pub exited_at: DateTime<Utc>,
}

/// Read-only projection of the open position at a mark price
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionSummary {
    pub instrument: String,
    pub side: Side,
    pub entry_price: f64,
    pub current_price: f64,
    pub size: f64,
    pub leverage: f64,
    pub invested_amount: f64,
    pub position_value: f64,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_pct: f64,
    pub target_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub trailing_stop: Option<f64>,
    pub partial_profit_taken: bool,
    pub fees_paid: f64,
    pub entry_time: DateTime<Utc>,
    pub holding_minutes: i64,
}

impl PositionSummary {
    pub fn from_position(
        position: &Position,
        current_price: f64,
        floor_ratio: f64,
        now: DateTime<Utc>,
    ) -> Self {
        let valuation = position.valuation(current_price, 1.0, floor_ratio);

        Self {
            instrument: position.instrument.clone(),
            side: position.side,
            entry_price: position.entry_price,
            current_price,
            size: position.size,
            leverage: position.leverage,
            invested_amount: position.invested_amount,
            position_value: valuation.value,
            unrealized_pnl: valuation.pnl,
            unrealized_pnl_pct: valuation.pnl_pct,
            target_price: position.target_price,
            stop_price: position.stop_price,
            trailing_stop: position.trailing_stop,
            partial_profit_taken: position.partial_profit_taken,
            fees_paid: position.fees_paid,
            entry_time: position.entry_time,
            holding_minutes: position.holding_duration(now).num_minutes(),
        }
    }
}

/// "2d 3h 15m" style rendering used in log lines
pub fn format_holding(minutes: i64) -> String {
    let days = minutes / (24 * 60);
    let hours = (minutes / 60) % 24;
    let mins = minutes % 60;

    if days > 0 {
        format!("{}d {}h {}m", days, hours, mins)
    } else if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else {
        format!("{}m", mins)
    }
}
