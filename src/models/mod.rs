use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// OHLCV candlestick for one instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Latest known price for an instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub instrument: String,
    pub price: f64,
    pub as_of: DateTime<Utc>,
}

/// Direction of a leveraged position
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// Fractional price move in this side's favour: positive means profit
    pub fn change_rate(self, entry_price: f64, price: f64) -> f64 {
        match self {
            Side::Long => (price - entry_price) / entry_price,
            Side::Short => (entry_price - price) / entry_price,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Enter,
    Exit,
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeAction::Enter => write!(f, "ENTER"),
            TradeAction::Exit => write!(f, "EXIT"),
        }
    }
}

/// Why a position (or a slice of it) was closed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Manual,
    TargetReached,
    TrailingStop,
    StopLoss,
    PartialTakeProfit,
    PositionFlip,
    InstrumentSwitch,
    Decision,
    Reset,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Manual => "manual",
            ExitReason::TargetReached => "target_reached",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::PartialTakeProfit => "partial_take_profit",
            ExitReason::PositionFlip => "position_flip",
            ExitReason::InstrumentSwitch => "instrument_switch",
            ExitReason::Decision => "decision",
            ExitReason::Reset => "reset",
        }
    }

    pub fn parse(value: &str) -> Option<ExitReason> {
        let reason = match value {
            "manual" => ExitReason::Manual,
            "target_reached" => ExitReason::TargetReached,
            "trailing_stop" => ExitReason::TrailingStop,
            "stop_loss" => ExitReason::StopLoss,
            "partial_take_profit" => ExitReason::PartialTakeProfit,
            "position_flip" => ExitReason::PositionFlip,
            "instrument_switch" => ExitReason::InstrumentSwitch,
            "decision" => ExitReason::Decision,
            "reset" => ExitReason::Reset,
            _ => return None,
        };
        Some(reason)
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of a ledger transaction
///
/// One is appended for every entry and every (partial) exit; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub id: Uuid,
    pub action: TradeAction,
    pub instrument: String,
    pub side: Side,
    pub price: f64,
    pub size: f64,
    pub leverage: f64,
    pub invested_amount: f64,
    pub realized_pnl: Option<f64>, // EXIT only
    pub exit_reason: Option<ExitReason>,
    pub target_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Directional recommendation from a decision source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    pub recommendation: Recommendation,
    pub confidence: f64, // 0.0 - 1.0
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl Decision {
    pub fn new(recommendation: Recommendation, confidence: f64) -> Self {
        Self {
            recommendation,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: None,
        }
    }
}
