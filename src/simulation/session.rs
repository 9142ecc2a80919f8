use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::decision::{DecisionRequest, DecisionSource};
use crate::execution::{
    ActionKind, CandleBuffer, DecisionAction, ExecutionOutcome, Executor, Ledger, PositionMonitor,
    PriceBoard, TradeDecision,
};
use crate::models::{Candle, Decision, Recommendation, Side};
use crate::strategy::{SignalEngine, TradeSignal};

/// How detected signals are turned into trade decisions during a session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub leverage: f64,
    pub min_confidence: f64,
    pub target_pct: f64,
    pub stop_pct: f64,
    pub analysis_periods: usize,
    pub decision_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            leverage: 3.0,
            min_confidence: 0.6,
            target_pct: 4.0,
            stop_pct: 2.0,
            analysis_periods: 100,
            decision_timeout_secs: 30,
        }
    }
}

/// What happened while replaying one candle
#[derive(Debug, Clone, Default)]
pub struct StepReport {
    pub accepted: bool,
    pub signals: Vec<TradeSignal>,
    pub decision: Option<Decision>,
    pub outcome: Option<ExecutionOutcome>,
    pub monitor_exits: usize,
}

/// Running totals over a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionTotals {
    pub candles: usize,
    pub signals: usize,
    pub decisions: usize,
    pub entries: usize,
    pub flips: usize,
    pub switches: usize,
    pub exits: usize,
    pub rejected: usize,
    pub monitor_exits: usize,
}

impl SessionTotals {
    pub fn record(&mut self, step: &StepReport) {
        if !step.accepted {
            return;
        }
        self.candles += 1;
        self.signals += step.signals.len();
        self.monitor_exits += step.monitor_exits;
        if step.decision.is_some() {
            self.decisions += 1;
        }
        match &step.outcome {
            Some(ExecutionOutcome::Entered(_)) => self.entries += 1,
            Some(ExecutionOutcome::Flipped { .. }) => self.flips += 1,
            Some(ExecutionOutcome::Switched { .. }) => self.switches += 1,
            Some(ExecutionOutcome::Exited(_)) => self.exits += 1,
            Some(ExecutionOutcome::Rejected(_)) => self.rejected += 1,
            Some(ExecutionOutcome::Held) | None => {}
        }
    }
}

/// Replays candles through the whole engine
///
/// Per candle: store it, publish its close as the live price, let the
/// monitor tick once, detect signals, and when any fire ask the decision
/// source and apply its answer through the executor.
pub struct PaperSession {
    config: SessionConfig,
    instrument: String,
    buffer: Arc<CandleBuffer>,
    prices: PriceBoard,
    engine: Arc<SignalEngine>,
    decision: Arc<dyn DecisionSource>,
    ledger: Ledger,
    executor: Executor,
    monitor: Option<Arc<PositionMonitor>>,
}

impl PaperSession {
    pub fn new(
        config: SessionConfig,
        instrument: impl Into<String>,
        buffer: Arc<CandleBuffer>,
        prices: PriceBoard,
        engine: Arc<SignalEngine>,
        decision: Arc<dyn DecisionSource>,
        ledger: Ledger,
    ) -> Self {
        let executor = Executor::new(ledger.clone());
        Self {
            config,
            instrument: instrument.into(),
            buffer,
            prices,
            engine,
            decision,
            ledger,
            executor,
            monitor: None,
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<PositionMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Load history without trading on it
    pub fn warm_up(&self, candles: &[Candle]) -> usize {
        let loaded = candles
            .iter()
            .filter(|candle| self.buffer.add_candle((*candle).clone()))
            .count();
        if let Some(last) = candles.last() {
            self.prices.set_price(&self.instrument, last.close);
        }
        tracing::info!(
            instrument = %self.instrument,
            loaded,
            "Warm-up candles loaded"
        );
        loaded
    }

    pub async fn step(&self, candle: &Candle) -> StepReport {
        let mut report = StepReport::default();

        if candle.instrument != self.instrument || !self.buffer.add_candle(candle.clone()) {
            tracing::warn!(
                instrument = %candle.instrument,
                timestamp = %candle.timestamp,
                "Candle rejected"
            );
            return report;
        }
        report.accepted = true;
        self.prices.set_price(&self.instrument, candle.close);

        if let Some(monitor) = &self.monitor {
            let tick = monitor.force_tick().await;
            report.monitor_exits = tick
                .actions
                .iter()
                .filter(|a| matches!(a.kind, ActionKind::FullExit | ActionKind::PartialExit))
                .count();
        }

        let window = self
            .buffer
            .get_recent_candles(&self.instrument, self.engine.config().window);
        report.signals = self
            .engine
            .detect_at(&self.instrument, &window, candle.timestamp);
        if report.signals.is_empty() {
            return report;
        }

        let request = DecisionRequest {
            instrument: self.instrument.clone(),
            current_price: candle.close,
            trigger: None,
            position: self.ledger.position_summary_at(candle.close).ok(),
            recent_signals: report.signals.clone(),
            analysis_periods: self.config.analysis_periods,
            requested_at: candle.timestamp,
        };

        let timeout = Duration::from_secs(self.config.decision_timeout_secs);
        let decision = match tokio::time::timeout(timeout, self.decision.recommend(&request)).await {
            Ok(Ok(decision)) => decision,
            Ok(Err(e)) => {
                tracing::warn!(source = self.decision.name(), error = %e, "Decision unavailable");
                return report;
            }
            Err(_) => {
                tracing::warn!(source = self.decision.name(), "Decision request timed out");
                return report;
            }
        };

        let trade = self.to_trade_decision(&decision, candle.close);
        tracing::info!(
            instrument = %self.instrument,
            recommendation = ?decision.recommendation,
            confidence = decision.confidence,
            signals = report.signals.len(),
            "Decision received"
        );

        report.outcome = Some(self.executor.apply(&trade));
        report.decision = Some(decision);
        report
    }

    /// Map a recommendation onto a ledger action
    ///
    /// Low confidence, HOLD, and a repeat of the side already held all
    /// become `Hold`.
    pub fn to_trade_decision(&self, decision: &Decision, price: f64) -> TradeDecision {
        let side = match decision.recommendation {
            _ if decision.confidence < self.config.min_confidence => None,
            Recommendation::Buy => Some(Side::Long),
            Recommendation::Sell => Some(Side::Short),
            Recommendation::Hold => None,
        };

        let already_held = match (side, self.ledger.position()) {
            (Some(side), Some(position)) => {
                position.instrument == self.instrument && position.side == side
            }
            _ => false,
        };

        let action = match side {
            Some(side) if !already_held => {
                let target_move = self.config.target_pct / 100.0;
                let stop_move = self.config.stop_pct / 100.0;
                let (target_price, stop_price) = match side {
                    Side::Long => (price * (1.0 + target_move), price * (1.0 - stop_move)),
                    Side::Short => (price * (1.0 - target_move), price * (1.0 + stop_move)),
                };
                DecisionAction::Enter {
                    side,
                    leverage: self.config.leverage,
                    target_price: Some(target_price),
                    stop_price: Some(stop_price),
                }
            }
            _ => DecisionAction::Hold,
        };

        TradeDecision {
            instrument: self.instrument.clone(),
            action,
            price: Some(price),
            reasoning: decision.reasoning.clone(),
        }
    }
}
