use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::ledger::Ledger;
use super::position::{PositionSignal, PositionSummary, TradeSummary};
use crate::decision::{DecisionRequest, DecisionSource};
use crate::error::EngineError;
use crate::models::{ExitReason, Recommendation};
use crate::strategy::SignalEngine;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub tick_interval_secs: u64,
    pub analysis_cooldown_secs: i64,
    pub partial_exit_ratio: f64, // on a HOLD recommendation at target
    pub min_confidence: f64,
    pub decision_timeout_secs: u64,
    pub analysis_periods: usize,
    pub max_price_age_secs: i64,
    pub status_log_every: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 10,
            analysis_cooldown_secs: 300,
            partial_exit_ratio: 0.5,
            min_confidence: 0.6,
            decision_timeout_secs: 30,
            analysis_periods: 30,
            max_price_age_secs: 300,
            status_log_every: 30,
            shutdown_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    FullExit,
    PartialExit,
    Held,        // decision source said keep the position
    CoolingDown, // consultation skipped
    Skipped,     // position already gone or already reduced
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorAction {
    pub signal: PositionSignal,
    pub kind: ActionKind,
    pub summary: Option<TradeSummary>,
}

/// What a single tick observed and did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickReport {
    pub tick: u64,
    pub at: DateTime<Utc>,
    pub instrument: Option<String>,
    pub price: Option<f64>,
    pub trailing_updated: bool,
    pub signals: Vec<PositionSignal>,
    pub actions: Vec<MonitorAction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub tick_interval_secs: u64,
    pub total_ticks: u64,
    pub signals_detected: u64,
    pub last_tick: Option<DateTime<Utc>>,
    pub analysis_cooldown_secs: i64,
    pub has_position: bool,
    pub last_position: Option<PositionSummary>,
}

#[derive(Default)]
struct TickState {
    last_tick: Option<DateTime<Utc>>,
    last_position: Option<PositionSummary>,
    analysis_cooldowns: HashMap<(String, PositionSignal), DateTime<Utc>>,
}

struct MonitorCore {
    config: MonitorConfig,
    ledger: Ledger,
    decision: Arc<dyn DecisionSource>,
    signals: Option<Arc<SignalEngine>>,
    ticks: AtomicU64,
    signals_detected: AtomicU64,
    state: Mutex<TickState>,
    tick_lock: tokio::sync::Mutex<()>,
}

struct Worker {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Background worker that watches the open position on a fixed tick
///
/// Each tick reads the price, ratchets the trailing stop, and acts on the
/// ledger's position signals. Ticks never overlap, and a failing or
/// panicking tick is logged without stopping the loop.
pub struct PositionMonitor {
    core: Arc<MonitorCore>,
    worker: Mutex<Option<Worker>>,
}

impl PositionMonitor {
    pub fn new(config: MonitorConfig, ledger: Ledger, decision: Arc<dyn DecisionSource>) -> Self {
        Self {
            core: Arc::new(MonitorCore {
                config,
                ledger,
                decision,
                signals: None,
                ticks: AtomicU64::new(0),
                signals_detected: AtomicU64::new(0),
                state: Mutex::new(TickState::default()),
                tick_lock: tokio::sync::Mutex::new(()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Attach a signal engine whose recent signals go into decision requests
    ///
    /// Must be called before `start`.
    pub fn with_signal_engine(mut self, engine: Arc<SignalEngine>) -> Self {
        if let Some(core) = Arc::get_mut(&mut self.core) {
            core.signals = Some(engine);
        }
        self
    }

    fn worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start the background loop; returns false if it is already running
    pub fn start(&self) -> bool {
        let mut worker = self.worker();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return false;
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_loop(Arc::clone(&self.core), token.clone()));
        *worker = Some(Worker { token, handle });

        tracing::info!(
            interval_secs = self.core.config.tick_interval_secs,
            "Position monitor started"
        );
        true
    }

    /// Stop the loop and wait for the in-flight tick, bounded by `shutdown_timeout_secs`
    ///
    /// Returns false if the monitor was not running. The task is never aborted.
    pub async fn stop(&self) -> bool {
        let Some(worker) = self.worker().take() else {
            return false;
        };

        worker.token.cancel();
        let timeout = Duration::from_secs(self.core.config.shutdown_timeout_secs);
        match tokio::time::timeout(timeout, worker.handle).await {
            Ok(Ok(())) => tracing::info!("Position monitor stopped"),
            Ok(Err(e)) => tracing::error!(error = %e, "Position monitor task failed"),
            Err(_) => tracing::warn!(
                timeout_secs = self.core.config.shutdown_timeout_secs,
                "Position monitor did not stop in time, detaching"
            ),
        }
        true
    }

    pub fn is_running(&self) -> bool {
        self.worker()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Run exactly one tick inline
    pub async fn force_tick(&self) -> TickReport {
        self.core.tick().await
    }

    pub fn status(&self) -> MonitorStatus {
        let core = &self.core;
        let state = core.state();
        MonitorStatus {
            running: self.is_running(),
            tick_interval_secs: core.config.tick_interval_secs,
            total_ticks: core.ticks.load(Ordering::Relaxed),
            signals_detected: core.signals_detected.load(Ordering::Relaxed),
            last_tick: state.last_tick,
            analysis_cooldown_secs: core.config.analysis_cooldown_secs,
            has_position: core.ledger.position().is_some(),
            last_position: state.last_position.clone(),
        }
    }
}

async fn run_loop(core: Arc<MonitorCore>, token: CancellationToken) {
    let mut ticker =
        tokio::time::interval(Duration::from_secs(core.config.tick_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => {
                tracing::info!("Position monitor shutting down");
                break;
            }
            _ = ticker.tick() => {
                // Own task per tick so a panic surfaces as a JoinError here
                let tick_core = Arc::clone(&core);
                if let Err(e) = tokio::spawn(async move { tick_core.tick().await }).await {
                    tracing::error!(
                        tick = core.ticks.load(Ordering::Relaxed),
                        error = %e,
                        "Monitor tick panicked"
                    );
                }
            }
        }
    }
}

impl MonitorCore {
    fn state(&self) -> MutexGuard<'_, TickState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn tick(&self) -> TickReport {
        let _serial = self.tick_lock.lock().await;
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let now = Utc::now();

        let mut report = TickReport {
            tick,
            at: now,
            instrument: None,
            price: None,
            trailing_updated: false,
            signals: Vec::new(),
            actions: Vec::new(),
        };
        self.state().last_tick = Some(now);

        if let Some(position) = self.ledger.position() {
            let instrument = position.instrument;
            report.instrument = Some(instrument.clone());

            match self.current_price(&instrument, now) {
                Some(price) => {
                    report.price = Some(price);
                    let held = Held {
                        id: position.id,
                        instrument: &instrument,
                    };
                    self.evaluate(held, price, tick, now, &mut report).await;
                    self.state().last_position = self.ledger.position_summary_at(price).ok();
                }
                None => tracing::debug!(instrument = %instrument, tick, "No usable price, skipping tick"),
            }
        } else {
            self.state().last_position = None;
        }

        if self.config.status_log_every > 0 && tick % self.config.status_log_every == 0 {
            self.log_status(tick);
        }

        report
    }

    fn current_price(&self, instrument: &str, now: DateTime<Utc>) -> Option<f64> {
        let snapshot = self.ledger.oracle().latest_price(instrument)?;
        let age = (now - snapshot.as_of).num_seconds();
        if age > self.config.max_price_age_secs {
            tracing::warn!(instrument = %instrument, age_secs = age, "Price is stale");
            return None;
        }
        Some(snapshot.price).filter(|p| p.is_finite() && *p > 0.0)
    }

    async fn evaluate(
        &self,
        held: Held<'_>,
        price: f64,
        tick: u64,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        let instrument = held.instrument;
        report.trailing_updated = self.ledger.update_trailing_stop_if(held.id, price);
        if report.trailing_updated {
            tracing::debug!(instrument = %instrument, price, "Trailing stop moved");
        }

        let mut signals = self.ledger.check_position_signals_if(held.id, price);
        signals.sort();
        signals.dedup();
        self.signals_detected
            .fetch_add(signals.len() as u64, Ordering::Relaxed);
        report.signals = signals.clone();

        for signal in signals {
            tracing::info!(instrument = %instrument, tick, signal = %signal, price, "Position signal");
            match self.dispatch(signal, held, price, now).await {
                Ok(action) => report.actions.push(action),
                Err(e) => tracing::error!(
                    instrument = %instrument,
                    tick,
                    signal = %signal,
                    error = %e,
                    "Failed to handle position signal"
                ),
            }
        }
    }

    async fn dispatch(
        &self,
        signal: PositionSignal,
        held: Held<'_>,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<MonitorAction, EngineError> {
        // An earlier signal in this tick, or an entry made meanwhile, may have
        // closed or replaced the position
        let Some(position) = self.ledger.position().filter(|p| p.id == held.id) else {
            return Ok(action(signal, ActionKind::Skipped, None));
        };

        match signal {
            PositionSignal::StopLoss => self.full_exit(signal, held, price, ExitReason::StopLoss),
            PositionSignal::TrailingStop => {
                self.full_exit(signal, held, price, ExitReason::TrailingStop)
            }
            PositionSignal::PartialTakeProfit => {
                if position.partial_profit_taken {
                    return Ok(action(signal, ActionKind::Skipped, None));
                }
                let ratio = self.ledger.config().partial_take_profit_ratio;
                self.partial_exit(signal, held, price, ratio)
            }
            PositionSignal::TargetReached => self.on_target_reached(held, price, now).await,
        }
    }

    fn full_exit(
        &self,
        signal: PositionSignal,
        held: Held<'_>,
        price: f64,
        reason: ExitReason,
    ) -> Result<MonitorAction, EngineError> {
        let summary = self.ledger.exit_if(held.id, price, reason, 1.0)?;
        Ok(settled(signal, ActionKind::FullExit, held, summary))
    }

    fn partial_exit(
        &self,
        signal: PositionSignal,
        held: Held<'_>,
        price: f64,
        ratio: f64,
    ) -> Result<MonitorAction, EngineError> {
        let summary = self
            .ledger
            .exit_if(held.id, price, ExitReason::PartialTakeProfit, ratio)?;
        Ok(settled(signal, ActionKind::PartialExit, held, summary))
    }

    async fn on_target_reached(
        &self,
        held: Held<'_>,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<MonitorAction, EngineError> {
        let instrument = held.instrument;
        let signal = PositionSignal::TargetReached;
        let key = (instrument.to_string(), signal);
        let cooldown = chrono::Duration::seconds(self.config.analysis_cooldown_secs);

        if let Some(last) = self.state().analysis_cooldowns.get(&key) {
            if now - *last < cooldown {
                tracing::debug!(instrument = %instrument, "Target analysis cooling down");
                return Ok(action(signal, ActionKind::CoolingDown, None));
            }
        }

        let request = DecisionRequest {
            instrument: instrument.to_string(),
            current_price: price,
            trigger: Some(signal),
            position: self.ledger.position_summary_at(price).ok(),
            recent_signals: self
                .signals
                .as_ref()
                .map(|engine| engine.recent_signals(instrument))
                .unwrap_or_default(),
            analysis_periods: self.config.analysis_periods,
            requested_at: now,
        };

        let timeout = Duration::from_secs(self.config.decision_timeout_secs);
        let outcome = match tokio::time::timeout(timeout, self.decision.recommend(&request)).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::unavailable(
                self.decision.name(),
                format!("no answer within {}s", self.config.decision_timeout_secs),
            )),
        };

        self.state().analysis_cooldowns.insert(key, Utc::now());

        match outcome {
            Ok(decision) => {
                tracing::info!(
                    instrument = %instrument,
                    recommendation = ?decision.recommendation,
                    confidence = decision.confidence,
                    "Target reached, decision received"
                );
                if decision.recommendation == Recommendation::Sell
                    || decision.confidence < self.config.min_confidence
                {
                    self.full_exit(signal, held, price, ExitReason::TargetReached)
                } else if decision.recommendation == Recommendation::Hold {
                    self.partial_exit(signal, held, price, self.config.partial_exit_ratio)
                } else {
                    Ok(action(signal, ActionKind::Held, None))
                }
            }
            Err(e) => {
                tracing::warn!(
                    instrument = %instrument,
                    error = %e,
                    "Decision unavailable at target, taking partial profit"
                );
                self.partial_exit(signal, held, price, self.config.partial_exit_ratio)
            }
        }
    }

    fn log_status(&self, tick: u64) {
        let status = self.ledger.portfolio_status();
        tracing::info!(
            tick,
            balance = status.balance,
            total_value = status.total_value,
            unrealized_pnl = status.unrealized_pnl,
            has_position = status.position.is_some(),
            signals_detected = self.signals_detected.load(Ordering::Relaxed),
            "Monitor status"
        );
    }
}

/// The position a tick observed; exits only apply while it is still open
#[derive(Debug, Clone, Copy)]
struct Held<'a> {
    id: Uuid,
    instrument: &'a str,
}

/// `None` means the observed position was replaced before the exit landed
fn settled(
    signal: PositionSignal,
    kind: ActionKind,
    held: Held<'_>,
    summary: Option<TradeSummary>,
) -> MonitorAction {
    match summary {
        Some(summary) => action(signal, kind, Some(summary)),
        None => {
            tracing::info!(
                instrument = %held.instrument,
                signal = %signal,
                "Position replaced during evaluation, exit skipped"
            );
            action(signal, ActionKind::Skipped, None)
        }
    }
}

fn action(signal: PositionSignal, kind: ActionKind, summary: Option<TradeSummary>) -> MonitorAction {
    MonitorAction {
        signal,
        kind,
        summary,
    }
}
