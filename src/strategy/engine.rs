use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::signals::{detect_all, validate_candle_uniformity, SignalConfig, SignalType, TradeSignal};
use crate::execution::CandleBuffer;
use crate::indicators::IndicatorSeries;
use crate::models::Candle;

/// Time-ordered candle windows for the signal engine
pub trait CandleSource: Send + Sync {
    /// Up to `n` most recent candles, oldest first
    fn recent_candles(&self, instrument: &str, n: usize) -> Vec<Candle>;
}

impl CandleSource for CandleBuffer {
    fn recent_candles(&self, instrument: &str, n: usize) -> Vec<Candle> {
        self.get_recent_candles(instrument, n)
    }
}

#[derive(Default)]
struct EngineState {
    last_fired: HashMap<(String, SignalType), DateTime<Utc>>,
    recent: HashMap<String, Vec<TradeSignal>>,
}

/// Turns indicator series into a short, ranked list of trade signals
///
/// Pure apart from its cooldown map: a signal type fired for an instrument is
/// suppressed until `cooldown_minutes` have passed.
pub struct SignalEngine {
    config: SignalConfig,
    source: Arc<dyn CandleSource>,
    state: Mutex<EngineState>,
}

impl SignalEngine {
    pub fn new(config: SignalConfig, source: Arc<dyn CandleSource>) -> Self {
        Self {
            config,
            source,
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Detect signals on the latest candle window, most important first
    pub fn detect(&self, instrument: &str) -> Vec<TradeSignal> {
        let candles = self.source.recent_candles(instrument, self.config.window);
        self.detect_at(instrument, &candles, Utc::now())
    }

    /// Detect signals on an explicit window as of `now`
    pub fn detect_at(
        &self,
        instrument: &str,
        candles: &[Candle],
        now: DateTime<Utc>,
    ) -> Vec<TradeSignal> {
        if candles.len() < self.config.min_candles {
            tracing::debug!(
                instrument = %instrument,
                candles = candles.len(),
                required = self.config.min_candles,
                "Not enough candles for signal detection"
            );
            return Vec::new();
        }

        if let Err(e) = validate_candle_uniformity(candles, self.config.candle_interval_secs) {
            tracing::warn!(instrument = %instrument, error = %e, "Skipping signal detection");
            return Vec::new();
        }

        let series = IndicatorSeries::from_candles(candles, &self.config.periods());
        let detected = detect_all(instrument, &series, &self.config, now);
        let cooldown = Duration::minutes(self.config.cooldown_minutes);

        let mut state = self.state();

        let mut signals: Vec<TradeSignal> = detected
            .into_iter()
            .filter(|s| s.strength >= self.config.min_strength)
            .filter(|s| {
                let key = (instrument.to_string(), s.signal_type);
                match state.last_fired.get(&key) {
                    Some(fired) if now - *fired < cooldown => {
                        tracing::debug!(
                            instrument = %instrument,
                            signal = %s.signal_type,
                            "Signal suppressed by cooldown"
                        );
                        false
                    }
                    _ => true,
                }
            })
            .collect();

        signals.sort_by(|a, b| {
            b.rank()
                .cmp(&a.rank())
                .then_with(|| b.priority.cmp(&a.priority))
        });
        signals.truncate(self.config.max_signals);

        for signal in &signals {
            state
                .last_fired
                .insert((instrument.to_string(), signal.signal_type), now);

            tracing::info!(
                instrument = %instrument,
                signal = %signal.signal_type,
                strength = ?signal.strength,
                direction = ?signal.direction,
                priority = signal.priority,
                "{}",
                signal.description
            );
        }

        if !signals.is_empty() {
            state.recent.insert(instrument.to_string(), signals.clone());
        }

        signals
    }

    /// Last non-empty batch returned for an instrument
    pub fn recent_signals(&self, instrument: &str) -> Vec<TradeSignal> {
        self.state()
            .recent
            .get(instrument)
            .cloned()
            .unwrap_or_default()
    }

    /// Forget cooldowns and history for an instrument
    pub fn clear(&self, instrument: &str) {
        let mut state = self.state();
        state.last_fired.retain(|(i, _), _| i != instrument);
        state.recent.remove(instrument);
    }
}
