use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::indicators::series::{latest, recent_defined};
use crate::indicators::{IndicatorPeriods, IndicatorSeries};
use crate::models::Candle;

/// Kind of discrete alert produced by the detectors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    GoldenCross,
    DeadCross,
    MacdBullishCross,
    MacdBearishCross,
    RsiOversoldReversal,
    RsiOverboughtReversal,
    BbUpwardBreakout,
    BbDownwardBreakout,
    VolumePriceSurgeUp,
    VolumePriceSurgeDown,
    CciOversoldReversal,
    CciOverboughtReversal,
    MultiIndicatorBullish,
    MultiIndicatorBearish,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::GoldenCross => "GOLDEN_CROSS",
            SignalType::DeadCross => "DEAD_CROSS",
            SignalType::MacdBullishCross => "MACD_BULLISH_CROSS",
            SignalType::MacdBearishCross => "MACD_BEARISH_CROSS",
            SignalType::RsiOversoldReversal => "RSI_OVERSOLD_REVERSAL",
            SignalType::RsiOverboughtReversal => "RSI_OVERBOUGHT_REVERSAL",
            SignalType::BbUpwardBreakout => "BB_UPWARD_BREAKOUT",
            SignalType::BbDownwardBreakout => "BB_DOWNWARD_BREAKOUT",
            SignalType::VolumePriceSurgeUp => "VOLUME_PRICE_SURGE_UP",
            SignalType::VolumePriceSurgeDown => "VOLUME_PRICE_SURGE_DOWN",
            SignalType::CciOversoldReversal => "CCI_OVERSOLD_REVERSAL",
            SignalType::CciOverboughtReversal => "CCI_OVERBOUGHT_REVERSAL",
            SignalType::MultiIndicatorBullish => "MULTI_INDICATOR_BULLISH",
            SignalType::MultiIndicatorBearish => "MULTI_INDICATOR_BEARISH",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strength tier, ordered weakest to strongest
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStrength {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl SignalStrength {
    pub fn score(&self) -> u32 {
        match self {
            SignalStrength::Low => 1,
            SignalStrength::Medium => 2,
            SignalStrength::High => 3,
            SignalStrength::VeryHigh => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalDirection {
    Buy,
    Sell,
}

/// Ephemeral alert; never persisted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeSignal {
    pub instrument: String,
    pub signal_type: SignalType,
    pub strength: SignalStrength,
    pub direction: SignalDirection,
    pub value: f64,
    pub description: String,
    pub priority: u8,
    pub detected_at: DateTime<Utc>,
}

impl TradeSignal {
    /// Ranking key: priority × strength score
    pub fn rank(&self) -> u32 {
        self.priority as u32 * self.strength.score()
    }
}

/// Configuration for signal generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub fast_ma_period: usize,
    pub slow_ma_period: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_std_dev: f64,
    pub cci_period: usize,
    pub rsi_oversold: f64,   // reversal zone, e.g. 35
    pub rsi_overbought: f64, // reversal zone, e.g. 65
    pub cci_extreme: f64,    // ±80
    pub cci_strong: f64,     // ±120 for High
    pub band_expansion: f64, // current width vs recent average width
    pub volume_multiplier: f64,
    pub volume_lookback: usize,
    pub surge_price_change_pct: f64,
    pub consensus_min: usize,
    pub cooldown_minutes: i64,
    pub max_signals: usize,
    pub min_strength: SignalStrength,
    pub window: usize,      // candles requested per detection
    pub min_candles: usize, // below this nothing is detected
    pub candle_interval_secs: Option<u64>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            fast_ma_period: 20,
            slow_ma_period: 50,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger_period: 20,
            bollinger_std_dev: 2.0,
            cci_period: 20,
            rsi_oversold: 35.0,
            rsi_overbought: 65.0,
            cci_extreme: 80.0,
            cci_strong: 120.0,
            band_expansion: 1.2,
            volume_multiplier: 2.5,
            volume_lookback: 20,
            surge_price_change_pct: 2.0,
            consensus_min: 3,
            cooldown_minutes: 30,
            max_signals: 3,
            min_strength: SignalStrength::Medium,
            window: 200,
            min_candles: 100,
            candle_interval_secs: None,
        }
    }
}

impl SignalConfig {
    pub fn periods(&self) -> IndicatorPeriods {
        IndicatorPeriods {
            fast_ma: self.fast_ma_period,
            slow_ma: self.slow_ma_period,
            rsi: self.rsi_period,
            macd_fast: self.macd_fast,
            macd_slow: self.macd_slow,
            macd_signal: self.macd_signal,
            bollinger: self.bollinger_period,
            bollinger_std_dev: self.bollinger_std_dev,
            cci: self.cci_period,
        }
    }
}

/// Validate that candles are time-ordered and, when an interval is given, free of gaps
///
/// # Tolerance
/// Allows up to 1.5x the expected interval (e.g., 7.5 min for 5 min candles)
pub fn validate_candle_uniformity(
    candles: &[Candle],
    expected_interval_secs: Option<u64>,
) -> anyhow::Result<()> {
    for window in candles.windows(2) {
        let time_diff = (window[1].timestamp - window[0].timestamp).num_seconds();

        if time_diff < 0 {
            anyhow::bail!("Candles are not sorted by timestamp");
        }

        if let Some(expected) = expected_interval_secs {
            let max_gap_secs = expected + (expected / 2);
            if time_diff as u64 > max_gap_secs {
                anyhow::bail!(
                    "Data gap detected: {}s between candles (expected ~{}s, max allowed {}s). Gap from {} to {}",
                    time_diff,
                    expected,
                    max_gap_secs,
                    window[0].timestamp.format("%H:%M:%S"),
                    window[1].timestamp.format("%H:%M:%S")
                );
            }
        }
    }

    Ok(())
}

/// Run every detector over one indicator bundle
pub fn detect_all(
    instrument: &str,
    series: &IndicatorSeries,
    config: &SignalConfig,
    now: DateTime<Utc>,
) -> Vec<TradeSignal> {
    [
        detect_ma_crossover(instrument, series, now),
        detect_macd_crossover(instrument, series, now),
        detect_rsi_reversal(instrument, series, config, now),
        detect_bollinger_breakout(instrument, series, config, now),
        detect_volume_price_surge(instrument, series, config, now),
        detect_cci_reversal(instrument, series, config, now),
        detect_consensus(instrument, series, config, now),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Sign flip of (fast - slow) between the last two samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossover {
    pub direction: SignalDirection,
    pub fast: f64,
    pub slow: f64,
    pub gap: f64, // |fast - slow| after the cross
}

pub fn detect_crossover(fast: &[Option<f64>], slow: &[Option<f64>]) -> Option<Crossover> {
    let n = fast.len().min(slow.len());
    if n < 2 {
        return None;
    }

    let prev_diff = fast[n - 2]? - slow[n - 2]?;
    let (curr_fast, curr_slow) = (fast[n - 1]?, slow[n - 1]?);
    let curr_diff = curr_fast - curr_slow;

    let direction = if prev_diff <= 0.0 && curr_diff > 0.0 {
        SignalDirection::Buy
    } else if prev_diff >= 0.0 && curr_diff < 0.0 {
        SignalDirection::Sell
    } else {
        return None;
    };

    Some(Crossover {
        direction,
        fast: curr_fast,
        slow: curr_slow,
        gap: curr_diff.abs(),
    })
}

pub fn detect_ma_crossover(
    instrument: &str,
    series: &IndicatorSeries,
    now: DateTime<Utc>,
) -> Option<TradeSignal> {
    let cross = detect_crossover(&series.ma_fast, &series.ma_slow)?;
    if cross.slow == 0.0 {
        return None;
    }

    let gap_pct = cross.gap / cross.slow.abs() * 100.0;
    let strength = if gap_pct > 1.0 {
        SignalStrength::VeryHigh
    } else if gap_pct > 0.5 {
        SignalStrength::High
    } else {
        SignalStrength::Medium
    };

    let (signal_type, label) = match cross.direction {
        SignalDirection::Buy => (SignalType::GoldenCross, "Golden cross"),
        SignalDirection::Sell => (SignalType::DeadCross, "Dead cross"),
    };

    Some(TradeSignal {
        instrument: instrument.to_string(),
        signal_type,
        strength,
        direction: cross.direction,
        value: gap_pct,
        description: format!(
            "{} (fast MA {:.4}, slow MA {:.4})",
            label, cross.fast, cross.slow
        ),
        priority: if strength == SignalStrength::VeryHigh { 4 } else { 3 },
        detected_at: now,
    })
}

pub fn detect_macd_crossover(
    instrument: &str,
    series: &IndicatorSeries,
    now: DateTime<Utc>,
) -> Option<TradeSignal> {
    let cross = detect_crossover(&series.macd, &series.macd_signal)?;

    // Signal line hovers around zero; normalize by price instead
    let price = series.last_close().filter(|p| *p > 0.0)?;
    let gap_pct = cross.gap / price * 100.0;
    let strength = if gap_pct > 0.1 {
        SignalStrength::High
    } else {
        SignalStrength::Medium
    };

    let (signal_type, label) = match cross.direction {
        SignalDirection::Buy => (SignalType::MacdBullishCross, "MACD bullish cross"),
        SignalDirection::Sell => (SignalType::MacdBearishCross, "MACD bearish cross"),
    };

    Some(TradeSignal {
        instrument: instrument.to_string(),
        signal_type,
        strength,
        direction: cross.direction,
        value: cross.gap,
        description: format!("{} ({:.4} vs {:.4})", label, cross.fast, cross.slow),
        priority: if strength == SignalStrength::High { 3 } else { 2 },
        detected_at: now,
    })
}

/// Oscillator beyond an extremity and turning back toward center
///
/// Compares the current value against the mean of the three prior samples.
fn detect_reversal(series: &[Option<f64>], low: f64, high: f64) -> Option<(SignalDirection, f64)> {
    let recent = recent_defined(series, 10);
    if recent.len() < 4 {
        return None;
    }

    let current = recent[recent.len() - 1];
    let prior = &recent[recent.len() - 4..recent.len() - 1];
    let prior_avg = prior.iter().sum::<f64>() / prior.len() as f64;

    if current <= low && current > prior_avg {
        Some((SignalDirection::Buy, current))
    } else if current >= high && current < prior_avg {
        Some((SignalDirection::Sell, current))
    } else {
        None
    }
}

pub fn detect_rsi_reversal(
    instrument: &str,
    series: &IndicatorSeries,
    config: &SignalConfig,
    now: DateTime<Utc>,
) -> Option<TradeSignal> {
    let (direction, rsi) = detect_reversal(&series.rsi, config.rsi_oversold, config.rsi_overbought)?;

    let (signal_type, strength, description) = match direction {
        SignalDirection::Buy => {
            let strength = if rsi <= 25.0 {
                SignalStrength::VeryHigh
            } else if rsi <= 30.0 {
                SignalStrength::High
            } else {
                SignalStrength::Medium
            };
            (
                SignalType::RsiOversoldReversal,
                strength,
                format!("RSI oversold reversal ({:.1} rising)", rsi),
            )
        }
        SignalDirection::Sell => {
            let strength = if rsi >= 75.0 {
                SignalStrength::VeryHigh
            } else if rsi >= 70.0 {
                SignalStrength::High
            } else {
                SignalStrength::Medium
            };
            (
                SignalType::RsiOverboughtReversal,
                strength,
                format!("RSI overbought reversal ({:.1} falling)", rsi),
            )
        }
    };

    Some(TradeSignal {
        instrument: instrument.to_string(),
        signal_type,
        strength,
        direction,
        value: rsi,
        description,
        priority: if strength == SignalStrength::VeryHigh { 4 } else { 3 },
        detected_at: now,
    })
}

pub fn detect_cci_reversal(
    instrument: &str,
    series: &IndicatorSeries,
    config: &SignalConfig,
    now: DateTime<Utc>,
) -> Option<TradeSignal> {
    let (direction, cci) = detect_reversal(&series.cci, -config.cci_extreme, config.cci_extreme)?;

    let strength = if cci.abs() >= config.cci_strong {
        SignalStrength::High
    } else {
        SignalStrength::Medium
    };
    let (signal_type, label) = match direction {
        SignalDirection::Buy => (SignalType::CciOversoldReversal, "CCI oversold reversal"),
        SignalDirection::Sell => (SignalType::CciOverboughtReversal, "CCI overbought reversal"),
    };

    Some(TradeSignal {
        instrument: instrument.to_string(),
        signal_type,
        strength,
        direction,
        value: cci,
        description: format!("{} ({:.1})", label, cci),
        priority: if strength == SignalStrength::High { 3 } else { 2 },
        detected_at: now,
    })
}

fn band_width_pct(upper: f64, lower: f64, middle: f64) -> Option<f64> {
    if middle == 0.0 {
        return None;
    }
    Some((upper - lower) / middle * 100.0)
}

pub fn detect_bollinger_breakout(
    instrument: &str,
    series: &IndicatorSeries,
    config: &SignalConfig,
    now: DateTime<Utc>,
) -> Option<TradeSignal> {
    let n = series.len();
    if n < 20 {
        return None;
    }

    // Widths of the last 10 bars; the first 9 form the baseline
    let mut widths = Vec::with_capacity(10);
    for i in n - 10..n {
        let width = band_width_pct(
            series.bb_upper[i]?,
            series.bb_lower[i]?,
            series.bb_middle[i]?,
        )?;
        widths.push(width);
    }

    let current_width = widths[9];
    let avg_width = widths[..9].iter().sum::<f64>() / 9.0;
    if current_width <= avg_width * config.band_expansion {
        return None;
    }

    let price = series.closes[n - 1];
    let prev_upper = series.bb_upper[n - 2]?;
    let prev_lower = series.bb_lower[n - 2]?;

    let (signal_type, direction, value, description) = if price > prev_upper {
        (
            SignalType::BbUpwardBreakout,
            SignalDirection::Buy,
            (price - prev_upper) / prev_upper * 100.0,
            format!("Bollinger upward breakout ({:.4} > {:.4})", price, prev_upper),
        )
    } else if price < prev_lower {
        (
            SignalType::BbDownwardBreakout,
            SignalDirection::Sell,
            (prev_lower - price) / prev_lower * 100.0,
            format!("Bollinger downward breakout ({:.4} < {:.4})", price, prev_lower),
        )
    } else {
        return None;
    };

    Some(TradeSignal {
        instrument: instrument.to_string(),
        signal_type,
        strength: SignalStrength::High,
        direction,
        value,
        description,
        priority: 3,
        detected_at: now,
    })
}

pub fn detect_volume_price_surge(
    instrument: &str,
    series: &IndicatorSeries,
    config: &SignalConfig,
    now: DateTime<Utc>,
) -> Option<TradeSignal> {
    let n = series.len();
    let lookback = config.volume_lookback;
    if lookback == 0 || n < lookback + 2 {
        return None;
    }

    let current_volume = series.volumes[n - 1];
    let avg_volume = series.volumes[n - 1 - lookback..n - 1].iter().sum::<f64>() / lookback as f64;
    if avg_volume <= 0.0 || current_volume <= avg_volume * config.volume_multiplier {
        return None;
    }

    let (price, prev_price) = (series.closes[n - 1], series.closes[n - 2]);
    if prev_price <= 0.0 {
        return None;
    }
    let change_pct = (price - prev_price) / prev_price * 100.0;
    if change_pct.abs() <= config.surge_price_change_pct {
        return None;
    }

    let strength = if change_pct.abs() > 5.0 {
        SignalStrength::VeryHigh
    } else {
        SignalStrength::High
    };
    let (signal_type, direction) = if change_pct > 0.0 {
        (SignalType::VolumePriceSurgeUp, SignalDirection::Buy)
    } else {
        (SignalType::VolumePriceSurgeDown, SignalDirection::Sell)
    };

    Some(TradeSignal {
        instrument: instrument.to_string(),
        signal_type,
        strength,
        direction,
        value: change_pct.abs(),
        description: format!(
            "Volume surge with price move ({:+.1}%, volume {:.1}x)",
            change_pct,
            current_volume / avg_volume
        ),
        priority: if strength == SignalStrength::VeryHigh { 4 } else { 3 },
        detected_at: now,
    })
}

/// Tally indicators leaning each way; `consensus_min` or more agreeing emits a signal
pub fn detect_consensus(
    instrument: &str,
    series: &IndicatorSeries,
    config: &SignalConfig,
    now: DateTime<Utc>,
) -> Option<TradeSignal> {
    let mut bullish = 0usize;
    let mut bearish = 0usize;

    if let Some(rsi) = latest(&series.rsi) {
        if rsi < 40.0 {
            bullish += 1;
        } else if rsi > 60.0 {
            bearish += 1;
        }
    }

    if let (Some(macd), Some(signal)) = (latest(&series.macd), latest(&series.macd_signal)) {
        if macd > signal {
            bullish += 1;
        } else {
            bearish += 1;
        }
    }

    if let (Some(fast), Some(slow)) = (latest(&series.ma_fast), latest(&series.ma_slow)) {
        if fast > slow {
            bullish += 1;
        } else {
            bearish += 1;
        }
    }

    if let Some(cci) = latest(&series.cci) {
        if cci < -50.0 {
            bullish += 1;
        } else if cci > 50.0 {
            bearish += 1;
        }
    }

    let (signal_type, direction, count) = if bullish >= config.consensus_min {
        (SignalType::MultiIndicatorBullish, SignalDirection::Buy, bullish)
    } else if bearish >= config.consensus_min {
        (SignalType::MultiIndicatorBearish, SignalDirection::Sell, bearish)
    } else {
        return None;
    };

    let strength = if count >= 4 {
        SignalStrength::VeryHigh
    } else {
        SignalStrength::High
    };

    Some(TradeSignal {
        instrument: instrument.to_string(),
        signal_type,
        strength,
        direction,
        value: count as f64,
        description: format!("{} indicators agree", count),
        priority: if strength == SignalStrength::VeryHigh { 4 } else { 3 },
        detected_at: now,
    })
}
