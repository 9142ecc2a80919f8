use super::{calculate_bollinger, calculate_cci, calculate_macd, rsi_series, sma_series};
use crate::models::Candle;

/// Periods used when deriving indicator series from a candle window
#[derive(Debug, Clone, Copy)]
pub struct IndicatorPeriods {
    pub fast_ma: usize,
    pub slow_ma: usize,
    pub rsi: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger: usize,
    pub bollinger_std_dev: f64,
    pub cci: usize,
}

impl Default for IndicatorPeriods {
    fn default() -> Self {
        Self {
            fast_ma: 20,
            slow_ma: 50,
            rsi: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            bollinger: 20,
            bollinger_std_dev: 2.0,
            cci: 20,
        }
    }
}

/// Every indicator the signal detectors read, aligned index-for-index with the candles
#[derive(Debug, Clone, Default)]
pub struct IndicatorSeries {
    pub closes: Vec<f64>,
    pub volumes: Vec<f64>,
    pub ma_fast: Vec<Option<f64>>,
    pub ma_slow: Vec<Option<f64>>,
    pub rsi: Vec<Option<f64>>,
    pub macd: Vec<Option<f64>>,
    pub macd_signal: Vec<Option<f64>>,
    pub bb_upper: Vec<Option<f64>>,
    pub bb_middle: Vec<Option<f64>>,
    pub bb_lower: Vec<Option<f64>>,
    pub cci: Vec<Option<f64>>,
}

impl IndicatorSeries {
    pub fn from_candles(candles: &[Candle], periods: &IndicatorPeriods) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        let macd = calculate_macd(
            &closes,
            periods.macd_fast,
            periods.macd_slow,
            periods.macd_signal,
        );
        let bands = calculate_bollinger(&closes, periods.bollinger, periods.bollinger_std_dev);

        Self {
            ma_fast: sma_series(&closes, periods.fast_ma),
            ma_slow: sma_series(&closes, periods.slow_ma),
            rsi: rsi_series(&closes, periods.rsi),
            macd: macd.macd,
            macd_signal: macd.signal,
            bb_upper: bands.upper,
            bb_middle: bands.middle,
            bb_lower: bands.lower,
            cci: calculate_cci(candles, periods.cci),
            closes,
            volumes,
        }
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.closes.last().copied()
    }
}

/// Most recent defined value of a series
pub fn latest(series: &[Option<f64>]) -> Option<f64> {
    series.last().copied().flatten()
}

/// Defined values among the last `n` samples, oldest first
pub fn recent_defined(series: &[Option<f64>], n: usize) -> Vec<f64> {
    let start = series.len().saturating_sub(n);
    series[start..].iter().filter_map(|v| *v).collect()
}
