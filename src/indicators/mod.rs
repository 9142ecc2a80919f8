// Technical indicators module
// Implements MA, RSI, MACD, Bollinger bands and CCI as aligned series

pub mod bollinger;
pub mod cci;
pub mod macd;
pub mod moving_average;
pub mod rsi;
pub mod series;

pub use bollinger::{calculate_bollinger, BollingerBands};
pub use cci::calculate_cci;
pub use macd::{calculate_macd, MacdSeries};
pub use moving_average::{calculate_ema, calculate_sma, ema_series, sma_series};
pub use rsi::{calculate_rsi, rsi_series};
pub use series::{IndicatorPeriods, IndicatorSeries};
