// Signal detection over indicator series
pub mod engine;
pub mod signals;

pub use engine::{CandleSource, SignalEngine};
pub use signals::{
    SignalConfig, SignalDirection, SignalStrength, SignalType, TradeSignal,
};
