use crate::models::Candle;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::str::FromStr;

/// Market scenario types for synthetic data generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady uptrend with noise (+2% daily average)
    Uptrend,
    /// Steady downtrend with noise (-2% daily average)
    Downtrend,
    /// Mean-reverting chop (±1% around the mean)
    Sideways,
    /// Large swings (±5% per candle)
    Volatile,
    /// Quiet base, a volume-backed rally, then a sharp reversal
    PumpAndDump,
}

impl MarketScenario {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketScenario::Uptrend => "uptrend",
            MarketScenario::Downtrend => "downtrend",
            MarketScenario::Sideways => "sideways",
            MarketScenario::Volatile => "volatile",
            MarketScenario::PumpAndDump => "pump-and-dump",
        }
    }
}

impl fmt::Display for MarketScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MarketScenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uptrend" => Ok(MarketScenario::Uptrend),
            "downtrend" => Ok(MarketScenario::Downtrend),
            "sideways" => Ok(MarketScenario::Sideways),
            "volatile" => Ok(MarketScenario::Volatile),
            "pump-and-dump" | "pump_and_dump" | "pump" => Ok(MarketScenario::PumpAndDump),
            other => Err(format!(
                "unknown scenario '{}' (expected uptrend, downtrend, sideways, volatile or pump-and-dump)",
                other
            )),
        }
    }
}

/// Generates reproducible price data for paper sessions
pub struct SyntheticDataGenerator {
    rng: StdRng,
    instrument: String,
    base_price: f64,
    base_volume: f64,
}

impl SyntheticDataGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(instrument: impl Into<String>, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            instrument: instrument.into(),
            base_price: 150.0,
            base_volume: 1_000_000.0,
        }
    }

    pub fn with_base_price(mut self, base_price: f64) -> Self {
        self.base_price = base_price;
        self
    }

    pub fn base_price(&self) -> f64 {
        self.base_price
    }

    /// Generate evenly spaced candles for a scenario
    ///
    /// # Arguments
    /// * `scenario` - The market scenario to simulate
    /// * `num_candles` - Number of candles to generate
    /// * `interval_secs` - Seconds between candle timestamps
    /// * `start_time` - Timestamp of the first candle
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        num_candles: usize,
        interval_secs: i64,
        start_time: DateTime<Utc>,
    ) -> Vec<Candle> {
        let mut candles = Vec::with_capacity(num_candles);
        let mut price = self.base_price;
        let per_day = 86_400.0 / interval_secs.max(1) as f64;

        for i in 0..num_candles {
            let timestamp = start_time + Duration::seconds(i as i64 * interval_secs);
            let mut volume_boost = 1.0;

            price = match scenario {
                MarketScenario::Uptrend => {
                    let drift = price * 0.02 / per_day;
                    price + drift + price * self.rng.gen_range(-0.001..0.001)
                }
                MarketScenario::Downtrend => {
                    let drift = price * -0.02 / per_day;
                    price + drift + price * self.rng.gen_range(-0.001..0.001)
                }
                MarketScenario::Sideways => {
                    let reversion = (self.base_price - price) * 0.1;
                    price + reversion + price * self.rng.gen_range(-0.01..0.01)
                }
                MarketScenario::Volatile => {
                    let next = price + price * self.rng.gen_range(-0.05..0.05);
                    next.max(self.base_price * 0.5)
                }
                MarketScenario::PumpAndDump => {
                    let (next, boost) = self.pump_and_dump_step(price, i, num_candles);
                    volume_boost = boost;
                    next
                }
            };

            candles.push(self.create_candle(price, timestamp, volume_boost));
        }

        candles
    }

    /// Flat first half, a 2.5% per-candle rally on heavy volume, then an
    /// equally sharp dump
    fn pump_and_dump_step(&mut self, price: f64, i: usize, num_candles: usize) -> (f64, f64) {
        let pump_start = num_candles / 2;
        let pump_len = (num_candles / 20).max(3);
        let dump_start = pump_start + pump_len;

        if i < pump_start {
            let reversion = (self.base_price - price) * 0.1;
            (price + reversion + price * self.rng.gen_range(-0.002..0.002), 1.0)
        } else if i < dump_start {
            (price * 1.025, 5.0)
        } else if i < dump_start + pump_len {
            (price * 0.975, 4.0)
        } else {
            (price + price * self.rng.gen_range(-0.003..0.003), 1.0)
        }
    }

    fn create_candle(&mut self, price: f64, timestamp: DateTime<Utc>, volume_boost: f64) -> Candle {
        let noise_pct = 0.002; // ±0.2% intrabar movement

        let high = price * (1.0 + self.rng.gen_range(0.0..noise_pct));
        let low = price * (1.0 - self.rng.gen_range(0.0..noise_pct));

        let open_raw = price * (1.0 + self.rng.gen_range(-noise_pct..noise_pct));
        let open = open_raw.clamp(low, high);

        let volume = self.base_volume * volume_boost * self.rng.gen_range(0.7..1.3);

        Candle {
            instrument: self.instrument.clone(),
            timestamp,
            open,
            high,
            low,
            close: price,
            volume,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate(scenario: MarketScenario, n: usize) -> Vec<Candle> {
        SyntheticDataGenerator::new("SOL", 42).generate(scenario, n, 300, Utc::now())
    }

    #[test]
    fn test_generate_uptrend() {
        let candles = generate(MarketScenario::Uptrend, 500);
        assert_eq!(candles.len(), 500);

        let first_price = candles.first().unwrap().close;
        let last_price = candles.last().unwrap().close;
        assert!(
            last_price > first_price,
            "Uptrend should end higher: {} -> {}",
            first_price,
            last_price
        );
    }

    #[test]
    fn test_generate_downtrend() {
        let candles = generate(MarketScenario::Downtrend, 500);

        let first_price = candles.first().unwrap().close;
        let last_price = candles.last().unwrap().close;
        assert!(
            last_price < first_price,
            "Downtrend should end lower: {} -> {}",
            first_price,
            last_price
        );
    }

    #[test]
    fn test_generate_sideways() {
        let candles = generate(MarketScenario::Sideways, 500);

        for candle in &candles {
            assert!(
                candle.close > 135.0 && candle.close < 165.0,
                "Sideways should stay near base: {}",
                candle.close
            );
        }
    }

    #[test]
    fn test_pump_and_dump_has_volume_spike() {
        let candles = generate(MarketScenario::PumpAndDump, 200);
        let peak = candles
            .iter()
            .map(|c| c.close)
            .fold(f64::MIN, f64::max);
        assert!(peak > 150.0 * 1.15, "pump should rally well above base: {}", peak);

        let spike = &candles[100];
        assert!(spike.volume > 2.5 * 1_000_000.0);
        assert!(candles.last().unwrap().close < peak * 0.9);
    }

    #[test]
    fn test_same_seed_is_reproducible() {
        let start = Utc::now();
        let a = SyntheticDataGenerator::new("SOL", 7).generate(MarketScenario::Volatile, 50, 60, start);
        let b = SyntheticDataGenerator::new("SOL", 7).generate(MarketScenario::Volatile, 50, 60, start);

        let closes = |c: &[Candle]| c.iter().map(|c| c.close).collect::<Vec<_>>();
        assert_eq!(closes(&a), closes(&b));
    }

    #[test]
    fn test_timestamps_are_evenly_spaced() {
        let candles = generate(MarketScenario::Uptrend, 100);

        for pair in candles.windows(2) {
            assert_eq!((pair[1].timestamp - pair[0].timestamp).num_seconds(), 300);
        }
        assert!(crate::strategy::signals::validate_candle_uniformity(&candles, Some(300)).is_ok());
    }

    #[test]
    fn test_ohlc_consistency() {
        let candles = generate(MarketScenario::Volatile, 100);

        for candle in &candles {
            assert!(candle.high >= candle.close, "High should be >= close");
            assert!(candle.high >= candle.open, "High should be >= open");
            assert!(candle.low <= candle.close, "Low should be <= close");
            assert!(candle.low <= candle.open, "Low should be <= open");
            assert_eq!(candle.instrument, "SOL");
        }
    }

    #[test]
    fn test_scenario_names_parse() {
        for scenario in [
            MarketScenario::Uptrend,
            MarketScenario::Downtrend,
            MarketScenario::Sideways,
            MarketScenario::Volatile,
            MarketScenario::PumpAndDump,
        ] {
            assert_eq!(scenario.to_string().parse::<MarketScenario>(), Ok(scenario));
        }
        assert!("crash".parse::<MarketScenario>().is_err());
    }
}
