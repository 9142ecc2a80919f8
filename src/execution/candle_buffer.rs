use crate::models::Candle;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Thread-safe in-memory buffer for candle data
///
/// Maintains a rolling window of candles per instrument. Written by the
/// market-data feed, read by the signal engine and the price oracle.
#[derive(Clone)]
pub struct CandleBuffer {
    data: Arc<RwLock<HashMap<String, VecDeque<Candle>>>>,
    max_candles: usize,
}

impl CandleBuffer {
    /// Create a new candle buffer
    ///
    /// # Arguments
    /// * `max_candles` - Maximum number of candles to keep per instrument
    pub fn new(max_candles: usize) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            max_candles,
        }
    }

    // Candle data stays usable after a panicking writer
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, VecDeque<Candle>>> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, VecDeque<Candle>>> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a candle; if the window is full the oldest one is dropped
    ///
    /// Candles older than the newest stored one are ignored so the window
    /// stays time-ordered. Returns whether the candle was stored.
    pub fn add_candle(&self, candle: Candle) -> bool {
        let mut data = self.write();
        let window = data.entry(candle.instrument.clone()).or_default();

        if let Some(last) = window.back() {
            if candle.timestamp < last.timestamp {
                return false;
            }
        }

        window.push_back(candle);
        while window.len() > self.max_candles {
            window.pop_front();
        }
        true
    }

    /// Get the N most recent candles for an instrument, oldest first
    pub fn get_recent_candles(&self, instrument: &str, n: usize) -> Vec<Candle> {
        let data = self.read();
        match data.get(instrument) {
            Some(deque) => deque.iter().skip(deque.len().saturating_sub(n)).cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn latest(&self, instrument: &str) -> Option<Candle> {
        self.read().get(instrument).and_then(|d| d.back().cloned())
    }

    pub fn candle_count(&self, instrument: &str) -> usize {
        self.read().get(instrument).map(|d| d.len()).unwrap_or(0)
    }
}
