use super::CandleBuffer;
use crate::models::PriceSnapshot;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Supplies the latest known price for an instrument
///
/// `None` means "no data"; callers never retry synchronously.
pub trait PriceOracle: Send + Sync {
    fn latest_price(&self, instrument: &str) -> Option<PriceSnapshot>;
}

impl PriceOracle for CandleBuffer {
    fn latest_price(&self, instrument: &str) -> Option<PriceSnapshot> {
        self.latest(instrument).map(|c| PriceSnapshot {
            instrument: c.instrument,
            price: c.close,
            as_of: c.timestamp,
        })
    }
}

/// Settable price map an external feed writes into
///
/// Cheap to clone; clones share the same board.
#[derive(Clone, Default)]
pub struct PriceBoard {
    prices: Arc<RwLock<HashMap<String, PriceSnapshot>>>,
}

impl PriceBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, instrument: &str, price: f64) {
        self.set_price_at(instrument, price, Utc::now());
    }

    pub fn set_price_at(&self, instrument: &str, price: f64, as_of: DateTime<Utc>) {
        let snapshot = PriceSnapshot {
            instrument: instrument.to_string(),
            price,
            as_of,
        };
        self.prices
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(instrument.to_string(), snapshot);
    }
}

impl PriceOracle for PriceBoard {
    fn latest_price(&self, instrument: &str) -> Option<PriceSnapshot> {
        self.prices
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(instrument)
            .cloned()
    }
}
