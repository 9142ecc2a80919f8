// External directional recommendations
pub mod consensus;
pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::execution::{PositionSignal, PositionSummary};
use crate::models::Decision;
use crate::strategy::TradeSignal;

pub use consensus::SignalConsensusSource;
pub use http::HttpDecisionSource;

/// Context handed to a decision source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub instrument: String,
    pub current_price: f64,
    pub trigger: Option<PositionSignal>,
    pub position: Option<PositionSummary>,
    pub recent_signals: Vec<TradeSignal>,
    pub analysis_periods: usize, // candles of history the source should consider
    pub requested_at: DateTime<Utc>,
}

/// Black-box BUY/SELL/HOLD recommender
///
/// Implementations must not retry internally; callers bound each call with
/// their own timeout and treat failure as "no recommendation".
#[async_trait]
pub trait DecisionSource: Send + Sync {
    fn name(&self) -> &str;

    async fn recommend(&self, request: &DecisionRequest) -> Result<Decision, EngineError>;
}

/// Decision source settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// Endpoint for `HttpDecisionSource`; signal consensus is used when unset
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub requests_per_minute: u32,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            timeout_secs: 30,
            requests_per_minute: 6,
        }
    }
}
