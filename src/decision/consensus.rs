use async_trait::async_trait;

use super::{DecisionRequest, DecisionSource};
use crate::error::EngineError;
use crate::models::{Decision, Recommendation};
use crate::strategy::SignalDirection;

/// Offline decision source that votes the request's recent signals
///
/// Each signal votes for its direction with weight `rank()`. The winning
/// side's share of the total weight becomes the confidence; no signals or
/// a tie yields HOLD.
#[derive(Debug, Clone, Default)]
pub struct SignalConsensusSource;

impl SignalConsensusSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DecisionSource for SignalConsensusSource {
    fn name(&self) -> &str {
        "signal consensus"
    }

    async fn recommend(&self, request: &DecisionRequest) -> Result<Decision, EngineError> {
        let (mut buy, mut sell) = (0u32, 0u32);
        for signal in &request.recent_signals {
            match signal.direction {
                SignalDirection::Buy => buy += signal.rank(),
                SignalDirection::Sell => sell += signal.rank(),
            }
        }

        let total = buy + sell;
        let mut decision = if total == 0 || buy == sell {
            Decision::new(Recommendation::Hold, 0.5)
        } else if buy > sell {
            Decision::new(Recommendation::Buy, buy as f64 / total as f64)
        } else {
            Decision::new(Recommendation::Sell, sell as f64 / total as f64)
        };
        decision.reasoning = Some(format!(
            "{} signals, buy weight {}, sell weight {}",
            request.recent_signals.len(),
            buy,
            sell
        ));

        Ok(decision)
    }
}
