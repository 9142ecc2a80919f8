use anyhow::Context;
use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use super::{DecisionConfig, DecisionRequest, DecisionSource};
use crate::error::EngineError;
use crate::models::Decision;

const SOURCE_NAME: &str = "http decision source";

// Type alias for the rate limiter to simplify signatures
type DecisionRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Decision source backed by a JSON-over-HTTP endpoint
///
/// POSTs the `DecisionRequest` and expects
/// `{"recommendation": "BUY|SELL|HOLD", "confidence": 0..1, "reasoning": ...}`.
/// Calls beyond the configured rate are refused immediately rather than queued.
#[derive(Clone)]
pub struct HttpDecisionSource {
    client: Client,
    url: String,
    api_key: Option<String>,
    rate_limiter: Arc<DecisionRateLimiter>,
}

impl HttpDecisionSource {
    pub fn new(url: impl Into<String>, config: &DecisionConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let rpm = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            url: url.into(),
            api_key: config.api_key.clone(),
            rate_limiter,
        })
    }
}

#[async_trait]
impl DecisionSource for HttpDecisionSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn recommend(&self, request: &DecisionRequest) -> Result<Decision, EngineError> {
        if self.rate_limiter.check().is_err() {
            return Err(EngineError::unavailable(SOURCE_NAME, "rate limit reached"));
        }

        let mut http_request = self.client.post(&self.url).json(request);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request
            .send()
            .await
            .map_err(|e| EngineError::unavailable(SOURCE_NAME, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EngineError::unavailable(
                SOURCE_NAME,
                format!("HTTP {}: {}", status, body),
            ));
        }

        let decision: Decision = response
            .json()
            .await
            .map_err(|e| EngineError::unavailable(SOURCE_NAME, format!("bad response: {}", e)))?;

        tracing::debug!(
            instrument = %request.instrument,
            recommendation = ?decision.recommendation,
            confidence = decision.confidence,
            "Received decision"
        );

        Ok(Decision {
            confidence: decision.confidence.clamp(0.0, 1.0),
            ..decision
        })
    }
}
