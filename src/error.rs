use thiserror::Error;

use crate::models::Side;

/// Failures returned by the ledger, monitor and decision sources.
///
/// Every ledger failure leaves balance, position and journal untouched.
/// Concurrent callers never see a conflict error: they wait on the ledger lock.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("insufficient balance: {balance:.2} < minimum {minimum:.2}")]
    InsufficientBalance { balance: f64, minimum: f64 },

    #[error("no open position")]
    NoOpenPosition,

    #[error("{side} position on {instrument} already open")]
    DuplicatePosition { instrument: String, side: Side },

    #[error("invalid order: {reason}")]
    InvalidOrder { reason: String },

    #[error("{name} unavailable: {reason}")]
    UpstreamUnavailable { name: String, reason: String },
}

impl EngineError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        EngineError::InvalidOrder {
            reason: reason.into(),
        }
    }

    pub fn unavailable(name: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::UpstreamUnavailable {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
