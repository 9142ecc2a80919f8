use serde::{Deserialize, Serialize};

use super::ledger::{EntryKind, EntryOrder, Ledger};
use super::position::{Position, TradeSummary};
use crate::error::EngineError;
use crate::models::{ExitReason, Side};

pub const MIN_LEVERAGE: f64 = 1.0;
pub const MAX_LEVERAGE: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "UPPERCASE")]
pub enum DecisionAction {
    Enter {
        side: Side,
        leverage: f64,
        #[serde(default)]
        target_price: Option<f64>,
        #[serde(default)]
        stop_price: Option<f64>,
    },
    Exit,
    Hold,
}

/// Externally produced trading decision for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeDecision {
    pub instrument: String,
    #[serde(flatten)]
    pub action: DecisionAction,
    /// Execution price; the oracle's latest price when absent
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Entered(Position),
    Flipped {
        closed: TradeSummary,
        position: Position,
    },
    Switched {
        closed: TradeSummary,
        position: Position,
    },
    Exited(TradeSummary),
    Held,
    Rejected(EngineError),
}

pub fn clamp_leverage(leverage: f64) -> f64 {
    if leverage.is_finite() {
        leverage.clamp(MIN_LEVERAGE, MAX_LEVERAGE)
    } else {
        MIN_LEVERAGE
    }
}

/// Applies trade decisions to the ledger
///
/// This is the request-driven path; it competes with the position monitor
/// for the ledger lock.
#[derive(Clone)]
pub struct Executor {
    ledger: Ledger,
}

impl Executor {
    pub fn new(ledger: Ledger) -> Self {
        Self { ledger }
    }

    pub fn apply(&self, decision: &TradeDecision) -> ExecutionOutcome {
        let outcome = match self.try_apply(decision) {
            Ok(outcome) => outcome,
            Err(e) => ExecutionOutcome::Rejected(e),
        };

        match &outcome {
            ExecutionOutcome::Rejected(e) => tracing::warn!(
                instrument = %decision.instrument,
                error = %e,
                "Decision rejected"
            ),
            ExecutionOutcome::Held => tracing::debug!(
                instrument = %decision.instrument,
                "Hold decision, nothing to do"
            ),
            _ => {}
        }

        outcome
    }

    fn try_apply(&self, decision: &TradeDecision) -> Result<ExecutionOutcome, EngineError> {
        match &decision.action {
            DecisionAction::Hold => Ok(ExecutionOutcome::Held),

            DecisionAction::Exit => {
                let position = self.ledger.position().ok_or(EngineError::NoOpenPosition)?;
                if position.instrument != decision.instrument {
                    return Err(EngineError::invalid(format!(
                        "exit for {} but open position is on {}",
                        decision.instrument, position.instrument
                    )));
                }
                let price = self.price_for(decision)?;
                // Re-checked under the write lock in case an entry switched meanwhile
                let summary = self.ledger.exit_instrument(
                    &decision.instrument,
                    price,
                    ExitReason::Decision,
                    1.0,
                )?;
                Ok(ExecutionOutcome::Exited(summary))
            }

            DecisionAction::Enter {
                side,
                leverage,
                target_price,
                stop_price,
            } => {
                let price = self.price_for(decision)?;
                let leverage = clamp_leverage(*leverage);
                let order = EntryOrder {
                    instrument: decision.instrument.clone(),
                    side: *side,
                    price,
                    leverage,
                    target_price: *target_price,
                    stop_price: *stop_price,
                };

                let entry = self.ledger.enter_position(&order)?;
                Ok(match (entry.kind, entry.closed) {
                    (EntryKind::Flipped, Some(closed)) => ExecutionOutcome::Flipped {
                        closed,
                        position: entry.position,
                    },
                    (EntryKind::Switched, Some(closed)) => ExecutionOutcome::Switched {
                        closed,
                        position: entry.position,
                    },
                    _ => ExecutionOutcome::Entered(entry.position),
                })
            }
        }
    }

    fn price_for(&self, decision: &TradeDecision) -> Result<f64, EngineError> {
        match decision.price {
            Some(price) => Ok(price),
            None => self.ledger.latest_price(&decision.instrument).ok_or_else(|| {
                EngineError::unavailable(
                    "price oracle",
                    format!("no price for {}", decision.instrument),
                )
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{LedgerConfig, PriceBoard};
    use std::sync::Arc;

    fn executor() -> (Executor, PriceBoard) {
        let board = PriceBoard::new();
        let ledger = Ledger::new(LedgerConfig::default(), Arc::new(board.clone()));
        (Executor::new(ledger), board)
    }

    fn enter(instrument: &str, side: Side, leverage: f64, price: f64) -> TradeDecision {
        TradeDecision {
            instrument: instrument.to_string(),
            action: DecisionAction::Enter {
                side,
                leverage,
                target_price: None,
                stop_price: None,
            },
            price: Some(price),
            reasoning: None,
        }
    }

    #[test]
    fn test_leverage_is_clamped() {
        assert_eq!(clamp_leverage(25.0), 10.0);
        assert_eq!(clamp_leverage(0.2), 1.0);
        assert_eq!(clamp_leverage(f64::NAN), 1.0);

        let (executor, _) = executor();
        match executor.apply(&enter("SOL", Side::Long, 50.0, 100.0)) {
            ExecutionOutcome::Entered(position) => assert_eq!(position.leverage, 10.0),
            other => panic!("expected entry, got {:?}", other),
        }
    }

    #[test]
    fn test_flip_and_switch_outcomes() {
        let (executor, board) = executor();
        executor.apply(&enter("SOL", Side::Long, 2.0, 100.0));

        assert!(matches!(
            executor.apply(&enter("SOL", Side::Short, 2.0, 101.0)),
            ExecutionOutcome::Flipped { .. }
        ));

        board.set_price("SOL", 99.0);
        match executor.apply(&enter("JUP", Side::Long, 3.0, 1.2)) {
            ExecutionOutcome::Switched { closed, position } => {
                assert_eq!(closed.instrument, "SOL");
                assert_eq!(closed.requested_exit_price, 99.0);
                assert_eq!(position.instrument, "JUP");
            }
            other => panic!("expected switch, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_entry_rejected() {
        let (executor, _) = executor();
        executor.apply(&enter("SOL", Side::Long, 2.0, 100.0));

        assert!(matches!(
            executor.apply(&enter("SOL", Side::Long, 2.0, 100.0)),
            ExecutionOutcome::Rejected(EngineError::DuplicatePosition { .. })
        ));
    }

    #[test]
    fn test_exit_uses_oracle_price() {
        let (executor, board) = executor();
        let exit = TradeDecision {
            instrument: "SOL".to_string(),
            action: DecisionAction::Exit,
            price: None,
            reasoning: Some("momentum fading".to_string()),
        };

        assert_eq!(
            executor.apply(&exit),
            ExecutionOutcome::Rejected(EngineError::NoOpenPosition)
        );

        executor.apply(&enter("SOL", Side::Long, 2.0, 100.0));
        assert!(matches!(
            executor.apply(&exit),
            ExecutionOutcome::Rejected(EngineError::UpstreamUnavailable { .. })
        ));

        board.set_price("SOL", 105.0);
        match executor.apply(&exit) {
            ExecutionOutcome::Exited(summary) => {
                assert_eq!(summary.reason, ExitReason::Decision);
                assert_eq!(summary.requested_exit_price, 105.0);
            }
            other => panic!("expected exit, got {:?}", other),
        }
    }

    #[test]
    fn test_exit_for_other_instrument_rejected() {
        let (executor, _) = executor();
        executor.apply(&enter("SOL", Side::Long, 2.0, 100.0));

        let exit = TradeDecision {
            instrument: "JUP".to_string(),
            action: DecisionAction::Exit,
            price: Some(1.0),
            reasoning: None,
        };
        assert!(matches!(
            executor.apply(&exit),
            ExecutionOutcome::Rejected(EngineError::InvalidOrder { .. })
        ));
    }

    #[test]
    fn test_exit_after_switch_keeps_new_position() {
        let (executor, board) = executor();
        executor.apply(&enter("SOL", Side::Long, 2.0, 100.0));
        let exit = TradeDecision {
            instrument: "SOL".to_string(),
            action: DecisionAction::Exit,
            price: Some(101.0),
            reasoning: None,
        };

        board.set_price("SOL", 101.0);
        executor.apply(&enter("JUP", Side::Long, 2.0, 1.2));

        assert!(matches!(
            executor.apply(&exit),
            ExecutionOutcome::Rejected(EngineError::InvalidOrder { .. })
        ));
        let position = executor.ledger.position().expect("JUP stays open");
        assert_eq!(position.instrument, "JUP");
        assert_eq!(
            executor
                .ledger
                .trades()
                .iter()
                .filter(|t| t.exit_reason == Some(ExitReason::Decision))
                .count(),
            0
        );
    }

    #[test]
    fn test_decision_wire_format() {
        let decision: TradeDecision = serde_json::from_str(
            r#"{"instrument":"SOL","action":"ENTER","side":"SHORT","leverage":2.5,"stop_price":120.0}"#,
        )
        .unwrap();

        assert_eq!(
            decision.action,
            DecisionAction::Enter {
                side: Side::Short,
                leverage: 2.5,
                target_price: None,
                stop_price: Some(120.0),
            }
        );

        let hold: TradeDecision =
            serde_json::from_str(r#"{"instrument":"SOL","action":"HOLD"}"#).unwrap();
        assert_eq!(hold.action, DecisionAction::Hold);

        let (executor, _) = executor();
        assert_eq!(executor.apply(&hold), ExecutionOutcome::Held);
    }
}
