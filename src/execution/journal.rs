use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::{TradeAction, TradeRecord};

const EVENT_CAPACITY: usize = 1024;

/// Aggregate results over EXIT records
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TradeStatistics {
    pub total_trades: usize,
    pub profitable_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64, // percent
    pub total_pnl: f64,
    pub average_pnl: f64,
}

impl TradeStatistics {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a TradeRecord>) -> Self {
        let pnls: Vec<f64> = records
            .into_iter()
            .filter(|r| r.action == TradeAction::Exit)
            .filter_map(|r| r.realized_pnl)
            .collect();

        Self::from_pnls(&pnls)
    }

    pub fn from_pnls(pnls: &[f64]) -> Self {
        let total_trades = pnls.len();
        if total_trades == 0 {
            return Self::default();
        }

        let profitable_trades = pnls.iter().filter(|p| **p > 0.0).count();
        let losing_trades = pnls.iter().filter(|p| **p < 0.0).count();
        let total_pnl: f64 = pnls.iter().sum();

        Self {
            total_trades,
            profitable_trades,
            losing_trades,
            win_rate: profitable_trades as f64 / total_trades as f64 * 100.0,
            total_pnl,
            average_pnl: total_pnl / total_trades as f64,
        }
    }
}

/// Append-only trade log
///
/// Every record is kept for polling and also published to subscribers.
/// Subscribers that fall behind by more than the channel capacity see
/// `RecvError::Lagged` and can catch up with `trades_since`.
pub struct TradeJournal {
    records: Vec<TradeRecord>,
    events: broadcast::Sender<TradeRecord>,
}

impl Default for TradeJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl TradeJournal {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            records: Vec::new(),
            events,
        }
    }

    pub fn append(&mut self, record: TradeRecord) {
        self.records.push(record.clone());
        // No subscribers is fine; the record is still kept
        let _ = self.events.send(record);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TradeRecord> {
        self.events.subscribe()
    }

    pub fn trades(&self) -> &[TradeRecord] {
        &self.records
    }

    /// Records appended after the first `seen`
    pub fn trades_since(&self, seen: usize) -> &[TradeRecord] {
        &self.records[seen.min(self.records.len())..]
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn statistics(&self) -> TradeStatistics {
        TradeStatistics::from_records(&self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ExitReason, Side};
    use chrono::Utc;
    use uuid::Uuid;

    fn record(action: TradeAction, pnl: Option<f64>) -> TradeRecord {
        TradeRecord {
            id: Uuid::new_v4(),
            action,
            instrument: "SOL".to_string(),
            side: Side::Long,
            price: 100.0,
            size: 1.0,
            leverage: 2.0,
            invested_amount: 50.0,
            realized_pnl: pnl,
            exit_reason: pnl.map(|_| ExitReason::Manual),
            target_price: None,
            stop_price: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_statistics_count_exits_only() {
        let mut journal = TradeJournal::new();
        journal.append(record(TradeAction::Enter, None));
        journal.append(record(TradeAction::Exit, Some(30.0)));
        journal.append(record(TradeAction::Enter, None));
        journal.append(record(TradeAction::Exit, Some(-10.0)));

        let stats = journal.statistics();
        assert_eq!(stats.total_trades, 2);
        assert_eq!(stats.profitable_trades, 1);
        assert_eq!(stats.losing_trades, 1);
        assert_eq!(stats.win_rate, 50.0);
        assert_eq!(stats.total_pnl, 20.0);
        assert_eq!(stats.average_pnl, 10.0);
    }

    #[test]
    fn test_empty_statistics() {
        assert_eq!(TradeJournal::new().statistics(), TradeStatistics::default());
    }

    #[test]
    fn test_trades_since() {
        let mut journal = TradeJournal::new();
        journal.append(record(TradeAction::Enter, None));
        journal.append(record(TradeAction::Exit, Some(1.0)));

        assert_eq!(journal.trades_since(1).len(), 1);
        assert_eq!(journal.trades_since(1)[0].action, TradeAction::Exit);
        assert!(journal.trades_since(5).is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_receive_appended_records() {
        let mut journal = TradeJournal::new();
        let mut rx = journal.subscribe();

        let enter = record(TradeAction::Enter, None);
        journal.append(enter.clone());

        let received = rx.recv().await.unwrap();
        assert_eq!(received, enter);
    }
}
