// Position accounting, price access and the background monitor
pub mod candle_buffer;
pub mod executor;
pub mod journal;
pub mod ledger;
pub mod monitor;
pub mod position;
pub mod price_feed;

pub use candle_buffer::CandleBuffer;
pub use executor::{DecisionAction, ExecutionOutcome, Executor, TradeDecision};
pub use journal::{TradeJournal, TradeStatistics};
pub use ledger::{
    EntryKind, EntryOrder, EntryOutcome, Ledger, LedgerConfig, PortfolioStatus, PositionLedger,
};
pub use monitor::{ActionKind, MonitorAction, MonitorConfig, MonitorStatus, PositionMonitor, TickReport};
pub use position::{Position, PositionSignal, PositionSummary, TradeSummary};
pub use price_feed::{PriceBoard, PriceOracle};
