// Offline paper sessions over generated market data
pub mod session;
pub mod synthetic;

pub use session::{PaperSession, SessionConfig, SessionTotals, StepReport};
pub use synthetic::{MarketScenario, SyntheticDataGenerator};
