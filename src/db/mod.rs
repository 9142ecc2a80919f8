// Trade persistence
pub mod postgres;

pub use postgres::PostgresTradeStore;
