use crate::execution::TradeStatistics;
use crate::models::{ExitReason, Side, TradeAction, TradeRecord};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, postgres::PgRow, PgPool, Row};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Postgres persistence for the trade event stream
#[derive(Clone)]
pub struct PostgresTradeStore {
    pool: PgPool,
}

fn parse_action(value: &str) -> Option<TradeAction> {
    match value {
        "ENTER" => Some(TradeAction::Enter),
        "EXIT" => Some(TradeAction::Exit),
        _ => None,
    }
}

fn parse_side(value: &str) -> Option<Side> {
    match value {
        "LONG" => Some(Side::Long),
        "SHORT" => Some(Side::Short),
        _ => None,
    }
}

fn record_from_row(row: &PgRow) -> Result<TradeRecord> {
    let action: String = row.try_get("action")?;
    let side: String = row.try_get("side")?;
    let exit_reason: Option<String> = row.try_get("exit_reason")?;

    Ok(TradeRecord {
        id: row.try_get::<Uuid, _>("id")?,
        action: parse_action(&action).ok_or_else(|| format!("Unknown trade action: {}", action))?,
        instrument: row.try_get("instrument")?,
        side: parse_side(&side).ok_or_else(|| format!("Unknown side: {}", side))?,
        price: row.try_get("price")?,
        size: row.try_get("size")?,
        leverage: row.try_get("leverage")?,
        invested_amount: row.try_get("invested_amount")?,
        realized_pnl: row.try_get("realized_pnl")?,
        exit_reason: exit_reason.as_deref().and_then(ExitReason::parse),
        target_price: row.try_get("target_price")?,
        stop_price: row.try_get("stop_price")?,
        timestamp: row.try_get::<DateTime<Utc>, _>("traded_at")?,
    })
}

impl PostgresTradeStore {
    /// Connect to Postgres and run migrations
    ///
    /// # Arguments
    /// * `database_url` - Postgres connection URL
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres trade store");

        Ok(Self { pool })
    }

    /// Insert a trade record; re-inserting the same id is a no-op
    pub async fn record(&self, trade: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO virtual_trades (
                id, action, instrument, side, price, size, leverage,
                invested_amount, realized_pnl, exit_reason,
                target_price, stop_price, traded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(trade.id)
        .bind(trade.action.to_string())
        .bind(&trade.instrument)
        .bind(trade.side.to_string())
        .bind(trade.price)
        .bind(trade.size)
        .bind(trade.leverage)
        .bind(trade.invested_amount)
        .bind(trade.realized_pnl)
        .bind(trade.exit_reason.map(|r| r.as_str()))
        .bind(trade.target_price)
        .bind(trade.stop_price)
        .bind(trade.timestamp)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "Saved {} {} trade {} to Postgres",
            trade.action,
            trade.instrument,
            trade.id
        );

        Ok(())
    }

    /// Most recent trades, newest first
    pub async fn recent_trades(&self, limit: i64) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, action, instrument, side, price, size, leverage,
                   invested_amount, realized_pnl, exit_reason,
                   target_price, stop_price, traded_at
            FROM virtual_trades
            ORDER BY traded_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Win rate and PnL over every persisted EXIT
    pub async fn statistics(&self) -> Result<TradeStatistics> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COUNT(*) FILTER (WHERE realized_pnl > 0) AS profitable,
                   COUNT(*) FILTER (WHERE realized_pnl < 0) AS losing,
                   COALESCE(SUM(realized_pnl), 0) AS total_pnl
            FROM virtual_trades
            WHERE action = 'EXIT' AND realized_pnl IS NOT NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let profitable: i64 = row.try_get("profitable")?;
        let losing: i64 = row.try_get("losing")?;
        let total_pnl: f64 = row.try_get("total_pnl")?;

        if total == 0 {
            return Ok(TradeStatistics::default());
        }

        Ok(TradeStatistics {
            total_trades: total as usize,
            profitable_trades: profitable as usize,
            losing_trades: losing as usize,
            win_rate: profitable as f64 / total as f64 * 100.0,
            total_pnl,
            average_pnl: total_pnl / total as f64,
        })
    }

    /// Persist every record published on the ledger's trade stream
    ///
    /// Runs until the stream closes. Failed writes are logged and skipped.
    pub fn spawn_recorder(&self, mut events: broadcast::Receiver<TradeRecord>) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(trade) => {
                        if let Err(e) = store.record(&trade).await {
                            tracing::error!(trade_id = %trade.id, error = %e, "Failed to persist trade");
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Trade recorder fell behind, records skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::debug!("Trade recorder stopped");
        })
    }

    #[cfg(test)]
    async fn clear_all_trades(&self) -> Result<()> {
        sqlx::query("DELETE FROM virtual_trades")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
