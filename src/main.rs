use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use papertrade::config::{load_config, AppConfig};
use papertrade::db::PostgresTradeStore;
use papertrade::decision::{DecisionSource, HttpDecisionSource, SignalConsensusSource};
use papertrade::execution::{CandleBuffer, Ledger, PositionMonitor, PriceBoard};
use papertrade::simulation::{
    MarketScenario, PaperSession, SessionTotals, SyntheticDataGenerator,
};
use papertrade::strategy::SignalEngine;
use papertrade::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Paper-trade a synthetic market through the position engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Instrument to trade (overrides the config file)
    #[arg(long)]
    instrument: Option<String>,

    /// Number of candles to replay after warm-up
    #[arg(long, default_value_t = 300)]
    steps: usize,

    /// Seed for the synthetic market
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Wall-clock delay between replayed candles
    #[arg(long, default_value_t = 50)]
    step_millis: u64,

    /// uptrend, downtrend, sideways, volatile or pump-and-dump
    #[arg(long, default_value = "pump-and-dump")]
    scenario: MarketScenario,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref())?;
    if let Some(instrument) = &args.instrument {
        config.instrument = instrument.clone();
    }
    if config.signals.candle_interval_secs.is_none() {
        config.signals.candle_interval_secs = Some(config.candle_interval_secs);
    }

    setup_logging(&config);

    tracing::info!(
        instrument = %config.instrument,
        scenario = %args.scenario,
        steps = args.steps,
        seed = args.seed,
        "Paper trading session starting"
    );
    tracing::info!(
        initial_balance = config.ledger.initial_balance,
        fee_rate = config.ledger.fee_rate,
        slippage_rate = config.ledger.slippage_rate,
        leverage = config.session.leverage,
        "Ledger configuration"
    );

    // Shared components, constructed once and handed out by handle
    let buffer = Arc::new(CandleBuffer::new(config.candle_buffer_size));
    let prices = PriceBoard::new();
    let ledger = Ledger::new(config.ledger.clone(), Arc::new(prices.clone()));
    let engine = Arc::new(SignalEngine::new(config.signals.clone(), buffer.clone()));
    let decision = create_decision_source(&config)?;

    let recorder = match &config.database_url {
        Some(url) => connect_to_postgres(url)
            .await
            .map(|store| store.spawn_recorder(ledger.subscribe())),
        None => None,
    };

    let monitor = Arc::new(
        PositionMonitor::new(config.monitor.clone(), ledger.clone(), decision.clone())
            .with_signal_engine(engine.clone()),
    );
    monitor.start();

    let session = PaperSession::new(
        config.session.clone(),
        config.instrument.clone(),
        buffer,
        prices,
        engine,
        decision,
        ledger.clone(),
    )
    .with_monitor(monitor.clone());

    // One continuous series: history for the indicators, then the live part
    let warmup = config.signals.window.max(config.signals.min_candles);
    let interval = config.candle_interval_secs as i64;
    let start = Utc::now() - ChronoDuration::seconds(warmup as i64 * interval);
    let candles = SyntheticDataGenerator::new(config.instrument.clone(), args.seed).generate(
        args.scenario,
        warmup + args.steps,
        interval,
        start,
    );
    let (history, live) = candles.split_at(warmup.min(candles.len()));
    session.warm_up(history);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, shutting down...");
                shutdown.cancel();
            }
        });
    }

    let mut totals = SessionTotals::default();
    let mut ticker = tokio::time::interval(Duration::from_millis(args.step_millis.max(1)));
    for candle in live {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let report = session.step(candle).await;
        totals.record(&report);
    }

    if !monitor.stop().await {
        tracing::warn!("Position monitor did not stop cleanly");
    }

    print_summary(&session, &totals);

    // Dropping every ledger handle closes the trade stream so the recorder drains
    drop(session);
    drop(monitor);
    drop(ledger);
    if let Some(handle) = recorder {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            tracing::warn!("Trade recorder did not finish in time");
        }
    }

    tracing::info!("Paper trading session finished");
    Ok(())
}

fn setup_logging(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.as_str()));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn create_decision_source(config: &AppConfig) -> Result<Arc<dyn DecisionSource>> {
    let source: Arc<dyn DecisionSource> = match &config.decision.url {
        Some(url) => Arc::new(HttpDecisionSource::new(url.clone(), &config.decision)?),
        None => Arc::new(SignalConsensusSource::new()),
    };
    tracing::info!(source = source.name(), "Decision source ready");
    Ok(source)
}

async fn connect_to_postgres(database_url: &str) -> Option<PostgresTradeStore> {
    match PostgresTradeStore::new(database_url).await {
        Ok(store) => {
            tracing::info!("Postgres trade recording enabled");
            Some(store)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to connect to Postgres ({}), continuing without persistence",
                e
            );
            None
        }
    }
}

fn print_summary(session: &PaperSession, totals: &SessionTotals) {
    let status = session.ledger().portfolio_status();

    println!("\n{:=<60}", "");
    println!(" SESSION SUMMARY: {}", session.instrument());
    println!("{:=<60}", "");
    println!(
        " Candles {:>6}   Signals {:>6}   Decisions {:>6}",
        totals.candles, totals.signals, totals.decisions
    );
    println!(
        " Entries {:>6}   Flips   {:>6}   Switches  {:>6}",
        totals.entries, totals.flips, totals.switches
    );
    println!(
        " Exits   {:>6}   Monitor {:>6}   Rejected  {:>6}",
        totals.exits, totals.monitor_exits, totals.rejected
    );
    println!("{:-<60}", "");
    println!(" Initial balance   {:>12.2}", status.initial_balance);
    println!(" Balance           {:>12.2}", status.balance);
    println!(" Total value       {:>12.2}", status.total_value);
    println!(" Total return      {:>11.2}%", status.total_return_pct);
    if let Some(position) = &status.position {
        println!(
            " Open position     {} {} x{:.1} @ {:.4} ({:+.2}%)",
            position.side,
            position.instrument,
            position.leverage,
            position.entry_price,
            position.unrealized_pnl_pct
        );
    }
    println!(
        " Closed trades {} | win rate {:.1}% | realized PnL {:.2}",
        status.statistics.total_trades, status.statistics.win_rate, status.statistics.total_pnl
    );
    println!("{:=<60}\n", "");
}
