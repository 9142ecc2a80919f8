use chrono::{DateTime, Duration, Utc};
use papertrade::decision::{DecisionConfig, HttpDecisionSource, SignalConsensusSource};
use papertrade::execution::{
    CandleBuffer, ExecutionOutcome, Ledger, LedgerConfig, MonitorConfig, PositionMonitor,
    PriceBoard,
};
use papertrade::simulation::{
    MarketScenario, PaperSession, SessionConfig, SessionTotals, SyntheticDataGenerator,
};
use papertrade::strategy::{SignalConfig, SignalEngine};
use papertrade::{Candle, ExitReason, Side, TradeAction};
use std::sync::Arc;

fn flat_candle(timestamp: DateTime<Utc>, close: f64, volume: f64) -> Candle {
    Candle {
        instrument: "SOL".to_string(),
        timestamp,
        open: close,
        high: close,
        low: close,
        close,
        volume,
    }
}

struct Harness {
    session: PaperSession,
    ledger: Ledger,
}

fn harness(decision: Arc<dyn papertrade::decision::DecisionSource>) -> Harness {
    let buffer = Arc::new(CandleBuffer::new(500));
    let prices = PriceBoard::new();
    let ledger = Ledger::new(LedgerConfig::default(), Arc::new(prices.clone()));
    let engine = Arc::new(SignalEngine::new(SignalConfig::default(), buffer.clone()));
    let monitor = Arc::new(
        PositionMonitor::new(MonitorConfig::default(), ledger.clone(), decision.clone())
            .with_signal_engine(engine.clone()),
    );

    let session = PaperSession::new(
        SessionConfig::default(),
        "SOL",
        buffer,
        prices,
        engine,
        decision,
        ledger.clone(),
    )
    .with_monitor(monitor);

    Harness { session, ledger }
}

#[tokio::test]
async fn test_signal_entry_then_monitor_takes_profit_and_trails_out() {
    let _ = tracing_subscriber::fmt::try_init();

    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/decide")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"recommendation":"BUY","confidence":0.9}"#)
        .expect_at_least(2)
        .create_async()
        .await;

    let decision = HttpDecisionSource::new(
        format!("{}/decide", server.url()),
        &DecisionConfig {
            requests_per_minute: 100,
            ..Default::default()
        },
    )
    .unwrap();
    let Harness { session, ledger } = harness(Arc::new(decision));

    let start = Utc::now() - Duration::minutes(5 * 122);
    let at = |i: i64| start + Duration::minutes(5 * i);
    let history: Vec<Candle> = (0..119).map(|i| flat_candle(at(i), 100.0, 1000.0)).collect();
    assert_eq!(session.warm_up(&history), 119);

    // +4% on 5x volume: signals fire and the source says BUY
    let surge = session.step(&flat_candle(at(119), 104.0, 5000.0)).await;
    assert!(!surge.signals.is_empty());
    let position = match surge.outcome {
        Some(ExecutionOutcome::Entered(position)) => position,
        other => panic!("expected an entry, got {:?}", other),
    };
    assert_eq!(position.side, Side::Long);
    assert_eq!(position.leverage, 3.0);
    assert!((position.target_price.unwrap() - 108.16).abs() < 1e-9);

    // Past the target and the partial take-profit threshold: the monitor
    // consults (BUY keeps the position) and then takes half off
    let rally = session.step(&flat_candle(at(120), 109.0, 1000.0)).await;
    assert!(rally.monitor_exits >= 1);
    let position = ledger.position().expect("position should survive a partial exit");
    assert!(position.partial_profit_taken);

    // 2% off the high trips the trailing stop
    session.step(&flat_candle(at(121), 106.0, 1000.0)).await;

    let exits: Vec<ExitReason> = ledger
        .trades()
        .iter()
        .filter(|t| t.action == TradeAction::Exit)
        .filter_map(|t| t.exit_reason)
        .collect();
    assert!(exits.contains(&ExitReason::PartialTakeProfit));
    assert!(exits.contains(&ExitReason::TrailingStop));

    let stats = ledger.statistics();
    assert!(stats.total_pnl > 0.0, "rally exits should be profitable: {:?}", stats);

    mock.assert_async().await;
}

#[tokio::test]
async fn test_synthetic_session_keeps_books_consistent() {
    let Harness { session, ledger } = harness(Arc::new(SignalConsensusSource::new()));
    let mut events = ledger.subscribe();

    let start = Utc::now() - Duration::minutes(5 * 200);
    let candles = SyntheticDataGenerator::new("SOL", 7).generate(
        MarketScenario::PumpAndDump,
        400,
        300,
        start,
    );
    let (history, live) = candles.split_at(200);
    session.warm_up(history);

    let mut totals = SessionTotals::default();
    for candle in live {
        let report = session.step(candle).await;
        totals.record(&report);
        assert!(ledger.balance() >= 0.0);
    }
    assert_eq!(totals.candles, live.len());

    let trades = ledger.trades();
    let exits = trades
        .iter()
        .filter(|t| t.action == TradeAction::Exit)
        .count();
    let entries = trades.len() - exits;
    assert!(entries >= totals.entries + totals.flips + totals.switches);
    assert!(trades
        .iter()
        .filter(|t| t.action == TradeAction::Exit)
        .all(|t| t.realized_pnl.is_some() && t.exit_reason.is_some()));
    assert_eq!(ledger.statistics().total_trades, exits);

    // Every record reached the event stream, in order
    let mut streamed = Vec::new();
    while let Ok(record) = events.try_recv() {
        streamed.push(record.id);
    }
    assert_eq!(streamed, trades.iter().map(|t| t.id).collect::<Vec<_>>());

    ledger.reset().unwrap();
    assert!(ledger.position().is_none());
    assert_eq!(ledger.balance(), LedgerConfig::default().initial_balance);
}
