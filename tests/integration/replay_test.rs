//! Replay from the Parquet store through the trading engine

use crate::common::{coarse, minutes};
use perp_engine::candle::Interval;
use perp_engine::config::Config;
use perp_engine::data::CandleStore;
use perp_engine::engine::TradingEngine;
use perp_engine::execution::PaperEngine;
use perp_engine::replay::{ReplayDriver, ReplayReport};
use perp_engine::risk::{CloseReason, PositionSide};
use perp_engine::signal::BreakoutStrategy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tempfile::TempDir;

fn config(dir: &TempDir) -> Config {
    let toml = format!(
        r#"
        [engine]
        symbols = ["BTCUSDT"]
        base_interval = "1m"
        intervals = ["5m"]
        lookback_hours = 1
        fee_rate = 0.0004
        leverage = 5

        [ledger]
        initial_balance = 1000

        [data]
        candle_dir = "{}"

        [telemetry]
        log_level = "warn"
    "#,
        dir.path().display()
    );
    let config: Config = toml::from_str(&toml).unwrap();
    config.validate().unwrap();
    config
}

fn store(dir: &TempDir) -> CandleStore {
    let store = CandleStore::new(dir.path());
    store.write(&minutes(120)).unwrap();
    store.write(&coarse(Interval::M5, 120)).unwrap();
    store
}

async fn replay(config: &Config, store: &CandleStore) -> ReplayReport {
    let driver = ReplayDriver::load(store, config).unwrap();
    let execution = Arc::new(PaperEngine::new(
        config.engine.fee_rate,
        config.ledger.initial_balance,
    ));
    let mut engine = TradingEngine::from_config(config, execution);
    let mut strategy = BreakoutStrategy::new(Interval::M5, PositionSide::Long, 2);
    driver.run(&mut engine, &mut strategy).await.unwrap()
}

#[tokio::test]
async fn test_replay_from_store() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let store = store(&dir);

    let report = replay(&config, &store).await;

    assert_eq!(report.ticks, 120);
    assert_eq!(report.equity_curve.len(), 120);
    assert!(report.ledger.open_positions.is_empty());
    assert!(report
        .trades
        .windows(2)
        .all(|w| w[0].last_time <= w[1].last_time));

    // Flat at the end: every unit of P&L is in the balance or the reserve
    let pnl: Decimal = report.trades.iter().map(|t| t.gross_pnl).sum();
    assert_eq!(
        report.summary.final_balance + report.summary.reserved_profit,
        dec!(1000) + pnl
    );
    assert_eq!(report.summary.total_trades, report.trades.len());
    assert!(report
        .trades
        .iter()
        .all(|t| t.entry_time < t.last_time || t.reason == CloseReason::EndOfReplay));
}

#[tokio::test]
async fn test_replay_is_deterministic() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let store = store(&dir);

    let first = replay(&config, &store).await;
    let second = replay(&config, &store).await;

    let key = |r: &ReplayReport| {
        r.trades
            .iter()
            .map(|t| (t.entry_time, t.exit_price, t.reason, t.gross_pnl))
            .collect::<Vec<_>>()
    };
    assert_eq!(key(&first), key(&second));
    assert_eq!(first.equity_curve, second.equity_curve);
}

#[tokio::test]
async fn test_missing_coarse_series_fails_load() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let store = CandleStore::new(dir.path());
    store.write(&minutes(120)).unwrap();

    assert!(ReplayDriver::load(&store, &config).is_err());
}

#[tokio::test]
async fn test_range_limits_ticks() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    let store = store(&dir);
    let start = crate::common::t0() + chrono::Duration::minutes(60);
    config.replay.start = Some(start);

    let report = replay(&config, &store).await;

    assert_eq!(report.ticks, 60);
    assert!(report.equity_curve.iter().all(|(t, _)| *t >= start));
}
