//! Journal and ledger snapshot across a replay session

use crate::common::{coarse, minutes};
use async_trait::async_trait;
use perp_engine::candle::{Interval, MarketView, SyncedDataset};
use perp_engine::config::ReplayConfig;
use perp_engine::data::{read_snapshot, TradeJournal};
use perp_engine::engine::TradingEngine;
use perp_engine::execution::PaperEngine;
use perp_engine::replay::ReplayDriver;
use perp_engine::risk::{CloseReason, PortfolioLedger, PositionSide};
use perp_engine::signal::{Signal, Strategy};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tempfile::TempDir;

/// Opens at tick 10, closes at tick 30, opens again at tick 50
struct Timed;

#[async_trait]
impl Strategy for Timed {
    fn name(&self) -> &str {
        "timed"
    }

    async fn evaluate(&mut self, view: &MarketView<'_>) -> Signal {
        match view.tick {
            10 | 50 => Signal::open(view.symbol, PositionSide::Long, "timed", dec!(1), view.time),
            30 => Signal::close(view.symbol, PositionSide::Long, "timed", view.time),
            _ => Signal::none(view.symbol, view.time),
        }
    }
}

fn engine(dir: &TempDir) -> TradingEngine {
    let mut config: perp_engine::config::Config = toml::from_str(
        r#"
        [engine]
        symbols = ["BTCUSDT"]
        base_interval = "1m"
        intervals = ["5m"]

        [ledger]
        initial_balance = 1000

        [telemetry]
        log_level = "warn"
    "#,
    )
    .unwrap();
    config.stop_loss.stop_rate = dec!(0.5);
    let execution = Arc::new(PaperEngine::new(config.engine.fee_rate, dec!(1000)));
    TradingEngine::from_config(&config, execution)
        .with_journal(TradeJournal::open(dir.path().join("trades.jsonl")).unwrap())
        .with_dump_path(dir.path().join("ledger.json"))
}

fn driver() -> ReplayDriver {
    let mut driver = ReplayDriver::new(&ReplayConfig {
        close_at_end: false,
        start: None,
        end: None,
    });
    let dataset = SyncedDataset::build(&minutes(120), &[coarse(Interval::M5, 120)]).unwrap();
    driver.add_dataset(dataset, chrono::Duration::hours(1));
    driver
}

#[tokio::test]
async fn test_session_resume() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(&dir);

    let report = driver().run(&mut engine, &mut Timed).await.unwrap();
    engine.save_snapshot().unwrap();

    // One round trip closed, the second entry still open
    assert_eq!(report.trades.len(), 1);
    assert_eq!(report.trades[0].reason, CloseReason::Signal);
    assert_eq!(report.ledger.open_positions.len(), 1);

    let journal = TradeJournal::load(dir.path().join("trades.jsonl")).unwrap();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].id, report.trades[0].id);
    assert_eq!(
        TradeJournal::load_symbol(dir.path().join("trades.jsonl"), "ETHUSDT")
            .unwrap()
            .len(),
        0
    );

    let snapshot = read_snapshot(dir.path().join("ledger.json"))
        .unwrap()
        .expect("snapshot written");
    let restored = PortfolioLedger::restore(snapshot).unwrap();
    assert_eq!(restored.open_count(), 1);
    assert_eq!(restored.equity(), engine.ledger().equity());
    assert_eq!(restored.total_balance(), engine.ledger().total_balance());
    assert_eq!(restored.closed_trades().len(), 1);
}

#[tokio::test]
async fn test_shutdown_flatten_is_journaled() {
    let dir = TempDir::new().unwrap();
    let mut engine = engine(&dir);
    driver().run(&mut engine, &mut Timed).await.unwrap();

    let closed = engine.close_all(CloseReason::Shutdown).await.unwrap();
    engine.save_snapshot().unwrap();

    assert_eq!(closed.len(), 1);
    assert_eq!(engine.ledger().open_count(), 0);
    let journal = TradeJournal::load(dir.path().join("trades.jsonl")).unwrap();
    assert_eq!(journal.len(), 2);
    assert_eq!(journal[1].reason, CloseReason::Shutdown);

    let snapshot = read_snapshot(dir.path().join("ledger.json")).unwrap().unwrap();
    assert!(snapshot.open_positions.is_empty());
    assert_eq!(snapshot.closed_trades.len(), 2);
}
