//! Run command implementation

use super::StrategyArgs;
use crate::config::Config;
use crate::data::{read_snapshot, CandleStore, TradeJournal};
use crate::engine::TradingEngine;
use crate::execution::PaperEngine;
use crate::feed::BinanceFuturesFeed;
use crate::live::{LiveDriver, Shutdown};
use crate::risk::PortfolioLedger;
use clap::Args;
use std::sync::Arc;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Ignore any saved ledger and start from the configured balance
    #[arg(long)]
    pub fresh: bool,

    /// Poll REST only, without the kline stream
    #[arg(long)]
    pub no_stream: bool,

    /// Close every position before exiting
    #[arg(long)]
    pub flatten: bool,

    /// Save polled candles to the candle store on exit
    #[arg(long)]
    pub record: bool,

    #[command(flatten)]
    pub strategy: StrategyArgs,
}

impl RunArgs {
    pub async fn execute(&self, mut config: Config) -> anyhow::Result<()> {
        if self.no_stream {
            config.live.streaming = false;
        }
        if self.flatten {
            config.live.flatten_on_shutdown = true;
        }

        let feed = Arc::new(BinanceFuturesFeed::new(config.feed.clone())?);
        let execution = Arc::new(PaperEngine::new(
            config.engine.fee_rate,
            config.ledger.initial_balance,
        ));

        let mut engine = TradingEngine::from_config(&config, execution.clone())
            .with_dump_path(&config.data.snapshot_path);
        let snapshot = if self.fresh {
            None
        } else {
            read_snapshot(&config.data.snapshot_path)?
        };
        if let Some(snapshot) = snapshot {
            tracing::info!(
                balance = %snapshot.total_balance,
                open = snapshot.open_positions.len(),
                "Resuming saved ledger"
            );
            engine = engine.with_ledger(PortfolioLedger::restore(snapshot)?);
        } else {
            engine.load_history(TradeJournal::load(&config.data.journal_path)?);
        }
        engine = engine.with_journal(TradeJournal::open(&config.data.journal_path)?);

        let mut strategy = self.strategy.build(&config);
        let shutdown = Shutdown::new();
        shutdown.trigger_on_ctrl_c();

        let mut driver = LiveDriver::new(config.clone(), feed.clone(), execution, shutdown);
        if config.live.streaming {
            driver = driver.with_stream(feed);
        }
        if self.record {
            driver = driver.with_store(CandleStore::new(&config.data.candle_dir));
        }

        tracing::info!("Starting paper trading, Ctrl-C to stop");
        driver.run(&mut engine, &mut strategy).await?;
        Ok(())
    }
}
