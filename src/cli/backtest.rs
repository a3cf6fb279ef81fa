//! Backtest command implementation

use super::StrategyArgs;
use crate::config::Config;
use crate::data::{CandleStore, TradeJournal};
use crate::engine::TradingEngine;
use crate::execution::PaperEngine;
use crate::replay::ReplayDriver;
use chrono::{DateTime, Utc};
use clap::{Args, ValueEnum};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Args, Debug)]
pub struct BacktestArgs {
    /// Directory containing Parquet files, overrides `data.candle_dir`
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Start time filter (RFC 3339)
    #[arg(long)]
    pub start: Option<DateTime<Utc>>,

    /// End time filter (RFC 3339)
    #[arg(long)]
    pub end: Option<DateTime<Utc>>,

    /// Initial capital, overrides `ledger.initial_balance`
    #[arg(long)]
    pub capital: Option<Decimal>,

    /// Leave positions open when the data runs out
    #[arg(long)]
    pub keep_open: bool,

    /// Append closed trades to this journal
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// Write the full report as JSON here
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Summary output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,

    #[command(flatten)]
    pub strategy: StrategyArgs,
}

impl BacktestArgs {
    pub async fn execute(&self, mut config: Config) -> anyhow::Result<()> {
        if let Some(dir) = &self.data_dir {
            config.data.candle_dir = dir.clone();
        }
        if let Some(capital) = self.capital {
            config.ledger.initial_balance = capital;
        }
        if self.start.is_some() {
            config.replay.start = self.start;
        }
        if self.end.is_some() {
            config.replay.end = self.end;
        }
        if self.keep_open {
            config.replay.close_at_end = false;
        }
        config.validate()?;

        let store = CandleStore::new(&config.data.candle_dir);
        let driver = ReplayDriver::load(&store, &config)?;
        tracing::info!(
            dir = %store.dir().display(),
            symbols = ?driver.symbols().collect::<Vec<_>>(),
            "Running backtest"
        );

        let execution = Arc::new(PaperEngine::new(
            config.engine.fee_rate,
            config.ledger.initial_balance,
        ));
        let mut engine = TradingEngine::from_config(&config, execution);
        if let Some(path) = &self.journal {
            engine = engine.with_journal(TradeJournal::open(path)?);
        }
        let mut strategy = self.strategy.build(&config);

        let report = driver.run(&mut engine, &mut strategy).await?;

        if let Some(path) = &self.output {
            std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
            tracing::info!(path = %path.display(), "Report written");
        }
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report.summary)?),
            OutputFormat::Table => println!("{}", report.summary.format_table()),
        }
        Ok(())
    }
}
