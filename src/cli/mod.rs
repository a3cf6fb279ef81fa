//! CLI interface for perp-engine
//!
//! Provides subcommands for:
//! - `backtest`: Replay stored candles through the engine
//! - `run`: Live paper trading against the exchange feed
//! - `fetch`: Download candles to Parquet
//! - `config`: Print the effective configuration

mod backtest;
mod fetch;
mod run;

pub use backtest::{BacktestArgs, OutputFormat};
pub use fetch::FetchArgs;
pub use run::RunArgs;

use crate::candle::Interval;
use crate::config::Config;
use crate::risk::PositionSide;
use crate::signal::BreakoutStrategy;
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "perp-engine")]
#[command(about = "Multi-resolution candle replay and risk engine for perpetual futures")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay stored candles
    Backtest(BacktestArgs),
    /// Start live paper trading
    Run(RunArgs),
    /// Download candles to the candle store
    Fetch(FetchArgs),
    /// Print the effective configuration
    Config,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum SideArg {
    Long,
    Short,
}

impl From<SideArg> for PositionSide {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Long => PositionSide::Long,
            SideArg::Short => PositionSide::Short,
        }
    }
}

/// Breakout strategy parameters shared by `backtest` and `run`
#[derive(Args, Debug)]
pub struct StrategyArgs {
    /// Confirmation interval, defaults to the first configured coarse interval
    #[arg(long)]
    pub confirm_interval: Option<Interval>,

    /// Trade direction
    #[arg(long, value_enum, default_value = "long")]
    pub side: SideArg,

    /// Closed confirmation candles required before trading
    #[arg(long, default_value = "3")]
    pub min_bars: usize,
}

impl StrategyArgs {
    pub fn build(&self, config: &Config) -> BreakoutStrategy {
        let interval = self
            .confirm_interval
            .or_else(|| config.engine.intervals.first().copied())
            .unwrap_or(config.engine.base_interval);
        BreakoutStrategy::new(interval, self.side.into(), self.min_bars)
    }
}
