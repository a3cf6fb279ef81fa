//! Fetch command implementation

use crate::candle::{CandleSeries, Interval};
use crate::config::Config;
use crate::data::CandleStore;
use crate::feed::{BinanceFuturesFeed, MarketDataSource};
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use std::path::PathBuf;

#[derive(Args, Debug)]
pub struct FetchArgs {
    /// Symbols to download, defaults to `engine.symbols`
    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,

    /// Intervals to download, defaults to the base plus `engine.intervals`
    #[arg(long, value_delimiter = ',')]
    pub intervals: Vec<Interval>,

    /// Start time (RFC 3339), defaults to `--days` before the end
    #[arg(long)]
    pub start: Option<DateTime<Utc>>,

    /// End time (RFC 3339), defaults to now
    #[arg(long)]
    pub end: Option<DateTime<Utc>>,

    /// Days of history when no start is given
    #[arg(long, default_value = "7")]
    pub days: i64,

    /// Output directory, overrides `data.candle_dir`
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl FetchArgs {
    pub async fn execute(&self, config: Config) -> anyhow::Result<()> {
        let symbols = if self.symbols.is_empty() {
            config.engine.symbols.clone()
        } else {
            self.symbols.clone()
        };
        let intervals = if self.intervals.is_empty() {
            let mut intervals = vec![config.engine.base_interval];
            intervals.extend(config.engine.intervals.iter().copied());
            intervals
        } else {
            self.intervals.clone()
        };
        let end = self.end.unwrap_or_else(Utc::now);
        let start = self.start.unwrap_or(end - Duration::days(self.days));
        anyhow::ensure!(start < end, "start {} is not before end {}", start, end);

        let store = CandleStore::new(
            self.output
                .clone()
                .unwrap_or_else(|| config.data.candle_dir.clone()),
        );
        let feed = BinanceFuturesFeed::new(config.feed.clone())?;

        for symbol in &symbols {
            for interval in &intervals {
                let candles = feed.fetch_range(symbol, *interval, start, end).await?;
                // Drop the candle still forming at `end`
                let closed: Vec<_> = candles
                    .into_iter()
                    .filter(|c| c.close_time < Utc::now())
                    .collect();
                let fetched = closed.len();
                let series = CandleSeries::new(symbol.as_str(), *interval, closed)?;
                let path = store.append(&series)?;
                tracing::info!(
                    symbol = %symbol,
                    %interval,
                    fetched,
                    path = %path.display(),
                    "Candles stored"
                );
            }
        }
        Ok(())
    }
}
