//! Market data feed module
//!
//! Paged historical candles over REST and a streaming kline feed

mod binance;
mod retry;
mod types;

pub use binance::BinanceFuturesFeed;
pub use retry::RetryPolicy;
pub use types::{FeedError, StreamMessage};

use crate::candle::{Candle, Interval};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};

/// Historical candle source
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Maximum candles returned per page
    fn page_size(&self) -> usize;

    /// One bounded page of candles with `open_time` in `[start, end]`
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, FeedError>;

    /// Page through `[start, end]` until covered
    async fn fetch_range(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, FeedError> {
        let mut candles: Vec<Candle> = Vec::new();
        let mut cursor = start;

        while cursor <= end {
            let page = self.fetch_candles(symbol, interval, cursor, end).await?;
            let Some(last) = page.last() else {
                break;
            };
            let next = last.open_time + interval.duration();
            let full = page.len() >= self.page_size();

            let last_seen = candles.last().map(|c| c.open_time);
            candles.extend(
                page.into_iter()
                    .filter(|c| last_seen.map_or(true, |prev| c.open_time > prev)),
            );
            tracing::debug!(symbol, %interval, fetched = candles.len(), "Fetched candle page");

            if !full || next <= cursor {
                break;
            }
            cursor = next;
        }

        Ok(candles)
    }
}

/// Streaming market data
#[async_trait]
pub trait MarketStream: Send + Sync {
    /// Subscribe to candle updates for every (symbol, interval); the stream ends
    /// with [`StreamMessage::Disconnected`]
    async fn subscribe(
        &self,
        symbols: &[String],
        intervals: &[Interval],
        shutdown: watch::Receiver<bool>,
    ) -> Result<mpsc::Receiver<StreamMessage>, FeedError>;
}
