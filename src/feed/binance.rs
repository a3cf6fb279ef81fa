//! Binance USDⓈ-M futures market data (REST klines + kline stream)

use super::{FeedError, MarketDataSource, MarketStream, RetryPolicy, StreamMessage};
use crate::candle::{Candle, Interval};
use crate::config::FeedConfig;
use crate::ws::{WsClient, WsConfig, WsMessage};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Exchange cap on klines per request
const MAX_PAGE_SIZE: usize = 1500;

/// REST kline row: open time, OHLCV, close time, quote volume, trades, taker volumes, ignore
type RawKline = (
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    u64,
    String,
    String,
    serde_json::Value,
);

/// Combined stream envelope
#[derive(Debug, Deserialize)]
struct StreamEnvelope {
    #[allow(dead_code)]
    stream: String,
    data: KlineEvent,
}

#[derive(Debug, Deserialize)]
struct KlineEvent {
    /// Event type
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: WsKline,
}

#[derive(Debug, Deserialize)]
struct WsKline {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "n")]
    trade_count: u64,
    /// Kline closed
    #[serde(rename = "x")]
    closed: bool,
    #[serde(rename = "q")]
    quote_volume: String,
    #[serde(rename = "V")]
    taker_buy_base_volume: String,
    #[serde(rename = "Q")]
    taker_buy_quote_volume: String,
}

fn decimal(field: &str, value: &str) -> Result<Decimal, FeedError> {
    Decimal::from_str(value).map_err(|e| FeedError::Parse(format!("{}={:?}: {}", field, value, e)))
}

fn timestamp(ms: i64) -> Result<DateTime<Utc>, FeedError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| FeedError::Parse(format!("timestamp {} out of range", ms)))
}

/// Binance futures market data client
pub struct BinanceFuturesFeed {
    client: reqwest::Client,
    config: FeedConfig,
    retry: RetryPolicy,
}

impl BinanceFuturesFeed {
    pub fn new(config: FeedConfig) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            retry: RetryPolicy::from_config(&config),
            config,
        })
    }

    fn klines_url(&self) -> String {
        format!("{}/fapi/v1/klines", self.config.rest_url.trim_end_matches('/'))
    }

    /// Combined kline stream URL for every (symbol, interval)
    fn stream_url(&self, symbols: &[String], intervals: &[Interval]) -> String {
        let streams: Vec<String> = symbols
            .iter()
            .flat_map(|s| {
                intervals
                    .iter()
                    .map(move |i| format!("{}@kline_{}", s.to_lowercase(), i))
            })
            .collect();
        format!(
            "{}/stream?streams={}",
            self.config.ws_url.trim_end_matches('/'),
            streams.join("/")
        )
    }

    fn parse_klines(body: &str) -> Result<Vec<Candle>, FeedError> {
        let rows: Vec<RawKline> =
            serde_json::from_str(body).map_err(|e| FeedError::Parse(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                Ok(Candle {
                    open_time: timestamp(row.0)?,
                    open: decimal("open", &row.1)?,
                    high: decimal("high", &row.2)?,
                    low: decimal("low", &row.3)?,
                    close: decimal("close", &row.4)?,
                    volume: decimal("volume", &row.5)?,
                    close_time: timestamp(row.6)?,
                    quote_volume: decimal("quote_volume", &row.7)?,
                    trade_count: row.8,
                    taker_buy_base_volume: decimal("taker_buy_base_volume", &row.9)?,
                    taker_buy_quote_volume: decimal("taker_buy_quote_volume", &row.10)?,
                })
            })
            .collect()
    }

    /// Parse a combined-stream kline message
    fn parse_stream_message(msg: &str) -> Option<StreamMessage> {
        let envelope: StreamEnvelope = serde_json::from_str(msg).ok()?;
        let event = envelope.data;
        if event.event_type != "kline" {
            return None;
        }
        let k = event.kline;

        let candle = (|| -> Result<Candle, FeedError> {
            Ok(Candle {
                open_time: timestamp(k.open_time)?,
                open: decimal("open", &k.open)?,
                high: decimal("high", &k.high)?,
                low: decimal("low", &k.low)?,
                close: decimal("close", &k.close)?,
                volume: decimal("volume", &k.volume)?,
                close_time: timestamp(k.close_time)?,
                quote_volume: decimal("quote_volume", &k.quote_volume)?,
                trade_count: k.trade_count,
                taker_buy_base_volume: decimal("taker_buy_base_volume", &k.taker_buy_base_volume)?,
                taker_buy_quote_volume: decimal(
                    "taker_buy_quote_volume",
                    &k.taker_buy_quote_volume,
                )?,
            })
        })()
        .ok()?;

        Some(StreamMessage::Candle {
            symbol: event.symbol,
            interval: k.interval.parse().ok()?,
            candle,
            closed: k.closed,
        })
    }

    async fn fetch_page(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, FeedError> {
        let limit = self.page_size().to_string();
        let start_ms = start.timestamp_millis().to_string();
        let end_ms = end.timestamp_millis().to_string();

        let response = self
            .client
            .get(self.klines_url())
            .query(&[
                ("symbol", symbol),
                ("interval", interval.as_str()),
                ("startTime", start_ms.as_str()),
                ("endTime", end_ms.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(FeedError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Self::parse_klines(&body)
    }

    /// Forward WebSocket frames as typed stream messages
    async fn run_message_loop(mut ws_rx: mpsc::Receiver<WsMessage>, tx: mpsc::Sender<StreamMessage>) {
        while let Some(msg) = ws_rx.recv().await {
            let forwarded = match msg {
                WsMessage::Text(text) => match Self::parse_stream_message(&text) {
                    Some(message) => message,
                    None => {
                        tracing::trace!(len = text.len(), "Ignoring non-kline message");
                        continue;
                    }
                },
                WsMessage::Connected => {
                    tracing::info!("Kline stream connected");
                    continue;
                }
                WsMessage::Reconnecting { attempt } => {
                    tracing::warn!(attempt, "Kline stream reconnecting...");
                    continue;
                }
                WsMessage::Binary(_) => continue,
                WsMessage::Closed => StreamMessage::Disconnected(None),
                WsMessage::Failed(e) => StreamMessage::Disconnected(Some(e.to_string())),
            };

            let done = matches!(forwarded, StreamMessage::Disconnected(_));
            if tx.send(forwarded).await.is_err() {
                tracing::debug!("Stream receiver dropped, stopping feed");
                break;
            }
            if done {
                break;
            }
        }
    }
}

#[async_trait]
impl MarketDataSource for BinanceFuturesFeed {
    fn page_size(&self) -> usize {
        self.config.page_size.clamp(1, MAX_PAGE_SIZE)
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, FeedError> {
        let what = format!("klines {} {}", symbol, interval);
        self.retry
            .run(&what, || self.fetch_page(symbol, interval, start, end))
            .await
    }
}

#[async_trait]
impl MarketStream for BinanceFuturesFeed {
    async fn subscribe(
        &self,
        symbols: &[String],
        intervals: &[Interval],
        shutdown: watch::Receiver<bool>,
    ) -> Result<mpsc::Receiver<StreamMessage>, FeedError> {
        let url = self.stream_url(symbols, intervals);
        tracing::info!(%url, "Subscribing to kline stream");

        let client = WsClient::new(WsConfig::from_feed(url, &self.config));
        let (ws_rx, _handle) = client.connect(shutdown);

        let (tx, rx) = mpsc::channel(1024);
        tokio::spawn(Self::run_message_loop(ws_rx, tx));
        Ok(rx)
    }
}
