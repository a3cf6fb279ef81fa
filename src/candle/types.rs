//! Candle and interval types

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Tolerance applied when comparing candle boundaries.
///
/// Exchanges report `close_time` as `open_time + interval - 1ms`, other sources use
/// `open_time + interval`. Both conventions must compare equal.
pub const BOUNDARY_TOLERANCE_MS: i64 = 1;

/// Monday 1970-01-05 00:00 UTC, origin of the weekly grid
const WEEK_ORIGIN_MS: i64 = 4 * 86_400_000;

/// Candle data errors
#[derive(Debug, Error)]
pub enum DataError {
    /// Raw candles do not cover the requested span (coverage gap)
    #[error("Data alignment error for {symbol} {interval}: {reason}")]
    DataAlignment {
        symbol: String,
        interval: Interval,
        reason: String,
    },
    /// Series is not strictly time ordered or windows overlap
    #[error("Out of order candle in {symbol} {interval} at index {index}")]
    OutOfOrder {
        symbol: String,
        interval: Interval,
        index: usize,
    },
    /// Candle violates `open_time < close_time`
    #[error("Invalid candle in {symbol} {interval} at index {index}")]
    InvalidCandle {
        symbol: String,
        interval: Interval,
        index: usize,
    },
    /// Base series is empty
    #[error("Empty base series for {0}")]
    EmptySeries(String),
    /// Unknown interval string
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),
}

/// Candle interval, stored as its length in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Interval(i64);

impl Interval {
    pub const M1: Interval = Interval(60_000);
    pub const M3: Interval = Interval(3 * 60_000);
    pub const M5: Interval = Interval(5 * 60_000);
    pub const M15: Interval = Interval(15 * 60_000);
    pub const M30: Interval = Interval(30 * 60_000);
    pub const H1: Interval = Interval(3_600_000);
    pub const H2: Interval = Interval(2 * 3_600_000);
    pub const H4: Interval = Interval(4 * 3_600_000);
    pub const H6: Interval = Interval(6 * 3_600_000);
    pub const H8: Interval = Interval(8 * 3_600_000);
    pub const H12: Interval = Interval(12 * 3_600_000);
    pub const D1: Interval = Interval(86_400_000);
    pub const D3: Interval = Interval(3 * 86_400_000);
    pub const W1: Interval = Interval(7 * 86_400_000);

    const ALL: [(Interval, &'static str); 14] = [
        (Interval::M1, "1m"),
        (Interval::M3, "3m"),
        (Interval::M5, "5m"),
        (Interval::M15, "15m"),
        (Interval::M30, "30m"),
        (Interval::H1, "1h"),
        (Interval::H2, "2h"),
        (Interval::H4, "4h"),
        (Interval::H6, "6h"),
        (Interval::H8, "8h"),
        (Interval::H12, "12h"),
        (Interval::D1, "1d"),
        (Interval::D3, "3d"),
        (Interval::W1, "1w"),
    ];

    /// Interval length in milliseconds
    pub fn millis(&self) -> i64 {
        self.0
    }

    /// Interval length as a duration
    pub fn duration(&self) -> Duration {
        Duration::milliseconds(self.0)
    }

    /// Exchange notation, e.g. "5m"
    pub fn as_str(&self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(i, _)| i == self)
            .map(|(_, s)| *s)
            .unwrap_or("?")
    }

    fn origin_ms(&self) -> i64 {
        if *self == Interval::W1 {
            WEEK_ORIGIN_MS
        } else {
            0
        }
    }

    /// Start of the grid window containing `ts`
    pub fn window_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let origin = self.origin_ms();
        let ms = ts.timestamp_millis() - origin;
        let start = ms.div_euclid(self.0) * self.0 + origin;
        DateTime::from_timestamp_millis(start).unwrap_or(ts)
    }

    /// First grid point strictly after `ts`
    pub fn next_boundary(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        self.window_start(ts) + self.duration()
    }

    /// Exchange close time for a window opening at `open_time`
    pub fn close_time(&self, open_time: DateTime<Utc>) -> DateTime<Utc> {
        open_time + self.duration() - Duration::milliseconds(1)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(i, _)| *i)
            .ok_or_else(|| DataError::InvalidInterval(s.to_string()))
    }
}

impl TryFrom<String> for Interval {
    type Error = DataError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.as_str().to_string()
    }
}

/// Whether two boundary timestamps denote the same instant.
///
/// Every "does this raw candle close on this base tick" decision goes through here.
pub fn same_boundary(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    (a - b).num_milliseconds().abs() <= BOUNDARY_TOLERANCE_MS
}

/// A single OHLCV candle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: DateTime<Utc>,
    pub quote_volume: Decimal,
    pub trade_count: u64,
    pub taker_buy_base_volume: Decimal,
    pub taker_buy_quote_volume: Decimal,
}

impl Candle {
    /// Zero-volume flat candle at `price`
    pub fn placeholder(open_time: DateTime<Utc>, close_time: DateTime<Utc>, price: Decimal) -> Self {
        Self {
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: Decimal::ZERO,
            close_time,
            quote_volume: Decimal::ZERO,
            trade_count: 0,
            taker_buy_base_volume: Decimal::ZERO,
            taker_buy_quote_volume: Decimal::ZERO,
        }
    }

    /// Start a running aggregate from a single candle, re-anchored at `open_time`
    pub fn seed_aggregate(&self, open_time: DateTime<Utc>) -> Self {
        Self {
            open_time,
            ..self.clone()
        }
    }

    /// Fold a later candle into this running aggregate
    pub fn absorb(&mut self, next: &Candle) {
        self.high = self.high.max(next.high);
        self.low = self.low.min(next.low);
        self.close = next.close;
        self.close_time = next.close_time;
        self.volume += next.volume;
        self.quote_volume += next.quote_volume;
        self.trade_count += next.trade_count;
        self.taker_buy_base_volume += next.taker_buy_base_volume;
        self.taker_buy_quote_volume += next.taker_buy_quote_volume;
    }

    /// Whether `ts` falls inside `[open_time, close_time]`
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.open_time <= ts && (ts <= self.close_time || same_boundary(ts, self.close_time))
    }
}
