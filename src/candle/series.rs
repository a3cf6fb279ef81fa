//! Ordered candle storage for one (symbol, interval)

use super::{Candle, DataError, Interval};
use chrono::{DateTime, Utc};

/// Time-ordered, non-overlapping candles for one symbol and interval
#[derive(Debug, Clone)]
pub struct CandleSeries {
    symbol: String,
    interval: Interval,
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// Build a series, validating ordering and candle bounds
    pub fn new(
        symbol: impl Into<String>,
        interval: Interval,
        candles: Vec<Candle>,
    ) -> Result<Self, DataError> {
        let symbol = symbol.into();

        for (index, candle) in candles.iter().enumerate() {
            if candle.open_time >= candle.close_time {
                return Err(DataError::InvalidCandle {
                    symbol,
                    interval,
                    index,
                });
            }
            if index > 0 && candles[index - 1].close_time >= candle.open_time {
                return Err(DataError::OutOfOrder {
                    symbol,
                    interval,
                    index,
                });
            }
        }

        Ok(Self {
            symbol,
            interval,
            candles,
        })
    }

    /// Empty series
    pub fn empty(symbol: impl Into<String>, interval: Interval) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            candles: Vec::new(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn first(&self) -> Option<&Candle> {
        self.candles.first()
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Index of the candle whose window contains `ts`, searching from `from`
    pub fn locate_from(&self, from: usize, ts: DateTime<Utc>) -> Option<usize> {
        let mut idx = from;
        while idx < self.candles.len() {
            let candle = &self.candles[idx];
            if candle.contains(ts) {
                return Some(idx);
            }
            if candle.open_time > ts {
                return None;
            }
            idx += 1;
        }
        None
    }

    /// Upsert fresher candles, keeping order.
    ///
    /// Candles with an existing `open_time` replace the stored one (the still-forming
    /// candle is refreshed on every poll). Returns the number of new candles appended.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = Candle>) -> usize {
        let mut appended = 0;
        for candle in incoming {
            match self
                .candles
                .binary_search_by_key(&candle.open_time, |c| c.open_time)
            {
                Ok(pos) => self.candles[pos] = candle,
                Err(pos) => {
                    let overlaps_prev =
                        pos > 0 && self.candles[pos - 1].close_time >= candle.open_time;
                    let overlaps_next = pos < self.candles.len()
                        && candle.close_time >= self.candles[pos].open_time;
                    if overlaps_prev || overlaps_next {
                        tracing::warn!(
                            symbol = %self.symbol,
                            interval = %self.interval,
                            open_time = %candle.open_time,
                            "Dropping overlapping candle"
                        );
                        continue;
                    }
                    self.candles.insert(pos, candle);
                    appended += 1;
                }
            }
        }
        appended
    }

    /// Drop candles that opened before `cutoff`
    pub fn trim_before(&mut self, cutoff: DateTime<Utc>) {
        let keep_from = self.candles.partition_point(|c| c.open_time < cutoff);
        self.candles.drain(..keep_from);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    pub(crate) fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    pub(crate) fn candle_at(interval: Interval, index: i64, price: i64) -> Candle {
        let open_time = t0() + Duration::milliseconds(interval.millis() * index);
        let p = Decimal::from(price);
        Candle {
            open_time,
            open: p,
            high: p + Decimal::ONE,
            low: p - Decimal::ONE,
            close: p,
            volume: Decimal::ONE,
            close_time: interval.close_time(open_time),
            quote_volume: p,
            trade_count: 1,
            taker_buy_base_volume: Decimal::ZERO,
            taker_buy_quote_volume: Decimal::ZERO,
        }
    }

    #[test]
    fn test_new_accepts_ordered() {
        let candles = (0..5).map(|i| candle_at(Interval::M1, i, 100)).collect();
        let series = CandleSeries::new("BTCUSDT", Interval::M1, candles).unwrap();
        assert_eq!(series.len(), 5);
        assert_eq!(series.symbol(), "BTCUSDT");
    }

    #[test]
    fn test_new_rejects_out_of_order() {
        let candles = vec![candle_at(Interval::M1, 1, 100), candle_at(Interval::M1, 0, 100)];
        let err = CandleSeries::new("BTCUSDT", Interval::M1, candles).unwrap_err();
        assert!(matches!(err, DataError::OutOfOrder { index: 1, .. }));
    }

    #[test]
    fn test_new_rejects_inverted_candle() {
        let mut bad = candle_at(Interval::M1, 0, 100);
        bad.close_time = bad.open_time;
        let err = CandleSeries::new("BTCUSDT", Interval::M1, vec![bad]).unwrap_err();
        assert!(matches!(err, DataError::InvalidCandle { index: 0, .. }));
    }

    #[test]
    fn test_locate_from() {
        let candles = (0..4).map(|i| candle_at(Interval::M5, i, 100)).collect();
        let series = CandleSeries::new("BTCUSDT", Interval::M5, candles).unwrap();

        let ts = t0() + Duration::minutes(12);
        assert_eq!(series.locate_from(0, ts), Some(2));
        assert_eq!(series.locate_from(2, ts), Some(2));
        assert_eq!(series.locate_from(3, ts), None);
        assert_eq!(series.locate_from(0, t0() + Duration::hours(1)), None);
    }

    #[test]
    fn test_merge_upserts_and_appends() {
        let mut series = CandleSeries::new(
            "BTCUSDT",
            Interval::M1,
            (0..3).map(|i| candle_at(Interval::M1, i, 100)).collect(),
        )
        .unwrap();

        let refreshed = candle_at(Interval::M1, 2, 150);
        let appended = series.merge(vec![refreshed, candle_at(Interval::M1, 3, 160)]);

        assert_eq!(appended, 1);
        assert_eq!(series.len(), 4);
        assert_eq!(series.candles()[2].close, Decimal::from(150));
    }

    #[test]
    fn test_trim_before() {
        let mut series = CandleSeries::new(
            "BTCUSDT",
            Interval::M1,
            (0..10).map(|i| candle_at(Interval::M1, i, 100)).collect(),
        )
        .unwrap();
        series.trim_before(t0() + Duration::minutes(4));
        assert_eq!(series.len(), 6);
        assert_eq!(series.first().unwrap().open_time, t0() + Duration::minutes(4));
    }
}
