//! Rolling per-symbol candle history for live sessions

use crate::candle::{Candle, CandleSeries, DataError, Interval, SyncedDataset};
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

/// Latest candles of every interval for one symbol.
///
/// Base candles are kept only once closed; coarser series also hold their
/// still-forming candle so the newest base tick stays covered. A coarse
/// candle received before its close covers only the ticks strictly inside
/// its window, so the tick that closes it waits for the final version.
#[derive(Debug)]
pub struct MarketHistory {
    symbol: String,
    base: Interval,
    series: BTreeMap<Interval, CandleSeries>,
    /// Open times of coarse candles last seen while still forming
    forming: BTreeSet<(Interval, DateTime<Utc>)>,
    retention: Duration,
    last_tick: Option<DateTime<Utc>>,
}

impl MarketHistory {
    pub fn new(symbol: &str, base: Interval, intervals: &[Interval], lookback: Duration) -> Self {
        let mut series = BTreeMap::new();
        series.insert(base, CandleSeries::empty(symbol, base));
        for interval in intervals.iter().filter(|i| **i > base) {
            series.insert(*interval, CandleSeries::empty(symbol, *interval));
        }
        let widest = series.keys().last().copied().unwrap_or(base);

        Self {
            symbol: symbol.to_string(),
            base,
            series,
            forming: BTreeSet::new(),
            retention: lookback + widest.duration() * 2,
            last_tick: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn series(&self, interval: Interval) -> Option<&CandleSeries> {
        self.series.get(&interval)
    }

    /// Upsert candles; base candles closing at or after `now` are still forming and dropped
    pub fn merge(&mut self, interval: Interval, candles: Vec<Candle>, now: DateTime<Utc>) -> usize {
        let base = self.base;
        let Some(series) = self.series.get_mut(&interval) else {
            return 0;
        };
        if interval != base {
            for candle in &candles {
                if candle.close_time >= now {
                    self.forming.insert((interval, candle.open_time));
                } else {
                    self.forming.remove(&(interval, candle.open_time));
                }
            }
        }
        let appended = series.merge(
            candles
                .into_iter()
                .filter(|c| interval != base || c.close_time < now),
        );

        let kept_from = interval.window_start(now - self.retention);
        series.trim_before(kept_from);
        self.forming
            .retain(|(i, open_time)| *i != interval || *open_time >= kept_from);
        appended
    }

    /// Last instant `series` covers with final data
    fn covered_until(&self, interval: Interval, series: &CandleSeries) -> Option<DateTime<Utc>> {
        let last = series.last()?;
        let forming = self
            .forming
            .range((interval, DateTime::<Utc>::MIN_UTC)..)
            .take_while(|(i, _)| *i == interval)
            .filter_map(|(_, open_time)| series.candles().iter().find(|c| c.open_time == *open_time))
            .map(|c| c.close_time - Duration::milliseconds(1))
            .min();
        Some(forming.map_or(last.close_time, |f| f.min(last.close_time)))
    }

    /// Newest closed base tick that has not been handed to the engine
    pub fn pending_tick(&self) -> Option<DateTime<Utc>> {
        let latest = self.series.get(&self.base)?.last()?.close_time;
        match self.last_tick {
            Some(done) if done >= latest => None,
            _ => Some(latest),
        }
    }

    pub fn mark_processed(&mut self, tick: DateTime<Utc>) {
        self.last_tick = Some(self.last_tick.map_or(tick, |t| t.max(tick)));
    }

    /// Resample the history, clipping base ticks to the span every coarse series covers
    pub fn dataset(&self) -> Result<SyncedDataset, DataError> {
        let mut start: Option<DateTime<Utc>> = None;
        let mut end: Option<DateTime<Utc>> = None;
        let mut coarser = Vec::new();
        for (interval, series) in &self.series {
            if *interval == self.base {
                continue;
            }
            let (Some(first), Some(covered)) = (series.first(), self.covered_until(*interval, series))
            else {
                return Err(DataError::EmptySeries(format!("{} {}", self.symbol, interval)));
            };
            start = Some(start.map_or(first.open_time, |s| s.max(first.open_time)));
            end = Some(end.map_or(covered, |e| e.min(covered)));
            coarser.push(series.clone());
        }

        let base = self
            .series
            .get(&self.base)
            .ok_or_else(|| DataError::EmptySeries(self.symbol.clone()))?;
        let clipped: Vec<Candle> = base
            .candles()
            .iter()
            .filter(|c| start.map_or(true, |s| c.open_time >= s))
            .filter(|c| end.map_or(true, |e| c.close_time <= e))
            .cloned()
            .collect();

        let base = CandleSeries::new(self.symbol.clone(), self.base, clipped)?;
        SyncedDataset::build(&base, &coarser)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::series::tests::{candle_at, t0};
    use rust_decimal_macros::dec;

    fn minutes(range: std::ops::Range<i64>) -> Vec<Candle> {
        range.map(|i| candle_at(Interval::M1, i, 100 + i)).collect()
    }

    #[test]
    fn test_forming_base_candle_dropped() {
        let mut history = MarketHistory::new("BTCUSDT", Interval::M1, &[], Duration::hours(1));
        // Minute 9 closes at 9:59.999, after "now"
        let now = t0() + Duration::minutes(9) + Duration::seconds(30);
        assert_eq!(history.merge(Interval::M1, minutes(0..10), now), 9);

        let expected = candle_at(Interval::M1, 8, 108).close_time;
        assert_eq!(history.pending_tick(), Some(expected));
        history.mark_processed(expected);
        assert_eq!(history.pending_tick(), None);
    }

    #[test]
    fn test_retention_trims_old_candles() {
        let mut history =
            MarketHistory::new("BTCUSDT", Interval::M1, &[], Duration::minutes(10));
        let now = t0() + Duration::minutes(60);
        history.merge(Interval::M1, minutes(0..60), now);

        // Ten minutes of lookback plus two base widths
        let series = history.series(Interval::M1).unwrap();
        assert_eq!(series.len(), 12);
        assert_eq!(series.first().unwrap().open_time, t0() + Duration::minutes(48));
    }

    #[test]
    fn test_dataset_clips_to_coarse_coverage() {
        let mut history =
            MarketHistory::new("BTCUSDT", Interval::M1, &[Interval::M5], Duration::hours(1));
        let now = t0() + Duration::minutes(12);
        history.merge(Interval::M1, minutes(0..12), now);
        // Coarse poll has only reached the 5-minute window ending at 9:59.999
        history.merge(
            Interval::M5,
            (0..2).map(|i| candle_at(Interval::M5, i, 100)).collect(),
            now,
        );

        let dataset = history.dataset().unwrap();
        assert_eq!(dataset.len(), 10);
        assert_ne!(dataset.tick_time(9), history.pending_tick());

        history.merge(
            Interval::M5,
            vec![candle_at(Interval::M5, 2, 110)],
            now,
        );
        let dataset = history.dataset().unwrap();
        assert_eq!(dataset.len(), 12);
        assert_eq!(dataset.tick_time(11), history.pending_tick());
    }

    #[test]
    fn test_early_coarse_candle_never_closes_a_window() {
        let mut history =
            MarketHistory::new("BTCUSDT", Interval::M1, &[Interval::M5], Duration::hours(1));
        // 5m poll lands half a minute before its window ends
        let mut early = candle_at(Interval::M5, 0, 100);
        early.close = dec!(103);
        history.merge(
            Interval::M5,
            vec![early],
            t0() + Duration::minutes(4) + Duration::seconds(30),
        );
        let after_close = t0() + Duration::minutes(5) + Duration::seconds(1);
        history.merge(Interval::M1, minutes(0..5), after_close);

        // The closing minute waits; earlier minutes use the running aggregate
        let dataset = history.dataset().unwrap();
        assert_eq!(dataset.len(), 4);
        assert_ne!(dataset.tick_time(3), history.pending_tick());
        let m5 = dataset.series(Interval::M5).unwrap();
        assert!(!m5.is_closed(3));
        assert_eq!(m5.get(3).unwrap().close, dec!(103));

        // Final candle arrives after the close and completes the window
        let mut closed = candle_at(Interval::M5, 0, 100);
        closed.close = dec!(104);
        history.merge(Interval::M5, vec![closed], after_close);
        let dataset = history.dataset().unwrap();
        assert_eq!(dataset.len(), 5);
        assert_eq!(dataset.tick_time(4), history.pending_tick());
        let m5 = dataset.series(Interval::M5).unwrap();
        assert!(m5.is_closed(4));
        assert_eq!(m5.get(4).unwrap().close, dec!(104));
        assert_eq!(dataset.tick(4).unwrap().close, dec!(104));
    }

    #[test]
    fn test_dataset_needs_coarse_data() {
        let mut history =
            MarketHistory::new("BTCUSDT", Interval::M1, &[Interval::M5], Duration::hours(1));
        history.merge(Interval::M1, minutes(0..5), t0() + Duration::minutes(5));
        assert!(matches!(history.dataset(), Err(DataError::EmptySeries(_))));
    }
}
