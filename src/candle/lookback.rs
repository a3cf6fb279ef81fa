//! Precomputed sliding lookback windows over a synced dataset

use super::{Candle, Interval, SyncedDataset};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Window of one interval at one base tick.
///
/// `start..end` indexes the interval's closed entries; `current` is the still-forming
/// entry appended when it is not already the last closed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    pub start: usize,
    pub end: usize,
    pub current: Option<usize>,
}

#[derive(Debug, Clone, Default)]
struct IntervalWindows {
    closed: Vec<usize>,
    bounds: Vec<WindowBounds>,
}

/// Per-interval, per-tick lookback windows
#[derive(Debug, Clone)]
pub struct LookbackIndex {
    lookback: Duration,
    ticks: usize,
    windows: BTreeMap<Interval, IntervalWindows>,
}

impl LookbackIndex {
    /// Precompute windows bounded by `[tick.close_time - lookback, tick.close_time]`.
    ///
    /// Runs in time linear in the dataset size: both pointers only move forward.
    pub fn build(dataset: &SyncedDataset, lookback: Duration) -> Self {
        let ticks = dataset.len();
        let mut windows = BTreeMap::new();

        for interval in dataset.intervals() {
            let Some(series) = dataset.series(interval) else {
                continue;
            };

            let closed: Vec<usize> = (0..series.len()).filter(|&i| series.is_closed(i)).collect();
            let mut bounds = Vec::with_capacity(ticks);
            let (mut start, mut end) = (0usize, 0usize);

            for i in 0..ticks {
                let Some(tick_close) = dataset.tick_time(i) else {
                    break;
                };
                let lower = tick_close - lookback;

                while end < closed.len() && closed[end] <= i {
                    end += 1;
                }
                while start < end && series.candles()[closed[start]].open_time < lower {
                    start += 1;
                }

                let includes_current = start < end && closed[end - 1] == i;
                bounds.push(WindowBounds {
                    start,
                    end,
                    current: (!includes_current).then_some(i),
                });
            }

            windows.insert(interval, IntervalWindows { closed, bounds });
        }

        Self {
            lookback,
            ticks,
            windows,
        }
    }

    pub fn lookback(&self) -> Duration {
        self.lookback
    }

    /// Number of base ticks indexed
    pub fn len(&self) -> usize {
        self.ticks
    }

    pub fn is_empty(&self) -> bool {
        self.ticks == 0
    }

    /// Raw window bounds for `interval` at `tick`
    pub fn bounds(&self, interval: Interval, tick: usize) -> Option<WindowBounds> {
        self.windows.get(&interval)?.bounds.get(tick).copied()
    }

    /// Ordered dataset indices visible for `interval` at `tick`
    pub fn window(&self, interval: Interval, tick: usize) -> Option<Vec<usize>> {
        let windows = self.windows.get(&interval)?;
        let b = windows.bounds.get(tick)?;
        let mut indices = windows.closed[b.start..b.end].to_vec();
        indices.extend(b.current);
        Some(indices)
    }

    /// Borrowed view of every interval's window at `tick`
    pub fn view<'a>(&self, dataset: &'a SyncedDataset, tick: usize) -> Option<MarketView<'a>> {
        if dataset.len() != self.ticks {
            return None;
        }
        let base = dataset.tick(tick)?;

        let mut windows = BTreeMap::new();
        for interval in dataset.intervals() {
            let series = dataset.series(interval)?;
            let candles = self
                .window(interval, tick)?
                .into_iter()
                .filter_map(|i| series.get(i))
                .collect();
            windows.insert(interval, candles);
        }

        Some(MarketView {
            symbol: dataset.symbol(),
            tick,
            time: base.close_time,
            price: base.close,
            base: dataset.base_interval(),
            windows,
        })
    }
}

/// What a strategy sees at one base tick
#[derive(Debug, Clone)]
pub struct MarketView<'a> {
    pub symbol: &'a str,
    pub tick: usize,
    pub time: DateTime<Utc>,
    pub price: Decimal,
    pub base: Interval,
    pub windows: BTreeMap<Interval, Vec<&'a Candle>>,
}

impl<'a> MarketView<'a> {
    /// Window for `interval`, oldest first, forming candle last
    pub fn candles(&self, interval: Interval) -> &[&'a Candle] {
        self.windows
            .get(&interval)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Latest (possibly still forming) candle for `interval`
    pub fn latest(&self, interval: Interval) -> Option<&'a Candle> {
        self.candles(interval).last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::series::tests::candle_at;
    use crate::candle::CandleSeries;

    fn dataset(minutes: i64) -> SyncedDataset {
        let base = CandleSeries::new(
            "BTCUSDT",
            Interval::M1,
            (0..minutes).map(|i| candle_at(Interval::M1, i, 100 + i)).collect(),
        )
        .unwrap();
        let coarse = CandleSeries::new(
            "BTCUSDT",
            Interval::M5,
            (0..(minutes + 4) / 5)
                .map(|i| candle_at(Interval::M5, i, 100))
                .collect(),
        )
        .unwrap();
        SyncedDataset::build(&base, &[coarse]).unwrap()
    }

    #[test]
    fn test_pointers_are_monotonic() {
        let ds = dataset(60);
        let index = LookbackIndex::build(&ds, Duration::minutes(17));

        for interval in [Interval::M1, Interval::M5] {
            let mut prev = index.bounds(interval, 0).unwrap();
            for i in 1..ds.len() {
                let b = index.bounds(interval, i).unwrap();
                assert!(b.start >= prev.start, "start regressed at {i}");
                assert!(b.end >= prev.end, "end regressed at {i}");
                prev = b;
            }
        }
    }

    #[test]
    fn test_current_tick_always_visible() {
        let ds = dataset(30);
        let index = LookbackIndex::build(&ds, Duration::minutes(10));

        for interval in [Interval::M1, Interval::M5] {
            for i in 0..ds.len() {
                let w = index.window(interval, i).unwrap();
                assert_eq!(*w.last().unwrap(), i);
            }
        }
    }

    #[test]
    fn test_base_window_respects_lookback() {
        let ds = dataset(30);
        let index = LookbackIndex::build(&ds, Duration::minutes(10));

        // Tick 20 closes at 00:20:59.999; lower bound 00:10:59.999 admits opens from 00:11
        let w = index.window(Interval::M1, 20).unwrap();
        assert_eq!(w, (11..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_coarse_window_uses_closed_entries() {
        let ds = dataset(30);
        let index = LookbackIndex::build(&ds, Duration::minutes(20));

        // Tick 12: closed 5m entries at ticks 4 and 9, then the forming entry 12
        let w = index.window(Interval::M5, 12).unwrap();
        assert_eq!(w, vec![4, 9, 12]);

        // Tick 14 closes a 5m window itself, no duplicate
        let w = index.window(Interval::M5, 14).unwrap();
        assert_eq!(w, vec![4, 9, 14]);
        assert_eq!(index.bounds(Interval::M5, 14).unwrap().current, None);
    }

    #[test]
    fn test_view_borrows_windows() {
        let ds = dataset(30);
        let index = LookbackIndex::build(&ds, Duration::minutes(20));
        let view = index.view(&ds, 12).unwrap();

        assert_eq!(view.symbol, "BTCUSDT");
        assert_eq!(view.price, ds.tick(12).unwrap().close);
        assert_eq!(view.candles(Interval::M5).len(), 3);
        assert_eq!(view.latest(Interval::M5).unwrap().close_time, view.time);
        assert!(view.candles(Interval::H1).is_empty());
    }

    #[test]
    fn test_view_rejects_foreign_dataset() {
        let index = LookbackIndex::build(&dataset(30), Duration::minutes(20));
        assert!(index.view(&dataset(20), 3).is_none());
    }
}
