//! Causal multi-resolution resampling
//!
//! For every base tick `i` and every coarser interval, produces the candle of that
//! interval as it looked at the close of tick `i`: a running aggregate of the base
//! candles seen so far in the window, or the real raw candle once the window closes
//! exactly on the tick.

use super::{same_boundary, Candle, CandleSeries, DataError, Interval};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// One interval's causally aligned entries, one per base tick
#[derive(Debug, Clone, Default)]
pub struct SyncedSeries {
    candles: Vec<Candle>,
    closed: Vec<bool>,
}

impl SyncedSeries {
    fn with_capacity(n: usize) -> Self {
        Self {
            candles: Vec::with_capacity(n),
            closed: Vec::with_capacity(n),
        }
    }

    fn push(&mut self, candle: Candle, closed: bool) {
        self.candles.push(candle);
        self.closed.push(closed);
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// Entry at base tick `i`
    pub fn get(&self, i: usize) -> Option<&Candle> {
        self.candles.get(i)
    }

    /// Whether entry `i` is a fully closed raw candle
    pub fn is_closed(&self, i: usize) -> bool {
        self.closed.get(i).copied().unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

/// Causally aligned view of every interval for one symbol
#[derive(Debug, Clone)]
pub struct SyncedDataset {
    symbol: String,
    base: Interval,
    series: BTreeMap<Interval, SyncedSeries>,
}

impl SyncedDataset {
    /// Resample `coarser` raw series onto the ticks of `base`.
    ///
    /// Fails with [`DataError::DataAlignment`] when a coarse series does not cover a base
    /// tick, belongs to another symbol, or is not coarser than the base interval.
    pub fn build(base: &CandleSeries, coarser: &[CandleSeries]) -> Result<Self, DataError> {
        if base.is_empty() {
            return Err(DataError::EmptySeries(base.symbol().to_string()));
        }

        let n = base.len();
        let mut series = BTreeMap::new();

        let mut base_synced = SyncedSeries::with_capacity(n);
        for candle in base.candles() {
            base_synced.push(candle.clone(), true);
        }
        series.insert(base.interval(), base_synced);

        for raw in coarser {
            let synced = resample(base, raw)?;
            series.insert(raw.interval(), synced);
        }

        tracing::debug!(
            symbol = base.symbol(),
            base = %base.interval(),
            ticks = n,
            intervals = series.len(),
            "Built synced dataset"
        );

        Ok(Self {
            symbol: base.symbol().to_string(),
            base: base.interval(),
            series,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn base_interval(&self) -> Interval {
        self.base
    }

    /// Number of base ticks
    pub fn len(&self) -> usize {
        self.series.get(&self.base).map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All intervals, finest first
    pub fn intervals(&self) -> impl Iterator<Item = Interval> + '_ {
        self.series.keys().copied()
    }

    pub fn series(&self, interval: Interval) -> Option<&SyncedSeries> {
        self.series.get(&interval)
    }

    /// Base candle at tick `i`
    pub fn tick(&self, i: usize) -> Option<&Candle> {
        self.series.get(&self.base).and_then(|s| s.get(i))
    }

    /// Close time of base tick `i`
    pub fn tick_time(&self, i: usize) -> Option<DateTime<Utc>> {
        self.tick(i).map(|c| c.close_time)
    }
}

fn alignment_error(raw: &CandleSeries, reason: impl Into<String>) -> DataError {
    DataError::DataAlignment {
        symbol: raw.symbol().to_string(),
        interval: raw.interval(),
        reason: reason.into(),
    }
}

fn resample(base: &CandleSeries, raw: &CandleSeries) -> Result<SyncedSeries, DataError> {
    if raw.symbol() != base.symbol() {
        return Err(alignment_error(
            raw,
            format!("series belongs to {}, base is {}", raw.symbol(), base.symbol()),
        ));
    }
    if raw.interval() <= base.interval() {
        return Err(alignment_error(
            raw,
            format!("interval is not coarser than base {}", base.interval()),
        ));
    }
    if raw.is_empty() {
        return Err(alignment_error(raw, "no raw candles"));
    }

    let mut out = SyncedSeries::with_capacity(base.len());
    let mut cursor = 0usize;
    let mut window_open: Option<DateTime<Utc>> = None;
    let mut running: Option<Candle> = None;

    for tick in base.candles() {
        let idx = raw.locate_from(cursor, tick.close_time).ok_or_else(|| {
            alignment_error(raw, format!("no raw candle covers tick closing {}", tick.close_time))
        })?;
        cursor = idx;
        let window = &raw.candles()[idx];

        if window_open != Some(window.open_time) {
            window_open = Some(window.open_time);
            running = None;
        }

        // A base candle straddling the window start belongs to the previous window.
        if tick.open_time >= window.open_time {
            match running.as_mut() {
                Some(agg) => agg.absorb(tick),
                None => running = Some(tick.seed_aggregate(window.open_time)),
            }
        }

        if same_boundary(window.close_time, tick.close_time) {
            let mut entry = window.clone();
            entry.close_time = tick.close_time;
            out.push(entry, true);
            continue;
        }

        match &running {
            Some(agg) => out.push(agg.clone(), false),
            None => {
                tracing::warn!(
                    symbol = raw.symbol(),
                    interval = %raw.interval(),
                    tick_close = %tick.close_time,
                    "No base candle inside window yet, emitting placeholder"
                );
                out.push(
                    Candle::placeholder(window.open_time, tick.close_time, tick.close),
                    false,
                );
            }
        }
    }

    Ok(out)
}
