//! Benchmarks for dataset resampling and lookback indexing

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use perp_engine::candle::{Candle, CandleSeries, Interval, LookbackIndex, SyncedDataset};
use rust_decimal::Decimal;

/// One week of minutes plus the matching raw candles of `interval`
fn series(interval: Interval, minutes: i64) -> CandleSeries {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let width = interval.millis() / Interval::M1.millis();
    let candles = (0..minutes / width)
        .map(|i| {
            let open_time = start + Duration::minutes(i * width);
            let price = Decimal::from(40_000 + (i * 37) % 500);
            Candle {
                open_time,
                open: price,
                high: price + Decimal::TEN,
                low: price - Decimal::TEN,
                close: price,
                volume: Decimal::ONE,
                close_time: interval.close_time(open_time),
                quote_volume: price,
                trade_count: 1,
                taker_buy_base_volume: Decimal::ZERO,
                taker_buy_quote_volume: Decimal::ZERO,
            }
        })
        .collect();
    CandleSeries::new("BTCUSDT", interval, candles).unwrap()
}

const WEEK: i64 = 7 * 24 * 60;

fn benchmark_build(c: &mut Criterion) {
    let base = series(Interval::M1, WEEK);
    let coarser = vec![
        series(Interval::M5, WEEK),
        series(Interval::M15, WEEK),
        series(Interval::H1, WEEK),
        series(Interval::H4, WEEK),
    ];

    c.bench_function("synced_dataset_week_1m", |b| {
        b.iter(|| SyncedDataset::build(black_box(&base), black_box(&coarser)).unwrap())
    });
}

fn benchmark_lookback(c: &mut Criterion) {
    let base = series(Interval::M1, WEEK);
    let coarser = vec![series(Interval::M5, WEEK), series(Interval::H1, WEEK)];
    let dataset = SyncedDataset::build(&base, &coarser).unwrap();

    c.bench_function("lookback_index_week_24h", |b| {
        b.iter(|| LookbackIndex::build(black_box(&dataset), Duration::hours(24)))
    });

    let index = LookbackIndex::build(&dataset, Duration::hours(24));
    c.bench_function("lookback_view", |b| {
        b.iter(|| index.view(black_box(&dataset), black_box(WEEK as usize - 1)))
    });
}

criterion_group!(benches, benchmark_build, benchmark_lookback);
criterion_main!(benches);
