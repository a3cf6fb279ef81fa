//! End-to-end resampling of a two-hour minute series

use crate::common::{aggregate, coarse, minute, minutes, t0};
use chrono::Duration;
use perp_engine::candle::{Interval, LookbackIndex, SyncedDataset};
use rust_decimal_macros::dec;

fn dataset() -> SyncedDataset {
    SyncedDataset::build(
        &minutes(120),
        &[coarse(Interval::M5, 120), coarse(Interval::H1, 120)],
    )
    .unwrap()
}

#[test]
fn test_first_window_by_hand() {
    let dataset = dataset();
    let m5 = dataset.series(Interval::M5).unwrap();

    // Minutes 0..=2: opens 100 100 103, closes 100 103 106
    let forming = m5.get(2).unwrap();
    assert!(!m5.is_closed(2));
    assert_eq!(forming.open_time, t0());
    assert_eq!(forming.close_time, t0() + Duration::milliseconds(3 * 60_000 - 1));
    assert_eq!(forming.open, dec!(100));
    assert_eq!(forming.high, dec!(107));
    assert_eq!(forming.low, dec!(99));
    assert_eq!(forming.close, dec!(106));
    assert_eq!(forming.volume, dec!(6));

    // Minute 4 closes the window: closes 100 103 106 109 101
    let closed = m5.get(4).unwrap();
    assert!(m5.is_closed(4));
    assert_eq!(closed.high, dec!(110));
    assert_eq!(closed.low, dec!(99));
    assert_eq!(closed.close, dec!(101));
    assert_eq!(closed.volume, dec!(15));

    // Minute 5 starts a fresh window from its own candle
    let next = m5.get(5).unwrap();
    assert!(!m5.is_closed(5));
    assert_eq!(next.open_time, t0() + Duration::minutes(5));
    assert_eq!(next.open, dec!(101));
    assert_eq!(next.high, dec!(105));
    assert_eq!(next.low, dec!(100));
    assert_eq!(next.close, dec!(104));
    assert_eq!(next.volume, dec!(1));
}

#[test]
fn test_every_tick_matches_running_aggregate() {
    let dataset = dataset();
    assert_eq!(dataset.len(), 120);

    for (interval, width) in [(Interval::M5, 5i64), (Interval::H1, 60i64)] {
        let series = dataset.series(interval).unwrap();
        assert_eq!(series.len(), 120);

        for i in 0..120i64 {
            let first = i / width * width;
            let seen = i - first + 1;
            let mut expected = aggregate(interval, first, seen);
            expected.close_time = minute(i).close_time;

            let tick = i as usize;
            assert_eq!(
                series.is_closed(tick),
                seen == width,
                "{} closed flag at minute {}",
                interval,
                i
            );
            assert_eq!(
                series.get(tick).unwrap(),
                &expected,
                "{} entry at minute {}",
                interval,
                i
            );
        }
    }
}

#[test]
fn test_no_entry_sees_the_future() {
    let dataset = dataset();
    for interval in dataset.intervals() {
        let series = dataset.series(interval).unwrap();
        for i in 0..dataset.len() {
            let tick_close = dataset.tick_time(i).unwrap();
            assert!(series.get(i).unwrap().close_time <= tick_close);
        }
    }
}

#[test]
fn test_lookback_windows_over_the_series() {
    let dataset = dataset();
    let index = LookbackIndex::build(&dataset, Duration::minutes(30));

    // Last tick closes the 1:55 window: closed windows opening at 1:30 onwards
    let view = index.view(&dataset, 119).unwrap();
    let m5 = view.candles(Interval::M5);
    assert_eq!(m5.len(), 6);
    assert_eq!(m5[0].open_time, t0() + Duration::minutes(90));
    assert_eq!(m5[5], &aggregate(Interval::M5, 115, 5));
    assert_eq!(view.price, minute(119).close);

    // Two minutes earlier the 1:55 window is still forming and comes last
    let view = index.view(&dataset, 117).unwrap();
    let m5 = view.candles(Interval::M5);
    assert_eq!(m5.len(), 6);
    assert_eq!(m5[0].open_time, t0() + Duration::minutes(90));
    let forming = m5[5];
    assert_eq!(forming.open_time, t0() + Duration::minutes(115));
    assert_eq!(forming.close_time, minute(117).close_time);

    // The first hour opened before the lookback; only the forming hour is visible
    let h1 = view.candles(Interval::H1);
    assert_eq!(h1.len(), 1);
    assert_eq!(h1[0].open_time, t0() + Duration::minutes(60));
    assert_eq!(h1[0].close, minute(117).close);
}
