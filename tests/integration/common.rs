//! Shared synthetic market data

use chrono::{DateTime, Duration, TimeZone, Utc};
use perp_engine::candle::{Candle, CandleSeries, Interval};
use rust_decimal::Decimal;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
}

/// Close of minute `i`: a saw-tooth between 100 and 110
pub fn close(i: i64) -> Decimal {
    Decimal::from(100 + (i * 3) % 11)
}

/// Minute `i` opens at the previous close
pub fn minute(i: i64) -> Candle {
    let open_time = t0() + Duration::minutes(i);
    let open = if i == 0 { close(0) } else { close(i - 1) };
    let close = close(i);
    Candle {
        open_time,
        open,
        high: open.max(close) + Decimal::ONE,
        low: open.min(close) - Decimal::ONE,
        close,
        volume: Decimal::from(1 + i % 5),
        close_time: Interval::M1.close_time(open_time),
        quote_volume: close * Decimal::from(1 + i % 5),
        trade_count: 10,
        taker_buy_base_volume: Decimal::ONE,
        taker_buy_quote_volume: close,
    }
}

pub fn minutes(count: i64) -> CandleSeries {
    CandleSeries::new("BTCUSDT", Interval::M1, (0..count).map(minute).collect()).unwrap()
}

/// Aggregate minutes `[first, first + n)` the way an exchange reports the coarse candle
pub fn aggregate(interval: Interval, first: i64, n: i64) -> Candle {
    let parts: Vec<Candle> = (first..first + n).map(minute).collect();
    let open_time = parts[0].open_time;
    Candle {
        open_time,
        open: parts[0].open,
        high: parts.iter().map(|c| c.high).max().unwrap(),
        low: parts.iter().map(|c| c.low).min().unwrap(),
        close: parts[parts.len() - 1].close,
        volume: parts.iter().map(|c| c.volume).sum(),
        close_time: interval.close_time(open_time),
        quote_volume: parts.iter().map(|c| c.quote_volume).sum(),
        trade_count: parts.iter().map(|c| c.trade_count).sum(),
        taker_buy_base_volume: parts.iter().map(|c| c.taker_buy_base_volume).sum(),
        taker_buy_quote_volume: parts.iter().map(|c| c.taker_buy_quote_volume).sum(),
    }
}

/// Raw coarse series covering `count` base minutes
pub fn coarse(interval: Interval, count: i64) -> CandleSeries {
    let width = interval.millis() / Interval::M1.millis();
    let candles = (0..count / width)
        .map(|w| aggregate(interval, w * width, width))
        .collect();
    CandleSeries::new("BTCUSDT", interval, candles).unwrap()
}
