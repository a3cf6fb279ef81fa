//! Parquet candle store

use crate::candle::{Candle, CandleSeries, Interval};
use arrow::array::{ArrayRef, StringArray, TimestampMicrosecondArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use rust_decimal::Decimal;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

/// Decimal columns, stored as strings for precision
const DECIMAL_COLUMNS: [&str; 8] = [
    "open",
    "high",
    "low",
    "close",
    "volume",
    "quote_volume",
    "taker_buy_base_volume",
    "taker_buy_quote_volume",
];

fn timestamp_field(name: &str) -> Field {
    Field::new(
        name,
        DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
        false,
    )
}

/// Candle schema
pub fn candle_schema() -> Schema {
    let mut fields = vec![timestamp_field("open_time"), timestamp_field("close_time")];
    fields.extend(
        DECIMAL_COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Utf8, false)),
    );
    fields.push(Field::new("trade_count", DataType::UInt64, false));
    Schema::new(fields)
}

fn decimal_value(candle: &Candle, column: &str) -> Decimal {
    match column {
        "open" => candle.open,
        "high" => candle.high,
        "low" => candle.low,
        "close" => candle.close,
        "volume" => candle.volume,
        "quote_volume" => candle.quote_volume,
        "taker_buy_base_volume" => candle.taker_buy_base_volume,
        _ => candle.taker_buy_quote_volume,
    }
}

fn timestamp_column<'a>(
    batch: &'a RecordBatch,
    name: &str,
) -> anyhow::Result<&'a TimestampMicrosecondArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<TimestampMicrosecondArray>())
        .ok_or_else(|| anyhow::anyhow!("Invalid {} column", name))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> anyhow::Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Invalid {} column", name))
}

/// One Parquet file per (symbol, interval) under a directory
#[derive(Debug, Clone)]
pub struct CandleStore {
    dir: PathBuf,
}

impl CandleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{dir}/{SYMBOL}_{interval}.parquet`
    pub fn path(&self, symbol: &str, interval: Interval) -> PathBuf {
        self.dir
            .join(format!("{}_{}.parquet", symbol.to_uppercase(), interval))
    }

    pub fn exists(&self, symbol: &str, interval: Interval) -> bool {
        self.path(symbol, interval).exists()
    }

    /// Write a whole series, replacing any existing file
    pub fn write(&self, series: &CandleSeries) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(series.symbol(), series.interval());

        let schema = Arc::new(candle_schema());
        let candles = series.candles();

        let micros = |f: fn(&Candle) -> DateTime<Utc>| -> ArrayRef {
            Arc::new(
                TimestampMicrosecondArray::from(
                    candles.iter().map(|c| f(c).timestamp_micros()).collect::<Vec<_>>(),
                )
                .with_timezone("UTC"),
            )
        };
        let mut columns: Vec<ArrayRef> = vec![micros(|c| c.open_time), micros(|c| c.close_time)];
        for column in DECIMAL_COLUMNS {
            let values: Vec<String> = candles
                .iter()
                .map(|c| decimal_value(c, column).to_string())
                .collect();
            columns.push(Arc::new(StringArray::from(values)));
        }
        columns.push(Arc::new(UInt64Array::from(
            candles.iter().map(|c| c.trade_count).collect::<Vec<_>>(),
        )));

        let batch = RecordBatch::try_new(schema.clone(), columns)?;

        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let file = File::create(&path)?;
        let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
        writer.write(&batch)?;
        writer.close()?;

        tracing::debug!(path = ?path, count = candles.len(), "Wrote candles to Parquet");
        Ok(path)
    }

    /// Merge fresh candles into the stored series and rewrite it
    pub fn append(&self, series: &CandleSeries) -> anyhow::Result<PathBuf> {
        if !self.exists(series.symbol(), series.interval()) {
            return self.write(series);
        }
        let mut stored = self.read(series.symbol(), series.interval())?;
        stored.merge(series.candles().iter().cloned());
        self.write(&stored)
    }

    /// Read and validate a stored series
    pub fn read(&self, symbol: &str, interval: Interval) -> anyhow::Result<CandleSeries> {
        let path = self.path(symbol, interval);
        let file = File::open(&path)
            .map_err(|e| anyhow::anyhow!("Cannot open {}: {}", path.display(), e))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

        let mut candles = Vec::new();
        for batch_result in reader {
            let batch = batch_result?;

            let open_times = timestamp_column(&batch, "open_time")?;
            let close_times = timestamp_column(&batch, "close_time")?;
            let decimals = DECIMAL_COLUMNS
                .iter()
                .map(|name| string_column(&batch, name))
                .collect::<anyhow::Result<Vec<_>>>()?;
            let trade_counts = batch
                .column_by_name("trade_count")
                .and_then(|c| c.as_any().downcast_ref::<UInt64Array>())
                .ok_or_else(|| anyhow::anyhow!("Invalid trade_count column"))?;

            for i in 0..batch.num_rows() {
                let time = |array: &TimestampMicrosecondArray| {
                    DateTime::from_timestamp_micros(array.value(i))
                        .ok_or_else(|| anyhow::anyhow!("Invalid timestamp"))
                };
                let value = |col: usize| Decimal::from_str(decimals[col].value(i));

                candles.push(Candle {
                    open_time: time(open_times)?,
                    open: value(0)?,
                    high: value(1)?,
                    low: value(2)?,
                    close: value(3)?,
                    volume: value(4)?,
                    close_time: time(close_times)?,
                    quote_volume: value(5)?,
                    trade_count: trade_counts.value(i),
                    taker_buy_base_volume: value(6)?,
                    taker_buy_quote_volume: value(7)?,
                });
            }
        }

        tracing::debug!(path = ?path, count = candles.len(), "Read candles from Parquet");
        Ok(CandleSeries::new(symbol.to_uppercase(), interval, candles)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle::series::tests::candle_at;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn series(range: std::ops::Range<i64>) -> CandleSeries {
        CandleSeries::new(
            "BTCUSDT",
            Interval::M1,
            range.map(|i| candle_at(Interval::M1, i, 100 + i)).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_candle_schema() {
        let schema = candle_schema();
        assert_eq!(schema.fields().len(), 11);
        assert_eq!(schema.field(0).name(), "open_time");
        assert_eq!(schema.field(10).name(), "trade_count");
    }

    #[test]
    fn test_store_path() {
        let store = CandleStore::new("/data/candles");
        assert_eq!(
            store.path("btcusdt", Interval::H1),
            PathBuf::from("/data/candles/BTCUSDT_1h.parquet")
        );
    }

    #[test]
    fn test_write_and_read_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = CandleStore::new(temp_dir.path());

        let mut original = series(0..5);
        let mut odd = candle_at(Interval::M1, 5, 105);
        odd.close = dec!(105.123456789);
        odd.taker_buy_quote_volume = dec!(0.000001);
        original.merge([odd]);

        store.write(&original).unwrap();
        assert!(store.exists("BTCUSDT", Interval::M1));

        let read = store.read("BTCUSDT", Interval::M1).unwrap();
        assert_eq!(read.candles(), original.candles());
    }

    #[test]
    fn test_append_merges() {
        let temp_dir = TempDir::new().unwrap();
        let store = CandleStore::new(temp_dir.path().join("nested"));

        store.append(&series(0..5)).unwrap();
        store.append(&series(3..8)).unwrap();

        let read = store.read("BTCUSDT", Interval::M1).unwrap();
        assert_eq!(read.len(), 8);
    }

    #[test]
    fn test_read_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = CandleStore::new(temp_dir.path());
        assert!(store.read("ETHUSDT", Interval::M5).is_err());
    }
}
