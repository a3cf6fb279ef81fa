//! Candle module
//!
//! Candle storage, causal multi-resolution resampling and lookback windows

mod lookback;
pub(crate) mod series;
mod sync;
mod types;

pub use lookback::{LookbackIndex, MarketView, WindowBounds};
pub use series::CandleSeries;
pub use sync::{SyncedDataset, SyncedSeries};
pub use types::{same_boundary, Candle, DataError, Interval, BOUNDARY_TOLERANCE_MS};
