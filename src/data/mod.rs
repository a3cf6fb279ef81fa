//! Data persistence module
//!
//! Parquet candle storage, the closed trade journal and ledger snapshots

mod journal;
mod parquet;
mod snapshot;

pub use journal::TradeJournal;
pub use parquet::{candle_schema, CandleStore};
pub use snapshot::{read_snapshot, write_snapshot};
