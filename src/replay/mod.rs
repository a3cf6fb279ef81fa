//! Replay module
//!
//! Tick-by-tick backtests over stored candles with reporting

mod driver;
mod report;

pub use driver::ReplayDriver;
pub use report::{ReplayReport, ReplaySummary};
