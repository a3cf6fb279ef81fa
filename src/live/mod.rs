//! Live trading session
//!
//! REST pollers and the streaming feed feed one bounded queue; a single consumer
//! owns the candle history and the trading engine.

mod driver;
mod history;
mod shutdown;

pub use driver::LiveDriver;
pub use history::MarketHistory;
pub use shutdown::Shutdown;
