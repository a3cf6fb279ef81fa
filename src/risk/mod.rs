//! Risk module
//!
//! Position state machine, portfolio accounting, tiered sizing and admission control

mod admission;
mod allocator;
mod ledger;
pub(crate) mod position;
mod types;

pub use admission::{Admission, AdmissionGuard, RejectReason};
pub use allocator::{Allocation, CapitalAllocator};
pub use ledger::{LedgerSnapshot, PortfolioLedger};
pub use position::{
    CloseReason, ClosedTrade, OpenRequest, Position, PositionState, StopCheck, StopPolicy,
};
pub use types::{PositionKey, PositionSide, RiskError};
