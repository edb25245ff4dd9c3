//! Deterministic settlement engine.

pub mod dividends;
pub mod settlement;

pub use dividends::{build_actual_dividends, entry_amount, parse_amount};
pub use settlement::settle;
