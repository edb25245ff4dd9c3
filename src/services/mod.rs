pub mod recovery;
pub mod result_checker;
pub mod settler;

pub use recovery::{evaluate_pending, EvaluationReport};
pub use result_checker::{CheckerStats, ResultChecker, ResultCheckerConfig, WatchedRace};
pub use settler::{settle_race, RaceSettlement};
