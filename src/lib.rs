pub mod adapters;
pub mod bus;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod services;

pub use adapters::{HttpResultsClient, ResultsFetcher, SqliteStore};
pub use bus::{Bus, EvaluatedPrediction, ResultsEvaluated, ScheduleResultCheck};
pub use config::AppConfig;
pub use domain::{
    AgentStatistics, BetSlip, BetType, CheckState, Outcome, Prediction, RaceResult,
};
pub use engine::settle;
pub use error::{Result, StewardError};
pub use services::{
    evaluate_pending, settle_race, EvaluationReport, ResultChecker, ResultCheckerConfig,
};
