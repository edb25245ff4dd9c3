pub mod results_api;
pub mod sqlite;

pub use results_api::{HttpResultsClient, ResultsFetcher};
pub use sqlite::{PendingRace, SqliteStore};
