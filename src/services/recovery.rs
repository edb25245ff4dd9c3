//! Catch-up settlement for races whose checks were lost.
//!
//! Scans storage for races that still have pending predictions and
//! settles every one whose result is already out. Used by the
//! `evaluate-pending` command after downtime and safe to run while the
//! live checker is up, since outcome writes are idempotent.

use crate::adapters::results_api::ResultsFetcher;
use crate::adapters::sqlite::SqliteStore;
use crate::error::Result;
use crate::services::settler::settle_race;
use tracing::{debug, info, warn};

/// Totals from one catch-up evaluation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationReport {
    pub races_scanned: usize,
    pub races_settled: usize,
    /// Races whose results are not out yet.
    pub races_unavailable: usize,
    pub fetch_failures: usize,
    pub predictions_settled: usize,
    pub predictions_already_settled: usize,
    pub predictions_failed: usize,
    /// Dry run only: outcomes that would have been recorded.
    pub predictions_would_settle: usize,
}

impl EvaluationReport {
    pub fn log_summary(&self) {
        info!(
            "Evaluation complete: {} races scanned, {} settled, {} unavailable, {} fetch failures",
            self.races_scanned, self.races_settled, self.races_unavailable, self.fetch_failures
        );
        if self.predictions_would_settle > 0 {
            info!(
                "Dry run: {} outcomes would be recorded",
                self.predictions_would_settle
            );
        } else {
            info!(
                "Outcomes: {} recorded, {} already existed, {} failed",
                self.predictions_settled, self.predictions_already_settled, self.predictions_failed
            );
        }
    }
}

/// Settle every pending prediction whose race already has a result.
pub async fn evaluate_pending(
    store: &SqliteStore,
    fetcher: &dyn ResultsFetcher,
    dry_run: bool,
) -> Result<EvaluationReport> {
    let races = store.pending_races().await?;
    let mut report = EvaluationReport {
        races_scanned: races.len(),
        ..Default::default()
    };

    if races.is_empty() {
        info!("No pending predictions to evaluate");
        return Ok(report);
    }

    info!(
        "Evaluating {} races with pending predictions{}",
        races.len(),
        if dry_run { " (dry run)" } else { "" }
    );

    for race in &races {
        match fetcher.fetch_result(&race.race_id).await {
            Ok(Some(result)) if result.is_available() => {
                let settlement = settle_race(store, &race.race_id, &result, dry_run).await?;
                report.races_settled += 1;
                report.predictions_settled += settlement.settled.len();
                report.predictions_already_settled += settlement.already_settled;
                report.predictions_failed += settlement.failed;
                report.predictions_would_settle += settlement.would_settle;

                if !dry_run && settlement.is_clean() {
                    if let Err(e) = store.mark_processed(&race.race_id).await {
                        warn!("Failed to mark race {} processed: {}", race.race_id, e);
                    }
                }
            }
            Ok(_) => {
                debug!(
                    "Race {} has no results yet ({} predictions waiting)",
                    race.race_id, race.prediction_count
                );
                report.races_unavailable += 1;
            }
            Err(e) => {
                warn!("Result fetch failed for race {}: {}", race.race_id, e);
                report.fetch_failures += 1;
            }
        }
    }

    report.log_summary();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::results_api::MockResultsFetcher;

    #[tokio::test]
    async fn test_empty_database_reports_nothing() {
        let store = SqliteStore::new("sqlite::memory:", 1).await.unwrap();
        store.migrate().await.unwrap();

        let fetcher = MockResultsFetcher::new();
        let report = evaluate_pending(&store, &fetcher, false).await.unwrap();
        assert_eq!(report, EvaluationReport::default());
    }
}
