//! Settles every pending prediction on one race.
//!
//! Both the background result checker and the catch-up evaluation run
//! go through [`settle_race`], so a race settles identically no matter
//! which path reached it first. One prediction failing to record never
//! stops the rest of the race from settling.

use crate::adapters::sqlite::SqliteStore;
use crate::bus::EvaluatedPrediction;
use crate::domain::race::RaceResult;
use crate::engine::settle;
use crate::error::{Result, StewardError};
use chrono::Utc;
use tracing::{debug, error, info};

/// What one [`settle_race`] call did.
#[derive(Debug, Clone, Default)]
pub struct RaceSettlement {
    /// Predictions settled and recorded by this call.
    pub settled: Vec<EvaluatedPrediction>,
    /// Predictions that turned out to already have an outcome.
    pub already_settled: usize,
    /// Predictions whose outcome could not be written.
    pub failed: usize,
    /// Dry run only: predictions that would have been recorded.
    pub would_settle: usize,
}

impl RaceSettlement {
    /// True when nothing needs a later retry.
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

/// Settle all pending predictions for `race_id` against `result`.
///
/// With `dry_run` set, outcomes are computed and logged but nothing is
/// written.
pub async fn settle_race(
    store: &SqliteStore,
    race_id: &str,
    result: &RaceResult,
    dry_run: bool,
) -> Result<RaceSettlement> {
    let pending = store.pending_predictions_for_race(race_id).await?;
    let mut settlement = RaceSettlement::default();

    if pending.is_empty() {
        debug!(race_id, "no pending predictions to settle");
        return Ok(settlement);
    }

    for prediction in &pending {
        let outcome = settle(prediction, result, Utc::now());

        if dry_run {
            info!(
                prediction_id = %prediction.id,
                agent = %prediction.agent_name,
                wins = outcome.wins(),
                net_profit = %outcome.net_profit,
                "dry run, outcome not recorded"
            );
            settlement.would_settle += 1;
            continue;
        }

        match store.save_outcome(&outcome).await {
            Ok(()) => {
                info!(
                    prediction_id = %prediction.id,
                    agent = %prediction.agent_name,
                    wins = outcome.wins(),
                    losses = outcome.losses(),
                    net_profit = %outcome.net_profit,
                    "settled prediction"
                );
                settlement.settled.push(EvaluatedPrediction {
                    agent_name: prediction.agent_name.clone(),
                    prediction_id: prediction.id.clone(),
                });
            }
            Err(StewardError::DuplicateOutcome(_)) => {
                // Another settler got there first; the recorded outcome stands.
                debug!(prediction_id = %prediction.id, "outcome already recorded");
                settlement.already_settled += 1;
            }
            Err(e) => {
                error!(
                    prediction_id = %prediction.id,
                    error = %e,
                    "failed to record outcome"
                );
                settlement.failed += 1;
            }
        }
    }

    Ok(settlement)
}
