//! Agent predictions awaiting settlement.

use crate::domain::bet::BetSlip;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A stored agent prediction for one race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub agent_name: String,
    pub race_id: String,
    pub race_start_time: DateTime<Utc>,
    pub bets: BetSlip,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub odds_snapshot: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Prediction {
    /// Builds a prediction. When the race start time is not known the
    /// current time is substituted so the result checker still has an
    /// anchor to schedule from.
    pub fn new(
        id: impl Into<String>,
        agent_name: impl Into<String>,
        race_id: impl Into<String>,
        race_start_time: Option<DateTime<Utc>>,
        bets: BetSlip,
        odds_snapshot: Option<serde_json::Value>,
    ) -> Self {
        let id = id.into();
        let race_start_time = race_start_time.unwrap_or_else(|| {
            warn!(
                prediction_id = %id,
                "race start time missing, substituting current time"
            );
            Utc::now()
        });
        Self {
            id,
            agent_name: agent_name.into(),
            race_id: race_id.into(),
            race_start_time,
            bets,
            odds_snapshot,
            created_at: Utc::now(),
        }
    }
}
