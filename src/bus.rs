//! In-process event bus connecting the settlement service to the rest
//! of the platform.
//!
//! Prediction writers publish [`ScheduleResultCheck`] when a race gains
//! its first prediction; the result checker publishes
//! [`ResultsEvaluated`] once that race settles. Both flow over tokio
//! broadcast channels, so any number of listeners can tap in and a slow
//! listener only ever lags, never blocks a publisher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Ask the result checker to watch a race from `check_time` onward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleResultCheck {
    pub race_id: String,
    /// When the first result fetch should happen.
    pub check_time: DateTime<Utc>,
    pub emitted_at: DateTime<Utc>,
}

/// One settled prediction inside a [`ResultsEvaluated`] event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatedPrediction {
    pub agent_name: String,
    pub prediction_id: String,
}

/// Announcement that every pending prediction on a race has settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsEvaluated {
    pub race_id: String,
    pub predictions: Vec<EvaluatedPrediction>,
    pub emitted_at: DateTime<Utc>,
}

/// Handle onto both channels. Cloning is cheap and every clone reaches
/// the same subscribers.
#[derive(Debug, Clone)]
pub struct Bus {
    schedule_tx: broadcast::Sender<ScheduleResultCheck>,
    evaluated_tx: broadcast::Sender<ResultsEvaluated>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (schedule_tx, _) = broadcast::channel(capacity);
        let (evaluated_tx, _) = broadcast::channel(capacity);
        Self {
            schedule_tx,
            evaluated_tx,
        }
    }

    /// Publishes a schedule request, returning how many listeners saw
    /// it. Zero listeners is not an error, the race is still recovered
    /// from storage on the next restart.
    pub fn publish_schedule(&self, event: ScheduleResultCheck) -> usize {
        self.schedule_tx.send(event).unwrap_or(0)
    }

    pub fn subscribe_schedule(&self) -> broadcast::Receiver<ScheduleResultCheck> {
        self.schedule_tx.subscribe()
    }

    pub fn publish_evaluated(&self, event: ResultsEvaluated) -> usize {
        self.evaluated_tx.send(event).unwrap_or(0)
    }

    pub fn subscribe_evaluated(&self) -> broadcast::Receiver<ResultsEvaluated> {
        self.evaluated_tx.subscribe()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(64)
    }
}
