//! Settled outcomes recorded against predictions.

use crate::domain::bet::BetType;
use crate::domain::race::{DividendEntry, Finisher};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Result of one bet shape inside an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetOutcome {
    pub won: bool,
    pub payout: Decimal,
}

/// A paying combination observed in the final result, e.g. the trifecta
/// "7-2-11" at 142.80.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualDividend {
    pub combination: String,
    pub amount: Decimal,
}

/// Immutable settlement record for one prediction. Exactly one outcome
/// ever exists per prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub prediction_id: String,
    pub race_id: String,
    pub agent_name: String,
    /// Finishing order as fetched, kept for audit.
    pub finishing_order: Vec<Finisher>,
    /// Raw dividends as fetched, kept for audit.
    pub dividends: HashMap<String, DividendEntry>,
    /// Per shape results. An absent entry means the prediction never
    /// placed that shape, which is different from a lost bet.
    pub results: BTreeMap<BetType, BetOutcome>,
    /// Combination keyed view of what actually paid.
    pub actual_dividends: BTreeMap<String, ActualDividend>,
    pub total_stake: Decimal,
    pub total_payout: Decimal,
    pub net_profit: Decimal,
    pub evaluated_at: DateTime<Utc>,
}

impl Outcome {
    pub fn result_for(&self, bet_type: BetType) -> Option<&BetOutcome> {
        self.results.get(&bet_type)
    }

    pub fn wins(&self) -> usize {
        self.results.values().filter(|result| result.won).count()
    }

    pub fn losses(&self) -> usize {
        self.results.len() - self.wins()
    }
}
