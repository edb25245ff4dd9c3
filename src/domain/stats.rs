//! Cumulative per-agent performance statistics.
//!
//! Statistics are folded forward one outcome at a time. ROI is always
//! recomputed from cumulative stake and payout rather than averaged, so
//! the figure stays exact no matter how outcomes arrive.

use crate::domain::bet::BetType;
use crate::domain::outcome::Outcome;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Placed and won counters for one bet shape.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeTally {
    pub placed: i64,
    pub won: i64,
}

/// Increments contributed by a single settled outcome.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatisticsDelta {
    pub bets: i64,
    pub wins: i64,
    pub losses: i64,
    pub stake: Decimal,
    pub payout: Decimal,
    pub per_type: BTreeMap<BetType, TypeTally>,
}

impl StatisticsDelta {
    pub fn from_outcome(outcome: &Outcome) -> Self {
        let mut per_type = BTreeMap::new();
        for (bet_type, result) in &outcome.results {
            per_type.insert(
                *bet_type,
                TypeTally {
                    placed: 1,
                    won: result.won as i64,
                },
            );
        }
        let bets = outcome.results.len() as i64;
        let wins = outcome.wins() as i64;
        Self {
            bets,
            wins,
            losses: bets - wins,
            stake: outcome.total_stake,
            payout: outcome.total_payout,
            per_type,
        }
    }
}

/// Lifetime statistics for one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatistics {
    pub agent_name: String,
    pub total_predictions: i64,
    pub total_bets: i64,
    pub total_wins: i64,
    pub total_losses: i64,
    pub total_stake: Decimal,
    pub total_payout: Decimal,
    pub net_profit: Decimal,
    /// (payout - stake) / stake * 100 over the whole history.
    pub roi_pct: Decimal,
    pub per_type: BTreeMap<BetType, TypeTally>,
    pub updated_at: DateTime<Utc>,
}

impl AgentStatistics {
    pub fn empty(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            total_predictions: 0,
            total_bets: 0,
            total_wins: 0,
            total_losses: 0,
            total_stake: Decimal::ZERO,
            total_payout: Decimal::ZERO,
            net_profit: Decimal::ZERO,
            roi_pct: Decimal::ZERO,
            per_type: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }

    /// Folds one settled outcome into the running totals.
    pub fn apply(&mut self, delta: &StatisticsDelta) {
        self.total_predictions += 1;
        self.total_bets += delta.bets;
        self.total_wins += delta.wins;
        self.total_losses += delta.losses;
        self.total_stake += delta.stake;
        self.total_payout += delta.payout;
        self.net_profit = self.total_payout - self.total_stake;
        self.roi_pct = if self.total_stake > Decimal::ZERO {
            (self.total_payout - self.total_stake) / self.total_stake * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        };
        for (bet_type, tally) in &delta.per_type {
            let entry = self.per_type.entry(*bet_type).or_default();
            entry.placed += tally.placed;
            entry.won += tally.won;
        }
        self.updated_at = Utc::now();
    }

    pub fn tally(&self, bet_type: BetType) -> TypeTally {
        self.per_type.get(&bet_type).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outcome::BetOutcome;
    use rust_decimal_macros::dec;

    fn outcome_with(
        results: Vec<(BetType, bool, Decimal)>,
        total_stake: Decimal,
        total_payout: Decimal,
    ) -> Outcome {
        let mut map = BTreeMap::new();
        for (bet_type, won, payout) in results {
            map.insert(bet_type, BetOutcome { won, payout });
        }
        Outcome {
            prediction_id: "p-1".to_string(),
            race_id: "race-1".to_string(),
            agent_name: "alpha".to_string(),
            finishing_order: Vec::new(),
            dividends: Default::default(),
            results: map,
            actual_dividends: BTreeMap::new(),
            total_stake,
            total_payout,
            net_profit: total_payout - total_stake,
            evaluated_at: Utc::now(),
        }
    }

    #[test]
    fn test_delta_counts_wins_and_losses() {
        let outcome = outcome_with(
            vec![
                (BetType::Win, true, dec!(42)),
                (BetType::Place, false, dec!(0)),
            ],
            dec!(20),
            dec!(42),
        );
        let delta = StatisticsDelta::from_outcome(&outcome);
        assert_eq!(delta.bets, 2);
        assert_eq!(delta.wins, 1);
        assert_eq!(delta.losses, 1);
        assert_eq!(delta.per_type[&BetType::Win].won, 1);
        assert_eq!(delta.per_type[&BetType::Place].won, 0);
    }

    #[test]
    fn test_roi_recomputed_from_cumulative_totals() {
        let mut stats = AgentStatistics::empty("alpha");

        let first = outcome_with(vec![(BetType::Win, true, dec!(30))], dec!(10), dec!(30));
        stats.apply(&StatisticsDelta::from_outcome(&first));
        assert_eq!(stats.roi_pct, dec!(200));

        let second = outcome_with(vec![(BetType::Win, false, dec!(0))], dec!(10), dec!(0));
        stats.apply(&StatisticsDelta::from_outcome(&second));
        // (30 - 20) / 20 * 100, not the average of 200 and -100.
        assert_eq!(stats.roi_pct, dec!(50));
        assert_eq!(stats.total_predictions, 2);
        assert_eq!(stats.net_profit, dec!(10));
        assert_eq!(stats.tally(BetType::Win).placed, 2);
        assert_eq!(stats.tally(BetType::Win).won, 1);
    }

    #[test]
    fn test_zero_stake_history_has_zero_roi() {
        let mut stats = AgentStatistics::empty("beta");
        let empty = outcome_with(vec![], Decimal::ZERO, Decimal::ZERO);
        stats.apply(&StatisticsDelta::from_outcome(&empty));
        assert_eq!(stats.roi_pct, Decimal::ZERO);
        assert_eq!(stats.total_predictions, 1);
        assert_eq!(stats.total_bets, 0);
    }
}
