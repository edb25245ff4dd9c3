//! Race results as published by the results collector.

use crate::domain::bet::BetType;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One horse in the finishing order with its published prices.
///
/// Prices are optional because the collector only carries what the
/// operator publishes. Fixed prices take priority over tote prices when
/// both are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finisher {
    pub position: u32,
    pub number: u8,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_win: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_place: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tote_win: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tote_place: Option<Decimal>,
}

/// One dividend as published, either a bare amount or a combination
/// entry. Amounts arrive as numbers or as display strings like "$45.60".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DividendEntry {
    Detailed {
        #[serde(default)]
        combination: Option<String>,
        amount: serde_json::Value,
    },
    Bare(serde_json::Value),
}

impl DividendEntry {
    /// Published combination string, when present and non-empty.
    pub fn combination(&self) -> Option<&str> {
        match self {
            DividendEntry::Detailed {
                combination: Some(combo),
                ..
            } if !combo.is_empty() => Some(combo),
            _ => None,
        }
    }

    pub fn amount_value(&self) -> &serde_json::Value {
        match self {
            DividendEntry::Detailed { amount, .. } => amount,
            DividendEntry::Bare(value) => value,
        }
    }
}

/// Final result for a single race. An empty finishing order means the
/// race has not produced a usable result yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RaceResult {
    #[serde(default)]
    pub race_id: String,
    #[serde(default)]
    pub finishing_order: Vec<Finisher>,
    #[serde(default)]
    pub dividends: HashMap<String, DividendEntry>,
}

impl RaceResult {
    /// True once a finishing order has been published.
    pub fn is_available(&self) -> bool {
        !self.finishing_order.is_empty()
    }

    pub fn at_position(&self, position: u32) -> Option<&Finisher> {
        self.finishing_order
            .iter()
            .find(|finisher| finisher.position == position)
    }

    /// Horse numbers at positions 1..=n, in finishing order. Shorter than
    /// `n` when the published order is incomplete.
    pub fn top_horses(&self, n: u32) -> Vec<u8> {
        (1..=n)
            .filter_map(|position| self.at_position(position))
            .map(|finisher| finisher.number)
            .collect()
    }

    /// Dividend for a bet type. The collector publishes first-four
    /// dividends under "first_4" while bets call it "first4", so both
    /// keys are honoured.
    pub fn dividend_for(&self, bet_type: BetType) -> Option<&DividendEntry> {
        match bet_type {
            BetType::First4 => self
                .dividends
                .get("first4")
                .or_else(|| self.dividends.get("first_4")),
            other => self.dividends.get(other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn wire_result() -> RaceResult {
        let raw = r#"{
            "race_id": "2024-08-17-ASC-R4",
            "finishing_order": [
                {"position": 1, "number": 7, "name": "Night Parade", "fixed_win": 4.2, "tote_win": 3.9},
                {"position": 2, "number": 2, "name": "Copper Sky"},
                {"position": 3, "number": 11, "name": "Low Tide", "fixed_place": 1.8}
            ],
            "dividends": {
                "exacta": "$31.40",
                "quinella": 13.7,
                "trifecta": {"combination": "7-2-11", "amount": "$142.80"},
                "first_4": {"combination": "", "amount": "$512.00"}
            }
        }"#;
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_parses_collector_payload() {
        let result = wire_result();
        assert_eq!(result.race_id, "2024-08-17-ASC-R4");
        assert!(result.is_available());
        assert_eq!(result.at_position(1).unwrap().number, 7);
        assert_eq!(result.at_position(1).unwrap().fixed_win, Some(dec!(4.2)));
        assert_eq!(result.top_horses(3), vec![7, 2, 11]);
        assert_eq!(result.top_horses(4), vec![7, 2, 11]);
    }

    #[test]
    fn test_dividend_shapes() {
        let result = wire_result();
        let trifecta = result.dividend_for(BetType::Trifecta).unwrap();
        assert_eq!(trifecta.combination(), Some("7-2-11"));
        let quinella = result.dividend_for(BetType::Quinella).unwrap();
        assert!(quinella.combination().is_none());
        assert_eq!(quinella.amount_value(), &serde_json::json!(13.7));
    }

    #[test]
    fn test_first4_key_alias() {
        let result = wire_result();
        let entry = result.dividend_for(BetType::First4).unwrap();
        // Empty combination strings count as absent.
        assert!(entry.combination().is_none());
        assert_eq!(entry.amount_value(), &serde_json::json!("$512.00"));
    }

    #[test]
    fn test_empty_body_means_unavailable() {
        let result: RaceResult = serde_json::from_str("{}").unwrap();
        assert!(!result.is_available());
        assert!(result.at_position(1).is_none());
        assert!(result.dividend_for(BetType::Win).is_none());
    }
}
