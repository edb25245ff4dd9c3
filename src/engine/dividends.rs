//! Dividend amount parsing shared by every settlement caller.
//!
//! Operators publish amounts as numbers, as display strings such as
//! "$45.60" or "$2,345.60", or wrapped in a combination entry. One
//! parser handles all of it so no caller grows its own variant.

use crate::domain::outcome::ActualDividend;
use crate::domain::race::{DividendEntry, RaceResult};
use crate::error::{Result, StewardError};
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Parses a raw dividend amount into a decimal.
pub fn parse_amount(value: &Value) -> Result<Decimal> {
    let amount = match value {
        Value::Number(number) => Decimal::from_str(&number.to_string()).map_err(|e| {
            StewardError::MalformedDividend(format!("unparseable number {number}: {e}"))
        })?,
        Value::String(raw) => {
            let cleaned = raw.trim().replace('$', "").replace(',', "");
            if cleaned.is_empty() {
                return Err(StewardError::MalformedDividend(format!(
                    "empty amount string {raw:?}"
                )));
            }
            Decimal::from_str(&cleaned).map_err(|e| {
                StewardError::MalformedDividend(format!("unparseable amount {raw:?}: {e}"))
            })?
        }
        other => {
            return Err(StewardError::MalformedDividend(format!(
                "unsupported amount value: {other}"
            )))
        }
    };
    if amount < Decimal::ZERO {
        return Err(StewardError::MalformedDividend(format!(
            "negative amount {amount}"
        )));
    }
    Ok(amount)
}

/// Parses the amount out of either dividend entry shape.
pub fn entry_amount(entry: &DividendEntry) -> Result<Decimal> {
    parse_amount(entry.amount_value())
}

/// Maps the collector's underscored first-four key onto the bet name.
fn normalize_key(key: &str) -> &str {
    if key == "first_4" {
        "first4"
    } else {
        key
    }
}

fn derive_combination(key: &str, result: &RaceResult) -> Option<String> {
    let joined = |n: u32| -> Option<String> {
        let horses = result.top_horses(n);
        if horses.len() == n as usize {
            Some(
                horses
                    .iter()
                    .map(u8::to_string)
                    .collect::<Vec<_>>()
                    .join("-"),
            )
        } else {
            None
        }
    };

    match key {
        "win" => result.at_position(1).map(|f| f.number.to_string()),
        "exacta" => joined(2),
        "quinella" => {
            let mut horses = result.top_horses(2);
            if horses.len() != 2 {
                return None;
            }
            horses.sort_unstable();
            Some(format!("{}-{}", horses[0], horses[1]))
        }
        "trifecta" => joined(3),
        "first4" => joined(4),
        // QPS pays on any qualifying pair, there is no single combination.
        "qps" => Some("qps".to_string()),
        _ => None,
    }
}

/// Builds the combination keyed view of what actually paid. Entries with
/// unparseable amounts or underivable combinations are skipped, the raw
/// dividends stay on the outcome for audit either way.
pub fn build_actual_dividends(result: &RaceResult) -> BTreeMap<String, ActualDividend> {
    let mut actual = BTreeMap::new();
    for (key, entry) in &result.dividends {
        let key = normalize_key(key);
        let amount = match entry_amount(entry) {
            Ok(amount) => amount,
            Err(_) => continue,
        };
        let combination = entry
            .combination()
            .map(str::to_string)
            .or_else(|| derive_combination(key, result));
        if let Some(combination) = combination {
            actual.insert(key.to_string(), ActualDividend { combination, amount });
        }
    }
    actual
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::race::Finisher;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn runner(position: u32, number: u8) -> Finisher {
        Finisher {
            position,
            number,
            name: format!("Horse {number}"),
            fixed_win: None,
            fixed_place: None,
            tote_win: None,
            tote_place: None,
        }
    }

    #[test]
    fn test_parses_display_strings() {
        assert_eq!(parse_amount(&json!("$45.60")).unwrap(), dec!(45.60));
        assert_eq!(parse_amount(&json!("$2,345.60")).unwrap(), dec!(2345.60));
        assert_eq!(parse_amount(&json!("  $12 ")).unwrap(), dec!(12));
        assert_eq!(parse_amount(&json!("7.5")).unwrap(), dec!(7.5));
    }

    #[test]
    fn test_parses_bare_numbers() {
        assert_eq!(parse_amount(&json!(45.6)).unwrap(), dec!(45.6));
        assert_eq!(parse_amount(&json!(3)).unwrap(), dec!(3));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(parse_amount(&json!("")).is_err());
        assert!(parse_amount(&json!("$")).is_err());
        assert!(parse_amount(&json!("abc")).is_err());
        assert!(parse_amount(&json!(null)).is_err());
        assert!(parse_amount(&json!(["45.60"])).is_err());
        assert!(parse_amount(&json!("-5")).is_err());
    }

    #[test]
    fn test_entry_amount_handles_both_shapes() {
        let detailed: DividendEntry =
            serde_json::from_value(json!({"combination": "1-2", "amount": "$31.40"})).unwrap();
        assert_eq!(entry_amount(&detailed).unwrap(), dec!(31.40));
        let bare: DividendEntry = serde_json::from_value(json!(13.7)).unwrap();
        assert_eq!(entry_amount(&bare).unwrap(), dec!(13.7));
    }

    #[test]
    fn test_actual_dividends_view() {
        let result = RaceResult {
            finishing_order: vec![runner(1, 7), runner(2, 2), runner(3, 11)],
            dividends: serde_json::from_value(json!({
                "trifecta": {"combination": "7-2-11", "amount": "$142.80"},
                "quinella": 13.7,
                "exacta": "bad amount",
                "qps": "$6.20"
            }))
            .unwrap(),
            ..Default::default()
        };
        let actual = build_actual_dividends(&result);
        assert_eq!(actual["trifecta"].combination, "7-2-11");
        assert_eq!(actual["trifecta"].amount, dec!(142.80));
        // Derived for bare entries, sorted for quinella.
        assert_eq!(actual["quinella"].combination, "2-7");
        assert_eq!(actual["qps"].combination, "qps");
        // Malformed amounts are dropped from the view.
        assert!(!actual.contains_key("exacta"));
    }

    #[test]
    fn test_actual_dividends_normalizes_first4_key() {
        let result = RaceResult {
            finishing_order: vec![runner(1, 1), runner(2, 2), runner(3, 3), runner(4, 4)],
            dividends: serde_json::from_value(json!({"first_4": "$512.00"})).unwrap(),
            ..Default::default()
        };
        let actual = build_actual_dividends(&result);
        assert_eq!(actual["first4"].combination, "1-2-3-4");
        assert_eq!(actual["first4"].amount, dec!(512.00));
    }
}
