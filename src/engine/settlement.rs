//! Pure settlement of one prediction against one final race result.
//!
//! Settlement never touches storage or the clock. The caller supplies
//! the evaluation timestamp, so the same inputs always produce the same
//! [`Outcome`] and a replay after a crash cannot drift.

use crate::domain::bet::{BetSlip, BetType};
use crate::domain::outcome::{BetOutcome, Outcome};
use crate::domain::prediction::Prediction;
use crate::domain::race::RaceResult;
use crate::engine::dividends::{build_actual_dividends, entry_amount};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// First price that is present and positive. Operators publish zero for
/// prices they never formed, which counts as absent here.
fn best_price(primary: Option<Decimal>, fallback: Option<Decimal>) -> Option<Decimal> {
    primary
        .filter(|price| *price > Decimal::ZERO)
        .or_else(|| fallback.filter(|price| *price > Decimal::ZERO))
}

fn price_payout(price: Option<Decimal>, stake: Decimal, bet_type: BetType) -> Decimal {
    match price {
        Some(price) => stake * price,
        None => {
            debug!(%bet_type, "won bet has no usable price, paying zero");
            Decimal::ZERO
        }
    }
}

/// Stake multiplied by the published dividend for the shape. A won bet
/// with a missing or malformed dividend pays zero rather than failing
/// the whole settlement.
fn dividend_payout(result: &RaceResult, bet_type: BetType, stake: Decimal) -> Decimal {
    match result.dividend_for(bet_type) {
        Some(entry) => match entry_amount(entry) {
            Ok(amount) => stake * amount,
            Err(e) => {
                warn!(%bet_type, error = %e, "malformed dividend, paying zero");
                Decimal::ZERO
            }
        },
        None => {
            debug!(%bet_type, "no dividend published for won bet, paying zero");
            Decimal::ZERO
        }
    }
}

fn settle_slip(slip: &BetSlip, result: &RaceResult) -> BTreeMap<BetType, BetOutcome> {
    let mut results = BTreeMap::new();

    if let Some(bet) = &slip.win {
        let (won, payout) = match result.at_position(1) {
            Some(winner) if winner.number == bet.horse => {
                let price = best_price(winner.fixed_win, winner.tote_win);
                (true, price_payout(price, bet.stake, BetType::Win))
            }
            _ => (false, Decimal::ZERO),
        };
        results.insert(BetType::Win, BetOutcome { won, payout });
    }

    if let Some(bet) = &slip.place {
        let placed = result
            .finishing_order
            .iter()
            .filter(|finisher| (1..=3).contains(&finisher.position))
            .find(|finisher| finisher.number == bet.horse);
        let (won, payout) = match placed {
            Some(finisher) => {
                // Pays the placed horse's own place price, not the winner's.
                let price = best_price(finisher.fixed_place, finisher.tote_place);
                (true, price_payout(price, bet.stake, BetType::Place))
            }
            None => (false, Decimal::ZERO),
        };
        results.insert(BetType::Place, BetOutcome { won, payout });
    }

    if let Some(bet) = &slip.exacta {
        let won = result.top_horses(2) == [bet.first, bet.second];
        let payout = if won {
            dividend_payout(result, BetType::Exacta, bet.stake)
        } else {
            Decimal::ZERO
        };
        results.insert(BetType::Exacta, BetOutcome { won, payout });
    }

    if let Some(bet) = &slip.quinella {
        let mut top = result.top_horses(2);
        top.sort_unstable();
        // Selections are stored sorted, so equality is order independent.
        let won = top == bet.horses;
        let payout = if won {
            dividend_payout(result, BetType::Quinella, bet.stake)
        } else {
            Decimal::ZERO
        };
        results.insert(BetType::Quinella, BetOutcome { won, payout });
    }

    if let Some(bet) = &slip.trifecta {
        let won = result.top_horses(3) == [bet.first, bet.second, bet.third];
        let payout = if won {
            dividend_payout(result, BetType::Trifecta, bet.stake)
        } else {
            Decimal::ZERO
        };
        results.insert(BetType::Trifecta, BetOutcome { won, payout });
    }

    if let Some(bet) = &slip.first4 {
        let won = result.top_horses(4) == bet.horses;
        let payout = if won {
            dividend_payout(result, BetType::First4, bet.stake)
        } else {
            Decimal::ZERO
        };
        results.insert(BetType::First4, BetOutcome { won, payout });
    }

    if let Some(bet) = &slip.qps {
        let top3 = result.top_horses(3);
        let hits = bet
            .horses
            .iter()
            .filter(|horse| top3.contains(horse))
            .count();
        let won = hits >= 2;
        let payout = if won {
            dividend_payout(result, BetType::Qps, bet.stake)
        } else {
            Decimal::ZERO
        };
        results.insert(BetType::Qps, BetOutcome { won, payout });
    }

    results
}

/// Settles every bet on the prediction against the final result.
///
/// Each placed shape gets an entry whether it won or lost; shapes the
/// agent skipped get none. The raw finishing order and dividends are
/// carried onto the outcome for audit.
pub fn settle(prediction: &Prediction, result: &RaceResult, evaluated_at: DateTime<Utc>) -> Outcome {
    let results = settle_slip(&prediction.bets, result);
    let total_stake = prediction.bets.total_stake();
    let total_payout: Decimal = results.values().map(|outcome| outcome.payout).sum();
    let net_profit = total_payout - total_stake;

    debug!(
        prediction_id = %prediction.id,
        race_id = %prediction.race_id,
        bets = results.len(),
        wins = results.values().filter(|outcome| outcome.won).count(),
        %total_stake,
        %total_payout,
        "settled prediction"
    );

    Outcome {
        prediction_id: prediction.id.clone(),
        race_id: prediction.race_id.clone(),
        agent_name: prediction.agent_name.clone(),
        finishing_order: result.finishing_order.clone(),
        dividends: result.dividends.clone(),
        results,
        actual_dividends: build_actual_dividends(result),
        total_stake,
        total_payout,
        net_profit,
        evaluated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bet::{
        ExactaBet, First4Bet, PlaceBet, QpsBet, QuinellaBet, TrifectaBet, WinBet,
    };
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

    // Order 7, 2, 11, 5 with the usual dividend board.
    fn sample_result() -> RaceResult {
        let mut first = runner(1, 7);
        first.fixed_win = Some(dec!(4.2));
        first.tote_win = Some(dec!(3.9));
        first.fixed_place = Some(dec!(1.6));
        let mut second = runner(2, 2);
        second.tote_place = Some(dec!(2.1));
        let mut third = runner(3, 11);
        third.fixed_place = Some(dec!(1.8));
        RaceResult {
            race_id: "race-1".to_string(),
            finishing_order: vec![first, second, third, runner(4, 5)],
            dividends: serde_json::from_value(json!({
                "exacta": {"combination": "7-2", "amount": "$31.40"},
                "quinella": "$13.70",
                "trifecta": {"combination": "7-2-11", "amount": "$45.60"},
                "first_4": "$512.00",
                "qps": "$6.20"
            }))
            .unwrap(),
        }
    }

    fn prediction_with(bets: BetSlip) -> Prediction {
        Prediction {
            id: "p-1".to_string(),
            agent_name: "alpha".to_string(),
            race_id: "race-1".to_string(),
            race_start_time: Utc::now(),
            bets,
            odds_snapshot: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_winning_trifecta_pays_stake_times_dividend() {
        let slip = BetSlip {
            trifecta: Some(TrifectaBet::new(7, 2, 11, dec!(5)).unwrap()),
            ..Default::default()
        };
        let outcome = settle(&prediction_with(slip), &sample_result(), Utc::now());
        let trifecta = outcome.result_for(BetType::Trifecta).unwrap();
        assert!(trifecta.won);
        assert_eq!(trifecta.payout, dec!(228.00));
        assert_eq!(outcome.total_stake, dec!(5));
        assert_eq!(outcome.net_profit, dec!(223.00));
        assert_eq!(outcome.actual_dividends["trifecta"].combination, "7-2-11");
    }

    #[test]
    fn test_win_bet_uses_fixed_then_tote_price() {
        let slip = BetSlip {
            win: Some(WinBet::new(7, dec!(10)).unwrap()),
            ..Default::default()
        };
        let prediction = prediction_with(slip);

        let outcome = settle(&prediction, &sample_result(), Utc::now());
        assert_eq!(outcome.result_for(BetType::Win).unwrap().payout, dec!(42.0));

        // Zero fixed price falls through to the tote price.
        let mut result = sample_result();
        result.finishing_order[0].fixed_win = Some(dec!(0));
        let outcome = settle(&prediction, &result, Utc::now());
        assert_eq!(outcome.result_for(BetType::Win).unwrap().payout, dec!(39.0));

        // No price at all still records the win, paying zero.
        result.finishing_order[0].tote_win = None;
        let outcome = settle(&prediction, &result, Utc::now());
        let win = outcome.result_for(BetType::Win).unwrap();
        assert!(win.won);
        assert_eq!(win.payout, Decimal::ZERO);
    }

    #[test]
    fn test_losing_win_bet_is_recorded_not_dropped() {
        let slip = BetSlip {
            win: Some(WinBet::new(2, dec!(10)).unwrap()),
            ..Default::default()
        };
        let outcome = settle(&prediction_with(slip), &sample_result(), Utc::now());
        let win = outcome.result_for(BetType::Win).unwrap();
        assert!(!win.won);
        assert_eq!(win.payout, Decimal::ZERO);
        assert_eq!(outcome.net_profit, dec!(-10));
        assert_eq!(outcome.losses(), 1);
    }

    #[test]
    fn test_place_pays_the_placed_horses_own_price() {
        let slip = BetSlip {
            place: Some(PlaceBet::new(11, dec!(4)).unwrap()),
            ..Default::default()
        };
        let outcome = settle(&prediction_with(slip), &sample_result(), Utc::now());
        assert_eq!(
            outcome.result_for(BetType::Place).unwrap().payout,
            dec!(7.2)
        );

        let slip = BetSlip {
            place: Some(PlaceBet::new(2, dec!(4)).unwrap()),
            ..Default::default()
        };
        let outcome = settle(&prediction_with(slip), &sample_result(), Utc::now());
        assert_eq!(
            outcome.result_for(BetType::Place).unwrap().payout,
            dec!(8.4)
        );

        // Fourth place is not a place.
        let slip = BetSlip {
            place: Some(PlaceBet::new(5, dec!(4)).unwrap()),
            ..Default::default()
        };
        let outcome = settle(&prediction_with(slip), &sample_result(), Utc::now());
        assert!(!outcome.result_for(BetType::Place).unwrap().won);
    }

    #[test]
    fn test_order_sensitive_shapes_demand_exact_order() {
        let slip = BetSlip {
            exacta: Some(ExactaBet::new(2, 7, dec!(2)).unwrap()),
            quinella: Some(QuinellaBet::new(2, 7, dec!(2)).unwrap()),
            trifecta: Some(TrifectaBet::new(2, 7, 11, dec!(2)).unwrap()),
            first4: Some(First4Bet::new([7, 2, 11, 5], dec!(1)).unwrap()),
            ..Default::default()
        };
        let outcome = settle(&prediction_with(slip), &sample_result(), Utc::now());
        // Reversed exacta loses while the same pair wins the quinella.
        assert!(!outcome.result_for(BetType::Exacta).unwrap().won);
        let quinella = outcome.result_for(BetType::Quinella).unwrap();
        assert!(quinella.won);
        assert_eq!(quinella.payout, dec!(27.40));
        assert!(!outcome.result_for(BetType::Trifecta).unwrap().won);
        // First four in exact order, paid under the collector's key.
        let first4 = outcome.result_for(BetType::First4).unwrap();
        assert!(first4.won);
        assert_eq!(first4.payout, dec!(512.00));

        let slip = BetSlip {
            first4: Some(First4Bet::new([2, 7, 11, 5], dec!(1)).unwrap()),
            ..Default::default()
        };
        let outcome = settle(&prediction_with(slip), &sample_result(), Utc::now());
        assert!(!outcome.result_for(BetType::First4).unwrap().won);
    }

    #[test]
    fn test_qps_pays_on_any_two_of_the_top_three() {
        let slip = BetSlip {
            qps: Some(QpsBet::new(vec![11, 3, 2], dec!(2)).unwrap()),
            ..Default::default()
        };
        let outcome = settle(&prediction_with(slip), &sample_result(), Utc::now());
        let qps = outcome.result_for(BetType::Qps).unwrap();
        assert!(qps.won);
        assert_eq!(qps.payout, dec!(12.40));

        // Only one selection in the top three loses.
        let slip = BetSlip {
            qps: Some(QpsBet::new(vec![2, 5, 9], dec!(2)).unwrap()),
            ..Default::default()
        };
        let outcome = settle(&prediction_with(slip), &sample_result(), Utc::now());
        assert!(!outcome.result_for(BetType::Qps).unwrap().won);
    }

    #[test]
    fn test_missing_and_malformed_dividends_pay_zero() {
        let slip = BetSlip {
            exacta: Some(ExactaBet::new(7, 2, dec!(2)).unwrap()),
            ..Default::default()
        };
        let prediction = prediction_with(slip);

        let mut result = sample_result();
        result.dividends.clear();
        let outcome = settle(&prediction, &result, Utc::now());
        let exacta = outcome.result_for(BetType::Exacta).unwrap();
        assert!(exacta.won);
        assert_eq!(exacta.payout, Decimal::ZERO);

        let mut result = sample_result();
        result.dividends =
            serde_json::from_value(json!({"exacta": "not a number"})).unwrap();
        let outcome = settle(&prediction, &result, Utc::now());
        let exacta = outcome.result_for(BetType::Exacta).unwrap();
        assert!(exacta.won);
        assert_eq!(exacta.payout, Decimal::ZERO);
    }

    #[test]
    fn test_empty_slip_settles_to_empty_outcome() {
        let outcome = settle(
            &prediction_with(BetSlip::default()),
            &sample_result(),
            Utc::now(),
        );
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.total_stake, Decimal::ZERO);
        assert_eq!(outcome.total_payout, Decimal::ZERO);
        assert_eq!(outcome.net_profit, Decimal::ZERO);
    }

    #[test]
    fn test_totals_roll_up_across_shapes() {
        let slip = BetSlip {
            win: Some(WinBet::new(7, dec!(10)).unwrap()),
            exacta: Some(ExactaBet::new(7, 2, dec!(2)).unwrap()),
            place: Some(PlaceBet::new(5, dec!(3)).unwrap()),
            ..Default::default()
        };
        let outcome = settle(&prediction_with(slip), &sample_result(), Utc::now());
        assert_eq!(outcome.total_stake, dec!(15));
        // 10 * 4.2 + 2 * 31.40, the lost place adds nothing.
        assert_eq!(outcome.total_payout, dec!(104.80));
        assert_eq!(outcome.net_profit, dec!(89.80));
        assert_eq!(outcome.wins(), 2);
        assert_eq!(outcome.losses(), 1);
    }

    #[test]
    fn test_settlement_is_deterministic() {
        let slip = BetSlip {
            trifecta: Some(TrifectaBet::new(7, 2, 11, dec!(5)).unwrap()),
            qps: Some(QpsBet::new(vec![7, 2], dec!(2)).unwrap()),
            ..Default::default()
        };
        let prediction = prediction_with(slip);
        let result = sample_result();
        let evaluated_at = Utc::now();
        let first = settle(&prediction, &result, evaluated_at);
        let second = settle(&prediction, &result, evaluated_at);
        assert_eq!(first, second);
    }
}
