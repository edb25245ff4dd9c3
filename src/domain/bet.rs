//! Bet shapes an agent can attach to a race prediction.
//!
//! Every shape validates its selections at construction time, so a
//! [`BetSlip`] that exists is always settleable.

use crate::error::{Result, StewardError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest horse number a bet may reference.
pub const MIN_HORSE_NUMBER: u8 = 1;
/// Highest horse number a bet may reference.
pub const MAX_HORSE_NUMBER: u8 = 30;

/// The seven bet shapes the settlement engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetType {
    Win,
    Place,
    Exacta,
    Quinella,
    Trifecta,
    First4,
    Qps,
}

impl BetType {
    /// All bet types in settlement order.
    pub const ALL: [BetType; 7] = [
        BetType::Win,
        BetType::Place,
        BetType::Exacta,
        BetType::Quinella,
        BetType::Trifecta,
        BetType::First4,
        BetType::Qps,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BetType::Win => "win",
            BetType::Place => "place",
            BetType::Exacta => "exacta",
            BetType::Quinella => "quinella",
            BetType::Trifecta => "trifecta",
            BetType::First4 => "first4",
            BetType::Qps => "qps",
        }
    }
}

impl fmt::Display for BetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn check_horse(number: u8) -> Result<()> {
    if !(MIN_HORSE_NUMBER..=MAX_HORSE_NUMBER).contains(&number) {
        return Err(StewardError::Validation(format!(
            "horse number {} is outside the field range {}-{}",
            number, MIN_HORSE_NUMBER, MAX_HORSE_NUMBER
        )));
    }
    Ok(())
}

fn check_stake(stake: Decimal) -> Result<()> {
    if stake <= Decimal::ZERO {
        return Err(StewardError::Validation(format!(
            "stake must be positive, got {stake}"
        )));
    }
    Ok(())
}

fn check_distinct(horses: &[u8]) -> Result<()> {
    let mut sorted = horses.to_vec();
    sorted.sort_unstable();
    if sorted.windows(2).any(|pair| pair[0] == pair[1]) {
        return Err(StewardError::Validation(
            "bet selections must be distinct horses".to_string(),
        ));
    }
    Ok(())
}

/// Back one horse to finish first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinBet {
    pub horse: u8,
    pub stake: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl WinBet {
    pub fn new(horse: u8, stake: Decimal) -> Result<Self> {
        check_horse(horse)?;
        check_stake(stake)?;
        Ok(Self {
            horse,
            stake,
            reasoning: None,
        })
    }
}

/// Back one horse to finish in the top three.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceBet {
    pub horse: u8,
    pub stake: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl PlaceBet {
    pub fn new(horse: u8, stake: Decimal) -> Result<Self> {
        check_horse(horse)?;
        check_stake(stake)?;
        Ok(Self {
            horse,
            stake,
            reasoning: None,
        })
    }
}

/// Pick the first two finishers in exact order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExactaBet {
    pub first: u8,
    pub second: u8,
    pub stake: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl ExactaBet {
    pub fn new(first: u8, second: u8, stake: Decimal) -> Result<Self> {
        check_horse(first)?;
        check_horse(second)?;
        check_distinct(&[first, second])?;
        check_stake(stake)?;
        Ok(Self {
            first,
            second,
            stake,
            reasoning: None,
        })
    }
}

/// Pick the first two finishers in either order. Selections are stored
/// sorted so equal bets compare equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuinellaBet {
    pub horses: [u8; 2],
    pub stake: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl QuinellaBet {
    pub fn new(first: u8, second: u8, stake: Decimal) -> Result<Self> {
        check_horse(first)?;
        check_horse(second)?;
        check_distinct(&[first, second])?;
        check_stake(stake)?;
        let mut horses = [first, second];
        horses.sort_unstable();
        Ok(Self {
            horses,
            stake,
            reasoning: None,
        })
    }
}

/// Pick the first three finishers in exact order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrifectaBet {
    pub first: u8,
    pub second: u8,
    pub third: u8,
    pub stake: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl TrifectaBet {
    pub fn new(first: u8, second: u8, third: u8, stake: Decimal) -> Result<Self> {
        check_horse(first)?;
        check_horse(second)?;
        check_horse(third)?;
        check_distinct(&[first, second, third])?;
        check_stake(stake)?;
        Ok(Self {
            first,
            second,
            third,
            stake,
            reasoning: None,
        })
    }
}

/// Pick the first four finishers in exact order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct First4Bet {
    pub horses: [u8; 4],
    pub stake: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl First4Bet {
    pub fn new(horses: [u8; 4], stake: Decimal) -> Result<Self> {
        for horse in horses {
            check_horse(horse)?;
        }
        check_distinct(&horses)?;
        check_stake(stake)?;
        Ok(Self {
            horses,
            stake,
            reasoning: None,
        })
    }
}

/// Quinella place: wins when at least two selections finish in the top
/// three. Takes two to four distinct horses, stored sorted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QpsBet {
    pub horses: Vec<u8>,
    pub stake: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl QpsBet {
    pub fn new(horses: Vec<u8>, stake: Decimal) -> Result<Self> {
        if horses.len() < 2 || horses.len() > 4 {
            return Err(StewardError::Validation(format!(
                "qps bets take between 2 and 4 horses, got {}",
                horses.len()
            )));
        }
        for &horse in &horses {
            check_horse(horse)?;
        }
        check_distinct(&horses)?;
        check_stake(stake)?;
        let mut horses = horses;
        horses.sort_unstable();
        Ok(Self {
            horses,
            stake,
            reasoning: None,
        })
    }
}

/// All bets one prediction places on a race, at most one per shape.
///
/// An absent field means the agent skipped that shape. The settlement
/// engine records nothing for absent bets, so a slip may legitimately
/// settle into an outcome with no per-shape results at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BetSlip {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub win: Option<WinBet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place: Option<PlaceBet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exacta: Option<ExactaBet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quinella: Option<QuinellaBet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trifecta: Option<TrifectaBet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first4: Option<First4Bet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qps: Option<QpsBet>,
}

impl BetSlip {
    pub fn total_stake(&self) -> Decimal {
        let mut total = Decimal::ZERO;
        if let Some(bet) = &self.win {
            total += bet.stake;
        }
        if let Some(bet) = &self.place {
            total += bet.stake;
        }
        if let Some(bet) = &self.exacta {
            total += bet.stake;
        }
        if let Some(bet) = &self.quinella {
            total += bet.stake;
        }
        if let Some(bet) = &self.trifecta {
            total += bet.stake;
        }
        if let Some(bet) = &self.first4 {
            total += bet.stake;
        }
        if let Some(bet) = &self.qps {
            total += bet.stake;
        }
        total
    }

    pub fn bet_count(&self) -> usize {
        [
            self.win.is_some(),
            self.place.is_some(),
            self.exacta.is_some(),
            self.quinella.is_some(),
            self.trifecta.is_some(),
            self.first4.is_some(),
            self.qps.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }

    pub fn is_empty(&self) -> bool {
        self.bet_count() == 0
    }
}
