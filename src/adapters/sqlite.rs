//! SQLite storage adapter.
//!
//! Holds predictions, their settled outcomes, cumulative agent
//! statistics and the processed race markers. Outcome writes and the
//! statistics fold happen in one transaction so a crash can never leave
//! an outcome counted twice or not at all.
//!
//! Money columns are REAL; decimals cross the boundary through
//! [`to_db`]/[`from_db`] and nothing else in the crate touches floats.

use crate::domain::bet::{BetSlip, BetType};
use crate::domain::outcome::{ActualDividend, BetOutcome, Outcome};
use crate::domain::prediction::Prediction;
use crate::domain::race::{DividendEntry, Finisher};
use crate::domain::stats::{AgentStatistics, StatisticsDelta, TypeTally};
use crate::error::{Result, StewardError};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use tracing::{debug, info, instrument};

fn to_db(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn from_db(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => {
            matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation)
        }
        _ => false,
    }
}

/// A race that still has unsettled predictions.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRace {
    pub race_id: String,
    /// Earliest start time recorded across the race's predictions.
    pub race_start_time: DateTime<Utc>,
    pub prediction_count: i64,
}

/// SQLite storage adapter
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database behind `database_url`.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        info!("Connected to SQLite");
        Ok(Self { pool })
    }

    /// Create a store from an existing connection pool (zero-cost reuse)
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ==================== Predictions ====================

    /// Store a new prediction
    #[instrument(skip(self, prediction), fields(prediction_id = %prediction.id))]
    pub async fn save_prediction(&self, prediction: &Prediction) -> Result<()> {
        let bets = serde_json::to_string(&prediction.bets)?;
        let odds_snapshot = prediction
            .odds_snapshot
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO predictions (id, agent_name, race_id, race_start_time, bets, odds_snapshot, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&prediction.id)
        .bind(&prediction.agent_name)
        .bind(&prediction.race_id)
        .bind(prediction.race_start_time)
        .bind(bets)
        .bind(odds_snapshot)
        .bind(prediction.created_at)
        .execute(&self.pool)
        .await?;

        debug!(
            agent = %prediction.agent_name,
            race_id = %prediction.race_id,
            "Stored prediction"
        );
        Ok(())
    }

    /// Get a prediction by id
    pub async fn get_prediction(&self, prediction_id: &str) -> Result<Option<Prediction>> {
        let row = sqlx::query(
            r#"
            SELECT id, agent_name, race_id, race_start_time, bets, odds_snapshot, created_at
            FROM predictions WHERE id = ?
            "#,
        )
        .bind(prediction_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::prediction_from_row(&r)).transpose()
    }

    /// Predictions for a race that have no outcome yet, oldest first
    pub async fn pending_predictions_for_race(&self, race_id: &str) -> Result<Vec<Prediction>> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.agent_name, p.race_id, p.race_start_time, p.bets, p.odds_snapshot, p.created_at
            FROM predictions p
            WHERE p.race_id = ?
              AND NOT EXISTS (SELECT 1 FROM prediction_outcomes o WHERE o.prediction_id = p.id)
            ORDER BY p.created_at ASC
            "#,
        )
        .bind(race_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::prediction_from_row).collect()
    }

    /// Races that still have unsettled predictions, earliest start first
    pub async fn pending_races(&self) -> Result<Vec<PendingRace>> {
        let rows = sqlx::query(
            r#"
            SELECT p.race_id,
                   MIN(p.race_start_time) AS race_start_time,
                   COUNT(*) AS prediction_count
            FROM predictions p
            WHERE NOT EXISTS (SELECT 1 FROM prediction_outcomes o WHERE o.prediction_id = p.id)
            GROUP BY p.race_id
            ORDER BY race_start_time ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| PendingRace {
                race_id: r.get("race_id"),
                race_start_time: r.get("race_start_time"),
                prediction_count: r.get("prediction_count"),
            })
            .collect())
    }

    fn prediction_from_row(row: &SqliteRow) -> Result<Prediction> {
        let bets: BetSlip = serde_json::from_str(&row.get::<String, _>("bets"))?;
        let odds_snapshot = row
            .get::<Option<String>, _>("odds_snapshot")
            .map(|raw| serde_json::from_str(&raw))
            .transpose()?;

        Ok(Prediction {
            id: row.get("id"),
            agent_name: row.get("agent_name"),
            race_id: row.get("race_id"),
            race_start_time: row.get("race_start_time"),
            bets,
            odds_snapshot,
            created_at: row.get("created_at"),
        })
    }

    // ==================== Outcomes ====================

    /// Record a settled outcome and fold it into the agent's statistics,
    /// atomically. A second outcome for the same prediction is rejected
    /// with [`StewardError::DuplicateOutcome`] and the statistics are
    /// left untouched.
    #[instrument(skip(self, outcome), fields(prediction_id = %outcome.prediction_id, agent = %outcome.agent_name))]
    pub async fn save_outcome(&self, outcome: &Outcome) -> Result<()> {
        let finishing_order = serde_json::to_string(&outcome.finishing_order)?;
        let dividends = serde_json::to_string(&outcome.dividends)?;
        let actual_dividends = serde_json::to_string(&outcome.actual_dividends)?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO prediction_outcomes (
                prediction_id, race_id, agent_name, finishing_order, dividends,
                win_result, win_payout,
                place_result, place_payout,
                exacta_result, exacta_payout,
                quinella_result, quinella_payout,
                trifecta_result, trifecta_payout,
                first4_result, first4_payout,
                qps_result, qps_payout,
                total_stake, total_payout, net_profit,
                actual_dividends, evaluated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&outcome.prediction_id)
        .bind(&outcome.race_id)
        .bind(&outcome.agent_name)
        .bind(finishing_order)
        .bind(dividends)
        .bind(Self::result_flag(outcome, BetType::Win))
        .bind(Self::payout_for(outcome, BetType::Win))
        .bind(Self::result_flag(outcome, BetType::Place))
        .bind(Self::payout_for(outcome, BetType::Place))
        .bind(Self::result_flag(outcome, BetType::Exacta))
        .bind(Self::payout_for(outcome, BetType::Exacta))
        .bind(Self::result_flag(outcome, BetType::Quinella))
        .bind(Self::payout_for(outcome, BetType::Quinella))
        .bind(Self::result_flag(outcome, BetType::Trifecta))
        .bind(Self::payout_for(outcome, BetType::Trifecta))
        .bind(Self::result_flag(outcome, BetType::First4))
        .bind(Self::payout_for(outcome, BetType::First4))
        .bind(Self::result_flag(outcome, BetType::Qps))
        .bind(Self::payout_for(outcome, BetType::Qps))
        .bind(to_db(outcome.total_stake))
        .bind(to_db(outcome.total_payout))
        .bind(to_db(outcome.net_profit))
        .bind(actual_dividends)
        .bind(outcome.evaluated_at)
        .execute(&mut *tx)
        .await;

        if let Err(e) = inserted {
            if is_unique_violation(&e) {
                return Err(StewardError::DuplicateOutcome(
                    outcome.prediction_id.clone(),
                ));
            }
            return Err(e.into());
        }

        let mut stats = Self::fetch_statistics_tx(&mut tx, &outcome.agent_name)
            .await?
            .unwrap_or_else(|| AgentStatistics::empty(outcome.agent_name.clone()));
        stats.apply(&StatisticsDelta::from_outcome(outcome));
        Self::upsert_statistics_tx(&mut tx, &stats).await?;

        tx.commit().await?;

        debug!(
            race_id = %outcome.race_id,
            net_profit = %outcome.net_profit,
            "Recorded outcome"
        );
        Ok(())
    }

    /// Get the outcome recorded for a prediction, if any
    pub async fn get_outcome(&self, prediction_id: &str) -> Result<Option<Outcome>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM prediction_outcomes WHERE prediction_id = ?
            "#,
        )
        .bind(prediction_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| Self::outcome_from_row(&r)).transpose()
    }

    fn result_flag(outcome: &Outcome, bet_type: BetType) -> Option<i64> {
        outcome
            .result_for(bet_type)
            .map(|result| result.won as i64)
    }

    fn payout_for(outcome: &Outcome, bet_type: BetType) -> f64 {
        outcome
            .result_for(bet_type)
            .map(|result| to_db(result.payout))
            .unwrap_or(0.0)
    }

    fn outcome_from_row(row: &SqliteRow) -> Result<Outcome> {
        let finishing_order: Vec<Finisher> =
            serde_json::from_str(&row.get::<String, _>("finishing_order"))?;
        let dividends: HashMap<String, DividendEntry> =
            serde_json::from_str(&row.get::<String, _>("dividends"))?;
        let actual_dividends: BTreeMap<String, ActualDividend> =
            serde_json::from_str(&row.get::<String, _>("actual_dividends"))?;

        // NULL result columns are shapes the prediction never placed.
        let mut results = BTreeMap::new();
        for bet_type in BetType::ALL {
            let flag: Option<i64> = row.get(format!("{}_result", bet_type).as_str());
            if let Some(flag) = flag {
                let payout: f64 = row.get(format!("{}_payout", bet_type).as_str());
                results.insert(
                    bet_type,
                    BetOutcome {
                        won: flag != 0,
                        payout: from_db(payout),
                    },
                );
            }
        }

        Ok(Outcome {
            prediction_id: row.get("prediction_id"),
            race_id: row.get("race_id"),
            agent_name: row.get("agent_name"),
            finishing_order,
            dividends,
            results,
            actual_dividends,
            total_stake: from_db(row.get("total_stake")),
            total_payout: from_db(row.get("total_payout")),
            net_profit: from_db(row.get("net_profit")),
            evaluated_at: row.get("evaluated_at"),
        })
    }

    // ==================== Statistics ====================

    /// Get cumulative statistics for one agent
    pub async fn get_agent_statistics(&self, agent_name: &str) -> Result<Option<AgentStatistics>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM agent_statistics WHERE agent_name = ?
            "#,
        )
        .bind(agent_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Self::statistics_from_row(&r)))
    }

    /// Leaderboard ordered by ROI, best first
    pub async fn top_agents(&self, limit: i64) -> Result<Vec<AgentStatistics>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM agent_statistics ORDER BY roi_pct DESC, agent_name ASC LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(Self::statistics_from_row).collect())
    }

    /// Rebuild every agent's statistics from recorded outcomes. Returns
    /// the number of agents written.
    pub async fn recompute_statistics(&self) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM agent_statistics")
            .execute(&mut *tx)
            .await?;

        // Replay outcomes in settlement order so the fold matches what
        // incremental updates would have produced.
        let rows = sqlx::query(
            r#"
            SELECT * FROM prediction_outcomes ORDER BY evaluated_at ASC, id ASC
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut rebuilt: HashMap<String, AgentStatistics> = HashMap::new();
        for row in &rows {
            let outcome = Self::outcome_from_row(row)?;
            let stats = rebuilt
                .entry(outcome.agent_name.clone())
                .or_insert_with(|| AgentStatistics::empty(outcome.agent_name.clone()));
            stats.apply(&StatisticsDelta::from_outcome(&outcome));
        }

        for stats in rebuilt.values() {
            Self::upsert_statistics_tx(&mut tx, stats).await?;
        }

        tx.commit().await?;

        info!(
            agents = rebuilt.len(),
            outcomes = rows.len(),
            "Rebuilt agent statistics"
        );
        Ok(rebuilt.len())
    }

    async fn fetch_statistics_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        agent_name: &str,
    ) -> Result<Option<AgentStatistics>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM agent_statistics WHERE agent_name = ?
            "#,
        )
        .bind(agent_name)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(|r| Self::statistics_from_row(&r)))
    }

    async fn upsert_statistics_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        stats: &AgentStatistics,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_statistics (
                agent_name, total_predictions, total_bets, total_wins, total_losses,
                total_stake, total_payout, net_profit, roi_pct,
                win_bets_placed, win_bets_won,
                place_bets_placed, place_bets_won,
                exacta_bets_placed, exacta_bets_won,
                quinella_bets_placed, quinella_bets_won,
                trifecta_bets_placed, trifecta_bets_won,
                first4_bets_placed, first4_bets_won,
                qps_bets_placed, qps_bets_won,
                updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(agent_name) DO UPDATE SET
                total_predictions = excluded.total_predictions,
                total_bets = excluded.total_bets,
                total_wins = excluded.total_wins,
                total_losses = excluded.total_losses,
                total_stake = excluded.total_stake,
                total_payout = excluded.total_payout,
                net_profit = excluded.net_profit,
                roi_pct = excluded.roi_pct,
                win_bets_placed = excluded.win_bets_placed,
                win_bets_won = excluded.win_bets_won,
                place_bets_placed = excluded.place_bets_placed,
                place_bets_won = excluded.place_bets_won,
                exacta_bets_placed = excluded.exacta_bets_placed,
                exacta_bets_won = excluded.exacta_bets_won,
                quinella_bets_placed = excluded.quinella_bets_placed,
                quinella_bets_won = excluded.quinella_bets_won,
                trifecta_bets_placed = excluded.trifecta_bets_placed,
                trifecta_bets_won = excluded.trifecta_bets_won,
                first4_bets_placed = excluded.first4_bets_placed,
                first4_bets_won = excluded.first4_bets_won,
                qps_bets_placed = excluded.qps_bets_placed,
                qps_bets_won = excluded.qps_bets_won,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&stats.agent_name)
        .bind(stats.total_predictions)
        .bind(stats.total_bets)
        .bind(stats.total_wins)
        .bind(stats.total_losses)
        .bind(to_db(stats.total_stake))
        .bind(to_db(stats.total_payout))
        .bind(to_db(stats.net_profit))
        .bind(to_db(stats.roi_pct))
        .bind(stats.tally(BetType::Win).placed)
        .bind(stats.tally(BetType::Win).won)
        .bind(stats.tally(BetType::Place).placed)
        .bind(stats.tally(BetType::Place).won)
        .bind(stats.tally(BetType::Exacta).placed)
        .bind(stats.tally(BetType::Exacta).won)
        .bind(stats.tally(BetType::Quinella).placed)
        .bind(stats.tally(BetType::Quinella).won)
        .bind(stats.tally(BetType::Trifecta).placed)
        .bind(stats.tally(BetType::Trifecta).won)
        .bind(stats.tally(BetType::First4).placed)
        .bind(stats.tally(BetType::First4).won)
        .bind(stats.tally(BetType::Qps).placed)
        .bind(stats.tally(BetType::Qps).won)
        .bind(stats.updated_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    fn statistics_from_row(row: &SqliteRow) -> AgentStatistics {
        let mut per_type = BTreeMap::new();
        for bet_type in BetType::ALL {
            let placed: i64 = row.get(format!("{}_bets_placed", bet_type).as_str());
            let won: i64 = row.get(format!("{}_bets_won", bet_type).as_str());
            if placed != 0 || won != 0 {
                per_type.insert(bet_type, TypeTally { placed, won });
            }
        }

        AgentStatistics {
            agent_name: row.get("agent_name"),
            total_predictions: row.get("total_predictions"),
            total_bets: row.get("total_bets"),
            total_wins: row.get("total_wins"),
            total_losses: row.get("total_losses"),
            total_stake: from_db(row.get("total_stake")),
            total_payout: from_db(row.get("total_payout")),
            net_profit: from_db(row.get("net_profit")),
            roi_pct: from_db(row.get("roi_pct")),
            per_type,
            updated_at: row.get("updated_at"),
        }
    }

    // ==================== Processed race markers ====================

    /// True while a fresh marker exists for the race. Expired markers
    /// are dropped on read.
    pub async fn was_processed(&self, race_id: &str, ttl_secs: i64) -> Result<bool> {
        let row = sqlx::query("SELECT processed_at FROM processed_races WHERE race_id = ?")
            .bind(race_id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(false);
        };

        let processed_at: DateTime<Utc> = row.get("processed_at");
        if (Utc::now() - processed_at).num_seconds() > ttl_secs {
            sqlx::query("DELETE FROM processed_races WHERE race_id = ?")
                .bind(race_id)
                .execute(&self.pool)
                .await?;
            debug!(race_id, "Expired processed race marker");
            return Ok(false);
        }
        Ok(true)
    }

    /// Mark a race as fully processed
    pub async fn mark_processed(&self, race_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processed_races (race_id, processed_at)
            VALUES (?, ?)
            ON CONFLICT(race_id) DO UPDATE SET processed_at = excluded.processed_at
            "#,
        )
        .bind(race_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
