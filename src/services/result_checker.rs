//! Scheduled race result checking background service
//!
//! Watches races that have pending predictions and, once each race's
//! check time arrives, fetches the final result and settles every
//! pending prediction on it. Races whose results are not out yet are
//! retried on a fixed interval until a retry budget runs out, then
//! abandoned. The watch set lives in memory; on startup it is rebuilt
//! from storage so a restart never orphans a race.

use crate::adapters::results_api::ResultsFetcher;
use crate::adapters::sqlite::SqliteStore;
use crate::bus::{Bus, ResultsEvaluated};
use crate::config::ResultsConfig;
use crate::domain::state::CheckState;
use crate::error::{Result, StewardError};
use crate::services::settler::settle_race;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

/// Configuration for the result checker
#[derive(Debug, Clone)]
pub struct ResultCheckerConfig {
    /// Interval between check cycles (seconds)
    pub check_interval_secs: u64,
    /// Delay after race start before the first check (minutes)
    pub wait_minutes: i64,
    /// Delay between retries for one race (seconds)
    pub retry_interval_secs: i64,
    /// Fetch attempts before a race is abandoned
    pub max_retries: u32,
    /// How far back restored checks may reach (hours)
    pub recovery_window_hours: i64,
    /// Lifetime of processed race markers (seconds)
    pub processed_ttl_secs: i64,
}

impl Default for ResultCheckerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            wait_minutes: 15,
            retry_interval_secs: 180, // 3 minutes
            max_retries: 5,
            recovery_window_hours: 24,
            processed_ttl_secs: 3600,
        }
    }
}

impl From<&ResultsConfig> for ResultCheckerConfig {
    fn from(config: &ResultsConfig) -> Self {
        Self {
            check_interval_secs: config.check_interval_secs,
            wait_minutes: config.wait_minutes,
            retry_interval_secs: config.retry_interval_secs,
            max_retries: config.max_retries,
            recovery_window_hours: config.recovery_window_hours,
            processed_ttl_secs: config.processed_ttl_secs,
        }
    }
}

/// One race in the watch set
#[derive(Debug, Clone)]
pub struct WatchedRace {
    pub race_id: String,
    pub state: CheckState,
    /// When the next fetch attempt is due
    pub next_check_at: DateTime<Utc>,
    pub retry_count: u32,
    pub scheduled_at: DateTime<Utc>,
}

impl WatchedRace {
    fn new(race_id: String, next_check_at: DateTime<Utc>) -> Self {
        Self {
            race_id,
            state: CheckState::Scheduled,
            next_check_at,
            retry_count: 0,
            scheduled_at: Utc::now(),
        }
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        matches!(self.state, CheckState::Scheduled | CheckState::Retrying)
            && self.next_check_at <= now
    }

    /// Move to `target`, rejecting transitions the state machine forbids
    pub fn transition_to(&mut self, target: CheckState) -> Result<()> {
        if !self.state.can_transition_to(target) {
            return Err(StewardError::InvalidStateTransition {
                from: self.state.to_string(),
                to: target.to_string(),
            });
        }
        debug!(
            "Race {} check state {} -> {}",
            self.race_id, self.state, target
        );
        self.state = target;
        Ok(())
    }
}

/// Result checker statistics
#[derive(Debug, Clone, Default)]
pub struct CheckerStats {
    pub cycles: u64,
    pub races_checked: u64,
    pub races_resolved: u64,
    pub races_abandoned: u64,
    pub predictions_settled: u64,
    pub fetch_failures: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// Counters gathered over one cycle before they fold into the stats.
#[derive(Default)]
struct CycleTally {
    checked: u64,
    resolved: u64,
    abandoned: u64,
    settled: u64,
    fetch_failures: u64,
}

/// Result checking background service
pub struct ResultChecker {
    fetcher: Arc<dyn ResultsFetcher>,
    store: Arc<SqliteStore>,
    bus: Bus,
    config: ResultCheckerConfig,
    /// Races being watched
    watched: Arc<RwLock<HashMap<String, WatchedRace>>>,
    /// Running flag
    running: Arc<AtomicBool>,
    /// Statistics
    stats: Arc<RwLock<CheckerStats>>,
}

impl ResultChecker {
    /// Create a new result checker
    pub fn new(
        fetcher: Arc<dyn ResultsFetcher>,
        store: Arc<SqliteStore>,
        bus: Bus,
        config: ResultCheckerConfig,
    ) -> Self {
        Self {
            fetcher,
            store,
            bus,
            config,
            watched: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(RwLock::new(CheckerStats::default())),
        }
    }

    /// Watch a race, with the first fetch due at `check_time`
    pub async fn watch_race(&self, race_id: impl Into<String>, check_time: DateTime<Utc>) {
        let mut watched = self.watched.write().await;
        Self::admit(&mut watched, race_id.into(), check_time);
    }

    fn admit(
        watched: &mut HashMap<String, WatchedRace>,
        race_id: String,
        check_time: DateTime<Utc>,
    ) {
        // A repeat announcement replaces the entry, resetting any retry
        // backoff the race had accumulated.
        info!("Watching race {} for results from {}", race_id, check_time);
        watched.insert(race_id.clone(), WatchedRace::new(race_id, check_time));
    }

    /// Rebuild the watch set from races that still have pending
    /// predictions. Races whose check time fell out of the recovery
    /// window stay dropped. Returns how many races were restored.
    pub async fn recover(&self) -> Result<usize> {
        let pending = self.store.pending_races().await?;
        let now = Utc::now();
        let window = Duration::hours(self.config.recovery_window_hours);
        let mut restored = 0usize;

        let mut watched = self.watched.write().await;
        for race in pending {
            let check_time = race.race_start_time + Duration::minutes(self.config.wait_minutes);
            if now - check_time > window {
                debug!(
                    "Skipping stale race {} (check was due {})",
                    race.race_id, check_time
                );
                continue;
            }
            Self::admit(&mut watched, race.race_id, check_time);
            restored += 1;
        }

        info!("Restored {} scheduled result checks", restored);
        Ok(restored)
    }

    /// Get current statistics
    pub async fn get_stats(&self) -> CheckerStats {
        self.stats.read().await.clone()
    }

    /// Get count of watched races
    pub async fn watched_count(&self) -> usize {
        self.watched.read().await.len()
    }

    /// Snapshot of the watch set
    pub async fn watched_snapshot(&self) -> Vec<WatchedRace> {
        self.watched.read().await.values().cloned().collect()
    }

    /// Start the check loop and the schedule listener
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Result checker already running");
            return;
        }

        info!(
            "Starting result checker (interval: {}s, wait: {}m, max retries: {})",
            self.config.check_interval_secs, self.config.wait_minutes, self.config.max_retries
        );

        // Subscribe before spawning so a request published right after
        // start() cannot slip past the listener.
        let mut schedule_rx = self.bus.subscribe_schedule();
        let watched = self.watched.clone();
        let listener_running = self.running.clone();
        tokio::spawn(async move {
            while listener_running.load(Ordering::SeqCst) {
                match schedule_rx.recv().await {
                    Ok(event) => {
                        let mut watched = watched.write().await;
                        Self::admit(&mut watched, event.race_id, event.check_time);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Schedule listener lagged, {} requests dropped", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let fetcher = self.fetcher.clone();
        let store = self.store.clone();
        let bus = self.bus.clone();
        let config = self.config.clone();
        let watched = self.watched.clone();
        let running = self.running.clone();
        let stats = self.stats.clone();

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(config.check_interval_secs));

            while running.load(Ordering::SeqCst) {
                interval.tick().await;

                if let Err(e) = Self::run_check_cycle(
                    fetcher.as_ref(),
                    &store,
                    &bus,
                    &config,
                    &watched,
                    &stats,
                )
                .await
                {
                    error!("Result check cycle failed: {}", e);
                }
            }

            info!("Result checker stopped");
        });
    }

    /// Stop the check loop
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("Result checker stop requested");
    }

    /// Run a single check cycle immediately
    pub async fn run_cycle_once(&self) -> Result<()> {
        Self::run_check_cycle(
            self.fetcher.as_ref(),
            &self.store,
            &self.bus,
            &self.config,
            &self.watched,
            &self.stats,
        )
        .await
    }

    /// Run one cycle over every race whose check is due
    async fn run_check_cycle(
        fetcher: &dyn ResultsFetcher,
        store: &SqliteStore,
        bus: &Bus,
        config: &ResultCheckerConfig,
        watched: &RwLock<HashMap<String, WatchedRace>>,
        stats: &RwLock<CheckerStats>,
    ) -> Result<()> {
        let now = Utc::now();

        let due: Vec<String> = {
            let map = watched.read().await;
            map.values()
                .filter(|race| race.is_due(now))
                .map(|race| race.race_id.clone())
                .collect()
        };

        if !due.is_empty() {
            debug!("Checking {} due races", due.len());
        }

        let mut tally = CycleTally::default();
        for race_id in &due {
            Self::check_race(fetcher, store, bus, config, watched, race_id, &mut tally).await;
        }

        let mut s = stats.write().await;
        s.cycles += 1;
        s.races_checked += tally.checked;
        s.races_resolved += tally.resolved;
        s.races_abandoned += tally.abandoned;
        s.predictions_settled += tally.settled;
        s.fetch_failures += tally.fetch_failures;
        s.last_cycle_at = Some(now);

        Ok(())
    }

    /// Check one race: fetch its result and settle if it is out.
    ///
    /// Every failure path lands in [`Self::retry_or_abandon`] rather
    /// than bubbling, so a race can never get stuck in `Checking`.
    async fn check_race(
        fetcher: &dyn ResultsFetcher,
        store: &SqliteStore,
        bus: &Bus,
        config: &ResultCheckerConfig,
        watched: &RwLock<HashMap<String, WatchedRace>>,
        race_id: &str,
        tally: &mut CycleTally,
    ) {
        // Claim the race for this attempt. A re-announcement between the
        // due scan and here puts it back to Scheduled and we back off.
        {
            let mut map = watched.write().await;
            let Some(race) = map.get_mut(race_id) else {
                return;
            };
            if let Err(e) = race.transition_to(CheckState::Checking) {
                debug!("Skipping race {}: {}", race_id, e);
                return;
            }
        }
        tally.checked += 1;

        // A fresh marker means another run already settled this race.
        let processed = match store.was_processed(race_id, config.processed_ttl_secs).await {
            Ok(processed) => processed,
            Err(e) => {
                warn!("Marker lookup failed for race {}: {}", race_id, e);
                false
            }
        };
        if processed {
            info!("Race {} already processed, dropping from watch set", race_id);
            Self::resolve(watched, race_id).await;
            tally.resolved += 1;
            return;
        }

        let result = match fetcher.fetch_result(race_id).await {
            Ok(Some(result)) if result.is_available() => result,
            Ok(Some(_)) => {
                debug!("Race {} has no finishing order yet", race_id);
                Self::retry_or_abandon(watched, config, race_id, tally).await;
                return;
            }
            Ok(None) => {
                debug!("Race {} unknown to the results collector", race_id);
                Self::retry_or_abandon(watched, config, race_id, tally).await;
                return;
            }
            Err(e) => {
                warn!("Result fetch failed for race {}: {}", race_id, e);
                tally.fetch_failures += 1;
                Self::retry_or_abandon(watched, config, race_id, tally).await;
                return;
            }
        };

        let settlement = match settle_race(store, race_id, &result, false).await {
            Ok(settlement) => settlement,
            Err(e) => {
                error!("Settlement failed for race {}: {}", race_id, e);
                Self::retry_or_abandon(watched, config, race_id, tally).await;
                return;
            }
        };

        if !settlement.is_clean() {
            warn!(
                "Race {} settled partially ({} outcomes failed), scheduling retry",
                race_id, settlement.failed
            );
            Self::retry_or_abandon(watched, config, race_id, tally).await;
            return;
        }

        tally.settled += settlement.settled.len() as u64;
        if !settlement.settled.is_empty() {
            bus.publish_evaluated(ResultsEvaluated {
                race_id: race_id.to_string(),
                predictions: settlement.settled.clone(),
                emitted_at: Utc::now(),
            });
        }

        if let Err(e) = store.mark_processed(race_id).await {
            warn!("Failed to mark race {} processed: {}", race_id, e);
        }

        info!(
            "Race {} resolved, {} predictions settled ({} already had outcomes)",
            race_id,
            settlement.settled.len(),
            settlement.already_settled
        );
        Self::resolve(watched, race_id).await;
        tally.resolved += 1;
    }

    /// Drop a race from the watch set through the Resolved state
    async fn resolve(watched: &RwLock<HashMap<String, WatchedRace>>, race_id: &str) {
        let mut map = watched.write().await;
        let Some(race) = map.get_mut(race_id) else {
            return;
        };
        if race.transition_to(CheckState::Resolved).is_err() {
            // Re-admitted mid-check; the fresh schedule stays.
            debug!("Race {} was rescheduled before resolution", race_id);
            return;
        }
        map.remove(race_id);
    }

    /// Count a failed attempt and either schedule a retry or abandon
    /// the race once the budget is spent
    async fn retry_or_abandon(
        watched: &RwLock<HashMap<String, WatchedRace>>,
        config: &ResultCheckerConfig,
        race_id: &str,
        tally: &mut CycleTally,
    ) {
        let mut map = watched.write().await;
        let Some(race) = map.get_mut(race_id) else {
            return;
        };
        if race.state != CheckState::Checking {
            // Re-admitted mid-check; leave the fresh schedule alone.
            debug!(
                "Race {} was rescheduled mid-check, leaving state {}",
                race_id, race.state
            );
            return;
        }

        race.retry_count += 1;
        if race.retry_count >= config.max_retries {
            warn!(
                "Race {} abandoned after {} attempts without results",
                race_id, race.retry_count
            );
            if race.transition_to(CheckState::Abandoned).is_ok() {
                map.remove(race_id);
            }
            tally.abandoned += 1;
            return;
        }

        let next = Utc::now() + Duration::seconds(config.retry_interval_secs);
        if race.transition_to(CheckState::Retrying).is_ok() {
            race.next_check_at = next;
            info!(
                "Race {} results not ready, retry {}/{} at {}",
                race_id, race.retry_count, config.max_retries, next
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::results_api::MockResultsFetcher;
    use crate::domain::bet::{BetSlip, WinBet};
    use crate::domain::prediction::Prediction;
    use crate::domain::race::{Finisher, RaceResult};
    use rust_decimal_macros::dec;

    async fn memory_store() -> SqliteStore {
        let store = SqliteStore::new("sqlite::memory:", 1).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    async fn seed_prediction(store: &SqliteStore, id: &str, agent: &str, race_id: &str) {
        let bets = BetSlip {
            win: Some(WinBet::new(7, dec!(10)).unwrap()),
            ..Default::default()
        };
        let prediction = Prediction::new(
            id,
            agent,
            race_id,
            Some(Utc::now() - Duration::minutes(30)),
            bets,
            None,
        );
        store.save_prediction(&prediction).await.unwrap();
    }

    fn finished_result() -> RaceResult {
        RaceResult {
            race_id: "race-1".to_string(),
            finishing_order: vec![Finisher {
                position: 1,
                number: 7,
                name: "Night Parade".to_string(),
                fixed_win: Some(dec!(4.2)),
                fixed_place: None,
                tote_win: None,
                tote_place: None,
            }],
            dividends: Default::default(),
        }
    }

    fn checker_with(
        fetcher: MockResultsFetcher,
        store: SqliteStore,
        bus: Bus,
        config: ResultCheckerConfig,
    ) -> ResultChecker {
        ResultChecker::new(Arc::new(fetcher), Arc::new(store), bus, config)
    }

    #[test]
    fn test_default_config() {
        let config = ResultCheckerConfig::default();
        assert_eq!(config.check_interval_secs, 60);
        assert_eq!(config.wait_minutes, 15);
        assert_eq!(config.retry_interval_secs, 180);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.recovery_window_hours, 24);
        assert_eq!(config.processed_ttl_secs, 3600);
    }

    #[tokio::test]
    async fn test_results_not_ready_schedules_retry() {
        let store = memory_store().await;
        seed_prediction(&store, "p-1", "alpha", "race-1").await;

        let mut fetcher = MockResultsFetcher::new();
        fetcher
            .expect_fetch_result()
            .times(1)
            .returning(|_| Ok(Some(RaceResult::default())));

        let checker = checker_with(
            fetcher,
            store,
            Bus::default(),
            ResultCheckerConfig::default(),
        );
        checker
            .watch_race("race-1", Utc::now() - Duration::seconds(1))
            .await;
        checker.run_cycle_once().await.unwrap();

        let snapshot = checker.watched_snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].state, CheckState::Retrying);
        assert_eq!(snapshot[0].retry_count, 1);
        assert!(snapshot[0].next_check_at > Utc::now());

        let stats = checker.get_stats().await;
        assert_eq!(stats.races_checked, 1);
        assert_eq!(stats.races_resolved, 0);
    }

    #[tokio::test]
    async fn test_abandons_after_retry_budget() {
        let store = memory_store().await;

        let mut fetcher = MockResultsFetcher::new();
        fetcher
            .expect_fetch_result()
            .times(3)
            .returning(|_| Ok(None));

        let config = ResultCheckerConfig {
            retry_interval_secs: 0,
            max_retries: 3,
            ..Default::default()
        };
        let checker = checker_with(fetcher, store, Bus::default(), config);
        checker
            .watch_race("race-1", Utc::now() - Duration::seconds(1))
            .await;

        for _ in 0..3 {
            checker.run_cycle_once().await.unwrap();
        }

        assert_eq!(checker.watched_count().await, 0);
        let stats = checker.get_stats().await;
        assert_eq!(stats.races_checked, 3);
        assert_eq!(stats.races_abandoned, 1);
    }

    #[tokio::test]
    async fn test_settles_and_resolves_when_results_arrive() {
        let store = memory_store().await;
        seed_prediction(&store, "p-1", "alpha", "race-1").await;
        seed_prediction(&store, "p-2", "beta", "race-1").await;

        let mut fetcher = MockResultsFetcher::new();
        fetcher
            .expect_fetch_result()
            .times(1)
            .returning(|_| Ok(Some(finished_result())));

        let bus = Bus::default();
        let mut evaluated_rx = bus.subscribe_evaluated();
        let checker = checker_with(
            fetcher,
            store.clone(),
            bus,
            ResultCheckerConfig::default(),
        );
        checker
            .watch_race("race-1", Utc::now() - Duration::seconds(1))
            .await;
        checker.run_cycle_once().await.unwrap();

        assert_eq!(checker.watched_count().await, 0);
        assert!(store.get_outcome("p-1").await.unwrap().is_some());
        assert!(store.get_outcome("p-2").await.unwrap().is_some());
        assert!(store.was_processed("race-1", 3600).await.unwrap());

        let event = evaluated_rx.try_recv().unwrap();
        assert_eq!(event.race_id, "race-1");
        assert_eq!(event.predictions.len(), 2);

        let stats = checker.get_stats().await;
        assert_eq!(stats.races_resolved, 1);
        assert_eq!(stats.predictions_settled, 2);

        let alpha = store.get_agent_statistics("alpha").await.unwrap().unwrap();
        assert_eq!(alpha.total_predictions, 1);
        assert_eq!(alpha.total_payout, dec!(42.0));
    }

    #[tokio::test]
    async fn test_processed_marker_short_circuits_the_fetch() {
        let store = memory_store().await;
        store.mark_processed("race-1").await.unwrap();

        // No expectations: a fetch attempt would panic the mock.
        let fetcher = MockResultsFetcher::new();
        let checker = checker_with(
            fetcher,
            store,
            Bus::default(),
            ResultCheckerConfig::default(),
        );
        checker
            .watch_race("race-1", Utc::now() - Duration::seconds(1))
            .await;
        checker.run_cycle_once().await.unwrap();

        assert_eq!(checker.watched_count().await, 0);
        let stats = checker.get_stats().await;
        assert_eq!(stats.races_resolved, 1);
    }

    #[tokio::test]
    async fn test_recovery_admits_recent_and_skips_stale() {
        let store = memory_store().await;
        seed_prediction(&store, "p-fresh", "alpha", "race-fresh").await;

        let bets = BetSlip {
            win: Some(WinBet::new(3, dec!(5)).unwrap()),
            ..Default::default()
        };
        let stale = Prediction::new(
            "p-stale",
            "alpha",
            "race-stale",
            Some(Utc::now() - Duration::hours(48)),
            bets,
            None,
        );
        store.save_prediction(&stale).await.unwrap();

        let checker = checker_with(
            MockResultsFetcher::new(),
            store,
            Bus::default(),
            ResultCheckerConfig::default(),
        );
        let restored = checker.recover().await.unwrap();

        assert_eq!(restored, 1);
        let snapshot = checker.watched_snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].race_id, "race-fresh");
        assert_eq!(snapshot[0].state, CheckState::Scheduled);
    }

    #[tokio::test]
    async fn test_schedule_listener_admits_published_races() {
        let store = memory_store().await;
        let bus = Bus::default();
        let config = ResultCheckerConfig {
            check_interval_secs: 3600,
            ..Default::default()
        };
        let checker = checker_with(MockResultsFetcher::new(), store, bus.clone(), config);

        checker.start().await;
        // Second start is refused by the running flag.
        checker.start().await;

        bus.publish_schedule(crate::bus::ScheduleResultCheck {
            race_id: "race-9".to_string(),
            check_time: Utc::now() + Duration::minutes(15),
            emitted_at: Utc::now(),
        });
        tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;

        assert_eq!(checker.watched_count().await, 1);
        let snapshot = checker.watched_snapshot().await;
        assert_eq!(snapshot[0].race_id, "race-9");
        checker.stop();
    }
}
