// Matchmaking controller: queue admission, eligibility, human-priority
// pairing, and atomic two-player reservation under concurrent workers.
//
// One pairing tick runs at a time per process (in-memory guard); across
// processes every mutating step is protected by per-player NX locks plus
// optimistic re-checks, with compensating rollback on failure.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::config::Config;
use crate::coord::{CoordStore, Coordinator, Reservation, RESERVATION_CREATING_TTL};
use crate::creation::{CreatedMatch, MatchCreation, PlayerSeat};
use crate::error::{CoreError, Result};
use crate::protocol::QueueOutbound;
use crate::room::QueueNotifier;
use crate::store::{is_guest, DocumentStore};

/// A queue entry with its derived pairing inputs.
#[derive(Debug, Clone)]
struct Candidate {
    player_id: String,
    rating: i32,
    wait_ms: i64,
    is_human: bool,
}

/// A pair produced by the pairing pass together with its finished match.
pub struct PairedMatch {
    pub created: CreatedMatch,
    pub seats: [PlayerSeat; 2],
}

pub struct Matchmaking {
    coord: Coordinator,
    store: Arc<dyn DocumentStore>,
    creation: Arc<MatchCreation>,
    notifier: Arc<dyn QueueNotifier>,
    config: Arc<Config>,
    worker_id: String,
    /// One pairing tick at a time per process.
    tick_guard: tokio::sync::Mutex<()>,
    /// Players currently inside a reservation attempt.
    processing: Mutex<HashSet<String>>,
    needs_bot_timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Matchmaking {
    pub fn new(
        coord: Coordinator,
        store: Arc<dyn DocumentStore>,
        creation: Arc<MatchCreation>,
        notifier: Arc<dyn QueueNotifier>,
        config: Arc<Config>,
    ) -> Arc<Self> {
        Arc::new(Matchmaking {
            coord,
            store,
            creation,
            notifier,
            config,
            worker_id: format!("worker-{}", uuid::Uuid::new_v4()),
            tick_guard: tokio::sync::Mutex::new(()),
            processing: Mutex::new(HashSet::new()),
            needs_bot_timers: Mutex::new(HashMap::new()),
        })
    }

    // ── Admission ────────────────────────────────────────────────────

    /// Handle a `join` request. The reply frame is returned to the caller;
    /// `already_in_match` means the player should be detached from the
    /// queue room.
    pub async fn join(self: &Arc<Self>, user_id: &str, rating: i32) -> Result<QueueOutbound> {
        let is_bot = !is_guest(user_id) && self.store.is_bot(user_id).await?;

        if let Some(reservation) = self.coord.reservation(user_id).await? {
            if is_bot {
                return Err(CoreError::PreflightConflict(format!(
                    "bot {user_id} already reserved"
                )));
            }
            tracing::info!(user_id, "Join while reserved, redirecting to match");
            return Ok(QueueOutbound::AlreadyInMatch {
                match_id: reservation.match_id.unwrap_or_default(),
                room_id: reservation.room_id,
            });
        }

        let duplicate = self.coord.queue_contains(user_id).await?
            || self.coord.is_bot_active(user_id).await?
            || self.processing.lock().unwrap().contains(user_id);
        if duplicate {
            // Idempotent admission: report the current position without a
            // second ZADD or a second playerQueued broadcast.
            let position = self.coord.queue_rank(user_id).await?.map(|r| r + 1).unwrap_or(0);
            return Ok(QueueOutbound::Queued { position });
        }

        if is_bot && !self.config.bots_enabled {
            return Err(CoreError::PreflightConflict("bots are disabled".into()));
        }

        let now = chrono::Utc::now().timestamp_millis();
        self.coord.queue_add(user_id, rating, now).await?;

        if is_bot {
            self.coord.set_bot_state(user_id, "queued").await?;
        } else {
            self.coord.track_human(user_id).await?;
            self.coord
                .publish_bots_command(&serde_json::json!({
                    "type": "playerQueued",
                    "playerId": user_id,
                }))
                .await?;
            self.schedule_needs_bot_timer(user_id);
        }

        crate::metrics::QUEUE_DEPTH.set(self.coord.queue_len().await? as i64);
        let position = self.coord.queue_rank(user_id).await?.map(|r| r + 1).unwrap_or(1);
        tracing::info!(user_id, rating, position, is_bot, "Player queued");
        Ok(QueueOutbound::Queued { position })
    }

    /// Handle a `leave` request.
    pub async fn leave(&self, user_id: &str) -> Result<()> {
        let was_queued = self.coord.queue_contains(user_id).await?;
        self.coord.queue_remove(user_id).await?;
        self.coord.untrack_human(user_id).await?;
        self.coord.unmark_needs_bot(user_id).await?;
        self.cancel_needs_bot_timer(user_id);

        let is_bot = !is_guest(user_id) && self.store.is_bot(user_id).await?;
        if is_bot {
            self.coord.set_bot_state(user_id, "deployed").await?;
        } else if was_queued {
            self.coord
                .publish_bots_command(&serde_json::json!({
                    "type": "playerDequeued",
                    "playerId": user_id,
                }))
                .await?;
        }
        crate::metrics::QUEUE_DEPTH.set(self.coord.queue_len().await? as i64);
        tracing::info!(user_id, "Player left queue");
        Ok(())
    }

    /// Arm the one-shot timer that flags a still-queued human for the
    /// external bot service.
    fn schedule_needs_bot_timer(self: &Arc<Self>, user_id: &str) {
        let this = self.clone();
        let user_id = user_id.to_string();
        let delay = std::time::Duration::from_millis(this.config.needs_bot_delay_ms);
        let key = user_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match this.coord.queue_contains(&user_id).await {
                Ok(true) => {
                    if let Err(e) = this.coord.mark_needs_bot(&user_id).await {
                        tracing::error!(user_id = %user_id, "Failed to mark needs_bot: {e}");
                    }
                }
                Ok(false) => {}
                Err(e) => tracing::error!(user_id = %user_id, "needs_bot check failed: {e}"),
            }
        });
        if let Some(old) = self.needs_bot_timers.lock().unwrap().insert(key, handle) {
            old.abort();
        }
    }

    fn cancel_needs_bot_timer(&self, user_id: &str) {
        if let Some(handle) = self.needs_bot_timers.lock().unwrap().remove(user_id) {
            handle.abort();
        }
    }

    // ── Eligibility ──────────────────────────────────────────────────

    /// Widening tolerance ladder: ±initial up to 10 s, one step per band
    /// after that, capped at the configured maximum past 45 s.
    fn elo_tolerance(&self, wait_ms: i64) -> u32 {
        let initial = self.config.elo_threshold_initial;
        let step = self.config.elo_threshold_step;
        let max = self.config.elo_threshold_max;
        let widened = if wait_ms < 10_000 {
            initial
        } else if wait_ms < 20_000 {
            initial + step
        } else if wait_ms < 30_000 {
            initial + 2 * step
        } else if wait_ms < 45_000 {
            initial + 3 * step
        } else {
            max
        };
        widened.min(max)
    }

    fn within_tolerance(&self, a: &Candidate, b: &Candidate) -> bool {
        let diff = (a.rating - b.rating).unsigned_abs();
        diff <= self.elo_tolerance(a.wait_ms) && diff <= self.elo_tolerance(b.wait_ms)
    }

    /// Load queue entries, drop stale ones, and compute per-player wait.
    async fn load_candidates(&self, now_ms: i64) -> Result<Vec<Candidate>> {
        let entries = self.coord.queue_entries().await?;
        let mut candidates = Vec::with_capacity(entries.len());
        for (player_id, rating) in entries {
            let Some(joined_at) = self.coord.joined_at(&player_id).await? else {
                // Admission timestamp expired: the entry is stale.
                tracing::info!(player_id = %player_id, "Removing stale queue entry");
                self.coord.queue_remove(&player_id).await?;
                self.coord.untrack_human(&player_id).await?;
                self.coord.unmark_needs_bot(&player_id).await?;
                continue;
            };
            let is_human = self
                .coord
                .raw()
                .sismember(crate::coord::keys::HUMAN_PLAYERS, &player_id)
                .await?;
            candidates.push(Candidate {
                player_id,
                rating,
                wait_ms: now_ms - joined_at,
                is_human,
            });
        }
        Ok(candidates)
    }

    async fn bot_is_eligible(&self, bot_id: &str) -> Result<bool> {
        Ok(!self.coord.is_bot_active(bot_id).await?
            && self.coord.bot_current_match(bot_id).await?.is_none())
    }

    // ── Pairing pass ─────────────────────────────────────────────────

    /// Run one pairing tick. Returns every match created this tick so the
    /// caller can hand them to the session runtime.
    pub async fn run_pairing_tick(self: &Arc<Self>) -> Result<Vec<PairedMatch>> {
        // One tick at a time per process.
        let Ok(_guard) = self.tick_guard.try_lock() else {
            return Ok(vec![]);
        };

        let mut paired = Vec::new();
        loop {
            let now = chrono::Utc::now().timestamp_millis();
            let candidates = self.load_candidates(now).await?;
            crate::metrics::QUEUE_DEPTH.set(candidates.len() as i64);

            // Advisory needs_bot marking for humans past the delay.
            for c in candidates.iter().filter(|c| c.is_human) {
                if c.wait_ms >= self.config.needs_bot_delay_ms as i64 {
                    self.coord.mark_needs_bot(&c.player_id).await?;
                }
            }

            let Some((a, b)) = self.select_pair(&candidates).await? else {
                break;
            };
            match self.reserve_and_create(&a, &b).await {
                Ok(result) => paired.push(result),
                Err(CoreError::ConcurrencyLoss) => {
                    // Another worker is handling this pair.
                    break;
                }
                Err(e) => {
                    tracing::error!(
                        a = %a.player_id,
                        b = %b.player_id,
                        "Pair creation failed: {e}"
                    );
                    break;
                }
            }
        }
        Ok(paired)
    }

    /// Scan in priority order: human–human, then bot-fill for a lone human,
    /// then bot–bot only when no human is waiting.
    async fn select_pair(&self, candidates: &[Candidate]) -> Result<Option<(Candidate, Candidate)>> {
        let min_wait = self.config.min_queue_wait_ms as i64;
        let humans: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| c.is_human && c.wait_ms >= min_wait)
            .collect();

        let mut bots: Vec<&Candidate> = Vec::new();
        for c in candidates.iter().filter(|c| !c.is_human) {
            if c.wait_ms >= min_wait && self.bot_is_eligible(&c.player_id).await? {
                bots.push(c);
            }
        }

        // 1. Human–human: globally minimum rating difference.
        let mut best: Option<(&Candidate, &Candidate, u32)> = None;
        for (i, a) in humans.iter().enumerate() {
            for b in humans.iter().skip(i + 1) {
                if !self.within_tolerance(a, b) {
                    continue;
                }
                let diff = (a.rating - b.rating).unsigned_abs();
                if best.map(|(_, _, d)| diff < d).unwrap_or(true) {
                    best = Some((a, b, diff));
                }
            }
        }
        if let Some((a, b, _)) = best {
            return Ok(Some(((*a).clone(), (*b).clone())));
        }

        // 2. Bot-fill: a human past the bot delay with the closest eligible
        // queued bot. No database fallback for unqueued bots.
        if self.config.bots_enabled {
            let delay = self.config.bot_match_delay_ms as i64;
            let mut best: Option<(&Candidate, &Candidate, u32)> = None;
            for h in humans.iter().filter(|h| h.wait_ms >= delay) {
                for b in &bots {
                    if !self.within_tolerance(h, b) {
                        continue;
                    }
                    let diff = (h.rating - b.rating).unsigned_abs();
                    if best.map(|(_, _, d)| diff < d).unwrap_or(true) {
                        best = Some((h, b, diff));
                    }
                }
            }
            if let Some((h, b, _)) = best {
                return Ok(Some(((*h).clone(), (*b).clone())));
            }

            // 3. Bot–bot, forbidden while any human is waiting.
            let any_humans = candidates.iter().any(|c| c.is_human);
            if !any_humans && bots.len() >= 2 {
                let mut best: Option<(&Candidate, &Candidate, u32)> = None;
                for (i, a) in bots.iter().enumerate() {
                    for b in bots.iter().skip(i + 1) {
                        if !self.within_tolerance(a, b) {
                            continue;
                        }
                        let diff = (a.rating - b.rating).unsigned_abs();
                        if best.map(|(_, _, d)| diff < d).unwrap_or(true) {
                            best = Some((a, b, diff));
                        }
                    }
                }
                if let Some((a, b, _)) = best {
                    return Ok(Some(((*a).clone(), (*b).clone())));
                }
            }
        }

        Ok(None)
    }

    // ── Atomic reservation ───────────────────────────────────────────

    async fn reserve_and_create(
        self: &Arc<Self>,
        a: &Candidate,
        b: &Candidate,
    ) -> Result<PairedMatch> {
        // Deterministic lock order prevents deadlock between workers.
        let (first, second) = if a.player_id <= b.player_id {
            (&a.player_id, &b.player_id)
        } else {
            (&b.player_id, &a.player_id)
        };

        if !self.coord.acquire_pair_lock(first, &self.worker_id).await? {
            return Err(CoreError::ConcurrencyLoss);
        }
        if !self.coord.acquire_pair_lock(second, &self.worker_id).await? {
            self.coord.release_pair_lock(first).await?;
            return Err(CoreError::ConcurrencyLoss);
        }

        let result = self.reserve_and_create_locked(a, b).await;

        // Locks are deleted individually because the key space may be
        // sharded.
        if let Err(e) = self.coord.release_pair_lock(first).await {
            tracing::error!("Failed to release lock for {first}: {e}");
        }
        if let Err(e) = self.coord.release_pair_lock(second).await {
            tracing::error!("Failed to release lock for {second}: {e}");
        }
        result
    }

    async fn reserve_and_create_locked(
        self: &Arc<Self>,
        a: &Candidate,
        b: &Candidate,
    ) -> Result<PairedMatch> {
        // Re-check under the locks: queue membership, reservations, and bot
        // state may all have changed since the scan.
        for c in [a, b] {
            if c.is_human && !self.coord.queue_contains(&c.player_id).await? {
                return Err(CoreError::ConcurrencyLoss);
            }
            if self.coord.reservation(&c.player_id).await?.is_some() {
                return Err(CoreError::ConcurrencyLoss);
            }
            if self.coord.is_bot_active(&c.player_id).await? {
                return Err(CoreError::ConcurrencyLoss);
            }
            if !c.is_human && self.coord.bot_current_match(&c.player_id).await?.is_some() {
                return Err(CoreError::ConcurrencyLoss);
            }
        }

        {
            let mut processing = self.processing.lock().unwrap();
            processing.insert(a.player_id.clone());
            processing.insert(b.player_id.clone());
        }

        // Remember admission timestamps for rollback.
        let joined_a = self.coord.joined_at(&a.player_id).await?;
        let joined_b = self.coord.joined_at(&b.player_id).await?;

        // Placeholder reservations, queue removal, tracking-set
        // maintenance, and immediate bots:active membership.
        for c in [a, b] {
            self.coord
                .set_reservation(
                    &c.player_id,
                    &Reservation::creating(),
                    RESERVATION_CREATING_TTL,
                )
                .await?;
            self.coord.queue_remove(&c.player_id).await?;
            if c.is_human {
                self.coord.untrack_human(&c.player_id).await?;
                self.coord.unmark_needs_bot(&c.player_id).await?;
                self.cancel_needs_bot_timer(&c.player_id);
            } else {
                self.coord.add_active_bot(&c.player_id).await?;
            }
        }

        let seat_a = self.seat_for(a).await?;
        let seat_b = self.seat_for(b).await?;

        let created = match self.creation.create_match(&seat_a, &seat_b, None).await {
            Ok(created) => created,
            Err(e) => {
                tracing::warn!(
                    a = %a.player_id,
                    b = %b.player_id,
                    "Creation failed, rolling back: {e}"
                );
                self.rollback_reservation(a, joined_a).await;
                self.rollback_reservation(b, joined_b).await;
                self.clear_processing(a, b);
                return Err(e);
            }
        };

        self.notify_pair(&created, &seat_a, &seat_b).await;
        self.clear_processing(a, b);

        Ok(PairedMatch {
            created,
            seats: [seat_a, seat_b],
        })
    }

    fn clear_processing(&self, a: &Candidate, b: &Candidate) {
        let mut processing = self.processing.lock().unwrap();
        processing.remove(&a.player_id);
        processing.remove(&b.player_id);
    }

    /// Exact inverse of the placeholder step.
    async fn rollback_reservation(&self, c: &Candidate, joined_at: Option<i64>) {
        let rollback = async {
            self.coord.clear_reservation(&c.player_id).await?;
            if c.is_human {
                self.coord
                    .queue_add(
                        &c.player_id,
                        c.rating,
                        joined_at.unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
                    )
                    .await?;
                self.coord.track_human(&c.player_id).await?;
            } else {
                self.coord.remove_active_bot(&c.player_id).await?;
                self.coord.clear_bot_current_match(&c.player_id).await?;
                self.coord.set_bot_state(&c.player_id, "queued").await?;
                self.coord
                    .queue_add(
                        &c.player_id,
                        c.rating,
                        joined_at.unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
                    )
                    .await?;
            }
            Ok::<(), CoreError>(())
        };
        if let Err(e) = rollback.await {
            tracing::error!(player_id = %c.player_id, "Rollback failed: {e}");
        }
    }

    async fn seat_for(&self, c: &Candidate) -> Result<PlayerSeat> {
        if is_guest(&c.player_id) {
            return Ok(PlayerSeat {
                player_id: c.player_id.clone(),
                username: c.player_id.clone(),
                rating: c.rating,
                is_bot: false,
            });
        }
        if let Some(bot) = self.store.get_bot(&c.player_id).await? {
            return Ok(PlayerSeat {
                player_id: c.player_id.clone(),
                username: bot.username,
                rating: c.rating,
                is_bot: true,
            });
        }
        let username = self
            .store
            .get_user(&c.player_id)
            .await?
            .map(|u| u.username)
            .unwrap_or_else(|| c.player_id.clone());
        Ok(PlayerSeat {
            player_id: c.player_id.clone(),
            username,
            rating: c.rating,
            is_bot: false,
        })
    }

    /// Deliver `match_found` to each human's live connection; detach only
    /// after the frame was accepted.
    async fn notify_pair(&self, created: &CreatedMatch, seat_a: &PlayerSeat, seat_b: &PlayerSeat) {
        let frame = QueueOutbound::MatchFound {
            match_id: created.match_id.clone(),
            room_id: created.room_id.clone(),
            problem_id: created.problem_id.clone(),
        }
        .to_value();
        for seat in [seat_a, seat_b] {
            if seat.is_bot {
                continue;
            }
            if self.notifier.deliver(&seat.player_id, &frame).await {
                self.notifier.detach(&seat.player_id).await;
            } else {
                tracing::warn!(
                    player_id = %seat.player_id,
                    match_id = %created.match_id,
                    "match_found not accepted; leaving player attached"
                );
            }
        }
    }
}

/// Spawn the periodic pairing sweep. Each created match is handed to
/// `on_created`.
pub fn spawn_pairing_worker<F>(matchmaking: Arc<Matchmaking>, on_created: F) -> JoinHandle<()>
where
    F: Fn(PairedMatch) + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let interval = std::time::Duration::from_millis(matchmaking.config.sweep_interval_ms);
        loop {
            tokio::time::sleep(interval).await;
            match matchmaking.run_pairing_tick().await {
                Ok(paired) => {
                    for pair in paired {
                        on_created(pair);
                    }
                }
                Err(e) => {
                    // A flapping store degrades to skipped ticks.
                    tracing::error!("Pairing tick failed: {e}");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{keys, MemoryCoordStore, ReservationStatus};
    use crate::rating::Difficulty;
    use crate::room::{LocalQueueNotifier, LocalRooms};
    use crate::store::memory::MemoryStore;
    use crate::store::{BotDoc, Param, Problem, Signature, TestCase, UserDoc};

    struct Fixture {
        coord_store: Arc<MemoryCoordStore>,
        coord: Coordinator,
        store: Arc<MemoryStore>,
        notifier: Arc<LocalQueueNotifier>,
        matchmaking: Arc<Matchmaking>,
    }

    fn test_config() -> Config {
        Config {
            port: 0,
            redis_url: String::new(),
            database_url: String::new(),
            sandbox_url: String::new(),
            llm_url: String::new(),
            llm_api_key: None,
            max_match_duration_ms: 2_700_000,
            min_queue_wait_ms: 3_000,
            elo_threshold_initial: 50,
            elo_threshold_step: 50,
            elo_threshold_max: 250,
            bot_match_delay_ms: 45_000,
            needs_bot_delay_ms: 7_000,
            sweep_interval_ms: 5_000,
            bot_time_dist: crate::config::BotTimeDist::Lognormal,
            bot_time_params: crate::config::PerDifficulty {
                easy: None,
                medium: None,
                hard: None,
            },
            k_factor: 32,
            gaussian_sigma: 250.0,
            difficulty_targets: crate::config::PerDifficulty {
                easy: 1200.0,
                medium: 1500.0,
                hard: 2000.0,
            },
            submission_cache_ttl_s: 3_000,
            bots_enabled: true,
        }
    }

    fn fixture() -> Fixture {
        let coord_store = Arc::new(MemoryCoordStore::new());
        let coord = Coordinator::new(coord_store.clone());
        let store = Arc::new(MemoryStore::new());
        let rooms = Arc::new(LocalRooms::new());
        let config = Arc::new(test_config());
        let creation = Arc::new(MatchCreation::new(
            coord.clone(),
            store.clone(),
            rooms,
            config.clone(),
        ));
        let notifier = Arc::new(LocalQueueNotifier::new());
        let matchmaking = Matchmaking::new(
            coord.clone(),
            store.clone(),
            creation,
            notifier.clone(),
            config,
        );
        Fixture {
            coord_store,
            coord,
            store,
            notifier,
            matchmaking,
        }
    }

    fn seed_problem(store: &MemoryStore) {
        store.add_problem(Problem {
            id: "p1".into(),
            title: "Two Sum".into(),
            description: "d".into(),
            difficulty: Difficulty::Medium,
            topics: vec![],
            signature: Signature {
                function_name: "twoSum".into(),
                parameters: vec![Param {
                    name: "nums".into(),
                    ty: "int[]".into(),
                }],
                return_type: "int[]".into(),
                comparison_mode: None,
                custom_comparator: None,
            },
            starter_code: Default::default(),
            examples: vec![],
            constraints: vec![],
            time_complexity: None,
            test_cases: vec![TestCase {
                input: vec![serde_json::json!([1])],
                output: serde_json::json!([0]),
                special_input_data: None,
            }],
            solutions: Default::default(),
            verified: true,
        });
    }

    fn seed_user(store: &MemoryStore, id: &str, rating: i32) {
        store.add_user(UserDoc {
            id: id.into(),
            username: format!("u-{id}"),
            rating,
            wins: 0,
            losses: 0,
            draws: 0,
            total_matches: 0,
            time_coded_ms: 0,
            match_ids: vec![],
        });
    }

    /// Seed a human queue entry with a backdated admission timestamp.
    async fn backdate_queue_human(f: &Fixture, id: &str, rating: i32, wait_ms: i64) {
        let joined = chrono::Utc::now().timestamp_millis() - wait_ms;
        f.coord.queue_add(id, rating, joined).await.unwrap();
        f.coord.track_human(id).await.unwrap();
    }

    async fn backdate_queue_bot(f: &Fixture, id: &str, rating: i32, wait_ms: i64) {
        let joined = chrono::Utc::now().timestamp_millis() - wait_ms;
        f.coord.queue_add(id, rating, joined).await.unwrap();
    }

    #[tokio::test]
    async fn test_join_reports_position_by_rating() {
        let f = fixture();
        seed_user(&f.store, "low", 1200);
        seed_user(&f.store, "high", 1800);

        let reply = f.matchmaking.join("high", 1800).await.unwrap();
        assert_eq!(reply, QueueOutbound::Queued { position: 1 });

        let reply = f.matchmaking.join("low", 1200).await.unwrap();
        assert_eq!(reply, QueueOutbound::Queued { position: 1 });

        // The higher-rated player now ranks second in the score order.
        assert_eq!(f.coord.queue_rank("high").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_duplicate_join_is_idempotent() {
        let f = fixture();
        seed_user(&f.store, "u1", 1500);

        f.matchmaking.join("u1", 1500).await.unwrap();
        let reply = f.matchmaking.join("u1", 1500).await.unwrap();
        assert!(matches!(reply, QueueOutbound::Queued { .. }));

        assert_eq!(f.coord.queue_len().await.unwrap(), 1);
        let queued_frames: Vec<_> = f
            .coord_store
            .published_on(keys::BOTS_COMMANDS)
            .into_iter()
            .filter(|v| v["type"] == "playerQueued")
            .collect();
        assert_eq!(queued_frames.len(), 1);
    }

    #[tokio::test]
    async fn test_join_while_reserved_redirects_humans() {
        let f = fixture();
        seed_user(&f.store, "u1", 1500);
        f.coord
            .set_reservation(
                "u1",
                &Reservation {
                    status: ReservationStatus::Active,
                    match_id: Some("m9".into()),
                    room_id: Some("r9".into()),
                    problem_id: Some("p9".into()),
                },
                crate::coord::RESERVATION_TTL,
            )
            .await
            .unwrap();

        let reply = f.matchmaking.join("u1", 1500).await.unwrap();
        match reply {
            QueueOutbound::AlreadyInMatch { match_id, room_id } => {
                assert_eq!(match_id, "m9");
                assert_eq!(room_id.as_deref(), Some("r9"));
            }
            other => panic!("expected already_in_match, got {other:?}"),
        }
        assert_eq!(f.coord.queue_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reserved_bot_join_is_rejected() {
        let f = fixture();
        f.store.add_bot(BotDoc {
            id: "b1".into(),
            username: "bot".into(),
            rating: 1500,
        });
        f.coord
            .set_reservation("b1", &Reservation::creating(), crate::coord::RESERVATION_TTL)
            .await
            .unwrap();

        let err = f.matchmaking.join("b1", 1500).await;
        assert!(matches!(err, Err(CoreError::PreflightConflict(_))));
    }

    #[tokio::test]
    async fn test_leave_publishes_dequeue_and_cleans_sets() {
        let f = fixture();
        seed_user(&f.store, "u1", 1500);
        f.matchmaking.join("u1", 1500).await.unwrap();
        f.matchmaking.leave("u1").await.unwrap();

        assert_eq!(f.coord.queue_len().await.unwrap(), 0);
        let dequeued: Vec<_> = f
            .coord_store
            .published_on(keys::BOTS_COMMANDS)
            .into_iter()
            .filter(|v| v["type"] == "playerDequeued")
            .collect();
        assert_eq!(dequeued.len(), 1);
    }

    #[tokio::test]
    async fn test_tolerance_ladder() {
        let f = fixture();
        let mm = &f.matchmaking;
        assert_eq!(mm.elo_tolerance(0), 50);
        assert_eq!(mm.elo_tolerance(9_999), 50);
        assert_eq!(mm.elo_tolerance(10_000), 100);
        assert_eq!(mm.elo_tolerance(20_000), 150);
        assert_eq!(mm.elo_tolerance(30_000), 200);
        assert_eq!(mm.elo_tolerance(44_999), 200);
        assert_eq!(mm.elo_tolerance(45_000), 250);
        assert_eq!(mm.elo_tolerance(10_000_000), 250);
    }

    #[tokio::test]
    async fn test_pairing_respects_min_dwell() {
        let f = fixture();
        seed_problem(&f.store);
        seed_user(&f.store, "a", 1500);
        seed_user(&f.store, "b", 1500);
        backdate_queue_human(&f, "a", 1500, 1_000).await;
        backdate_queue_human(&f, "b", 1500, 1_000).await;

        let paired = f.matchmaking.run_pairing_tick().await.unwrap();
        assert!(paired.is_empty());
        assert_eq!(f.coord.queue_len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_pairing_two_humans_in_tolerance() {
        let f = fixture();
        seed_problem(&f.store);
        seed_user(&f.store, "a", 1500);
        seed_user(&f.store, "b", 1540);
        backdate_queue_human(&f, "a", 1500, 5_000).await;
        backdate_queue_human(&f, "b", 1540, 5_000).await;

        let paired = f.matchmaking.run_pairing_tick().await.unwrap();
        assert_eq!(paired.len(), 1);

        // Queue drained, reservations active, match live.
        assert_eq!(f.coord.queue_len().await.unwrap(), 0);
        let match_id = &paired[0].created.match_id;
        assert!(f.coord.is_active_match(match_id).await.unwrap());
        for p in ["a", "b"] {
            let r = f.coord.reservation(p).await.unwrap().unwrap();
            assert_eq!(r.status, ReservationStatus::Active);
        }

        // match_found delivered and the players detached.
        let frames = f.notifier.delivered_to("a");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], "match_found");
        assert!(f.notifier.detached().contains(&"a".to_string()));
    }

    #[tokio::test]
    async fn test_pairing_picks_minimum_diff_pair() {
        let f = fixture();
        seed_problem(&f.store);
        for (id, rating) in [("a", 1500), ("b", 1545), ("c", 1510)] {
            seed_user(&f.store, id, rating);
            backdate_queue_human(&f, id, rating, 5_000).await;
        }

        let paired = f.matchmaking.run_pairing_tick().await.unwrap();
        assert_eq!(paired.len(), 1);
        let ids: Vec<&str> = paired[0]
            .seats
            .iter()
            .map(|s| s.player_id.as_str())
            .collect();
        assert!(ids.contains(&"a") && ids.contains(&"c"), "got {ids:?}");
    }

    #[tokio::test]
    async fn test_out_of_tolerance_never_pairs() {
        let f = fixture();
        seed_problem(&f.store);
        seed_user(&f.store, "a", 1500);
        seed_user(&f.store, "b", 1751); // 251 apart, past the 250 cap
        backdate_queue_human(&f, "a", 1500, 100_000).await;
        backdate_queue_human(&f, "b", 1751, 100_000).await;

        let paired = f.matchmaking.run_pairing_tick().await.unwrap();
        assert!(paired.is_empty());
        assert_eq!(f.coord.queue_len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_bot_fill_requires_delay() {
        let f = fixture();
        seed_problem(&f.store);
        seed_user(&f.store, "h", 1200);
        f.store.add_bot(BotDoc {
            id: "q".into(),
            username: "bot-q".into(),
            rating: 1210,
        });
        backdate_queue_human(&f, "h", 1200, 10_000).await;
        backdate_queue_bot(&f, "q", 1210, 10_000).await;

        // Below the 45 s delay: no pair.
        let paired = f.matchmaking.run_pairing_tick().await.unwrap();
        assert!(paired.is_empty());

        // Past the delay: bot-fill proceeds.
        f.coord.queue_remove("h").await.unwrap();
        backdate_queue_human(&f, "h", 1200, 46_000).await;
        let paired = f.matchmaking.run_pairing_tick().await.unwrap();
        assert_eq!(paired.len(), 1);
        assert!(paired[0].seats.iter().any(|s| s.is_bot));
        assert!(f.coord.is_bot_active("q").await.unwrap());
    }

    #[tokio::test]
    async fn test_human_priority_over_bot() {
        let f = fixture();
        seed_problem(&f.store);
        seed_user(&f.store, "h1", 1500);
        seed_user(&f.store, "h2", 1520);
        f.store.add_bot(BotDoc {
            id: "q".into(),
            username: "bot-q".into(),
            rating: 1500,
        });
        backdate_queue_human(&f, "h1", 1500, 60_000).await;
        backdate_queue_human(&f, "h2", 1520, 60_000).await;
        backdate_queue_bot(&f, "q", 1500, 60_000).await;

        let paired = f.matchmaking.run_pairing_tick().await.unwrap();
        assert!(!paired.is_empty());
        let ids: Vec<&str> = paired[0]
            .seats
            .iter()
            .map(|s| s.player_id.as_str())
            .collect();
        assert!(ids.contains(&"h1") && ids.contains(&"h2"));
    }

    #[tokio::test]
    async fn test_bot_bot_only_without_humans() {
        let f = fixture();
        seed_problem(&f.store);
        for id in ["q1", "q2"] {
            f.store.add_bot(BotDoc {
                id: id.into(),
                username: format!("bot-{id}"),
                rating: 1500,
            });
            backdate_queue_bot(&f, id, 1500, 10_000).await;
        }
        // A waiting human (even one too fresh to pair) forbids bot–bot.
        seed_user(&f.store, "h", 1500);
        backdate_queue_human(&f, "h", 1500, 500).await;

        let paired = f.matchmaking.run_pairing_tick().await.unwrap();
        assert!(paired.is_empty());

        f.matchmaking.leave("h").await.unwrap();
        let paired = f.matchmaking.run_pairing_tick().await.unwrap();
        assert_eq!(paired.len(), 1);
        assert!(paired[0].seats.iter().all(|s| s.is_bot));
    }

    #[tokio::test]
    async fn test_lock_contention_aborts_without_side_effects() {
        let f = fixture();
        seed_problem(&f.store);
        seed_user(&f.store, "a", 1500);
        seed_user(&f.store, "b", 1500);
        backdate_queue_human(&f, "a", 1500, 5_000).await;
        backdate_queue_human(&f, "b", 1500, 5_000).await;

        // Another worker holds one of the pair locks.
        assert!(f.coord.acquire_pair_lock("a", "other-worker").await.unwrap());

        let paired = f.matchmaking.run_pairing_tick().await.unwrap();
        assert!(paired.is_empty());

        // No reservations, queue intact — the other worker owns the pair.
        assert!(f.coord.reservation("a").await.unwrap().is_none());
        assert!(f.coord.reservation("b").await.unwrap().is_none());
        assert_eq!(f.coord.queue_len().await.unwrap(), 2);
        // The second lock was not leaked.
        assert!(f.coord.acquire_pair_lock("b", "probe").await.unwrap());
    }

    #[tokio::test]
    async fn test_creation_failure_rolls_back() {
        let f = fixture();
        // No problems seeded: creation fails after placeholders are written.
        seed_user(&f.store, "a", 1500);
        seed_user(&f.store, "b", 1500);
        backdate_queue_human(&f, "a", 1500, 5_000).await;
        backdate_queue_human(&f, "b", 1500, 5_000).await;

        let paired = f.matchmaking.run_pairing_tick().await.unwrap();
        assert!(paired.is_empty());

        // Exact inverse: players back in the queue with reservations gone.
        assert_eq!(f.coord.queue_len().await.unwrap(), 2);
        assert!(f.coord.reservation("a").await.unwrap().is_none());
        assert!(f.coord.reservation("b").await.unwrap().is_none());
        assert!(f
            .coord
            .raw()
            .sismember(keys::HUMAN_PLAYERS, "a")
            .await
            .unwrap());
        // Locks were released.
        assert!(f.coord.acquire_pair_lock("a", "probe").await.unwrap());
    }

    #[tokio::test]
    async fn test_stale_entries_swept() {
        let f = fixture();
        seed_problem(&f.store);
        seed_user(&f.store, "ghost", 1500);
        // Queue membership without a joined_at key (TTL elapsed).
        f.coord
            .raw()
            .zadd(keys::QUEUE_ELO, "ghost", 1500.0)
            .await
            .unwrap();
        f.coord.track_human("ghost").await.unwrap();

        f.matchmaking.run_pairing_tick().await.unwrap();
        assert_eq!(f.coord.queue_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_long_waiting_humans_marked_needs_bot() {
        let f = fixture();
        seed_problem(&f.store);
        seed_user(&f.store, "h", 1500);
        backdate_queue_human(&f, "h", 1500, 8_000).await;

        f.matchmaking.run_pairing_tick().await.unwrap();
        assert_eq!(
            f.coord.needs_bot_members().await.unwrap(),
            vec!["h".to_string()]
        );
    }
}
