// Coordination store adapter: typed access to queues, sets, the per-match
// blob, reservations, pub/sub and distributed locks.
//
// `CoordStore` is the raw capability surface; `Coordinator` layers the typed
// operations the matchmaking and session code actually speaks. All match-blob
// mutations go through `Coordinator::update_match` — it is the only writer.

pub mod blob;
pub mod keys;
pub mod memory;
pub mod redis;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

pub use blob::{
    BotCompletionPlan, BotStats, MatchBlob, MatchStatus, PlayerInfo, ProblemSnapshot,
    RatingsSnapshot, Reservation, ReservationStatus, SubmissionRecord,
};
pub use memory::MemoryCoordStore;
pub use redis::RedisCoordStore;

/// TTL of an ongoing match blob.
pub const BLOB_TTL: Duration = Duration::from_secs(3600);
/// TTL applied once a match completes, so results stay readable for a day.
pub const BLOB_TTL_COMPLETED: Duration = Duration::from_secs(24 * 3600);
/// TTL of the ratings snapshot hash.
pub const RATINGS_TTL: Duration = Duration::from_secs(3600);
/// TTL of the queue admission timestamp key.
pub const JOINED_AT_TTL: Duration = Duration::from_secs(3600);
/// TTL of the placeholder reservation written before creation runs.
pub const RESERVATION_CREATING_TTL: Duration = Duration::from_secs(60);
/// TTL of the finalized reservation; at least the match duration.
pub const RESERVATION_TTL: Duration = Duration::from_secs(3600);
/// TTL of a pair lock.
pub const LOCK_TTL: Duration = Duration::from_secs(10);
/// TTL of the guest result snapshot.
pub const GUEST_RESULT_TTL: Duration = Duration::from_secs(3 * 3600);

/// Raw capability surface over the coordination store. The Redis adapter and
/// the in-memory test double implement the same set.
#[async_trait]
pub trait CoordStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
    /// SET NX EX: returns true when the key was absent and is now set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;
    async fn del(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;
    async fn zrem(&self, key: &str, member: &str) -> Result<()>;
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<f64>>;
    async fn zrank(&self, key: &str, member: &str) -> Result<Option<usize>>;
    async fn zcard(&self, key: &str) -> Result<usize>;
    async fn zrange_withscores(&self, key: &str) -> Result<Vec<(String, f64)>>;

    async fn sadd(&self, key: &str, member: &str) -> Result<()>;
    async fn srem(&self, key: &str, member: &str) -> Result<()>;
    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;
}

/// Typed operations over the raw store.
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn CoordStore>,
}

impl Coordinator {
    pub fn new(store: Arc<dyn CoordStore>) -> Self {
        Coordinator { store }
    }

    pub fn raw(&self) -> &Arc<dyn CoordStore> {
        &self.store
    }

    // ── Queue ────────────────────────────────────────────────────────

    pub async fn queue_add(&self, player_id: &str, rating: i32, joined_at_ms: i64) -> Result<()> {
        self.store
            .zadd(keys::QUEUE_ELO, player_id, rating as f64)
            .await?;
        self.store
            .set_ex(&keys::joined_at(player_id), &joined_at_ms.to_string(), JOINED_AT_TTL)
            .await
    }

    pub async fn queue_remove(&self, player_id: &str) -> Result<()> {
        self.store.zrem(keys::QUEUE_ELO, player_id).await?;
        self.store.del(&keys::joined_at(player_id)).await
    }

    pub async fn queue_contains(&self, player_id: &str) -> Result<bool> {
        Ok(self.store.zscore(keys::QUEUE_ELO, player_id).await?.is_some())
    }

    pub async fn queue_rank(&self, player_id: &str) -> Result<Option<usize>> {
        self.store.zrank(keys::QUEUE_ELO, player_id).await
    }

    pub async fn queue_len(&self) -> Result<usize> {
        self.store.zcard(keys::QUEUE_ELO).await
    }

    /// All queue entries as (playerId, rating) in rating order.
    pub async fn queue_entries(&self) -> Result<Vec<(String, i32)>> {
        let raw = self.store.zrange_withscores(keys::QUEUE_ELO).await?;
        Ok(raw.into_iter().map(|(m, s)| (m, s as i32)).collect())
    }

    pub async fn joined_at(&self, player_id: &str) -> Result<Option<i64>> {
        let raw = self.store.get(&keys::joined_at(player_id)).await?;
        Ok(raw.and_then(|s| s.parse().ok()))
    }

    // ── Reservations ─────────────────────────────────────────────────

    pub async fn reservation(&self, player_id: &str) -> Result<Option<Reservation>> {
        match self.store.get(&keys::reservation(player_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set_reservation(
        &self,
        player_id: &str,
        reservation: &Reservation,
        ttl: Duration,
    ) -> Result<()> {
        let raw = serde_json::to_string(reservation)?;
        self.store
            .set_ex(&keys::reservation(player_id), &raw, ttl)
            .await
    }

    pub async fn clear_reservation(&self, player_id: &str) -> Result<()> {
        self.store.del(&keys::reservation(player_id)).await
    }

    // ── Match blob ───────────────────────────────────────────────────

    pub async fn read_match(&self, match_id: &str) -> Result<Option<MatchBlob>> {
        match self.store.get(&keys::match_blob(match_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn write_match(&self, blob: &MatchBlob) -> Result<()> {
        let ttl = blob_ttl(blob.status);
        let raw = serde_json::to_string(blob)?;
        self.store
            .set_ex(&keys::match_blob(&blob.match_id), &raw, ttl)
            .await
    }

    /// The single read-modify-write path for blob mutation. Reads the blob,
    /// applies the mutator and writes back with the status-appropriate TTL.
    /// Returns the updated blob, or None when the blob does not exist.
    pub async fn update_match<F>(&self, match_id: &str, mutate: F) -> Result<Option<MatchBlob>>
    where
        F: FnOnce(&mut MatchBlob),
    {
        let Some(mut blob) = self.read_match(match_id).await? else {
            return Ok(None);
        };
        mutate(&mut blob);
        self.write_match(&blob).await?;
        Ok(Some(blob))
    }

    // ── Active-matches set ───────────────────────────────────────────

    pub async fn add_active_match(&self, match_id: &str) -> Result<()> {
        self.store.sadd(keys::MATCHES_ACTIVE, match_id).await
    }

    pub async fn remove_active_match(&self, match_id: &str) -> Result<()> {
        self.store.srem(keys::MATCHES_ACTIVE, match_id).await
    }

    pub async fn is_active_match(&self, match_id: &str) -> Result<bool> {
        self.store.sismember(keys::MATCHES_ACTIVE, match_id).await
    }

    pub async fn active_matches(&self) -> Result<Vec<String>> {
        self.store.smembers(keys::MATCHES_ACTIVE).await
    }

    // ── Bot lifecycle ────────────────────────────────────────────────

    pub async fn bot_state(&self, bot_id: &str) -> Result<Option<String>> {
        self.store.get(&keys::bot_state(bot_id)).await
    }

    pub async fn set_bot_state(&self, bot_id: &str, state: &str) -> Result<()> {
        // Bot state keys live as long as the deployment; refresh daily.
        self.store
            .set_ex(&keys::bot_state(bot_id), state, Duration::from_secs(24 * 3600))
            .await
    }

    pub async fn clear_bot_state(&self, bot_id: &str) -> Result<()> {
        self.store.del(&keys::bot_state(bot_id)).await
    }

    pub async fn bot_current_match(&self, bot_id: &str) -> Result<Option<String>> {
        self.store.get(&keys::bot_current_match(bot_id)).await
    }

    pub async fn set_bot_current_match(&self, bot_id: &str, match_id: &str) -> Result<()> {
        self.store
            .set_ex(&keys::bot_current_match(bot_id), match_id, RESERVATION_TTL)
            .await
    }

    pub async fn clear_bot_current_match(&self, bot_id: &str) -> Result<()> {
        self.store.del(&keys::bot_current_match(bot_id)).await
    }

    pub async fn is_bot_active(&self, bot_id: &str) -> Result<bool> {
        self.store.sismember(keys::BOTS_ACTIVE, bot_id).await
    }

    pub async fn add_active_bot(&self, bot_id: &str) -> Result<()> {
        self.store.sadd(keys::BOTS_ACTIVE, bot_id).await
    }

    pub async fn remove_active_bot(&self, bot_id: &str) -> Result<()> {
        self.store.srem(keys::BOTS_ACTIVE, bot_id).await
    }

    // ── Tracking sets ────────────────────────────────────────────────

    pub async fn track_human(&self, player_id: &str) -> Result<()> {
        self.store.sadd(keys::HUMAN_PLAYERS, player_id).await?;
        self.store.sadd(keys::QUEUED_PLAYERS, player_id).await
    }

    pub async fn untrack_human(&self, player_id: &str) -> Result<()> {
        self.store.srem(keys::HUMAN_PLAYERS, player_id).await?;
        self.store.srem(keys::QUEUED_PLAYERS, player_id).await
    }

    pub async fn mark_needs_bot(&self, player_id: &str) -> Result<()> {
        self.store.sadd(keys::NEEDS_BOT, player_id).await
    }

    pub async fn unmark_needs_bot(&self, player_id: &str) -> Result<()> {
        self.store.srem(keys::NEEDS_BOT, player_id).await
    }

    pub async fn needs_bot_members(&self) -> Result<Vec<String>> {
        self.store.smembers(keys::NEEDS_BOT).await
    }

    // ── Ratings hash ─────────────────────────────────────────────────

    pub async fn write_ratings_hash(
        &self,
        match_id: &str,
        player1_id: &str,
        player1_rating: i32,
        player2_id: &str,
        player2_rating: i32,
        problem_elo: i32,
    ) -> Result<()> {
        let key = keys::match_ratings(match_id);
        let fields = vec![
            ("player1".to_string(), player1_rating.to_string()),
            ("player2".to_string(), player2_rating.to_string()),
            ("userId1".to_string(), player1_id.to_string()),
            ("userId2".to_string(), player2_id.to_string()),
            ("problemElo".to_string(), problem_elo.to_string()),
        ];
        self.store.hset_all(&key, &fields).await?;
        self.store.expire(&key, RATINGS_TTL).await
    }

    pub async fn read_ratings_hash(&self, match_id: &str) -> Result<HashMap<String, String>> {
        self.store.hgetall(&keys::match_ratings(match_id)).await
    }

    // ── Locks ────────────────────────────────────────────────────────

    /// Acquire the per-player pair lock. NX semantics: false means another
    /// worker holds it.
    pub async fn acquire_pair_lock(&self, player_id: &str, owner: &str) -> Result<bool> {
        self.store
            .set_nx_ex(&keys::match_lock(player_id), owner, LOCK_TTL)
            .await
    }

    /// Locks are deleted individually because the key space may be sharded.
    pub async fn release_pair_lock(&self, player_id: &str) -> Result<()> {
        self.store.del(&keys::match_lock(player_id)).await
    }

    // ── Submission cache ─────────────────────────────────────────────

    pub async fn cached_submission(
        &self,
        match_id: &str,
        user_id: &str,
        code_hash: &str,
    ) -> Result<Option<SubmissionRecord>> {
        let key = keys::submission_cache(match_id, user_id, code_hash);
        match self.store.get(&key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn cache_submission(
        &self,
        match_id: &str,
        user_id: &str,
        code_hash: &str,
        record: &SubmissionRecord,
        ttl: Duration,
    ) -> Result<()> {
        let key = keys::submission_cache(match_id, user_id, code_hash);
        let raw = serde_json::to_string(record)?;
        self.store.set_ex(&key, &raw, ttl).await
    }

    // ── Guest result snapshot ────────────────────────────────────────

    pub async fn write_guest_result(&self, guest_id: &str, payload: &serde_json::Value) -> Result<()> {
        self.store
            .set_ex(&keys::guest_result(guest_id), &payload.to_string(), GUEST_RESULT_TTL)
            .await
    }

    // ── Pub/sub ──────────────────────────────────────────────────────

    pub async fn publish_match_event(&self, payload: &serde_json::Value) -> Result<()> {
        self.store
            .publish(keys::EVENTS_MATCH, &payload.to_string())
            .await
    }

    pub async fn publish_bots_command(&self, payload: &serde_json::Value) -> Result<()> {
        self.store
            .publish(keys::BOTS_COMMANDS, &payload.to_string())
            .await
    }
}

fn blob_ttl(status: MatchStatus) -> Duration {
    match status {
        MatchStatus::Ongoing => BLOB_TTL,
        MatchStatus::Finished | MatchStatus::Abandoned => BLOB_TTL_COMPLETED,
    }
}

/// Hash used for the submission cache key: sha256 over the trimmed source,
/// the language and the problem id.
pub fn submission_code_hash(source: &str, language: &str, problem_id: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(source.trim().as_bytes());
    hasher.update(b":");
    hasher.update(language.as_bytes());
    hasher.update(b":");
    hasher.update(problem_id.as_bytes());
    hex::encode(hasher.finalize())
}
