// Match creation: given two validated players, pick a problem, seed the
// blob, open the room, and finalize both reservations.
//
// The caller (the matchmaking controller) holds both pair locks for the
// whole call, so every write here happens inside that single lock scope.
// A failure after the blob write leaves an `ongoing` blob behind; the
// session disposal safety net converts it to `abandoned`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::coord::{
    Coordinator, MatchBlob, MatchStatus, PlayerInfo, ProblemSnapshot, RatingsSnapshot,
    Reservation, ReservationStatus, RESERVATION_TTL,
};
use crate::error::{CoreError, Result};
use crate::rating::{self, Difficulty};
use crate::room::RoomServer;
use crate::store::{object_id_hex, DocumentStore, MatchDoc, Problem};

/// One side of a pair handed over by the matchmaking controller.
#[derive(Debug, Clone)]
pub struct PlayerSeat {
    pub player_id: String,
    pub username: String,
    pub rating: i32,
    pub is_bot: bool,
}

#[derive(Debug, Clone)]
pub struct CreatedMatch {
    pub match_id: String,
    pub room_id: String,
    pub problem_id: String,
    pub problem: Problem,
    pub problem_elo: i32,
}

pub struct MatchCreation {
    coord: Coordinator,
    store: Arc<dyn DocumentStore>,
    rooms: Arc<dyn RoomServer>,
    config: Arc<Config>,
}

impl MatchCreation {
    pub fn new(
        coord: Coordinator,
        store: Arc<dyn DocumentStore>,
        rooms: Arc<dyn RoomServer>,
        config: Arc<Config>,
    ) -> Self {
        MatchCreation {
            coord,
            store,
            rooms,
            config,
        }
    }

    pub async fn create_match(
        &self,
        player1: &PlayerSeat,
        player2: &PlayerSeat,
        difficulty_override: Option<Difficulty>,
    ) -> Result<CreatedMatch> {
        // Pre-flight: a player with a live reservation or active-bot
        // membership must never be seated again.
        for seat in [player1, player2] {
            if self.coord.reservation(&seat.player_id).await?.is_some_and(|r| {
                // The caller's own placeholder is expected here.
                r.status == ReservationStatus::Active
            }) {
                return Err(CoreError::PreflightConflict(format!(
                    "{} already holds an active reservation",
                    seat.player_id
                )));
            }
            if !seat.is_bot && self.coord.is_bot_active(&seat.player_id).await? {
                return Err(CoreError::PreflightConflict(format!(
                    "{} is in the active-bots set",
                    seat.player_id
                )));
            }
        }

        // 1. Allocate the match id.
        let match_id = object_id_hex();

        // 2. Difficulty from the average rating unless overridden.
        let avg_rating = (player1.rating + player2.rating) as f64 / 2.0;
        let difficulty = difficulty_override.unwrap_or_else(|| {
            rating::select_difficulty_by_probability(
                avg_rating,
                &self.config.difficulty_targets,
                self.config.gaussian_sigma,
            )
        });
        let problem_elo = self.config.difficulty_targets.get(difficulty) as i32;

        // 3. Random verified problem of that difficulty, any verified as
        // fallback, hard failure when the store is empty.
        let problem_id = match self.store.random_verified_problem(difficulty).await? {
            Some(id) => id,
            None => self
                .store
                .any_verified_problem()
                .await?
                .ok_or_else(|| CoreError::StoreUnavailable("no verified problems".into()))?,
        };

        // 4. Fetch the problem including test cases.
        let problem = self
            .store
            .get_problem(&problem_id)
            .await?
            .ok_or_else(|| CoreError::StoreUnavailable(format!("problem {problem_id} missing")))?;

        // 5. Seed the blob and verify it persisted (single retry).
        let started_at = chrono::Utc::now().timestamp_millis();
        let mut players = HashMap::new();
        players.insert(
            player1.player_id.clone(),
            PlayerInfo {
                username: player1.username.clone(),
                rating: player1.rating,
            },
        );
        players.insert(
            player2.player_id.clone(),
            PlayerInfo {
                username: player2.username.clone(),
                rating: player2.rating,
            },
        );
        let blob = MatchBlob {
            match_id: match_id.clone(),
            problem_id: problem_id.clone(),
            room_id: None,
            started_at,
            ended_at: None,
            status: MatchStatus::Ongoing,
            players,
            ratings: RatingsSnapshot {
                player1: player1.rating,
                player2: player2.rating,
                problem_elo,
            },
            players_code: HashMap::new(),
            lines_written: HashMap::new(),
            languages: HashMap::new(),
            submissions: vec![],
            test_submissions: vec![],
            winner_user_id: None,
            rating_changes: HashMap::new(),
            bot_completion_times: HashMap::new(),
            bot_stats: HashMap::new(),
            problem: ProblemSnapshot::from_problem(&problem),
        };

        self.coord.write_match(&blob).await?;
        if self.coord.read_match(&match_id).await?.is_none() {
            tracing::warn!(match_id = %match_id, "Blob write not visible, retrying once");
            self.coord.write_match(&blob).await?;
            if self.coord.read_match(&match_id).await?.is_none() {
                return Err(CoreError::StoreUnavailable(
                    "match blob failed to persist".into(),
                ));
            }
        }

        // Seed the match document so submissions can link against it.
        self.store
            .upsert_match(&MatchDoc {
                id: match_id.clone(),
                problem_id: problem_id.clone(),
                player_ids: vec![player1.player_id.clone(), player2.player_id.clone()],
                status: "ongoing".into(),
                winner_user_id: None,
                submission_ids: vec![],
                test_run_ids: vec![],
                started_at,
                ended_at: None,
            })
            .await?;

        // 6. Open the session and record its room id.
        let player_ids = vec![player1.player_id.clone(), player2.player_id.clone()];
        let room = self
            .rooms
            .open_match_room(&match_id, &problem_id, &player_ids)
            .await?;
        let room_id = room.room_id().to_string();
        self.coord
            .update_match(&match_id, |blob| {
                blob.room_id = Some(room_id.clone());
            })
            .await?;

        // 7. Mark the match live; point each bot at it.
        self.coord.add_active_match(&match_id).await?;
        for seat in [player1, player2] {
            if seat.is_bot {
                self.coord
                    .set_bot_current_match(&seat.player_id, &match_id)
                    .await?;
                self.coord.set_bot_state(&seat.player_id, "playing").await?;
            }
        }

        // 8. Ratings snapshot hash.
        self.coord
            .write_ratings_hash(
                &match_id,
                &player1.player_id,
                player1.rating,
                &player2.player_id,
                player2.rating,
                problem_elo,
            )
            .await?;

        // 9. Finalize both reservations. The caller's pair locks make this
        // one atomic scope.
        let reservation = Reservation {
            status: ReservationStatus::Active,
            match_id: Some(match_id.clone()),
            room_id: Some(room_id.clone()),
            problem_id: Some(problem_id.clone()),
        };
        for seat in [player1, player2] {
            self.coord
                .set_reservation(&seat.player_id, &reservation, RESERVATION_TTL)
                .await?;
        }

        // 10. Announce.
        self.coord
            .publish_match_event(&serde_json::json!({
                "type": "match_created",
                "matchId": match_id,
                "roomId": room_id,
                "problemId": problem_id,
                "players": player_ids,
            }))
            .await?;

        let pairing = match (player1.is_bot, player2.is_bot) {
            (false, false) => "human_human",
            (true, true) => "bot_bot",
            _ => "human_bot",
        };
        crate::metrics::MATCHES_CREATED_TOTAL
            .with_label_values(&[pairing])
            .inc();
        tracing::info!(
            match_id = %match_id,
            problem_id = %problem_id,
            room_id = %room_id,
            difficulty = %difficulty,
            pairing,
            "Match created"
        );

        Ok(CreatedMatch {
            match_id,
            room_id,
            problem_id,
            problem,
            problem_elo,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{keys, CoordStore, MemoryCoordStore};
    use crate::room::LocalRooms;
    use crate::store::memory::MemoryStore;
    use crate::store::{Param, Signature, TestCase};

    fn sample_problem(id: &str, difficulty: Difficulty) -> Problem {
        Problem {
            id: id.into(),
            title: "Two Sum".into(),
            description: "find the pair".into(),
            difficulty,
            topics: vec!["array".into()],
            signature: Signature {
                function_name: "twoSum".into(),
                parameters: vec![
                    Param {
                        name: "nums".into(),
                        ty: "int[]".into(),
                    },
                    Param {
                        name: "target".into(),
                        ty: "int".into(),
                    },
                ],
                return_type: "int[]".into(),
                comparison_mode: None,
                custom_comparator: None,
            },
            starter_code: HashMap::new(),
            examples: vec![],
            constraints: vec![],
            time_complexity: None,
            test_cases: vec![TestCase {
                input: vec![serde_json::json!([2, 7]), serde_json::json!(9)],
                output: serde_json::json!([0, 1]),
                special_input_data: None,
            }],
            solutions: HashMap::new(),
            verified: true,
        }
    }

    fn seat(id: &str, rating: i32, is_bot: bool) -> PlayerSeat {
        PlayerSeat {
            player_id: id.into(),
            username: format!("u-{id}"),
            rating,
            is_bot,
        }
    }

    struct Fixture {
        coord_store: Arc<MemoryCoordStore>,
        coord: Coordinator,
        store: Arc<MemoryStore>,
        creation: MatchCreation,
    }

    fn fixture() -> Fixture {
        let coord_store = Arc::new(MemoryCoordStore::new());
        let coord = Coordinator::new(coord_store.clone());
        let store = Arc::new(MemoryStore::new());
        let rooms = Arc::new(LocalRooms::new());
        let config = Arc::new(test_config());
        let creation = MatchCreation::new(coord.clone(), store.clone(), rooms, config);
        Fixture {
            coord_store,
            coord,
            store,
            creation,
        }
    }

    fn test_config() -> Config {
        // Env-independent defaults for tests.
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

    #[tokio::test]
    async fn test_create_match_seeds_everything() {
        let f = fixture();
        f.store.add_problem(sample_problem("p1", Difficulty::Medium));

        let created = f
            .creation
            .create_match(
                &seat("a", 1500, false),
                &seat("b", 1540, false),
                Some(Difficulty::Medium),
            )
            .await
            .unwrap();

        assert_eq!(created.problem_id, "p1");
        assert_eq!(created.problem_elo, 1500);

        let blob = f.coord.read_match(&created.match_id).await.unwrap().unwrap();
        assert_eq!(blob.status, MatchStatus::Ongoing);
        assert_eq!(blob.room_id.as_deref(), Some(created.room_id.as_str()));
        assert_eq!(blob.ratings.player1, 1500);
        assert_eq!(blob.ratings.player2, 1540);
        assert_eq!(blob.problem.test_cases_count, 1);

        assert!(f.coord.is_active_match(&created.match_id).await.unwrap());

        for player in ["a", "b"] {
            let r = f.coord.reservation(player).await.unwrap().unwrap();
            assert_eq!(r.status, ReservationStatus::Active);
            assert_eq!(r.match_id.as_deref(), Some(created.match_id.as_str()));
        }

        let hash = f.coord.read_ratings_hash(&created.match_id).await.unwrap();
        assert_eq!(hash.get("userId1").map(String::as_str), Some("a"));
        assert_eq!(hash.get("problemElo").map(String::as_str), Some("1500"));

        let events = f.coord_store.published_on(keys::EVENTS_MATCH);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "match_created");
        assert_eq!(events[0]["matchId"], created.match_id.as_str());

        // The sanitized snapshot never carries hidden cases or solutions
        let raw = f
            .coord_store
            .get(&keys::match_blob(&created.match_id))
            .await
            .unwrap()
            .unwrap();
        assert!(!raw.contains("testCases\""));
        assert!(!raw.contains("solutions"));

        let doc = f.store.get_match(&created.match_id).await.unwrap().unwrap();
        assert_eq!(doc.status, "ongoing");
    }

    #[tokio::test]
    async fn test_bot_participant_gets_pointer_and_state() {
        let f = fixture();
        f.store.add_problem(sample_problem("p1", Difficulty::Easy));

        let created = f
            .creation
            .create_match(
                &seat("h", 1200, false),
                &seat("q", 1210, true),
                Some(Difficulty::Easy),
            )
            .await
            .unwrap();

        assert_eq!(
            f.coord.bot_current_match("q").await.unwrap().as_deref(),
            Some(created.match_id.as_str())
        );
        assert_eq!(f.coord.bot_state("q").await.unwrap().as_deref(), Some("playing"));
        assert!(f.coord.bot_current_match("h").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_difficulty_fallback_to_any_verified() {
        let f = fixture();
        // Only a Hard problem exists; ask for Easy.
        f.store.add_problem(sample_problem("p-hard", Difficulty::Hard));

        let created = f
            .creation
            .create_match(
                &seat("a", 1200, false),
                &seat("b", 1210, false),
                Some(Difficulty::Easy),
            )
            .await
            .unwrap();
        assert_eq!(created.problem_id, "p-hard");
    }

    #[tokio::test]
    async fn test_no_problems_fails() {
        let f = fixture();
        let err = f
            .creation
            .create_match(
                &seat("a", 1200, false),
                &seat("b", 1210, false),
                Some(Difficulty::Easy),
            )
            .await;
        assert!(matches!(err, Err(CoreError::StoreUnavailable(_))));
        // Nothing leaked into the active set
        assert!(f.coord.active_matches().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_active_reservation_blocks_creation() {
        let f = fixture();
        f.store.add_problem(sample_problem("p1", Difficulty::Easy));
        f.coord
            .set_reservation(
                "a",
                &Reservation {
                    status: ReservationStatus::Active,
                    match_id: Some("other".into()),
                    room_id: None,
                    problem_id: None,
                },
                RESERVATION_TTL,
            )
            .await
            .unwrap();

        let err = f
            .creation
            .create_match(
                &seat("a", 1200, false),
                &seat("b", 1210, false),
                Some(Difficulty::Easy),
            )
            .await;
        assert!(matches!(err, Err(CoreError::PreflightConflict(_))));
    }

    #[tokio::test]
    async fn test_placeholder_reservation_does_not_block() {
        let f = fixture();
        f.store.add_problem(sample_problem("p1", Difficulty::Easy));
        // The controller writes creating-status placeholders before calling.
        f.coord
            .set_reservation("a", &Reservation::creating(), RESERVATION_TTL)
            .await
            .unwrap();
        f.coord
            .set_reservation("b", &Reservation::creating(), RESERVATION_TTL)
            .await
            .unwrap();

        let created = f
            .creation
            .create_match(
                &seat("a", 1200, false),
                &seat("b", 1210, false),
                Some(Difficulty::Easy),
            )
            .await
            .unwrap();
        let r = f.coord.reservation("a").await.unwrap().unwrap();
        assert_eq!(r.status, ReservationStatus::Active);
        assert_eq!(r.match_id.as_deref(), Some(created.match_id.as_str()));
    }
}
