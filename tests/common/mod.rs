// Shared harness for integration tests: in-memory doubles for the
// coordination store, document store, sandbox, verifier and room server.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use codeduel_backend::complexity::FakeVerifier;
use codeduel_backend::config::{BotTimeDist, BotTimeParams, Config, PerDifficulty};
use codeduel_backend::coord::{Coordinator, MemoryCoordStore};
use codeduel_backend::creation::MatchCreation;
use codeduel_backend::executor::TestExecutor;
use codeduel_backend::matchmaking::Matchmaking;
use codeduel_backend::rating::Difficulty;
use codeduel_backend::room::{LocalQueueNotifier, LocalRooms};
use codeduel_backend::sandbox::FakeSandbox;
use codeduel_backend::session::{SessionDeps, SessionManager};
use codeduel_backend::store::memory::MemoryStore;
use codeduel_backend::store::{BotDoc, Param, Problem, Signature, TestCase, UserDoc};

pub struct TestHarness {
    pub coord_store: Arc<MemoryCoordStore>,
    pub coord: Coordinator,
    pub store: Arc<MemoryStore>,
    pub rooms: Arc<LocalRooms>,
    pub notifier: Arc<LocalQueueNotifier>,
    pub sandbox: Arc<FakeSandbox>,
    pub verifier: Arc<FakeVerifier>,
    pub matchmaking: Arc<Matchmaking>,
    pub sessions: Arc<SessionManager>,
    pub config: Arc<Config>,
}

pub fn base_config() -> Config {
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
        bot_time_dist: BotTimeDist::Lognormal,
        bot_time_params: PerDifficulty {
            easy: None,
            medium: None,
            hard: None,
        },
        k_factor: 32,
        gaussian_sigma: 250.0,
        difficulty_targets: PerDifficulty {
            easy: 1200.0,
            medium: 1500.0,
            hard: 2000.0,
        },
        submission_cache_ttl_s: 3_000,
        bots_enabled: true,
    }
}

/// Bot parameters yielding a completion time around the given offset.
pub fn bot_params_around_ms(ms: f64) -> Option<BotTimeParams> {
    Some(BotTimeParams {
        mu: Some(ms.ln()),
        sigma: Some(0.01),
        shape: None,
        scale: None,
    })
}

pub fn harness() -> TestHarness {
    harness_with(base_config())
}

pub fn harness_with(config: Config) -> TestHarness {
    let config = Arc::new(config);
    let coord_store = Arc::new(MemoryCoordStore::new());
    let coord = Coordinator::new(coord_store.clone());
    let store = Arc::new(MemoryStore::new());
    let rooms = Arc::new(LocalRooms::new());
    let notifier = Arc::new(LocalQueueNotifier::new());
    let sandbox = Arc::new(FakeSandbox::new());
    let verifier = Arc::new(FakeVerifier::new());

    let executor = Arc::new(
        TestExecutor::new(sandbox.clone()).with_polling(Duration::from_millis(1), 3),
    );
    let creation = Arc::new(MatchCreation::new(
        coord.clone(),
        store.clone(),
        rooms.clone(),
        config.clone(),
    ));
    let matchmaking = Matchmaking::new(
        coord.clone(),
        store.clone(),
        creation,
        notifier.clone(),
        config.clone(),
    );
    let sessions = SessionManager::new(
        SessionDeps {
            coord: coord.clone(),
            store: store.clone(),
            executor,
            verifier: verifier.clone(),
            config: config.clone(),
        },
        rooms.clone(),
    );

    TestHarness {
        coord_store,
        coord,
        store,
        rooms,
        notifier,
        sandbox,
        verifier,
        matchmaking,
        sessions,
        config,
    }
}

/// A Medium two-sum problem with three hidden cases, all answering [0,1].
pub fn two_sum_problem(id: &str, time_complexity: Option<&str>) -> Problem {
    let case = |a: i64, b: i64, target: i64| TestCase {
        input: vec![serde_json::json!([a, b]), serde_json::json!(target)],
        output: serde_json::json!([0, 1]),
        special_input_data: None,
    };
    Problem {
        id: id.into(),
        title: "Two Sum".into(),
        description: "Find indices of the pair summing to target.".into(),
        difficulty: Difficulty::Medium,
        topics: vec!["array".into(), "hash-table".into()],
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
        constraints: vec!["2 <= nums.length <= 10^4".into()],
        time_complexity: time_complexity.map(|s| s.to_string()),
        test_cases: vec![case(2, 7, 9), case(3, 3, 6), case(1, 4, 5)],
        solutions: HashMap::new(),
        verified: true,
    }
}

pub const PASSING_STDOUT: &str = "Test 0: [0,1]\nTest 1: [0,1]\nTest 2: [0,1]\n";
pub const PYTHON_SOLUTION: &str =
    "class Solution:\n    def twoSum(self, nums, target):\n        return [0, 1]";

pub fn seed_user(store: &MemoryStore, id: &str, rating: i32) {
    store.add_user(UserDoc {
        id: id.into(),
        username: format!("user-{id}"),
        rating,
        wins: 0,
        losses: 0,
        draws: 0,
        total_matches: 0,
        time_coded_ms: 0,
        match_ids: vec![],
    });
}

pub fn seed_bot(store: &MemoryStore, id: &str, rating: i32) {
    store.add_bot(BotDoc {
        id: id.into(),
        username: format!("bot-{id}"),
        rating,
    });
}

/// Queue a human with a backdated admission timestamp so dwell gates pass.
pub async fn backdate_queue_human(h: &TestHarness, id: &str, rating: i32, wait_ms: i64) {
    let joined = chrono::Utc::now().timestamp_millis() - wait_ms;
    h.coord.queue_add(id, rating, joined).await.unwrap();
    h.coord.track_human(id).await.unwrap();
}

pub async fn backdate_queue_bot(h: &TestHarness, id: &str, rating: i32, wait_ms: i64) {
    let joined = chrono::Utc::now().timestamp_millis() - wait_ms;
    h.coord.queue_add(id, rating, joined).await.unwrap();
}

/// Run a pairing tick and start sessions for everything it created.
/// Returns the created match ids.
pub async fn pair_and_start(h: &TestHarness) -> Vec<String> {
    let paired = h.matchmaking.run_pairing_tick().await.unwrap();
    let mut ids = Vec::new();
    for pair in paired {
        ids.push(pair.created.match_id.clone());
        h.sessions.start(pair.created, pair.seats).await;
    }
    ids
}

/// Poll until the condition holds or the timeout elapses.
pub async fn wait_until<F, Fut>(timeout_ms: u64, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = std::time::Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if condition().await {
            return true;
        }
        if std::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
