// The per-match JSON blob and its nested records.
//
// Field names are camelCase on the wire and must stay byte-stable; the blob
// is shared with other services that read `match:{id}` directly.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::executor::TestCaseResult;
use crate::rating::{Difficulty, RatingChange};
use crate::store::{Problem, ProblemExample, Signature};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Ongoing,
    Finished,
    Abandoned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub username: String,
    pub rating: i32,
}

/// Rating snapshot taken at creation; resolution reads these, never the
/// live store ratings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingsSnapshot {
    pub player1: i32,
    pub player2: i32,
    pub problem_elo: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub user_id: String,
    pub language: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complexity_failed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_complexity: Option<String>,
    pub test_results: Vec<TestCaseResult>,
    pub average_time: f64,
    pub average_memory: f64,
    pub tests_passed: u32,
    pub total_tests: u32,
    pub code: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotCompletionPlan {
    /// Planned completion offset from match start, in milliseconds.
    pub planned_completion_ms: u64,
    /// Absolute epoch-ms instant the completion timer targets.
    pub planned_completion_time: i64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotStats {
    pub submissions: u32,
    pub test_cases_solved: u32,
}

/// Client-safe slice of the problem stored in the blob. Hidden test cases
/// and reference solutions never leave the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemSnapshot {
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub topics: Vec<String>,
    pub signature: Signature,
    pub starter_code: HashMap<String, String>,
    pub examples: Vec<ProblemExample>,
    pub constraints: Vec<String>,
    pub test_cases_count: usize,
}

impl ProblemSnapshot {
    pub fn from_problem(p: &Problem) -> Self {
        ProblemSnapshot {
            title: p.title.clone(),
            description: p.description.clone(),
            difficulty: p.difficulty,
            topics: p.topics.clone(),
            signature: p.signature.clone(),
            starter_code: p.starter_code.clone(),
            examples: p.examples.clone(),
            constraints: p.constraints.clone(),
            test_cases_count: p.test_cases.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchBlob {
    pub match_id: String,
    pub problem_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    /// Epoch milliseconds.
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    pub status: MatchStatus,
    pub players: HashMap<String, PlayerInfo>,
    pub ratings: RatingsSnapshot,
    #[serde(default)]
    pub players_code: HashMap<String, HashMap<String, String>>,
    #[serde(default)]
    pub lines_written: HashMap<String, u32>,
    #[serde(default)]
    pub languages: HashMap<String, String>,
    #[serde(default)]
    pub submissions: Vec<SubmissionRecord>,
    #[serde(default)]
    pub test_submissions: Vec<SubmissionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_user_id: Option<String>,
    #[serde(default)]
    pub rating_changes: HashMap<String, RatingChange>,
    #[serde(default)]
    pub bot_completion_times: HashMap<String, BotCompletionPlan>,
    #[serde(default)]
    pub bot_stats: HashMap<String, BotStats>,
    pub problem: ProblemSnapshot,
}

impl MatchBlob {
    pub fn is_ongoing(&self) -> bool {
        self.status == MatchStatus::Ongoing
    }

    pub fn opponent_of(&self, player_id: &str) -> Option<String> {
        self.players.keys().find(|id| *id != player_id).cloned()
    }
}

/// Per-player reservation ticket. A live ticket blocks re-queueing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub status: ReservationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Creating,
    Active,
}

impl Reservation {
    pub fn creating() -> Self {
        Reservation {
            status: ReservationStatus::Creating,
            match_id: None,
            room_id: None,
            problem_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_serializes_camel_case() {
        let blob = MatchBlob {
            match_id: "m1".into(),
            problem_id: "p1".into(),
            room_id: Some("r1".into()),
            started_at: 1_000,
            ended_at: None,
            status: MatchStatus::Ongoing,
            players: HashMap::new(),
            ratings: RatingsSnapshot {
                player1: 1500,
                player2: 1540,
                problem_elo: 1500,
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
            problem: ProblemSnapshot {
                title: "t".into(),
                description: "d".into(),
                difficulty: Difficulty::Medium,
                topics: vec![],
                signature: Signature {
                    function_name: "f".into(),
                    parameters: vec![],
                    return_type: "int".into(),
                    comparison_mode: None,
                    custom_comparator: None,
                },
                starter_code: HashMap::new(),
                examples: vec![],
                constraints: vec![],
                test_cases_count: 3,
            },
        };
        let json = serde_json::to_value(&blob).unwrap();
        assert_eq!(json["matchId"], "m1");
        assert_eq!(json["status"], "ongoing");
        assert_eq!(json["ratings"]["problemElo"], 1500);
        assert_eq!(json["problem"]["testCasesCount"], 3);
        assert!(json.get("winnerUserId").is_none());
        assert!(json.get("endedAt").is_none());
    }

    #[test]
    fn test_blob_roundtrip_tolerates_missing_optionals() {
        let raw = serde_json::json!({
            "matchId": "m2",
            "problemId": "p2",
            "startedAt": 5,
            "status": "finished",
            "players": {},
            "ratings": {"player1": 1, "player2": 2, "problemElo": 3},
            "problem": {
                "title": "t", "description": "d", "difficulty": "Easy",
                "topics": [], "signature": {
                    "functionName": "f", "parameters": [], "returnType": "void"
                },
                "starterCode": {}, "examples": [], "constraints": [],
                "testCasesCount": 0
            }
        });
        let blob: MatchBlob = serde_json::from_value(raw).unwrap();
        assert_eq!(blob.status, MatchStatus::Finished);
        assert!(blob.submissions.is_empty());
        assert!(blob.rating_changes.is_empty());
    }

    #[test]
    fn test_opponent_lookup() {
        let mut players = HashMap::new();
        players.insert(
            "a".to_string(),
            PlayerInfo {
                username: "a".into(),
                rating: 1500,
            },
        );
        players.insert(
            "b".to_string(),
            PlayerInfo {
                username: "b".into(),
                rating: 1500,
            },
        );
        let blob = MatchBlob {
            match_id: "m".into(),
            problem_id: "p".into(),
            room_id: None,
            started_at: 0,
            ended_at: None,
            status: MatchStatus::Ongoing,
            players,
            ratings: RatingsSnapshot {
                player1: 0,
                player2: 0,
                problem_elo: 0,
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
            problem: ProblemSnapshot {
                title: "t".into(),
                description: "d".into(),
                difficulty: Difficulty::Easy,
                topics: vec![],
                signature: Signature {
                    function_name: "f".into(),
                    parameters: vec![],
                    return_type: "void".into(),
                    comparison_mode: None,
                    custom_comparator: None,
                },
                starter_code: HashMap::new(),
                examples: vec![],
                constraints: vec![],
                test_cases_count: 0,
            },
        };
        assert_eq!(blob.opponent_of("a").as_deref(), Some("b"));
    }

    #[test]
    fn test_reservation_wire_shape() {
        let r = Reservation::creating();
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"], "creating");
        assert!(json.get("matchId").is_none());

        let active = Reservation {
            status: ReservationStatus::Active,
            match_id: Some("m1".into()),
            room_id: Some("r1".into()),
            problem_id: Some("p1".into()),
        };
        let json = serde_json::to_value(&active).unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["matchId"], "m1");
    }
}
