// Document store access layer: users, bots, problems, matches, submissions.
//
// The store itself is an external collaborator. `DocumentStore` is its
// contract; `SqlStore` implements it over sqlx/SQLite and `MemoryStore` is
// the in-memory double used by tests.

pub mod memory;
pub mod sql;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::rating::Difficulty;

/// Prefix marking guest identifiers. Guests are never persisted beyond the
/// match; the core never parses the rest of the identifier.
pub const GUEST_PREFIX: &str = "guest_";

pub fn is_guest(player_id: &str) -> bool {
    player_id.starts_with(GUEST_PREFIX)
}

// ── Problem model ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// How expected and actual outputs are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonMode {
    #[default]
    Strict,
    Unordered,
    Set,
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub function_name: String,
    pub parameters: Vec<Param>,
    pub return_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison_mode: Option<ComparisonMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_comparator: Option<String>,
}

impl Signature {
    pub fn comparison_mode(&self) -> ComparisonMode {
        self.comparison_mode.unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    /// Positional arguments, one JSON value per signature parameter.
    pub input: Vec<serde_json::Value>,
    pub output: serde_json::Value,
    /// Extra per-case data such as a cycle position for linked-list problems.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_input_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemExample {
    pub input: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub id: String,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub topics: Vec<String>,
    pub signature: Signature,
    /// Starter code per language key.
    pub starter_code: HashMap<String, String>,
    pub examples: Vec<ProblemExample>,
    pub constraints: Vec<String>,
    /// Expected asymptotic bound, e.g. `O(n log n)`. Absent means no
    /// complexity verification for this problem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_complexity: Option<String>,
    pub test_cases: Vec<TestCase>,
    /// Reference solutions per language key.
    #[serde(default)]
    pub solutions: HashMap<String, String>,
    pub verified: bool,
}

// ── Player documents ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDoc {
    pub id: String,
    pub username: String,
    pub rating: i32,
    pub wins: i64,
    pub losses: i64,
    pub draws: i64,
    pub total_matches: i64,
    pub time_coded_ms: i64,
    #[serde(default)]
    pub match_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotDoc {
    pub id: String,
    pub username: String,
    pub rating: i32,
}

// ── Match and submission documents ────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionType {
    Competitive,
    Test,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionDoc {
    pub id: String,
    pub match_id: String,
    pub user_id: String,
    pub language: String,
    pub code: String,
    pub passed: bool,
    #[serde(default)]
    pub complexity_failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_complexity: Option<String>,
    pub tests_passed: u32,
    pub total_tests: u32,
    pub submission_type: SubmissionType,
    /// Epoch milliseconds.
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDoc {
    pub id: String,
    pub problem_id: String,
    pub player_ids: Vec<String>,
    /// ongoing, finished, abandoned.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner_user_id: Option<String>,
    #[serde(default)]
    pub submission_ids: Vec<String>,
    #[serde(default)]
    pub test_run_ids: Vec<String>,
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
}

/// One player's view of a resolved match, for stats settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    Win,
    Loss,
    Draw,
}

// ── Store contract ────────────────────────────────────────────────────

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_user(&self, id: &str) -> Result<Option<UserDoc>>;
    async fn get_bot(&self, id: &str) -> Result<Option<BotDoc>>;

    /// Bot ⟺ present in the bots collection. Guests and humans are never
    /// looked up here by callers (guest ⟺ prefix).
    async fn is_bot(&self, id: &str) -> Result<bool>;

    /// Pick a uniformly random verified problem id of the given difficulty.
    async fn random_verified_problem(&self, difficulty: Difficulty) -> Result<Option<String>>;
    /// Fallback when the targeted bucket is empty.
    async fn any_verified_problem(&self) -> Result<Option<String>>;
    /// Fetch a problem including its test cases.
    async fn get_problem(&self, id: &str) -> Result<Option<Problem>>;

    /// Submissions documents are immutable once written.
    async fn insert_submission(&self, doc: &SubmissionDoc) -> Result<()>;

    /// Create-or-replace the match document.
    async fn upsert_match(&self, doc: &MatchDoc) -> Result<()>;
    async fn get_match(&self, id: &str) -> Result<Option<MatchDoc>>;

    /// Add a submission id to the match document's id list (set semantics;
    /// adding the same id twice keeps one copy). `test_run` routes the id
    /// into `testRunIds` instead of `submissionIds`.
    async fn add_submission_to_match(
        &self,
        match_id: &str,
        submission_id: &str,
        test_run: bool,
    ) -> Result<()>;

    async fn finish_match(
        &self,
        match_id: &str,
        winner_user_id: Option<&str>,
        status: &str,
        ended_at: i64,
    ) -> Result<()>;

    /// Apply a resolved match to one player's persistent stats: outcome
    /// counter, totalMatches, rating delta, timeCoded, and the match link.
    /// Applies to users and bots; callers skip guests.
    async fn apply_match_result(
        &self,
        player_id: &str,
        outcome: MatchOutcome,
        rating_change: i32,
        duration_ms: i64,
        match_id: &str,
    ) -> Result<()>;

    /// Drop any cached stats/activity views for the player.
    async fn invalidate_player_caches(&self, player_id: &str) -> Result<()>;
}

/// Allocate a storage-native id: 24 hex chars, 4-byte unix-seconds prefix
/// followed by 8 random bytes.
pub fn object_id_hex() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 12];
    let secs = chrono::Utc::now().timestamp() as u32;
    bytes[..4].copy_from_slice(&secs.to_be_bytes());
    rand::thread_rng().fill_bytes(&mut bytes[4..]);
    hex::encode(bytes)
}

/// Quick shape check for ids produced by `object_id_hex` (and by the
/// upstream store). Used by pre-flight validation.
pub fn is_object_id_hex(s: &str) -> bool {
    s.len() == 24 && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_id_shape() {
        let id = object_id_hex();
        assert_eq!(id.len(), 24);
        assert!(is_object_id_hex(&id));
    }

    #[test]
    fn test_object_ids_distinct() {
        let a = object_id_hex();
        let b = object_id_hex();
        assert_ne!(a, b);
    }

    #[test]
    fn test_is_object_id_rejects_junk() {
        assert!(!is_object_id_hex("guest_abc123"));
        assert!(!is_object_id_hex("64b1f0a2c9e77a00123456"));
        assert!(!is_object_id_hex("64b1f0a2c9e77a00123456zz"));
    }

    #[test]
    fn test_guest_prefix() {
        assert!(is_guest("guest_9f3b"));
        assert!(!is_guest("64b1f0a2c9e77a0012345678"));
    }

    #[test]
    fn test_signature_serde_camel_case() {
        let sig = Signature {
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
            comparison_mode: Some(ComparisonMode::Unordered),
            custom_comparator: None,
        };
        let json = serde_json::to_value(&sig).unwrap();
        assert_eq!(json["functionName"], "twoSum");
        assert_eq!(json["returnType"], "int[]");
        assert_eq!(json["comparisonMode"], "unordered");
        assert_eq!(json["parameters"][0]["type"], "int[]");
        assert!(json.get("customComparator").is_none());
    }

    #[test]
    fn test_comparison_mode_default() {
        let sig: Signature = serde_json::from_value(serde_json::json!({
            "functionName": "f",
            "parameters": [],
            "returnType": "int"
        }))
        .unwrap();
        assert_eq!(sig.comparison_mode(), ComparisonMode::Strict);
    }
}
