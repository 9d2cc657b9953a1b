// Wire frames for the queue and match-session protocols.
//
// JSON frames tagged by `type`, camelCase fields. Frame shapes are part of
// the client contract.

use serde::{Deserialize, Serialize};

use crate::coord::blob::SubmissionRecord;
use crate::coord::ProblemSnapshot;
use crate::executor::TestCaseResult;

// ── Queue protocol ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueInbound {
    #[serde(rename_all = "camelCase")]
    Join { user_id: String, rating: i32 },
    Leave,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueOutbound {
    #[serde(rename_all = "camelCase")]
    Queued { position: usize },
    #[serde(rename_all = "camelCase")]
    MatchFound {
        match_id: String,
        room_id: String,
        problem_id: String,
    },
    #[serde(rename_all = "camelCase")]
    AlreadyInMatch {
        match_id: String,
        room_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Error { message: String },
}

// ── Match-session protocol ────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchInbound {
    #[serde(rename_all = "camelCase")]
    UpdateCode {
        user_id: String,
        language: String,
        code: String,
        #[serde(default)]
        lines: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    SetLanguage { user_id: String, language: String },
    #[serde(rename_all = "camelCase")]
    SubmitCode {
        user_id: String,
        language: String,
        source: String,
    },
    #[serde(rename_all = "camelCase")]
    TestSubmitCode {
        user_id: String,
        language: String,
        source: String,
    },
    #[serde(rename_all = "camelCase")]
    EndMatch {
        #[serde(default)]
        winner_user_id: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStep {
    Compiling,
    RunningTests,
    AnalyzingComplexity,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MatchOutbound {
    #[serde(rename_all = "camelCase")]
    MatchInit {
        match_id: String,
        problem: ProblemSnapshot,
        players: serde_json::Value,
        started_at: i64,
        max_duration_ms: u64,
    },
    #[serde(rename_all = "camelCase")]
    CodeUpdate { user_id: String, lines: u32 },
    #[serde(rename_all = "camelCase")]
    LanguageChanged { user_id: String, language: String },
    #[serde(rename_all = "camelCase")]
    SubmissionStep { step: SubmissionStep },
    #[serde(rename_all = "camelCase")]
    SubmissionResult { submission: SubmissionRecord },
    #[serde(rename_all = "camelCase")]
    TestSubmissionResult {
        passed_tests: u32,
        total_tests: u32,
        results: Vec<TestCaseResult>,
    },
    /// Opponent-facing submission notice. Never carries the code.
    #[serde(rename_all = "camelCase")]
    NewSubmission {
        user_id: String,
        passed: bool,
        tests_passed: u32,
        total_tests: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        complexity_failed: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    ComplexityFailed {
        user_id: String,
        derived_complexity: String,
    },
    #[serde(rename_all = "camelCase")]
    MatchWinner {
        user_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    MatchDraw { reason: String },
    #[serde(rename_all = "camelCase")]
    RateLimit { action: String },
    #[serde(rename_all = "camelCase")]
    TestProgressUpdate {
        user_id: String,
        test_cases_solved: u32,
        total_test_cases: u32,
    },
    #[serde(rename_all = "camelCase")]
    Error { message: String },
}

impl MatchOutbound {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("outbound frames always serialize")
    }
}

impl QueueOutbound {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("outbound frames always serialize")
    }
}
