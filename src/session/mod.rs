// Match-session runtime: one actor per match.
//
// The actor's command loop is the single serialization point for the match:
// every blob mutation after creation happens on this loop, so handlers can
// read-modify-write without further coordination. Timers are plain tasks
// that send commands back into the loop and are aborted on teardown.

pub mod bots;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::complexity::{ComplexityVerifier, Verdict};
use crate::config::Config;
use crate::coord::{Coordinator, MatchStatus, PlayerInfo, SubmissionRecord};
use crate::creation::{CreatedMatch, PlayerSeat};
use crate::error::{CoreError, Result};
use crate::executor::TestExecutor;
use crate::protocol::{MatchInbound, MatchOutbound, SubmissionStep};
use crate::rate_limit::{RateLimitAction, RateLimiter};
use crate::rating::{self, RatingChange};
use crate::room::{RoomHandle, RoomServer};
use crate::runner::Language;
use crate::sandbox::canonical_language;
use crate::store::{
    is_guest, object_id_hex, DocumentStore, MatchOutcome, Problem, SubmissionDoc, SubmissionType,
};

/// How many cases a non-competitive test run exercises.
pub const TEST_RUN_CASES: usize = 3;

#[derive(Clone)]
pub struct SessionDeps {
    pub coord: Coordinator,
    pub store: Arc<dyn DocumentStore>,
    pub executor: Arc<TestExecutor>,
    pub verifier: Arc<dyn ComplexityVerifier>,
    pub config: Arc<Config>,
}

#[derive(Debug)]
pub enum SessionCommand {
    Inbound(MatchInbound),
    DurationTick,
    BotCodeTick { bot_id: String },
    BotProgressTick { bot_id: String },
    BotCompletion { bot_id: String },
    Shutdown,
}

enum Outcome {
    Winner {
        user_id: String,
        reason: Option<String>,
    },
    Draw {
        reason: String,
    },
}

/// Owns the running sessions of this process and routes inbound frames.
pub struct SessionManager {
    deps: SessionDeps,
    rooms: Arc<dyn RoomServer>,
    rate_limiter: RateLimiter,
    sessions: Mutex<HashMap<String, mpsc::Sender<SessionCommand>>>,
}

impl SessionManager {
    pub fn new(deps: SessionDeps, rooms: Arc<dyn RoomServer>) -> Arc<Self> {
        Arc::new(SessionManager {
            deps,
            rooms,
            rate_limiter: RateLimiter::new(),
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Start the session for a freshly created match.
    pub async fn start(self: &Arc<Self>, created: CreatedMatch, seats: [PlayerSeat; 2]) {
        let Some(room) = self.rooms.room(&created.room_id).await else {
            tracing::error!(
                match_id = %created.match_id,
                room_id = %created.room_id,
                "No room for new match"
            );
            return;
        };

        let (tx, rx) = mpsc::channel(64);
        let actor = SessionActor {
            deps: self.deps.clone(),
            room,
            match_id: created.match_id.clone(),
            problem: created.problem,
            problem_id: created.problem_id,
            seats,
            started_at: 0,
            rate_limiter: self.rate_limiter.clone(),
            tx: tx.clone(),
            timers: HashMap::new(),
            finished: false,
        };

        let match_id = created.match_id.clone();
        self.sessions
            .lock()
            .unwrap()
            .insert(match_id.clone(), tx);

        let manager = self.clone();
        tokio::spawn(async move {
            actor.run(rx).await;
            manager.sessions.lock().unwrap().remove(&match_id);
        });
    }

    /// Route an inbound frame to its match. Returns false when no session
    /// owns the match in this process.
    pub async fn dispatch(&self, match_id: &str, message: MatchInbound) -> bool {
        let tx = self.sessions.lock().unwrap().get(match_id).cloned();
        match tx {
            Some(tx) => tx.send(SessionCommand::Inbound(message)).await.is_ok(),
            None => false,
        }
    }

    /// Tear a session down without resolution (process shutdown). The
    /// disposal safety net marks a still-ongoing blob abandoned.
    pub async fn shutdown(&self, match_id: &str) {
        let tx = self.sessions.lock().unwrap().get(match_id).cloned();
        if let Some(tx) = tx {
            let _ = tx.send(SessionCommand::Shutdown).await;
        }
    }

    pub fn is_running(&self, match_id: &str) -> bool {
        self.sessions.lock().unwrap().contains_key(match_id)
    }
}

struct SessionActor {
    deps: SessionDeps,
    room: Arc<dyn RoomHandle>,
    match_id: String,
    problem: Problem,
    problem_id: String,
    seats: [PlayerSeat; 2],
    started_at: i64,
    rate_limiter: RateLimiter,
    tx: mpsc::Sender<SessionCommand>,
    timers: HashMap<String, JoinHandle<()>>,
    finished: bool,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::Receiver<SessionCommand>) {
        if let Err(e) = self.initialize().await {
            tracing::error!(match_id = %self.match_id, "Session init failed: {e}");
            self.dispose().await;
            return;
        }

        while !self.finished {
            let Some(command) = rx.recv().await else {
                break;
            };
            match command {
                SessionCommand::Inbound(message) => self.handle_inbound(message).await,
                SessionCommand::DurationTick => self.check_duration().await,
                SessionCommand::BotCodeTick { bot_id } => self.bot_code_tick(&bot_id).await,
                SessionCommand::BotProgressTick { bot_id } => {
                    self.bot_progress_tick(&bot_id).await
                }
                SessionCommand::BotCompletion { bot_id } => self.bot_completion(&bot_id).await,
                SessionCommand::Shutdown => break,
            }
        }

        self.dispose().await;
    }

    // ── Initialization ───────────────────────────────────────────────

    async fn initialize(&mut self) -> Result<()> {
        // Recovery may hand us a blob missing player entries; seed defaults
        // so later handlers can assume presence.
        let seats = self.seats.clone();
        let blob = self
            .deps
            .coord
            .update_match(&self.match_id, |blob| {
                for seat in &seats {
                    blob.players
                        .entry(seat.player_id.clone())
                        .or_insert_with(|| PlayerInfo {
                            username: seat.username.clone(),
                            rating: seat.rating,
                        });
                    blob.lines_written.entry(seat.player_id.clone()).or_insert(0);
                }
            })
            .await?
            .ok_or_else(|| {
                CoreError::StoreUnavailable(format!(
                    "blob for {} missing at session start",
                    self.match_id
                ))
            })?;
        self.started_at = blob.started_at;
        self.room
            .broadcast(
                &MatchOutbound::MatchInit {
                    match_id: self.match_id.clone(),
                    problem: blob.problem.clone(),
                    players: serde_json::to_value(&blob.players)?,
                    started_at: self.started_at,
                    max_duration_ms: self.deps.config.max_match_duration_ms,
                }
                .to_value(),
            )
            .await;

        self.arm_duration_tick();

        let bot_seats: Vec<PlayerSeat> =
            self.seats.iter().filter(|s| s.is_bot).cloned().collect();
        for seat in bot_seats {
            self.start_bot(&seat.player_id).await?;
        }

        tracing::info!(match_id = %self.match_id, "Session active");
        Ok(())
    }

    async fn start_bot(&mut self, bot_id: &str) -> Result<()> {
        let plan = bots::plan_completion(
            &self.deps.config,
            &self.match_id,
            self.problem.difficulty,
            bot_id,
            self.started_at,
        );

        let bot_key = bot_id.to_string();
        self.deps
            .coord
            .update_match(&self.match_id, |blob| {
                blob.bot_stats.entry(bot_key.clone()).or_default();
                if let Some(plan) = plan {
                    blob.bot_completion_times.insert(bot_key.clone(), plan);
                }
            })
            .await?;

        self.arm_timer(
            format!("bot-code:{bot_id}"),
            bots::next_code_tick(),
            SessionCommand::BotCodeTick {
                bot_id: bot_id.to_string(),
            },
        );
        self.arm_timer(
            format!("bot-progress:{bot_id}"),
            bots::next_progress_tick(),
            SessionCommand::BotProgressTick {
                bot_id: bot_id.to_string(),
            },
        );

        if let Some(plan) = plan {
            let delay_ms = (plan.planned_completion_time - now_ms()).max(0) as u64;
            tracing::info!(
                match_id = %self.match_id,
                bot_id,
                planned_ms = plan.planned_completion_ms,
                "Bot completion scheduled"
            );
            self.arm_timer(
                format!("bot-completion:{bot_id}"),
                Duration::from_millis(delay_ms),
                SessionCommand::BotCompletion {
                    bot_id: bot_id.to_string(),
                },
            );
        }
        Ok(())
    }

    // ── Timers ───────────────────────────────────────────────────────

    fn arm_timer(&mut self, key: String, delay: Duration, command: SessionCommand) {
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(command).await;
        });
        if let Some(old) = self.timers.insert(key, handle) {
            old.abort();
        }
    }

    fn arm_duration_tick(&mut self) {
        let tx = self.tx.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.tick().await;
            loop {
                interval.tick().await;
                if tx.send(SessionCommand::DurationTick).await.is_err() {
                    break;
                }
            }
        });
        if let Some(old) = self.timers.insert("duration".into(), handle) {
            old.abort();
        }
    }

    fn cancel_timers(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }

    async fn check_duration(&mut self) {
        if self.finished {
            return;
        }
        if now_ms() - self.started_at >= self.deps.config.max_match_duration_ms as i64 {
            tracing::info!(match_id = %self.match_id, "Match hit the duration ceiling");
            self.resolve(Outcome::Draw {
                reason: "timeout".into(),
            })
            .await;
        }
    }

    // ── Inbound messages ─────────────────────────────────────────────

    async fn handle_inbound(&mut self, message: MatchInbound) {
        match message {
            MatchInbound::UpdateCode {
                user_id,
                language,
                code,
                lines,
            } => {
                if let Err(e) = self.update_code(&user_id, &language, &code, lines).await {
                    tracing::error!(match_id = %self.match_id, "update_code failed: {e}");
                }
            }
            MatchInbound::SetLanguage { user_id, language } => {
                if let Err(e) = self.set_language(&user_id, &language).await {
                    tracing::error!(match_id = %self.match_id, "set_language failed: {e}");
                }
            }
            MatchInbound::TestSubmitCode {
                user_id,
                language,
                source,
            } => self.test_submit(&user_id, &language, &source).await,
            MatchInbound::SubmitCode {
                user_id,
                language,
                source,
            } => self.submit(&user_id, &language, &source).await,
            MatchInbound::EndMatch {
                winner_user_id,
                reason,
            } => self.end_match(winner_user_id, reason).await,
        }
    }

    async fn update_code(
        &mut self,
        user_id: &str,
        language: &str,
        code: &str,
        lines: Option<u32>,
    ) -> Result<()> {
        let line_count = lines.unwrap_or_else(|| code.lines().count() as u32);
        let user_key = user_id.to_string();
        let language_key = language.to_string();
        let code_owned = code.to_string();
        self.deps
            .coord
            .update_match(&self.match_id, |blob| {
                blob.players_code
                    .entry(user_key.clone())
                    .or_default()
                    .insert(language_key, code_owned);
                blob.lines_written.insert(user_key, line_count);
            })
            .await?;

        if let Some(opponent) = self.opponent_of(user_id) {
            self.room
                .send_to(
                    &opponent,
                    &MatchOutbound::CodeUpdate {
                        user_id: user_id.to_string(),
                        lines: line_count,
                    }
                    .to_value(),
                )
                .await;
        }
        Ok(())
    }

    async fn set_language(&mut self, user_id: &str, language: &str) -> Result<()> {
        let user_key = user_id.to_string();
        let language_key = language.to_string();
        self.deps
            .coord
            .update_match(&self.match_id, |blob| {
                blob.languages.insert(user_key, language_key);
            })
            .await?;
        self.room
            .broadcast(
                &MatchOutbound::LanguageChanged {
                    user_id: user_id.to_string(),
                    language: language.to_string(),
                }
                .to_value(),
            )
            .await;
        Ok(())
    }

    async fn test_submit(&mut self, user_id: &str, language: &str, source: &str) {
        if !self
            .rate_limiter
            .allow(user_id, RateLimitAction::TestSubmitCode)
        {
            self.send_to(
                user_id,
                MatchOutbound::RateLimit {
                    action: RateLimitAction::TestSubmitCode.label().into(),
                },
            )
            .await;
            return;
        }
        if self.problem.test_cases.is_empty() {
            self.send_error(user_id, "Problem data not available").await;
            return;
        }
        let Some(lang_key) = canonical_language(language) else {
            self.send_error(user_id, "Unsupported language").await;
            return;
        };
        let lang = Language::parse(lang_key).expect("canonical languages always parse");

        let cases: Vec<_> = self
            .problem
            .test_cases
            .iter()
            .take(TEST_RUN_CASES)
            .cloned()
            .collect();
        let report = match self
            .deps
            .executor
            .execute(lang, source, &self.problem.signature, &cases)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(match_id = %self.match_id, user_id, "Test run failed: {e}");
                self.send_error(user_id, "Test run failed").await;
                return;
            }
        };

        crate::metrics::SUBMISSIONS_TOTAL
            .with_label_values(&["test", if report.all_passed { "passed" } else { "failed" }])
            .inc();

        let record = self.build_record(user_id, lang_key, source, &report, None, None);
        let record_clone = record.clone();
        if let Err(e) = self
            .deps
            .coord
            .update_match(&self.match_id, |blob| {
                blob.test_submissions.push(record_clone);
            })
            .await
        {
            tracing::error!(match_id = %self.match_id, "test submission blob write: {e}");
        }
        if let Err(e) = self
            .persist_submission(&record, SubmissionType::Test)
            .await
        {
            tracing::error!(match_id = %self.match_id, "test submission persist: {e}");
        }

        self.send_to(
            user_id,
            MatchOutbound::TestSubmissionResult {
                passed_tests: report.passed_tests,
                total_tests: report.total_tests,
                results: report.results,
            },
        )
        .await;
    }

    async fn submit(&mut self, user_id: &str, language: &str, source: &str) {
        if !self.rate_limiter.allow(user_id, RateLimitAction::SubmitCode) {
            self.send_to(
                user_id,
                MatchOutbound::RateLimit {
                    action: RateLimitAction::SubmitCode.label().into(),
                },
            )
            .await;
            return;
        }
        if self.problem.test_cases.is_empty() {
            self.send_error(user_id, "Problem data not available").await;
            return;
        }
        let Some(lang_key) = canonical_language(language) else {
            self.send_error(user_id, "Unsupported language").await;
            return;
        };
        let lang = Language::parse(lang_key).expect("canonical languages always parse");

        // Cached outcome replay: identical code resubmits never touch the
        // sandbox or the LLM again.
        let code_hash = crate::coord::submission_code_hash(source, lang_key, &self.problem_id);
        match self
            .deps
            .coord
            .cached_submission(&self.match_id, user_id, &code_hash)
            .await
        {
            Ok(Some(cached)) => {
                tracing::info!(match_id = %self.match_id, user_id, "Submission cache hit");
                crate::metrics::SUBMISSIONS_TOTAL
                    .with_label_values(&["competitive", "cached"])
                    .inc();
                self.replay_cached(user_id, cached).await;
                return;
            }
            Ok(None) => {}
            Err(e) => tracing::error!(match_id = %self.match_id, "cache read failed: {e}"),
        }

        self.send_to(
            user_id,
            MatchOutbound::SubmissionStep {
                step: SubmissionStep::Compiling,
            },
        )
        .await;
        self.send_to(
            user_id,
            MatchOutbound::SubmissionStep {
                step: SubmissionStep::RunningTests,
            },
        )
        .await;

        let report = match self
            .deps
            .executor
            .execute(lang, source, &self.problem.signature, &self.problem.test_cases)
            .await
        {
            Ok(report) => report,
            Err(CoreError::InvalidRequest(message)) => {
                self.send_error(user_id, &message).await;
                return;
            }
            Err(e) => {
                // Breaker open or sandbox failure: nothing is recorded.
                tracing::warn!(match_id = %self.match_id, user_id, "Submission failed: {e}");
                crate::metrics::SUBMISSIONS_TOTAL
                    .with_label_values(&["competitive", "error"])
                    .inc();
                self.send_error(user_id, "Submission failed").await;
                return;
            }
        };

        // Complexity verification gates the winner path only.
        let mut derived_complexity = None;
        if report.all_passed {
            if let Some(bound) = self.problem.time_complexity.clone() {
                self.send_to(
                    user_id,
                    MatchOutbound::SubmissionStep {
                        step: SubmissionStep::AnalyzingComplexity,
                    },
                )
                .await;
                match self.deps.verifier.verify(source, &bound).await {
                    Ok(result) if result.verdict == Verdict::Fail => {
                        self.record_complexity_failure(
                            user_id,
                            lang_key,
                            source,
                            &report,
                            &code_hash,
                            result.derived_complexity,
                        )
                        .await;
                        return;
                    }
                    Ok(result) => derived_complexity = Some(result.derived_complexity),
                    Err(e) => {
                        // Fail open: availability beats precision here.
                        tracing::error!(
                            match_id = %self.match_id,
                            "Complexity verification error, failing open: {e}"
                        );
                    }
                }
            }
        }

        let record =
            self.build_record(user_id, lang_key, source, &report, None, derived_complexity);
        self.store_competitive(&record, &code_hash).await;

        crate::metrics::SUBMISSIONS_TOTAL
            .with_label_values(&[
                "competitive",
                if record.passed { "passed" } else { "failed" },
            ])
            .inc();

        // The submitter sees its own result before any derived broadcast.
        self.send_to(
            user_id,
            MatchOutbound::SubmissionResult {
                submission: record.clone(),
            },
        )
        .await;
        self.broadcast(MatchOutbound::NewSubmission {
            user_id: user_id.to_string(),
            passed: record.passed,
            tests_passed: record.tests_passed,
            total_tests: record.total_tests,
            complexity_failed: None,
        })
        .await;

        if record.passed {
            self.resolve(Outcome::Winner {
                user_id: user_id.to_string(),
                reason: None,
            })
            .await;
        }
    }

    async fn record_complexity_failure(
        &mut self,
        user_id: &str,
        lang_key: &str,
        source: &str,
        report: &crate::executor::ExecutionReport,
        code_hash: &str,
        derived: String,
    ) {
        tracing::info!(
            match_id = %self.match_id,
            user_id,
            derived = %derived,
            "Submission rejected on complexity"
        );
        crate::metrics::SUBMISSIONS_TOTAL
            .with_label_values(&["competitive", "complexity_failed"])
            .inc();

        let mut record = self.build_record(
            user_id,
            lang_key,
            source,
            report,
            Some(true),
            Some(derived.clone()),
        );
        record.passed = false;
        self.store_competitive(&record, code_hash).await;

        self.send_to(
            user_id,
            MatchOutbound::SubmissionResult {
                submission: record.clone(),
            },
        )
        .await;
        self.broadcast(MatchOutbound::ComplexityFailed {
            user_id: user_id.to_string(),
            derived_complexity: derived,
        })
        .await;
        self.broadcast(MatchOutbound::NewSubmission {
            user_id: user_id.to_string(),
            passed: false,
            tests_passed: record.tests_passed,
            total_tests: record.total_tests,
            complexity_failed: Some(true),
        })
        .await;
    }

    /// Replay a cached outcome, including the winner transition.
    async fn replay_cached(&mut self, user_id: &str, cached: SubmissionRecord) {
        self.send_to(
            user_id,
            MatchOutbound::SubmissionResult {
                submission: cached.clone(),
            },
        )
        .await;
        if cached.complexity_failed == Some(true) {
            self.broadcast(MatchOutbound::ComplexityFailed {
                user_id: user_id.to_string(),
                derived_complexity: cached.derived_complexity.clone().unwrap_or_default(),
            })
            .await;
        }
        self.broadcast(MatchOutbound::NewSubmission {
            user_id: user_id.to_string(),
            passed: cached.passed,
            tests_passed: cached.tests_passed,
            total_tests: cached.total_tests,
            complexity_failed: cached.complexity_failed,
        })
        .await;
        if cached.passed {
            self.resolve(Outcome::Winner {
                user_id: user_id.to_string(),
                reason: None,
            })
            .await;
        }
    }

    async fn end_match(&mut self, winner_user_id: Option<String>, reason: Option<String>) {
        if let Err(e) = self
            .deps
            .coord
            .publish_match_event(&serde_json::json!({
                "type": "match_end_request",
                "matchId": self.match_id,
                "winnerUserId": winner_user_id,
                "reason": reason,
            }))
            .await
        {
            tracing::error!(match_id = %self.match_id, "match_end_request publish: {e}");
        }
        match winner_user_id {
            Some(user_id) => {
                self.resolve(Outcome::Winner {
                    user_id,
                    reason,
                })
                .await
            }
            None => {
                self.resolve(Outcome::Draw {
                    reason: reason.unwrap_or_else(|| "ended".into()),
                })
                .await
            }
        }
    }

    // ── Submission plumbing ──────────────────────────────────────────

    fn build_record(
        &self,
        user_id: &str,
        language: &str,
        source: &str,
        report: &crate::executor::ExecutionReport,
        complexity_failed: Option<bool>,
        derived_complexity: Option<String>,
    ) -> SubmissionRecord {
        SubmissionRecord {
            user_id: user_id.to_string(),
            language: language.to_string(),
            timestamp: now_ms(),
            passed: report.all_passed,
            complexity_failed,
            derived_complexity,
            test_results: report.results.clone(),
            average_time: report.average_time,
            average_memory: report.average_memory,
            tests_passed: report.passed_tests,
            total_tests: report.total_tests,
            code: source.to_string(),
        }
    }

    /// Blob append + submissions document + cache entry for a competitive
    /// submission.
    async fn store_competitive(&mut self, record: &SubmissionRecord, code_hash: &str) {
        let record_clone = record.clone();
        if let Err(e) = self
            .deps
            .coord
            .update_match(&self.match_id, |blob| {
                blob.submissions.push(record_clone);
            })
            .await
        {
            tracing::error!(match_id = %self.match_id, "submission blob write: {e}");
        }
        if let Err(e) = self
            .persist_submission(record, SubmissionType::Competitive)
            .await
        {
            tracing::error!(match_id = %self.match_id, "submission persist: {e}");
        }
        if let Err(e) = self
            .deps
            .coord
            .cache_submission(
                &self.match_id,
                &record.user_id,
                code_hash,
                record,
                Duration::from_secs(self.deps.config.submission_cache_ttl_s),
            )
            .await
        {
            tracing::error!(match_id = %self.match_id, "submission cache write: {e}");
        }
    }

    async fn persist_submission(
        &self,
        record: &SubmissionRecord,
        submission_type: SubmissionType,
    ) -> Result<()> {
        let doc = SubmissionDoc {
            id: object_id_hex(),
            match_id: self.match_id.clone(),
            user_id: record.user_id.clone(),
            language: record.language.clone(),
            code: record.code.clone(),
            passed: record.passed,
            complexity_failed: record.complexity_failed.unwrap_or(false),
            derived_complexity: record.derived_complexity.clone(),
            tests_passed: record.tests_passed,
            total_tests: record.total_tests,
            submission_type,
            created_at: record.timestamp,
        };
        self.deps.store.insert_submission(&doc).await?;
        self.deps
            .store
            .add_submission_to_match(
                &self.match_id,
                &doc.id,
                submission_type == SubmissionType::Test,
            )
            .await
    }

    // ── Bot simulation ───────────────────────────────────────────────

    async fn bot_code_tick(&mut self, bot_id: &str) {
        if self.finished {
            return;
        }
        let bot_key = bot_id.to_string();
        let mut new_lines = 0;
        let added = bots::code_tick_lines();
        let update = self
            .deps
            .coord
            .update_match(&self.match_id, |blob| {
                let lines = blob.lines_written.entry(bot_key).or_insert(0);
                *lines = (*lines + added).min(bots::BOT_MAX_LINES);
                new_lines = *lines;
            })
            .await;
        if let Err(e) = update {
            tracing::error!(match_id = %self.match_id, "bot code tick: {e}");
            return;
        }

        self.broadcast(MatchOutbound::CodeUpdate {
            user_id: bot_id.to_string(),
            lines: new_lines,
        })
        .await;

        if new_lines < bots::BOT_MAX_LINES {
            self.arm_timer(
                format!("bot-code:{bot_id}"),
                bots::next_code_tick(),
                SessionCommand::BotCodeTick {
                    bot_id: bot_id.to_string(),
                },
            );
        }
    }

    async fn bot_progress_tick(&mut self, bot_id: &str) {
        if self.finished {
            return;
        }
        let total = self.problem.test_cases.len() as u32;
        let added = bots::progress_tick_cases();
        let bot_key = bot_id.to_string();
        let mut solved = 0;
        let update = self
            .deps
            .coord
            .update_match(&self.match_id, |blob| {
                let stats = blob.bot_stats.entry(bot_key).or_default();
                stats.submissions += 1;
                stats.test_cases_solved = (stats.test_cases_solved + added).min(total);
                solved = stats.test_cases_solved;
            })
            .await;
        if let Err(e) = update {
            tracing::error!(match_id = %self.match_id, "bot progress tick: {e}");
            return;
        }

        self.broadcast(MatchOutbound::TestProgressUpdate {
            user_id: bot_id.to_string(),
            test_cases_solved: solved,
            total_test_cases: total,
        })
        .await;

        self.arm_timer(
            format!("bot-progress:{bot_id}"),
            bots::next_progress_tick(),
            SessionCommand::BotProgressTick {
                bot_id: bot_id.to_string(),
            },
        );
    }

    async fn bot_completion(&mut self, bot_id: &str) {
        if self.finished {
            return;
        }
        // Abort if another path already closed the match in the store.
        match self.deps.coord.read_match(&self.match_id).await {
            Ok(Some(blob)) if blob.is_ongoing() => {}
            _ => return,
        }

        tracing::info!(match_id = %self.match_id, bot_id, "Bot completion timer fired");
        let total = self.problem.test_cases.len() as u32;
        let language = "python".to_string();
        let record = SubmissionRecord {
            user_id: bot_id.to_string(),
            language: language.clone(),
            timestamp: now_ms(),
            passed: true,
            complexity_failed: None,
            derived_complexity: None,
            test_results: vec![],
            average_time: 0.0,
            average_memory: 0.0,
            tests_passed: total,
            total_tests: total,
            code: String::new(),
        };
        let record_clone = record.clone();
        if let Err(e) = self
            .deps
            .coord
            .update_match(&self.match_id, |blob| {
                blob.submissions.push(record_clone);
                if let Some(stats) = blob.bot_stats.get_mut(bot_id) {
                    stats.submissions += 1;
                    stats.test_cases_solved = total;
                }
            })
            .await
        {
            tracing::error!(match_id = %self.match_id, "bot completion blob write: {e}");
        }
        if let Err(e) = self
            .persist_submission(&record, SubmissionType::Competitive)
            .await
        {
            tracing::error!(match_id = %self.match_id, "bot completion persist: {e}");
        }

        self.broadcast(MatchOutbound::NewSubmission {
            user_id: bot_id.to_string(),
            passed: true,
            tests_passed: total,
            total_tests: total,
            complexity_failed: None,
        })
        .await;

        self.resolve(Outcome::Winner {
            user_id: bot_id.to_string(),
            reason: Some("bot_completion".into()),
        })
        .await;
    }

    // ── Resolution ───────────────────────────────────────────────────

    async fn resolve(&mut self, outcome: Outcome) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.cancel_timers();
        if let Err(e) = self.resolve_inner(&outcome).await {
            tracing::error!(match_id = %self.match_id, "Resolution failed: {e}");
        }
    }

    async fn resolve_inner(&mut self, outcome: &Outcome) -> Result<()> {
        // Resolution is idempotent across owners: a blob that is no longer
        // ongoing was settled elsewhere.
        match self.deps.coord.read_match(&self.match_id).await? {
            Some(blob) if blob.is_ongoing() => {}
            _ => {
                self.room.disconnect().await;
                return Ok(());
            }
        }

        let ended_at = now_ms();
        let duration_ms = ended_at - self.started_at;

        let (changes, winner_user_id) = self.compute_rating_changes(outcome).await?;

        // Blob outcome first: events and broadcasts only ever describe
        // state that is already durable.
        let changes_clone = changes.clone();
        let winner_clone = winner_user_id.clone();
        self.deps
            .coord
            .update_match(&self.match_id, |blob| {
                blob.status = MatchStatus::Finished;
                blob.ended_at = Some(ended_at);
                blob.winner_user_id = winner_clone;
                blob.rating_changes = changes_clone;
            })
            .await?;

        match outcome {
            Outcome::Winner { user_id, reason } => {
                self.broadcast(MatchOutbound::MatchWinner {
                    user_id: user_id.clone(),
                    reason: reason.clone(),
                })
                .await;
            }
            Outcome::Draw { reason } => {
                self.broadcast(MatchOutbound::MatchDraw {
                    reason: reason.clone(),
                })
                .await;
            }
        }

        // Store settlement. Guests have no persistent documents.
        for seat in self.seats.clone() {
            if is_guest(&seat.player_id) {
                continue;
            }
            let player_outcome = match &winner_user_id {
                Some(winner) if *winner == seat.player_id => MatchOutcome::Win,
                Some(_) => MatchOutcome::Loss,
                None => MatchOutcome::Draw,
            };
            let change = changes
                .get(&seat.player_id)
                .map(|c| c.change)
                .unwrap_or(0);
            if let Err(e) = self
                .deps
                .store
                .apply_match_result(
                    &seat.player_id,
                    player_outcome,
                    change,
                    duration_ms,
                    &self.match_id,
                )
                .await
            {
                // Logged, not retried indefinitely.
                tracing::error!(
                    match_id = %self.match_id,
                    player_id = %seat.player_id,
                    "Rating persistence failed: {e}"
                );
            }
            let _ = self.deps.store.invalidate_player_caches(&seat.player_id).await;
        }
        self.deps
            .store
            .finish_match(
                &self.match_id,
                winner_user_id.as_deref(),
                "finished",
                ended_at,
            )
            .await?;

        self.write_guest_snapshots(&winner_user_id).await;
        self.cleanup_coordination().await;

        self.deps
            .coord
            .publish_match_event(&serde_json::json!({
                "type": "match_end",
                "matchId": self.match_id,
                "winnerUserId": winner_user_id,
            }))
            .await?;
        self.deps.coord.remove_active_match(&self.match_id).await?;

        let outcome_label = match outcome {
            Outcome::Winner { reason, .. } if reason.as_deref() == Some("bot_completion") => {
                "winner_bot"
            }
            Outcome::Winner { .. } => "winner",
            Outcome::Draw { reason } if reason == "timeout" => "timeout",
            Outcome::Draw { .. } => "draw",
        };
        crate::metrics::MATCHES_RESOLVED_TOTAL
            .with_label_values(&[outcome_label])
            .inc();
        crate::metrics::MATCH_DURATION_SECONDS
            .with_label_values(&[outcome_label])
            .observe(duration_ms as f64 / 1000.0);
        tracing::info!(
            match_id = %self.match_id,
            winner = winner_user_id.as_deref().unwrap_or("draw"),
            duration_ms,
            "Match resolved"
        );

        self.room.disconnect().await;
        Ok(())
    }

    /// Rating changes from the snapshot hash; the blob snapshot is the
    /// fallback when the hash TTL already elapsed.
    async fn compute_rating_changes(
        &self,
        outcome: &Outcome,
    ) -> Result<(HashMap<String, RatingChange>, Option<String>)> {
        let hash = self.deps.coord.read_ratings_hash(&self.match_id).await?;
        let parse = |key: &str| hash.get(key).and_then(|v| v.parse::<i32>().ok());

        let (id1, id2) = match (hash.get("userId1"), hash.get("userId2")) {
            (Some(a), Some(b)) => (a.clone(), b.clone()),
            _ => (
                self.seats[0].player_id.clone(),
                self.seats[1].player_id.clone(),
            ),
        };
        let rating1 = parse("player1").unwrap_or(self.seats[0].rating);
        let rating2 = parse("player2").unwrap_or(self.seats[1].rating);
        let problem_elo = parse("problemElo").unwrap_or_else(|| {
            self.deps
                .config
                .difficulty_targets
                .get(self.problem.difficulty) as i32
        });
        let k = self.deps.config.k_factor;

        let mut changes = HashMap::new();
        let winner_user_id = match outcome {
            Outcome::Winner { user_id, .. } => {
                let (winner_rating, loser_id, loser_rating) = if *user_id == id1 {
                    (rating1, id2.clone(), rating2)
                } else {
                    (rating2, id1.clone(), rating1)
                };
                let (winner_change, loser_change) =
                    rating::decisive_changes(winner_rating, loser_rating, problem_elo, k);
                changes.insert(user_id.clone(), winner_change);
                changes.insert(loser_id, loser_change);
                Some(user_id.clone())
            }
            Outcome::Draw { .. } => {
                let (change1, change2) = rating::draw_changes(rating1, rating2, problem_elo, k);
                changes.insert(id1, change1);
                changes.insert(id2, change2);
                None
            }
        };
        Ok((changes, winner_user_id))
    }

    async fn write_guest_snapshots(&self, winner_user_id: &Option<String>) {
        let guests: Vec<&PlayerSeat> = self
            .seats
            .iter()
            .filter(|s| is_guest(&s.player_id))
            .collect();
        if guests.is_empty() {
            return;
        }
        let blob = match self.deps.coord.read_match(&self.match_id).await {
            Ok(Some(blob)) => blob,
            _ => return,
        };
        for guest in guests {
            let own_submissions: Vec<&SubmissionRecord> = blob
                .submissions
                .iter()
                .filter(|s| s.user_id == guest.player_id)
                .collect();
            let best_passed = own_submissions
                .iter()
                .map(|s| s.tests_passed)
                .max()
                .unwrap_or(0);
            let result = match winner_user_id {
                Some(winner) if *winner == guest.player_id => "won",
                Some(_) => "lost",
                None => "draw",
            };
            let payload = serde_json::json!({
                "matchId": self.match_id,
                "result": result,
                "submissions": own_submissions.len(),
                "testsPassed": best_passed,
                "totalTests": blob.problem.test_cases_count,
                "ratingChanges": blob.rating_changes,
            });
            if let Err(e) = self
                .deps
                .coord
                .write_guest_result(&guest.player_id, &payload)
                .await
            {
                tracing::error!(
                    match_id = %self.match_id,
                    guest = %guest.player_id,
                    "Guest snapshot write failed: {e}"
                );
            }
        }
    }

    /// One cleanup pass over reservations and bot lifecycle keys.
    async fn cleanup_coordination(&self) {
        for seat in &self.seats {
            if let Err(e) = self.deps.coord.clear_reservation(&seat.player_id).await {
                tracing::error!(player_id = %seat.player_id, "reservation cleanup: {e}");
            }
            if seat.is_bot {
                let bot_id = &seat.player_id;
                let cleanup = async {
                    self.deps.coord.remove_active_bot(bot_id).await?;
                    self.deps.coord.clear_bot_current_match(bot_id).await?;
                    self.deps.coord.clear_bot_state(bot_id).await?;
                    self.deps
                        .coord
                        .publish_bots_command(&serde_json::json!({
                            "type": "botMatchComplete",
                            "botId": bot_id,
                        }))
                        .await
                };
                if let Err(e) = cleanup.await {
                    tracing::error!(bot_id = %bot_id, "bot cleanup: {e}");
                }
            }
        }
    }

    /// Disposal safety net: a session torn down without explicit resolution
    /// leaves no `ongoing` blob behind.
    async fn dispose(&mut self) {
        self.cancel_timers();
        if self.finished {
            return;
        }
        match self.deps.coord.read_match(&self.match_id).await {
            Ok(Some(blob)) if blob.is_ongoing() => {
                tracing::warn!(match_id = %self.match_id, "Abandoning orphaned match");
                let ended_at = now_ms();
                let _ = self
                    .deps
                    .coord
                    .update_match(&self.match_id, |blob| {
                        blob.status = MatchStatus::Abandoned;
                        blob.ended_at = Some(ended_at);
                    })
                    .await;
                let _ = self.deps.coord.remove_active_match(&self.match_id).await;
                self.cleanup_coordination().await;
                let _ = self
                    .deps
                    .store
                    .finish_match(&self.match_id, None, "abandoned", ended_at)
                    .await;
                crate::metrics::MATCHES_RESOLVED_TOTAL
                    .with_label_values(&["abandoned"])
                    .inc();
            }
            _ => {}
        }
        self.room.disconnect().await;
    }

    // ── Small helpers ────────────────────────────────────────────────

    fn opponent_of(&self, user_id: &str) -> Option<String> {
        self.seats
            .iter()
            .find(|s| s.player_id != user_id)
            .map(|s| s.player_id.clone())
    }

    async fn send_to(&self, user_id: &str, frame: MatchOutbound) {
        self.room.send_to(user_id, &frame.to_value()).await;
    }

    async fn broadcast(&self, frame: MatchOutbound) {
        self.room.broadcast(&frame.to_value()).await;
    }

    async fn send_error(&self, user_id: &str, message: &str) {
        self.send_to(
            user_id,
            MatchOutbound::Error {
                message: message.to_string(),
            },
        )
        .await;
    }
}
