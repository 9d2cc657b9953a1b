// SQL-backed document store (SQLite via sqlx).
//
// Nested document payloads (signatures, test cases, id lists) are stored as
// JSON text columns; scalar fields used in queries get their own columns.

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use async_trait::async_trait;

use crate::error::Result;
use crate::rating::Difficulty;

use super::{
    BotDoc, DocumentStore, MatchDoc, MatchOutcome, Problem, SubmissionDoc, SubmissionType,
    UserDoc,
};

pub struct SqlStore {
    pool: SqlitePool,
}

impl SqlStore {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                rating INTEGER NOT NULL DEFAULT 1500,
                wins INTEGER NOT NULL DEFAULT 0,
                losses INTEGER NOT NULL DEFAULT 0,
                draws INTEGER NOT NULL DEFAULT 0,
                total_matches INTEGER NOT NULL DEFAULT 0,
                time_coded_ms INTEGER NOT NULL DEFAULT 0,
                match_ids TEXT NOT NULL DEFAULT '[]'
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bots (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL,
                rating INTEGER NOT NULL DEFAULT 1500
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS problems (
                id TEXT PRIMARY KEY,
                difficulty TEXT NOT NULL,
                verified INTEGER NOT NULL DEFAULT 0,
                doc TEXT NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS matches (
                id TEXT PRIMARY KEY,
                problem_id TEXT NOT NULL,
                player_ids TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'ongoing',
                winner_user_id TEXT,
                submission_ids TEXT NOT NULL DEFAULT '[]',
                test_run_ids TEXT NOT NULL DEFAULT '[]',
                started_at INTEGER NOT NULL,
                ended_at INTEGER
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS submissions (
                id TEXT PRIMARY KEY,
                match_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                language TEXT NOT NULL,
                code TEXT NOT NULL,
                passed INTEGER NOT NULL,
                complexity_failed INTEGER NOT NULL DEFAULT 0,
                derived_complexity TEXT,
                tests_passed INTEGER NOT NULL,
                total_tests INTEGER NOT NULL,
                submission_type TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a problem document (admin/tooling path; the core only reads).
    pub async fn insert_problem(&self, problem: &Problem) -> Result<()> {
        let doc = serde_json::to_string(problem)?;
        sqlx::query(
            "INSERT OR REPLACE INTO problems (id, difficulty, verified, doc) VALUES (?, ?, ?, ?)",
        )
        .bind(&problem.id)
        .bind(problem.difficulty.as_str())
        .bind(problem.verified as i64)
        .bind(doc)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a user row (tooling/tests).
    pub async fn insert_user(&self, user: &UserDoc) -> Result<()> {
        let match_ids = serde_json::to_string(&user.match_ids)?;
        sqlx::query(
            r#"INSERT OR REPLACE INTO users
               (id, username, rating, wins, losses, draws, total_matches, time_coded_ms, match_ids)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(user.rating)
        .bind(user.wins)
        .bind(user.losses)
        .bind(user.draws)
        .bind(user.total_matches)
        .bind(user.time_coded_ms)
        .bind(match_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a bot row (tooling/tests).
    pub async fn insert_bot(&self, bot: &BotDoc) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO bots (id, username, rating) VALUES (?, ?, ?)")
            .bind(&bot.id)
            .bind(&bot.username)
            .bind(bot.rating)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<UserDoc> {
        let match_ids: String = row.get("match_ids");
        Ok(UserDoc {
            id: row.get("id"),
            username: row.get("username"),
            rating: row.get("rating"),
            wins: row.get("wins"),
            losses: row.get("losses"),
            draws: row.get("draws"),
            total_matches: row.get("total_matches"),
            time_coded_ms: row.get("time_coded_ms"),
            match_ids: serde_json::from_str(&match_ids)?,
        })
    }

    fn match_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<MatchDoc> {
        let player_ids: String = row.get("player_ids");
        let submission_ids: String = row.get("submission_ids");
        let test_run_ids: String = row.get("test_run_ids");
        Ok(MatchDoc {
            id: row.get("id"),
            problem_id: row.get("problem_id"),
            player_ids: serde_json::from_str(&player_ids)?,
            status: row.get("status"),
            winner_user_id: row.get("winner_user_id"),
            submission_ids: serde_json::from_str(&submission_ids)?,
            test_run_ids: serde_json::from_str(&test_run_ids)?,
            started_at: row.get("started_at"),
            ended_at: row.get("ended_at"),
        })
    }
}

#[async_trait]
impl DocumentStore for SqlStore {
    async fn get_user(&self, id: &str) -> Result<Option<UserDoc>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::user_from_row(&r)).transpose()
    }

    async fn get_bot(&self, id: &str) -> Result<Option<BotDoc>> {
        let row = sqlx::query("SELECT id, username, rating FROM bots WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| BotDoc {
            id: r.get("id"),
            username: r.get("username"),
            rating: r.get("rating"),
        }))
    }

    async fn is_bot(&self, id: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM bots WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn random_verified_problem(&self, difficulty: Difficulty) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT id FROM problems WHERE verified = 1 AND difficulty = ? ORDER BY RANDOM() LIMIT 1",
        )
        .bind(difficulty.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("id")))
    }

    async fn any_verified_problem(&self) -> Result<Option<String>> {
        let row =
            sqlx::query("SELECT id FROM problems WHERE verified = 1 ORDER BY RANDOM() LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.get("id")))
    }

    async fn get_problem(&self, id: &str) -> Result<Option<Problem>> {
        let row = sqlx::query("SELECT doc FROM problems WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => {
                let doc: String = r.get("doc");
                Ok(Some(serde_json::from_str(&doc)?))
            }
            None => Ok(None),
        }
    }

    async fn insert_submission(&self, doc: &SubmissionDoc) -> Result<()> {
        let submission_type = match doc.submission_type {
            SubmissionType::Competitive => "competitive",
            SubmissionType::Test => "test",
        };
        sqlx::query(
            r#"INSERT OR IGNORE INTO submissions
               (id, match_id, user_id, language, code, passed, complexity_failed,
                derived_complexity, tests_passed, total_tests, submission_type, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&doc.id)
        .bind(&doc.match_id)
        .bind(&doc.user_id)
        .bind(&doc.language)
        .bind(&doc.code)
        .bind(doc.passed as i64)
        .bind(doc.complexity_failed as i64)
        .bind(&doc.derived_complexity)
        .bind(doc.tests_passed as i64)
        .bind(doc.total_tests as i64)
        .bind(submission_type)
        .bind(doc.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_match(&self, doc: &MatchDoc) -> Result<()> {
        let player_ids = serde_json::to_string(&doc.player_ids)?;
        let submission_ids = serde_json::to_string(&doc.submission_ids)?;
        let test_run_ids = serde_json::to_string(&doc.test_run_ids)?;
        sqlx::query(
            r#"INSERT OR REPLACE INTO matches
               (id, problem_id, player_ids, status, winner_user_id,
                submission_ids, test_run_ids, started_at, ended_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&doc.id)
        .bind(&doc.problem_id)
        .bind(player_ids)
        .bind(&doc.status)
        .bind(&doc.winner_user_id)
        .bind(submission_ids)
        .bind(test_run_ids)
        .bind(doc.started_at)
        .bind(doc.ended_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_match(&self, id: &str) -> Result<Option<MatchDoc>> {
        let row = sqlx::query("SELECT * FROM matches WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::match_from_row(&r)).transpose()
    }

    async fn add_submission_to_match(
        &self,
        match_id: &str,
        submission_id: &str,
        test_run: bool,
    ) -> Result<()> {
        // Read-modify-write on the JSON id list; the per-match session is the
        // only writer for its own match, so this does not race in practice.
        let Some(mut doc) = self.get_match(match_id).await? else {
            return Ok(());
        };
        let ids = if test_run {
            &mut doc.test_run_ids
        } else {
            &mut doc.submission_ids
        };
        if !ids.iter().any(|id| id == submission_id) {
            ids.push(submission_id.to_string());
            self.upsert_match(&doc).await?;
        }
        Ok(())
    }

    async fn finish_match(
        &self,
        match_id: &str,
        winner_user_id: Option<&str>,
        status: &str,
        ended_at: i64,
    ) -> Result<()> {
        sqlx::query("UPDATE matches SET status = ?, winner_user_id = ?, ended_at = ? WHERE id = ?")
            .bind(status)
            .bind(winner_user_id)
            .bind(ended_at)
            .bind(match_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn apply_match_result(
        &self,
        player_id: &str,
        outcome: MatchOutcome,
        rating_change: i32,
        duration_ms: i64,
        match_id: &str,
    ) -> Result<()> {
        let outcome_column = match outcome {
            MatchOutcome::Win => "wins",
            MatchOutcome::Loss => "losses",
            MatchOutcome::Draw => "draws",
        };
        let updated = sqlx::query(&format!(
            r#"UPDATE users SET {outcome_column} = {outcome_column} + 1,
               total_matches = total_matches + 1,
               rating = rating + ?,
               time_coded_ms = time_coded_ms + ?
               WHERE id = ?"#
        ))
        .bind(rating_change)
        .bind(duration_ms)
        .bind(player_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() > 0 {
            // Link the match id (set semantics over the JSON list).
            if let Some(row) = sqlx::query("SELECT match_ids FROM users WHERE id = ?")
                .bind(player_id)
                .fetch_optional(&self.pool)
                .await?
            {
                let raw: String = row.get("match_ids");
                let mut ids: Vec<String> = serde_json::from_str(&raw)?;
                if !ids.iter().any(|id| id == match_id) {
                    ids.push(match_id.to_string());
                    sqlx::query("UPDATE users SET match_ids = ? WHERE id = ?")
                        .bind(serde_json::to_string(&ids)?)
                        .bind(player_id)
                        .execute(&self.pool)
                        .await?;
                }
            }
        } else {
            // Not a user: bots only carry a rating.
            sqlx::query("UPDATE bots SET rating = rating + ? WHERE id = ?")
                .bind(rating_change)
                .bind(player_id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn invalidate_player_caches(&self, _player_id: &str) -> Result<()> {
        // Stats/activity caches live in the web tier; nothing to do here.
        Ok(())
    }
}
