// In-memory document store double for tests.
//
// Implements the same surface as the SQL store over mutex-guarded maps.
// Seeding helpers let tests construct users, bots and problems directly.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::rating::Difficulty;

use super::{
    BotDoc, DocumentStore, MatchDoc, MatchOutcome, Problem, SubmissionDoc, UserDoc,
};

#[derive(Default)]
struct Collections {
    users: HashMap<String, UserDoc>,
    bots: HashMap<String, BotDoc>,
    problems: HashMap<String, Problem>,
    matches: HashMap<String, MatchDoc>,
    submissions: HashMap<String, SubmissionDoc>,
    cache_invalidations: Vec<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Collections>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user: UserDoc) {
        self.inner.lock().unwrap().users.insert(user.id.clone(), user);
    }

    pub fn add_bot(&self, bot: BotDoc) {
        self.inner.lock().unwrap().bots.insert(bot.id.clone(), bot);
    }

    pub fn add_problem(&self, problem: Problem) {
        self.inner
            .lock()
            .unwrap()
            .problems
            .insert(problem.id.clone(), problem);
    }

    pub fn submission_count(&self) -> usize {
        self.inner.lock().unwrap().submissions.len()
    }

    pub fn submissions_for_match(&self, match_id: &str) -> Vec<SubmissionDoc> {
        self.inner
            .lock()
            .unwrap()
            .submissions
            .values()
            .filter(|s| s.match_id == match_id)
            .cloned()
            .collect()
    }

    pub fn invalidated_caches(&self) -> Vec<String> {
        self.inner.lock().unwrap().cache_invalidations.clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get_user(&self, id: &str) -> Result<Option<UserDoc>> {
        Ok(self.inner.lock().unwrap().users.get(id).cloned())
    }

    async fn get_bot(&self, id: &str) -> Result<Option<BotDoc>> {
        Ok(self.inner.lock().unwrap().bots.get(id).cloned())
    }

    async fn is_bot(&self, id: &str) -> Result<bool> {
        Ok(self.inner.lock().unwrap().bots.contains_key(id))
    }

    async fn random_verified_problem(&self, difficulty: Difficulty) -> Result<Option<String>> {
        use rand::seq::SliceRandom;
        let inner = self.inner.lock().unwrap();
        let mut candidates: Vec<&String> = inner
            .problems
            .values()
            .filter(|p| p.verified && p.difficulty == difficulty)
            .map(|p| &p.id)
            .collect();
        candidates.sort();
        Ok(candidates.choose(&mut rand::thread_rng()).map(|s| (*s).clone()))
    }

    async fn any_verified_problem(&self) -> Result<Option<String>> {
        use rand::seq::SliceRandom;
        let inner = self.inner.lock().unwrap();
        let mut candidates: Vec<&String> = inner
            .problems
            .values()
            .filter(|p| p.verified)
            .map(|p| &p.id)
            .collect();
        candidates.sort();
        Ok(candidates.choose(&mut rand::thread_rng()).map(|s| (*s).clone()))
    }

    async fn get_problem(&self, id: &str) -> Result<Option<Problem>> {
        Ok(self.inner.lock().unwrap().problems.get(id).cloned())
    }

    async fn insert_submission(&self, doc: &SubmissionDoc) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .submissions
            .insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn upsert_match(&self, doc: &MatchDoc) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .matches
            .insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get_match(&self, id: &str) -> Result<Option<MatchDoc>> {
        Ok(self.inner.lock().unwrap().matches.get(id).cloned())
    }

    async fn add_submission_to_match(
        &self,
        match_id: &str,
        submission_id: &str,
        test_run: bool,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(doc) = inner.matches.get_mut(match_id) {
            let ids = if test_run {
                &mut doc.test_run_ids
            } else {
                &mut doc.submission_ids
            };
            if !ids.iter().any(|id| id == submission_id) {
                ids.push(submission_id.to_string());
            }
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
        let mut inner = self.inner.lock().unwrap();
        if let Some(doc) = inner.matches.get_mut(match_id) {
            doc.status = status.to_string();
            doc.winner_user_id = winner_user_id.map(|s| s.to_string());
            doc.ended_at = Some(ended_at);
        }
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
        let mut inner = self.inner.lock().unwrap();
        if let Some(user) = inner.users.get_mut(player_id) {
            match outcome {
                MatchOutcome::Win => user.wins += 1,
                MatchOutcome::Loss => user.losses += 1,
                MatchOutcome::Draw => user.draws += 1,
            }
            user.total_matches += 1;
            user.rating += rating_change;
            user.time_coded_ms += duration_ms;
            if !user.match_ids.iter().any(|id| id == match_id) {
                user.match_ids.push(match_id.to_string());
            }
        } else if let Some(bot) = inner.bots.get_mut(player_id) {
            bot.rating += rating_change;
        }
        Ok(())
    }

    async fn invalidate_player_caches(&self, player_id: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .cache_invalidations
            .push(player_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Signature;

    fn user(id: &str, rating: i32) -> UserDoc {
        UserDoc {
            id: id.into(),
            username: format!("u-{id}"),
            rating,
            wins: 0,
            losses: 0,
            draws: 0,
            total_matches: 0,
            time_coded_ms: 0,
            match_ids: vec![],
        }
    }

    fn problem(id: &str, difficulty: Difficulty, verified: bool) -> Problem {
        Problem {
            id: id.into(),
            title: "Two Sum".into(),
            description: "find the pair".into(),
            difficulty,
            topics: vec!["array".into()],
            signature: Signature {
                function_name: "twoSum".into(),
                parameters: vec![],
                return_type: "int[]".into(),
                comparison_mode: None,
                custom_comparator: None,
            },
            starter_code: Default::default(),
            examples: vec![],
            constraints: vec![],
            time_complexity: None,
            test_cases: vec![],
            solutions: Default::default(),
            verified,
        }
    }

    #[tokio::test]
    async fn test_random_verified_problem_filters() {
        let store = MemoryStore::new();
        store.add_problem(problem("p1", Difficulty::Easy, true));
        store.add_problem(problem("p2", Difficulty::Hard, true));
        store.add_problem(problem("p3", Difficulty::Easy, false));

        let got = store.random_verified_problem(Difficulty::Easy).await.unwrap();
        assert_eq!(got.as_deref(), Some("p1"));

        let got = store.random_verified_problem(Difficulty::Medium).await.unwrap();
        assert!(got.is_none());

        let got = store.any_verified_problem().await.unwrap();
        assert!(got.is_some());
    }

    #[tokio::test]
    async fn test_apply_match_result_updates_stats() {
        let store = MemoryStore::new();
        store.add_user(user("u1", 1500));

        store
            .apply_match_result("u1", MatchOutcome::Win, 16, 60_000, "m1")
            .await
            .unwrap();
        // Applying the same match link twice keeps one copy
        store
            .apply_match_result("u1", MatchOutcome::Loss, -10, 30_000, "m1")
            .await
            .unwrap();

        let u = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(u.wins, 1);
        assert_eq!(u.losses, 1);
        assert_eq!(u.total_matches, 2);
        assert_eq!(u.rating, 1506);
        assert_eq!(u.time_coded_ms, 90_000);
        assert_eq!(u.match_ids, vec!["m1".to_string()]);
    }

    #[tokio::test]
    async fn test_add_submission_to_match_set_semantics() {
        let store = MemoryStore::new();
        store
            .upsert_match(&MatchDoc {
                id: "m1".into(),
                problem_id: "p1".into(),
                player_ids: vec!["a".into(), "b".into()],
                status: "ongoing".into(),
                winner_user_id: None,
                submission_ids: vec![],
                test_run_ids: vec![],
                started_at: 0,
                ended_at: None,
            })
            .await
            .unwrap();

        store.add_submission_to_match("m1", "s1", false).await.unwrap();
        store.add_submission_to_match("m1", "s1", false).await.unwrap();
        store.add_submission_to_match("m1", "t1", true).await.unwrap();

        let doc = store.get_match("m1").await.unwrap().unwrap();
        assert_eq!(doc.submission_ids, vec!["s1".to_string()]);
        assert_eq!(doc.test_run_ids, vec!["t1".to_string()]);
    }
}
