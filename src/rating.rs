// Rating and difficulty math.
//
// Pure functions: Gaussian problem-difficulty selection, K=32 Elo with a
// per-side difficulty multiplier, and the draw variant. Everything here is
// deterministic given its inputs; callers supply the random roll.

use serde::{Deserialize, Serialize};

use crate::config::PerDifficulty;

pub const DEFAULT_K_FACTOR: i32 = 32;
pub const MULTIPLIER_SCALE: f64 = 1000.0;
pub const MULTIPLIER_MIN: f64 = 0.5;
pub const MULTIPLIER_MAX: f64 = 2.0;

/// Problem difficulty bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    /// Stable iteration order used by the inverse-CDF draw.
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
        }
    }

    pub fn parse(s: &str) -> Option<Difficulty> {
        match s {
            "Easy" => Some(Difficulty::Easy),
            "Medium" => Some(Difficulty::Medium),
            "Hard" => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One player's rating movement from a resolved match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingChange {
    pub old_rating: i32,
    pub new_rating: i32,
    pub change: i32,
}

impl RatingChange {
    fn from_delta(old_rating: i32, change: i32) -> Self {
        RatingChange {
            old_rating,
            new_rating: old_rating + change,
            change,
        }
    }
}

/// Normalized Gaussian weights over the three difficulty buckets, centered on
/// each bucket's target rating.
pub fn difficulty_probabilities(
    avg_rating: f64,
    targets: &PerDifficulty<f64>,
    sigma: f64,
) -> PerDifficulty<f64> {
    let weight = |target: f64| {
        let z = (avg_rating - target) / sigma;
        (-0.5 * z * z).exp()
    };
    let easy = weight(targets.easy);
    let medium = weight(targets.medium);
    let hard = weight(targets.hard);
    let total = easy + medium + hard;
    if total <= f64::EPSILON {
        // All weights underflowed; fall back to an even spread.
        return PerDifficulty {
            easy: 1.0 / 3.0,
            medium: 1.0 / 3.0,
            hard: 1.0 / 3.0,
        };
    }
    PerDifficulty {
        easy: easy / total,
        medium: medium / total,
        hard: hard / total,
    }
}

/// Inverse-CDF draw over the stable Easy/Medium/Hard order.
///
/// `roll` is a uniform sample in [0, 1). If floating-point residue leaves the
/// roll past the accumulated mass, Medium is returned.
pub fn select_difficulty(probs: &PerDifficulty<f64>, roll: f64) -> Difficulty {
    let mut acc = 0.0;
    for d in Difficulty::ALL {
        acc += probs.get(d);
        if roll < acc {
            return d;
        }
    }
    Difficulty::Medium
}

/// Draw a difficulty for the given average rating with a fresh random roll.
pub fn select_difficulty_by_probability(
    avg_rating: f64,
    targets: &PerDifficulty<f64>,
    sigma: f64,
) -> Difficulty {
    use rand::Rng;
    let probs = difficulty_probabilities(avg_rating, targets, sigma);
    let roll = rand::thread_rng().gen_range(0.0..1.0);
    select_difficulty(&probs, roll)
}

/// Scale factor applied to a rating delta based on the gap between the
/// player's rating and the problem's target Elo. Harder-than-you problems
/// amplify the delta; easier ones dampen it.
pub fn difficulty_multiplier(rating: i32, problem_elo: i32) -> f64 {
    let raw = 1.0 + (problem_elo - rating) as f64 / MULTIPLIER_SCALE;
    raw.clamp(MULTIPLIER_MIN, MULTIPLIER_MAX)
}

/// Round a base delta after applying the difficulty multiplier.
pub fn apply_difficulty_adjustment(base_change: f64, multiplier: f64) -> i32 {
    (base_change * multiplier).round() as i32
}

/// Expected score for the first player against the second.
pub fn expected_score(rating_a: i32, rating_b: i32) -> f64 {
    1.0 / (1.0 + 10.0_f64.powf((rating_b - rating_a) as f64 / 400.0))
}

/// Rating changes for a decisive result.
///
/// Each side's raw K*(actual-expected) delta is adjusted by its own
/// multiplier against the problem's Elo, then rounded.
pub fn decisive_changes(
    winner_rating: i32,
    loser_rating: i32,
    problem_elo: i32,
    k: i32,
) -> (RatingChange, RatingChange) {
    let expected_winner = expected_score(winner_rating, loser_rating);
    let expected_loser = 1.0 - expected_winner;

    let winner_delta = apply_difficulty_adjustment(
        k as f64 * (1.0 - expected_winner),
        difficulty_multiplier(winner_rating, problem_elo),
    );
    let loser_delta = apply_difficulty_adjustment(
        k as f64 * (0.0 - expected_loser),
        difficulty_multiplier(loser_rating, problem_elo),
    );

    (
        RatingChange::from_delta(winner_rating, winner_delta),
        RatingChange::from_delta(loser_rating, loser_delta),
    )
}

/// Rating changes for a draw: both sides score 0.5.
pub fn draw_changes(
    rating_a: i32,
    rating_b: i32,
    problem_elo: i32,
    k: i32,
) -> (RatingChange, RatingChange) {
    let expected_a = expected_score(rating_a, rating_b);
    let expected_b = 1.0 - expected_a;

    let delta_a = apply_difficulty_adjustment(
        k as f64 * (0.5 - expected_a),
        difficulty_multiplier(rating_a, problem_elo),
    );
    let delta_b = apply_difficulty_adjustment(
        k as f64 * (0.5 - expected_b),
        difficulty_multiplier(rating_b, problem_elo),
    );

    (
        RatingChange::from_delta(rating_a, delta_a),
        RatingChange::from_delta(rating_b, delta_b),
    )
}
