// Bot behavior simulation: deterministic completion-time sampling and the
// cadence constants for the synthetic progress timers.
//
// Completion times come from a seeded xorshift32 stream so they are
// reproducible from (matchId, difficulty, botId). This is a testability
// property, not a security property.

use sha2::{Digest, Sha256};

use crate::config::{BotTimeDist, BotTimeParams, Config};
use crate::coord::BotCompletionPlan;
use crate::rating::Difficulty;

/// Bots stop growing their fake solution at this many lines.
pub const BOT_MAX_LINES: u32 = 75;
/// Code-update timer period bounds (milliseconds).
pub const BOT_CODE_TICK_MS: (u64, u64) = (1_000, 60_000);
/// Test-progress timer period bounds (milliseconds).
pub const BOT_PROGRESS_TICK_MS: (u64, u64) = (500_000, 1_000_000);
/// The bot-wins timer never fires closer than this to the match ceiling.
pub const BOT_COMPLETION_MARGIN_MS: u64 = 30_000;

/// Deterministic xorshift32 stream.
#[derive(Debug, Clone)]
pub struct XorShift32 {
    state: u32,
}

impl XorShift32 {
    pub fn new(seed: u32) -> Self {
        // A zero state would lock the stream at zero forever.
        XorShift32 {
            state: if seed == 0 { 0x9E37_79B9 } else { seed },
        }
    }

    /// Seed from the reproducibility triple.
    pub fn for_bot(match_id: &str, difficulty: Difficulty, bot_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(match_id.as_bytes());
        hasher.update(b":");
        hasher.update(difficulty.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(bot_id.as_bytes());
        let digest = hasher.finalize();
        let seed = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        XorShift32::new(seed)
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    /// Uniform in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u32() as f64) / (u32::MAX as f64 + 1.0)
    }

    /// Standard normal via Box-Muller.
    fn next_normal(&mut self) -> f64 {
        let mut u1 = self.next_f64();
        if u1 <= f64::MIN_POSITIVE {
            u1 = f64::MIN_POSITIVE;
        }
        let u2 = self.next_f64();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}

fn sample_lognormal_ms(rng: &mut XorShift32, mu: f64, sigma: f64) -> f64 {
    (mu + sigma * rng.next_normal()).exp()
}

/// Marsaglia–Tsang gamma sampler; scale in milliseconds.
fn sample_gamma_ms(rng: &mut XorShift32, shape: f64, scale: f64) -> f64 {
    if shape < 1.0 {
        // Boost: gamma(k) = gamma(k+1) * u^(1/k)
        let u = rng.next_f64().max(f64::MIN_POSITIVE);
        return sample_gamma_ms(rng, shape + 1.0, scale) * u.powf(1.0 / shape);
    }
    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let x = rng.next_normal();
        let v = (1.0 + c * x).powi(3);
        if v <= 0.0 {
            continue;
        }
        let u = rng.next_f64();
        if u < 1.0 - 0.0331 * x.powi(4) {
            return d * v * scale;
        }
        if u.max(f64::MIN_POSITIVE).ln() < 0.5 * x * x + d * (1.0 - v + v.ln()) {
            return d * v * scale;
        }
    }
}

fn sample_ms(rng: &mut XorShift32, dist: BotTimeDist, params: &BotTimeParams) -> Option<f64> {
    match dist {
        BotTimeDist::Lognormal => Some(sample_lognormal_ms(rng, params.mu?, params.sigma?)),
        BotTimeDist::Gamma => Some(sample_gamma_ms(rng, params.shape?, params.scale?)),
    }
}

/// Sample the planned completion for one bot. `None` means the bot never
/// wins by timer (absent or invalid parameters).
pub fn plan_completion(
    config: &Config,
    match_id: &str,
    difficulty: Difficulty,
    bot_id: &str,
    started_at_ms: i64,
) -> Option<BotCompletionPlan> {
    let params = config.bot_time_params.get(difficulty)?;
    if !params.validate(config.bot_time_dist) {
        return None;
    }
    let mut rng = XorShift32::for_bot(match_id, difficulty, bot_id);
    let raw_ms = sample_ms(&mut rng, config.bot_time_dist, &params)?;
    if !raw_ms.is_finite() || raw_ms < 0.0 {
        return None;
    }
    let cap = config
        .max_match_duration_ms
        .saturating_sub(BOT_COMPLETION_MARGIN_MS);
    let planned_ms = (raw_ms as u64).min(cap);
    Some(BotCompletionPlan {
        planned_completion_ms: planned_ms,
        planned_completion_time: started_at_ms + planned_ms as i64,
    })
}

/// Period for the next code-update tick (uniform, non-deterministic).
pub fn next_code_tick() -> std::time::Duration {
    use rand::Rng;
    let ms = rand::thread_rng().gen_range(BOT_CODE_TICK_MS.0..=BOT_CODE_TICK_MS.1);
    std::time::Duration::from_millis(ms)
}

/// Lines added per code tick.
pub fn code_tick_lines() -> u32 {
    use rand::Rng;
    rand::thread_rng().gen_range(1..=2)
}

/// Period for the next test-progress tick.
pub fn next_progress_tick() -> std::time::Duration {
    use rand::Rng;
    let ms = rand::thread_rng().gen_range(BOT_PROGRESS_TICK_MS.0..=BOT_PROGRESS_TICK_MS.1);
    std::time::Duration::from_millis(ms)
}

/// Cases solved per progress tick.
pub fn progress_tick_cases() -> u32 {
    use rand::Rng;
    rand::thread_rng().gen_range(0..=2)
}
