// Application configuration, loaded from environment variables and CLI flags.

use serde::Deserialize;

use crate::rating::Difficulty;

/// Distribution family used for sampling bot completion times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotTimeDist {
    Lognormal,
    Gamma,
}

/// Distribution parameters for one difficulty bucket.
///
/// Lognormal uses `mu`/`sigma` (of the log of milliseconds); gamma uses
/// `shape`/`scale` (scale in milliseconds). A params object that does not
/// validate for the configured distribution is treated as absent, which
/// means the bot never wins by timer.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BotTimeParams {
    pub mu: Option<f64>,
    pub sigma: Option<f64>,
    pub shape: Option<f64>,
    pub scale: Option<f64>,
}

impl BotTimeParams {
    pub fn validate(&self, dist: BotTimeDist) -> bool {
        match dist {
            BotTimeDist::Lognormal => matches!(
                (self.mu, self.sigma),
                (Some(mu), Some(sigma)) if mu.is_finite() && sigma.is_finite() && sigma > 0.0
            ),
            BotTimeDist::Gamma => matches!(
                (self.shape, self.scale),
                (Some(shape), Some(scale)) if shape > 0.0 && scale > 0.0
                    && shape.is_finite() && scale.is_finite()
            ),
        }
    }
}

/// A value held per difficulty bucket.
#[derive(Debug, Clone, Copy)]
pub struct PerDifficulty<T> {
    pub easy: T,
    pub medium: T,
    pub hard: T,
}

impl<T: Copy> PerDifficulty<T> {
    pub fn get(&self, d: Difficulty) -> T {
        match d {
            Difficulty::Easy => self.easy,
            Difficulty::Medium => self.medium,
            Difficulty::Hard => self.hard,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Coordination store connection string.
    pub redis_url: String,
    /// Document store connection string (SQLite).
    pub database_url: String,
    /// Base URL of the sandbox executor.
    pub sandbox_url: String,
    /// Base URL of the complexity-verification LLM endpoint.
    pub llm_url: String,
    /// Bearer token for the LLM endpoint, if required.
    pub llm_api_key: Option<String>,

    /// Hard ceiling on match duration.
    pub max_match_duration_ms: u64,
    /// Minimum dwell before a queued player becomes pair-eligible.
    pub min_queue_wait_ms: u64,
    /// ELO tolerance ladder: initial width, growth per step, ceiling.
    pub elo_threshold_initial: u32,
    pub elo_threshold_step: u32,
    pub elo_threshold_max: u32,
    /// Dwell after which a lone human may be paired with a queued bot.
    pub bot_match_delay_ms: u64,
    /// Dwell after which a still-queued human is marked in `needs_bot`.
    pub needs_bot_delay_ms: u64,
    /// Interval of the periodic pairing sweep.
    pub sweep_interval_ms: u64,

    pub bot_time_dist: BotTimeDist,
    pub bot_time_params: PerDifficulty<Option<BotTimeParams>>,

    pub k_factor: i32,
    pub gaussian_sigma: f64,
    /// Target rating per difficulty bucket for Gaussian selection.
    pub difficulty_targets: PerDifficulty<f64>,
    pub submission_cache_ttl_s: u64,
    pub bots_enabled: bool,
}

impl Config {
    /// Load configuration from environment variables and CLI arguments.
    ///
    /// Environment variables (defaults in parens):
    /// - `PORT` (3000), `REDIS_URL`, `DATABASE_URL`, `SANDBOX_URL`, `LLM_URL`,
    ///   `LLM_API_KEY`
    /// - `MAX_MATCH_DURATION_MS` (2700000), `MIN_QUEUE_WAIT_MS` (3000)
    /// - `QUEUE_ELO_THRESHOLD_INITIAL`/`STEP`/`MAX` (50/50/250)
    /// - `QUEUE_BOT_MATCH_DELAY_MS` (45000), `QUEUE_NEEDS_BOT_DELAY_MS` (7000),
    ///   `QUEUE_SWEEP_INTERVAL_MS` (5000)
    /// - `BOT_TIME_DIST` (`lognormal` | `gamma`),
    ///   `BOT_TIME_PARAMS_EASY|MEDIUM|HARD` (JSON)
    /// - `K_FACTOR` (32), `GAUSSIAN_SIGMA` (250),
    ///   `DIFFICULTY_TARGETS` (`{"Easy":1200,"Medium":1500,"Hard":2000}`)
    /// - `SUBMISSION_CACHE_TTL_S` (3000), `BOTS_ENABLED` (true)
    ///
    /// CLI flags: `--port <PORT>` overrides the port.
    pub fn load() -> Self {
        let args: Vec<String> = std::env::args().collect();

        let port = Self::parse_cli_value(&args, "--port")
            .and_then(|v| v.parse().ok())
            .or_else(|| std::env::var("PORT").ok().and_then(|v| v.parse().ok()))
            .unwrap_or(3000);

        let redis_url = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:codeduel.db?mode=rwc".to_string());
        let sandbox_url = std::env::var("SANDBOX_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:2358".to_string());
        let llm_url = std::env::var("LLM_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8081/v1/verify".to_string());
        let llm_api_key = std::env::var("LLM_API_KEY").ok();

        let bot_time_dist = match std::env::var("BOT_TIME_DIST").as_deref() {
            Ok("gamma") => BotTimeDist::Gamma,
            _ => BotTimeDist::Lognormal,
        };

        let difficulty_targets = Self::parse_difficulty_targets(
            std::env::var("DIFFICULTY_TARGETS").ok().as_deref(),
        );

        Config {
            port,
            redis_url,
            database_url,
            sandbox_url,
            llm_url,
            llm_api_key,
            max_match_duration_ms: env_u64("MAX_MATCH_DURATION_MS", 2_700_000),
            min_queue_wait_ms: env_u64("MIN_QUEUE_WAIT_MS", 3_000),
            elo_threshold_initial: env_u64("QUEUE_ELO_THRESHOLD_INITIAL", 50) as u32,
            elo_threshold_step: env_u64("QUEUE_ELO_THRESHOLD_STEP", 50) as u32,
            elo_threshold_max: env_u64("QUEUE_ELO_THRESHOLD_MAX", 250) as u32,
            bot_match_delay_ms: env_u64("QUEUE_BOT_MATCH_DELAY_MS", 45_000),
            needs_bot_delay_ms: env_u64("QUEUE_NEEDS_BOT_DELAY_MS", 7_000),
            sweep_interval_ms: env_u64("QUEUE_SWEEP_INTERVAL_MS", 5_000),
            bot_time_dist,
            bot_time_params: PerDifficulty {
                easy: parse_bot_params("BOT_TIME_PARAMS_EASY", bot_time_dist),
                medium: parse_bot_params("BOT_TIME_PARAMS_MEDIUM", bot_time_dist),
                hard: parse_bot_params("BOT_TIME_PARAMS_HARD", bot_time_dist),
            },
            k_factor: env_u64("K_FACTOR", 32) as i32,
            gaussian_sigma: env_f64("GAUSSIAN_SIGMA", 250.0),
            difficulty_targets,
            submission_cache_ttl_s: env_u64("SUBMISSION_CACHE_TTL_S", 3_000),
            bots_enabled: std::env::var("BOTS_ENABLED")
                .map(|v| !v.eq_ignore_ascii_case("false") && v != "0")
                .unwrap_or(true),
        }
    }

    fn parse_difficulty_targets(raw: Option<&str>) -> PerDifficulty<f64> {
        let default = PerDifficulty {
            easy: 1200.0,
            medium: 1500.0,
            hard: 2000.0,
        };
        let Some(raw) = raw else { return default };
        let Ok(map) = serde_json::from_str::<serde_json::Value>(raw) else {
            return default;
        };
        let pick = |k: &str, fallback: f64| map.get(k).and_then(|v| v.as_f64()).unwrap_or(fallback);
        PerDifficulty {
            easy: pick("Easy", default.easy),
            medium: pick("Medium", default.medium),
            hard: pick("Hard", default.hard),
        }
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_bot_params(key: &str, dist: BotTimeDist) -> Option<BotTimeParams> {
    let raw = std::env::var(key).ok()?;
    let params: BotTimeParams = serde_json::from_str(&raw).ok()?;
    params.validate(dist).then_some(params)
}
