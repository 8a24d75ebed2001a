// src/config.rs

use std::{env, str::FromStr, time::Duration};

use dotenvy::dotenv;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub rust_log: String,
    pub server_port: u16,
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,
    pub scoring: ScoringPolicy,
    pub scheduler: SchedulerConfig,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            database_url,
            jwt_secret,
            rust_log,
            server_port: env_or("SERVER_PORT", 3000),
            admin_username: env::var("ADMIN_USERNAME").ok(),
            admin_password: env::var("ADMIN_PASSWORD").ok(),
            scoring: ScoringPolicy::from_env(),
            scheduler: SchedulerConfig::from_env(),
        }
    }

    /// Configuration for tests and local runs that never touch Postgres.
    pub fn for_tests(jwt_secret: &str) -> Self {
        Self {
            database_url: String::new(),
            jwt_secret: jwt_secret.to_string(),
            rust_log: "error".to_string(),
            server_port: 0,
            admin_username: None,
            admin_password: None,
            scoring: ScoringPolicy::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Thresholds and weights used by the scoring engine.
///
/// Defaults reproduce the behaviour the portal has always shipped with; every
/// value can be tuned through a `SCORING_*` environment variable.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringPolicy {
    /// Minimum heuristic confidence for an essay to be accepted without review.
    pub auto_accept_confidence: f64,
    /// Minimum hybrid score for an essay to be accepted without review.
    pub auto_accept_min_score: f64,
    /// Keyword coverage strictly above this earns `high_confidence`.
    pub high_keyword_threshold: f64,
    pub high_confidence: f64,
    /// Keyword coverage at or above this earns `medium_confidence`.
    pub medium_keyword_threshold: f64,
    pub medium_confidence: f64,
    pub base_confidence: f64,
    pub keyword_weight: f64,
    pub semantic_weight: f64,
    /// Fallbacks for questions without explicit partial credit rules.
    pub default_min_similarity: f64,
    pub default_partial_percentage: f64,
    /// Sample-answer words must be longer than this to count as content words.
    pub content_word_min_len: usize,
    /// A scoring pass slower than this is logged as a warning.
    pub time_budget: Duration,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            auto_accept_confidence: 0.7,
            auto_accept_min_score: 0.3,
            high_keyword_threshold: 0.8,
            high_confidence: 0.9,
            medium_keyword_threshold: 0.5,
            medium_confidence: 0.7,
            base_confidence: 0.5,
            keyword_weight: 0.6,
            semantic_weight: 0.4,
            default_min_similarity: 0.8,
            default_partial_percentage: 0.5,
            content_word_min_len: 3,
            time_budget: Duration::from_millis(2000),
        }
    }
}

impl ScoringPolicy {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            auto_accept_confidence: env_or("SCORING_AUTO_ACCEPT_CONFIDENCE", d.auto_accept_confidence),
            auto_accept_min_score: env_or("SCORING_AUTO_ACCEPT_MIN_SCORE", d.auto_accept_min_score),
            high_keyword_threshold: env_or("SCORING_HIGH_KEYWORD_THRESHOLD", d.high_keyword_threshold),
            high_confidence: env_or("SCORING_HIGH_CONFIDENCE", d.high_confidence),
            medium_keyword_threshold: env_or(
                "SCORING_MEDIUM_KEYWORD_THRESHOLD",
                d.medium_keyword_threshold,
            ),
            medium_confidence: env_or("SCORING_MEDIUM_CONFIDENCE", d.medium_confidence),
            base_confidence: env_or("SCORING_BASE_CONFIDENCE", d.base_confidence),
            keyword_weight: env_or("SCORING_KEYWORD_WEIGHT", d.keyword_weight),
            semantic_weight: env_or("SCORING_SEMANTIC_WEIGHT", d.semantic_weight),
            default_min_similarity: env_or("SCORING_MIN_SIMILARITY", d.default_min_similarity),
            default_partial_percentage: env_or(
                "SCORING_PARTIAL_PERCENTAGE",
                d.default_partial_percentage,
            ),
            content_word_min_len: env_or("SCORING_CONTENT_WORD_MIN_LEN", d.content_word_min_len),
            time_budget: Duration::from_millis(env_or(
                "SCORING_TIME_BUDGET_MS",
                d.time_budget.as_millis() as u64,
            )),
        }
    }
}

/// Timing for the background sweeper and exam publisher.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub sweep_interval: Duration,
    pub sweep_batch_size: i64,
    pub max_startup_jitter: Duration,
    pub publish_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(180),
            sweep_batch_size: 50,
            max_startup_jitter: Duration::from_secs(30),
            publish_interval: Duration::from_secs(60),
        }
    }
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            sweep_interval: Duration::from_secs(env_or(
                "SWEEP_INTERVAL_SECS",
                d.sweep_interval.as_secs(),
            )),
            sweep_batch_size: env_or("SWEEP_BATCH_SIZE", d.sweep_batch_size),
            max_startup_jitter: Duration::from_secs(env_or(
                "SWEEP_MAX_JITTER_SECS",
                d.max_startup_jitter.as_secs(),
            )),
            publish_interval: Duration::from_secs(env_or(
                "PUBLISH_INTERVAL_SECS",
                d.publish_interval.as_secs(),
            )),
        }
    }
}

/// Reads and parses an environment variable, falling back to `default` when
/// it is unset or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring malformed value for {}: {:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}
