//! Matching configuration.
//!
//! All thresholds were tuned against one season of FFS/Understat data and
//! must be re-validated against any new corpus, so every one of them can be
//! overridden from the environment (`MATCH_*` variables).

use anyhow::{bail, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Tunable thresholds, boosts and limits for the matching pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingConfig {
    /// Minimum boosted confidence for an unreviewed match
    pub auto_accept_threshold: f64,
    /// Minimum similarity for the fuzzy strategy in the cascade
    pub fuzzy_floor: f64,
    /// Candidates below this are never suggested
    pub suggestion_floor: f64,
    pub max_suggestions: usize,
    pub team_boost: f64,
    pub position_boost: f64,

    pub exact_confidence: f64,
    pub normalized_confidence: f64,
    pub contains_cap: f64,
    /// Shorter/longer length ratio below which a substring match is ignored
    pub contains_min_ratio: f64,
    /// Shorter side must have at least this many characters
    pub contains_min_len: usize,
    pub token_overlap_cap: f64,
    pub fuzzy_cap: f64,
    pub surname_confidence: f64,
    /// Top candidates within this margin of each other count as tied
    pub ambiguity_margin: f64,

    /// Restrict candidates to the hinted team (falls back to everyone if the
    /// team has no registry entries)
    pub team_prefilter: bool,

    /// Observations resolved concurrently within one batch
    pub batch_concurrency: usize,
    /// Overall deadline for a batch; `None` waits for every observation
    pub batch_timeout: Option<Duration>,
    /// Suggestion scans over at least this many candidates run on rayon
    pub parallel_scan_threshold: usize,

    /// Consecutive store failures before the store is bypassed
    pub store_failure_threshold: u32,
    /// How long the store is bypassed once tripped
    pub store_cooldown: Duration,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            auto_accept_threshold: 90.0,
            fuzzy_floor: 60.0,
            suggestion_floor: 30.0,
            max_suggestions: 5,
            team_boost: 10.0,
            position_boost: 5.0,
            exact_confidence: 100.0,
            normalized_confidence: 95.0,
            contains_cap: 85.0,
            contains_min_ratio: 0.3,
            contains_min_len: 3,
            token_overlap_cap: 80.0,
            fuzzy_cap: 75.0,
            surname_confidence: 65.0,
            ambiguity_margin: 0.0,
            team_prefilter: false,
            batch_concurrency: 8,
            batch_timeout: None,
            parallel_scan_threshold: 512,
            store_failure_threshold: 3,
            store_cooldown: Duration::from_secs(30),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl MatchingConfig {
    /// Load configuration from environment variables with the built-in defaults.
    pub fn from_env() -> Self {
        Self::from_env_with_defaults(Self::default())
    }

    /// Load configuration from environment variables with fallback to provided defaults
    pub fn from_env_with_defaults(defaults: Self) -> Self {
        let batch_timeout = env::var("MATCH_BATCH_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64)
            .or(defaults.batch_timeout);

        Self {
            auto_accept_threshold: env_or("MATCH_AUTO_ACCEPT_THRESHOLD", defaults.auto_accept_threshold),
            fuzzy_floor: env_or("MATCH_FUZZY_FLOOR", defaults.fuzzy_floor),
            suggestion_floor: env_or("MATCH_SUGGESTION_FLOOR", defaults.suggestion_floor),
            max_suggestions: env_or("MATCH_MAX_SUGGESTIONS", defaults.max_suggestions),
            team_boost: env_or("MATCH_TEAM_BOOST", defaults.team_boost),
            position_boost: env_or("MATCH_POSITION_BOOST", defaults.position_boost),
            exact_confidence: env_or("MATCH_EXACT_CONFIDENCE", defaults.exact_confidence),
            normalized_confidence: env_or("MATCH_NORMALIZED_CONFIDENCE", defaults.normalized_confidence),
            contains_cap: env_or("MATCH_CONTAINS_CAP", defaults.contains_cap),
            contains_min_ratio: env_or("MATCH_CONTAINS_MIN_RATIO", defaults.contains_min_ratio),
            contains_min_len: env_or("MATCH_CONTAINS_MIN_LEN", defaults.contains_min_len),
            token_overlap_cap: env_or("MATCH_TOKEN_OVERLAP_CAP", defaults.token_overlap_cap),
            fuzzy_cap: env_or("MATCH_FUZZY_CAP", defaults.fuzzy_cap),
            surname_confidence: env_or("MATCH_SURNAME_CONFIDENCE", defaults.surname_confidence),
            ambiguity_margin: env_or("MATCH_AMBIGUITY_MARGIN", defaults.ambiguity_margin),
            team_prefilter: env::var("MATCH_TEAM_PREFILTER")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(defaults.team_prefilter),
            batch_concurrency: env_or("MATCH_BATCH_CONCURRENCY", defaults.batch_concurrency),
            batch_timeout,
            parallel_scan_threshold: env_or("MATCH_PARALLEL_SCAN_THRESHOLD", defaults.parallel_scan_threshold),
            store_failure_threshold: env_or("MATCH_STORE_FAILURE_THRESHOLD", defaults.store_failure_threshold),
            store_cooldown: Duration::from_secs(env_or(
                "MATCH_STORE_COOLDOWN_SECS",
                defaults.store_cooldown.as_secs(),
            )),
        }
    }

    /// Reject settings that would make the pipeline misbehave.
    pub fn validate(&self) -> Result<()> {
        let scores = [
            ("auto_accept_threshold", self.auto_accept_threshold),
            ("fuzzy_floor", self.fuzzy_floor),
            ("suggestion_floor", self.suggestion_floor),
            ("exact_confidence", self.exact_confidence),
            ("normalized_confidence", self.normalized_confidence),
            ("contains_cap", self.contains_cap),
            ("token_overlap_cap", self.token_overlap_cap),
            ("fuzzy_cap", self.fuzzy_cap),
            ("surname_confidence", self.surname_confidence),
        ];
        for (name, value) in scores {
            if !(0.0..=100.0).contains(&value) {
                bail!("{} must be within 0-100, got {}", name, value);
            }
        }
        if self.team_boost < 0.0 || self.position_boost < 0.0 || self.ambiguity_margin < 0.0 {
            bail!("boosts and ambiguity margin must not be negative");
        }
        if !(0.0..=1.0).contains(&self.contains_min_ratio) {
            bail!(
                "contains_min_ratio must be within 0-1, got {}",
                self.contains_min_ratio
            );
        }
        if self.suggestion_floor > self.auto_accept_threshold {
            bail!(
                "suggestion_floor ({}) must not exceed auto_accept_threshold ({})",
                self.suggestion_floor,
                self.auto_accept_threshold
            );
        }
        if self.max_suggestions == 0 {
            bail!("max_suggestions must be at least 1");
        }
        if self.batch_concurrency == 0 {
            bail!("batch_concurrency must be at least 1");
        }
        Ok(())
    }

    /// Same configuration with a batch deadline.
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = Some(timeout);
        self
    }
}
