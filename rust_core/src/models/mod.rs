//! Shared data models for name matching.
//!
//! - `CanonicalIdentity` / `SourceObservation`: the two sides of a match
//! - `MatchResult` / `MatchOutcome` / `BatchReport`: what callers get back
//! - `MappingRecord` and friends: the learned mappings (see `mapping`)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod hints;
pub mod mapping;

pub use hints::{HintField, Position, TeamCode};
pub use mapping::{
    MappingKey, MappingRecord, MappingStats, SourceStats, UpsertOutcome, VERIFIED_CONFIDENCE,
};

/// Identifier of a canonical registry entry.
pub type CanonicalId = i64;

// ============================================================================
// Identities and observations
// ============================================================================

/// Authoritative registry entry every external name must resolve to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalIdentity {
    pub id: CanonicalId,
    pub name: String,
    pub team: String,
    pub position: String,
}

impl CanonicalIdentity {
    pub fn new(
        id: CanonicalId,
        name: impl Into<String>,
        team: impl Into<String>,
        position: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            team: team.into(),
            position: position.into(),
        }
    }
}

/// A raw name from one external data source, plus optional context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceObservation {
    pub source_name: String,
    pub source_system: String,
    #[serde(default)]
    pub team_hint: Option<String>,
    #[serde(default)]
    pub position_hint: Option<String>,
}

impl SourceObservation {
    pub fn new(source_name: impl Into<String>, source_system: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            source_system: source_system.into(),
            team_hint: None,
            position_hint: None,
        }
    }

    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team_hint = Some(team.into());
        self
    }

    pub fn with_position(mut self, position: impl Into<String>) -> Self {
        self.position_hint = Some(position.into());
        self
    }

    pub fn key(&self) -> MappingKey {
        MappingKey::new(&self.source_system, &self.source_name)
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// Matching strategy that produced a confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Exact,
    Normalized,
    Contains,
    TokenOverlap,
    Fuzzy,
    Surname,
    /// Human confirmation
    Manual,
}

impl MatchStrategy {
    /// Cascade order: cheap and precise first.
    pub const CASCADE: [MatchStrategy; 6] = [
        MatchStrategy::Exact,
        MatchStrategy::Normalized,
        MatchStrategy::Contains,
        MatchStrategy::TokenOverlap,
        MatchStrategy::Fuzzy,
        MatchStrategy::Surname,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStrategy::Exact => "exact",
            MatchStrategy::Normalized => "normalized",
            MatchStrategy::Contains => "contains",
            MatchStrategy::TokenOverlap => "token_overlap",
            MatchStrategy::Fuzzy => "fuzzy",
            MatchStrategy::Surname => "surname",
            MatchStrategy::Manual => "manual",
        }
    }
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exact" => Ok(MatchStrategy::Exact),
            "normalized" => Ok(MatchStrategy::Normalized),
            "contains" => Ok(MatchStrategy::Contains),
            "token_overlap" => Ok(MatchStrategy::TokenOverlap),
            "fuzzy" => Ok(MatchStrategy::Fuzzy),
            "surname" => Ok(MatchStrategy::Surname),
            "manual" => Ok(MatchStrategy::Manual),
            other => Err(format!("unknown match strategy: {}", other)),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

/// A ranked candidate offered for human confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub identity: CanonicalIdentity,
    pub confidence: f64,
    pub strategy: MatchStrategy,
}

/// Why a result needs a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    /// Several identities tied at the top confidence
    Ambiguous,
    /// Best candidate is below the auto-accept threshold
    LowConfidence,
}

/// Why nothing was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedReason {
    EmptyInput,
    NoCandidates,
    TimedOut,
}

/// Outcome of matching one observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchResult {
    Matched {
        canonical_id: CanonicalId,
        confidence: f64,
        strategy: MatchStrategy,
    },
    NeedsReview {
        reason: ReviewReason,
        suggestions: Vec<Suggestion>,
    },
    Unmatched {
        reason: UnmatchedReason,
    },
}

impl MatchResult {
    pub fn unmatched(reason: UnmatchedReason) -> Self {
        MatchResult::Unmatched { reason }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, MatchResult::Matched { .. })
    }

    pub fn needs_review(&self) -> bool {
        matches!(self, MatchResult::NeedsReview { .. })
    }

    pub fn is_unmatched(&self) -> bool {
        matches!(self, MatchResult::Unmatched { .. })
    }

    pub fn canonical_id(&self) -> Option<CanonicalId> {
        match self {
            MatchResult::Matched { canonical_id, .. } => Some(*canonical_id),
            _ => None,
        }
    }

    /// Confidence of the match, or of the best suggestion.
    pub fn confidence(&self) -> Option<f64> {
        match self {
            MatchResult::Matched { confidence, .. } => Some(*confidence),
            MatchResult::NeedsReview { suggestions, .. } => suggestions.first().map(|s| s.confidence),
            MatchResult::Unmatched { .. } => None,
        }
    }

    pub fn status_str(&self) -> &'static str {
        match self {
            MatchResult::Matched { .. } => "matched",
            MatchResult::NeedsReview { .. } => "needs_review",
            MatchResult::Unmatched { .. } => "unmatched",
        }
    }
}

/// Non-fatal conditions reported alongside a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchWarning {
    /// Hint did not parse and was ignored
    InvalidHint { field: HintField, value: String },
    /// Mapping store could not be reached; answered from the cascade only
    StoreUnavailable { detail: String },
    /// Stored mapping points at an id missing from the current registry
    StaleMapping { canonical_id: CanonicalId },
    /// Stored mapping's identity plays for a different team than hinted
    TeamMismatch {
        canonical_id: CanonicalId,
        registry_team: String,
        hinted_team: String,
    },
}

/// A [`MatchResult`] together with where it came from and any warnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub source_system: String,
    pub source_name: String,
    pub result: MatchResult,
    /// Served from the mapping store without running the cascade
    pub from_store: bool,
    pub warnings: Vec<MatchWarning>,
}

impl MatchOutcome {
    pub fn new(observation: &SourceObservation, result: MatchResult) -> Self {
        Self {
            source_system: observation.source_system.clone(),
            source_name: observation.source_name.clone(),
            result,
            from_store: false,
            warnings: Vec::new(),
        }
    }

    pub fn store_degraded(&self) -> bool {
        self.warnings
            .iter()
            .any(|w| matches!(w, MatchWarning::StoreUnavailable { .. }))
    }
}

/// Order-preserving results of a batch, with always-numeric counts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub outcomes: Vec<MatchOutcome>,
    pub matched: usize,
    pub needs_review: usize,
    pub unmatched: usize,
    pub timed_out: usize,
    pub from_store: usize,
    pub store_degraded: bool,
}

impl BatchReport {
    pub fn from_outcomes(outcomes: Vec<MatchOutcome>) -> Self {
        let mut report = BatchReport::default();
        for outcome in &outcomes {
            match &outcome.result {
                MatchResult::Matched { .. } => report.matched += 1,
                MatchResult::NeedsReview { .. } => report.needs_review += 1,
                MatchResult::Unmatched { reason } => {
                    report.unmatched += 1;
                    if *reason == UnmatchedReason::TimedOut {
                        report.timed_out += 1;
                    }
                }
            }
            if outcome.from_store {
                report.from_store += 1;
            }
            if outcome.store_degraded() {
                report.store_degraded = true;
            }
        }
        report.outcomes = outcomes;
        report
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Fraction of observations matched, 0.0 for an empty batch.
    pub fn match_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            0.0
        } else {
            self.matched as f64 / self.outcomes.len() as f64
        }
    }
}
