//! Strategy cascade.
//!
//! Scores a source name against registry candidates with six strategies,
//! cheapest and most precise first:
//!
//! | strategy | base confidence |
//! |---|---|
//! | exact raw string | 100 |
//! | normalized exact | 95 |
//! | substring (length-ratio gated) | 60 + 40 * ratio, capped 85 |
//! | token overlap | 55 + 30 * overlap, capped 80 |
//! | normalized Levenshtein | similarity, floor 60, capped 75 |
//! | surname only | 65 |
//!
//! Team and position agreement add a context boost on top of the base
//! score. The cascade stops after the first strategy pass that produces an
//! auto-acceptable candidate, checking later strategies only for scores that
//! could tie it. Equal top scores from different identities are reported as
//! ambiguous, never picked arbitrarily.

use crate::config::MatchingConfig;
use crate::matching::normalize::{normalize, tokenize};
use crate::models::{CanonicalId, MatchStrategy, Position, TeamCode};
use crate::registry::{CanonicalRegistry, IndexedIdentity};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use strsim::normalized_levenshtein;
use tracing::debug;

const CONTAINS_BASE: f64 = 60.0;
const CONTAINS_SLOPE: f64 = 40.0;
const TOKEN_OVERLAP_BASE: f64 = 55.0;
const TOKEN_OVERLAP_SLOPE: f64 = 30.0;
const SCORE_EPSILON: f64 = 1e-9;

/// A source name prepared for comparison.
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    /// Raw name with surrounding whitespace trimmed
    pub raw: String,
    pub normalized: String,
    pub tokens: Vec<String>,
    pub char_len: usize,
    pub team: Option<TeamCode>,
    pub position: Option<Position>,
}

impl PreparedQuery {
    pub fn new(raw: &str, team: Option<TeamCode>, position: Option<Position>) -> Self {
        let normalized = normalize(raw);
        let tokens = tokenize(&normalized);
        let char_len = normalized.chars().count();
        Self {
            raw: raw.trim().to_string(),
            normalized,
            tokens,
            char_len,
            team,
            position,
        }
    }

    /// Nothing comparable survived normalization.
    pub fn is_empty(&self) -> bool {
        self.normalized.is_empty()
    }
}

/// One candidate's score under one strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    /// Position in the registry
    pub index: usize,
    pub canonical_id: CanonicalId,
    pub strategy: MatchStrategy,
    pub base_confidence: f64,
    pub boost: f64,
    /// `base_confidence + boost`, clamped to 100
    pub confidence: f64,
}

impl ScoredCandidate {
    pub fn new(
        index: usize,
        canonical_id: CanonicalId,
        strategy: MatchStrategy,
        base_confidence: f64,
        boost: f64,
    ) -> Self {
        Self {
            index,
            canonical_id,
            strategy,
            base_confidence,
            boost,
            confidence: apply_boost(base_confidence, boost),
        }
    }
}

/// Add a context boost to a base score, clamped to 0-100.
pub fn apply_boost(base: f64, boost: f64) -> f64 {
    (base + boost).clamp(0.0, 100.0)
}

/// Ranking: confidence descending, then more precise strategy, then id.
pub fn rank_order(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| a.strategy.cmp(&b.strategy))
        .then_with(|| a.canonical_id.cmp(&b.canonical_id))
}

/// What the cascade concluded for one query.
#[derive(Debug, Clone, PartialEq)]
pub enum CascadeOutcome {
    /// Single best candidate; may still be below the auto-accept threshold
    BestMatch(ScoredCandidate),
    /// Two or more identities tied at the top
    Ambiguous(Vec<ScoredCandidate>),
    NoMatch,
}

/// Ordered matching strategies with context boosting.
#[derive(Debug, Clone)]
pub struct StrategyCascade {
    config: MatchingConfig,
}

impl StrategyCascade {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Base score of `candidate` under one strategy, before boosting.
    pub fn base_score(
        &self,
        strategy: MatchStrategy,
        query: &PreparedQuery,
        candidate: &IndexedIdentity,
        fuzzy_floor: f64,
    ) -> Option<f64> {
        match strategy {
            MatchStrategy::Exact => self.exact(query, candidate),
            MatchStrategy::Normalized => self.normalized(query, candidate),
            MatchStrategy::Contains => self.contains(query, candidate),
            MatchStrategy::TokenOverlap => self.token_overlap(query, candidate),
            MatchStrategy::Fuzzy => self.fuzzy(query, candidate, fuzzy_floor),
            MatchStrategy::Surname => self.surname(query, candidate),
            MatchStrategy::Manual => None,
        }
    }

    fn exact(&self, query: &PreparedQuery, candidate: &IndexedIdentity) -> Option<f64> {
        (!query.raw.is_empty() && query.raw == candidate.identity.name.trim())
            .then_some(self.config.exact_confidence)
    }

    fn normalized(&self, query: &PreparedQuery, candidate: &IndexedIdentity) -> Option<f64> {
        (!query.is_empty() && query.normalized == candidate.normalized)
            .then_some(self.config.normalized_confidence)
    }

    fn contains(&self, query: &PreparedQuery, candidate: &IndexedIdentity) -> Option<f64> {
        if query.is_empty() || candidate.normalized.is_empty() {
            return None;
        }
        if query.normalized == candidate.normalized {
            return None;
        }
        let ((short, short_len), (long, long_len)) = if query.char_len <= candidate.char_len {
            (
                (&query.normalized, query.char_len),
                (&candidate.normalized, candidate.char_len),
            )
        } else {
            (
                (&candidate.normalized, candidate.char_len),
                (&query.normalized, query.char_len),
            )
        };
        if short_len < self.config.contains_min_len {
            return None;
        }
        let ratio = short_len as f64 / long_len as f64;
        if ratio < self.config.contains_min_ratio || !long.contains(short.as_str()) {
            return None;
        }
        Some((CONTAINS_BASE + CONTAINS_SLOPE * ratio).min(self.config.contains_cap))
    }

    fn token_overlap(&self, query: &PreparedQuery, candidate: &IndexedIdentity) -> Option<f64> {
        let (q, c) = (&query.tokens, &candidate.tokens);
        if q.is_empty() || c.is_empty() {
            return None;
        }
        let (short, long) = if q.len() <= c.len() { (q, c) } else { (c, q) };

        // An initial on its own says nothing
        if !short.iter().any(|t| t.chars().count() > 1) {
            return None;
        }

        let mut used = vec![false; long.len()];
        for token in short {
            let slot = (0..long.len())
                .find(|&i| !used[i] && long[i] == *token)
                .or_else(|| (0..long.len()).find(|&i| !used[i] && initial_matches(token, &long[i])))?;
            used[slot] = true;
        }

        let overlap = short.len() as f64 / long.len() as f64;
        Some((TOKEN_OVERLAP_BASE + TOKEN_OVERLAP_SLOPE * overlap).min(self.config.token_overlap_cap))
    }

    fn fuzzy(&self, query: &PreparedQuery, candidate: &IndexedIdentity, floor: f64) -> Option<f64> {
        if query.is_empty() || candidate.normalized.is_empty() {
            return None;
        }
        // Edit distance is at least the length difference, so this bounds the
        // best achievable similarity without computing the full distance.
        let max_len = query.char_len.max(candidate.char_len) as f64;
        let len_diff = query.char_len.abs_diff(candidate.char_len) as f64;
        if 100.0 * (1.0 - len_diff / max_len) < floor {
            return None;
        }
        let similarity = normalized_levenshtein(&query.normalized, &candidate.normalized) * 100.0;
        (similarity >= floor).then(|| similarity.min(self.config.fuzzy_cap))
    }

    fn surname(&self, query: &PreparedQuery, candidate: &IndexedIdentity) -> Option<f64> {
        let query_last = query.tokens.last()?;
        let candidate_last = candidate.surname()?;
        (query_last.chars().count() >= 2 && query_last == candidate_last)
            .then_some(self.config.surname_confidence)
    }

    /// Boost from team and position agreement.
    pub fn context_boost(&self, query: &PreparedQuery, candidate: &IndexedIdentity) -> f64 {
        let mut boost = 0.0;
        if let (Some(hint), Some(team)) = (&query.team, &candidate.team) {
            if hint == team {
                boost += self.config.team_boost;
            }
        }
        if let (Some(hint), Some(position)) = (query.position, candidate.position) {
            if hint == position {
                boost += self.config.position_boost;
            }
        }
        boost
    }

    /// Boosted score of `candidate` under one strategy.
    pub fn score(
        &self,
        strategy: MatchStrategy,
        query: &PreparedQuery,
        index: usize,
        candidate: &IndexedIdentity,
        fuzzy_floor: f64,
    ) -> Option<ScoredCandidate> {
        let base = self.base_score(strategy, query, candidate, fuzzy_floor)?;
        let boost = self.context_boost(query, candidate);
        Some(ScoredCandidate::new(
            index,
            candidate.identity.id,
            strategy,
            base,
            boost,
        ))
    }

    /// Best boosted score of `candidate` across every strategy.
    pub fn best_score(
        &self,
        query: &PreparedQuery,
        index: usize,
        candidate: &IndexedIdentity,
        fuzzy_floor: f64,
    ) -> Option<ScoredCandidate> {
        MatchStrategy::CASCADE
            .iter()
            .filter_map(|&strategy| self.score(strategy, query, index, candidate, fuzzy_floor))
            .min_by(rank_order)
    }

    /// Whether a candidate may be accepted without human review.
    ///
    /// Surname-only matches qualify only with a context boost, since
    /// surname collisions are common.
    pub fn is_auto_acceptable(&self, candidate: &ScoredCandidate) -> bool {
        if candidate.confidence + SCORE_EPSILON < self.config.auto_accept_threshold {
            return false;
        }
        candidate.strategy != MatchStrategy::Surname || candidate.boost > 0.0
    }

    /// Highest boosted score a strategy can produce.
    fn ceiling(&self, strategy: MatchStrategy) -> f64 {
        let base = match strategy {
            MatchStrategy::Exact => self.config.exact_confidence,
            MatchStrategy::Normalized => self.config.normalized_confidence,
            MatchStrategy::Contains => self.config.contains_cap,
            MatchStrategy::TokenOverlap => self.config.token_overlap_cap,
            MatchStrategy::Fuzzy => self.config.fuzzy_cap,
            MatchStrategy::Surname => self.config.surname_confidence,
            MatchStrategy::Manual => return 0.0,
        };
        apply_boost(base, self.config.team_boost + self.config.position_boost)
    }

    /// Score every candidate under one strategy, keeping each candidate's
    /// best. Scores below `min_confidence` are ignored.
    fn score_pass(
        &self,
        strategy: MatchStrategy,
        query: &PreparedQuery,
        registry: &CanonicalRegistry,
        indices: &[usize],
        min_confidence: Option<f64>,
        best: &mut FxHashMap<usize, ScoredCandidate>,
    ) {
        for &idx in indices {
            let entry = registry.entry(idx);
            let Some(scored) = self.score(strategy, query, idx, entry, self.config.fuzzy_floor)
            else {
                continue;
            };
            if min_confidence.is_some_and(|min| scored.confidence < min) {
                continue;
            }
            let better = best
                .get(&idx)
                .map_or(true, |existing| rank_order(&scored, existing) == Ordering::Less);
            if better {
                best.insert(idx, scored);
            }
        }
    }

    /// Run the cascade over the (optionally team-filtered) registry.
    ///
    /// Once a pass yields an auto-acceptable candidate, later strategies are
    /// consulted only for candidates reaching the accepted score, so a tie
    /// found by a later strategy is still reported as ambiguous.
    pub fn run(&self, query: &PreparedQuery, registry: &CanonicalRegistry) -> CascadeOutcome {
        if query.is_empty() || registry.is_empty() {
            return CascadeOutcome::NoMatch;
        }

        let indices = registry.candidate_indices(query.team.as_ref(), self.config.team_prefilter);
        let mut best: FxHashMap<usize, ScoredCandidate> = FxHashMap::default();

        let mut accepted_at = None;
        for (pass, strategy) in MatchStrategy::CASCADE.into_iter().enumerate() {
            self.score_pass(strategy, query, registry, &indices, None, &mut best);
            if best.values().any(|c| self.is_auto_acceptable(c)) {
                debug!(
                    "Cascade short-circuit after {} for '{}' ({} candidates scored)",
                    strategy,
                    query.raw,
                    best.len()
                );
                accepted_at = Some(pass);
                break;
            }
        }

        if let Some(pass) = accepted_at {
            let top = best
                .values()
                .map(|c| c.confidence)
                .fold(f64::NEG_INFINITY, f64::max);
            let cutoff = top - self.config.ambiguity_margin - SCORE_EPSILON;
            for strategy in MatchStrategy::CASCADE.into_iter().skip(pass + 1) {
                if self.ceiling(strategy) < cutoff {
                    continue;
                }
                self.score_pass(strategy, query, registry, &indices, Some(cutoff), &mut best);
            }
        }

        self.resolve(best.into_values().collect())
    }

    /// Pick the winner from scored candidates, detecting ties at the top.
    pub fn resolve(&self, mut candidates: Vec<ScoredCandidate>) -> CascadeOutcome {
        if candidates.is_empty() {
            return CascadeOutcome::NoMatch;
        }
        candidates.sort_by(rank_order);

        let cutoff = candidates[0].confidence - self.config.ambiguity_margin - SCORE_EPSILON;
        let tied = candidates
            .iter()
            .take_while(|c| c.confidence >= cutoff)
            .count();

        if tied > 1 {
            candidates.truncate(tied);
            CascadeOutcome::Ambiguous(candidates)
        } else {
            CascadeOutcome::BestMatch(candidates.swap_remove(0))
        }
    }
}

fn initial_matches(a: &str, b: &str) -> bool {
    let a_is_initial = a.chars().count() == 1;
    let b_is_initial = b.chars().count() == 1;
    (a_is_initial && b.starts_with(a)) || (b_is_initial && a.starts_with(b))
}
