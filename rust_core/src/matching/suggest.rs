//! Suggestion engine.
//!
//! When the cascade cannot auto-accept, every candidate is scored with every
//! strategy (no short-circuit, relaxed fuzzy floor) and the best few are
//! offered for review. Large registries are scanned on rayon.

use crate::config::MatchingConfig;
use crate::matching::strategy::{rank_order, PreparedQuery, ScoredCandidate, StrategyCascade};
use crate::models::Suggestion;
use crate::registry::CanonicalRegistry;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SuggestionEngine {
    cascade: StrategyCascade,
}

impl SuggestionEngine {
    pub fn new(config: MatchingConfig) -> Self {
        Self {
            cascade: StrategyCascade::new(config),
        }
    }

    pub fn config(&self) -> &MatchingConfig {
        self.cascade.config()
    }

    /// Ranked suggestions for `query`.
    pub fn suggest(&self, query: &PreparedQuery, registry: &CanonicalRegistry) -> Vec<Suggestion> {
        self.suggest_with(query, registry, &[])
    }

    /// Ranked suggestions, always including `pinned` candidates (the tied
    /// identities of an ambiguous cascade result).
    ///
    /// Results are sorted by confidence descending, hold at most one entry
    /// per canonical id and never fall below the suggestion floor unless
    /// pinned.
    pub fn suggest_with(
        &self,
        query: &PreparedQuery,
        registry: &CanonicalRegistry,
        pinned: &[ScoredCandidate],
    ) -> Vec<Suggestion> {
        let config = self.config();
        if query.is_empty() || registry.is_empty() {
            return Vec::new();
        }

        let floor = config.suggestion_floor;
        let fuzzy_floor = floor.min(config.fuzzy_floor);
        let indices = registry.candidate_indices(query.team.as_ref(), config.team_prefilter);

        let score = |idx: &usize| {
            self.cascade
                .best_score(query, *idx, registry.entry(*idx), fuzzy_floor)
                .filter(|c| c.confidence >= floor)
        };

        let scanned: Vec<ScoredCandidate> = if indices.len() >= config.parallel_scan_threshold {
            indices.par_iter().filter_map(score).collect()
        } else {
            indices.iter().filter_map(score).collect()
        };

        debug!(
            "Suggestion scan for '{}': {} of {} candidates above floor {}",
            query.raw,
            scanned.len(),
            indices.len(),
            floor
        );

        let mut best: FxHashMap<i64, ScoredCandidate> = FxHashMap::default();
        for candidate in pinned.iter().cloned().chain(scanned) {
            match best.get(&candidate.canonical_id) {
                Some(existing) if rank_order(existing, &candidate).is_le() => {}
                _ => {
                    best.insert(candidate.canonical_id, candidate);
                }
            }
        }

        let mut ranked: Vec<ScoredCandidate> = best.into_values().collect();
        ranked.sort_by(rank_order);
        ranked.truncate(config.max_suggestions.max(pinned.len()));

        ranked
            .into_iter()
            .map(|c| Suggestion {
                identity: registry.entry(c.index).identity.clone(),
                confidence: c.confidence,
                strategy: c.strategy,
            })
            .collect()
    }
}
