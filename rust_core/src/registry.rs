//! Canonical registry.
//!
//! Read-only, indexed view of the canonical identities for one matching
//! session. Names are normalized and tokenized once at load time so the
//! cascade and the suggestion engine only compare precomputed strings.

use crate::matching::normalize::{normalize, tokenize};
use crate::models::{CanonicalId, CanonicalIdentity, Position, TeamCode};
use rustc_hash::FxHashMap;
use tracing::{info, warn};

/// A canonical identity with its precomputed comparison forms.
#[derive(Debug, Clone)]
pub struct IndexedIdentity {
    pub identity: CanonicalIdentity,
    pub normalized: String,
    pub tokens: Vec<String>,
    /// Length of `normalized` in chars
    pub char_len: usize,
    pub team: Option<TeamCode>,
    pub position: Option<Position>,
}

impl IndexedIdentity {
    pub fn new(identity: CanonicalIdentity) -> Self {
        let normalized = normalize(&identity.name);
        let tokens = tokenize(&normalized);
        let char_len = normalized.chars().count();
        let team = TeamCode::parse(&identity.team);
        let position = Position::parse(&identity.position);
        Self {
            identity,
            normalized,
            tokens,
            char_len,
            team,
            position,
        }
    }

    pub fn surname(&self) -> Option<&str> {
        self.tokens.last().map(|s| s.as_str())
    }
}

/// Indexed set of canonical identities.
#[derive(Debug, Clone, Default)]
pub struct CanonicalRegistry {
    entries: Vec<IndexedIdentity>,
    by_id: FxHashMap<CanonicalId, usize>,
    by_team: FxHashMap<TeamCode, Vec<usize>>,
}

impl CanonicalRegistry {
    /// Build a registry. Later duplicates of an id are dropped with a warning.
    pub fn from_identities<I>(identities: I) -> Self
    where
        I: IntoIterator<Item = CanonicalIdentity>,
    {
        let mut registry = Self::default();
        let mut duplicates = 0usize;

        for identity in identities {
            if registry.by_id.contains_key(&identity.id) {
                duplicates += 1;
                warn!(
                    "Duplicate canonical id {} ({}) ignored",
                    identity.id, identity.name
                );
                continue;
            }
            let idx = registry.entries.len();
            let entry = IndexedIdentity::new(identity);
            registry.by_id.insert(entry.identity.id, idx);
            if let Some(team) = &entry.team {
                registry.by_team.entry(team.clone()).or_default().push(idx);
            }
            registry.entries.push(entry);
        }

        info!(
            "Canonical registry loaded: {} identities, {} teams, {} duplicates skipped",
            registry.entries.len(),
            registry.by_team.len(),
            duplicates
        );
        registry
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: CanonicalId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn get(&self, id: CanonicalId) -> Option<&CanonicalIdentity> {
        self.by_id.get(&id).map(|&idx| &self.entries[idx].identity)
    }

    pub fn indexed(&self, id: CanonicalId) -> Option<&IndexedIdentity> {
        self.by_id.get(&id).map(|&idx| &self.entries[idx])
    }

    pub fn entry(&self, idx: usize) -> &IndexedIdentity {
        &self.entries[idx]
    }

    /// Registry indices to score for a query.
    ///
    /// With `prefilter` and a known team, only that team's entries; otherwise
    /// (or when the team has no entries) the whole registry.
    pub fn candidate_indices(&self, team: Option<&TeamCode>, prefilter: bool) -> Vec<usize> {
        if prefilter {
            if let Some(indices) = team.and_then(|t| self.by_team.get(t)) {
                if !indices.is_empty() {
                    return indices.clone();
                }
            }
        }
        (0..self.entries.len()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CanonicalRegistry {
        CanonicalRegistry::from_identities(vec![
            CanonicalIdentity::new(42, "Matt O'Riley", "BHA", "M"),
            CanonicalIdentity::new(7, "Bukayo Saka", "ARS", "MID"),
            CanonicalIdentity::new(8, "Declan Rice", "ars", "MID"),
            CanonicalIdentity::new(9, "Unknown Team Guy", "", "?"),
        ])
    }

    #[test]
    fn test_indexes_normalized_forms() {
        let registry = sample();
        let matt = registry.indexed(42).unwrap();
        assert_eq!(matt.normalized, "matt oriley");
        assert_eq!(matt.tokens, vec!["matt", "oriley"]);
        assert_eq!(matt.surname(), Some("oriley"));
        assert_eq!(matt.char_len, 11);
        assert_eq!(matt.position, Some(Position::Midfielder));
    }

    #[test]
    fn test_duplicate_ids_keep_first() {
        let registry = CanonicalRegistry::from_identities(vec![
            CanonicalIdentity::new(1, "First", "ARS", "M"),
            CanonicalIdentity::new(1, "Second", "CHE", "F"),
        ]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(1).unwrap().name, "First");
    }

    #[test]
    fn test_team_prefilter_with_fallback() {
        let registry = sample();
        let ars = TeamCode::parse("ARS").unwrap();
        assert_eq!(registry.candidate_indices(Some(&ars), true).len(), 2);
        assert_eq!(registry.candidate_indices(Some(&ars), false).len(), 4);

        let nowhere = TeamCode::parse("XYZ").unwrap();
        assert_eq!(registry.candidate_indices(Some(&nowhere), true).len(), 4);
        assert_eq!(registry.candidate_indices(None, true).len(), 4);
    }

    #[test]
    fn test_invalid_registry_team_is_unindexed() {
        let registry = sample();
        assert!(registry.indexed(9).unwrap().team.is_none());
        assert_eq!(registry.by_team.len(), 2);
        assert!(!registry.contains(1000));
    }
}
