//! Mapping records: the persisted (source system, source name) -> canonical id pairs.

use super::{CanonicalId, MatchStrategy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Confidence stamped on every human-confirmed mapping.
pub const VERIFIED_CONFIDENCE: f64 = 100.0;

/// Key of a mapping record.
///
/// Both parts are trimmed of surrounding whitespace; otherwise the raw
/// source spelling is kept so that each distinct spelling is learned once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MappingKey {
    pub source_system: String,
    pub source_name: String,
}

impl MappingKey {
    pub fn new(source_system: &str, source_name: &str) -> Self {
        Self {
            source_system: source_system.trim().to_string(),
            source_name: source_name.trim().to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.source_name.is_empty()
    }
}

/// A resolved mapping as stored by a [`crate::store::MappingStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingRecord {
    pub source_system: String,
    pub source_name: String,
    pub canonical_id: CanonicalId,
    /// 0-100
    pub confidence: f64,
    pub strategy: MatchStrategy,
    pub verified: bool,
    pub verified_by: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub usage_count: i64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MappingRecord {
    /// Fresh unverified record for an auto-accepted match.
    pub fn auto(
        key: &MappingKey,
        canonical_id: CanonicalId,
        confidence: f64,
        strategy: MatchStrategy,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            source_system: key.source_system.clone(),
            source_name: key.source_name.clone(),
            canonical_id,
            confidence: confidence.clamp(0.0, 100.0),
            strategy,
            verified: false,
            verified_by: None,
            verified_at: None,
            usage_count: 0,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fresh verified record for a human confirmation.
    pub fn verified(
        key: &MappingKey,
        canonical_id: CanonicalId,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            verified: true,
            verified_by: Some(actor.to_string()),
            verified_at: Some(now),
            ..Self::auto(key, canonical_id, VERIFIED_CONFIDENCE, MatchStrategy::Manual, now)
        }
    }

    pub fn key(&self) -> MappingKey {
        MappingKey {
            source_system: self.source_system.clone(),
            source_name: self.source_name.clone(),
        }
    }
}

/// What an upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// The key already holds a verified record, which auto-matches never overwrite.
    SkippedVerified,
}

/// Per-source mapping counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    pub total: u64,
    pub verified: u64,
}

/// Aggregate mapping counts across all sources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingStats {
    pub total_mappings: u64,
    pub verified_count: u64,
    pub by_source: BTreeMap<String, SourceStats>,
}

impl MappingStats {
    /// Build totals from per-source counts.
    pub fn from_sources(by_source: BTreeMap<String, SourceStats>) -> Self {
        let total_mappings = by_source.values().map(|s| s.total).sum();
        let verified_count = by_source.values().map(|s| s.verified).sum();
        Self {
            total_mappings,
            verified_count,
            by_source,
        }
    }
}
