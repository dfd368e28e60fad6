//! Mapping store.
//!
//! Persists learned `(source_system, source_name) -> canonical_id` mappings
//! so repeated lookups skip the cascade. Two backends:
//! - [`InMemoryMappingStore`]: process-local, optional JSON snapshot
//! - [`PgMappingStore`]: PostgreSQL `name_mappings` table
//!
//! Verified (human-confirmed) mappings are never overwritten by automatic
//! upserts; only another `confirm` replaces them.

use crate::error::StoreError;
use crate::models::{CanonicalId, MappingKey, MappingRecord, MappingStats, MatchStrategy, UpsertOutcome};
use async_trait::async_trait;

pub mod guard;
pub mod memory;
pub mod postgres;

pub use guard::StoreGuard;
pub use memory::InMemoryMappingStore;
pub use postgres::PgMappingStore;

/// Backend-agnostic mapping persistence.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Fetch the mapping for `key`, counting the lookup as a use
    /// (`usage_count += 1`, `last_used_at = now`).
    async fn lookup(&self, key: &MappingKey) -> Result<Option<MappingRecord>, StoreError>;

    /// Record an automatic match. Leaves verified mappings untouched.
    async fn upsert(
        &self,
        key: &MappingKey,
        canonical_id: CanonicalId,
        confidence: f64,
        strategy: MatchStrategy,
    ) -> Result<UpsertOutcome, StoreError>;

    /// Record a human decision, replacing whatever was stored.
    async fn confirm(
        &self,
        key: &MappingKey,
        canonical_id: CanonicalId,
        actor: &str,
    ) -> Result<MappingRecord, StoreError>;

    async fn stats(&self) -> Result<MappingStats, StoreError>;

    /// Unverified mappings, least confident first, for human review.
    async fn list_unverified(
        &self,
        source_system: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MappingRecord>, StoreError>;

    /// Backend name for logging
    fn backend_name(&self) -> &str;
}
