//! In-memory mapping store with optional JSON snapshots.

use super::MappingStore;
use crate::error::StoreError;
use crate::models::{
    CanonicalId, MappingKey, MappingRecord, MappingStats, MatchStrategy, SourceStats, UpsertOutcome,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct InMemoryMappingStore {
    records: RwLock<HashMap<MappingKey, MappingRecord>>,
}

impl InMemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = MappingRecord>,
    {
        let map = records.into_iter().map(|r| (r.key(), r)).collect();
        Self {
            records: RwLock::new(map),
        }
    }

    /// Load a snapshot written by [`save`](Self::save). A missing file gives
    /// an empty store.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No mapping snapshot at {}, starting empty", path.display());
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };
        let records: Vec<MappingRecord> = serde_json::from_str(&content)?;
        info!(
            "Loaded {} mappings from {}",
            records.len(),
            path.display()
        );
        Ok(Self::with_records(records))
    }

    /// Write all records as pretty JSON, sorted by key.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let records = self.records();
        let content = serde_json::to_string_pretty(&records)?;
        fs::write(path.as_ref(), content)?;
        debug!("Saved {} mappings to {}", records.len(), path.as_ref().display());
        Ok(())
    }

    /// Copy of every record, sorted by key.
    pub fn records(&self) -> Vec<MappingRecord> {
        let mut records: Vec<MappingRecord> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| {
            (&a.source_system, &a.source_name).cmp(&(&b.source_system, &b.source_name))
        });
        records
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Read a record without counting it as a use.
    pub fn peek(&self, key: &MappingKey) -> Option<MappingRecord> {
        self.records.read().get(key).cloned()
    }
}

#[async_trait]
impl MappingStore for InMemoryMappingStore {
    async fn lookup(&self, key: &MappingKey) -> Result<Option<MappingRecord>, StoreError> {
        let mut records = self.records.write();
        Ok(records.get_mut(key).map(|record| {
            record.usage_count += 1;
            record.last_used_at = Some(Utc::now());
            record.clone()
        }))
    }

    async fn upsert(
        &self,
        key: &MappingKey,
        canonical_id: CanonicalId,
        confidence: f64,
        strategy: MatchStrategy,
    ) -> Result<UpsertOutcome, StoreError> {
        let now = Utc::now();
        let mut records = self.records.write();
        match records.get_mut(key) {
            Some(existing) if existing.verified => Ok(UpsertOutcome::SkippedVerified),
            Some(existing) => {
                existing.canonical_id = canonical_id;
                existing.confidence = confidence.clamp(0.0, 100.0);
                existing.strategy = strategy;
                existing.updated_at = now;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                records.insert(
                    key.clone(),
                    MappingRecord::auto(key, canonical_id, confidence, strategy, now),
                );
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn confirm(
        &self,
        key: &MappingKey,
        canonical_id: CanonicalId,
        actor: &str,
    ) -> Result<MappingRecord, StoreError> {
        let now = Utc::now();
        let mut records = self.records.write();
        let mut record = MappingRecord::verified(key, canonical_id, actor, now);
        if let Some(existing) = records.get(key) {
            record.created_at = existing.created_at;
            record.usage_count = existing.usage_count;
            record.last_used_at = existing.last_used_at;
        }
        records.insert(key.clone(), record.clone());
        Ok(record)
    }

    async fn stats(&self) -> Result<MappingStats, StoreError> {
        let records = self.records.read();
        let mut by_source: BTreeMap<String, SourceStats> = BTreeMap::new();
        for record in records.values() {
            let entry = by_source.entry(record.source_system.clone()).or_default();
            entry.total += 1;
            if record.verified {
                entry.verified += 1;
            }
        }
        Ok(MappingStats::from_sources(by_source))
    }

    async fn list_unverified(
        &self,
        source_system: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MappingRecord>, StoreError> {
        let mut pending: Vec<MappingRecord> = self
            .records
            .read()
            .values()
            .filter(|r| !r.verified)
            .filter(|r| source_system.map_or(true, |s| r.source_system == s))
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.confidence
                .total_cmp(&b.confidence)
                .then_with(|| a.source_name.cmp(&b.source_name))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}
