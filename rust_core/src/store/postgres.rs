//! PostgreSQL mapping store.
//!
//! One row per `(source_system, source_name)` in `name_mappings`. The
//! verified-record rule is enforced inside the upsert statement itself, so
//! concurrent writers cannot race a confirmation.

use super::MappingStore;
use crate::db::retry::{execute_with_retry, RetryPolicy};
use crate::error::StoreError;
use crate::models::{
    CanonicalId, MappingKey, MappingRecord, MappingStats, MatchStrategy, SourceStats, UpsertOutcome,
};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::BTreeMap;
use tracing::{debug, info};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS name_mappings (
        source_system  TEXT NOT NULL,
        source_name    TEXT NOT NULL,
        canonical_id   BIGINT NOT NULL,
        confidence     DOUBLE PRECISION NOT NULL,
        strategy       TEXT NOT NULL,
        verified       BOOLEAN NOT NULL DEFAULT FALSE,
        verified_by    TEXT,
        verified_at    TIMESTAMPTZ,
        usage_count    BIGINT NOT NULL DEFAULT 0,
        last_used_at   TIMESTAMPTZ,
        created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at     TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (source_system, source_name)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_name_mappings_canonical ON name_mappings (canonical_id)",
    "CREATE INDEX IF NOT EXISTS idx_name_mappings_unverified \
     ON name_mappings (source_system, confidence) WHERE verified = FALSE",
];

const COLUMNS: &str = "source_system, source_name, canonical_id, confidence, strategy, verified, \
     verified_by, verified_at, usage_count, last_used_at, created_at, updated_at";

pub struct PgMappingStore {
    pool: PgPool,
    retry: RetryPolicy,
}

impl PgMappingStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retry: RetryPolicy::default(),
        }
    }

    /// Create the `name_mappings` table and its indexes if missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("name_mappings schema ready");
        Ok(())
    }
}

fn record_from_row(row: &PgRow) -> Result<MappingRecord, StoreError> {
    let strategy: String = row.try_get("strategy")?;
    let strategy = strategy
        .parse::<MatchStrategy>()
        .map_err(StoreError::Serialization)?;
    Ok(MappingRecord {
        source_system: row.try_get("source_system")?,
        source_name: row.try_get("source_name")?,
        canonical_id: row.try_get("canonical_id")?,
        confidence: row.try_get("confidence")?,
        strategy,
        verified: row.try_get("verified")?,
        verified_by: row.try_get("verified_by")?,
        verified_at: row.try_get("verified_at")?,
        usage_count: row.try_get("usage_count")?,
        last_used_at: row.try_get("last_used_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl MappingStore for PgMappingStore {
    async fn lookup(&self, key: &MappingKey) -> Result<Option<MappingRecord>, StoreError> {
        let sql = format!(
            "UPDATE name_mappings \
             SET usage_count = usage_count + 1, last_used_at = NOW() \
             WHERE source_system = $1 AND source_name = $2 \
             RETURNING {}",
            COLUMNS
        );
        let sql = sql.as_str();
        let row = execute_with_retry(
            || async move {
                sqlx::query(sql)
                    .bind(&key.source_system)
                    .bind(&key.source_name)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(StoreError::from)
            },
            self.retry,
            "lookup",
        )
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn upsert(
        &self,
        key: &MappingKey,
        canonical_id: CanonicalId,
        confidence: f64,
        strategy: MatchStrategy,
    ) -> Result<UpsertOutcome, StoreError> {
        // xmax = 0 only for freshly inserted tuples
        let sql = "INSERT INTO name_mappings \
                   (source_system, source_name, canonical_id, confidence, strategy) \
                   VALUES ($1, $2, $3, $4, $5) \
                   ON CONFLICT (source_system, source_name) DO UPDATE SET \
                       canonical_id = EXCLUDED.canonical_id, \
                       confidence = EXCLUDED.confidence, \
                       strategy = EXCLUDED.strategy, \
                       updated_at = NOW() \
                   WHERE name_mappings.verified = FALSE \
                   RETURNING (xmax = 0) AS inserted";
        let confidence = confidence.clamp(0.0, 100.0);
        let row = execute_with_retry(
            || async move {
                sqlx::query(sql)
                    .bind(&key.source_system)
                    .bind(&key.source_name)
                    .bind(canonical_id)
                    .bind(confidence)
                    .bind(strategy.as_str())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(StoreError::from)
            },
            self.retry,
            "upsert",
        )
        .await?;

        let outcome = match row {
            None => UpsertOutcome::SkippedVerified,
            Some(row) if row.try_get::<bool, _>("inserted")? => UpsertOutcome::Inserted,
            Some(_) => UpsertOutcome::Updated,
        };
        debug!(
            "Upsert {}/{} -> {}: {:?}",
            key.source_system, key.source_name, canonical_id, outcome
        );
        Ok(outcome)
    }

    async fn confirm(
        &self,
        key: &MappingKey,
        canonical_id: CanonicalId,
        actor: &str,
    ) -> Result<MappingRecord, StoreError> {
        let sql = format!(
            "INSERT INTO name_mappings \
             (source_system, source_name, canonical_id, confidence, strategy, \
              verified, verified_by, verified_at) \
             VALUES ($1, $2, $3, $4, $5, TRUE, $6, NOW()) \
             ON CONFLICT (source_system, source_name) DO UPDATE SET \
                 canonical_id = EXCLUDED.canonical_id, \
                 confidence = EXCLUDED.confidence, \
                 strategy = EXCLUDED.strategy, \
                 verified = TRUE, \
                 verified_by = EXCLUDED.verified_by, \
                 verified_at = EXCLUDED.verified_at, \
                 updated_at = NOW() \
             RETURNING {}",
            COLUMNS
        );
        let sql = sql.as_str();
        let row = execute_with_retry(
            || async move {
                sqlx::query(sql)
                    .bind(&key.source_system)
                    .bind(&key.source_name)
                    .bind(canonical_id)
                    .bind(crate::models::VERIFIED_CONFIDENCE)
                    .bind(MatchStrategy::Manual.as_str())
                    .bind(actor)
                    .fetch_one(&self.pool)
                    .await
                    .map_err(StoreError::from)
            },
            self.retry,
            "confirm",
        )
        .await?;
        record_from_row(&row)
    }

    async fn stats(&self) -> Result<MappingStats, StoreError> {
        let sql = "SELECT source_system, \
                          COUNT(*) AS total, \
                          COUNT(*) FILTER (WHERE verified) AS verified \
                   FROM name_mappings GROUP BY source_system";
        let rows = execute_with_retry(
            || async move {
                sqlx::query(sql)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(StoreError::from)
            },
            self.retry,
            "stats",
        )
        .await?;

        let mut by_source = BTreeMap::new();
        for row in rows {
            let total: i64 = row.try_get("total")?;
            let verified: i64 = row.try_get("verified")?;
            by_source.insert(
                row.try_get::<String, _>("source_system")?,
                SourceStats {
                    total: total.max(0) as u64,
                    verified: verified.max(0) as u64,
                },
            );
        }
        Ok(MappingStats::from_sources(by_source))
    }

    async fn list_unverified(
        &self,
        source_system: Option<&str>,
        limit: usize,
    ) -> Result<Vec<MappingRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM name_mappings \
             WHERE verified = FALSE AND ($1::TEXT IS NULL OR source_system = $1) \
             ORDER BY confidence ASC, source_name ASC \
             LIMIT $2",
            COLUMNS
        );
        let sql = sql.as_str();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = execute_with_retry(
            || async move {
                sqlx::query(sql)
                    .bind(source_system)
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(StoreError::from)
            },
            self.retry,
            "list_unverified",
        )
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    fn backend_name(&self) -> &str {
        "postgres"
    }
}
