//! Loading the canonical registry from PostgreSQL.

use crate::models::CanonicalIdentity;
use crate::registry::CanonicalRegistry;
use anyhow::{bail, Context, Result};
use regex::Regex;
use sqlx::{PgPool, Row};
use std::sync::OnceLock;
use tracing::info;

static TABLE_NAME_RE: OnceLock<Regex> = OnceLock::new();

/// Table names are interpolated into SQL, so only plain (optionally
/// schema-qualified) identifiers are accepted.
pub fn validate_table_name(table: &str) -> Result<()> {
    let re = TABLE_NAME_RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}(\.[A-Za-z_][A-Za-z0-9_]{0,62})?$")
            .expect("table name pattern is valid")
    });
    if !re.is_match(table) {
        bail!("invalid registry table name: {:?}", table);
    }
    Ok(())
}

/// Load every row of `table` (`id`, `name`, `team`, `position`) into a
/// registry. Null team or position become empty strings.
pub async fn load_registry(pool: &PgPool, table: &str) -> Result<CanonicalRegistry> {
    validate_table_name(table)?;

    let sql = format!(
        "SELECT id::BIGINT AS id, name, COALESCE(team, '') AS team, \
         COALESCE(position, '') AS position FROM {} ORDER BY id",
        table
    );
    let rows = sqlx::query(&sql)
        .fetch_all(pool)
        .await
        .with_context(|| format!("Failed to load canonical registry from {}", table))?;

    let mut identities = Vec::with_capacity(rows.len());
    for row in rows {
        identities.push(CanonicalIdentity {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            team: row.try_get("team")?,
            position: row.try_get("position")?,
        });
    }

    info!("Fetched {} canonical identities from {}", identities.len(), table);
    Ok(CanonicalRegistry::from_identities(identities))
}
