//! Connection pool configuration.

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::env;
use std::time::Duration;
use tracing::info;

/// Database pool configuration
#[derive(Clone, Debug, PartialEq)]
pub struct DbPoolConfig {
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections to maintain
    pub min_connections: u32,
    /// Maximum lifetime of a connection
    pub max_lifetime: Duration,
    /// Maximum idle time before a connection is closed
    pub idle_timeout: Duration,
    /// How long to wait for a free connection
    pub acquire_timeout: Duration,
}

impl Default for DbPoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            max_lifetime: Duration::from_secs(1800), // 30 minutes
            idle_timeout: Duration::from_secs(600),  // 10 minutes
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl DbPoolConfig {
    /// Pool sized for batch runs, where `MATCH_BATCH_CONCURRENCY` lookups
    /// hit the store at once.
    pub fn for_batch(concurrency: usize) -> Self {
        let wanted = u32::try_from(concurrency).unwrap_or(u32::MAX).saturating_add(2);
        Self {
            max_connections: wanted.clamp(4, 50),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables with the built-in defaults.
    pub fn from_env() -> Self {
        Self::from_env_with_defaults(Self::default())
    }

    /// Load configuration from environment variables with fallback to provided defaults
    pub fn from_env_with_defaults(defaults: Self) -> Self {
        let secs = |name: &str, default: Duration| {
            env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        Self {
            max_connections: env::var("DB_POOL_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
            min_connections: env::var("DB_POOL_MIN_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.min_connections),
            max_lifetime: secs("DB_POOL_MAX_LIFETIME_SECS", defaults.max_lifetime),
            idle_timeout: secs("DB_POOL_IDLE_TIMEOUT_SECS", defaults.idle_timeout),
            acquire_timeout: secs("DB_POOL_ACQUIRE_TIMEOUT_SECS", defaults.acquire_timeout),
        }
    }
}

/// Create a database connection pool with the given configuration.
pub async fn create_pool(database_url: &str, config: &DbPoolConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect(database_url)
        .await
        .context("Failed to create database connection pool")?;

    info!(
        "Database pool created: max={}, min={}, acquire_timeout={}s",
        config.max_connections,
        config.min_connections,
        config.acquire_timeout.as_secs()
    );

    Ok(pool)
}

/// Create a pool from `DATABASE_URL` and the `DB_POOL_*` variables.
pub async fn create_default_pool() -> Result<PgPool> {
    let database_url =
        env::var("DATABASE_URL").context("DATABASE_URL environment variable must be set")?;
    create_pool(&database_url, &DbPoolConfig::from_env()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DbPoolConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
        assert_eq!(config.acquire_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_batch_pool_follows_concurrency() {
        assert_eq!(DbPoolConfig::for_batch(8).max_connections, 10);
        assert_eq!(DbPoolConfig::for_batch(0).max_connections, 4);
        assert_eq!(DbPoolConfig::for_batch(500).max_connections, 50);
    }
}
