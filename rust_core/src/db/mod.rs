//! PostgreSQL plumbing shared by the Postgres mapping store and the binary.
//!
//! - `pool`: connection pool configuration and creation
//! - `retry`: exponential backoff for transient store failures
//! - `health`: liveness probe and pool statistics
//! - `registry`: loading the canonical registry from a player table

pub mod health;
pub mod pool;
pub mod registry;
pub mod retry;

pub use health::{check_pool_health, get_pool_stats, PoolStats};
pub use pool::{create_default_pool, create_pool, DbPoolConfig};
pub use registry::{load_registry, validate_table_name};
pub use retry::{execute_with_retry, RetryPolicy};
