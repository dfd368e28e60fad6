use std::env;

/// Environment settings for the matcher binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL URL for the registry and the mapping store
    pub database_url: Option<String>,
    /// Table holding the canonical registry (`id`, `name`, `team`, `position`)
    pub player_table: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            player_table: env::var("PLAYER_TABLE").unwrap_or_else(|_| "players".to_string()),
        }
    }
}
