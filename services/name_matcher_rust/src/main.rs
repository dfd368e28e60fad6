mod config;
mod jsonl;

use crate::config::Config;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use name_matching_core::db::{
    check_pool_health, create_pool, get_pool_stats, load_registry, DbPoolConfig,
};
use name_matching_core::{
    CanonicalRegistry, InMemoryMappingStore, MappingStore, MatchingConfig, MatchingService,
    PgMappingStore,
};
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Resolve external player names against the canonical registry")]
struct Cli {
    /// Load the registry from a JSON file instead of PLAYER_TABLE
    #[arg(long, global = true)]
    registry_file: Option<PathBuf>,

    /// Keep mappings in a JSON snapshot instead of PostgreSQL
    #[arg(long, global = true)]
    snapshot: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Match JSON-lines observations and print JSON-lines outcomes
    Match {
        /// Input file, `-` for stdin
        #[arg(short, long, default_value = "-")]
        input: String,

        /// Output file (default stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overall batch deadline in seconds
        #[arg(long)]
        timeout_secs: Option<f64>,
    },
    /// Record a human decision for one source name
    Confirm {
        #[arg(long)]
        name: String,
        #[arg(long)]
        system: String,
        #[arg(long)]
        id: i64,
        #[arg(long)]
        actor: String,
    },
    /// Print mapping counts per source
    Stats,
    /// List auto-accepted mappings awaiting review, least confident first
    Review {
        #[arg(long)]
        system: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

struct Session {
    service: MatchingService,
    snapshot: Option<(Arc<InMemoryMappingStore>, PathBuf)>,
}

impl Session {
    fn save_snapshot(&self) -> Result<()> {
        if let Some((store, path)) = &self.snapshot {
            store
                .save(path)
                .with_context(|| format!("Failed to save snapshot {}", path.display()))?;
            info!("Saved {} mappings to {}", store.len(), path.display());
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    let mut matching = MatchingConfig::from_env();
    if let Command::Match {
        timeout_secs: Some(secs),
        ..
    } = &cli.command
    {
        if *secs > 0.0 {
            matching = matching.with_batch_timeout(Duration::from_secs_f64(*secs));
        }
    }
    matching.validate().context("Invalid matching configuration")?;

    let session = build_session(&cli, &config, matching).await?;

    match cli.command {
        Command::Match {
            input, output, ..
        } => {
            let observations = jsonl::read_observations(jsonl::open_input(&input)?)?;
            info!("Matching {} observations from {}", observations.len(), input);

            let report = session.service.match_batch(observations).await;
            let mut writer = jsonl::open_output(output.as_deref())?;
            jsonl::write_lines(&mut *writer, &report.outcomes)?;

            info!(
                "Match rate {:.1}% ({} matched, {} need review, {} unmatched)",
                report.match_rate() * 100.0,
                report.matched,
                report.needs_review,
                report.unmatched
            );
            session.save_snapshot()?;
        }
        Command::Confirm {
            name,
            system,
            id,
            actor,
        } => {
            let record = session.service.confirm(&name, &system, id, &actor).await?;
            println!("{}", serde_json::to_string(&record)?);
            session.save_snapshot()?;
        }
        Command::Stats => {
            let stats = session.service.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Review { system, limit } => {
            let pending = session
                .service
                .review_queue(system.as_deref(), limit)
                .await?;
            let mut writer = jsonl::open_output(None)?;
            jsonl::write_lines(&mut *writer, &pending)?;
        }
    }

    Ok(())
}

async fn build_session(cli: &Cli, config: &Config, matching: MatchingConfig) -> Result<Session> {
    let pool = match &config.database_url {
        Some(url) => connect(url, &matching).await,
        None => None,
    };

    let registry = match (&cli.registry_file, &pool) {
        (Some(path), _) => CanonicalRegistry::from_identities(jsonl::read_registry_file(path)?),
        (None, Some(pool)) => load_registry(pool, &config.player_table).await?,
        (None, None) => bail!("No registry available: pass --registry-file or set a reachable DATABASE_URL"),
    };

    let mut snapshot = None;
    let store: Option<Arc<dyn MappingStore>> = if let Some(path) = &cli.snapshot {
        let memory = Arc::new(InMemoryMappingStore::load(path)?);
        snapshot = Some((memory.clone(), path.clone()));
        Some(memory)
    } else if let Some(pool) = pool {
        let pg = PgMappingStore::new(pool);
        match pg.ensure_schema().await {
            Ok(()) => Some(Arc::new(pg)),
            Err(e) => {
                warn!("Mapping store schema unavailable ({}), running cascade-only", e);
                None
            }
        }
    } else {
        warn!("No mapping store configured, running cascade-only: nothing will be learned");
        None
    };

    Ok(Session {
        service: MatchingService::new(registry, store, matching),
        snapshot,
    })
}

/// Connect and probe the database; `None` if it is unreachable.
async fn connect(url: &str, matching: &MatchingConfig) -> Option<PgPool> {
    let pool_config =
        DbPoolConfig::from_env_with_defaults(DbPoolConfig::for_batch(matching.batch_concurrency));
    let pool = match create_pool(url, &pool_config).await {
        Ok(pool) => pool,
        Err(e) => {
            warn!("Database unavailable: {:#}", e);
            return None;
        }
    };
    match check_pool_health(&pool).await {
        Ok(()) => {
            let stats = get_pool_stats(&pool);
            info!(
                "Database ready: {} connections ({} idle, {} active)",
                stats.size,
                stats.idle,
                stats.active()
            );
            Some(pool)
        }
        Err(e) => {
            warn!("Database health check failed: {:#}", e);
            None
        }
    }
}
