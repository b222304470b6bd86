// Database - Connection pool and migrations for the PostgreSQL stores

use sqlx::{PgPool, Postgres, migrate::MigrateDatabase, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{info, warn};

use crate::repository::RepositoryResult;

/// Pool sizing for the automation worker. The worker holds few long-lived
/// connections: one per concurrently running execution plus the scheduler tick.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long an execution waits for a free connection before its repository call fails
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    /// Create the database on startup when it does not exist yet
    pub create_if_missing: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(600),
            create_if_missing: true,
        }
    }
}

impl PoolConfig {
    /// Defaults overridden by `AUTOMATION_DB_*` variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            max_connections: env_or("AUTOMATION_DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: env_or("AUTOMATION_DB_MIN_CONNECTIONS", defaults.min_connections),
            acquire_timeout: Duration::from_secs(env_or(
                "AUTOMATION_DB_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout.as_secs(),
            )),
            idle_timeout: Duration::from_secs(env_or(
                "AUTOMATION_DB_IDLE_TIMEOUT_SECS",
                defaults.idle_timeout.as_secs(),
            )),
            create_if_missing: env_or("AUTOMATION_DB_CREATE_IF_MISSING", defaults.create_if_missing),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring unparsable {}={}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

pub async fn create_pool(database_url: &str, config: &PoolConfig) -> RepositoryResult<PgPool> {
    if config.create_if_missing && !Postgres::database_exists(database_url).await? {
        Postgres::create_database(database_url).await?;
        info!("Created automation database");
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    info!(
        "Automation database pool ready (max {} connections, {}s acquire timeout)",
        config.max_connections,
        config.acquire_timeout.as_secs()
    );

    Ok(pool)
}

/// Apply the workflow, execution, step log and run history schema.
pub async fn migrate(pool: &PgPool) -> RepositoryResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Automation schema is up to date");
    Ok(())
}

pub async fn health_check(pool: &PgPool) -> bool {
    sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(pool)
        .await
        .is_ok()
}
