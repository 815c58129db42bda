use std::str::FromStr;
use std::time::Duration;

use helpline_core::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tracing::{info, warn};

use crate::migrations;

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)))
        .connect_with(options)
        .await
}

/// Opens and migrates the primary store. Returns `None` when no primary is
/// configured or it cannot be reached; callers then run on the file fallback.
pub async fn connect_primary(config: &DatabaseConfig) -> Option<DbPool> {
    let url = config.url.as_deref()?;

    let pool = match connect_with_settings(url, config.max_connections, config.timeout_secs).await
    {
        Ok(pool) => pool,
        Err(error) => {
            warn!(
                event_name = "system.db.primary_unavailable",
                correlation_id = "bootstrap",
                error = %error,
                "primary store unreachable; using file fallback"
            );
            return None;
        }
    };

    if let Err(error) = migrations::run_pending(&pool).await {
        warn!(
            event_name = "system.db.migration_failed",
            correlation_id = "bootstrap",
            error = %error,
            "primary store migrations failed; using file fallback"
        );
        pool.close().await;
        return None;
    }

    info!(
        event_name = "system.db.primary_connected",
        correlation_id = "bootstrap",
        max_connections = config.max_connections,
        "primary store connected"
    );
    Some(pool)
}
