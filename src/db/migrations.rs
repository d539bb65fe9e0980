//! Ledger database setup.

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Bumped whenever `schema.sql` changes shape.
const SCHEMA_VERSION: i64 = 1;

/// Open (creating if needed) the ledger database and bring its schema up to date.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!(path = %db_path, schema_version = SCHEMA_VERSION, "Ledger database ready");
    Ok(pool)
}

async fn schema_version(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    Ok(version)
}

/// Apply `schema.sql` in one transaction when the stored version is behind.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let current = schema_version(pool).await?;
    if current >= SCHEMA_VERSION {
        debug!(current, "Schema up to date");
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    let statements = include_str!("schema.sql")
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty());
    for statement in statements {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    // PRAGMA does not take bind parameters.
    sqlx::query(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(from = current, to = SCHEMA_VERSION, "Applied ledger schema");
    Ok(())
}
