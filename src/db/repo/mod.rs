//! Repository layer for database operations.
//!
//! Methods are organized across submodules by domain:
//! - `transactions.rs` - Ledger record import and snapshot reads
//! - `prices.rs` - Price and FX rate cache

mod prices;
mod transactions;

use crate::domain::Decimal;
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use tracing::warn;

/// Outcome of a batch import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub received: usize,
    pub inserted: usize,
    /// Already stored with identical content.
    pub duplicates: usize,
    /// Already stored under the same `(source_id, id)` with different content; not updated.
    pub conflicts: usize,
}

/// Repository for database operations.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Connectivity check used by `/ready`.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn parse_decimal_column(column: &str, raw: &str) -> Option<Decimal> {
    match Decimal::from_str_canonical(raw) {
        Ok(d) => Some(d),
        Err(e) => {
            warn!(column, value = raw, error = %e, "Unparseable decimal in database");
            None
        }
    }
}
