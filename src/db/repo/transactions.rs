//! Ledger record import and snapshot reads.

use crate::domain::{
    Asset, Decimal, SourceId, Timestamp, TransactionId, TransactionKind, TransactionRecord,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, warn};

use super::{parse_decimal_column, ImportSummary, Repository};

impl Repository {
    /// Insert records in a single transaction, keyed by `(source_id, id)`.
    ///
    /// Existing keys are never overwritten. A repeat with a different fingerprint is
    /// counted as a conflict.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_records_batch(
        &self,
        records: &[TransactionRecord],
    ) -> Result<ImportSummary, sqlx::Error> {
        let mut summary = ImportSummary {
            received: records.len(),
            ..Default::default()
        };
        if records.is_empty() {
            return Ok(summary);
        }

        let created_at = chrono::Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        for record in records {
            let fingerprint = record.fingerprint();
            let result = sqlx::query(
                r#"
                INSERT INTO transactions (
                    source_id, id, asset, kind, amount, price_usd, price_krw,
                    fee, fee_asset, timestamp, counter_asset, counter_amount,
                    internal, fingerprint, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(source_id, id) DO NOTHING
                "#,
            )
            .bind(record.source_id.as_str())
            .bind(record.id.as_str())
            .bind(record.asset.as_str())
            .bind(record.kind.as_str())
            .bind(record.amount.to_canonical_string())
            .bind(record.price_usd.map(|d| d.to_canonical_string()))
            .bind(record.price_krw.map(|d| d.to_canonical_string()))
            .bind(record.fee.map(|d| d.to_canonical_string()))
            .bind(record.fee_asset.as_ref().map(|a| a.as_str().to_string()))
            .bind(record.timestamp.to_rfc3339_nanos())
            .bind(record.counter_asset.as_ref().map(|a| a.as_str().to_string()))
            .bind(record.counter_amount.map(|d| d.to_canonical_string()))
            .bind(record.internal)
            .bind(fingerprint.as_str())
            .bind(created_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                summary.inserted += 1;
                continue;
            }

            let existing: (String,) = sqlx::query_as(
                "SELECT fingerprint FROM transactions WHERE source_id = ? AND id = ?",
            )
            .bind(record.source_id.as_str())
            .bind(record.id.as_str())
            .fetch_one(&mut *tx)
            .await?;
            if existing.0 == fingerprint {
                summary.duplicates += 1;
            } else {
                warn!(
                    source = %record.source_id,
                    id = %record.id,
                    "Import conflicts with stored record, keeping stored copy"
                );
                summary.conflicts += 1;
            }
        }

        tx.commit().await?;
        debug!(
            received = summary.received,
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            conflicts = summary.conflicts,
            "Imported ledger batch"
        );
        Ok(summary)
    }

    /// Full ledger snapshot ordered by `(timestamp, source_id, id)`.
    ///
    /// Rows that no longer parse are skipped with a warning.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn query_all_records(&self) -> Result<Vec<TransactionRecord>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT source_id, id, asset, kind, amount, price_usd, price_krw,
                   fee, fee_asset, timestamp, counter_asset, counter_amount, internal
            FROM transactions
            ORDER BY timestamp ASC, source_id ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match record_from_row(&row) {
                Ok(record) => records.push(record),
                Err(reason) => {
                    let id: String = row.get("id");
                    let source: String = row.get("source_id");
                    warn!(
                        source = %source,
                        id = %id,
                        reason = %reason,
                        "Skipping unreadable ledger row"
                    );
                }
            }
        }
        Ok(records)
    }

    /// Number of stored records.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn count_records(&self) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn record_from_row(row: &SqliteRow) -> Result<TransactionRecord, String> {
    let required = |column: &str| -> Result<Decimal, String> {
        let raw: String = row.get(column);
        parse_decimal_column(column, &raw).ok_or_else(|| format!("invalid {}", column))
    };
    let optional = |column: &str| -> Result<Option<Decimal>, String> {
        match row.get::<Option<String>, _>(column) {
            Some(raw) => parse_decimal_column(column, &raw)
                .map(Some)
                .ok_or_else(|| format!("invalid {}", column)),
            None => Ok(None),
        }
    };

    let kind_raw: String = row.get("kind");
    let kind = TransactionKind::from_str(&kind_raw)?;
    let ts_raw: String = row.get("timestamp");
    let timestamp =
        Timestamp::parse_rfc3339(&ts_raw).map_err(|e| format!("invalid timestamp: {}", e))?;

    Ok(TransactionRecord {
        id: TransactionId::new(row.get::<String, _>("id")),
        source_id: SourceId::new(row.get::<String, _>("source_id")),
        asset: Asset::new(row.get::<String, _>("asset")),
        kind,
        amount: required("amount")?,
        price_usd: optional("price_usd")?,
        price_krw: optional("price_krw")?,
        fee: optional("fee")?,
        fee_asset: row.get::<Option<String>, _>("fee_asset").map(Asset::new),
        timestamp,
        counter_asset: row.get::<Option<String>, _>("counter_asset").map(Asset::new),
        counter_amount: optional("counter_amount")?,
        internal: row.get::<bool, _>("internal"),
    })
}
