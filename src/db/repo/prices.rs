//! Price and FX rate cache.

use crate::domain::{Asset, Decimal, PriceQuote, Timestamp};
use sqlx::Row;

use super::{parse_decimal_column, Repository};

impl Repository {
    /// Cached unit price of `asset` at exactly `at`.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_cached_price(
        &self,
        asset: &Asset,
        at: Timestamp,
    ) -> Result<Option<PriceQuote>, sqlx::Error> {
        let row = sqlx::query("SELECT usd, krw FROM price_quotes WHERE asset = ? AND at = ?")
            .bind(asset.as_str())
            .bind(at.to_rfc3339_nanos())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row
            .map(|row| {
                let usd: Option<String> = row.get("usd");
                let krw: Option<String> = row.get("krw");
                PriceQuote::new(
                    usd.and_then(|v| parse_decimal_column("usd", &v)),
                    krw.and_then(|v| parse_decimal_column("krw", &v)),
                )
            })
            .filter(|q| !q.is_empty()))
    }

    /// Store a fetched price. A later fetch for the same key replaces it.
    ///
    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn put_cached_price(
        &self,
        asset: &Asset,
        at: Timestamp,
        quote: PriceQuote,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO price_quotes (asset, at, usd, krw, fetched_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(asset, at) DO UPDATE SET
                usd = excluded.usd,
                krw = excluded.krw,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(asset.as_str())
        .bind(at.to_rfc3339_nanos())
        .bind(quote.usd.map(|d| d.to_canonical_string()))
        .bind(quote.krw.map(|d| d.to_canonical_string()))
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Cached KRW per 1 USD at exactly `at`.
    ///
    /// # Errors
    /// Returns an error if the query fails.
    pub async fn get_cached_rate(&self, at: Timestamp) -> Result<Option<Decimal>, sqlx::Error> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT krw_per_usd FROM fx_rates WHERE at = ?")
                .bind(at.to_rfc3339_nanos())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(raw,)| parse_decimal_column("krw_per_usd", &raw)))
    }

    /// # Errors
    /// Returns an error if the insert fails.
    pub async fn put_cached_rate(
        &self,
        at: Timestamp,
        krw_per_usd: Decimal,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO fx_rates (at, krw_per_usd, fetched_at)
            VALUES (?, ?, ?)
            ON CONFLICT(at) DO UPDATE SET
                krw_per_usd = excluded.krw_per_usd,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(at.to_rfc3339_nanos())
        .bind(krw_per_usd.to_canonical_string())
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
