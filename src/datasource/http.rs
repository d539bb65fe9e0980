//! HTTP price feed client.

use super::{PriceSource, PriceSourceError};
use crate::domain::{Asset, Decimal, PriceQuote, Timestamp};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Price feed speaking a small JSON API:
///
/// - `GET {base}/v1/prices?asset=BTC&at=<rfc3339>` → `{"usd": "...", "krw": "..."}`
/// - `GET {base}/v1/fx/usd-krw?at=<rfc3339>` → `{"rate": "..."}`
///
/// A 404 means "no data for that instant".
#[derive(Debug, Clone)]
pub struct HttpPriceSource {
    client: Client,
    base_url: String,
    max_elapsed: Duration,
}

impl HttpPriceSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_elapsed: Duration::from_secs(30),
        }
    }

    /// Cap on total retry time per request.
    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<serde_json::Value>, PriceSourceError> {
        let url = format!("{}{}", self.base_url, path);
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self
                .client
                .get(&url)
                .query(query)
                .send()
                .await
                .map_err(|e| {
                    backoff::Error::transient(PriceSourceError::NetworkError(e.to_string()))
                })?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(backoff::Error::transient(PriceSourceError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(PriceSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(PriceSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map(Some)
                .map_err(|e| backoff::Error::permanent(PriceSourceError::ParseError(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    async fn fetch_price(
        &self,
        asset: &Asset,
        at: Timestamp,
    ) -> Result<Option<PriceQuote>, PriceSourceError> {
        debug!(asset = %asset, at = %at, "Fetching price");
        let query = [
            ("asset", asset.as_str().to_string()),
            ("at", at.to_rfc3339_nanos()),
        ];
        match self.get_json("/v1/prices", &query).await? {
            Some(body) => parse_quote(&body).map(|q| Some(q).filter(|q| !q.is_empty())),
            None => Ok(None),
        }
    }

    async fn fetch_usd_krw_rate(&self, at: Timestamp) -> Result<Option<Decimal>, PriceSourceError> {
        debug!(at = %at, "Fetching USD/KRW rate");
        let query = [("at", at.to_rfc3339_nanos())];
        match self.get_json("/v1/fx/usd-krw", &query).await? {
            Some(body) => parse_decimal_field(&body, "rate"),
            None => Ok(None),
        }
    }
}

fn parse_quote(body: &serde_json::Value) -> Result<PriceQuote, PriceSourceError> {
    Ok(PriceQuote::new(
        parse_decimal_field(body, "usd")?,
        parse_decimal_field(body, "krw")?,
    ))
}

/// Reads a decimal given either as a JSON string or a number; null/absent is `None`.
fn parse_decimal_field(
    body: &serde_json::Value,
    field: &str,
) -> Result<Option<Decimal>, PriceSourceError> {
    let raw = match body.get(field) {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(other) => {
            return Err(PriceSourceError::ParseError(format!(
                "Invalid {} field: {}",
                field, other
            )))
        }
    };
    let value = Decimal::from_str_canonical(&raw)
        .map_err(|e| PriceSourceError::ParseError(format!("Invalid {}: {}", field, e)))?;
    if value.is_negative() {
        return Err(PriceSourceError::ParseError(format!(
            "Negative {}: {}",
            field, value
        )));
    }
    Ok(Some(value))
}
