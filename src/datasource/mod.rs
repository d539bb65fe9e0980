//! Historical price sources consulted before an engine run.

use crate::domain::{Asset, Decimal, PriceQuote, Timestamp};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

pub mod http;
pub mod memory;

pub use memory::StaticPriceSource;
pub use http::HttpPriceSource;

/// Source of historical unit prices and USD/KRW rates.
///
/// `Ok(None)` means the source has no data for the instant. Errors are for transport
/// and decoding problems; callers treat both as "absent".
#[async_trait]
pub trait PriceSource: Send + Sync + fmt::Debug {
    /// Unit price of `asset` at `at`.
    async fn fetch_price(
        &self,
        asset: &Asset,
        at: Timestamp,
    ) -> Result<Option<PriceQuote>, PriceSourceError>;

    /// KRW per 1 USD at `at`.
    async fn fetch_usd_krw_rate(&self, at: Timestamp) -> Result<Option<Decimal>, PriceSourceError>;
}

#[derive(Debug, Clone, Error)]
pub enum PriceSourceError {
    /// Connection timeout, DNS failure and the like.
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("HTTP error {status}: {message}")]
    HttpError { status: u16, message: String },

    /// Invalid JSON or a malformed price.
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Rate limited")]
    RateLimited,
}
