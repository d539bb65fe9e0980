//! In-memory price source for tests and for running without a price feed.

use super::{PriceSource, PriceSourceError};
use crate::domain::{Asset, Decimal, PriceQuote, Timestamp};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Price source that answers from predefined data. Empty by default.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceSource {
    prices: HashMap<(Asset, Timestamp), PriceQuote>,
    rates: HashMap<Timestamp, Decimal>,
    requests: Arc<AtomicUsize>,
}

impl StaticPriceSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, asset: Asset, at: Timestamp, quote: PriceQuote) -> Self {
        self.prices.insert((asset, at), quote);
        self
    }

    pub fn with_rate(mut self, at: Timestamp, krw_per_usd: Decimal) -> Self {
        self.rates.insert(at, krw_per_usd);
        self
    }

    /// Number of fetches served so far, hits and misses alike.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PriceSource for StaticPriceSource {
    async fn fetch_price(
        &self,
        asset: &Asset,
        at: Timestamp,
    ) -> Result<Option<PriceQuote>, PriceSourceError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        Ok(self.prices.get(&(asset.clone(), at)).copied())
    }

    async fn fetch_usd_krw_rate(&self, at: Timestamp) -> Result<Option<Decimal>, PriceSourceError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        Ok(self.rates.get(&at).copied())
    }
}
