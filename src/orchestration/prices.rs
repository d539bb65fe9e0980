use crate::datasource::PriceSource;
use crate::db::Repository;
use crate::domain::{Asset, Timestamp};
use crate::engine::{PriceBook, PriceRequests};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds the price snapshot for an engine run: cache first, then the price source.
///
/// Source failures and misses leave the price absent; the engine then records
/// `PriceUnavailable` for the affected values.
#[derive(Clone)]
pub struct PriceResolver {
    source: Arc<dyn PriceSource>,
    repo: Arc<Repository>,
    concurrency: usize,
}

impl PriceResolver {
    pub fn new(source: Arc<dyn PriceSource>, repo: Arc<Repository>, concurrency: usize) -> Self {
        Self {
            source,
            repo,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn resolve(&self, requests: &PriceRequests) -> Result<PriceBook, sqlx::Error> {
        let mut book = PriceBook::new();
        if requests.is_empty() {
            return Ok(book);
        }

        let mut missing_prices: Vec<(Asset, Timestamp)> = Vec::new();
        for (asset, at) in &requests.prices {
            match self.repo.get_cached_price(asset, *at).await? {
                Some(quote) => book.insert_price(asset.clone(), *at, quote),
                None => missing_prices.push((asset.clone(), *at)),
            }
        }
        let mut missing_rates: Vec<Timestamp> = Vec::new();
        for at in &requests.rates {
            match self.repo.get_cached_rate(*at).await? {
                Some(rate) => book.insert_rate(*at, rate),
                None => missing_rates.push(*at),
            }
        }

        let cached = book.price_count() + book.rate_count();
        debug!(
            cached,
            missing_prices = missing_prices.len(),
            missing_rates = missing_rates.len(),
            "Price cache lookup"
        );

        let fetched_prices: Vec<_> = stream::iter(missing_prices)
            .map(|(asset, at)| {
                let source = self.source.clone();
                async move {
                    let result = source.fetch_price(&asset, at).await;
                    (asset, at, result)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut misses = 0usize;
        for (asset, at, result) in fetched_prices {
            match result {
                Ok(Some(quote)) => {
                    self.repo.put_cached_price(&asset, at, quote).await?;
                    book.insert_price(asset, at, quote);
                }
                Ok(None) => misses += 1,
                Err(e) => {
                    misses += 1;
                    warn!(asset = %asset, at = %at, error = %e, "Price fetch failed");
                }
            }
        }

        let fetched_rates: Vec<_> = stream::iter(missing_rates)
            .map(|at| {
                let source = self.source.clone();
                async move { (at, source.fetch_usd_krw_rate(at).await) }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (at, result) in fetched_rates {
            match result {
                Ok(Some(rate)) => {
                    self.repo.put_cached_rate(at, rate).await?;
                    book.insert_rate(at, rate);
                }
                Ok(None) => misses += 1,
                Err(e) => {
                    misses += 1;
                    warn!(at = %at, error = %e, "USD/KRW rate fetch failed");
                }
            }
        }

        info!(
            prices = book.price_count(),
            rates = book.rate_count(),
            misses,
            "Resolved prices"
        );
        Ok(book)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::StaticPriceSource;
    use crate::db::init_db;
    use crate::domain::{Decimal, PriceQuote};
    use crate::engine::PriceLookup;
    use tempfile::TempDir;

    async fn setup_repo() -> (Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db").to_string_lossy().to_string();
        let pool = init_db(&db_path).await.unwrap();
        (Arc::new(Repository::new(pool)), temp_dir)
    }

    #[tokio::test]
    async fn test_resolve_fetches_then_serves_from_cache() {
        let (repo, _dir) = setup_repo().await;
        let at = Timestamp::parse_rfc3339("2024-02-02T00:00:00Z").unwrap();
        let sol = Asset::new("SOL");
        let source = StaticPriceSource::new()
            .with_price(sol.clone(), at, PriceQuote::usd(Decimal::from(100)))
            .with_rate(at, Decimal::from(1300));
        let counter = source.clone();

        let mut requests = PriceRequests::default();
        requests.prices.insert((sol.clone(), at));
        requests.prices.insert((Asset::new("NOPE"), at));
        requests.rates.insert(at);

        let resolver = PriceResolver::new(Arc::new(source), repo, 2);
        let book = resolver.resolve(&requests).await.unwrap();
        assert_eq!(book.price(&sol, at), Some(PriceQuote::usd(Decimal::from(100))));
        assert_eq!(book.usd_krw_rate(at), Some(Decimal::from(1300)));
        assert_eq!(counter.requests(), 3);

        // Hits are cached; only the miss is asked again.
        let again = resolver.resolve(&requests).await.unwrap();
        assert_eq!(again, book);
        assert_eq!(counter.requests(), 4);
    }

    #[tokio::test]
    async fn test_empty_requests_skip_everything() {
        let (repo, _dir) = setup_repo().await;
        let source = StaticPriceSource::new();
        let counter = source.clone();
        let resolver = PriceResolver::new(Arc::new(source), repo, 4);
        let book = resolver.resolve(&PriceRequests::default()).await.unwrap();
        assert_eq!(book, PriceBook::new());
        assert_eq!(counter.requests(), 0);
    }
}
