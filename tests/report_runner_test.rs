use std::str::FromStr;
use std::sync::Arc;
use taxlot::datasource::StaticPriceSource;
use taxlot::db::init_db;
use taxlot::domain::{
    Asset, Currency, Decimal, PriceQuote, SourceId, Timestamp, TransactionId, TransactionKind,
    TransactionRecord,
};
use taxlot::engine::{Issue, LotMatchingMethod, TransferPolicy};
use taxlot::orchestration::{PriceResolver, ReportError, ReportRunner};
use taxlot::tax::TaxLawTable;
use taxlot::Repository;
use tempfile::TempDir;

struct Harness {
    repo: Arc<Repository>,
    runner: ReportRunner,
    source: StaticPriceSource,
    _temp: TempDir,
}

async fn setup(source: StaticPriceSource, parallel: bool) -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    let resolver = PriceResolver::new(Arc::new(source.clone()), repo.clone(), 2);
    let law = Arc::new(TaxLawTable::embedded_default().unwrap());
    let runner = ReportRunner::new(repo.clone(), resolver, law, TransferPolicy::Taxable, parallel);
    Harness {
        repo,
        runner,
        source,
        _temp: temp_dir,
    }
}

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn ts(s: &str) -> Timestamp {
    Timestamp::parse_rfc3339(s).unwrap()
}

fn record(
    id: &str,
    asset: &str,
    kind: TransactionKind,
    amount: &str,
    at: &str,
) -> TransactionRecord {
    TransactionRecord::new(
        TransactionId::new(id),
        SourceId::new("upbit"),
        Asset::new(asset),
        kind,
        d(amount),
        ts(at),
    )
}

fn ledger() -> Vec<TransactionRecord> {
    vec![
        record("b1", "BTC", TransactionKind::Buy, "1", "2024-01-10T00:00:00Z")
            .with_price_krw(d("50000000"))
            .with_price_usd(d("38000")),
        record("r1", "ETH", TransactionKind::Reward, "2", "2024-02-01T00:00:00Z"),
        record("s1", "BTC", TransactionKind::Sell, "0.5", "2024-06-01T00:00:00Z")
            .with_price_krw(d("90000000"))
            .with_price_usd(d("66000"))
            .with_fee(d("10000"), Asset::new("KRW")),
        record("s2", "ETH", TransactionKind::Sell, "2", "2024-07-01T00:00:00Z")
            .with_price_krw(d("5000000")),
    ]
}

#[tokio::test]
async fn test_run_resolves_prices_and_reports() {
    let source = StaticPriceSource::new()
        .with_price(
            Asset::new("ETH"),
            ts("2024-02-01T00:00:00Z"),
            PriceQuote::new(Some(d("2300")), Some(d("3000000"))),
        )
        .with_rate(ts("2024-06-01T00:00:00Z"), d("1375"))
        .with_rate(ts("2024-07-01T00:00:00Z"), d("1380"));
    let h = setup(source, true).await;
    h.repo.insert_records_batch(&ledger()).await.unwrap();

    let outcome = tokio_test::assert_ok!(h.runner.run(2024, LotMatchingMethod::Fifo).await);
    let summary = &outcome.summary;
    assert_eq!(summary.currency, Currency::Krw);
    assert_eq!(summary.disposals.len(), 2);

    // BTC: 45,000,000 - 25,000,000 - 10,000 fee
    assert_eq!(summary.disposals[0].gain_loss.krw, d("19990000"));
    // ETH: 10,000,000 - 6,000,000
    assert_eq!(summary.disposals[1].gain_loss.krw, d("4000000"));
    assert_eq!(summary.net_gains, d("23990000"));
    assert_eq!(summary.taxable_gains, d("21490000"));
    assert_eq!(summary.estimated_tax, d("4727800"));
    assert!(summary.diagnostics.is_empty());

    assert_eq!(outcome.report.metadata.generated_from, 4);
    assert_eq!(outcome.report.lines.len(), 2);
}

#[tokio::test]
async fn test_missing_prices_degrade_to_warnings() {
    let h = setup(StaticPriceSource::new(), false).await;
    h.repo.insert_records_batch(&ledger()).await.unwrap();

    let outcome = h.runner.run(2024, LotMatchingMethod::Fifo).await.unwrap();
    let summary = &outcome.summary;
    // ETH reward has zero basis, so its sale is all gain.
    assert_eq!(summary.disposals[1].gain_loss.krw, d("10000000"));
    assert!(summary.diagnostics.iter().any(|diag| matches!(
        &diag.issue,
        Issue::PriceUnavailable { asset, .. } if asset.as_str() == "ETH"
    )));
    assert!(h.source.requests() > 0);
}

#[tokio::test]
async fn test_second_run_uses_price_cache() {
    let source = StaticPriceSource::new().with_price(
        Asset::new("ETH"),
        ts("2024-02-01T00:00:00Z"),
        PriceQuote::new(Some(d("2300")), Some(d("3000000"))),
    );
    let h = setup(source, true).await;
    h.repo.insert_records_batch(&ledger()).await.unwrap();

    let first = h.runner.run(2024, LotMatchingMethod::Hifo).await.unwrap();
    let after_first = h.source.requests();
    let second = h.runner.run(2024, LotMatchingMethod::Hifo).await.unwrap();

    // Only the misses (FX rates here) are asked again.
    assert!(h.source.requests() - after_first < after_first);
    assert_eq!(
        serde_json::to_string(&first.summary).unwrap(),
        serde_json::to_string(&second.summary).unwrap()
    );
}

#[tokio::test]
async fn test_unknown_year() {
    let h = setup(StaticPriceSource::new(), true).await;
    let err = tokio_test::assert_err!(h.runner.run(2019, LotMatchingMethod::Lifo).await);
    assert!(matches!(err, ReportError::Tax(_)));
}

#[tokio::test]
async fn test_concurrent_runs_supersede() {
    let h = setup(StaticPriceSource::new(), true).await;
    h.repo.insert_records_batch(&ledger()).await.unwrap();

    let runner = Arc::new(h.runner);
    let a = {
        let runner = runner.clone();
        tokio::spawn(async move { runner.run(2024, LotMatchingMethod::Fifo).await })
    };
    let b = {
        let runner = runner.clone();
        tokio::spawn(async move { runner.run(2024, LotMatchingMethod::Lifo).await })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    // The later run always completes; an earlier one may be cancelled.
    let outcomes = [a, b];
    assert!(outcomes.iter().any(|r| r.is_ok()));
    for result in &outcomes {
        if let Err(e) = result {
            assert!(matches!(e, ReportError::Cancelled(_)));
        }
    }
}
