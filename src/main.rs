use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use taxlot::{
    api, init_db, Config, HttpPriceSource, PriceResolver, PriceSource, ReportRunner, Repository,
    StaticPriceSource,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .init();

    let config = Config::from_env().context("configuration error")?;
    let law = Arc::new(config.load_law_table().context("tax law table")?);
    info!(
        jurisdiction = %law.jurisdiction,
        version = %law.version,
        currency = %law.currency,
        years = law.years.len(),
        "Loaded tax law table"
    );

    let pool = init_db(&config.database_path)
        .await
        .with_context(|| format!("failed to initialize database at {}", config.database_path))?;
    let repo = Arc::new(Repository::new(pool));

    let source: Arc<dyn PriceSource> = match &config.price_api_url {
        Some(url) => {
            info!(url = %url, "Using HTTP price feed");
            Arc::new(HttpPriceSource::new(url.clone()))
        }
        None => {
            info!("No PRICE_API_URL set, price lookups will find nothing");
            Arc::new(StaticPriceSource::new())
        }
    };
    let resolver = PriceResolver::new(source, repo.clone(), config.price_lookup_concurrency);
    let runner = Arc::new(ReportRunner::new(
        repo.clone(),
        resolver,
        law,
        config.transfer_policy,
        config.parallel_assets,
    ));

    let port = config.port;
    let app = api::create_router(api::AppState::new(repo, runner, config));

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    info!("Server listening on {}", addr);
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
