pub mod health;
pub mod tax;
pub mod transactions;

use crate::config::Config;
use crate::db::Repository;
use crate::orchestration::ReportRunner;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub runner: Arc<ReportRunner>,
    pub config: Config,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, runner: Arc<ReportRunner>, config: Config) -> Self {
        Self {
            repo,
            runner,
            config,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route(
            "/v1/transactions",
            get(transactions::list_transactions).post(transactions::import_transactions),
        )
        .route("/v1/tax/report", get(tax::get_report))
        .route("/v1/tax/summary", get(tax::get_summary))
        .route("/v1/tax/law", get(tax::get_law))
        .layer(cors)
        .with_state(state)
}
