use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::str::FromStr;

use crate::api::AppState;
use crate::engine::LotMatchingMethod;
use crate::error::AppError;
use crate::report::TaxReport;
use crate::tax::{TaxLawTable, TaxYearSummary};

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub year: Option<i32>,
    pub method: Option<String>,
}

impl ReportQuery {
    fn resolve(
        &self,
        default_method: LotMatchingMethod,
    ) -> Result<(i32, LotMatchingMethod), AppError> {
        let year = self
            .year
            .ok_or_else(|| AppError::BadRequest("year is required".to_string()))?;
        let method = match self.method.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(raw) => LotMatchingMethod::from_str(raw)
                .map_err(|msg| AppError::BadRequest(format!("Invalid method: {}", msg)))?,
            None => default_method,
        };
        Ok((year, method))
    }
}

/// Rounded tax report for a year.
pub async fn get_report(
    State(state): State<AppState>,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> Result<Json<TaxReport>, AppError> {
    let Query(params) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let (year, method) = params.resolve(state.config.default_lot_method)?;
    let outcome = state.runner.run(year, method).await?;
    Ok(Json(outcome.report))
}

/// Exact, unrounded summary with the full per-disposal audit trail.
pub async fn get_summary(
    State(state): State<AppState>,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> Result<Json<TaxYearSummary>, AppError> {
    let Query(params) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let (year, method) = params.resolve(state.config.default_lot_method)?;
    let outcome = state.runner.run(year, method).await?;
    Ok(Json(outcome.summary))
}

pub async fn get_law(State(state): State<AppState>) -> Json<TaxLawTable> {
    Json(state.runner.law().clone())
}
