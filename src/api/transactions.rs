use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use tracing::info;

use crate::api::AppState;
use crate::db::ImportSummary;
use crate::domain::{Asset, SourceId, TransactionRecord};
use crate::error::AppError;

/// Largest batch accepted by a single import.
const MAX_IMPORT_BATCH: usize = 10_000;

pub async fn import_transactions(
    State(state): State<AppState>,
    body: Result<Json<Vec<TransactionRecord>>, JsonRejection>,
) -> Result<Json<ImportSummary>, AppError> {
    let Json(records) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;
    if records.len() > MAX_IMPORT_BATCH {
        return Err(AppError::BadRequest(format!(
            "batch of {} exceeds the limit of {}",
            records.len(),
            MAX_IMPORT_BATCH
        )));
    }

    let summary = state.repo.insert_records_batch(&records).await?;
    info!(
        received = summary.received,
        inserted = summary.inserted,
        conflicts = summary.conflicts,
        "Imported transactions"
    );
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsQuery {
    pub asset: Option<String>,
    pub source_id: Option<String>,
}

/// Ledger snapshot in processing order, optionally narrowed by asset or source.
pub async fn list_transactions(
    State(state): State<AppState>,
    query: Result<Query<TransactionsQuery>, QueryRejection>,
) -> Result<Json<Vec<TransactionRecord>>, AppError> {
    let Query(params) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let asset = params
        .asset
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Asset::new);
    let source_id = params
        .source_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(SourceId::new);

    let records = state
        .repo
        .query_all_records()
        .await?
        .into_iter()
        .filter(|r| asset.as_ref().map_or(true, |a| &r.asset == a))
        .filter(|r| source_id.as_ref().map_or(true, |s| &r.source_id == s))
        .collect();
    Ok(Json(records))
}
