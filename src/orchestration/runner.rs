use crate::db::Repository;
use crate::engine::{
    compute_tax_year, lookup_requests, normalize, EngineError, LotMatchingMethod,
    ProcessorOptions, TransferPolicy,
};
use crate::orchestration::prices::PriceResolver;
use crate::report::{export, TaxReport};
use crate::tax::{TaxError, TaxLawTable, TaxYearSummary};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Tax(#[from] TaxError),

    /// The ledger produced values outside the decimal range.
    #[error(transparent)]
    Engine(EngineError),

    #[error("report run {0} was superseded by a newer run")]
    Cancelled(Uuid),

    #[error("report worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A finished run: the exact summary and its rounded export.
#[derive(Debug, Clone)]
pub struct ReportOutcome {
    pub run_id: Uuid,
    pub summary: TaxYearSummary,
    pub report: TaxReport,
}

/// Runs tax reports on demand against a ledger snapshot.
///
/// At most one run is live: starting a run cancels the one in flight.
pub struct ReportRunner {
    repo: Arc<Repository>,
    resolver: PriceResolver,
    law: Arc<TaxLawTable>,
    transfer_policy: TransferPolicy,
    parallel: bool,
    current: Mutex<Option<(Uuid, CancellationToken)>>,
}

impl ReportRunner {
    pub fn new(
        repo: Arc<Repository>,
        resolver: PriceResolver,
        law: Arc<TaxLawTable>,
        transfer_policy: TransferPolicy,
        parallel: bool,
    ) -> Self {
        Self {
            repo,
            resolver,
            law,
            transfer_policy,
            parallel,
            current: Mutex::new(None),
        }
    }

    pub fn law(&self) -> &TaxLawTable {
        &self.law
    }

    pub async fn run(
        &self,
        year: i32,
        method: LotMatchingMethod,
    ) -> Result<ReportOutcome, ReportError> {
        let run_id = Uuid::new_v4();
        let token = self.begin(run_id).await;
        info!(%run_id, year, %method, "Starting report run");

        let result = self.execute(run_id, &token, year, method).await;
        self.finish(run_id).await;

        match &result {
            Ok(outcome) => info!(
                %run_id,
                disposals = outcome.summary.disposals.len(),
                estimated_tax = %outcome.summary.estimated_tax,
                "Report run finished"
            ),
            Err(ReportError::Cancelled(_)) => info!(%run_id, "Report run cancelled"),
            Err(e) => warn!(%run_id, error = %e, "Report run failed"),
        }
        result
    }

    /// Cancel the in-flight run, if any.
    pub async fn cancel_current(&self) -> bool {
        match self.current.lock().await.take() {
            Some((previous, token)) => {
                token.cancel();
                info!(run_id = %previous, "Cancelled in-flight report run");
                true
            }
            None => false,
        }
    }

    async fn begin(&self, run_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        let mut current = self.current.lock().await;
        if let Some((previous, old)) = current.replace((run_id, token.clone())) {
            old.cancel();
            info!(run_id = %previous, superseded_by = %run_id, "Cancelled previous report run");
        }
        token
    }

    async fn finish(&self, run_id: Uuid) {
        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|(id, _)| *id == run_id) {
            *current = None;
        }
    }

    async fn execute(
        &self,
        run_id: Uuid,
        token: &CancellationToken,
        year: i32,
        method: LotMatchingMethod,
    ) -> Result<ReportOutcome, ReportError> {
        self.law.parameters(year)?;

        let records = self.repo.query_all_records().await?;
        let records_read = records.len();
        let ledger = normalize(&records);
        let requests = lookup_requests(&ledger.entries);

        let book = tokio::select! {
            _ = token.cancelled() => return Err(ReportError::Cancelled(run_id)),
            book = self.resolver.resolve(&requests) => book?,
        };

        let options = ProcessorOptions::new(method).with_transfer_policy(self.transfer_policy);
        let law = self.law.clone();
        let parallel = self.parallel;
        let worker_token = token.clone();
        let summary = tokio::task::spawn_blocking(move || {
            compute_tax_year(
                &ledger,
                year,
                options,
                &law,
                &book,
                parallel,
                Some(&worker_token),
            )
        })
        .await?
        .map_err(|e| match e {
            EngineError::Cancelled => ReportError::Cancelled(run_id),
            EngineError::Tax(e) => ReportError::Tax(e),
            e @ EngineError::ArithmeticOverflow { .. } => ReportError::Engine(e),
        })?;

        let report = export(&summary, &self.law, records_read);
        Ok(ReportOutcome {
            run_id,
            summary,
            report,
        })
    }
}
