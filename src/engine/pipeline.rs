//! End-to-end engine run for one tax year.

use super::normalizer::{normalize, NormalizedLedger};
use super::pricing::PriceLookup;
use super::processor::{process, process_sharded, ProcessOutput, ProcessorOptions};
use super::{Diagnostic, EngineError};
use crate::domain::TransactionRecord;
use crate::tax::{aggregate, TaxLawTable, TaxYearSummary};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Process the full ledger history and summarize `year`.
///
/// The law table is checked before any processing so a missing year fails fast.
/// Diagnostics list every rejected record first, then the year's warnings in entry
/// order.
pub fn compute_tax_year(
    ledger: &NormalizedLedger,
    year: i32,
    options: ProcessorOptions,
    law: &TaxLawTable,
    prices: &dyn PriceLookup,
    parallel: bool,
    cancel: Option<&CancellationToken>,
) -> Result<TaxYearSummary, EngineError> {
    law.parameters(year)?;
    let options = options.with_currency(law.currency);

    let output: ProcessOutput = if parallel {
        process_sharded(&ledger.entries, options, prices, cancel)?
    } else {
        process(&ledger.entries, options, prices, cancel)?
    };

    let mut summary = aggregate(&output.disposals, year, options.method, law)?;

    let offset = law.offset();
    let mut diagnostics: Vec<Diagnostic> =
        ledger.rejected.iter().map(Diagnostic::for_rejected).collect();
    diagnostics.extend(
        output
            .diagnostics
            .into_iter()
            .filter(|d| d.timestamp.year_at(offset) == year),
    );
    summary.diagnostics = diagnostics;

    info!(
        year,
        method = %options.method,
        disposals = summary.disposals.len(),
        diagnostics = summary.diagnostics.len(),
        net_gains = %summary.net_gains,
        "Computed tax year"
    );
    Ok(summary)
}

/// Normalize `records`, then [`compute_tax_year`] sequentially.
pub fn compute_tax_year_from_records(
    records: &[TransactionRecord],
    year: i32,
    options: ProcessorOptions,
    law: &TaxLawTable,
    prices: &dyn PriceLookup,
) -> Result<TaxYearSummary, EngineError> {
    let ledger = normalize(records);
    compute_tax_year(&ledger, year, options, law, prices, false, None)
}
