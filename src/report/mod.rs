//! Rounded, export-ready view of a tax-year summary.
//!
//! The engine keeps every figure exact; rounding to the reporting currency's display
//! scale happens here and nowhere else.

use crate::domain::{Asset, Currency, Decimal, SourceId, Timestamp, TransactionId};
use crate::engine::{Diagnostic, DisposalKind, DisposalResult, LotMatchingMethod};
use crate::tax::{TaxLawTable, TaxYearSummary};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub year: i32,
    pub method: LotMatchingMethod,
    pub jurisdiction: String,
    pub law_version: String,
    pub currency: Currency,
    /// Ledger records read for the run, before validation.
    pub generated_from: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTotals {
    pub total_gains: Decimal,
    pub total_losses: Decimal,
    pub net_gains: Decimal,
    pub deduction: Decimal,
    pub flat_rate_percent: Decimal,
    pub taxable_gains: Decimal,
    pub estimated_tax: Decimal,
}

/// One lot slice of a disposal, or its unmatched residual (no lot, zero cost).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportLine {
    pub transaction_id: TransactionId,
    pub asset: Asset,
    pub kind: DisposalKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lot_source_id: Option<SourceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lot_id: Option<TransactionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquired_at: Option<Timestamp>,
    pub disposed_at: Timestamp,
    pub quantity: Decimal,
    pub proceeds: Decimal,
    pub cost: Decimal,
    pub fee: Decimal,
    pub gain: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxReport {
    pub metadata: ReportMetadata,
    pub totals: ReportTotals,
    pub lines: Vec<ReportLine>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Build the export view of `summary`.
pub fn export(summary: &TaxYearSummary, law: &TaxLawTable, records_read: usize) -> TaxReport {
    let currency = summary.currency;
    let round = |v: Decimal| v.round_dp(currency.display_scale());

    let lines = summary
        .disposals
        .iter()
        .flat_map(|d| disposal_lines(d, currency))
        .collect();

    TaxReport {
        metadata: ReportMetadata {
            year: summary.year,
            method: summary.method,
            jurisdiction: law.jurisdiction.clone(),
            law_version: law.version.clone(),
            currency,
            generated_from: records_read,
        },
        totals: ReportTotals {
            total_gains: round(summary.total_gains),
            total_losses: round(summary.total_losses),
            net_gains: round(summary.net_gains),
            deduction: round(summary.deduction),
            flat_rate_percent: summary.flat_rate_percent,
            taxable_gains: round(summary.taxable_gains),
            estimated_tax: round(summary.estimated_tax),
        },
        lines,
        diagnostics: summary.diagnostics.clone(),
    }
}

/// Split a disposal into per-lot lines; proceeds and fee are shared pro rata by quantity.
fn disposal_lines(disposal: &DisposalResult, currency: Currency) -> Vec<ReportLine> {
    let scale = currency.display_scale();
    let proceeds = disposal.proceeds.get(currency);
    let fee = disposal.fee.get(currency);
    // Exact product first; the ratio form only when the product leaves the decimal range.
    let share = |total: Decimal, qty: Decimal| {
        total
            .checked_mul(qty)
            .and_then(|v| v.checked_div(disposal.quantity))
            .or_else(|| {
                qty.checked_div(disposal.quantity)
                    .and_then(|ratio| total.checked_mul(ratio))
            })
            .unwrap_or_default()
    };

    let line = |lot: Option<(SourceId, TransactionId)>,
                acquired_at: Option<Timestamp>,
                qty: Decimal,
                cost: Decimal| {
        let (lot_source_id, lot_id) = lot.unzip();
        let proceeds_share = share(proceeds, qty);
        let fee_share = share(fee, qty);
        ReportLine {
            transaction_id: disposal.transaction_id.clone(),
            asset: disposal.asset.clone(),
            kind: disposal.kind,
            lot_source_id,
            lot_id,
            acquired_at,
            disposed_at: disposal.timestamp,
            quantity: qty,
            proceeds: proceeds_share.round_dp(scale),
            cost: cost.round_dp(scale),
            fee: fee_share.round_dp(scale),
            gain: (proceeds_share - cost - fee_share).round_dp(scale),
        }
    };

    let mut lines: Vec<ReportLine> = disposal
        .lots_consumed
        .iter()
        .map(|c| {
            line(
                Some((c.lot_source_id.clone(), c.lot_id.clone())),
                Some(c.acquired_at),
                c.quantity_taken,
                c.cost().unwrap_or_default().get(currency),
            )
        })
        .collect();
    if disposal.unmatched_quantity.is_positive() {
        lines.push(line(
            None,
            None,
            disposal.unmatched_quantity,
            Decimal::zero(),
        ));
    }
    lines
}
