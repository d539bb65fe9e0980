use super::{TaxError, TaxLawTable};
use crate::domain::{Currency, Decimal};
use crate::engine::{Diagnostic, DisposalResult, LotMatchingMethod};
use serde::{Deserialize, Serialize};

/// Tax position for one year under one matching method.
///
/// All figures are exact and in the law table's reporting currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxYearSummary {
    pub year: i32,
    pub method: LotMatchingMethod,
    pub currency: Currency,
    pub total_gains: Decimal,
    pub total_losses: Decimal,
    pub net_gains: Decimal,
    pub deduction: Decimal,
    pub flat_rate_percent: Decimal,
    pub taxable_gains: Decimal,
    pub estimated_tax: Decimal,
    pub disposals: Vec<DisposalResult>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Sum the year's disposals into a summary.
///
/// Gains and losses are totalled separately, then netted. Disposals outside `year`
/// (in the table's offset) are ignored.
pub fn aggregate(
    disposals: &[DisposalResult],
    year: i32,
    method: LotMatchingMethod,
    law: &TaxLawTable,
) -> Result<TaxYearSummary, TaxError> {
    let params = law.parameters(year)?;
    let offset = law.offset();
    let currency = law.currency;

    let in_year: Vec<DisposalResult> = disposals
        .iter()
        .filter(|d| d.timestamp.year_at(offset) == year)
        .cloned()
        .collect();

    let overflow = || TaxError::ArithmeticOverflow { year };
    let mut total_gains = Decimal::zero();
    let mut total_losses = Decimal::zero();
    for disposal in &in_year {
        let gain = disposal.gain_loss.get(currency);
        let total = if gain.is_positive() {
            &mut total_gains
        } else {
            &mut total_losses
        };
        *total = total.checked_add(gain.abs()).ok_or_else(overflow)?;
    }

    let net_gains = total_gains.checked_sub(total_losses).ok_or_else(overflow)?;
    let taxable_gains = net_gains
        .checked_sub(params.deduction_amount)
        .ok_or_else(overflow)?
        .clamp_non_negative();
    let estimated_tax = taxable_gains
        .checked_mul(params.flat_rate_percent)
        .and_then(|t| t.checked_div(Decimal::hundred()))
        .ok_or_else(overflow)?;

    Ok(TaxYearSummary {
        year,
        method,
        currency,
        total_gains,
        total_losses,
        net_gains,
        deduction: params.deduction_amount,
        flat_rate_percent: params.flat_rate_percent,
        taxable_gains,
        estimated_tax,
        disposals: in_year,
        diagnostics: Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Asset, Money, SourceId, Timestamp, TransactionId};
    use crate::engine::DisposalKind;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn disposal(id: &str, at: &str, gain_krw: &str) -> DisposalResult {
        DisposalResult {
            seq: 0,
            transaction_id: TransactionId::new(id),
            source_id: SourceId::new("upbit"),
            asset: Asset::new("BTC"),
            kind: DisposalKind::Sell,
            quantity: d("1"),
            proceeds: Money::zero(),
            cost_basis_consumed: Money::zero(),
            fee: Money::zero(),
            gain_loss: Money::new(Decimal::zero(), d(gain_krw)),
            lots_consumed: Vec::new(),
            unmatched_quantity: Decimal::zero(),
            warnings: Vec::new(),
            timestamp: Timestamp::parse_rfc3339(at).unwrap(),
        }
    }

    fn law() -> TaxLawTable {
        TaxLawTable::embedded_default().unwrap()
    }

    #[test]
    fn test_gains_and_losses_summed_separately() {
        let disposals = vec![
            disposal("a", "2025-03-01T00:00:00Z", "5000000"),
            disposal("b", "2025-04-01T00:00:00Z", "-1000000"),
        ];
        let s = aggregate(&disposals, 2025, LotMatchingMethod::Fifo, &law()).unwrap();
        assert_eq!(s.total_gains, d("5000000"));
        assert_eq!(s.total_losses, d("1000000"));
        assert_eq!(s.net_gains, d("4000000"));
        assert_eq!(s.taxable_gains, d("1500000"));
        assert_eq!(s.estimated_tax, d("330000"));
        assert_eq!(s.disposals.len(), 2);
    }

    #[test]
    fn test_net_below_deduction_is_untaxed() {
        let disposals = vec![disposal("a", "2025-03-01T00:00:00Z", "2000000")];
        let s = aggregate(&disposals, 2025, LotMatchingMethod::Fifo, &law()).unwrap();
        assert_eq!(s.taxable_gains, Decimal::zero());
        assert_eq!(s.estimated_tax, Decimal::zero());
    }

    #[test]
    fn test_net_equal_to_deduction_is_untaxed() {
        let disposals = vec![disposal("a", "2025-03-01T00:00:00Z", "2500000")];
        let s = aggregate(&disposals, 2025, LotMatchingMethod::Fifo, &law()).unwrap();
        assert_eq!(s.taxable_gains, Decimal::zero());
        assert_eq!(s.estimated_tax, Decimal::zero());
    }

    #[test]
    fn test_year_boundary_uses_table_offset() {
        // 2024-12-31T16:00Z is 2025-01-01 01:00 in KST.
        let disposals = vec![
            disposal("late", "2024-12-31T16:00:00Z", "3000000"),
            disposal("early", "2024-12-31T14:00:00Z", "9000000"),
        ];
        let s = aggregate(&disposals, 2025, LotMatchingMethod::Fifo, &law()).unwrap();
        assert_eq!(s.disposals.len(), 1);
        assert_eq!(s.disposals[0].transaction_id.as_str(), "late");
    }

    #[test]
    fn test_total_out_of_range_fails() {
        let big = "50000000000000000000000000000";
        let disposals = vec![
            disposal("a", "2025-03-01T00:00:00Z", big),
            disposal("b", "2025-04-01T00:00:00Z", big),
        ];
        let err = aggregate(&disposals, 2025, LotMatchingMethod::Fifo, &law()).unwrap_err();
        assert!(matches!(err, TaxError::ArithmeticOverflow { year: 2025 }));
    }

    #[test]
    fn test_unknown_year_fails() {
        let err = aggregate(&[], 2031, LotMatchingMethod::Fifo, &law()).unwrap_err();
        assert!(matches!(err, TaxError::UnknownTaxYear { year: 2031, .. }));
    }
}
