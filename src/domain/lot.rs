//! Acquisition lots and the audit records of their consumption.

use crate::domain::{Asset, Currency, Decimal, Money, SourceId, Timestamp, TransactionId};
use serde::{Deserialize, Serialize};

/// A quantity of an asset acquired at one instant and unit cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lot {
    pub asset: Asset,
    /// Source of the acquisition entry; transaction ids are only unique within it.
    pub origin_source_id: SourceId,
    /// The acquisition entry that created this lot; one lot per entry.
    pub origin_transaction_id: TransactionId,
    pub acquired_at: Timestamp,
    pub original_quantity: Decimal,
    /// Always within `0..=original_quantity`.
    pub remaining_quantity: Decimal,
    /// Cost basis per unit, fee included.
    pub unit_cost: Money,
}

impl Lot {
    pub fn new(
        asset: Asset,
        origin_source_id: SourceId,
        origin_transaction_id: TransactionId,
        acquired_at: Timestamp,
        quantity: Decimal,
        unit_cost: Money,
    ) -> Self {
        Self {
            asset,
            origin_source_id,
            origin_transaction_id,
            acquired_at,
            original_quantity: quantity,
            remaining_quantity: quantity,
            unit_cost,
        }
    }

    /// Lot identifier used in the audit trail.
    pub fn id(&self) -> (&SourceId, &TransactionId) {
        (&self.origin_source_id, &self.origin_transaction_id)
    }

    pub fn unit_cost_in(&self, currency: Currency) -> Decimal {
        self.unit_cost.get(currency)
    }

    pub fn is_open(&self) -> bool {
        self.remaining_quantity.is_positive()
    }

    pub fn consumed_quantity(&self) -> Decimal {
        self.original_quantity - self.remaining_quantity
    }

    /// Take up to `wanted` units. Returns the quantity actually taken.
    pub(crate) fn take(&mut self, wanted: Decimal) -> Decimal {
        let taken = if wanted < self.remaining_quantity {
            wanted
        } else {
            self.remaining_quantity
        };
        self.remaining_quantity -= taken;
        taken
    }
}

/// One slice of a lot consumed by a disposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LotConsumption {
    pub lot_source_id: SourceId,
    pub lot_id: TransactionId,
    pub acquired_at: Timestamp,
    pub quantity_taken: Decimal,
    pub unit_cost: Money,
}

impl LotConsumption {
    /// Basis of the slice: `quantity_taken * unit_cost`. `None` on overflow.
    pub fn cost(&self) -> Option<Money> {
        self.unit_cost.checked_scale(self.quantity_taken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn lot(qty: &str) -> Lot {
        Lot::new(
            Asset::new("BTC"),
            SourceId::new("upbit"),
            TransactionId::new("b1"),
            Timestamp::parse_rfc3339("2023-01-01T00:00:00Z").unwrap(),
            d(qty),
            Money::new(d("10000"), d("13000000")),
        )
    }

    #[test]
    fn test_take_partial_then_rest() {
        let mut l = lot("1");
        assert_eq!(l.take(d("0.4")), d("0.4"));
        assert_eq!(l.remaining_quantity, d("0.6"));
        assert_eq!(l.take(d("5")), d("0.6"));
        assert_eq!(l.remaining_quantity, Decimal::zero());
        assert!(!l.is_open());
        assert_eq!(l.consumed_quantity(), d("1"));
    }

    #[test]
    fn test_consumption_cost() {
        let c = LotConsumption {
            lot_source_id: SourceId::new("upbit"),
            lot_id: TransactionId::new("b1"),
            acquired_at: Timestamp::parse_rfc3339("2023-01-01T00:00:00Z").unwrap(),
            quantity_taken: d("0.5"),
            unit_cost: Money::new(d("10000"), d("13000000")),
        };
        assert_eq!(c.cost(), Some(Money::new(d("5000"), d("6500000"))));
    }

    #[test]
    fn test_id_pairs_source_and_transaction() {
        let l = lot("1");
        assert_eq!(l.id().0.as_str(), "upbit");
        assert_eq!(l.id().1.as_str(), "b1");
        assert_eq!(l.unit_cost_in(Currency::Krw), d("13000000"));
    }
}
