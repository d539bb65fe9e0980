//! Per-asset lot inventories.

use super::matching::MatchingPolicy;
use crate::domain::{Asset, Decimal, Lot, LotConsumption, Money};
use std::collections::BTreeMap;

/// Result of consuming a quantity from an inventory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Consumption {
    /// Slices taken, in policy order.
    pub taken: Vec<LotConsumption>,
    /// Residual that no open lot could cover; carries zero basis.
    pub unmatched: Decimal,
}

impl Consumption {
    pub fn matched_quantity(&self) -> Decimal {
        self.taken.iter().map(|c| c.quantity_taken).sum()
    }

    /// Total basis of the slices; `None` on overflow.
    pub fn cost(&self) -> Option<Money> {
        self.taken
            .iter()
            .try_fold(Money::zero(), |acc, slice| acc.checked_add(slice.cost()?))
    }

    pub fn is_short(&self) -> bool {
        self.unmatched.is_positive()
    }
}

/// Open and closed lots of a single asset, in acquisition order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotInventory {
    asset: Asset,
    lots: Vec<Lot>,
}

impl LotInventory {
    pub fn new(asset: Asset) -> Self {
        Self {
            asset,
            lots: Vec::new(),
        }
    }

    pub fn asset(&self) -> &Asset {
        &self.asset
    }

    /// Append a lot. No reordering happens here; policies order at consumption time.
    pub fn acquire(&mut self, lot: Lot) {
        self.lots.push(lot);
    }

    /// Take `quantity` greedily in `policy` order.
    ///
    /// When open lots are insufficient, every open lot is drained and the residual is
    /// returned as `unmatched`.
    pub fn consume(&mut self, quantity: Decimal, policy: &dyn MatchingPolicy) -> Consumption {
        let mut outstanding = quantity;
        let mut taken = Vec::new();

        for idx in policy.order(&self.lots) {
            if !outstanding.is_positive() {
                break;
            }
            let lot = &mut self.lots[idx];
            let qty = lot.take(outstanding);
            outstanding -= qty;
            taken.push(LotConsumption {
                lot_source_id: lot.origin_source_id.clone(),
                lot_id: lot.origin_transaction_id.clone(),
                acquired_at: lot.acquired_at,
                quantity_taken: qty,
                unit_cost: lot.unit_cost,
            });
        }

        Consumption {
            taken,
            unmatched: outstanding.clamp_non_negative(),
        }
    }

    /// Sum of remaining quantity over open lots.
    pub fn open_quantity(&self) -> Decimal {
        self.lots.iter().map(|l| l.remaining_quantity).sum()
    }

    /// Full history, closed lots included.
    pub fn lots(&self) -> &[Lot] {
        &self.lots
    }

    pub fn open_lots(&self) -> impl Iterator<Item = &Lot> {
        self.lots.iter().filter(|l| l.is_open())
    }
}

/// All inventories of a run, keyed by asset with ordered iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventories {
    by_asset: BTreeMap<Asset, LotInventory>,
}

impl Inventories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&mut self, lot: Lot) {
        self.by_asset
            .entry(lot.asset.clone())
            .or_insert_with(|| LotInventory::new(lot.asset.clone()))
            .acquire(lot);
    }

    pub fn consume(
        &mut self,
        asset: &Asset,
        quantity: Decimal,
        policy: &dyn MatchingPolicy,
    ) -> Consumption {
        match self.by_asset.get_mut(asset) {
            Some(inventory) => inventory.consume(quantity, policy),
            None => Consumption {
                taken: Vec::new(),
                unmatched: quantity,
            },
        }
    }

    pub fn get(&self, asset: &Asset) -> Option<&LotInventory> {
        self.by_asset.get(asset)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Asset, &LotInventory)> {
        self.by_asset.iter()
    }

    /// Absorb inventories of disjoint assets (per-asset shards).
    pub fn merge(&mut self, other: Inventories) {
        for (asset, inventory) in other.by_asset {
            self.by_asset.insert(asset, inventory);
        }
    }

    pub fn len(&self) -> usize {
        self.by_asset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_asset.is_empty()
    }
}
