//! Lot matching policies: FIFO, LIFO, HIFO.

use crate::domain::{Currency, Lot};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Orders open lots for consumption, most-preferred first.
///
/// Implementations are pure: they look at a snapshot and never mutate it.
pub trait MatchingPolicy: Send + Sync {
    /// Total order over lots; `Less` means `a` is consumed before `b`.
    fn compare(&self, a: &Lot, b: &Lot) -> Ordering;

    /// Indices of the open lots in `lots`, in consumption order.
    fn order(&self, lots: &[Lot]) -> Vec<usize> {
        let mut open: Vec<usize> = (0..lots.len()).filter(|&i| lots[i].is_open()).collect();
        open.sort_by(|&a, &b| self.compare(&lots[a], &lots[b]));
        open
    }
}

/// Lot selection method chosen for a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LotMatchingMethod {
    #[default]
    Fifo,
    Lifo,
    Hifo,
}

impl LotMatchingMethod {
    pub const ALL: [LotMatchingMethod; 3] = [
        LotMatchingMethod::Fifo,
        LotMatchingMethod::Lifo,
        LotMatchingMethod::Hifo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LotMatchingMethod::Fifo => "FIFO",
            LotMatchingMethod::Lifo => "LIFO",
            LotMatchingMethod::Hifo => "HIFO",
        }
    }
}

impl LotMatchingMethod {
    /// Bind the method to the currency its cost comparisons are made in.
    pub fn in_currency(self, currency: Currency) -> MatchingRule {
        MatchingRule {
            method: self,
            currency,
        }
    }
}

/// A matching method bound to the reporting currency of the tax year.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchingRule {
    pub method: LotMatchingMethod,
    pub currency: Currency,
}

fn by_identity(a: &Lot, b: &Lot) -> Ordering {
    a.origin_source_id
        .cmp(&b.origin_source_id)
        .then_with(|| a.origin_transaction_id.cmp(&b.origin_transaction_id))
}

impl MatchingPolicy for MatchingRule {
    fn compare(&self, a: &Lot, b: &Lot) -> Ordering {
        match self.method {
            LotMatchingMethod::Fifo => a
                .acquired_at
                .cmp(&b.acquired_at)
                .then_with(|| by_identity(a, b)),
            LotMatchingMethod::Lifo => b
                .acquired_at
                .cmp(&a.acquired_at)
                .then_with(|| by_identity(b, a)),
            // Reporting leg first; the other leg only separates lots priced in it alone.
            LotMatchingMethod::Hifo => {
                let other = self.currency.other();
                b.unit_cost_in(self.currency)
                    .cmp(&a.unit_cost_in(self.currency))
                    .then_with(|| b.unit_cost_in(other).cmp(&a.unit_cost_in(other)))
                    .then_with(|| a.acquired_at.cmp(&b.acquired_at))
                    .then_with(|| by_identity(a, b))
            }
        }
    }
}

impl std::fmt::Display for LotMatchingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LotMatchingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(LotMatchingMethod::Fifo),
            "lifo" => Ok(LotMatchingMethod::Lifo),
            "hifo" => Ok(LotMatchingMethod::Hifo),
            other => Err(format!("must be fifo, lifo, or hifo, got {}", other)),
        }
    }
}
