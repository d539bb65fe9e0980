//! Pure computation engine: normalization, lot matching and disposal processing.
//!
//! Nothing in here performs I/O. Every run takes its records, price snapshot and law
//! table as arguments and owns the lots and results it produces.

use crate::domain::{Asset, Decimal, LotConsumption, Money, SourceId, Timestamp, TransactionId};
use crate::tax::TaxError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod inventory;
pub mod matching;
pub mod normalizer;
pub mod pipeline;
pub mod pricing;
pub mod processor;

pub use inventory::{Consumption, Inventories, LotInventory};
pub use matching::{LotMatchingMethod, MatchingPolicy, MatchingRule};
pub use normalizer::{
    normalize, validate, AttachedFee, EntryClass, EntryKind, LedgerEntry, MalformedRecord,
    NormalizedLedger,
};
pub use pipeline::{compute_tax_year, compute_tax_year_from_records};
pub use pricing::{lookup_requests, NoPrices, PriceBook, PriceLookup, PriceRequests, PriceUsage};
pub use processor::{
    process, process_sharded, DisposalProcessor, ProcessOutput, ProcessorOptions, TransferPolicy,
};

/// A recoverable problem attached to a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "camelCase")]
pub enum Issue {
    /// The record was excluded from the run.
    MalformedRecord { reason: String },
    /// Open lots could not cover the disposal; the residual carries zero basis.
    InsufficientBasis {
        requested: Decimal,
        unmatched: Decimal,
    },
    /// A price was missing and the affected value defaulted to zero.
    PriceUnavailable { asset: Asset, usage: PriceUsage },
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Issue::MalformedRecord { reason } => write!(f, "malformed record: {}", reason),
            Issue::InsufficientBasis {
                requested,
                unmatched,
            } => write!(
                f,
                "insufficient basis: {} of {} requested had no open lot",
                unmatched, requested
            ),
            Issue::PriceUnavailable { asset, usage } => {
                write!(f, "price unavailable for {} ({:?})", asset, usage)
            }
        }
    }
}

/// An [`Issue`] located on a specific transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub transaction_id: TransactionId,
    pub source_id: SourceId,
    pub timestamp: Timestamp,
    /// Entry sequence; rejected records have none.
    #[serde(skip)]
    pub seq: Option<usize>,
    pub issue: Issue,
}

impl Diagnostic {
    pub fn for_entry(entry: &LedgerEntry, issue: Issue) -> Self {
        Self {
            transaction_id: entry.transaction_id.clone(),
            source_id: entry.source_id.clone(),
            timestamp: entry.timestamp,
            seq: Some(entry.seq),
            issue,
        }
    }

    pub fn for_rejected(rejected: &MalformedRecord) -> Self {
        Self {
            transaction_id: rejected.id.clone(),
            source_id: rejected.source_id.clone(),
            timestamp: rejected.timestamp,
            seq: None,
            issue: Issue::MalformedRecord {
                reason: rejected.reason.clone(),
            },
        }
    }
}

/// Which disposal class produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DisposalKind {
    Sell,
    TransferOut,
    SwapOut,
    Fee,
}

impl DisposalKind {
    pub fn from_entry(kind: EntryKind) -> Option<Self> {
        match kind {
            EntryKind::Sell => Some(DisposalKind::Sell),
            EntryKind::TransferOut => Some(DisposalKind::TransferOut),
            EntryKind::SwapOut => Some(DisposalKind::SwapOut),
            EntryKind::Fee => Some(DisposalKind::Fee),
            _ => None,
        }
    }
}

/// Realized outcome of one disposal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisposalResult {
    #[serde(skip)]
    pub seq: usize,
    pub transaction_id: TransactionId,
    pub source_id: SourceId,
    pub asset: Asset,
    pub kind: DisposalKind,
    pub quantity: Decimal,
    pub proceeds: Money,
    pub cost_basis_consumed: Money,
    /// Attached fee value allocated against this disposal.
    pub fee: Money,
    /// `proceeds - cost_basis_consumed - fee`, per leg.
    pub gain_loss: Money,
    pub lots_consumed: Vec<LotConsumption>,
    pub unmatched_quantity: Decimal,
    pub warnings: Vec<Issue>,
    pub timestamp: Timestamp,
}

impl DisposalResult {
    pub fn has_insufficient_basis(&self) -> bool {
        self.unmatched_quantity.is_positive()
    }
}

/// Errors that end an engine run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("run cancelled")]
    Cancelled,

    #[error("value out of range while processing {source_id}/{transaction_id}")]
    ArithmeticOverflow {
        source_id: SourceId,
        transaction_id: TransactionId,
    },

    #[error(transparent)]
    Tax(#[from] TaxError),
}
