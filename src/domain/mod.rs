//! Domain types and determinism layer for the tax-lot engine.
//!
//! This module provides:
//! - Exact numeric handling via the Decimal wrapper and two-leg Money
//! - Domain primitives: Timestamp, Asset, SourceId, TransactionId
//! - Ledger records, lots and lot consumptions
//! - Stable record ordering key for deterministic processing

pub mod decimal;
pub mod lot;
pub mod money;
pub mod ordering;
pub mod primitives;
pub mod transaction;

pub use decimal::Decimal;
pub use lot::{Lot, LotConsumption};
pub use money::{Currency, Money, PriceQuote};
pub use ordering::{sort_records_deterministic, TransactionOrderingKey};
pub use primitives::{Asset, SourceId, Timestamp, TransactionId};
pub use transaction::{TransactionKind, TransactionRecord};
