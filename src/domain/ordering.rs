//! Stable transaction ordering for deterministic processing.

use crate::domain::{SourceId, Timestamp, TransactionId, TransactionRecord};

/// Stable ordering key for ledger records.
///
/// Ensures a total order even when batch imports share a timestamp.
/// Ordering: timestamp -> source_id -> id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TransactionOrderingKey {
    /// Exact instant (primary sort).
    pub timestamp: Timestamp,
    /// Origin exchange/wallet (secondary sort).
    pub source_id: SourceId,
    /// Record id (tertiary sort).
    pub id: TransactionId,
}

impl TransactionOrderingKey {
    /// Create an ordering key from a record.
    pub fn from_record(record: &TransactionRecord) -> Self {
        TransactionOrderingKey {
            timestamp: record.timestamp,
            source_id: record.source_id.clone(),
            id: record.id.clone(),
        }
    }

    /// Returns true if `a` should be processed before `b`.
    pub fn should_come_before(a: &TransactionRecord, b: &TransactionRecord) -> bool {
        Self::from_record(a) < Self::from_record(b)
    }
}

/// Sort records deterministically.
pub fn sort_records_deterministic(records: &mut [TransactionRecord]) {
    records.sort_by_cached_key(TransactionOrderingKey::from_record);
}
