//! Validation and canonicalization of ledger records into engine entries.

use crate::domain::{
    sort_records_deterministic, Asset, Decimal, PriceQuote, SourceId, Timestamp, TransactionId,
    TransactionKind, TransactionRecord,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::warn;

/// A record that fails structural validation. It is excluded from the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed record {source_id}/{id}: {reason}")]
pub struct MalformedRecord {
    pub id: TransactionId,
    pub source_id: SourceId,
    pub timestamp: Timestamp,
    pub reason: String,
}

impl MalformedRecord {
    fn new(record: &TransactionRecord, reason: impl Into<String>) -> Self {
        Self {
            id: record.id.clone(),
            source_id: record.source_id.clone(),
            timestamp: record.timestamp,
            reason: reason.into(),
        }
    }
}

/// What an entry does to holdings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryKind {
    Buy,
    TransferIn,
    Reward,
    Airdrop,
    /// Received leg of a swap.
    SwapIn,
    Sell,
    TransferOut,
    /// Given-up leg of a swap.
    SwapOut,
    Fee,
    Stake,
    Unstake,
    /// Transfer between the user's own wallets, flagged by the collaborator.
    InternalTransfer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryClass {
    Acquisition,
    Disposal,
    Custody,
}

impl EntryKind {
    pub fn class(&self) -> EntryClass {
        match self {
            EntryKind::Buy
            | EntryKind::TransferIn
            | EntryKind::Reward
            | EntryKind::Airdrop
            | EntryKind::SwapIn => EntryClass::Acquisition,
            EntryKind::Sell | EntryKind::TransferOut | EntryKind::SwapOut | EntryKind::Fee => {
                EntryClass::Disposal
            }
            EntryKind::Stake | EntryKind::Unstake | EntryKind::InternalTransfer => {
                EntryClass::Custody
            }
        }
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self, EntryKind::TransferIn | EntryKind::TransferOut)
    }
}

/// A fee attached to a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedFee {
    pub amount: Decimal,
    pub asset: Asset,
}

/// Canonical, immutable engine input derived from one record (two for swaps).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Position in the total processing order.
    pub seq: usize,
    pub transaction_id: TransactionId,
    pub source_id: SourceId,
    pub timestamp: Timestamp,
    pub kind: EntryKind,
    pub asset: Asset,
    pub quantity: Decimal,
    /// Unit price as recorded (or derived, for the received leg of a swap).
    pub price: PriceQuote,
    pub fee: Option<AttachedFee>,
}

/// Output of [`normalize`]: the ordered entries plus everything that was rejected.
#[derive(Debug, Clone, Default)]
pub struct NormalizedLedger {
    pub entries: Vec<LedgerEntry>,
    pub rejected: Vec<MalformedRecord>,
    /// Exact repeats dropped during deduplication.
    pub duplicates_dropped: usize,
    /// Records received before validation.
    pub records_read: usize,
}

/// Check a record's structural invariants.
/// Largest accepted amount, unit price or fee.
fn max_magnitude() -> Decimal {
    Decimal::from(1_000_000_000_000_000_000_i64)
}

/// Largest accepted value of a whole record in either currency.
fn max_value() -> Decimal {
    max_magnitude() * Decimal::from(1_000_000_i64)
}

fn out_of_range(value: Decimal) -> bool {
    value.abs() > max_magnitude()
}

pub fn validate(record: &TransactionRecord) -> Result<(), MalformedRecord> {
    if record.id.as_str().trim().is_empty() {
        return Err(MalformedRecord::new(record, "empty id"));
    }
    if record.asset.as_str().is_empty() {
        return Err(MalformedRecord::new(record, "empty asset"));
    }
    if !record.amount.is_positive() {
        return Err(MalformedRecord::new(
            record,
            format!("amount must be positive, got {}", record.amount),
        ));
    }
    for (leg, price) in [("priceUsd", record.price_usd), ("priceKrw", record.price_krw)] {
        if price.is_some_and(|p| p.is_negative()) {
            return Err(MalformedRecord::new(record, format!("negative {}", leg)));
        }
    }
    let magnitudes = [
        ("amount", Some(record.amount)),
        ("priceUsd", record.price_usd),
        ("priceKrw", record.price_krw),
        ("fee", record.fee),
        ("counterAmount", record.counter_amount),
    ];
    for (field, value) in magnitudes {
        if let Some(v) = value.filter(|v| out_of_range(*v)) {
            return Err(MalformedRecord::new(
                record,
                format!("{} out of range, got {}", field, v),
            ));
        }
    }
    for price in [record.price_usd, record.price_krw].into_iter().flatten() {
        let value = record.amount.checked_mul(price);
        if value.map_or(true, |v| v > max_value()) {
            return Err(MalformedRecord::new(record, "record value out of range"));
        }
    }
    if record.kind.requires_price() && !record.has_price() {
        return Err(MalformedRecord::new(
            record,
            format!("{} record has neither priceUsd nor priceKrw", record.kind),
        ));
    }
    match (&record.fee, &record.fee_asset) {
        (Some(fee), _) if fee.is_negative() => {
            return Err(MalformedRecord::new(record, "negative fee"));
        }
        (Some(fee), None) if !fee.is_zero() => {
            return Err(MalformedRecord::new(record, "fee without feeAsset"));
        }
        _ => {}
    }
    if record.kind == TransactionKind::Swap {
        let Some(counter_asset) = &record.counter_asset else {
            return Err(MalformedRecord::new(record, "swap without counterAsset"));
        };
        if !record.counter_amount.is_some_and(|a| a.is_positive()) {
            return Err(MalformedRecord::new(
                record,
                "swap counterAmount must be positive",
            ));
        }
        if counter_asset == &record.asset {
            return Err(MalformedRecord::new(record, "swap to the same asset"));
        }
        // The received side is priced at `amount * price / counterAmount`.
        let received = PriceQuote::new(record.price_usd, record.price_krw)
            .scale(record.amount)
            .per_unit(record.counter_amount.unwrap_or_default())
            .unwrap_or_default();
        let legs = [record.price_usd, record.price_krw];
        let derived = [received.usd, received.krw];
        let lost = legs.iter().zip(derived).any(|(given, got)| {
            given.is_some() && got.map_or(true, out_of_range)
        });
        if lost {
            return Err(MalformedRecord::new(
                record,
                "swap counterAmount gives an out of range price",
            ));
        }
    }
    Ok(())
}

/// Validate, deduplicate, order and expand records into ledger entries.
///
/// Ordering is `(timestamp, source_id, id)`. Exact repeats of a `(source_id, id)` key
/// are dropped; a key seen with different content rejects every copy.
pub fn normalize(records: &[TransactionRecord]) -> NormalizedLedger {
    let mut ledger = NormalizedLedger {
        records_read: records.len(),
        ..Default::default()
    };

    let mut sorted = records.to_vec();
    sort_records_deterministic(&mut sorted);

    let mut fingerprints: HashMap<(&SourceId, &TransactionId), Vec<String>> = HashMap::new();
    for record in &sorted {
        fingerprints
            .entry((&record.source_id, &record.id))
            .or_default()
            .push(record.fingerprint());
    }

    let mut emitted: HashSet<(&SourceId, &TransactionId)> = HashSet::new();
    for record in &sorted {
        let key = (&record.source_id, &record.id);
        let prints = &fingerprints[&key];
        if prints.len() > 1 {
            if prints.iter().any(|p| p != &prints[0]) {
                warn!(
                    id = %record.id,
                    source = %record.source_id,
                    "Conflicting duplicate record id"
                );
                ledger.rejected.push(MalformedRecord::new(
                    record,
                    "conflicting duplicate id with different content",
                ));
                continue;
            }
            if !emitted.insert(key) {
                ledger.duplicates_dropped += 1;
                continue;
            }
        }

        if let Err(err) = validate(record) {
            warn!(
                id = %err.id,
                source = %err.source_id,
                reason = %err.reason,
                "Rejecting malformed record"
            );
            ledger.rejected.push(err);
            continue;
        }

        expand(record, &mut ledger.entries);
    }

    ledger
}

fn expand(record: &TransactionRecord, out: &mut Vec<LedgerEntry>) {
    let fee = record
        .fee
        .filter(|f| f.is_positive())
        .zip(record.fee_asset.clone())
        .map(|(amount, asset)| AttachedFee { amount, asset });
    let price = PriceQuote::new(record.price_usd, record.price_krw);

    let kind = match record.kind {
        TransactionKind::Buy => EntryKind::Buy,
        TransactionKind::Sell => EntryKind::Sell,
        TransactionKind::TransferIn | TransactionKind::TransferOut if record.internal => {
            EntryKind::InternalTransfer
        }
        TransactionKind::TransferIn => EntryKind::TransferIn,
        TransactionKind::TransferOut => EntryKind::TransferOut,
        TransactionKind::Stake => EntryKind::Stake,
        TransactionKind::Unstake => EntryKind::Unstake,
        TransactionKind::Reward => EntryKind::Reward,
        TransactionKind::Airdrop => EntryKind::Airdrop,
        TransactionKind::Fee => EntryKind::Fee,
        TransactionKind::Swap => {
            expand_swap(record, price, fee, out);
            return;
        }
    };

    out.push(LedgerEntry {
        seq: out.len(),
        transaction_id: record.id.clone(),
        source_id: record.source_id.clone(),
        timestamp: record.timestamp,
        kind,
        asset: record.asset.clone(),
        quantity: record.amount,
        price,
        fee,
    });
}

/// A swap becomes a disposal of `asset` followed by an acquisition of `counter_asset`
/// whose unit price is the out-leg's proceeds spread over the received amount.
fn expand_swap(
    record: &TransactionRecord,
    price: PriceQuote,
    fee: Option<AttachedFee>,
    out: &mut Vec<LedgerEntry>,
) {
    // validate() guarantees both counter fields.
    let (Some(counter_asset), Some(counter_amount)) =
        (record.counter_asset.clone(), record.counter_amount)
    else {
        return;
    };
    let received_price = price
        .scale(record.amount)
        .per_unit(counter_amount)
        .unwrap_or_default();

    out.push(LedgerEntry {
        seq: out.len(),
        transaction_id: record.id.clone(),
        source_id: record.source_id.clone(),
        timestamp: record.timestamp,
        kind: EntryKind::SwapOut,
        asset: record.asset.clone(),
        quantity: record.amount,
        price,
        fee,
    });
    out.push(LedgerEntry {
        seq: out.len(),
        transaction_id: record.id.clone(),
        source_id: record.source_id.clone(),
        timestamp: record.timestamp,
        kind: EntryKind::SwapIn,
        asset: counter_asset,
        quantity: counter_amount,
        price: received_price,
        fee: None,
    });
}
