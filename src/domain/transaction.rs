//! Ledger transaction records as supplied by synchronization collaborators.

use crate::domain::{Asset, Decimal, SourceId, Timestamp, TransactionId};
use serde::{Deserialize, Serialize};

/// Closed set of ledger transaction kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransactionKind {
    Buy,
    Sell,
    TransferIn,
    TransferOut,
    Swap,
    Stake,
    Unstake,
    Reward,
    Airdrop,
    Fee,
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 10] = [
        TransactionKind::Buy,
        TransactionKind::Sell,
        TransactionKind::TransferIn,
        TransactionKind::TransferOut,
        TransactionKind::Swap,
        TransactionKind::Stake,
        TransactionKind::Unstake,
        TransactionKind::Reward,
        TransactionKind::Airdrop,
        TransactionKind::Fee,
    ];

    /// Kinds whose proceeds come from the record's own price and therefore must carry one.
    pub fn requires_price(&self) -> bool {
        matches!(
            self,
            TransactionKind::Sell | TransactionKind::TransferOut | TransactionKind::Swap
        )
    }

    pub fn is_transfer(&self) -> bool {
        matches!(self, TransactionKind::TransferIn | TransactionKind::TransferOut)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Buy => "buy",
            TransactionKind::Sell => "sell",
            TransactionKind::TransferIn => "transferIn",
            TransactionKind::TransferOut => "transferOut",
            TransactionKind::Swap => "swap",
            TransactionKind::Stake => "stake",
            TransactionKind::Unstake => "unstake",
            TransactionKind::Reward => "reward",
            TransactionKind::Airdrop => "airdrop",
            TransactionKind::Fee => "fee",
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown transaction kind: {}", s))
    }
}

/// A single ledger record. Immutable once read from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: TransactionId,
    /// Exchange/wallet the record was synchronized from.
    pub source_id: SourceId,
    pub asset: Asset,
    pub kind: TransactionKind,
    /// Non-negative magnitude of `asset` moved.
    pub amount: Decimal,
    /// Unit price in USD at `timestamp`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_usd: Option<Decimal>,
    /// Unit price in KRW at `timestamp`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_krw: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_asset: Option<Asset>,
    pub timestamp: Timestamp,
    /// Received asset of a swap; `asset`/`amount` describe the given-up side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_asset: Option<Asset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_amount: Option<Decimal>,
    /// Transfer between the user's own wallets/exchanges.
    #[serde(default)]
    pub internal: bool,
}

impl TransactionRecord {
    /// Create a record with no prices, fee or swap leg.
    pub fn new(
        id: TransactionId,
        source_id: SourceId,
        asset: Asset,
        kind: TransactionKind,
        amount: Decimal,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id,
            source_id,
            asset,
            kind,
            amount,
            price_usd: None,
            price_krw: None,
            fee: None,
            fee_asset: None,
            timestamp,
            counter_asset: None,
            counter_amount: None,
            internal: false,
        }
    }

    pub fn with_price_usd(mut self, price: Decimal) -> Self {
        self.price_usd = Some(price);
        self
    }

    pub fn with_price_krw(mut self, price: Decimal) -> Self {
        self.price_krw = Some(price);
        self
    }

    pub fn with_fee(mut self, fee: Decimal, fee_asset: Asset) -> Self {
        self.fee = Some(fee);
        self.fee_asset = Some(fee_asset);
        self
    }

    pub fn with_counter(mut self, asset: Asset, amount: Decimal) -> Self {
        self.counter_asset = Some(asset);
        self.counter_amount = Some(amount);
        self
    }

    pub fn mark_internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub fn has_price(&self) -> bool {
        self.price_usd.is_some() || self.price_krw.is_some()
    }

    /// Content hash over every field, used to tell exact repeats from conflicting duplicates.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        fn hash_var(hasher: &mut Sha256, data: &str) {
            hasher.update((data.len() as u32).to_le_bytes());
            hasher.update(data.as_bytes());
        }

        fn hash_opt(hasher: &mut Sha256, data: Option<String>) {
            match data {
                Some(s) => {
                    hasher.update([1u8]);
                    hash_var(hasher, &s);
                }
                None => hasher.update([0u8]),
            }
        }

        let mut hasher = Sha256::new();
        hash_var(&mut hasher, self.id.as_str());
        hash_var(&mut hasher, self.source_id.as_str());
        hash_var(&mut hasher, self.asset.as_str());
        hash_var(&mut hasher, self.kind.as_str());
        hash_var(&mut hasher, &self.amount.to_canonical_string());
        hash_opt(&mut hasher, self.price_usd.map(|d| d.to_canonical_string()));
        hash_opt(&mut hasher, self.price_krw.map(|d| d.to_canonical_string()));
        hash_opt(&mut hasher, self.fee.map(|d| d.to_canonical_string()));
        hash_opt(&mut hasher, self.fee_asset.as_ref().map(|a| a.0.clone()));
        hash_var(&mut hasher, &self.timestamp.to_rfc3339_nanos());
        hash_opt(&mut hasher, self.counter_asset.as_ref().map(|a| a.0.clone()));
        hash_opt(
            &mut hasher,
            self.counter_amount.map(|d| d.to_canonical_string()),
        );
        hasher.update([self.internal as u8]);

        hex::encode(&hasher.finalize()[..16])
    }
}
