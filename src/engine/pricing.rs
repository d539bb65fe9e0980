//! Synchronous price lookup used inside the engine, and price-to-money resolution.
//!
//! The engine never performs I/O. Prices missing from ledger records are gathered
//! up front (see [`lookup_requests`]) and supplied as a [`PriceBook`] snapshot.

use super::normalizer::{EntryKind, LedgerEntry};
use crate::domain::{Asset, Currency, Decimal, Money, PriceQuote, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Historical prices and FX rates at exact instants.
pub trait PriceLookup: Send + Sync {
    /// Unit price of `asset` at `at`, if known.
    fn price(&self, asset: &Asset, at: Timestamp) -> Option<PriceQuote>;

    /// KRW per 1 USD at `at`, if known.
    fn usd_krw_rate(&self, at: Timestamp) -> Option<Decimal>;
}

/// Lookup that knows nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrices;

impl PriceLookup for NoPrices {
    fn price(&self, _asset: &Asset, _at: Timestamp) -> Option<PriceQuote> {
        None
    }

    fn usd_krw_rate(&self, _at: Timestamp) -> Option<Decimal> {
        None
    }
}

/// Immutable snapshot of looked-up prices, keyed by exact instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceBook {
    prices: BTreeMap<(Asset, Timestamp), PriceQuote>,
    rates: BTreeMap<Timestamp, Decimal>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_price(&mut self, asset: Asset, at: Timestamp, quote: PriceQuote) {
        if !quote.is_empty() {
            self.prices.insert((asset, at), quote);
        }
    }

    pub fn insert_rate(&mut self, at: Timestamp, krw_per_usd: Decimal) {
        if krw_per_usd.is_positive() {
            self.rates.insert(at, krw_per_usd);
        }
    }

    pub fn with_price(mut self, asset: Asset, at: Timestamp, quote: PriceQuote) -> Self {
        self.insert_price(asset, at, quote);
        self
    }

    pub fn with_rate(mut self, at: Timestamp, krw_per_usd: Decimal) -> Self {
        self.insert_rate(at, krw_per_usd);
        self
    }

    pub fn price_count(&self) -> usize {
        self.prices.len()
    }

    pub fn rate_count(&self) -> usize {
        self.rates.len()
    }
}

impl PriceLookup for PriceBook {
    fn price(&self, asset: &Asset, at: Timestamp) -> Option<PriceQuote> {
        self.prices.get(&(asset.clone(), at)).copied()
    }

    fn usd_krw_rate(&self, at: Timestamp) -> Option<Decimal> {
        self.rates.get(&at).copied()
    }
}

/// What a missing price would have been used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PriceUsage {
    CostBasis,
    Proceeds,
    Fee,
}

/// A priced value in both legs, noting which legs were actually known.
///
/// An unknown leg is zero in `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub value: Money,
    pub has_usd: bool,
    pub has_krw: bool,
}

impl Resolved {
    fn missing() -> Self {
        Self {
            value: Money::zero(),
            has_usd: false,
            has_krw: false,
        }
    }

    fn known(value: Money) -> Self {
        Self {
            value,
            has_usd: true,
            has_krw: true,
        }
    }

    fn partial(usd: Option<Decimal>, krw: Option<Decimal>) -> Self {
        Self {
            value: Money::new(usd.unwrap_or_default(), krw.unwrap_or_default()),
            has_usd: usd.is_some(),
            has_krw: krw.is_some(),
        }
    }

    pub fn has_leg(&self, currency: Currency) -> bool {
        match currency {
            Currency::Usd => self.has_usd,
            Currency::Krw => self.has_krw,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.has_usd && self.has_krw
    }

    /// Both legs scaled by `factor`; a leg that overflows becomes unknown.
    pub fn scale(&self, factor: Decimal) -> Resolved {
        let usd = self.has_usd.then(|| self.value.usd.checked_mul(factor)).flatten();
        let krw = self.has_krw.then(|| self.value.krw.checked_mul(factor)).flatten();
        Resolved::partial(usd, krw)
    }
}

/// Fill in the absent leg of a quote through the USD/KRW rate.
///
/// A leg that cannot be derived stays zero and unknown.
pub fn complete_quote(quote: PriceQuote, at: Timestamp, prices: &dyn PriceLookup) -> Resolved {
    match (quote.usd, quote.krw) {
        (Some(usd), Some(krw)) => Resolved::known(Money::new(usd, krw)),
        (Some(usd), None) => {
            let krw = prices.usd_krw_rate(at).and_then(|rate| usd.checked_mul(rate));
            Resolved::partial(Some(usd), krw)
        }
        (None, Some(krw)) => {
            let usd = prices.usd_krw_rate(at).and_then(|rate| krw.checked_div(rate));
            Resolved::partial(usd, Some(krw))
        }
        (None, None) => Resolved::missing(),
    }
}

/// Unit price of an entry: its own quote, or a lookup when `allow_lookup` and it has none.
pub fn unit_price(entry: &LedgerEntry, prices: &dyn PriceLookup, allow_lookup: bool) -> Resolved {
    let quote = if entry.price.is_empty() && allow_lookup {
        prices.price(&entry.asset, entry.timestamp).unwrap_or_default()
    } else {
        entry.price
    };
    complete_quote(quote, entry.timestamp, prices)
}

/// Value of an entry's attached fee.
///
/// Fiat fees are taken at face value, fees in the entry's own asset at `entry_unit`,
/// and fees in any other asset through the lookup at the entry's timestamp.
pub fn fee_value(entry: &LedgerEntry, entry_unit: &Resolved, prices: &dyn PriceLookup) -> Resolved {
    let Some(fee) = &entry.fee else {
        return Resolved::known(Money::zero());
    };

    let quote = match fee.asset.fiat() {
        Some(Currency::Usd) => PriceQuote::usd(fee.amount),
        Some(Currency::Krw) => PriceQuote::krw(fee.amount),
        None if fee.asset == entry.asset => return entry_unit.scale(fee.amount),
        None => match prices.price(&fee.asset, entry.timestamp) {
            Some(unit) => unit.scale(fee.amount),
            None => return Resolved::missing(),
        },
    };
    complete_quote(quote, entry.timestamp, prices)
}

/// Whether the processor may consult the lookup for an entry's unit price.
pub fn uses_price_lookup(kind: EntryKind) -> bool {
    matches!(
        kind,
        EntryKind::Reward | EntryKind::Airdrop | EntryKind::TransferIn
    )
}

/// Prices and rates the engine may ask for, so a collaborator can prefetch them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceRequests {
    pub prices: BTreeSet<(Asset, Timestamp)>,
    pub rates: BTreeSet<Timestamp>,
}

impl PriceRequests {
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty() && self.rates.is_empty()
    }
}

/// Collect every lookup the processor could make for `entries`.
pub fn lookup_requests(entries: &[LedgerEntry]) -> PriceRequests {
    let mut requests = PriceRequests::default();

    for entry in entries {
        let needs_lookup = entry.price.is_empty() && uses_price_lookup(entry.kind);
        if needs_lookup {
            requests
                .prices
                .insert((entry.asset.clone(), entry.timestamp));
        }
        if needs_lookup || (!entry.price.is_empty() && !entry.price.is_complete()) {
            requests.rates.insert(entry.timestamp);
        }
        if let Some(fee) = &entry.fee {
            match fee.asset.fiat() {
                Some(_) => {
                    requests.rates.insert(entry.timestamp);
                }
                None if fee.asset == entry.asset => {}
                None => {
                    requests.prices.insert((fee.asset.clone(), entry.timestamp));
                    requests.rates.insert(entry.timestamp);
                }
            }
        }
    }

    requests
}
