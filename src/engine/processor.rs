use super::inventory::Inventories;
use super::matching::LotMatchingMethod;
use super::normalizer::{EntryClass, LedgerEntry};
use super::pricing::{fee_value, unit_price, uses_price_lookup, PriceLookup, PriceUsage};
use super::{Diagnostic, DisposalKind, DisposalResult, EngineError, Issue};
use crate::domain::{Asset, Currency, Lot, Money};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How unflagged transfers are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferPolicy {
    /// Transfers in and out are independent acquisitions and disposals.
    #[default]
    Taxable,
    /// Every transfer is a custody move.
    NonTaxable,
}

impl TransferPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferPolicy::Taxable => "taxable",
            TransferPolicy::NonTaxable => "non-taxable",
        }
    }
}

impl std::fmt::Display for TransferPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransferPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "taxable" => Ok(TransferPolicy::Taxable),
            "non-taxable" | "nontaxable" | "non_taxable" => Ok(TransferPolicy::NonTaxable),
            other => Err(format!("must be taxable or non-taxable, got {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorOptions {
    pub method: LotMatchingMethod,
    pub transfer_policy: TransferPolicy,
    /// Reporting currency. HIFO ranks by it and only its missing prices are flagged.
    pub currency: Currency,
}

impl ProcessorOptions {
    pub fn new(method: LotMatchingMethod) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn with_transfer_policy(mut self, policy: TransferPolicy) -> Self {
        self.transfer_policy = policy;
        self
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }
}

/// Everything a processing run produced.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// One per disposal entry, in entry order.
    pub disposals: Vec<DisposalResult>,
    /// Warnings in entry order.
    pub diagnostics: Vec<Diagnostic>,
    /// Final lot state, closed lots included.
    pub inventories: Inventories,
}

/// Drives lot inventories through an ordered stream of ledger entries.
///
/// Entries must arrive in sequence order. Per-transaction problems become warnings
/// and never stop the run.
pub struct DisposalProcessor<'a> {
    options: ProcessorOptions,
    prices: &'a dyn PriceLookup,
    inventories: Inventories,

    // Outputs accumulated during processing.
    disposals: Vec<DisposalResult>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> DisposalProcessor<'a> {
    pub fn new(options: ProcessorOptions, prices: &'a dyn PriceLookup) -> Self {
        Self {
            options,
            prices,
            inventories: Inventories::new(),
            disposals: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Apply a single entry to the inventories.
    ///
    /// Fails only when a value leaves the representable decimal range.
    pub fn process_entry(&mut self, entry: &LedgerEntry) -> Result<(), EngineError> {
        match self.class_of(entry) {
            EntryClass::Acquisition => self.acquire(entry),
            EntryClass::Disposal => self.dispose(entry),
            EntryClass::Custody => {
                debug!(
                    id = %entry.transaction_id,
                    asset = %entry.asset,
                    "Custody move, no tax event"
                );
                Ok(())
            }
        }
    }

    pub fn into_output(self) -> ProcessOutput {
        ProcessOutput {
            disposals: self.disposals,
            diagnostics: self.diagnostics,
            inventories: self.inventories,
        }
    }

    fn class_of(&self, entry: &LedgerEntry) -> EntryClass {
        if entry.kind.is_transfer() && self.options.transfer_policy == TransferPolicy::NonTaxable {
            return EntryClass::Custody;
        }
        entry.kind.class()
    }

    fn acquire(&mut self, entry: &LedgerEntry) -> Result<(), EngineError> {
        let currency = self.options.currency;
        let unit = unit_price(entry, self.prices, uses_price_lookup(entry.kind));
        if !unit.has_leg(currency) {
            self.flag_price(entry, &entry.asset, PriceUsage::CostBasis);
        }
        let fee = fee_value(entry, &unit, self.prices);
        if !fee.has_leg(currency) {
            self.flag_fee(entry);
        }

        // Fees are capitalized into the lot's basis.
        let total = unit
            .value
            .checked_scale(entry.quantity)
            .and_then(|value| value.checked_add(fee.value))
            .ok_or_else(|| overflow(entry))?;
        let unit_cost = total.per_unit(entry.quantity).unwrap_or(unit.value);

        self.inventories.acquire(Lot::new(
            entry.asset.clone(),
            entry.source_id.clone(),
            entry.transaction_id.clone(),
            entry.timestamp,
            entry.quantity,
            unit_cost,
        ));
        Ok(())
    }

    fn dispose(&mut self, entry: &LedgerEntry) -> Result<(), EngineError> {
        let Some(kind) = DisposalKind::from_entry(entry.kind) else {
            return Ok(());
        };
        let currency = self.options.currency;
        let mut warnings = Vec::new();

        let unit = unit_price(entry, self.prices, false);
        let proceeds = if kind == DisposalKind::Fee {
            Money::zero()
        } else {
            if !unit.has_leg(currency) {
                warnings.push(self.price_issue(entry, &entry.asset, PriceUsage::Proceeds));
            }
            unit.value
                .checked_scale(entry.quantity)
                .ok_or_else(|| overflow(entry))?
        };

        let fee = fee_value(entry, &unit, self.prices);
        if !fee.has_leg(currency) {
            let asset = entry
                .fee
                .as_ref()
                .map_or_else(|| entry.asset.clone(), |f| f.asset.clone());
            warnings.push(self.price_issue(entry, &asset, PriceUsage::Fee));
        }

        let rule = self.options.method.in_currency(currency);
        let consumption = self
            .inventories
            .consume(&entry.asset, entry.quantity, &rule);
        if consumption.is_short() {
            warn!(
                id = %entry.transaction_id,
                asset = %entry.asset,
                requested = %entry.quantity,
                unmatched = %consumption.unmatched,
                "Insufficient basis, residual gets zero cost"
            );
            warnings.push(Issue::InsufficientBasis {
                requested: entry.quantity,
                unmatched: consumption.unmatched,
            });
        }

        let cost = consumption.cost().ok_or_else(|| overflow(entry))?;
        let gain_loss = proceeds
            .checked_sub(cost)
            .and_then(|net| net.checked_sub(fee.value))
            .ok_or_else(|| overflow(entry))?;

        for issue in &warnings {
            self.diagnostics
                .push(Diagnostic::for_entry(entry, issue.clone()));
        }
        self.disposals.push(DisposalResult {
            seq: entry.seq,
            transaction_id: entry.transaction_id.clone(),
            source_id: entry.source_id.clone(),
            asset: entry.asset.clone(),
            kind,
            quantity: entry.quantity,
            proceeds,
            cost_basis_consumed: cost,
            fee: fee.value,
            gain_loss,
            lots_consumed: consumption.taken,
            unmatched_quantity: consumption.unmatched,
            warnings,
            timestamp: entry.timestamp,
        });
        Ok(())
    }

    fn price_issue(&self, entry: &LedgerEntry, asset: &Asset, usage: PriceUsage) -> Issue {
        debug!(id = %entry.transaction_id, asset = %asset, ?usage, "Price unavailable, using zero");
        Issue::PriceUnavailable {
            asset: asset.clone(),
            usage,
        }
    }

    fn flag_price(&mut self, entry: &LedgerEntry, asset: &Asset, usage: PriceUsage) {
        let issue = self.price_issue(entry, asset, usage);
        self.diagnostics.push(Diagnostic::for_entry(entry, issue));
    }

    fn flag_fee(&mut self, entry: &LedgerEntry) {
        if let Some(fee) = &entry.fee {
            let asset = fee.asset.clone();
            self.flag_price(entry, &asset, PriceUsage::Fee);
        }
    }
}

fn overflow(entry: &LedgerEntry) -> EngineError {
    warn!(id = %entry.transaction_id, source = %entry.source_id, "Value out of decimal range");
    EngineError::ArithmeticOverflow {
        source_id: entry.source_id.clone(),
        transaction_id: entry.transaction_id.clone(),
    }
}

/// Process `entries` in order on the current thread.
///
/// The token, when given, is checked between entries.
pub fn process(
    entries: &[LedgerEntry],
    options: ProcessorOptions,
    prices: &dyn PriceLookup,
    cancel: Option<&CancellationToken>,
) -> Result<ProcessOutput, EngineError> {
    let mut processor = DisposalProcessor::new(options, prices);
    for entry in entries {
        if cancel.is_some_and(|c| c.is_cancelled()) {
            return Err(EngineError::Cancelled);
        }
        processor.process_entry(entry)?;
    }
    Ok(processor.into_output())
}

/// Process each asset's entries on a rayon worker, then merge by entry sequence.
///
/// Inventories never interact across assets, so the merged output equals [`process`].
pub fn process_sharded(
    entries: &[LedgerEntry],
    options: ProcessorOptions,
    prices: &dyn PriceLookup,
    cancel: Option<&CancellationToken>,
) -> Result<ProcessOutput, EngineError> {
    let mut shards: BTreeMap<&Asset, Vec<&LedgerEntry>> = BTreeMap::new();
    for entry in entries {
        shards.entry(&entry.asset).or_default().push(entry);
    }
    debug!(shards = shards.len(), entries = entries.len(), "Processing asset shards");

    let outputs = shards
        .into_par_iter()
        .map(|(_, shard)| {
            let mut processor = DisposalProcessor::new(options, prices);
            for entry in shard {
                if cancel.is_some_and(|c| c.is_cancelled()) {
                    return Err(EngineError::Cancelled);
                }
                processor.process_entry(entry)?;
            }
            Ok(processor.into_output())
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut merged = ProcessOutput::default();
    for output in outputs {
        merged.disposals.extend(output.disposals);
        merged.diagnostics.extend(output.diagnostics);
        merged.inventories.merge(output.inventories);
    }
    merged.disposals.sort_by_key(|d| d.seq);
    merged.diagnostics.sort_by_key(|d| d.seq);
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Decimal, PriceQuote, SourceId, Timestamp, TransactionId};
    use crate::engine::normalizer::{AttachedFee, EntryKind};
    use crate::engine::pricing::{NoPrices, PriceBook};
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse_rfc3339(s).unwrap()
    }

    fn entry(
        seq: usize,
        kind: EntryKind,
        asset: &str,
        qty: &str,
        usd: Option<&str>,
        at: &str,
    ) -> LedgerEntry {
        LedgerEntry {
            seq,
            transaction_id: TransactionId::new(format!("t{}", seq)),
            source_id: SourceId::new("upbit"),
            timestamp: ts(at),
            kind,
            asset: Asset::new(asset),
            quantity: d(qty),
            price: PriceQuote::new(usd.map(d), usd.map(|p| d(p) * d("1000"))),
            fee: None,
        }
    }

    fn btc_history() -> Vec<LedgerEntry> {
        vec![
            entry(0, EntryKind::Buy, "BTC", "1", Some("10000"), "2023-01-01T00:00:00Z"),
            entry(1, EntryKind::Buy, "BTC", "1", Some("30000"), "2023-06-01T00:00:00Z"),
            entry(2, EntryKind::Sell, "BTC", "1", Some("40000"), "2024-01-01T00:00:00Z"),
        ]
    }

    fn run(entries: &[LedgerEntry], method: LotMatchingMethod) -> ProcessOutput {
        process(entries, ProcessorOptions::new(method), &NoPrices, None).unwrap()
    }

    #[test]
    fn test_gain_per_method() {
        let entries = btc_history();
        for (method, gain) in [
            (LotMatchingMethod::Fifo, "30000"),
            (LotMatchingMethod::Lifo, "10000"),
            (LotMatchingMethod::Hifo, "10000"),
        ] {
            let out = run(&entries, method);
            assert_eq!(out.disposals.len(), 1);
            assert_eq!(out.disposals[0].gain_loss.usd, d(gain), "{}", method);
        }
    }

    #[test]
    fn test_sell_without_lots_has_zero_basis() {
        let entries = vec![entry(
            0,
            EntryKind::Sell,
            "BTC",
            "1",
            Some("40000"),
            "2024-01-01T00:00:00Z",
        )];
        let out = run(&entries, LotMatchingMethod::Fifo);
        let result = &out.disposals[0];
        assert!(result.has_insufficient_basis());
        assert_eq!(result.cost_basis_consumed, Money::zero());
        assert_eq!(result.gain_loss, result.proceeds);
        assert!(matches!(result.warnings[0], Issue::InsufficientBasis { .. }));
        assert_eq!(out.diagnostics.len(), 1);
    }

    #[test]
    fn test_fee_record_realizes_basis_as_loss() {
        let entries = vec![
            entry(0, EntryKind::Buy, "ETH", "2", Some("1000"), "2024-01-01T00:00:00Z"),
            entry(1, EntryKind::Fee, "ETH", "0.5", None, "2024-02-01T00:00:00Z"),
        ];
        let out = run(&entries, LotMatchingMethod::Fifo);
        let fee = &out.disposals[0];
        assert_eq!(fee.kind, DisposalKind::Fee);
        assert!(fee.proceeds.is_zero());
        assert_eq!(fee.gain_loss.usd, d("-500"));
        assert!(fee.warnings.is_empty());
    }

    #[test]
    fn test_attached_fee_capitalized_and_deducted() {
        let mut buy = entry(0, EntryKind::Buy, "BTC", "2", Some("100"), "2024-01-01T00:00:00Z");
        buy.fee = Some(AttachedFee {
            amount: d("10"),
            asset: Asset::new("USD"),
        });
        let mut sell = entry(1, EntryKind::Sell, "BTC", "1", Some("200"), "2024-02-01T00:00:00Z");
        sell.fee = Some(AttachedFee {
            amount: d("0.01"),
            asset: Asset::new("BTC"),
        });
        let book = PriceBook::new().with_rate(ts("2024-01-01T00:00:00Z"), d("1000"));
        let out = process(&[buy, sell], ProcessorOptions::default(), &book, None).unwrap();

        let lot = &out.inventories.get(&Asset::new("BTC")).unwrap().lots()[0];
        assert_eq!(lot.unit_cost.usd, d("105"));

        let result = &out.disposals[0];
        assert_eq!(result.fee.usd, d("2"));
        // 200 - 105 - 2
        assert_eq!(result.gain_loss.usd, d("93"));
        // Attached fee does not move inventory.
        assert_eq!(out.inventories.get(&Asset::new("BTC")).unwrap().open_quantity(), d("1"));
    }

    #[test]
    fn test_reward_uses_lookup_or_flags_zero_basis() {
        let reward = entry(0, EntryKind::Reward, "SOL", "3", None, "2024-03-01T00:00:00Z");
        let out = run(std::slice::from_ref(&reward), LotMatchingMethod::Fifo);
        assert_eq!(out.diagnostics.len(), 1);
        assert!(matches!(
            out.diagnostics[0].issue,
            Issue::PriceUnavailable {
                usage: PriceUsage::CostBasis,
                ..
            }
        ));

        let book = PriceBook::new().with_price(
            Asset::new("SOL"),
            reward.timestamp,
            PriceQuote::new(Some(d("20")), Some(d("26000"))),
        );
        let out = process(&[reward], ProcessorOptions::default(), &book, None).unwrap();
        assert!(out.diagnostics.is_empty());
        let lot = &out.inventories.get(&Asset::new("SOL")).unwrap().lots()[0];
        assert_eq!(lot.unit_cost, Money::new(d("20"), d("26000")));
    }

    #[test]
    fn test_custody_moves_emit_nothing() {
        let entries = vec![
            entry(0, EntryKind::Buy, "ETH", "1", Some("1000"), "2024-01-01T00:00:00Z"),
            entry(1, EntryKind::Stake, "ETH", "1", None, "2024-01-02T00:00:00Z"),
            entry(2, EntryKind::Unstake, "ETH", "1", None, "2024-01-03T00:00:00Z"),
            entry(
                3,
                EntryKind::InternalTransfer,
                "ETH",
                "1",
                Some("1100"),
                "2024-01-04T00:00:00Z",
            ),
        ];
        let out = run(&entries, LotMatchingMethod::Fifo);
        assert!(out.disposals.is_empty());
        assert_eq!(out.inventories.get(&Asset::new("ETH")).unwrap().open_quantity(), d("1"));
    }

    #[test]
    fn test_non_taxable_policy_ignores_transfers() {
        let entries = vec![
            entry(0, EntryKind::Buy, "ETH", "1", Some("1000"), "2024-01-01T00:00:00Z"),
            entry(1, EntryKind::TransferOut, "ETH", "1", Some("1500"), "2024-01-02T00:00:00Z"),
            entry(2, EntryKind::TransferIn, "ETH", "1", Some("1500"), "2024-01-03T00:00:00Z"),
        ];
        let taxable = run(&entries, LotMatchingMethod::Fifo);
        assert_eq!(taxable.disposals.len(), 1);

        let options = ProcessorOptions::default().with_transfer_policy(TransferPolicy::NonTaxable);
        let out = process(&entries, options, &NoPrices, None).unwrap();
        assert!(out.disposals.is_empty());
        assert_eq!(out.inventories.get(&Asset::new("ETH")).unwrap().lots().len(), 1);
    }

    #[test]
    fn test_sharded_matches_sequential() {
        let mut entries = btc_history();
        let eth_buy = entry(1, EntryKind::Buy, "ETH", "5", Some("2000"), "2023-02-01T00:00:00Z");
        entries.insert(1, eth_buy);
        entries.push(entry(4, EntryKind::Sell, "ETH", "6", Some("2500"), "2024-02-01T00:00:00Z"));
        for (i, e) in entries.iter_mut().enumerate() {
            e.seq = i;
        }

        let options = ProcessorOptions::new(LotMatchingMethod::Hifo);
        let seq = process(&entries, options, &NoPrices, None).unwrap();
        let par = process_sharded(&entries, options, &NoPrices, None).unwrap();
        assert_eq!(seq.disposals, par.disposals);
        assert_eq!(seq.diagnostics, par.diagnostics);
        assert_eq!(seq.inventories, par.inventories);
    }

    #[test]
    fn test_cancelled_token_stops_run() {
        let token = CancellationToken::new();
        token.cancel();
        let entries = btc_history();
        let options = ProcessorOptions::default();
        let err = process(&entries, options, &NoPrices, Some(&token)).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        let err = process_sharded(&entries, options, &NoPrices, Some(&token)).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    fn won_entry(seq: usize, kind: EntryKind, qty: &str, krw: &str, at: &str) -> LedgerEntry {
        let mut e = entry(seq, kind, "BTC", qty, None, at);
        e.price = PriceQuote::krw(d(krw));
        e
    }

    #[test]
    fn test_hifo_in_won_without_rates() {
        let entries = vec![
            won_entry(0, EntryKind::Buy, "1", "10000000", "2024-01-01T00:00:00Z"),
            won_entry(1, EntryKind::Buy, "1", "30000000", "2024-02-01T00:00:00Z"),
            won_entry(2, EntryKind::Sell, "1", "40000000", "2024-03-01T00:00:00Z"),
        ];
        let options = ProcessorOptions::new(LotMatchingMethod::Hifo).with_currency(Currency::Krw);
        let out = process(&entries, options, &NoPrices, None).unwrap();
        let result = &out.disposals[0];
        assert_eq!(result.lots_consumed[0].lot_id.as_str(), "t1");
        assert_eq!(result.gain_loss.krw, d("10000000"));
        assert!(out.diagnostics.is_empty());

        // Reporting in USD, the missing leg is the one that matters.
        let usd = ProcessorOptions::new(LotMatchingMethod::Hifo);
        let out = process(&entries, usd, &NoPrices, None).unwrap();
        assert_eq!(out.disposals[0].lots_consumed[0].lot_id.as_str(), "t1");
        assert_eq!(out.diagnostics.len(), 3);
    }

    #[test]
    fn test_out_of_range_value_is_an_error() {
        let e20 = "100000000000000000000";
        let at = "2024-01-01T00:00:00Z";
        let entries = vec![entry(0, EntryKind::Buy, "BTC", e20, Some("1000000000"), at)];
        let options = ProcessorOptions::default();
        let err = process(&entries, options, &NoPrices, None).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ArithmeticOverflow { ref transaction_id, .. }
                if transaction_id.as_str() == "t0"
        ));
        let err = process_sharded(&entries, options, &NoPrices, None).unwrap_err();
        assert!(matches!(err, EngineError::ArithmeticOverflow { .. }));
    }

    #[test]
    fn test_transfer_policy_parse() {
        assert_eq!(TransferPolicy::from_str("Non-Taxable").unwrap(), TransferPolicy::NonTaxable);
        assert_eq!(TransferPolicy::from_str("taxable").unwrap(), TransferPolicy::Taxable);
        assert!(TransferPolicy::from_str("maybe").is_err());
    }
}
