//! Domain primitives: Timestamp, Asset, SourceId, TransactionId.

use chrono::{DateTime, Datelike, FixedOffset, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use super::Currency;

/// An exact instant (nanosecond precision, UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub DateTime<Utc>);

impl Timestamp {
    /// Wrap a UTC datetime.
    pub fn new(at: DateTime<Utc>) -> Self {
        Timestamp(at)
    }

    /// Build a timestamp from milliseconds since the Unix epoch.
    pub fn from_millis(ms: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(ms).single().map(Timestamp)
    }

    /// Parse an RFC 3339 instant, keeping sub-second precision.
    pub fn parse_rfc3339(s: &str) -> Result<Self, chrono::ParseError> {
        DateTime::parse_from_rfc3339(s.trim()).map(|dt| Timestamp(dt.with_timezone(&Utc)))
    }

    /// Borrow the underlying datetime.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Calendar year of this instant as observed at `offset`.
    pub fn year_at(&self, offset: FixedOffset) -> i32 {
        self.0.with_timezone(&offset).year()
    }

    /// RFC 3339 text with nanoseconds, used for storage and stable keys.
    pub fn to_rfc3339_nanos(&self) -> String {
        self.0.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
    }

    /// Nanoseconds since the epoch; `None` outside the representable range.
    pub fn as_nanos(&self) -> Option<i64> {
        self.0.timestamp_nanos_opt()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_rfc3339_nanos())
    }
}

/// Asset symbol (e.g., "BTC", "ETH"), upper-cased on construction and deserialization.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Asset(pub String);

impl Asset {
    /// Create an Asset from a symbol, trimming and upper-casing it.
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Asset(symbol.as_ref().trim().to_uppercase())
    }

    /// Get the symbol as a string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The fiat currency this symbol denotes, if any.
    pub fn fiat(&self) -> Option<Currency> {
        match self.0.as_str() {
            "USD" => Some(Currency::Usd),
            "KRW" => Some(Currency::Krw),
            _ => None,
        }
    }
}

impl From<String> for Asset {
    fn from(symbol: String) -> Self {
        Asset::new(symbol)
    }
}

impl From<Asset> for String {
    fn from(asset: Asset) -> Self {
        asset.0
    }
}

impl std::fmt::Display for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exchange or wallet a record was synchronized from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(source: impl Into<String>) -> Self {
        SourceId(source.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a ledger record, unique within its source.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        TransactionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_is_normalized() {
        assert_eq!(Asset::new(" btc ").as_str(), "BTC");
        assert_eq!(Asset::new("eth"), Asset::new("ETH"));
    }

    #[test]
    fn test_asset_fiat_detection() {
        assert_eq!(Asset::new("usd").fiat(), Some(Currency::Usd));
        assert_eq!(Asset::new("KRW").fiat(), Some(Currency::Krw));
        assert_eq!(Asset::new("USDT").fiat(), None);
    }

    #[test]
    fn test_timestamp_keeps_sub_second_precision() {
        let a = Timestamp::parse_rfc3339("2024-01-01T00:00:00.000000001Z").unwrap();
        let b = Timestamp::parse_rfc3339("2024-01-01T00:00:00.000000002Z").unwrap();
        assert!(a < b);
        assert_eq!(a.to_rfc3339_nanos(), "2024-01-01T00:00:00.000000001Z");
    }

    #[test]
    fn test_timestamp_year_respects_offset() {
        // 2023-12-31T20:00Z is already 2024 in Seoul (UTC+9).
        let ts = Timestamp::parse_rfc3339("2023-12-31T20:00:00Z").unwrap();
        let utc = FixedOffset::east_opt(0).unwrap();
        let kst = FixedOffset::east_opt(9 * 3600).unwrap();
        assert_eq!(ts.year_at(utc), 2023);
        assert_eq!(ts.year_at(kst), 2024);
    }

    #[test]
    fn test_timestamp_serializes_as_rfc3339() {
        let ts = Timestamp::parse_rfc3339("2024-06-01T12:30:00.5+09:00").unwrap();
        let json = serde_json::to_string(&ts).unwrap();
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(ts, back);
    }
}
