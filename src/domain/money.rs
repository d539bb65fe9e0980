//! Two-leg monetary amounts (USD and KRW).

use crate::domain::Decimal;
use serde::{Deserialize, Serialize};

/// Reporting currency.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Usd,
    Krw,
}

impl Currency {
    /// Decimal places used when a figure leaves the engine for display/export.
    pub fn display_scale(&self) -> u32 {
        match self {
            Currency::Usd => 2,
            Currency::Krw => 0,
        }
    }

    /// The leg that is not `self`.
    pub fn other(&self) -> Currency {
        match self {
            Currency::Usd => Currency::Krw,
            Currency::Krw => Currency::Usd,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Krw => "KRW",
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "KRW" => Ok(Currency::Krw),
            other => Err(format!("unsupported currency {}", other)),
        }
    }
}

/// An exact amount carried in both USD and KRW.
///
/// Arithmetic is leg-wise; the ruleset's currency picks a leg at aggregation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub usd: Decimal,
    pub krw: Decimal,
}

impl Money {
    pub fn new(usd: Decimal, krw: Decimal) -> Self {
        Self { usd, krw }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    /// The leg for `currency`.
    pub fn get(&self, currency: Currency) -> Decimal {
        match currency {
            Currency::Usd => self.usd,
            Currency::Krw => self.krw,
        }
    }

    /// Scale both legs by a quantity; `None` on overflow.
    pub fn checked_scale(&self, factor: Decimal) -> Option<Money> {
        Some(Money {
            usd: self.usd.checked_mul(factor)?,
            krw: self.krw.checked_mul(factor)?,
        })
    }

    pub fn checked_add(&self, rhs: Money) -> Option<Money> {
        Some(Money {
            usd: self.usd.checked_add(rhs.usd)?,
            krw: self.krw.checked_add(rhs.krw)?,
        })
    }

    pub fn checked_sub(&self, rhs: Money) -> Option<Money> {
        Some(Money {
            usd: self.usd.checked_sub(rhs.usd)?,
            krw: self.krw.checked_sub(rhs.krw)?,
        })
    }

    /// Divide both legs; `None` when `divisor` is zero.
    pub fn per_unit(&self, divisor: Decimal) -> Option<Money> {
        Some(Money {
            usd: self.usd.checked_div(divisor)?,
            krw: self.krw.checked_div(divisor)?,
        })
    }

    pub fn is_zero(&self) -> bool {
        self.usd.is_zero() && self.krw.is_zero()
    }
}

/// A unit price as recorded or looked up; either leg may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriceQuote {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usd: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub krw: Option<Decimal>,
}

impl PriceQuote {
    pub fn new(usd: Option<Decimal>, krw: Option<Decimal>) -> Self {
        Self { usd, krw }
    }

    pub fn usd(price: Decimal) -> Self {
        Self::new(Some(price), None)
    }

    pub fn krw(price: Decimal) -> Self {
        Self::new(None, Some(price))
    }

    pub fn is_empty(&self) -> bool {
        self.usd.is_none() && self.krw.is_none()
    }

    pub fn is_complete(&self) -> bool {
        self.usd.is_some() && self.krw.is_some()
    }

    /// Both legs scaled by `factor`. A leg that overflows is dropped.
    pub fn scale(&self, factor: Decimal) -> PriceQuote {
        PriceQuote {
            usd: self.usd.and_then(|p| p.checked_mul(factor)),
            krw: self.krw.and_then(|p| p.checked_mul(factor)),
        }
    }

    /// Both legs divided by `divisor`; `None` when `divisor` is zero.
    pub fn per_unit(&self, divisor: Decimal) -> Option<PriceQuote> {
        if divisor.is_zero() {
            return None;
        }
        Some(PriceQuote {
            usd: self.usd.and_then(|p| p.checked_div(divisor)),
            krw: self.krw.and_then(|p| p.checked_div(divisor)),
        })
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money {
            usd: self.usd + rhs.usd,
            krw: self.krw + rhs.krw,
        }
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.usd += rhs.usd;
        self.krw += rhs.krw;
    }
}

impl std::ops::Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money {
            usd: self.usd - rhs.usd,
            krw: self.krw - rhs.krw,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_money_legwise_arithmetic() {
        let a = Money::new(d("10"), d("13000"));
        let b = Money::new(d("2.5"), d("3250"));
        assert_eq!(a + b, Money::new(d("12.5"), d("16250")));
        assert_eq!(a - b, Money::new(d("7.5"), d("9750")));
        assert_eq!(b.checked_scale(d("2")), Some(Money::new(d("5"), d("6500"))));
    }

    #[test]
    fn test_money_checked_ops_report_overflow() {
        let e20 = d("100000000000000000000");
        let near_max = d("70000000000000000000000000000");
        let huge = Money::new(e20, e20);
        assert!(huge.checked_scale(d("1000000000")).is_none());
        assert!(Money::new(near_max, Decimal::zero())
            .checked_add(Money::new(near_max, Decimal::zero()))
            .is_none());
        assert_eq!(
            huge.checked_sub(huge),
            Some(Money::new(Decimal::zero(), Decimal::zero()))
        );
        assert_eq!(PriceQuote::usd(e20).scale(d("1000000000")).usd, None);
        assert_eq!(Currency::Krw.other(), Currency::Usd);
    }

    #[test]
    fn test_money_per_unit_zero_divisor() {
        assert!(Money::new(d("1"), d("1")).per_unit(Decimal::zero()).is_none());
        assert_eq!(
            Money::new(d("10"), d("100")).per_unit(d("4")),
            Some(Money::new(d("2.5"), d("25")))
        );
    }

    #[test]
    fn test_price_quote_scale_keeps_missing_legs() {
        let q = PriceQuote::usd(d("100"));
        let scaled = q.scale(d("3"));
        assert_eq!(scaled.usd, Some(d("300")));
        assert_eq!(scaled.krw, None);
        assert!(!scaled.is_complete());
        assert!(PriceQuote::default().is_empty());
        assert!(q.per_unit(Decimal::zero()).is_none());
    }

    #[test]
    fn test_currency_parse_and_scale() {
        assert_eq!(Currency::from_str("krw").unwrap(), Currency::Krw);
        assert!(Currency::from_str("eur").is_err());
        assert_eq!(Currency::Krw.display_scale(), 0);
        assert_eq!(Currency::Usd.display_scale(), 2);
    }
}
