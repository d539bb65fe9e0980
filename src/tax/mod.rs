//! Tax law parameters and per-year aggregation.

use crate::domain::{Currency, Decimal};
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod aggregator;

pub use aggregator::{aggregate, TaxYearSummary};

const DEFAULT_LAW_JSON: &str = include_str!("default_law.json");

#[derive(Debug, Error)]
pub enum TaxError {
    /// No parameters exist for the requested year. Never defaulted.
    #[error("no tax law parameters for year {year} in {jurisdiction} table {version}")]
    UnknownTaxYear {
        year: i32,
        jurisdiction: String,
        version: String,
    },

    /// A yearly total left the representable decimal range.
    #[error("tax totals for year {year} are out of range")]
    ArithmeticOverflow { year: i32 },
}

#[derive(Debug, Error)]
pub enum LawTableError {
    #[error("failed to read law table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse law table: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid law table: {0}")]
    Invalid(String),
}

/// Deduction and flat rate for one tax year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxLawParameters {
    /// Basic deduction in the table's reporting currency.
    pub deduction_amount: Decimal,
    /// Percentage, e.g. `22` for 22%.
    pub flat_rate_percent: Decimal,
}

/// A versioned ruleset: jurisdiction, reporting currency, calendar offset and
/// parameters per year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxLawTable {
    pub jurisdiction: String,
    pub version: String,
    pub currency: Currency,
    /// Offset from UTC used to assign instants to tax years.
    pub utc_offset_minutes: i32,
    pub years: BTreeMap<i32, TaxLawParameters>,
}

impl TaxLawTable {
    /// The embedded Korean ruleset.
    pub fn embedded_default() -> Result<Self, LawTableError> {
        Self::from_json_str(DEFAULT_LAW_JSON)
    }

    pub fn from_json_str(json: &str) -> Result<Self, LawTableError> {
        let table: TaxLawTable = serde_json::from_str(json)?;
        table.validate()?;
        Ok(table)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LawTableError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| LawTableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), LawTableError> {
        if FixedOffset::east_opt(self.utc_offset_minutes * 60).is_none() {
            return Err(LawTableError::Invalid(format!(
                "utcOffsetMinutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        if self.years.is_empty() {
            return Err(LawTableError::Invalid("no tax years defined".to_string()));
        }
        for (year, params) in &self.years {
            if params.deduction_amount.is_negative() {
                return Err(LawTableError::Invalid(format!(
                    "negative deduction for {}",
                    year
                )));
            }
            if params.flat_rate_percent.is_negative()
                || params.flat_rate_percent > Decimal::hundred()
            {
                return Err(LawTableError::Invalid(format!(
                    "flat rate for {} must be within 0..=100",
                    year
                )));
            }
        }
        Ok(())
    }

    pub fn parameters(&self, year: i32) -> Result<&TaxLawParameters, TaxError> {
        self.years.get(&year).ok_or_else(|| TaxError::UnknownTaxYear {
            year,
            jurisdiction: self.jurisdiction.clone(),
            version: self.version.clone(),
        })
    }

    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}
