pub mod api;
pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod report;
pub mod tax;

pub use config::Config;
pub use datasource::{HttpPriceSource, PriceSource, PriceSourceError, StaticPriceSource};
pub use db::{init_db, ImportSummary, Repository};
pub use domain::{
    Asset, Currency, Decimal, Lot, LotConsumption, Money, PriceQuote, SourceId, Timestamp,
    TransactionId, TransactionKind, TransactionRecord,
};
pub use engine::{
    compute_tax_year, normalize, Diagnostic, DisposalResult, Issue, LotMatchingMethod,
    PriceBook, PriceLookup, ProcessorOptions, TransferPolicy,
};
pub use error::AppError;
pub use orchestration::{PriceResolver, ReportError, ReportRunner};
pub use report::{export, TaxReport};
pub use tax::{aggregate, TaxError, TaxLawTable, TaxYearSummary};
