//! Async coordination around the pure engine: price prefetching and report runs.

pub mod prices;
pub mod runner;

pub use prices::PriceResolver;
pub use runner::{ReportError, ReportOutcome, ReportRunner};
