//! SQLite persistence for the ledger and the price cache.
//!
//! This module provides:
//! - Database initialization, pragmas and schema
//! - Repository layer for ledger records and cached prices

pub mod migrations;
pub mod repo;

pub use migrations::init_db;
pub use repo::{ImportSummary, Repository};
