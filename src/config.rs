use crate::engine::{LotMatchingMethod, TransferPolicy};
use crate::tax::TaxLawTable;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    /// Price feed base URL; without one, lookups find nothing.
    pub price_api_url: Option<String>,
    /// JSON law table overriding the embedded default.
    pub tax_law_path: Option<String>,
    pub default_lot_method: LotMatchingMethod,
    pub transfer_policy: TransferPolicy,
    /// Shard processing by asset on the rayon pool.
    pub parallel_assets: bool,
    pub price_lookup_concurrency: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
    #[error("Failed to load tax law table: {0}")]
    LawTable(#[from] crate::tax::LawTableError),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = env_map
            .get("PORT")
            .map(|s| s.as_str())
            .unwrap_or("8080")
            .parse::<u16>()
            .map_err(|_| {
                ConfigError::InvalidValue("PORT".to_string(), "must be a valid u16".to_string())
            })?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let price_api_url = non_empty(&env_map, "PRICE_API_URL");
        let tax_law_path = non_empty(&env_map, "TAX_LAW_PATH");

        let default_lot_method = LotMatchingMethod::from_str(
            env_map
                .get("DEFAULT_LOT_METHOD")
                .map(|s| s.as_str())
                .unwrap_or("fifo"),
        )
        .map_err(|msg| ConfigError::InvalidValue("DEFAULT_LOT_METHOD".to_string(), msg))?;

        let transfer_policy = TransferPolicy::from_str(
            env_map
                .get("TRANSFER_POLICY")
                .map(|s| s.as_str())
                .unwrap_or("taxable"),
        )
        .map_err(|msg| ConfigError::InvalidValue("TRANSFER_POLICY".to_string(), msg))?;

        let parallel_assets = match env_map
            .get("PARALLEL_ASSETS")
            .map(|s| s.trim().to_ascii_lowercase())
            .as_deref()
            .unwrap_or("true")
        {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            other => {
                return Err(ConfigError::InvalidValue(
                    "PARALLEL_ASSETS".to_string(),
                    format!("must be true or false, got {}", other),
                ))
            }
        };

        let price_lookup_concurrency = env_map
            .get("PRICE_LOOKUP_CONCURRENCY")
            .map(|s| s.as_str())
            .unwrap_or("4")
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "PRICE_LOOKUP_CONCURRENCY".to_string(),
                    "must be a positive integer".to_string(),
                )
            })?;

        Ok(Config {
            port,
            database_path,
            price_api_url,
            tax_law_path,
            default_lot_method,
            transfer_policy,
            parallel_assets,
            price_lookup_concurrency,
        })
    }

    /// The configured law table, or the embedded default.
    pub fn load_law_table(&self) -> Result<TaxLawTable, ConfigError> {
        let table = match &self.tax_law_path {
            Some(path) => TaxLawTable::from_path(path)?,
            None => TaxLawTable::embedded_default()?,
        };
        Ok(table)
    }
}

fn non_empty(env_map: &HashMap<String, String>, key: &str) -> Option<String> {
    env_map
        .get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
