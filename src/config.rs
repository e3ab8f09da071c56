use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::ledger::normalize_address;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Engine configuration
///
/// Every section has defaults, so an empty YAML document is a valid
/// configuration.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LoggingConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    /// "hourly", "daily", anything else never rotates
    pub rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "./logs".to_string(),
            log_file: "splitpay.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    /// Backend identifier, used to build reconversion ids (`{id}/tx/{hash}`)
    pub backend_id: String,
    /// Pseudo-address the ledger reports for administrative credits
    pub admin_marker: String,
    /// Technical / safe-wallet addresses (with or without `0x`)
    #[serde(default)]
    pub technical_addresses: Vec<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend_id: "ledger:default".to_string(),
            admin_marker: "Admin".to_string(),
            technical_addresses: Vec::new(),
        }
    }
}

impl LedgerConfig {
    /// Whether `address` is one of the configured technical addresses
    pub fn is_technical(&self, address: &str) -> bool {
        let address = normalize_address(address);
        self.technical_addresses
            .iter()
            .any(|t| normalize_address(t) == address)
    }

    /// Whether `address` is the administrative pseudo-address
    pub fn is_admin(&self, address: &str) -> bool {
        address == self.admin_marker
    }

    /// Identifier the identity service uses for a reconversion
    pub fn reconversion_id(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.backend_id.replace(':', "://"), tx_hash)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TransferConfig {
    pub poll_interval_ms: u64,
    pub confirmation_timeout_ms: u64,
    /// Account parameters applied by account validation
    pub validation_limit_above: i64,
    pub validation_limit_below: i64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            confirmation_timeout_ms: 10_000,
            validation_limit_above: 100_000,
            validation_limit_below: 0,
        }
    }
}

impl TransferConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_millis(self.confirmation_timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HistoryConfig {
    pub page_size: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { page_size: 30 }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    /// Lifetime of cached pending-view reads
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_seconds: 5 }
    }
}

impl EngineConfig {
    /// Load `config/{env}.yaml`
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        Self::from_file(&format!("config/{}.yaml", env))
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }
}
