/// Wallet configuration from environment variables or TOML
///
/// Controls the Bitcoin network, key-derivation cost, account limits and
/// session timeouts. Defaults to Testnet so a misconfigured host never
/// touches mainnet funds.

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::crypto::MIN_KDF_ITERATIONS;

pub const DEFAULT_KDF_ITERATIONS: u32 = 210_000;
pub const DEFAULT_MAX_ACCOUNTS: usize = 100;
pub const DEFAULT_RATE_LIMIT_OPS: usize = 5;
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
pub const DEFAULT_AUTO_LOCK_MINUTES: u32 = 15;
pub const DEFAULT_GAP_LIMIT: u32 = 20;
pub const DEFAULT_DUST_THRESHOLD: u64 = 546;
pub const DEFAULT_MAX_FEE_RATE: u64 = 1_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown network: {0}")]
    UnknownNetwork(String),

    #[error("Invalid value for {0}")]
    InvalidValue(&'static str),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

#[derive(Clone, Debug)]
pub struct WalletConfig {
    /// Bitcoin network new wallets are created on
    pub network: bitcoin::Network,
    /// Directory used by the file-backed blob store
    pub data_dir: PathBuf,
    /// PBKDF2 iterations for newly encrypted secrets
    pub kdf_iterations: u32,
    /// Maximum number of accounts per wallet
    pub max_accounts: usize,
    /// Account creations/imports allowed per rate-limit window
    pub rate_limit_ops: usize,
    pub rate_limit_window: Duration,
    /// Session auto-lock timeout for new wallets
    pub auto_lock_minutes: u32,
    /// Consecutive unused receive addresses allowed before generation stops
    pub gap_limit: u32,
    pub dust_threshold: u64,
    /// Upper bound on accepted fee rates (sat/vB)
    pub max_fee_rate: u64,
}

/// TOML shape; every field is optional and falls back to the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    network: Option<String>,
    data_dir: Option<PathBuf>,
    kdf_iterations: Option<u32>,
    max_accounts: Option<usize>,
    rate_limit_ops: Option<usize>,
    rate_limit_window_secs: Option<u64>,
    auto_lock_minutes: Option<u32>,
    gap_limit: Option<u32>,
    dust_threshold: Option<u64>,
    max_fee_rate: Option<u64>,
}

impl WalletConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `BITCOIN_NETWORK`: "testnet" (default), "signet", "regtest" or "mainnet"
    /// - `WALLET_DATA_DIR`: directory for the wallet record (default "./wallets")
    /// - `WALLET_KDF_ITERATIONS`: PBKDF2 iterations (minimum 100000)
    /// - `WALLET_MAX_ACCOUNTS`: account cap (default 100)
    /// - `WALLET_AUTO_LOCK_MINUTES`: session timeout (default 15)
    ///
    /// # Examples
    ///
    /// ```bash
    /// BITCOIN_NETWORK=regtest WALLET_DATA_DIR=/tmp/wallets my-host
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(network) = env::var("BITCOIN_NETWORK") {
            config.network = parse_network(&network)?;
        }
        if let Ok(dir) = env::var("WALLET_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(value) = env::var("WALLET_KDF_ITERATIONS") {
            config.kdf_iterations = value
                .parse()
                .map_err(|_| ConfigError::InvalidValue("WALLET_KDF_ITERATIONS"))?;
        }
        if let Ok(value) = env::var("WALLET_MAX_ACCOUNTS") {
            config.max_accounts = value
                .parse()
                .map_err(|_| ConfigError::InvalidValue("WALLET_MAX_ACCOUNTS"))?;
        }
        if let Ok(value) = env::var("WALLET_AUTO_LOCK_MINUTES") {
            config.auto_lock_minutes = value
                .parse()
                .map_err(|_| ConfigError::InvalidValue("WALLET_AUTO_LOCK_MINUTES"))?;
        }

        config.validate()?;
        config.log_summary();
        Ok(config)
    }

    /// Load configuration from a TOML document
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(contents)?;
        let defaults = Self::default();

        let network = match raw.network {
            Some(name) => parse_network(&name)?,
            None => defaults.network,
        };

        let config = Self {
            network,
            data_dir: raw.data_dir.unwrap_or(defaults.data_dir),
            kdf_iterations: raw.kdf_iterations.unwrap_or(defaults.kdf_iterations),
            max_accounts: raw.max_accounts.unwrap_or(defaults.max_accounts),
            rate_limit_ops: raw.rate_limit_ops.unwrap_or(defaults.rate_limit_ops),
            rate_limit_window: raw
                .rate_limit_window_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit_window),
            auto_lock_minutes: raw.auto_lock_minutes.unwrap_or(defaults.auto_lock_minutes),
            gap_limit: raw.gap_limit.unwrap_or(defaults.gap_limit),
            dust_threshold: raw.dust_threshold.unwrap_or(defaults.dust_threshold),
            max_fee_rate: raw.max_fee_rate.unwrap_or(defaults.max_fee_rate),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(ConfigError::InvalidValue("kdf_iterations"));
        }
        if self.max_accounts == 0 {
            return Err(ConfigError::InvalidValue("max_accounts"));
        }
        if self.rate_limit_ops == 0 || self.rate_limit_window.is_zero() {
            return Err(ConfigError::InvalidValue("rate_limit"));
        }
        if self.auto_lock_minutes == 0 {
            return Err(ConfigError::InvalidValue("auto_lock_minutes"));
        }
        if self.gap_limit == 0 {
            return Err(ConfigError::InvalidValue("gap_limit"));
        }
        if self.max_fee_rate == 0 {
            return Err(ConfigError::InvalidValue("max_fee_rate"));
        }
        Ok(())
    }

    fn log_summary(&self) {
        match self.network {
            bitcoin::Network::Bitcoin => log::info!("🌐 Using MAINNET network"),
            bitcoin::Network::Regtest => log::info!("🔧 Using REGTEST network"),
            other => log::info!("🌐 Using {} network", other),
        }
        log::info!("📁 Wallet data directory: {}", self.data_dir.display());
        log::debug!(
            "KDF iterations: {}, max accounts: {}, auto-lock: {} min",
            self.kdf_iterations,
            self.max_accounts,
            self.auto_lock_minutes
        );
    }

    /// Get the BIP44 coin type for this network
    ///
    /// - Mainnet: 0
    /// - Testnet/Signet/Regtest: 1
    pub fn coin_type(&self) -> u32 {
        coin_type(self.network)
    }

    /// Get the account-level derivation path prefix for a purpose
    ///
    /// Returns e.g. "m/84'/1'" for NativeSegWit on test networks
    pub fn purpose_path(&self, purpose: u32) -> String {
        format!("m/{}'/{}'", purpose, self.coin_type())
    }
}

impl Default for WalletConfig {
    /// Default configuration (Testnet)
    fn default() -> Self {
        Self {
            network: bitcoin::Network::Testnet,
            data_dir: PathBuf::from("./wallets"),
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            max_accounts: DEFAULT_MAX_ACCOUNTS,
            rate_limit_ops: DEFAULT_RATE_LIMIT_OPS,
            rate_limit_window: Duration::from_secs(DEFAULT_RATE_LIMIT_WINDOW_SECS),
            auto_lock_minutes: DEFAULT_AUTO_LOCK_MINUTES,
            gap_limit: DEFAULT_GAP_LIMIT,
            dust_threshold: DEFAULT_DUST_THRESHOLD,
            max_fee_rate: DEFAULT_MAX_FEE_RATE,
        }
    }
}

pub fn coin_type(network: bitcoin::Network) -> u32 {
    match network {
        bitcoin::Network::Bitcoin => 0,
        _ => 1, // All test networks use coin type 1
    }
}

fn parse_network(name: &str) -> Result<bitcoin::Network, ConfigError> {
    match name.trim().to_lowercase().as_str() {
        "mainnet" | "bitcoin" => Ok(bitcoin::Network::Bitcoin),
        "testnet" | "" => Ok(bitcoin::Network::Testnet),
        "signet" => Ok(bitcoin::Network::Signet),
        "regtest" => Ok(bitcoin::Network::Regtest),
        other => Err(ConfigError::UnknownNetwork(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_testnet() {
        let config = WalletConfig::default();
        assert!(matches!(config.network, bitcoin::Network::Testnet));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_coin_type() {
        let testnet_config = WalletConfig::default();
        assert_eq!(testnet_config.coin_type(), 1);
        assert_eq!(testnet_config.purpose_path(84), "m/84'/1'");

        let mainnet_config = WalletConfig {
            network: bitcoin::Network::Bitcoin,
            ..Default::default()
        };
        assert_eq!(mainnet_config.coin_type(), 0);
        assert_eq!(mainnet_config.purpose_path(44), "m/44'/0'");
    }

    #[test]
    fn test_from_toml() {
        let config = WalletConfig::from_toml_str(
            r#"
            network = "regtest"
            max_accounts = 10
            rate_limit_window_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.network, bitcoin::Network::Regtest);
        assert_eq!(config.max_accounts, 10);
        assert_eq!(config.rate_limit_window, Duration::from_secs(30));
        assert_eq!(config.kdf_iterations, DEFAULT_KDF_ITERATIONS);
    }

    #[test]
    fn test_rejects_cheap_kdf() {
        let result = WalletConfig::from_toml_str("kdf_iterations = 1000");
        assert!(matches!(result, Err(ConfigError::InvalidValue("kdf_iterations"))));
    }

    #[test]
    fn test_rejects_unknown_network() {
        let result = WalletConfig::from_toml_str("network = \"litecoin\"");
        assert!(matches!(result, Err(ConfigError::UnknownNetwork(_))));
    }
}
