//! Configuration module for the ticket buyer
//!
//! Configuration is loaded from a TOML file; RPC endpoints, credentials and
//! the voting address can be overridden from the environment (a `.env` file
//! is honoured).

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::rpc::RpcEndpoint;
use crate::ticket_buyer::{ControllerSettings, PurchaseConfig, StakeInfoRetry};
use crate::types::Amount;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Full node RPC
    #[serde(default = "default_node")]
    pub node: RpcConfig,

    /// Wallet backend RPC
    #[serde(default)]
    pub wallet: WalletConfig,

    /// Purchasing limits
    #[serde(default)]
    pub ticket_buyer: TicketBuyerConfig,

    /// Round retry policy and block polling
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Monitoring and metrics
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    pub url: String,

    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_secs: u64,

    /// Rate limit (requests per second); 0 disables it
    #[serde(default)]
    pub rate_limit_rps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    #[serde(flatten)]
    pub rpc: RpcConfig,

    /// Account tickets are bought from
    #[serde(default = "default_account")]
    pub account: String,
}

/// Amounts are written in coins
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketBuyerConfig {
    /// Address that receives voting rights (stake pool). Unset means
    /// tickets are wallet-native.
    #[serde(default)]
    pub voting_address: Option<String>,

    #[serde(default = "default_max_per_block")]
    pub max_per_block: u32,

    #[serde(default = "default_max_fee")]
    pub max_fee: f64,

    /// Session spend ceiling; 0 buys nothing
    #[serde(default)]
    pub spend_limit: f64,

    #[serde(default)]
    pub min_balance: f64,

    /// Blocks in the ticket price average; 0 disables the price bound
    #[serde(default)]
    pub price_average_window: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Attempts per block, first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default = "default_stake_info_attempts")]
    pub stake_info_attempts: u32,

    #[serde(default = "default_stake_info_retry_delay_ms")]
    pub stake_info_retry_delay_ms: u64,

    #[serde(default = "default_block_poll_interval_ms")]
    pub block_poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

// Default value functions
fn default_node() -> RpcConfig {
    RpcConfig {
        url: "https://127.0.0.1:9109".to_string(),
        ..RpcConfig::default()
    }
}
fn default_rpc_timeout() -> u64 { 30 }
fn default_account() -> String { "default".to_string() }
fn default_max_per_block() -> u32 { 5 }
fn default_max_fee() -> f64 { 0.1 }
fn default_max_attempts() -> u32 { 3 }
fn default_retry_delay_ms() -> u64 { 5_000 }
fn default_stake_info_attempts() -> u32 { 10 }
fn default_stake_info_retry_delay_ms() -> u64 { 500 }
fn default_block_poll_interval_ms() -> u64 { 1_000 }
fn default_metrics_port() -> u16 { 9090 }
fn default_true() -> bool { true }

impl Default for Config {
    fn default() -> Self {
        Self {
            node: default_node(),
            wallet: WalletConfig::default(),
            ticket_buyer: TicketBuyerConfig::default(),
            controller: ControllerConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: "https://127.0.0.1:9110".to_string(),
            user: None,
            password: None,
            timeout_secs: default_rpc_timeout(),
            rate_limit_rps: 0,
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            account: default_account(),
        }
    }
}

impl Default for TicketBuyerConfig {
    fn default() -> Self {
        Self {
            voting_address: None,
            max_per_block: default_max_per_block(),
            max_fee: default_max_fee(),
            spend_limit: 0.0,
            min_balance: 0.0,
            price_average_window: 0,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            stake_info_attempts: default_stake_info_attempts(),
            stake_info_retry_delay_ms: default_stake_info_retry_delay_ms(),
            block_poll_interval_ms: default_block_poll_interval_ms(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: default_true(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl RpcConfig {
    pub fn endpoint(&self) -> RpcEndpoint {
        RpcEndpoint {
            url: self.url.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            rate_limit_rps: self.rate_limit_rps,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides, then validate
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.from_env()?;
        Ok(config)
    }

    /// Apply `TICKETBUYER_*` overrides from the process environment
    pub fn from_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, then validate
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = lookup("TICKETBUYER_NODE_URL") {
            self.node.url = url;
        }
        if let Some(user) = lookup("TICKETBUYER_NODE_USER") {
            self.node.user = Some(user);
        }
        if let Some(password) = lookup("TICKETBUYER_NODE_PASSWORD") {
            self.node.password = Some(password);
        }
        if let Some(url) = lookup("TICKETBUYER_WALLET_URL") {
            self.wallet.rpc.url = url;
        }
        if let Some(user) = lookup("TICKETBUYER_WALLET_USER") {
            self.wallet.rpc.user = Some(user);
        }
        if let Some(password) = lookup("TICKETBUYER_WALLET_PASSWORD") {
            self.wallet.rpc.password = Some(password);
        }
        if let Some(account) = lookup("TICKETBUYER_WALLET_ACCOUNT") {
            self.wallet.account = account;
        }
        if let Some(addr) = lookup("TICKETBUYER_VOTING_ADDRESS") {
            self.ticket_buyer.voting_address = Some(addr).filter(|a| !a.is_empty());
        }
        if let Some(port) = lookup("TICKETBUYER_METRICS_PORT") {
            self.monitoring.metrics_port = port
                .parse()
                .map_err(|e| anyhow!("Invalid TICKETBUYER_METRICS_PORT: {}", e))?;
        }

        self.validate()
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.node.url.is_empty() {
            return Err(anyhow!("node.url must be set"));
        }
        if self.wallet.rpc.url.is_empty() {
            return Err(anyhow!("wallet.url must be set"));
        }
        if self.controller.max_attempts == 0 {
            return Err(anyhow!("controller.max_attempts must be > 0"));
        }
        if self.controller.stake_info_attempts == 0 {
            return Err(anyhow!("controller.stake_info_attempts must be > 0"));
        }
        if self.controller.block_poll_interval_ms == 0 {
            return Err(anyhow!("controller.block_poll_interval_ms must be > 0"));
        }
        self.purchase_config()?.validate()?;
        Ok(())
    }

    /// Purchasing limits with amounts converted to atoms and the voting
    /// address decoded
    pub fn purchase_config(&self) -> Result<PurchaseConfig> {
        let tb = &self.ticket_buyer;
        let voting_address = tb
            .voting_address
            .as_deref()
            .map(Address::decode)
            .transpose()
            .context("ticket_buyer.voting_address is not a valid address")?;

        Ok(PurchaseConfig {
            voting_address,
            max_per_block: tb.max_per_block,
            max_fee: coins("ticket_buyer.max_fee", tb.max_fee)?,
            spend_limit: coins("ticket_buyer.spend_limit", tb.spend_limit)?,
            min_balance: coins("ticket_buyer.min_balance", tb.min_balance)?,
            price_average_window: tb.price_average_window,
        })
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        let c = &self.controller;
        ControllerSettings {
            max_attempts: c.max_attempts,
            retry_delay: Duration::from_millis(c.retry_delay_ms),
            stake_info_retry: StakeInfoRetry {
                attempts: c.stake_info_attempts,
                delay: Duration::from_millis(c.stake_info_retry_delay_ms),
            },
        }
    }

    pub fn block_poll_interval(&self) -> Duration {
        Duration::from_millis(self.controller.block_poll_interval_ms)
    }
}

fn coins(field: &str, value: f64) -> Result<Amount> {
    Amount::from_coins(value).ok_or_else(|| anyhow!("{} is not a valid amount: {}", field, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.wallet.account, "default");
        assert_eq!(config.controller.max_attempts, 3);

        let limits = config.purchase_config().unwrap();
        assert_eq!(limits.max_per_block, 5);
        assert_eq!(limits.max_fee, Amount(10_000_000));
        assert!(limits.voting_address.is_none());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [ticket_buyer]
            spend_limit = 5.0
            min_balance = 1.5
            "#,
        )
        .unwrap();

        let limits = config.purchase_config().unwrap();
        assert_eq!(limits.spend_limit, Amount(500_000_000));
        assert_eq!(limits.min_balance, Amount(150_000_000));
        assert_eq!(limits.max_per_block, 5);
        assert_eq!(config.node.url, "https://127.0.0.1:9109");
        assert_eq!(config.monitoring.metrics_port, 9090);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("TICKETBUYER_WALLET_URL", "https://wallet:9110"),
            ("TICKETBUYER_WALLET_PASSWORD", "hunter2"),
            ("TICKETBUYER_METRICS_PORT", "9191"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.wallet.rpc.url, "https://wallet:9110");
        assert_eq!(config.wallet.rpc.password.as_deref(), Some("hunter2"));
        assert_eq!(config.monitoring.metrics_port, 9191);

        let err = Config::default()
            .apply_overrides(|k| (k == "TICKETBUYER_METRICS_PORT").then(|| "x".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("TICKETBUYER_METRICS_PORT"));
    }

    #[test]
    fn test_rejects_negative_amounts_and_bad_address() {
        let mut config = Config::default();
        config.ticket_buyer.spend_limit = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.ticket_buyer.voting_address = Some("notanaddress".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.controller.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_voting_address_selects_address_scan() {
        let addr = Address::new([0x07, 0x3f], [0x11; 20]);
        let mut config = Config::default();
        config.ticket_buyer.voting_address = Some(addr.encode());

        let limits = config.purchase_config().unwrap();
        assert_eq!(limits.voting_address, Some(addr));
    }
}
