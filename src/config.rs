use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::{Address, U256};
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Runtime configuration, merged from defaults, an optional
/// `playcall.toml` next to the binary, and `PLAYCALL_*` environment
/// overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub api_url: String,
    pub rpc_url: String,
    pub contract_address: String,
    pub chain_id: u64,
    /// Used only when the ledger's advertised price cannot be read.
    pub fallback_price_wei: u64,
    pub poll_interval_secs: u64,
    pub settlement_timeout_secs: u64,
    pub key_file: String,
}
impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8081".to_string(),
            rpc_url: "http://127.0.0.1:8545".to_string(),
            contract_address: "0x0000000000000000000000000000000000000000".to_string(),
            chain_id: 11155111,
            fallback_price_wei: 10_000_000_000_000_000,
            poll_interval_secs: 2,
            settlement_timeout_secs: 120,
            key_file: "wallet.key".to_string(),
        }
    }
}
impl Settings {
    pub fn load() -> Result<Self> {
        let defaults = Settings::default();
        let config = Config::builder()
            .set_default("api_url", defaults.api_url)?
            .set_default("rpc_url", defaults.rpc_url)?
            .set_default("contract_address", defaults.contract_address)?
            .set_default("chain_id", defaults.chain_id)?
            .set_default("fallback_price_wei", defaults.fallback_price_wei)?
            .set_default("poll_interval_secs", defaults.poll_interval_secs)?
            .set_default("settlement_timeout_secs", defaults.settlement_timeout_secs)?
            .set_default("key_file", defaults.key_file)?
            .add_source(File::with_name("playcall").required(false))
            .add_source(Environment::with_prefix("PLAYCALL"))
            .build()?;
        Ok(config.try_deserialize()?)
    }
    pub fn contract(&self) -> Result<Address> {
        Address::from_str(self.contract_address.as_str())
            .context("invalid contract_address in configuration")
    }
    pub fn fallback_price(&self) -> U256 {
        U256::from(self.fallback_price_wei)
    }
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
    pub fn settlement_timeout(&self) -> Duration {
        Duration::from_secs(self.settlement_timeout_secs)
    }
}
