//! Configuration module for the fee oracle
//!
//! Configuration is read from a TOML file, then `ORACLE_*` environment
//! variables (optionally from `.env`) override individual fields. The result
//! is validated once and shared read-only for the life of the process.

use crate::chain::{EvmSettings, SubmitSettings};
use crate::fetcher::{default_identities, ClientIdentity, FetcherSettings};
use crate::resilience::RetryPolicy;
use crate::types::FeeParameters;
use crate::wallet::SigningKey;
use alloy::primitives::Address;
use anyhow::{anyhow, Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Where the index is read from
    #[serde(default)]
    pub source: SourceConfig,

    /// Index-to-fee mapping
    #[serde(default)]
    pub fee: FeeConfig,

    /// Target chain and contract
    #[serde(default)]
    pub chain: ChainConfig,

    /// Daily trigger time
    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub recorder: RecorderConfig,

    /// Monitoring and metrics
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Page holding the index
    #[serde(default = "default_target_url")]
    pub target_url: String,

    /// CSS selector of the element holding the index
    #[serde(default = "default_target_selector")]
    pub target_selector: String,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Randomised pause before each request, lower bound
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Randomised pause before each request, upper bound
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Replaces the built-in identity corpus when set
    #[serde(default)]
    pub identities: Option<Vec<ClientIdentity>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeConfig {
    #[serde(default = "default_index_baseline")]
    pub index_baseline: f64,

    #[serde(default = "default_min_fee_rate")]
    pub min_fee_rate_bps: u32,

    #[serde(default = "default_max_fee_rate")]
    pub max_fee_rate_bps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// When false, cycles fetch and compute but never submit
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub rpc_url: String,

    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Address of the contract exposing `setFeeRate(uint256)`
    #[serde(default)]
    pub contract_address: String,

    /// Hex private key; prefer `ORACLE_PRIVATE_KEY` over the file
    #[serde(default)]
    pub private_key: SigningKey,

    #[serde(default = "default_max_gas_price_wei")]
    pub max_gas_price_wei: u64,

    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,

    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// IANA time zone name, e.g. `Europe/London`
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_update_hour")]
    pub update_hour: u32,

    #[serde(default = "default_update_minute")]
    pub update_minute: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "RetryPolicy::fetch_default")]
    pub fetch: RetryPolicy,

    #[serde(default = "RetryPolicy::submit_default")]
    pub submit: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Append-only JSON lines file; an empty path disables the file sink
    #[serde(default = "default_records_path")]
    pub jsonl_path: PathBuf,

    /// Also emit every record as a log line
    #[serde(default = "default_true")]
    pub log_records: bool,

    /// Records printed after a one-shot run
    #[serde(default = "default_recent_count")]
    pub show_recent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Enable Prometheus metrics endpoint
    #[serde(default)]
    pub enable_metrics: bool,

    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

// Default value functions
fn default_target_url() -> String { "https://example-financial-data.com/index".to_string() }
fn default_target_selector() -> String { "#price-value".to_string() }
fn default_request_timeout() -> u64 { 30 }
fn default_min_delay_ms() -> u64 { 3_000 }
fn default_max_delay_ms() -> u64 { 8_000 }
fn default_index_baseline() -> f64 { 1500.0 }
fn default_min_fee_rate() -> u32 { 10 }
fn default_max_fee_rate() -> u32 { 100 }
fn default_chain_id() -> u64 { 11_155_111 }
fn default_max_gas_price_wei() -> u64 { 50_000_000_000 }
fn default_gas_limit() -> u64 { 200_000 }
fn default_confirmation_timeout() -> u64 { 120 }
fn default_poll_interval() -> u64 { 2 }
fn default_timezone() -> String { "Europe/London".to_string() }
fn default_update_hour() -> u32 { 16 }
fn default_update_minute() -> u32 { 1 }
fn default_records_path() -> PathBuf { PathBuf::from("oracle_records.jsonl") }
fn default_recent_count() -> usize { 5 }
fn default_metrics_port() -> u16 { 9090 }
fn default_true() -> bool { true }

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            target_url: default_target_url(),
            target_selector: default_target_selector(),
            request_timeout_secs: default_request_timeout(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            identities: None,
        }
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            index_baseline: default_index_baseline(),
            min_fee_rate_bps: default_min_fee_rate(),
            max_fee_rate_bps: default_max_fee_rate(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            rpc_url: String::new(),
            chain_id: default_chain_id(),
            contract_address: String::new(),
            private_key: SigningKey::default(),
            max_gas_price_wei: default_max_gas_price_wei(),
            gas_limit: default_gas_limit(),
            confirmation_timeout_secs: default_confirmation_timeout(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            update_hour: default_update_hour(),
            update_minute: default_update_minute(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            fetch: RetryPolicy::fetch_default(),
            submit: RetryPolicy::submit_default(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            jsonl_path: default_records_path(),
            log_records: default_true(),
            show_recent: default_recent_count(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            metrics_port: default_metrics_port(),
        }
    }
}

/// Parse an override value, naming the variable on failure
fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow!("Invalid {}: {}", name, e))
}

impl OracleConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| anyhow!("Failed to parse TOML config: {}", e))
    }

    /// Full startup path: `.env`, file (or defaults when absent), env overrides, validation
    ///
    /// A missing file is only an error when `required` is set. `dry_run`
    /// disables the chain before validation, so no key or RPC URL is needed.
    pub fn load(path: &Path, required: bool, dry_run: bool) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = if path.exists() {
            Self::from_file(path)?
        } else if required {
            anyhow::bail!("Config file not found: {}", path.display());
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
            Self::default()
        };

        config.apply_env()?;
        if dry_run {
            config.chain.enabled = false;
        }
        config.validate()?;
        Ok(config)
    }

    /// Environment variables override TOML values
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `ORACLE_*` overrides from an arbitrary lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("ORACLE_TARGET_URL") {
            self.source.target_url = v;
        }
        if let Some(v) = lookup("ORACLE_TARGET_SELECTOR") {
            self.source.target_selector = v;
        }
        if let Some(v) = lookup("ORACLE_INDEX_BASELINE") {
            self.fee.index_baseline = parse_var("ORACLE_INDEX_BASELINE", &v)?;
        }
        if let Some(v) = lookup("ORACLE_MIN_FEE_RATE_BPS") {
            self.fee.min_fee_rate_bps = parse_var("ORACLE_MIN_FEE_RATE_BPS", &v)?;
        }
        if let Some(v) = lookup("ORACLE_MAX_FEE_RATE_BPS") {
            self.fee.max_fee_rate_bps = parse_var("ORACLE_MAX_FEE_RATE_BPS", &v)?;
        }
        if let Some(v) = lookup("ORACLE_CHAIN_ENABLED") {
            self.chain.enabled = parse_var("ORACLE_CHAIN_ENABLED", &v)?;
        }
        if let Some(v) = lookup("ORACLE_RPC_URL") {
            self.chain.rpc_url = v;
        }
        if let Some(v) = lookup("ORACLE_CHAIN_ID") {
            self.chain.chain_id = parse_var("ORACLE_CHAIN_ID", &v)?;
        }
        if let Some(v) = lookup("ORACLE_CONTRACT_ADDRESS") {
            self.chain.contract_address = v;
        }
        if let Some(v) = lookup("ORACLE_PRIVATE_KEY") {
            self.chain.private_key = SigningKey::new(v);
        }
        if let Some(v) = lookup("ORACLE_MAX_GAS_PRICE_WEI") {
            self.chain.max_gas_price_wei = parse_var("ORACLE_MAX_GAS_PRICE_WEI", &v)?;
        }
        if let Some(v) = lookup("ORACLE_TIMEZONE") {
            self.schedule.timezone = v;
        }
        if let Some(v) = lookup("ORACLE_UPDATE_HOUR") {
            self.schedule.update_hour = parse_var("ORACLE_UPDATE_HOUR", &v)?;
        }
        if let Some(v) = lookup("ORACLE_UPDATE_MINUTE") {
            self.schedule.update_minute = parse_var("ORACLE_UPDATE_MINUTE", &v)?;
        }
        Ok(())
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.source.target_url.trim().is_empty() {
            return Err(anyhow!("source.target_url must not be empty"));
        }
        if self.source.target_selector.trim().is_empty() {
            return Err(anyhow!("source.target_selector must not be empty"));
        }
        if self.source.request_timeout_secs == 0 {
            return Err(anyhow!("source.request_timeout_secs must be > 0"));
        }
        if self.source.min_delay_ms > self.source.max_delay_ms {
            return Err(anyhow!(
                "source.min_delay_ms ({}) must not exceed source.max_delay_ms ({})",
                self.source.min_delay_ms,
                self.source.max_delay_ms
            ));
        }
        if let Some(identities) = &self.source.identities {
            if identities.iter().all(|i| i.weight == 0) {
                return Err(anyhow!("source.identities needs at least one positive weight"));
            }
        }

        self.fee_parameters()
            .validate()
            .map_err(|e| anyhow!("fee: {}", e))?;

        if self.schedule.update_hour > 23 {
            return Err(anyhow!("schedule.update_hour must be in range [0, 23]"));
        }
        if self.schedule.update_minute > 59 {
            return Err(anyhow!("schedule.update_minute must be in range [0, 59]"));
        }
        self.timezone()?;

        self.retry.fetch.validate("retry.fetch")?;
        self.retry.submit.validate("retry.submit")?;

        if self.chain.enabled {
            if self.chain.rpc_url.trim().is_empty() {
                return Err(anyhow!("chain.rpc_url is required when chain.enabled = true"));
            }
            if self.chain.private_key.is_empty() {
                return Err(anyhow!(
                    "chain.private_key (or ORACLE_PRIVATE_KEY) is required when chain.enabled = true"
                ));
            }
            self.contract_address()?;
            if self.chain.gas_limit == 0 {
                return Err(anyhow!("chain.gas_limit must be > 0"));
            }
            if self.chain.poll_interval_secs == 0 {
                return Err(anyhow!("chain.poll_interval_secs must be > 0"));
            }
        }

        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.schedule
            .timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("Unknown timezone '{}': {}", self.schedule.timezone, e))
    }

    pub fn fee_parameters(&self) -> FeeParameters {
        FeeParameters::new(
            self.fee.index_baseline,
            self.fee.min_fee_rate_bps,
            self.fee.max_fee_rate_bps,
        )
    }

    pub fn fetcher_settings(&self) -> FetcherSettings {
        FetcherSettings {
            request_timeout: Duration::from_secs(self.source.request_timeout_secs),
            min_delay: Duration::from_millis(self.source.min_delay_ms),
            max_delay: Duration::from_millis(self.source.max_delay_ms),
        }
    }

    /// Configured identity corpus, or the built-in one
    pub fn identities(&self) -> Vec<ClientIdentity> {
        self.source
            .identities
            .clone()
            .unwrap_or_else(default_identities)
    }

    pub fn contract_address(&self) -> Result<Address> {
        self.chain
            .contract_address
            .trim()
            .parse::<Address>()
            .map_err(|e| anyhow!("Invalid chain.contract_address '{}': {}", self.chain.contract_address, e))
    }

    pub fn evm_settings(&self) -> Result<EvmSettings> {
        Ok(EvmSettings {
            rpc_url: self.chain.rpc_url.clone(),
            chain_id: self.chain.chain_id,
            contract: self.contract_address()?,
            gas_limit: self.chain.gas_limit,
        })
    }

    pub fn submit_settings(&self) -> SubmitSettings {
        SubmitSettings {
            max_gas_price_wei: u128::from(self.chain.max_gas_price_wei),
            confirmation_timeout: Duration::from_secs(self.chain.confirmation_timeout_secs),
            poll_interval: Duration::from_secs(self.chain.poll_interval_secs),
        }
    }
}
