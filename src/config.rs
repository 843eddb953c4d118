//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys, the admin token) are referenced by env-var name in
//! the config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub settler: SettlerConfig,
    pub provider: ProviderConfig,
    pub oracle: OracleConfig,
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    pub ledger: LedgerConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SettlerConfig {
    pub name: String,
    /// Period of the scheduled sweep over all users with pending wagers.
    pub sweep_interval_secs: u64,
    /// Users settled in parallel by one sweep.
    #[serde(default = "default_user_concurrency")]
    pub user_concurrency: usize,
    /// Wagers of one user evaluated in parallel. Commits stay serial.
    #[serde(default = "default_wager_concurrency")]
    pub wager_concurrency: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    /// Base URL of the football results API.
    pub host: String,
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OracleConfig {
    pub enabled: bool,
    pub api_url: String,
    pub api_key_env: String,
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InterpreterConfig {
    /// Line assumed for over/under wagers without a number. Absent means
    /// such wagers are left to the oracle.
    pub default_goal_line: Option<Decimal>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            default_goal_line: Some(crate::engine::interpreter::DEFAULT_GOAL_LINE),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LedgerConfig {
    /// Balance assumed when a user has no balance key yet.
    pub default_balance: Decimal,
    /// Also append a history point for lost wagers.
    #[serde(default)]
    pub record_losses_in_history: bool,
    #[serde(default = "default_commit_attempts")]
    pub max_commit_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_balance: Decimal::ONE_HUNDRED,
            record_losses_in_history: false,
            max_commit_attempts: default_commit_attempts(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    #[serde(default = "default_storage_url")]
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
    pub admin_token_env: String,
}

fn default_user_concurrency() -> usize {
    4
}

fn default_wager_concurrency() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_max_retries() -> u32 {
    0
}

fn default_commit_attempts() -> u32 {
    3
}

fn default_storage_url() -> String {
    "sqlite://settler.db".to_string()
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl OracleConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        if config.ledger.max_commit_attempts == 0 {
            anyhow::bail!("ledger.max_commit_attempts must be at least 1");
        }
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Like [`AppConfig::resolve_env`], but an unset or blank variable is
    /// `None` and the value is wrapped as a secret.
    pub fn resolve_secret(env_name: &str) -> Option<SecretString> {
        Self::resolve_env(env_name)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(SecretString::new)
    }
}
