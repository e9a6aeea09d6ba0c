//! Layered configuration: defaults, `Hatchery.toml`, `HATCHERY_*` environment, CLI flags.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use hatchery_deploy::{
    BackoffPolicy, ConfirmationPolicy, OrchestratorSettings, ProxyContracts, RetryPolicy,
};
use serde::{Deserialize, Serialize};
use url::Url;

/// Configuration file read from the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "Hatchery.toml";

/// Prefix of configuration environment variables, e.g. `HATCHERY_RPC_URL`.
/// Nested keys use a double underscore: `HATCHERY_EXPLORER__API_KEY`.
pub const ENV_PREFIX: &str = "HATCHERY_";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HatcheryConfig {
    pub network: String,
    pub rpc_url: String,
    pub from: Option<Address>,
    pub artifacts: PathBuf,
    pub confirmations: u64,
    pub verify: bool,
    pub verification: RetryPolicy,
    pub explorer: ExplorerConfig,
    pub confirmation_timeout_secs: u64,
    pub confirmation_fallback_secs: u64,
    pub indexing_delay_secs: u64,
    /// No overall timeout when unset.
    pub run_timeout_secs: Option<u64>,
    pub ledger: bool,
    pub ledger_dir: PathBuf,
    pub proxy_contracts: ProxyContracts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    pub api_url: String,
    pub api_key: Option<String>,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.etherscan.io/v2/api".to_string(),
            api_key: None,
        }
    }
}

impl Default for HatcheryConfig {
    fn default() -> Self {
        let settings = OrchestratorSettings::default();
        Self {
            network: "localhost".to_string(),
            rpc_url: "http://127.0.0.1:8545".to_string(),
            from: None,
            artifacts: PathBuf::from("artifacts"),
            confirmations: 0,
            verify: false,
            verification: settings.retry,
            explorer: ExplorerConfig::default(),
            confirmation_timeout_secs: settings.confirmation.timeout.as_secs(),
            confirmation_fallback_secs: settings.confirmation.fallback_wait.as_secs(),
            indexing_delay_secs: settings.indexing_delay.as_secs(),
            run_timeout_secs: None,
            ledger: true,
            ledger_dir: PathBuf::from("deployments"),
            proxy_contracts: settings.proxy_contracts,
        }
    }
}

/// Values given on the command line. Unset fields leave lower layers untouched.
#[derive(Debug, Default, Serialize)]
pub struct Overrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_url: Option<Url>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmations: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explorer: Option<ExplorerOverrides>,
}

#[derive(Debug, Default, Serialize)]
pub struct VerificationOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffPolicy>,
}

#[derive(Debug, Default, Serialize)]
pub struct ExplorerOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl HatcheryConfig {
    /// Merge every layer. An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self> {
        let file = match path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Configuration file not found: {}", path.display());
                }
                path.to_path_buf()
            }
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(&file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .merge(Serialized::defaults(overrides))
            .extract()
            .with_context(|| format!("Invalid configuration (file: {})", file.display()))?;

        tracing::debug!(config = ?config, "Configuration loaded");
        Ok(config)
    }

    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            confirmation: ConfirmationPolicy {
                timeout: Duration::from_secs(self.confirmation_timeout_secs),
                fallback_wait: Duration::from_secs(self.confirmation_fallback_secs),
            },
            retry: self.verification.clone(),
            indexing_delay: Duration::from_secs(self.indexing_delay_secs),
            proxy_contracts: self.proxy_contracts.clone(),
        }
    }

    pub fn rpc_url(&self) -> Result<Url> {
        Url::parse(&self.rpc_url).with_context(|| format!("Invalid rpc_url: {}", self.rpc_url))
    }

    pub fn explorer_url(&self) -> Result<Url> {
        Url::parse(&self.explorer.api_url)
            .with_context(|| format!("Invalid explorer api_url: {}", self.explorer.api_url))
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}
