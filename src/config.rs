use std::collections::{BTreeMap, HashMap};
use std::fs;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::batch_file::BatchOriginator;
use crate::rails::RailConfig;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Per-target levels on top of `log_level`, e.g. `escrow_payouts::rails: debug`
    #[serde(default)]
    pub log_targets: BTreeMap<String, String>,
    pub gateway: GatewayConfig,
    /// PostgreSQL connection URL; absent runs on the in-memory store
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub auto_release: AutoReleaseConfig,
    /// Manual rail settlement; absent disables batch file generation
    #[serde(default)]
    pub batch_file: Option<BatchFileConfig>,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub ledgers: HashMap<String, LedgerConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutorConfig {
    pub rail_timeout_ms: u64,
    /// Refill interval of the batch pacer
    pub item_delay_ms: u64,
    pub burst: u32,
    pub max_batch_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            rail_timeout_ms: 15_000,
            item_delay_ms: 100,
            burst: 1,
            max_batch_size: 100,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AutoReleaseConfig {
    pub enabled: bool,
    pub scan_interval_secs: u64,
    pub limit: usize,
    pub execute_immediately: bool,
    /// Pending releases older than this are executed by the worker
    pub stale_threshold_secs: u64,
}

impl Default for AutoReleaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            scan_interval_secs: 300,
            limit: 50,
            execute_immediately: true,
            stale_threshold_secs: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BatchFileConfig {
    #[serde(flatten)]
    pub originator: BatchOriginator,
    #[serde(default = "default_link_ttl_secs")]
    pub link_ttl_secs: i64,
}

fn default_link_ttl_secs() -> i64 {
    300
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub processor_base_url: Option<String>,
    #[serde(default)]
    pub banking_base_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LedgerConfig {
    #[serde(default)]
    pub rails: Vec<RailConfig>,
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config file: {}", config_path))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}
