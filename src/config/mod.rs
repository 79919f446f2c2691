pub mod keys;
pub mod store;
pub mod watcher;

pub use keys::{parse_bool, parse_rate, ConfigValueError, RateGroup, RateUnit, WatchedKey};
pub use store::{ConfigEvent, ConfigStore};
pub use watcher::StaticConfigWatcher;

use crate::ratelimit::RateType;
use anyhow::{Context, Result};
use serde::Deserialize;

/// Complete quotaguard configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuotaguardConfig {
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Cluster default limits. Rates are per second; DML rates are in MB/s.
/// A negative rate means unlimited.
#[derive(Debug, Clone, Deserialize)]
pub struct QuotaConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub ddl: DdlLimits,
    #[serde(default)]
    pub dml: DmlLimits,
    #[serde(default)]
    pub dql: DqlLimits,
}

fn default_true() -> bool {
    true
}

fn default_unlimited() -> f64 {
    -1.0
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            ddl: DdlLimits::default(),
            dml: DmlLimits::default(),
            dql: DqlLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DdlLimits {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_unlimited")]
    pub collection_rate: f64,
    #[serde(default = "default_unlimited")]
    pub partition_rate: f64,
    #[serde(default = "default_unlimited")]
    pub index_rate: f64,
    #[serde(default = "default_unlimited")]
    pub flush_rate: f64,
    #[serde(default = "default_unlimited")]
    pub compaction_rate: f64,
    #[serde(default = "default_unlimited")]
    pub db_rate: f64,
}

impl Default for DdlLimits {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            collection_rate: default_unlimited(),
            partition_rate: default_unlimited(),
            index_rate: default_unlimited(),
            flush_rate: default_unlimited(),
            compaction_rate: default_unlimited(),
            db_rate: default_unlimited(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DmlLimits {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_unlimited")]
    pub insert_rate: f64,
    #[serde(default = "default_unlimited")]
    pub upsert_rate: f64,
    #[serde(default = "default_unlimited")]
    pub delete_rate: f64,
    #[serde(default = "default_unlimited")]
    pub bulk_load_rate: f64,
}

impl Default for DmlLimits {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            insert_rate: default_unlimited(),
            upsert_rate: default_unlimited(),
            delete_rate: default_unlimited(),
            bulk_load_rate: default_unlimited(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DqlLimits {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_unlimited")]
    pub search_rate: f64,
    #[serde(default = "default_unlimited")]
    pub query_rate: f64,
}

impl Default for DqlLimits {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            search_rate: default_unlimited(),
            query_rate: default_unlimited(),
        }
    }
}

impl QuotaConfig {
    fn rate(&self, rate_type: RateType) -> f64 {
        match rate_type {
            RateType::DdlCollection => self.ddl.collection_rate,
            RateType::DdlPartition => self.ddl.partition_rate,
            RateType::DdlIndex => self.ddl.index_rate,
            RateType::DdlFlush => self.ddl.flush_rate,
            RateType::DdlCompaction => self.ddl.compaction_rate,
            RateType::DdlDatabase => self.ddl.db_rate,
            RateType::DmlInsert => self.dml.insert_rate,
            RateType::DmlUpsert => self.dml.upsert_rate,
            RateType::DmlDelete => self.dml.delete_rate,
            RateType::DmlBulkLoad => self.dml.bulk_load_rate,
            RateType::DqlSearch => self.dql.search_rate,
            RateType::DqlQuery => self.dql.query_rate,
        }
    }

    fn group_enabled(&self, group: RateGroup) -> bool {
        match group {
            RateGroup::Ddl => self.ddl.enabled,
            RateGroup::Dml => self.dml.enabled,
            RateGroup::Dql => self.dql.enabled,
        }
    }

    /// Render as the string keys published to the configuration store.
    pub fn to_entries(&self) -> Vec<(String, String)> {
        WatchedKey::all()
            .map(|key| {
                let value = match key {
                    WatchedKey::Enabled => self.enabled.to_string(),
                    WatchedKey::GroupEnabled(group) => self.group_enabled(group).to_string(),
                    WatchedKey::Rate(rate) => self.rate(rate.rate_type).to_string(),
                };
                (key.name().to_string(), value)
            })
            .collect()
    }
}

/// Static-config watcher settings
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// How often the watcher re-reads every key (seconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

fn default_poll_interval() -> u64 {
    10
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

/// Admin API settings
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Bearer token required by mutating admin routes. None = unrestricted.
    #[serde(default)]
    pub admin_token: Option<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:9091".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            admin_token: None,
        }
    }
}

impl QuotaguardConfig {
    /// Apply QUOTAGUARD_* environment overrides on top of the file values.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(v) = std::env::var("QUOTAGUARD_LISTEN_ADDR") {
            self.api.listen_addr = v;
        }
        if let Ok(v) = std::env::var("QUOTAGUARD_ADMIN_TOKEN") {
            if !v.is_empty() {
                self.api.admin_token = Some(v);
            }
        }
        if let Ok(v) = std::env::var("QUOTAGUARD_ENABLED") {
            if let Ok(b) = v.parse::<bool>() {
                self.quota.enabled = b;
            }
        }
        self
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<QuotaguardConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path))?;
    let config: QuotaguardConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}
