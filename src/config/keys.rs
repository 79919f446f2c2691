use crate::ratelimit::RateType;
use std::fmt;

/// Process-wide enforcement switch.
pub const ENABLED_KEY: &str = "quotaAndLimits.enabled";

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Unit of a configured rate value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateUnit {
    /// Requests (or vectors) per second, used as is
    PerSecond,
    /// Megabytes per second, converted to bytes per second
    MegabytesPerSecond,
}

impl RateUnit {
    fn factor(self) -> f64 {
        match self {
            RateUnit::PerSecond => 1.0,
            RateUnit::MegabytesPerSecond => BYTES_PER_MB,
        }
    }
}

/// Rate types sharing one `*.enabled` switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateGroup {
    Ddl,
    Dml,
    Dql,
}

impl RateGroup {
    pub const ALL: [RateGroup; 3] = [RateGroup::Ddl, RateGroup::Dml, RateGroup::Dql];

    pub fn enabled_key(self) -> &'static str {
        match self {
            RateGroup::Ddl => "quotaAndLimits.ddl.enabled",
            RateGroup::Dml => "quotaAndLimits.dml.enabled",
            RateGroup::Dql => "quotaAndLimits.dql.enabled",
        }
    }

    pub fn of(rate_type: RateType) -> RateGroup {
        match rate_type {
            RateType::DmlInsert
            | RateType::DmlUpsert
            | RateType::DmlDelete
            | RateType::DmlBulkLoad => RateGroup::Dml,
            RateType::DqlSearch | RateType::DqlQuery => RateGroup::Dql,
            _ => RateGroup::Ddl,
        }
    }
}

/// A configuration key driving one cluster-level rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateKey {
    pub key: &'static str,
    pub rate_type: RateType,
    pub unit: RateUnit,
}

const fn rate_key(key: &'static str, rate_type: RateType, unit: RateUnit) -> RateKey {
    RateKey {
        key,
        rate_type,
        unit,
    }
}

pub const RATE_KEYS: [RateKey; 12] = [
    rate_key("quotaAndLimits.ddl.collectionRate", RateType::DdlCollection, RateUnit::PerSecond),
    rate_key("quotaAndLimits.ddl.partitionRate", RateType::DdlPartition, RateUnit::PerSecond),
    rate_key("quotaAndLimits.indexRate.max", RateType::DdlIndex, RateUnit::PerSecond),
    rate_key("quotaAndLimits.flushRate.max", RateType::DdlFlush, RateUnit::PerSecond),
    rate_key("quotaAndLimits.compactionRate.max", RateType::DdlCompaction, RateUnit::PerSecond),
    rate_key("quotaAndLimits.ddl.dbRate", RateType::DdlDatabase, RateUnit::PerSecond),
    rate_key("quotaAndLimits.dml.insertRate.max", RateType::DmlInsert, RateUnit::MegabytesPerSecond),
    rate_key("quotaAndLimits.dml.upsertRate.max", RateType::DmlUpsert, RateUnit::MegabytesPerSecond),
    rate_key("quotaAndLimits.dml.deleteRate.max", RateType::DmlDelete, RateUnit::MegabytesPerSecond),
    rate_key("quotaAndLimits.dml.bulkLoadRate.max", RateType::DmlBulkLoad, RateUnit::MegabytesPerSecond),
    rate_key("quotaAndLimits.dql.searchRate.max", RateType::DqlSearch, RateUnit::PerSecond),
    rate_key("quotaAndLimits.dql.queryRate.max", RateType::DqlQuery, RateUnit::PerSecond),
];

/// Recognized keys the watcher reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchedKey {
    Enabled,
    GroupEnabled(RateGroup),
    Rate(RateKey),
}

impl WatchedKey {
    pub fn parse(key: &str) -> Option<WatchedKey> {
        if key == ENABLED_KEY {
            return Some(WatchedKey::Enabled);
        }
        if let Some(group) = RateGroup::ALL.into_iter().find(|g| g.enabled_key() == key) {
            return Some(WatchedKey::GroupEnabled(group));
        }
        RATE_KEYS
            .into_iter()
            .find(|k| k.key == key)
            .map(WatchedKey::Rate)
    }

    pub fn name(self) -> &'static str {
        match self {
            WatchedKey::Enabled => ENABLED_KEY,
            WatchedKey::GroupEnabled(group) => group.enabled_key(),
            WatchedKey::Rate(rate) => rate.key,
        }
    }

    /// Every recognized key.
    pub fn all() -> impl Iterator<Item = WatchedKey> {
        std::iter::once(WatchedKey::Enabled)
            .chain(RateGroup::ALL.into_iter().map(WatchedKey::GroupEnabled))
            .chain(RATE_KEYS.into_iter().map(WatchedKey::Rate))
    }
}

/// A configuration value that could not be used.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValueError {
    InvalidRate(String),
    InvalidBool(String),
}

impl fmt::Display for ConfigValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValueError::InvalidRate(v) => write!(f, "invalid rate '{}'", v),
            ConfigValueError::InvalidBool(v) => write!(f, "invalid boolean '{}'", v),
        }
    }
}

impl std::error::Error for ConfigValueError {}

/// Parse a rate value into tokens per second.
///
/// Negative values, `inf` and `unlimited` mean no limit, as does a value
/// that overflows once converted to the unit.
pub fn parse_rate(value: &str, unit: RateUnit) -> Result<f64, ConfigValueError> {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("unlimited") {
        return Ok(f64::INFINITY);
    }
    let rate: f64 = trimmed
        .parse()
        .map_err(|_| ConfigValueError::InvalidRate(value.to_string()))?;
    if rate.is_nan() {
        return Err(ConfigValueError::InvalidRate(value.to_string()));
    }
    if rate < 0.0 {
        return Ok(f64::INFINITY);
    }

    let scaled = rate * unit.factor();
    if scaled.is_finite() {
        Ok(scaled)
    } else {
        Ok(f64::INFINITY)
    }
}

pub fn parse_bool(value: &str) -> Result<bool, ConfigValueError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ConfigValueError::InvalidBool(value.to_string())),
    }
}
