// Wires the limiter tree, the admission checker and the config watcher

use crate::admission::{AdmissionChecker, EnforcementFlag};
use crate::config::{ConfigStore, QuotaConfig, StaticConfigWatcher};
use crate::ratelimit::LimiterTree;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A ready-to-use quota enforcement stack.
///
/// Construction seeds the configuration store from `QuotaConfig` and applies
/// it synchronously, so cluster buckets are in place before the first check.
pub struct QuotaService {
    tree: Arc<LimiterTree>,
    enabled: EnforcementFlag,
    checker: AdmissionChecker,
    store: ConfigStore,
    watcher: Arc<StaticConfigWatcher>,
}

impl QuotaService {
    pub fn new(config: &QuotaConfig, poll_interval: Duration) -> Self {
        Self::with_store(ConfigStore::from_entries(config.to_entries()), poll_interval)
    }

    /// Build on an existing store, e.g. one shared with other components.
    pub fn with_store(store: ConfigStore, poll_interval: Duration) -> Self {
        let tree = Arc::new(LimiterTree::new());
        let enabled: EnforcementFlag = Arc::new(AtomicBool::new(true));
        let watcher = Arc::new(StaticConfigWatcher::new(
            store.clone(),
            Arc::clone(&tree),
            Arc::clone(&enabled),
            poll_interval,
        ));
        watcher.sync_all();

        let checker = AdmissionChecker::new(Arc::clone(&tree), Arc::clone(&enabled));
        Self {
            tree,
            enabled,
            checker,
            store,
            watcher,
        }
    }

    pub fn checker(&self) -> AdmissionChecker {
        self.checker.clone()
    }

    pub fn tree(&self) -> &Arc<LimiterTree> {
        &self.tree
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn enforcement(&self) -> &EnforcementFlag {
        &self.enabled
    }

    /// Start following store changes in the background.
    pub fn spawn_watcher(&self) -> JoinHandle<()> {
        Arc::clone(&self.watcher).spawn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::RateType;
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_new_applies_config_before_any_check() {
        let mut config = QuotaConfig::default();
        config.ddl.collection_rate = 2.0;
        let service = QuotaService::new(&config, Duration::from_secs(10));

        let checker = service.checker();
        let none = HashMap::new();
        assert!(checker.check(0, &none, RateType::DdlCollection, 2).is_ok());
        assert!(checker.check(0, &none, RateType::DdlCollection, 1).is_ok());
        assert!(checker.check(0, &none, RateType::DdlCollection, 1).is_err());
        assert!(checker.check(0, &none, RateType::DdlIndex, 1000).is_ok());
    }

    #[test]
    fn test_disabled_config_disables_enforcement() {
        let config = QuotaConfig {
            enabled: false,
            ..QuotaConfig::default()
        };
        let service = QuotaService::new(&config, Duration::from_secs(10));
        assert!(!service.enforcement().load(Ordering::Relaxed));
        assert!(!service.checker().is_enabled());
    }
}
