use super::keys::{parse_bool, parse_rate, RateGroup, WatchedKey};
use super::store::ConfigStore;
use crate::admission::EnforcementFlag;
use crate::ratelimit::{LimiterTree, RateType};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shortest accepted poll interval; `tokio::time::interval` rejects zero.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Last values that were successfully applied.
struct WatcherState {
    rates: HashMap<RateType, f64>,
    groups: HashMap<RateGroup, bool>,
    /// Raw value last seen per key, to skip unchanged keys on resync
    seen: HashMap<&'static str, Option<String>>,
}

impl WatcherState {
    fn new() -> Self {
        Self {
            rates: RateType::ALL.into_iter().map(|rt| (rt, f64::INFINITY)).collect(),
            groups: RateGroup::ALL.into_iter().map(|g| (g, true)).collect(),
            seen: HashMap::new(),
        }
    }

    fn effective_rate(&self, rate_type: RateType) -> f64 {
        let group_enabled = self
            .groups
            .get(&RateGroup::of(rate_type))
            .copied()
            .unwrap_or(true);
        if group_enabled {
            self.rates.get(&rate_type).copied().unwrap_or(f64::INFINITY)
        } else {
            f64::INFINITY
        }
    }
}

/// Keeps the cluster-level buckets and the enforcement flag in line with
/// the configuration store.
///
/// Reacts to change events and re-reads every key on a fixed interval, so a
/// missed event converges on the next poll. An unparsable value is logged
/// and the previous value stays in effect.
pub struct StaticConfigWatcher {
    store: ConfigStore,
    tree: Arc<LimiterTree>,
    enabled: EnforcementFlag,
    poll_interval: Duration,
    state: Mutex<WatcherState>,
}

impl StaticConfigWatcher {
    /// `poll_interval` is raised to at least one millisecond.
    pub fn new(
        store: ConfigStore,
        tree: Arc<LimiterTree>,
        enabled: EnforcementFlag,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            tree,
            enabled,
            poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
            state: Mutex::new(WatcherState::new()),
        }
    }

    /// Apply every recognized key whose value changed since the last sync.
    ///
    /// The first call applies every key.
    pub fn sync_all(&self) {
        for key in WatchedKey::all() {
            self.handle(key, self.store.get(key.name()));
        }
    }

    /// Process one key's current value (`None` when the key is absent).
    pub fn handle(&self, key: WatchedKey, value: Option<String>) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.seen.get(key.name()) == Some(&value) {
            return;
        }
        state.seen.insert(key.name(), value.clone());

        match key {
            WatchedKey::Enabled => {
                let enabled = match value.as_deref().map(parse_bool).transpose() {
                    Ok(v) => v.unwrap_or(true),
                    Err(e) => {
                        warn!(key = key.name(), error = %e, "Ignoring config value");
                        return;
                    }
                };
                let previous = self.enabled.swap(enabled, Ordering::Relaxed);
                if previous != enabled {
                    info!(enabled, "Quota enforcement switched");
                }
            }
            WatchedKey::GroupEnabled(group) => {
                let enabled = match value.as_deref().map(parse_bool).transpose() {
                    Ok(v) => v.unwrap_or(true),
                    Err(e) => {
                        warn!(key = key.name(), error = %e, "Ignoring config value");
                        return;
                    }
                };
                state.groups.insert(group, enabled);
                for rate_type in RateType::ALL {
                    if RateGroup::of(rate_type) == group {
                        self.apply_rate(&state, rate_type);
                    }
                }
            }
            WatchedKey::Rate(rate_key) => {
                let rate = match value.as_deref().map(|v| parse_rate(v, rate_key.unit)) {
                    None => f64::INFINITY,
                    Some(Ok(rate)) => rate,
                    Some(Err(e)) => {
                        warn!(key = key.name(), error = %e, "Ignoring config value");
                        return;
                    }
                };
                state.rates.insert(rate_key.rate_type, rate);
                self.apply_rate(&state, rate_key.rate_type);
            }
        }
    }

    fn apply_rate(&self, state: &WatcherState, rate_type: RateType) {
        let rate = state.effective_rate(rate_type);
        let root = self.tree.root();
        let unchanged = root
            .bucket(rate_type)
            .is_some_and(|bucket| bucket.rate() == rate);
        root.set_rate(rate_type, rate);
        if unchanged {
            debug!(rate_type = %rate_type, rate, "Cluster rate unchanged");
        } else {
            info!(rate_type = %rate_type, rate, "Cluster rate updated");
        }
    }

    /// Follow store changes until the store's event channel closes.
    pub async fn run(&self) {
        // Subscribe before the first sync so no change slips between them
        let mut events = self.store.subscribe();
        self.sync_all();

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.tick().await;

        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Config watcher started"
        );

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Some(key) = WatchedKey::parse(&event.key) {
                            self.handle(key, event.value);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Config watcher lagged, resyncing");
                        self.sync_all();
                    }
                    Err(RecvError::Closed) => {
                        info!("Config store closed, watcher stopping");
                        break;
                    }
                },
                _ = ticker.tick() => self.sync_all(),
            }
        }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }
}
