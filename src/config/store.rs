use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A key changed (`Some`) or was removed (`None`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEvent {
    pub key: String,
    pub value: Option<String>,
}

/// In-process string key/value configuration store with change notifications.
///
/// Stands in for the external configuration service; clones share state.
#[derive(Clone)]
pub struct ConfigStore {
    values: Arc<DashMap<String, String>>,
    events: broadcast::Sender<ConfigEvent>,
}

impl ConfigStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            values: Arc::new(DashMap::new()),
            events,
        }
    }

    /// Store pre-populated with `entries`; no events are sent for them.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        let store = Self::new();
        for (key, value) in entries {
            store.values.insert(key, value);
        }
        store
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| v.value().clone())
    }

    pub fn set(&self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
        // No subscribers is fine, they resync from the map on start
        let _ = self.events.send(ConfigEvent {
            key: key.to_string(),
            value: Some(value.to_string()),
        });
    }

    pub fn remove(&self, key: &str) -> Option<String> {
        let removed = self.values.remove(key).map(|(_, v)| v);
        if removed.is_some() {
            let _ = self.events.send(ConfigEvent {
                key: key.to_string(),
                value: None,
            });
        }
        removed
    }

    /// Snapshot of every entry, sorted by key.
    pub fn entries(&self) -> BTreeMap<String, String> {
        self.values
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.events.subscribe()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = ConfigStore::new();
        assert_eq!(store.get("a"), None);
        store.set("a", "1");
        assert_eq!(store.get("a"), Some("1".to_string()));
        assert_eq!(store.remove("a"), Some("1".to_string()));
        assert_eq!(store.remove("a"), None);
    }

    #[test]
    fn test_subscribers_see_changes() {
        let store = ConfigStore::from_entries([("k".to_string(), "v0".to_string())]);
        let mut rx = store.subscribe();
        store.set("k", "v1");
        store.remove("k");

        assert_eq!(
            rx.try_recv().unwrap(),
            ConfigEvent {
                key: "k".to_string(),
                value: Some("v1".to_string())
            }
        );
        assert_eq!(rx.try_recv().unwrap().value, None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_clones_share_state() {
        let store = ConfigStore::new();
        let other = store.clone();
        other.set("x", "y");
        assert_eq!(store.entries().get("x").map(String::as_str), Some("y"));
    }
}
