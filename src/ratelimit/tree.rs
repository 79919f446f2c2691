use super::bucket::TokenBucket;
use super::node::LimiterNode;
use super::quota::{ErrorCode, QuotaState};
use super::rate_type::RateType;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Builds the buckets of a collection node the tree has not seen before.
///
/// Receives the parent database node and the fresh collection node.
pub type CollectionSeed<'a> = &'a dyn Fn(&LimiterNode, &LimiterNode);

/// Aggregated quota states for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaStatesReport {
    pub states: Vec<QuotaState>,
    pub reasons: Vec<String>,
    pub codes: Vec<ErrorCode>,
    pub last_reconfigured: Option<DateTime<Utc>>,
}

/// Hierarchical limiter: cluster root plus lookup indexes.
///
/// Admission checks hold `shape` shared for their whole walk. A snapshot is
/// applied with `shape` held exclusively, so a check sees the tree either
/// entirely before or entirely after a reconfiguration.
pub struct LimiterTree {
    root: Arc<LimiterNode>,
    /// Secondary index: database id -> node
    databases: DashMap<i64, Arc<LimiterNode>>,
    /// Secondary index: (database id, collection id) -> node
    collections: DashMap<(i64, i64), Arc<LimiterNode>>,
    shape: RwLock<()>,
    /// Serialises reconfigurations against each other
    pub(crate) reconfigure: Mutex<()>,
    last_reconfigured: RwLock<Option<DateTime<Utc>>>,
}

impl LimiterTree {
    /// Create a tree with an empty (unlimited) root.
    pub fn new() -> Self {
        Self {
            root: Arc::new(LimiterNode::root()),
            databases: DashMap::new(),
            collections: DashMap::new(),
            shape: RwLock::new(()),
            reconfigure: Mutex::new(()),
            last_reconfigured: RwLock::new(None),
        }
    }

    pub fn root(&self) -> &Arc<LimiterNode> {
        &self.root
    }

    pub(crate) fn read_shape(&self) -> RwLockReadGuard<'_, ()> {
        self.shape.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_shape(&self) -> RwLockWriteGuard<'_, ()> {
        self.shape.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Database node `db_id`, created unrestricted if missing.
    pub fn get_or_create_database(&self, db_id: i64) -> Arc<LimiterNode> {
        let _shape = self.read_shape();
        self.get_or_create_database_locked(db_id)
    }

    /// Caller must hold the shape lock shared.
    pub(crate) fn get_or_create_database_locked(&self, db_id: i64) -> Arc<LimiterNode> {
        if let Some(node) = self.databases.get(&db_id) {
            return Arc::clone(node.value());
        }
        // Attach to the tree before indexing so indexed nodes are always reachable
        let node = self.root.upsert_child_with(db_id, |_| {});
        self.databases
            .entry(db_id)
            .or_insert_with(|| Arc::clone(&node));
        node
    }

    /// Collection node, created through `seed` if the tree has not seen it.
    ///
    /// Blocks while a snapshot is being applied.
    pub fn get_or_create_collection(
        &self,
        db_id: i64,
        collection_id: i64,
        seed: CollectionSeed<'_>,
    ) -> Arc<LimiterNode> {
        let _shape = self.read_shape();
        self.get_or_create_collection_locked(db_id, collection_id, seed)
    }

    /// Caller must hold the shape lock shared.
    pub(crate) fn get_or_create_collection_locked(
        &self,
        db_id: i64,
        collection_id: i64,
        seed: CollectionSeed<'_>,
    ) -> Arc<LimiterNode> {
        if let Some(node) = self.collections.get(&(db_id, collection_id)) {
            return Arc::clone(node.value());
        }
        let db = self.get_or_create_database_locked(db_id);
        let node = db.upsert_child_with(collection_id, |collection| seed(&db, collection));
        self.collections
            .entry((db_id, collection_id))
            .or_insert_with(|| Arc::clone(&node));
        node
    }

    /// Lookup only; never creates.
    pub fn get_collection(&self, db_id: i64, collection_id: i64) -> Option<Arc<LimiterNode>> {
        self.collections
            .get(&(db_id, collection_id))
            .map(|n| Arc::clone(n.value()))
    }

    pub fn database_ids(&self) -> Vec<i64> {
        let mut ids: Vec<_> = self.databases.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn collection_keys(&self) -> Vec<(i64, i64)> {
        let mut keys: Vec<_> = self.collections.iter().map(|e| *e.key()).collect();
        keys.sort_unstable();
        keys
    }

    /// Drop a database from the tree and every index entry beneath it.
    pub(crate) fn remove_database(&self, db_id: i64) {
        self.databases.remove(&db_id);
        self.collections.retain(|(db, _), _| *db != db_id);
    }

    pub(crate) fn remove_collection(&self, db_id: i64, collection_id: i64) {
        self.collections.remove(&(db_id, collection_id));
    }

    pub(crate) fn index_database(&self, node: &Arc<LimiterNode>, db_id: i64) {
        self.databases.insert(db_id, Arc::clone(node));
    }

    pub(crate) fn index_collection(&self, node: &Arc<LimiterNode>, db_id: i64, collection_id: i64) {
        self.collections.insert((db_id, collection_id), Arc::clone(node));
    }

    pub(crate) fn mark_reconfigured(&self) {
        let mut last = self
            .last_reconfigured
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *last = Some(Utc::now());
    }

    /// Unique `(state, reason)` pairs across the whole tree.
    pub fn quota_states(&self) -> QuotaStatesReport {
        let _shape = self.read_shape();
        let mut pairs = BTreeSet::new();
        let mut pending = vec![Arc::clone(&self.root)];
        while let Some(node) = pending.pop() {
            pairs.extend(node.active_states());
            pending.extend(node.children());
        }

        let last_reconfigured = *self
            .last_reconfigured
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        QuotaStatesReport {
            states: pairs.iter().map(|(s, _)| *s).collect(),
            reasons: pairs.iter().map(|(_, c)| c.reason().to_string()).collect(),
            codes: pairs.iter().map(|(_, c)| *c).collect(),
            last_reconfigured,
        }
    }
}

impl Default for LimiterTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Default collection seed: copy the parent database's Data-class rates
/// into fresh buckets. Rate types the database does not track stay unlimited.
pub fn seed_from_database(db: &LimiterNode, collection: &LimiterNode) {
    for rate_type in RateType::data_types() {
        if let Some(bucket) = db.bucket(rate_type) {
            collection.insert_bucket(rate_type, TokenBucket::new(bucket.rate(), bucket.burst()));
        }
    }
}
