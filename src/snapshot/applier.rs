use super::{LimiterSnapshot, SnapshotError};
use crate::ratelimit::{LimiterNode, LimiterTree};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::PoisonError;
use tracing::{debug, info, warn};

/// Counters for one applied snapshot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ApplyStats {
    pub databases: usize,
    pub collections: usize,
    pub partitions: usize,
    pub pruned: usize,
}

impl LimiterTree {
    /// Apply a control-plane snapshot.
    ///
    /// The snapshot is validated first; on error nothing is modified. Listed
    /// rates replace the bucket configuration, omitted rate types keep the
    /// current one, quota states are replaced per node, and every database,
    /// collection or partition missing from the snapshot is pruned.
    pub fn replace_from_snapshot(
        &self,
        snapshot: &LimiterSnapshot,
    ) -> Result<ApplyStats, SnapshotError> {
        if let Err(e) = snapshot.validate() {
            warn!(error = %e, "Rejected limiter snapshot");
            return Err(e);
        }

        let _serial = self
            .reconfigure
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _shape = self.write_shape();

        let mut stats = ApplyStats::default();
        apply_limits(self.root(), snapshot);

        let mut keep_databases = HashSet::new();
        for db_snapshot in &snapshot.children {
            let Some(db_id) = db_snapshot.id else { continue };
            keep_databases.insert(db_id);
            stats.databases += 1;

            let db = self.root().upsert_child_with(db_id, |_| {});
            self.index_database(&db, db_id);
            apply_limits(&db, db_snapshot);

            let mut keep_collections = HashSet::new();
            for collection_snapshot in &db_snapshot.children {
                let Some(collection_id) = collection_snapshot.id else { continue };
                keep_collections.insert(collection_id);
                stats.collections += 1;

                let collection = db.upsert_child_with(collection_id, |_| {});
                self.index_collection(&collection, db_id, collection_id);
                apply_limits(&collection, collection_snapshot);

                let mut keep_partitions = HashSet::new();
                for partition_snapshot in &collection_snapshot.children {
                    let Some(partition_id) = partition_snapshot.id else { continue };
                    keep_partitions.insert(partition_id);
                    stats.partitions += 1;

                    let partition = collection.upsert_child_with(partition_id, |_| {});
                    apply_limits(&partition, partition_snapshot);
                }
                stats.pruned += collection.remove_children_not_in(&keep_partitions).len();
            }

            for collection_id in db.remove_children_not_in(&keep_collections) {
                self.remove_collection(db_id, collection_id);
                stats.pruned += 1;
            }
        }

        for db_id in self.root().remove_children_not_in(&keep_databases) {
            self.remove_database(db_id);
            stats.pruned += 1;
        }

        self.mark_reconfigured();
        info!(
            databases = stats.databases,
            collections = stats.collections,
            partitions = stats.partitions,
            pruned = stats.pruned,
            "Applied limiter snapshot"
        );
        Ok(stats)
    }
}

/// Rates and quota states of a single level.
fn apply_limits(node: &LimiterNode, snapshot: &LimiterSnapshot) {
    for entry in &snapshot.rates {
        if !node.scope().tracks(entry.rate_type) {
            debug!(
                scope = %node.scope_id(),
                rate_type = %entry.rate_type,
                "Ignoring rate type not tracked at this scope"
            );
            continue;
        }
        node.set_rate(entry.rate_type, entry.rate);
    }

    let states: HashMap<_, _> = snapshot.states.iter().map(|e| (e.state, e.code)).collect();
    node.replace_states(states);
}
