// Admission checks against the limiter tree

mod error;

pub use error::AdmissionError;

use crate::ratelimit::{seed_from_database, LimiterNode, LimiterTree, RateType, RequestClass};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

#[cfg(test)]
mod tests;

/// Process-wide quota enforcement switch.
pub type EnforcementFlag = Arc<AtomicBool>;

type SeedFn = dyn Fn(&LimiterNode, &LimiterNode) + Send + Sync;

/// Request-path facade over a [`LimiterTree`].
///
/// Cheap to clone; clones share the tree and the enforcement flag.
#[derive(Clone)]
pub struct AdmissionChecker {
    tree: Arc<LimiterTree>,
    enabled: EnforcementFlag,
    seed: Arc<SeedFn>,
}

impl AdmissionChecker {
    pub fn new(tree: Arc<LimiterTree>, enabled: EnforcementFlag) -> Self {
        Self {
            tree,
            enabled,
            seed: Arc::new(seed_from_database),
        }
    }

    /// Replace the seed used for collections first seen by a check.
    pub fn with_seed(
        mut self,
        seed: impl Fn(&LimiterNode, &LimiterNode) + Send + Sync + 'static,
    ) -> Self {
        self.seed = Arc::new(seed);
        self
    }

    pub fn tree(&self) -> &Arc<LimiterTree> {
        &self.tree
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Admit or deny `weight` units of `rate_type`.
    ///
    /// DDL requests are checked at the cluster only. Data requests are checked
    /// at the cluster, then for each referenced collection at its database,
    /// the collection itself and any listed partition that has a node.
    ///
    /// The first denial aborts the walk. Tokens already charged at earlier
    /// nodes are not refunded.
    pub fn check(
        &self,
        db_id: i64,
        collections: &HashMap<i64, Vec<i64>>,
        rate_type: RateType,
        weight: u64,
    ) -> Result<(), AdmissionError> {
        if !self.is_enabled() {
            return Ok(());
        }

        // Held for the whole walk; the walk uses the `_locked` lookups only
        let _shape = self.tree.read_shape();
        let result = self.check_chain(db_id, collections, rate_type, weight);
        if let Err(ref e) = result {
            debug!(
                db_id,
                rate_type = %rate_type,
                weight,
                code = e.wire_code(),
                "Request denied: {}",
                e
            );
        }
        result
    }

    fn check_chain(
        &self,
        db_id: i64,
        collections: &HashMap<i64, Vec<i64>>,
        rate_type: RateType,
        weight: u64,
    ) -> Result<(), AdmissionError> {
        check_node(self.tree.root(), rate_type, weight)?;

        match rate_type.class() {
            RequestClass::Ddl => Ok(()),
            RequestClass::Data => {
                if collections.is_empty() {
                    return Ok(());
                }

                let db = self.tree.get_or_create_database_locked(db_id);
                check_node(&db, rate_type, weight)?;

                for (collection_id, partition_ids) in collections {
                    let collection = self.tree.get_or_create_collection_locked(
                        db_id,
                        *collection_id,
                        &*self.seed,
                    );
                    check_node(&collection, rate_type, weight)?;

                    // Partitions are only checked when a snapshot configured them
                    for partition_id in partition_ids {
                        if let Some(partition) = collection.child(*partition_id) {
                            check_node(&partition, rate_type, weight)?;
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

/// Quota states first, then the bucket.
fn check_node(node: &LimiterNode, rate_type: RateType, weight: u64) -> Result<(), AdmissionError> {
    if let Some(err) = node.quota_exceeded_error(rate_type) {
        return Err(err);
    }
    node.check_rate(rate_type, weight)
}
