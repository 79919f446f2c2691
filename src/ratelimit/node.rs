use super::bucket::{derive_burst, TokenBucket};
use super::quota::{ErrorCode, QuotaState};
use super::rate_type::{RateScope, RateType};
use crate::admission::AdmissionError;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Identifies a node for error reporting. Cluster has no id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId {
    pub scope: RateScope,
    pub id: Option<i64>,
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{} {}", self.scope, id),
            None => write!(f, "{}", self.scope),
        }
    }
}

/// One scope instance in the limiter tree.
///
/// Children are owned through the `children` map; a node never points back
/// at its parent.
pub struct LimiterNode {
    scope: ScopeId,
    buckets: DashMap<RateType, Arc<TokenBucket>>,
    states: RwLock<HashMap<QuotaState, ErrorCode>>,
    children: DashMap<i64, Arc<LimiterNode>>,
}

impl LimiterNode {
    /// Cluster scope node with no buckets.
    pub fn root() -> Self {
        Self::new(RateScope::Cluster, None)
    }

    pub fn new(scope: RateScope, id: Option<i64>) -> Self {
        Self {
            scope: ScopeId { scope, id },
            buckets: DashMap::new(),
            states: RwLock::new(HashMap::new()),
            children: DashMap::new(),
        }
    }

    pub fn scope(&self) -> RateScope {
        self.scope.scope
    }

    pub fn id(&self) -> Option<i64> {
        self.scope.id
    }

    pub fn scope_id(&self) -> ScopeId {
        self.scope
    }

    /// Bucket tracking `rate_type`, or `None` when unlimited at this scope.
    pub fn bucket(&self, rate_type: RateType) -> Option<Arc<TokenBucket>> {
        self.buckets.get(&rate_type).map(|b| Arc::clone(b.value()))
    }

    /// Admit `n` units of `rate_type`. Untracked types always admit.
    pub fn try_admit(&self, rate_type: RateType, n: u64) -> bool {
        match self.bucket(rate_type) {
            Some(bucket) => bucket.allow(n),
            None => true,
        }
    }

    /// Bucket-level check producing the request-facing error.
    pub(crate) fn check_rate(&self, rate_type: RateType, n: u64) -> Result<(), AdmissionError> {
        let Some(bucket) = self.bucket(rate_type) else {
            return Ok(());
        };
        if bucket.allow(n) {
            Ok(())
        } else {
            Err(AdmissionError::RateLimitExceeded {
                scope: self.scope,
                rate_type,
                rate: bucket.rate(),
            })
        }
    }

    /// Active `(state, code)` pairs.
    pub fn active_states(&self) -> Vec<(QuotaState, ErrorCode)> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        let mut active: Vec<_> = states.iter().map(|(s, c)| (*s, *c)).collect();
        active.sort();
        active
    }

    /// Error for the first active state that applies to `rate_type`, if any.
    pub fn quota_exceeded_error(&self, rate_type: RateType) -> Option<AdmissionError> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        // Fixed order keeps the reported reason deterministic
        [QuotaState::DenyToDdl, QuotaState::DenyToWrite, QuotaState::DenyToRead]
            .into_iter()
            .filter(|state| state.applies_to(rate_type))
            .find_map(|state| {
                states.get(&state).map(|code| AdmissionError::QuotaExceeded {
                    scope: self.scope,
                    state,
                    code: *code,
                })
            })
    }

    /// Set a bucket's rate with a derived burst, creating it if needed.
    pub(crate) fn set_rate(&self, rate_type: RateType, rate: f64) {
        self.set_rate_with_burst(rate_type, rate, derive_burst(rate));
    }

    pub(crate) fn set_rate_with_burst(&self, rate_type: RateType, rate: f64, burst: f64) {
        match self.buckets.get(&rate_type) {
            Some(bucket) => bucket.set_rate(rate, burst),
            None => {
                self.buckets
                    .insert(rate_type, Arc::new(TokenBucket::new(rate, burst)));
            }
        }
    }

    /// Install a bucket, replacing any existing one for `rate_type`.
    pub fn insert_bucket(&self, rate_type: RateType, bucket: TokenBucket) {
        self.buckets.insert(rate_type, Arc::new(bucket));
    }

    /// Rate types with a bucket at this node.
    pub fn rate_types(&self) -> Vec<RateType> {
        let mut types: Vec<_> = self.buckets.iter().map(|e| *e.key()).collect();
        types.sort();
        types
    }

    /// Replace the whole set of active states.
    pub(crate) fn replace_states(&self, new_states: HashMap<QuotaState, ErrorCode>) {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        *states = new_states;
    }

    pub fn child(&self, id: i64) -> Option<Arc<LimiterNode>> {
        self.children.get(&id).map(|c| Arc::clone(c.value()))
    }

    /// Existing child `id`, or a new unrestricted child of the next scope.
    ///
    /// Returns `None` for partition nodes, which have no children.
    pub fn upsert_child(&self, id: i64) -> Option<Arc<LimiterNode>> {
        let scope = self.scope.scope.child()?;
        Some(self.upsert_child_with(id, |child| {
            debug_assert_eq!(child.scope(), scope);
        }))
    }

    /// Like [`upsert_child`](Self::upsert_child), running `seed` on a newly
    /// created child before it becomes visible to other threads.
    ///
    /// Must not be called on partition nodes.
    pub(crate) fn upsert_child_with(
        &self,
        id: i64,
        seed: impl FnOnce(&LimiterNode),
    ) -> Arc<LimiterNode> {
        let scope = self.scope.scope.child().unwrap_or(RateScope::Partition);
        let child = self.children.entry(id).or_insert_with(|| {
            let node = LimiterNode::new(scope, Some(id));
            seed(&node);
            Arc::new(node)
        });
        Arc::clone(child.value())
    }

    /// Remove children whose id is not in `keep`; returns the removed ids.
    pub fn remove_children_not_in(&self, keep: &HashSet<i64>) -> Vec<i64> {
        let mut removed = Vec::new();
        self.children.retain(|id, _| {
            let retain = keep.contains(id);
            if !retain {
                removed.push(*id);
            }
            retain
        });
        removed.sort_unstable();
        removed
    }

    pub fn children_ids(&self) -> Vec<i64> {
        let mut ids: Vec<_> = self.children.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn children(&self) -> Vec<Arc<LimiterNode>> {
        self.children.iter().map(|e| Arc::clone(e.value())).collect()
    }
}

impl fmt::Debug for LimiterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimiterNode")
            .field("scope", &self.scope)
            .field("rate_types", &self.rate_types())
            .field("states", &self.active_states())
            .field("children", &self.children_ids())
            .finish()
    }
}
