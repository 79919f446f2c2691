// Hierarchical rate limiter: cluster -> database -> collection -> partition
//
// Each node holds one token bucket per tracked rate type plus the quota
// states pushed by the control plane. The tree owns the nodes and keeps
// lookup indexes for databases and collections.

mod bucket;
mod node;
mod quota;
mod rate_type;
mod tree;

pub use bucket::{derive_burst, TokenBucket};
pub use node::{LimiterNode, ScopeId};
pub use quota::{ErrorCode, QuotaState};
pub use rate_type::{AccessKind, RateScope, RateType, RequestClass};
pub use tree::{seed_from_database, CollectionSeed, LimiterTree, QuotaStatesReport};
