// Token buckets, quota states and the scope tree
pub mod ratelimit;

// Request admission against the tree
pub mod admission;

// Control-plane snapshots
pub mod snapshot;

// Static configuration, config store and watcher
pub mod config;

// Assembled enforcement stack
pub mod service;

// Admin HTTP API
pub mod api;

pub use admission::{AdmissionChecker, AdmissionError};
pub use service::QuotaService;
