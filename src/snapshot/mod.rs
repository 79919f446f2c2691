// Control-plane limiter snapshots
//
// A snapshot mirrors the scope hierarchy: the root carries cluster limits,
// its children are databases, then collections, then partitions.

mod applier;

pub use applier::ApplyStats;

use crate::ratelimit::{ErrorCode, QuotaState, RateScope, RateType};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;


/// Rate for one rate type. `0` denies the type entirely.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateEntry {
    pub rate_type: RateType,
    pub rate: f64,
}

/// An active quota state and the reason for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    pub state: QuotaState,
    pub code: ErrorCode,
}

/// One level of a control-plane snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LimiterSnapshot {
    /// Scope id; required on every node except the root
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default)]
    pub rates: Vec<RateEntry>,
    #[serde(default)]
    pub states: Vec<StateEntry>,
    #[serde(default)]
    pub children: Vec<LimiterSnapshot>,
}

impl LimiterSnapshot {
    /// Root level snapshot (no id).
    pub fn root() -> Self {
        Self::default()
    }

    /// Child level snapshot for scope `id`.
    pub fn scope(id: i64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    pub fn rate(mut self, rate_type: RateType, rate: f64) -> Self {
        self.rates.push(RateEntry { rate_type, rate });
        self
    }

    pub fn rates(mut self, rate_types: impl IntoIterator<Item = RateType>, rate: f64) -> Self {
        self.rates
            .extend(rate_types.into_iter().map(|rate_type| RateEntry { rate_type, rate }));
        self
    }

    pub fn state(mut self, state: QuotaState, code: ErrorCode) -> Self {
        self.states.push(StateEntry { state, code });
        self
    }

    pub fn child(mut self, child: LimiterSnapshot) -> Self {
        self.children.push(child);
        self
    }

    /// Parse a JSON encoded snapshot.
    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Check the whole snapshot without touching any limiter.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.id.is_some() {
            return Err(SnapshotError::RootWithId);
        }
        self.validate_level(RateScope::Cluster, "cluster")
    }

    fn validate_level(&self, scope: RateScope, path: &str) -> Result<(), SnapshotError> {
        let mut rate_types = HashSet::new();
        for entry in &self.rates {
            if !rate_types.insert(entry.rate_type) {
                return Err(SnapshotError::DuplicateRateType {
                    path: path.to_string(),
                    rate_type: entry.rate_type,
                });
            }
            if entry.rate.is_nan() || entry.rate < 0.0 {
                return Err(SnapshotError::InvalidRate {
                    path: path.to_string(),
                    rate_type: entry.rate_type,
                    rate: entry.rate,
                });
            }
        }

        let mut states = HashSet::new();
        for entry in &self.states {
            if !states.insert(entry.state) {
                return Err(SnapshotError::DuplicateState {
                    path: path.to_string(),
                    state: entry.state,
                });
            }
        }

        if self.children.is_empty() {
            return Ok(());
        }
        let Some(child_scope) = scope.child() else {
            return Err(SnapshotError::TooDeep {
                path: path.to_string(),
            });
        };

        let mut ids = HashSet::new();
        for child in &self.children {
            let Some(id) = child.id else {
                return Err(SnapshotError::MissingId {
                    path: path.to_string(),
                    scope: child_scope,
                });
            };
            if !ids.insert(id) {
                return Err(SnapshotError::DuplicateId {
                    path: path.to_string(),
                    scope: child_scope,
                    id,
                });
            }
            child.validate_level(child_scope, &format!("{}/{} {}", path, child_scope, id))?;
        }
        Ok(())
    }
}

/// A snapshot rejected before any limiter was modified.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotError {
    RootWithId,
    MissingId {
        path: String,
        scope: RateScope,
    },
    DuplicateId {
        path: String,
        scope: RateScope,
        id: i64,
    },
    DuplicateRateType {
        path: String,
        rate_type: RateType,
    },
    DuplicateState {
        path: String,
        state: QuotaState,
    },
    InvalidRate {
        path: String,
        rate_type: RateType,
        rate: f64,
    },
    TooDeep {
        path: String,
    },
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::RootWithId => write!(f, "root of a snapshot must not carry an id"),
            SnapshotError::MissingId { path, scope } => {
                write!(f, "{} child of {} has no id", scope, path)
            }
            SnapshotError::DuplicateId { path, scope, id } => {
                write!(f, "duplicate {} id {} under {}", scope, id, path)
            }
            SnapshotError::DuplicateRateType { path, rate_type } => {
                write!(f, "duplicate rate type {} at {}", rate_type, path)
            }
            SnapshotError::DuplicateState { path, state } => {
                write!(f, "duplicate quota state {} at {}", state, path)
            }
            SnapshotError::InvalidRate {
                path,
                rate_type,
                rate,
            } => write!(f, "invalid rate {} for {} at {}", rate, rate_type, path),
            SnapshotError::TooDeep { path } => {
                write!(f, "partition {} cannot have children", path)
            }
        }
    }
}

impl std::error::Error for SnapshotError {}
