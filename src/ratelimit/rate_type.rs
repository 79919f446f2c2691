use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of request being throttled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RateType {
    DdlCollection,
    DdlPartition,
    DdlIndex,
    DdlFlush,
    DdlCompaction,
    DdlDatabase,
    DmlInsert,
    DmlUpsert,
    DmlDelete,
    DmlBulkLoad,
    DqlSearch,
    DqlQuery,
}

/// Which scopes a rate type is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Schema/topology mutation, checked at cluster scope only
    Ddl,
    /// Data-plane traffic, checked down the whole scope chain
    Data,
}

/// Selects which quota states apply to a rate type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Write,
    Read,
}

impl RateType {
    pub const ALL: [RateType; 12] = [
        RateType::DdlCollection,
        RateType::DdlPartition,
        RateType::DdlIndex,
        RateType::DdlFlush,
        RateType::DdlCompaction,
        RateType::DdlDatabase,
        RateType::DmlInsert,
        RateType::DmlUpsert,
        RateType::DmlDelete,
        RateType::DmlBulkLoad,
        RateType::DqlSearch,
        RateType::DqlQuery,
    ];

    pub fn class(self) -> RequestClass {
        match self {
            RateType::DdlCollection
            | RateType::DdlPartition
            | RateType::DdlIndex
            | RateType::DdlFlush
            | RateType::DdlCompaction
            | RateType::DdlDatabase => RequestClass::Ddl,
            RateType::DmlInsert
            | RateType::DmlUpsert
            | RateType::DmlDelete
            | RateType::DmlBulkLoad
            | RateType::DqlSearch
            | RateType::DqlQuery => RequestClass::Data,
        }
    }

    pub fn access_kind(self) -> AccessKind {
        match self {
            RateType::DqlSearch | RateType::DqlQuery => AccessKind::Read,
            _ => AccessKind::Write,
        }
    }

    pub fn is_ddl(self) -> bool {
        self.class() == RequestClass::Ddl
    }

    /// Rate types that belong to the Data class.
    pub fn data_types() -> impl Iterator<Item = RateType> {
        Self::ALL.into_iter().filter(|rt| !rt.is_ddl())
    }
}

impl fmt::Display for RateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Level of a limiter node in the scope hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RateScope {
    Cluster,
    Database,
    Collection,
    Partition,
}

impl RateScope {
    /// Scope of this node's children, `None` for leaves.
    pub fn child(self) -> Option<RateScope> {
        match self {
            RateScope::Cluster => Some(RateScope::Database),
            RateScope::Database => Some(RateScope::Collection),
            RateScope::Collection => Some(RateScope::Partition),
            RateScope::Partition => None,
        }
    }

    /// Whether buckets for `rate_type` are tracked at this scope.
    ///
    /// The cluster holds both DDL and Data buckets, every other scope only Data.
    pub fn tracks(self, rate_type: RateType) -> bool {
        match self {
            RateScope::Cluster => true,
            _ => !rate_type.is_ddl(),
        }
    }
}

impl fmt::Display for RateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RateScope::Cluster => "cluster",
            RateScope::Database => "database",
            RateScope::Collection => "collection",
            RateScope::Partition => "partition",
        };
        f.write_str(name)
    }
}
