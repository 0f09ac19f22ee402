//! The prepared-query data model and the RPC request/response shapes.
//!
//! A prepared query is a named, persisted service-discovery query: clients
//! register it once and execute it by ID or name without repeating its
//! parameters. Records are replicated through the log and only ever mutated
//! by `Apply` transactions; execution never writes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{QueryOptions, QuerySource, ServiceNode};

/// Per-query failover policy: try up to `nearest_n` nearby datacenters (by
/// round-trip estimate) first, then the explicitly listed ones, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFailoverOptions {
    #[serde(default)]
    pub nearest_n: i32,
    #[serde(default)]
    pub datacenters: Vec<String>,
}

/// The service-selection half of a prepared query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceQuery {
    /// Service to discover. Must exist in the catalog at apply time; it may
    /// vanish later, in which case execution returns an empty candidate set.
    pub service: String,
    #[serde(default)]
    pub failover: QueryFailoverOptions,
    /// Exclude warning-state instances, not just critical ones.
    #[serde(default)]
    pub only_passing: bool,
    /// Required tags; a leading `!` excludes instead. Case-insensitive.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// DNS options passed through verbatim to the DNS consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryDnsOptions {
    /// TTL as a duration string ("10s"). Validated non-negative at apply time.
    #[serde(default)]
    pub ttl: String,
}

/// The persistent prepared-query record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedQuery {
    /// Server-assigned UUID, immutable after create. Empty on create input.
    #[serde(default)]
    pub id: String,
    /// Optional human-readable handle. Unique, and never UUID-shaped so the
    /// ID and name lookup spaces stay disjoint.
    #[serde(default)]
    pub name: String,
    /// The ACL token captured at create or last update; the query's owner.
    #[serde(default)]
    pub token: String,
    pub service: ServiceQuery,
    #[serde(default)]
    pub dns: QueryDnsOptions,
    #[serde(default)]
    pub create_index: u64,
    #[serde(default)]
    pub modify_index: u64,
}

/// Mutation kinds accepted by `PreparedQuery.Apply`. Operations arrive over
/// the wire as strings; anything but the three known ones is carried through
/// as `Other` and rejected by the applier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryOp {
    Create,
    Update,
    Delete,
    Other(String),
}

impl fmt::Display for QueryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Other(op) => write!(f, "{}", op),
        }
    }
}

/// Request for `PreparedQuery.Apply`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedQueryRequest {
    pub datacenter: String,
    pub op: QueryOp,
    pub query: PreparedQuery,
    /// Write token presented by the caller.
    #[serde(default)]
    pub token: String,
}

/// Request for `PreparedQuery.Get` and `PreparedQuery.Lookup`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreparedQuerySpecificRequest {
    pub datacenter: String,
    /// A UUID selects by ID, anything else by name.
    pub query_id_or_name: String,
    #[serde(default)]
    pub options: QueryOptions,
}

/// Request for `PreparedQuery.List`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DcSpecificRequest {
    pub datacenter: String,
    #[serde(default)]
    pub options: QueryOptions,
}

/// Queries plus the replication index the snapshot was taken at.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexedPreparedQueries {
    pub index: u64,
    pub queries: Vec<PreparedQuery>,
}

/// Request for `PreparedQuery.Execute`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreparedQueryExecuteRequest {
    pub datacenter: String,
    pub query_id_or_name: String,
    /// Truncate the result to this many instances when positive.
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub source: QuerySource,
    #[serde(default)]
    pub options: QueryOptions,
}

/// Request for `PreparedQuery.ExecuteRemote`: the query body travels inline
/// so the remote datacenter never needs the originating store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedQueryExecuteRemoteRequest {
    pub datacenter: String,
    pub query: PreparedQuery,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub options: QueryOptions,
}

/// Response for both execute variants.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreparedQueryExecuteResponse {
    pub nodes: Vec<ServiceNode>,
    /// The datacenter that produced the final (possibly empty) result.
    pub datacenter: String,
    /// Number of datacenters attempted before the one that answered.
    pub failovers: u32,
    pub dns: QueryDnsOptions,
}

impl ServiceQuery {
    /// Tags that must all be present on a candidate (the non-negated ones).
    pub fn required_tags(&self) -> impl Iterator<Item = &str> {
        self.tags
            .iter()
            .filter(|t| !t.starts_with('!'))
            .map(String::as_str)
    }

    /// Tags that must be absent from a candidate (the `!`-prefixed ones).
    pub fn excluded_tags(&self) -> impl Iterator<Item = &str> {
        self.tags
            .iter()
            .filter_map(|t| t.strip_prefix('!'))
    }
}
