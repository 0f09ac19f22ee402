//! Catalog and health domain types shared across the control plane.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Aggregated health of a service instance.
///
/// An instance with no checks at all counts as `Passing`. Any critical check
/// makes the whole instance `Critical`; otherwise any warning check makes it
/// `Warning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passing,
    Warning,
    Critical,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passing => write!(f, "passing"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A member node of a datacenter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub address: String,
}

/// A service registration on a node.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeService {
    /// Unique ID of this registration on its node. Defaults to the service
    /// name when left empty at registration time.
    #[serde(default)]
    pub id: String,
    pub service: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub port: u16,
}

/// A health check attached to a node, optionally scoped to one service
/// registration (empty `service_id` means node-level).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: CheckStatus,
    #[serde(default)]
    pub service_id: String,
}

/// One service instance as returned by the catalog: the hosting node, the
/// registration, and every check that applies to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNode {
    pub node: Node,
    pub service: NodeService,
    pub checks: Vec<HealthCheck>,
}

impl ServiceNode {
    /// Aggregate this instance's checks into a single status.
    pub fn aggregated_status(&self) -> CheckStatus {
        let mut status = CheckStatus::Passing;
        for check in &self.checks {
            match check.status {
                CheckStatus::Critical => return CheckStatus::Critical,
                CheckStatus::Warning => status = CheckStatus::Warning,
                CheckStatus::Passing => {}
            }
        }
        status
    }
}

/// A catalog registration: upserts the node, and optionally one service
/// registration and one named health check.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub datacenter: String,
    pub node: String,
    pub address: String,
    #[serde(default)]
    pub service: Option<NodeService>,
    #[serde(default)]
    pub check: Option<HealthCheck>,
    #[serde(default)]
    pub token: String,
}

/// Per-request read options carried on every RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// ACL token presented by the caller.
    #[serde(default)]
    pub token: String,
    /// Forward the read to the leader and fence it behind the current commit
    /// index before serving.
    #[serde(default)]
    pub require_consistent: bool,
}

/// Where a query execution originates, for locality-aware ranking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySource {
    #[serde(default)]
    pub datacenter: String,
    #[serde(default)]
    pub node: String,
}
