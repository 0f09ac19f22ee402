//! Request forwarding between cluster members and between datacenters.
//!
//! Forwarding is transparent: the original response comes back verbatim.
//! Two axes:
//!
//! 1. **Leader forwarding** — writes and consistent reads re-dispatch to the
//!    local datacenter's leader; any member may accept the RPC.
//! 2. **Datacenter forwarding** — a request whose target datacenter differs
//!    from the handler's ships to any reachable member of that datacenter.
//!
//! `MemberPool` is the in-process member registry both axes route through,
//! in the same shape as the consensus layer's node router.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use beacon_common::query::{
    DcSpecificRequest, IndexedPreparedQueries, PreparedQueryExecuteRemoteRequest,
    PreparedQueryExecuteRequest, PreparedQueryExecuteResponse, PreparedQueryRequest,
    PreparedQuerySpecificRequest,
};
use beacon_common::types::RegisterRequest;
use beacon_common::{BeaconError, BeaconResult};

/// The RPC surface one member exposes to its peers. Forwarded calls cross
/// this seam so the future types stay finite even though servers forward to
/// each other.
#[async_trait]
pub trait RpcTarget: Send + Sync {
    fn datacenter(&self) -> String;
    fn is_leader(&self) -> bool;

    async fn apply(&self, req: PreparedQueryRequest) -> BeaconResult<String>;
    async fn get(&self, req: PreparedQuerySpecificRequest) -> BeaconResult<IndexedPreparedQueries>;
    async fn lookup(
        &self,
        req: PreparedQuerySpecificRequest,
    ) -> BeaconResult<IndexedPreparedQueries>;
    async fn list(&self, req: DcSpecificRequest) -> BeaconResult<IndexedPreparedQueries>;
    async fn execute(
        &self,
        req: PreparedQueryExecuteRequest,
    ) -> BeaconResult<PreparedQueryExecuteResponse>;
    async fn execute_remote(
        &self,
        req: PreparedQueryExecuteRemoteRequest,
    ) -> BeaconResult<PreparedQueryExecuteResponse>;
    async fn register(&self, req: RegisterRequest) -> BeaconResult<()>;
}

/// Shared registry of members, grouped by datacenter (the WAN pool).
#[derive(Default)]
pub struct MemberPool {
    members: DashMap<String, Vec<Arc<dyn RpcTarget>>>,
}

impl MemberPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a member under its datacenter.
    pub fn join(&self, member: Arc<dyn RpcTarget>) {
        self.members.entry(member.datacenter()).or_default().push(member);
    }

    /// Datacenters with at least one registered member.
    pub fn datacenters(&self) -> Vec<String> {
        let mut dcs: Vec<String> = self.members.iter().map(|e| e.key().clone()).collect();
        dcs.sort();
        dcs
    }

    /// Any reachable member of the target datacenter.
    pub fn member_for(&self, dc: &str) -> BeaconResult<Arc<dyn RpcTarget>> {
        self.members
            .get(dc)
            .and_then(|members| members.first().cloned())
            .ok_or_else(|| BeaconError::UnavailableDc(dc.to_string()))
    }

    /// The current leader of the target datacenter.
    pub fn leader_for(&self, dc: &str) -> BeaconResult<Arc<dyn RpcTarget>> {
        let members = self
            .members
            .get(dc)
            .ok_or_else(|| BeaconError::UnavailableDc(dc.to_string()))?;
        members
            .iter()
            .find(|m| m.is_leader())
            .cloned()
            .ok_or(BeaconError::NoLeader)
    }
}
