//! Server wiring: one member of one datacenter.
//!
//! A `Server` owns the replicated state machine, a consensus handle, the ACL
//! resolver, the coordinate store, and its view of the WAN member pool. The
//! prepared-query RPC surface lives in `endpoint`/`execute`; the catalog
//! registration path (collaborator, consumed by queries) is here.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use beacon_catalog::state::{StateStore, StateTransaction};
use beacon_catalog::CoordinateStore;
use beacon_common::config::BeaconConfig;
use beacon_common::query::{
    DcSpecificRequest, IndexedPreparedQueries, PreparedQuery, PreparedQueryExecuteRemoteRequest,
    PreparedQueryExecuteRequest, PreparedQueryExecuteResponse, PreparedQueryRequest,
    PreparedQuerySpecificRequest,
};
use beacon_common::types::RegisterRequest;
use beacon_common::{BeaconError, BeaconResult, Entropy};
use beacon_raft::{Consensus, ConsensusError, FsmHooks};

use crate::acl::{AclResolver, OwnershipPolicy};
use crate::forward::{MemberPool, RpcTarget};

pub struct Server {
    pub(crate) config: BeaconConfig,
    pub(crate) state: Arc<StateStore>,
    pub(crate) consensus: Arc<dyn Consensus>,
    pub(crate) acl: Arc<dyn AclResolver>,
    pub(crate) coordinates: Arc<CoordinateStore>,
    pub(crate) members: Arc<MemberPool>,
    pub(crate) entropy: Arc<Entropy>,
    pub(crate) policy: OwnershipPolicy,
}

impl Server {
    pub fn new(
        config: BeaconConfig,
        state: Arc<StateStore>,
        consensus: Arc<dyn Consensus>,
        acl: Arc<dyn AclResolver>,
        coordinates: Arc<CoordinateStore>,
        members: Arc<MemberPool>,
        entropy: Arc<Entropy>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            state,
            consensus,
            acl,
            coordinates,
            members,
            entropy,
            policy: OwnershipPolicy,
        })
    }

    /// Integration points for wiring a `StateStore` into a consensus
    /// implementation: apply, snapshot, restore.
    pub fn fsm_hooks(state: &Arc<StateStore>) -> FsmHooks {
        let apply = state.clone();
        let snapshot = state.clone();
        let restore = state.clone();
        FsmHooks {
            apply: Arc::new(move |data: &[u8]| apply.apply(data)),
            snapshot: Arc::new(move || snapshot.snapshot()),
            restore: Arc::new(move |data: &[u8]| restore.restore(data)),
        }
    }

    pub fn config(&self) -> &BeaconConfig {
        &self.config
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    pub fn coordinates(&self) -> &Arc<CoordinateStore> {
        &self.coordinates
    }

    /// Catalog write path: upsert a node, optionally a service registration
    /// and a health check. Routed through the replicated log like every
    /// other mutation.
    pub async fn catalog_register(&self, req: RegisterRequest) -> BeaconResult<()> {
        if req.datacenter != self.config.datacenter {
            return self.members.member_for(&req.datacenter)?.register(req).await;
        }
        if !self.consensus.is_leader() {
            return self.members.leader_for(&self.config.datacenter)?.register(req).await;
        }
        self.propose(StateTransaction::Register(req)).await
    }

    /// Publish a node coordinate into the local datacenter's store.
    pub fn update_coordinate(&self, node: impl Into<String>, coord: beacon_catalog::Coordinate) {
        self.coordinates.update_node(node, coord);
    }

    /// Submit a transaction to the replicated log and wait for the FSM.
    pub(crate) async fn propose(&self, tx: StateTransaction) -> BeaconResult<()> {
        let data = tx.encode().map_err(BeaconError::internal)?;
        self.consensus.propose(data).await.map_err(|e| match e {
            ConsensusError::NotLeader => BeaconError::NoLeader,
            ConsensusError::Rejected(msg) => BeaconError::Internal(msg),
            other => BeaconError::Internal(other.to_string()),
        })
    }

    /// Fence reads behind the leader's current commit index.
    pub(crate) async fn read_barrier(&self) -> BeaconResult<()> {
        self.consensus.read_barrier().await.map_err(|e| match e {
            ConsensusError::NotLeader => BeaconError::NoLeader,
            other => BeaconError::Internal(other.to_string()),
        })
    }

    /// Resolve a query by ID (UUID-shaped input) or by name. A miss is an
    /// empty result, not an error; callers gate ACLs after resolution.
    pub(crate) fn resolve_query(&self, id_or_name: &str) -> (u64, Option<PreparedQuery>) {
        if Uuid::parse_str(id_or_name).is_ok() {
            self.state.query_get(id_or_name)
        } else {
            self.state.query_get_by_name(id_or_name)
        }
    }

    /// A fresh query ID, collision-checked against the store.
    pub(crate) fn new_query_id(&self) -> String {
        loop {
            let id = self.entropy.uuid_v4();
            if self.state.query_get(&id).1.is_none() {
                return id;
            }
        }
    }
}

/// The member-facing RPC surface: forwarded requests land here and are
/// served by the same handlers local clients use.
#[async_trait]
impl RpcTarget for Server {
    fn datacenter(&self) -> String {
        self.config.datacenter.clone()
    }

    fn is_leader(&self) -> bool {
        self.consensus.is_leader()
    }

    async fn apply(&self, req: PreparedQueryRequest) -> BeaconResult<String> {
        self.prepared_query_apply(req).await
    }

    async fn get(&self, req: PreparedQuerySpecificRequest) -> BeaconResult<IndexedPreparedQueries> {
        self.prepared_query_get(req).await
    }

    async fn lookup(
        &self,
        req: PreparedQuerySpecificRequest,
    ) -> BeaconResult<IndexedPreparedQueries> {
        self.prepared_query_lookup(req).await
    }

    async fn list(&self, req: DcSpecificRequest) -> BeaconResult<IndexedPreparedQueries> {
        self.prepared_query_list(req).await
    }

    async fn execute(
        &self,
        req: PreparedQueryExecuteRequest,
    ) -> BeaconResult<PreparedQueryExecuteResponse> {
        self.prepared_query_execute(req).await
    }

    async fn execute_remote(
        &self,
        req: PreparedQueryExecuteRemoteRequest,
    ) -> BeaconResult<PreparedQueryExecuteResponse> {
        self.prepared_query_execute_remote(req).await
    }

    async fn register(&self, req: RegisterRequest) -> BeaconResult<()> {
        self.catalog_register(req).await
    }
}
