//! Raft consensus layer for Beacon.
//!
//! - `Consensus`: the trait the RPC layer writes through
//! - `RaftCluster`: multi-node in-process Raft cluster (openraft 0.9)
//! - `RaftConsensus`: `Consensus` for one member of a `RaftCluster`
//! - `LocalConsensus`: single-node consensus that applies synchronously;
//!   used by tests and single-server deployments
//!
//! All replicated mutations travel as serialized transactions; the domain
//! state machine plugs in through [`FsmHooks`] and is never mutated directly.

pub mod network;
pub mod store;
pub mod types;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use openraft::{BasicNode, Config, Raft};

use crate::network::{Mesh, MeshNet};
use crate::store::{LogStore, StateMachine};
use crate::types::{BeaconRequest, BeaconResponse, TypeConfig};

pub use crate::types::{ApplyFn, FsmHooks, RestoreFn, SnapshotFn};

#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("Not leader")]
    NotLeader,
    /// The transaction committed and the domain FSM refused it.
    #[error("{0}")]
    Rejected(String),
    #[error("Proposal failed: {0}")]
    ProposalFailed(String),
}

/// What the RPC layer needs from the replication layer: ordered writes,
/// leader awareness, and a read fence for consistent reads.
#[async_trait]
pub trait Consensus: Send + Sync + 'static {
    /// Propose a serialized state transaction and wait for it to commit and
    /// apply. An FSM refusal surfaces as [`ConsensusError::Rejected`].
    async fn propose(&self, data: Vec<u8>) -> Result<(), ConsensusError>;

    /// Fence a read behind the current commit index (a committed no-op).
    async fn read_barrier(&self) -> Result<(), ConsensusError>;

    /// Whether this member currently believes it is the leader.
    fn is_leader(&self) -> bool;
}

// ---------------------------------------------------------------------------
// LocalConsensus: single node, synchronous apply
// ---------------------------------------------------------------------------

/// Single-node consensus: proposals apply synchronously through the FSM
/// callback. The leader flag is togglable so leader-forwarding paths can be
/// exercised without a full cluster.
pub struct LocalConsensus {
    apply: ApplyFn,
    leader: AtomicBool,
}

impl LocalConsensus {
    pub fn new(apply: ApplyFn) -> Arc<Self> {
        Arc::new(Self {
            apply,
            leader: AtomicBool::new(true),
        })
    }

    pub fn follower(apply: ApplyFn) -> Arc<Self> {
        Arc::new(Self {
            apply,
            leader: AtomicBool::new(false),
        })
    }

    pub fn set_leader(&self, leader: bool) {
        self.leader.store(leader, Ordering::SeqCst);
    }
}

#[async_trait]
impl Consensus for LocalConsensus {
    async fn propose(&self, data: Vec<u8>) -> Result<(), ConsensusError> {
        if !self.is_leader() {
            return Err(ConsensusError::NotLeader);
        }
        (self.apply)(&data).map_err(ConsensusError::Rejected)
    }

    async fn read_barrier(&self) -> Result<(), ConsensusError> {
        if !self.is_leader() {
            return Err(ConsensusError::NotLeader);
        }
        Ok(())
    }

    fn is_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// RaftCluster: multi-node in-process cluster
// ---------------------------------------------------------------------------

/// A set of Raft members wired together through an in-process [`Mesh`].
///
/// Membership is fixed at bootstrap. Each member can carry its own domain
/// FSM via [`FsmHooks`]; without hooks the cluster is a pure log, which is
/// enough for the consensus-level tests.
pub struct RaftCluster {
    mesh: Arc<Mesh>,
    members: Vec<u64>,
}

impl RaftCluster {
    /// Bootstrap a cluster with no domain state machines attached.
    pub async fn bootstrap(members: Vec<u64>) -> Result<Self, ConsensusError> {
        let fsms = vec![None; members.len()];
        Self::build(members, fsms).await
    }

    /// Bootstrap a cluster where each member applies committed transactions
    /// to its own domain state machine.
    pub async fn bootstrap_with_fsms(
        members: Vec<u64>,
        fsm_for: impl Fn(u64) -> FsmHooks,
    ) -> Result<Self, ConsensusError> {
        let fsms = members.iter().map(|&id| Some(fsm_for(id))).collect();
        Self::build(members, fsms).await
    }

    async fn build(
        members: Vec<u64>,
        mut fsms: Vec<Option<FsmHooks>>,
    ) -> Result<Self, ConsensusError> {
        if members.is_empty() {
            return Err(ConsensusError::ProposalFailed(
                "cannot bootstrap an empty cluster".into(),
            ));
        }
        let config = Config {
            heartbeat_interval: 60,
            election_timeout_min: 200,
            election_timeout_max: 400,
            ..Default::default()
        };
        let config = Arc::new(
            config
                .validate()
                .map_err(|e| ConsensusError::ProposalFailed(format!("raft config: {}", e)))?,
        );

        let mesh = Mesh::new();
        for (idx, &id) in members.iter().enumerate() {
            let sm = match fsms[idx].take() {
                Some(hooks) => StateMachine::with_hooks(hooks),
                None => StateMachine::new(),
            };
            let raft = Raft::new(
                id,
                config.clone(),
                MeshNet::new(mesh.clone()),
                LogStore::new(),
                sm,
            )
            .await
            .map_err(|e| ConsensusError::ProposalFailed(format!("member {} startup: {}", id, e)))?;
            mesh.register(id, raft);
        }

        let voters: BTreeMap<u64, BasicNode> = members
            .iter()
            .map(|&id| (id, BasicNode::new(format!("member-{}", id).as_str())))
            .collect();
        if let Some(seed) = mesh.lookup(members[0]) {
            seed.initialize(voters)
                .await
                .map_err(|e| ConsensusError::ProposalFailed(format!("cluster init: {}", e)))?;
        }
        Ok(Self { mesh, members })
    }

    /// The leader id, from the first member that knows one.
    pub fn current_leader(&self) -> Option<u64> {
        self.members
            .iter()
            .find_map(|&id| self.mesh.lookup(id)?.metrics().borrow().current_leader)
    }

    /// Poll until some member reports a leader.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Result<u64, ConsensusError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(id) = self.current_leader() {
                return Ok(id);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ConsensusError::ProposalFailed(
                    "no leader elected within the timeout".into(),
                ));
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Propose a state transaction and wait for the FSM outcome.
    pub async fn propose_tx(&self, data: Vec<u8>) -> Result<(), ConsensusError> {
        match self.submit(BeaconRequest::Transaction { data }).await? {
            BeaconResponse::Applied { result } => result.map_err(ConsensusError::Rejected),
            BeaconResponse::Noop => Ok(()),
        }
    }

    /// Commit a no-op entry: leadership confirmation without side effects,
    /// used as the consistent-read fence.
    pub async fn commit_noop(&self) -> Result<(), ConsensusError> {
        self.submit(BeaconRequest::Noop).await.map(|_| ())
    }

    /// Hand the request to the member that believes it leads; openraft
    /// rejects writes everywhere else, so fall back to the remaining members
    /// if that view was stale.
    async fn submit(&self, req: BeaconRequest) -> Result<BeaconResponse, ConsensusError> {
        let mut order = self.members.clone();
        if let Some(leader) = self.current_leader() {
            order.retain(|&id| id != leader);
            order.insert(0, leader);
        }

        let mut last = ConsensusError::ProposalFailed("no members reachable".into());
        for id in order {
            let Some(raft) = self.mesh.lookup(id) else {
                continue;
            };
            match raft.client_write(req.clone()).await {
                Ok(resp) => return Ok(resp.data),
                Err(e) => {
                    last = ConsensusError::ProposalFailed(format!("member {}: {}", id, e));
                }
            }
        }
        Err(last)
    }

    /// Cut a member off from the mesh, simulating a partition. The member
    /// keeps running; nobody can reach it and it can reach nobody.
    pub fn isolate(&self, id: u64) {
        self.mesh.deregister(id);
    }

    /// Direct handle to one member's Raft instance.
    pub fn raft_handle(&self, id: u64) -> Option<Raft<TypeConfig>> {
        self.mesh.lookup(id)
    }

    pub fn members(&self) -> &[u64] {
        &self.members
    }

    /// Shut every member down.
    pub async fn shutdown(self) -> Result<(), ConsensusError> {
        for &id in &self.members {
            if let Some(raft) = self.mesh.lookup(id) {
                raft.shutdown().await.map_err(|e| {
                    ConsensusError::ProposalFailed(format!("shutdown member {}: {}", id, e))
                })?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RaftConsensus: Consensus for one cluster member
// ---------------------------------------------------------------------------

/// `Consensus` implementation for a single member of a [`RaftCluster`].
/// Leadership is judged from this member's own view.
pub struct RaftConsensus {
    cluster: Arc<RaftCluster>,
    member_id: u64,
}

impl RaftConsensus {
    pub fn new(cluster: Arc<RaftCluster>, member_id: u64) -> Arc<Self> {
        Arc::new(Self { cluster, member_id })
    }
}

#[async_trait]
impl Consensus for RaftConsensus {
    async fn propose(&self, data: Vec<u8>) -> Result<(), ConsensusError> {
        self.cluster.propose_tx(data).await
    }

    async fn read_barrier(&self) -> Result<(), ConsensusError> {
        self.cluster.commit_noop().await
    }

    fn is_leader(&self) -> bool {
        match self.cluster.raft_handle(self.member_id) {
            Some(raft) => raft.metrics().borrow().current_leader == Some(self.member_id),
            None => false,
        }
    }
}
