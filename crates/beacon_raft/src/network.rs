//! In-process transport between Raft members.
//!
//! `Mesh` is a registry of live `Raft` handles keyed by member id. A `Link`
//! looks its peer up at call time and invokes the handle directly, so RPCs
//! never touch a socket and a deregistered member immediately reads as
//! unreachable. Tests partition a node by dropping it from the mesh.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use openraft::error::{
    Fatal, InstallSnapshotError, RPCError, RaftError, RemoteError, ReplicationClosed,
    StreamingError, Unreachable,
};
use openraft::network::{RPCOption, RaftNetwork, RaftNetworkFactory};
use openraft::raft::{
    AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest, InstallSnapshotResponse,
    SnapshotResponse, VoteRequest, VoteResponse,
};
use openraft::storage::Snapshot;
use openraft::{BasicNode, Raft, Vote};
use parking_lot::RwLock;

use crate::types::TypeConfig;

/// Registry of reachable Raft members.
#[derive(Default)]
pub struct Mesh {
    peers: RwLock<HashMap<u64, Raft<TypeConfig>>>,
}

impl Mesh {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, id: u64, raft: Raft<TypeConfig>) {
        self.peers.write().insert(id, raft);
    }

    /// Drop a member; every link to it starts failing as unreachable.
    pub fn deregister(&self, id: u64) {
        self.peers.write().remove(&id);
    }

    /// Handle for a member, if it is still reachable. `Raft` clones share
    /// the underlying core.
    pub fn lookup(&self, id: u64) -> Option<Raft<TypeConfig>> {
        self.peers.read().get(&id).cloned()
    }
}

/// Per-member network factory backed by the shared [`Mesh`].
pub struct MeshNet {
    mesh: Arc<Mesh>,
}

impl MeshNet {
    pub fn new(mesh: Arc<Mesh>) -> Self {
        Self { mesh }
    }
}

impl RaftNetworkFactory<TypeConfig> for MeshNet {
    type Network = Link;

    async fn new_client(&mut self, target: u64, _node: &BasicNode) -> Self::Network {
        Link {
            mesh: self.mesh.clone(),
            peer: target,
        }
    }
}

/// A connection to one peer: just the registry and the peer's id, resolved
/// on every call so partitions take effect immediately.
pub struct Link {
    mesh: Arc<Mesh>,
    peer: u64,
}

fn severed(peer: u64) -> Unreachable {
    Unreachable::new(&io::Error::new(
        io::ErrorKind::ConnectionRefused,
        format!("raft member {peer} is not in the mesh"),
    ))
}

impl RaftNetwork<TypeConfig> for Link {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<u64>, RPCError<u64, BasicNode, RaftError<u64>>> {
        match self.mesh.lookup(self.peer) {
            Some(raft) => raft
                .append_entries(rpc)
                .await
                .map_err(|e| RPCError::RemoteError(RemoteError::new(self.peer, e))),
            None => Err(RPCError::Unreachable(severed(self.peer))),
        }
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<u64>,
        _option: RPCOption,
    ) -> Result<VoteResponse<u64>, RPCError<u64, BasicNode, RaftError<u64>>> {
        match self.mesh.lookup(self.peer) {
            Some(raft) => raft
                .vote(rpc)
                .await
                .map_err(|e| RPCError::RemoteError(RemoteError::new(self.peer, e))),
            None => Err(RPCError::Unreachable(severed(self.peer))),
        }
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<u64>,
        RPCError<u64, BasicNode, RaftError<u64, InstallSnapshotError>>,
    > {
        match self.mesh.lookup(self.peer) {
            Some(raft) => raft
                .install_snapshot(rpc)
                .await
                .map_err(|e| RPCError::RemoteError(RemoteError::new(self.peer, e))),
            None => Err(RPCError::Unreachable(severed(self.peer))),
        }
    }

    async fn full_snapshot(
        &mut self,
        _vote: Vote<u64>,
        _snapshot: Snapshot<TypeConfig>,
        _cancel: impl std::future::Future<Output = ReplicationClosed> + Send + 'static,
        _option: RPCOption,
    ) -> Result<SnapshotResponse<u64>, StreamingError<TypeConfig, Fatal<u64>>> {
        // Chunked install_snapshot covers the in-process case.
        Err(StreamingError::Unreachable(Unreachable::new(
            &io::Error::new(
                io::ErrorKind::Unsupported,
                "streaming snapshots are not wired in-process",
            ),
        )))
    }
}
