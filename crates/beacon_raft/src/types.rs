//! Openraft type configuration for Beacon.

use std::io::Cursor;
use std::sync::Arc;

use openraft::BasicNode;
use serde::{Deserialize, Serialize};

/// Application request data — proposed to the Raft log.
///
/// Variants:
/// - `Transaction`: a serialized state transaction (raw bytes), applied to
///   the domain state machine through the registered [`FsmHooks`].
/// - `Noop`: a no-op entry used to confirm leadership without side effects;
///   this is what consistent reads fence behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BeaconRequest {
    Transaction { data: Vec<u8> },
    Noop,
}

/// Application response data — returned after applying a log entry.
///
/// A transaction the domain FSM refuses (constraint violation, unknown
/// service, name collision) is still a committed log entry; the refusal
/// travels back to the proposer as `Applied { result: Err(..) }` instead of
/// failing the storage layer, so one bad transaction cannot poison the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BeaconResponse {
    Applied { result: Result<(), String> },
    Noop,
}

openraft::declare_raft_types!(
    pub TypeConfig:
        D            = BeaconRequest,
        R            = BeaconResponse,
        NodeId       = u64,
        Node         = BasicNode,
        Entry        = openraft::Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
        AsyncRuntime = openraft::TokioRuntime,
);

/// Called for each committed `Transaction` entry; the bytes are the
/// serialized transaction payload. An `Err` is the FSM refusing the
/// transaction, not a storage failure.
pub type ApplyFn = Arc<dyn Fn(&[u8]) -> Result<(), String> + Send + Sync>;

/// Produces a full serialized snapshot of the domain state machine.
pub type SnapshotFn = Arc<dyn Fn() -> Vec<u8> + Send + Sync>;

/// Replaces the domain state machine from a serialized snapshot.
pub type RestoreFn = Arc<dyn Fn(&[u8]) -> Result<(), String> + Send + Sync>;

/// The domain state machine's integration points with the Raft layer.
#[derive(Clone)]
pub struct FsmHooks {
    pub apply: ApplyFn,
    pub snapshot: SnapshotFn,
    pub restore: RestoreFn,
}
