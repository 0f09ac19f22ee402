//! In-memory Raft log storage and state-machine adapter.
//!
//! Implements openraft 0.9 `RaftLogStorage`, `RaftLogReader`,
//! `RaftStateMachine`, and `RaftSnapshotBuilder`.
//!
//! The `StateMachine` here is an adapter: committed `Transaction` entries are
//! forwarded to the domain FSM through [`FsmHooks`], and snapshots delegate
//! to the FSM's own encode/restore. Without hooks the adapter is a pure log
//! (every transaction applies vacuously), which is what the cluster tests use.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::ops::RangeBounds;
use std::sync::Arc;

use openraft::storage::{
    LogFlushed, LogState, RaftLogReader, RaftLogStorage, RaftStateMachine, Snapshot,
};
use openraft::{
    BasicNode, Entry, EntryPayload, LogId, RaftLogId, RaftSnapshotBuilder, SnapshotMeta,
    StorageError, StoredMembership, Vote,
};
use tokio::sync::Mutex;

use crate::types::{BeaconRequest, BeaconResponse, FsmHooks, TypeConfig};

// ---------------------------------------------------------------------------
// Log store
// ---------------------------------------------------------------------------

struct LogStoreInner {
    vote: Option<Vote<u64>>,
    log: BTreeMap<u64, Entry<TypeConfig>>,
    purged: Option<LogId<u64>>,
}

/// In-memory log store.
///
/// `Arc<Mutex<...>>` inside so the reader returned by `get_log_reader`
/// always sees the latest appended entries.
#[derive(Clone)]
pub struct LogStore {
    inner: Arc<Mutex<LogStoreInner>>,
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogStoreInner {
                vote: None,
                log: BTreeMap::new(),
                purged: None,
            })),
        }
    }
}

impl RaftLogReader<TypeConfig> for LogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Send>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry<TypeConfig>>, StorageError<u64>> {
        let inner = self.inner.lock().await;
        Ok(inner.log.range(range).map(|(_, e)| e.clone()).collect())
    }
}

impl RaftLogStorage<TypeConfig> for LogStore {
    type LogReader = Self;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<u64>> {
        let inner = self.inner.lock().await;
        let last = inner.log.iter().next_back().map(|(_, e)| *e.get_log_id());
        Ok(LogState {
            last_purged_log_id: inner.purged,
            last_log_id: last,
        })
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        // Clone shares the Arc — the reader sees all future appends.
        self.clone()
    }

    async fn save_vote(&mut self, vote: &Vote<u64>) -> Result<(), StorageError<u64>> {
        self.inner.lock().await.vote = Some(*vote);
        Ok(())
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<u64>>, StorageError<u64>> {
        Ok(self.inner.lock().await.vote)
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: LogFlushed<TypeConfig>,
    ) -> Result<(), StorageError<u64>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + Send,
        I::IntoIter: Send,
    {
        let mut inner = self.inner.lock().await;
        for entry in entries {
            let idx = entry.get_log_id().index;
            inner.log.insert(idx, entry);
        }
        // In-memory: immediately durable.
        drop(inner);
        callback.log_io_completed(Ok(()));
        Ok(())
    }

    async fn truncate(&mut self, log_id: LogId<u64>) -> Result<(), StorageError<u64>> {
        let mut inner = self.inner.lock().await;
        let keys: Vec<u64> = inner.log.range(log_id.index..).map(|(k, _)| *k).collect();
        for k in keys {
            inner.log.remove(&k);
        }
        Ok(())
    }

    async fn purge(&mut self, log_id: LogId<u64>) -> Result<(), StorageError<u64>> {
        let mut inner = self.inner.lock().await;
        let keys: Vec<u64> = inner.log.range(..=log_id.index).map(|(k, _)| *k).collect();
        for k in keys {
            inner.log.remove(&k);
        }
        inner.purged = Some(log_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// State-machine adapter
// ---------------------------------------------------------------------------

/// Raft-side state machine that delegates application state to the domain
/// FSM via [`FsmHooks`].
pub struct StateMachine {
    last_applied: Option<LogId<u64>>,
    last_membership: StoredMembership<u64, BasicNode>,
    snapshot_idx: u64,
    current_snapshot: Option<StoredSnapshot>,
    hooks: Option<FsmHooks>,
}

#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub meta: SnapshotMeta<u64, BasicNode>,
    pub data: Vec<u8>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// A pure log: transactions commit but apply to nothing.
    pub fn new() -> Self {
        Self {
            last_applied: None,
            last_membership: StoredMembership::new(None, openraft::Membership::new(vec![], None)),
            snapshot_idx: 0,
            current_snapshot: None,
            hooks: None,
        }
    }

    /// A state machine wired to a domain FSM.
    pub fn with_hooks(hooks: FsmHooks) -> Self {
        Self {
            hooks: Some(hooks),
            ..Self::new()
        }
    }
}

impl RaftStateMachine<TypeConfig> for StateMachine {
    type SnapshotBuilder = Self;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId<u64>>, StoredMembership<u64, BasicNode>), StorageError<u64>> {
        Ok((self.last_applied, self.last_membership.clone()))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<BeaconResponse>, StorageError<u64>>
    where
        I: IntoIterator<Item = Entry<TypeConfig>> + Send,
        I::IntoIter: Send,
    {
        let mut responses = Vec::new();
        for entry in entries {
            self.last_applied = Some(*entry.get_log_id());

            match entry.payload {
                EntryPayload::Blank => {
                    responses.push(BeaconResponse::Noop);
                }
                EntryPayload::Normal(ref req) => match req {
                    BeaconRequest::Transaction { ref data } => {
                        let result = match &self.hooks {
                            Some(hooks) => (hooks.apply)(data),
                            None => Ok(()),
                        };
                        if let Err(ref e) = result {
                            tracing::debug!(
                                log_index = entry.get_log_id().index,
                                error = %e,
                                "state transaction rejected by FSM"
                            );
                        }
                        responses.push(BeaconResponse::Applied { result });
                    }
                    BeaconRequest::Noop => {
                        responses.push(BeaconResponse::Noop);
                    }
                },
                EntryPayload::Membership(ref mem) => {
                    self.last_membership =
                        StoredMembership::new(Some(*entry.get_log_id()), mem.clone());
                    responses.push(BeaconResponse::Noop);
                }
            }
        }
        Ok(responses)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        StateMachine {
            last_applied: self.last_applied,
            last_membership: self.last_membership.clone(),
            snapshot_idx: self.snapshot_idx,
            current_snapshot: self.current_snapshot.clone(),
            hooks: self.hooks.clone(),
        }
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<Cursor<Vec<u8>>>, StorageError<u64>> {
        Ok(Box::new(Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<u64, BasicNode>,
        snapshot: Box<Cursor<Vec<u8>>>,
    ) -> Result<(), StorageError<u64>> {
        let new_snapshot = StoredSnapshot {
            meta: meta.clone(),
            data: snapshot.into_inner(),
        };

        self.last_applied = meta.last_log_id;
        self.last_membership = meta.last_membership.clone();

        if let Some(hooks) = &self.hooks {
            if let Err(e) = (hooks.restore)(&new_snapshot.data) {
                return Err(StorageError::IO {
                    source: openraft::StorageIOError::write_state_machine(&std::io::Error::other(
                        format!("snapshot restore: {}", e),
                    )),
                });
            }
        }

        self.current_snapshot = Some(new_snapshot);
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<u64>> {
        match &self.current_snapshot {
            Some(snap) => Ok(Some(Snapshot {
                meta: snap.meta.clone(),
                snapshot: Box::new(Cursor::new(snap.data.clone())),
            })),
            None => Ok(None),
        }
    }
}

impl RaftSnapshotBuilder<TypeConfig> for StateMachine {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<u64>> {
        let data = match &self.hooks {
            Some(hooks) => (hooks.snapshot)(),
            None => Vec::new(),
        };

        self.snapshot_idx += 1;
        let snapshot_id = format!(
            "snap-{}-{}",
            self.snapshot_idx,
            self.last_applied.map_or(0, |id| id.index)
        );

        let meta = SnapshotMeta {
            last_log_id: self.last_applied,
            last_membership: self.last_membership.clone(),
            snapshot_id,
        };

        self.current_snapshot = Some(StoredSnapshot {
            meta: meta.clone(),
            data: data.clone(),
        });

        Ok(Snapshot {
            meta,
            snapshot: Box::new(Cursor::new(data)),
        })
    }
}
