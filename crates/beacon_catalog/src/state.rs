//! The replicated finite-state machine.
//!
//! One `StateStore` per server holds everything the ordered log has applied:
//! the service catalog (nodes, service registrations, health checks) and the
//! prepared-query store (ID map plus name index). A store-wide monotonic
//! index advances on every successful mutation; each query records the index
//! it was created and last modified at.
//!
//! There are no public mutation methods. Writes arrive as serialized
//! [`StateTransaction`] entries through [`StateStore::apply`], which is what
//! the consensus layer's apply callback invokes on the leader and on every
//! follower alike. A transaction the FSM refuses (unknown service, name
//! collision) leaves the state and index untouched.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use beacon_common::query::PreparedQuery;
use beacon_common::types::{HealthCheck, Node, NodeService, RegisterRequest, ServiceNode};

/// A replicated mutation, serialized into the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StateTransaction {
    /// Catalog upsert: node, optional service registration, optional check.
    Register(RegisterRequest),
    /// Insert or replace a prepared query (create and update share this).
    QuerySet(PreparedQuery),
    /// Remove a prepared query by ID. Idempotent.
    QueryDelete(String),
}

impl StateTransaction {
    pub fn encode(&self) -> Result<Vec<u8>, String> {
        serde_json::to_vec(self).map_err(|e| format!("encode transaction: {}", e))
    }

    pub fn decode(data: &[u8]) -> Result<Self, String> {
        serde_json::from_slice(data).map_err(|e| format!("decode transaction: {}", e))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateInner {
    index: u64,
    /// node name → node
    nodes: BTreeMap<String, Node>,
    /// node name → service id → registration
    services: BTreeMap<String, BTreeMap<String, NodeService>>,
    /// node name → check name → check
    checks: BTreeMap<String, BTreeMap<String, HealthCheck>>,
    /// query ID → record
    queries: BTreeMap<String, PreparedQuery>,
    /// query name → query ID
    query_names: BTreeMap<String, String>,
}

/// The state machine. Shared read-mostly; every mutation is funneled through
/// the replicated log.
pub struct StateStore {
    inner: RwLock<StateInner>,
}

impl StateStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: RwLock::new(StateInner::default()),
        })
    }

    /// Apply one serialized transaction. This is the consensus layer's apply
    /// callback target; an `Err` is a refusal, not a storage failure.
    pub fn apply(&self, data: &[u8]) -> Result<(), String> {
        self.apply_tx(StateTransaction::decode(data)?)
    }

    pub fn apply_tx(&self, tx: StateTransaction) -> Result<(), String> {
        let mut inner = self.inner.write();
        match tx {
            StateTransaction::Register(req) => Self::register(&mut inner, req),
            StateTransaction::QuerySet(query) => Self::query_set(&mut inner, query),
            StateTransaction::QueryDelete(id) => Self::query_delete(&mut inner, &id),
        }
    }

    fn register(inner: &mut StateInner, req: RegisterRequest) -> Result<(), String> {
        inner.index += 1;
        inner.nodes.insert(
            req.node.clone(),
            Node {
                name: req.node.clone(),
                address: req.address,
            },
        );
        if let Some(mut service) = req.service {
            if service.id.is_empty() {
                service.id = service.service.clone();
            }
            inner
                .services
                .entry(req.node.clone())
                .or_default()
                .insert(service.id.clone(), service);
        }
        if let Some(check) = req.check {
            inner
                .checks
                .entry(req.node)
                .or_default()
                .insert(check.name.clone(), check);
        }
        Ok(())
    }

    fn query_set(inner: &mut StateInner, mut query: PreparedQuery) -> Result<(), String> {
        if !Self::service_known(inner, &query.service.service) {
            return Err(format!("invalid service '{}'", query.service.service));
        }
        if !query.name.is_empty() {
            if let Some(existing) = inner.query_names.get(&query.name) {
                if existing != &query.id {
                    return Err(format!("query name '{}' is already in use", query.name));
                }
            }
        }

        inner.index += 1;
        match inner.queries.get(&query.id) {
            Some(existing) => {
                query.create_index = existing.create_index;
                // Release the previous name on rename.
                if existing.name != query.name && !existing.name.is_empty() {
                    inner.query_names.remove(&existing.name);
                }
            }
            None => {
                query.create_index = inner.index;
            }
        }
        query.modify_index = inner.index;

        if !query.name.is_empty() {
            inner.query_names.insert(query.name.clone(), query.id.clone());
        }
        tracing::debug!(query_id = %query.id, index = inner.index, "prepared query set");
        inner.queries.insert(query.id.clone(), query);
        Ok(())
    }

    fn query_delete(inner: &mut StateInner, id: &str) -> Result<(), String> {
        if let Some(query) = inner.queries.remove(id) {
            inner.index += 1;
            if !query.name.is_empty() {
                inner.query_names.remove(&query.name);
            }
            tracing::debug!(query_id = %id, index = inner.index, "prepared query deleted");
        }
        Ok(())
    }

    fn service_known(inner: &StateInner, service: &str) -> bool {
        inner
            .services
            .values()
            .any(|regs| regs.values().any(|s| s.service == service))
    }

    // -- reads -------------------------------------------------------------

    /// Current store-wide replication index.
    pub fn index(&self) -> u64 {
        self.inner.read().index
    }

    pub fn query_get(&self, id: &str) -> (u64, Option<PreparedQuery>) {
        let inner = self.inner.read();
        (inner.index, inner.queries.get(id).cloned())
    }

    pub fn query_get_by_name(&self, name: &str) -> (u64, Option<PreparedQuery>) {
        let inner = self.inner.read();
        let query = inner
            .query_names
            .get(name)
            .and_then(|id| inner.queries.get(id))
            .cloned();
        (inner.index, query)
    }

    pub fn query_list(&self) -> (u64, Vec<PreparedQuery>) {
        let inner = self.inner.read();
        (inner.index, inner.queries.values().cloned().collect())
    }

    /// Whether any node currently registers the named service.
    pub fn service_registered(&self, service: &str) -> bool {
        Self::service_known(&self.inner.read(), service)
    }

    /// All instances of a service, each with the checks that apply to it
    /// (service-scoped plus node-level). Ordered by node name.
    pub fn service_nodes(&self, service: &str) -> (u64, Vec<ServiceNode>) {
        let inner = self.inner.read();
        let mut out = Vec::new();
        for (node_name, regs) in &inner.services {
            let Some(node) = inner.nodes.get(node_name) else {
                continue;
            };
            for reg in regs.values() {
                if reg.service != service {
                    continue;
                }
                let checks: Vec<HealthCheck> = inner
                    .checks
                    .get(node_name)
                    .map(|cs| {
                        cs.values()
                            .filter(|c| c.service_id.is_empty() || c.service_id == reg.id)
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                out.push(ServiceNode {
                    node: node.clone(),
                    service: reg.clone(),
                    checks,
                });
            }
        }
        (inner.index, out)
    }

    // -- snapshots ---------------------------------------------------------

    /// Full serialized state, including the current index.
    pub fn snapshot(&self) -> Vec<u8> {
        serde_json::to_vec(&*self.inner.read()).unwrap_or_default()
    }

    /// Replace the state wholesale from a snapshot.
    pub fn restore(&self, data: &[u8]) -> Result<(), String> {
        let restored: StateInner =
            serde_json::from_slice(data).map_err(|e| format!("decode snapshot: {}", e))?;
        *self.inner.write() = restored;
        Ok(())
    }
}
