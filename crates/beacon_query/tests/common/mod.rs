#![allow(dead_code)] // not every test binary uses every helper

//! In-process multi-datacenter harness for endpoint tests.
//!
//! Each datacenter gets a leader server with its own replicated state;
//! followers share the leader's state store, which is what a caught-up
//! replica looks like. All servers join one `MemberPool` so leader and
//! datacenter forwarding work exactly as in production wiring.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use beacon_catalog::{CoordinateStore, StateStore};
use beacon_common::config::{AclConfig, AclDefaultPolicy, BeaconConfig};
use beacon_common::types::{CheckStatus, HealthCheck, NodeService, RegisterRequest};
use beacon_common::Entropy;
use beacon_query::{InMemoryAcl, MemberPool, Server};
use beacon_raft::LocalConsensus;

pub struct TestCluster {
    pub pool: Arc<MemberPool>,
    pub acl: Arc<InMemoryAcl>,
    server_seq: AtomicUsize,
}

impl TestCluster {
    /// A cluster without ACLs: every token has full authority.
    pub fn new() -> Self {
        Self {
            pool: MemberPool::new(),
            acl: InMemoryAcl::disabled(),
            server_seq: AtomicUsize::new(1),
        }
    }

    /// A cluster with ACLs on: `master` is the management token and unknown
    /// tokens are denied.
    pub fn with_acls(master: &str) -> Self {
        Self {
            pool: MemberPool::new(),
            acl: InMemoryAcl::enabled(master, AclDefaultPolicy::Deny),
            server_seq: AtomicUsize::new(1),
        }
    }

    fn config(&self, dc: &str) -> BeaconConfig {
        let seq = self.server_seq.fetch_add(1, Ordering::SeqCst);
        BeaconConfig {
            datacenter: dc.to_string(),
            node_name: format!("{}-server{}", dc, seq),
            acl: AclConfig {
                datacenter: "dc1".into(),
                master_token: String::new(),
                default_policy: AclDefaultPolicy::Deny,
            },
            ..Default::default()
        }
    }

    /// Add a datacenter leader with a fresh state store.
    pub fn add_server(&self, dc: &str) -> Arc<Server> {
        let state = StateStore::new();
        let hooks = Server::fsm_hooks(&state);
        let consensus = LocalConsensus::new(hooks.apply.clone());
        let server = Server::new(
            self.config(dc),
            state,
            consensus,
            self.acl.clone(),
            CoordinateStore::new(),
            self.pool.clone(),
            Arc::new(Entropy::new()),
        );
        self.pool.join(server.clone());
        server
    }

    /// Add a non-leader member of the leader's datacenter, sharing its
    /// replicated state (a caught-up follower).
    pub fn add_follower(&self, leader: &Arc<Server>) -> Arc<Server> {
        let state = leader.state().clone();
        let hooks = Server::fsm_hooks(&state);
        let consensus = LocalConsensus::follower(hooks.apply.clone());
        let server = Server::new(
            self.config(&leader.config().datacenter),
            state,
            consensus,
            self.acl.clone(),
            leader.coordinates().clone(),
            self.pool.clone(),
            Arc::new(Entropy::new()),
        );
        self.pool.join(server.clone());
        server
    }
}

/// Register a node hosting a service, healthy (no checks).
pub async fn register_node(
    server: &Arc<Server>,
    dc: &str,
    node: &str,
    address: &str,
    service: &str,
    port: u16,
    tags: &[&str],
) {
    server
        .catalog_register(RegisterRequest {
            datacenter: dc.to_string(),
            node: node.to_string(),
            address: address.to_string(),
            service: Some(NodeService {
                id: String::new(),
                service: service.to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                port,
            }),
            check: None,
            token: String::new(),
        })
        .await
        .unwrap();
}

/// Re-register a node's `foo` service with a named check in the given state.
pub async fn set_health(server: &Arc<Server>, dc: &str, node: &str, status: CheckStatus) {
    server
        .catalog_register(RegisterRequest {
            datacenter: dc.to_string(),
            node: node.to_string(),
            address: "127.0.0.1".to_string(),
            service: Some(NodeService {
                id: String::new(),
                service: "foo".to_string(),
                tags: vec![dc.to_string(), "tag1".to_string()],
                port: 8000,
            }),
            check: Some(HealthCheck {
                name: "failing".to_string(),
                status,
                service_id: "foo".to_string(),
            }),
            token: String::new(),
        })
        .await
        .unwrap();
}
