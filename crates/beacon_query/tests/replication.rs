//! The endpoint on top of a real Raft cluster: every member's state machine
//! converges on the same prepared-query store, and FSM refusals surface to
//! the caller without wedging the log.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use beacon_catalog::{CoordinateStore, StateStore};
use beacon_common::config::BeaconConfig;
use beacon_common::query::{PreparedQuery, PreparedQueryRequest, QueryOp, ServiceQuery};
use beacon_common::Entropy;
use beacon_query::{InMemoryAcl, MemberPool, Server};
use beacon_raft::{RaftCluster, RaftConsensus};
use common::register_node;

#[tokio::test]
async fn test_apply_replicates_to_every_member() {
    let stores: BTreeMap<u64, Arc<StateStore>> =
        [1u64, 2, 3].into_iter().map(|id| (id, StateStore::new())).collect();

    let cluster = Arc::new(
        RaftCluster::bootstrap_with_fsms(vec![1, 2, 3], |member_id| {
            Server::fsm_hooks(&stores[&member_id])
        })
        .await
        .unwrap(),
    );
    let leader_id = cluster.wait_for_leader(Duration::from_secs(5)).await.unwrap();

    let pool = MemberPool::new();
    let server = Server::new(
        BeaconConfig::default(),
        stores[&leader_id].clone(),
        RaftConsensus::new(cluster.clone(), leader_id),
        InMemoryAcl::disabled(),
        CoordinateStore::new(),
        pool.clone(),
        Arc::new(Entropy::new()),
    );
    pool.join(server.clone());

    register_node(&server, "dc1", "foo", "127.0.0.1", "redis", 8000, &["master"]).await;

    // An FSM refusal comes back through the committed log without breaking
    // anything that follows.
    let mut req = PreparedQueryRequest {
        datacenter: "dc1".into(),
        op: QueryOp::Create,
        query: PreparedQuery {
            service: ServiceQuery {
                service: "nope".into(),
                ..Default::default()
            },
            ..Default::default()
        },
        token: String::new(),
    };
    let err = server.prepared_query_apply(req.clone()).await.unwrap_err();
    assert!(err.to_string().contains("invalid service"), "bad: {}", err);

    req.query.service.service = "redis".into();
    let id = server.prepared_query_apply(req).await.unwrap();

    // Let replication drain, then check every member's state machine.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let reference = stores[&leader_id].query_get(&id).1.unwrap();
    for (node_id, store) in &stores {
        let (_, query) = store.query_get(&id);
        let query = query.unwrap_or_else(|| panic!("node {} missing query", node_id));
        assert_eq!(query, reference, "node {} diverged", node_id);
        assert!(store.service_registered("redis"), "node {} missing catalog", node_id);
    }

    cluster.commit_noop().await.unwrap();
}
