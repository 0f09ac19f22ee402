//! Endpoint tests for Apply, Get, Lookup, and List, including ACL ownership
//! and leader forwarding.

mod common;

use beacon_common::query::{
    DcSpecificRequest, PreparedQuery, PreparedQueryRequest, PreparedQuerySpecificRequest, QueryOp,
    ServiceQuery,
};
use beacon_common::types::QueryOptions;
use common::{register_node, TestCluster};
use uuid::Uuid;

fn create_request(service: &str) -> PreparedQueryRequest {
    PreparedQueryRequest {
        datacenter: "dc1".into(),
        op: QueryOp::Create,
        query: PreparedQuery {
            service: ServiceQuery {
                service: service.into(),
                ..Default::default()
            },
            ..Default::default()
        },
        token: String::new(),
    }
}

fn lookup_request(id_or_name: &str, token: &str) -> PreparedQuerySpecificRequest {
    PreparedQuerySpecificRequest {
        datacenter: "dc1".into(),
        query_id_or_name: id_or_name.into(),
        options: QueryOptions {
            token: token.into(),
            require_consistent: false,
        },
    }
}

/// Fetch the single stored record and compare it, index-blind, against what
/// the caller submitted.
async fn assert_lookup_matches(
    server: &std::sync::Arc<beacon_query::Server>,
    id_or_name: &str,
    token: &str,
    expected: &PreparedQuery,
) {
    let resp = server
        .prepared_query_lookup(lookup_request(id_or_name, token))
        .await
        .unwrap();
    assert_eq!(resp.queries.len(), 1, "bad: {:?}", resp);
    let mut actual = resp.queries[0].clone();
    assert_eq!(resp.index, actual.modify_index, "bad index: {}", resp.index);
    actual.create_index = 0;
    actual.modify_index = 0;
    assert_eq!(&actual, expected);
}

#[tokio::test]
async fn test_apply_lifecycle() {
    let cluster = TestCluster::new();
    let s1 = cluster.add_server("dc1");
    register_node(&s1, "dc1", "foo", "127.0.0.1", "redis", 8000, &["master"]).await;

    let mut req = create_request("redis");

    // Setting an ID fails the create.
    req.query.id = "nope".into();
    let err = s1.prepared_query_apply(req.clone()).await.unwrap_err();
    assert!(err.to_string().contains("ID must be empty"), "bad: {}", err);

    // A modify against an ID that was never created fails.
    req.op = QueryOp::Update;
    req.query.id = Uuid::new_v4().to_string();
    let err = s1.prepared_query_apply(req.clone()).await.unwrap_err();
    assert!(
        err.to_string().contains("Cannot modify non-existent prepared query"),
        "bad: {}",
        err
    );

    // Create goes through parse_query.
    req.op = QueryOp::Create;
    req.query.id = String::new();
    req.query.service.failover.nearest_n = -1;
    let err = s1.prepared_query_apply(req.clone()).await.unwrap_err();
    assert!(err.to_string().contains("Bad NearestN"), "bad: {}", err);

    // An unknown service is refused by the FSM and propagates verbatim.
    req.query.service.failover.nearest_n = 0;
    req.query.service.service = "nope".into();
    let err = s1.prepared_query_apply(req.clone()).await.unwrap_err();
    assert!(err.to_string().contains("invalid service"), "bad: {}", err);

    // Fixed up, the apply goes through and returns the new ID.
    req.query.service.service = "redis".into();
    let id = s1.prepared_query_apply(req.clone()).await.unwrap();
    assert!(!id.is_empty());

    req.query.id = id.clone();
    assert_lookup_matches(&s1, &id, "", &req.query).await;

    // Updates work once the ID is known.
    req.op = QueryOp::Update;
    req.query.service.failover.nearest_n = 2;
    let reply = s1.prepared_query_apply(req.clone()).await.unwrap();
    assert!(reply.is_empty());
    assert_lookup_matches(&s1, &id, "", &req.query).await;

    // A bogus op fails.
    req.op = QueryOp::Other("nope".into());
    let err = s1.prepared_query_apply(req.clone()).await.unwrap_err();
    assert!(
        err.to_string().contains("Unknown prepared query operation:"),
        "bad: {}",
        err
    );

    // Updates go through parse_query too.
    req.op = QueryOp::Update;
    req.query.service.failover.nearest_n = -1;
    let err = s1.prepared_query_apply(req.clone()).await.unwrap_err();
    assert!(err.to_string().contains("Bad NearestN"), "bad: {}", err);

    // Delete only reads the ID; the bad field above is ignored.
    req.op = QueryOp::Delete;
    s1.prepared_query_apply(req.clone()).await.unwrap();

    let resp = s1.prepared_query_lookup(lookup_request(&id, "")).await.unwrap();
    assert!(resp.queries.is_empty(), "bad: {:?}", resp);
}

#[tokio::test]
async fn test_apply_acl_ownership() {
    let cluster = TestCluster::with_acls("root");
    let s1 = cluster.add_server("dc1");
    cluster.acl.set_token("token1", &["redis"]);
    cluster.acl.set_token("token2", &["redis"]);
    register_node(&s1, "dc1", "foo", "127.0.0.1", "redis", 8000, &["master"]).await;

    let mut req = create_request("redis");

    // No token, default deny.
    let err = s1.prepared_query_apply(req.clone()).await.unwrap_err();
    assert!(err.to_string().contains("Permission denied"), "bad: {}", err);

    // token1 has service read, so the create works and the token is captured
    // as the query's owner.
    req.token = "token1".into();
    let id = s1.prepared_query_apply(req.clone()).await.unwrap();
    req.query.id = id.clone();
    req.query.token = "token1".into();
    assert_lookup_matches(&s1, &id, "root", &req.query).await;

    // token2 also reads the service but does not own the query.
    req.op = QueryOp::Update;
    req.token = "token2".into();
    let err = s1.prepared_query_apply(req.clone()).await.unwrap_err();
    assert!(err.to_string().contains("Permission denied"), "bad: {}", err);

    // An empty token is never sufficient.
    req.token = String::new();
    let err = s1.prepared_query_apply(req.clone()).await.unwrap_err();
    assert!(err.to_string().contains("Permission denied"), "bad: {}", err);

    // The owner can update.
    req.token = "token1".into();
    s1.prepared_query_apply(req.clone()).await.unwrap();

    // Same story for delete.
    req.op = QueryOp::Delete;
    req.token = "token2".into();
    let err = s1.prepared_query_apply(req.clone()).await.unwrap_err();
    assert!(err.to_string().contains("Permission denied"), "bad: {}", err);
    req.token = String::new();
    let err = s1.prepared_query_apply(req.clone()).await.unwrap_err();
    assert!(err.to_string().contains("Permission denied"), "bad: {}", err);
    req.token = "token1".into();
    s1.prepared_query_apply(req.clone()).await.unwrap();

    let resp = s1.prepared_query_lookup(lookup_request(&id, "root")).await.unwrap();
    assert!(resp.queries.is_empty(), "bad: {:?}", resp);

    // Recreate, then let a management token update it regardless of owner.
    req.op = QueryOp::Create;
    req.query.id = String::new();
    req.query.token = String::new();
    req.token = "token1".into();
    let id = s1.prepared_query_apply(req.clone()).await.unwrap();
    req.query.id = id.clone();
    req.query.token = "token1".into();
    assert_lookup_matches(&s1, &id, "root", &req.query).await;

    req.op = QueryOp::Update;
    req.token = "root".into();
    s1.prepared_query_apply(req.clone()).await.unwrap();

    // That update rewrote the owner token to the management one.
    req.query.token = "root".into();
    assert_lookup_matches(&s1, &id, "root", &req.query).await;

    // And a management token can delete anything.
    req.op = QueryOp::Create;
    req.query.id = String::new();
    req.query.token = String::new();
    req.token = "token1".into();
    let id = s1.prepared_query_apply(req.clone()).await.unwrap();

    req.op = QueryOp::Delete;
    req.query.id = id.clone();
    req.token = "root".into();
    s1.prepared_query_apply(req.clone()).await.unwrap();
    let resp = s1.prepared_query_lookup(lookup_request(&id, "root")).await.unwrap();
    assert!(resp.queries.is_empty(), "bad: {:?}", resp);
}

#[tokio::test]
async fn test_apply_forwards_to_leader() {
    let cluster = TestCluster::new();
    let leader = cluster.add_server("dc1");
    let follower = cluster.add_follower(&leader);

    // Writes through the follower transparently reach the leader.
    register_node(&follower, "dc1", "foo", "127.0.0.1", "redis", 8000, &["master"]).await;

    let req = create_request("redis");
    let id = follower.prepared_query_apply(req).await.unwrap();
    assert!(!id.is_empty());

    // Both members observe the same replicated record.
    for server in [&leader, &follower] {
        let resp = server.prepared_query_lookup(lookup_request(&id, "")).await.unwrap();
        assert_eq!(resp.queries.len(), 1);
    }
}

#[tokio::test]
async fn test_name_rules() {
    let cluster = TestCluster::new();
    let s1 = cluster.add_server("dc1");
    register_node(&s1, "dc1", "foo", "127.0.0.1", "redis", 8000, &[]).await;

    // UUID-shaped names would collide with the ID lookup space.
    let mut req = create_request("redis");
    req.query.name = Uuid::new_v4().to_string();
    let err = s1.prepared_query_apply(req.clone()).await.unwrap_err();
    assert!(err.to_string().contains("cannot look like a UUID"), "bad: {}", err);

    req.query.name = "my-query".into();
    s1.prepared_query_apply(req.clone()).await.unwrap();

    // Names are unique across queries.
    let err = s1.prepared_query_apply(req.clone()).await.unwrap_err();
    assert!(err.to_string().contains("already in use"), "bad: {}", err);
}

#[tokio::test]
async fn test_lookup_visibility() {
    let cluster = TestCluster::with_acls("root");
    let s1 = cluster.add_server("dc1");
    cluster.acl.set_token("token1", &["redis"]);
    cluster.acl.set_token("token2", &["redis"]);
    register_node(&s1, "dc1", "foo", "127.0.0.1", "redis", 8000, &["master"]).await;

    let mut req = create_request("redis");
    req.query.name = "my-query".into();
    req.token = "token1".into();
    let id = s1.prepared_query_apply(req.clone()).await.unwrap();
    req.query.id = id.clone();
    req.query.token = "token1".into();

    // The owner sees the query.
    assert_lookup_matches(&s1, &id, "token1", &req.query).await;

    // A token with service read that is not the owner does not.
    let err = s1.prepared_query_lookup(lookup_request(&id, "token2")).await.unwrap_err();
    assert!(err.to_string().contains("Permission denied"), "bad: {}", err);

    // Nor does an empty token.
    let err = s1.prepared_query_lookup(lookup_request(&id, "")).await.unwrap_err();
    assert!(err.to_string().contains("Permission denied"), "bad: {}", err);

    // Management reads no matter what.
    assert_lookup_matches(&s1, &id, "root", &req.query).await;

    // Lookup works by name as well as by ID.
    assert_lookup_matches(&s1, "my-query", "token1", &req.query).await;

    // Unknown ID and unknown name are empty results, not errors.
    let resp = s1
        .prepared_query_lookup(lookup_request(&Uuid::new_v4().to_string(), "token1"))
        .await
        .unwrap();
    assert!(resp.queries.is_empty(), "bad: {:?}", resp);
    let resp = s1.prepared_query_lookup(lookup_request("nope", "token1")).await.unwrap();
    assert!(resp.queries.is_empty(), "bad: {:?}", resp);
}

#[tokio::test]
async fn test_get_is_strict() {
    let cluster = TestCluster::new();
    let s1 = cluster.add_server("dc1");
    register_node(&s1, "dc1", "foo", "127.0.0.1", "redis", 8000, &[]).await;

    let id = s1.prepared_query_apply(create_request("redis")).await.unwrap();

    let resp = s1.prepared_query_get(lookup_request(&id, "")).await.unwrap();
    assert_eq!(resp.queries.len(), 1);
    assert_eq!(resp.index, resp.queries[0].modify_index);

    // Unlike Lookup, a miss is an error.
    let err = s1
        .prepared_query_get(lookup_request(&Uuid::new_v4().to_string(), ""))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Query not found"), "bad: {}", err);
}

#[tokio::test]
async fn test_list_requires_management() {
    let cluster = TestCluster::with_acls("root");
    let s1 = cluster.add_server("dc1");
    cluster.acl.set_token("token1", &["redis"]);
    register_node(&s1, "dc1", "foo", "127.0.0.1", "redis", 8000, &["master"]).await;

    let list_req = |token: &str| DcSpecificRequest {
        datacenter: "dc1".into(),
        options: QueryOptions {
            token: token.into(),
            require_consistent: false,
        },
    };

    // Management with no queries yet: empty, not an error.
    let resp = s1.prepared_query_list(list_req("root")).await.unwrap();
    assert!(resp.queries.is_empty());

    let mut req = create_request("redis");
    req.query.name = "my-query".into();
    req.token = "token1".into();
    let id = s1.prepared_query_apply(req.clone()).await.unwrap();
    req.query.id = id.clone();
    req.query.token = "token1".into();

    // Owning a query is not enough to list; neither is an empty token.
    let err = s1.prepared_query_list(list_req("token1")).await.unwrap_err();
    assert!(err.to_string().contains("Permission denied"), "bad: {}", err);
    let err = s1.prepared_query_list(list_req("")).await.unwrap_err();
    assert!(err.to_string().contains("Permission denied"), "bad: {}", err);

    // Management sees everything.
    let resp = s1.prepared_query_list(list_req("root")).await.unwrap();
    assert_eq!(resp.queries.len(), 1);
    let mut actual = resp.queries[0].clone();
    assert_eq!(resp.index, actual.modify_index);
    actual.create_index = 0;
    actual.modify_index = 0;
    assert_eq!(actual, req.query);
}
