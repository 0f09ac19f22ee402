//! Query execution: resolve → filter → rank → limit → failover.
//!
//! The pipeline reads immutable snapshots only (the query record plus a
//! point-in-time catalog view), so it holds no locks. Ranking is either-or,
//! never a mix: a usable source coordinate means RTT sort, otherwise a
//! uniform shuffle. The ordering is deterministic given its inputs.
//!
//! Failover is a bounded sequence owned by the executor. The remote side
//! (`execute_remote`) runs the local stages only and never fails over itself,
//! so misconfigured datacenter rings cannot loop.

use beacon_catalog::CoordinateOracle;
use beacon_common::query::{
    PreparedQuery, PreparedQueryExecuteRemoteRequest, PreparedQueryExecuteRequest,
    PreparedQueryExecuteResponse, ServiceQuery,
};
use beacon_common::types::{CheckStatus, QueryOptions, ServiceNode};
use beacon_common::{BeaconError, BeaconResult, Entropy};

use crate::server::Server;

impl Server {
    /// Full execution: dispatch, resolve, local pipeline, failover.
    pub async fn prepared_query_execute(
        &self,
        req: PreparedQueryExecuteRequest,
    ) -> BeaconResult<PreparedQueryExecuteResponse> {
        if req.datacenter != self.config.datacenter {
            return self.members.member_for(&req.datacenter)?.execute(req).await;
        }
        if req.options.require_consistent {
            if !self.consensus.is_leader() {
                return self.members.leader_for(&self.config.datacenter)?.execute(req).await;
            }
            self.read_barrier().await?;
        }

        let (_, query) = self.resolve_query(&req.query_id_or_name);
        let Some(query) = query else {
            return Err(BeaconError::QueryNotFound);
        };

        // Authorization runs against the query's stored token: whoever owns
        // the query must (still) be able to read the service.
        let stored = self.acl.resolve(&query.token);
        if !self.policy.allow_execute(&stored, &query) {
            return Err(BeaconError::PermissionDenied);
        }

        let mut reply = PreparedQueryExecuteResponse {
            nodes: Vec::new(),
            datacenter: self.config.datacenter.clone(),
            failovers: 0,
            dns: query.dns.clone(),
        };
        self.run_local_stages(&query, req.limit, Some(&req.source), &mut reply);

        let failover = &query.service.failover;
        if reply.nodes.is_empty() && (failover.nearest_n > 0 || !failover.datacenters.is_empty()) {
            self.execute_failover(&query, req.limit, &req.options, &mut reply).await;
        }
        Ok(reply)
    }

    /// Remote leg of a failover: the query arrives inlined, the local stages
    /// run here, and the result goes back without further failover.
    pub async fn prepared_query_execute_remote(
        &self,
        req: PreparedQueryExecuteRemoteRequest,
    ) -> BeaconResult<PreparedQueryExecuteResponse> {
        if req.datacenter != self.config.datacenter {
            return self.members.member_for(&req.datacenter)?.execute_remote(req).await;
        }
        if req.options.require_consistent {
            if !self.consensus.is_leader() {
                return self
                    .members
                    .leader_for(&self.config.datacenter)?
                    .execute_remote(req)
                    .await;
            }
            self.read_barrier().await?;
        }

        let query = req.query;
        let stored = self.acl.resolve(&query.token);
        if !self.policy.allow_execute(&stored, &query) {
            return Err(BeaconError::PermissionDenied);
        }

        let mut reply = PreparedQueryExecuteResponse {
            nodes: Vec::new(),
            datacenter: self.config.datacenter.clone(),
            failovers: 0,
            dns: query.dns.clone(),
        };
        self.run_local_stages(&query, req.limit, None, &mut reply);
        Ok(reply)
    }

    /// Stages 3-6: candidate set, tag filter, rank, limit.
    fn run_local_stages(
        &self,
        query: &PreparedQuery,
        limit: usize,
        source: Option<&beacon_common::types::QuerySource>,
        reply: &mut PreparedQueryExecuteResponse,
    ) {
        let (_, mut nodes) = self.state.service_nodes(&query.service.service);
        filter_unhealthy(&mut nodes, query.service.only_passing);
        filter_by_tags(&mut nodes, &query.service);

        let source_node = source.map(|s| s.node.as_str()).unwrap_or("");
        if !source_node.is_empty() && self.coordinates.node_coordinate(source_node).is_some() {
            sort_by_rtt(self.coordinates.as_ref(), source_node, &mut nodes);
        } else {
            shuffle_nodes(self.entropy.as_ref(), &mut nodes);
        }

        if limit > 0 && nodes.len() > limit {
            nodes.truncate(limit);
        }
        reply.nodes = nodes;
    }

    /// Stage 7: walk the failover targets in order. Each failure counts and
    /// the walk continues; the first answer wins, even an empty one.
    async fn execute_failover(
        &self,
        query: &PreparedQuery,
        limit: usize,
        options: &QueryOptions,
        reply: &mut PreparedQueryExecuteResponse,
    ) {
        let targets = failover_targets(
            self.coordinates.as_ref(),
            &self.config.datacenter,
            &query.service,
            self.config.query.max_failover_targets,
        );

        let mut failovers = 0u32;
        for dc in targets {
            reply.datacenter = dc.clone();
            let remote = PreparedQueryExecuteRemoteRequest {
                datacenter: dc.clone(),
                query: query.clone(),
                limit,
                options: options.clone(),
            };
            let attempt = match self.members.member_for(&dc) {
                Ok(member) => member.execute_remote(remote).await,
                Err(e) => Err(e),
            };
            match attempt {
                Ok(resp) => {
                    reply.nodes = resp.nodes;
                    reply.failovers = failovers;
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        query_id = %query.id,
                        datacenter = %dc,
                        error = %e,
                        "failover attempt failed"
                    );
                    failovers += 1;
                }
            }
        }
        reply.failovers = failovers;
    }
}

/// Stage 3 half: drop instances whose aggregated health disqualifies them.
/// Critical is always out; warning is out only for only-passing queries.
pub(crate) fn filter_unhealthy(nodes: &mut Vec<ServiceNode>, only_passing: bool) {
    nodes.retain(|sn| match sn.aggregated_status() {
        CheckStatus::Passing => true,
        CheckStatus::Warning => !only_passing,
        CheckStatus::Critical => false,
    });
}

/// Stage 4: the required tags must be a subset of the instance's tags and no
/// excluded tag may appear. Case-insensitive on both sides.
pub(crate) fn filter_by_tags(nodes: &mut Vec<ServiceNode>, query: &ServiceQuery) {
    if query.tags.is_empty() {
        return;
    }
    let required: Vec<String> = query.required_tags().map(str::to_lowercase).collect();
    let excluded: Vec<String> = query.excluded_tags().map(str::to_lowercase).collect();
    nodes.retain(|sn| {
        let tags: Vec<String> = sn.service.tags.iter().map(|t| t.to_lowercase()).collect();
        required.iter().all(|t| tags.contains(t)) && !excluded.iter().any(|t| tags.contains(t))
    });
}

/// Stage 5, sort flavor: ascending by estimated RTT from the source node.
/// Instances without a usable coordinate keep their relative order at the
/// end; equal distances break by node name.
pub(crate) fn sort_by_rtt(oracle: &dyn CoordinateOracle, source: &str, nodes: &mut [ServiceNode]) {
    nodes.sort_by(|a, b| {
        let da = oracle.distance(source, &a.node.name);
        let db = oracle.distance(source, &b.node.name);
        match (da, db) {
            (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.node.name.cmp(&b.node.name)),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
    });
}

/// Stage 7 target list: up to `nearest_n` distinct nearest datacenters first,
/// then the declared list in order, skipping duplicates and the local
/// datacenter, bounded to `max` total.
pub(crate) fn failover_targets(
    oracle: &dyn CoordinateOracle,
    local_dc: &str,
    query: &ServiceQuery,
    max: usize,
) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    if query.failover.nearest_n > 0 {
        targets.extend(oracle.nearest_datacenters(local_dc, query.failover.nearest_n as usize));
    }
    for dc in &query.failover.datacenters {
        if dc != local_dc && !targets.contains(dc) {
            targets.push(dc.clone());
        }
    }
    targets.truncate(max);
    targets
}

/// Re-exported shuffle entry point so the stage is testable apart from a
/// full server.
pub(crate) fn shuffle_nodes(entropy: &Entropy, nodes: &mut [ServiceNode]) {
    entropy.shuffle(nodes);
}
