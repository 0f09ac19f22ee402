//! The PreparedQuery RPC surface: Apply, Get, Lookup, List.
//!
//! Every handler forwards first (wrong datacenter → WAN member; writes and
//! consistent reads → local leader) and then serves from the local replicated
//! state. All ACL failures surface as `Permission denied`; validation happens
//! before any side effect.

use uuid::Uuid;

use beacon_catalog::state::StateTransaction;
use beacon_common::query::{
    DcSpecificRequest, IndexedPreparedQueries, PreparedQuery, PreparedQueryRequest,
    PreparedQuerySpecificRequest, QueryOp,
};
use beacon_common::{BeaconError, BeaconResult};

use crate::server::Server;
use crate::validate::parse_query;

impl Server {
    /// Apply a create, update, or delete. Returns the new ID on create and
    /// an empty string otherwise.
    pub async fn prepared_query_apply(&self, req: PreparedQueryRequest) -> BeaconResult<String> {
        if req.datacenter != self.config.datacenter {
            return self.members.member_for(&req.datacenter)?.apply(req).await;
        }
        if !self.consensus.is_leader() {
            return self.members.leader_for(&self.config.datacenter)?.apply(req).await;
        }

        let mut query = req.query;
        let principal = self.acl.resolve(&req.token);

        match req.op {
            QueryOp::Create => {
                if !query.id.is_empty() {
                    return Err(BeaconError::validation("ID must be empty when creating a new prepared query"));
                }
                parse_query(&query)?;
                self.check_query_name(&query)?;
                if !self.policy.allow_create(&principal, &query) {
                    return Err(BeaconError::PermissionDenied);
                }

                // Capture the writer's token as the owner, and assign the ID
                // just before the log append.
                query.token = req.token;
                query.id = self.new_query_id();
                let id = query.id.clone();
                tracing::info!(query_id = %id, service = %query.service.service, "creating prepared query");
                self.propose(StateTransaction::QuerySet(query)).await?;
                Ok(id)
            }

            QueryOp::Update | QueryOp::Delete => {
                let (_, existing) = self.state.query_get(&query.id);
                let Some(existing) = existing else {
                    return Err(BeaconError::validation(format!(
                        "Cannot modify non-existent prepared query: '{}'",
                        query.id
                    )));
                };
                if !self.policy.allow_modify(&principal, &req.token, &existing) {
                    return Err(BeaconError::PermissionDenied);
                }

                if req.op == QueryOp::Delete {
                    // Everything but the ID is ignored on delete.
                    tracing::info!(query_id = %query.id, "deleting prepared query");
                    self.propose(StateTransaction::QueryDelete(query.id)).await?;
                } else {
                    parse_query(&query)?;
                    self.check_query_name(&query)?;
                    query.token = req.token;
                    tracing::info!(query_id = %query.id, "updating prepared query");
                    self.propose(StateTransaction::QuerySet(query)).await?;
                }
                Ok(String::new())
            }

            QueryOp::Other(op) => Err(BeaconError::validation(format!(
                "Unknown prepared query operation: '{}'",
                op
            ))),
        }
    }

    /// Strict single-record fetch by ID. An empty result is an error.
    pub async fn prepared_query_get(
        &self,
        req: PreparedQuerySpecificRequest,
    ) -> BeaconResult<IndexedPreparedQueries> {
        if req.datacenter != self.config.datacenter {
            return self.members.member_for(&req.datacenter)?.get(req).await;
        }
        if req.options.require_consistent {
            if !self.consensus.is_leader() {
                return self.members.leader_for(&self.config.datacenter)?.get(req).await;
            }
            self.read_barrier().await?;
        }

        let (_, query) = self.state.query_get(&req.query_id_or_name);
        let query = query.ok_or(BeaconError::QueryNotFound)?;
        let principal = self.acl.resolve(&req.options.token);
        if !self.policy.allow_inspect(&principal, &req.options.token, &query) {
            return Err(BeaconError::PermissionDenied);
        }
        Ok(Self::indexed(vec![query], self.state.index()))
    }

    /// Fetch by ID or name. A miss yields an empty result, not an error.
    pub async fn prepared_query_lookup(
        &self,
        req: PreparedQuerySpecificRequest,
    ) -> BeaconResult<IndexedPreparedQueries> {
        if req.datacenter != self.config.datacenter {
            return self.members.member_for(&req.datacenter)?.lookup(req).await;
        }
        if req.options.require_consistent {
            if !self.consensus.is_leader() {
                return self.members.leader_for(&self.config.datacenter)?.lookup(req).await;
            }
            self.read_barrier().await?;
        }

        let (index, query) = self.resolve_query(&req.query_id_or_name);
        let Some(query) = query else {
            return Ok(Self::indexed(Vec::new(), index));
        };
        let principal = self.acl.resolve(&req.options.token);
        if !self.policy.allow_inspect(&principal, &req.options.token, &query) {
            return Err(BeaconError::PermissionDenied);
        }
        Ok(Self::indexed(vec![query], index))
    }

    /// List every query. Management-only: visibility over all owners is an
    /// administrative capability.
    pub async fn prepared_query_list(
        &self,
        req: DcSpecificRequest,
    ) -> BeaconResult<IndexedPreparedQueries> {
        if req.datacenter != self.config.datacenter {
            return self.members.member_for(&req.datacenter)?.list(req).await;
        }
        if req.options.require_consistent {
            if !self.consensus.is_leader() {
                return self.members.leader_for(&self.config.datacenter)?.list(req).await;
            }
            self.read_barrier().await?;
        }

        let principal = self.acl.resolve(&req.options.token);
        if !principal.is_management() {
            return Err(BeaconError::PermissionDenied);
        }
        let (index, queries) = self.state.query_list();
        Ok(Self::indexed(queries, index))
    }

    /// Names must stay disjoint from the ID space and unique across queries.
    fn check_query_name(&self, query: &PreparedQuery) -> BeaconResult<()> {
        if query.name.is_empty() {
            return Ok(());
        }
        if Uuid::parse_str(&query.name).is_ok() {
            return Err(BeaconError::validation(format!(
                "Query name '{}' cannot look like a UUID",
                query.name
            )));
        }
        let (_, holder) = self.state.query_get_by_name(&query.name);
        if let Some(holder) = holder {
            if holder.id != query.id {
                return Err(BeaconError::conflict(format!(
                    "query name '{}' is already in use",
                    query.name
                )));
            }
        }
        Ok(())
    }

    /// The response index is the max modify index among the returned queries,
    /// or the store's current index when the result is empty.
    fn indexed(queries: Vec<PreparedQuery>, store_index: u64) -> IndexedPreparedQueries {
        let index = queries
            .iter()
            .map(|q| q.modify_index)
            .max()
            .unwrap_or(store_index);
        IndexedPreparedQueries { index, queries }
    }
}
