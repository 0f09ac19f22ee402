//! ACL resolution and the prepared-query ownership policy.
//!
//! Prepared queries use token capture instead of per-object ACL lists: the
//! non-management token that created (or last updated) a query is recorded on
//! the record as its owner, and every later decision compares against it.
//! All of those rules live in [`OwnershipPolicy`] so handlers stay free of
//! scattered token comparisons.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;

use beacon_common::config::AclDefaultPolicy;
use beacon_common::query::PreparedQuery;

/// The resolved authority of one token.
#[derive(Debug, Clone)]
pub struct Principal {
    management: bool,
    service_read: BTreeSet<String>,
}

impl Principal {
    /// Unconditional authority: the configured master token, any token of
    /// management type, or a server with ACLs disabled.
    pub fn management() -> Self {
        Self {
            management: true,
            service_read: BTreeSet::new(),
        }
    }

    pub fn deny_all() -> Self {
        Self {
            management: false,
            service_read: BTreeSet::new(),
        }
    }

    pub fn with_service_read(services: impl IntoIterator<Item = String>) -> Self {
        Self {
            management: false,
            service_read: services.into_iter().collect(),
        }
    }

    pub fn is_management(&self) -> bool {
        self.management
    }

    pub fn can_read_service(&self, service: &str) -> bool {
        self.management || self.service_read.contains(service)
    }
}

/// Resolves a presented token into its authority.
pub trait AclResolver: Send + Sync {
    fn resolve(&self, token: &str) -> Principal;
}

/// In-memory token store.
///
/// `disabled()` hands every token full authority, which is what a server
/// without ACLs configured behaves like.
pub struct InMemoryAcl {
    master_token: Option<String>,
    default_policy: AclDefaultPolicy,
    tokens: RwLock<BTreeMap<String, BTreeSet<String>>>,
    management_tokens: RwLock<BTreeSet<String>>,
}

impl InMemoryAcl {
    /// ACLs off: everything is allowed.
    pub fn disabled() -> Arc<Self> {
        Arc::new(Self {
            master_token: None,
            default_policy: AclDefaultPolicy::Allow,
            tokens: RwLock::new(BTreeMap::new()),
            management_tokens: RwLock::new(BTreeSet::new()),
        })
    }

    /// ACLs on with a bootstrap management token and a policy for tokens the
    /// store does not know.
    pub fn enabled(master_token: impl Into<String>, default_policy: AclDefaultPolicy) -> Arc<Self> {
        Arc::new(Self {
            master_token: Some(master_token.into()),
            default_policy,
            tokens: RwLock::new(BTreeMap::new()),
            management_tokens: RwLock::new(BTreeSet::new()),
        })
    }

    /// Install or replace a client token granting read on the listed services.
    pub fn set_token(&self, token: impl Into<String>, service_read: &[&str]) {
        self.tokens.write().insert(
            token.into(),
            service_read.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Install a token of management type; it has the same authority as the
    /// master token.
    pub fn set_management_token(&self, token: impl Into<String>) {
        self.management_tokens.write().insert(token.into());
    }
}

impl AclResolver for InMemoryAcl {
    fn resolve(&self, token: &str) -> Principal {
        let Some(master) = &self.master_token else {
            return Principal::management();
        };
        if token == master || self.management_tokens.read().contains(token) {
            return Principal::management();
        }
        if let Some(services) = self.tokens.read().get(token) {
            return Principal::with_service_read(services.iter().cloned());
        }
        match self.default_policy {
            AclDefaultPolicy::Allow => Principal::management(),
            AclDefaultPolicy::Deny => Principal::deny_all(),
        }
    }
}

/// Ownership rules for prepared queries.
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnershipPolicy;

impl OwnershipPolicy {
    /// Creating a query requires read on the target service. The presented
    /// token becomes the query's owner.
    pub fn allow_create(&self, principal: &Principal, query: &PreparedQuery) -> bool {
        principal.can_read_service(&query.service.service)
    }

    /// Updating or deleting requires the presented token to equal the stored
    /// owner token. Another token with service read is not sufficient, and an
    /// empty token never is. Management bypasses.
    pub fn allow_modify(&self, principal: &Principal, presented: &str, query: &PreparedQuery) -> bool {
        if principal.is_management() {
            return true;
        }
        !presented.is_empty() && presented == query.token
    }

    /// Reading a query record back is owner-or-management.
    pub fn allow_inspect(&self, principal: &Principal, presented: &str, query: &PreparedQuery) -> bool {
        self.allow_modify(principal, presented, query)
    }

    /// Executing authorizes through the query's *stored* token: the owner
    /// must (still) be able to read the service. The caller's own token is
    /// not consulted.
    pub fn allow_execute(&self, stored: &Principal, query: &PreparedQuery) -> bool {
        stored.can_read_service(&query.service.service)
    }
}

#[cfg(test)]
mod tests {
    use beacon_common::query::ServiceQuery;

    use super::*;

    fn query_owned_by(token: &str) -> PreparedQuery {
        PreparedQuery {
            token: token.into(),
            service: ServiceQuery {
                service: "redis".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_disabled_acls_allow_everything() {
        let acl = InMemoryAcl::disabled();
        let p = acl.resolve("");
        assert!(p.is_management());
        assert!(p.can_read_service("anything"));
    }

    #[test]
    fn test_master_token_is_management() {
        let acl = InMemoryAcl::enabled("root", AclDefaultPolicy::Deny);
        assert!(acl.resolve("root").is_management());
        assert!(!acl.resolve("other").is_management());
        assert!(!acl.resolve("").can_read_service("redis"));
    }

    #[test]
    fn test_client_token_scoped_to_services() {
        let acl = InMemoryAcl::enabled("root", AclDefaultPolicy::Deny);
        acl.set_token("t1", &["redis"]);
        let p = acl.resolve("t1");
        assert!(!p.is_management());
        assert!(p.can_read_service("redis"));
        assert!(!p.can_read_service("mongo"));
    }

    #[test]
    fn test_management_type_tokens_match_the_master() {
        let acl = InMemoryAcl::enabled("root", AclDefaultPolicy::Deny);
        acl.set_management_token("ops");
        assert!(acl.resolve("ops").is_management());
        assert!(!acl.resolve("dev").is_management());
    }

    #[test]
    fn test_default_allow_treats_unknown_tokens_as_management() {
        let acl = InMemoryAcl::enabled("root", AclDefaultPolicy::Allow);
        assert!(acl.resolve("whoever").is_management());
    }

    #[test]
    fn test_modify_requires_exact_owner_token() {
        let policy = OwnershipPolicy;
        let query = query_owned_by("t1");
        let client = Principal::with_service_read(["redis".to_string()]);

        assert!(policy.allow_modify(&client, "t1", &query));
        // Service read alone is not ownership.
        assert!(!policy.allow_modify(&client, "t2", &query));
        assert!(!policy.allow_modify(&client, "", &query));
        assert!(policy.allow_modify(&Principal::management(), "root", &query));
    }

    #[test]
    fn test_empty_owner_token_never_matches_empty_presented() {
        let policy = OwnershipPolicy;
        let query = query_owned_by("");
        assert!(!policy.allow_modify(&Principal::deny_all(), "", &query));
    }

    #[test]
    fn test_execute_follows_the_stored_token() {
        let policy = OwnershipPolicy;
        let query = query_owned_by("t1");
        assert!(policy.allow_execute(&Principal::with_service_read(["redis".to_string()]), &query));
        assert!(!policy.allow_execute(&Principal::deny_all(), &query));
        assert!(policy.allow_execute(&Principal::management(), &query));
    }
}
