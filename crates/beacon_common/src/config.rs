use serde::{Deserialize, Serialize};

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconConfig {
    /// Datacenter this server belongs to.
    pub datacenter: String,
    /// This server's node name.
    pub node_name: String,
    #[serde(default)]
    pub acl: AclConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            datacenter: "dc1".into(),
            node_name: "server1".into(),
            acl: AclConfig::default(),
            query: QueryConfig::default(),
        }
    }
}

/// Policy applied to tokens that resolve to no rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclDefaultPolicy {
    /// Unknown tokens are allowed everything (ACLs effectively off).
    #[default]
    Allow,
    /// Unknown tokens are denied everything.
    Deny,
}

/// ACL subsystem configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AclConfig {
    /// Authoritative datacenter for ACL data.
    #[serde(default)]
    pub datacenter: String,
    /// Bootstrap management token. Empty disables the bootstrap token.
    #[serde(default)]
    pub master_token: String,
    #[serde(default)]
    pub default_policy: AclDefaultPolicy,
}

/// Prepared-query subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Upper bound on the number of failover datacenters a single execution
    /// will attempt (nearest-N prefix plus the declared list, after dedup).
    #[serde(default = "default_max_failover_targets")]
    pub max_failover_targets: usize,
}

fn default_max_failover_targets() -> usize {
    8
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_failover_targets: default_max_failover_targets(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = BeaconConfig::default();
        assert_eq!(c.datacenter, "dc1");
        assert_eq!(c.acl.default_policy, AclDefaultPolicy::Allow);
        assert_eq!(c.query.max_failover_targets, 8);
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let c: BeaconConfig =
            serde_json::from_str(r#"{"datacenter":"dc2","node_name":"s9"}"#).unwrap();
        assert_eq!(c.datacenter, "dc2");
        assert_eq!(c.query.max_failover_targets, 8);
    }
}
