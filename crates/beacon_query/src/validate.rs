//! Syntactic validation of a prepared-query record.

use beacon_common::query::PreparedQuery;
use beacon_common::{BeaconError, BeaconResult};

/// Validate a query record before it is applied.
///
/// Pure over the record; called on every create and update, never on delete
/// (a delete reads only the ID). Semantic checks against live state, like
/// service existence and name uniqueness, belong to the applier and the FSM.
pub fn parse_query(query: &PreparedQuery) -> BeaconResult<()> {
    if query.service.service.is_empty() {
        return Err(BeaconError::validation("Must provide a service"));
    }

    let nearest_n = query.service.failover.nearest_n;
    if nearest_n < 0 {
        return Err(BeaconError::validation(format!(
            "Bad NearestN '{}', must be >= 0",
            nearest_n
        )));
    }

    let ttl = query.dns.ttl.as_str();
    if !ttl.is_empty() {
        // A leading sign parses fine so the negative case gets its own
        // message rather than a parse failure.
        let (negative, magnitude) = match ttl.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, ttl),
        };
        match humantime::parse_duration(magnitude.trim()) {
            Err(e) => {
                return Err(BeaconError::validation(format!(
                    "Bad DNS TTL '{}': {}",
                    ttl, e
                )));
            }
            Ok(_) if negative => {
                return Err(BeaconError::validation(format!(
                    "DNS TTL '{}', must be >=0",
                    ttl
                )));
            }
            Ok(_) => {}
        }
    }

    Ok(())
}
