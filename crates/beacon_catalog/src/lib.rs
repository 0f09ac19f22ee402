//! Replicated state for the Beacon control plane.
//!
//! - `state`: the finite-state machine applied from the ordered log, holding
//!   the prepared-query store plus the minimal service catalog it validates
//!   against. Mutation happens only through `StateStore::apply`.
//! - `coordinate`: network-coordinate store and the distance oracle used to
//!   rank execution results and pick failover datacenters.

pub mod coordinate;
pub mod state;

pub use coordinate::{Coordinate, CoordinateOracle, CoordinateStore};
pub use state::{StateStore, StateTransaction};
