//! Network coordinates and the distance oracle.
//!
//! Coordinates arrive from the membership layer's round-trip sampling; this
//! module only stores them and answers distance questions. Execution treats
//! it as a black box: `distance` ranks candidate instances relative to a
//! source node, `nearest_datacenters` orders failover targets.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// A Vivaldi-style network coordinate: a point in a low-dimensional metric
/// space plus a height term for the access-link cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub dims: Vec<f64>,
    pub height: f64,
}

impl Coordinate {
    /// Default 8-dimensional coordinate at the origin, matching what a node
    /// publishes before any RTT observations.
    pub fn origin() -> Self {
        Self {
            dims: vec![0.0; 8],
            height: 1.0e-5,
        }
    }

    pub fn with_dims(dims: Vec<f64>) -> Self {
        Self {
            dims,
            height: 1.0e-5,
        }
    }

    /// Estimated round-trip time to another coordinate.
    ///
    /// Coordinates of mismatched dimensionality are incomparable and yield
    /// `None`; callers treat that like a missing coordinate.
    pub fn rtt_to(&self, other: &Coordinate) -> Option<Duration> {
        if self.dims.len() != other.dims.len() {
            return None;
        }
        let sumsq: f64 = self
            .dims
            .iter()
            .zip(&other.dims)
            .map(|(a, b)| (a - b) * (a - b))
            .sum();
        let rtt = sumsq.sqrt() + self.height + other.height;
        Some(Duration::from_secs_f64(rtt))
    }
}

/// Black-box distance oracle consumed by the execution pipeline.
pub trait CoordinateOracle: Send + Sync {
    /// Estimated RTT between two nodes, when both have published coordinates.
    fn distance(&self, from: &str, to: &str) -> Option<Duration>;

    /// Up to `n` other datacenters ordered by estimated RTT from `from_dc`.
    /// Unknown datacenters are skipped; an unknown `from_dc` yields none.
    fn nearest_datacenters(&self, from_dc: &str, n: usize) -> Vec<String>;
}

/// In-memory coordinate store: LAN coordinates per node, WAN coordinates per
/// datacenter.
#[derive(Default)]
pub struct CoordinateStore {
    nodes: RwLock<BTreeMap<String, Coordinate>>,
    datacenters: RwLock<BTreeMap<String, Coordinate>>,
}

impl CoordinateStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn update_node(&self, node: impl Into<String>, coord: Coordinate) {
        self.nodes.write().insert(node.into(), coord);
    }

    pub fn update_datacenter(&self, dc: impl Into<String>, coord: Coordinate) {
        self.datacenters.write().insert(dc.into(), coord);
    }

    pub fn node_coordinate(&self, node: &str) -> Option<Coordinate> {
        self.nodes.read().get(node).cloned()
    }
}

impl CoordinateOracle for CoordinateStore {
    fn distance(&self, from: &str, to: &str) -> Option<Duration> {
        let nodes = self.nodes.read();
        let a = nodes.get(from)?;
        let b = nodes.get(to)?;
        a.rtt_to(b)
    }

    fn nearest_datacenters(&self, from_dc: &str, n: usize) -> Vec<String> {
        let dcs = self.datacenters.read();
        let Some(origin) = dcs.get(from_dc) else {
            return Vec::new();
        };
        let mut ranked: Vec<(Duration, &String)> = dcs
            .iter()
            .filter(|(dc, _)| dc.as_str() != from_dc)
            .filter_map(|(dc, coord)| origin.rtt_to(coord).map(|rtt| (rtt, dc)))
            .collect();
        ranked.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));
        ranked.into_iter().take(n).map(|(_, dc)| dc.clone()).collect()
    }
}
