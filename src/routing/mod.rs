//! Device-to-device routing
//!
//! Maintains a weighted graph of links between devices and answers
//! shortest-path queries with Dijkstra over the cost function
//! `latency_ms + 50 * (1 - quality)`. Links are logically undirected:
//! every insert writes both directions. A side index maps chunk hashes
//! to the devices currently holding them.

use parking_lot::RwLock;
use petgraph::algo::astar;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::crypto::ChunkHash;
use crate::DeviceId;

/// Cost penalty for a fully degraded link (quality 0)
pub const QUALITY_COST_WEIGHT: f32 = 50.0;

/// Directed edge between two devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub from: DeviceId,
    pub to: DeviceId,
    /// 0.0 - 1.0
    pub quality: f32,
    pub latency_ms: f32,
    pub bandwidth_mbps: f32,
}

impl Link {
    pub fn new(
        from: impl Into<DeviceId>,
        to: impl Into<DeviceId>,
        quality: f32,
        latency_ms: f32,
        bandwidth_mbps: f32,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            quality,
            latency_ms,
            bandwidth_mbps,
        }
    }

    /// Same attributes with swapped endpoints
    pub fn reversed(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
            ..self.clone()
        }
    }

    /// Edge cost for route discovery
    pub fn cost(&self) -> f32 {
        self.latency_ms + (1.0 - self.quality) * QUALITY_COST_WEIGHT
    }
}

/// Discovered path with aggregate metrics
///
/// An empty `path` means the destination is unreachable. For paths of
/// length <= 1 the metrics keep their defaults: zero latency, infinite
/// bandwidth, quality 1.0.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub path: Vec<DeviceId>,
    /// Sum of edge latencies
    pub total_latency_ms: f32,
    /// Minimum edge bandwidth along the path
    pub min_bandwidth_mbps: f32,
    /// Product of edge qualities
    pub quality_score: f32,
}

impl Default for Route {
    fn default() -> Self {
        Self {
            path: Vec::new(),
            total_latency_ms: 0.0,
            min_bandwidth_mbps: f32::INFINITY,
            quality_score: 1.0,
        }
    }
}

impl Route {
    /// Whether the destination was unreachable
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }
}

struct RouterInner {
    graph: DiGraph<DeviceId, Link>,
    indices: HashMap<DeviceId, NodeIndex>,
    chunk_locations: HashMap<ChunkHash, Vec<DeviceId>>,
}

/// Weighted device graph with chunk-location index
#[derive(Default)]
pub struct Router {
    inner: RwLock<RouterInner>,
}

impl Default for RouterInner {
    fn default() -> Self {
        Self {
            graph: DiGraph::new(),
            indices: HashMap::new(),
            chunk_locations: HashMap::new(),
        }
    }
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or refresh a link in both directions
    pub fn add_link(&self, link: Link) {
        let mut inner = self.inner.write();
        let u = intern(&mut inner, &link.from);
        let v = intern(&mut inner, &link.to);
        let reverse = link.reversed();
        inner.graph.update_edge(u, v, link);
        inner.graph.update_edge(v, u, reverse);
    }

    /// Update both directions' quality for an existing link
    pub fn update_link(&self, from: &str, to: &str, quality: f32) {
        let mut inner = self.inner.write();
        for (a, b) in [(from, to), (to, from)] {
            let (Some(&a), Some(&b)) = (inner.indices.get(a), inner.indices.get(b)) else {
                continue;
            };
            if let Some(edge) = inner.graph.find_edge(a, b) {
                inner.graph[edge].quality = quality;
            }
        }
    }

    /// Delete both directions of a link
    pub fn remove_link(&self, from: &str, to: &str) {
        let mut inner = self.inner.write();
        for (a, b) in [(from, to), (to, from)] {
            let (Some(&a), Some(&b)) = (inner.indices.get(a), inner.indices.get(b)) else {
                continue;
            };
            if let Some(edge) = inner.graph.find_edge(a, b) {
                inner.graph.remove_edge(edge);
            }
        }
    }

    /// Look up a directed link
    pub fn get_link(&self, from: &str, to: &str) -> Option<Link> {
        let inner = self.inner.read();
        let (&a, &b) = (inner.indices.get(from)?, inner.indices.get(to)?);
        let edge = inner.graph.find_edge(a, b)?;
        Some(inner.graph[edge].clone())
    }

    /// Devices directly linked to `device_id`
    pub fn get_neighbors(&self, device_id: &str) -> Vec<DeviceId> {
        let inner = self.inner.read();
        match inner.indices.get(device_id) {
            Some(&idx) => inner
                .graph
                .neighbors(idx)
                .map(|n| inner.graph[n].clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Minimum-cost path from `source` to `dest`
    ///
    /// Returns an empty route when either endpoint is unknown or no path
    /// exists.
    pub fn find_route(&self, source: &str, dest: &str) -> Route {
        let inner = self.inner.read();
        let (Some(&src), Some(&dst)) = (inner.indices.get(source), inner.indices.get(dest)) else {
            return Route::default();
        };

        let Some((_, node_path)) = astar(
            &inner.graph,
            src,
            |node| node == dst,
            |edge| edge.weight().cost(),
            |_| 0.0,
        ) else {
            debug!(source, dest, "No route found");
            return Route::default();
        };

        let mut route = Route {
            path: node_path.iter().map(|&n| inner.graph[n].clone()).collect(),
            ..Route::default()
        };

        for pair in node_path.windows(2) {
            if let Some(edge) = inner.graph.find_edge(pair[0], pair[1]) {
                let link = &inner.graph[edge];
                route.total_latency_ms += link.latency_ms;
                route.min_bandwidth_mbps = route.min_bandwidth_mbps.min(link.bandwidth_mbps);
                route.quality_score *= link.quality;
            }
        }

        route
    }

    /// Record which devices hold a chunk (idempotent overwrite)
    pub fn register_chunk_location(&self, chunk_hash: ChunkHash, device_ids: Vec<DeviceId>) {
        self.inner
            .write()
            .chunk_locations
            .insert(chunk_hash, device_ids);
    }

    /// Devices known to hold a chunk
    pub fn resolve_chunk_locations(&self, chunk_hash: &ChunkHash) -> Vec<DeviceId> {
        self.inner
            .read()
            .chunk_locations
            .get(chunk_hash)
            .cloned()
            .unwrap_or_default()
    }
}

fn intern(inner: &mut RouterInner, device_id: &str) -> NodeIndex {
    match inner.indices.get(device_id) {
        Some(&idx) => idx,
        None => {
            let idx = inner.graph.add_node(device_id.to_string());
            inner.indices.insert(device_id.to_string(), idx);
            idx
        }
    }
}
