//! Road network used for street-distance scoring.
//!
//! The network is read once from disk ([`RoadGraph::load`]), turned into a
//! directed `petgraph` graph weighted by edge length in meters, and indexed
//! in an R-tree so arbitrary coordinates can be snapped to their nearest
//! node. A loaded graph is immutable and meant to be shared behind an
//! `Arc`.

use std::{
    collections::{BTreeMap, HashMap},
    fs::File,
    io::BufReader,
    path::Path,
};

use petgraph::{
    algo::dijkstra,
    graph::{DiGraph, NodeIndex},
};
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use serde::{Deserialize, Serialize};
use ward_patrol_incident_models::Coordinate;

use crate::{ScoringError, geodesic::geodesic_distance};

/// A road network node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoadNode {
    /// Source node id (e.g. the OSM id).
    pub id: u64,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

/// A road segment between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoadEdge {
    /// Id of the start node.
    pub from: u64,
    /// Id of the end node.
    pub to: u64,
    /// Segment length in meters.
    pub length_meters: f64,
    /// Whether the segment can only be driven from `from` to `to`.
    #[serde(default)]
    pub oneway: bool,
}

/// On-disk form of a road network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoadNetwork {
    /// All nodes.
    pub nodes: Vec<RoadNode>,
    /// All edges.
    pub edges: Vec<RoadEdge>,
}

/// Node position in the R-tree.
///
/// Longitude is scaled by the cosine of the network's mean latitude so that
/// squared distances are proportional to ground distance at city scale.
struct NodeEntry {
    position: [f64; 2],
    index: NodeIndex,
}

impl RTreeObject for NodeEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for NodeEntry {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        dx.mul_add(dx, dy * dy)
    }
}

/// A routable road network.
pub struct RoadGraph {
    graph: DiGraph<RoadNode, f64>,
    nodes: RTree<NodeEntry>,
    longitude_scale: f64,
}

impl std::fmt::Debug for RoadGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoadGraph")
            .field("nodes", &self.graph.node_count())
            .field("edges", &self.graph.edge_count())
            .finish_non_exhaustive()
    }
}

impl RoadGraph {
    /// Reads a network from `path`.
    ///
    /// `.msgpack` and `.mpk` files are decoded as `MessagePack`; anything
    /// else is parsed as JSON.
    ///
    /// # Errors
    ///
    /// * [`ScoringError::Io`] if the file cannot be opened
    /// * [`ScoringError::Json`] or [`ScoringError::MessagePack`] if it cannot
    ///   be decoded
    /// * [`ScoringError::RoadGraph`] if the network is inconsistent
    pub fn load(path: &Path) -> Result<Self, ScoringError> {
        let reader = BufReader::new(File::open(path)?);

        let is_msgpack = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("msgpack") || e.eq_ignore_ascii_case("mpk"));

        let network: RoadNetwork = if is_msgpack {
            rmp_serde::from_read(reader)?
        } else {
            serde_json::from_reader(reader)?
        };

        let graph = Self::from_network(&network)?;
        log::info!(
            "Loaded road graph from {}: {} nodes, {} edges",
            path.display(),
            graph.node_count(),
            graph.edge_count()
        );
        Ok(graph)
    }

    /// Builds the routable graph.
    ///
    /// Two-way edges become a pair of directed edges.
    ///
    /// # Errors
    ///
    /// * [`ScoringError::RoadGraph`] if a node id is duplicated, an edge
    ///   references a missing node, a coordinate is not finite, or an edge
    ///   length is negative or not finite
    pub fn from_network(network: &RoadNetwork) -> Result<Self, ScoringError> {
        let mut graph = DiGraph::with_capacity(network.nodes.len(), network.edges.len() * 2);
        let mut by_id: HashMap<u64, NodeIndex> = HashMap::with_capacity(network.nodes.len());

        for node in &network.nodes {
            if !(node.latitude.is_finite() && node.longitude.is_finite()) {
                return Err(ScoringError::RoadGraph {
                    message: format!("node {} has a non-finite coordinate", node.id),
                });
            }
            let index = graph.add_node(*node);
            if by_id.insert(node.id, index).is_some() {
                return Err(ScoringError::RoadGraph {
                    message: format!("duplicate node id {}", node.id),
                });
            }
        }

        for edge in &network.edges {
            if !(edge.length_meters.is_finite() && edge.length_meters >= 0.0) {
                return Err(ScoringError::RoadGraph {
                    message: format!(
                        "edge {} -> {} has invalid length {}",
                        edge.from, edge.to, edge.length_meters
                    ),
                });
            }
            let lookup = |id: u64| {
                by_id.get(&id).copied().ok_or_else(|| ScoringError::RoadGraph {
                    message: format!("edge references unknown node {id}"),
                })
            };
            let from = lookup(edge.from)?;
            let to = lookup(edge.to)?;

            graph.add_edge(from, to, edge.length_meters);
            if !edge.oneway {
                graph.add_edge(to, from, edge.length_meters);
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let mean_latitude = if network.nodes.is_empty() {
            0.0
        } else {
            network.nodes.iter().map(|n| n.latitude).sum::<f64>() / network.nodes.len() as f64
        };
        let longitude_scale = mean_latitude.to_radians().cos();

        let entries = graph
            .node_indices()
            .map(|index| {
                let node = graph[index];
                NodeEntry {
                    position: [node.longitude * longitude_scale, node.latitude],
                    index,
                }
            })
            .collect();

        Ok(Self {
            graph,
            nodes: RTree::bulk_load(entries),
            longitude_scale,
        })
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of directed edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// The node nearest to `coordinate`, unless it is farther than
    /// `max_snap_meters`.
    #[must_use]
    pub fn nearest_node(
        &self,
        coordinate: Coordinate,
        max_snap_meters: Option<f64>,
    ) -> Option<NodeIndex> {
        let query = [coordinate.longitude * self.longitude_scale, coordinate.latitude];
        let entry = self.nodes.nearest_neighbor(&query)?;

        if let Some(limit) = max_snap_meters {
            let node = self.graph[entry.index];
            let snapped = geodesic_distance(coordinate, Coordinate::new(node.latitude, node.longitude));
            if snapped > limit {
                log::debug!(
                    "Nearest road node {} is {snapped:.1} m from ({}, {}), beyond {limit} m",
                    node.id,
                    coordinate.latitude,
                    coordinate.longitude
                );
                return None;
            }
        }

        Some(entry.index)
    }

    /// The source node id of `index`.
    #[must_use]
    pub fn node_id(&self, index: NodeIndex) -> Option<u64> {
        self.graph.node_weight(index).map(|n| n.id)
    }

    /// Shortest-path lengths in meters from `source` to every reachable
    /// node.
    #[must_use]
    pub fn distances_from(&self, source: NodeIndex) -> BTreeMap<NodeIndex, f64> {
        dijkstra(&self.graph, source, None, |edge| *edge.weight())
            .into_iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use float_cmp::assert_approx_eq;

    use super::*;

    fn network() -> RoadNetwork {
        RoadNetwork {
            nodes: vec![
                RoadNode {
                    id: 1,
                    latitude: 51.5000,
                    longitude: -0.1000,
                },
                RoadNode {
                    id: 2,
                    latitude: 51.5045,
                    longitude: -0.1000,
                },
                RoadNode {
                    id: 3,
                    latitude: 51.5045,
                    longitude: -0.0900,
                },
            ],
            edges: vec![
                RoadEdge {
                    from: 1,
                    to: 2,
                    length_meters: 500.0,
                    oneway: false,
                },
                RoadEdge {
                    from: 2,
                    to: 3,
                    length_meters: 700.0,
                    oneway: true,
                },
            ],
        }
    }

    #[test]
    fn two_way_edges_are_doubled() {
        let graph = RoadGraph::from_network(&network()).unwrap();
        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 3);
    }

    #[test]
    fn oneway_edges_are_respected() {
        let graph = RoadGraph::from_network(&network()).unwrap();
        let a = graph.nearest_node(Coordinate::new(51.5, -0.1), None).unwrap();
        let c = graph.nearest_node(Coordinate::new(51.5045, -0.09), None).unwrap();

        let from_a = graph.distances_from(a);
        assert_approx_eq!(f64, from_a[&c], 1200.0);

        let from_c = graph.distances_from(c);
        assert!(!from_c.contains_key(&a));
    }

    #[test]
    fn snapping_honours_max_distance() {
        let graph = RoadGraph::from_network(&network()).unwrap();
        let far = Coordinate::new(51.52, -0.1);

        assert!(graph.nearest_node(far, None).is_some());
        assert!(graph.nearest_node(far, Some(100.0)).is_none());
        let near = graph.nearest_node(Coordinate::new(51.50001, -0.1), Some(100.0)).unwrap();
        assert_eq!(graph.node_id(near), Some(1));
    }

    #[test]
    fn rejects_dangling_edges_and_bad_lengths() {
        let mut dangling = network();
        dangling.edges[0].to = 99;
        assert!(matches!(
            RoadGraph::from_network(&dangling),
            Err(ScoringError::RoadGraph { .. })
        ));

        let mut negative = network();
        negative.edges[1].length_meters = -1.0;
        assert!(RoadGraph::from_network(&negative).is_err());
    }

    #[test]
    fn loads_json_and_msgpack_files() {
        let dir = tempfile::tempdir().unwrap();

        let json_path = dir.path().join("roads.json");
        std::fs::write(&json_path, serde_json::to_vec(&network()).unwrap()).unwrap();
        assert_eq!(RoadGraph::load(&json_path).unwrap().edge_count(), 3);

        let msgpack_path = dir.path().join("roads.msgpack");
        let mut file = File::create(&msgpack_path).unwrap();
        file.write_all(&rmp_serde::to_vec_named(&network()).unwrap())
            .unwrap();
        drop(file);
        assert_eq!(RoadGraph::load(&msgpack_path).unwrap().node_count(), 3);
    }

    #[test]
    fn oneway_defaults_to_false_in_json() {
        let json = r#"{"nodes":[{"id":1,"latitude":51.5,"longitude":-0.1},
            {"id":2,"latitude":51.6,"longitude":-0.1}],
            "edges":[{"from":1,"to":2,"length_meters":10.0}]}"#;
        let network: RoadNetwork = serde_json::from_str(json).unwrap();
        assert!(!network.edges[0].oneway);
        assert_eq!(RoadGraph::from_network(&network).unwrap().edge_count(), 2);
    }
}
