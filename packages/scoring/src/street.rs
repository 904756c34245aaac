//! Street-network distance from incidents to their officers.
//!
//! Incidents and centroids are snapped to their nearest road node, then one
//! Dijkstra search per centroid gives the route length to every incident in
//! its cluster. Anything that cannot be snapped or routed is excluded from
//! the report and counted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ward_patrol_deployment_models::{
    ClusteredIncident, DistanceMetric, DistanceReport, OfficerCentroid,
};

use crate::{
    progress::{ScoringPhase, ScoringProgress},
    road_graph::RoadGraph,
};

/// Street scoring settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct StreetOptions {
    /// Points farther than this from every road node are not snapped.
    pub max_snap_meters: Option<f64>,
}

/// Route lengths from each incident's centroid to the incident.
///
/// Returns the incidents with `street_distance_meters` filled in where a
/// route exists, and the summary over those routes. Never fails: incidents
/// that cannot be routed are logged and counted in
/// [`DistanceReport::excluded`].
#[must_use]
pub fn street_report(
    clustered: &[ClusteredIncident],
    centroids: &[OfficerCentroid],
    graph: &RoadGraph,
    options: &StreetOptions,
    progress: &dyn ScoringProgress,
) -> (Vec<ClusteredIncident>, DistanceReport) {
    progress.started(clustered.len() as u64);
    progress.phase(ScoringPhase::Snapping);

    let centroid_nodes: BTreeMap<usize, _> = centroids
        .iter()
        .filter_map(|c| {
            let node = graph.nearest_node(c.coordinate, options.max_snap_meters);
            if node.is_none() {
                log::warn!("Officer {} could not be snapped to the road network", c.cluster);
            }
            node.map(|node| (c.cluster, node))
        })
        .collect();

    // cluster -> indices into `clustered`
    let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, incident) in clustered.iter().enumerate() {
        members.entry(incident.cluster).or_default().push(i);
    }

    let mut scored: Vec<ClusteredIncident> = clustered
        .iter()
        .cloned()
        .map(|mut c| {
            c.street_distance_meters = None;
            c
        })
        .collect();

    let mut distances = Vec::with_capacity(clustered.len());
    let mut excluded = 0usize;

    progress.phase(ScoringPhase::Routing);

    for (cluster, indices) in &members {
        let Some(&source) = centroid_nodes.get(cluster) else {
            log::warn!(
                "Skipping {} incidents of cluster {cluster}: officer is off the road network",
                indices.len()
            );
            excluded += indices.len();
            progress.scored(indices.len() as u64);
            continue;
        };

        let reachable = graph.distances_from(source);

        for &i in indices {
            let incident = &clustered[i];
            let distance = graph
                .nearest_node(incident.coordinate, options.max_snap_meters)
                .and_then(|target| reachable.get(&target).copied());

            if let Some(distance) = distance {
                scored[i].street_distance_meters = Some(distance);
                distances.push(distance);
            } else {
                log::warn!(
                    "No route from officer {cluster} to incident {}",
                    incident.incident_id
                );
                excluded += 1;
            }
            progress.scored(1);
        }
    }

    let report = DistanceReport::from_distances(DistanceMetric::Street, &distances, excluded);

    if excluded > 0 {
        log::warn!(
            "Street distance computed for {} incidents, {excluded} excluded",
            report.measured
        );
    }
    progress.finished(&report);

    (scored, report)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use float_cmp::assert_approx_eq;
    use ward_patrol_incident_models::{Coordinate, IncidentId};

    use super::*;
    use crate::{
        progress::NullProgress,
        road_graph::{RoadEdge, RoadNetwork, RoadNode},
    };

    #[derive(Debug, PartialEq)]
    enum Event {
        Started(u64),
        Phase(ScoringPhase),
        Scored(u64),
        Finished(usize, usize),
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Event>>);

    impl Recorder {
        fn push(&self, event: Event) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl ScoringProgress for Recorder {
        fn started(&self, incidents: u64) {
            self.push(Event::Started(incidents));
        }
        fn phase(&self, phase: ScoringPhase) {
            self.push(Event::Phase(phase));
        }
        fn scored(&self, incidents: u64) {
            self.push(Event::Scored(incidents));
        }
        fn finished(&self, report: &DistanceReport) {
            self.push(Event::Finished(report.measured, report.excluded));
        }
    }

    fn node(id: u64, latitude: f64, longitude: f64) -> RoadNode {
        RoadNode {
            id,
            latitude,
            longitude,
        }
    }

    fn incident(id: &str, coordinate: Coordinate, cluster: usize) -> ClusteredIncident {
        ClusteredIncident {
            incident_id: IncidentId::new(id),
            coordinate,
            cluster,
            street_distance_meters: None,
        }
    }

    fn single_edge_graph() -> RoadGraph {
        RoadGraph::from_network(&RoadNetwork {
            nodes: vec![node(1, 51.5, -0.1), node(2, 51.5045, -0.1)],
            edges: vec![RoadEdge {
                from: 1,
                to: 2,
                length_meters: 500.0,
                oneway: false,
            }],
        })
        .unwrap()
    }

    #[test]
    fn single_edge_reports_its_length() {
        let graph = single_edge_graph();
        let centroids = vec![OfficerCentroid {
            cluster: 0,
            coordinate: Coordinate::new(51.5, -0.1),
        }];
        let incidents = vec![incident("a", Coordinate::new(51.5045, -0.1), 0)];

        let (scored, report) = street_report(
            &incidents,
            &centroids,
            &graph,
            &StreetOptions::default(),
            &NullProgress,
        );

        assert_approx_eq!(f64, report.mean_meters.unwrap(), 500.0);
        assert_approx_eq!(f64, report.max_meters.unwrap(), 500.0);
        assert_eq!(report.excluded, 0);
        assert_eq!(scored[0].street_distance_meters, Some(500.0));
    }

    #[test]
    fn unreachable_incidents_are_excluded_not_fatal() {
        let graph = RoadGraph::from_network(&RoadNetwork {
            nodes: vec![
                node(1, 51.5, -0.1),
                node(2, 51.5045, -0.1),
                node(3, 51.6, -0.2),
            ],
            edges: vec![RoadEdge {
                from: 1,
                to: 2,
                length_meters: 500.0,
                oneway: false,
            }],
        })
        .unwrap();
        let centroids = vec![OfficerCentroid {
            cluster: 0,
            coordinate: Coordinate::new(51.5, -0.1),
        }];
        let incidents = vec![
            incident("a", Coordinate::new(51.5045, -0.1), 0),
            incident("b", Coordinate::new(51.6, -0.2), 0),
        ];

        let (scored, report) = street_report(
            &incidents,
            &centroids,
            &graph,
            &StreetOptions::default(),
            &NullProgress,
        );

        assert_eq!(report.measured, 1);
        assert_eq!(report.excluded, 1);
        assert_approx_eq!(f64, report.mean_meters.unwrap(), 500.0);
        assert!(scored[1].street_distance_meters.is_none());
    }

    #[test]
    fn unsnappable_points_are_excluded() {
        let graph = single_edge_graph();
        let centroids = vec![
            OfficerCentroid {
                cluster: 0,
                coordinate: Coordinate::new(51.5, -0.1),
            },
            OfficerCentroid {
                cluster: 1,
                coordinate: Coordinate::new(52.5, 1.0),
            },
        ];
        let incidents = vec![
            incident("a", Coordinate::new(51.9, -0.1), 0),
            incident("b", Coordinate::new(51.5045, -0.1), 1),
            incident("c", Coordinate::new(51.5, -0.1), 0),
        ];
        let options = StreetOptions {
            max_snap_meters: Some(250.0),
        };

        let (_, report) = street_report(&incidents, &centroids, &graph, &options, &NullProgress);

        assert_eq!(report.measured, 1);
        assert_eq!(report.excluded, 2);
        assert_eq!(report.mean_meters, Some(0.0));
    }

    #[test]
    fn empty_input_reports_nothing() {
        let graph = single_edge_graph();
        let (scored, report) =
            street_report(&[], &[], &graph, &StreetOptions::default(), &NullProgress);
        assert!(scored.is_empty());
        assert!(report.mean_meters.is_none());
        assert_eq!(report.measured + report.excluded, 0);
    }

    #[test]
    fn progress_counts_every_incident_once() {
        let graph = single_edge_graph();
        let centroids = vec![OfficerCentroid {
            cluster: 0,
            coordinate: Coordinate::new(51.5, -0.1),
        }];
        // cluster 1 has no officer, so both of its incidents are skipped at once
        let incidents = vec![
            incident("a", Coordinate::new(51.5045, -0.1), 0),
            incident("b", Coordinate::new(51.5, -0.1), 1),
            incident("c", Coordinate::new(51.5, -0.1), 1),
        ];
        let recorder = Recorder::default();

        let (_, report) = street_report(
            &incidents,
            &centroids,
            &graph,
            &StreetOptions::default(),
            &recorder,
        );

        let events = recorder.0.into_inner().unwrap();
        assert_eq!(
            events,
            vec![
                Event::Started(3),
                Event::Phase(ScoringPhase::Snapping),
                Event::Phase(ScoringPhase::Routing),
                Event::Scored(1),
                Event::Scored(2),
                Event::Finished(report.measured, report.excluded),
            ]
        );
        assert_eq!((report.measured, report.excluded), (1, 2));
    }
}
