//! Great-circle distance from incidents to their officers.

use std::collections::BTreeMap;

use geo::{Distance, Haversine, Point};
use ward_patrol_deployment_models::{
    ClusteredIncident, DistanceMetric, DistanceReport, OfficerCentroid,
};
use ward_patrol_incident_models::Coordinate;

use crate::ScoringError;

/// Haversine distance in meters.
#[must_use]
pub fn geodesic_distance(a: Coordinate, b: Coordinate) -> f64 {
    Haversine.distance(
        Point::new(a.longitude, a.latitude),
        Point::new(b.longitude, b.latitude),
    )
}

/// Mean and max great-circle distance from each incident to its centroid.
///
/// # Errors
///
/// * [`ScoringError::UnknownCluster`] if an incident's cluster id has no
///   centroid
pub fn geodesic_report(
    clustered: &[ClusteredIncident],
    centroids: &[OfficerCentroid],
) -> Result<DistanceReport, ScoringError> {
    let by_cluster: BTreeMap<usize, Coordinate> = centroids
        .iter()
        .map(|c| (c.cluster, c.coordinate))
        .collect();

    let distances = clustered
        .iter()
        .map(|incident| {
            by_cluster
                .get(&incident.cluster)
                .map(|centroid| geodesic_distance(incident.coordinate, *centroid))
                .ok_or_else(|| ScoringError::UnknownCluster {
                    incident: incident.incident_id.to_string(),
                    cluster: incident.cluster,
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DistanceReport::from_distances(
        DistanceMetric::Geodesic,
        &distances,
        0,
    ))
}

#[cfg(test)]
mod tests {
    use float_cmp::assert_approx_eq;
    use ward_patrol_incident_models::IncidentId;

    use super::*;

    fn clustered(id: &str, latitude: f64, longitude: f64, cluster: usize) -> ClusteredIncident {
        ClusteredIncident {
            incident_id: IncidentId::new(id),
            coordinate: Coordinate::new(latitude, longitude),
            cluster,
            street_distance_meters: None,
        }
    }

    #[test]
    fn identical_coordinates_report_zero() {
        let centroids = vec![OfficerCentroid {
            cluster: 0,
            coordinate: Coordinate::new(51.5074, -0.1278),
        }];
        let incidents = vec![
            clustered("a", 51.5074, -0.1278, 0),
            clustered("b", 51.5074, -0.1278, 0),
        ];

        let report = geodesic_report(&incidents, &centroids).unwrap();
        assert_eq!(report.mean_meters, Some(0.0));
        assert_eq!(report.max_meters, Some(0.0));
        assert_eq!(report.measured, 2);
    }

    #[test]
    fn one_degree_of_latitude_is_about_111_km() {
        let d = geodesic_distance(Coordinate::new(51.0, -0.1), Coordinate::new(52.0, -0.1));
        assert_approx_eq!(f64, d, 111_195.0, epsilon = 100.0);
    }

    #[test]
    fn mean_and_max_use_each_incidents_own_centroid() {
        let centroids = vec![
            OfficerCentroid {
                cluster: 0,
                coordinate: Coordinate::new(51.50, -0.10),
            },
            OfficerCentroid {
                cluster: 1,
                coordinate: Coordinate::new(51.60, -0.10),
            },
        ];
        let incidents = vec![
            clustered("a", 51.50, -0.10, 0),
            clustered("b", 51.60, -0.10, 1),
            clustered("c", 51.61, -0.10, 1),
        ];

        let report = geodesic_report(&incidents, &centroids).unwrap();
        let expected_max = geodesic_distance(
            Coordinate::new(51.61, -0.10),
            Coordinate::new(51.60, -0.10),
        );
        assert_approx_eq!(f64, report.max_meters.unwrap(), expected_max, epsilon = 0.001);
        assert_approx_eq!(f64, report.mean_meters.unwrap(), expected_max / 3.0, epsilon = 0.001);
    }

    #[test]
    fn unknown_cluster_is_an_error() {
        let centroids = vec![OfficerCentroid {
            cluster: 0,
            coordinate: Coordinate::new(51.5, -0.1),
        }];
        let incidents = vec![clustered("a", 51.5, -0.1, 3)];

        assert!(matches!(
            geodesic_report(&incidents, &centroids),
            Err(ScoringError::UnknownCluster { cluster: 3, .. })
        ));
    }
}
