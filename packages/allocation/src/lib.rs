#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Officer allocation by deprivation-weighted Lloyd iteration.
//!
//! A sample of historical incident locations is clustered into one cluster
//! per officer; each cluster centroid is where that officer is stationed.
//! Distances are Euclidean in (latitude, longitude) degree space, which is
//! adequate at ward scale.
//!
//! Every incident in a ward carries the same deprivation weight, so the
//! weighted centroid currently coincides with the plain mean. The weight is
//! still threaded through the update step so per-incident weights can be
//! introduced without changing the algorithm.

use rand::{Rng, SeedableRng, seq::index};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ward_patrol_deployment_models::{ClusteredIncident, DeprivationWeight, OfficerCentroid};
use ward_patrol_incident_models::{Coordinate, IncidentId, IncidentRecord};

/// Errors produced by [`allocate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocationError {
    /// No located incidents to cluster.
    #[error("no located incidents available for allocation")]
    DataUnavailable,
    /// The officer count cannot be satisfied by the sample.
    #[error("cannot allocate {officers} officers over {incidents} incidents")]
    DegenerateRequest {
        /// Requested officers.
        officers: usize,
        /// Located incidents in the sample.
        incidents: usize,
    },
}

/// Clustering settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct AllocationConfig {
    /// Seed for centroid initialization and re-seeding of empty clusters.
    pub seed: u64,
    /// Maximum Lloyd iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the total centroid movement (degrees).
    pub tolerance: f64,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            max_iterations: 100,
            tolerance: 1e-4,
        }
    }
}

/// Result of [`allocate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    /// One centroid per officer, ids `0..n_officers` in order.
    pub centroids: Vec<OfficerCentroid>,
    /// The located incidents of the sample, in sample order, with labels.
    pub clustered: Vec<ClusteredIncident>,
    /// Lloyd iterations run.
    pub iterations: usize,
    /// Whether the centroid movement fell below the tolerance.
    pub converged: bool,
}

impl Allocation {
    /// Number of incidents assigned to each cluster.
    #[must_use]
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.centroids.len()];
        for incident in &self.clustered {
            sizes[incident.cluster] += 1;
        }
        sizes
    }
}

/// Clusters `sample` into `n_officers` deployment points.
///
/// Incidents without a usable coordinate are ignored. Identical inputs and
/// seed always give an identical result.
///
/// `weight` is a single per-ward value applied to every incident, so the
/// weighted centroid update reduces to the plain member mean. Per-incident
/// weights are not supported.
///
/// # Errors
///
/// * [`AllocationError::DataUnavailable`] if no incident is located
/// * [`AllocationError::DegenerateRequest`] if `n_officers` is 0 or exceeds
///   the number of located incidents
pub fn allocate(
    sample: &[IncidentRecord],
    weight: DeprivationWeight,
    n_officers: usize,
    config: &AllocationConfig,
) -> Result<Allocation, AllocationError> {
    let located: Vec<(&IncidentId, Coordinate)> = sample
        .iter()
        .filter(|r| r.is_located())
        .filter_map(|r| r.coordinate.map(|c| (&r.id, c)))
        .collect();

    if located.is_empty() {
        return Err(AllocationError::DataUnavailable);
    }
    if n_officers == 0 || n_officers > located.len() {
        return Err(AllocationError::DegenerateRequest {
            officers: n_officers,
            incidents: located.len(),
        });
    }

    let points: Vec<Coordinate> = located.iter().map(|(_, c)| *c).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

    let mut centroids: Vec<Coordinate> = (0..n_officers)
        .map(|_| points[rng.gen_range(0..points.len())])
        .collect();

    let mut iterations = 0;
    let mut converged = false;

    while iterations < config.max_iterations {
        iterations += 1;

        let labels = assign(&points, &centroids);
        let next = update(&points, &labels, &centroids, weight, &mut rng);

        let shift = centroids
            .iter()
            .zip(&next)
            .map(|(a, b)| a.squared_degree_distance(*b))
            .sum::<f64>()
            .sqrt();
        centroids = next;

        log::trace!("Lloyd iteration {iterations}: centroid shift {shift:.3e}");
        if shift < config.tolerance {
            converged = true;
            break;
        }
    }

    if !converged {
        log::debug!(
            "Clustering stopped after {iterations} iterations without reaching tolerance {}",
            config.tolerance
        );
    }

    let mut labels = assign(&points, &centroids);
    repair_empty_clusters(&points, &mut labels, &mut centroids);

    log::info!(
        "Allocated {n_officers} officers over {} incidents in {iterations} iterations",
        points.len()
    );

    Ok(Allocation {
        centroids: centroids
            .into_iter()
            .enumerate()
            .map(|(cluster, coordinate)| OfficerCentroid {
                cluster,
                coordinate,
            })
            .collect(),
        clustered: located
            .into_iter()
            .zip(labels)
            .map(|((id, coordinate), cluster)| ClusteredIncident {
                incident_id: id.clone(),
                coordinate,
                cluster,
                street_distance_meters: None,
            })
            .collect(),
        iterations,
        converged,
    })
}

/// Nearest centroid for each point; ties go to the lowest id.
fn assign(points: &[Coordinate], centroids: &[Coordinate]) -> Vec<usize> {
    points
        .iter()
        .map(|p| {
            let mut best = 0;
            let mut best_distance = f64::INFINITY;
            for (i, c) in centroids.iter().enumerate() {
                let distance = p.squared_degree_distance(*c);
                if distance < best_distance {
                    best = i;
                    best_distance = distance;
                }
            }
            best
        })
        .collect()
}

/// Weighted mean of each cluster's members; empty clusters are re-seeded at
/// a random point.
fn update(
    points: &[Coordinate],
    labels: &[usize],
    centroids: &[Coordinate],
    weight: DeprivationWeight,
    rng: &mut ChaCha8Rng,
) -> Vec<Coordinate> {
    let w = weight.value();
    // (sum w * lat, sum w * lon, sum w)
    let mut sums = vec![(0.0, 0.0, 0.0); centroids.len()];
    for (point, &label) in points.iter().zip(labels) {
        let entry = &mut sums[label];
        entry.0 = w.mul_add(point.latitude, entry.0);
        entry.1 = w.mul_add(point.longitude, entry.1);
        entry.2 += w;
    }

    sums.into_iter()
        .map(|(lat, lon, total)| {
            if total > 0.0 {
                Coordinate::new(lat / total, lon / total)
            } else {
                points[rng.gen_range(0..points.len())]
            }
        })
        .collect()
}

/// Gives every empty cluster a member by taking, from clusters with at
/// least two members, the member farthest from its own centroid.
fn repair_empty_clusters(
    points: &[Coordinate],
    labels: &mut [usize],
    centroids: &mut [Coordinate],
) {
    let mut sizes = vec![0usize; centroids.len()];
    for &label in labels.iter() {
        sizes[label] += 1;
    }

    for empty in 0..centroids.len() {
        if sizes[empty] > 0 {
            continue;
        }

        let mut donor: Option<(usize, f64)> = None;
        for (i, point) in points.iter().enumerate() {
            let label = labels[i];
            if sizes[label] < 2 {
                continue;
            }
            let distance = point.squared_degree_distance(centroids[label]);
            if donor.is_none_or(|(_, best)| distance > best) {
                donor = Some((i, distance));
            }
        }

        let Some((index, _)) = donor else {
            log::warn!("No cluster can donate a member to empty cluster {empty}");
            continue;
        };

        log::debug!("Re-seeding empty cluster {empty} at incident {index}");
        sizes[labels[index]] -= 1;
        sizes[empty] += 1;
        labels[index] = empty;
        centroids[empty] = points[index];
    }
}

/// Draws up to `target` located incidents without replacement.
///
/// Returns every located incident when there are no more than `target`.
/// The result keeps the input order and is deterministic for a given seed.
#[must_use]
pub fn sample_incidents(records: &[IncidentRecord], target: usize, seed: u64) -> Vec<IncidentRecord> {
    let located: Vec<&IncidentRecord> = records.iter().filter(|r| r.is_located()).collect();

    if located.len() <= target {
        return located.into_iter().cloned().collect();
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut picked = index::sample(&mut rng, located.len(), target).into_vec();
    picked.sort_unstable();

    picked.into_iter().map(|i| located[i].clone()).collect()
}
