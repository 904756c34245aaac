#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Officer deployment types.
//!
//! These are the values that flow between the allocator, the distance
//! scorers, and whatever presents a deployment: the deprivation weight that
//! biases clustering, the officer centroids, the labeled incident sample,
//! and the distance summaries.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use ward_patrol_incident_models::{Coordinate, IncidentId};

/// Lowest decile accepted before the weight transform.
pub const MIN_DECILE: f64 = 0.1;
/// Highest decile accepted before the weight transform.
pub const MAX_DECILE: f64 = 9.9;

/// Clustering weight derived from an IMD deprivation decile.
///
/// Deciles run from 1 (most deprived) to 10 (least). The weight is
/// `10 - decile` after clamping the decile into `[0.1, 9.9]`, so more
/// deprived wards pull centroids harder and the weight never reaches 0 or 10.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct DeprivationWeight(f64);

impl DeprivationWeight {
    /// Derives the weight from a raw decile.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDecileError`] if `decile` is NaN or infinite.
    pub fn try_from_decile(decile: f64) -> Result<Self, InvalidDecileError> {
        if !decile.is_finite() {
            return Err(InvalidDecileError { decile });
        }
        // 10 - 9.9 lands just below 0.1 in binary
        Ok(Self((10.0 - Self::clamp_decile(decile)).clamp(MIN_DECILE, MAX_DECILE)))
    }

    /// Clamps a decile into `[0.1, 9.9]`, leaving interior values untouched.
    #[must_use]
    pub fn clamp_decile(decile: f64) -> f64 {
        decile.clamp(MIN_DECILE, MAX_DECILE)
    }

    /// The weight value, in `[0.1, 9.9]`.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for DeprivationWeight {
    type Error = InvalidDecileError;

    /// Interprets `value` as an already-transformed weight.
    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if value.is_finite() {
            Ok(Self(value.clamp(MIN_DECILE, MAX_DECILE)))
        } else {
            Err(InvalidDecileError { decile: value })
        }
    }
}

impl From<DeprivationWeight> for f64 {
    fn from(value: DeprivationWeight) -> Self {
        value.0
    }
}

/// Error returned for a non-finite decile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvalidDecileError {
    /// The rejected value.
    pub decile: f64,
}

impl std::fmt::Display for InvalidDecileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "deprivation decile must be finite, got {}", self.decile)
    }
}

impl std::error::Error for InvalidDecileError {}

/// Where one officer is stationed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OfficerCentroid {
    /// Cluster id in `0..n_officers`.
    pub cluster: usize,
    /// Position of the officer.
    pub coordinate: Coordinate,
}

/// An incident from the sample with its assigned officer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteredIncident {
    /// The sampled incident.
    pub incident_id: IncidentId,
    /// Where it happened.
    pub coordinate: Coordinate,
    /// Id of the officer centroid it is assigned to.
    pub cluster: usize,
    /// Street-network distance to the centroid in meters, once computed.
    pub street_distance_meters: Option<f64>,
}

/// Distance measure a [`DistanceReport`] summarizes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DistanceMetric {
    /// Great-circle distance.
    Geodesic,
    /// Shortest path over the road graph.
    Street,
}

/// Mean and maximum incident-to-officer distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistanceReport {
    /// Which distance was measured.
    pub metric: DistanceMetric,
    /// Mean distance in meters, rounded to 3 decimals.
    pub mean_meters: Option<f64>,
    /// Maximum distance in meters, rounded to 3 decimals.
    pub max_meters: Option<f64>,
    /// Incidents with a defined distance.
    pub measured: usize,
    /// Incidents skipped because no distance could be computed.
    pub excluded: usize,
}

impl DistanceReport {
    /// Summarizes `distances`; `excluded` counts the incidents left out.
    #[must_use]
    pub fn from_distances(metric: DistanceMetric, distances: &[f64], excluded: usize) -> Self {
        let measured = distances.len();
        let (mean_meters, max_meters) = if distances.is_empty() {
            (None, None)
        } else {
            #[allow(clippy::cast_precision_loss)]
            let mean = distances.iter().sum::<f64>() / measured as f64;
            let max = distances.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            (Some(round3(mean)), Some(round3(max)))
        };

        Self {
            metric,
            mean_meters,
            max_meters,
            measured,
            excluded,
        }
    }
}

/// Rounds to 3 decimal places.
#[must_use]
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use float_cmp::assert_approx_eq;

    use super::*;

    #[test]
    fn weight_clamps_extreme_deciles() {
        assert_approx_eq!(f64, DeprivationWeight::try_from_decile(0.0).unwrap().value(), 9.9);
        assert_approx_eq!(f64, DeprivationWeight::try_from_decile(10.0).unwrap().value(), 0.1);
        assert_approx_eq!(f64, DeprivationWeight::try_from_decile(-3.0).unwrap().value(), 9.9);
    }

    #[test]
    fn least_deprived_weight_stays_in_range_and_survives_serde() {
        let weight = DeprivationWeight::try_from_decile(9.95).unwrap();
        assert!(weight.value() >= MIN_DECILE, "weight = {}", weight.value());
        assert_approx_eq!(f64, weight.value(), MIN_DECILE, ulps = 0);

        let json = serde_json::to_string(&weight).unwrap();
        let back: DeprivationWeight = serde_json::from_str(&json).unwrap();
        assert_eq!(back, weight);
    }

    #[test]
    fn weight_passes_interior_deciles_through() {
        assert_approx_eq!(f64, DeprivationWeight::clamp_decile(4.25), 4.25);
        assert_approx_eq!(f64, DeprivationWeight::try_from_decile(4.25).unwrap().value(), 5.75);
        assert_approx_eq!(f64, DeprivationWeight::try_from_decile(1.0).unwrap().value(), 9.0);
    }

    #[test]
    fn weight_rejects_non_finite_decile() {
        assert!(DeprivationWeight::try_from_decile(f64::NAN).is_err());
        assert!(DeprivationWeight::try_from_decile(f64::INFINITY).is_err());
    }

    #[test]
    fn report_rounds_and_handles_empty() {
        let report = DistanceReport::from_distances(DistanceMetric::Street, &[1.0, 2.0, 2.0], 1);
        assert_approx_eq!(f64, report.mean_meters.unwrap(), 1.667);
        assert_approx_eq!(f64, report.max_meters.unwrap(), 2.0);
        assert_eq!(report.measured, 3);
        assert_eq!(report.excluded, 1);

        let empty = DistanceReport::from_distances(DistanceMetric::Geodesic, &[], 4);
        assert!(empty.mean_meters.is_none());
        assert!(empty.max_meters.is_none());
        assert_eq!(empty.excluded, 4);
    }

    #[test]
    fn metric_round_trips_through_strings() {
        assert_eq!(DistanceMetric::Street.to_string(), "street");
        assert_eq!("geodesic".parse::<DistanceMetric>().unwrap(), DistanceMetric::Geodesic);
    }
}
