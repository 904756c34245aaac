#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Deployment quality scoring.
//!
//! Two measures of how far incidents are from the officer assigned to them:
//! great-circle distance ([`geodesic_report`]) and shortest-path distance
//! over a road graph ([`street_report`]). The street measure tolerates
//! partial failure: incidents that cannot be routed are counted as excluded
//! instead of failing the batch.

pub mod geodesic;
pub mod progress;
pub mod road_graph;
pub mod street;

use thiserror::Error;

pub use geodesic::{geodesic_distance, geodesic_report};
pub use road_graph::{RoadEdge, RoadGraph, RoadNetwork, RoadNode};
pub use street::{StreetOptions, street_report};

/// Errors produced by the scorers and the road graph loader.
#[derive(Debug, Error)]
pub enum ScoringError {
    /// An incident's cluster id has no matching centroid.
    #[error("incident {incident} is assigned to unknown cluster {cluster}")]
    UnknownCluster {
        /// The incident.
        incident: String,
        /// Its cluster id.
        cluster: usize,
    },
    /// Reading the road graph file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The road graph JSON is malformed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// The road graph `MessagePack` is malformed.
    #[error(transparent)]
    MessagePack(#[from] rmp_serde::decode::Error),
    /// The road graph is structurally invalid.
    #[error("invalid road graph: {message}")]
    RoadGraph {
        /// What is wrong with it.
        message: String,
    },
}
