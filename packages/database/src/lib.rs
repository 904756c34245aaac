#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incident storage for ward patrol.
//!
//! Incidents (already joined with ward codes and IMD deciles) and ward
//! boundaries live in a single `DuckDB` file. Consumers go through the
//! [`IncidentStore`] trait, which hands out owned per-ward snapshots so no
//! query state outlives a request.

pub mod boundary;
pub mod ids;
pub mod import;
pub mod paths;
pub mod store;

pub use ids::IncidentIdGenerator;
pub use import::{ImportSummary, import_incidents_csv, import_wards_csv};
pub use store::{DuckDbIncidentStore, IncidentStore, WardOption, WardRow, WardSnapshot};

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` query error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// A stored value could not be converted to its model type.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },

    /// A ward geometry could not be parsed.
    #[error("Geometry error: {message}")]
    Geometry {
        /// Description of what went wrong.
        message: String,
    },

    /// PROJ could not build the BNG to WGS84 transform.
    #[error("Projection setup error: {0}")]
    ProjCreate(#[from] proj::ProjCreateError),

    /// PROJ failed to convert a coordinate.
    #[error("Projection error: {0}")]
    Proj(#[from] proj::ProjError),

    /// Another thread panicked while holding the connection.
    #[error("Database connection lock poisoned")]
    LockPoisoned,
}
