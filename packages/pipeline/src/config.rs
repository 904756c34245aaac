//! TOML configuration for a ward patrol run.
//!
//! ```toml
//! [data]
//! database = "data/ward_patrol.duckdb"
//! road_graph = "data/london_roads.msgpack"
//!
//! [forecast]
//! warmup = 10
//!
//! [allocation]
//! seed = 42
//!
//! [scoring]
//! max_snap_meters = 250.0
//! street_distance = true
//! ```
//!
//! Every key is optional; omitted keys take their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use ward_patrol_allocation::AllocationConfig;
use ward_patrol_forecast::ForecastConfig;
use ward_patrol_scoring::StreetOptions;

use crate::PipelineError;

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "WARD_PATROL_CONFIG";

/// Top-level configuration, passed explicitly to every stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct WardPatrolConfig {
    pub data: DataConfig,
    pub forecast: ForecastConfig,
    pub allocation: AllocationConfig,
    pub scoring: ScoringConfig,
}

/// Where inputs and outputs live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct DataConfig {
    /// `DuckDB` incident store.
    pub database: PathBuf,
    /// Serialized road network. Street distances are skipped without one.
    pub road_graph: Option<PathBuf>,
    /// Directory for exported CSV, JSON and `GeoJSON`.
    pub output_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            database: ward_patrol_database::paths::database_path(),
            road_graph: None,
            output_dir: ward_patrol_database::paths::generated_dir(),
        }
    }
}

/// Distance scoring settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ScoringConfig {
    /// Maximum distance when snapping a point to the road network.
    pub max_snap_meters: Option<f64>,
    /// Whether to compute street-network distances at all.
    pub street_distance: bool,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            max_snap_meters: None,
            street_distance: true,
        }
    }
}

impl ScoringConfig {
    #[must_use]
    pub const fn street_options(&self) -> StreetOptions {
        StreetOptions {
            max_snap_meters: self.max_snap_meters,
        }
    }
}

impl WardPatrolConfig {
    /// Parses a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ConfigParse`] if the document is malformed.
    pub fn from_toml_str(text: &str) -> Result<Self, PipelineError> {
        Ok(toml::from_str(text)?)
    }

    /// Loads the configuration from `path`, falling back to the file named
    /// by [`CONFIG_ENV`]. A file that does not exist yields the defaults.
    ///
    /// # Errors
    ///
    /// * [`PipelineError::Io`] if the file exists but cannot be read
    /// * [`PipelineError::ConfigParse`] if it is not valid TOML for this
    ///   schema
    pub fn load(path: Option<&Path>) -> Result<Self, PipelineError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()).map(PathBuf::from));

        let Some(path) = path else {
            log::debug!("No config file given, using defaults");
            return Ok(Self::default());
        };

        if !path.exists() {
            log::warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)?;
        let config = Self::from_toml_str(&text)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        let config = WardPatrolConfig::from_toml_str("").unwrap();
        assert_eq!(config.forecast.warmup, 10);
        assert_eq!(config.forecast.seasonal_period, 12);
        assert_eq!(config.allocation.seed, 42);
        assert_eq!(config.allocation.max_iterations, 100);
        assert!(config.scoring.street_distance);
        assert!(config.data.road_graph.is_none());
    }

    #[test]
    fn sections_override_individual_keys() {
        let config = WardPatrolConfig::from_toml_str(
            r#"
            [data]
            road_graph = "roads.msgpack"

            [forecast]
            warmup = 6

            [allocation]
            seed = 7

            [scoring]
            max_snap_meters = 150.0
            street_distance = false
            "#,
        )
        .unwrap();

        assert_eq!(config.data.road_graph, Some(PathBuf::from("roads.msgpack")));
        assert_eq!(config.forecast.warmup, 6);
        assert_eq!(config.forecast.seasonal_period, 12);
        assert_eq!(config.allocation.seed, 7);
        assert_eq!(config.scoring.street_options().max_snap_meters, Some(150.0));
        assert!(!config.scoring.street_distance);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(matches!(
            WardPatrolConfig::from_toml_str("[forecast]\nwarmup = \"ten\""),
            Err(PipelineError::ConfigParse(_))
        ));
    }

    #[test]
    fn missing_file_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = WardPatrolConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.allocation.seed, 42);
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ward_patrol.toml");
        std::fs::write(&path, "[allocation]\nmax_iterations = 5\n").unwrap();

        let config = WardPatrolConfig::load(Some(&path)).unwrap();
        assert_eq!(config.allocation.max_iterations, 5);
    }
}
