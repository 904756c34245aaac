#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Forecast-to-deployment pipeline for one ward.
//!
//! A request names a ward and an officer count. The ward's incidents are
//! forecast for next month, that many incidents are sampled from history,
//! clustered into one deployment point per officer, and the deployment is
//! scored by great-circle distance. Street-network scoring is started
//! separately in the background (see [`street_board`]).
//!
//! Stage failures do not fail the request: each section of the
//! [`WardReport`] is either available or carries the reason it is not.

pub mod config;
pub mod export;
pub mod street_board;

use std::sync::Arc;

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ward_patrol_allocation::{Allocation, AllocationError, allocate, sample_incidents};
use ward_patrol_database::{DbError, DuckDbIncidentStore, IncidentStore, WardOption};
use ward_patrol_deployment_models::{DeprivationWeight, DistanceReport};
use ward_patrol_forecast::{ForecastError, forecast_incidents};
use ward_patrol_forecast_models::ForecastResult;
use ward_patrol_scoring::{RoadGraph, ScoringError, geodesic_report, progress::ScoringProgress};

pub use config::WardPatrolConfig;
pub use street_board::{
    PendingStreetReport, StreetDistanceBoard, StreetOutcome, StreetTicket, spawn_street_report,
};

/// Errors that abort a pipeline operation.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Incident store failure.
    #[error(transparent)]
    Db(#[from] DbError),
    /// Forecasting failure, when surfaced directly.
    #[error(transparent)]
    Forecast(#[from] ForecastError),
    /// Allocation failure, when surfaced directly.
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    /// Scoring or road graph failure.
    #[error(transparent)]
    Scoring(#[from] ScoringError),
    /// The config file is not valid TOML for the schema.
    #[error("invalid configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),
    /// Filesystem error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// CSV export error.
    #[error(transparent)]
    Csv(#[from] csv::Error),
    /// JSON export error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Background work was requested outside a tokio runtime.
    #[error("street distances must be started from within a tokio runtime")]
    NoRuntime,
    /// The background street computation ended without a result.
    #[error("street distance computation for {ward_code} (generation {generation}) died")]
    StreetTask {
        /// Ward of the lost request.
        ward_code: String,
        /// Generation of the lost request.
        generation: u64,
    },
}

/// One part of a report: either computed, or the reason it could not be.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Section<T> {
    Available(T),
    Unavailable { reason: String },
}

impl<T> Section<T> {
    fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn available(&self) -> Option<&T> {
        match self {
            Self::Available(value) => Some(value),
            Self::Unavailable { .. } => None,
        }
    }

    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    /// Why the section is missing, if it is.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Available(_) => None,
            Self::Unavailable { reason } => Some(reason.as_str()),
        }
    }
}

/// What to compute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub ward_code: String,
    pub officers: usize,
}

/// Officer placement for the forecast month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Weight derived from the last month's deprivation decile.
    pub weight: DeprivationWeight,
    /// Incidents drawn from history (the rounded forecast).
    pub sample_target: usize,
    pub requested_officers: usize,
    /// Officers actually placed; lower than requested when the sample is
    /// smaller.
    pub officers: usize,
    pub allocation: Allocation,
    pub geodesic: DistanceReport,
    /// Filled in by [`WardReport::apply_street_outcome`].
    pub street: Option<DistanceReport>,
    /// Ticket of the street run started for this deployment, if any.
    #[serde(skip)]
    pub street_ticket: Option<StreetTicket>,
}

/// Everything computed for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct WardReport {
    pub ward_code: String,
    pub ward_name: Option<String>,
    /// Ward polygon in WGS84, when the store has one.
    pub boundary: Option<MultiPolygon<f64>>,
    pub forecast: Section<ForecastResult>,
    pub deployment: Section<Deployment>,
}

impl WardReport {
    /// Merges a finished street-distance run into the deployment.
    ///
    /// Returns `false` (and changes nothing) unless the outcome carries the
    /// ticket of the run last started for this report's deployment.
    pub fn apply_street_outcome(&mut self, outcome: &StreetOutcome) -> bool {
        if outcome.ticket.ward_code != self.ward_code {
            return false;
        }
        let Section::Available(deployment) = &mut self.deployment else {
            return false;
        };
        if deployment.street_ticket.as_ref() != Some(&outcome.ticket) {
            log::debug!(
                "Ignoring street distances for {} from generation {}",
                outcome.ticket.ward_code,
                outcome.ticket.generation
            );
            return false;
        }
        deployment.allocation.clustered.clone_from(&outcome.clustered);
        deployment.street = Some(outcome.report);
        true
    }
}

/// The configured pipeline: store, settings, optional road graph, and the
/// board collecting street-distance results.
pub struct Pipeline {
    store: Arc<dyn IncidentStore>,
    config: WardPatrolConfig,
    road_graph: Option<Arc<RoadGraph>>,
    board: Arc<StreetDistanceBoard>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("road_graph", &self.road_graph)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new(store: Arc<dyn IncidentStore>, config: WardPatrolConfig) -> Self {
        Self {
            store,
            config,
            road_graph: None,
            board: Arc::new(StreetDistanceBoard::new()),
        }
    }

    /// Opens the configured store and, when street distances are enabled,
    /// loads the configured road graph.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the store cannot be opened or the road
    /// graph cannot be loaded.
    pub fn open(config: WardPatrolConfig) -> Result<Self, PipelineError> {
        let store = DuckDbIncidentStore::open(&config.data.database)?;
        let road_graph = match (&config.data.road_graph, config.scoring.street_distance) {
            (Some(path), true) => Some(Arc::new(RoadGraph::load(path)?)),
            (None, true) => {
                log::warn!("No road graph configured; street distances are disabled");
                None
            }
            (_, false) => None,
        };

        Ok(Self {
            road_graph,
            ..Self::new(Arc::new(store), config)
        })
    }

    #[must_use]
    pub fn with_road_graph(mut self, graph: Arc<RoadGraph>) -> Self {
        self.road_graph = Some(graph);
        self
    }

    #[must_use]
    pub const fn config(&self) -> &WardPatrolConfig {
        &self.config
    }

    #[must_use]
    pub const fn board(&self) -> &Arc<StreetDistanceBoard> {
        &self.board
    }

    /// Whether [`Pipeline::start_street_distance`] can do anything.
    #[must_use]
    pub const fn street_distance_enabled(&self) -> bool {
        self.config.scoring.street_distance && self.road_graph.is_some()
    }

    /// Wards available for selection.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Db`] if the store query fails.
    pub fn ward_options(&self) -> Result<Vec<WardOption>, PipelineError> {
        Ok(self.store.ward_options()?)
    }

    /// Forecasts, allocates, and scores one ward.
    ///
    /// # Errors
    ///
    /// * [`PipelineError::Allocation`] if `request.officers` is zero
    /// * [`PipelineError::Db`] if the store cannot be read
    ///
    /// Forecast and allocation failures are reported inside the
    /// [`WardReport`] instead.
    pub fn run(&self, request: &DeploymentRequest) -> Result<WardReport, PipelineError> {
        if request.officers == 0 {
            return Err(AllocationError::DegenerateRequest {
                officers: 0,
                incidents: 0,
            }
            .into());
        }

        let started = std::time::Instant::now();
        let snapshot = self.store.ward_snapshot(&request.ward_code)?;
        let boundary = match self.store.ward_boundary(&request.ward_code) {
            Ok(boundary) => boundary,
            Err(e) => {
                log::warn!("Ward {} boundary unavailable: {e}", request.ward_code);
                None
            }
        };

        let forecast = self.forecast_section(&request.ward_code, &snapshot.incidents);

        let deployment = match forecast.available() {
            Some(result) => self.deploy(&snapshot.incidents, result, request.officers),
            None => Section::unavailable("No forecast to deploy against"),
        };

        log::info!(
            "Ward {} report ready in {:.2}s",
            request.ward_code,
            started.elapsed().as_secs_f64()
        );

        Ok(WardReport {
            ward_code: snapshot.ward_code,
            ward_name: snapshot.ward_name,
            boundary,
            forecast,
            deployment,
        })
    }

    /// Forecasts next month for one ward without allocating officers.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Db`] if the store cannot be read. A ward
    /// that cannot be forecast yields [`Section::Unavailable`].
    pub fn forecast(&self, ward_code: &str) -> Result<Section<ForecastResult>, PipelineError> {
        let snapshot = self.store.ward_snapshot(ward_code)?;
        Ok(self.forecast_section(ward_code, &snapshot.incidents))
    }

    fn forecast_section(
        &self,
        ward_code: &str,
        incidents: &[ward_patrol_incident_models::IncidentRecord],
    ) -> Section<ForecastResult> {
        match forecast_incidents(incidents, &self.config.forecast) {
            Ok(result) => {
                log::info!(
                    "Ward {ward_code}: next month ({}) forecast {:.2}, MAE {}",
                    result.next_month,
                    result.next_month_forecast,
                    result
                        .mean_absolute_error
                        .map_or_else(|| "n/a".to_string(), |mae| format!("{mae:.3}"))
                );
                Section::Available(result)
            }
            Err(e) => {
                log::warn!("Ward {ward_code}: forecast unavailable: {e}");
                Section::unavailable(format!("Forecast unavailable: {e}"))
            }
        }
    }

    fn deploy(
        &self,
        incidents: &[ward_patrol_incident_models::IncidentRecord],
        forecast: &ForecastResult,
        requested_officers: usize,
    ) -> Section<Deployment> {
        let weight = match DeprivationWeight::try_from_decile(forecast.deprivation_decile) {
            Ok(weight) => weight,
            Err(e) => return Section::unavailable(format!("No deprivation weight: {e}")),
        };

        let sample_target = forecast.next_month_count();
        if sample_target == 0 {
            return Section::unavailable(format!(
                "Forecast for {} rounds to zero incidents; nothing to deploy",
                forecast.next_month
            ));
        }

        let sample = sample_incidents(incidents, sample_target, self.config.allocation.seed);
        if sample.is_empty() {
            return Section::unavailable("No located incidents to deploy against");
        }

        let officers = requested_officers.min(sample.len());
        if officers < requested_officers {
            log::warn!(
                "Requested {requested_officers} officers but only {} incidents were sampled; placing {officers}",
                sample.len()
            );
        }

        let allocation = match allocate(&sample, weight, officers, &self.config.allocation) {
            Ok(allocation) => allocation,
            Err(e) => return Section::unavailable(format!("Allocation failed: {e}")),
        };

        let geodesic = match geodesic_report(&allocation.clustered, &allocation.centroids) {
            Ok(report) => report,
            Err(e) => return Section::unavailable(format!("Scoring failed: {e}")),
        };

        Section::Available(Deployment {
            weight,
            sample_target,
            requested_officers,
            officers,
            allocation,
            geodesic,
            street: None,
            street_ticket: None,
        })
    }

    /// Starts street-distance scoring for `report` in the background and
    /// records the run's ticket on its deployment, superseding any earlier
    /// run for the ward.
    ///
    /// Returns `Ok(None)` when street distances are disabled, no road graph
    /// is loaded, or the report has no deployment.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NoRuntime`] if called outside a tokio
    /// runtime.
    pub fn start_street_distance(
        &self,
        report: &mut WardReport,
        progress: Arc<dyn ScoringProgress>,
    ) -> Result<Option<PendingStreetReport>, PipelineError> {
        if !self.config.scoring.street_distance {
            return Ok(None);
        }
        let (Some(graph), Section::Available(deployment)) =
            (&self.road_graph, &mut report.deployment)
        else {
            return Ok(None);
        };

        let ticket = self.board.issue(&report.ward_code);
        deployment.street_ticket = Some(ticket.clone());
        spawn_street_report(
            ticket,
            deployment.allocation.clustered.clone(),
            deployment.allocation.centroids.clone(),
            Arc::clone(graph),
            self.config.scoring.street_options(),
            progress,
        )
        .map(Some)
    }
}
