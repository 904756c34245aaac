//! Background street-distance computation.
//!
//! Street scoring runs one shortest-path search per officer and can take
//! far longer than forecasting and allocation together, so it runs on
//! tokio's blocking pool while the rest of the report is shown. Each run is
//! tagged with a [`StreetTicket`]; the [`StreetDistanceBoard`] only accepts
//! the result of the newest ticket issued for a ward, so a slow run that was
//! superseded by a newer request can never overwrite the newer output.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use ward_patrol_deployment_models::{ClusteredIncident, DistanceReport, OfficerCentroid};
use ward_patrol_scoring::{RoadGraph, StreetOptions, progress::ScoringProgress, street_report};

use crate::PipelineError;

/// Identity of one street-distance request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreetTicket {
    pub ward_code: String,
    pub generation: u64,
}

/// Street scoring output for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreetOutcome {
    pub ticket: StreetTicket,
    /// The clustered incidents with their street distances filled in.
    pub clustered: Vec<ClusteredIncident>,
    pub report: DistanceReport,
}

/// Handle to a street-distance computation running in the background.
#[derive(Debug)]
pub struct PendingStreetReport {
    ticket: StreetTicket,
    receiver: oneshot::Receiver<StreetOutcome>,
}

impl PendingStreetReport {
    #[must_use]
    pub const fn ticket(&self) -> &StreetTicket {
        &self.ticket
    }

    /// The outcome if the computation has finished, without waiting.
    ///
    /// Returns `Ok(None)` while it is still running.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StreetTask`] if the computation died
    /// without producing a result.
    pub fn try_take(&mut self) -> Result<Option<StreetOutcome>, PipelineError> {
        match self.receiver.try_recv() {
            Ok(outcome) => Ok(Some(outcome)),
            Err(oneshot::error::TryRecvError::Empty) => Ok(None),
            Err(oneshot::error::TryRecvError::Closed) => Err(self.task_died()),
        }
    }

    /// Waits for the computation to finish.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StreetTask`] if the computation died
    /// without producing a result.
    pub async fn wait(self) -> Result<StreetOutcome, PipelineError> {
        let Self { ticket, receiver } = self;
        receiver.await.map_err(|_| PipelineError::StreetTask {
            ward_code: ticket.ward_code,
            generation: ticket.generation,
        })
    }

    fn task_died(&self) -> PipelineError {
        PipelineError::StreetTask {
            ward_code: self.ticket.ward_code.clone(),
            generation: self.ticket.generation,
        }
    }
}

/// Starts street scoring on the blocking pool and returns immediately.
///
/// # Errors
///
/// Returns [`PipelineError::NoRuntime`] if called outside a tokio runtime.
pub fn spawn_street_report(
    ticket: StreetTicket,
    clustered: Vec<ClusteredIncident>,
    centroids: Vec<OfficerCentroid>,
    graph: Arc<RoadGraph>,
    options: StreetOptions,
    progress: Arc<dyn ScoringProgress>,
) -> Result<PendingStreetReport, PipelineError> {
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| PipelineError::NoRuntime)?;
    let (sender, receiver) = oneshot::channel();

    let task_ticket = ticket.clone();
    runtime.spawn_blocking(move || {
        log::debug!(
            "Street distances for {} (generation {}) started",
            task_ticket.ward_code,
            task_ticket.generation
        );
        let (clustered, report) =
            street_report(&clustered, &centroids, &graph, &options, progress.as_ref());

        // the receiver may have been dropped by a caller that lost interest
        let _ = sender.send(StreetOutcome {
            ticket: task_ticket,
            clustered,
            report,
        });
    });

    Ok(PendingStreetReport { ticket, receiver })
}

/// Latest street-distance result per ward.
#[derive(Debug, Default)]
pub struct StreetDistanceBoard {
    generation: AtomicU64,
    latest: Mutex<HashMap<String, u64>>,
    results: Mutex<HashMap<String, StreetOutcome>>,
}

impl StreetDistanceBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a ticket for a new request on `ward_code`, superseding every
    /// earlier ticket for that ward.
    pub fn issue(&self, ward_code: &str) -> StreetTicket {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ward_code.to_string(), generation);

        StreetTicket {
            ward_code: ward_code.to_string(),
            generation,
        }
    }

    /// Whether `ticket` is the newest one issued for its ward.
    #[must_use]
    pub fn is_current(&self, ticket: &StreetTicket) -> bool {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ticket.ward_code)
            == Some(&ticket.generation)
    }

    /// Records `outcome` unless its ticket has been superseded. Returns
    /// whether it was recorded.
    pub fn publish(&self, outcome: StreetOutcome) -> bool {
        // hold `latest` so a concurrent `issue` cannot slip in between the
        // check and the insert
        let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        if latest.get(&outcome.ticket.ward_code) != Some(&outcome.ticket.generation) {
            log::debug!(
                "Discarding stale street distances for {} (generation {})",
                outcome.ticket.ward_code,
                outcome.ticket.generation
            );
            return false;
        }

        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(outcome.ticket.ward_code.clone(), outcome);
        drop(latest);
        true
    }

    /// Waits for `pending` and publishes its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StreetTask`] if the computation died.
    pub async fn settle(&self, pending: PendingStreetReport) -> Result<bool, PipelineError> {
        let outcome = pending.wait().await?;
        Ok(self.publish(outcome))
    }

    /// The accepted outcome for `ward_code`, or `None` once a newer ticket
    /// has been issued for the ward and its run has not published yet.
    #[must_use]
    pub fn get(&self, ward_code: &str) -> Option<StreetOutcome> {
        let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = latest.get(ward_code)?;
        self.results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(ward_code)
            .filter(|outcome| outcome.ticket.generation == *generation)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use float_cmp::assert_approx_eq;
    use ward_patrol_deployment_models::DistanceMetric;
    use ward_patrol_incident_models::{Coordinate, IncidentId};
    use ward_patrol_scoring::{RoadEdge, RoadNetwork, RoadNode, progress::null_progress};

    use super::*;

    fn graph() -> Arc<RoadGraph> {
        let network = RoadNetwork {
            nodes: vec![
                RoadNode {
                    id: 1,
                    latitude: 51.5,
                    longitude: -0.1,
                },
                RoadNode {
                    id: 2,
                    latitude: 51.5045,
                    longitude: -0.1,
                },
            ],
            edges: vec![RoadEdge {
                from: 1,
                to: 2,
                length_meters: 500.0,
                oneway: false,
            }],
        };
        Arc::new(RoadGraph::from_network(&network).unwrap())
    }

    fn inputs() -> (Vec<ClusteredIncident>, Vec<OfficerCentroid>) {
        (
            vec![ClusteredIncident {
                incident_id: IncidentId::new("a"),
                coordinate: Coordinate::new(51.5045, -0.1),
                cluster: 0,
                street_distance_meters: None,
            }],
            vec![OfficerCentroid {
                cluster: 0,
                coordinate: Coordinate::new(51.5, -0.1),
            }],
        )
    }

    fn outcome(ticket: StreetTicket, mean: f64) -> StreetOutcome {
        StreetOutcome {
            ticket,
            clustered: vec![],
            report: DistanceReport::from_distances(DistanceMetric::Street, &[mean], 0),
        }
    }

    #[test]
    fn tickets_increase_and_supersede_per_ward() {
        let board = StreetDistanceBoard::new();
        let first = board.issue("E05000001");
        let other = board.issue("E05000002");
        let second = board.issue("E05000001");

        assert!(second.generation > first.generation);
        assert!(!board.is_current(&first));
        assert!(board.is_current(&second));
        assert!(board.is_current(&other));
    }

    #[test]
    fn stale_results_never_overwrite_newer_ones() {
        let board = StreetDistanceBoard::new();
        let old = board.issue("E05000001");
        let new = board.issue("E05000001");

        assert!(board.publish(outcome(new, 10.0)));
        assert!(!board.publish(outcome(old, 99.0)));

        let stored = board.get("E05000001").unwrap();
        assert_eq!(stored.report.mean_meters, Some(10.0));
    }

    #[test]
    fn reissuing_hides_the_previous_outcome() {
        let board = StreetDistanceBoard::new();
        let first = board.issue("E05000001");
        assert!(board.publish(outcome(first.clone(), 10.0)));
        assert_eq!(board.get("E05000001").unwrap().ticket, first);

        let second = board.issue("E05000001");
        assert!(board.get("E05000001").is_none());
        assert!(!board.publish(outcome(first, 10.0)));

        assert!(board.publish(outcome(second.clone(), 20.0)));
        assert_eq!(board.get("E05000001").unwrap().ticket, second);
    }

    #[test]
    fn spawning_outside_a_runtime_is_an_error() {
        let (clustered, centroids) = inputs();
        let result = spawn_street_report(
            StreetTicket {
                ward_code: "E05000001".to_string(),
                generation: 1,
            },
            clustered,
            centroids,
            graph(),
            StreetOptions::default(),
            null_progress(),
        );
        assert!(matches!(result, Err(PipelineError::NoRuntime)));
    }

    #[tokio::test]
    async fn background_report_completes_and_is_published() {
        let board = StreetDistanceBoard::new();
        let (clustered, centroids) = inputs();
        let pending = spawn_street_report(
            board.issue("E05000001"),
            clustered,
            centroids,
            graph(),
            StreetOptions::default(),
            null_progress(),
        )
        .unwrap();

        assert!(board.settle(pending).await.unwrap());
        let stored = board.get("E05000001").unwrap();
        assert_approx_eq!(f64, stored.report.mean_meters.unwrap(), 500.0);
        assert_eq!(stored.clustered[0].street_distance_meters, Some(500.0));
    }

    #[tokio::test]
    async fn try_take_eventually_yields_the_outcome() {
        let (clustered, centroids) = inputs();
        let mut pending = spawn_street_report(
            StreetTicket {
                ward_code: "E05000001".to_string(),
                generation: 1,
            },
            clustered,
            centroids,
            graph(),
            StreetOptions::default(),
            null_progress(),
        )
        .unwrap();

        let outcome = loop {
            if let Some(outcome) = pending.try_take().unwrap() {
                break outcome;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        };
        assert_eq!(outcome.report.measured, 1);
    }

    #[tokio::test]
    async fn superseded_background_result_is_discarded() {
        let board = StreetDistanceBoard::new();
        let (clustered, centroids) = inputs();
        let stale = spawn_street_report(
            board.issue("E05000001"),
            clustered,
            centroids,
            graph(),
            StreetOptions::default(),
            null_progress(),
        )
        .unwrap();
        let newer = board.issue("E05000001");

        assert!(!board.settle(stale).await.unwrap());
        assert!(board.get("E05000001").is_none());
        assert!(board.is_current(&newer));
    }
}
