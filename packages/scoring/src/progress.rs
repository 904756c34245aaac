//! Progress of a street scoring run.
//!
//! Routing a large sample runs one shortest-path search per officer, so
//! [`street_report`](crate::street_report) reports where it is through a
//! [`ScoringProgress`]. The CLI renders it as a progress bar; library
//! callers that do not care pass [`null_progress`].

use std::sync::Arc;

use ward_patrol_deployment_models::DistanceReport;

/// Phases of a street scoring run, in the order they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringPhase {
    /// Officers are being matched to their nearest road nodes.
    Snapping,
    /// Routes are being measured, cluster by cluster.
    Routing,
}

impl ScoringPhase {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Snapping => "Snapping to road network",
            Self::Routing => "Routing",
        }
    }
}

/// Observer of one street scoring run.
///
/// Shared with the blocking task that does the routing, hence
/// `Send + Sync`. Every incident is counted by [`scored`](Self::scored)
/// exactly once, whether it was routed or excluded.
pub trait ScoringProgress: Send + Sync {
    /// The run covers `incidents` clustered incidents.
    fn started(&self, incidents: u64);

    fn phase(&self, phase: ScoringPhase);

    /// `incidents` more incidents were routed or excluded.
    fn scored(&self, incidents: u64);

    /// The run is over and produced `report`.
    fn finished(&self, report: &DistanceReport);
}

/// Ignores every update.
pub struct NullProgress;

impl ScoringProgress for NullProgress {
    fn started(&self, _incidents: u64) {}
    fn phase(&self, _phase: ScoringPhase) {}
    fn scored(&self, _incidents: u64) {}
    fn finished(&self, _report: &DistanceReport) {}
}

/// A shared [`NullProgress`].
#[must_use]
pub fn null_progress() -> Arc<dyn ScoringProgress> {
    Arc::new(NullProgress)
}
