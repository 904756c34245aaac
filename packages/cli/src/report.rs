//! Terminal rendering of ward reports, and the deploy flow shared by the
//! `deploy` subcommand and the interactive menu.

use std::{fmt::Write as _, path::PathBuf};

use ward_patrol_cli_utils::{MultiProgress, StreetProgressBar, stage_spinner};
use ward_patrol_deployment_models::DistanceReport;
use ward_patrol_forecast_models::ForecastResult;
use ward_patrol_pipeline::{
    Deployment, DeploymentRequest, Pipeline, Section, WardReport, export::write_report,
};

const INDENT: &str = "  ";

/// What to do after the report is computed.
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Compute street-network distances when a road graph is loaded.
    pub street: bool,
    /// Write the report files; `None` uses the configured output directory.
    pub export: Option<Option<PathBuf>>,
}

fn meters(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |m| format!("{m:.1} m"))
}

/// Summary line for one distance metric.
pub fn distance_line(report: &DistanceReport) -> String {
    let mut line = format!(
        "{} distance: mean {}, max {} over {} incident(s)",
        report.metric,
        meters(report.mean_meters),
        meters(report.max_meters),
        report.measured
    );
    if report.excluded > 0 {
        let _ = write!(line, " ({} unreachable)", report.excluded);
    }
    line
}

pub fn forecast_summary(forecast: &ForecastResult) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Forecast for {}: {:.2} incident(s) (rounded to {})",
        forecast.next_month,
        forecast.next_month_forecast,
        forecast.next_month_count()
    );
    let _ = writeln!(
        out,
        "{INDENT}Model SARIMAX{} on {} month(s), ADF p = {:.3} ({})",
        forecast.order,
        forecast.months.len(),
        forecast.stationarity.p_value,
        if forecast.stationarity.stationary {
            "stationary"
        } else {
            "non-stationary"
        }
    );
    let _ = writeln!(
        out,
        "{INDENT}Backtest MAE: {} over {} month(s)",
        forecast
            .mean_absolute_error
            .map_or_else(|| "n/a".to_string(), |mae| format!("{mae:.3}")),
        forecast.backtest_len()
    );
    let _ = write!(
        out,
        "{INDENT}Deprivation decile of last month: {:.1}",
        forecast.deprivation_decile
    );
    out
}

pub fn deployment_summary(deployment: &Deployment) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        "Deployment: {} officer(s) over {} sampled incident(s), weight {:.1}",
        deployment.officers,
        deployment.allocation.clustered.len(),
        deployment.weight.value()
    );
    if deployment.officers < deployment.requested_officers {
        let _ = write!(out, " ({} requested)", deployment.requested_officers);
    }
    let _ = writeln!(
        out,
        "\n{INDENT}k-means {} after {} iteration(s)",
        if deployment.allocation.converged {
            "converged"
        } else {
            "stopped"
        },
        deployment.allocation.iterations
    );

    let sizes = deployment.allocation.cluster_sizes();
    for centroid in &deployment.allocation.centroids {
        let _ = writeln!(
            out,
            "{INDENT}Officer {}: ({:.5}, {:.5}) covering {} incident(s)",
            centroid.cluster + 1,
            centroid.coordinate.latitude,
            centroid.coordinate.longitude,
            sizes.get(centroid.cluster).copied().unwrap_or_default()
        );
    }
    let _ = write!(out, "{INDENT}{}", distance_line(&deployment.geodesic));
    out
}

pub fn print_report(report: &WardReport) {
    println!();
    match &report.ward_name {
        Some(name) => println!("{name} ({})", report.ward_code),
        None => println!("{}", report.ward_code),
    }

    match &report.forecast {
        Section::Available(forecast) => println!("{}", forecast_summary(forecast)),
        Section::Unavailable { reason } => println!("{reason}"),
    }
    match &report.deployment {
        Section::Available(deployment) => println!("{}", deployment_summary(deployment)),
        Section::Unavailable { reason } => println!("Deployment unavailable: {reason}"),
    }
}

/// Runs one request end to end: report, background street distances,
/// optional export.
///
/// # Errors
///
/// Returns an error if the pipeline fails or the export cannot be written.
#[allow(clippy::future_not_send)]
pub async fn deploy(
    multi: &MultiProgress,
    pipeline: &Pipeline,
    request: &DeploymentRequest,
    options: &DeployOptions,
) -> Result<WardReport, Box<dyn std::error::Error>> {
    let spinner = stage_spinner(multi, &format!("Forecasting {}", request.ward_code));
    let mut report = pipeline.run(request)?;
    spinner.finish_and_clear();
    print_report(&report);

    if options.street && report.deployment.is_available() {
        if pipeline.street_distance_enabled() {
            let progress = StreetProgressBar::attach(multi, "Street distances");
            if let Some(pending) = pipeline.start_street_distance(&mut report, progress)?
                && pipeline.board().settle(pending).await?
                && let Some(outcome) = pipeline.board().get(&report.ward_code)
                && report.apply_street_outcome(&outcome)
            {
                println!("{INDENT}{}", distance_line(&outcome.report));
            }
        } else {
            println!("{INDENT}Street distances skipped: no road graph loaded");
        }
    }

    if let Some(dir) = &options.export {
        let dir = dir
            .clone()
            .unwrap_or_else(|| pipeline.config().data.output_dir.clone());
        let files = write_report(&dir, &report)?;
        println!();
        for path in files
            .forecast_json
            .iter()
            .chain(files.clusters_csv.iter())
            .chain(std::iter::once(&files.deployment_geojson))
        {
            println!("Wrote {}", path.display());
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use ward_patrol_deployment_models::DistanceMetric;

    use super::*;

    #[test]
    fn distance_line_mentions_unreachable_incidents() {
        let report = DistanceReport::from_distances(DistanceMetric::Street, &[100.0, 300.0], 2);
        assert_eq!(
            distance_line(&report),
            "street distance: mean 200.0 m, max 300.0 m over 2 incident(s) (2 unreachable)"
        );
    }

    #[test]
    fn empty_distance_report_reads_as_na() {
        let report = DistanceReport::from_distances(DistanceMetric::Geodesic, &[], 0);
        assert_eq!(
            distance_line(&report),
            "geodesic distance: mean n/a, max n/a over 0 incident(s)"
        );
    }
}
