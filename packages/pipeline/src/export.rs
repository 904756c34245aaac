//! File exports of a ward report.
//!
//! * `{ward}_clusters.csv`: `latitude,longitude,cluster` per sampled incident
//! * `{ward}_forecast.json`: the forecast plot series
//! * `{ward}_deployment.geojson`: ward boundary, officers and incidents

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, Value};
use serde::Serialize;
use ward_patrol_deployment_models::ClusteredIncident;
use ward_patrol_forecast_models::ForecastResult;
use ward_patrol_incident_models::Coordinate;

use crate::{PipelineError, WardReport};

#[derive(Serialize)]
struct ClusterRow {
    latitude: f64,
    longitude: f64,
    cluster: usize,
}

/// Writes the incident-to-officer table as CSV.
///
/// # Errors
///
/// Returns [`PipelineError::Csv`] if writing fails.
pub fn write_clusters_csv<W: Write>(
    writer: W,
    clustered: &[ClusteredIncident],
) -> Result<(), PipelineError> {
    let mut csv = csv::Writer::from_writer(writer);
    for incident in clustered {
        csv.serialize(ClusterRow {
            latitude: incident.coordinate.latitude,
            longitude: incident.coordinate.longitude,
            cluster: incident.cluster,
        })?;
    }
    csv.flush()?;
    Ok(())
}

/// The forecast plot series as pretty-printed JSON.
///
/// # Errors
///
/// Returns [`PipelineError::Json`] if serialization fails.
pub fn forecast_plot_json(forecast: &ForecastResult) -> Result<String, PipelineError> {
    Ok(serde_json::to_string_pretty(&forecast.plot_series())?)
}

fn point(coordinate: Coordinate) -> Geometry {
    Geometry::new(Value::Point(vec![coordinate.longitude, coordinate.latitude]))
}

fn feature(geometry: Geometry, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(geometry),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// The deployment as a `GeoJSON` feature collection.
///
/// Features carry a `kind` property of `ward`, `officer` or `incident`;
/// officers and incidents also carry `cluster`, and incidents their
/// `street_distance_meters` once known.
#[must_use]
pub fn deployment_geojson(report: &WardReport) -> FeatureCollection {
    let mut features = Vec::new();

    if let Some(boundary) = &report.boundary {
        let mut properties = JsonObject::new();
        properties.insert("kind".into(), "ward".into());
        properties.insert("ward_code".into(), report.ward_code.clone().into());
        if let Some(name) = &report.ward_name {
            properties.insert("ward_name".into(), name.clone().into());
        }
        features.push(feature(Geometry::new(Value::from(boundary)), properties));
    }

    if let Some(deployment) = report.deployment.available() {
        for centroid in &deployment.allocation.centroids {
            let mut properties = JsonObject::new();
            properties.insert("kind".into(), "officer".into());
            properties.insert("cluster".into(), centroid.cluster.into());
            features.push(feature(point(centroid.coordinate), properties));
        }

        for incident in &deployment.allocation.clustered {
            let mut properties = JsonObject::new();
            properties.insert("kind".into(), "incident".into());
            properties.insert("incident_id".into(), incident.incident_id.to_string().into());
            properties.insert("cluster".into(), incident.cluster.into());
            if let Some(distance) = incident.street_distance_meters {
                properties.insert("street_distance_meters".into(), distance.into());
            }
            features.push(feature(point(incident.coordinate), properties));
        }
    }

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Paths written by [`write_report`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportedFiles {
    pub clusters_csv: Option<PathBuf>,
    pub forecast_json: Option<PathBuf>,
    pub deployment_geojson: PathBuf,
}

/// Writes every available export of `report` into `dir`.
///
/// Sections that are unavailable are skipped; the `GeoJSON` is always
/// written (it may hold only the ward boundary).
///
/// # Errors
///
/// Returns [`PipelineError`] if the directory cannot be created or a file
/// cannot be written.
pub fn write_report(dir: &Path, report: &WardReport) -> Result<ExportedFiles, PipelineError> {
    ward_patrol_database::paths::ensure_dir(dir)?;
    let stem = &report.ward_code;
    let mut files = ExportedFiles::default();

    if let Some(forecast) = report.forecast.available() {
        let path = dir.join(format!("{stem}_forecast.json"));
        std::fs::write(&path, forecast_plot_json(forecast)?)?;
        files.forecast_json = Some(path);
    }

    if let Some(deployment) = report.deployment.available() {
        let path = dir.join(format!("{stem}_clusters.csv"));
        let file = std::fs::File::create(&path)?;
        write_clusters_csv(std::io::BufWriter::new(file), &deployment.allocation.clustered)?;
        files.clusters_csv = Some(path);
    }

    let path = dir.join(format!("{stem}_deployment.geojson"));
    std::fs::write(&path, GeoJson::from(deployment_geojson(report)).to_string())?;
    files.deployment_geojson = path;

    log::info!("Exported {} report to {}", report.ward_code, dir.display());
    Ok(files)
}
