//! Bulk loading of prepared CSV extracts into the store.
//!
//! The incident CSV is the output of the upstream spatial join: one row per
//! crime with its ward, LSOA and IMD decile already attached. Both the
//! snake_case headers and the police.uk style headers (`Crime ID`,
//! `Month`, ...) are accepted.

use std::path::Path;

use serde::Deserialize;
use ward_patrol_incident_models::{Coordinate, IncidentId, IncidentRecord, YearMonth};

use crate::{
    DbError,
    boundary::parse_ward_geometry,
    ids::IncidentIdGenerator,
    store::{DuckDbIncidentStore, WardRow},
};

/// Outcome of an import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    /// Rows written to the store.
    pub inserted: u64,
    /// Rows that had no natural id and were given a generated one.
    pub generated_ids: u64,
    /// Malformed rows that were skipped.
    pub skipped: u64,
}

#[derive(Debug, Deserialize)]
struct IncidentRow {
    #[serde(alias = "Crime ID", default)]
    crime_id: Option<String>,
    #[serde(alias = "Month")]
    month: String,
    #[serde(alias = "Latitude", default)]
    latitude: Option<f64>,
    #[serde(alias = "Longitude", default)]
    longitude: Option<f64>,
    #[serde(alias = "Ward code", alias = "WD24CD")]
    ward_code: String,
    #[serde(alias = "LSOA code", default)]
    lsoa_code: Option<String>,
    #[serde(alias = "IMD decile", alias = "imd", default)]
    imd_decile: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WardCsvRow {
    #[serde(alias = "Ward code", alias = "WD24CD")]
    ward_code: String,
    #[serde(alias = "Ward name", alias = "WD24NM")]
    ward_name: String,
    #[serde(alias = "geometry", alias = "wkt", default)]
    geometry_wkt: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Loads a joined incident CSV into `store`.
///
/// Rows without a `crime_id` receive a generated id that collides neither
/// with ids already in the store nor with any natural id in the file.
/// Rows with an unparseable month or an empty ward code are skipped.
///
/// # Errors
///
/// Returns [`DbError`] if the file cannot be read or the insert fails.
pub fn import_incidents_csv(
    store: &DuckDbIncidentStore,
    path: &Path,
) -> Result<ImportSummary, DbError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut summary = ImportSummary::default();
    let mut rows = Vec::new();

    for result in reader.deserialize::<IncidentRow>() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => {
                log::warn!("Skipping malformed incident row: {e}");
                summary.skipped += 1;
            }
        }
    }

    let mut ids = IncidentIdGenerator::with_existing(store.incident_ids()?);
    for row in &mut rows {
        row.crime_id = non_empty(row.crime_id.take());
        if let Some(id) = &row.crime_id {
            ids.reserve(id);
        }
    }

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let month: YearMonth = match row.month.parse() {
            Ok(month) => month,
            Err(e) => {
                log::warn!("Skipping incident with invalid month {:?}: {e}", row.month);
                summary.skipped += 1;
                continue;
            }
        };
        if row.ward_code.is_empty() {
            log::warn!("Skipping incident without a ward code");
            summary.skipped += 1;
            continue;
        }

        let id = if let Some(id) = row.crime_id {
            IncidentId::new(id)
        } else {
            summary.generated_ids += 1;
            ids.generate()
        };

        let coordinate = match (row.latitude, row.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => {
                Some(Coordinate::new(lat, lon))
            }
            _ => None,
        };

        records.push(IncidentRecord {
            id,
            month,
            coordinate,
            ward_code: row.ward_code,
            lsoa_code: non_empty(row.lsoa_code),
            deprivation_decile: row.imd_decile.filter(|d| d.is_finite()),
        });
    }

    summary.inserted = store.insert_incidents(&records)?;
    log::info!(
        "Imported {} incidents from {} ({} generated ids, {} skipped)",
        summary.inserted,
        path.display(),
        summary.generated_ids,
        summary.skipped
    );

    Ok(summary)
}

/// Loads a ward CSV (`ward_code, ward_name, geometry_wkt`) into `store`.
///
/// Rows whose geometry does not parse are skipped so that a single broken
/// polygon does not block the rest.
///
/// # Errors
///
/// Returns [`DbError`] if the file cannot be read or the insert fails.
pub fn import_wards_csv(store: &DuckDbIncidentStore, path: &Path) -> Result<ImportSummary, DbError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut summary = ImportSummary::default();
    let mut wards = Vec::new();

    for result in reader.deserialize::<WardCsvRow>() {
        let row = match result {
            Ok(row) => row,
            Err(e) => {
                log::warn!("Skipping malformed ward row: {e}");
                summary.skipped += 1;
                continue;
            }
        };

        let geometry = non_empty(row.geometry_wkt).unwrap_or_default();
        if !geometry.is_empty()
            && let Err(e) = parse_ward_geometry(&geometry)
        {
            log::warn!("Skipping ward {}: {e}", row.ward_code);
            summary.skipped += 1;
            continue;
        }

        wards.push(WardRow {
            code: row.ward_code,
            name: row.ward_name,
            geometry,
        });
    }

    summary.inserted = store.insert_wards(&wards)?;
    log::info!(
        "Imported {} wards from {} ({} skipped)",
        summary.inserted,
        path.display(),
        summary.skipped
    );

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::IncidentStore;

    fn write(dir: &tempfile::TempDir, name: &str, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn imports_incidents_and_generates_missing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "incidents.csv",
            "crime_id,month,latitude,longitude,ward_code,lsoa_code,imd_decile\n\
             abc,2023-01,51.5,-0.1,E05000001,E01000001,3\n\
             ,2023-02,51.51,-0.11,E05000001,E01000001,3\n\
             ,2023-02,,,E05000001,,\n\
             bad,2023-13,51.5,-0.1,E05000001,E01000001,3\n",
        );
        let store = DuckDbIncidentStore::open_in_memory().unwrap();

        let summary = import_incidents_csv(&store, &path).unwrap();

        assert_eq!(summary.inserted, 3);
        assert_eq!(summary.generated_ids, 2);
        assert_eq!(summary.skipped, 1);

        let snapshot = store.ward_snapshot("E05000001").unwrap();
        assert_eq!(snapshot.incidents.len(), 3);
        assert_eq!(snapshot.located_count(), 2);
        assert!(
            snapshot
                .incidents
                .iter()
                .filter(|i| i.id.as_str() != "abc")
                .all(|i| i.id.as_str().len() == 64)
        );
        let unlocated = snapshot.incidents.iter().find(|i| !i.is_located()).unwrap();
        assert!(unlocated.lsoa_code.is_none());
        assert!(unlocated.deprivation_decile.is_none());
    }

    #[test]
    fn accepts_police_uk_headers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "street.csv",
            "Crime ID,Month,Latitude,Longitude,Ward code,LSOA code,IMD decile\n\
             x1,2022-11,51.5,-0.1,E05000002,E01000002,7\n",
        );
        let store = DuckDbIncidentStore::open_in_memory().unwrap();

        assert_eq!(import_incidents_csv(&store, &path).unwrap().inserted, 1);
        let snapshot = store.ward_snapshot("E05000002").unwrap();
        assert_eq!(snapshot.incidents[0].deprivation_decile, Some(7.0));
    }

    #[test]
    fn reimport_upserts_natural_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "incidents.csv",
            "crime_id,month,latitude,longitude,ward_code,lsoa_code,imd_decile\n\
             abc,2023-01,51.5,-0.1,E05000001,E01000001,3\n",
        );
        let store = DuckDbIncidentStore::open_in_memory().unwrap();

        import_incidents_csv(&store, &path).unwrap();
        import_incidents_csv(&store, &path).unwrap();
        assert_eq!(store.incident_count().unwrap(), 1);
    }

    #[test]
    fn imports_wards_and_skips_broken_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            "wards.csv",
            "ward_code,ward_name,geometry_wkt\n\
             E05000001,Abbey,\"POLYGON ((530000 180000, 531000 180000, 531000 181000, 530000 180000))\"\n\
             E05000002,Broken,\"POLYGON ((1 2\"\n\
             E05000003,Nowhere,\n",
        );
        let store = DuckDbIncidentStore::open_in_memory().unwrap();

        let summary = import_wards_csv(&store, &path).unwrap();
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.skipped, 1);

        assert!(store.ward_boundary("E05000001").unwrap().is_some());
        assert!(store.ward_boundary("E05000003").unwrap().is_none());
        let names: Vec<_> = store
            .ward_options()
            .unwrap()
            .into_iter()
            .filter_map(|o| o.name)
            .collect();
        assert_eq!(names, ["Abbey", "Nowhere"]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let store = DuckDbIncidentStore::open_in_memory().unwrap();
        assert!(import_incidents_csv(&store, Path::new("/nonexistent/incidents.csv")).is_err());
    }
}
