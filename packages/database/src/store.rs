//! `DuckDB`-backed incident store.
//!
//! One database file holds two tables: `incidents` (already joined with
//! ward codes and IMD deciles) and `wards` (names and boundary geometry).
//! Every per-ward read is a parameterized query that returns an owned
//! [`WardSnapshot`].

use std::{collections::BTreeMap, path::Path, sync::Mutex};

use duckdb::Connection;
use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use ward_patrol_incident_models::{Coordinate, IncidentId, IncidentRecord, YearMonth};

use crate::{DbError, boundary::parse_ward_geometry};

/// Number of rows per INSERT chunk.
const CHUNK_SIZE: usize = 2_000;

/// All incidents recorded in one ward, ordered by month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WardSnapshot {
    pub ward_code: String,
    /// `None` when the ward has incidents but no row in `wards`.
    pub ward_name: Option<String>,
    pub incidents: Vec<IncidentRecord>,
}

impl WardSnapshot {
    /// Number of incidents that carry a coordinate.
    #[must_use]
    pub fn located_count(&self) -> usize {
        self.incidents.iter().filter(|i| i.is_located()).count()
    }
}

/// A selectable ward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WardOption {
    pub code: String,
    pub name: Option<String>,
    pub incident_count: u64,
}

impl WardOption {
    /// `"Name (CODE)"`, or just the code when the ward is unnamed.
    #[must_use]
    pub fn label(&self) -> String {
        self.name
            .as_ref()
            .map_or_else(|| self.code.clone(), |name| format!("{name} ({})", self.code))
    }
}

/// A ward as stored: code, name and raw geometry text (BNG WKT or
/// WGS84 `GeoJSON`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WardRow {
    pub code: String,
    pub name: String,
    pub geometry: String,
}

/// Read access to incidents and ward boundaries.
pub trait IncidentStore: Send + Sync {
    /// All incidents of `ward_code`. An unknown ward yields an empty
    /// snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or a stored row is malformed.
    fn ward_snapshot(&self, ward_code: &str) -> Result<WardSnapshot, DbError>;

    /// Every ward known to the store, by name.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    fn ward_options(&self) -> Result<Vec<WardOption>, DbError>;

    /// The ward's boundary in WGS84, or `None` if it has no geometry.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails or the geometry cannot be
    /// parsed.
    fn ward_boundary(&self, ward_code: &str) -> Result<Option<MultiPolygon<f64>>, DbError>;
}

/// [`IncidentStore`] over a single `DuckDB` connection.
#[derive(Debug)]
pub struct DuckDbIncidentStore {
    conn: Mutex<Connection>,
}

impl DuckDbIncidentStore {
    /// Opens (or creates) the database at `path` and ensures the schema
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            crate::paths::ensure_dir(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("SET threads = 4;")?;
        log::debug!("Opened incident store at {}", path.display());

        Self::with_connection(conn)
    }

    /// Opens the database at [`crate::paths::database_path`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open_default() -> Result<Self, DbError> {
        Self::open(&crate::paths::database_path())
    }

    /// A throwaway in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if `DuckDB` cannot create the database.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, DbError> {
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    /// Upserts incidents by id. Within a batch the last occurrence of an id
    /// wins.
    ///
    /// Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any database operation fails.
    pub fn insert_incidents(&self, incidents: &[IncidentRecord]) -> Result<u64, DbError> {
        if incidents.is_empty() {
            return Ok(0);
        }

        let mut last_seen: BTreeMap<&IncidentId, usize> = BTreeMap::new();
        for (i, incident) in incidents.iter().enumerate() {
            last_seen.insert(&incident.id, i);
        }
        let deduped: Vec<&IncidentRecord> = incidents
            .iter()
            .enumerate()
            .filter(|(i, inc)| last_seen.get(&inc.id) == Some(i))
            .map(|(_, inc)| inc)
            .collect();

        if deduped.len() < incidents.len() {
            log::info!(
                "Deduplicated incident batch: {} -> {} rows",
                incidents.len(),
                deduped.len()
            );
        }

        let conn = self.lock()?;
        let mut total = 0u64;

        for chunk in deduped.chunks(CHUNK_SIZE) {
            let mut sql = String::from(
                "INSERT INTO incidents (
                    incident_id, month, latitude, longitude,
                    ward_code, lsoa_code, imd_decile
                ) VALUES ",
            );
            for i in 0..chunk.len() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_str("(?, ?, ?, ?, ?, ?, ?)");
            }
            sql.push_str(
                " ON CONFLICT (incident_id) DO UPDATE SET
                    month = EXCLUDED.month,
                    latitude = EXCLUDED.latitude,
                    longitude = EXCLUDED.longitude,
                    ward_code = EXCLUDED.ward_code,
                    lsoa_code = EXCLUDED.lsoa_code,
                    imd_decile = EXCLUDED.imd_decile",
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut idx = 1usize;

            for incident in chunk {
                stmt.raw_bind_parameter(idx, incident.id.as_str())?;
                stmt.raw_bind_parameter(idx + 1, incident.month.to_string())?;
                stmt.raw_bind_parameter(idx + 2, incident.coordinate.map(|c| c.latitude))?;
                stmt.raw_bind_parameter(idx + 3, incident.coordinate.map(|c| c.longitude))?;
                stmt.raw_bind_parameter(idx + 4, incident.ward_code.as_str())?;
                stmt.raw_bind_parameter(idx + 5, incident.lsoa_code.as_deref())?;
                stmt.raw_bind_parameter(idx + 6, incident.deprivation_decile)?;
                idx += 7;
            }

            let rows = stmt.raw_execute()?;
            total += u64::try_from(rows).unwrap_or(0);
        }

        Ok(total)
    }

    /// Upserts ward rows by code.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if any database operation fails.
    pub fn insert_wards(&self, wards: &[WardRow]) -> Result<u64, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "INSERT INTO wards (ward_code, ward_name, geometry) VALUES (?, ?, ?)
             ON CONFLICT (ward_code) DO UPDATE SET
                ward_name = EXCLUDED.ward_name,
                geometry = EXCLUDED.geometry",
        )?;

        let mut total = 0u64;
        for ward in wards {
            let rows = stmt.execute(duckdb::params![ward.code, ward.name, ward.geometry])?;
            total += u64::try_from(rows).unwrap_or(0);
        }
        Ok(total)
    }

    /// Total number of stored incidents.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn incident_count(&self) -> Result<u64, DbError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM incidents", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Every stored incident id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn incident_ids(&self) -> Result<Vec<String>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT incident_id FROM incidents")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS wards (
            ward_code TEXT NOT NULL PRIMARY KEY,
            ward_name TEXT NOT NULL,
            geometry TEXT
        );

        CREATE TABLE IF NOT EXISTS incidents (
            incident_id TEXT NOT NULL PRIMARY KEY,
            month TEXT NOT NULL,
            latitude DOUBLE,
            longitude DOUBLE,
            ward_code TEXT NOT NULL,
            lsoa_code TEXT,
            imd_decile DOUBLE
        );",
    )?;
    Ok(())
}

type RawIncident = (
    String,
    String,
    Option<f64>,
    Option<f64>,
    String,
    Option<String>,
    Option<f64>,
);

fn to_record(raw: RawIncident) -> Result<IncidentRecord, DbError> {
    let (id, month, latitude, longitude, ward_code, lsoa_code, deprivation_decile) = raw;

    let month: YearMonth = month.parse().map_err(|e| DbError::Conversion {
        message: format!("incident {id} has invalid month {month:?}: {e}"),
    })?;
    let coordinate = match (latitude, longitude) {
        (Some(lat), Some(lon)) => Some(Coordinate::new(lat, lon)),
        _ => None,
    };

    Ok(IncidentRecord {
        id: IncidentId::new(id),
        month,
        coordinate,
        ward_code,
        lsoa_code,
        deprivation_decile,
    })
}

impl IncidentStore for DuckDbIncidentStore {
    fn ward_snapshot(&self, ward_code: &str) -> Result<WardSnapshot, DbError> {
        let conn = self.lock()?;

        let ward_name = match conn.query_row(
            "SELECT ward_name FROM wards WHERE ward_code = ?",
            [ward_code],
            |row| row.get::<_, String>(0),
        ) {
            Ok(name) => Some(name),
            Err(duckdb::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        let mut stmt = conn.prepare(
            "SELECT incident_id, month, latitude, longitude, ward_code, lsoa_code, imd_decile
             FROM incidents
             WHERE ward_code = ?
             ORDER BY month, incident_id",
        )?;
        let raw = stmt
            .query_map([ward_code], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })?
            .collect::<Result<Vec<RawIncident>, _>>()?;

        let incidents = raw.into_iter().map(to_record).collect::<Result<Vec<_>, _>>()?;
        log::debug!("Ward {ward_code}: {} incidents", incidents.len());

        Ok(WardSnapshot {
            ward_code: ward_code.to_string(),
            ward_name,
            incidents,
        })
    }

    fn ward_options(&self) -> Result<Vec<WardOption>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "WITH codes AS (
                SELECT ward_code FROM wards
                UNION
                SELECT DISTINCT ward_code FROM incidents
             )
             SELECT c.ward_code, w.ward_name, COUNT(i.incident_id)
             FROM codes c
             LEFT JOIN wards w ON w.ward_code = c.ward_code
             LEFT JOIN incidents i ON i.ward_code = c.ward_code
             GROUP BY c.ward_code, w.ward_name
             ORDER BY COALESCE(w.ward_name, c.ward_code), c.ward_code",
        )?;

        let options = stmt
            .query_map([], |row| {
                let count: i64 = row.get(2)?;
                Ok(WardOption {
                    code: row.get(0)?,
                    name: row.get(1)?,
                    incident_count: u64::try_from(count).unwrap_or(0),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(options)
    }

    fn ward_boundary(&self, ward_code: &str) -> Result<Option<MultiPolygon<f64>>, DbError> {
        let geometry: Option<String> = {
            let conn = self.lock()?;
            match conn.query_row(
                "SELECT geometry FROM wards WHERE ward_code = ?",
                [ward_code],
                |row| row.get(0),
            ) {
                Ok(geometry) => geometry,
                Err(duckdb::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            }
        };

        geometry
            .filter(|g| !g.trim().is_empty())
            .map(|g| parse_ward_geometry(&g))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, month: &str, ward: &str, coordinate: Option<(f64, f64)>) -> IncidentRecord {
        IncidentRecord {
            id: IncidentId::new(id),
            month: month.parse().unwrap(),
            coordinate: coordinate.map(|(lat, lon)| Coordinate::new(lat, lon)),
            ward_code: ward.to_string(),
            lsoa_code: Some("E01000001".to_string()),
            deprivation_decile: Some(4.0),
        }
    }

    fn seeded() -> DuckDbIncidentStore {
        let store = DuckDbIncidentStore::open_in_memory().unwrap();
        store
            .insert_incidents(&[
                record("c", "2023-02", "E05000001", Some((51.5, -0.1))),
                record("a", "2023-01", "E05000001", Some((51.51, -0.11))),
                record("b", "2023-01", "E05000002", None),
            ])
            .unwrap();
        store
            .insert_wards(&[WardRow {
                code: "E05000001".to_string(),
                name: "Abbey".to_string(),
                geometry: "POLYGON ((530000 180000, 531000 180000, 531000 181000, 530000 180000))"
                    .to_string(),
            }])
            .unwrap();
        store
    }

    #[test]
    fn snapshot_is_scoped_and_ordered() {
        let store = seeded();
        let snapshot = store.ward_snapshot("E05000001").unwrap();

        assert_eq!(snapshot.ward_name.as_deref(), Some("Abbey"));
        let ids: Vec<_> = snapshot.incidents.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
        assert_eq!(snapshot.located_count(), 2);
    }

    #[test]
    fn unlocated_incidents_round_trip_without_coordinate() {
        let store = seeded();
        let snapshot = store.ward_snapshot("E05000002").unwrap();
        assert_eq!(snapshot.incidents.len(), 1);
        assert!(snapshot.incidents[0].coordinate.is_none());
        assert!(snapshot.ward_name.is_none());
    }

    #[test]
    fn ward_code_is_bound_not_interpolated() {
        let store = seeded();
        let snapshot = store.ward_snapshot("x' OR '1'='1").unwrap();
        assert!(snapshot.incidents.is_empty());
    }

    #[test]
    fn upsert_replaces_existing_ids() {
        let store = seeded();
        store
            .insert_incidents(&[record("a", "2023-03", "E05000001", None)])
            .unwrap();

        assert_eq!(store.incident_count().unwrap(), 3);
        let snapshot = store.ward_snapshot("E05000001").unwrap();
        assert_eq!(snapshot.incidents[1].id.as_str(), "a");
        assert_eq!(snapshot.incidents[1].month.to_string(), "2023-03");
    }

    #[test]
    fn options_include_unnamed_wards_with_counts() {
        let store = seeded();
        let options = store.ward_options().unwrap();

        assert_eq!(options.len(), 2);
        assert_eq!(options[0].label(), "Abbey (E05000001)");
        assert_eq!(options[0].incident_count, 2);
        assert_eq!(options[1].label(), "E05000002");
        assert_eq!(options[1].incident_count, 1);
    }

    #[test]
    fn boundary_is_reprojected_to_wgs84() {
        let store = seeded();
        let boundary = store.ward_boundary("E05000001").unwrap().unwrap();
        let first = boundary.0[0].exterior().0[0];
        assert!((51.4..51.6).contains(&first.y));
        assert!((-0.2..0.0).contains(&first.x));

        assert!(store.ward_boundary("E05000002").unwrap().is_none());
    }

    #[test]
    fn file_store_persists_between_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("store.duckdb");

        DuckDbIncidentStore::open(&path)
            .unwrap()
            .insert_incidents(&[record("a", "2023-01", "E05000001", None)])
            .unwrap();

        let reopened = DuckDbIncidentStore::open(&path).unwrap();
        assert_eq!(reopened.incident_ids().unwrap(), ["a"]);
    }
}
