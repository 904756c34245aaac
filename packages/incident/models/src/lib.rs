#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incident record types shared across the ward patrol system.
//!
//! An [`IncidentRecord`] is an immutable historical fact: one reported crime
//! with its month, ward, LSOA, and (when known) coordinate and joined IMD
//! deprivation decile. Records are created once by the store loader and
//! never mutated afterwards.

use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// Unique identifier of an incident.
///
/// Either the natural `Crime ID` from the source data or a generated
/// 64-character hex key for rows that arrived without one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(String);

impl IncidentId {
    /// Wraps an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IncidentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A calendar month, the time granularity of all incident data.
///
/// Printed and parsed as ISO `YYYY-MM`. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    /// Creates a month from a year and a 1-based month number.
    ///
    /// # Errors
    ///
    /// Returns an error if `month` is not in `1..=12`.
    pub const fn new(year: i32, month: u32) -> Result<Self, InvalidYearMonthError> {
        if month >= 1 && month <= 12 {
            Ok(Self { year, month })
        } else {
            Err(InvalidYearMonthError::MonthOutOfRange { month })
        }
    }

    /// Returns the calendar year.
    #[must_use]
    pub const fn year(self) -> i32 {
        self.year
    }

    /// Returns the 1-based month number.
    #[must_use]
    pub const fn month(self) -> u32 {
        self.month
    }

    /// Returns the following month.
    #[must_use]
    pub const fn succ(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    /// Returns the month `n` months after this one (or before, if negative).
    #[must_use]
    pub const fn offset(self, n: i64) -> Self {
        let index = self.index() + n;
        Self::from_index(index)
    }

    /// Number of months from `self` to `other` (negative when `other` is
    /// earlier).
    #[must_use]
    pub const fn months_until(self, other: Self) -> i64 {
        other.index() - self.index()
    }

    /// Returns the first day of this month.
    #[must_use]
    pub fn first_day(self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    const fn index(self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    const fn from_index(index: i64) -> Self {
        Self {
            year: index.div_euclid(12) as i32,
            month: index.rem_euclid(12) as u32 + 1,
        }
    }
}

impl From<NaiveDate> for YearMonth {
    fn from(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }
}

impl std::fmt::Display for YearMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = InvalidYearMonthError;

    /// Accepts `YYYY-MM` and full ISO dates (`YYYY-MM-DD`), ignoring the day.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let date = if trimmed.len() > 7 {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        } else {
            NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d")
        };

        date.map(Self::from)
            .map_err(|_| InvalidYearMonthError::Unparseable {
                value: s.to_string(),
            })
    }
}

impl TryFrom<String> for YearMonth {
    type Error = InvalidYearMonthError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<YearMonth> for String {
    fn from(value: YearMonth) -> Self {
        value.to_string()
    }
}

/// Error returned when a [`YearMonth`] cannot be built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidYearMonthError {
    /// The month number was outside `1..=12`.
    MonthOutOfRange {
        /// The rejected month number.
        month: u32,
    },
    /// The string was not an ISO year-month.
    Unparseable {
        /// The rejected input.
        value: String,
    },
}

impl std::fmt::Display for InvalidYearMonthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MonthOutOfRange { month } => {
                write!(f, "invalid month {month}: expected 1-12")
            }
            Self::Unparseable { value } => {
                write!(f, "invalid year-month {value:?}: expected YYYY-MM")
            }
        }
    }
}

impl std::error::Error for InvalidYearMonthError {}

/// A WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl Coordinate {
    /// Creates a coordinate from latitude and longitude.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Squared Euclidean distance in (lat, lon) degree space.
    ///
    /// Not a physical distance; used only where the clustering step needs a
    /// planar approximation.
    #[must_use]
    pub fn squared_degree_distance(self, other: Self) -> f64 {
        let dlat = self.latitude - other.latitude;
        let dlon = self.longitude - other.longitude;
        dlat.mul_add(dlat, dlon * dlon)
    }
}

/// One historical crime incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentRecord {
    /// Unique incident identifier.
    pub id: IncidentId,
    /// Month the incident occurred.
    pub month: YearMonth,
    /// Location, when the source provided one.
    pub coordinate: Option<Coordinate>,
    /// Ward (administrative area) code, e.g. `E05000138`.
    pub ward_code: String,
    /// LSOA code used to join deprivation data.
    pub lsoa_code: Option<String>,
    /// IMD decile joined via the LSOA (1 = most deprived, 10 = least).
    pub deprivation_decile: Option<f64>,
}

impl IncidentRecord {
    /// Whether this record has a usable coordinate.
    #[must_use]
    pub fn is_located(&self) -> bool {
        self.coordinate
            .is_some_and(|c| c.latitude.is_finite() && c.longitude.is_finite())
    }
}
