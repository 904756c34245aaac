#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Monthly crime series and forecast result types.
//!
//! A [`MonthlySeries`] is the per-ward input of the forecaster: one point per
//! calendar month with the incident count and the mean IMD decile of that
//! month's incidents. A [`ForecastResult`] is what comes back out.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ward_patrol_incident_models::{IncidentRecord, YearMonth};

/// One month of a ward's history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPoint {
    /// Calendar month.
    pub month: YearMonth,
    /// Number of incidents recorded in the month.
    pub incident_count: f64,
    /// Mean IMD decile of the month's incidents (interpolated for gaps).
    pub deprivation_decile: f64,
}

/// A gap-free monthly series for one ward.
///
/// The month index is strictly increasing and contiguous. Construct with
/// [`MonthlySeries::new`] for pre-aggregated points or
/// [`MonthlySeries::from_incidents`] to aggregate raw records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySeries {
    points: Vec<MonthlyPoint>,
}

impl MonthlySeries {
    /// Wraps already-aggregated points after checking contiguity.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::NotContiguous`] if any month does not directly
    /// follow its predecessor, or [`SeriesError::NonFinite`] if a count or
    /// decile is not finite.
    pub fn new(points: Vec<MonthlyPoint>) -> Result<Self, SeriesError> {
        for pair in points.windows(2) {
            if pair[1].month != pair[0].month.succ() {
                return Err(SeriesError::NotContiguous {
                    previous: pair[0].month,
                    next: pair[1].month,
                });
            }
        }

        if let Some(bad) = points
            .iter()
            .find(|p| !p.incident_count.is_finite() || !p.deprivation_decile.is_finite())
        {
            return Err(SeriesError::NonFinite { month: bad.month });
        }

        Ok(Self { points })
    }

    /// Aggregates incident records into a monthly series.
    ///
    /// Counts incidents per month and averages the deprivation decile of the
    /// incidents that have one. Months with no incidents between the first
    /// and last observed month get a count of 0; months with no decile are
    /// linearly interpolated between the nearest known months, and leading
    /// or trailing gaps take the nearest known value.
    ///
    /// # Errors
    ///
    /// Returns [`SeriesError::Empty`] if `records` is empty, or
    /// [`SeriesError::NoDeprivationData`] if no record carries a decile.
    #[allow(clippy::cast_precision_loss)]
    pub fn from_incidents<'a>(
        records: impl IntoIterator<Item = &'a IncidentRecord>,
    ) -> Result<Self, SeriesError> {
        // month -> (count, decile sum, decile count)
        let mut by_month: BTreeMap<YearMonth, (u64, f64, u64)> = BTreeMap::new();

        for record in records {
            let entry = by_month.entry(record.month).or_insert((0, 0.0, 0));
            entry.0 += 1;
            if let Some(decile) = record.deprivation_decile.filter(|d| d.is_finite()) {
                entry.1 += decile;
                entry.2 += 1;
            }
        }

        let (Some(&first), Some(&last)) = (by_month.keys().next(), by_month.keys().next_back())
        else {
            return Err(SeriesError::Empty);
        };

        let span = usize::try_from(first.months_until(last)).unwrap_or(0) + 1;
        let mut months = Vec::with_capacity(span);
        let mut counts = Vec::with_capacity(span);
        let mut deciles: Vec<Option<f64>> = Vec::with_capacity(span);

        let mut month = first;
        for _ in 0..span {
            let (count, sum, n) = by_month.get(&month).copied().unwrap_or((0, 0.0, 0));
            months.push(month);
            counts.push(count as f64);
            deciles.push((n > 0).then(|| sum / n as f64));
            month = month.succ();
        }

        let deciles = interpolate_gaps(&deciles).ok_or(SeriesError::NoDeprivationData)?;

        let points = months
            .into_iter()
            .zip(counts)
            .zip(deciles)
            .map(|((month, incident_count), deprivation_decile)| MonthlyPoint {
                month,
                incident_count,
                deprivation_decile,
            })
            .collect();

        Self::new(points)
    }

    /// The points in chronological order.
    #[must_use]
    pub fn points(&self) -> &[MonthlyPoint] {
        &self.points
    }

    /// Number of months in the series.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the series has no months.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Incident counts in chronological order.
    #[must_use]
    pub fn counts(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.incident_count).collect()
    }

    /// Deprivation deciles in chronological order.
    #[must_use]
    pub fn deciles(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.deprivation_decile).collect()
    }

    /// Months in chronological order.
    #[must_use]
    pub fn months(&self) -> Vec<YearMonth> {
        self.points.iter().map(|p| p.month).collect()
    }

    /// The last observed point.
    #[must_use]
    pub fn last(&self) -> Option<&MonthlyPoint> {
        self.points.last()
    }
}

/// Linear interpolation over `None` gaps; edges take the nearest known
/// value. Returns `None` when nothing is known.
fn interpolate_gaps(values: &[Option<f64>]) -> Option<Vec<f64>> {
    let known: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i, v)))
        .collect();

    let (&(first_idx, first_val), &(last_idx, last_val)) = (known.first()?, known.last()?);

    let mut out = Vec::with_capacity(values.len());
    let mut segment = 0;

    for i in 0..values.len() {
        if i <= first_idx {
            out.push(first_val);
            continue;
        }
        if i >= last_idx {
            out.push(last_val);
            continue;
        }
        while known[segment + 1].0 < i {
            segment += 1;
        }
        let (left_idx, left_val) = known[segment];
        let (right_idx, right_val) = known[segment + 1];
        if i == right_idx {
            out.push(right_val);
        } else {
            #[allow(clippy::cast_precision_loss)]
            let frac = (i - left_idx) as f64 / (right_idx - left_idx) as f64;
            out.push((right_val - left_val).mul_add(frac, left_val));
        }
    }

    Some(out)
}

/// Errors raised while building a [`MonthlySeries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesError {
    /// No incidents to aggregate.
    Empty,
    /// None of the incidents carried a deprivation decile.
    NoDeprivationData,
    /// Two consecutive points are not consecutive months.
    NotContiguous {
        /// Month of the earlier point.
        previous: YearMonth,
        /// Month of the later point.
        next: YearMonth,
    },
    /// A count or decile was NaN or infinite.
    NonFinite {
        /// Month of the offending point.
        month: YearMonth,
    },
}

impl std::fmt::Display for SeriesError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "no incidents to build a monthly series from"),
            Self::NoDeprivationData => {
                write!(f, "no incident carries a deprivation decile")
            }
            Self::NotContiguous { previous, next } => {
                write!(f, "month {next} does not follow {previous}")
            }
            Self::NonFinite { month } => write!(f, "non-finite value in month {month}"),
        }
    }
}

impl std::error::Error for SeriesError {}

/// Seasonal part of a SARIMA order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonalOrder {
    /// Seasonal autoregressive order.
    pub p: usize,
    /// Seasonal differencing order.
    pub d: usize,
    /// Seasonal moving-average order.
    pub q: usize,
    /// Season length in months.
    pub period: usize,
}

/// A SARIMA `(p,d,q)x(P,D,Q,s)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOrder {
    /// Autoregressive order.
    pub p: usize,
    /// Differencing order.
    pub d: usize,
    /// Moving-average order.
    pub q: usize,
    /// Seasonal component.
    pub seasonal: SeasonalOrder,
}

impl std::fmt::Display for ModelOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({},{},{})x({},{},{},{})",
            self.p,
            self.d,
            self.q,
            self.seasonal.p,
            self.seasonal.d,
            self.seasonal.q,
            self.seasonal.period
        )
    }
}

/// Outcome of the unit-root test that drives order selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationarityTest {
    /// ADF t-statistic (`NaN` when the regression was singular).
    pub statistic: f64,
    /// Approximate p-value.
    pub p_value: f64,
    /// Number of lagged differences selected.
    pub used_lag: usize,
    /// Whether the series was judged stationary.
    pub stationary: bool,
}

/// Forecast for one ward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastResult {
    /// Months of the input series.
    pub months: Vec<YearMonth>,
    /// Observed incident counts.
    pub actual: Vec<f64>,
    /// One-step-ahead backtest forecasts aligned with `actual`; `None` for
    /// the warm-up months.
    pub rolling: Vec<Option<f64>>,
    /// The month being forecast.
    pub next_month: YearMonth,
    /// Expected incident count for `next_month` (non-negative).
    pub next_month_forecast: f64,
    /// Deprivation decile of the last observed month.
    pub deprivation_decile: f64,
    /// Mean absolute error of `rolling` against `actual`.
    pub mean_absolute_error: Option<f64>,
    /// Model order used.
    pub order: ModelOrder,
    /// Stationarity test that selected the order.
    pub stationarity: StationarityTest,
}

impl ForecastResult {
    /// Number of defined backtest forecasts.
    #[must_use]
    pub fn backtest_len(&self) -> usize {
        self.rolling.iter().filter(|v| v.is_some()).count()
    }

    /// The forecast rounded to a whole number of incidents.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn next_month_count(&self) -> usize {
        self.next_month_forecast.max(0.0).round() as usize
    }

    /// Plot-ready view: actual line, backtest line, and the hand-off from
    /// the last actual month to the next-month forecast.
    #[must_use]
    pub fn plot_series(&self) -> ForecastPlot {
        let actual = self
            .months
            .iter()
            .zip(&self.actual)
            .map(|(&month, &value)| PlotPoint { month, value })
            .collect();

        let rolling = self
            .months
            .iter()
            .zip(&self.rolling)
            .filter_map(|(&month, value)| value.map(|value| PlotPoint { month, value }))
            .collect();

        let next = self
            .months
            .last()
            .zip(self.actual.last())
            .map(|(&month, &value)| {
                vec![
                    PlotPoint { month, value },
                    PlotPoint {
                        month: self.next_month,
                        value: self.next_month_forecast,
                    },
                ]
            })
            .unwrap_or_default();

        ForecastPlot {
            actual,
            rolling,
            next,
        }
    }
}

/// A single plotted value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlotPoint {
    /// X axis.
    pub month: YearMonth,
    /// Y axis.
    pub value: f64,
}

/// Actual vs. rolling forecast vs. next-month forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPlot {
    /// Observed counts.
    pub actual: Vec<PlotPoint>,
    /// Backtest forecasts.
    pub rolling: Vec<PlotPoint>,
    /// Segment from the last actual value to the next-month forecast.
    pub next: Vec<PlotPoint>,
}
