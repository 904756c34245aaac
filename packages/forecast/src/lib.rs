#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Per-ward next-month burglary forecaster.
//!
//! Fits a seasonal ARIMA model with the ward's IMD deprivation decile as an
//! exogenous regressor. The order is picked by an augmented Dickey-Fuller
//! test on the counts: a stationary series gets `(1,1,0)x(1,1,0,12)`,
//! anything else `(1,1,1)x(1,1,1,12)`. The model is fitted once on the full
//! history and then replayed to produce a rolling one-step-ahead backtest
//! and the out-of-sample forecast for the month after the series.

mod adf;
mod ols;
pub mod optimize;
pub mod sarimax;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ward_patrol_forecast_models::{
    ForecastResult, ModelOrder, MonthlySeries, SeasonalOrder, SeriesError, StationarityTest,
};
use ward_patrol_incident_models::IncidentRecord;

pub use adf::{AdfOutcome, adfuller};

/// Histories shorter than this are forecast anyway, with a warning.
pub const RECOMMENDED_MIN_MONTHS: usize = 20;

/// Errors produced by the forecaster.
#[derive(Debug, Error)]
pub enum ForecastError {
    /// The ward has no monthly data.
    #[error("no monthly incident data to forecast")]
    DataUnavailable,
    /// Model estimation failed.
    #[error("model fit failed: {message}")]
    ModelFit {
        /// What went wrong.
        message: String,
    },
    /// The incidents could not be turned into a monthly series.
    #[error("invalid monthly series: {0}")]
    InvalidSeries(#[from] SeriesError),
    /// The configuration cannot describe a valid model.
    #[error("invalid forecast configuration: {message}")]
    InvalidConfig {
        /// What is wrong with it.
        message: String,
    },
}

/// Forecaster settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct ForecastConfig {
    /// Months used only to warm the filter before the backtest starts.
    pub warmup: usize,
    /// Season length in months.
    pub seasonal_period: usize,
    /// ADF p-value below which the series counts as stationary.
    pub significance: f64,
    /// Iteration cap for the likelihood optimizer.
    pub max_optimizer_iterations: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            warmup: 10,
            seasonal_period: 12,
            significance: 0.05,
            max_optimizer_iterations: 5000,
        }
    }
}

impl ForecastConfig {
    fn validate(&self) -> Result<(), ForecastError> {
        if self.seasonal_period < 2 {
            return Err(ForecastError::InvalidConfig {
                message: format!(
                    "seasonal period must be at least 2, got {}",
                    self.seasonal_period
                ),
            });
        }
        if !(self.significance > 0.0 && self.significance < 1.0) {
            return Err(ForecastError::InvalidConfig {
                message: format!("significance must be in (0, 1), got {}", self.significance),
            });
        }
        Ok(())
    }
}

/// Picks the model order from the stationarity verdict.
#[must_use]
pub const fn select_order(stationary: bool, seasonal_period: usize) -> ModelOrder {
    let ma = if stationary { 0 } else { 1 };
    ModelOrder {
        p: 1,
        d: 1,
        q: ma,
        seasonal: SeasonalOrder {
            p: 1,
            d: 1,
            q: ma,
            period: seasonal_period,
        },
    }
}

/// Forecasts the month after `series` and backtests the model on it.
///
/// # Errors
///
/// * [`ForecastError::DataUnavailable`] if the series is empty
/// * [`ForecastError::ModelFit`] if the model cannot be estimated or
///   produces non-finite values
/// * [`ForecastError::InvalidConfig`] if `config` is unusable
pub fn forecast(
    series: &MonthlySeries,
    config: &ForecastConfig,
) -> Result<ForecastResult, ForecastError> {
    config.validate()?;

    let Some(last) = series.last().copied() else {
        return Err(ForecastError::DataUnavailable);
    };

    let n = series.len();
    if n < RECOMMENDED_MIN_MONTHS {
        log::warn!(
            "Only {n} months of history (at least {RECOMMENDED_MIN_MONTHS} recommended); forecast quality will suffer"
        );
    }

    let counts = series.counts();
    let deciles = series.deciles();

    let adf = adfuller(&counts);
    let stationary = adf.p_value < config.significance;
    let order = select_order(stationary, config.seasonal_period);
    log::info!(
        "ADF p-value {:.4} (lag {}): {} series, using SARIMAX{order}",
        adf.p_value,
        adf.used_lag,
        if stationary { "stationary" } else { "non-stationary" }
    );

    let options = optimize::NelderMeadOptions {
        max_iterations: config.max_optimizer_iterations,
        ..optimize::NelderMeadOptions::default()
    };
    let model = sarimax::fit(&counts, &deciles, order, &options)?;

    let predictions = model.predict(&counts, &deciles, last.deprivation_decile);
    if predictions.iter().flatten().any(|v| !v.is_finite()) {
        return Err(ForecastError::ModelFit {
            message: "model produced non-finite predictions".to_string(),
        });
    }

    // months before the differencing window fills are persistence values,
    // see `FittedSarimax::predict`
    let rolling: Vec<Option<f64>> = (0..n)
        .map(|t| {
            if t > config.warmup {
                predictions[t].map(|v| v.max(0.0))
            } else {
                None
            }
        })
        .collect();

    let next_month_forecast = predictions[n].map_or(last.incident_count, |v| v.max(0.0));

    let mean_absolute_error = mean_absolute_error(&counts, &rolling);
    if let Some(mae) = mean_absolute_error {
        log::debug!("Backtest MAE over {} months: {mae:.3}", n - config.warmup - 1);
    } else {
        log::warn!("Series too short for a backtest after {} warm-up months", config.warmup);
    }

    Ok(ForecastResult {
        months: series.months(),
        actual: counts,
        rolling,
        next_month: last.month.succ(),
        next_month_forecast,
        deprivation_decile: last.deprivation_decile,
        mean_absolute_error,
        order,
        stationarity: StationarityTest {
            statistic: adf.statistic,
            p_value: adf.p_value,
            used_lag: adf.used_lag,
            stationary,
        },
    })
}

/// Aggregates `records` into a monthly series and forecasts it.
///
/// # Errors
///
/// * [`ForecastError::DataUnavailable`] if there are no records
/// * [`ForecastError::InvalidSeries`] if no record carries a deprivation
///   decile
/// * anything [`forecast`] returns
pub fn forecast_incidents<'a>(
    records: impl IntoIterator<Item = &'a IncidentRecord>,
    config: &ForecastConfig,
) -> Result<ForecastResult, ForecastError> {
    let series = MonthlySeries::from_incidents(records).map_err(|e| match e {
        SeriesError::Empty => ForecastError::DataUnavailable,
        other => ForecastError::InvalidSeries(other),
    })?;
    forecast(&series, config)
}

#[allow(clippy::cast_precision_loss)]
fn mean_absolute_error(actual: &[f64], predicted: &[Option<f64>]) -> Option<f64> {
    let errors: Vec<f64> = actual
        .iter()
        .zip(predicted)
        .filter_map(|(a, p)| p.map(|p| (a - p).abs()))
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(errors.iter().sum::<f64>() / errors.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use float_cmp::assert_approx_eq;
    use ward_patrol_forecast_models::MonthlyPoint;
    use ward_patrol_incident_models::YearMonth;

    use super::*;

    fn series(counts: &[f64], decile: impl Fn(usize) -> f64) -> MonthlySeries {
        let mut month = YearMonth::new(2021, 1).unwrap();
        let points = counts
            .iter()
            .enumerate()
            .map(|(i, &incident_count)| {
                let point = MonthlyPoint {
                    month,
                    incident_count,
                    deprivation_decile: decile(i),
                };
                month = month.succ();
                point
            })
            .collect();
        MonthlySeries::new(points).unwrap()
    }

    fn seasonal_counts(months: i32) -> Vec<f64> {
        (0..months)
            .map(|t| {
                let season = (f64::from(t) * std::f64::consts::PI / 6.0).sin();
                let noise = f64::from((t * 29 + 7) % 13) / 13.0;
                (6.0f64.mul_add(season, 30.0) + 3.0 * noise).round()
            })
            .collect()
    }

    #[test]
    fn seasonal_series_with_constant_decile_forecasts_finite_value() {
        let series = series(&seasonal_counts(24), |_| 5.0);
        let result = forecast(&series, &ForecastConfig::default()).unwrap();

        assert!(result.next_month_forecast.is_finite());
        assert!(result.next_month_forecast >= 0.0);
        assert!(result.mean_absolute_error.unwrap() >= 0.0);
        assert_eq!(result.next_month.to_string(), "2023-01");
        assert_approx_eq!(f64, result.deprivation_decile, 5.0);
    }

    #[test]
    fn rolling_forecast_has_one_point_per_backtest_month() {
        let config = ForecastConfig::default();
        let series = series(&seasonal_counts(24), |_| 5.0);
        let result = forecast(&series, &config).unwrap();

        assert_eq!(result.rolling.len(), 24);
        assert_eq!(result.backtest_len(), 24 - config.warmup - 1);
        assert!(result.rolling[..=config.warmup].iter().all(Option::is_none));
        assert!(result.rolling.iter().flatten().all(|v| *v >= 0.0));
    }

    #[test]
    fn forecast_is_deterministic() {
        let series = series(&seasonal_counts(30), |i| {
            if i < 15 { 3.0 } else { 3.5 }
        });
        let config = ForecastConfig::default();

        let a = forecast(&series, &config).unwrap();
        let b = forecast(&series, &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn flat_series_degenerates_to_persistence() {
        let series = series(&[0.0; 24], |_| 4.0);
        let result = forecast(&series, &ForecastConfig::default()).unwrap();

        assert!(!result.stationarity.stationary);
        assert_eq!(result.order.q, 1);
        assert_approx_eq!(f64, result.next_month_forecast, 0.0);
        assert_approx_eq!(f64, result.mean_absolute_error.unwrap(), 0.0);
    }

    #[test]
    fn constant_nonzero_series_forecasts_the_constant() {
        let series = series(&[12.0; 26], |i| if i % 2 == 0 { 2.0 } else { 6.0 });
        let result = forecast(&series, &ForecastConfig::default()).unwrap();

        assert_approx_eq!(f64, result.next_month_forecast, 12.0, epsilon = 1e-9);
        assert_approx_eq!(f64, result.mean_absolute_error.unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn short_series_has_no_backtest() {
        let series = series(&[3.0, 4.0, 5.0, 4.0, 3.0, 4.0, 5.0, 4.0], |_| 5.0);
        let result = forecast(&series, &ForecastConfig::default()).unwrap();

        assert_eq!(result.backtest_len(), 0);
        assert!(result.mean_absolute_error.is_none());
        assert!(result.next_month_forecast >= 0.0);
    }

    #[test]
    fn empty_series_is_data_unavailable() {
        let series = MonthlySeries::new(vec![]).unwrap();
        assert!(matches!(
            forecast(&series, &ForecastConfig::default()),
            Err(ForecastError::DataUnavailable)
        ));
        assert!(matches!(
            forecast_incidents(&[], &ForecastConfig::default()),
            Err(ForecastError::DataUnavailable)
        ));
    }

    #[test]
    fn order_follows_stationarity() {
        assert_eq!(select_order(true, 12).to_string(), "(1,1,0)x(1,1,0,12)");
        assert_eq!(select_order(false, 12).to_string(), "(1,1,1)x(1,1,1,12)");
    }

    #[test]
    fn rejects_bad_config() {
        let series = series(&seasonal_counts(24), |_| 5.0);
        let config = ForecastConfig {
            seasonal_period: 0,
            ..ForecastConfig::default()
        };
        assert!(matches!(
            forecast(&series, &config),
            Err(ForecastError::InvalidConfig { .. })
        ));
    }
}
