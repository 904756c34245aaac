//! Augmented Dickey-Fuller unit-root test.
//!
//! Regression with a constant term; the number of lagged differences is
//! chosen by AIC over a common sample, then the chosen regression is refit
//! on the longest sample it allows. p-values use MacKinnon's (1994)
//! response-surface approximation for a single series with constant.

use crate::ols;

/// MacKinnon coefficients for the constant-only regression, `N = 1`.
const TAU_MAX: f64 = 2.74;
const TAU_MIN: f64 = -18.83;
const TAU_STAR: f64 = -1.61;
const TAU_SMALL_P: [f64; 3] = [2.1659, 1.4412, 0.038_269];
const TAU_LARGE_P: [f64; 4] = [1.7339, 0.932_02, -0.127_45, -0.010_368];

/// Result of [`adfuller`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdfOutcome {
    /// t-statistic of the lagged level coefficient.
    pub statistic: f64,
    /// Approximate p-value of the unit-root null.
    pub p_value: f64,
    /// Number of lagged differences used.
    pub used_lag: usize,
}

impl AdfOutcome {
    /// Outcome used when the test cannot be computed (too short or constant
    /// series): the unit root cannot be rejected.
    const fn undetermined() -> Self {
        Self {
            statistic: f64::NAN,
            p_value: 1.0,
            used_lag: 0,
        }
    }
}

/// Runs the ADF test on `series`.
///
/// Never fails: series that are too short or constant yield a p-value of
/// 1.0 so that callers fall back to the differenced model.
#[must_use]
pub fn adfuller(series: &[f64]) -> AdfOutcome {
    let nobs = series.len();

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let default_lag = (12.0 * (nobs as f64 / 100.0).powf(0.25)).ceil() as usize;
    // n/2 - ntrend - 1 with a single constant trend term
    let Some(cap) = (nobs / 2).checked_sub(2) else {
        log::debug!("ADF: series of {nobs} observations is too short to test");
        return AdfOutcome::undetermined();
    };
    let max_lag = default_lag.min(cap);

    let diffs: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();

    let mut best: Option<(f64, usize)> = None;
    for lag in 0..=max_lag {
        let Some(fit) = regress(series, &diffs, lag, max_lag) else {
            continue;
        };
        let aic = fit.aic();
        if best.is_none_or(|(best_aic, _)| aic < best_aic) {
            best = Some((aic, lag));
        }
    }

    let Some((_, used_lag)) = best else {
        log::debug!("ADF: every lag regression was singular (constant series?)");
        return AdfOutcome::undetermined();
    };

    let Some(fit) = regress(series, &diffs, used_lag, used_lag) else {
        return AdfOutcome::undetermined();
    };

    // column 1 is the lagged level
    let statistic = fit.t_value(1);
    let p_value = if statistic.is_nan() {
        1.0
    } else {
        mackinnon_p_value(statistic)
    };

    AdfOutcome {
        statistic,
        p_value,
        used_lag,
    }
}

/// Fits `dy_t = c + gamma * y_{t-1} + sum_{i=1..lag} delta_i * dy_{t-i}`
/// over the rows that leave room for `start` lags.
fn regress(series: &[f64], diffs: &[f64], lag: usize, start: usize) -> Option<ols::OlsFit> {
    if diffs.len() <= start {
        return None;
    }

    let mut y = Vec::with_capacity(diffs.len() - start);
    let mut x = Vec::with_capacity(diffs.len() - start);

    for t in start..diffs.len() {
        y.push(diffs[t]);
        let mut row = Vec::with_capacity(lag + 2);
        row.push(1.0);
        row.push(series[t]);
        row.extend((1..=lag).map(|i| diffs[t - i]));
        x.push(row);
    }

    ols::fit(&y, &x)
}

/// MacKinnon approximate p-value for the ADF statistic.
#[must_use]
pub fn mackinnon_p_value(statistic: f64) -> f64 {
    if statistic > TAU_MAX {
        return 1.0;
    }
    if statistic < TAU_MIN {
        return 0.0;
    }

    let coefficients: &[f64] = if statistic <= TAU_STAR {
        &TAU_SMALL_P
    } else {
        &TAU_LARGE_P
    };

    let z = coefficients
        .iter()
        .rev()
        .fold(0.0f64, |acc, &c| acc.mul_add(statistic, c));

    normal_cdf(z)
}

/// Standard normal CDF.
#[must_use]
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / std::f64::consts::SQRT_2)
}

/// Complementary error function (Chebyshev fit, |error| < 1.2e-7).
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / 0.5f64.mul_add(z, 1.0);
    let poly = t.mul_add(
        t.mul_add(
            t.mul_add(
                t.mul_add(
                    t.mul_add(
                        t.mul_add(
                            t.mul_add(t.mul_add(t.mul_add(0.170_872_77, -0.822_152_23), 1.488_515_87), -1.135_203_98),
                            0.278_868_07,
                        ),
                        -0.186_288_06,
                    ),
                    0.096_784_18,
                ),
                0.374_091_96,
            ),
            1.000_023_68,
        ),
        -1.265_512_23,
    );
    let r = t * (-z).mul_add(z, poly).exp();
    if x >= 0.0 { r } else { 2.0 - r }
}
