//! Regression with seasonal ARIMA errors.
//!
//! The model is `y_t = beta * x_t + z_t` where `z` follows a
//! `(p,d,q)x(P,D,Q,s)` process. The differenced errors
//! `w = (1-B)^d (1-B^s)^D z` form a stationary ARMA process whose exact
//! Gaussian likelihood is evaluated with a Kalman filter on the Harvey
//! state-space form, initialized at the stationary covariance, with the
//! innovation variance concentrated out.
//!
//! AR and MA coefficients are optimized as `tanh` of unconstrained values,
//! which keeps every first-order factor stationary and invertible.

use nalgebra::{DMatrix, DVector};
use ward_patrol_forecast_models::ModelOrder;

use crate::{
    ForecastError,
    optimize::{self, NelderMeadOptions},
};

/// Bound on the unconstrained AR/MA parameters (`tanh(5) ~ 0.9999`).
const PARAM_BOUND: f64 = 5.0;
/// Variances at or below this are treated as zero.
const MIN_VARIANCE: f64 = 1e-12;
/// Starting value of every unconstrained AR/MA parameter.
const START_VALUE: f64 = 0.1;
const LYAPUNOV_MAX_STEPS: usize = 64;
const LYAPUNOV_TOLERANCE: f64 = 1e-12;

/// A fitted regression-with-SARIMA-errors model.
#[derive(Debug, Clone)]
pub struct FittedSarimax {
    /// Order of the error process.
    pub order: ModelOrder,
    /// Coefficient of the exogenous regressor (0 when not identifiable).
    pub beta: f64,
    /// Non-seasonal AR coefficients.
    pub ar: Vec<f64>,
    /// Non-seasonal MA coefficients.
    pub ma: Vec<f64>,
    /// Seasonal AR coefficients.
    pub seasonal_ar: Vec<f64>,
    /// Seasonal MA coefficients.
    pub seasonal_ma: Vec<f64>,
    /// Innovation variance estimate (`None` when the fit was skipped).
    pub sigma2: Option<f64>,
    /// Maximized log-likelihood (`None` when the fit was skipped).
    pub log_likelihood: Option<f64>,
    /// Optimizer iterations used.
    pub iterations: usize,
    /// Whether the parameters came out of the optimizer.
    pub optimized: bool,
    difference: Vec<f64>,
    state_space: StateSpace,
}

/// Fits the model to `y` with regressor `x`.
///
/// When the differenced series is too short or has no variance the
/// likelihood is flat; the starting parameters are kept and the model
/// behaves as seasonal persistence.
///
/// # Errors
///
/// * [`ForecastError::ModelFit`] if `y` and `x` differ in length, the
///   optimizer does not converge, or the likelihood is not finite
pub fn fit(
    y: &[f64],
    x: &[f64],
    order: ModelOrder,
    options: &NelderMeadOptions,
) -> Result<FittedSarimax, ForecastError> {
    if y.len() != x.len() {
        return Err(ForecastError::ModelFit {
            message: format!(
                "series has {} observations but regressor has {}",
                y.len(),
                x.len()
            ),
        });
    }

    let difference = differencing_polynomial(order);
    let dx = apply_difference(&difference, x);
    let dy = apply_difference(&difference, y);

    let estimate_beta = variance(&dx) > MIN_VARIANCE;
    let beta_start = if estimate_beta {
        dot(&dx, &dy) / dot(&dx, &dx)
    } else {
        log::debug!("Differenced regressor is constant; fixing its coefficient at 0");
        0.0
    };

    let layout = Layout {
        order,
        estimate_beta,
    };
    let mut start = vec![START_VALUE; layout.arma_len()];
    if estimate_beta {
        start.push(beta_start);
    }

    let w_start = apply_difference(&difference, &residual(y, x, beta_start));
    if w_start.len() < start.len() + 2 || variance(&w_start) < MIN_VARIANCE {
        log::info!(
            "Differenced series has {} usable observations and variance {:.3e}; skipping optimization",
            w_start.len(),
            variance(&w_start)
        );
        return Ok(layout.build(&start, difference, None, 0, false));
    }

    let mut bounds = vec![(-PARAM_BOUND, PARAM_BOUND); layout.arma_len()];
    if estimate_beta {
        bounds.push((f64::NEG_INFINITY, f64::INFINITY));
    }

    let minimum = optimize::minimize(
        |u| layout.objective(u, y, x, &difference),
        &start,
        &bounds,
        options,
    );

    if !minimum.value.is_finite() || minimum.x.iter().any(|v| !v.is_finite()) {
        return Err(ForecastError::ModelFit {
            message: format!("likelihood is not finite (objective {})", minimum.value),
        });
    }
    if !minimum.converged {
        return Err(ForecastError::ModelFit {
            message: format!(
                "optimizer did not converge within {} iterations",
                minimum.iterations
            ),
        });
    }

    log::debug!(
        "SARIMAX {order} converged after {} iterations (objective {:.4})",
        minimum.iterations,
        minimum.value
    );

    Ok(layout.build(
        &minimum.x,
        difference,
        Some((y, x)),
        minimum.iterations,
        true,
    ))
}

impl FittedSarimax {
    /// One-step-ahead predictions of `y`.
    ///
    /// Returns `y.len() + 1` entries: entry `t < n` predicts `y[t]` from
    /// `y[..t]` and `x[..=t]`, and entry `n` predicts the month after the
    /// series using `x_next` as the regressor value.
    ///
    /// The differenced filter needs `difference.len() - 1` prior months
    /// (13 for `d = D = 1, s = 12`). Inside that window the error term is a
    /// persistence forecast, `z[t-1]`, so those entries are naive
    /// last-value predictions shifted by `beta * x_t` rather than model
    /// output. Entry 0 has no history and is `None`.
    #[must_use]
    pub fn predict(&self, y: &[f64], x: &[f64], x_next: f64) -> Vec<Option<f64>> {
        let n = y.len().min(x.len());
        let window = self.difference.len() - 1;
        let z = residual(&y[..n], &x[..n], self.beta);
        let w = apply_difference(&self.difference, &z);
        let filtered = self.state_space.filter(&w);

        (0..=n)
            .map(|t| {
                let x_t = if t < n { x[t] } else { x_next };
                let error = if t >= window {
                    let lagged: f64 = (1..=window)
                        .map(|k| -self.difference[k] * z[t - k])
                        .sum();
                    lagged + filtered.predictions[t - window]
                } else if t >= 1 {
                    z[t - 1]
                } else {
                    return None;
                };
                Some(self.beta.mul_add(x_t, error))
            })
            .collect()
    }
}

/// Maps the optimizer's parameter vector onto model coefficients.
#[derive(Debug, Clone, Copy)]
struct Layout {
    order: ModelOrder,
    estimate_beta: bool,
}

impl Layout {
    const fn arma_len(&self) -> usize {
        self.order.p + self.order.q + self.order.seasonal.p + self.order.seasonal.q
    }

    fn decode(&self, u: &[f64]) -> Coefficients {
        let ModelOrder { p, q, seasonal, .. } = self.order;
        let mut iter = u.iter().copied();
        let mut take = |count: usize| -> Vec<f64> {
            iter.by_ref().take(count).map(f64::tanh).collect()
        };
        let ar = take(p);
        let ma = take(q);
        let seasonal_ar = take(seasonal.p);
        let seasonal_ma = take(seasonal.q);
        let beta = if self.estimate_beta {
            u.get(self.arma_len()).copied().unwrap_or(0.0)
        } else {
            0.0
        };

        Coefficients {
            ar,
            ma,
            seasonal_ar,
            seasonal_ma,
            beta,
        }
    }

    /// Negative concentrated log-likelihood, up to a constant.
    fn objective(&self, u: &[f64], y: &[f64], x: &[f64], difference: &[f64]) -> f64 {
        let coefficients = self.decode(u);
        let state_space = StateSpace::new(&coefficients, self.order.seasonal.period);
        let w = apply_difference(difference, &residual(y, x, coefficients.beta));
        let filtered = state_space.filter(&w);

        match filtered.concentrated() {
            Some((sigma2, sum_log_f)) => {
                #[allow(clippy::cast_precision_loss)]
                let n = w.len() as f64;
                0.5 * n.mul_add(sigma2.ln(), sum_log_f)
            }
            None => f64::INFINITY,
        }
    }

    fn build(
        &self,
        u: &[f64],
        difference: Vec<f64>,
        data: Option<(&[f64], &[f64])>,
        iterations: usize,
        optimized: bool,
    ) -> FittedSarimax {
        let coefficients = self.decode(u);
        let state_space = StateSpace::new(&coefficients, self.order.seasonal.period);

        let concentrated = data.and_then(|(y, x)| {
            let w = apply_difference(&difference, &residual(y, x, coefficients.beta));
            #[allow(clippy::cast_precision_loss)]
            let n = w.len() as f64;
            state_space
                .filter(&w)
                .concentrated()
                .map(|(sigma2, sum_log_f)| {
                    let constant = n * (1.0 + (2.0 * std::f64::consts::PI).ln());
                    let log_likelihood = -0.5 * (n.mul_add(sigma2.ln(), sum_log_f) + constant);
                    (sigma2, log_likelihood)
                })
        });

        FittedSarimax {
            order: self.order,
            beta: coefficients.beta,
            ar: coefficients.ar,
            ma: coefficients.ma,
            seasonal_ar: coefficients.seasonal_ar,
            seasonal_ma: coefficients.seasonal_ma,
            sigma2: concentrated.map(|(sigma2, _)| sigma2),
            log_likelihood: concentrated.map(|(_, ll)| ll),
            iterations,
            optimized,
            difference,
            state_space,
        }
    }
}

#[derive(Debug, Clone)]
struct Coefficients {
    ar: Vec<f64>,
    ma: Vec<f64>,
    seasonal_ar: Vec<f64>,
    seasonal_ma: Vec<f64>,
    beta: f64,
}

/// Harvey-form state space of a zero-mean ARMA process with unit
/// innovation variance.
#[derive(Debug, Clone)]
struct StateSpace {
    /// Companion transition matrix `T`.
    transition: DMatrix<f64>,
    /// `R R'` for the selection vector `R = [1, b_1, ..., b_{r-1}]`.
    disturbance: DMatrix<f64>,
    /// Stationary state covariance.
    initial_cov: DMatrix<f64>,
}

struct FilterOutput {
    /// Predicted observation before each update, plus one past the end.
    predictions: Vec<f64>,
    sum_sq: f64,
    sum_log_f: f64,
    nobs: usize,
    valid: bool,
}

impl FilterOutput {
    /// `(sigma2_hat, sum ln F)`, or `None` when the filter broke down.
    #[allow(clippy::cast_precision_loss)]
    fn concentrated(&self) -> Option<(f64, f64)> {
        if !self.valid || self.nobs == 0 {
            return None;
        }
        let sigma2 = self.sum_sq / self.nobs as f64;
        (sigma2 > 0.0 && sigma2.is_finite() && self.sum_log_f.is_finite())
            .then_some((sigma2, self.sum_log_f))
    }
}

impl StateSpace {
    fn new(coefficients: &Coefficients, period: usize) -> Self {
        let ar_poly = poly_mul(
            &lag_polynomial(&coefficients.ar, 1, -1.0),
            &lag_polynomial(&coefficients.seasonal_ar, period, -1.0),
        );
        let ma_poly = poly_mul(
            &lag_polynomial(&coefficients.ma, 1, 1.0),
            &lag_polynomial(&coefficients.seasonal_ma, period, 1.0),
        );

        let dim = (ar_poly.len() - 1).max(ma_poly.len()).max(1);

        let first_column: Vec<f64> = (0..dim)
            .map(|i| ar_poly.get(i + 1).map_or(0.0, |c| -c))
            .collect();
        let transition = companion(&first_column);

        let selection = DVector::from_fn(dim, |i, _| ma_poly.get(i).copied().unwrap_or(0.0));
        let disturbance = &selection * selection.transpose();

        let initial_cov = stationary_covariance(&transition, &disturbance);

        Self {
            transition,
            disturbance,
            initial_cov,
        }
    }

    fn dim(&self) -> usize {
        self.transition.nrows()
    }

    /// `T P T' + R R'`.
    fn propagate(&self, cov: &DMatrix<f64>) -> DMatrix<f64> {
        &self.transition * cov * self.transition.transpose() + &self.disturbance
    }

    fn filter(&self, observations: &[f64]) -> FilterOutput {
        let mut state = DVector::<f64>::zeros(self.dim());
        let mut cov = self.initial_cov.clone();

        let mut predictions = Vec::with_capacity(observations.len() + 1);
        let mut sum_sq = 0.0;
        let mut sum_log_f = 0.0;
        let mut valid = true;

        for &obs in observations {
            predictions.push(state[0]);

            let f = cov[(0, 0)];
            if !(f.is_finite() && f > 0.0) {
                valid = false;
                predictions.extend(std::iter::repeat_n(
                    state[0],
                    observations.len() + 1 - predictions.len(),
                ));
                break;
            }

            let v = obs - state[0];
            sum_sq += v * v / f;
            sum_log_f += f.ln();

            let gain = cov.column(0) / f;
            state.axpy(v, &gain, 1.0);
            let correction = &gain * cov.row(0);
            cov -= correction;

            state = &self.transition * state;
            cov = self.propagate(&cov);
        }

        if valid {
            predictions.push(state[0]);
        }

        FilterOutput {
            predictions,
            sum_sq,
            sum_log_f,
            nobs: observations.len(),
            valid,
        }
    }
}

/// Companion matrix with `first_column` down column 0 and ones on the
/// superdiagonal.
fn companion(first_column: &[f64]) -> DMatrix<f64> {
    let dim = first_column.len();
    DMatrix::from_fn(dim, dim, |i, j| {
        if j == 0 {
            first_column[i]
        } else if j == i + 1 {
            1.0
        } else {
            0.0
        }
    })
}

/// Solves `P = T P T' + Q` by the doubling algorithm.
fn stationary_covariance(transition: &DMatrix<f64>, disturbance: &DMatrix<f64>) -> DMatrix<f64> {
    let mut power = transition.clone();
    let mut cov = disturbance.clone();

    for _ in 0..LYAPUNOV_MAX_STEPS {
        let increment = &power * &cov * power.transpose();
        cov += &increment;
        let change = increment.amax();
        if !change.is_finite() || change <= LYAPUNOV_TOLERANCE * cov.amax().max(1.0) {
            break;
        }
        power = &power * &power;
    }

    cov
}

/// `1 + sign * sum_i c_i B^(i * step)` as a coefficient vector.
fn lag_polynomial(coefficients: &[f64], step: usize, sign: f64) -> Vec<f64> {
    let mut poly = vec![0.0; coefficients.len() * step + 1];
    poly[0] = 1.0;
    for (i, c) in coefficients.iter().enumerate() {
        poly[(i + 1) * step] = sign * c;
    }
    poly
}

fn poly_mul(a: &[f64], b: &[f64]) -> Vec<f64> {
    let mut out = vec![0.0; a.len() + b.len() - 1];
    for (i, x) in a.iter().enumerate() {
        for (j, y) in b.iter().enumerate() {
            out[i + j] += x * y;
        }
    }
    out
}

/// `(1-B)^d (1-B^s)^D`.
fn differencing_polynomial(order: ModelOrder) -> Vec<f64> {
    let mut poly = vec![1.0];
    for _ in 0..order.d {
        poly = poly_mul(&poly, &[1.0, -1.0]);
    }
    for _ in 0..order.seasonal.d {
        poly = poly_mul(&poly, &lag_polynomial(&[1.0], order.seasonal.period, -1.0));
    }
    poly
}

/// Applies a differencing polynomial; the output starts at index
/// `difference.len() - 1` of the input.
fn apply_difference(difference: &[f64], series: &[f64]) -> Vec<f64> {
    let window = difference.len() - 1;
    (window..series.len())
        .map(|t| {
            difference
                .iter()
                .enumerate()
                .map(|(k, c)| c * series[t - k])
                .sum()
        })
        .collect()
}

fn residual(y: &[f64], x: &[f64], beta: f64) -> Vec<f64> {
    y.iter().zip(x).map(|(y, x)| (-beta).mul_add(*x, *y)).collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(a, b)| a * b).sum()
}

#[allow(clippy::cast_precision_loss)]
fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use float_cmp::assert_approx_eq;
    use ward_patrol_forecast_models::SeasonalOrder;

    use super::*;

    fn order(p: usize, q: usize) -> ModelOrder {
        ModelOrder {
            p,
            d: 1,
            q,
            seasonal: SeasonalOrder {
                p,
                d: 1,
                q,
                period: 12,
            },
        }
    }

    #[test]
    fn differencing_polynomial_expands_seasonal_product() {
        let poly = differencing_polynomial(order(1, 0));
        assert_eq!(poly.len(), 14);
        assert_approx_eq!(f64, poly[0], 1.0);
        assert_approx_eq!(f64, poly[1], -1.0);
        assert_approx_eq!(f64, poly[12], -1.0);
        assert_approx_eq!(f64, poly[13], 1.0);
        assert!(poly[2..12].iter().all(|c| *c == 0.0));
    }

    #[test]
    fn stationary_covariance_matches_ar1_variance() {
        // AR(1) with phi = 0.5: var = 1 / (1 - 0.25)
        let cov = stationary_covariance(&companion(&[0.5]), &DMatrix::identity(1, 1));
        assert_approx_eq!(f64, cov[(0, 0)], 4.0 / 3.0, epsilon = 1e-10);
    }

    #[test]
    fn stationary_covariance_matches_ma1_variance() {
        // MA(1) with theta = 0.4: var = 1 + 0.16
        let selection = DVector::from_vec(vec![1.0, 0.4]);
        let cov = stationary_covariance(
            &companion(&[0.0, 0.0]),
            &(&selection * selection.transpose()),
        );
        assert_approx_eq!(f64, cov[(0, 0)], 1.16, epsilon = 1e-10);
    }

    #[test]
    fn companion_shifts_state_up() {
        let t = companion(&[0.3, -0.2, 0.1]);
        let state = DVector::from_vec(vec![2.0, 5.0, 7.0]);
        let next = &t * state;
        assert_approx_eq!(f64, next[0], 0.3f64.mul_add(2.0, 5.0));
        assert_approx_eq!(f64, next[1], (-0.2f64).mul_add(2.0, 7.0));
        assert_approx_eq!(f64, next[2], 0.1 * 2.0);
    }

    #[test]
    fn propagate_adds_selection_outer_product() {
        let coefficients = Coefficients {
            ar: vec![0.3],
            ma: vec![0.2],
            seasonal_ar: vec![],
            seasonal_ma: vec![],
            beta: 0.0,
        };
        let ss = StateSpace::new(&coefficients, 12);
        let cov = DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5, 1.0]);

        // T = [[0.3, 1], [0, 0]], R = [1, 0.2]
        let expected = [[2.48, 0.2], [0.2, 0.04]];
        let got = ss.propagate(&cov);
        for (i, row) in expected.iter().enumerate() {
            for (j, value) in row.iter().enumerate() {
                assert_approx_eq!(f64, got[(i, j)], *value, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn constant_series_predicts_persistence() {
        let y = vec![7.0; 30];
        let x = vec![5.0; 30];
        let model = fit(&y, &x, order(1, 1), &NelderMeadOptions::default()).unwrap();
        assert!(!model.optimized);
        assert_approx_eq!(f64, model.beta, 0.0);

        let predictions = model.predict(&y, &x, 5.0);
        assert_eq!(predictions.len(), 31);
        assert!(predictions[0].is_none());
        for value in predictions.iter().skip(1) {
            assert_approx_eq!(f64, value.unwrap(), 7.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn fits_noisy_seasonal_series() {
        let y: Vec<f64> = (0..48)
            .map(|t: i32| {
                let season = (f64::from(t) * std::f64::consts::PI / 6.0).sin();
                let noise = f64::from((t * 37 + 11) % 17) / 17.0 - 0.5;
                4.0f64.mul_add(season, 20.0) + noise + 0.1 * f64::from(t)
            })
            .collect();
        let x: Vec<f64> = (0..48).map(|t: i32| 4.0 + f64::from(t % 3) * 0.5).collect();

        let model = fit(&y, &x, order(1, 0), &NelderMeadOptions::default()).unwrap();
        assert!(model.optimized);
        assert!(model.log_likelihood.is_some_and(f64::is_finite));
        assert!(model.ar.iter().all(|c| c.abs() < 1.0));

        let predictions = model.predict(&y, &x, 4.0);
        assert!(predictions.iter().skip(1).all(|p| p.is_some_and(f64::is_finite)));

        // inside the 13-month differencing window the error term is the
        // previous month's error
        for t in 1..13 {
            let persisted = model.beta.mul_add(-x[t - 1], y[t - 1]);
            assert_approx_eq!(
                f64,
                predictions[t].unwrap(),
                model.beta.mul_add(x[t], persisted),
                epsilon = 1e-9
            );
        }
    }

    #[test]
    fn rejects_mismatched_lengths() {
        let result = fit(&[1.0, 2.0], &[1.0], order(1, 0), &NelderMeadOptions::default());
        assert!(matches!(result, Err(ForecastError::ModelFit { .. })));
    }
}
