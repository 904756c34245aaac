//! Ordinary least squares for the small regressions the unit-root test runs.

use nalgebra::{DMatrix, DVector};

/// Result of an OLS fit.
#[derive(Debug, Clone)]
pub struct OlsFit {
    /// Estimated coefficients, one per regressor column.
    pub params: Vec<f64>,
    /// Standard errors of `params`.
    pub std_errors: Vec<f64>,
    /// Sum of squared residuals.
    pub ssr: f64,
    /// Number of observations.
    pub nobs: usize,
}

impl OlsFit {
    /// Gaussian log-likelihood at the fitted parameters.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn log_likelihood(&self) -> f64 {
        let n = self.nobs as f64;
        -n / 2.0 * ((2.0 * std::f64::consts::PI).ln() + (self.ssr / n).ln() + 1.0)
    }

    /// Akaike information criterion.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn aic(&self) -> f64 {
        2.0f64.mul_add(self.params.len() as f64, -2.0 * self.log_likelihood())
    }

    /// t-statistic of coefficient `i`.
    #[must_use]
    pub fn t_value(&self, i: usize) -> f64 {
        self.params[i] / self.std_errors[i]
    }
}

/// Regresses `y` on the row-major design matrix `x`.
///
/// Returns `None` when there are not more observations than regressors or
/// when `X'X` is singular.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn fit(y: &[f64], x: &[Vec<f64>]) -> Option<OlsFit> {
    let n = y.len();
    let k = x.first()?.len();
    if n <= k || x.len() != n || k == 0 || x.iter().any(|row| row.len() != k) {
        return None;
    }

    let design = DMatrix::from_fn(n, k, |i, j| x[i][j]);
    let response = DVector::from_column_slice(y);
    let xtx = design.tr_mul(&design);
    let xty = design.tr_mul(&response);

    let cholesky = xtx.clone().cholesky()?;
    let scale = xtx.diagonal().amax().max(f64::MIN_POSITIVE);
    if cholesky
        .l_dirty()
        .diagonal()
        .iter()
        .any(|&d| d * d <= 1e-10 * scale)
    {
        return None;
    }

    let params = cholesky.solve(&xty);
    let ssr = (response - &design * &params).norm_squared();
    let inverse = cholesky.inverse();

    let sigma2 = ssr / (n - k) as f64;
    let std_errors = (0..k)
        .map(|i| (sigma2 * inverse[(i, i)]).max(0.0).sqrt())
        .collect();

    Some(OlsFit {
        params: params.iter().copied().collect(),
        std_errors,
        ssr,
        nobs: n,
    })
}
