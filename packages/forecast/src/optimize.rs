//! Bounded Nelder-Mead simplex minimizer.

/// Tuning knobs for [`minimize`].
#[derive(Debug, Clone, Copy)]
pub struct NelderMeadOptions {
    /// Maximum number of iterations before giving up.
    pub max_iterations: usize,
    /// Convergence threshold on the spread of objective values.
    pub fatol: f64,
    /// Convergence threshold on the spread of simplex vertices.
    pub xatol: f64,
    /// Relative step used to build the initial simplex.
    pub initial_step: f64,
}

impl Default for NelderMeadOptions {
    fn default() -> Self {
        Self {
            max_iterations: 5000,
            fatol: 1e-8,
            xatol: 1e-6,
            initial_step: 0.05,
        }
    }
}

/// Minimizer output.
#[derive(Debug, Clone)]
pub struct Minimum {
    /// Best point found.
    pub x: Vec<f64>,
    /// Objective value at `x`.
    pub value: f64,
    /// Iterations run.
    pub iterations: usize,
    /// Whether both tolerances were met before `max_iterations`.
    pub converged: bool,
}

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

/// Minimizes `objective` starting from `start`, keeping every coordinate
/// inside `bounds` by clipping.
///
/// Non-finite objective values are treated as `+inf` so the simplex moves
/// away from them.
pub fn minimize<F>(
    mut objective: F,
    start: &[f64],
    bounds: &[(f64, f64)],
    options: &NelderMeadOptions,
) -> Minimum
where
    F: FnMut(&[f64]) -> f64,
{
    let dim = start.len();
    let clip = |x: &mut [f64]| {
        for (value, &(lo, hi)) in x.iter_mut().zip(bounds) {
            *value = value.clamp(lo, hi);
        }
    };
    let mut eval = |x: &[f64]| {
        let value = objective(x);
        if value.is_finite() { value } else { f64::INFINITY }
    };

    let mut origin = start.to_vec();
    clip(&mut origin);

    if dim == 0 {
        let value = eval(&origin);
        return Minimum {
            x: origin,
            value,
            iterations: 0,
            converged: true,
        };
    }

    let mut simplex: Vec<(Vec<f64>, f64)> = Vec::with_capacity(dim + 1);
    let value = eval(&origin);
    simplex.push((origin.clone(), value));
    for i in 0..dim {
        let mut vertex = origin.clone();
        vertex[i] = if vertex[i] == 0.0 {
            0.00025
        } else {
            (1.0 + options.initial_step) * vertex[i]
        };
        clip(&mut vertex);
        let value = eval(&vertex);
        simplex.push((vertex, value));
    }

    let mut iterations = 0;
    let mut converged = false;

    while iterations < options.max_iterations {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));

        let best = &simplex[0];
        let f_spread = simplex
            .iter()
            .skip(1)
            .map(|(_, f)| (f - best.1).abs())
            .fold(0.0, f64::max);
        let x_spread = simplex
            .iter()
            .skip(1)
            .flat_map(|(x, _)| x.iter().zip(&best.0).map(|(a, b)| (a - b).abs()))
            .fold(0.0, f64::max);
        if (f_spread <= options.fatol || f_spread.is_nan()) && x_spread <= options.xatol {
            converged = true;
            break;
        }

        iterations += 1;

        #[allow(clippy::cast_precision_loss)]
        let centroid: Vec<f64> = (0..dim)
            .map(|i| simplex[..dim].iter().map(|(x, _)| x[i]).sum::<f64>() / dim as f64)
            .collect();

        let worst_value = simplex[dim].1;
        let second_worst = simplex[dim - 1].1;
        let best_value = simplex[0].1;

        let toward = |coefficient: f64, from: &[f64]| -> Vec<f64> {
            let mut point: Vec<f64> = centroid
                .iter()
                .zip(from)
                .map(|(c, w)| coefficient.mul_add(c - w, *c))
                .collect();
            clip(&mut point);
            point
        };

        let reflected = toward(REFLECTION, &simplex[dim].0);
        let reflected_value = eval(&reflected);

        if reflected_value < best_value {
            let expanded = toward(EXPANSION, &simplex[dim].0);
            let expanded_value = eval(&expanded);
            simplex[dim] = if expanded_value < reflected_value {
                (expanded, expanded_value)
            } else {
                (reflected, reflected_value)
            };
            continue;
        }

        if reflected_value < second_worst {
            simplex[dim] = (reflected, reflected_value);
            continue;
        }

        let (contracted, contracted_value) = if reflected_value < worst_value {
            let point = toward(CONTRACTION, &simplex[dim].0);
            let value = eval(&point);
            (point, value)
        } else {
            let point = toward(-CONTRACTION, &simplex[dim].0);
            let value = eval(&point);
            (point, value)
        };

        if contracted_value < worst_value.min(reflected_value) {
            simplex[dim] = (contracted, contracted_value);
            continue;
        }

        let anchor = simplex[0].0.clone();
        for (vertex, value) in simplex.iter_mut().skip(1) {
            for (x, a) in vertex.iter_mut().zip(&anchor) {
                *x = SHRINK.mul_add(*x - a, *a);
            }
            clip(vertex);
            *value = eval(vertex);
        }
    }

    simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
    let (x, value) = simplex.swap_remove(0);

    Minimum {
        x,
        value,
        iterations,
        converged,
    }
}
