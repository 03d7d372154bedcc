//! Levenberg-Marquardt optimizer for profile fitting.
//!
//! Generic over the parameter count so the circular (6) and elliptical (8)
//! Moffat models share one implementation. Uses f64 throughout.

use crate::math::linear_solver::solve;

/// Configuration for Levenberg-Marquardt optimization.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct LmConfig {
    /// Maximum iterations.
    pub max_iterations: usize,
    /// Convergence threshold for the largest parameter step.
    pub convergence_threshold: f64,
    /// Convergence threshold for the relative change of chi².
    pub chi2_tolerance: f64,
    /// Initial damping parameter.
    pub initial_lambda: f64,
    /// Factor to increase lambda on failed step.
    pub lambda_up: f64,
    /// Factor to decrease lambda on successful step.
    pub lambda_down: f64,
    /// Damping above which the fit is abandoned.
    pub max_lambda: f64,
    /// Project amplitude onto `>= 0` and the shape parameters onto `> 0`
    /// after every step.
    pub bounded: bool,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            convergence_threshold: 1e-8,
            chi2_tolerance: 1e-12,
            initial_lambda: 0.001,
            lambda_up: 10.0,
            lambda_down: 0.1,
            max_lambda: 1e10,
            bounded: true,
        }
    }
}

/// Why an optimization run ended without converging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum Stop {
    #[strum(serialize = "singular normal equations")]
    Singular,
    #[strum(serialize = "iteration limit reached")]
    MaxIterations,
    #[strum(serialize = "damping diverged")]
    DampingDiverged,
    #[strum(serialize = "non-finite parameters")]
    NonFinite,
    #[strum(serialize = "non-physical parameters")]
    Unphysical,
}

/// Result of L-M optimization.
#[derive(Debug, Clone, Copy)]
pub struct LmResult<const N: usize> {
    pub params: [f64; N],
    pub chi2: f64,
    pub iterations: usize,
    /// `None` when the run converged.
    pub stop: Option<Stop>,
}

impl<const N: usize> LmResult<N> {
    pub fn converged(&self) -> bool {
        self.stop.is_none()
    }
}

/// Trait for models that can be fit with L-M optimization.
pub trait LMModel<const N: usize> {
    /// Evaluate the model at a point.
    fn evaluate(&self, x: f64, y: f64, params: &[f64; N]) -> f64;

    /// Compute partial derivatives at a point.
    fn jacobian_row(&self, x: f64, y: f64, params: &[f64; N]) -> [f64; N];

    /// Apply parameter constraints after an update.
    fn constrain(&self, params: &mut [f64; N]);
}

/// Pixel samples a model is fitted against.
#[derive(Debug, Clone, Default)]
pub struct Samples {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
}

impl Samples {
    /// Every pixel of a row-major `width`-wide image; x is the column and
    /// y the row.
    pub fn from_grid(width: usize, values: &[f64]) -> Self {
        let mut samples = Self {
            x: Vec::with_capacity(values.len()),
            y: Vec::with_capacity(values.len()),
            z: Vec::with_capacity(values.len()),
        };
        for (i, &v) in values.iter().enumerate() {
            samples.x.push((i % width) as f64);
            samples.y.push((i / width) as f64);
            samples.z.push(v);
        }
        samples
    }

    pub fn len(&self) -> usize {
        self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }
}

/// Run L-M optimization for an N-parameter model.
pub fn optimize<const N: usize, M: LMModel<N>>(
    model: &M,
    samples: &Samples,
    initial_params: [f64; N],
    config: &LmConfig,
) -> LmResult<N> {
    let mut params = initial_params;
    model.constrain(&mut params);
    let mut lambda = config.initial_lambda;
    let mut prev_chi2 = compute_chi2(model, samples, &params);
    let mut iterations = 0;

    if !prev_chi2.is_finite() {
        return LmResult {
            params,
            chi2: prev_chi2,
            iterations,
            stop: Some(Stop::NonFinite),
        };
    }

    // Pre-allocate buffers once, reuse across iterations
    let mut jacobian = Vec::with_capacity(samples.len());
    let mut residuals = Vec::with_capacity(samples.len());
    let mut stale = true;
    let mut hessian = [[0.0f64; N]; N];
    let mut gradient = [0.0f64; N];

    let stop = loop {
        if iterations >= config.max_iterations {
            break Some(Stop::MaxIterations);
        }
        iterations += 1;

        if stale {
            fill_jacobian_residuals(model, samples, &params, &mut jacobian, &mut residuals);
            (hessian, gradient) = compute_hessian_gradient(&jacobian, &residuals);
            stale = false;
        }

        // Floor the damping term so parameters with a vanishing gradient
        // column (phi when gamma1 == gamma2) keep the system invertible.
        let max_diag = (0..N).fold(0.0f64, |m, i| m.max(hessian[i][i]));
        let floor = max_diag * 1e-9;
        let mut damped_hessian = hessian;
        for (i, row) in damped_hessian.iter_mut().enumerate() {
            row[i] += lambda * row[i].max(floor);
        }

        let Some(delta) = solve(&damped_hessian, &gradient) else {
            break Some(Stop::Singular);
        };

        let mut new_params = params;
        for (p, d) in new_params.iter_mut().zip(delta.iter()) {
            *p += d;
        }
        model.constrain(&mut new_params);
        if new_params.iter().any(|p| !p.is_finite()) {
            break Some(Stop::NonFinite);
        }

        let new_chi2 = compute_chi2(model, samples, &new_params);

        if new_chi2 < prev_chi2 {
            let relative_change = (prev_chi2 - new_chi2) / prev_chi2.max(f64::MIN_POSITIVE);
            params = new_params;
            lambda *= config.lambda_down;
            prev_chi2 = new_chi2;
            stale = true;

            let max_delta = delta.iter().copied().fold(0.0f64, |a, d| a.max(d.abs()));
            if max_delta < config.convergence_threshold
                || relative_change < config.chi2_tolerance
            {
                break None;
            }
        } else {
            // A rejected step that would not move the fit measurably means
            // the current point is already a minimum.
            let max_delta = delta.iter().copied().fold(0.0f64, |a, d| a.max(d.abs()));
            if max_delta < config.convergence_threshold
                || (new_chi2 - prev_chi2).abs() <= config.chi2_tolerance * prev_chi2.abs()
            {
                break None;
            }
            lambda *= config.lambda_up;
            if lambda > config.max_lambda {
                break Some(Stop::DampingDiverged);
            }
        }
    };

    LmResult {
        params,
        chi2: prev_chi2,
        iterations,
        stop,
    }
}

fn compute_chi2<const N: usize, M: LMModel<N>>(
    model: &M,
    samples: &Samples,
    params: &[f64; N],
) -> f64 {
    samples
        .x
        .iter()
        .zip(samples.y.iter())
        .zip(samples.z.iter())
        .map(|((&x, &y), &z)| {
            let residual = z - model.evaluate(x, y, params);
            residual * residual
        })
        .sum()
}

/// Fill jacobian and residuals buffers, reusing existing allocations.
fn fill_jacobian_residuals<const N: usize, M: LMModel<N>>(
    model: &M,
    samples: &Samples,
    params: &[f64; N],
    jacobian: &mut Vec<[f64; N]>,
    residuals: &mut Vec<f64>,
) {
    jacobian.clear();
    residuals.clear();

    for ((&x, &y), &z) in samples.x.iter().zip(samples.y.iter()).zip(samples.z.iter()) {
        jacobian.push(model.jacobian_row(x, y, params));
        residuals.push(z - model.evaluate(x, y, params));
    }
}

/// Compute Hessian (J^T J) and gradient (J^T r) for N-parameter model.
/// Exploits symmetry: only computes upper triangle, then mirrors.
#[allow(clippy::needless_range_loop)]
fn compute_hessian_gradient<const N: usize>(
    jacobian: &[[f64; N]],
    residuals: &[f64],
) -> ([[f64; N]; N], [f64; N]) {
    let mut hessian = [[0.0f64; N]; N];
    let mut gradient = [0.0f64; N];

    for (row, &r) in jacobian.iter().zip(residuals.iter()) {
        for i in 0..N {
            gradient[i] += row[i] * r;
            for j in i..N {
                hessian[i][j] += row[i] * row[j];
            }
        }
    }

    for i in 1..N {
        for j in 0..i {
            hessian[i][j] = hessian[j][i];
        }
    }

    (hessian, gradient)
}
