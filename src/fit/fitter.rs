//! Joint Poisson maximum-likelihood fit of the free model parameters.
//!
//! Given:
//! - datasets (each with its own fit/safe masks)
//! - a model set with some parameters left free
//!
//! we minimize the summed Cash statistic over every dataset with damped
//! Newton (Levenberg–Marquardt) steps. Gradient and Hessian come from
//! central finite differences in parameters scaled by their starting value,
//! so an amplitude of `1e-12` and an index of `2` take comparable steps.
//!
//! Datasets are evaluated in parallel for each statistic evaluation.

use nalgebra::{DMatrix, DVector};
use ndarray::Array3;
use rayon::prelude::*;

use crate::data::{Dataset, Datasets};
use crate::error::AppError;
use crate::fit::evaluator::MapEvaluator;
use crate::fit::likelihood::cash_sum;
use crate::math::solve_svd;
use crate::models::{Models, ParameterRef};

/// Final value of one free parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedParameter {
    /// `component.parameter`.
    pub label: String,
    pub initial: f64,
    pub value: f64,
}

#[derive(Debug, Clone)]
pub struct FitResult {
    pub success: bool,
    pub iterations: usize,
    pub initial_stat: f64,
    pub total_stat: f64,
    pub message: String,
    pub parameters: Vec<FittedParameter>,
}

/// Optimizer seam used by the background stage.
pub trait Fitter: Send + Sync {
    /// Fit the free parameters of `models` to `datasets`, writing the best-fit
    /// values back into `models`.
    fn run(&self, datasets: &Datasets, models: &mut Models) -> Result<FitResult, AppError>;
}

#[derive(Debug, Clone)]
pub struct PoissonFit {
    pub max_iter: usize,
    /// Relative change of the statistic below which the fit has converged.
    pub tolerance: f64,
    /// Step size (scaled units) below which the fit has converged.
    pub step_tolerance: f64,
    /// Finite-difference step in scaled units.
    pub fd_step: f64,
    /// Gradient norm, relative to the statistic, that counts as stationary
    /// when no step was ever accepted.
    pub gradient_tolerance: f64,
}

impl Default for PoissonFit {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tolerance: 1e-10,
            step_tolerance: 1e-7,
            fd_step: 1e-3,
            gradient_tolerance: 1e-6,
        }
    }
}

const LAMBDA_START: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e12;

impl Fitter for PoissonFit {
    fn run(&self, datasets: &Datasets, models: &mut Models) -> Result<FitResult, AppError> {
        let free = models.free_parameters();
        if free.is_empty() {
            return Err(AppError::config("no free parameters to fit"));
        }
        if datasets.is_empty() {
            return Err(AppError::config("no datasets to fit"));
        }

        let mut objective = Objective::new(datasets, models, &free)?;
        let initial: Vec<f64> = free
            .iter()
            .map(|r| models.parameter(*r).map(|p| p.value).unwrap_or(f64::NAN))
            .collect();
        let x0 = DVector::from_iterator(free.len(), initial.iter().zip(&objective.scales).map(|(v, s)| v / s));

        let mut x = x0.clone();
        let mut f = objective.eval(&x)?;
        let initial_stat = f;
        log::debug!("fit start: {} free parameters, stat = {f:.4}", free.len());

        let mut lambda = LAMBDA_START;
        let mut iterations = 0;
        let mut accepted = 0;
        let mut converged = false;
        let mut message = String::new();

        if !f.is_finite() {
            message = "non-finite statistic at start values".to_string();
        }

        while f.is_finite() && !converged && iterations < self.max_iter {
            iterations += 1;
            let (g, h) = objective.derivatives(&x, f, self.fd_step)?;
            if g.iter().chain(h.iter()).any(|v| !v.is_finite()) {
                message = format!("non-finite derivatives at iteration {iterations}");
                break;
            }

            loop {
                let mut a = h.clone();
                for i in 0..a.nrows() {
                    a[(i, i)] += lambda * h[(i, i)].abs().max(1e-12);
                }
                let step = solve_svd(&a, &(-&g));
                let trial = step.map(|s| &x + s);
                let ft = match &trial {
                    Some(t) => objective.eval(t)?,
                    None => f64::NAN,
                };

                if let (Some(t), true) = (trial, ft.is_finite() && ft < f) {
                    let dstat = f - ft;
                    let dx = (&t - &x).norm();
                    x = objective.clamped(&t);
                    f = ft;
                    accepted += 1;
                    lambda = (lambda / 10.0).max(LAMBDA_MIN);
                    if dstat <= self.tolerance * f.abs().max(1.0) || dx <= self.step_tolerance {
                        converged = true;
                        message = "converged".to_string();
                    }
                    break;
                }

                lambda *= 10.0;
                if lambda > LAMBDA_MAX {
                    // No direction lowers the statistic any more.
                    let gradient = objective.projected(&x, &g).norm();
                    (converged, message) = stalled(accepted, gradient, self.gradient_tolerance * f.abs().max(1.0));
                    break;
                }
            }
            log::debug!("fit iteration {iterations}: stat = {f:.4}, lambda = {lambda:.1e}");
        }

        if !converged && message.is_empty() {
            message = format!("did not converge after {iterations} iterations");
        }

        let mut parameters = Vec::with_capacity(free.len());
        for (i, r) in free.iter().enumerate() {
            let value = models.set_value(*r, x[i] * objective.scales[i]).unwrap_or(f64::NAN);
            parameters.push(FittedParameter {
                label: models.label(*r),
                initial: initial[i],
                value,
            });
        }

        Ok(FitResult {
            success: converged,
            iterations,
            initial_stat,
            total_stat: f,
            message,
            parameters,
        })
    }
}

/// Outcome once damping can no longer lower the statistic.
fn stalled(accepted: usize, gradient: f64, tolerance: f64) -> (bool, String) {
    if accepted > 0 || gradient <= tolerance {
        (true, "converged (no further improvement)".to_string())
    } else {
        (
            false,
            format!("no step lowered the statistic from the start values (|g| = {gradient:.3e})"),
        )
    }
}

/// Cash statistic as a function of the scaled free parameters.
struct Objective<'a> {
    evaluators: Vec<MapEvaluator<'a>>,
    masks: Vec<Option<Array3<bool>>>,
    models: Models,
    free: Vec<ParameterRef>,
    scales: Vec<f64>,
}

impl<'a> Objective<'a> {
    fn new(datasets: &'a Datasets, models: &Models, free: &[ParameterRef]) -> Result<Self, AppError> {
        let evaluators = datasets.iter().map(MapEvaluator::new).collect::<Result<Vec<_>, _>>()?;
        let masks = datasets.iter().map(Dataset::mask).collect();
        let scales = free
            .iter()
            .map(|r| {
                let v = models.parameter(*r).map(|p| p.value.abs()).unwrap_or(0.0);
                if v.is_finite() && v > 0.0 { v } else { 1.0 }
            })
            .collect();
        Ok(Self {
            evaluators,
            masks,
            models: models.clone(),
            free: free.to_vec(),
            scales,
        })
    }

    /// Set the working model to `x` (clamped to bounds) and return the statistic.
    fn eval(&mut self, x: &DVector<f64>) -> Result<f64, AppError> {
        for (i, r) in self.free.iter().enumerate() {
            self.models.set_value(*r, x[i] * self.scales[i]);
        }
        let models = &self.models;
        let stats = self
            .evaluators
            .par_iter_mut()
            .zip(self.masks.par_iter())
            .map(|(ev, mask)| {
                let npred = ev.npred(models)?;
                Ok(cash_sum(&ev.dataset().counts.data, &npred, mask.as_ref()))
            })
            .collect::<Result<Vec<f64>, AppError>>()?;
        Ok(stats.iter().sum())
    }

    /// `x` after the working model applied the parameter bounds.
    fn clamped(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            x.len(),
            self.free.iter().enumerate().map(|(i, r)| match self.models.parameter(*r) {
                Some(p) => p.clamp(x[i] * self.scales[i]) / self.scales[i],
                None => x[i],
            }),
        )
    }

    /// `g` with the components that push a parameter past a bound it sits on
    /// set to zero.
    fn projected(&self, x: &DVector<f64>, g: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            g.len(),
            self.free.iter().enumerate().map(|(i, r)| {
                let value = x[i] * self.scales[i];
                let (at_min, at_max) = match self.models.parameter(*r) {
                    Some(p) => (
                        p.min.is_some_and(|m| value <= m),
                        p.max.is_some_and(|m| value >= m),
                    ),
                    None => (false, false),
                };
                if (at_max && g[i] < 0.0) || (at_min && g[i] > 0.0) { 0.0 } else { g[i] }
            }),
        )
    }

    fn derivatives(&mut self, x: &DVector<f64>, f0: f64, h: f64) -> Result<(DVector<f64>, DMatrix<f64>), AppError> {
        let n = x.len();
        let shifted = |signs: &[(usize, f64)]| {
            let mut y = x.clone();
            for &(i, s) in signs {
                y[i] += s * h;
            }
            y
        };

        let mut g = DVector::zeros(n);
        let mut hess = DMatrix::zeros(n, n);
        for i in 0..n {
            let fp = self.eval(&shifted(&[(i, 1.0)]))?;
            let fm = self.eval(&shifted(&[(i, -1.0)]))?;
            g[i] = (fp - fm) / (2.0 * h);
            hess[(i, i)] = (fp - 2.0 * f0 + fm) / (h * h);
        }
        for i in 0..n {
            for j in (i + 1)..n {
                let fpp = self.eval(&shifted(&[(i, 1.0), (j, 1.0)]))?;
                let fpm = self.eval(&shifted(&[(i, 1.0), (j, -1.0)]))?;
                let fmp = self.eval(&shifted(&[(i, -1.0), (j, 1.0)]))?;
                let fmm = self.eval(&shifted(&[(i, -1.0), (j, -1.0)]))?;
                let v = (fpp - fpm - fmp + fmm) / (4.0 * h * h);
                hess[(i, j)] = v;
                hess[(j, i)] = v;
            }
        }
        Ok((g, hess))
    }
}
