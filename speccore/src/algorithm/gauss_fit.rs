use nalgebra::{Matrix3, Vector3};
use serde::Serialize;

use crate::error::FitError;

/// Straight line through the first and last point of a fit window.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Baseline {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Baseline {
    pub fn through_endpoints(x: &[f64], y: &[f64]) -> Option<Self> {
        Some(Baseline {
            x0: *x.first()?,
            y0: *y.first()?,
            x1: *x.last()?,
            y1: *y.last()?,
        })
    }

    pub fn slope(&self) -> f64 {
        if self.x1 == self.x0 {
            0.0
        } else {
            (self.y1 - self.y0) / (self.x1 - self.x0)
        }
    }

    #[inline]
    pub fn value_at(&self, x: f64) -> f64 {
        self.y0 + self.slope() * (x - self.x0)
    }
}

/// `amplitude · exp(−(x−mean)²/(2·sigma²))`
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Gaussian {
    pub amplitude: f64,
    pub mean: f64,
    pub sigma: f64,
}

impl Gaussian {
    #[inline]
    pub fn value_at(&self, x: f64) -> f64 {
        let d = x - self.mean;
        self.amplitude * (-d * d / (2.0 * self.sigma * self.sigma)).exp()
    }

    /// Partial derivatives with respect to (amplitude, mean, sigma).
    #[inline]
    fn gradient_at(&self, x: f64) -> Vector3<f64> {
        let d = x - self.mean;
        let s2 = self.sigma * self.sigma;
        let e = (-d * d / (2.0 * s2)).exp();
        Vector3::new(
            e,
            self.amplitude * e * d / s2,
            self.amplitude * e * d * d / (s2 * self.sigma),
        )
    }

    fn from_vector(v: &Vector3<f64>) -> Self {
        Gaussian { amplitude: v[0], mean: v[1], sigma: v[2] }
    }

    fn to_vector(self) -> Vector3<f64> {
        Vector3::new(self.amplitude, self.mean, self.sigma)
    }

    /// Same shape with the least-squares amplitude for `y` over `x`.
    pub fn with_best_amplitude(self, x: &[f64], y: &[f64]) -> Self {
        let unit = Gaussian { amplitude: 1.0, ..self };
        let (num, den) = x.iter().zip(y).fold((0.0, 0.0), |(num, den), (&xi, &yi)| {
            let g = unit.value_at(xi);
            (num + g * yi, den + g * g)
        });
        if den > 0.0 && (num / den).is_finite() {
            Gaussian { amplitude: num / den, ..self }
        } else {
            self
        }
    }

    pub fn fwhm(&self) -> f64 {
        self.sigma.abs() * 2.0 * (2.0 * std::f64::consts::LN_2).sqrt()
    }
}

/// Normal seed for the fit: the residual profile read as a distribution over `x`.
///
/// Mean and standard deviation are the maximum-likelihood estimates with the
/// positive residuals as weights. Negative residuals carry no mass. A window
/// without positive mass is seeded at its centre with a quarter of its span,
/// so the fit is still attempted.
pub fn normal_seed(x: &[f64], residual: &[f64]) -> Result<(f64, f64), FitError> {
    let (lo, hi) = window_bounds(x).ok_or(FitError::DegenerateWindow { len: x.len() })?;
    if x.len() < 3 || x.len() != residual.len() || !(hi > lo) {
        return Err(FitError::DegenerateWindow { len: x.len() });
    }

    let weights = || residual.iter().map(|&r| r.max(0.0));
    let mass: f64 = weights().sum();
    if !(mass > 0.0) {
        return Ok(((lo + hi) / 2.0, (hi - lo) / 4.0));
    }
    let mean = x.iter().zip(weights()).map(|(&xi, w)| xi * w).sum::<f64>() / mass;
    let var = x
        .iter()
        .zip(weights())
        .map(|(&xi, w)| w * (xi - mean).powi(2))
        .sum::<f64>()
        / mass;
    let sigma = var.sqrt();
    if !(sigma > 0.0) || !sigma.is_finite() {
        // all mass on a single point
        return Ok((mean, (hi - lo) / 4.0));
    }
    Ok((mean, sigma))
}

fn window_bounds(x: &[f64]) -> Option<(f64, f64)> {
    let lo = x.iter().copied().reduce(f64::min)?;
    let hi = x.iter().copied().reduce(f64::max)?;
    (lo.is_finite() && hi.is_finite()).then_some((lo, hi))
}

/// Bounded Levenberg–Marquardt solver for a single Gaussian.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GaussianFitter {
    pub max_iterations: usize,
    /// Relative change in the sum of squares at which the fit is converged
    pub tolerance: f64,
}

impl Default for GaussianFitter {
    fn default() -> Self {
        GaussianFitter {
            max_iterations: 200,
            tolerance: 1e-10,
        }
    }
}

const LAMBDA_START: f64 = 1e-3;
const LAMBDA_MAX: f64 = 1e12;

fn sum_sq(model: &Gaussian, x: &[f64], y: &[f64]) -> f64 {
    x.iter()
        .zip(y)
        .map(|(&xi, &yi)| (yi - model.value_at(xi)).powi(2))
        .sum()
}

impl GaussianFitter {
    pub fn new(max_iterations: usize) -> Self {
        GaussianFitter {
            max_iterations,
            ..GaussianFitter::default()
        }
    }

    /// Least-squares fit of `y ≈ gaussian(x)` starting from `seed`.
    ///
    /// The seed amplitude is first replaced by its least-squares value for the
    /// seed's mean and sigma. Steps that move the mean out of the window or
    /// widen sigma beyond the window span are refused and retried with more
    /// damping.
    ///
    /// The returned sigma is always positive. Fails with
    /// [`FitError::NotConverged`] when the iteration budget runs out.
    pub fn fit(&self, x: &[f64], y: &[f64], seed: Gaussian) -> Result<Gaussian, FitError> {
        if x.len() != y.len() || x.len() < 3 {
            return Err(FitError::DegenerateWindow { len: x.len().min(y.len()) });
        }
        let (lo, hi) = window_bounds(x).ok_or(FitError::NonFinite)?;
        let span = hi - lo;
        let admissible = |g: &Gaussian| {
            g.mean >= lo && g.mean <= hi && g.sigma != 0.0 && g.sigma.abs() <= span
        };

        let mut model = seed.with_best_amplitude(x, y);
        let mut params = model.to_vector();
        let mut cost = sum_sq(&model, x, y);
        if !cost.is_finite() {
            return Err(FitError::NonFinite);
        }
        let mut lambda = LAMBDA_START;

        for iteration in 0..self.max_iterations {
            let mut jtj = Matrix3::<f64>::zeros();
            let mut jtr = Vector3::<f64>::zeros();
            for (&xi, &yi) in x.iter().zip(y) {
                let g = model.gradient_at(xi);
                let r = yi - model.value_at(xi);
                jtj += g * g.transpose();
                jtr += g * r;
            }
            if !jtj.iter().all(|v| v.is_finite()) {
                return Err(FitError::NonFinite);
            }

            // retry the step with growing damping until the cost drops
            loop {
                let mut damped = jtj;
                for k in 0..3 {
                    damped[(k, k)] += lambda * jtj[(k, k)].max(1e-12);
                }
                let step = damped.lu().solve(&jtr).ok_or(FitError::Singular)?;
                let trial_params = params + step;
                let trial = Gaussian::from_vector(&trial_params);
                let trial_cost = if admissible(&trial) {
                    sum_sq(&trial, x, y)
                } else {
                    f64::INFINITY
                };

                if trial_cost.is_finite() && trial_cost <= cost {
                    let improvement = cost - trial_cost;
                    // heavily damped steps are short by construction, not converged
                    let nearly_undamped = lambda <= 1.0;
                    params = trial_params;
                    model = trial;
                    lambda = (lambda / 10.0).max(1e-12);
                    if nearly_undamped
                        && (improvement <= self.tolerance * cost.max(f64::MIN_POSITIVE)
                            || step.norm() <= 1e-12 * (params.norm() + 1e-12))
                    {
                        tracing::trace!(iteration, cost = trial_cost, "gaussian fit converged");
                        model.sigma = model.sigma.abs();
                        return Ok(model);
                    }
                    cost = trial_cost;
                    break;
                }

                lambda *= 10.0;
                if lambda > LAMBDA_MAX {
                    // no admissible descent direction left, the current point is a minimum
                    model.sigma = model.sigma.abs();
                    return if model.sigma > 0.0 { Ok(model) } else { Err(FitError::Singular) };
                }
            }
        }

        Err(FitError::NotConverged { iterations: self.max_iterations })
    }
}
