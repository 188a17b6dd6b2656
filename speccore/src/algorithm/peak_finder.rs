use std::time::{Duration, Instant};

use itertools::Itertools;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::algorithm::gauss_fit::{normal_seed, Baseline, Gaussian, GaussianFitter};
use crate::data::coerce::{optional_count, require_count, require_f64, require_object};
use crate::data::samples::SampleSource;
use crate::error::{FitError, Result, SpecError};

/// Only the first candidates of each scale are fitted.
pub const MAX_FITS_PER_SCALE: usize = 2;

/// Acceptance requires `amplitude / scale` above this.
pub const MIN_AMPLITUDE_PER_SCALE: f64 = 2.0;

/// Upper bound for `smoothing` and `max`.
pub const MAX_SCALE: usize = 1 << 16;

/// Peak search parameters, the `finder` object of a request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FinderParams {
    /// Group size for integer-mean smoothing
    pub smoothing: usize,
    pub p_min: usize,
    pub p_max: usize,
    /// Curvature required before the apex
    pub h1: f64,
    /// Negative curvature required at the apex
    pub h2: f64,
    /// Curvature required after the apex
    pub h3: f64,
    pub max_fit_iterations: usize,
    pub scan_budget: Option<Duration>,
}

impl Default for FinderParams {
    fn default() -> Self {
        FinderParams {
            smoothing: 4,
            p_min: 15,
            p_max: 17,
            h1: 4.0,
            h2: 8.0,
            h3: 9.0,
            max_fit_iterations: GaussianFitter::default().max_iterations,
            scan_budget: None,
        }
    }
}

impl FinderParams {
    pub fn validate(&self) -> Result<()> {
        if self.smoothing < 1 {
            return Err(SpecError::validation("finder.smoothing", "must be >= 1"));
        }
        if self.p_min < 1 {
            return Err(SpecError::validation("finder.min", "must be >= 1"));
        }
        if self.smoothing > MAX_SCALE {
            return Err(SpecError::validation(
                "finder.smoothing",
                format!("must be <= {}, got {}", MAX_SCALE, self.smoothing),
            ));
        }
        if self.p_max > MAX_SCALE {
            return Err(SpecError::validation(
                "finder.max",
                format!("must be <= {}, got {}", MAX_SCALE, self.p_max),
            ));
        }
        if self.p_max < self.p_min {
            return Err(SpecError::validation(
                "finder.max",
                format!("must be >= min ({}), got {}", self.p_min, self.p_max),
            ));
        }
        if self.max_fit_iterations < 1 {
            return Err(SpecError::validation("finder.max_fit_iterations", "must be >= 1"));
        }
        Ok(())
    }

    pub fn from_json(payload: &Value) -> Result<Self> {
        let finder = require_object(payload, "", "finder")?;
        let p = "finder";
        let defaults = FinderParams::default();
        let params = FinderParams {
            smoothing: require_count(finder, p, &["smoothing"])?,
            p_max: require_count(finder, p, &["max", "pmax"])?,
            p_min: require_count(finder, p, &["min", "pmin"])?,
            h1: require_f64(finder, p, &["h1"])?,
            h2: require_f64(finder, p, &["h2"])?,
            h3: require_f64(finder, p, &["h3"])?,
            max_fit_iterations: optional_count(finder, p, &["max_fit_iterations"])?
                .unwrap_or(defaults.max_fit_iterations),
            scan_budget: optional_count(finder, p, &["scan_budget_ms"])?
                .map(|ms| Duration::from_millis(ms as u64)),
        };
        params.validate()?;
        Ok(params)
    }
}

/// Integer mean over consecutive, non-overlapping groups of `factor` samples.
///
/// A trailing partial group is dropped, so the output has
/// `samples.len() / factor` values. `factor == 1` returns the input.
///
/// # Example
///
/// ```rust
/// # use speccore::algorithm::peak_finder::smooth;
/// assert_eq!(smooth(&[2, 4, 6, 8, 10, 12], 2), vec![3, 7, 11]);
/// ```
pub fn smooth(samples: &[i64], factor: usize) -> Vec<i64> {
    let factor = factor.max(1);
    samples
        .chunks_exact(factor)
        .map(|group| group.iter().sum::<i64>() / factor as i64)
        .collect()
}

/// Discrete second derivative `y[x+1] − 2·y[x] + y[x−1]` for `x` in `[p, len − p)`.
///
/// Index `j` of the result belongs to sample position `j + p`.
pub fn second_derivative(y: &[i64], p: usize) -> Vec<i64> {
    if p == 0 || y.len() < 2 * p + 1 {
        return Vec::new();
    }
    y.iter()
        .tuple_windows()
        .skip(p - 1)
        .take(y.len() - 2 * p)
        .map(|(&prev, &x, &next)| next - 2 * x + prev)
        .collect()
}

/// Sample positions whose curvature matches a peak at scale `p`.
///
/// `secder` must come from [`second_derivative`] with the same `p`; the
/// returned positions are absolute indices into the smoothed samples,
/// ascending.
pub fn find_candidates(secder: &[i64], p: usize, h1: f64, h2: f64, h3: f64) -> Vec<usize> {
    let m = secder.len();
    if p == 0 || m < 2 * p + 1 {
        return Vec::new();
    }
    (p..m - p)
        .filter(|&i| {
            secder[i - p] as f64 > h1 && (secder[i] as f64) < -h2 && secder[i + p] as f64 > h3
        })
        .map(|i| i + p)
        .collect()
}

/// Coordinate of smoothed sample `index`; samples sit at `1..=len` like channels.
#[inline]
pub fn sample_coordinate(index: usize) -> f64 {
    index as f64 + 1.0
}

/// A fitted peak candidate.
///
/// `position` indexes the smoothed sequence; the fitted mean, the baseline
/// and overlay `x` values are in sample coordinates (see [`sample_coordinate`]).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeakCandidate {
    /// Apex index in the smoothed sequence
    pub position: usize,
    /// Half-window `p` the candidate was found at
    pub scale: usize,
    pub fitted_amplitude: f64,
    pub fitted_mean: f64,
    pub fitted_sigma: f64,
    pub baseline: Baseline,
}

impl PeakCandidate {
    pub fn gaussian(&self) -> Gaussian {
        Gaussian {
            amplitude: self.fitted_amplitude,
            mean: self.fitted_mean,
            sigma: self.fitted_sigma,
        }
    }

    /// `amplitude / p > 2` and `mean > 0`; rejects weak and inverted fits.
    pub fn is_accepted(&self) -> bool {
        self.fitted_amplitude / self.scale as f64 > MIN_AMPLITUDE_PER_SCALE && self.fitted_mean > 0.0
    }
}

/// `gaussian + baseline` over the fit window of an accepted candidate.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OverlayCurve {
    pub candidate: PeakCandidate,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub scales: usize,
    pub candidates: usize,
    pub out_of_bounds: usize,
    pub fits_attempted: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub failed: usize,
    /// The scan budget ran out before `p_max`
    pub truncated: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FinderOutput {
    pub smoothed: Vec<i64>,
    pub overlays: Vec<OverlayCurve>,
    pub report: ScanReport,
}

enum FitOutcome {
    Accepted(OverlayCurve),
    Rejected(PeakCandidate),
    OutOfBounds,
}

/// Multi-scale second-derivative peak search with Gaussian fits.
#[derive(Clone, Debug)]
pub struct PeakFinder {
    params: FinderParams,
    fitter: GaussianFitter,
}

impl PeakFinder {
    pub fn new(params: FinderParams) -> Result<Self> {
        params.validate()?;
        let fitter = GaussianFitter::new(params.max_fit_iterations);
        Ok(PeakFinder { params, fitter })
    }

    pub fn params(&self) -> &FinderParams {
        &self.params
    }

    /// Reads the samples once and scans them.
    pub fn run<S: SampleSource>(&self, source: &mut S) -> std::result::Result<FinderOutput, S::Error> {
        let samples = source.read_samples()?;
        Ok(self.scan(&samples))
    }

    /// Smooths `samples`, then searches scales `p_min..=p_max` in order.
    pub fn scan(&self, samples: &[i64]) -> FinderOutput {
        let smoothed = smooth(samples, self.params.smoothing);
        let mut overlays = Vec::new();
        let mut report = ScanReport::default();
        let started = Instant::now();

        for p in self.params.p_min..=self.params.p_max {
            let over_budget = self.params.scan_budget.is_some_and(|budget| started.elapsed() > budget);
            if p > self.params.p_min && over_budget {
                warn!(scale = p, budget = ?self.params.scan_budget, "scan budget exhausted, remaining scales skipped");
                report.truncated = true;
                break;
            }
            report.scales += 1;

            let secder = second_derivative(&smoothed, p);
            let candidates = find_candidates(&secder, p, self.params.h1, self.params.h2, self.params.h3);
            debug!(scale = p, candidates = candidates.len(), "scanned scale");
            report.candidates += candidates.len();

            for &position in candidates.iter().take(MAX_FITS_PER_SCALE) {
                match self.fit_candidate(&smoothed, position, p) {
                    Ok(FitOutcome::Accepted(curve)) => {
                        report.fits_attempted += 1;
                        report.accepted += 1;
                        overlays.push(curve);
                    }
                    Ok(FitOutcome::Rejected(candidate)) => {
                        report.fits_attempted += 1;
                        report.rejected += 1;
                        debug!(
                            position,
                            scale = p,
                            amplitude = candidate.fitted_amplitude,
                            mean = candidate.fitted_mean,
                            "fit rejected"
                        );
                    }
                    Ok(FitOutcome::OutOfBounds) => report.out_of_bounds += 1,
                    Err(err) => {
                        report.fits_attempted += 1;
                        report.failed += 1;
                        warn!(position, scale = p, error = %err, "gaussian fit failed, candidate skipped");
                    }
                }
            }
        }

        FinderOutput { smoothed, overlays, report }
    }

    fn fit_candidate(&self, y: &[i64], position: usize, p: usize) -> std::result::Result<FitOutcome, FitError> {
        let (lo, hi) = match (position.checked_sub(2 * p), position + 2 * p) {
            (Some(lo), hi) if hi < y.len() => (lo, hi),
            _ => return Ok(FitOutcome::OutOfBounds),
        };

        let x: Vec<f64> = (lo..=hi).map(sample_coordinate).collect();
        let window: Vec<f64> = y[lo..=hi].iter().map(|&v| v as f64).collect();
        let baseline = Baseline::through_endpoints(&x, &window).ok_or(FitError::DegenerateWindow { len: 0 })?;
        let residual: Vec<f64> = x
            .iter()
            .zip(&window)
            .map(|(&xi, &yi)| yi - baseline.value_at(xi))
            .collect();

        let (mean, sigma) = normal_seed(&x, &residual)?;
        let fit = self.fitter.fit(&x, &residual, Gaussian { amplitude: 1.0, mean, sigma })?;

        let candidate = PeakCandidate {
            position,
            scale: p,
            fitted_amplitude: fit.amplitude,
            fitted_mean: fit.mean,
            fitted_sigma: fit.sigma,
            baseline,
        };
        if !candidate.is_accepted() {
            return Ok(FitOutcome::Rejected(candidate));
        }

        let overlay = x.iter().map(|&xi| fit.value_at(xi) + baseline.value_at(xi)).collect();
        Ok(FitOutcome::Accepted(OverlayCurve { candidate, x, y: overlay }))
    }
}
