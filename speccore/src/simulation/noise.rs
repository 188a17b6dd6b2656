use rand::distributions::Distribution;
use rand::Rng;
use rand_distr::Poisson;
use statrs::distribution::Normal;

use crate::data::modes::{NegativeRatePolicy, NoiseMode};
use crate::error::{Result, SpecError};
use crate::simulation::stage::{SpectrumStage, StageIssue, StageOutcome};

/// Above this many counts the hybrid model switches to the Gaussian approximation.
pub const GAUSSIAN_APPROX_THRESHOLD: f64 = 10.0;

/// Draws a Poisson count for a strictly positive rate.
fn poisson<R: Rng + ?Sized>(rate: f64, rng: &mut R) -> f64 {
    match Poisson::new(rate) {
        Ok(dist) => dist.sample(rng),
        // rate is checked positive and finite by the caller
        Err(_) => rate,
    }
}

/// Draws from Normal(v, √v), the high-count approximation of Poisson(v).
fn gaussian<R: Rng + ?Sized>(rate: f64, rng: &mut R) -> f64 {
    match Normal::new(rate, rate.sqrt()) {
        Ok(dist) => dist.sample(rng),
        Err(_) => rate,
    }
}

/// Outcome of perturbing a single channel.
enum Draw {
    Value(f64),
    Negative,
}

fn draw_channel<R: Rng + ?Sized>(value: f64, mode: NoiseMode, rng: &mut R) -> Draw {
    match mode {
        NoiseMode::None => Draw::Value(value),
        NoiseMode::Hybrid if value > GAUSSIAN_APPROX_THRESHOLD => Draw::Value(gaussian(value, rng)),
        NoiseMode::Hybrid | NoiseMode::Poisson => {
            if value < 0.0 {
                Draw::Negative
            } else if value == 0.0 {
                // Poisson(0) is degenerate
                Draw::Value(0.0)
            } else {
                Draw::Value(poisson(value, rng))
            }
        }
    }
}

/// Perturbs every channel of `prev` with the selected noise model.
///
/// Negative channel values cannot be Poisson rates. With
/// [`NegativeRatePolicy::Clamp`] they become zero and are reported as
/// [`StageIssue::NegativeRate`]; with [`NegativeRatePolicy::Reject`] the
/// first one fails the stage.
///
/// # Arguments
///
/// * `prev` - The broadened stage, left untouched.
/// * `mode` - Noise model.
/// * `policy` - Handling of negative rates.
/// * `rng` - Random source, seed it for reproducible output.
pub fn apply_noise<R: Rng + ?Sized>(
    prev: &SpectrumStage,
    mode: NoiseMode,
    policy: NegativeRatePolicy,
    rng: &mut R,
) -> Result<StageOutcome> {
    let mut issues = Vec::new();
    let mut intensity = Vec::with_capacity(prev.len());

    for (channel, &value) in prev.intensity.iter().enumerate() {
        if !value.is_finite() {
            return Err(SpecError::validation(
                format!("intensity[{}]", channel),
                format!("cannot draw noise for non-finite value {}", value),
            ));
        }
        match draw_channel(value, mode, rng) {
            Draw::Value(v) => intensity.push(v),
            Draw::Negative => match policy {
                NegativeRatePolicy::Clamp => {
                    issues.push(StageIssue::NegativeRate { channel, value });
                    intensity.push(0.0);
                }
                NegativeRatePolicy::Reject => {
                    return Err(SpecError::NegativeRate { channel, value });
                }
            },
        }
    }

    if !issues.is_empty() {
        tracing::warn!(count = issues.len(), %mode, "negative rates clamped to zero");
    }

    Ok(StageOutcome {
        stage: prev.derive(intensity),
        issues,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn stage(values: Vec<f64>) -> SpectrumStage {
        let channel = (1..=values.len()).map(|c| c as f64).collect();
        SpectrumStage::new(Arc::new(channel), values)
    }

    #[test]
    fn test_poisson_zero_stays_zero() {
        let mut rng = StdRng::seed_from_u64(1);
        let prev = stage(vec![0.0; 500]);
        let out = apply_noise(&prev, NoiseMode::Poisson, NegativeRatePolicy::Clamp, &mut rng).unwrap();
        assert!(out.stage.intensity.iter().all(|&v| v == 0.0));
        assert!(out.issues.is_empty());
    }

    #[test]
    fn test_none_is_identity() {
        let mut rng = StdRng::seed_from_u64(1);
        let prev = stage(vec![-3.0, 0.5, 42.0]);
        let out = apply_noise(&prev, NoiseMode::None, NegativeRatePolicy::Reject, &mut rng).unwrap();
        assert_eq!(out.stage.intensity, prev.intensity);
    }

    #[test]
    fn test_poisson_draws_are_counts_near_rate() {
        let mut rng = StdRng::seed_from_u64(42);
        let prev = stage(vec![5.0; 4000]);
        let out = apply_noise(&prev, NoiseMode::Poisson, NegativeRatePolicy::Clamp, &mut rng).unwrap();
        assert!(out.stage.intensity.iter().all(|&v| v >= 0.0 && v.fract() == 0.0));
        let mean = out.stage.total_intensity() / 4000.0;
        assert!((mean - 5.0).abs() < 0.25, "mean {}", mean);
    }

    #[test]
    fn test_hybrid_uses_gaussian_above_threshold() {
        let mut rng = StdRng::seed_from_u64(7);
        let prev = stage(vec![1000.0; 4000]);
        let out = apply_noise(&prev, NoiseMode::Hybrid, NegativeRatePolicy::Clamp, &mut rng).unwrap();
        // continuous draws, so (almost) none are whole numbers
        let whole = out.stage.intensity.iter().filter(|v| v.fract() == 0.0).count();
        assert!(whole < 10);
        let mean = out.stage.total_intensity() / 4000.0;
        assert!((mean - 1000.0).abs() < 2.0, "mean {}", mean);
    }

    #[test]
    fn test_seeded_noise_is_reproducible() {
        let prev = stage(vec![3.0, 8.0, 20.0, 400.0]);
        let a = apply_noise(&prev, NoiseMode::Hybrid, NegativeRatePolicy::Clamp, &mut StdRng::seed_from_u64(9)).unwrap();
        let b = apply_noise(&prev, NoiseMode::Hybrid, NegativeRatePolicy::Clamp, &mut StdRng::seed_from_u64(9)).unwrap();
        assert_eq!(a.stage.intensity, b.stage.intensity);
    }

    #[test]
    fn test_negative_rate_policies() {
        let prev = stage(vec![4.0, -2.0, 0.0]);
        let mut rng = StdRng::seed_from_u64(3);
        let out = apply_noise(&prev, NoiseMode::Poisson, NegativeRatePolicy::Clamp, &mut rng).unwrap();
        assert_eq!(out.stage.intensity[1], 0.0);
        assert_eq!(out.issues, vec![StageIssue::NegativeRate { channel: 1, value: -2.0 }]);

        let err = apply_noise(&prev, NoiseMode::Hybrid, NegativeRatePolicy::Reject, &mut rng).unwrap_err();
        assert_eq!(err, SpecError::NegativeRate { channel: 1, value: -2.0 });
    }

    #[test]
    fn test_previous_stage_untouched() {
        let prev = stage(vec![50.0, 60.0]);
        let before: Vec<f64> = prev.intensity.to_vec();
        let _ = apply_noise(&prev, NoiseMode::Hybrid, NegativeRatePolicy::Clamp, &mut StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(*prev.intensity, before);
    }
}
