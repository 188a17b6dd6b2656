use std::sync::Arc;

use rand::Rng;
use rayon::prelude::*;
use serde_json::Value;
use tracing::{debug, warn};

use crate::data::config::{Background, Range, SpectrumConfig};
use crate::data::lines::{Line, LineTable};
use crate::data::modes::{BackgroundMode, BroadeningMode, NegativeRatePolicy, NoiseMode, SpectrumOptions};
use crate::error::Result;
use crate::simulation::noise;
use crate::simulation::stage::{SpectrumStage, SpectrumStages, StageIssue, StageKind, StageOutcome};

/// FWHM / σ for a Gaussian, `2·√(2·ln 2)`.
pub const FWHM_TO_SIGMA: f64 = 2.355;

/// Builds the four spectrum stages for one request.
///
/// The channel axis holds the positions `1..=chan_number`. Every stage is a
/// fresh [`SpectrumStage`] that shares this axis; none of them is modified
/// after it is returned.
#[derive(Clone, Debug)]
pub struct SpectrumModel {
    config: SpectrumConfig,
    channel: Arc<Vec<f64>>,
}

impl SpectrumModel {
    pub fn new(config: SpectrumConfig) -> Self {
        let channel = (1..=config.range.chan_number).map(|c| c as f64).collect();
        SpectrumModel {
            config,
            channel: Arc::new(channel),
        }
    }

    /// Validates the `lines`, `background` and `range` sections of a payload.
    pub fn from_json(payload: &Value) -> Result<Self> {
        Ok(SpectrumModel::new(SpectrumConfig::from_json(payload)?))
    }

    pub fn lines(&self) -> &LineTable {
        &self.config.lines
    }

    pub fn background(&self) -> &Background {
        &self.config.background
    }

    pub fn range(&self) -> &Range {
        &self.config.range
    }

    pub fn channel_axis(&self) -> &Arc<Vec<f64>> {
        &self.channel
    }

    /// Largest index `k` with `channel[k] <= target`, `None` if every channel lies above.
    pub fn floor_index(&self, target: f64) -> Option<usize> {
        // axis is strictly increasing, so the masked argmin is a partition point
        match self.channel.partition_point(|&c| c <= target) {
            0 => None,
            n => Some(n - 1),
        }
    }

    /// Channel index a line is deposited at, or the issue explaining why it is not.
    ///
    /// Targets below the first or above the last channel are rejected rather
    /// than clamped, so deposits never pile up on the edge channels.
    fn deposit_index(&self, index: usize, line: &Line) -> std::result::Result<usize, StageIssue> {
        let target = self.config.range.channel_of(line.energy);
        let last = self.channel.last().copied().unwrap_or(0.0);
        let out_of_range = StageIssue::LineOutOfRange {
            line: index,
            energy: line.energy,
            target,
        };
        if target > last {
            return Err(out_of_range);
        }
        self.floor_index(target).ok_or(out_of_range)
    }

    /// Adds point deposits for all lines to `intensity`, returning the skipped lines.
    fn deposit<'a, I>(&self, lines: I, intensity: &mut [f64]) -> Vec<StageIssue>
    where
        I: IntoIterator<Item = (usize, &'a Line)>,
    {
        let mut issues = Vec::new();
        for (i, line) in lines {
            match self.deposit_index(i, line) {
                Ok(k) => intensity[k] += line.intensity,
                Err(issue) => {
                    warn!(line = i, energy = line.energy, "line outside channel range, not deposited");
                    issues.push(issue);
                }
            }
        }
        issues
    }

    /// Stage one: each line's intensity at its floor channel.
    pub fn build_base(&self) -> StageOutcome {
        let mut intensity = vec![0.0; self.channel.len()];
        let issues = self.deposit(self.config.lines.iter().enumerate(), &mut intensity);
        debug!(lines = self.config.lines.len(), skipped = issues.len(), "built raw stage");
        StageOutcome {
            stage: SpectrumStage::new(Arc::clone(&self.channel), intensity),
            issues,
        }
    }

    /// The background model sampled on the channel axis, zeros when disabled.
    pub fn background_component(&self, mode: BackgroundMode) -> Vec<f64> {
        match mode {
            BackgroundMode::Enabled => {
                let bg = self.config.background;
                self.channel.iter().map(|&x| bg.value_at(x)).collect()
            }
            BackgroundMode::Disabled => vec![0.0; self.channel.len()],
        }
    }

    /// Stage two: `prev + background(channel)` pointwise, or a copy of `prev`.
    pub fn apply_background(&self, prev: &SpectrumStage, mode: BackgroundMode) -> SpectrumStage {
        let intensity = prev
            .intensity
            .iter()
            .zip(self.background_component(mode))
            .map(|(&y, bg)| y + bg)
            .collect();
        prev.derive(intensity)
    }

    /// Stage three, derived from stage two with the point deposits taken out.
    ///
    /// `with_background − raw` is the background-inclusive axis without the
    /// lines. In [`BroadeningMode::Fwhm`] every line then adds
    /// `intensity · exp(−(x − t)² / (2σ²))` with `σ = fwhm / 2.355` in channel
    /// units to every channel, so each curve peaks at the line intensity and
    /// holds `intensity · σ · √(2π)` in total. Lines with zero width, and
    /// every line in [`BroadeningMode::None`], are point-deposited like in
    /// [`SpectrumModel::build_base`].
    pub fn apply_broadening(
        &self,
        with_background: &SpectrumStage,
        raw: &SpectrumStage,
        mode: BroadeningMode,
    ) -> StageOutcome {
        let mut intensity: Vec<f64> = with_background
            .intensity
            .iter()
            .zip(raw.intensity.iter())
            .map(|(&total, &deposit)| total - deposit)
            .collect();
        let lines = self.config.lines.iter().enumerate();

        let issues = match mode {
            BroadeningMode::None => self.deposit(lines, &mut intensity),
            BroadeningMode::Fwhm => {
                let (narrow, wide): (Vec<_>, Vec<_>) = lines.partition(|(_, line)| line.fwhm == 0.0);
                let kernels: Vec<GaussianKernel> = wide
                    .iter()
                    .map(|(_, line)| GaussianKernel::for_line(line, &self.config.range))
                    .collect();

                intensity
                    .par_iter_mut()
                    .zip(self.channel.par_iter())
                    .for_each(|(y, &x)| {
                        *y += kernels.iter().map(|k| k.value_at(x)).sum::<f64>();
                    });

                self.deposit(narrow, &mut intensity)
            }
        };

        debug!(?mode, lines = self.config.lines.len(), "built broadened stage");
        StageOutcome {
            stage: with_background.derive(intensity),
            issues,
        }
    }

    /// Stage four, see [`noise::apply_noise`].
    pub fn apply_noise<R: Rng + ?Sized>(
        &self,
        prev: &SpectrumStage,
        mode: NoiseMode,
        policy: NegativeRatePolicy,
        rng: &mut R,
    ) -> Result<StageOutcome> {
        noise::apply_noise(prev, mode, policy, rng)
    }

    /// Runs all four stages in order.
    pub fn build<R: Rng + ?Sized>(&self, options: &SpectrumOptions, rng: &mut R) -> Result<SpectrumStages> {
        let mut issues = Vec::new();
        let mut collect = |kind: StageKind, outcome: StageOutcome| {
            issues.extend(outcome.issues.into_iter().map(|issue| (kind, issue)));
            outcome.stage
        };

        let raw = collect(StageKind::Raw, self.build_base());
        let with_background = self.apply_background(&raw, options.background);
        let with_broadening = collect(
            StageKind::WithBroadening,
            self.apply_broadening(&with_background, &raw, options.broadening),
        );
        let with_noise = collect(
            StageKind::WithNoise,
            self.apply_noise(&with_broadening, options.noise, options.negative, rng)?,
        );

        Ok(SpectrumStages {
            raw,
            with_background,
            with_broadening,
            with_noise,
            issues,
        })
    }
}

/// Gaussian of one line in channel units, peaking at the line intensity.
#[derive(Clone, Copy, Debug)]
struct GaussianKernel {
    center: f64,
    scale: f64,
    two_sigma_sq: f64,
}

impl GaussianKernel {
    fn for_line(line: &Line, range: &Range) -> Self {
        let sigma = range.width_in_channels(line.fwhm / FWHM_TO_SIGMA);
        GaussianKernel {
            center: range.channel_of(line.energy),
            scale: line.intensity,
            two_sigma_sq: 2.0 * sigma * sigma,
        }
    }

    #[inline]
    fn value_at(&self, x: f64) -> f64 {
        let d = x - self.center;
        self.scale * (-d * d / self.two_sigma_sq).exp()
    }
}
