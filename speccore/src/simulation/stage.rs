use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpecError};

/// One (channel, intensity) series of the spectrum pipeline.
///
/// Uses `Arc<Vec<f64>>` so that stages share the channel axis and cloning is
/// O(1). A stage is never mutated once built; later stages copy the
/// intensities they start from.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpectrumStage {
    pub channel: Arc<Vec<f64>>,
    pub intensity: Arc<Vec<f64>>,
}

impl SpectrumStage {
    /// # Panics
    ///
    /// Panics if `channel` and `intensity` differ in length.
    pub fn new(channel: Arc<Vec<f64>>, intensity: Vec<f64>) -> Self {
        assert_eq!(channel.len(), intensity.len(), "channel and intensity axes must match");
        SpectrumStage {
            channel,
            intensity: Arc::new(intensity),
        }
    }

    /// Same channel axis, new intensities.
    pub fn derive(&self, intensity: Vec<f64>) -> Self {
        SpectrumStage::new(Arc::clone(&self.channel), intensity)
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }

    pub fn total_intensity(&self) -> f64 {
        self.intensity.iter().sum()
    }

    /// Iterates `(channel, intensity)` pairs.
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.channel.iter().copied().zip(self.intensity.iter().copied())
    }
}

/// The four pipeline stages, in build order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Raw,
    WithBackground,
    WithBroadening,
    WithNoise,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::Raw,
        StageKind::WithBackground,
        StageKind::WithBroadening,
        StageKind::WithNoise,
    ];

    /// Plot index used by the frontend, `0..=3`.
    pub fn from_index(index: usize) -> Result<Self> {
        StageKind::ALL
            .get(index)
            .copied()
            .ok_or_else(|| SpecError::undefined_mode("stage", index.to_string()))
    }

    pub fn index(&self) -> usize {
        match self {
            StageKind::Raw => 0,
            StageKind::WithBackground => 1,
            StageKind::WithBroadening => 2,
            StageKind::WithNoise => 3,
        }
    }
}

impl FromStr for StageKind {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(index) = s.trim().parse::<usize>() {
            return StageKind::from_index(index);
        }
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "raw" => Ok(StageKind::Raw),
            "with_background" | "background" => Ok(StageKind::WithBackground),
            "with_broadening" | "broadening" => Ok(StageKind::WithBroadening),
            "with_noise" | "noise" => Ok(StageKind::WithNoise),
            _ => Err(SpecError::undefined_mode("stage", s)),
        }
    }
}

impl Display for StageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StageKind::Raw => write!(f, "raw"),
            StageKind::WithBackground => write!(f, "with_background"),
            StageKind::WithBroadening => write!(f, "with_broadening"),
            StageKind::WithNoise => write!(f, "with_noise"),
        }
    }
}

/// A non-fatal problem met while building a stage.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageIssue {
    /// Target channel outside `[1, chan_number]`, the line was not deposited
    LineOutOfRange { line: usize, energy: f64, target: f64 },
    /// Negative value clamped to zero before a Poisson draw
    NegativeRate { channel: usize, value: f64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Complete,
    Degraded,
}

/// A built stage together with the issues met while building it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StageOutcome {
    pub stage: SpectrumStage,
    pub issues: Vec<StageIssue>,
}

impl StageOutcome {
    pub fn complete(stage: SpectrumStage) -> Self {
        StageOutcome { stage, issues: Vec::new() }
    }

    pub fn status(&self) -> StageStatus {
        if self.issues.is_empty() {
            StageStatus::Complete
        } else {
            StageStatus::Degraded
        }
    }
}

/// All four stages of one request.
#[derive(Clone, Debug, Serialize)]
pub struct SpectrumStages {
    pub raw: SpectrumStage,
    pub with_background: SpectrumStage,
    pub with_broadening: SpectrumStage,
    pub with_noise: SpectrumStage,
    pub issues: Vec<(StageKind, StageIssue)>,
}

impl SpectrumStages {
    pub fn stage(&self, kind: StageKind) -> &SpectrumStage {
        match kind {
            StageKind::Raw => &self.raw,
            StageKind::WithBackground => &self.with_background,
            StageKind::WithBroadening => &self.with_broadening,
            StageKind::WithNoise => &self.with_noise,
        }
    }

    pub fn issues_of(&self, kind: StageKind) -> impl Iterator<Item = &StageIssue> + '_ {
        self.issues
            .iter()
            .filter(move |(k, _)| *k == kind)
            .map(|(_, issue)| issue)
    }
}
