//! Closed enumerations for the per-request processing modes.
//!
//! Each mode is validated once, when the request is parsed. Unrecognised
//! values fail with [`SpecError::UndefinedMode`] instead of being logged and
//! skipped.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::coerce::lookup;
use crate::error::{Result, SpecError};

/// Whether the background model is added in stage two.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundMode {
    Enabled,
    Disabled,
}

impl BackgroundMode {
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Bool(true) => Ok(BackgroundMode::Enabled),
            Value::Bool(false) => Ok(BackgroundMode::Disabled),
            Value::String(s) => s.parse(),
            other => Err(SpecError::undefined_mode("background", other.to_string())),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, BackgroundMode::Enabled)
    }
}

impl FromStr for BackgroundMode {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "true" | "enabled" | "on" => Ok(BackgroundMode::Enabled),
            "false" | "disabled" | "off" => Ok(BackgroundMode::Disabled),
            _ => Err(SpecError::undefined_mode("background", s)),
        }
    }
}

/// How line intensities are spread over channels in stage three.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadeningMode {
    /// Gaussian superposition with the line FWHM
    #[serde(rename = "FWHM")]
    Fwhm,
    /// Point deposit at the floor channel
    #[serde(rename = "None")]
    None,
}

impl BroadeningMode {
    pub fn from_json(value: &Value) -> Result<Self> {
        match value.as_str() {
            Some(s) => s.parse(),
            None => Err(SpecError::undefined_mode("expand", value.to_string())),
        }
    }
}

impl FromStr for BroadeningMode {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fwhm" => Ok(BroadeningMode::Fwhm),
            "none" => Ok(BroadeningMode::None),
            _ => Err(SpecError::undefined_mode("expand", s)),
        }
    }
}

/// Statistical noise model applied in stage four.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseMode {
    None,
    /// Normal(v, √v) above 10 counts, Poisson below (`"first"`)
    Hybrid,
    /// Poisson everywhere (`"second"`)
    Poisson,
}

impl NoiseMode {
    pub fn from_json(value: &Value) -> Result<Self> {
        match value.as_str() {
            Some(s) => s.parse(),
            None => Err(SpecError::undefined_mode("noise", value.to_string())),
        }
    }
}

impl FromStr for NoiseMode {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(NoiseMode::None),
            "first" | "hybrid" => Ok(NoiseMode::Hybrid),
            "second" | "poisson" => Ok(NoiseMode::Poisson),
            _ => Err(SpecError::undefined_mode("noise", s)),
        }
    }
}

impl Display for NoiseMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NoiseMode::None => write!(f, "none"),
            NoiseMode::Hybrid => write!(f, "hybrid"),
            NoiseMode::Poisson => write!(f, "poisson"),
        }
    }
}

/// What to do with a negative channel value when a Poisson draw is due.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegativeRatePolicy {
    /// Write zero counts and report the channel
    #[default]
    Clamp,
    /// Fail the stage with `NegativeRate`
    Reject,
}

impl FromStr for NegativeRatePolicy {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clamp" => Ok(NegativeRatePolicy::Clamp),
            "reject" => Ok(NegativeRatePolicy::Reject),
            _ => Err(SpecError::undefined_mode("negative", s)),
        }
    }
}

/// Per-request stage options, the `modes` object of the payload.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SpectrumOptions {
    pub background: BackgroundMode,
    pub broadening: BroadeningMode,
    pub noise: NoiseMode,
    pub negative: NegativeRatePolicy,
    pub seed: Option<u64>,
}

impl Default for SpectrumOptions {
    fn default() -> Self {
        SpectrumOptions {
            background: BackgroundMode::Enabled,
            broadening: BroadeningMode::Fwhm,
            noise: NoiseMode::Hybrid,
            negative: NegativeRatePolicy::Clamp,
            seed: None,
        }
    }
}

impl SpectrumOptions {
    /// Reads the optional `modes` object; absent keys keep their defaults.
    pub fn from_json(payload: &Value) -> Result<Self> {
        let mut options = SpectrumOptions::default();
        let modes = match payload.get("modes") {
            None | Some(Value::Null) => return Ok(options),
            Some(m) if m.is_object() => m,
            Some(other) => {
                return Err(SpecError::validation("modes", format!("expected an object, got {}", other)))
            }
        };

        if let Some(v) = lookup(modes, &["background"]) {
            options.background = BackgroundMode::from_json(v)?;
        }
        if let Some(v) = lookup(modes, &["expand", "broadening"]) {
            options.broadening = BroadeningMode::from_json(v)?;
        }
        if let Some(v) = lookup(modes, &["flag", "noise"]) {
            options.noise = NoiseMode::from_json(v)?;
        }
        if let Some(v) = lookup(modes, &["negative"]) {
            options.negative = match v.as_str() {
                Some(s) => s.parse()?,
                None => return Err(SpecError::undefined_mode("negative", v.to_string())),
            };
        }
        if let Some(v) = lookup(modes, &["seed"]) {
            options.seed = Some(v.as_u64().ok_or_else(|| {
                SpecError::validation("modes.seed", format!("expected an unsigned integer, got {}", v))
            })?);
        }
        Ok(options)
    }
}
