use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::coerce::{require_count, require_f64, require_object};
use crate::data::lines::{Line, LineTable};
use crate::error::{Result, SpecError};

/// Additive baseline `e1·exp(−e2·x) + a·x + b`, evaluated in channel units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Background {
    pub a: f64,
    pub b: f64,
    pub e1: f64,
    pub e2: f64,
}

impl Background {
    pub fn new(a: f64, b: f64, e1: f64, e2: f64) -> Self {
        Background { a, b, e1, e2 }
    }

    #[inline]
    pub fn value_at(&self, x: f64) -> f64 {
        self.e1 * (-self.e2 * x).exp() + self.a * x + self.b
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let p = "background";
        Ok(Background {
            a: require_f64(value, p, &["a", "A"])?,
            b: require_f64(value, p, &["b", "B"])?,
            e1: require_f64(value, p, &["e1", "E1"])?,
            e2: require_f64(value, p, &["e2", "E2"])?,
        })
    }
}

/// Upper bound for `chan_number`.
pub const MAX_CHANNELS: usize = 1 << 24;

/// Energy range and channel count of the detector.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub emin: f64,
    pub emax: f64,
    pub chan_number: usize,
}

impl Range {
    pub fn new(emin: f64, emax: f64, chan_number: usize) -> Result<Self> {
        let range = Range { emin, emax, chan_number };
        range.validate()?;
        Ok(range)
    }

    fn validate(&self) -> Result<()> {
        if !(self.emax > 0.0) {
            return Err(SpecError::validation("range.emax", format!("must be > 0, got {}", self.emax)));
        }
        if self.chan_number == 0 {
            return Err(SpecError::validation("range.chan_number", "must be a positive integer"));
        }
        if self.chan_number > MAX_CHANNELS {
            return Err(SpecError::validation(
                "range.chan_number",
                format!("must be <= {}, got {}", MAX_CHANNELS, self.chan_number),
            ));
        }
        Ok(())
    }

    /// Target channel position of an energy, `energy · chan_number / emax`.
    #[inline]
    pub fn channel_of(&self, energy: f64) -> f64 {
        energy * self.chan_number as f64 / self.emax
    }

    #[inline]
    pub fn energy_of(&self, channel: f64) -> f64 {
        channel * self.emax / self.chan_number as f64
    }

    /// Converts an energy width to channel units.
    #[inline]
    pub fn width_in_channels(&self, width: f64) -> f64 {
        width * self.chan_number as f64 / self.emax
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let p = "range";
        let range = Range {
            emin: require_f64(value, p, &["emin", "Emin"])?,
            emax: require_f64(value, p, &["emax", "Emax"])?,
            chan_number: require_count(value, p, &["chan_number"])?,
        };
        range.validate()?;
        Ok(range)
    }
}

/// Everything needed to build a synthetic spectrum.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpectrumConfig {
    pub lines: LineTable,
    pub background: Background,
    pub range: Range,
}

impl SpectrumConfig {
    pub fn new(lines: Vec<Line>, background: Background, range: Range) -> Self {
        SpectrumConfig {
            lines: LineTable::new(lines),
            background,
            range,
        }
    }

    /// Parses the `lines`, `background` and `range` sections of a request payload.
    pub fn from_json(payload: &Value) -> Result<Self> {
        let lines = payload
            .get("lines")
            .ok_or_else(|| SpecError::validation("lines", "required section is missing"))?;
        Ok(SpectrumConfig {
            lines: LineTable::from_json(lines)?,
            background: Background::from_json(require_object(payload, "", "background")?)?,
            range: Range::from_json(require_object(payload, "", "range")?)?,
        })
    }
}

impl Default for SpectrumConfig {
    /// Three-line demo spectrum over 0..4.5 MeV in 2000 channels.
    fn default() -> Self {
        let line = |name: &str, intensity: f64, energy: f64, fwhm: f64| Line {
            name: Some(name.to_string()),
            intensity,
            energy,
            fwhm,
        };
        SpectrumConfig::new(
            vec![
                line("Line 1", 600.0, 3.5, 0.39),
                line("Line 2", 400.0, 2.5, 0.15),
                line("Line 3", 300.0, 1.7, 0.34),
            ],
            Background::new(-0.003, 4.4, 199.5, 0.001),
            Range { emin: 0.0, emax: 4.5, chan_number: 2000 },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_background_formula() {
        let bg = Background::new(2.0, 1.0, 10.0, 0.5);
        let x: f64 = 4.0;
        assert_eq!(bg.value_at(x), 10.0 * (-0.5 * x).exp() + 2.0 * x + 1.0);
        assert_eq!(Background::default().value_at(123.0), 0.0);
    }

    #[test]
    fn test_range_mapping() {
        let range = Range::new(0.0, 1000.0, 1000).unwrap();
        assert_eq!(range.channel_of(500.0), 500.0);
        assert_eq!(range.energy_of(250.0), 250.0);
        assert_eq!(range.width_in_channels(10.0), 10.0);

        assert!(Range::new(0.0, 0.0, 1000).is_err());
        assert!(Range::new(0.0, 10.0, 0).is_err());
        assert!(Range::new(0.0, 10.0, MAX_CHANNELS).is_ok());
        let err = Range::new(0.0, 10.0, MAX_CHANNELS + 1).unwrap_err();
        assert!(matches!(err, SpecError::Validation { ref field, .. } if field == "range.chan_number"));
    }

    #[test]
    fn test_config_from_json() {
        let payload = json!({
            "lines": [{"intensity": 100, "energy": 500, "fwhm": 10}],
            "background": {"a": 0, "b": 0, "e1": 0, "e2": 0},
            "range": {"emin": 0, "emax": 1000, "chan_number": 1000}
        });
        let config = SpectrumConfig::from_json(&payload).unwrap();
        assert_eq!(config.lines.len(), 1);
        assert_eq!(config.range.chan_number, 1000);
        assert_eq!(config.background, Background::default());
    }

    #[test]
    fn test_config_from_json_capitalised_aliases() {
        let payload = json!({
            "lines": [{"name": "Line 1", "energy": 3.5, "intensity": 600, "FWHM": 0.39}],
            "background": {"E1": 199.5, "E2": 0.001, "A": -0.003, "B": 4.4},
            "range": {"Emax": 4.5, "Emin": 0.0, "chan_number": 2000}
        });
        let config = SpectrumConfig::from_json(&payload).unwrap();
        assert_eq!(config.background.e1, 199.5);
        assert_eq!(config.range.emax, 4.5);
    }

    #[test]
    fn test_config_missing_sections() {
        let payload = json!({"lines": [], "range": {"emin": 0, "emax": 1, "chan_number": 1}});
        let err = SpectrumConfig::from_json(&payload).unwrap_err();
        assert!(matches!(err, SpecError::Validation { ref field, .. } if field == "background"));

        let payload = json!({
            "lines": [],
            "background": {"a": 0, "b": 0, "e1": 0, "e2": 0},
            "range": {"emin": 0, "emax": "x", "chan_number": 1}
        });
        let err = SpectrumConfig::from_json(&payload).unwrap_err();
        assert!(matches!(err, SpecError::Validation { ref field, .. } if field == "range.emax"));
    }
}
