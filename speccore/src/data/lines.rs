use std::ops::Deref;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::coerce::require_f64;
use crate::error::{Result, SpecError};

/// A single spectral line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Line {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub intensity: f64,
    pub energy: f64,
    pub fwhm: f64,
}

impl Line {
    /// Creates a validated line.
    ///
    /// # Arguments
    ///
    /// * `intensity` - Line intensity, must be `>= 0`.
    /// * `energy` - Line energy in range units, must be `>= 0`.
    /// * `fwhm` - Full width at half maximum in energy units, must be `>= 0`.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use speccore::data::lines::Line;
    /// let line = Line::new(600.0, 3.5, 0.39).unwrap();
    /// assert_eq!(line.energy, 3.5);
    /// assert!(Line::new(-1.0, 3.5, 0.39).is_err());
    /// ```
    pub fn new(intensity: f64, energy: f64, fwhm: f64) -> Result<Self> {
        let line = Line { name: None, intensity, energy, fwhm };
        line.validate("line")?;
        Ok(line)
    }

    pub fn named<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    fn validate(&self, prefix: &str) -> Result<()> {
        for (key, value) in [
            ("intensity", self.intensity),
            ("energy", self.energy),
            ("fwhm", self.fwhm),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SpecError::validation(
                    format!("{}.{}", prefix, key),
                    format!("expected a finite value >= 0, got {}", value),
                ));
            }
        }
        Ok(())
    }

    /// Parses one entry of the `lines` array, `index` is used for error paths.
    pub fn from_json(value: &Value, index: usize) -> Result<Self> {
        let prefix = format!("lines[{}]", index);
        if !value.is_object() {
            return Err(SpecError::validation(prefix, "expected an object"));
        }
        let line = Line {
            name: value.get("name").and_then(Value::as_str).map(str::to_string),
            intensity: require_f64(value, &prefix, &["intensity"])?,
            energy: require_f64(value, &prefix, &["energy"])?,
            fwhm: require_f64(value, &prefix, &["fwhm", "FWHM"])?,
        };
        line.validate(&prefix)?;
        Ok(line)
    }
}

/// Lines sorted ascending by energy.
///
/// The order is re-established on every construction, so it never depends
/// on input order. Equal energies keep their input order.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LineTable {
    lines: Vec<Line>,
}

impl LineTable {
    pub fn new(mut lines: Vec<Line>) -> Self {
        lines.sort_by_key(|line| OrderedFloat(line.energy));
        LineTable { lines }
    }

    pub fn from_json(value: &Value) -> Result<Self> {
        let entries = value
            .as_array()
            .ok_or_else(|| SpecError::validation("lines", format!("expected an array, got {}", value)))?;
        let lines = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| Line::from_json(entry, i))
            .collect::<Result<Vec<_>>>()?;
        Ok(LineTable::new(lines))
    }

    pub fn total_intensity(&self) -> f64 {
        self.lines.iter().map(|line| line.intensity).sum()
    }

    pub fn into_inner(self) -> Vec<Line> {
        self.lines
    }
}

impl Deref for LineTable {
    type Target = [Line];

    fn deref(&self) -> &[Line] {
        &self.lines
    }
}

impl FromIterator<Line> for LineTable {
    fn from_iter<I: IntoIterator<Item = Line>>(iter: I) -> Self {
        LineTable::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn energies(table: &LineTable) -> Vec<f64> {
        table.iter().map(|l| l.energy).collect()
    }

    #[test]
    fn test_sorted_for_any_input_order() {
        let a = Line::new(600.0, 3.5, 0.39).unwrap();
        let b = Line::new(400.0, 2.5, 0.15).unwrap();
        let c = Line::new(300.0, 1.7, 0.34).unwrap();

        let orders = [
            vec![a.clone(), b.clone(), c.clone()],
            vec![c.clone(), a.clone(), b.clone()],
            vec![b.clone(), c.clone(), a.clone()],
        ];
        for order in orders {
            let table = LineTable::new(order);
            assert_eq!(energies(&table), vec![1.7, 2.5, 3.5]);
        }
    }

    #[test]
    fn test_from_json_with_aliases_and_names() {
        let value = json!([
            {"name": "Line 1", "energy": 3.5, "intensity": 600, "FWHM": 0.39},
            {"name": "Line 2", "energy": "2.5", "intensity": 400, "fwhm": 0.15}
        ]);
        let table = LineTable::from_json(&value).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].name.as_deref(), Some("Line 2"));
        assert_eq!(table[1].fwhm, 0.39);
        assert_eq!(table.total_intensity(), 1000.0);
    }

    #[test]
    fn test_from_json_rejects_missing_and_negative() {
        let missing = json!([{"energy": 1.0, "fwhm": 0.1}]);
        let err = LineTable::from_json(&missing).unwrap_err();
        assert!(matches!(err, SpecError::Validation { ref field, .. } if field == "lines[0].intensity"));

        let negative = json!([{"energy": 1.0, "fwhm": 0.1, "intensity": 5}, {"energy": -1.0, "fwhm": 0.1, "intensity": 5}]);
        let err = LineTable::from_json(&negative).unwrap_err();
        assert!(matches!(err, SpecError::Validation { ref field, .. } if field == "lines[1].energy"));

        assert!(LineTable::from_json(&json!({"energy": 1.0})).is_err());
    }
}
