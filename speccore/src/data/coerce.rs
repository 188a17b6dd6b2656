use serde_json::Value;

use crate::error::{Result, SpecError};

/// Looks up the first present key, so aliases like `fwhm`/`FWHM` resolve
pub(crate) fn lookup<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k)).filter(|v| !v.is_null())
}

pub(crate) fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

/// Coerces a JSON number or numeric string to a finite `f64`.
pub(crate) fn to_f64(value: &Value, path: &str) -> Result<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        Some(_) => Err(SpecError::validation(path, "value is not finite")),
        None => Err(SpecError::validation(path, format!("expected a number, got {}", value))),
    }
}

pub(crate) fn require_f64(obj: &Value, prefix: &str, keys: &[&str]) -> Result<f64> {
    let path = join(prefix, keys[0]);
    match lookup(obj, keys) {
        Some(v) => to_f64(v, &path),
        None => Err(SpecError::validation(path, "required field is missing")),
    }
}

pub(crate) fn optional_f64(obj: &Value, prefix: &str, keys: &[&str]) -> Result<Option<f64>> {
    lookup(obj, keys)
        .map(|v| to_f64(v, &join(prefix, keys[0])))
        .transpose()
}

/// Coerces to a non-negative whole number (`2000`, `2000.0` and `"2000"` all pass).
pub(crate) fn to_count(value: &Value, path: &str) -> Result<usize> {
    let v = to_f64(value, path)?;
    if v < 0.0 || v.fract() != 0.0 || v > u32::MAX as f64 {
        return Err(SpecError::validation(path, format!("expected a whole number, got {}", v)));
    }
    Ok(v as usize)
}

pub(crate) fn require_count(obj: &Value, prefix: &str, keys: &[&str]) -> Result<usize> {
    let path = join(prefix, keys[0]);
    match lookup(obj, keys) {
        Some(v) => to_count(v, &path),
        None => Err(SpecError::validation(path, "required field is missing")),
    }
}

pub(crate) fn optional_count(obj: &Value, prefix: &str, keys: &[&str]) -> Result<Option<usize>> {
    lookup(obj, keys)
        .map(|v| to_count(v, &join(prefix, keys[0])))
        .transpose()
}

pub(crate) fn require_object<'a>(obj: &'a Value, prefix: &str, key: &str) -> Result<&'a Value> {
    let path = join(prefix, key);
    match obj.get(key) {
        Some(v) if v.is_object() => Ok(v),
        Some(v) => Err(SpecError::validation(path, format!("expected an object, got {}", v))),
        None => Err(SpecError::validation(path, "required section is missing")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_strings_are_coerced() {
        let obj = json!({"energy": "2.5", "FWHM": 0.15});
        assert_eq!(require_f64(&obj, "lines[0]", &["energy"]).unwrap(), 2.5);
        assert_eq!(require_f64(&obj, "lines[0]", &["fwhm", "FWHM"]).unwrap(), 0.15);
    }

    #[test]
    fn test_missing_and_bad_values() {
        let obj = json!({"a": "abc", "b": null, "c": true});
        let err = require_f64(&obj, "background", &["a"]).unwrap_err();
        assert!(matches!(err, SpecError::Validation { ref field, .. } if field == "background.a"));
        assert!(require_f64(&obj, "background", &["b"]).is_err());
        assert!(require_f64(&obj, "background", &["c"]).is_err());
        assert!(require_f64(&obj, "background", &["e1"]).is_err());
        assert_eq!(optional_f64(&obj, "background", &["e2"]).unwrap(), None);
    }

    #[test]
    fn test_counts() {
        let obj = json!({"n": 2000.0, "m": 2.5, "k": -1, "s": "16"});
        assert_eq!(require_count(&obj, "range", &["n"]).unwrap(), 2000);
        assert_eq!(require_count(&obj, "range", &["s"]).unwrap(), 16);
        assert!(require_count(&obj, "range", &["m"]).is_err());
        assert!(require_count(&obj, "range", &["k"]).is_err());
    }
}
