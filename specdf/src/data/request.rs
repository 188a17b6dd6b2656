use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use speccore::algorithm::peak_finder::{FinderOutput, FinderParams, PeakFinder};
use speccore::data::modes::SpectrumOptions;
use speccore::data::samples::SampleSource;
use speccore::simulation::spectrum_model::SpectrumModel;
use speccore::simulation::stage::{SpectrumStages, StageIssue, StageKind, StageStatus};

use crate::error::{DataError, DataResult};

/// Reads a JSON request body from disk.
pub fn load_payload(path: impl AsRef<Path>) -> DataResult<Value> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// One stage as returned to the caller.
#[derive(Debug, Serialize)]
pub struct StageResponse<'a> {
    pub stage: StageKind,
    pub status: StageStatus,
    pub channel: &'a [f64],
    pub intensity: &'a [f64],
    pub issues: Vec<&'a StageIssue>,
}

impl<'a> StageResponse<'a> {
    pub fn new(stages: &'a SpectrumStages, kind: StageKind) -> Self {
        let stage = stages.stage(kind);
        let issues: Vec<&StageIssue> = stages.issues_of(kind).collect();
        StageResponse {
            stage: kind,
            status: if issues.is_empty() {
                StageStatus::Complete
            } else {
                StageStatus::Degraded
            },
            channel: stage.channel.as_slice(),
            intensity: stage.intensity.as_slice(),
            issues,
        }
    }
}

/// Builds all stages for a spectrum payload.
///
/// `seed` overrides `modes.seed`; without either the noise stage draws from
/// OS entropy.
pub fn build_spectrum(payload: &Value, seed: Option<u64>) -> DataResult<SpectrumStages> {
    let model = SpectrumModel::from_json(payload)?;
    let options = SpectrumOptions::from_json(payload)?;
    let mut rng = match seed.or(options.seed) {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let stages = model.build(&options, &mut rng)?;
    info!(
        lines = model.lines().len(),
        channels = model.range().chan_number,
        noise = %options.noise,
        issues = stages.issues.len(),
        "built spectrum"
    );
    Ok(stages)
}

/// Builds the spectrum and serializes the selected stage.
pub fn spectrum_response(payload: &Value, kind: StageKind, seed: Option<u64>) -> DataResult<Value> {
    let stages = build_spectrum(payload, seed)?;
    Ok(serde_json::to_value(StageResponse::new(&stages, kind))?)
}

/// Runs the peak finder of a `finder` payload over `source`.
pub fn find_peaks<S>(payload: &Value, source: &mut S) -> DataResult<FinderOutput>
where
    S: SampleSource,
    DataError: From<S::Error>,
{
    let finder = PeakFinder::new(FinderParams::from_json(payload)?)?;
    let output = finder.run(source)?;
    info!(
        samples = output.smoothed.len(),
        overlays = output.overlays.len(),
        failed = output.report.failed,
        truncated = output.report.truncated,
        "peak search finished"
    );
    Ok(output)
}

pub fn peaks_response<S>(payload: &Value, source: &mut S) -> DataResult<Value>
where
    S: SampleSource,
    DataError: From<S::Error>,
{
    Ok(serde_json::to_value(find_peaks(payload, source)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::sample_file::SampleFile;
    use serde_json::json;
    use speccore::data::samples::InMemorySamples;
    use speccore::error::SpecError;
    use std::io::Write;

    fn spectrum_payload() -> Value {
        json!({
            "lines": [{"intensity": 100, "energy": 500, "fwhm": 10}],
            "background": {"a": 0, "b": 0, "e1": 0, "e2": 0},
            "range": {"emin": 0, "emax": 1000, "chan_number": 1000},
            "modes": {"seed": 11}
        })
    }

    fn finder_payload() -> Value {
        json!({"finder": {"smoothing": 1, "max": 8, "min": 8, "h1": 5, "h2": 20, "h3": 5}})
    }

    fn peak_counts() -> Vec<i64> {
        (0..200)
            .map(|i| {
                // sample i sits at coordinate i + 1
                let d = (i + 1) as f64 - 100.0;
                (1000.0 * (-d * d / 32.0).exp()).round() as i64
            })
            .collect()
    }

    #[test]
    fn test_raw_stage_response() {
        let response = spectrum_response(&spectrum_payload(), StageKind::Raw, None).unwrap();
        assert_eq!(response["stage"], "raw");
        assert_eq!(response["status"], "complete");
        let intensity = response["intensity"].as_array().unwrap();
        assert_eq!(intensity.len(), 1000);
        assert_eq!(intensity[499], 100.0);
        assert_eq!(response["channel"][499], 500.0);
    }

    #[test]
    fn test_seeded_noise_stage_is_reproducible() {
        let a = spectrum_response(&spectrum_payload(), StageKind::WithNoise, None).unwrap();
        let b = spectrum_response(&spectrum_payload(), StageKind::WithNoise, None).unwrap();
        assert_eq!(a, b);
        let c = spectrum_response(&spectrum_payload(), StageKind::WithNoise, Some(11)).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn test_out_of_range_line_degrades_stage() {
        let mut payload = spectrum_payload();
        payload["lines"] = json!([
            {"intensity": 100, "energy": 500, "fwhm": 0},
            {"intensity": 5, "energy": 5000, "fwhm": 0}
        ]);
        let response = spectrum_response(&payload, StageKind::Raw, None).unwrap();
        assert_eq!(response["status"], "degraded");
        assert_eq!(response["issues"][0]["kind"], "line_out_of_range");
    }

    #[test]
    fn test_undefined_mode_fails_request() {
        let mut payload = spectrum_payload();
        payload["modes"] = json!({"expand": "Lorentz"});
        let err = spectrum_response(&payload, StageKind::Raw, None).unwrap_err();
        assert!(matches!(err, DataError::Spec(SpecError::UndefinedMode { axis: "expand", .. })));
    }

    #[test]
    fn test_missing_field_fails_validation() {
        let mut payload = spectrum_payload();
        payload["range"] = json!({"emin": 0, "chan_number": 10});
        let err = build_spectrum(&payload, None).unwrap_err();
        assert!(matches!(err, DataError::Spec(SpecError::Validation { .. })));
    }

    #[test]
    fn test_peaks_from_memory() {
        let mut source = InMemorySamples::new(peak_counts()).unwrap();
        let output = find_peaks(&finder_payload(), &mut source).unwrap();
        assert!(!output.overlays.is_empty());
        for curve in &output.overlays {
            assert!((curve.candidate.fitted_mean - 100.0).abs() < 1.0);
        }
    }

    #[test]
    fn test_peaks_response_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for (i, c) in peak_counts().iter().enumerate() {
            writeln!(file, "{} {}", i, c).unwrap();
        }
        let mut source = SampleFile::new(file.path());
        let response = peaks_response(&finder_payload(), &mut source).unwrap();
        assert_eq!(response["smoothed"].as_array().unwrap().len(), 200);
        assert!(response["overlays"][0]["x"].is_array());
        assert_eq!(response["report"]["scales"], 1);
    }

    #[test]
    fn test_load_payload() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", finder_payload()).unwrap();
        assert_eq!(load_payload(file.path()).unwrap(), finder_payload());

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        write!(broken, "{{\"finder\": ").unwrap();
        assert!(matches!(load_payload(broken.path()), Err(DataError::Json(_))));
    }
}
