//! Error taxonomy for spectrum construction and peak fitting.

use thiserror::Error;

/// Result type for spectrum and finder operations
pub type Result<T> = std::result::Result<T, SpecError>;

/// Errors surfaced by the core.
///
/// `Validation`, `UndefinedMode` and `NegativeRate` fail the request;
/// `Fit` is recovered by the peak finder and only reaches callers that
/// invoke the fitter directly.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecError {
    /// A required configuration field is missing or not numeric
    #[error("invalid field `{field}`: {reason}")]
    Validation { field: String, reason: String },

    /// An enum-like configuration field holds an unrecognised value
    #[error("undefined {axis} mode: {value}")]
    UndefinedMode { axis: &'static str, value: String },

    /// A Poisson draw was requested for a negative rate
    #[error("negative rate {value} at channel index {channel}")]
    NegativeRate { channel: usize, value: f64 },

    #[error("fit failed: {0}")]
    Fit(#[from] FitError),
}

impl SpecError {
    pub fn validation<F: Into<String>, R: Into<String>>(field: F, reason: R) -> Self {
        SpecError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn undefined_mode<V: Into<String>>(axis: &'static str, value: V) -> Self {
        SpecError::UndefinedMode {
            axis,
            value: value.into(),
        }
    }

    /// Whether the error should fail the whole request
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SpecError::Fit(_))
    }
}

/// Failures of the local Gaussian fit
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("no convergence after {iterations} iterations")]
    NotConverged { iterations: usize },

    #[error("normal equations are singular")]
    Singular,

    /// Window has no positive residual mass to seed from
    #[error("degenerate fit window of {len} points")]
    DegenerateWindow { len: usize },

    #[error("non-finite parameter encountered")]
    NonFinite,
}
