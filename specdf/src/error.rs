//! Errors raised while loading request files and samples.

use std::path::PathBuf;

use speccore::error::SpecError;
use thiserror::Error;

pub type DataResult<T> = Result<T, DataError>;

#[derive(Error, Debug)]
pub enum DataError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A record of a sample file could not be read
    #[error("{}:{}: {}", .path.display(), .line, .reason)]
    SampleParse { path: PathBuf, line: usize, reason: String },
}

impl DataError {
    pub fn sample_parse<R: Into<String>>(path: impl Into<PathBuf>, line: usize, reason: R) -> Self {
        DataError::SampleParse {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }

    /// Process exit code for the command line front end.
    pub fn exit_code(&self) -> i32 {
        match self {
            DataError::Spec(_) => 2,
            DataError::Io(_) => 3,
            DataError::Json(_) | DataError::SampleParse { .. } => 4,
        }
    }
}
