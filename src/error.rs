//! Error types for the Tessella core.
//!
//! One crate-wide taxonomy covering both subsystems: batch planning failures
//! surface before any cluster submission, storage failures surface at the
//! session or connection boundary.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No batch files found for a step, or a batch failed structural
    /// validation. Fatal to the calling step and never retried.
    #[error("Job description error: {0}")]
    JobDescription(String),

    /// A referenced file is absent. Fatal when it is a batch file (the step
    /// was never initialized), reported but non-fatal for log files.
    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A uniqueness race that could not be recovered by one
    /// rollback-and-reread cycle.
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Attempted generic delete of a tenancy-root entity. Callers must go
    /// through the dedicated schema-drop path instead.
    #[error("Deleting {0} requires dropping the experiment schema; use drop_experiment")]
    RequiresSchemaDrop(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Wrap an I/O error together with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Validation(format!("JSON serialization error: {error}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_displays_path() {
        let err = Error::NotFound(PathBuf::from("/data/align/batches/align_run_000001.batch.json"));
        assert!(err.to_string().contains("align_run_000001.batch.json"));
    }

    #[test]
    fn test_schema_drop_error_names_the_model() {
        let err = Error::RequiresSchemaDrop("experiment_refs");
        assert!(err.to_string().contains("experiment_refs"));
        assert!(err.to_string().contains("drop_experiment"));
    }
}
