//! Error types for the voxel statistics engine
//!
//! Contract violations (shape/length/mask mismatches) are programmer-facing and
//! are not expected to be caught. Process and I/O failures terminate the current
//! analysis only. Voxel-level NaN/Inf values are never reported here; they are
//! sanitised where they arise.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while acquiring data, running tests or writing results
#[derive(Error, Debug)]
pub enum StatsError {
    #[error("Shape mismatch: volume {volume:?} does not match mask {mask:?}")]
    ShapeMismatch {
        volume: (usize, usize, usize),
        mask: (usize, usize, usize),
    },

    #[error("Length mismatch: expected {expected} values, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Masked vector was produced by a different mask")]
    MaskMismatch,

    #[error("Population '{group}' has no specimens")]
    EmptyPopulation { group: String },

    #[error("Linear model requires a groups file")]
    MissingGroups,

    #[error("Groups file {path} is unavailable: {message}")]
    GroupsUnavailable { path: PathBuf, message: String },

    #[error("Linear model requires a formula")]
    MissingFormula,

    #[error("Linear model solver failed: {message}")]
    SolverFailure { message: String },

    #[error("Failed to acquire data for '{analysis}': {message}")]
    DataAcquisition { analysis: String, message: String },

    #[error("Groups file error: {message}")]
    Groups { message: String },

    #[error("Volume error ({path}): {message}")]
    Volume { path: PathBuf, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, StatsError>;

impl StatsError {
    pub fn solver(message: impl Into<String>) -> Self {
        Self::SolverFailure {
            message: message.into(),
        }
    }

    pub fn groups(message: impl Into<String>) -> Self {
        Self::Groups {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn volume(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Volume {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True for failures that only abort the current statistical test
    /// rather than the whole analysis.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            Self::MissingGroups | Self::GroupsUnavailable { .. } | Self::MissingFormula
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_mismatch_message() {
        let err = StatsError::LengthMismatch {
            expected: 10,
            actual: 3,
        };
        assert_eq!(err.to_string(), "Length mismatch: expected 10 values, got 3");
    }

    #[test]
    fn test_missing_groups_is_skippable() {
        assert!(StatsError::MissingGroups.is_skippable());
        assert!(StatsError::GroupsUnavailable {
            path: PathBuf::from("groups.csv"),
            message: "not found".to_string(),
        }
        .is_skippable());
        assert!(!StatsError::solver("exit status 1").is_skippable());
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: StatsError = io.into();
        assert!(err.to_string().contains("gone"));
    }
}
