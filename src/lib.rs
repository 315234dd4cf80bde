//! IXPERF - Index Performance
//!
//! Drives storage indexes with profile described workloads and reports
//! per-operation throughput and latency.

use std::path::PathBuf;

use thiserror::Error;

pub mod bench;
pub mod config;
pub mod index;
pub mod models;
pub mod plot;
pub mod util;

// Common error types
#[derive(Debug, Error)]
pub enum IxperfError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    IoError(std::io::Error),
    /// Permission denied for profile, journal or results files
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// Profile parsing or validation error
    #[error("Profile error: {0}")]
    ProfileError(String),
    /// Profile selects something this build cannot run
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// Benchmark execution error
    #[error("Benchmark error: {0}")]
    BenchmarkError(String),
    /// Index operation failed
    #[error("Index error: {0}")]
    IndexError(String),
    /// Index state disagrees with the operations applied to it
    #[error("Validation failed: {0}")]
    ValidationError(String),
    /// Worker management error
    #[error("Worker error: {0}")]
    WorkerError(String),
    /// Results persistence error
    #[error("Results persistence error: {0}")]
    PersistenceError(String),
    /// Chart rendering error
    #[error("Plot error: {0}")]
    PlotError(String),
    /// A profile in a batch exited with a non-zero code
    #[error("profile {} exited with code {code}", profile.display())]
    BatchError { profile: PathBuf, code: i32 },
}

impl IxperfError {
    /// Process exit code to use when this error ends the program.
    pub fn exit_code(&self) -> i32 {
        match self {
            IxperfError::BatchError { code, .. } => *code,
            _ => 1,
        }
    }
}

impl From<std::io::Error> for IxperfError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                IxperfError::PermissionDenied(format!("Access denied: {}", err))
            }
            _ => IxperfError::IoError(err),
        }
    }
}

impl From<serde_json::Error> for IxperfError {
    fn from(err: serde_json::Error) -> Self {
        IxperfError::PersistenceError(format!("JSON serialization error: {}", err))
    }
}

impl From<toml::de::Error> for IxperfError {
    fn from(err: toml::de::Error) -> Self {
        IxperfError::ProfileError(format!("TOML parsing error: {}", err))
    }
}

/// Result type alias for IXPERF operations
pub type Result<T> = std::result::Result<T, IxperfError>;

/// Error handling utilities
pub mod error {
    use super::IxperfError;

    /// Convert error to user-friendly message with suggestions
    pub fn user_friendly_message(error: &IxperfError) -> String {
        match error {
            IxperfError::PermissionDenied(_) => {
                "Permission denied. Check permissions of the profile, journal and results paths."
                    .to_string()
            }
            IxperfError::ProfileError(msg) => {
                format!("Invalid profile: {}. Check the profile sections and keys.", msg)
            }
            IxperfError::Unsupported(msg) => {
                format!("{}. Pick a different index in the profile.", msg)
            }
            IxperfError::ValidationError(msg) => {
                format!("Index validation failed: {}", msg)
            }
            IxperfError::PersistenceError(msg) => {
                format!("Result history unusable: {}. Check disk space and permissions, or pass --ignore-error to skip damaged runs.", msg)
            }
            _ => error.to_string(),
        }
    }
}

// Common types and constants
pub const APP_NAME: &str = "ixperf";
pub const RESULTS_FILE: &str = "results.jsonl";
pub const MAX_RESULTS_HISTORY: usize = 100;
pub const DEFAULT_PROFILES_DIR: &str = "profiles";
