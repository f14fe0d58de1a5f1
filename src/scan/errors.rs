//! Scan errors
//!
//! Uses thiserror for type-safe error matching rather than opaque anyhow
//! errors. Failures that happen before a session starts are returned
//! synchronously; everything after that surfaces as a Failed terminal event.

use std::path::PathBuf;
use thiserror::Error;

use crate::params::ParameterError;

/// Errors returned synchronously by [`ScanManager::start`](super::ScanManager::start).
#[derive(Debug, Error)]
pub enum StartError {
    #[error("invalid scan parameters: {0}")]
    InvalidParameters(#[from] ParameterError),

    #[error("failed to launch scanner {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("a scan session is already running")]
    SessionBusy,
}

/// Failures delivered asynchronously inside a `Failed` terminal event.
///
/// `ResultParse` is distinct from `Process`: the scan itself may have run
/// correctly while its output could not be interpreted under the selected
/// contract. Accumulated output is preserved in the session snapshot in
/// either case.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("scanner exited with code {exit_code}: {stderr}")]
    Process { exit_code: i32, stderr: String },

    #[error("scanner output is not valid JSON: {source}")]
    ResultParse {
        #[source]
        source: serde_json::Error,
    },

    #[error("scanner output stream failed: {0}")]
    Io(#[from] std::io::Error),
}
