//! Scan parameters and command construction
//!
//! Validates user-supplied parameters and turns them into the stable
//! argument vector the external scanner expects. Port-spec validation is
//! deliberately loose; full parsing of range expressions belongs to the
//! scanner itself.

use thiserror::Error;

pub const DEFAULT_PORT_SPEC: &str = "1-1024";
pub const DEFAULT_TIMEOUT_SECS: f64 = 1.0;
pub const DEFAULT_PARALLELISM: u32 = 10;

#[derive(Debug, Error, PartialEq)]
pub enum ParameterError {
    #[error("target must not be empty")]
    EmptyTarget,

    #[error("port spec {0:?} contains no digits")]
    InvalidPortSpec(String),

    #[error("timeout must be a non-negative number of seconds, got {0}")]
    InvalidTimeout(f64),
}

/// Parameters for one scan invocation. Immutable once a session starts.
#[derive(Debug, Clone)]
pub struct ScanParameters {
    pub target: String,
    /// Range or list expression; empty selects the scanner default.
    pub port_spec: String,
    pub timeout_secs: f64,
    pub parallelism: u32,
    /// Ask the scanner for a terminal JSON document instead of plain text.
    pub json_output: bool,
    /// Forwarded to the scanner as --force-netcat; not interpreted here.
    pub force_netcat: bool,
}

impl ScanParameters {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            port_spec: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            parallelism: DEFAULT_PARALLELISM,
            json_output: false,
            force_netcat: false,
        }
    }

    pub fn validate(&self) -> Result<(), ParameterError> {
        if self.target.trim().is_empty() {
            return Err(ParameterError::EmptyTarget);
        }
        if !self.port_spec.is_empty() && !self.port_spec.chars().any(|c| c.is_ascii_digit()) {
            return Err(ParameterError::InvalidPortSpec(self.port_spec.clone()));
        }
        if !self.timeout_secs.is_finite() || self.timeout_secs < 0.0 {
            return Err(ParameterError::InvalidTimeout(self.timeout_secs));
        }
        Ok(())
    }

    pub fn effective_port_spec(&self) -> &str {
        if self.port_spec.is_empty() {
            DEFAULT_PORT_SPEC
        } else {
            &self.port_spec
        }
    }

    /// Argument vector for the scanner. Flag order is fixed so invocations
    /// stay reproducible.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            self.target.clone(),
            self.effective_port_spec().to_string(),
            "--timeout".to_string(),
            self.timeout_secs.to_string(),
            "--parallel".to_string(),
            self.parallelism.to_string(),
        ];
        if self.json_output {
            args.push("--json".to_string());
        }
        if self.force_netcat {
            args.push("--force-netcat".to_string());
        }
        args
    }
}
