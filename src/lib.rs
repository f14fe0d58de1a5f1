//! Scanzy scan orchestration
//!
//! Execution core shared by the Scanzy front-ends. Launches the external
//! scan script as a child process, streams its stdout line-by-line into
//! typed events without blocking the caller, and reconciles the tool's two
//! output contracts (free-text progress vs. a terminal JSON document) into
//! one session result. Cancellation is cooperative with escalation so a
//! stuck scanner never wedges the consumer.
//!
//! Front-ends stay thin: they render the event stream and call
//! start/cancel/status on the [`ScanManager`], which allows at most one
//! running session at a time.

pub mod params;
pub mod scan;

pub use params::{ParameterError, ScanParameters};
pub use scan::errors::{SessionError, StartError};
pub use scan::messages::{ScanEvent, ScanResult, SessionId, SessionSnapshot, SessionStatus};
pub use scan::stats::{SessionStats, StatsSnapshot};
pub use scan::{ScanManager, ScannerConfig, DEFAULT_GRACE_PERIOD};
