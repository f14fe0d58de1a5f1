//! Scan session messages
//!
//! Typed events and snapshots exchanged between the session worker and its
//! consumer, instead of untyped strings over the channel. The event stream
//! is FIFO and closes right after the single terminal event.

use serde::Serialize;
use uuid::Uuid;

use super::errors::SessionError;

/// Opaque session identifier, unique per invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
            SessionStatus::Failed => "failed",
        }
    }
}

/// Terminal artifact of a completed session.
#[derive(Debug, Clone, Serialize)]
pub struct ScanResult {
    /// Full captured stdout, line order preserved.
    pub raw: String,
    /// Parsed JSON document, present only under the JSON output contract.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
}

/// Ordered event stream delivered to the session's single consumer.
///
/// A parseable progress line becomes `Progress`; every other line,
/// including malformed progress lines, arrives as `Line`. Exactly one of
/// `Completed`, `Cancelled` or `Failed` ends the stream.
#[derive(Debug)]
pub enum ScanEvent {
    Progress { percent: u8 },
    Line { text: String },
    Completed { result: ScanResult },
    Cancelled,
    Failed { error: SessionError },
}

/// Point-in-time view of a session for polling consumers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub status: SessionStatus,
    /// Last value reported by the scanner; not necessarily monotonic.
    pub progress_percent: u8,
    pub accumulated_text: Vec<String>,
    pub termination_reason: Option<String>,
}
