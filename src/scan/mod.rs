//! Scan orchestration
//!
//! Event-driven session management around one external scanner process at a
//! time. A dedicated tokio worker owns each child process and streams its
//! stdout into typed events; the manager enforces the single-active-session
//! policy and serves polling consumers with snapshots.

pub mod errors;
pub mod messages;
pub mod output;
pub mod session;
pub mod stats;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::params::ScanParameters;
use errors::StartError;
use messages::{ScanEvent, SessionId, SessionSnapshot, SessionStatus};
use session::{spawn_session, SessionState, SpawnedSession};
use stats::{SessionStats, StatsSnapshot};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Scanner process configuration.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Path to the external scan executable.
    pub program: PathBuf,
    /// How long a cancelled scanner may take to exit voluntarily before
    /// being killed.
    pub grace_period: Duration,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("scanzy.sh"),
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Tracks at most one running session and exposes start/cancel/status to
/// front-ends. Push-style consumers read the event receiver returned by
/// [`start`](Self::start); polling consumers use [`status`](Self::status).
pub struct ScanManager {
    config: ScannerConfig,
    stats: SessionStats,
    active: Mutex<Option<ActiveSession>>,
}

struct ActiveSession {
    state: Arc<SessionState>,
    cancel: CancellationToken,
}

impl ScanManager {
    pub fn new(config: ScannerConfig) -> Self {
        Self {
            config,
            stats: SessionStats::new(),
            active: Mutex::new(None),
        }
    }

    /// Launch a scan session. Fails synchronously on invalid parameters, on
    /// spawn failure, and while another session is running; the running
    /// session is never affected by a rejected start.
    pub fn start(
        &self,
        params: ScanParameters,
    ) -> Result<(SessionId, mpsc::UnboundedReceiver<ScanEvent>), StartError> {
        params.validate()?;

        let mut active = self.active.lock().unwrap();
        if let Some(current) = active.as_ref() {
            if current.state.status() == SessionStatus::Running {
                debug!(
                    "rejecting start: session {} is still running",
                    current.state.id()
                );
                return Err(StartError::SessionBusy);
            }
        }

        let SpawnedSession {
            state,
            cancel,
            events,
        } = spawn_session(&params, &self.config, self.stats.clone())?;
        self.stats.session_started();
        let id = state.id();
        *active = Some(ActiveSession { state, cancel });
        Ok((id, events))
    }

    /// Request cancellation of the given session. Idempotent: unknown and
    /// already-terminal sessions are a no-op, never an error.
    pub fn cancel(&self, id: SessionId) {
        let active = self.active.lock().unwrap();
        match active.as_ref() {
            Some(current) if current.state.id() == id => {
                info!("cancelling session {}", id);
                current.cancel.cancel();
            }
            _ => debug!("cancel for inactive session {} ignored", id),
        }
    }

    /// Snapshot of the given session, if the manager still tracks it.
    pub fn status(&self, id: SessionId) -> Option<SessionSnapshot> {
        let active = self.active.lock().unwrap();
        active
            .as_ref()
            .filter(|current| current.state.id() == id)
            .map(|current| current.state.snapshot())
    }

    /// Status of the most recent session, or Idle when none was started.
    pub fn current_status(&self) -> SessionStatus {
        let active = self.active.lock().unwrap();
        active
            .as_ref()
            .map(|current| current.state.status())
            .unwrap_or(SessionStatus::Idle)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterError;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Instant;
    use tempfile::TempDir;

    fn write_script(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("scanzy.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn manager_for(script: &Path, grace_period: Duration) -> ScanManager {
        ScanManager::new(ScannerConfig {
            program: script.to_path_buf(),
            grace_period,
        })
    }

    async fn drain(events: &mut mpsc::UnboundedReceiver<ScanEvent>) -> Vec<ScanEvent> {
        let mut collected = Vec::new();
        while let Some(event) = events.recv().await {
            collected.push(event);
        }
        collected
    }

    #[tokio::test]
    async fn test_completed_scan_with_progress() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "echo 'Progresso: 50%'\necho 'Progresso: 100%'");
        let manager = manager_for(&script, DEFAULT_GRACE_PERIOD);

        let (id, mut events) = manager.start(ScanParameters::new("example.com")).unwrap();
        let events = drain(&mut events).await;

        assert!(matches!(events.last(), Some(ScanEvent::Completed { .. })));
        let percents: Vec<u8> = events
            .iter()
            .filter_map(|event| match event {
                ScanEvent::Progress { percent } => Some(*percent),
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![50, 100]);

        let snapshot = manager.status(id).unwrap();
        assert_eq!(snapshot.status, SessionStatus::Completed);
        assert_eq!(snapshot.progress_percent, 100);
        assert_eq!(
            snapshot.accumulated_text,
            vec!["Progresso: 50%", "Progresso: 100%"]
        );
        assert_eq!(manager.stats().completed_sessions, 1);
    }

    #[tokio::test]
    async fn test_line_order_is_preserved() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "for i in 1 2 3 4 5; do echo \"linha $i\"; done");
        let manager = manager_for(&script, DEFAULT_GRACE_PERIOD);

        let (_, mut events) = manager.start(ScanParameters::new("example.com")).unwrap();
        let events = drain(&mut events).await;

        // five line events plus the terminal one, nothing dropped or reordered
        assert_eq!(events.len(), 6);
        let lines: Vec<&str> = events
            .iter()
            .filter_map(|event| match event {
                ScanEvent::Line { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            lines,
            vec!["linha 1", "linha 2", "linha 3", "linha 4", "linha 5"]
        );
    }

    #[tokio::test]
    async fn test_malformed_progress_degrades_to_line_event() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "echo 'Progresso: abc%'\necho 'Progresso: 70%'");
        let manager = manager_for(&script, DEFAULT_GRACE_PERIOD);

        let (id, mut events) = manager.start(ScanParameters::new("example.com")).unwrap();
        let events = drain(&mut events).await;

        assert!(matches!(
            events[0],
            ScanEvent::Line { ref text } if text == "Progresso: abc%"
        ));
        assert!(matches!(events[1], ScanEvent::Progress { percent: 70 }));
        assert!(matches!(events.last(), Some(ScanEvent::Completed { .. })));
        assert_eq!(manager.status(id).unwrap().progress_percent, 70);
    }

    #[tokio::test]
    async fn test_json_contract_parses_trailing_document() {
        let dir = TempDir::new().unwrap();
        let script = write_script(
            &dir,
            "echo 'Varredura iniciada'\n\
             echo 'Progresso: 100%'\n\
             echo '{'\n\
             echo '  \"open_ports\": [22, 80]'\n\
             echo '}'",
        );
        let manager = manager_for(&script, DEFAULT_GRACE_PERIOD);

        let mut params = ScanParameters::new("example.com");
        params.json_output = true;
        let (_, mut events) = manager.start(params).unwrap();
        let events = drain(&mut events).await;

        let result = match events.last() {
            Some(ScanEvent::Completed { result }) => result,
            other => panic!("expected Completed, got {:?}", other),
        };
        assert_eq!(
            result.structured,
            Some(serde_json::json!({ "open_ports": [22, 80] }))
        );
        assert_eq!(
            result.raw,
            "Varredura iniciada\nProgresso: 100%\n{\n  \"open_ports\": [22, 80]\n}"
        );
    }

    #[tokio::test]
    async fn test_text_contract_never_yields_structured_result() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "echo '{\"looks\": \"like json\"}'");
        let manager = manager_for(&script, DEFAULT_GRACE_PERIOD);

        let (_, mut events) = manager.start(ScanParameters::new("example.com")).unwrap();
        let events = drain(&mut events).await;

        match events.last() {
            Some(ScanEvent::Completed { result }) => {
                assert!(result.structured.is_none());
                assert_eq!(result.raw, "{\"looks\": \"like json\"}");
            }
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_json_contract_parse_failure_fails_session() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "echo 'not json'");
        let manager = manager_for(&script, DEFAULT_GRACE_PERIOD);

        let mut params = ScanParameters::new("example.com");
        params.json_output = true;
        let (id, mut events) = manager.start(params).unwrap();
        let events = drain(&mut events).await;

        assert!(matches!(
            events.last(),
            Some(ScanEvent::Failed {
                error: errors::SessionError::ResultParse { .. }
            })
        ));
        let snapshot = manager.status(id).unwrap();
        assert_eq!(snapshot.status, SessionStatus::Failed);
        assert_eq!(snapshot.accumulated_text, vec!["not json"]);
    }

    #[tokio::test]
    async fn test_nonzero_exit_surfaces_stderr() {
        let dir = TempDir::new().unwrap();
        let script = write_script(
            &dir,
            "echo 'saida parcial'\necho 'host inacessivel' >&2\nexit 3",
        );
        let manager = manager_for(&script, DEFAULT_GRACE_PERIOD);

        let (id, mut events) = manager.start(ScanParameters::new("example.com")).unwrap();
        let events = drain(&mut events).await;

        match events.last() {
            Some(ScanEvent::Failed {
                error: errors::SessionError::Process { exit_code, stderr },
            }) => {
                assert_eq!(*exit_code, 3);
                assert!(stderr.contains("host inacessivel"));
            }
            other => panic!("expected Process failure, got {:?}", other),
        }
        // partial output survives the failure
        assert_eq!(
            manager.status(id).unwrap().accumulated_text,
            vec!["saida parcial"]
        );
    }

    #[tokio::test]
    async fn test_missing_executable_fails_synchronously() {
        let manager = manager_for(Path::new("/nonexistent/scanzy.sh"), DEFAULT_GRACE_PERIOD);

        let err = manager
            .start(ScanParameters::new("example.com"))
            .unwrap_err();
        assert!(matches!(err, StartError::Spawn { .. }));
        assert_eq!(manager.current_status(), SessionStatus::Idle);
        assert_eq!(manager.stats().started_sessions, 0);
    }

    #[tokio::test]
    async fn test_invalid_parameters_never_reach_the_process() {
        let manager = manager_for(Path::new("/nonexistent/scanzy.sh"), DEFAULT_GRACE_PERIOD);

        let err = manager.start(ScanParameters::new("")).unwrap_err();
        assert!(matches!(
            err,
            StartError::InvalidParameters(ParameterError::EmptyTarget)
        ));
        assert_eq!(manager.current_status(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn test_concurrent_start_is_rejected() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "sleep 5");
        let manager = manager_for(&script, Duration::from_millis(200));

        let (id, mut events) = manager.start(ScanParameters::new("example.com")).unwrap();

        let err = manager
            .start(ScanParameters::new("other.example.com"))
            .unwrap_err();
        assert!(matches!(err, StartError::SessionBusy));
        // the running session is untouched by the rejected start
        assert_eq!(manager.status(id).unwrap().status, SessionStatus::Running);

        manager.cancel(id);
        let events = drain(&mut events).await;
        assert!(matches!(events.last(), Some(ScanEvent::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "sleep 5");
        let manager = manager_for(&script, Duration::from_millis(200));

        let (id, mut events) = manager.start(ScanParameters::new("example.com")).unwrap();
        manager.cancel(id);
        manager.cancel(id);

        let events = drain(&mut events).await;
        let cancelled = events
            .iter()
            .filter(|event| matches!(event, ScanEvent::Cancelled))
            .count();
        assert_eq!(cancelled, 1);

        // cancelling a terminal session is still a no-op
        manager.cancel(id);
        assert_eq!(manager.status(id).unwrap().status, SessionStatus::Cancelled);
        assert_eq!(manager.stats().cancelled_sessions, 1);
    }

    #[tokio::test]
    async fn test_cancel_escalates_when_terminate_is_ignored() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "trap '' TERM\necho pronto\nsleep 30");
        let manager = manager_for(&script, Duration::from_millis(200));

        let (id, mut events) = manager.start(ScanParameters::new("example.com")).unwrap();

        // wait until the trap is installed before cancelling
        loop {
            match events.recv().await {
                Some(ScanEvent::Line { text }) if text == "pronto" => break,
                Some(_) => continue,
                None => panic!("event stream ended before the scanner was ready"),
            }
        }

        let cancel_started = Instant::now();
        manager.cancel(id);
        let events = drain(&mut events).await;

        assert!(matches!(events.last(), Some(ScanEvent::Cancelled)));
        // grace period plus bounded overhead, nowhere near the 30s sleep
        assert!(cancel_started.elapsed() < Duration::from_secs(5));
        assert_eq!(manager.status(id).unwrap().status, SessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_after_natural_exit_reports_completion() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "echo 'Progresso: 100%'");
        let manager = manager_for(&script, DEFAULT_GRACE_PERIOD);

        let (id, mut events) = manager.start(ScanParameters::new("example.com")).unwrap();

        // let the process finish, then cancel the already-terminal session
        let events = drain(&mut events).await;
        manager.cancel(id);

        assert!(matches!(events.last(), Some(ScanEvent::Completed { .. })));
        assert!(!events.iter().any(|event| matches!(event, ScanEvent::Cancelled)));
        assert_eq!(manager.status(id).unwrap().status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_manager_accepts_new_start_after_terminal_session() {
        let dir = TempDir::new().unwrap();
        let script = write_script(&dir, "echo feito");
        let manager = manager_for(&script, DEFAULT_GRACE_PERIOD);

        let (first, mut events) = manager.start(ScanParameters::new("example.com")).unwrap();
        drain(&mut events).await;
        assert_eq!(manager.status(first).unwrap().status, SessionStatus::Completed);

        let (second, mut events) = manager.start(ScanParameters::new("example.com")).unwrap();
        drain(&mut events).await;
        assert_ne!(first, second);
        // the manager only tracks the most recent session
        assert!(manager.status(first).is_none());
        assert_eq!(manager.stats().started_sessions, 2);
    }
}
