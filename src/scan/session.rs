//! Scan session execution
//!
//! One worker task per session exclusively owns the child process, the
//! stdout reader and every state transition, so events reach the consumer
//! in the exact order the scanner produced them. Cancellation is
//! cooperative with escalation: a termination signal, a bounded grace
//! period, then a kill. If the process already exited when cancellation
//! arrives, the natural outcome wins over Cancelled.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::errors::{SessionError, StartError};
use super::messages::{ScanEvent, SessionId, SessionSnapshot, SessionStatus};
use super::output::{parse_progress, LineClass, OutputAggregator};
use super::stats::SessionStats;
use super::ScannerConfig;
use crate::params::ScanParameters;

/// Session state shared between the worker and polling consumers.
#[derive(Debug)]
pub(crate) struct SessionState {
    id: SessionId,
    inner: Mutex<StateInner>,
}

#[derive(Debug)]
struct StateInner {
    status: SessionStatus,
    progress_percent: u8,
    lines: Vec<String>,
    termination_reason: Option<String>,
}

impl SessionState {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            inner: Mutex::new(StateInner {
                status: SessionStatus::Running,
                progress_percent: 0,
                lines: Vec::new(),
                termination_reason: None,
            }),
        }
    }

    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn status(&self) -> SessionStatus {
        self.inner.lock().unwrap().status
    }

    fn push_line(&self, line: &str) {
        self.inner.lock().unwrap().lines.push(line.to_string());
    }

    fn set_progress(&self, percent: u8) {
        self.inner.lock().unwrap().progress_percent = percent;
    }

    fn finish(&self, status: SessionStatus, reason: String) {
        let mut inner = self.inner.lock().unwrap();
        // a session leaves Running exactly once
        if inner.status.is_terminal() {
            return;
        }
        inner.status = status;
        inner.termination_reason = Some(reason);
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner.lock().unwrap();
        SessionSnapshot {
            id: self.id,
            status: inner.status,
            progress_percent: inner.progress_percent,
            accumulated_text: inner.lines.clone(),
            termination_reason: inner.termination_reason.clone(),
        }
    }
}

pub(crate) struct SpawnedSession {
    pub(crate) state: Arc<SessionState>,
    pub(crate) cancel: CancellationToken,
    pub(crate) events: mpsc::UnboundedReceiver<ScanEvent>,
}

/// Spawn the scanner process and its session worker. Fails fast when the
/// executable cannot be launched; the session never enters Running.
pub(crate) fn spawn_session(
    params: &ScanParameters,
    config: &ScannerConfig,
    stats: SessionStats,
) -> Result<SpawnedSession, StartError> {
    let mut child = Command::new(&config.program)
        .args(params.to_args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| StartError::Spawn {
            program: config.program.clone(),
            source,
        })?;

    let stdout = child.stdout.take().ok_or_else(|| StartError::Spawn {
        program: config.program.clone(),
        source: std::io::Error::other("child stdout was not captured"),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| StartError::Spawn {
        program: config.program.clone(),
        source: std::io::Error::other("child stderr was not captured"),
    })?;

    let id = SessionId::new();
    let state = Arc::new(SessionState::new(id));
    let cancel = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    info!(
        "session {} running: {} {:?}",
        id,
        config.program.display(),
        params.to_args()
    );

    tokio::spawn(run_session(SessionContext {
        child,
        stdout,
        stderr,
        state: state.clone(),
        cancel: cancel.clone(),
        events: event_tx,
        json_mode: params.json_output,
        grace_period: config.grace_period,
        stats,
    }));

    Ok(SpawnedSession {
        state,
        cancel,
        events: event_rx,
    })
}

struct SessionContext {
    child: Child,
    stdout: ChildStdout,
    stderr: tokio::process::ChildStderr,
    state: Arc<SessionState>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<ScanEvent>,
    json_mode: bool,
    grace_period: Duration,
    stats: SessionStats,
}

enum LoopEnd {
    Exited(ExitStatus),
    Cancelled,
    Io(std::io::Error),
}

async fn run_session(ctx: SessionContext) {
    let SessionContext {
        mut child,
        stdout,
        stderr,
        state,
        cancel,
        events,
        json_mode,
        grace_period,
        stats,
    } = ctx;
    let started = Instant::now();

    // stderr is drained concurrently and only surfaces in ProcessError;
    // it never interleaves with the stdout event stream
    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        let _ = BufReader::new(stderr).read_to_string(&mut buf).await;
        buf
    });

    let mut lines = BufReader::new(stdout).lines();
    let mut aggregator = OutputAggregator::new(json_mode);

    let end = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(&line, &mut aggregator, &state, &events),
                Ok(None) => match child.wait().await {
                    Ok(status) => break LoopEnd::Exited(status),
                    Err(source) => break LoopEnd::Io(source),
                },
                Err(source) => break LoopEnd::Io(source),
            },
            _ = cancel.cancelled() => match shutdown_child(&mut child, grace_period).await {
                Some(status) => {
                    // exit beat the termination signal; report the natural
                    // outcome, with whatever output is still buffered
                    drain_remaining(&mut lines, &mut aggregator, &state, &events).await;
                    break LoopEnd::Exited(status);
                }
                None => break LoopEnd::Cancelled,
            },
        }
    };

    let duration = started.elapsed();
    match end {
        LoopEnd::Exited(status) => {
            let stderr = stderr_task.await.unwrap_or_default();
            finish_exited(status, stderr, aggregator, &state, &events, &stats, duration);
        }
        LoopEnd::Cancelled => {
            stderr_task.abort();
            stats.session_cancelled();
            state.finish(SessionStatus::Cancelled, "cancelled by request".to_string());
            info!("session {} cancelled after {:?}", state.id(), duration);
            let _ = events.send(ScanEvent::Cancelled);
        }
        LoopEnd::Io(source) => {
            stderr_task.abort();
            let _ = child.start_kill();
            let _ = child.wait().await;
            let error = SessionError::Io(source);
            stats.session_failed();
            state.finish(SessionStatus::Failed, error.to_string());
            warn!("session {} stream failed: {}", state.id(), error);
            let _ = events.send(ScanEvent::Failed { error });
        }
    }
}

fn handle_line(
    line: &str,
    aggregator: &mut OutputAggregator,
    state: &SessionState,
    events: &mpsc::UnboundedSender<ScanEvent>,
) {
    match aggregator.ingest(line) {
        LineClass::Progress(raw) => {
            state.push_line(&raw);
            match parse_progress(&raw) {
                Some(percent) => {
                    state.set_progress(percent);
                    let _ = events.send(ScanEvent::Progress { percent });
                }
                // malformed progress degrades to plain output
                None => {
                    let _ = events.send(ScanEvent::Line { text: raw });
                }
            }
        }
        LineClass::JsonBlob(raw) | LineClass::Plain(raw) => {
            state.push_line(&raw);
            let _ = events.send(ScanEvent::Line { text: raw });
        }
    }
}

async fn drain_remaining(
    lines: &mut Lines<BufReader<ChildStdout>>,
    aggregator: &mut OutputAggregator,
    state: &SessionState,
    events: &mpsc::UnboundedSender<ScanEvent>,
) {
    while let Ok(Some(line)) = lines.next_line().await {
        handle_line(&line, aggregator, state, events);
    }
}

fn finish_exited(
    status: ExitStatus,
    stderr: String,
    aggregator: OutputAggregator,
    state: &SessionState,
    events: &mpsc::UnboundedSender<ScanEvent>,
    stats: &SessionStats,
    duration: Duration,
) {
    if status.success() {
        match aggregator.finish() {
            Ok(result) => {
                stats.session_completed(duration);
                state.finish(SessionStatus::Completed, "scan completed".to_string());
                info!("session {} completed in {:?}", state.id(), duration);
                let _ = events.send(ScanEvent::Completed { result });
            }
            Err(error) => {
                stats.session_failed();
                state.finish(SessionStatus::Failed, error.to_string());
                warn!(
                    "session {} produced unparseable output: {}",
                    state.id(),
                    error
                );
                let _ = events.send(ScanEvent::Failed { error });
            }
        }
    } else {
        let exit_code = status.code().unwrap_or(-1);
        let error = SessionError::Process { exit_code, stderr };
        stats.session_failed();
        state.finish(SessionStatus::Failed, error.to_string());
        warn!(
            "session {} failed with exit code {}",
            state.id(),
            exit_code
        );
        let _ = events.send(ScanEvent::Failed { error });
    }
}

/// Shut the child down after a cancellation request.
///
/// Returns `Some(status)` when the process had already exited before any
/// signal was sent; the caller reports the natural outcome instead of
/// Cancelled. Otherwise escalates termination → grace period → kill and
/// returns `None`.
async fn shutdown_child(child: &mut Child, grace_period: Duration) -> Option<ExitStatus> {
    if let Ok(Some(status)) = child.try_wait() {
        return Some(status);
    }

    if send_terminate(child) {
        match timeout(grace_period, child.wait()).await {
            Ok(Ok(_)) => return None,
            Ok(Err(source)) => warn!("waiting for terminated scanner failed: {}", source),
            Err(_) => warn!(
                "scanner ignored the termination signal for {:?}, killing it",
                grace_period
            ),
        }
    }

    if let Err(source) = child.start_kill() {
        debug!("kill after grace period failed: {}", source);
    }
    let _ = child.wait().await;
    None
}

#[cfg(unix)]
fn send_terminate(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    // SAFETY: kill(2) with a valid pid and SIGTERM does not touch our memory
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn send_terminate(_child: &Child) -> bool {
    false
}
