//! Session statistics
//!
//! Tracks session outcomes using a mutex-protected rolling window. Atomics
//! alone cannot compute accurate duration averages across samples.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

const MAX_SAMPLES: usize = 64;

#[derive(Debug, Clone)]
pub struct SessionStats {
    inner: Arc<Mutex<StatsInner>>,
}

#[derive(Debug)]
struct StatsInner {
    started: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
    duration_samples: VecDeque<u64>,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StatsInner {
                started: 0,
                completed: 0,
                failed: 0,
                cancelled: 0,
                duration_samples: VecDeque::with_capacity(MAX_SAMPLES),
            })),
        }
    }

    pub(crate) fn session_started(&self) {
        self.inner.lock().unwrap().started += 1;
    }

    pub(crate) fn session_completed(&self, duration: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.completed += 1;

        if inner.duration_samples.len() >= MAX_SAMPLES {
            inner.duration_samples.pop_front();
        }
        inner.duration_samples.push_back(duration.as_millis() as u64);
    }

    pub(crate) fn session_failed(&self) {
        self.inner.lock().unwrap().failed += 1;
    }

    pub(crate) fn session_cancelled(&self) {
        self.inner.lock().unwrap().cancelled += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock().unwrap();
        let average_duration_ms = if inner.duration_samples.is_empty() {
            0
        } else {
            inner.duration_samples.iter().sum::<u64>() / inner.duration_samples.len() as u64
        };

        StatsSnapshot {
            started_sessions: inner.started,
            completed_sessions: inner.completed,
            failed_sessions: inner.failed,
            cancelled_sessions: inner.cancelled,
            average_duration_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    pub started_sessions: u64,
    pub completed_sessions: u64,
    pub failed_sessions: u64,
    pub cancelled_sessions: u64,
    pub average_duration_ms: u64,
}
