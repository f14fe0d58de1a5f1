//! Output line classification and aggregation
//!
//! The external scanner writes free-text lines, progress markers, and in
//! JSON mode a single JSON document as its final output. Classification is
//! line-by-line and infallible; anything unrecognized stays visible as
//! plain output instead of failing the session.

use tracing::debug;

use super::errors::SessionError;
use super::messages::ScanResult;

/// Marker the scanner prefixes to percentage lines.
pub const PROGRESS_MARKER: &str = "Progresso:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineClass {
    Progress(String),
    JsonBlob(String),
    Plain(String),
}

/// Classify one newline-stripped stdout line.
///
/// `json_started` marks that an earlier line already opened the JSON
/// document; from then on every non-progress line belongs to it. The
/// caller tracks that bit, keeping this function pure.
pub fn classify_line(line: &str, json_mode: bool, json_started: bool) -> LineClass {
    if line.contains(PROGRESS_MARKER) {
        return LineClass::Progress(line.to_string());
    }
    if json_mode {
        let trimmed = line.trim_start();
        if json_started || trimmed.starts_with('{') || trimmed.starts_with('[') {
            return LineClass::JsonBlob(line.to_string());
        }
    }
    LineClass::Plain(line.to_string())
}

/// Extract the percentage from a progress-marked line, clamped to 0..=100.
///
/// Malformed values yield `None` and must never fail the session; the
/// progress metric is advisory only.
pub fn parse_progress(line: &str) -> Option<u8> {
    let (_, value) = line.split_once(':')?;
    let value = value.trim().trim_end_matches('%').trim_end();
    match value.parse::<i64>() {
        Ok(percent) => Some(percent.clamp(0, 100) as u8),
        Err(_) => {
            debug!("ignoring malformed progress line: {:?}", line);
            None
        }
    }
}

/// Accumulates classified lines across a session and produces the final
/// [`ScanResult`] once the process exits cleanly.
#[derive(Debug)]
pub struct OutputAggregator {
    json_mode: bool,
    json_started: bool,
    lines: Vec<String>,
    json_tail: Vec<String>,
}

impl OutputAggregator {
    pub fn new(json_mode: bool) -> Self {
        Self {
            json_mode,
            json_started: false,
            lines: Vec::new(),
            json_tail: Vec::new(),
        }
    }

    /// Record one raw output line and return its classification.
    pub fn ingest(&mut self, line: &str) -> LineClass {
        let class = classify_line(line, self.json_mode, self.json_started);
        if let LineClass::JsonBlob(raw) = &class {
            self.json_started = true;
            self.json_tail.push(raw.clone());
        }
        self.lines.push(line.to_string());
        class
    }

    pub fn raw_text(&self) -> String {
        self.lines.join("\n")
    }

    /// Produce the terminal result. Under the JSON contract the buffered
    /// document tail is parsed as a whole; progress lines are expected to
    /// precede the document, never interleave with it.
    pub fn finish(self) -> Result<ScanResult, SessionError> {
        let raw = self.lines.join("\n");
        if !self.json_mode {
            return Ok(ScanResult {
                raw,
                structured: None,
            });
        }
        let tail = self.json_tail.join("\n");
        match serde_json::from_str(&tail) {
            Ok(value) => Ok(ScanResult {
                raw,
                structured: Some(value),
            }),
            Err(source) => Err(SessionError::ResultParse { source }),
        }
    }
}
