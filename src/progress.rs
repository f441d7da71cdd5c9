//! CLI progress rendering for pipeline runs.
//!
//! `gaceta process` subscribes to the event broadcaster and prints one line
//! per event on **stderr** so stdout remains parseable for scripts. Human
//! or JSON format, with the default chosen by TTY detection.

use std::io::Write;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::models::{EventKind, PipelineEvent};

/// Renders pipeline events. Implementations write to stderr.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &PipelineEvent);
}

/// Human-friendly lines: `process  2/5  extracting  2023-01-12_obras.pdf`.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &PipelineEvent) {
        let data = &event.data;
        let line = match event.event_type {
            EventKind::PipelineStarted => {
                format!("process  started  {} documents\n", data.total.unwrap_or(0))
            }
            EventKind::DocumentStarted => return, // the first stage line covers it
            EventKind::DocumentStage => format!(
                "process  {}/{}  {:<10}  {}\n",
                data.current.unwrap_or(0),
                data.total.unwrap_or(0),
                data.stage.as_deref().unwrap_or("?"),
                data.filename.as_deref().unwrap_or("?"),
            ),
            EventKind::DocumentCompleted => format!(
                "process  {}/{}  done        {}\n",
                data.current.unwrap_or(0),
                data.total.unwrap_or(0),
                data.filename.as_deref().unwrap_or("?"),
            ),
            EventKind::DocumentFailed => format!(
                "process  {}/{}  FAILED      {}: {}\n",
                data.current.unwrap_or(0),
                data.total.unwrap_or(0),
                data.filename.as_deref().unwrap_or("?"),
                data.error.as_deref().unwrap_or("unknown error"),
            ),
            EventKind::PipelineCompleted => format!(
                "process  finished  {} completed, {} failed\n",
                data.completed.unwrap_or(0),
                data.failed.unwrap_or(0),
            ),
            EventKind::DocumentReset => format!(
                "reset  document {}\n",
                data.document_id.unwrap_or(0)
            ),
            EventKind::PipelineReset => {
                format!("reset  all  {} documents\n", data.total.unwrap_or(0))
            }
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON event per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &PipelineEvent) {
        if let Ok(line) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &PipelineEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// Drain a broadcast receiver into a reporter until the channel closes.
/// Lagged observers skip ahead; dropped events are gone by design.
pub fn spawn_printer(
    mut rx: broadcast::Receiver<PipelineEvent>,
    mode: ProgressMode,
) -> JoinHandle<()> {
    let reporter = mode.reporter();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => reporter.report(&event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing() {
        assert_eq!(ProgressMode::parse("off"), Some(ProgressMode::Off));
        assert_eq!(ProgressMode::parse("human"), Some(ProgressMode::Human));
        assert_eq!(ProgressMode::parse("json"), Some(ProgressMode::Json));
        assert_eq!(ProgressMode::parse("verbose"), None);
    }
}
