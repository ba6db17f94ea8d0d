//! Sync progress reporting.
//!
//! The orchestrator emits [`SyncProgressEvent`]s to a reporter it is handed
//! for the duration of one sync; there is no shared progress state, so two
//! projects syncing at once never see each other's counters.
//!
//! Progress is written to **stderr** so stdout stays parseable for scripts.
//! In-process consumers (a status endpoint, a file watcher) can pass an
//! `mpsc::UnboundedSender` instead.

use std::io::Write;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// Phase of a sync pass, in execution order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Scanning,
    Moves,
    Deletes,
    Creates,
    Modifies,
    Relations,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Scanning => "scanning",
            SyncPhase::Moves => "moves",
            SyncPhase::Deletes => "deletes",
            SyncPhase::Creates => "creates",
            SyncPhase::Modifies => "modifies",
            SyncPhase::Relations => "relations",
        }
    }
}

/// A single progress event for one project's sync.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncProgressEvent {
    /// Change set built; `total` files need work.
    Started { project: String, total: u64 },
    /// `processed` of `total` items in `phase` are done.
    Phase {
        project: String,
        phase: SyncPhase,
        processed: u64,
        total: u64,
        message: String,
    },
    Completed {
        project: String,
        new: u64,
        modified: u64,
        deleted: u64,
        moved: u64,
        failed: u64,
    },
}

/// Receives progress events. Implementations must not block the sync.
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync main  creates  12 / 40".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Started { project, total } => {
                format!("sync {}  {} files changed\n", project, format_number(*total))
            }
            SyncProgressEvent::Phase {
                project,
                phase,
                processed,
                total,
                message,
            } => {
                let mut line = format!(
                    "sync {}  {}  {} / {}",
                    project,
                    phase.as_str(),
                    format_number(*processed),
                    format_number(*total)
                );
                if !message.is_empty() {
                    line.push_str("  ");
                    line.push_str(message);
                }
                line.push('\n');
                line
            }
            SyncProgressEvent::Completed {
                project,
                new,
                modified,
                deleted,
                moved,
                failed,
            } => format!(
                "sync {}  done  new {}  modified {}  deleted {}  moved {}  failed {}\n",
                project, new, modified, deleted, moved, failed
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        if let Ok(line) = serde_json::to_string(&event) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

/// Forward events to an in-process consumer. A dropped receiver is ignored.
impl SyncProgressReporter for UnboundedSender<SyncProgressEvent> {
    fn report(&self, event: SyncProgressEvent) {
        let _ = self.send(event);
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
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

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = SyncProgressEvent::Phase {
            project: "main".into(),
            phase: SyncPhase::Creates,
            processed: 2,
            total: 5,
            message: "notes/a.md".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "phase");
        assert_eq!(json["phase"], "creates");
        assert_eq!(json["processed"], 2);
    }

    #[test]
    fn channel_reporter_forwards_events() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let reporter: &dyn SyncProgressReporter = &tx;
        reporter.report(SyncProgressEvent::Started {
            project: "main".into(),
            total: 3,
        });
        assert_eq!(
            rx.try_recv().unwrap(),
            SyncProgressEvent::Started {
                project: "main".into(),
                total: 3
            }
        );

        drop(rx);
        // Sending after the receiver is gone must not panic.
        reporter.report(SyncProgressEvent::Started {
            project: "main".into(),
            total: 0,
        });
    }
}
