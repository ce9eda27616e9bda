//! Progress reporting for sweeps.
//!
//! Sweeps run on background tasks. They never touch the operator's output
//! directly; every notification is a [`ProgressEvent`] pushed onto an
//! unbounded channel, and a single consumer drains and renders the channel
//! in emission order. Each event is also written to the application log.

use std::{fmt, path::PathBuf};

use chrono::{DateTime, Local};
use tokio::sync::mpsc;

/// Timestamp format used when rendering progress lines.
pub const PROGRESS_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Log target for mirrored progress events.
pub const PROGRESS_TARGET: &str = "logsweep::progress";

/// A single progress notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Local wall-clock time the event was emitted.
    pub at: DateTime<Local>,
    pub kind: ProgressKind,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressKind {
    /// A sweep began. Renderers may clear the previous sweep's output.
    Started { base_path: PathBuf },
    /// The base directory could not be listed; the sweep ends here.
    BaseListFailed { base_path: PathBuf, error: String },
    /// A site directory could not be listed and was skipped.
    DirectoryListFailed { directory: PathBuf, error: String },
    /// A file's modification time could not be read; the file was skipped.
    MetadataFailed { file: PathBuf, error: String },
    /// An expired file could not be deleted.
    DeleteFailed { file: PathBuf, error: String },
    /// Every file in a site directory has been considered.
    DirectoryProcessed { directory: PathBuf },
    /// The sweep finished.
    Completed { succeeded: u64, failed: u64 },
    /// A scheduled run did not start because the retention settings were invalid.
    RunSkipped { reason: String },
}

impl ProgressKind {
    /// Whether this event reports a failure.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            ProgressKind::BaseListFailed { .. }
                | ProgressKind::DirectoryListFailed { .. }
                | ProgressKind::MetadataFailed { .. }
                | ProgressKind::DeleteFailed { .. }
                | ProgressKind::RunSkipped { .. }
        )
    }
}

impl fmt::Display for ProgressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProgressKind::Started { base_path } => {
                write!(f, "cleaning {}", base_path.display())
            }
            ProgressKind::BaseListFailed { base_path, error } => {
                write!(f, "failed to list {}: {error}", base_path.display())
            }
            ProgressKind::DirectoryListFailed { directory, error } => {
                write!(f, "failed to list files in {}: {error}", directory.display())
            }
            ProgressKind::MetadataFailed { file, error } => {
                write!(
                    f,
                    "failed to read modification time of {}: {error}",
                    file.display()
                )
            }
            ProgressKind::DeleteFailed { file, error } => {
                write!(f, "failed to delete {}: {error}", file.display())
            }
            ProgressKind::DirectoryProcessed { directory } => {
                write!(f, "{} processed", directory.display())
            }
            ProgressKind::Completed { succeeded, failed } => {
                write!(f, "done, {succeeded} succeeded, {failed} failed")
            }
            ProgressKind::RunSkipped { reason } => {
                write!(f, "scheduled run skipped: {reason}")
            }
        }
    }
}

impl ProgressEvent {
    pub fn new(kind: ProgressKind) -> Self {
        Self {
            at: Local::now(),
            kind,
        }
    }

    /// Render as a timestamped line, e.g. `2024-01-01 03:10:00 done, 3 succeeded, 0 failed`.
    pub fn render(&self) -> String {
        format!("{} {}", self.at.format(PROGRESS_TIME_FORMAT), self.kind)
    }

    fn log(&self) {
        if self.kind.is_failure() {
            tracing::warn!(target: PROGRESS_TARGET, event = ?self.kind, "{}", self.kind);
        } else {
            tracing::info!(target: PROGRESS_TARGET, "{}", self.kind);
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Receiving half of a progress channel.
pub type ProgressReceiver = mpsc::UnboundedReceiver<ProgressEvent>;

/// Sending half of a progress channel. Cheap to clone.
///
/// A sink whose receiver has gone away keeps working; events are still
/// logged, they are just not rendered anywhere.
#[derive(Debug, Clone)]
pub struct ProgressSink {
    sender: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    /// Create a connected sink and its receiver.
    pub fn channel() -> (Self, ProgressReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A sink that only logs.
    pub fn log_only() -> Self {
        Self { sender: None }
    }

    /// Log and forward an event, returning it for the caller's own record.
    pub fn emit(&self, kind: ProgressKind) -> ProgressEvent {
        let event = ProgressEvent::new(kind);
        event.log();
        if let Some(sender) = &self.sender {
            // Receiver dropped: nothing left to render to.
            let _ = sender.send(event.clone());
        }
        event
    }
}
