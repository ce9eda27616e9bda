//! Retention sweep over a two-level log tree.
//!
//! The base directory holds one subdirectory per site, and each site
//! directory holds log files:
//!
//! ```text
//! base/
//! ├── W3SVC1/
//! │   ├── u_ex240101.log
//! │   └── u_ex240102.log
//! └── W3SVC2/
//!     └── u_ex240101.log
//! ```
//!
//! Files directly under the base directory and anything nested deeper than
//! a site directory are never touched. Failures are isolated: a site that
//! cannot be listed is skipped, a file that cannot be deleted is counted and
//! reported, and the sweep carries on.

use std::{
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};

use super::progress::{ProgressEvent, ProgressKind, ProgressSink};
use crate::config::RetentionConfig;

/// Outcome of one sweep.
#[derive(Debug, Default, Clone)]
pub struct SweepResult {
    /// Expired files deleted.
    pub success_count: u64,
    /// Expired files that could not be deleted.
    pub fail_count: u64,
    /// Every progress event emitted during the sweep, in order.
    pub events: Vec<ProgressEvent>,
}

impl SweepResult {
    /// Number of deletions attempted.
    pub fn attempts(&self) -> u64 {
        self.success_count + self.fail_count
    }

    pub fn has_failures(&self) -> bool {
        self.fail_count > 0 || self.events.iter().any(|e| e.kind.is_failure())
    }
}

/// Deletes expired files below a base directory.
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    sink: ProgressSink,
}

impl RetentionSweeper {
    pub fn new(sink: ProgressSink) -> Self {
        Self { sink }
    }

    /// Run a sweep judged against the current time.
    pub async fn sweep(&self, config: &RetentionConfig) -> SweepResult {
        self.sweep_at(config, Local::now()).await
    }

    /// Run a sweep, treating `now` as the current time for every file.
    ///
    /// A file is expired when `modified + expire_days < now`.
    pub async fn sweep_at(&self, config: &RetentionConfig, now: DateTime<Local>) -> SweepResult {
        let mut run = SweepRun {
            sink: &self.sink,
            result: SweepResult::default(),
        };

        tracing::info!(
            base_path = %config.base_path.display(),
            expire_days = config.expire_days,
            "Starting retention sweep"
        );

        run.emit(ProgressKind::Started {
            base_path: config.base_path.clone(),
        });

        match list_entries(&config.base_path, EntryKind::Directory).await {
            Ok(sites) => {
                for site in sites {
                    run.sweep_site(&site, config, now).await;
                }
            }
            Err(e) => {
                run.emit(ProgressKind::BaseListFailed {
                    base_path: config.base_path.clone(),
                    error: e.to_string(),
                });
            }
        }

        let (succeeded, failed) = (run.result.success_count, run.result.fail_count);
        run.emit(ProgressKind::Completed { succeeded, failed });

        tracing::info!(
            succeeded,
            failed,
            base_path = %config.base_path.display(),
            "Retention sweep complete"
        );

        run.result
    }
}

/// State of one sweep in progress.
struct SweepRun<'a> {
    sink: &'a ProgressSink,
    result: SweepResult,
}

impl SweepRun<'_> {
    fn emit(&mut self, kind: ProgressKind) {
        let event = self.sink.emit(kind);
        self.result.events.push(event);
    }

    async fn sweep_site(&mut self, site: &Path, config: &RetentionConfig, now: DateTime<Local>) {
        let files = match list_entries(site, EntryKind::File).await {
            Ok(files) => files,
            Err(e) => {
                self.emit(ProgressKind::DirectoryListFailed {
                    directory: site.to_path_buf(),
                    error: e.to_string(),
                });
                return;
            }
        };

        for file in files {
            let modified = match modified_at(&file).await {
                Ok(modified) => modified,
                Err(e) => {
                    self.emit(ProgressKind::MetadataFailed {
                        file,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            if !is_expired(modified, config.expiry_window(), now) {
                continue;
            }

            match tokio::fs::remove_file(&file).await {
                Ok(()) => {
                    tracing::debug!(file = %file.display(), modified = %modified, "Deleted expired log file");
                    self.result.success_count += 1;
                }
                Err(e) => {
                    self.result.fail_count += 1;
                    self.emit(ProgressKind::DeleteFailed {
                        file,
                        error: e.to_string(),
                    });
                }
            }
        }

        self.emit(ProgressKind::DirectoryProcessed {
            directory: site.to_path_buf(),
        });
    }
}

/// Whether a file last modified at `modified` has outlived `window` at `now`.
///
/// An expiry instant past the representable range never expires.
pub fn is_expired(modified: DateTime<Local>, window: chrono::Duration, now: DateTime<Local>) -> bool {
    modified
        .checked_add_signed(window)
        .is_some_and(|expires_at| expires_at < now)
}

async fn modified_at(path: &Path) -> io::Result<DateTime<Local>> {
    let metadata = tokio::fs::metadata(path).await?;
    Ok(DateTime::<Local>::from(metadata.modified()?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryKind {
    Directory,
    File,
}

/// List the directories or the files directly inside `dir`, in the order the
/// file system yields them. Symlinks are classified by their target; a
/// dangling link counts as a file.
async fn list_entries(dir: &Path, kind: EntryKind) -> io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut paths = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_dir = match entry.file_type().await {
            Ok(file_type) if file_type.is_symlink() => tokio::fs::metadata(&path)
                .await
                .is_ok_and(|metadata| metadata.is_dir()),
            Ok(file_type) => file_type.is_dir(),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };

        let wanted = match kind {
            EntryKind::Directory => is_dir,
            EntryKind::File => !is_dir,
        };
        if wanted {
            paths.push(path);
        }
    }

    Ok(paths)
}
