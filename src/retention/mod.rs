//! Log retention: deleting expired log files.
//!
//! This module provides:
//! 1. A sweeper that walks `base/<site>/<file>` and deletes files whose
//!    modification time is older than the retention window
//! 2. A run gate that keeps manual and scheduled sweeps from overlapping
//! 3. A progress channel that carries sweep notifications, in order, to a
//!    single renderer and to the application log
//!
//! Deletion is permanent. There is no dry-run mode.

mod gate;
mod progress;
mod sweeper;

pub use gate::{DEFAULT_GATE_POLL, RunGate, RunPermit};
pub use progress::{
    PROGRESS_TARGET, PROGRESS_TIME_FORMAT, ProgressEvent, ProgressKind, ProgressReceiver, ProgressSink,
};
pub use sweeper::{RetentionSweeper, SweepResult, is_expired};
