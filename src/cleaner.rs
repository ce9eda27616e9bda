//! The two user actions: "clean now" and "start plan".
//!
//! A [`Cleaner`] owns the run gate and the progress sink shared by every sweep
//! it starts, so manual and scheduled sweeps never overlap and all of their
//! progress reaches the same renderer.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{ConfigError, RetentionConfig, RetentionSource, ScheduleSource, ValidationError},
    retention::{ProgressSink, RetentionSweeper, RunGate, SweepResult},
    scheduler::{PlanHandle, RecurrenceScheduler, ScheduledSweep},
};

#[derive(Debug, thiserror::Error)]
pub enum CleanerError {
    #[error("a cleanup is already running")]
    AlreadyRunning,

    #[error("a cleanup plan is already active since {}", .at.format("%Y-%m-%d %H:%M:%S"))]
    PlanAlreadyStarted { at: DateTime<Local> },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

pub struct Cleaner {
    gate: RunGate,
    sink: ProgressSink,
    plan_started_at: Mutex<Option<DateTime<Local>>>,
}

impl Cleaner {
    pub fn new(sink: ProgressSink) -> Self {
        Self {
            gate: RunGate::new(),
            sink,
            plan_started_at: Mutex::new(None),
        }
    }

    pub fn gate(&self) -> &RunGate {
        &self.gate
    }

    /// When the plan was started, if one has been.
    pub fn plan_started_at(&self) -> Option<DateTime<Local>> {
        *self.plan_started_at.lock()
    }

    /// Start a sweep on a background task.
    ///
    /// Fails with [`CleanerError::AlreadyRunning`] if a manual or scheduled
    /// sweep holds the gate. The gate is released when the task finishes.
    pub fn clean_now(&self, config: RetentionConfig) -> Result<JoinHandle<SweepResult>, CleanerError> {
        let Some(permit) = self.gate.try_acquire() else {
            tracing::warn!("Manual cleanup rejected, a cleanup is already running");
            return Err(CleanerError::AlreadyRunning);
        };

        tracing::info!(
            base_path = %config.base_path.display(),
            expire_days = config.expire_days,
            "Starting manual cleanup"
        );

        let sweeper = RetentionSweeper::new(self.sink.clone());
        Ok(tokio::spawn(async move {
            let result = sweeper.sweep(&config).await;
            permit.release();
            result
        }))
    }

    /// Validate raw input, then [`Cleaner::clean_now`].
    ///
    /// Validation runs first, so bad input is reported even while another
    /// sweep is running.
    pub fn clean_now_from_input(
        &self,
        base_path: &str,
        expire_days: &str,
    ) -> Result<JoinHandle<SweepResult>, CleanerError> {
        let config = RetentionConfig::from_input(base_path, expire_days)?;
        self.clean_now(config)
    }

    /// Arm a recurring plan.
    ///
    /// The retention settings and the schedule are validated now. Afterwards
    /// the schedule is read from `schedule` on every tick and the retention
    /// settings from `source` every time the plan fires. Only one plan may be
    /// started per `Cleaner`, even after an earlier one was stopped.
    pub fn start_plan(
        &self,
        schedule: Arc<dyn ScheduleSource>,
        poll_interval: Duration,
        source: Arc<dyn RetentionSource>,
    ) -> Result<PlanHandle, CleanerError> {
        let mut started = self.plan_started_at.lock();
        if let Some(at) = *started {
            return Err(CleanerError::PlanAlreadyStarted { at });
        }

        let retention = source.current()?;
        let armed = schedule.current_schedule()?;
        let scheduler = RecurrenceScheduler::new(schedule).with_poll_interval(poll_interval)?;
        let activated_at = Local::now();

        tracing::info!(
            schedule = %armed,
            base_path = %retention.base_path.display(),
            expire_days = retention.expire_days,
            "Cleanup plan started"
        );

        let shutdown = CancellationToken::new();
        let sweep = ScheduledSweep::new(self.gate.clone(), self.sink.clone(), source);
        let task = scheduler.arm(sweep, shutdown.clone());

        *started = Some(activated_at);
        Ok(PlanHandle::new(activated_at, armed, shutdown, task))
    }
}
