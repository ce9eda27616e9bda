//! Recurring cleanup plans.
//!
//! A plan is a [`RecurrenceScheduler`] armed on its own task. Once armed it
//! reads the clock at a fixed interval and asks its schedule source for the
//! schedule in force. When the clock enters the configured minute on a
//! matching day, and the period has not fired yet, it:
//! 1. Waits for the run gate (a manual sweep may be in progress)
//! 2. Reads the retention settings in force at that moment
//! 3. Runs a sweep to completion and releases the gate
//!
//! The tick loop does not advance while a sweep runs, so ticks that fall
//! inside a long sweep are skipped rather than queued.

mod state;

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Local, NaiveDateTime};
pub use state::{ScheduleState, same_period};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{RetentionSource, ScheduleConfig, ScheduleSource, ValidationError},
    retention::{
        DEFAULT_GATE_POLL, ProgressKind, ProgressSink, RetentionSweeper, RunGate, SweepResult,
    },
};

/// Default wall-clock polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Everything a plan needs to run a sweep when it fires.
#[derive(Clone)]
pub struct ScheduledSweep {
    gate: RunGate,
    sink: ProgressSink,
    source: Arc<dyn RetentionSource>,
    gate_poll: Duration,
}

impl ScheduledSweep {
    pub fn new(gate: RunGate, sink: ProgressSink, source: Arc<dyn RetentionSource>) -> Self {
        Self {
            gate,
            sink,
            source,
            gate_poll: DEFAULT_GATE_POLL,
        }
    }

    /// Interval between run-gate checks while a manual sweep is in progress.
    pub fn with_gate_poll(mut self, gate_poll: Duration) -> Self {
        self.gate_poll = gate_poll;
        self
    }

    /// Wait for the gate, read the live settings and sweep.
    ///
    /// Returns `None` when the settings no longer validate; the reason is
    /// reported on the progress channel and no files are touched.
    pub async fn run(&self) -> Option<SweepResult> {
        let permit = self.gate.acquire_blocking(self.gate_poll).await;

        let config = match self.source.current() {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "Retention settings invalid at scheduled run");
                self.sink.emit(ProgressKind::RunSkipped {
                    reason: e.to_string(),
                });
                return None;
            }
        };

        let result = RetentionSweeper::new(self.sink.clone())
            .sweep(&config)
            .await;
        permit.release();
        Some(result)
    }
}

/// Source of the local wall-clock time a plan compares against.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// The local wall clock.
pub fn local_clock() -> Clock {
    Arc::new(|| Local::now().naive_local())
}

/// Clock-driven state machine deciding when a plan fires.
///
/// The schedule is read from its source on every tick. The fire records in
/// [`ScheduleState`] outlive schedule changes.
pub struct RecurrenceScheduler {
    schedule: Arc<dyn ScheduleSource>,
    state: ScheduleState,
    poll_interval: Duration,
    clock: Clock,
    schedule_error: Option<String>,
}

impl RecurrenceScheduler {
    pub fn new(schedule: Arc<dyn ScheduleSource>) -> Self {
        Self {
            schedule,
            state: ScheduleState::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            clock: local_clock(),
            schedule_error: None,
        }
    }

    /// Interval between clock readings. Must be non-zero.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Result<Self, ValidationError> {
        if poll_interval.is_zero() {
            return Err(ValidationError::out_of_range(
                "schedule.poll_interval_secs",
                "must be at least 1 second",
            ));
        }
        self.poll_interval = poll_interval;
        Ok(self)
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    /// Evaluate one clock reading. Returns true when the plan should fire.
    ///
    /// While the schedule source fails, the plan stays idle. The failure is
    /// logged once per distinct error.
    pub fn tick(&mut self, now: NaiveDateTime) -> bool {
        let schedule = match self.schedule.current_schedule() {
            Ok(schedule) => {
                if self.schedule_error.take().is_some() {
                    tracing::info!(schedule = %schedule, "Schedule settings valid again");
                }
                schedule
            }
            Err(e) => {
                let message = e.to_string();
                if self.schedule_error.as_deref() != Some(message.as_str()) {
                    tracing::warn!(error = %message, "Schedule settings invalid, plan idle until fixed");
                    self.schedule_error = Some(message);
                }
                return false;
            }
        };

        let fire = self.state.try_fire(&schedule, now);
        if fire {
            tracing::info!(schedule = %schedule, at = %now, "Cleanup plan fired");
        }
        fire
    }

    /// Start polling on a background task.
    ///
    /// The plan runs until `shutdown` is cancelled. Cancellation is observed
    /// between ticks; a sweep that has started always finishes.
    pub fn arm(self, sweep: ScheduledSweep, shutdown: CancellationToken) -> JoinHandle<()> {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Arming cleanup plan"
        );
        tokio::spawn(self.run(sweep, shutdown))
    }

    async fn run(mut self, sweep: ScheduledSweep, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let now = (self.clock)();
            if self.tick(now) {
                sweep.run().await;
            }
        }

        tracing::info!("Cleanup plan stopped");
    }
}

/// An armed plan.
#[derive(Debug)]
pub struct PlanHandle {
    activated_at: DateTime<Local>,
    schedule: ScheduleConfig,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl PlanHandle {
    pub(crate) fn new(
        activated_at: DateTime<Local>,
        schedule: ScheduleConfig,
        shutdown: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            activated_at,
            schedule,
            shutdown,
            task,
        }
    }

    /// When the plan was armed.
    pub fn activated_at(&self) -> DateTime<Local> {
        self.activated_at
    }

    /// The schedule in force when the plan was armed.
    pub fn schedule(&self) -> &ScheduleConfig {
        &self.schedule
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop polling and wait for the plan task, including any sweep in flight.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Cleanup plan task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::SystemTime,
    };

    use chrono::NaiveDate;
    use tempfile::TempDir;
    use tokio::time::Instant;

    use super::*;
    use crate::config::{ConfigError, RetentionConfig, TimeOfDay};

    struct InvalidSource;

    impl RetentionSource for InvalidSource {
        fn current(&self) -> Result<RetentionConfig, ConfigError> {
            Err(ValidationError::Required { field: "base_path" }.into())
        }
    }

    /// A schedule that can be swapped while the plan is armed.
    struct SharedSchedule(Mutex<Result<ScheduleConfig, ValidationError>>);

    impl ScheduleSource for SharedSchedule {
        fn current_schedule(&self) -> Result<ScheduleConfig, ConfigError> {
            Ok(self.0.lock().unwrap().clone()?)
        }
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn daily() -> Arc<dyn ScheduleSource> {
        Arc::new(ScheduleConfig::daily(TimeOfDay::default()))
    }

    /// Local time that starts at `start` and advances with the tokio clock.
    /// Counts how often it is read.
    fn paused_clock(start: NaiveDateTime, reads: Arc<AtomicUsize>) -> Clock {
        let origin = Instant::now();
        Arc::new(move || {
            reads.fetch_add(1, Ordering::SeqCst);
            start + chrono::Duration::from_std(origin.elapsed()).unwrap()
        })
    }

    fn expired_log(base: &TempDir) -> std::path::PathBuf {
        let site = base.path().join("W3SVC1");
        fs::create_dir(&site).unwrap();
        let file = site.join("u_ex240101.log");
        fs::write(&file, "x").unwrap();
        let modified: SystemTime = (Local::now() - chrono::Duration::days(30)).into();
        fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(modified)
            .unwrap();
        file
    }

    fn completed(events: &mut crate::retention::ProgressReceiver) -> usize {
        let mut count = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event.kind, ProgressKind::Completed { .. }) {
                count += 1;
            }
        }
        count
    }

    #[test]
    fn test_tick_delegates_to_state() {
        let mut scheduler = RecurrenceScheduler::new(daily());
        assert!(scheduler.tick(at(2024, 1, 1, 3, 10)));
        assert!(!scheduler.tick(at(2024, 1, 1, 3, 10)));
        assert_eq!(scheduler.state().last_daily_fire, Some(at(2024, 1, 1, 3, 10)));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = RecurrenceScheduler::new(daily())
            .with_poll_interval(Duration::ZERO)
            .err()
            .unwrap();
        assert_eq!(err.field(), "schedule.poll_interval_secs");

        let scheduler = RecurrenceScheduler::new(daily())
            .with_poll_interval(Duration::from_millis(250))
            .unwrap();
        assert_eq!(scheduler.poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_schedule_is_read_on_every_tick() {
        let shared = Arc::new(SharedSchedule(Mutex::new(Ok(ScheduleConfig::daily(
            TimeOfDay::default(),
        )))));
        let mut scheduler = RecurrenceScheduler::new(shared.clone());

        assert!(!scheduler.tick(at(2024, 1, 1, 4, 0)));

        // Moved to 04:00 after arming; the next tick sees it.
        *shared.0.lock().unwrap() = Ok(ScheduleConfig::daily(TimeOfDay::new(4, 0).unwrap()));
        assert!(scheduler.tick(at(2024, 1, 1, 4, 0)));

        // The day's fire is remembered across the change.
        *shared.0.lock().unwrap() = Ok(ScheduleConfig::daily(TimeOfDay::new(4, 5).unwrap()));
        assert!(!scheduler.tick(at(2024, 1, 1, 4, 5)));
    }

    #[test]
    fn test_invalid_schedule_keeps_plan_idle() {
        let shared = Arc::new(SharedSchedule(Mutex::new(Err(
            ValidationError::Required { field: "schedule.time" },
        ))));
        let mut scheduler = RecurrenceScheduler::new(shared.clone());

        assert!(!scheduler.tick(at(2024, 1, 1, 3, 10)));
        assert!(!scheduler.tick(at(2024, 1, 1, 3, 10)));

        *shared.0.lock().unwrap() = Ok(ScheduleConfig::daily(TimeOfDay::default()));
        assert!(scheduler.tick(at(2024, 1, 1, 3, 10)));
    }

    #[tokio::test]
    async fn test_scheduled_sweep_reads_source_and_releases_gate() {
        let base = TempDir::new().unwrap();
        let site = base.path().join("site");
        fs::create_dir(&site).unwrap();
        fs::write(site.join("a.log"), "x").unwrap();

        let gate = RunGate::new();
        let sweep = ScheduledSweep::new(
            gate.clone(),
            ProgressSink::log_only(),
            Arc::new(RetentionConfig::new(base.path(), 30)),
        );

        let result = sweep.run().await.expect("sweep should run");
        assert_eq!(result.attempts(), 0);
        assert!(site.join("a.log").exists());
        assert!(!gate.is_running());
    }

    #[tokio::test]
    async fn test_invalid_live_settings_skip_the_run() {
        let gate = RunGate::new();
        let (sink, mut rx) = ProgressSink::channel();
        let sweep = ScheduledSweep::new(gate.clone(), sink, Arc::new(InvalidSource));

        assert!(sweep.run().await.is_none());
        assert!(!gate.is_running());

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event.kind.to_string(),
            "scheduled run skipped: Configuration validation error: [base_path] is required"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_sweep_waits_for_manual_sweep() {
        let base = TempDir::new().unwrap();
        let gate = RunGate::new();
        let manual = gate.try_acquire().unwrap();

        let sweep = ScheduledSweep::new(
            gate.clone(),
            ProgressSink::log_only(),
            Arc::new(RetentionConfig::new(base.path(), 1)),
        )
        .with_gate_poll(Duration::from_millis(100));
        let waiting = tokio::spawn(async move { sweep.run().await });

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!waiting.is_finished());

        manual.release();
        assert!(waiting.await.unwrap().is_some());
        assert!(!gate.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_armed_plan_fires_once_in_matching_minute() {
        let base = TempDir::new().unwrap();
        let expired = expired_log(&base);
        let gate = RunGate::new();
        let (sink, mut events) = ProgressSink::channel();
        let sweep = ScheduledSweep::new(
            gate.clone(),
            sink,
            Arc::new(RetentionConfig::new(base.path(), 5)),
        );

        let reads = Arc::new(AtomicUsize::new(0));
        let scheduler = RecurrenceScheduler::new(daily())
            .with_clock(paused_clock(at(2024, 1, 1, 3, 9) + chrono::Duration::seconds(30), reads))
            .with_poll_interval(Duration::from_secs(1))
            .unwrap();
        let shutdown = CancellationToken::new();
        let task = scheduler.arm(sweep, shutdown.clone());

        // 03:09:30 to 03:11:30 covers all 60 ticks of 03:10.
        tokio::time::sleep(Duration::from_secs(120)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert!(!expired.exists());
        assert!(!gate.is_running());
        assert_eq!(completed(&mut events), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_during_a_long_sweep_are_skipped() {
        let base = TempDir::new().unwrap();
        let expired = expired_log(&base);
        let gate = RunGate::new();
        let (sink, mut events) = ProgressSink::channel();
        let sweep = ScheduledSweep::new(
            gate.clone(),
            sink,
            Arc::new(RetentionConfig::new(base.path(), 5)),
        );

        // A manual sweep holds the gate when the plan fires at 03:10:00, 30s in.
        let manual = gate.try_acquire().unwrap();

        let reads = Arc::new(AtomicUsize::new(0));
        let scheduler = RecurrenceScheduler::new(daily())
            .with_clock(paused_clock(
                at(2024, 1, 1, 3, 9) + chrono::Duration::seconds(30),
                reads.clone(),
            ))
            .with_poll_interval(Duration::from_secs(1))
            .unwrap();
        let shutdown = CancellationToken::new();
        let task = scheduler.arm(sweep, shutdown.clone());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(expired.exists());
        manual.release();

        tokio::time::sleep(Duration::from_secs(60)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert!(!expired.exists());
        assert_eq!(completed(&mut events), 1);

        // 120 one-second ticks, of which about 30 fell inside the blocked fire.
        let reads = reads.load(Ordering::SeqCst);
        assert!((80..105).contains(&reads), "clock read {reads} times");
    }

    #[tokio::test]
    async fn test_armed_plan_stops_on_cancel() {
        let scheduler = RecurrenceScheduler::new(daily())
            .with_poll_interval(Duration::from_millis(10))
            .unwrap();
        let sweep = ScheduledSweep::new(
            RunGate::new(),
            ProgressSink::log_only(),
            Arc::new(InvalidSource),
        );
        let shutdown = CancellationToken::new();
        let task = scheduler.arm(sweep, shutdown.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("plan should stop promptly")
            .unwrap();
    }
}
