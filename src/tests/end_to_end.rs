use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use chrono::{Duration, Local, NaiveDate};
use tempfile::TempDir;

use crate::{
    cleaner::{Cleaner, CleanerError},
    config::{FileConfigSource, ScheduleConfig, TimeOfDay},
    retention::{ProgressKind, ProgressReceiver, ProgressSink},
    scheduler::{RecurrenceScheduler, ScheduledSweep},
};

fn write_aged(path: &Path, age: Duration) {
    fs::write(path, "#Fields: date time s-ip cs-method\n").unwrap();
    let modified: SystemTime = (Local::now() - age).into();
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(modified)
        .unwrap();
}

/// `site1` holds a 10-day-old file, `site2` a 1-day-old one.
fn two_site_tree() -> (TempDir, PathBuf, PathBuf) {
    let base = TempDir::new().unwrap();
    let site1 = base.path().join("site1");
    let site2 = base.path().join("site2");
    fs::create_dir(&site1).unwrap();
    fs::create_dir(&site2).unwrap();

    let old = site1.join("u_ex240101.log");
    let recent = site2.join("u_ex240110.log");
    write_aged(&old, Duration::days(10));
    write_aged(&recent, Duration::days(1));
    (base, old, recent)
}

fn drain(receiver: &mut ProgressReceiver) -> Vec<ProgressKind> {
    let mut kinds = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        kinds.push(event.kind);
    }
    kinds
}

#[tokio::test]
async fn test_manual_clean_removes_only_expired_files() {
    let (base, old, recent) = two_site_tree();
    let (sink, mut receiver) = ProgressSink::channel();
    let cleaner = Cleaner::new(sink);

    let result = cleaner
        .clean_now_from_input(&base.path().to_string_lossy(), "5")
        .unwrap()
        .await
        .unwrap();

    assert_eq!(result.success_count, 1);
    assert_eq!(result.fail_count, 0);
    assert!(!old.exists());
    assert!(recent.exists());

    let kinds = drain(&mut receiver);
    assert!(matches!(kinds.first(), Some(ProgressKind::Started { .. })));
    let processed = kinds
        .iter()
        .filter(|k| matches!(k, ProgressKind::DirectoryProcessed { .. }))
        .count();
    assert_eq!(processed, 2);
    assert_eq!(
        kinds.last().map(ToString::to_string).as_deref(),
        Some("done, 1 succeeded, 0 failed")
    );

    // The receiver saw exactly what the result recorded.
    assert_eq!(
        kinds,
        result.events.into_iter().map(|e| e.kind).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_manual_clean_rejected_while_scheduled_sweep_runs() {
    let (base, old, _recent) = two_site_tree();
    let cleaner = Cleaner::new(ProgressSink::log_only());

    // A scheduled sweep sharing the gate is mid-run.
    let scheduled = cleaner.gate().try_acquire().unwrap();

    let err = cleaner
        .clean_now_from_input(&base.path().to_string_lossy(), "5")
        .unwrap_err();
    assert!(matches!(err, CleanerError::AlreadyRunning));
    assert!(old.exists());

    scheduled.release();
    let result = cleaner
        .clean_now_from_input(&base.path().to_string_lossy(), "5")
        .unwrap()
        .await
        .unwrap();
    assert_eq!(result.success_count, 1);
}

#[tokio::test]
async fn test_scheduled_fire_uses_settings_in_force_at_fire_time() {
    let (base, old, recent) = two_site_tree();
    let config_dir = TempDir::new().unwrap();
    let config_path = config_dir.path().join("logsweep.toml");
    let write_config = |days: u32| {
        fs::write(
            &config_path,
            format!(
                "[retention]\nbase_path = {:?}\nexpire_days = {days}\n",
                base.path().to_string_lossy()
            ),
        )
        .unwrap();
    };

    // Armed with a 30-day window, which would keep both files.
    write_config(30);
    let (sink, mut receiver) = ProgressSink::channel();
    let cleaner = Cleaner::new(sink.clone());
    let source = Arc::new(FileConfigSource::new(Some(config_path.clone())));
    let sweep = ScheduledSweep::new(cleaner.gate().clone(), sink, source);

    let fire_at = |day: u32| {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(3, 10, 0)
            .unwrap()
    };
    let mut scheduler = RecurrenceScheduler::new(Arc::new(ScheduleConfig::daily(TimeOfDay::default())));

    // The window is shortened before the plan fires.
    write_config(5);
    assert!(scheduler.tick(fire_at(1)));
    let result = sweep.run().await.unwrap();

    assert_eq!(result.success_count, 1);
    assert!(!old.exists());
    assert!(recent.exists());
    assert!(!cleaner.gate().is_running());

    // Same day: no second fire.
    assert!(!scheduler.tick(fire_at(1)));

    let kinds = drain(&mut receiver);
    assert_eq!(
        kinds.last().map(ToString::to_string).as_deref(),
        Some("done, 1 succeeded, 0 failed")
    );
}

#[tokio::test]
async fn test_scheduled_fire_with_broken_config_is_skipped() {
    let (base, old, _recent) = two_site_tree();
    let config_dir = TempDir::new().unwrap();
    let config_path = config_dir.path().join("logsweep.toml");
    fs::write(
        &config_path,
        format!(
            "[retention]\nbase_path = {:?}\nexpire_days = 5\n",
            base.path().to_string_lossy()
        ),
    )
    .unwrap();

    let (sink, mut receiver) = ProgressSink::channel();
    let cleaner = Cleaner::new(sink.clone());
    let source = Arc::new(FileConfigSource::new(Some(config_path.clone())));
    let sweep = ScheduledSweep::new(cleaner.gate().clone(), sink, source);

    fs::write(&config_path, "[retention]\nexpire_days = \"soon\"\n").unwrap();
    assert!(sweep.run().await.is_none());
    assert!(old.exists());

    let kinds = drain(&mut receiver);
    assert_eq!(kinds.len(), 1);
    assert!(matches!(kinds[0], ProgressKind::RunSkipped { .. }));
    assert!(kinds[0].is_failure());
}

#[tokio::test]
async fn test_schedule_edit_takes_effect_without_rearming() {
    let (base, old, recent) = two_site_tree();
    let config_dir = TempDir::new().unwrap();
    let config_path = config_dir.path().join("logsweep.toml");
    let write_config = |time: &str| {
        fs::write(
            &config_path,
            format!(
                "[retention]\nbase_path = {:?}\nexpire_days = 5\n\n[schedule]\nperiod = \"daily\"\ntime = \"{time}\"\n",
                base.path().to_string_lossy()
            ),
        )
        .unwrap();
    };

    write_config("03:10");
    let cleaner = Cleaner::new(ProgressSink::log_only());
    let source = Arc::new(FileConfigSource::new(Some(config_path.clone())));
    let sweep = ScheduledSweep::new(cleaner.gate().clone(), ProgressSink::log_only(), source.clone());
    let mut scheduler = RecurrenceScheduler::new(source);

    let jan1 = |hour: u32, minute: u32| {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    };

    // Moved to 23:00 while armed: 03:10 no longer fires.
    write_config("23:00");
    assert!(!scheduler.tick(jan1(3, 10)));
    assert!(old.exists());

    assert!(scheduler.tick(jan1(23, 0)));
    let result = sweep.run().await.unwrap();
    assert_eq!(result.success_count, 1);
    assert!(!old.exists());
    assert!(recent.exists());

    // Moving it again the same day does not fire a second time.
    write_config("23:05");
    assert!(!scheduler.tick(jan1(23, 5)));
    assert_eq!(scheduler.state().last_daily_fire, Some(jan1(23, 0)));
}
