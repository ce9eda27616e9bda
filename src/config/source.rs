//! Live settings for scheduled sweeps.
//!
//! A plan does not capture its settings when it is armed. On every tick it
//! asks its [`ScheduleSource`] for the schedule in force, and each time it
//! fires it asks its [`RetentionSource`] for the current retention values, so
//! edits to the config file take effect without restarting.

use std::path::PathBuf;

use super::{AppConfig, ConfigError, PeriodType, RetentionConfig, ScheduleConfig};

/// Supplies the retention settings in force right now.
pub trait RetentionSource: Send + Sync {
    fn current(&self) -> Result<RetentionConfig, ConfigError>;
}

/// Supplies the schedule in force right now.
pub trait ScheduleSource: Send + Sync {
    fn current_schedule(&self) -> Result<ScheduleConfig, ConfigError>;
}

/// Fixed settings, used when the caller wants a snapshot.
impl RetentionSource for RetentionConfig {
    fn current(&self) -> Result<RetentionConfig, ConfigError> {
        Ok(self.clone())
    }
}

impl ScheduleSource for ScheduleConfig {
    fn current_schedule(&self) -> Result<ScheduleConfig, ConfigError> {
        Ok(*self)
    }
}

/// Re-reads the config file on every call and applies command-line overrides.
#[derive(Debug, Clone, Default)]
pub struct FileConfigSource {
    path: Option<PathBuf>,
    base_path: Option<String>,
    expire_days: Option<String>,
    period: Option<PeriodType>,
    weekday: Option<String>,
    day: Option<u32>,
    time: Option<String>,
}

impl FileConfigSource {
    /// Read from `path`, or only from the overrides when no file is in use.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            ..Default::default()
        }
    }

    pub fn with_overrides(mut self, base_path: Option<String>, expire_days: Option<String>) -> Self {
        self.base_path = base_path;
        self.expire_days = expire_days;
        self
    }

    pub fn with_schedule_overrides(
        mut self,
        period: Option<PeriodType>,
        weekday: Option<String>,
        day: Option<u32>,
        time: Option<String>,
    ) -> Self {
        self.period = period;
        self.weekday = weekday;
        self.day = day;
        self.time = time;
        self
    }

    fn load(&self) -> Result<AppConfig, ConfigError> {
        match &self.path {
            Some(path) => AppConfig::from_file(path),
            None => Ok(AppConfig::default()),
        }
    }
}

impl RetentionSource for FileConfigSource {
    fn current(&self) -> Result<RetentionConfig, ConfigError> {
        let section = self
            .load()?
            .retention
            .with_overrides(self.base_path.as_deref(), self.expire_days.as_deref());
        Ok(section.resolve()?)
    }
}

impl ScheduleSource for FileConfigSource {
    fn current_schedule(&self) -> Result<ScheduleConfig, ConfigError> {
        let section = self.load()?.schedule.with_overrides(
            self.period,
            self.weekday.as_deref(),
            self.day,
            self.time.as_deref(),
        );
        Ok(section.resolve()?)
    }
}
