//! Recurring sweep schedule configuration.
//!
//! # Example
//!
//! ```toml
//! [schedule]
//! period = "weekly"
//! weekday = "wednesday"
//! time = "03:10"
//! ```
//!
//! `period = "monthly"` takes `day = 1..=29` instead of `weekday`.
//! Days after the 29th are not offered so that every month has the day
//! in all but February of common years; a plan for the 29th simply does not
//! run in a February with 28 days.

use std::{fmt, str::FromStr, time::Duration};

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use super::ValidationError;

const WEEKDAY_FIELD: &str = "schedule.weekday";
const DAY_FIELD: &str = "schedule.day";
const TIME_FIELD: &str = "schedule.time";
const POLL_FIELD: &str = "schedule.poll_interval_secs";

/// Latest selectable day of the month.
pub const MAX_MONTH_DAY: u32 = 29;

/// Minutes are selectable in steps of this size.
pub const MINUTE_STEP: u32 = 5;

/// Recurrence granularity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    /// Every day. `none` is accepted as an alias (no sub-selector).
    #[default]
    #[serde(alias = "none")]
    Daily,
    Weekly,
    Monthly,
}

impl FromStr for PeriodType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "none" => Ok(PeriodType::Daily),
            "weekly" => Ok(PeriodType::Weekly),
            "monthly" => Ok(PeriodType::Monthly),
            other => Err(ValidationError::out_of_range(
                "schedule.period",
                format!("must be daily, weekly or monthly, got {other:?}"),
            )),
        }
    }
}

/// Weekday as written in the config: a name or an index with Sunday = 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WeekdayInput {
    Index(i64),
    Name(String),
}

impl WeekdayInput {
    fn resolve(&self) -> Result<Weekday, ValidationError> {
        match self {
            WeekdayInput::Index(i) => weekday_from_sunday_index(*i),
            WeekdayInput::Name(name) => parse_weekday(name),
        }
    }
}

fn weekday_from_sunday_index(index: i64) -> Result<Weekday, ValidationError> {
    match index {
        0 => Ok(Weekday::Sun),
        1 => Ok(Weekday::Mon),
        2 => Ok(Weekday::Tue),
        3 => Ok(Weekday::Wed),
        4 => Ok(Weekday::Thu),
        5 => Ok(Weekday::Fri),
        6 => Ok(Weekday::Sat),
        _ => Err(ValidationError::out_of_range(
            WEEKDAY_FIELD,
            format!("index must be 0-6 with Sunday = 0, got {index}"),
        )),
    }
}

/// Parse a weekday name, abbreviation or Sunday-based index.
pub fn parse_weekday(input: &str) -> Result<Weekday, ValidationError> {
    let input = input.trim();
    if let Ok(index) = input.parse::<i64>() {
        return weekday_from_sunday_index(index);
    }
    input.parse::<Weekday>().map_err(|_| {
        ValidationError::out_of_range(WEEKDAY_FIELD, format!("unknown weekday {input:?}"))
    })
}

/// Schedule section as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleSection {
    /// Recurrence granularity.
    #[serde(default)]
    pub period: PeriodType,

    /// Weekday for weekly plans. Default: Monday.
    #[serde(default)]
    pub weekday: Option<WeekdayInput>,

    /// Day of month (1-29) for monthly plans. Default: 1.
    #[serde(default)]
    pub day: Option<u32>,

    /// Time of day as `HH:MM`. Default: 03:10.
    #[serde(default)]
    pub time: Option<String>,

    /// How often the wall clock is checked, in seconds.
    /// Default: 1
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            period: PeriodType::default(),
            weekday: None,
            day: None,
            time: None,
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    1
}

impl ScheduleSection {
    /// Return a copy with command-line values taking precedence.
    pub fn with_overrides(
        &self,
        period: Option<PeriodType>,
        weekday: Option<&str>,
        day: Option<u32>,
        time: Option<&str>,
    ) -> Self {
        Self {
            period: period.unwrap_or(self.period),
            weekday: weekday
                .map(|w| WeekdayInput::Name(w.to_string()))
                .or_else(|| self.weekday.clone()),
            day: day.or(self.day),
            time: time.map(str::to_string).or_else(|| self.time.clone()),
            poll_interval_secs: self.poll_interval_secs,
        }
    }

    /// Validate the section into a [`ScheduleConfig`].
    pub fn resolve(&self) -> Result<ScheduleConfig, ValidationError> {
        let time_of_day = match &self.time {
            Some(t) => t.parse()?,
            None => TimeOfDay::default(),
        };

        let period = match self.period {
            PeriodType::Daily => Period::Daily,
            PeriodType::Weekly => {
                let weekday = match &self.weekday {
                    Some(w) => w.resolve()?,
                    None => Weekday::Mon,
                };
                Period::Weekly(weekday)
            }
            PeriodType::Monthly => Period::Monthly(check_month_day(self.day.unwrap_or(1))?),
        };

        Ok(ScheduleConfig {
            period,
            time_of_day,
        })
    }

    /// Wall-clock polling interval.
    pub fn poll_interval(&self) -> Result<Duration, ValidationError> {
        if self.poll_interval_secs == 0 {
            return Err(ValidationError::out_of_range(
                POLL_FIELD,
                "must be at least 1 second",
            ));
        }
        Ok(Duration::from_secs(self.poll_interval_secs))
    }
}

fn check_month_day(day: u32) -> Result<u32, ValidationError> {
    if !(1..=MAX_MONTH_DAY).contains(&day) {
        return Err(ValidationError::out_of_range(
            DAY_FIELD,
            format!("must be between 1 and {MAX_MONTH_DAY}, got {day}"),
        ));
    }
    Ok(day)
}

/// Validated recurrence with its sub-selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Daily,
    Weekly(Weekday),
    /// Day of month, 1..=29.
    Monthly(u32),
}

impl Period {
    pub fn period_type(&self) -> PeriodType {
        match self {
            Period::Daily => PeriodType::Daily,
            Period::Weekly(_) => PeriodType::Weekly,
            Period::Monthly(_) => PeriodType::Monthly,
        }
    }

    /// Whether `date` is a day on which this period can fire.
    pub fn matches_day(&self, now: &NaiveDateTime) -> bool {
        match self {
            Period::Daily => true,
            Period::Weekly(weekday) => now.weekday() == *weekday,
            Period::Monthly(day) => now.day() == *day,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Daily => write!(f, "daily"),
            Period::Weekly(weekday) => write!(f, "weekly on {weekday}"),
            Period::Monthly(day) => write!(f, "monthly on day {day}"),
        }
    }
}

/// Validated schedule: when a plan fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub period: Period,
    pub time_of_day: TimeOfDay,
}

impl ScheduleConfig {
    pub fn daily(time_of_day: TimeOfDay) -> Self {
        Self {
            period: Period::Daily,
            time_of_day,
        }
    }

    pub fn weekly(weekday: Weekday, time_of_day: TimeOfDay) -> Self {
        Self {
            period: Period::Weekly(weekday),
            time_of_day,
        }
    }

    /// Fails unless `day` is between 1 and [`MAX_MONTH_DAY`].
    pub fn monthly(day: u32, time_of_day: TimeOfDay) -> Result<Self, ValidationError> {
        Ok(Self {
            period: Period::Monthly(check_month_day(day)?),
            time_of_day,
        })
    }

    /// Whether `now` falls in a minute this schedule fires in.
    /// Seconds are ignored.
    pub fn matches(&self, now: &NaiveDateTime) -> bool {
        self.period.matches_day(now) && self.time_of_day.matches(now)
    }
}

impl fmt::Display for ScheduleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.period, self.time_of_day)
    }
}

/// Hour and minute a plan fires at. Minutes are multiples of five.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    hour: u32,
    minute: u32,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Result<Self, ValidationError> {
        if hour > 23 {
            return Err(ValidationError::out_of_range(
                TIME_FIELD,
                format!("hour must be 0-23, got {hour}"),
            ));
        }
        if minute > 55 || minute % MINUTE_STEP != 0 {
            return Err(ValidationError::out_of_range(
                TIME_FIELD,
                format!("minute must be a multiple of {MINUTE_STEP} between 0 and 55, got {minute}"),
            ));
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn matches(&self, now: &NaiveDateTime) -> bool {
        now.hour() == self.hour && now.minute() == self.minute
    }
}

impl Default for TimeOfDay {
    fn default() -> Self {
        Self {
            hour: 3,
            minute: 10,
        }
    }
}

impl FromStr for TimeOfDay {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            ValidationError::out_of_range(TIME_FIELD, format!("expected HH:MM, got {s:?}"))
        };
        let (hour, minute) = s.trim().split_once(':').ok_or_else(invalid)?;
        let hour = hour.trim().parse::<u32>().map_err(|_| invalid())?;
        let minute = minute.trim().parse::<u32>().map_err(|_| invalid())?;
        Self::new(hour, minute)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}
