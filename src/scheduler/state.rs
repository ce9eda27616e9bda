//! Per-period "already fired" bookkeeping.

use chrono::{Datelike, NaiveDateTime};

use crate::config::{PeriodType, ScheduleConfig};

/// Last fire time for each period type, in local wall-clock time.
///
/// A recorded fire blocks further fires of the same period type until the
/// clock enters a new calendar day, ISO week or calendar month; at that point
/// the record is stale and is cleared. Lives in memory only.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScheduleState {
    pub last_daily_fire: Option<NaiveDateTime>,
    pub last_weekly_fire: Option<NaiveDateTime>,
    pub last_monthly_fire: Option<NaiveDateTime>,
}

impl ScheduleState {
    pub fn last_fire(&self, period: PeriodType) -> Option<NaiveDateTime> {
        match period {
            PeriodType::Daily => self.last_daily_fire,
            PeriodType::Weekly => self.last_weekly_fire,
            PeriodType::Monthly => self.last_monthly_fire,
        }
    }

    fn slot_mut(&mut self, period: PeriodType) -> &mut Option<NaiveDateTime> {
        match period {
            PeriodType::Daily => &mut self.last_daily_fire,
            PeriodType::Weekly => &mut self.last_weekly_fire,
            PeriodType::Monthly => &mut self.last_monthly_fire,
        }
    }

    /// Forget fires recorded in an earlier instance of their period.
    pub fn clear_stale(&mut self, now: &NaiveDateTime) {
        for period in [PeriodType::Daily, PeriodType::Weekly, PeriodType::Monthly] {
            let slot = self.slot_mut(period);
            if slot.is_some_and(|fired| !same_period(period, &fired, now)) {
                *slot = None;
            }
        }
    }

    /// Decide whether `schedule` fires at `now`, recording the fire if so.
    ///
    /// Returns true at most once per period instance.
    pub fn try_fire(&mut self, schedule: &ScheduleConfig, now: NaiveDateTime) -> bool {
        self.clear_stale(&now);

        if !schedule.matches(&now) {
            return false;
        }

        let slot = self.slot_mut(schedule.period.period_type());
        if slot.is_some() {
            return false;
        }
        *slot = Some(now);
        true
    }
}

/// Whether two instants fall in the same day, ISO week or month.
pub fn same_period(period: PeriodType, a: &NaiveDateTime, b: &NaiveDateTime) -> bool {
    match period {
        PeriodType::Daily => a.date() == b.date(),
        // IsoWeek compares the ISO year as well as the week number.
        PeriodType::Weekly => a.iso_week() == b.iso_week(),
        PeriodType::Monthly => (a.year(), a.month()) == (b.year(), b.month()),
    }
}
