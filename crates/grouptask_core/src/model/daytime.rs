//! Daytime clamping for reminder times.
//!
//! # Invariants
//! - A clamped time falls inside `[earliest_hour:00, latest_hour:00]` local.
//! - When a deadline is given, clamping forward never moves a reminder past it;
//!   the previous evening is used instead.

use crate::model::error::{DomainError, DomainResult};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Pure `clamp(time, deadline, zone) -> time` utility consumed by reminder
/// computation.
pub trait DaytimeClamp {
    fn clamp(
        &self,
        time: DateTime<Utc>,
        deadline: Option<DateTime<Utc>>,
        zone: FixedOffset,
    ) -> DateTime<Utc>;
}

/// Local-hour window reminders may be delivered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaytimeWindow {
    pub earliest_hour: u32,
    pub latest_hour: u32,
}

impl Default for DaytimeWindow {
    fn default() -> Self {
        Self {
            earliest_hour: 8,
            latest_hour: 21,
        }
    }
}

impl DaytimeWindow {
    pub fn new(earliest_hour: u32, latest_hour: u32) -> DomainResult<Self> {
        let window = Self {
            earliest_hour,
            latest_hour,
        };
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.latest_hour > 23 {
            return Err(DomainError::validation(
                "latest_hour",
                format!("must be <= 23, got {}", self.latest_hour),
            ));
        }
        if self.earliest_hour >= self.latest_hour {
            return Err(DomainError::validation(
                "earliest_hour",
                format!(
                    "must be before latest_hour ({} >= {})",
                    self.earliest_hour, self.latest_hour
                ),
            ));
        }
        Ok(())
    }

    /// Whether `time` already falls inside the window in `zone`.
    pub fn contains(&self, time: DateTime<Utc>, zone: FixedOffset) -> bool {
        let local = time.with_timezone(&zone).time();
        local.hour() >= self.earliest_hour && local <= self.latest_time()
    }

    fn latest_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.latest_hour, 0, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl DaytimeClamp for DaytimeWindow {
    fn clamp(
        &self,
        time: DateTime<Utc>,
        deadline: Option<DateTime<Utc>>,
        zone: FixedOffset,
    ) -> DateTime<Utc> {
        let local = time.with_timezone(&zone);
        let date = local.date_naive();

        if local.time() > self.latest_time() {
            return at_local_hour(date, self.latest_hour, zone).unwrap_or(time);
        }

        if local.hour() < self.earliest_hour {
            let morning = at_local_hour(date, self.earliest_hour, zone).unwrap_or(time);
            let past_deadline = deadline.is_some_and(|deadline| morning > deadline);
            if !past_deadline {
                return morning;
            }
            return date
                .pred_opt()
                .and_then(|previous| at_local_hour(previous, self.latest_hour, zone))
                .unwrap_or(time);
        }

        time
    }
}

fn at_local_hour(date: NaiveDate, hour: u32, zone: FixedOffset) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(hour, 0, 0)?;
    zone.from_local_datetime(&naive)
        .single()
        .map(|local| local.with_timezone(&Utc))
}

/// Upper bound for any minute offset (reminder lead times, recurrence
/// intervals): ten years.
pub const MAX_OFFSET_MINUTES: i64 = 10 * 366 * 24 * 60;

/// Accepts `minutes` in `0..=MAX_OFFSET_MINUTES`.
pub(crate) fn validate_offset_minutes(field: &'static str, minutes: i64) -> DomainResult<i64> {
    if !(0..=MAX_OFFSET_MINUTES).contains(&minutes) {
        return Err(DomainError::validation(
            field,
            format!("must be in 0..={MAX_OFFSET_MINUTES} minutes, got {minutes}"),
        ));
    }
    Ok(minutes)
}

/// `time - minutes`, failing instead of overflowing.
pub(crate) fn minutes_before(
    time: DateTime<Utc>,
    minutes: i64,
    field: &'static str,
) -> DomainResult<DateTime<Utc>> {
    Duration::try_minutes(minutes)
        .and_then(|offset| time.checked_sub_signed(offset))
        .ok_or_else(|| DomainError::validation(field, format!("{minutes} minutes is out of range")))
}

/// `time + minutes`, failing instead of overflowing.
pub(crate) fn minutes_after(
    time: DateTime<Utc>,
    minutes: i64,
    field: &'static str,
) -> DomainResult<DateTime<Utc>> {
    Duration::try_minutes(minutes)
        .and_then(|offset| time.checked_add_signed(offset))
        .ok_or_else(|| DomainError::validation(field, format!("{minutes} minutes is out of range")))
}
