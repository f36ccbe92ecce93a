use anyhow::Result;
use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Longest accepted interval: one hundred leap years.
pub const MAX_INTERVAL_HOURS: u32 = 24 * 366 * 100;

/// When a recurring job fires. Times are local wall-clock times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    /// Every day at HH:MM.
    Daily { hour: u32, minute: u32 },

    /// Once a week on `day` at HH:MM.
    Weekly { day: Weekday, hour: u32, minute: u32 },

    /// Every N hours, counted from the previous firing.
    Interval { every_hours: u32 },
}

impl Trigger {
    pub fn validate(&self) -> Result<()> {
        match self {
            Trigger::Daily { hour, minute } | Trigger::Weekly { hour, minute, .. } => {
                if NaiveTime::from_hms_opt(*hour, *minute, 0).is_none() {
                    anyhow::bail!("time of day {hour:02}:{minute:02} is out of range");
                }
            }
            Trigger::Interval { every_hours } => {
                if *every_hours == 0 {
                    anyhow::bail!("every_hours must be at least 1");
                }
                if *every_hours > MAX_INTERVAL_HOURS {
                    anyhow::bail!("every_hours must be at most {MAX_INTERVAL_HOURS}");
                }
            }
        }
        Ok(())
    }

    /// First firing strictly after `after`.
    pub fn next_occurrence(&self, after: NaiveDateTime) -> NaiveDateTime {
        match self {
            Trigger::Daily { hour, minute } => {
                let candidate = after.date().and_time(time_of_day(*hour, *minute));
                if candidate > after {
                    candidate
                } else {
                    advance(candidate, Duration::days(1))
                }
            }

            Trigger::Weekly { day, hour, minute } => {
                let today = after.weekday().num_days_from_monday() as i64;
                let target = day.num_days_from_monday() as i64;
                let days_ahead = (target - today).rem_euclid(7);
                let candidate = (after.date() + Duration::days(days_ahead))
                    .and_time(time_of_day(*hour, *minute));
                if candidate > after {
                    candidate
                } else {
                    advance(candidate, Duration::days(7))
                }
            }

            Trigger::Interval { every_hours } => {
                advance(after, Duration::hours(i64::from((*every_hours).max(1))))
            }
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Trigger::Daily { hour, minute } => format!("daily at {hour:02}:{minute:02}"),
            Trigger::Weekly { day, hour, minute } => {
                format!("every {day} at {hour:02}:{minute:02}")
            }
            Trigger::Interval { every_hours } => format!("every {every_hours} hours"),
        }
    }
}

// Saturates at the end of representable time instead of overflowing.
fn advance(from: NaiveDateTime, by: Duration) -> NaiveDateTime {
    from.checked_add_signed(by).unwrap_or(NaiveDateTime::MAX)
}

// Out-of-range values are rejected by `validate` when the config loads.
fn time_of_day(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}
