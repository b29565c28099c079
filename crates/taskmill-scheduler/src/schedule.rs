use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeDelta, Utc, Weekday};
use taskmill_core::{AlertSink, Frequency, NewInstance, Schedule};

use crate::error::{Result, SchedulerError};

/// Parse a time-of-day offset from midnight: `[0.]hh:mm[:ss]`.
///
/// The result is always less than one day. A `0.` day prefix is accepted;
/// any other day count is rejected.
pub fn parse_time_of_day(value: &str) -> Result<TimeDelta> {
    let invalid = |reason: &str| SchedulerError::InvalidTimeOfDay {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = value.trim();
    let clock = match trimmed.split_once('.') {
        Some((days, rest)) => {
            if days.is_empty() || !days.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid("day prefix is not a number"));
            }
            if days.chars().any(|c| c != '0') {
                return Err(invalid("a time of day must be less than one day"));
            }
            rest
        }
        None => trimmed,
    };

    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(invalid("expected hh:mm or hh:mm:ss"));
    }
    let field = |s: &str, max: i64, name: &str| -> Result<i64> {
        if s.is_empty() || s.len() > 2 || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid(&format!("{name} must be one or two digits")));
        }
        let n: i64 = s.parse().map_err(|_| invalid(&format!("{name} is not a number")))?;
        if n >= max {
            return Err(invalid(&format!("{name} out of range")));
        }
        Ok(n)
    };

    let hours = field(parts[0], 24, "hours")?;
    let minutes = field(parts[1], 60, "minutes")?;
    let seconds = match parts.get(2) {
        Some(s) => field(s, 60, "seconds")?,
        None => 0,
    };

    TimeDelta::try_seconds(hours * 3600 + minutes * 60 + seconds)
        .ok_or_else(|| invalid("offset out of range"))
}

/// Expand `schedule` into the instances it owes for `date` (a UTC calendar day).
///
/// | frequency                          | instance for `date`?          |
/// |------------------------------------|-------------------------------|
/// | None, Once                         | never                         |
/// | Daily                              | always                        |
/// | WorkDays                           | Monday to Friday only         |
/// | WeeklyByDay, MonthlyByDate, Annual | never, with a warning alert   |
///
/// Depends only on its inputs; calling it twice yields the same instances
/// twice. Callers must run it at most once per date per schedule.
/// A malformed time of day is an error, reported before any instance is built.
pub fn generate_instances_for_date(
    date: NaiveDate,
    schedule: &Schedule,
    alerts: &dyn AlertSink,
) -> Result<Vec<NewInstance>> {
    match schedule.frequency {
        Frequency::None | Frequency::Once => return Ok(Vec::new()),
        Frequency::Daily => {}
        Frequency::WorkDays => {
            if matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
                return Ok(Vec::new());
            }
        }
        Frequency::WeeklyByDay | Frequency::MonthlyByDate | Frequency::Annual => {
            alerts.warning(&format!(
                "Schedule frequency {} not implemented: schedule {} produces no instances",
                schedule.frequency, schedule.id
            ));
            return Ok(Vec::new());
        }
    }

    let offset = parse_time_of_day(&schedule.target_time_of_day)?;
    let target_time = midnight_utc(date)
        .checked_add_signed(offset)
        .ok_or_else(|| SchedulerError::InvalidTimeOfDay {
            value: schedule.target_time_of_day.clone(),
            reason: format!("{date} plus the offset is out of range"),
        })?;
    Ok(vec![NewInstance {
        schedule_id: schedule.id.clone(),
        job_id: schedule.job_id.clone(),
        target_time,
    }])
}

fn midnight_utc(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// A half-open `[start, end)` span of target times, for display queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl InstanceWindow {
    /// The whole UTC day of `date`.
    pub fn for_date(date: NaiveDate) -> Self {
        let start = midnight_utc(date);
        let end = start
            .checked_add_signed(TimeDelta::days(1))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { start, end }
    }

    pub fn today() -> Self {
        Self::for_date(Utc::now().date_naive())
    }
}
