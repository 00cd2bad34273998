//! Five-field cron expressions: minute, hour, day-of-month, month, day-of-week
//! (0 = Sunday). Every field must match; day-of-month and day-of-week are
//! AND-ed rather than OR-ed as in classic cron.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};

/// Forward search horizon for [`CronSchedule::next_after`]
const SEARCH_HORIZON_DAYS: i64 = 366 * 2;

/// Parsed expression; each field is a bitset over its value domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
}

impl CronSchedule {
    /// Returns `None` for a wrong field count or any field that matches nothing
    pub fn parse(expression: &str) -> Option<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return None;
        }

        Some(Self {
            minutes: parse_field(fields[0], 0, 59)?,
            hours: parse_field(fields[1], 0, 23)?,
            days_of_month: parse_field(fields[2], 1, 31)?,
            months: parse_field(fields[3], 1, 12)?,
            days_of_week: parse_field(fields[4], 0, 6)?,
        })
    }

    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.month_matches(at) && self.day_matches(at) && self.hour_matches(at) && self.minute_matches(at)
    }

    /// First matching minute strictly after `from`, within two years
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut candidate = truncate_to_minute(from)? + Duration::minutes(1);
        let limit = candidate + Duration::days(SEARCH_HORIZON_DAYS);

        while candidate <= limit {
            if !self.month_matches(candidate) {
                candidate = start_of_next_month(candidate)?;
                continue;
            }
            if !self.day_matches(candidate) {
                candidate = start_of_next_day(candidate)?;
                continue;
            }
            if !self.hour_matches(candidate) {
                candidate = truncate_to_hour(candidate)? + Duration::hours(1);
                continue;
            }
            if !self.minute_matches(candidate) {
                candidate += Duration::minutes(1);
                continue;
            }
            return Some(candidate);
        }

        None
    }

    fn month_matches(&self, at: DateTime<Utc>) -> bool {
        bit_set(self.months, at.month())
    }

    fn day_matches(&self, at: DateTime<Utc>) -> bool {
        bit_set(self.days_of_month, at.day())
            && bit_set(self.days_of_week, at.weekday().num_days_from_sunday())
    }

    fn hour_matches(&self, at: DateTime<Utc>) -> bool {
        bit_set(self.hours, at.hour())
    }

    fn minute_matches(&self, at: DateTime<Utc>) -> bool {
        bit_set(self.minutes, at.minute())
    }
}

fn bit_set(bits: u64, value: u32) -> bool {
    value < 64 && bits & (1u64 << value) != 0
}

/// Supports `*`, `n`, `a-b`, `*/n`, `a-b/n`, `a/n` and comma lists of those
fn parse_field(field: &str, min: u32, max: u32) -> Option<u64> {
    let mut bits = 0u64;

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step.parse::<u32>().ok()?)),
            None => (part, None),
        };
        let step = step.unwrap_or(1);
        if step == 0 {
            return None;
        }

        let (start, end) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (a.parse::<u32>().ok()?, b.parse::<u32>().ok()?)
        } else {
            let value = range.parse::<u32>().ok()?;
            // `a/n` runs from `a` to the end of the domain
            if part.contains('/') {
                (value, max)
            } else {
                (value, value)
            }
        };

        if start < min || end > max || start > end {
            return None;
        }
        let step = usize::try_from(step).ok()?;
        for value in (start..=end).step_by(step) {
            bits |= 1u64 << value;
        }
    }

    if bits == 0 {
        None
    } else {
        Some(bits)
    }
}

fn truncate_to_minute(at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    at.with_second(0)?.with_nanosecond(0)
}

fn truncate_to_hour(at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    truncate_to_minute(at)?.with_minute(0)
}

fn start_of_next_day(at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(at.date_naive().succ_opt()?.and_hms_opt(0, 0, 0)?.and_utc())
}

fn start_of_next_month(at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if at.month() == 12 {
        (at.year() + 1, 1)
    } else {
        (at.year(), at.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}
