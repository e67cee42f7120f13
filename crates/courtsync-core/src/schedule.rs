//! Six-field cron expressions evaluated in UTC.
//!
//! Format: `sec min hour day-of-month month day-of-week`. Each field accepts
//! `*`, single values, ranges `a-b`, steps `*/n` `a/n` `a-b/n`, and comma
//! lists. Day-of-month and day-of-week also accept `?` (no constraint).
//! Months accept `JAN`..`DEC`, weekdays `SUN`..`SAT`; weekday `0` and `7` are
//! both Sunday.
//!
//! When both day fields are restricted a day matches if either does.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};

use crate::domain::ScheduleError;

/// How far ahead `next_after` searches before giving up.
const SEARCH_YEARS: i32 = 8;

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const DAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    /// Offset added to a name's index to get its value.
    name_base: u32,
    allow_question: bool,
}

const SECOND: FieldSpec = FieldSpec {
    name: "second",
    min: 0,
    max: 59,
    names: &[],
    name_base: 0,
    allow_question: false,
};
const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    ..SECOND
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    max: 23,
    ..SECOND
};
const DAY_OF_MONTH: FieldSpec = FieldSpec {
    name: "day-of-month",
    min: 1,
    max: 31,
    names: &[],
    name_base: 0,
    allow_question: true,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &MONTH_NAMES,
    name_base: 1,
    allow_question: false,
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &DAY_NAMES,
    name_base: 0,
    allow_question: true,
};

/// Parsed field: bit `n` set means value `n` matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    bits: u64,
    /// `*` or `?`: no constraint.
    any: bool,
}

impl Field {
    fn matches(&self, value: u32) -> bool {
        self.bits & (1u64 << value) != 0
    }
}

/// A parsed cron schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expr: String,
    seconds: Field,
    minutes: Field,
    hours: Field,
    days_of_month: Field,
    months: Field,
    days_of_week: Field,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 6 {
            return Err(ScheduleError::FieldCount(parts.len()));
        }

        let mut days_of_week = parse_field(parts[5], &DAY_OF_WEEK)?;
        // Fold 7 onto 0 (both Sunday).
        if days_of_week.matches(7) {
            days_of_week.bits = (days_of_week.bits & !(1 << 7)) | 1;
        }

        let schedule = Self {
            expr: parts.join(" "),
            seconds: parse_field(parts[0], &SECOND)?,
            minutes: parse_field(parts[1], &MINUTE)?,
            hours: parse_field(parts[2], &HOUR)?,
            days_of_month: parse_field(parts[3], &DAY_OF_MONTH)?,
            months: parse_field(parts[4], &MONTH)?,
            days_of_week,
        };

        let probe = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).single();
        match probe.and_then(|p| schedule.next_after(p)) {
            Some(_) => Ok(schedule),
            None => Err(ScheduleError::NeverFires),
        }
    }

    pub fn expression(&self) -> &str {
        &self.expr
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month.matches(date.day());
        let dow = self
            .days_of_week
            .matches(date.weekday().num_days_from_sunday());
        match (self.days_of_month.any, self.days_of_week.any) {
            (true, true) => true,
            (true, false) => dow,
            (false, true) => dom,
            (false, false) => dom || dow,
        }
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.naive_utc().with_nanosecond(0)? + Duration::seconds(1);
        let limit_year = start.year() + SEARCH_YEARS;
        let mut t = start;

        loop {
            if t.year() > limit_year {
                return None;
            }
            if !self.months.matches(t.month()) {
                t = first_of_next_month(t.date())?;
                continue;
            }
            if !self.day_matches(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.hours.matches(t.hour()) {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if !self.minutes.matches(t.minute()) {
                t = t.date().and_hms_opt(t.hour(), t.minute(), 0)? + Duration::minutes(1);
                continue;
            }
            if !self.seconds.matches(t.second()) {
                t += Duration::seconds(1);
                continue;
            }
            return Some(Utc.from_utc_datetime(&t));
        }
    }

    /// The next `count` fire times after `after`.
    pub fn upcoming(&self, after: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        let mut out = Vec::with_capacity(count);
        let mut cursor = after;
        while out.len() < count {
            match self.next_after(cursor) {
                Some(next) => {
                    out.push(next);
                    cursor = next;
                }
                None => break,
            }
        }
        out
    }

    /// Time from `now` until the next fire, if any.
    pub fn until_next(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, std::time::Duration)> {
        let next = self.next_after(now)?;
        let wait = (next - now).to_std().unwrap_or_default();
        Some((next, wait))
    }
}

impl FromStr for CronSchedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expr)
    }
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDateTime> {
    let (y, m) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1)?.and_hms_opt(0, 0, 0)
}

fn bad(spec: &FieldSpec, value: &str, reason: impl Into<String>) -> ScheduleError {
    ScheduleError::BadField {
        field: spec.name,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_value(raw: &str, spec: &FieldSpec, whole: &str) -> Result<u32, ScheduleError> {
    let upper = raw.to_ascii_uppercase();
    let value = match spec.names.iter().position(|n| *n == upper) {
        Some(idx) => idx as u32 + spec.name_base,
        None => raw
            .parse::<u32>()
            .map_err(|_| bad(spec, whole, format!("'{raw}' is not a number")))?,
    };
    if value < spec.min || value > spec.max {
        return Err(bad(
            spec,
            whole,
            format!("{value} outside {}-{}", spec.min, spec.max),
        ));
    }
    Ok(value)
}

fn parse_field(raw: &str, spec: &FieldSpec) -> Result<Field, ScheduleError> {
    if raw == "?" {
        if !spec.allow_question {
            return Err(bad(spec, raw, "'?' is only allowed in day fields"));
        }
        return Ok(Field {
            bits: range_bits(spec.min, spec.max, 1),
            any: true,
        });
    }

    let mut bits = 0u64;
    let mut any = false;
    for item in raw.split(',') {
        if item.is_empty() {
            return Err(bad(spec, raw, "empty list item"));
        }
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| bad(spec, raw, format!("bad step '{step}'")))?;
                if step == 0 {
                    return Err(bad(spec, raw, "step must be positive"));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (lo, hi) = if range == "*" {
            any |= step.is_none();
            (spec.min, spec.max)
        } else if let Some((lo, hi)) = range.split_once('-') {
            let lo = parse_value(lo, spec, raw)?;
            let hi = parse_value(hi, spec, raw)?;
            if lo > hi {
                return Err(bad(spec, raw, format!("range {lo}-{hi} is reversed")));
            }
            (lo, hi)
        } else {
            let v = parse_value(range, spec, raw)?;
            // `a/n` runs from `a` to the field maximum.
            (v, if step.is_some() { spec.max } else { v })
        };
        bits |= range_bits(lo, hi, step.unwrap_or(1));
    }
    Ok(Field { bits, any })
}

fn range_bits(lo: u32, hi: u32, step: u32) -> u64 {
    (lo..=hi)
        .step_by(step as usize)
        .fold(0u64, |acc, v| acc | (1u64 << v))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_nightly_default() {
        let cron = CronSchedule::parse("0 0 2 * * ?").unwrap();
        assert_eq!(
            cron.next_after(at(2025, 3, 10, 1, 59, 59)),
            Some(at(2025, 3, 10, 2, 0, 0))
        );
        assert_eq!(
            cron.next_after(at(2025, 3, 10, 2, 0, 0)),
            Some(at(2025, 3, 11, 2, 0, 0))
        );
        assert_eq!(
            cron.next_after(at(2025, 12, 31, 3, 0, 0)),
            Some(at(2026, 1, 1, 2, 0, 0))
        );
    }

    #[test]
    fn test_upcoming_is_strictly_increasing() {
        let cron = CronSchedule::parse("*/15 * * * * *").unwrap();
        let times = cron.upcoming(at(2025, 1, 1, 0, 0, 7), 4);
        assert_eq!(
            times,
            vec![
                at(2025, 1, 1, 0, 0, 15),
                at(2025, 1, 1, 0, 0, 30),
                at(2025, 1, 1, 0, 0, 45),
                at(2025, 1, 1, 0, 1, 0),
            ]
        );
    }

    #[test]
    fn test_weekday_names_and_sunday_aliases() {
        let weekdays = CronSchedule::parse("0 30 9 ? * MON-FRI").unwrap();
        // 2025-03-08 is a Saturday.
        assert_eq!(
            weekdays.next_after(at(2025, 3, 8, 0, 0, 0)),
            Some(at(2025, 3, 10, 9, 30, 0))
        );

        let sunday_zero = CronSchedule::parse("0 0 0 ? * 0").unwrap();
        let sunday_seven = CronSchedule::parse("0 0 0 ? * 7").unwrap();
        let from = at(2025, 3, 8, 0, 0, 0);
        assert_eq!(sunday_zero.next_after(from), sunday_seven.next_after(from));
        assert_eq!(sunday_zero.next_after(from), Some(at(2025, 3, 9, 0, 0, 0)));
    }

    #[test]
    fn test_lists_and_month_names() {
        let cron = CronSchedule::parse("0 0 6,18 1 JAN,jul ?").unwrap();
        assert_eq!(
            cron.upcoming(at(2025, 1, 1, 7, 0, 0), 3),
            vec![
                at(2025, 1, 1, 18, 0, 0),
                at(2025, 7, 1, 6, 0, 0),
                at(2025, 7, 1, 18, 0, 0),
            ]
        );
    }

    #[test]
    fn test_leap_day() {
        let cron = CronSchedule::parse("0 0 0 29 2 ?").unwrap();
        assert_eq!(
            cron.next_after(at(2025, 1, 1, 0, 0, 0)),
            Some(at(2028, 2, 29, 0, 0, 0))
        );
    }

    #[test]
    fn test_rejects_bad_expressions() {
        assert_eq!(
            CronSchedule::parse("0 2 * * *"),
            Err(ScheduleError::FieldCount(5))
        );
        assert!(matches!(
            CronSchedule::parse("0 60 * * * ?"),
            Err(ScheduleError::BadField { field: "minute", .. })
        ));
        assert!(matches!(
            CronSchedule::parse("? 0 * * * *"),
            Err(ScheduleError::BadField { field: "second", .. })
        ));
        assert!(matches!(
            CronSchedule::parse("0 0 */0 * * ?"),
            Err(ScheduleError::BadField { field: "hour", .. })
        ));
        assert!(matches!(
            CronSchedule::parse("0 0 0 5-1 * ?"),
            Err(ScheduleError::BadField { .. })
        ));
        assert_eq!(
            CronSchedule::parse("0 0 0 30 2 ?"),
            Err(ScheduleError::NeverFires)
        );
    }

    #[test]
    fn test_until_next() {
        let cron = CronSchedule::parse("0 0 2 * * ?").unwrap();
        let (next, wait) = cron.until_next(at(2025, 3, 10, 1, 0, 0)).unwrap();
        assert_eq!(next, at(2025, 3, 10, 2, 0, 0));
        assert_eq!(wait, std::time::Duration::from_secs(3600));
    }
}
