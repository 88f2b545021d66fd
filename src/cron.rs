//! Cron expression matching
//!
//! Standard 5-field (`min hour dom month dow`) or 6-field (leading
//! seconds) expressions, evaluated in UTC. Fields accept `*`, steps
//! (`*/5`), ranges (`1-10`, `1-10/2`), lists (`1,5,30`), and single
//! values; day-of-week 0 or 7 is Sunday. Per the usual cron rule, when
//! both day-of-month and day-of-week are restricted a timestamp
//! matches if either does.

use crate::error::{EngineError, EngineResult};
use chrono::{DateTime, Datelike, Timelike, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    seconds: Option<u64>,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

fn parse_field(field: &str, min: u32, max: u32, name: &str) -> EngineResult<(u64, bool)> {
    let mut mask: u64 = 0;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((r, s)) => {
                let step: u32 = s
                    .parse()
                    .map_err(|_| EngineError::Cron(format!("bad step in {name}: {part}")))?;
                if step == 0 {
                    return Err(EngineError::Cron(format!("zero step in {name}: {part}")));
                }
                (r, step)
            }
            None => (part, 1),
        };
        let (lo, hi) = if range == "*" {
            (min, max)
        } else {
            match range.split_once('-') {
                Some((a, b)) => {
                    let lo = a
                        .parse()
                        .map_err(|_| EngineError::Cron(format!("bad range in {name}: {part}")))?;
                    let hi = b
                        .parse()
                        .map_err(|_| EngineError::Cron(format!("bad range in {name}: {part}")))?;
                    (lo, hi)
                }
                None => {
                    let v: u32 = range
                        .parse()
                        .map_err(|_| EngineError::Cron(format!("bad value in {name}: {part}")))?;
                    (v, v)
                }
            }
        };
        if lo < min || hi > max || lo > hi {
            return Err(EngineError::Cron(format!(
                "{name} out of range {min}-{max}: {part}"
            )));
        }
        let mut v = lo;
        while v <= hi {
            mask |= 1u64 << v;
            v += step;
        }
    }
    if mask == 0 {
        return Err(EngineError::Cron(format!("empty {name} field")));
    }
    // anything other than a bare `*` restricts the field
    Ok((mask, field != "*"))
}

impl CronExpr {
    pub fn parse(expr: &str) -> EngineResult<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let (seconds, rest): (Option<u64>, &[&str]) = match fields.len() {
            5 => (None, &fields[..]),
            6 => {
                let (mask, _) = parse_field(fields[0], 0, 59, "second")?;
                (Some(mask), &fields[1..])
            }
            n => {
                return Err(EngineError::Cron(format!(
                    "expected 5 or 6 fields, got {n}"
                )))
            }
        };
        let (minutes, _) = parse_field(rest[0], 0, 59, "minute")?;
        let (hours, _) = parse_field(rest[1], 0, 23, "hour")?;
        let (days_of_month, dom_restricted) = parse_field(rest[2], 1, 31, "day-of-month")?;
        let (months, _) = parse_field(rest[3], 1, 12, "month")?;
        let (mut days_of_week, dow_restricted) = parse_field(rest[4], 0, 7, "day-of-week")?;
        // cron uses 7 for Sunday as well
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }
        Ok(Self {
            seconds,
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted,
            dow_restricted,
        })
    }

    /// Whether the expression carries a seconds field
    pub fn has_seconds(&self) -> bool {
        self.seconds.is_some()
    }

    /// Dedupe mark for "fire once per match": the unix second for
    /// six-field expressions, the unix minute otherwise
    pub fn fire_mark(&self, unix_seconds: i64) -> i64 {
        if self.has_seconds() {
            unix_seconds
        } else {
            unix_seconds.div_euclid(60)
        }
    }

    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        if let Some(seconds) = self.seconds {
            if seconds & (1u64 << t.second()) == 0 {
                return false;
            }
        }
        if self.minutes & (1u64 << t.minute()) == 0 {
            return false;
        }
        if self.hours & (1u64 << t.hour()) == 0 {
            return false;
        }
        if self.months & (1u64 << t.month()) == 0 {
            return false;
        }
        let dom_match = self.days_of_month & (1u64 << t.day()) != 0;
        let dow_match = self.days_of_week & (1u64 << t.weekday().num_days_from_sunday()) != 0;
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom_match || dow_match,
            _ => dom_match && dow_match,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn daily_midnight() {
        let cron = CronExpr::parse("0 0 * * *").unwrap();
        assert!(cron.matches(at(2024, 3, 10, 0, 0, 0)));
        assert!(cron.matches(at(2024, 3, 10, 0, 0, 30)));
        assert!(!cron.matches(at(2024, 3, 10, 0, 1, 0)));
        assert!(!cron.matches(at(2024, 3, 10, 12, 0, 0)));
    }

    #[test]
    fn step_and_range() {
        let cron = CronExpr::parse("*/15 8-17 * * *").unwrap();
        assert!(cron.matches(at(2024, 3, 10, 8, 0, 0)));
        assert!(cron.matches(at(2024, 3, 10, 17, 45, 0)));
        assert!(!cron.matches(at(2024, 3, 10, 7, 45, 0)));
        assert!(!cron.matches(at(2024, 3, 10, 8, 20, 0)));
    }

    #[test]
    fn six_field_seconds() {
        let cron = CronExpr::parse("30 0 0 * * *").unwrap();
        assert!(cron.has_seconds());
        assert!(cron.matches(at(2024, 3, 10, 0, 0, 30)));
        assert!(!cron.matches(at(2024, 3, 10, 0, 0, 31)));
    }

    #[test]
    fn dom_dow_or_semantics() {
        // the 15th, or any Monday
        let cron = CronExpr::parse("0 0 15 * 1").unwrap();
        assert!(cron.matches(at(2024, 3, 15, 0, 0, 0))); // Friday the 15th
        assert!(cron.matches(at(2024, 3, 11, 0, 0, 0))); // Monday the 11th
        assert!(!cron.matches(at(2024, 3, 12, 0, 0, 0))); // Tuesday the 12th
    }

    #[test]
    fn sunday_as_seven() {
        let cron = CronExpr::parse("0 0 * * 7").unwrap();
        assert!(cron.matches(at(2024, 3, 10, 0, 0, 0))); // a Sunday
        assert!(!cron.matches(at(2024, 3, 11, 0, 0, 0)));
    }

    #[test]
    fn rejects_malformed_expressions() {
        assert!(CronExpr::parse("0 0 * *").is_err());
        assert!(CronExpr::parse("61 * * * *").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        assert!(CronExpr::parse("a * * * *").is_err());
    }

    #[test]
    fn fire_mark_resolution() {
        let five = CronExpr::parse("* * * * *").unwrap();
        assert_eq!(five.fire_mark(125), 2);
        let six = CronExpr::parse("* * * * * *").unwrap();
        assert_eq!(six.fire_mark(125), 125);
    }
}
