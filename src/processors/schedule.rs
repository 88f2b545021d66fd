//! Schedule processor
//!
//! Evaluates weekly schedules against UTC now. Cross-midnight entries
//! match the late portion of their own day and the early portion of
//! the next; entries with no end time either extend to midnight or
//! defer to the block default. Holidays override the weekly entries
//! for the whole day. Overlaps resolve by highest priority, ties by
//! earliest start.

use crate::context::EngineContext;
use crate::error::EngineResult;
use crate::model::{NullEndBehavior, ScheduleConfig, ScheduleEntry};
use crate::scheduler::{isolate, BlockCache, IntervalGate, Processor};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc};
use futures::future::join_all;
use std::collections::HashSet;

pub struct ScheduleProcessor {
    blocks: BlockCache<ScheduleConfig>,
    gate: IntervalGate,
}

fn weekday_index(t: DateTime<Utc>) -> u8 {
    t.weekday().num_days_from_sunday() as u8
}

fn time_of_day(t: DateTime<Utc>) -> NaiveTime {
    NaiveTime::from_hms_opt(t.hour(), t.minute(), t.second())
        .unwrap_or(NaiveTime::MIN)
}

/// Whether one entry matches the given UTC instant
fn entry_matches(entry: &ScheduleEntry, day: u8, time: NaiveTime) -> bool {
    match entry.end {
        Some(end) => {
            if entry.start <= end {
                day == entry.day_of_week && time >= entry.start && time < end
            } else {
                // crosses midnight: before-midnight part of its own
                // day, after-midnight part of the following day
                (day == entry.day_of_week && time >= entry.start)
                    || (day == (entry.day_of_week + 1) % 7 && time < end)
            }
        }
        None => match entry.null_end_behavior {
            NullEndBehavior::ExtendToEndOfDay => day == entry.day_of_week && time >= entry.start,
            NullEndBehavior::UseDefault => false,
        },
    }
}

/// Resolve the value a schedule block emits at the given instant
pub fn evaluate(config: &ScheduleConfig, now: DateTime<Utc>) -> String {
    if config.holidays.contains(&now.date_naive()) {
        return config
            .holiday_value
            .clone()
            .unwrap_or_else(|| config.default_value.clone());
    }
    let day = weekday_index(now);
    let time = time_of_day(now);
    config
        .entries
        .iter()
        .filter(|entry| entry_matches(entry, day, time))
        .max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                // ties break toward the earliest start
                .then_with(|| b.start.cmp(&a.start))
        })
        .map(|entry| entry.value.clone())
        .unwrap_or_else(|| config.default_value.clone())
}

impl ScheduleProcessor {
    pub fn new() -> Self {
        Self {
            blocks: BlockCache::new(),
            gate: IntervalGate::new(),
        }
    }

    async fn step(&self, ctx: &EngineContext, config: &ScheduleConfig) -> EngineResult<()> {
        if self
            .gate
            .due(&config.id, config.interval, ctx.clock.as_ref())
            .is_none()
        {
            return Ok(());
        }
        let value = evaluate(config, ctx.clock.now_utc());
        ctx.dispatcher
            .write_or_add(
                &config.output_point_id,
                &value,
                None,
                config.duration_seconds,
            )
            .await?;
        Ok(())
    }
}

impl Default for ScheduleProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for ScheduleProcessor {
    fn name(&self) -> &'static str {
        "schedule"
    }

    async fn run_cycle(&self, ctx: &EngineContext) -> EngineResult<()> {
        let blocks = self
            .blocks
            .get(ctx.clock.as_ref(), ctx.settings.config_refresh(), || async {
                ctx.repo.schedules().await
            })
            .await?;
        let enabled: Vec<&ScheduleConfig> = blocks.iter().filter(|b| b.enabled).collect();
        let ids: HashSet<String> = enabled.iter().map(|b| b.id.clone()).collect();
        self.gate.retain(&ids);

        join_all(
            enabled
                .iter()
                .map(|config| isolate(self.name(), &config.id, self.step(ctx, config))),
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn entry(day: u8, start: NaiveTime, end: Option<NaiveTime>, priority: i32, value: &str) -> ScheduleEntry {
        ScheduleEntry {
            day_of_week: day,
            start,
            end,
            priority,
            value: value.into(),
            null_end_behavior: NullEndBehavior::ExtendToEndOfDay,
        }
    }

    fn config(entries: Vec<ScheduleEntry>) -> ScheduleConfig {
        ScheduleConfig {
            id: "s1".into(),
            enabled: true,
            interval: 1.0,
            output_point_id: "out".into(),
            entries,
            holidays: Vec::new(),
            holiday_value: None,
            default_value: "0".into(),
            duration_seconds: 0,
        }
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn cross_midnight_monday_block() {
        // Monday 22:00 → 02:00, value 1, default 0
        let cfg = config(vec![entry(1, hm(22, 0), Some(hm(2, 0)), 1, "1")]);
        // 2024-03-11 is a Monday
        assert_eq!(evaluate(&cfg, at(2024, 3, 11, 23, 0)), "1");
        assert_eq!(evaluate(&cfg, at(2024, 3, 12, 1, 0)), "1");
        assert_eq!(evaluate(&cfg, at(2024, 3, 12, 1, 59)), "1");
        assert_eq!(evaluate(&cfg, at(2024, 3, 12, 2, 0)), "0");
        assert_eq!(evaluate(&cfg, at(2024, 3, 12, 3, 0)), "0");
        // Monday morning before the window
        assert_eq!(evaluate(&cfg, at(2024, 3, 11, 21, 59)), "0");
    }

    #[test]
    fn normal_interval_is_half_open() {
        let cfg = config(vec![entry(2, hm(8, 0), Some(hm(17, 0)), 1, "on")]);
        // 2024-03-12 is a Tuesday
        assert_eq!(evaluate(&cfg, at(2024, 3, 12, 8, 0)), "on");
        assert_eq!(evaluate(&cfg, at(2024, 3, 12, 16, 59)), "on");
        assert_eq!(evaluate(&cfg, at(2024, 3, 12, 17, 0)), "0");
    }

    #[test]
    fn priority_then_earliest_start() {
        let cfg = config(vec![
            entry(2, hm(8, 0), Some(hm(17, 0)), 1, "low"),
            entry(2, hm(9, 0), Some(hm(12, 0)), 5, "high"),
            entry(2, hm(10, 0), Some(hm(12, 0)), 5, "late-high"),
        ]);
        assert_eq!(evaluate(&cfg, at(2024, 3, 12, 8, 30)), "low");
        // both priority-5 entries match at 10:30; the earlier start wins
        assert_eq!(evaluate(&cfg, at(2024, 3, 12, 10, 30)), "high");
    }

    #[test]
    fn null_end_behaviors() {
        let extend = config(vec![entry(2, hm(20, 0), None, 1, "on")]);
        assert_eq!(evaluate(&extend, at(2024, 3, 12, 23, 59)), "on");
        assert_eq!(evaluate(&extend, at(2024, 3, 13, 0, 0)), "0");

        let mut use_default = config(vec![ScheduleEntry {
            null_end_behavior: NullEndBehavior::UseDefault,
            ..entry(2, hm(20, 0), None, 1, "on")
        }]);
        use_default.default_value = "fallback".into();
        assert_eq!(evaluate(&use_default, at(2024, 3, 12, 21, 0)), "fallback");
    }

    #[test]
    fn holiday_overrides_weekly_entries() {
        let mut cfg = config(vec![entry(2, hm(0, 0), Some(hm(23, 59)), 1, "on")]);
        cfg.holidays = vec![chrono::NaiveDate::from_ymd_opt(2024, 3, 12).unwrap()];
        cfg.holiday_value = Some("holiday".into());
        assert_eq!(evaluate(&cfg, at(2024, 3, 12, 12, 0)), "holiday");
        // the next day is back to normal
        assert_eq!(evaluate(&cfg, at(2024, 3, 13, 12, 0)), "0");
    }

    #[test]
    fn saturday_to_sunday_wraps_the_week() {
        // Saturday 23:00 → 01:00
        let cfg = config(vec![entry(6, hm(23, 0), Some(hm(1, 0)), 1, "on")]);
        // 2024-03-16 is a Saturday, 03-17 a Sunday
        assert_eq!(evaluate(&cfg, at(2024, 3, 16, 23, 30)), "on");
        assert_eq!(evaluate(&cfg, at(2024, 3, 17, 0, 30)), "on");
        assert_eq!(evaluate(&cfg, at(2024, 3, 17, 1, 30)), "0");
    }
}
