//! Weekly schedule blocks

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

/// What an entry with no end time means
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NullEndBehavior {
    /// Active from start until midnight
    ExtendToEndOfDay,
    /// The entry never matches; the block default applies
    UseDefault,
}

/// One weekly schedule interval
///
/// `start > end` crosses midnight: the entry matches the late portion
/// of its own day and the early portion of the following day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    /// 0 = Sunday … 6 = Saturday
    pub day_of_week: u8,
    pub start: NaiveTime,
    #[serde(default)]
    pub end: Option<NaiveTime>,
    pub priority: i32,
    pub value: String,
    #[serde(default = "default_null_end")]
    pub null_end_behavior: NullEndBehavior,
}

fn default_null_end() -> NullEndBehavior {
    NullEndBehavior::ExtendToEndOfDay
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    pub id: String,
    pub enabled: bool,
    pub interval: f64,
    pub output_point_id: String,
    pub entries: Vec<ScheduleEntry>,
    /// Holiday calendar (UTC dates); a holiday overrides the weekly
    /// entries for the whole day
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,
    #[serde(default)]
    pub holiday_value: Option<String>,
    /// Written when nothing matches
    pub default_value: String,
    /// Write duration handed to the dispatcher, seconds
    #[serde(default)]
    pub duration_seconds: i64,
}
