//! Alarm configuration and state

use serde::{Deserialize, Serialize};

/// Alarm trigger kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlarmKind {
    /// Compare the monitored value against configured bounds
    Comparative,
    /// Trigger when the monitored value has not updated for too long
    Timeout,
}

/// Comparison operator for comparative alarms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AlarmCondition {
    GreaterOrEqual,
    LessOrEqual,
    Equal,
    NotEqual,
    Between,
}

/// External alarm fan-out entry
///
/// On HasAlarm the entry feeds the process-wide voting aggregator for
/// its target digital point. `value = true` routes through the
/// any-true aggregator, `value = false` through any-false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAlarm {
    pub id: String,
    pub target_point_id: String,
    pub value: bool,
    pub enabled: bool,
}

/// Alarm block configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmConfig {
    pub id: String,
    pub enabled: bool,
    /// Evaluation interval, seconds
    #[serde(default = "default_interval")]
    pub interval: f64,
    /// Monitored point
    pub point_id: String,
    pub kind: AlarmKind,
    #[serde(default)]
    pub condition: Option<AlarmCondition>,
    #[serde(default)]
    pub value1: f64,
    #[serde(default)]
    pub value2: Option<f64>,
    /// Timeout alarms: maximum final-value age, seconds
    #[serde(default)]
    pub timeout_seconds: i64,
    /// Seconds an alarm must stay suspicious before it triggers
    #[serde(default)]
    pub alarm_delay: f64,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub externals: Vec<ExternalAlarm>,
}

fn default_interval() -> f64 {
    1.0
}

/// Alarm state machine status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmStatus {
    NoAlarm,
    Suspicious,
    HasAlarm,
}

/// Per-alarm runtime state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorAlarmState {
    pub status: AlarmStatus,
    pub last_transition_unix: i64,
}

impl MonitorAlarmState {
    pub fn idle(unix: i64) -> Self {
        Self {
            status: AlarmStatus::NoAlarm,
            last_transition_unix: unix,
        }
    }
}

/// An alarm currently in HasAlarm, persisted for restart resume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveAlarm {
    pub alarm_id: String,
    pub triggered_unix: i64,
}

/// Append-only trigger/clear trail entry
///
/// `snapshot` carries the serialized alarm configuration at the moment
/// of the event so later edits never rewrite history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmHistoryEntry {
    pub alarm_id: String,
    pub active: bool,
    pub unix_seconds: i64,
    pub snapshot: String,
}
