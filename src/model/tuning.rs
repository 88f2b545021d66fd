//! Relay auto-tuning sessions

use crate::model::PidGains;
use serde::{Deserialize, Serialize};

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TuningStatus {
    Initializing,
    RelayTest,
    Analyzing,
    Completed,
    Aborted,
    Failed,
}

impl TuningStatus {
    /// Whether the session currently owns the PID output
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TuningStatus::Initializing | TuningStatus::RelayTest | TuningStatus::Analyzing
        )
    }
}

/// Outcome of a completed relay test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TuningResult {
    /// Ultimate gain from the describing function
    pub ku: f64,
    /// Ultimate period, seconds
    pub pu: f64,
    /// Ziegler–Nichols classic PID suggestion
    pub gains: PidGains,
}

/// A tuning session record
///
/// Completed sessions expose calculated gains; they are never applied
/// automatically. A separate operator action copies selected gains into
/// the PID configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TuningSession {
    pub pid_id: String,
    pub start_unix: i64,
    pub status: TuningStatus,
    /// Relay amplitude as a percentage of the output span
    pub relay_amplitude_percent: f64,
    /// Symmetric hysteresis around the setpoint, process units
    pub hysteresis: f64,
    pub min_cycles: u32,
    pub max_cycles: u32,
    pub timeout_seconds: i64,
    /// Largest tolerated process-variable excursion from the setpoint
    pub max_amplitude: f64,
    pub original_gains: PidGains,
    #[serde(default)]
    pub calculated: Option<TuningResult>,
    #[serde(default)]
    pub diagnostic: Option<String>,
}
