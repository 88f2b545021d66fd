//! Totalizer blocks

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TotalizerMode {
    /// Trapezoidal integration of an analog rate input
    RateIntegration,
    /// Count rising edges of a digital input
    EventCountRising,
    /// Count falling edges
    EventCountFalling,
    /// Count both edges
    EventCountBoth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalizerConfig {
    pub id: String,
    pub enabled: bool,
    pub interval: f64,
    pub input_point_id: String,
    pub output_point_id: String,
    pub mode: TotalizerMode,
    /// Automatic reset when the accumulator reaches this value
    #[serde(default)]
    pub overflow_threshold: Option<f64>,
    /// Scheduled reset, standard cron evaluated in UTC
    #[serde(default)]
    pub reset_cron: Option<String>,
    /// Output rounding
    #[serde(default = "default_decimals")]
    pub decimals: u32,
}

fn default_decimals() -> u32 {
    2
}

/// Persisted totalizer state, keyed by the block id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TotalizerState {
    pub accumulated: f64,
    pub last_input_value: Option<f64>,
    pub last_input_unix: Option<i64>,
    pub last_event_state: Option<bool>,
    pub last_reset_unix: i64,
    /// Dedupe guard for cron resets (unix minute, or unix second for
    /// six-field expressions)
    #[serde(default)]
    pub last_cron_mark: Option<i64>,
}

impl TotalizerState {
    pub fn fresh(unix: i64) -> Self {
        Self {
            accumulated: 0.0,
            last_input_value: None,
            last_input_unix: None,
            last_event_state: None,
            last_reset_unix: unix,
            last_cron_mark: None,
        }
    }

    /// Zero the accumulator and clear prior input state
    pub fn reset(&mut self, unix: i64) {
        self.accumulated = 0.0;
        self.last_input_value = None;
        self.last_input_unix = None;
        self.last_event_state = None;
        self.last_reset_unix = unix;
    }
}
