//! Rate-of-change blocks

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RateMethod {
    /// `(x − xPrev)/dt` over the newest pair
    SimpleDifference,
    /// Mean of pairwise derivatives in the window
    MovingAverage,
    /// Pairwise derivatives with exponential recency weights
    WeightedAverage,
    /// Least-squares slope over the window; needs at least 5 samples
    LinearRegression,
}

/// Hysteresis alarm attached to the computed rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateAlarm {
    pub threshold: f64,
    /// Digital point the alarm state is published to
    #[serde(default)]
    pub output_point_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateOfChangeConfig {
    pub id: String,
    pub enabled: bool,
    pub interval: f64,
    pub input_point_id: String,
    pub output_point_id: String,
    pub method: RateMethod,
    /// Samples required before any rate is emitted
    pub baseline_sample_count: usize,
    /// Time window retained for windowed methods, seconds
    pub window_seconds: f64,
    /// Multiplier converting units/second to the published unit
    #[serde(default = "default_time_unit")]
    pub time_unit_factor: f64,
    /// EMA coefficient; higher means more smoothing, slower response
    #[serde(default)]
    pub smoothing_filter_alpha: f64,
    #[serde(default)]
    pub high_alarm: Option<RateAlarm>,
    #[serde(default)]
    pub low_alarm: Option<RateAlarm>,
    /// Clear thresholds sit at threshold·factor (high) and
    /// threshold/factor (low)
    #[serde(default = "default_hysteresis_factor")]
    pub hysteresis_factor: f64,
}

fn default_time_unit() -> f64 {
    1.0
}

fn default_hysteresis_factor() -> f64 {
    0.9
}
