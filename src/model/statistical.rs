//! Statistical window blocks

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WindowMode {
    /// Emit on every tick over the trailing window
    Sliding,
    /// Emit once per full batch, then clear
    Tumbling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatKind {
    Min,
    Max,
    Mean,
    StdDev,
    Range,
    Median,
    /// Coefficient of variation, stdDev/mean
    Cv,
    Percentile,
}

/// One published statistic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatOutput {
    pub kind: StatKind,
    /// Percentile rank in [0, 100]; required for `Percentile`
    #[serde(default)]
    pub percentile: Option<f64>,
    pub point_id: String,
}

pub const WINDOW_SIZE_MIN: usize = 10;
pub const WINDOW_SIZE_MAX: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticalConfig {
    pub id: String,
    pub enabled: bool,
    pub interval: f64,
    pub input_point_id: String,
    pub window: WindowMode,
    /// Clamped into [WINDOW_SIZE_MIN, WINDOW_SIZE_MAX]
    pub window_size: usize,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    pub outputs: Vec<StatOutput>,
}

fn default_min_samples() -> usize {
    2
}

impl StatisticalConfig {
    pub fn effective_window_size(&self) -> usize {
        self.window_size.clamp(WINDOW_SIZE_MIN, WINDOW_SIZE_MAX)
    }

    /// The minimum-samples gate never drops below 2
    pub fn effective_min_samples(&self) -> usize {
        self.min_samples.max(2)
    }
}
