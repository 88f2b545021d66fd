//! Moving-average blocks

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AverageMethod {
    Sma,
    Ema,
    Wma,
}

/// Outlier rejection applied before aggregation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OutlierFilter {
    None,
    Iqr { factor: f64 },
    ZScore { threshold: f64 },
}

impl Default for OutlierFilter {
    fn default() -> Self {
        OutlierFilter::None
    }
}

/// One input of a multi-input average
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AverageInput {
    pub point_id: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Moving-average block configuration
///
/// One input: windowed SMA/EMA/WMA over that input's stream.
/// Several inputs: single-tick weighted average across inputs, skipping
/// inputs whose sample is older than `stale_timeout`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovingAverageConfig {
    pub id: String,
    pub enabled: bool,
    pub interval: f64,
    pub inputs: Vec<AverageInput>,
    pub output_point_id: String,
    pub method: AverageMethod,
    pub window_size: usize,
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// EMA coefficient; higher means more smoothing
    #[serde(default = "default_alpha")]
    pub ema_alpha: f64,
    #[serde(default)]
    pub outlier: OutlierFilter,
    /// Maximum sample age for multi-input mode, seconds
    #[serde(default = "default_stale")]
    pub stale_timeout: f64,
}

fn default_min_samples() -> usize {
    1
}

fn default_alpha() -> f64 {
    0.5
}

fn default_stale() -> f64 {
    60.0
}
