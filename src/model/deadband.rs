//! Deadband / stability blocks

use crate::model::Range;
use serde::{Deserialize, Serialize};

/// Analog deadband mode; digital inputs always use time-based
/// stability instead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeadbandMode {
    Absolute,
    Percentage,
    RateOfChange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadbandConfig {
    pub id: String,
    pub enabled: bool,
    pub interval: f64,
    pub input_point_id: String,
    pub output_point_id: String,
    #[serde(default = "default_mode")]
    pub mode: DeadbandMode,
    pub deadband: f64,
    /// Engineering range for percentage mode
    #[serde(default)]
    pub range: Option<Range>,
    /// Digital inputs: seconds a new state must persist before the
    /// output follows
    #[serde(default)]
    pub stability_time: f64,
}

fn default_mode() -> DeadbandMode {
    DeadbandMode::Absolute
}

/// Persisted deadband state, keyed by the block id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadbandState {
    pub last_input: Option<f64>,
    pub last_output: Option<f64>,
    pub last_unix: Option<i64>,
    pub pending_digital_state: Option<bool>,
    pub pending_since: Option<i64>,
}

impl DeadbandState {
    pub fn empty() -> Self {
        Self {
            last_input: None,
            last_output: None,
            last_unix: None,
            pending_digital_state: None,
            pending_since: None,
        }
    }
}
