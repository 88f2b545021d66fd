//! Min/max selector blocks

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SelectorMode {
    Min,
    Max,
}

/// Behavior when inputs go bad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SelectorFailover {
    /// Leave the output untouched
    IgnoreBad,
    /// With some inputs still valid, select the opposite extreme of
    /// the survivors; with none valid this is a no-op
    FallbackToOpposite,
    /// Re-emit the last good selection
    HoldLastGood,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinMaxConfig {
    pub id: String,
    pub enabled: bool,
    pub interval: f64,
    /// At least two inputs
    pub input_point_ids: Vec<String>,
    pub output_point_id: String,
    /// Optional 1-based selected-input index output
    #[serde(default)]
    pub index_point_id: Option<String>,
    pub mode: SelectorMode,
    pub failover: SelectorFailover,
}
