//! Comparison / voting blocks

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupMode {
    Analog,
    Digital,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompareOp {
    Higher,
    Lower,
    Equal,
    NotEqual,
    Between,
}

/// One voting group
///
/// Each input evaluates a predicate; the group passes when enough
/// inputs satisfy it. `voting_hysteresis` raises the vote count needed
/// to turn on from off, so a group already active stays active at the
/// plain `required_votes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonGroup {
    pub mode: GroupMode,
    pub input_point_ids: Vec<String>,
    #[serde(default)]
    pub op: Option<CompareOp>,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default)]
    pub threshold2: Option<f64>,
    /// Per-input latch: once on, a predicate stays on until the value
    /// recrosses by this margin
    #[serde(default)]
    pub threshold_hysteresis: f64,
    pub required_votes: usize,
    #[serde(default)]
    pub voting_hysteresis: usize,
    /// Digital groups: the state an input must match
    #[serde(default)]
    pub digital_value: Option<bool>,
}

/// Comparison memory: ORs its groups into one digital output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonConfig {
    pub id: String,
    pub enabled: bool,
    pub interval: f64,
    pub groups: Vec<ComparisonGroup>,
    pub output_point_id: String,
}
