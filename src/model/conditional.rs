//! Conditional (IF) blocks

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutputKind {
    Analog,
    Digital,
}

/// One branch: condition expression over variable aliases, output
/// value on match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IfBranch {
    pub condition: String,
    pub output_value: f64,
    /// Parsed and carried but not evaluated; per-branch hysteresis
    /// stays off until the semantics are settled
    #[serde(default)]
    pub hysteresis_hint: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IfConfig {
    pub id: String,
    pub enabled: bool,
    pub interval: f64,
    /// Branches evaluate in declared order; first match wins
    pub branches: Vec<IfBranch>,
    pub default_value: f64,
    /// Variable alias → point id
    pub aliases: HashMap<String, String>,
    pub output_point_id: String,
    pub output_kind: OutputKind,
}
