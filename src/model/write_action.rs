//! Write-action blocks

use crate::model::SourceRef;
use serde::{Deserialize, Serialize};

/// What a write action publishes: a fixed value or a resolved source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ActionValue {
    Static(String),
    Dynamic(SourceRef),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteActionConfig {
    pub id: String,
    pub enabled: bool,
    pub interval: f64,
    /// Optional guard: the action only fires while this point's final
    /// value matches `input_trigger_value`
    #[serde(default)]
    pub input_point_id: Option<String>,
    #[serde(default)]
    pub input_trigger_value: Option<String>,
    pub output_point_id: String,
    pub value: ActionValue,
    #[serde(default)]
    pub duration_seconds: i64,
    /// Stop writing after this many executions
    #[serde(default)]
    pub max_execution_count: Option<u32>,
    /// Executions so far; the CRUD layer may reset this on edit
    #[serde(default)]
    pub current_execution_count: u32,
}
