//! PID block configuration and persisted controller state

use crate::model::SourceRef;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Proportional/integral/derivative gains
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// Schmitt-trigger companion output
///
/// OFF→ON when the analog output reaches `high_threshold`, ON→OFF when
/// it falls to `low_threshold`; written only on transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigitalCompanion {
    pub point_id: String,
    pub high_threshold: f64,
    pub low_threshold: f64,
}

/// PID block configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PidConfig {
    pub id: String,
    pub enabled: bool,
    /// Evaluation interval, seconds
    pub interval: f64,
    /// Process variable point
    pub input_point_id: String,
    /// Analog output point
    pub output_point_id: String,
    pub set_point: SourceRef,
    /// Auto/manual selector; absent means always auto
    #[serde(default)]
    pub is_auto: Option<SourceRef>,
    /// Output while in manual mode
    #[serde(default)]
    pub manual_value: Option<SourceRef>,
    /// Error-sign flip; absent means direct acting
    #[serde(default)]
    pub reverse_output: Option<SourceRef>,
    pub gains: PidGains,
    pub out_min: f64,
    pub out_max: f64,
    #[serde(default)]
    pub feed_forward: f64,
    /// First-order low-pass coefficient for the PV derivative;
    /// higher means more smoothing
    #[serde(default)]
    pub derivative_filter_alpha: f64,
    #[serde(default)]
    pub max_output_slew_rate: Option<f64>,
    #[serde(default)]
    pub dead_zone: f64,
    /// Cascade position, 0..=2; level k+1 reads level k outputs
    #[serde(default)]
    pub cascade_level: u8,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub digital: Option<DigitalCompanion>,
    /// Output write duration handed to the dispatcher, seconds
    #[serde(default)]
    pub output_duration_seconds: i64,
}

impl PidConfig {
    /// Hash of the configuration; a changed hash forces a controller
    /// rebuild and a bumpless re-initialization, and guards restore of
    /// persisted state after a restart.
    pub fn config_hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hex::encode(hasher.finalize())
    }
}

/// Persisted controller checkpoint, restored only when the stored hash
/// matches the current configuration hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PidCheckpoint {
    pub id: String,
    pub config_hash: String,
    pub last_tick_unix: i64,
    pub integral: f64,
    pub previous_process_variable: Option<f64>,
    pub filtered_derivative: f64,
    pub previous_output: f64,
    pub digital_output_latched: bool,
}
