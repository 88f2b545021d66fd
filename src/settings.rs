//! Engine settings
//!
//! Loaded from an optional `tagrun.toml` plus `TAGRUN_*` environment
//! overrides. Defaults reproduce the engine's nominal timing: 1 s base
//! tick, 60 s configuration refresh, 30 × 2 s capped wait-for-store
//! backoff, 50 ms cascade propagation delay.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine-wide settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Directory holding the durable point store
    pub data_dir: PathBuf,
    /// Base processor tick in milliseconds
    pub base_tick_ms: u64,
    /// Configuration refresh cadence in seconds
    pub config_refresh_secs: u64,
    /// Maximum wait-for-store attempts at startup
    pub store_wait_attempts: u32,
    /// Backoff cap between wait-for-store attempts, milliseconds
    pub store_wait_max_backoff_ms: u64,
    /// Delay between PID cascade levels, milliseconds
    pub cascade_propagation_ms: u64,
    /// Cadence of the "raw cache is empty" warning, seconds
    pub empty_raw_warn_secs: u64,
    /// Consecutive tuning step failures tolerated before a session fails
    pub tuning_failure_limit: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tagrun-data"),
            base_tick_ms: 1000,
            config_refresh_secs: 60,
            store_wait_attempts: 30,
            store_wait_max_backoff_ms: 2000,
            cascade_propagation_ms: 50,
            empty_raw_warn_secs: 60,
            tuning_failure_limit: 5,
        }
    }
}

impl EngineSettings {
    /// Load settings from an optional file plus environment overrides
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder
            .add_source(config::Environment::with_prefix("TAGRUN"))
            .build()
            .map_err(|e| EngineError::Internal(format!("settings: {e}")))?
            .try_deserialize()
            .map_err(|e| EngineError::Internal(format!("settings: {e}")))
    }

    pub fn base_tick(&self) -> Duration {
        Duration::from_millis(self.base_tick_ms)
    }

    pub fn config_refresh(&self) -> Duration {
        Duration::from_secs(self.config_refresh_secs)
    }

    pub fn cascade_propagation(&self) -> Duration {
        Duration::from_millis(self.cascade_propagation_ms)
    }
}
