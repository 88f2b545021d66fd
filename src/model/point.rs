//! Points: the atomic observables of the engine

use serde::{Deserialize, Serialize};

/// Point kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointKind {
    AnalogIn,
    AnalogOut,
    DigitalIn,
    DigitalOut,
}

impl PointKind {
    pub fn is_digital(&self) -> bool {
        matches!(self, PointKind::DigitalIn | PointKind::DigitalOut)
    }
}

/// Field interface the point is mapped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterfaceKind {
    None,
    Sharp7,
    BacNet,
    Modbus,
}

/// Window aggregation applied by the monitoring pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingMethod {
    Last,
    Mean,
}

/// Linear calibration `a·x + b`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub a: f64,
    pub b: f64,
}

impl Calibration {
    pub fn apply(&self, x: f64) -> f64 {
        self.a * x + self.b
    }
}

/// Engineering range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub fn clamp(&self, x: f64) -> f64 {
        x.clamp(self.min, self.max)
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }
}

/// Point configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Point {
    pub id: String,
    pub kind: PointKind,
    /// Optional normalization range; values outside are clamped
    #[serde(default)]
    pub range: Option<Range>,
    #[serde(default)]
    pub calibration: Option<Calibration>,
    /// Sliding window size for the monitoring pipeline
    #[serde(default = "default_samples")]
    pub number_of_samples: usize,
    #[serde(default = "default_smoothing")]
    pub smoothing: SmoothingMethod,
    /// Minimum seconds between final-value updates
    #[serde(default)]
    pub save_interval: i64,
    /// Minimum seconds between historian appends
    #[serde(default)]
    pub save_historical_interval: i64,
    #[serde(default = "default_interface")]
    pub interface: InterfaceKind,
    /// Whether a writable driver mapping exists for this point
    #[serde(default)]
    pub writable: bool,
}

fn default_samples() -> usize {
    1
}

fn default_smoothing() -> SmoothingMethod {
    SmoothingMethod::Last
}

fn default_interface() -> InterfaceKind {
    InterfaceKind::None
}

impl Point {
    /// Digital points may not use `mean` smoothing; the pipeline falls
    /// back to `last` and warns when a record violates this.
    pub fn effective_smoothing(&self) -> SmoothingMethod {
        if self.kind.is_digital() {
            SmoothingMethod::Last
        } else {
            self.smoothing
        }
    }
}
