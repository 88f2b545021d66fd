//! Global variables
//!
//! Small named boolean/float values shared across blocks. The value is
//! carried as a string like every cached point value; the update time
//! is Unix milliseconds (the one millisecond-resolution timestamp in
//! the engine).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlobalKind {
    Bool,
    Float,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalVariable {
    pub id: String,
    pub name: String,
    pub kind: GlobalKind,
    pub value: String,
    pub last_update_unix_ms: i64,
}

impl GlobalVariable {
    /// Numeric reading; booleans map to 0/1
    pub fn numeric(&self) -> Option<f64> {
        let trimmed = self.value.trim();
        if let Ok(v) = trimmed.parse::<f64>() {
            return v.is_finite().then_some(v);
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => Some(1.0),
            "false" => Some(0.0),
            _ => None,
        }
    }
}
