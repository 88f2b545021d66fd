//! Dynamic source references
//!
//! Wherever a block references a "source" the reference is either a
//! point id (resolved against the final cache) or a global-variable
//! name. Resolution yields a number or a missing sentinel handled as a
//! per-block configuration error.

use serde::{Deserialize, Serialize};

/// A reference to a point or a global variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum SourceRef {
    Point(String),
    Global(String),
}

impl SourceRef {
    pub fn describe(&self) -> String {
        match self {
            SourceRef::Point(id) => format!("point:{id}"),
            SourceRef::Global(name) => format!("global:{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_json_round_trip() {
        let r = SourceRef::Global("mode".into());
        let json = serde_json::to_string(&r).unwrap();
        assert!(json.contains("\"kind\":\"global\""));
        let back: SourceRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
