//! Cached point samples and pending driver writes

use serde::{Deserialize, Serialize};

/// A raw or final point value in the hot cache
///
/// Values are carried as strings end to end; analog points parse to a
/// number, digital points to "0"/"1".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointSample {
    pub point_id: String,
    pub value: String,
    pub unix_seconds: i64,
}

impl PointSample {
    pub fn new(point_id: impl Into<String>, value: impl Into<String>, unix_seconds: i64) -> Self {
        Self {
            point_id: point_id.into(),
            value: value.into(),
            unix_seconds,
        }
    }

    /// Parse the value as a finite number
    pub fn numeric(&self) -> Option<f64> {
        self.value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
    }

    /// Parse the value as a digital state (non-zero ⇒ true)
    pub fn digital(&self) -> Option<bool> {
        self.numeric().map(|v| v != 0.0)
    }
}

/// A pending driver write
///
/// At most one pending item exists per point; a newer write replaces
/// the pending value. The driver asserts `value` on the channel for
/// `duration_seconds`; acknowledgement is out of band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteItem {
    pub point_id: String,
    pub value: String,
    pub unix_seconds: i64,
    pub duration_seconds: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_rejects_non_finite() {
        assert_eq!(PointSample::new("p", "1.5", 0).numeric(), Some(1.5));
        assert_eq!(PointSample::new("p", "NaN", 0).numeric(), None);
        assert_eq!(PointSample::new("p", "inf", 0).numeric(), None);
        assert_eq!(PointSample::new("p", "abc", 0).numeric(), None);
        assert_eq!(PointSample::new("p", "", 0).numeric(), None);
    }

    #[test]
    fn digital_parses_zero_one() {
        assert_eq!(PointSample::new("p", "0", 0).digital(), Some(false));
        assert_eq!(PointSample::new("p", "1", 0).digital(), Some(true));
    }

    #[test]
    fn sample_json_shape() {
        let json = serde_json::to_value(PointSample::new("p1", "42", 100)).unwrap();
        assert_eq!(json["pointId"], "p1");
        assert_eq!(json["value"], "42");
        assert_eq!(json["unixSeconds"], 100);
    }
}
