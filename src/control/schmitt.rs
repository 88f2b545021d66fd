//! Two-threshold trigger for the PID digital companion output

/// Schmitt trigger: OFF→ON at or above the high threshold, ON→OFF at
/// or below the low threshold. `update` reports transitions only, so
/// the companion point is written exactly when the state changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchmittTrigger {
    pub state: bool,
}

impl SchmittTrigger {
    pub fn with_state(state: bool) -> Self {
        Self { state }
    }

    pub fn update(&mut self, value: f64, high_threshold: f64, low_threshold: f64) -> Option<bool> {
        if !self.state && value >= high_threshold {
            self.state = true;
            Some(true)
        } else if self.state && value <= low_threshold {
            self.state = false;
            Some(false)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_only_on_crossings() {
        let mut trigger = SchmittTrigger::default();
        assert_eq!(trigger.update(50.0, 80.0, 20.0), None);
        assert_eq!(trigger.update(80.0, 80.0, 20.0), Some(true));
        // within the band: no chatter
        assert_eq!(trigger.update(50.0, 80.0, 20.0), None);
        assert_eq!(trigger.update(79.9, 80.0, 20.0), None);
        assert_eq!(trigger.update(20.0, 80.0, 20.0), Some(false));
        assert_eq!(trigger.update(21.0, 80.0, 20.0), None);
    }
}
