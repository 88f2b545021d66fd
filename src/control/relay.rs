//! Relay-feedback auto-tuner
//!
//! Drives the output with a bang-bang relay around the setpoint and
//! measures the induced limit cycle. The ultimate gain comes from the
//! describing function `Ku = 4·d/(π·a)` with `d` the relay amplitude
//! and `a` the measured oscillation amplitude; the suggested gains are
//! classic Ziegler–Nichols.

use crate::model::{PidGains, TuningResult};
use serde::{Deserialize, Serialize};

/// Safety verdict the owning processor turns into a session transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TuningSafety {
    Ok,
    TimedOut,
    AmplitudeExceeded,
    TooManyFailures,
    MaxCyclesExceeded,
}

/// Relay state and the accumulated oscillation record; checkpointed to
/// the KV every step so a restart resumes the running test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayTuner {
    set_point: f64,
    relay_amplitude: f64,
    output_center: f64,
    hysteresis: f64,
    relay_high: bool,
    prev2: Option<(f64, f64)>,
    prev1: Option<(f64, f64)>,
    peaks: Vec<(f64, f64)>,
    troughs: Vec<(f64, f64)>,
    /// Largest |pv − setpoint| observed
    pub max_excursion: f64,
    /// Consecutive processing failures (missing input, bad samples)
    pub failures: u32,
}

impl RelayTuner {
    pub fn new(set_point: f64, relay_amplitude: f64, output_center: f64, hysteresis: f64) -> Self {
        Self {
            set_point,
            relay_amplitude,
            output_center,
            hysteresis: hysteresis.max(0.0),
            relay_high: true,
            prev2: None,
            prev1: None,
            peaks: Vec::new(),
            troughs: Vec::new(),
            max_excursion: 0.0,
            failures: 0,
        }
    }

    /// One relay step: switch on hysteresis crossings, record peaks
    /// and troughs with a 3-point direction-change detector, return
    /// the output to assert
    pub fn step(&mut self, process_variable: f64, now_seconds: f64) -> f64 {
        if self.relay_high {
            if process_variable > self.set_point + self.hysteresis {
                self.relay_high = false;
            }
        } else if process_variable < self.set_point - self.hysteresis {
            self.relay_high = true;
        }

        if let (Some((_, p2)), Some((t1, p1))) = (self.prev2, self.prev1) {
            if p2 < p1 && p1 >= process_variable {
                self.peaks.push((t1, p1));
            } else if p2 > p1 && p1 <= process_variable {
                self.troughs.push((t1, p1));
            }
        }
        self.prev2 = self.prev1;
        self.prev1 = Some((now_seconds, process_variable));

        self.max_excursion = self
            .max_excursion
            .max((process_variable - self.set_point).abs());

        if self.relay_high {
            self.output_center + self.relay_amplitude
        } else {
            self.output_center - self.relay_amplitude
        }
    }

    /// Full oscillation cycles confirmed so far
    pub fn confirmed_cycles(&self) -> u32 {
        let pairs = self.peaks.len().min(self.troughs.len());
        pairs.saturating_sub(1) as u32
    }

    /// Analyze the last `cycles` oscillations
    pub fn analyze(&self, cycles: usize) -> Option<TuningResult> {
        if cycles == 0 || self.peaks.len() < cycles + 1 || self.troughs.len() < cycles {
            return None;
        }
        let peaks = &self.peaks[self.peaks.len() - (cycles + 1)..];
        let troughs = &self.troughs[self.troughs.len() - cycles..];

        let pu = peaks
            .windows(2)
            .map(|w| w[1].0 - w[0].0)
            .sum::<f64>()
            / cycles as f64;
        let peak_mean =
            peaks[1..].iter().map(|(_, v)| v).sum::<f64>() / cycles as f64;
        let trough_mean = troughs.iter().map(|(_, v)| v).sum::<f64>() / cycles as f64;
        let amplitude = peak_mean - trough_mean;
        if pu <= 0.0 || amplitude <= 0.0 {
            return None;
        }

        let ku = 4.0 * self.relay_amplitude / (std::f64::consts::PI * amplitude);
        let kp = 0.6 * ku;
        Some(TuningResult {
            ku,
            pu,
            gains: PidGains {
                kp,
                ki: 2.0 * kp / pu,
                kd: kp * pu / 8.0,
            },
        })
    }
}
