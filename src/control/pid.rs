//! Positional PID with anti-windup, derivative filtering, slew
//! limiting, and bumpless transfer
//!
//! The derivative acts on the process variable, not the error, so a
//! setpoint step never produces a derivative kick. The integral is
//! clamped to the output bounds every update; a saturated output can
//! therefore never wind the integral past what the bounds allow.

use crate::model::{PidCheckpoint, PidConfig};

#[derive(Debug, Clone)]
pub struct PidController {
    kp: f64,
    ki: f64,
    kd: f64,
    out_min: f64,
    out_max: f64,
    feed_forward: f64,
    /// First-order low-pass on the PV derivative; higher means more
    /// smoothing
    derivative_filter_alpha: f64,
    dead_zone: f64,
    max_slew: Option<f64>,

    pub integral: f64,
    pub previous_process_variable: Option<f64>,
    pub filtered_derivative: f64,
    pub previous_output: f64,
}

impl PidController {
    pub fn from_config(config: &PidConfig) -> Self {
        Self {
            kp: config.gains.kp,
            ki: config.gains.ki,
            kd: config.gains.kd,
            out_min: config.out_min,
            out_max: config.out_max,
            feed_forward: config.feed_forward,
            derivative_filter_alpha: config.derivative_filter_alpha.clamp(0.0, 1.0),
            dead_zone: config.dead_zone.max(0.0),
            max_slew: config.max_output_slew_rate,
            integral: 0.0,
            previous_process_variable: None,
            filtered_derivative: 0.0,
            previous_output: config.out_min,
        }
    }

    fn error(&self, process_variable: f64, set_point: f64, reverse: bool) -> f64 {
        let err = set_point - process_variable;
        if reverse {
            -err
        } else {
            err
        }
    }

    /// Seed the integral so that the next computed output equals the
    /// currently observed output
    pub fn initialize_bumpless(
        &mut self,
        current_output: f64,
        process_variable: f64,
        set_point: f64,
        reverse: bool,
    ) {
        let err = self.error(process_variable, set_point, reverse);
        self.integral =
            (current_output - self.kp * err - self.feed_forward).clamp(self.out_min, self.out_max);
        self.filtered_derivative = 0.0;
        self.previous_process_variable = Some(process_variable);
        self.previous_output = current_output.clamp(self.out_min, self.out_max);
    }

    /// One automatic-mode update over `dt` seconds
    pub fn compute(
        &mut self,
        process_variable: f64,
        set_point: f64,
        dt: f64,
        reverse: bool,
    ) -> f64 {
        let err = self.error(process_variable, set_point, reverse);

        self.integral = (self.integral + self.ki * err * dt).clamp(self.out_min, self.out_max);

        let raw_derivative = match self.previous_process_variable {
            Some(prev) if dt > 0.0 => (process_variable - prev) / dt,
            _ => 0.0,
        };
        self.filtered_derivative = self.derivative_filter_alpha * self.filtered_derivative
            + (1.0 - self.derivative_filter_alpha) * raw_derivative;
        self.previous_process_variable = Some(process_variable);

        let mut output = self.kp * err + self.integral - self.kd * self.filtered_derivative
            + self.feed_forward;
        output = output.clamp(self.out_min, self.out_max);

        if let Some(slew) = self.max_slew {
            if dt > 0.0 {
                let max_delta = slew * dt;
                output = output.clamp(
                    self.previous_output - max_delta,
                    self.previous_output + max_delta,
                );
            }
        }

        if err.abs() <= self.dead_zone && self.dead_zone > 0.0 {
            output = self.previous_output;
        }

        self.previous_output = output;
        output
    }

    /// Manual-mode bookkeeping: the output follows the manual value
    /// while the integral tracks it, so a return to auto is bumpless
    pub fn track_manual(
        &mut self,
        manual_value: f64,
        process_variable: f64,
        set_point: f64,
        reverse: bool,
    ) -> f64 {
        let output = manual_value.clamp(self.out_min, self.out_max);
        let err = self.error(process_variable, set_point, reverse);
        self.integral =
            (output - self.kp * err - self.feed_forward).clamp(self.out_min, self.out_max);
        self.previous_process_variable = Some(process_variable);
        self.filtered_derivative = 0.0;
        self.previous_output = output;
        output
    }

    /// Restore from a persisted checkpoint
    pub fn restore(&mut self, checkpoint: &PidCheckpoint) {
        self.integral = checkpoint.integral.clamp(self.out_min, self.out_max);
        self.previous_process_variable = checkpoint.previous_process_variable;
        self.filtered_derivative = checkpoint.filtered_derivative;
        self.previous_output = checkpoint.previous_output.clamp(self.out_min, self.out_max);
    }
}
