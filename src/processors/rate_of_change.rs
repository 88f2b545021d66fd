//! Rate-of-change processor
//!
//! Derives a rate from the input's final stream by one of four
//! methods, scales it to the configured time unit, smooths it with an
//! EMA, and runs optional high/low hysteresis alarms on the result.

use crate::context::EngineContext;
use crate::control::stats;
use crate::error::EngineResult;
use crate::model::{RateMethod, RateOfChangeConfig};
use crate::scheduler::{isolate, BlockCache, IntervalGate, Processor};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

const MAX_SAMPLES: usize = 10_000;
const REGRESSION_MIN_SAMPLES: usize = 5;

#[derive(Default)]
struct RateState {
    samples: VecDeque<(i64, f64)>,
    smoothed: Option<f64>,
    high_active: bool,
    low_active: bool,
}

pub struct RateOfChangeProcessor {
    blocks: BlockCache<RateOfChangeConfig>,
    gate: IntervalGate,
    states: Mutex<HashMap<String, RateState>>,
}

impl RateOfChangeProcessor {
    pub fn new() -> Self {
        Self {
            blocks: BlockCache::new(),
            gate: IntervalGate::new(),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Pairwise derivatives over consecutive samples, units/second
    fn pairwise_rates(samples: &VecDeque<(i64, f64)>) -> Vec<f64> {
        samples
            .iter()
            .zip(samples.iter().skip(1))
            .filter_map(|((t0, x0), (t1, x1))| {
                let dt = (t1 - t0) as f64;
                (dt > 0.0).then(|| (x1 - x0) / dt)
            })
            .collect()
    }

    fn raw_rate(config: &RateOfChangeConfig, samples: &VecDeque<(i64, f64)>) -> Option<f64> {
        match config.method {
            RateMethod::SimpleDifference => {
                let n = samples.len();
                if n < 2 {
                    return None;
                }
                let (t0, x0) = samples[n - 2];
                let (t1, x1) = samples[n - 1];
                let dt = (t1 - t0) as f64;
                (dt > 0.0).then(|| (x1 - x0) / dt)
            }
            RateMethod::MovingAverage => stats::mean(&Self::pairwise_rates(samples)),
            RateMethod::WeightedAverage => {
                let rates = Self::pairwise_rates(samples);
                if rates.is_empty() {
                    return None;
                }
                // exponential recency weights, newest heaviest
                let mut weighted = 0.0;
                let mut total = 0.0;
                let n = rates.len();
                for (i, rate) in rates.iter().enumerate() {
                    let weight = 0.5f64.powi((n - 1 - i) as i32);
                    weighted += weight * rate;
                    total += weight;
                }
                Some(weighted / total)
            }
            RateMethod::LinearRegression => {
                if samples.len() < REGRESSION_MIN_SAMPLES {
                    return None;
                }
                let points: Vec<(f64, f64)> = samples
                    .iter()
                    .map(|(t, x)| (*t as f64, *x))
                    .collect();
                stats::linear_regression_slope(&points)
            }
        }
    }

    async fn publish_alarm(
        ctx: &EngineContext,
        point_id: &Option<String>,
        active: bool,
    ) -> EngineResult<()> {
        if let Some(point_id) = point_id {
            ctx.dispatcher
                .write_or_add(point_id, if active { "1" } else { "0" }, None, 0)
                .await?;
        }
        Ok(())
    }

    async fn step(&self, ctx: &EngineContext, config: &RateOfChangeConfig) -> EngineResult<()> {
        if self
            .gate
            .due(&config.id, config.interval, ctx.clock.as_ref())
            .is_none()
        {
            return Ok(());
        }
        let sample = match ctx.store.final_value(&config.input_point_id) {
            Some(s) => s,
            None => {
                debug!(block_id = %config.id, "rate input missing");
                return Ok(());
            }
        };
        let value = match sample.numeric() {
            Some(v) => v,
            None => return Ok(()),
        };

        let rate = {
            let mut states = self.states.lock();
            let state = states.entry(config.id.clone()).or_default();
            if state.samples.back().map(|(t, _)| *t) != Some(sample.unix_seconds) {
                state.samples.push_back((sample.unix_seconds, value));
            }
            // prune by time window and by count
            let cutoff = sample.unix_seconds - config.window_seconds.ceil() as i64;
            while state
                .samples
                .front()
                .is_some_and(|(t, _)| *t < cutoff)
            {
                state.samples.pop_front();
            }
            while state.samples.len() > MAX_SAMPLES {
                state.samples.pop_front();
            }

            if state.samples.len() < config.baseline_sample_count.max(2) {
                return Ok(());
            }
            let raw = match Self::raw_rate(config, &state.samples) {
                Some(raw) if raw.is_finite() => raw * config.time_unit_factor,
                _ => return Ok(()),
            };
            let smoothed = match state.smoothed {
                Some(previous) => stats::ema_step(previous, raw, config.smoothing_filter_alpha),
                None => raw,
            };
            state.smoothed = Some(smoothed);
            smoothed
        };

        ctx.dispatcher
            .write_or_add(&config.output_point_id, &format!("{rate:.4}"), None, 0)
            .await?;

        // hysteresis alarms: clear at threshold·factor (high) and
        // threshold/factor (low)
        let factor = config.hysteresis_factor.clamp(0.0, 1.0);
        let transitions: Vec<(Option<String>, bool)> = {
            let mut states = self.states.lock();
            let state = states.entry(config.id.clone()).or_default();
            let mut transitions = Vec::new();
            if let Some(high) = &config.high_alarm {
                if !state.high_active && rate >= high.threshold {
                    state.high_active = true;
                    transitions.push((high.output_point_id.clone(), true));
                } else if state.high_active && rate <= high.threshold * factor {
                    state.high_active = false;
                    transitions.push((high.output_point_id.clone(), false));
                }
            }
            if let Some(low) = &config.low_alarm {
                if !state.low_active && rate <= low.threshold {
                    state.low_active = true;
                    transitions.push((low.output_point_id.clone(), true));
                } else if state.low_active && factor > 0.0 && rate >= low.threshold / factor {
                    state.low_active = false;
                    transitions.push((low.output_point_id.clone(), false));
                }
            }
            transitions
        };
        for (point_id, active) in transitions {
            Self::publish_alarm(ctx, &point_id, active).await?;
        }
        Ok(())
    }
}

impl Default for RateOfChangeProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for RateOfChangeProcessor {
    fn name(&self) -> &'static str {
        "rate_of_change"
    }

    async fn run_cycle(&self, ctx: &EngineContext) -> EngineResult<()> {
        let blocks = self
            .blocks
            .get(ctx.clock.as_ref(), ctx.settings.config_refresh(), || async {
                ctx.repo.rate_of_change_memories().await
            })
            .await?;
        let enabled: Vec<&RateOfChangeConfig> = blocks.iter().filter(|b| b.enabled).collect();
        let ids: HashSet<String> = enabled.iter().map(|b| b.id.clone()).collect();
        self.gate.retain(&ids);
        self.states.lock().retain(|id, _| ids.contains(id));

        join_all(
            enabled
                .iter()
                .map(|config| isolate(self.name(), &config.id, self.step(ctx, config))),
        )
        .await;
        Ok(())
    }
}
