//! Deadband / stability processor
//!
//! The block kind follows the input point's kind. Analog inputs pass
//! a value through only when it moves far enough from the previous
//! sample (absolute, percent-of-range, or rate-of-change). Digital
//! inputs must hold a new state for the configured stability time
//! before the output follows; returning to the current output cancels
//! the pending change.

use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::model::{DeadbandConfig, DeadbandMode, DeadbandState};
use crate::scheduler::{isolate, BlockCache, IntervalGate, Processor};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

const STATE_PREFIX: &str = "DeadbandState";

pub struct DeadbandProcessor {
    blocks: BlockCache<DeadbandConfig>,
    gate: IntervalGate,
    states: Mutex<HashMap<String, DeadbandState>>,
}

impl DeadbandProcessor {
    pub fn new() -> Self {
        Self {
            blocks: BlockCache::new(),
            gate: IntervalGate::new(),
            states: Mutex::new(HashMap::new()),
        }
    }

    fn load_state(&self, ctx: &EngineContext, block_id: &str) -> DeadbandState {
        if let Some(state) = self.states.lock().get(block_id) {
            return state.clone();
        }
        ctx.store
            .block_state(STATE_PREFIX, block_id)
            .unwrap_or_else(DeadbandState::empty)
    }

    /// Whether the analog movement from the previous sample crosses
    /// the configured band
    fn analog_crosses(
        config: &DeadbandConfig,
        state: &DeadbandState,
        value: f64,
        sample_unix: i64,
    ) -> EngineResult<bool> {
        let previous = match state.last_input {
            Some(previous) => previous,
            // nothing seen yet: the first sample always publishes
            None => return Ok(true),
        };
        let delta = (value - previous).abs();
        match config.mode {
            DeadbandMode::Absolute => Ok(delta >= config.deadband),
            DeadbandMode::Percentage => {
                let range = config.range.ok_or_else(|| EngineError::InvalidConfiguration {
                    block_id: config.id.clone(),
                    reason: "percentage deadband without a range".into(),
                })?;
                Ok(delta >= config.deadband / 100.0 * range.span())
            }
            DeadbandMode::RateOfChange => {
                let dt = state
                    .last_unix
                    .map(|t| (sample_unix - t) as f64)
                    .unwrap_or(0.0);
                if dt <= 0.0 {
                    return Ok(false);
                }
                Ok(delta / dt > config.deadband)
            }
        }
    }

    async fn step(&self, ctx: &EngineContext, config: &DeadbandConfig) -> EngineResult<()> {
        if self
            .gate
            .due(&config.id, config.interval, ctx.clock.as_ref())
            .is_none()
        {
            return Ok(());
        }
        let point = match ctx.catalog.get(&config.input_point_id) {
            Some(point) => point,
            None => {
                debug!(block_id = %config.id, "input point not in catalog yet");
                return Ok(());
            }
        };
        let sample = match ctx.store.final_value(&config.input_point_id) {
            Some(s) => s,
            None => return Ok(()),
        };
        let mut state = self.load_state(ctx, &config.id);
        let now = ctx.clock.now_unix();

        if point.kind.is_digital() {
            let current = match sample.digital() {
                Some(b) => b,
                None => return Ok(()),
            };
            let output_state = state.last_output.map(|v| v != 0.0);
            let mut publish = None;
            match output_state {
                None => publish = Some(current),
                Some(output) if current == output => {
                    // back at the published state, drop any pending flip
                    state.pending_digital_state = None;
                    state.pending_since = None;
                }
                Some(_) => {
                    if state.pending_digital_state != Some(current) {
                        state.pending_digital_state = Some(current);
                        state.pending_since = Some(now);
                    } else if state
                        .pending_since
                        .is_some_and(|since| (now - since) as f64 >= config.stability_time)
                    {
                        publish = Some(current);
                        state.pending_digital_state = None;
                        state.pending_since = None;
                    }
                }
            }
            if let Some(value) = publish {
                ctx.dispatcher
                    .write_or_add(&config.output_point_id, if value { "1" } else { "0" }, None, 0)
                    .await?;
                state.last_output = Some(if value { 1.0 } else { 0.0 });
            }
            state.last_input = sample.numeric();
            state.last_unix = Some(sample.unix_seconds);
        } else {
            let value = match sample.numeric() {
                Some(v) => v,
                None => return Ok(()),
            };
            // only a new sample can move the output
            if state.last_unix != Some(sample.unix_seconds) {
                if Self::analog_crosses(config, &state, value, sample.unix_seconds)? {
                    ctx.dispatcher
                        .write_or_add(&config.output_point_id, &format!("{value}"), None, 0)
                        .await?;
                    state.last_output = Some(value);
                }
                state.last_input = Some(value);
                state.last_unix = Some(sample.unix_seconds);
            }
        }

        ctx.store.set_block_state(STATE_PREFIX, &config.id, &state)?;
        self.states.lock().insert(config.id.clone(), state);
        Ok(())
    }
}

impl Default for DeadbandProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for DeadbandProcessor {
    fn name(&self) -> &'static str {
        "deadband"
    }

    async fn run_cycle(&self, ctx: &EngineContext) -> EngineResult<()> {
        let blocks = self
            .blocks
            .get(ctx.clock.as_ref(), ctx.settings.config_refresh(), || async {
                ctx.repo.deadbands().await
            })
            .await?;
        let enabled: Vec<&DeadbandConfig> = blocks.iter().filter(|b| b.enabled).collect();
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
