//! Min/max selector processor
//!
//! Picks the extreme of the valid inputs, publishing the value and an
//! optional 1-based selected-input index. When every input is bad the
//! configured failover applies.

use crate::context::EngineContext;
use crate::error::EngineResult;
use crate::model::{MinMaxConfig, SelectorFailover, SelectorMode};
use crate::scheduler::{isolate, BlockCache, IntervalGate, Processor};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::warn;

#[derive(Default, Clone, Copy)]
struct SelectorState {
    last_value: Option<f64>,
    last_index: Option<usize>,
}

pub struct MinMaxProcessor {
    blocks: BlockCache<MinMaxConfig>,
    gate: IntervalGate,
    states: Mutex<HashMap<String, SelectorState>>,
}

impl MinMaxProcessor {
    pub fn new() -> Self {
        Self {
            blocks: BlockCache::new(),
            gate: IntervalGate::new(),
            states: Mutex::new(HashMap::new()),
        }
    }

    async fn publish(
        ctx: &EngineContext,
        config: &MinMaxConfig,
        value: f64,
        index: Option<usize>,
    ) -> EngineResult<()> {
        ctx.dispatcher
            .write_or_add(&config.output_point_id, &format!("{value}"), None, 0)
            .await?;
        if let (Some(point_id), Some(index)) = (&config.index_point_id, index) {
            ctx.dispatcher
                .write_or_add(point_id, &format!("{index}"), None, 0)
                .await?;
        }
        Ok(())
    }

    fn select(mode: SelectorMode, valid: &[(usize, f64)]) -> Option<(usize, f64)> {
        match mode {
            SelectorMode::Min => valid
                .iter()
                .copied()
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)),
            SelectorMode::Max => valid
                .iter()
                .copied()
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)),
        }
    }

    async fn step(&self, ctx: &EngineContext, config: &MinMaxConfig) -> EngineResult<()> {
        if self
            .gate
            .due(&config.id, config.interval, ctx.clock.as_ref())
            .is_none()
        {
            return Ok(());
        }
        if config.input_point_ids.len() < 2 {
            warn!(block_id = %config.id, "selector needs at least two inputs");
            return Ok(());
        }

        // valid = cache hit, non-empty, parseable, finite
        let valid: Vec<(usize, f64)> = config
            .input_point_ids
            .iter()
            .enumerate()
            .filter_map(|(index, point_id)| {
                ctx.store
                    .final_value(point_id)
                    .and_then(|s| s.numeric())
                    .map(|v| (index, v))
            })
            .collect();

        if !valid.is_empty() {
            let degraded = valid.len() < config.input_point_ids.len();
            let (index, value) = match config.failover {
                // opposite extreme of the survivors while degraded
                SelectorFailover::FallbackToOpposite if degraded => {
                    let opposite = match config.mode {
                        SelectorMode::Min => SelectorMode::Max,
                        SelectorMode::Max => SelectorMode::Min,
                    };
                    Self::select(opposite, &valid).unwrap_or(valid[0])
                }
                _ => Self::select(config.mode, &valid).unwrap_or(valid[0]),
            };
            let one_based = index + 1;
            Self::publish(ctx, config, value, Some(one_based)).await?;
            self.states.lock().insert(
                config.id.clone(),
                SelectorState {
                    last_value: Some(value),
                    last_index: Some(one_based),
                },
            );
            return Ok(());
        }

        match config.failover {
            SelectorFailover::IgnoreBad => {}
            // no survivors to fall back onto
            SelectorFailover::FallbackToOpposite => {}
            SelectorFailover::HoldLastGood => {
                let state = self.states.lock().get(&config.id).copied();
                if let Some(SelectorState {
                    last_value: Some(value),
                    last_index,
                }) = state
                {
                    Self::publish(ctx, config, value, last_index).await?;
                }
            }
        }
        Ok(())
    }
}

impl Default for MinMaxProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for MinMaxProcessor {
    fn name(&self) -> &'static str {
        "min_max"
    }

    async fn run_cycle(&self, ctx: &EngineContext) -> EngineResult<()> {
        let blocks = self
            .blocks
            .get(ctx.clock.as_ref(), ctx.settings.config_refresh(), || async {
                ctx.repo.min_max_selectors().await
            })
            .await?;
        let enabled: Vec<&MinMaxConfig> = blocks.iter().filter(|b| b.enabled).collect();
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
