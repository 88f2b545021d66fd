//! Conditional (IF) processor
//!
//! Branches evaluate in declared order over variable aliases resolved
//! to current final values; the first truthy condition wins and the
//! fallthrough emits the default. Missing inputs are bound to zero
//! with a warning so one dead sensor degrades rather than silences
//! the block.

use crate::context::EngineContext;
use crate::error::EngineResult;
use crate::expr;
use crate::model::{IfConfig, OutputKind};
use crate::scheduler::{isolate, BlockCache, IntervalGate, Processor};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use tracing::warn;

pub struct ConditionalProcessor {
    blocks: BlockCache<IfConfig>,
    gate: IntervalGate,
}

impl ConditionalProcessor {
    pub fn new() -> Self {
        Self {
            blocks: BlockCache::new(),
            gate: IntervalGate::new(),
        }
    }

    fn resolve_variables(ctx: &EngineContext, config: &IfConfig) -> HashMap<String, f64> {
        let mut variables = HashMap::new();
        for (alias, point_id) in &config.aliases {
            let value = ctx
                .store
                .final_value(point_id)
                .and_then(|s| s.numeric())
                .unwrap_or_else(|| {
                    warn!(
                        block_id = %config.id,
                        alias = %alias,
                        point_id = %point_id,
                        "conditional input missing, defaulting to 0"
                    );
                    0.0
                });
            variables.insert(alias.clone(), value);
        }
        variables
    }

    fn format_output(kind: OutputKind, value: f64) -> String {
        match kind {
            OutputKind::Digital => {
                if expr::truthy(value) { "1" } else { "0" }.to_string()
            }
            OutputKind::Analog => format!("{value}"),
        }
    }

    async fn step(&self, ctx: &EngineContext, config: &IfConfig) -> EngineResult<()> {
        if self
            .gate
            .due(&config.id, config.interval, ctx.clock.as_ref())
            .is_none()
        {
            return Ok(());
        }
        let variables = Self::resolve_variables(ctx, config);

        let mut output = config.default_value;
        for branch in &config.branches {
            // hysteresis_hint is plumbed but deliberately inert
            let condition = expr::evaluate(&branch.condition, &variables)?;
            if expr::truthy(condition) {
                output = branch.output_value;
                break;
            }
        }

        ctx.dispatcher
            .write_or_add(
                &config.output_point_id,
                &Self::format_output(config.output_kind, output),
                None,
                0,
            )
            .await?;
        Ok(())
    }
}

impl Default for ConditionalProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for ConditionalProcessor {
    fn name(&self) -> &'static str {
        "conditional"
    }

    async fn run_cycle(&self, ctx: &EngineContext) -> EngineResult<()> {
        let blocks = self
            .blocks
            .get(ctx.clock.as_ref(), ctx.settings.config_refresh(), || async {
                ctx.repo.conditionals().await
            })
            .await?;
        let enabled: Vec<&IfConfig> = blocks.iter().filter(|b| b.enabled).collect();
        let ids: HashSet<String> = enabled.iter().map(|b| b.id.clone()).collect();
        self.gate.retain(&ids);

        join_all(
            enabled
                .iter()
                .map(|config| isolate(self.name(), &config.id, self.step(ctx, config))),
        )
        .await;
        Ok(())
    }
}
