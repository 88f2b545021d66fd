//! Comparison / voting processor
//!
//! Each group evaluates a per-input predicate with latching
//! hysteresis, then votes: turning on from off needs
//! `required_votes + voting_hysteresis` satisfied inputs, staying on
//! needs the plain `required_votes`. A memory ORs its groups and
//! publishes the digital result through the any-true aggregator so
//! several memories can share one target point.

use crate::context::EngineContext;
use crate::error::EngineResult;
use crate::model::{CompareOp, ComparisonConfig, ComparisonGroup, GroupMode};
use crate::scheduler::{isolate, BlockCache, IntervalGate, Processor};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::warn;

#[derive(Default, Clone)]
struct GroupState {
    input_latches: Vec<bool>,
    active: bool,
}

pub struct ComparisonProcessor {
    blocks: BlockCache<ComparisonConfig>,
    gate: IntervalGate,
    states: Mutex<HashMap<String, Vec<GroupState>>>,
}

impl ComparisonProcessor {
    pub fn new() -> Self {
        Self {
            blocks: BlockCache::new(),
            gate: IntervalGate::new(),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Evaluate one analog predicate with its latch
    fn analog_predicate(group: &ComparisonGroup, value: f64, latched: bool) -> bool {
        let hysteresis = group.threshold_hysteresis.max(0.0);
        match group.op {
            Some(CompareOp::Higher) => {
                if latched {
                    value > group.threshold - hysteresis
                } else {
                    value > group.threshold
                }
            }
            Some(CompareOp::Lower) => {
                if latched {
                    value < group.threshold + hysteresis
                } else {
                    value < group.threshold
                }
            }
            Some(CompareOp::Equal) => value == group.threshold,
            Some(CompareOp::NotEqual) => value != group.threshold,
            Some(CompareOp::Between) => {
                let upper = group.threshold2.unwrap_or(group.threshold);
                if latched {
                    value >= group.threshold - hysteresis && value <= upper + hysteresis
                } else {
                    value >= group.threshold && value <= upper
                }
            }
            None => false,
        }
    }

    fn evaluate_group(
        ctx: &EngineContext,
        group: &ComparisonGroup,
        state: &mut GroupState,
    ) -> bool {
        state.input_latches.resize(group.input_point_ids.len(), false);
        let mut votes = 0usize;
        for (index, point_id) in group.input_point_ids.iter().enumerate() {
            let satisfied = match ctx.store.final_value(point_id) {
                Some(sample) => match group.mode {
                    GroupMode::Analog => match sample.numeric() {
                        Some(value) => {
                            Self::analog_predicate(group, value, state.input_latches[index])
                        }
                        None => false,
                    },
                    GroupMode::Digital => match (sample.digital(), group.digital_value) {
                        (Some(actual), Some(expected)) => actual == expected,
                        _ => false,
                    },
                },
                None => false,
            };
            state.input_latches[index] = satisfied;
            if satisfied {
                votes += 1;
            }
        }

        let turn_on_votes = group.required_votes + group.voting_hysteresis;
        state.active = if state.active {
            votes >= group.required_votes
        } else {
            votes >= turn_on_votes
        };
        state.active
    }

    async fn step(&self, ctx: &EngineContext, config: &ComparisonConfig) -> EngineResult<()> {
        if self
            .gate
            .due(&config.id, config.interval, ctx.clock.as_ref())
            .is_none()
        {
            return Ok(());
        }
        if config.groups.is_empty() {
            warn!(block_id = %config.id, "comparison memory without groups");
            return Ok(());
        }

        let result = {
            let mut states = self.states.lock();
            let group_states = states
                .entry(config.id.clone())
                .or_insert_with(|| vec![GroupState::default(); config.groups.len()]);
            group_states.resize(config.groups.len(), GroupState::default());
            config
                .groups
                .iter()
                .zip(group_states.iter_mut())
                .fold(false, |acc, (group, state)| {
                    Self::evaluate_group(ctx, group, state) || acc
                })
        };

        ctx.voting
            .assert_any_true(&ctx.dispatcher, &config.output_point_id, &config.id, result)
            .await?;
        Ok(())
    }
}

impl Default for ComparisonProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for ComparisonProcessor {
    fn name(&self) -> &'static str {
        "comparison"
    }

    async fn run_cycle(&self, ctx: &EngineContext) -> EngineResult<()> {
        let blocks = self
            .blocks
            .get(ctx.clock.as_ref(), ctx.settings.config_refresh(), || async {
                ctx.repo.comparisons().await
            })
            .await?;
        let enabled: Vec<&ComparisonConfig> = blocks.iter().filter(|b| b.enabled).collect();
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
