//! Write-action processor
//!
//! Publishes a static or dynamically resolved value to its output on
//! every due tick where the optional input guard matches, counting
//! executions and stopping at the configured maximum.

use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::model::{ActionValue, WriteActionConfig};
use crate::scheduler::{isolate, BlockCache, IntervalGate, Processor};
use crate::store::resolve_source;
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub struct WriteActionProcessor {
    blocks: BlockCache<WriteActionConfig>,
    gate: IntervalGate,
    counts: Mutex<HashMap<String, u32>>,
}

impl WriteActionProcessor {
    pub fn new() -> Self {
        Self {
            blocks: BlockCache::new(),
            gate: IntervalGate::new(),
            counts: Mutex::new(HashMap::new()),
        }
    }

    fn guard_matches(ctx: &EngineContext, config: &WriteActionConfig) -> bool {
        let point_id = match &config.input_point_id {
            Some(point_id) => point_id,
            None => return true,
        };
        let expected = match &config.input_trigger_value {
            Some(expected) => expected,
            None => return true,
        };
        let sample = match ctx.store.final_value(point_id) {
            Some(sample) => sample,
            None => return false,
        };
        // numeric comparison when both sides parse, string otherwise
        match (sample.numeric(), expected.trim().parse::<f64>()) {
            (Some(actual), Ok(wanted)) => actual == wanted,
            _ => sample.value == *expected,
        }
    }

    async fn step(&self, ctx: &EngineContext, config: &WriteActionConfig) -> EngineResult<()> {
        if self
            .gate
            .due(&config.id, config.interval, ctx.clock.as_ref())
            .is_none()
        {
            return Ok(());
        }

        let count = *self
            .counts
            .lock()
            .entry(config.id.clone())
            .or_insert(config.current_execution_count);
        if let Some(max) = config.max_execution_count {
            if count >= max {
                debug!(block_id = %config.id, "maximum execution count reached");
                return Ok(());
            }
        }
        if !Self::guard_matches(ctx, config) {
            return Ok(());
        }

        let value = match &config.value {
            ActionValue::Static(value) => value.clone(),
            ActionValue::Dynamic(reference) => {
                let resolved = resolve_source(&ctx.store, reference).ok_or_else(|| {
                    EngineError::MissingReference {
                        block_id: config.id.clone(),
                        reference: reference.describe(),
                    }
                })?;
                format!("{resolved}")
            }
        };

        let accepted = ctx
            .dispatcher
            .write_or_add(
                &config.output_point_id,
                &value,
                None,
                config.duration_seconds,
            )
            .await?;
        if accepted {
            let next = count + 1;
            self.counts.lock().insert(config.id.clone(), next);
            ctx.repo.set_write_action_count(&config.id, next).await?;
        }
        Ok(())
    }
}

impl Default for WriteActionProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for WriteActionProcessor {
    fn name(&self) -> &'static str {
        "write_action"
    }

    async fn run_cycle(&self, ctx: &EngineContext) -> EngineResult<()> {
        let blocks = self
            .blocks
            .get(ctx.clock.as_ref(), ctx.settings.config_refresh(), || async {
                ctx.repo.write_actions().await
            })
            .await?;
        let enabled: Vec<&WriteActionConfig> = blocks.iter().filter(|b| b.enabled).collect();
        let ids: HashSet<String> = enabled.iter().map(|b| b.id.clone()).collect();
        self.gate.retain(&ids);
        self.counts.lock().retain(|id, _| ids.contains(id));

        join_all(
            enabled
                .iter()
                .map(|config| isolate(self.name(), &config.id, self.step(ctx, config))),
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GlobalKind, GlobalVariable, PointSample, SourceRef};
    use crate::repo::{MemoryHistorian, MemoryRepository};
    use crate::settings::EngineSettings;
    use crate::store::PointStore;
    use crate::time::ManualClock;
    use std::sync::Arc;

    fn config(value: ActionValue) -> WriteActionConfig {
        WriteActionConfig {
            id: "w1".into(),
            enabled: true,
            interval: 1.0,
            input_point_id: None,
            input_trigger_value: None,
            output_point_id: "out".into(),
            value,
            duration_seconds: 15,
            max_execution_count: None,
            current_execution_count: 0,
        }
    }

    fn fixture(
        block: WriteActionConfig,
    ) -> (EngineContext, Arc<MemoryRepository>, Arc<ManualClock>) {
        let repo = Arc::new(MemoryRepository::new());
        repo.set_write_actions(vec![block]);
        let store = Arc::new(PointStore::ephemeral().unwrap());
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let ctx = EngineContext::new(
            repo.clone(),
            Arc::new(MemoryHistorian::new()),
            store,
            clock.clone(),
            EngineSettings::default(),
        );
        (ctx, repo, clock)
    }

    #[tokio::test]
    async fn static_value_writes_every_due_tick() {
        let (ctx, repo, clock) = fixture(config(ActionValue::Static("5".into())));
        let processor = WriteActionProcessor::new();
        for _ in 0..3 {
            processor.run_cycle(&ctx).await.unwrap();
            clock.advance(1);
        }
        assert_eq!(ctx.store.raw("out").unwrap().value, "5");
        assert_eq!(repo.write_action_count("w1"), Some(3));
    }

    #[tokio::test]
    async fn max_execution_count_stops_the_action() {
        let mut cfg = config(ActionValue::Static("5".into()));
        cfg.max_execution_count = Some(2);
        let (ctx, repo, clock) = fixture(cfg);
        let processor = WriteActionProcessor::new();
        for _ in 0..5 {
            processor.run_cycle(&ctx).await.unwrap();
            clock.advance(1);
        }
        assert_eq!(repo.write_action_count("w1"), Some(2));
    }

    #[tokio::test]
    async fn guard_gates_the_write() {
        let mut cfg = config(ActionValue::Static("go".into()));
        cfg.input_point_id = Some("trigger".into());
        cfg.input_trigger_value = Some("1".into());
        let (ctx, repo, clock) = fixture(cfg);
        let processor = WriteActionProcessor::new();

        ctx.store
            .set_final(&PointSample::new("trigger", "0", 1_000))
            .unwrap();
        processor.run_cycle(&ctx).await.unwrap();
        assert!(ctx.store.raw("out").is_none());
        assert_eq!(repo.write_action_count("w1"), None);

        clock.advance(1);
        ctx.store
            .set_final(&PointSample::new("trigger", "1", 1_001))
            .unwrap();
        processor.run_cycle(&ctx).await.unwrap();
        assert_eq!(ctx.store.raw("out").unwrap().value, "go");
        assert_eq!(repo.write_action_count("w1"), Some(1));
    }

    #[tokio::test]
    async fn dynamic_value_resolves_a_global() {
        let (ctx, _, _) = fixture(config(ActionValue::Dynamic(SourceRef::Global(
            "bias".into(),
        ))));
        ctx.store
            .set_global(&GlobalVariable {
                id: "g1".into(),
                name: "bias".into(),
                kind: GlobalKind::Float,
                value: "7.5".into(),
                last_update_unix_ms: 0,
            })
            .unwrap();
        let processor = WriteActionProcessor::new();
        processor.run_cycle(&ctx).await.unwrap();
        assert_eq!(ctx.store.raw("out").unwrap().numeric(), Some(7.5));
    }
}
