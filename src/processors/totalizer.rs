//! Totalizer processor
//!
//! Trapezoidal integration of analog rates or edge counting of
//! digital inputs, with manual, overflow, and cron-scheduled resets.
//! The accumulator state is checkpointed to the KV under the block id
//! so a restart resumes the running total.

use crate::context::EngineContext;
use crate::cron::CronExpr;
use crate::error::EngineResult;
use crate::model::{TotalizerConfig, TotalizerMode, TotalizerState};
use crate::scheduler::{isolate, BlockCache, IntervalGate, Processor};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

const STATE_PREFIX: &str = "TotalizerState";

pub struct TotalizerProcessor {
    blocks: BlockCache<TotalizerConfig>,
    gate: IntervalGate,
    states: Mutex<HashMap<String, TotalizerState>>,
}

impl TotalizerProcessor {
    pub fn new() -> Self {
        Self {
            blocks: BlockCache::new(),
            gate: IntervalGate::new(),
            states: Mutex::new(HashMap::new()),
        }
    }

    fn load_state(&self, ctx: &EngineContext, block_id: &str, now: i64) -> TotalizerState {
        if let Some(state) = self.states.lock().get(block_id) {
            return state.clone();
        }
        ctx.store
            .block_state(STATE_PREFIX, block_id)
            .unwrap_or_else(|| TotalizerState::fresh(now))
    }

    fn round_output(value: f64, decimals: u32) -> f64 {
        let factor = 10f64.powi(decimals as i32);
        (value * factor).round() / factor
    }

    async fn step(&self, ctx: &EngineContext, config: &TotalizerConfig) -> EngineResult<()> {
        if self
            .gate
            .due(&config.id, config.interval, ctx.clock.as_ref())
            .is_none()
        {
            return Ok(());
        }
        let now = ctx.clock.now_unix();
        let mut state = self.load_state(ctx, &config.id, now);

        let mut reset = ctx.repo.take_totalizer_reset(&config.id).await?;
        if let Some(threshold) = config.overflow_threshold {
            if state.accumulated >= threshold {
                info!(block_id = %config.id, threshold, "totalizer overflow reset");
                reset = true;
            }
        }
        if let Some(cron_text) = &config.reset_cron {
            match CronExpr::parse(cron_text) {
                Ok(cron) => {
                    if cron.matches(ctx.clock.now_utc()) {
                        let mark = cron.fire_mark(now);
                        if state.last_cron_mark != Some(mark) {
                            info!(block_id = %config.id, "totalizer scheduled reset");
                            state.last_cron_mark = Some(mark);
                            reset = true;
                        }
                    }
                }
                Err(e) => {
                    warn!(block_id = %config.id, "invalid reset cron: {e}");
                }
            }
        }
        if reset {
            state.reset(now);
        }

        if let Some(sample) = ctx.store.final_value(&config.input_point_id) {
            // only a genuinely new sample advances the accumulator
            if state.last_input_unix != Some(sample.unix_seconds) {
                match config.mode {
                    TotalizerMode::RateIntegration => {
                        if let Some(value) = sample.numeric() {
                            if let (Some(prev), Some(prev_unix)) =
                                (state.last_input_value, state.last_input_unix)
                            {
                                let dt = (sample.unix_seconds - prev_unix) as f64;
                                if dt > 0.0 {
                                    state.accumulated += (prev + value) / 2.0 * dt;
                                }
                            }
                            state.last_input_value = Some(value);
                            state.last_input_unix = Some(sample.unix_seconds);
                        }
                    }
                    TotalizerMode::EventCountRising
                    | TotalizerMode::EventCountFalling
                    | TotalizerMode::EventCountBoth => {
                        if let Some(current) = sample.digital() {
                            if let Some(previous) = state.last_event_state {
                                let counted = match config.mode {
                                    TotalizerMode::EventCountRising => !previous && current,
                                    TotalizerMode::EventCountFalling => previous && !current,
                                    _ => previous != current,
                                };
                                if counted {
                                    state.accumulated += 1.0;
                                }
                            }
                            state.last_event_state = Some(current);
                            state.last_input_unix = Some(sample.unix_seconds);
                        }
                    }
                }
            }
        }

        let output = Self::round_output(state.accumulated, config.decimals);
        ctx.dispatcher
            .write_or_add(&config.output_point_id, &format!("{output}"), None, 0)
            .await?;

        ctx.store.set_block_state(STATE_PREFIX, &config.id, &state)?;
        self.states.lock().insert(config.id.clone(), state);
        Ok(())
    }
}

impl Default for TotalizerProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for TotalizerProcessor {
    fn name(&self) -> &'static str {
        "totalizer"
    }

    async fn run_cycle(&self, ctx: &EngineContext) -> EngineResult<()> {
        let blocks = self
            .blocks
            .get(ctx.clock.as_ref(), ctx.settings.config_refresh(), || async {
                ctx.repo.totalizers().await
            })
            .await?;
        let enabled: Vec<&TotalizerConfig> = blocks.iter().filter(|b| b.enabled).collect();
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Clock;
    use crate::model::PointSample;
    use crate::repo::{ConfigRepository, MemoryHistorian, MemoryRepository};
    use crate::settings::EngineSettings;
    use crate::store::PointStore;
    use crate::time::ManualClock;
    use std::sync::Arc;

    fn config(id: &str, mode: TotalizerMode) -> TotalizerConfig {
        TotalizerConfig {
            id: id.into(),
            enabled: true,
            interval: 1.0,
            input_point_id: "in".into(),
            output_point_id: "out".into(),
            mode,
            overflow_threshold: None,
            reset_cron: None,
            decimals: 3,
        }
    }

    fn fixture(
        blocks: Vec<TotalizerConfig>,
    ) -> (EngineContext, Arc<MemoryRepository>, Arc<ManualClock>) {
        let repo = Arc::new(MemoryRepository::new());
        repo.set_totalizers(blocks);
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
    async fn rising_edge_count() {
        let (ctx, _, clock) = fixture(vec![config("t1", TotalizerMode::EventCountRising)]);
        let processor = TotalizerProcessor::new();
        let inputs = ["0", "1", "1", "0", "1", "0", "1"];
        for (i, v) in inputs.iter().enumerate() {
            ctx.store
                .set_final(&PointSample::new("in", *v, 1_000 + i as i64))
                .unwrap();
            processor.run_cycle(&ctx).await.unwrap();
            clock.advance(1);
        }
        assert_eq!(ctx.store.raw("out").unwrap().numeric(), Some(3.0));
    }

    #[tokio::test]
    async fn trapezoid_of_constant_input() {
        let (ctx, _, clock) = fixture(vec![config("t1", TotalizerMode::RateIntegration)]);
        let processor = TotalizerProcessor::new();
        // constant 6 over 5 intervals of 1 s
        for i in 0..6 {
            ctx.store
                .set_final(&PointSample::new("in", "6", 1_000 + i))
                .unwrap();
            processor.run_cycle(&ctx).await.unwrap();
            clock.advance(1);
        }
        let total = ctx.store.raw("out").unwrap().numeric().unwrap();
        assert!((total - 30.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unchanged_sample_does_not_accumulate() {
        let (ctx, _, clock) = fixture(vec![config("t1", TotalizerMode::RateIntegration)]);
        let processor = TotalizerProcessor::new();
        ctx.store
            .set_final(&PointSample::new("in", "6", 1_000))
            .unwrap();
        for _ in 0..4 {
            processor.run_cycle(&ctx).await.unwrap();
            clock.advance(1);
        }
        assert_eq!(ctx.store.raw("out").unwrap().numeric(), Some(0.0));
    }

    #[tokio::test]
    async fn overflow_resets_and_keeps_counting() {
        let mut cfg = config("t1", TotalizerMode::EventCountRising);
        cfg.overflow_threshold = Some(2.0);
        let (ctx, _, clock) = fixture(vec![cfg]);
        let processor = TotalizerProcessor::new();
        let inputs = ["0", "1", "0", "1", "0", "1"];
        let mut outputs = Vec::new();
        for (i, v) in inputs.iter().enumerate() {
            ctx.store
                .set_final(&PointSample::new("in", *v, 1_000 + i as i64))
                .unwrap();
            processor.run_cycle(&ctx).await.unwrap();
            outputs.push(ctx.store.raw("out").unwrap().numeric().unwrap());
            clock.advance(1);
        }
        // the accumulator reaches 2, then the overflow reset clears it
        // before the next edge is counted
        assert_eq!(outputs, vec![0.0, 1.0, 1.0, 2.0, 0.0, 1.0]);
        let state = ctx
            .store
            .block_state::<TotalizerState>(STATE_PREFIX, "t1")
            .unwrap();
        assert!(state.last_reset_unix > 1_000);
    }

    #[tokio::test]
    async fn manual_reset_zeroes_the_accumulator() {
        let (ctx, repo, clock) = fixture(vec![config("t1", TotalizerMode::EventCountRising)]);
        let processor = TotalizerProcessor::new();
        for (i, v) in ["0", "1", "0", "1"].iter().enumerate() {
            ctx.store
                .set_final(&PointSample::new("in", *v, 1_000 + i as i64))
                .unwrap();
            processor.run_cycle(&ctx).await.unwrap();
            clock.advance(1);
        }
        assert_eq!(ctx.store.raw("out").unwrap().numeric(), Some(2.0));
        repo.request_totalizer_reset("t1").await.unwrap();
        processor.run_cycle(&ctx).await.unwrap();
        assert_eq!(ctx.store.raw("out").unwrap().numeric(), Some(0.0));
    }

    #[tokio::test]
    async fn cron_reset_fires_once_per_match() {
        let mut cfg = config("t1", TotalizerMode::EventCountRising);
        cfg.reset_cron = Some("0 0 * * *".into());
        let (ctx, _, clock) = fixture(vec![cfg]);
        let processor = TotalizerProcessor::new();
        // accumulate two edges just before midnight
        clock.set(86_400 * 100 - 10);
        for (i, v) in ["0", "1", "0", "1"].iter().enumerate() {
            ctx.store
                .set_final(&PointSample::new("in", *v, clock.now_unix() + i as i64))
                .unwrap();
            processor.run_cycle(&ctx).await.unwrap();
            clock.advance(1);
        }
        assert_eq!(ctx.store.raw("out").unwrap().numeric(), Some(2.0));
        // midnight: the scheduled reset fires exactly once
        clock.set(86_400 * 100);
        processor.run_cycle(&ctx).await.unwrap();
        assert_eq!(ctx.store.raw("out").unwrap().numeric(), Some(0.0));
        clock.advance(10);
        ctx.store
            .set_final(&PointSample::new("in", "0", clock.now_unix()))
            .unwrap();
        processor.run_cycle(&ctx).await.unwrap();
        clock.advance(1);
        ctx.store
            .set_final(&PointSample::new("in", "1", clock.now_unix()))
            .unwrap();
        processor.run_cycle(&ctx).await.unwrap();
        assert_eq!(ctx.store.raw("out").unwrap().numeric(), Some(1.0));
    }

    #[tokio::test]
    async fn state_survives_restart() {
        let (ctx, _, clock) = fixture(vec![config("t1", TotalizerMode::EventCountRising)]);
        let processor = TotalizerProcessor::new();
        for (i, v) in ["0", "1"].iter().enumerate() {
            ctx.store
                .set_final(&PointSample::new("in", *v, 1_000 + i as i64))
                .unwrap();
            processor.run_cycle(&ctx).await.unwrap();
            clock.advance(1);
        }
        // new processor over the same store resumes the count
        let restarted = TotalizerProcessor::new();
        ctx.store
            .set_final(&PointSample::new("in", "0", 1_002))
            .unwrap();
        restarted.run_cycle(&ctx).await.unwrap();
        clock.advance(1);
        ctx.store
            .set_final(&PointSample::new("in", "1", 1_003))
            .unwrap();
        restarted.run_cycle(&ctx).await.unwrap();
        assert_eq!(ctx.store.raw("out").unwrap().numeric(), Some(2.0));
    }
}
