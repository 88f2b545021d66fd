//! Moving-average processor
//!
//! Single-input blocks aggregate a sample window with SMA, EMA, or
//! WMA after optional outlier rejection. Multi-input blocks take a
//! single-tick weighted average across their inputs, skipping inputs
//! whose latest sample has gone stale. Output precision is four
//! decimals.

use crate::context::EngineContext;
use crate::control::stats;
use crate::error::EngineResult;
use crate::model::{AverageMethod, MovingAverageConfig, OutlierFilter};
use crate::scheduler::{isolate, BlockCache, IntervalGate, Processor};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

#[derive(Default)]
struct AverageState {
    window: VecDeque<(i64, f64)>,
    ema: Option<f64>,
}

pub struct MovingAverageProcessor {
    blocks: BlockCache<MovingAverageConfig>,
    gate: IntervalGate,
    states: Mutex<HashMap<String, AverageState>>,
}

impl MovingAverageProcessor {
    pub fn new() -> Self {
        Self {
            blocks: BlockCache::new(),
            gate: IntervalGate::new(),
            states: Mutex::new(HashMap::new()),
        }
    }

    fn filter(config: &MovingAverageConfig, values: &[f64]) -> Vec<f64> {
        match config.outlier {
            OutlierFilter::None => values.to_vec(),
            OutlierFilter::Iqr { factor } => stats::reject_outliers_iqr(values, factor),
            OutlierFilter::ZScore { threshold } => {
                stats::reject_outliers_zscore(values, threshold)
            }
        }
    }

    fn single_input(
        &self,
        config: &MovingAverageConfig,
        sample_unix: i64,
        value: f64,
    ) -> Option<f64> {
        let mut states = self.states.lock();
        let state = states.entry(config.id.clone()).or_default();
        let fresh = state.window.back().map(|(t, _)| *t) != Some(sample_unix);
        if fresh {
            state.window.push_back((sample_unix, value));
            while state.window.len() > config.window_size.max(1) {
                state.window.pop_front();
            }
        }
        if state.window.len() < config.min_samples.max(1) {
            return None;
        }
        let values: Vec<f64> = state.window.iter().map(|(_, v)| *v).collect();
        let filtered = Self::filter(config, &values);
        match config.method {
            AverageMethod::Sma => stats::mean(&filtered),
            AverageMethod::Wma => stats::wma(&filtered),
            AverageMethod::Ema => {
                if fresh {
                    // the EMA state starts at zero and advances once
                    // per new sample
                    let next = stats::ema_step(state.ema.unwrap_or(0.0), value, config.ema_alpha);
                    state.ema = Some(next);
                }
                state.ema
            }
        }
    }

    fn multi_input(&self, ctx: &EngineContext, config: &MovingAverageConfig) -> Option<f64> {
        let now = ctx.clock.now_unix();
        let mut values = Vec::new();
        let mut weights = Vec::new();
        for input in &config.inputs {
            let sample = match ctx.store.final_value(&input.point_id) {
                Some(s) => s,
                None => continue,
            };
            if (now - sample.unix_seconds) as f64 > config.stale_timeout {
                debug!(
                    block_id = %config.id,
                    point_id = %input.point_id,
                    "skipping stale input"
                );
                continue;
            }
            if let Some(value) = sample.numeric() {
                values.push(value);
                weights.push(input.weight.max(0.0));
            }
        }
        if values.is_empty() {
            return None;
        }
        let kept = Self::filter(config, &values);
        let mut weighted = 0.0;
        let mut total = 0.0;
        for (value, weight) in values.iter().zip(weights.iter()) {
            if kept.contains(value) {
                weighted += value * weight;
                total += weight;
            }
        }
        (total > 0.0).then(|| weighted / total)
    }

    async fn step(&self, ctx: &EngineContext, config: &MovingAverageConfig) -> EngineResult<()> {
        if self
            .gate
            .due(&config.id, config.interval, ctx.clock.as_ref())
            .is_none()
        {
            return Ok(());
        }

        let average = if config.inputs.len() <= 1 {
            let input = match config.inputs.first() {
                Some(input) => input,
                None => return Ok(()),
            };
            let sample = match ctx.store.final_value(&input.point_id) {
                Some(s) => s,
                None => return Ok(()),
            };
            match sample.numeric() {
                Some(value) => self.single_input(config, sample.unix_seconds, value),
                None => None,
            }
        } else {
            self.multi_input(ctx, config)
        };

        if let Some(average) = average {
            ctx.dispatcher
                .write_or_add(&config.output_point_id, &format!("{average:.4}"), None, 0)
                .await?;
        }
        Ok(())
    }
}

impl Default for MovingAverageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for MovingAverageProcessor {
    fn name(&self) -> &'static str {
        "moving_average"
    }

    async fn run_cycle(&self, ctx: &EngineContext) -> EngineResult<()> {
        let blocks = self
            .blocks
            .get(ctx.clock.as_ref(), ctx.settings.config_refresh(), || async {
                ctx.repo.moving_averages().await
            })
            .await?;
        let enabled: Vec<&MovingAverageConfig> = blocks.iter().filter(|b| b.enabled).collect();
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
    use crate::model::{AverageInput, PointSample};
    use crate::repo::{MemoryHistorian, MemoryRepository};
    use crate::settings::EngineSettings;
    use crate::store::PointStore;
    use crate::time::ManualClock;
    use std::sync::Arc;

    fn config(inputs: Vec<AverageInput>, method: AverageMethod) -> MovingAverageConfig {
        MovingAverageConfig {
            id: "m1".into(),
            enabled: true,
            interval: 1.0,
            inputs,
            output_point_id: "out".into(),
            method,
            window_size: 10,
            min_samples: 1,
            ema_alpha: 0.5,
            outlier: OutlierFilter::None,
            stale_timeout: 60.0,
        }
    }

    fn one(point: &str) -> Vec<AverageInput> {
        vec![AverageInput {
            point_id: point.into(),
            weight: 1.0,
        }]
    }

    fn fixture(block: MovingAverageConfig) -> (EngineContext, Arc<ManualClock>) {
        let repo = Arc::new(MemoryRepository::new());
        repo.set_moving_averages(vec![block]);
        let store = Arc::new(PointStore::ephemeral().unwrap());
        let clock = Arc::new(ManualClock::starting_at(1_000));
        let ctx = EngineContext::new(
            repo,
            Arc::new(MemoryHistorian::new()),
            store,
            clock.clone(),
            EngineSettings::default(),
        );
        (ctx, clock)
    }

    #[tokio::test]
    async fn ema_trace_matches_the_reference() {
        let (ctx, clock) = fixture(config(one("in"), AverageMethod::Ema));
        let processor = MovingAverageProcessor::new();
        let mut trace = Vec::new();
        for _ in 0..3 {
            ctx.store
                .set_final(&PointSample::new("in", "10", clock.now_unix()))
                .unwrap();
            processor.run_cycle(&ctx).await.unwrap();
            trace.push(ctx.store.raw("out").unwrap().numeric().unwrap());
            clock.advance(1);
        }
        assert_eq!(trace, vec![5.0, 7.5, 8.75]);
    }

    #[tokio::test]
    async fn sma_over_the_window() {
        let mut cfg = config(one("in"), AverageMethod::Sma);
        cfg.window_size = 3;
        let (ctx, clock) = fixture(cfg);
        let processor = MovingAverageProcessor::new();
        for v in ["10", "20", "30", "40"] {
            ctx.store
                .set_final(&PointSample::new("in", v, clock.now_unix()))
                .unwrap();
            processor.run_cycle(&ctx).await.unwrap();
            clock.advance(1);
        }
        // window holds 20, 30, 40
        assert_eq!(ctx.store.raw("out").unwrap().numeric(), Some(30.0));
    }

    #[tokio::test]
    async fn min_sample_gate_holds_output() {
        let mut cfg = config(one("in"), AverageMethod::Sma);
        cfg.min_samples = 3;
        let (ctx, clock) = fixture(cfg);
        let processor = MovingAverageProcessor::new();
        for v in ["10", "20"] {
            ctx.store
                .set_final(&PointSample::new("in", v, clock.now_unix()))
                .unwrap();
            processor.run_cycle(&ctx).await.unwrap();
            clock.advance(1);
        }
        assert!(ctx.store.raw("out").is_none());
    }

    #[tokio::test]
    async fn iqr_outliers_are_rejected_before_the_mean() {
        let mut cfg = config(one("in"), AverageMethod::Sma);
        cfg.outlier = OutlierFilter::Iqr { factor: 1.5 };
        let (ctx, clock) = fixture(cfg);
        let processor = MovingAverageProcessor::new();
        for v in ["10", "10.4", "9.6", "10.2", "9.8", "100"] {
            ctx.store
                .set_final(&PointSample::new("in", v, clock.now_unix()))
                .unwrap();
            processor.run_cycle(&ctx).await.unwrap();
            clock.advance(1);
        }
        let avg = ctx.store.raw("out").unwrap().numeric().unwrap();
        assert!((avg - 10.0).abs() < 0.5, "spike not rejected: {avg}");
    }

    #[tokio::test]
    async fn multi_input_weighted_average_skips_stale() {
        let inputs = vec![
            AverageInput {
                point_id: "a".into(),
                weight: 1.0,
            },
            AverageInput {
                point_id: "b".into(),
                weight: 3.0,
            },
            AverageInput {
                point_id: "c".into(),
                weight: 1.0,
            },
        ];
        let (ctx, clock) = fixture(config(inputs, AverageMethod::Sma));
        let processor = MovingAverageProcessor::new();
        let now = clock.now_unix();
        ctx.store.set_final(&PointSample::new("a", "10", now)).unwrap();
        ctx.store.set_final(&PointSample::new("b", "20", now)).unwrap();
        // c is two minutes old, beyond the 60 s stale timeout
        ctx.store
            .set_final(&PointSample::new("c", "1000", now - 120))
            .unwrap();
        processor.run_cycle(&ctx).await.unwrap();
        // (10·1 + 20·3) / 4
        assert_eq!(ctx.store.raw("out").unwrap().numeric(), Some(17.5));
    }
}
