//! Statistical window processor
//!
//! Windowed statistics over the input's final stream. Sliding windows
//! emit every due tick once the minimum-samples gate opens; tumbling
//! windows emit once per full batch and then clear.

use crate::context::EngineContext;
use crate::control::stats;
use crate::error::EngineResult;
use crate::model::{StatKind, StatisticalConfig, WindowMode};
use crate::scheduler::{isolate, BlockCache, IntervalGate, Processor};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;

#[derive(Default)]
struct StatState {
    samples: VecDeque<f64>,
    last_sample_unix: Option<i64>,
}

pub struct StatisticalProcessor {
    blocks: BlockCache<StatisticalConfig>,
    gate: IntervalGate,
    states: Mutex<HashMap<String, StatState>>,
}

impl StatisticalProcessor {
    pub fn new() -> Self {
        Self {
            blocks: BlockCache::new(),
            gate: IntervalGate::new(),
            states: Mutex::new(HashMap::new()),
        }
    }

    fn compute(kind: StatKind, percentile: Option<f64>, values: &[f64]) -> Option<f64> {
        match kind {
            StatKind::Min => values
                .iter()
                .copied()
                .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.min(v)))),
            StatKind::Max => values
                .iter()
                .copied()
                .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.max(v)))),
            StatKind::Mean => stats::mean(values),
            StatKind::StdDev => stats::std_dev(values),
            StatKind::Range => {
                let min = Self::compute(StatKind::Min, None, values)?;
                let max = Self::compute(StatKind::Max, None, values)?;
                Some(max - min)
            }
            StatKind::Median => stats::median(values),
            StatKind::Cv => {
                let mean = stats::mean(values)?;
                let sd = stats::std_dev(values)?;
                (mean != 0.0).then(|| sd / mean)
            }
            StatKind::Percentile => stats::percentile(values, percentile?),
        }
    }

    async fn emit(
        ctx: &EngineContext,
        config: &StatisticalConfig,
        values: &[f64],
    ) -> EngineResult<()> {
        for output in &config.outputs {
            match Self::compute(output.kind, output.percentile, values) {
                Some(value) if value.is_finite() => {
                    ctx.dispatcher
                        .write_or_add(&output.point_id, &format!("{value}"), None, 0)
                        .await?;
                }
                _ => {
                    warn!(
                        block_id = %config.id,
                        kind = ?output.kind,
                        "statistic not computable over the current window"
                    );
                }
            }
        }
        Ok(())
    }

    async fn step(&self, ctx: &EngineContext, config: &StatisticalConfig) -> EngineResult<()> {
        if self
            .gate
            .due(&config.id, config.interval, ctx.clock.as_ref())
            .is_none()
        {
            return Ok(());
        }
        let sample = match ctx.store.final_value(&config.input_point_id) {
            Some(s) => s,
            None => return Ok(()),
        };
        let value = match sample.numeric() {
            Some(v) => v,
            None => return Ok(()),
        };
        let window_size = config.effective_window_size();

        let values: Option<Vec<f64>> = {
            let mut states = self.states.lock();
            let state = states.entry(config.id.clone()).or_default();
            if state.last_sample_unix != Some(sample.unix_seconds) {
                state.last_sample_unix = Some(sample.unix_seconds);
                state.samples.push_back(value);
            }
            match config.window {
                WindowMode::Sliding => {
                    while state.samples.len() > window_size {
                        state.samples.pop_front();
                    }
                    (state.samples.len() >= config.effective_min_samples())
                        .then(|| state.samples.iter().copied().collect())
                }
                WindowMode::Tumbling => {
                    if state.samples.len() >= window_size {
                        let batch = state.samples.iter().copied().collect();
                        state.samples.clear();
                        Some(batch)
                    } else {
                        None
                    }
                }
            }
        };

        if let Some(values) = values {
            Self::emit(ctx, config, &values).await?;
        }
        Ok(())
    }
}

impl Default for StatisticalProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for StatisticalProcessor {
    fn name(&self) -> &'static str {
        "statistical"
    }

    async fn run_cycle(&self, ctx: &EngineContext) -> EngineResult<()> {
        let blocks = self
            .blocks
            .get(ctx.clock.as_ref(), ctx.settings.config_refresh(), || async {
                ctx.repo.statisticals().await
            })
            .await?;
        let enabled: Vec<&StatisticalConfig> = blocks.iter().filter(|b| b.enabled).collect();
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
    use crate::model::{PointSample, StatOutput};
    use crate::repo::{MemoryHistorian, MemoryRepository};
    use crate::settings::EngineSettings;
    use crate::store::PointStore;
    use crate::time::ManualClock;
    use std::sync::Arc;

    fn output(kind: StatKind, point: &str) -> StatOutput {
        StatOutput {
            kind,
            percentile: None,
            point_id: point.into(),
        }
    }

    fn config(window: WindowMode, outputs: Vec<StatOutput>) -> StatisticalConfig {
        StatisticalConfig {
            id: "st1".into(),
            enabled: true,
            interval: 1.0,
            input_point_id: "in".into(),
            window,
            window_size: 10,
            min_samples: 2,
            outputs,
        }
    }

    fn fixture(block: StatisticalConfig) -> (EngineContext, Arc<ManualClock>) {
        let repo = Arc::new(MemoryRepository::new());
        repo.set_statisticals(vec![block]);
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

    async fn feed(
        ctx: &EngineContext,
        clock: &ManualClock,
        processor: &StatisticalProcessor,
        values: &[f64],
    ) {
        for v in values {
            ctx.store
                .set_final(&PointSample::new("in", format!("{v}"), clock.now_unix()))
                .unwrap();
            processor.run_cycle(ctx).await.unwrap();
            clock.advance(1);
        }
    }

    #[tokio::test]
    async fn sliding_window_statistics() {
        let (ctx, clock) = fixture(config(
            WindowMode::Sliding,
            vec![
                output(StatKind::Min, "min"),
                output(StatKind::Max, "max"),
                output(StatKind::Mean, "mean"),
                output(StatKind::Range, "range"),
                output(StatKind::Median, "median"),
            ],
        ));
        let processor = StatisticalProcessor::new();
        feed(&ctx, &clock, &processor, &[1.0, 2.0, 3.0, 4.0, 5.0]).await;
        assert_eq!(ctx.store.raw("min").unwrap().numeric(), Some(1.0));
        assert_eq!(ctx.store.raw("max").unwrap().numeric(), Some(5.0));
        assert_eq!(ctx.store.raw("mean").unwrap().numeric(), Some(3.0));
        assert_eq!(ctx.store.raw("range").unwrap().numeric(), Some(4.0));
        assert_eq!(ctx.store.raw("median").unwrap().numeric(), Some(3.0));
    }

    #[tokio::test]
    async fn percentile_output() {
        let mut cfg = config(WindowMode::Sliding, Vec::new());
        cfg.outputs = vec![StatOutput {
            kind: StatKind::Percentile,
            percentile: Some(90.0),
            point_id: "p90".into(),
        }];
        let (ctx, clock) = fixture(cfg);
        let processor = StatisticalProcessor::new();
        let values: Vec<f64> = (1..=11).map(|i| i as f64).collect();
        feed(&ctx, &clock, &processor, &values).await;
        // window holds 2..=11 (size 10); p90 of that span
        assert_eq!(ctx.store.raw("p90").unwrap().numeric(), Some(10.1));
    }

    #[tokio::test]
    async fn min_samples_gate() {
        let (ctx, clock) = fixture(config(
            WindowMode::Sliding,
            vec![output(StatKind::Mean, "mean")],
        ));
        let processor = StatisticalProcessor::new();
        feed(&ctx, &clock, &processor, &[7.0]).await;
        assert!(ctx.store.raw("mean").is_none());
        feed(&ctx, &clock, &processor, &[9.0]).await;
        assert_eq!(ctx.store.raw("mean").unwrap().numeric(), Some(8.0));
    }

    #[tokio::test]
    async fn tumbling_window_emits_once_per_batch() {
        let (ctx, clock) = fixture(config(
            WindowMode::Tumbling,
            vec![output(StatKind::Mean, "mean")],
        ));
        let processor = StatisticalProcessor::new();
        // nine samples: no batch yet
        let first_nine: Vec<f64> = (1..=9).map(|i| i as f64).collect();
        feed(&ctx, &clock, &processor, &first_nine).await;
        assert!(ctx.store.raw("mean").is_none());
        // tenth completes the batch of 1..=10
        feed(&ctx, &clock, &processor, &[10.0]).await;
        assert_eq!(ctx.store.raw("mean").unwrap().numeric(), Some(5.5));
        // the next sample starts a fresh batch; the output holds
        feed(&ctx, &clock, &processor, &[100.0]).await;
        assert_eq!(ctx.store.raw("mean").unwrap().numeric(), Some(5.5));
    }

    #[tokio::test]
    async fn std_dev_and_cv() {
        let (ctx, clock) = fixture(config(
            WindowMode::Sliding,
            vec![output(StatKind::StdDev, "sd"), output(StatKind::Cv, "cv")],
        ));
        let processor = StatisticalProcessor::new();
        feed(&ctx, &clock, &processor, &[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).await;
        let sd = ctx.store.raw("sd").unwrap().numeric().unwrap();
        // sample standard deviation of the classic data set
        assert!((sd - 2.1380899).abs() < 1e-6);
        let cv = ctx.store.raw("cv").unwrap().numeric().unwrap();
        assert!((cv - sd / 5.0).abs() < 1e-9);
    }
}
