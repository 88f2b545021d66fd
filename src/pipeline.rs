//! Monitoring pipeline
//!
//! Per-cycle loop from the raw namespace to the final namespace:
//! join each raw sample to its point configuration, push it through
//! the point's smoothing window, apply calibration and normalization,
//! and publish to the final cache and the historian under their
//! per-point throttles.

use crate::context::EngineContext;
use crate::error::EngineResult;
use crate::model::{Point, PointSample, SmoothingMethod};
use crate::scheduler::{BlockCache, Processor};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::warn;

#[derive(Default)]
struct PointState {
    window: VecDeque<f64>,
    last_processed_unix: Option<i64>,
    last_final_unix: Option<i64>,
    last_historian_unix: Option<i64>,
}

pub struct MonitoringPipeline {
    points: BlockCache<Point>,
    state: Mutex<HashMap<String, PointState>>,
    last_empty_warn: Mutex<Option<Duration>>,
}

impl MonitoringPipeline {
    pub fn new() -> Self {
        Self {
            points: BlockCache::new(),
            state: Mutex::new(HashMap::new()),
            last_empty_warn: Mutex::new(None),
        }
    }

    fn format_value(point: &Point, value: f64) -> String {
        if point.kind.is_digital() {
            if value != 0.0 { "1" } else { "0" }.to_string()
        } else {
            format!("{value}")
        }
    }

    fn process_sample(&self, point: &Point, raw: &PointSample) -> Option<(String, i64)> {
        let numeric = match raw.numeric() {
            Some(v) => v,
            None => {
                warn!(
                    point_id = %point.id,
                    value = %raw.value,
                    "discarding unparsable raw sample"
                );
                return None;
            }
        };

        let mut state = self.state.lock();
        let entry = state.entry(point.id.clone()).or_default();
        if entry.last_processed_unix == Some(raw.unix_seconds) {
            // the driver has not produced a new sample yet
            return None;
        }
        entry.last_processed_unix = Some(raw.unix_seconds);

        entry.window.push_back(numeric);
        let bound = point.number_of_samples.max(1);
        while entry.window.len() > bound {
            entry.window.pop_front();
        }

        if point.kind.is_digital() && point.smoothing == SmoothingMethod::Mean {
            warn!(point_id = %point.id, "digital point configured with mean smoothing");
        }
        let aggregated = match point.effective_smoothing() {
            SmoothingMethod::Last => *entry.window.back()?,
            SmoothingMethod::Mean => {
                entry.window.iter().sum::<f64>() / entry.window.len() as f64
            }
        };

        let mut value = match point.calibration {
            Some(cal) => cal.apply(aggregated),
            None => aggregated,
        };
        if let Some(range) = point.range {
            value = range.clamp(value);
        }
        Some((Self::format_value(point, value), raw.unix_seconds))
    }
}

impl Default for MonitoringPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for MonitoringPipeline {
    fn name(&self) -> &'static str {
        "monitoring"
    }

    async fn run_cycle(&self, ctx: &EngineContext) -> EngineResult<()> {
        let points = self
            .points
            .get(ctx.clock.as_ref(), ctx.settings.config_refresh(), || async {
                ctx.repo.points().await
            })
            .await?;
        ctx.catalog.replace(points.clone());
        let by_id: HashMap<&str, &Point> = points.iter().map(|p| (p.id.as_str(), p)).collect();

        let raw_samples = ctx.store.all_raw()?;
        if raw_samples.is_empty() && !points.is_empty() {
            let now = ctx.clock.monotonic();
            let warn_period = Duration::from_secs(ctx.settings.empty_raw_warn_secs);
            let mut last = self.last_empty_warn.lock();
            if last.map_or(true, |at| now.saturating_sub(at) >= warn_period) {
                warn!("points are configured but the raw cache is empty");
                *last = Some(now);
            }
            return Ok(());
        }

        let now_unix = ctx.clock.now_unix();
        for raw in &raw_samples {
            let point = match by_id.get(raw.point_id.as_str()) {
                Some(point) => *point,
                None => {
                    warn!(point_id = %raw.point_id, "raw sample without point configuration");
                    continue;
                }
            };
            let (value, sample_unix) = match self.process_sample(point, raw) {
                Some(result) => result,
                None => continue,
            };

            let (write_final, write_historian) = {
                let mut state = self.state.lock();
                let entry = state.entry(point.id.clone()).or_default();
                let write_final = entry
                    .last_final_unix
                    .map_or(true, |t| now_unix - t >= point.save_interval);
                let write_historian = entry
                    .last_historian_unix
                    .map_or(true, |t| now_unix - t >= point.save_historical_interval);
                if write_final {
                    entry.last_final_unix = Some(now_unix);
                }
                if write_historian {
                    entry.last_historian_unix = Some(now_unix);
                }
                (write_final, write_historian)
            };

            if write_final {
                ctx.store
                    .set_final(&PointSample::new(&point.id, &value, sample_unix))?;
            }
            if write_historian {
                if let Err(e) = ctx.historian.append(&point.id, &value, sample_unix).await {
                    warn!(point_id = %point.id, "historian append failed: {e}");
                }
            }
        }
        Ok(())
    }
}
