//! Processor lifecycle harness
//!
//! Every memory processor runs the same loop: block until the
//! configuration database answers (bounded, capped backoff), then tick
//! at the base rate, gating each block by its own interval and
//! refreshing cached configuration on the standard cadence. A failure
//! in one block is logged with the block id and never aborts the
//! cycle; a failure of the whole cycle is logged with a correlation id
//! and the loop continues after the normal tick delay.

use crate::context::EngineContext;
use crate::error::EngineResult;
use crate::time::Clock;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// One periodic memory processor
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// One cycle over every due block of this processor's kind
    async fn run_cycle(&self, ctx: &EngineContext) -> EngineResult<()>;
}

/// Block until the configuration database is reachable
///
/// Bounded retry with exponential backoff capped at the configured
/// ceiling. If the bound is exhausted the loop starts anyway; steady
/// state cycle errors take over from there.
pub async fn wait_for_store(name: &str, ctx: &EngineContext) {
    let mut backoff = Duration::from_millis(100);
    let cap = Duration::from_millis(ctx.settings.store_wait_max_backoff_ms);
    for attempt in 1..=ctx.settings.store_wait_attempts {
        if ctx.cancel.is_cancelled() {
            return;
        }
        match ctx.repo.ping().await {
            Ok(()) => {
                if attempt > 1 {
                    info!(processor = name, attempt, "configuration database reachable");
                }
                return;
            }
            Err(e) => {
                warn!(
                    processor = name,
                    attempt, "waiting for configuration database: {e}"
                );
            }
        }
        if !ctx.cancel.sleep(backoff).await {
            return;
        }
        backoff = (backoff * 2).min(cap);
    }
    warn!(
        processor = name,
        "wait-for-store attempts exhausted, starting anyway"
    );
}

/// Run a processor until cancellation
///
/// Each cycle executes in its own task so a panicking block brings
/// down only that cycle, never the processor.
pub async fn run_processor(processor: Arc<dyn Processor>, ctx: EngineContext) {
    let name = processor.name();
    wait_for_store(name, &ctx).await;
    info!(processor = name, "processor started");

    while !ctx.cancel.is_cancelled() {
        let cycle_processor = processor.clone();
        let cycle_ctx = ctx.clone();
        let outcome =
            tokio::spawn(async move { cycle_processor.run_cycle(&cycle_ctx).await }).await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(
                    processor = name,
                    correlation_id = %Uuid::new_v4(),
                    "cycle failed: {e}"
                );
            }
            Err(join_error) => {
                error!(
                    processor = name,
                    correlation_id = %Uuid::new_v4(),
                    "cycle panicked: {join_error}"
                );
            }
        }
        if !ctx.cancel.sleep(ctx.settings.base_tick()).await {
            break;
        }
    }
    info!(processor = name, "processor stopped");
}

/// Run one block step in an isolated failure scope
pub async fn isolate<F>(processor: &str, block_id: &str, step: F)
where
    F: Future<Output = EngineResult<()>>,
{
    if let Err(e) = step.await {
        warn!(processor, block_id, "block step skipped: {e}");
    }
}

/// Per-block interval gating
///
/// `due` answers whether a block should run this tick and, when it
/// should, the elapsed seconds since its previous run.
#[derive(Default)]
pub struct IntervalGate {
    last_run: Mutex<HashMap<String, f64>>,
}

impl IntervalGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn due(&self, block_id: &str, interval_seconds: f64, clock: &dyn Clock) -> Option<f64> {
        let now = clock.monotonic().as_secs_f64();
        let interval = interval_seconds.max(0.0);
        let mut last_run = self.last_run.lock();
        match last_run.get(block_id).copied() {
            Some(previous) => {
                let dt = now - previous;
                if dt + 1e-9 >= interval {
                    last_run.insert(block_id.to_string(), now);
                    Some(dt)
                } else {
                    None
                }
            }
            None => {
                last_run.insert(block_id.to_string(), now);
                Some(interval.max(f64::EPSILON))
            }
        }
    }

    /// Drop gate entries for blocks that no longer exist
    pub fn retain(&self, block_ids: &HashSet<String>) {
        self.last_run.lock().retain(|id, _| block_ids.contains(id));
    }
}

/// Cached block configuration, refreshed on the standard cadence
pub struct BlockCache<T> {
    inner: Mutex<Option<(Vec<T>, Duration)>>,
}

impl<T: Clone> BlockCache<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Return cached blocks, refreshing when stale. A failed refresh
    /// falls back to the previous snapshot when one exists.
    pub async fn get<F, Fut>(
        &self,
        clock: &dyn Clock,
        refresh_period: Duration,
        fetch: F,
    ) -> EngineResult<Vec<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<Vec<T>>>,
    {
        let now = clock.monotonic();
        if let Some((blocks, fetched_at)) = self.inner.lock().as_ref() {
            if now.saturating_sub(*fetched_at) < refresh_period {
                return Ok(blocks.clone());
            }
        }
        match fetch().await {
            Ok(fresh) => {
                *self.inner.lock() = Some((fresh.clone(), now));
                Ok(fresh)
            }
            Err(e) => match self.inner.lock().as_ref() {
                Some((stale, _)) => {
                    warn!("configuration refresh failed, keeping cached blocks: {e}");
                    Ok(stale.clone())
                }
                None => Err(e),
            },
        }
    }
}

impl<T: Clone> Default for BlockCache<T> {
    fn default() -> Self {
        Self::new()
    }
}
