//! Engine supervisor
//!
//! Owns the shared context, spawns one task per processor, and
//! carries the operator surface (gain apply, tuning abort, totalizer
//! reset, global writes). `start` is idempotent; a second call is a
//! no-op. Shutdown cancels the shared token and drains the tasks:
//! in-flight batch writes complete, pending write items stay queued
//! for the next process start.

use crate::context::EngineContext;
use crate::error::{EngineError, EngineResult};
use crate::model::{GlobalKind, GlobalVariable, PidGains, TuningStatus};
use crate::pipeline::MonitoringPipeline;
use crate::processors::{
    AlarmProcessor, ComparisonProcessor, ConditionalProcessor, DeadbandProcessor, MinMaxProcessor,
    MovingAverageProcessor, PidProcessor, RateOfChangeProcessor, ScheduleProcessor,
    StatisticalProcessor, TotalizerProcessor, WriteActionProcessor,
};
use crate::scheduler::{run_processor, wait_for_store, Processor};
use chrono::Datelike;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

pub struct Supervisor {
    ctx: EngineContext,
    started: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            ctx,
            started: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    fn processors() -> Vec<Arc<dyn Processor>> {
        vec![
            Arc::new(MonitoringPipeline::new()),
            Arc::new(AlarmProcessor::new()),
            Arc::new(PidProcessor::new()),
            Arc::new(TotalizerProcessor::new()),
            Arc::new(RateOfChangeProcessor::new()),
            Arc::new(MovingAverageProcessor::new()),
            Arc::new(DeadbandProcessor::new()),
            Arc::new(ScheduleProcessor::new()),
            Arc::new(ComparisonProcessor::new()),
            Arc::new(MinMaxProcessor::new()),
            Arc::new(ConditionalProcessor::new()),
            Arc::new(StatisticalProcessor::new()),
            Arc::new(WriteActionProcessor::new()),
        ]
    }

    /// Provision and launch every processor; a second call is a no-op
    pub async fn start(&self) -> EngineResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        wait_for_store("supervisor", &self.ctx).await;

        // history partitions for the current and next calendar year
        let year = self.ctx.clock.now_utc().year();
        self.ctx.repo.ensure_history_partitions(year).await?;
        self.ctx.repo.ensure_history_partitions(year + 1).await?;

        // prime the point catalog so the dispatcher routes correctly
        // before the pipeline's first refresh
        self.ctx.catalog.replace(self.ctx.repo.points().await?);

        let mut handles = self.handles.lock();
        for processor in Self::processors() {
            let name = processor.name();
            handles.push(tokio::spawn(run_processor(processor, self.ctx.clone())));
            info!(processor = name, "processor task launched");
        }
        info!("engine started");
        Ok(())
    }

    /// Cancel every processor and wait for the tasks to drain
    pub async fn shutdown(&self) {
        self.ctx.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        info!("engine stopped");
    }

    /// Write a global variable with a millisecond update stamp
    pub async fn set_global(
        &self,
        id: &str,
        name: &str,
        kind: GlobalKind,
        value: &str,
    ) -> EngineResult<()> {
        self.ctx.store.set_global(&GlobalVariable {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            value: value.to_string(),
            last_update_unix_ms: self.ctx.clock.now_unix_ms(),
        })
    }

    /// Copy the calculated gains of a completed tuning session into
    /// the PID configuration and drop the checkpoint so the next tick
    /// re-initializes bumplessly
    pub async fn apply_tuned_gains(&self, pid_id: &str) -> EngineResult<PidGains> {
        let session = self
            .ctx
            .repo
            .tuning_sessions()
            .await?
            .into_iter()
            .find(|s| s.pid_id == pid_id)
            .ok_or_else(|| EngineError::BlockNotFound(pid_id.to_string()))?;
        if session.status != TuningStatus::Completed {
            return Err(EngineError::TuningState {
                pid_id: pid_id.to_string(),
                expected: "Completed".into(),
            });
        }
        let gains = session
            .calculated
            .ok_or_else(|| EngineError::Internal("completed session without gains".into()))?
            .gains;
        self.ctx.repo.update_pid_gains(pid_id, gains).await?;
        self.ctx.store.delete_pid_state(pid_id)?;
        info!(pid_id, "tuned gains applied");
        Ok(gains)
    }

    /// Abort an active tuning session and hand the output back to the
    /// PID processor
    pub async fn abort_tuning(&self, pid_id: &str) -> EngineResult<()> {
        let mut session = self
            .ctx
            .repo
            .tuning_sessions()
            .await?
            .into_iter()
            .find(|s| s.pid_id == pid_id)
            .ok_or_else(|| EngineError::BlockNotFound(pid_id.to_string()))?;
        if !session.status.is_active() {
            return Err(EngineError::TuningState {
                pid_id: pid_id.to_string(),
                expected: "active".into(),
            });
        }
        session.status = TuningStatus::Aborted;
        session.diagnostic = Some("aborted by operator".into());
        self.ctx.repo.update_tuning_session(session).await?;
        self.ctx.store.delete_tuning_state(pid_id)?;
        Ok(())
    }

    /// Queue a manual totalizer reset for the block's next tick
    pub async fn request_totalizer_reset(&self, block_id: &str) -> EngineResult<()> {
        self.ctx.repo.request_totalizer_reset(block_id).await
    }
}
