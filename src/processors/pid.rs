//! PID processor
//!
//! Honors cascade ordering: level-0 blocks run first, then level-1,
//! then level-2, with a short propagation delay between levels so a
//! child's setpoint reads its parent's output from the same cycle.
//! Blocks within a level run in parallel. A block with an active
//! tuning session hands its output to the relay tuner instead of the
//! controller.

use crate::context::EngineContext;
use crate::control::{PidController, RelayTuner, SchmittTrigger, TuningSafety};
use crate::error::{EngineError, EngineResult};
use crate::model::{PidCheckpoint, PidConfig, SourceRef, TuningSession, TuningStatus};
use crate::scheduler::{isolate, BlockCache, IntervalGate, Processor};
use crate::store::{resolve_source, resolve_source_bool};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

const MAX_CASCADE_LEVEL: u8 = 2;

struct PidRuntime {
    controller: PidController,
    config_hash: String,
    schmitt: SchmittTrigger,
    last_tick: Option<f64>,
}

pub struct PidProcessor {
    blocks: BlockCache<PidConfig>,
    runtimes: Mutex<HashMap<String, PidRuntime>>,
    tuners: Mutex<HashMap<String, RelayTuner>>,
    tuning_gate: IntervalGate,
}

impl PidProcessor {
    pub fn new() -> Self {
        Self {
            blocks: BlockCache::new(),
            runtimes: Mutex::new(HashMap::new()),
            tuners: Mutex::new(HashMap::new()),
            tuning_gate: IntervalGate::new(),
        }
    }

    fn missing(block_id: &str, reference: &SourceRef) -> EngineError {
        EngineError::MissingReference {
            block_id: block_id.to_string(),
            reference: reference.describe(),
        }
    }

    fn resolve_required(
        ctx: &EngineContext,
        block_id: &str,
        reference: &SourceRef,
    ) -> EngineResult<f64> {
        resolve_source(&ctx.store, reference).ok_or_else(|| Self::missing(block_id, reference))
    }

    /// The output currently observed on the output point, used to seed
    /// bumpless transfer
    fn observed_output(ctx: &EngineContext, config: &PidConfig) -> f64 {
        ctx.store
            .raw(&config.output_point_id)
            .and_then(|s| s.numeric())
            .or_else(|| {
                ctx.store
                    .final_value(&config.output_point_id)
                    .and_then(|s| s.numeric())
            })
            .unwrap_or(config.out_min)
            .clamp(config.out_min, config.out_max)
    }

    async fn step(
        &self,
        ctx: &EngineContext,
        config: &PidConfig,
        session: Option<&TuningSession>,
        all_blocks: &[PidConfig],
    ) -> EngineResult<()> {
        if let Some(session) = session {
            // tuning owns the output; the controller re-seeds from its
            // checkpoint or the observed output when the session ends
            self.runtimes.lock().remove(&config.id);
            return self.tuning_step(ctx, config, session, all_blocks).await;
        }

        let process_variable = ctx
            .store
            .final_value(&config.input_point_id)
            .and_then(|s| s.numeric())
            .ok_or_else(|| Self::missing(config.id.as_str(), &SourceRef::Point(config.input_point_id.clone())))?;
        let set_point = Self::resolve_required(ctx, &config.id, &config.set_point)?;
        let is_auto = match &config.is_auto {
            Some(reference) => resolve_source_bool(&ctx.store, reference)
                .ok_or_else(|| Self::missing(&config.id, reference))?,
            None => true,
        };
        let reverse = match &config.reverse_output {
            Some(reference) => resolve_source_bool(&ctx.store, reference)
                .ok_or_else(|| Self::missing(&config.id, reference))?,
            None => false,
        };

        let hash = config.config_hash();
        let now = ctx.clock.monotonic().as_secs_f64();

        let mut runtime = match self.runtimes.lock().remove(&config.id) {
            Some(runtime) => runtime,
            None => {
                // first sight after start: restore the checkpoint if
                // its hash still matches, otherwise seed bumplessly
                // from the observed output
                let mut controller = PidController::from_config(config);
                let mut schmitt = SchmittTrigger::default();
                match ctx.store.pid_state(&config.id) {
                    Some(checkpoint) if checkpoint.config_hash == hash => {
                        controller.restore(&checkpoint);
                        schmitt = SchmittTrigger::with_state(checkpoint.digital_output_latched);
                    }
                    _ => {
                        let observed = Self::observed_output(ctx, config);
                        controller.initialize_bumpless(observed, process_variable, set_point, reverse);
                    }
                }
                PidRuntime {
                    controller,
                    config_hash: hash.clone(),
                    schmitt,
                    last_tick: None,
                }
            }
        };

        let dt = runtime
            .last_tick
            .map(|t| now - t)
            .unwrap_or(config.interval.max(f64::EPSILON));
        if dt + 1e-9 < config.interval {
            self.runtimes.lock().insert(config.id.clone(), runtime);
            return Ok(());
        }

        if runtime.config_hash != hash {
            // configuration changed underneath the block
            let previous_output = runtime.controller.previous_output;
            let mut controller = PidController::from_config(config);
            controller.initialize_bumpless(previous_output, process_variable, set_point, reverse);
            runtime.controller = controller;
            runtime.config_hash = hash.clone();
        }
        runtime.last_tick = Some(now);

        let output = if is_auto {
            runtime
                .controller
                .compute(process_variable, set_point, dt, reverse)
        } else {
            let reference = config.manual_value.as_ref().ok_or_else(|| {
                EngineError::InvalidConfiguration {
                    block_id: config.id.clone(),
                    reason: "manual mode without a manual value source".into(),
                }
            })?;
            let manual = resolve_source(&ctx.store, reference)
                .ok_or_else(|| Self::missing(&config.id, reference))?;
            runtime
                .controller
                .track_manual(manual, process_variable, set_point, reverse)
        };

        let companion_transition = config.digital.as_ref().and_then(|digital| {
            runtime
                .schmitt
                .update(output, digital.high_threshold, digital.low_threshold)
        });

        let checkpoint = PidCheckpoint {
            id: config.id.clone(),
            config_hash: hash,
            last_tick_unix: ctx.clock.now_unix(),
            integral: runtime.controller.integral,
            previous_process_variable: runtime.controller.previous_process_variable,
            filtered_derivative: runtime.controller.filtered_derivative,
            previous_output: runtime.controller.previous_output,
            digital_output_latched: runtime.schmitt.state,
        };
        self.runtimes.lock().insert(config.id.clone(), runtime);

        ctx.dispatcher
            .write_or_add(
                &config.output_point_id,
                &format!("{output}"),
                None,
                config.output_duration_seconds,
            )
            .await?;
        if let (Some(digital), Some(state)) = (config.digital.as_ref(), companion_transition) {
            let bit = state != reverse;
            ctx.dispatcher
                .write_or_add(&digital.point_id, if bit { "1" } else { "0" }, None, 0)
                .await?;
        }
        ctx.store.set_pid_state(&checkpoint)?;
        Ok(())
    }

    async fn finish_session(
        &self,
        ctx: &EngineContext,
        mut session: TuningSession,
        status: TuningStatus,
        diagnostic: Option<String>,
    ) -> EngineResult<()> {
        info!(
            pid_id = %session.pid_id,
            ?status,
            diagnostic = diagnostic.as_deref().unwrap_or(""),
            "tuning session finished"
        );
        session.status = status;
        session.diagnostic = diagnostic;
        let pid_id = session.pid_id.clone();
        ctx.repo.update_tuning_session(session).await?;
        ctx.store.delete_tuning_state(&pid_id)?;
        self.tuners.lock().remove(&pid_id);
        Ok(())
    }

    async fn tuning_step(
        &self,
        ctx: &EngineContext,
        config: &PidConfig,
        session: &TuningSession,
        all_blocks: &[PidConfig],
    ) -> EngineResult<()> {
        if self
            .tuning_gate
            .due(&config.id, config.interval, ctx.clock.as_ref())
            .is_none()
        {
            return Ok(());
        }

        match session.status {
            TuningStatus::Initializing => {
                // cascade safety: a parent must be disabled before a
                // child is tuned
                if let Some(parent_id) = &config.parent_id {
                    let parent_enabled = all_blocks
                        .iter()
                        .any(|b| &b.id == parent_id && b.enabled);
                    if parent_enabled {
                        return self
                            .finish_session(
                                ctx,
                                session.clone(),
                                TuningStatus::Failed,
                                Some(format!(
                                    "parent PID {parent_id} must be disabled before tuning"
                                )),
                            )
                            .await;
                    }
                }
                let set_point = Self::resolve_required(ctx, &config.id, &config.set_point)?;
                let amplitude =
                    session.relay_amplitude_percent / 100.0 * (config.out_max - config.out_min);
                let center = (config.out_min + config.out_max) / 2.0;
                // resume a checkpointed relay test after a restart
                let tuner = ctx
                    .store
                    .tuning_state::<RelayTuner>(&config.id)
                    .unwrap_or_else(|| {
                        RelayTuner::new(set_point, amplitude, center, session.hysteresis)
                    });
                self.tuners.lock().insert(config.id.clone(), tuner);
                let mut session = session.clone();
                session.status = TuningStatus::RelayTest;
                info!(pid_id = %config.id, "relay test started");
                ctx.repo.update_tuning_session(session).await?;
                Ok(())
            }
            TuningStatus::RelayTest => {
                let mut tuner = match self.tuners.lock().remove(&config.id) {
                    Some(tuner) => tuner,
                    None => match ctx.store.tuning_state::<RelayTuner>(&config.id) {
                        Some(tuner) => tuner,
                        None => {
                            let set_point =
                                Self::resolve_required(ctx, &config.id, &config.set_point)?;
                            let amplitude = session.relay_amplitude_percent / 100.0
                                * (config.out_max - config.out_min);
                            RelayTuner::new(
                                set_point,
                                amplitude,
                                (config.out_min + config.out_max) / 2.0,
                                session.hysteresis,
                            )
                        }
                    },
                };

                let safety = self.relay_tick(ctx, config, session, &mut tuner).await?;
                match safety {
                    TuningSafety::Ok => {
                        let converged = tuner.confirmed_cycles() >= session.min_cycles;
                        ctx.store.set_tuning_state(&config.id, &tuner)?;
                        self.tuners.lock().insert(config.id.clone(), tuner);
                        if converged {
                            let mut session = session.clone();
                            session.status = TuningStatus::Analyzing;
                            ctx.repo.update_tuning_session(session).await?;
                        }
                        Ok(())
                    }
                    TuningSafety::TimedOut => {
                        self.finish_session(
                            ctx,
                            session.clone(),
                            TuningStatus::Aborted,
                            Some(format!(
                                "session exceeded timeout of {} s",
                                session.timeout_seconds
                            )),
                        )
                        .await
                    }
                    TuningSafety::AmplitudeExceeded => {
                        self.finish_session(
                            ctx,
                            session.clone(),
                            TuningStatus::Aborted,
                            Some(format!(
                                "oscillation amplitude {:.3} exceeded limit {:.3}",
                                tuner.max_excursion, session.max_amplitude
                            )),
                        )
                        .await
                    }
                    TuningSafety::TooManyFailures => {
                        self.finish_session(
                            ctx,
                            session.clone(),
                            TuningStatus::Failed,
                            Some("consecutive processing failures".into()),
                        )
                        .await
                    }
                    TuningSafety::MaxCyclesExceeded => {
                        self.finish_session(
                            ctx,
                            session.clone(),
                            TuningStatus::Failed,
                            Some(format!(
                                "no convergence within {} cycles",
                                session.max_cycles
                            )),
                        )
                        .await
                    }
                }
            }
            TuningStatus::Analyzing => {
                let tuner = self.tuners.lock().get(&config.id).cloned();
                let tuner = match tuner {
                    Some(tuner) => tuner,
                    None => match ctx.store.tuning_state::<RelayTuner>(&config.id) {
                        Some(tuner) => tuner,
                        None => {
                            return self
                                .finish_session(
                                    ctx,
                                    session.clone(),
                                    TuningStatus::Failed,
                                    Some("tuning runtime lost before analysis".into()),
                                )
                                .await
                        }
                    },
                };
                match tuner.analyze(session.min_cycles as usize) {
                    Some(result) => {
                        let mut session = session.clone();
                        session.calculated = Some(result);
                        info!(
                            pid_id = %config.id,
                            ku = result.ku,
                            pu = result.pu,
                            "tuning completed"
                        );
                        self.finish_session(ctx, session, TuningStatus::Completed, None)
                            .await
                    }
                    None => {
                        self.finish_session(
                            ctx,
                            session.clone(),
                            TuningStatus::Failed,
                            Some("insufficient oscillation data".into()),
                        )
                        .await
                    }
                }
            }
            // terminal states never reach the processor
            _ => Ok(()),
        }
    }

    /// One relay output step with the safety checks applied
    async fn relay_tick(
        &self,
        ctx: &EngineContext,
        config: &PidConfig,
        session: &TuningSession,
        tuner: &mut RelayTuner,
    ) -> EngineResult<TuningSafety> {
        let now_unix = ctx.clock.now_unix();
        if now_unix - session.start_unix > session.timeout_seconds {
            return Ok(TuningSafety::TimedOut);
        }
        let process_variable = match ctx
            .store
            .final_value(&config.input_point_id)
            .and_then(|s| s.numeric())
        {
            Some(v) => v,
            None => {
                tuner.failures += 1;
                warn!(pid_id = %config.id, failures = tuner.failures, "tuning input missing");
                if tuner.failures > ctx.settings.tuning_failure_limit {
                    return Ok(TuningSafety::TooManyFailures);
                }
                return Ok(TuningSafety::Ok);
            }
        };
        tuner.failures = 0;

        let output = tuner.step(process_variable, ctx.clock.now_unix_ms() as f64 / 1000.0);
        ctx.dispatcher
            .write_or_add(
                &config.output_point_id,
                &format!("{output}"),
                None,
                config.output_duration_seconds,
            )
            .await?;

        if tuner.max_excursion > session.max_amplitude {
            return Ok(TuningSafety::AmplitudeExceeded);
        }
        if tuner.confirmed_cycles() > session.max_cycles {
            return Ok(TuningSafety::MaxCyclesExceeded);
        }
        Ok(TuningSafety::Ok)
    }
}

impl Default for PidProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for PidProcessor {
    fn name(&self) -> &'static str {
        "pid"
    }

    async fn run_cycle(&self, ctx: &EngineContext) -> EngineResult<()> {
        let blocks = self
            .blocks
            .get(ctx.clock.as_ref(), ctx.settings.config_refresh(), || async {
                ctx.repo.pid_memories().await
            })
            .await?;

        let ids: HashSet<String> = blocks.iter().map(|b| b.id.clone()).collect();
        self.runtimes.lock().retain(|id, _| ids.contains(id));
        self.tuners.lock().retain(|id, _| ids.contains(id));
        self.tuning_gate.retain(&ids);

        let sessions: HashMap<String, TuningSession> = ctx
            .repo
            .tuning_sessions()
            .await?
            .into_iter()
            .filter(|s| s.status.is_active())
            .map(|s| (s.pid_id.clone(), s))
            .collect();

        for level in 0..=MAX_CASCADE_LEVEL {
            let level_blocks: Vec<&PidConfig> = blocks
                .iter()
                .filter(|b| b.enabled || sessions.contains_key(&b.id))
                .filter(|b| b.cascade_level.min(MAX_CASCADE_LEVEL) == level)
                .collect();
            if !level_blocks.is_empty() {
                join_all(level_blocks.iter().map(|config| {
                    isolate(
                        self.name(),
                        &config.id,
                        self.step(ctx, config, sessions.get(&config.id), &blocks),
                    )
                }))
                .await;
            }
            let deeper = blocks
                .iter()
                .any(|b| b.cascade_level.min(MAX_CASCADE_LEVEL) > level);
            if deeper && !ctx.cancel.sleep(ctx.settings.cascade_propagation()).await {
                return Ok(());
            }
        }
        Ok(())
    }
}
