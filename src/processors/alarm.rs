//! Alarm processor
//!
//! Runs the NoAlarm → Suspicious → HasAlarm state machine per alarm,
//! persists active alarms and the trigger/clear trail, and feeds the
//! external-alarm voting aggregators. Database mutations accumulate in
//! a batch committed once per cycle.

use crate::context::EngineContext;
use crate::error::EngineResult;
use crate::model::{
    ActiveAlarm, AlarmCondition, AlarmConfig, AlarmHistoryEntry, AlarmKind, AlarmStatus,
    MonitorAlarmState,
};
use crate::repo::AlarmBatch;
use crate::scheduler::{isolate, BlockCache, IntervalGate, Processor};
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

pub struct AlarmProcessor {
    blocks: BlockCache<AlarmConfig>,
    gate: IntervalGate,
    states: Mutex<HashMap<String, MonitorAlarmState>>,
    seeded: Mutex<bool>,
}

impl AlarmProcessor {
    pub fn new() -> Self {
        Self {
            blocks: BlockCache::new(),
            gate: IntervalGate::new(),
            states: Mutex::new(HashMap::new()),
            seeded: Mutex::new(false),
        }
    }

    /// Resume HasAlarm states from the persisted active-alarm table
    async fn seed_from_active(&self, ctx: &EngineContext) -> EngineResult<()> {
        {
            let seeded = self.seeded.lock();
            if *seeded {
                return Ok(());
            }
        }
        let active = ctx.repo.active_alarms().await?;
        let mut states = self.states.lock();
        for alarm in active {
            states.insert(
                alarm.alarm_id.clone(),
                MonitorAlarmState {
                    status: AlarmStatus::HasAlarm,
                    last_transition_unix: alarm.triggered_unix,
                },
            );
        }
        *self.seeded.lock() = true;
        Ok(())
    }

    fn raw_trigger(&self, ctx: &EngineContext, alarm: &AlarmConfig, now: i64) -> Option<bool> {
        let sample = ctx.store.final_value(&alarm.point_id)?;
        match alarm.kind {
            AlarmKind::Timeout => Some(now - sample.unix_seconds > alarm.timeout_seconds),
            AlarmKind::Comparative => {
                let value = sample.numeric()?;
                let condition = alarm.condition?;
                Some(match condition {
                    AlarmCondition::GreaterOrEqual => value >= alarm.value1,
                    AlarmCondition::LessOrEqual => value <= alarm.value1,
                    AlarmCondition::Equal => value == alarm.value1,
                    AlarmCondition::NotEqual => value != alarm.value1,
                    AlarmCondition::Between => {
                        let upper = alarm.value2.unwrap_or(alarm.value1);
                        value >= alarm.value1 && value <= upper
                    }
                })
            }
        }
    }

    /// Feed the external-alarm aggregators for one alarm
    ///
    /// An external with `value = true` asserts through any-true, one
    /// with `value = false` through any-false. Disabled externals are
    /// treated as "no alarm".
    async fn publish_externals(
        &self,
        ctx: &EngineContext,
        alarm: &AlarmConfig,
        active: bool,
    ) -> EngineResult<()> {
        for external in &alarm.externals {
            let asserted = active && external.enabled;
            if external.value {
                ctx.voting
                    .assert_any_true(
                        &ctx.dispatcher,
                        &external.target_point_id,
                        &alarm.id,
                        asserted,
                    )
                    .await?;
            } else {
                ctx.voting
                    .assert_any_false(
                        &ctx.dispatcher,
                        &external.target_point_id,
                        &alarm.id,
                        asserted,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    fn snapshot(alarm: &AlarmConfig) -> String {
        serde_json::to_string(alarm).unwrap_or_default()
    }

    async fn step(
        &self,
        ctx: &EngineContext,
        alarm: &AlarmConfig,
        batch: &Mutex<AlarmBatch>,
    ) -> EngineResult<()> {
        if self
            .gate
            .due(&alarm.id, alarm.interval, ctx.clock.as_ref())
            .is_none()
        {
            return Ok(());
        }
        let now = ctx.clock.now_unix();

        let previous = {
            let states = self.states.lock();
            states
                .get(&alarm.id)
                .copied()
                .unwrap_or_else(|| MonitorAlarmState::idle(now))
        };

        if !alarm.enabled {
            // forced to NoAlarm without emitting a trigger; a stale
            // active row still clears
            if previous.status == AlarmStatus::HasAlarm {
                let mut batch = batch.lock();
                batch.deletes.push(alarm.id.clone());
                batch.history.push(AlarmHistoryEntry {
                    alarm_id: alarm.id.clone(),
                    active: false,
                    unix_seconds: now,
                    snapshot: Self::snapshot(alarm),
                });
            }
            self.states
                .lock()
                .insert(alarm.id.clone(), MonitorAlarmState::idle(now));
            self.publish_externals(ctx, alarm, false).await?;
            for external in &alarm.externals {
                ctx.voting.clear_source(&external.target_point_id, &alarm.id);
            }
            return Ok(());
        }

        let raw_trigger = match self.raw_trigger(ctx, alarm, now) {
            Some(t) => t,
            // missing or unparsable input: the alarm stays where it was
            None => {
                debug!(alarm_id = %alarm.id, "alarm input missing, holding state");
                return Ok(());
            }
        };

        let mut next = previous;
        let mut triggered = false;
        let mut cleared = false;
        match (previous.status, raw_trigger) {
            (AlarmStatus::NoAlarm, true) => {
                next = MonitorAlarmState {
                    status: AlarmStatus::Suspicious,
                    last_transition_unix: now,
                };
            }
            (AlarmStatus::Suspicious, true) => {
                if (now - previous.last_transition_unix) as f64 >= alarm.alarm_delay {
                    next = MonitorAlarmState {
                        status: AlarmStatus::HasAlarm,
                        last_transition_unix: now,
                    };
                    triggered = true;
                }
            }
            (AlarmStatus::HasAlarm, true) => {}
            (status, false) => {
                if status == AlarmStatus::HasAlarm {
                    cleared = true;
                }
                if status != AlarmStatus::NoAlarm {
                    next = MonitorAlarmState::idle(now);
                }
            }
        }

        if triggered {
            info!(alarm_id = %alarm.id, "alarm triggered");
            let mut batch = batch.lock();
            batch.upserts.push(ActiveAlarm {
                alarm_id: alarm.id.clone(),
                triggered_unix: now,
            });
            batch.history.push(AlarmHistoryEntry {
                alarm_id: alarm.id.clone(),
                active: true,
                unix_seconds: now,
                snapshot: Self::snapshot(alarm),
            });
        }
        if cleared {
            info!(alarm_id = %alarm.id, "alarm cleared");
            let mut batch = batch.lock();
            batch.deletes.push(alarm.id.clone());
            batch.history.push(AlarmHistoryEntry {
                alarm_id: alarm.id.clone(),
                active: false,
                unix_seconds: now,
                snapshot: Self::snapshot(alarm),
            });
        }
        if triggered || cleared {
            self.publish_externals(ctx, alarm, triggered).await?;
        }

        self.states.lock().insert(alarm.id.clone(), next);
        Ok(())
    }
}

impl Default for AlarmProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Processor for AlarmProcessor {
    fn name(&self) -> &'static str {
        "alarm"
    }

    async fn run_cycle(&self, ctx: &EngineContext) -> EngineResult<()> {
        self.seed_from_active(ctx).await?;
        let alarms = self
            .blocks
            .get(ctx.clock.as_ref(), ctx.settings.config_refresh(), || async {
                ctx.repo.alarms().await
            })
            .await?;

        let ids: HashSet<String> = alarms.iter().map(|a| a.id.clone()).collect();
        self.gate.retain(&ids);
        self.states.lock().retain(|id, _| ids.contains(id));

        let batch = Mutex::new(AlarmBatch::default());
        join_all(
            alarms
                .iter()
                .map(|alarm| isolate(self.name(), &alarm.id, self.step(ctx, alarm, &batch))),
        )
        .await;

        let batch = std::mem::take(&mut *batch.lock());
        if !batch.is_empty() {
            ctx.repo.commit_alarm_batch(batch).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PointSample;
    use crate::repo::{ConfigRepository, MemoryHistorian, MemoryRepository};
    use crate::settings::EngineSettings;
    use crate::store::PointStore;
    use crate::time::ManualClock;
    use std::sync::Arc;

    fn comparative_alarm(id: &str, threshold: f64, delay: f64) -> AlarmConfig {
        AlarmConfig {
            id: id.into(),
            enabled: true,
            interval: 1.0,
            point_id: "pv".into(),
            kind: AlarmKind::Comparative,
            condition: Some(AlarmCondition::GreaterOrEqual),
            value1: threshold,
            value2: None,
            timeout_seconds: 0,
            alarm_delay: delay,
            message: None,
            externals: Vec::new(),
        }
    }

    fn fixture(alarms: Vec<AlarmConfig>) -> (EngineContext, Arc<MemoryRepository>, Arc<ManualClock>)
    {
        let repo = Arc::new(MemoryRepository::new());
        repo.set_alarms(alarms);
        let store = Arc::new(PointStore::ephemeral().unwrap());
        let clock = Arc::new(ManualClock::starting_at(0));
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
    async fn delay_trace_matches_the_state_machine() {
        // threshold 10, delay 5; the alarm must fire exactly at t=9
        // after being continuously suspicious since t=4
        let (ctx, repo, clock) = fixture(vec![comparative_alarm("a1", 10.0, 5.0)]);
        let processor = AlarmProcessor::new();
        let inputs = [5.0, 12.0, 12.0, 5.0, 12.0, 12.0, 12.0, 12.0, 12.0, 12.0];
        let mut statuses = Vec::new();
        for (t, v) in inputs.iter().enumerate() {
            clock.set(t as i64);
            ctx.store
                .set_final(&PointSample::new("pv", format!("{v}"), t as i64))
                .unwrap();
            processor.run_cycle(&ctx).await.unwrap();
            statuses.push(processor.states.lock().get("a1").unwrap().status);
        }
        use AlarmStatus::*;
        assert_eq!(
            statuses,
            vec![
                NoAlarm, Suspicious, Suspicious, NoAlarm, Suspicious, Suspicious, Suspicious,
                Suspicious, Suspicious, HasAlarm
            ]
        );
        // exactly one trigger entry
        let history = repo.alarm_history_entries();
        assert_eq!(history.iter().filter(|h| h.active).count(), 1);
        assert_eq!(repo.active_alarms().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn short_excursions_never_reach_has_alarm() {
        let (ctx, repo, clock) = fixture(vec![comparative_alarm("a1", 10.0, 5.0)]);
        let processor = AlarmProcessor::new();
        // true for 4 seconds only, strictly less than the delay
        for t in 0..4 {
            clock.set(t);
            ctx.store
                .set_final(&PointSample::new("pv", "12", t))
                .unwrap();
            processor.run_cycle(&ctx).await.unwrap();
        }
        clock.set(4);
        ctx.store.set_final(&PointSample::new("pv", "5", 4)).unwrap();
        processor.run_cycle(&ctx).await.unwrap();
        assert!(repo.active_alarms().await.unwrap().is_empty());
        assert!(repo.alarm_history_entries().is_empty());
    }

    #[tokio::test]
    async fn clear_emits_history_and_deletes_active() {
        let (ctx, repo, clock) = fixture(vec![comparative_alarm("a1", 10.0, 0.0)]);
        let processor = AlarmProcessor::new();
        for t in 0..2 {
            clock.set(t);
            ctx.store
                .set_final(&PointSample::new("pv", "12", t))
                .unwrap();
            processor.run_cycle(&ctx).await.unwrap();
        }
        assert_eq!(repo.active_alarms().await.unwrap().len(), 1);
        clock.set(2);
        ctx.store.set_final(&PointSample::new("pv", "5", 2)).unwrap();
        processor.run_cycle(&ctx).await.unwrap();
        assert!(repo.active_alarms().await.unwrap().is_empty());
        let history = repo.alarm_history_entries();
        assert_eq!(history.len(), 2);
        assert!(!history[1].active);
    }

    #[tokio::test]
    async fn externals_fan_into_the_target_point() {
        let mut alarm = comparative_alarm("a1", 10.0, 0.0);
        alarm.externals = vec![crate::model::ExternalAlarm {
            id: "e1".into(),
            target_point_id: "siren".into(),
            value: true,
            enabled: true,
        }];
        let (ctx, _, clock) = fixture(vec![alarm]);
        let processor = AlarmProcessor::new();
        clock.set(0);
        ctx.store
            .set_final(&PointSample::new("pv", "12", 0))
            .unwrap();
        processor.run_cycle(&ctx).await.unwrap();
        clock.set(1);
        ctx.store
            .set_final(&PointSample::new("pv", "12", 1))
            .unwrap();
        processor.run_cycle(&ctx).await.unwrap();
        assert_eq!(ctx.store.raw("siren").unwrap().value, "1");

        clock.set(2);
        ctx.store.set_final(&PointSample::new("pv", "5", 2)).unwrap();
        processor.run_cycle(&ctx).await.unwrap();
        assert_eq!(ctx.store.raw("siren").unwrap().value, "0");
    }

    #[tokio::test]
    async fn missing_input_holds_the_previous_state() {
        let (ctx, _, clock) = fixture(vec![comparative_alarm("a1", 10.0, 5.0)]);
        let processor = AlarmProcessor::new();
        clock.set(0);
        ctx.store
            .set_final(&PointSample::new("pv", "12", 0))
            .unwrap();
        processor.run_cycle(&ctx).await.unwrap();
        assert_eq!(
            processor.states.lock().get("a1").unwrap().status,
            AlarmStatus::Suspicious
        );
        // unparsable input: state held
        clock.set(1);
        ctx.store
            .set_final(&PointSample::new("pv", "bogus", 1))
            .unwrap();
        processor.run_cycle(&ctx).await.unwrap();
        assert_eq!(
            processor.states.lock().get("a1").unwrap().status,
            AlarmStatus::Suspicious
        );
    }
}
