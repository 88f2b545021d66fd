//! In-memory configuration repository
//!
//! Backs the test suite and the default binary wiring. Real
//! deployments bind a relational implementation of `ConfigRepository`
//! instead; the engine only ever sees the trait.

use crate::error::{EngineError, EngineResult};
use crate::model::{
    ActiveAlarm, AlarmConfig, AlarmHistoryEntry, ComparisonConfig, DeadbandConfig, IfConfig,
    MinMaxConfig, MovingAverageConfig, PidConfig, PidGains, Point, RateOfChangeConfig,
    ScheduleConfig, StatisticalConfig, TotalizerConfig, TuningSession, WriteActionConfig,
    WriteItem,
};
use crate::repo::{AlarmBatch, ConfigRepository};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Seed document loaded by the binary (`--seed blocks.json`)
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SeedConfig {
    pub points: Vec<Point>,
    pub alarms: Vec<AlarmConfig>,
    pub pid_memories: Vec<PidConfig>,
    pub totalizers: Vec<TotalizerConfig>,
    pub rate_of_change_memories: Vec<RateOfChangeConfig>,
    pub moving_averages: Vec<MovingAverageConfig>,
    pub deadbands: Vec<DeadbandConfig>,
    pub schedules: Vec<ScheduleConfig>,
    pub comparisons: Vec<ComparisonConfig>,
    pub min_max_selectors: Vec<MinMaxConfig>,
    pub conditionals: Vec<IfConfig>,
    pub statisticals: Vec<StatisticalConfig>,
    pub write_actions: Vec<WriteActionConfig>,
}

#[derive(Default)]
struct Inner {
    seed: SeedConfig,
    write_items: HashMap<String, WriteItem>,
    active_alarms: HashMap<String, ActiveAlarm>,
    alarm_history: Vec<AlarmHistoryEntry>,
    tuning_sessions: HashMap<String, TuningSession>,
    totalizer_resets: HashSet<String>,
    write_action_counts: HashMap<String, u32>,
    provisioned_years: HashSet<i32>,
    reachable: bool,
}

/// In-memory repository with full trait coverage plus test inspection
/// helpers
pub struct MemoryRepository {
    inner: RwLock<Inner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::from_seed(SeedConfig::default())
    }

    pub fn from_seed(seed: SeedConfig) -> Self {
        Self {
            inner: RwLock::new(Inner {
                seed,
                reachable: true,
                ..Inner::default()
            }),
        }
    }

    /// Simulate the configuration database dropping off the network
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.write().reachable = reachable;
    }

    pub fn set_points(&self, points: Vec<Point>) {
        self.inner.write().seed.points = points;
    }

    pub fn set_alarms(&self, alarms: Vec<AlarmConfig>) {
        self.inner.write().seed.alarms = alarms;
    }

    pub fn set_pid_memories(&self, pids: Vec<PidConfig>) {
        self.inner.write().seed.pid_memories = pids;
    }

    pub fn set_totalizers(&self, blocks: Vec<TotalizerConfig>) {
        self.inner.write().seed.totalizers = blocks;
    }

    pub fn set_rate_of_change_memories(&self, blocks: Vec<RateOfChangeConfig>) {
        self.inner.write().seed.rate_of_change_memories = blocks;
    }

    pub fn set_moving_averages(&self, blocks: Vec<MovingAverageConfig>) {
        self.inner.write().seed.moving_averages = blocks;
    }

    pub fn set_deadbands(&self, blocks: Vec<DeadbandConfig>) {
        self.inner.write().seed.deadbands = blocks;
    }

    pub fn set_schedules(&self, blocks: Vec<ScheduleConfig>) {
        self.inner.write().seed.schedules = blocks;
    }

    pub fn set_comparisons(&self, blocks: Vec<ComparisonConfig>) {
        self.inner.write().seed.comparisons = blocks;
    }

    pub fn set_min_max_selectors(&self, blocks: Vec<MinMaxConfig>) {
        self.inner.write().seed.min_max_selectors = blocks;
    }

    pub fn set_conditionals(&self, blocks: Vec<IfConfig>) {
        self.inner.write().seed.conditionals = blocks;
    }

    pub fn set_statisticals(&self, blocks: Vec<StatisticalConfig>) {
        self.inner.write().seed.statisticals = blocks;
    }

    pub fn set_write_actions(&self, blocks: Vec<WriteActionConfig>) {
        self.inner.write().seed.write_actions = blocks;
    }

    pub fn insert_tuning_session(&self, session: TuningSession) {
        self.inner
            .write()
            .tuning_sessions
            .insert(session.pid_id.clone(), session);
    }

    pub fn tuning_session(&self, pid_id: &str) -> Option<TuningSession> {
        self.inner.read().tuning_sessions.get(pid_id).cloned()
    }

    pub fn write_item(&self, point_id: &str) -> Option<WriteItem> {
        self.inner.read().write_items.get(point_id).cloned()
    }

    pub fn alarm_history_entries(&self) -> Vec<AlarmHistoryEntry> {
        self.inner.read().alarm_history.clone()
    }

    pub fn provisioned_years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.inner.read().provisioned_years.iter().copied().collect();
        years.sort_unstable();
        years
    }

    pub fn write_action_count(&self, block_id: &str) -> Option<u32> {
        self.inner.read().write_action_counts.get(block_id).copied()
    }

    fn guard(&self) -> EngineResult<()> {
        if self.inner.read().reachable {
            Ok(())
        } else {
            Err(EngineError::Repository("configuration database unreachable".into()))
        }
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfigRepository for MemoryRepository {
    async fn ping(&self) -> EngineResult<()> {
        self.guard()
    }

    async fn points(&self) -> EngineResult<Vec<Point>> {
        self.guard()?;
        Ok(self.inner.read().seed.points.clone())
    }

    async fn alarms(&self) -> EngineResult<Vec<AlarmConfig>> {
        self.guard()?;
        Ok(self.inner.read().seed.alarms.clone())
    }

    async fn pid_memories(&self) -> EngineResult<Vec<PidConfig>> {
        self.guard()?;
        Ok(self.inner.read().seed.pid_memories.clone())
    }

    async fn totalizers(&self) -> EngineResult<Vec<TotalizerConfig>> {
        self.guard()?;
        Ok(self.inner.read().seed.totalizers.clone())
    }

    async fn rate_of_change_memories(&self) -> EngineResult<Vec<RateOfChangeConfig>> {
        self.guard()?;
        Ok(self.inner.read().seed.rate_of_change_memories.clone())
    }

    async fn moving_averages(&self) -> EngineResult<Vec<MovingAverageConfig>> {
        self.guard()?;
        Ok(self.inner.read().seed.moving_averages.clone())
    }

    async fn deadbands(&self) -> EngineResult<Vec<DeadbandConfig>> {
        self.guard()?;
        Ok(self.inner.read().seed.deadbands.clone())
    }

    async fn schedules(&self) -> EngineResult<Vec<ScheduleConfig>> {
        self.guard()?;
        Ok(self.inner.read().seed.schedules.clone())
    }

    async fn comparisons(&self) -> EngineResult<Vec<ComparisonConfig>> {
        self.guard()?;
        Ok(self.inner.read().seed.comparisons.clone())
    }

    async fn min_max_selectors(&self) -> EngineResult<Vec<MinMaxConfig>> {
        self.guard()?;
        Ok(self.inner.read().seed.min_max_selectors.clone())
    }

    async fn conditionals(&self) -> EngineResult<Vec<IfConfig>> {
        self.guard()?;
        Ok(self.inner.read().seed.conditionals.clone())
    }

    async fn statisticals(&self) -> EngineResult<Vec<StatisticalConfig>> {
        self.guard()?;
        Ok(self.inner.read().seed.statisticals.clone())
    }

    async fn write_actions(&self) -> EngineResult<Vec<WriteActionConfig>> {
        self.guard()?;
        Ok(self.inner.read().seed.write_actions.clone())
    }

    async fn upsert_write_item(&self, item: WriteItem) -> EngineResult<()> {
        self.guard()?;
        self.inner
            .write()
            .write_items
            .insert(item.point_id.clone(), item);
        Ok(())
    }

    async fn pending_write_items(&self) -> EngineResult<Vec<WriteItem>> {
        self.guard()?;
        Ok(self.inner.read().write_items.values().cloned().collect())
    }

    async fn active_alarms(&self) -> EngineResult<Vec<ActiveAlarm>> {
        self.guard()?;
        Ok(self.inner.read().active_alarms.values().cloned().collect())
    }

    async fn commit_alarm_batch(&self, batch: AlarmBatch) -> EngineResult<()> {
        self.guard()?;
        let mut inner = self.inner.write();
        for alarm in batch.upserts {
            inner.active_alarms.insert(alarm.alarm_id.clone(), alarm);
        }
        for id in &batch.deletes {
            inner.active_alarms.remove(id);
        }
        inner.alarm_history.extend(batch.history);
        Ok(())
    }

    async fn tuning_sessions(&self) -> EngineResult<Vec<TuningSession>> {
        self.guard()?;
        Ok(self.inner.read().tuning_sessions.values().cloned().collect())
    }

    async fn update_tuning_session(&self, session: TuningSession) -> EngineResult<()> {
        self.guard()?;
        self.inner
            .write()
            .tuning_sessions
            .insert(session.pid_id.clone(), session);
        Ok(())
    }

    async fn update_pid_gains(&self, pid_id: &str, gains: PidGains) -> EngineResult<()> {
        self.guard()?;
        let mut inner = self.inner.write();
        let pid = inner
            .seed
            .pid_memories
            .iter_mut()
            .find(|p| p.id == pid_id)
            .ok_or_else(|| EngineError::BlockNotFound(pid_id.to_string()))?;
        pid.gains = gains;
        Ok(())
    }

    async fn take_totalizer_reset(&self, block_id: &str) -> EngineResult<bool> {
        self.guard()?;
        Ok(self.inner.write().totalizer_resets.remove(block_id))
    }

    async fn request_totalizer_reset(&self, block_id: &str) -> EngineResult<()> {
        self.guard()?;
        self.inner
            .write()
            .totalizer_resets
            .insert(block_id.to_string());
        Ok(())
    }

    async fn set_write_action_count(&self, block_id: &str, count: u32) -> EngineResult<()> {
        self.guard()?;
        self.inner
            .write()
            .write_action_counts
            .insert(block_id.to_string(), count);
        Ok(())
    }

    async fn ensure_history_partitions(&self, year: i32) -> EngineResult<()> {
        self.guard()?;
        self.inner.write().provisioned_years.insert(year);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_items_keep_one_row_per_point() {
        let repo = MemoryRepository::new();
        repo.upsert_write_item(WriteItem {
            point_id: "p1".into(),
            value: "1".into(),
            unix_seconds: 1,
            duration_seconds: 0,
        })
        .await
        .unwrap();
        repo.upsert_write_item(WriteItem {
            point_id: "p1".into(),
            value: "2".into(),
            unix_seconds: 2,
            duration_seconds: 0,
        })
        .await
        .unwrap();
        let pending = repo.pending_write_items().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].value, "2");
    }

    #[tokio::test]
    async fn unreachable_repository_fails_ping() {
        let repo = MemoryRepository::new();
        repo.set_reachable(false);
        assert!(repo.ping().await.is_err());
        repo.set_reachable(true);
        assert!(repo.ping().await.is_ok());
    }

    #[tokio::test]
    async fn totalizer_reset_is_consumed_once() {
        let repo = MemoryRepository::new();
        repo.request_totalizer_reset("t1").await.unwrap();
        assert!(repo.take_totalizer_reset("t1").await.unwrap());
        assert!(!repo.take_totalizer_reset("t1").await.unwrap());
    }
}
