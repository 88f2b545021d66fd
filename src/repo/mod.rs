//! External collaborator interfaces
//!
//! The configuration database and the historian are external systems;
//! the engine sees them only through these traits. In-memory
//! implementations back the test suite and the default binary wiring.

mod historian;
mod memory;

pub use historian::{history_collection_name, Historian, MemoryHistorian};
pub use memory::{MemoryRepository, SeedConfig};

use crate::error::EngineResult;
use crate::model::{
    ActiveAlarm, AlarmConfig, AlarmHistoryEntry, ComparisonConfig, DeadbandConfig, IfConfig,
    MinMaxConfig, MovingAverageConfig, PidConfig, PidGains, Point, RateOfChangeConfig,
    ScheduleConfig, StatisticalConfig, TotalizerConfig, TuningSession, WriteActionConfig,
    WriteItem,
};
use async_trait::async_trait;

/// Alarm mutations accumulated during one cycle and committed as a
/// single batch at the cycle boundary
#[derive(Debug, Default, Clone)]
pub struct AlarmBatch {
    pub upserts: Vec<ActiveAlarm>,
    pub deletes: Vec<String>,
    pub history: Vec<AlarmHistoryEntry>,
}

impl AlarmBatch {
    pub fn is_empty(&self) -> bool {
        self.upserts.is_empty() && self.deletes.is_empty() && self.history.is_empty()
    }
}

/// Configuration database interface
///
/// Access is per-processor via short-lived scoped calls; the engine
/// never holds a transaction across a cycle.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    /// Reachability probe used by the wait-for-store phase
    async fn ping(&self) -> EngineResult<()>;

    async fn points(&self) -> EngineResult<Vec<Point>>;
    async fn alarms(&self) -> EngineResult<Vec<AlarmConfig>>;
    async fn pid_memories(&self) -> EngineResult<Vec<PidConfig>>;
    async fn totalizers(&self) -> EngineResult<Vec<TotalizerConfig>>;
    async fn rate_of_change_memories(&self) -> EngineResult<Vec<RateOfChangeConfig>>;
    async fn moving_averages(&self) -> EngineResult<Vec<MovingAverageConfig>>;
    async fn deadbands(&self) -> EngineResult<Vec<DeadbandConfig>>;
    async fn schedules(&self) -> EngineResult<Vec<ScheduleConfig>>;
    async fn comparisons(&self) -> EngineResult<Vec<ComparisonConfig>>;
    async fn min_max_selectors(&self) -> EngineResult<Vec<MinMaxConfig>>;
    async fn conditionals(&self) -> EngineResult<Vec<IfConfig>>;
    async fn statisticals(&self) -> EngineResult<Vec<StatisticalConfig>>;
    async fn write_actions(&self) -> EngineResult<Vec<WriteActionConfig>>;

    /// Upsert a pending driver write; one row per point id
    async fn upsert_write_item(&self, item: WriteItem) -> EngineResult<()>;
    /// Pending writes awaiting driver consumption
    async fn pending_write_items(&self) -> EngineResult<Vec<WriteItem>>;

    async fn active_alarms(&self) -> EngineResult<Vec<ActiveAlarm>>;
    async fn commit_alarm_batch(&self, batch: AlarmBatch) -> EngineResult<()>;

    async fn tuning_sessions(&self) -> EngineResult<Vec<TuningSession>>;
    async fn update_tuning_session(&self, session: TuningSession) -> EngineResult<()>;
    /// Operator gain apply; the caller also deletes the PID checkpoint
    async fn update_pid_gains(&self, pid_id: &str, gains: PidGains) -> EngineResult<()>;

    /// Consume a pending manual reset request for a totalizer
    async fn take_totalizer_reset(&self, block_id: &str) -> EngineResult<bool>;
    async fn request_totalizer_reset(&self, block_id: &str) -> EngineResult<()>;

    async fn set_write_action_count(&self, block_id: &str, count: u32) -> EngineResult<()>;

    /// Create missing monthly history partitions for a calendar year
    async fn ensure_history_partitions(&self, year: i32) -> EngineResult<()>;
}
