//! Configuration and runtime data model
//!
//! Configuration records are created by the CRUD layer and read-mostly
//! here; runtime state is owned by the processor that evaluates it.
//! Everything that crosses the KV or repository boundary serializes as
//! camelCase JSON.

mod alarm;
mod average;
mod comparison;
mod conditional;
mod deadband;
mod global;
mod pid;
mod point;
mod rate;
mod schedule;
mod selector;
mod source;
mod statistical;
mod totalizer;
mod tuning;
mod value;
mod write_action;

pub use alarm::{
    ActiveAlarm, AlarmCondition, AlarmConfig, AlarmHistoryEntry, AlarmKind, AlarmStatus,
    ExternalAlarm, MonitorAlarmState,
};
pub use average::{AverageInput, AverageMethod, MovingAverageConfig, OutlierFilter};
pub use comparison::{CompareOp, ComparisonConfig, ComparisonGroup, GroupMode};
pub use conditional::{IfBranch, IfConfig, OutputKind};
pub use deadband::{DeadbandConfig, DeadbandMode, DeadbandState};
pub use global::{GlobalKind, GlobalVariable};
pub use pid::{DigitalCompanion, PidCheckpoint, PidConfig, PidGains};
pub use point::{Calibration, InterfaceKind, Point, PointKind, Range, SmoothingMethod};
pub use rate::{RateAlarm, RateMethod, RateOfChangeConfig};
pub use schedule::{NullEndBehavior, ScheduleConfig, ScheduleEntry};
pub use selector::{MinMaxConfig, SelectorFailover, SelectorMode};
pub use source::SourceRef;
pub use statistical::{StatKind, StatOutput, StatisticalConfig, WindowMode};
pub use totalizer::{TotalizerConfig, TotalizerMode, TotalizerState};
pub use tuning::{TuningResult, TuningSession, TuningStatus};
pub use value::{PointSample, WriteItem};
pub use write_action::{ActionValue, WriteActionConfig};
